use crate::error::Error;
use crate::table::TableNaming;
use log::info;
use std::path::PathBuf;
use std::time::Duration;

#[async_trait::async_trait]
pub trait SecretsProvider: Send + Sync + 'static {
    async fn resolve(&self, secret_id: &str) -> Result<String, Error>;
}

/// Secret names derived from the table naming identity.
pub struct SecretIds<'a> {
    naming: &'a TableNaming,
}

impl<'a> SecretIds<'a> {
    pub fn new(naming: &'a TableNaming) -> Self {
        SecretIds { naming }
    }

    pub fn account_id(&self) -> String {
        format!(
            "{}_secret_{}_{}_account_id_{}",
            self.naming.company, self.naming.department, self.naming.platform, self.naming.account
        )
    }

    pub fn access_token(&self) -> String {
        format!(
            "{}_secret_all_{}_token_access_user",
            self.naming.company, self.naming.platform
        )
    }

    pub fn path(&self, secret_id: &str) -> String {
        format!(
            "projects/{}/secrets/{}/versions/latest",
            self.naming.project, secret_id
        )
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account_id: String,
    pub access_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .field("access_token", &"***")
            .finish()
    }
}

/// Resolves account id and access token. Any failure ends the run.
pub async fn resolve_credentials(
    provider: &dyn SecretsProvider,
    naming: &TableNaming,
) -> Result<Credentials, Error> {
    let ids = SecretIds::new(naming);

    let mut resolved = Vec::with_capacity(2);
    for secret_id in [ids.account_id(), ids.access_token()] {
        info!("Resolving secret {}", ids.path(&secret_id));
        resolved.push(provider.resolve(&secret_id).await?);
    }

    let access_token = resolved.pop().unwrap_or_default();
    let account_id = resolved.pop().unwrap_or_default();
    Ok(Credentials {
        account_id,
        access_token,
    })
}

/// Reads `SECRET_<ID>` from the environment, else `<dir>/<id>`.
pub struct LocalSecretsProvider {
    dir: PathBuf,
    timeout: Duration,
}

impl LocalSecretsProvider {
    pub fn new(dir: PathBuf, timeout: Duration) -> Self {
        LocalSecretsProvider { dir, timeout }
    }

    fn env_key(secret_id: &str) -> String {
        format!("SECRET_{}", secret_id.to_uppercase())
    }
}

#[async_trait::async_trait]
impl SecretsProvider for LocalSecretsProvider {
    async fn resolve(&self, secret_id: &str) -> Result<String, Error> {
        let failed = |reason: String| Error::Secret {
            secret_id: secret_id.to_string(),
            reason,
        };

        let value = match std::env::var(Self::env_key(secret_id)) {
            Ok(value) => value,
            Err(_) => {
                let path = self.dir.join(secret_id);
                tokio::time::timeout(self.timeout, tokio::fs::read_to_string(&path))
                    .await
                    .map_err(|_| failed(format!("timed out after {}s", self.timeout.as_secs())))?
                    .map_err(|err| failed(format!("{}: {}", path.display(), err)))?
            }
        };

        let value = value.trim();
        if value.is_empty() {
            return Err(failed("secret is empty".to_string()));
        }
        Ok(value.to_string())
    }
}
