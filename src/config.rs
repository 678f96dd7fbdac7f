use crate::error::Error;
use crate::retry::{Backoff, RetryPolicy};
use crate::table::{Entity, TableNaming};
use clap::Args as ClapArgs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://graph.facebook.com";
const DEFAULT_API_VERSION: &str = "v19.0";
const DEFAULT_PLATFORM: &str = "facebook";
const SECRETS_DIR: &str = "./secrets";
const WAREHOUSE_DIR: &str = "./warehouse";
const MAX_STALENESS_MINUTES: u64 = 31 * 24 * 60;
const MAX_WAIT_SECS: u64 = 24 * 60 * 60;

#[derive(ClapArgs, Debug, Clone)]
pub struct Config {
    #[arg(long, env = "COMPANY")]
    pub(crate) company: Option<String>,

    #[arg(long, env = "PROJECT")]
    pub(crate) project: Option<String>,

    #[arg(long, default_value = DEFAULT_PLATFORM, env = "PLATFORM")]
    pub(crate) platform: Option<String>,

    #[arg(long, env = "DEPARTMENT")]
    pub(crate) department: Option<String>,

    #[arg(long, env = "ACCOUNT")]
    pub(crate) account: Option<String>,

    #[arg(long, default_value = DEFAULT_API_URL, env = "API_URL")]
    pub(crate) api_url: String,

    #[arg(long, default_value = DEFAULT_API_VERSION, env = "API_VERSION")]
    pub(crate) api_version: String,

    #[arg(long, default_value = SECRETS_DIR, env = "SECRETS_DIR")]
    pub(crate) secrets_dir: PathBuf,

    #[arg(long, default_value = WAREHOUSE_DIR, env = "WAREHOUSE_DIR")]
    pub(crate) warehouse_dir: PathBuf,

    #[arg(long, default_value_t = 60, env = "STALENESS_MINUTES")]
    pub(crate) staleness_minutes: u64,

    #[arg(long, default_value_t = 60, env = "DAY_COOLDOWN_SECS")]
    pub(crate) day_cooldown_secs: u64,

    #[arg(long, default_value_t = 3, env = "INSIGHT_MAX_ATTEMPTS")]
    pub(crate) insight_max_attempts: u32,

    #[arg(long, default_value_t = 3, env = "METADATA_MAX_ATTEMPTS")]
    pub(crate) metadata_max_attempts: u32,

    #[arg(long, default_value_t = 60, env = "METADATA_BACKOFF_BASE_SECS")]
    pub(crate) metadata_backoff_base_secs: u64,

    #[arg(long, default_value_t = 30, env = "METADATA_BACKOFF_INCREMENT_SECS")]
    pub(crate) metadata_backoff_increment_secs: u64,

    #[arg(long, default_value_t = 2, env = "MAX_CONCURRENCY")]
    pub(crate) max_concurrency: usize,

    #[arg(long, default_value_t = 180, env = "API_TIMEOUT_SECS")]
    pub(crate) api_timeout_secs: u64,

    #[arg(long, default_value_t = 10, env = "SECRET_TIMEOUT_SECS")]
    pub(crate) secret_timeout_secs: u64,

    #[arg(long, default_value = "dbt", env = "DBT_BIN")]
    pub(crate) dbt_bin: String,

    #[arg(long, default_value = "dbt", env = "DBT_PROJECT_DIR")]
    pub(crate) dbt_project_dir: PathBuf,

    #[arg(long, default_value = "dbt", env = "DBT_PROFILES_DIR")]
    pub(crate) dbt_profiles_dir: PathBuf,

    #[arg(
        long,
        value_delimiter = ',',
        default_value = "campaign,ad",
        env = "LAYERS",
        value_parser = parse_layer
    )]
    pub(crate) layers: Vec<Entity>,
}

fn parse_layer(s: &str) -> Result<Entity, String> {
    match s.trim() {
        "campaign" => Ok(Entity::Campaign),
        "ad" => Ok(Entity::Ad),
        other => Err(format!("Unsupported layer '{other}', expected campaign or ad")),
    }
}

#[derive(Debug, Clone)]
pub struct DbtSettings {
    pub bin: String,
    pub project_dir: PathBuf,
    pub profiles_dir: PathBuf,
}

/// Configuration checked once at startup and handed to every component.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub naming: TableNaming,
    pub api_url: String,
    pub api_version: String,
    pub secrets_dir: PathBuf,
    pub warehouse_dir: PathBuf,
    pub staleness: chrono::Duration,
    pub day_cooldown: Duration,
    pub insight_retry: RetryPolicy,
    pub metadata_retry: RetryPolicy,
    pub max_concurrency: usize,
    pub api_timeout: Duration,
    pub secret_timeout: Duration,
    pub dbt: DbtSettings,
    pub layers: Vec<Entity>,
}

impl Config {
    pub fn validate(self) -> Result<PipelineConfig, Error> {
        let required = [
            ("COMPANY", &self.company),
            ("PROJECT", &self.project),
            ("PLATFORM", &self.platform),
            ("DEPARTMENT", &self.department),
            ("ACCOUNT", &self.account),
        ];
        let missing: Vec<String> = required
            .iter()
            .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
            .map(|(key, _)| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingConfig { keys: missing });
        }

        for (key, value) in [
            ("INSIGHT_MAX_ATTEMPTS", self.insight_max_attempts as usize),
            ("METADATA_MAX_ATTEMPTS", self.metadata_max_attempts as usize),
            ("MAX_CONCURRENCY", self.max_concurrency),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig {
                    key: key.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        for (key, value, max) in [
            ("STALENESS_MINUTES", self.staleness_minutes, MAX_STALENESS_MINUTES),
            ("DAY_COOLDOWN_SECS", self.day_cooldown_secs, MAX_WAIT_SECS),
            ("METADATA_BACKOFF_BASE_SECS", self.metadata_backoff_base_secs, MAX_WAIT_SECS),
            (
                "METADATA_BACKOFF_INCREMENT_SECS",
                self.metadata_backoff_increment_secs,
                MAX_WAIT_SECS,
            ),
        ] {
            if value > max {
                return Err(Error::InvalidConfig {
                    key: key.to_string(),
                    reason: format!("must be at most {max}"),
                });
            }
        }
        if self.layers.is_empty() {
            return Err(Error::InvalidConfig {
                key: "LAYERS".to_string(),
                reason: "at least one layer is required".to_string(),
            });
        }

        let api_timeout = Duration::from_secs(self.api_timeout_secs);
        let mut layers = self.layers.clone();
        layers.sort();
        layers.dedup();

        Ok(PipelineConfig {
            naming: TableNaming {
                project: self.project.unwrap_or_default(),
                company: self.company.unwrap_or_default(),
                platform: self.platform.unwrap_or_default(),
                department: self.department.unwrap_or_default(),
                account: self.account.unwrap_or_default(),
            },
            api_url: self.api_url,
            api_version: self.api_version,
            secrets_dir: self.secrets_dir,
            warehouse_dir: self.warehouse_dir,
            staleness: chrono::Duration::minutes(self.staleness_minutes as i64),
            day_cooldown: Duration::from_secs(self.day_cooldown_secs),
            insight_retry: RetryPolicy::new(
                self.insight_max_attempts,
                Backoff::Exponential {
                    unit: Duration::from_secs(1),
                },
            )
            .with_call_timeout(api_timeout),
            metadata_retry: RetryPolicy::new(
                self.metadata_max_attempts,
                Backoff::Linear {
                    base: Duration::from_secs(self.metadata_backoff_base_secs),
                    increment: Duration::from_secs(self.metadata_backoff_increment_secs),
                },
            )
            .with_call_timeout(api_timeout),
            max_concurrency: self.max_concurrency,
            api_timeout,
            secret_timeout: Duration::from_secs(self.secret_timeout_secs),
            dbt: DbtSettings {
                bin: self.dbt_bin,
                project_dir: self.dbt_project_dir,
                profiles_dir: self.dbt_profiles_dir,
            },
            layers,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config() -> Config {
        Config {
            company: Some("acme".to_string()),
            project: Some("proj".to_string()),
            platform: Some("facebook".to_string()),
            department: Some("marketing".to_string()),
            account: Some("main".to_string()),
            api_url: DEFAULT_API_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            secrets_dir: PathBuf::from("/path/to/secrets"),
            warehouse_dir: PathBuf::from("/path/to/warehouse"),
            staleness_minutes: 60,
            day_cooldown_secs: 60,
            insight_max_attempts: 3,
            metadata_max_attempts: 3,
            metadata_backoff_base_secs: 60,
            metadata_backoff_increment_secs: 30,
            max_concurrency: 2,
            api_timeout_secs: 180,
            secret_timeout_secs: 10,
            dbt_bin: "dbt".to_string(),
            dbt_project_dir: PathBuf::from("dbt"),
            dbt_profiles_dir: PathBuf::from("dbt"),
            layers: vec![Entity::Ad, Entity::Campaign, Entity::Ad],
        }
    }

    #[test]
    fn test_validate_builds_pipeline_config() {
        let config = test_config().validate().unwrap();
        assert_eq!(config.naming.company, "acme");
        assert_eq!(config.naming.account, "main");
        assert_eq!(config.staleness, chrono::Duration::hours(1));
        assert_eq!(config.insight_retry.max_attempts(), 3);
        assert_eq!(config.metadata_retry.delay(2), Duration::from_secs(90));
        assert_eq!(config.layers, vec![Entity::Campaign, Entity::Ad]);
    }

    #[test]
    fn test_validate_enumerates_missing_keys() {
        let mut config = test_config();
        config.company = None;
        config.account = Some("  ".to_string());
        config.project = None;

        let result = config.validate();
        assert!(matches!(
            result.unwrap_err(),
            Error::MissingConfig { keys } if keys == vec!["COMPANY", "PROJECT", "ACCOUNT"]
        ));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = test_config();
        config.max_concurrency = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            Error::InvalidConfig { key, .. } if key == "MAX_CONCURRENCY"
        ));
    }

    #[test]
    fn test_validate_bounds_durations() {
        let mut config = test_config();
        config.staleness_minutes = u64::MAX;
        assert!(matches!(
            config.validate().unwrap_err(),
            Error::InvalidConfig { key, .. } if key == "STALENESS_MINUTES"
        ));

        let mut config = test_config();
        config.metadata_backoff_increment_secs = MAX_WAIT_SECS + 1;
        assert!(matches!(
            config.validate().unwrap_err(),
            Error::InvalidConfig { key, .. } if key == "METADATA_BACKOFF_INCREMENT_SECS"
        ));

        let mut config = test_config();
        config.staleness_minutes = MAX_STALENESS_MINUTES;
        assert_eq!(config.validate().unwrap().staleness, chrono::Duration::days(31));
    }

    #[test]
    fn test_parse_layer() {
        assert_eq!(parse_layer("campaign"), Ok(Entity::Campaign));
        assert_eq!(parse_layer(" ad "), Ok(Entity::Ad));
        assert!(parse_layer("adset").is_err());
    }
}
