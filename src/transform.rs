use crate::config::DbtSettings;
use crate::error::Error;
use crate::table::Entity;
use log::{info, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Months touched by a flow, carried to the mart rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MartSelector {
    pub entity: Entity,
    pub months: BTreeSet<(i32, u32)>,
}

impl fmt::Display for MartSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let months: Vec<String> = self
            .months
            .iter()
            .map(|(year, month)| format!("{year}-{month:02}"))
            .collect();
        write!(f, "{} [{}]", self.entity, months.join(", "))
    }
}

/// Rebuilds the layers derived from the raw tables.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TransformStage: Send + Sync + 'static {
    async fn rebuild_staging(&self, entity: Entity) -> Result<(), Error>;

    async fn rebuild_mart(&self, selector: &MartSelector) -> Result<(), Error>;
}

/// Runs `dbt build` for the tagged models of one entity. Models are always
/// rebuilt in full; the months in a selector are only logged.
pub struct DbtTransformStage {
    settings: DbtSettings,
    platform: String,
}

impl DbtTransformStage {
    pub fn new(settings: DbtSettings, platform: &str) -> Self {
        DbtTransformStage {
            settings,
            platform: platform.to_string(),
        }
    }

    fn staging_tag(&self, entity: Entity) -> String {
        format!("tag:staging_{}_{}", self.platform, entity)
    }

    fn mart_tag(&self, entity: Entity) -> String {
        format!("tag:mart_{}_{}", self.platform, entity)
    }

    async fn build(&self, selector: &str) -> Result<(), Error> {
        let failed = |message: String| Error::Transform {
            selector: selector.to_string(),
            message,
        };

        info!("Running {} build --select {}", self.settings.bin, selector);
        let mut child = Command::new(&self.settings.bin)
            .arg("build")
            .arg("--project-dir")
            .arg(&self.settings.project_dir)
            .arg("--profiles-dir")
            .arg(&self.settings.profiles_dir)
            .arg("--select")
            .arg(selector)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| failed(format!("could not start {}: {}", self.settings.bin, err)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (_, errors) = tokio::join!(stream_lines(stdout, false), stream_lines(stderr, true));

        let status = child.wait().await?;
        if !status.success() {
            let detail = errors.last().cloned().unwrap_or_default();
            return Err(failed(format!("exited with {status} {detail}").trim().to_string()));
        }

        info!("Finished {}", selector);
        Ok(())
    }
}

/// Forwards each line to the log and returns the lines read.
async fn stream_lines<R: AsyncRead + Unpin>(reader: Option<R>, is_stderr: bool) -> Vec<String> {
    let Some(reader) = reader else {
        return Vec::new();
    };

    let mut collected = Vec::new();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!("dbt: {}", line);
        } else {
            info!("dbt: {}", line);
        }
        collected.push(line);
    }
    collected
}

#[async_trait::async_trait]
impl TransformStage for DbtTransformStage {
    async fn rebuild_staging(&self, entity: Entity) -> Result<(), Error> {
        self.build(&self.staging_tag(entity)).await
    }

    async fn rebuild_mart(&self, selector: &MartSelector) -> Result<(), Error> {
        info!("Rebuilding mart for {}", selector);
        self.build(&self.mart_tag(selector.entity)).await
    }
}
