use crate::api_client::{AdsApi, InsightRow};
use crate::config::PipelineConfig;
use crate::data::{column_strings, insights_to_batch, metadata_to_batch, EntityBatch};
use crate::error::Error;
use crate::freshness::FreshnessOracle;
use crate::orchestrator::Flow;
use crate::retry::{RetryPolicy, RetryingFetcher};
use crate::table::{Entity, MetadataKind, TableNaming};
use crate::transform::{MartSelector, TransformStage};
use crate::upsert::{UpsertKeys, UpsertWriter};
use crate::window::IngestionWindow;
use chrono::{Datelike, NaiveDate, Utc};
use log::{error, info, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Shared collaborators of every flow.
#[derive(Clone)]
pub struct FlowDeps {
    pub api: Arc<dyn AdsApi>,
    pub writer: Arc<UpsertWriter>,
    pub oracle: FreshnessOracle,
    pub transform: Arc<dyn TransformStage>,
    pub naming: TableNaming,
}

#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub insight_retry: RetryPolicy,
    pub metadata_retry: RetryPolicy,
    pub day_cooldown: Duration,
    pub account_id: String,
}

impl FlowSettings {
    pub fn new(config: &PipelineConfig, account_id: &str) -> Self {
        FlowSettings {
            insight_retry: config.insight_retry,
            metadata_retry: config.metadata_retry,
            day_cooldown: config.day_cooldown,
            account_id: account_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionStatus {
    Succeeded,
    /// Some ids never resolved; the rows that did were written.
    Partial,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub status: SectionStatus,
}

/// What one flow did over its window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowSummary {
    pub entity: String,
    pub days_fetched: usize,
    pub days_skipped: usize,
    pub days_empty: usize,
    pub rows_written: u64,
    pub touched_ids: BTreeSet<String>,
    pub months: BTreeSet<(i32, u32)>,
    pub sections: Vec<Section>,
    pub warnings: Vec<String>,
}

impl FlowSummary {
    pub fn new(entity: &str) -> Self {
        FlowSummary {
            entity: entity.to_string(),
            ..FlowSummary::default()
        }
    }

    fn record(&mut self, name: impl fmt::Display, status: SectionStatus) {
        self.sections.push(Section {
            name: name.to_string(),
            status,
        });
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn failed_sections(&self) -> Vec<String> {
        self.sections
            .iter()
            .filter(|s| s.status == SectionStatus::Failed)
            .map(|s| s.name.clone())
            .collect()
    }
}

/// Ids seen in the insights of one window.
#[derive(Debug, Default)]
struct Touched {
    ids: BTreeSet<String>,
    adset_ids: BTreeSet<String>,
}

/// Insights for one entity level, then the metadata, staging and mart
/// sections driven by the ids the insights contained.
pub struct InsightsFlow {
    entity: Entity,
    deps: FlowDeps,
    settings: FlowSettings,
}

impl InsightsFlow {
    pub fn new(entity: Entity, deps: FlowDeps, settings: FlowSettings) -> Self {
        InsightsFlow {
            entity,
            deps,
            settings,
        }
    }

    fn metadata_kinds(&self) -> &'static [MetadataKind] {
        match self.entity {
            Entity::Campaign => &[MetadataKind::Campaign],
            Entity::Ad => &[MetadataKind::Ad, MetadataKind::Adset, MetadataKind::Creative],
        }
    }

    /// Fetches and writes each day in ascending order. Any error ends the flow.
    async fn ingest_days(
        &self,
        window: &IngestionWindow,
        summary: &mut FlowSummary,
    ) -> Result<Touched, Error> {
        let fetcher = RetryingFetcher::new(self.settings.insight_retry);
        let mut touched = Touched::default();

        for day in window.days() {
            let target = self.deps.naming.insights(self.entity, day.year(), day.month());
            info!("Evaluating {} insights for {}", self.entity, day);

            if self.deps.oracle.is_fresh(&target, day).await {
                info!("{} for {} is fresh, skipping", target, day);
                summary.days_skipped += 1;
                continue;
            }

            if summary.days_fetched > 0 {
                info!(
                    "Cooling down {}s before fetching {}",
                    self.settings.day_cooldown.as_secs(),
                    day
                );
                tokio::time::sleep(self.settings.day_cooldown).await;
            }

            let rows = self.fetch_day(&fetcher, day).await?;
            summary.days_fetched += 1;

            if rows.is_empty() {
                summary.warn(format!("No {} insights returned for {}", self.entity, day));
                summary.days_empty += 1;
                continue;
            }

            let batch = insights_to_batch(self.entity, &rows, Utc::now())?;
            let written = self
                .deps
                .writer
                .upsert(&target, &batch, &UpsertKeys::date_column("date_start"))
                .await?;

            summary.rows_written += written.rows_written;
            summary.months.insert((day.year(), day.month()));
            touched
                .ids
                .extend(column_strings(&batch, self.entity.id_column())?);
            if self.entity == Entity::Ad {
                touched.adset_ids.extend(column_strings(&batch, "adset_id")?);
            }
            info!("Wrote {} row(s) for {} to {}", written.rows_written, day, target);
        }

        Ok(touched)
    }

    async fn fetch_day(
        &self,
        fetcher: &RetryingFetcher,
        day: NaiveDate,
    ) -> Result<Vec<InsightRow>, Error> {
        let api = &self.deps.api;
        let entity = self.entity;
        let unit = format!("{entity} insights for {day}");

        let report = fetcher
            .fetch_with_retry(&unit, || api.fetch_insights(entity, day, day))
            .await?;
        Ok(report.rows)
    }

    async fn account_name(&self) -> Option<String> {
        match self.deps.api.fetch_account_name().await {
            Ok(name) => name,
            Err(err) => {
                warn!("Could not fetch account name, leaving it empty: {}", err);
                None
            }
        }
    }

    /// Fetches metadata for `ids`, shrinking the retry scope to the ids that
    /// failed retryably, and upserts whatever resolved.
    async fn ingest_metadata(
        &self,
        kind: MetadataKind,
        ids: &BTreeSet<String>,
        account_name: Option<&str>,
        summary: &mut FlowSummary,
    ) -> Result<SectionStatus, Error> {
        info!("Fetching {} {} metadata record(s)", ids.len(), kind);
        let fetcher = RetryingFetcher::new(self.settings.metadata_retry);
        let api = &self.deps.api;

        let report = fetcher
            .fetch_units(ids.iter().cloned().collect(), |id: String| async move {
                api.fetch_metadata(kind, &id).await.map(|record| vec![record])
            })
            .await?;

        let batch = metadata_to_batch(
            kind,
            &report.rows,
            &self.settings.account_id,
            account_name,
            Utc::now(),
        )?;
        let entity_batch = EntityBatch::from_report(batch, &report);

        if entity_batch.rows_output() > 0 {
            let target = self.deps.naming.metadata(kind);
            let keys = UpsertKeys::natural(&["account_id", kind.id_column()]);
            let written = self
                .deps
                .writer
                .upsert(&target, entity_batch.batch(), &keys)
                .await?;
            summary.rows_written += written.rows_written;
        }

        info!(
            "{} metadata: {} of {} id(s) in {:.1}s, {:.0}s of it backing off (retryable failures left: {})",
            kind,
            entity_batch.rows_output(),
            entity_batch.rows_input(),
            entity_batch.time_elapsed().as_secs_f64(),
            report.backoffs.iter().sum::<Duration>().as_secs_f64(),
            entity_batch.retryable()
        );

        if entity_batch.failed_ids().is_empty() {
            return Ok(SectionStatus::Succeeded);
        }

        summary.warn(format!(
            "{} metadata incomplete, {} id(s) failed after {} attempt(s): {}",
            kind,
            entity_batch.failed_ids().len(),
            report.attempts,
            entity_batch.failed_ids().join(", ")
        ));
        if entity_batch.rows_output() == 0 {
            Ok(SectionStatus::Failed)
        } else {
            Ok(SectionStatus::Partial)
        }
    }

    async fn run_flow(&self, window: &IngestionWindow) -> Result<FlowSummary, Error> {
        let mut summary = FlowSummary::new(self.entity.as_str());
        info!(
            "Starting {} flow for {} to {}",
            self.entity,
            window.start(),
            window.end()
        );

        let touched = self.ingest_days(window, &mut summary).await?;

        if touched.ids.is_empty() {
            summary.warn(format!(
                "No {} ids in window {} to {}, skipping metadata and rebuilds",
                self.entity,
                window.start(),
                window.end()
            ));
            for kind in self.metadata_kinds() {
                summary.record(format!("metadata:{kind}"), SectionStatus::Skipped);
            }
            summary.record("staging", SectionStatus::Skipped);
            summary.record("mart", SectionStatus::Skipped);
            return Ok(summary);
        }
        summary.touched_ids = touched.ids.clone();

        let account_name = self.account_name().await;
        for kind in self.metadata_kinds() {
            let ids = match kind {
                MetadataKind::Adset => &touched.adset_ids,
                _ => &touched.ids,
            };
            let status = match self
                .ingest_metadata(*kind, ids, account_name.as_deref(), &mut summary)
                .await
            {
                Ok(status) => status,
                Err(err) if err.is_auth() => return Err(err),
                Err(err) => {
                    error!("{} metadata failed: {}", kind, err);
                    summary.warnings.push(format!("{kind} metadata failed: {err}"));
                    SectionStatus::Failed
                }
            };
            summary.record(format!("metadata:{kind}"), status);
        }

        info!("Rebuilding {} staging", self.entity);
        let staging = match self.deps.transform.rebuild_staging(self.entity).await {
            Ok(()) => SectionStatus::Succeeded,
            Err(err) => {
                error!("{} staging rebuild failed: {}", self.entity, err);
                SectionStatus::Failed
            }
        };
        summary.record("staging", staging);

        let mart = if staging == SectionStatus::Failed {
            SectionStatus::Skipped
        } else {
            let selector = MartSelector {
                entity: self.entity,
                months: summary.months.clone(),
            };
            match self.deps.transform.rebuild_mart(&selector).await {
                Ok(()) => SectionStatus::Succeeded,
                Err(err) => {
                    error!("{} mart rebuild failed: {}", self.entity, err);
                    SectionStatus::Failed
                }
            }
        };
        summary.record("mart", mart);

        let failed = summary.failed_sections();
        if !failed.is_empty() {
            return Err(Error::SectionsFailed {
                flow: self.entity.to_string(),
                sections: failed,
            });
        }

        info!(
            "Finished {} flow: {} day(s) fetched, {} skipped, {} row(s) written",
            self.entity, summary.days_fetched, summary.days_skipped, summary.rows_written
        );
        Ok(summary)
    }
}

#[async_trait::async_trait]
impl Flow for InsightsFlow {
    async fn run(&self, window: &IngestionWindow) -> Result<FlowSummary, Error> {
        self.run_flow(window).await
    }
}
