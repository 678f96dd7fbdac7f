use crate::error::Error;
use crate::flow::FlowSummary;
use crate::window::IngestionWindow;
use log::{error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// One independently failing unit of work, e.g. the campaign or ad flow.
#[async_trait::async_trait]
pub trait Flow: Send + Sync + 'static {
    async fn run(&self, window: &IngestionWindow) -> Result<FlowSummary, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone)]
pub struct FlowResult {
    entity_name: String,
    status: FlowStatus,
    error: Option<String>,
    summary: Option<FlowSummary>,
    elapsed: Duration,
}

impl FlowResult {
    fn from_outcome(name: String, outcome: Result<FlowSummary, Error>, elapsed: Duration) -> Self {
        match outcome {
            Ok(summary) => FlowResult {
                entity_name: name,
                status: FlowStatus::Success,
                error: None,
                summary: Some(summary),
                elapsed,
            },
            Err(err) => FlowResult {
                entity_name: name,
                status: FlowStatus::Failed,
                error: Some(err.to_string()),
                summary: None,
                elapsed,
            },
        }
    }

    fn crashed(name: String, reason: String) -> Self {
        FlowResult {
            entity_name: name,
            status: FlowStatus::Failed,
            error: Some(reason),
            summary: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn summary(&self) -> Option<&FlowSummary> {
        self.summary.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    results: Vec<FlowResult>,
    elapsed: Duration,
}

impl RunSummary {
    pub fn results(&self) -> &[FlowResult] {
        &self.results
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn failed_names(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| r.status == FlowStatus::Failed)
            .map(|r| r.entity_name.clone())
            .collect()
    }

    /// Fails iff at least one flow failed.
    pub fn into_result(self) -> Result<RunSummary, Error> {
        let names = self.failed_names();
        if names.is_empty() {
            Ok(self)
        } else {
            Err(Error::FlowsFailed { names })
        }
    }
}

/// Runs flows side by side, at most `max_concurrency` at a time. A failing
/// flow never stops its siblings and nothing it wrote is rolled back.
pub struct Orchestrator {
    max_concurrency: usize,
}

impl Orchestrator {
    pub fn new(max_concurrency: usize) -> Self {
        Orchestrator {
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Runs every flow over the same window and waits for all of them.
    /// # Arguments
    /// * `flows` - The flows to run, keyed by entity name.
    /// * `window` - The ingestion window handed to each flow.
    /// # Returns
    /// A Result containing the `RunSummary` of a fully successful run, or
    /// `Error::FlowsFailed` naming every flow that failed or panicked. Writes of
    /// the flows that succeeded are kept either way.
    pub async fn run(
        &self,
        flows: BTreeMap<String, Arc<dyn Flow>>,
        window: &IngestionWindow,
    ) -> Result<RunSummary, Error> {
        self.execute(flows, window).await.into_result()
    }

    /// Waits for every flow to finish and records each outcome.
    async fn execute(
        &self,
        flows: BTreeMap<String, Arc<dyn Flow>>,
        window: &IngestionWindow,
    ) -> RunSummary {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut pending: BTreeSet<String> = flows.keys().cloned().collect();
        let mut tasks = JoinSet::new();

        info!(
            "Dispatching {} flow(s) with concurrency {}",
            flows.len(),
            self.max_concurrency
        );
        for (name, flow) in flows {
            let semaphore = semaphore.clone();
            let window = *window;
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return FlowResult::crashed(name, "worker pool closed".to_string());
                };

                info!("Flow {} started", name);
                let flow_started = Instant::now();
                let outcome = flow.run(&window).await;
                FlowResult::from_outcome(name, outcome, flow_started.elapsed())
            });
        }

        let mut results = Vec::with_capacity(pending.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    match result.error() {
                        None => info!(
                            "Flow {} succeeded in {:.1}s",
                            result.entity_name,
                            result.elapsed.as_secs_f64()
                        ),
                        Some(err) => error!(
                            "Flow {} failed after {:.1}s: {}",
                            result.entity_name,
                            result.elapsed.as_secs_f64(),
                            err
                        ),
                    }
                    pending.remove(&result.entity_name);
                    results.push(result);
                }
                Err(err) => warn!("Flow task did not complete: {}", err),
            }
        }

        // a task that panicked never returned its name
        for name in pending {
            error!("Flow {} crashed", name);
            results.push(FlowResult::crashed(name, "flow task panicked".to_string()));
        }
        results.sort_by(|a, b| a.entity_name.cmp(&b.entity_name));

        let summary = RunSummary {
            results,
            elapsed: started.elapsed(),
        };
        let failed = summary.failed_names();
        if failed.is_empty() {
            info!(
                "All {} flow(s) succeeded in {:.1}s",
                summary.results.len(),
                summary.elapsed.as_secs_f64()
            );
        } else {
            error!(
                "{} of {} flow(s) failed in {:.1}s: {}",
                failed.len(),
                summary.results.len(),
                summary.elapsed.as_secs_f64(),
                failed.join(", ")
            );
        }
        summary
    }
}
