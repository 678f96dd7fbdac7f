use crate::api_client::{AdsApi, ApiClient};
use crate::config::Config;
use crate::error::Error;
use crate::flow::{FlowDeps, FlowSettings, InsightsFlow};
use crate::freshness::FreshnessOracle;
use crate::orchestrator::{Flow, Orchestrator, RunSummary};
use crate::read::ReadOptions;
use crate::secrets::{resolve_credentials, LocalSecretsProvider};
use crate::transform::{DbtTransformStage, TransformStage};
use crate::upsert::UpsertWriter;
use crate::warehouse::{sql_name, LocalWarehouse, Warehouse};
use crate::window::IngestionWindow;
use datafusion::arrow::array::RecordBatch;
use datafusion::common::ScalarValue;
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

pub async fn sync_ads_data(config: Config, window: IngestionWindow) -> Result<RunSummary, Error> {
    let config = config.validate()?;
    info!(
        "Syncing {} day(s) from {} to {} for layers {:?}",
        window.len(),
        window.start(),
        window.end(),
        config.layers
    );

    let secrets = LocalSecretsProvider::new(config.secrets_dir.clone(), config.secret_timeout);
    let credentials = resolve_credentials(&secrets, &config.naming).await?;
    let settings = FlowSettings::new(&config, &credentials.account_id);

    let api: Arc<dyn AdsApi> = Arc::new(ApiClient::new(&config, credentials)?);
    let warehouse: Arc<dyn Warehouse> = Arc::new(LocalWarehouse::open(&config.warehouse_dir).await?);
    let transform: Arc<dyn TransformStage> = Arc::new(DbtTransformStage::new(
        config.dbt.clone(),
        &config.naming.platform,
    ));

    let deps = FlowDeps {
        api,
        writer: Arc::new(UpsertWriter::new(warehouse.clone())),
        oracle: FreshnessOracle::new(warehouse, config.staleness),
        transform,
        naming: config.naming.clone(),
    };

    let flows: BTreeMap<String, Arc<dyn Flow>> = config
        .layers
        .iter()
        .map(|entity| {
            let flow = InsightsFlow::new(*entity, deps.clone(), settings.clone());
            (entity.to_string(), Arc::new(flow) as Arc<dyn Flow>)
        })
        .collect();

    let summary = Orchestrator::new(config.max_concurrency)
        .run(flows, &window)
        .await?;

    for result in summary.results() {
        let Some(flow) = result.summary() else {
            continue;
        };
        info!(
            "{} took {:.1}s: {} day(s) fetched, {} fresh, {} empty, {} id(s) touched, {} row(s) written",
            result.entity_name(),
            result.elapsed().as_secs_f64(),
            flow.days_fetched,
            flow.days_skipped,
            flow.days_empty,
            flow.touched_ids.len(),
            flow.rows_written
        );
        for warning in &flow.warnings {
            warn!("{}: {}", flow.entity, warning);
        }
    }
    info!("Sync finished in {:.1}s", summary.elapsed().as_secs_f64());

    Ok(summary)
}

/// What to run against one raw table.
pub enum Inspection {
    Read(ReadOptions),
    /// SQL where `{table}` stands for the inspected table, with `$n` parameters.
    Sql {
        sql: String,
        params: Vec<ScalarValue>,
    },
}

/// Reads one raw-layer table of the configured account, e.g. to check what a
/// sync wrote.
pub async fn inspect_table(
    config: Config,
    table: &str,
    inspection: Inspection,
) -> Result<Vec<RecordBatch>, Error> {
    let config = config.validate()?;
    let warehouse = LocalWarehouse::open(&config.warehouse_dir).await?;
    let target = config.naming.raw(table);
    if !warehouse.table_exists(&target).await? {
        return Err(Error::TableNotFound { table: target.id() });
    }

    let batches = match inspection {
        Inspection::Read(options) => {
            info!("Reading {}", target);
            warehouse.read(&target, &options).await?
        }
        Inspection::Sql { sql, params } => {
            let sql = sql.replace("{table}", &sql_name(&target));
            info!("Querying {}: {}", target, sql);
            warehouse.query(&sql, params).await?
        }
    };
    info!(
        "{} row(s) from {}",
        batches.iter().map(|b| b.num_rows()).sum::<usize>(),
        target
    );
    Ok(batches)
}
