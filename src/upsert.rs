use crate::data::column_strings;
use crate::error::Error;
use crate::read::ReadOptions;
use crate::table::TableTarget;
use crate::warehouse::{Predicate, TableSpec, Warehouse};
use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::compute::concat_batches;
use datafusion::arrow::datatypes::DataType;
use datafusion::common::ScalarValue;
use datafusion::logical_expr::{cast, ident, Expr};
use datafusion::prelude::SessionContext;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Time-partition column used when a new table has it.
const PARTITION_COLUMN: &str = "date";

/// Cluster hint candidates, most selective first.
const CLUSTER_COLUMNS: &[&str] = &["ad_id", "adset_id", "campaign_id", "account_id"];

/// How incoming rows replace existing ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertKeys {
    /// Replace rows sharing the same key tuple, e.g. `(account_id, campaign_id)`.
    Natural(Vec<String>),
    /// Replace every existing row whose date string also appears in the batch.
    DateColumn(String),
}

impl UpsertKeys {
    pub fn natural(keys: &[&str]) -> Self {
        UpsertKeys::Natural(keys.iter().map(|k| k.to_string()).collect())
    }

    pub fn date_column(column: &str) -> Self {
        UpsertKeys::DateColumn(column.to_string())
    }

    fn columns(&self) -> Vec<&str> {
        match self {
            UpsertKeys::Natural(keys) => keys.iter().map(String::as_str).collect(),
            UpsertKeys::DateColumn(column) => vec![column.as_str()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub created: bool,
    pub rows_deleted: u64,
    pub rows_written: u64,
    pub duplicates_dropped: usize,
}

/// Writes batches so that each key exists exactly once after every call.
pub struct UpsertWriter {
    warehouse: Arc<dyn Warehouse>,
    ctx: SessionContext,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UpsertWriter {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        UpsertWriter {
            warehouse,
            ctx: SessionContext::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, target: &TableTarget) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(target.id())
            .or_default()
            .clone()
    }

    /// Writes a batch so that every key it carries exists exactly once afterwards.
    ///
    /// Creates the table when absent, otherwise deletes every existing row
    /// matching the incoming keys before appending the whole batch. Calls for
    /// the same table are serialized.
    /// # Arguments
    /// * `target` - The table to write to.
    /// * `batch` - The rows to write. Exact duplicates are written once.
    /// * `keys` - How incoming rows replace existing ones.
    /// # Returns
    /// A Result containing either an `UpsertReport` with the rows deleted and written or an Error.
    pub async fn upsert(
        &self,
        target: &TableTarget,
        batch: &RecordBatch,
        keys: &UpsertKeys,
    ) -> Result<UpsertReport, Error> {
        if batch.num_rows() == 0 {
            warn!("Nothing to write to {}: batch is empty", target);
            return Ok(UpsertReport::default());
        }

        for column in keys.columns() {
            if batch.column_by_name(column).is_none() {
                return Err(Error::MissingColumn {
                    column: column.to_string(),
                });
            }
        }

        // delete and append for one table must not interleave
        let lock = self.lock_for(target).await;
        let _guard = lock.lock().await;

        let incoming = self.distinct_rows(batch).await?;
        let mut report = UpsertReport {
            duplicates_dropped: batch.num_rows() - incoming.num_rows(),
            ..UpsertReport::default()
        };
        if report.duplicates_dropped > 0 {
            debug!(
                "Dropped {} duplicate row(s) before writing {}",
                report.duplicates_dropped, target
            );
        }

        if !self.warehouse.table_exists(target).await? {
            let schema = incoming.schema();
            let cluster: Vec<&str> = CLUSTER_COLUMNS
                .iter()
                .copied()
                .filter(|c| schema.column_with_name(c).is_some())
                .collect();
            let spec = TableSpec::infer(&schema, Some(PARTITION_COLUMN), &cluster);

            info!(
                "Creating {} (partition {:?}, cluster {:?})",
                target, spec.partition, spec.cluster
            );
            self.warehouse.create_table(target, spec).await?;
            report.created = true;
        } else {
            report.rows_deleted = match keys {
                UpsertKeys::Natural(keys) => self.delete_matching_keys(target, &incoming, keys).await?,
                UpsertKeys::DateColumn(column) => {
                    self.delete_overlapping_dates(target, &incoming, column)
                        .await?
                }
            };
        }

        report.rows_written = self.warehouse.append(target, incoming).await?;
        info!(
            "Upserted {} row(s) into {} ({} replaced{})",
            report.rows_written,
            target,
            report.rows_deleted,
            if report.created { ", new table" } else { "" }
        );
        Ok(report)
    }

    async fn distinct_rows(&self, batch: &RecordBatch) -> Result<RecordBatch, Error> {
        let batches = self.ctx.read_batch(batch.clone())?.distinct()?.collect().await?;
        Ok(concat_batches(&batch.schema(), &batches)?)
    }

    async fn delete_matching_keys(
        &self,
        target: &TableTarget,
        incoming: &RecordBatch,
        keys: &[String],
    ) -> Result<u64, Error> {
        if keys.is_empty() {
            return Err(Error::InvalidConfig {
                key: "upsert keys".to_string(),
                reason: "at least one key column is required".to_string(),
            });
        }

        // tuples with NULL components are staged too so reruns replace them
        let key_rows = self
            .ctx
            .read_batch(incoming.clone())?
            .select(
                keys.iter()
                    .map(|k| cast(ident(k), DataType::Utf8).alias(k))
                    .collect::<Vec<Expr>>(),
            )?
            .distinct()?
            .collect()
            .await?;

        let Some(first) = key_rows.first() else {
            return Ok(0);
        };
        let key_batch = concat_batches(&first.schema(), &key_rows)?;

        let suffix = Uuid::new_v4().simple().to_string();
        let staging = target.sibling(&format!(
            "temp_table_{}_delete_keys_{}",
            target.table(),
            &suffix[..8]
        ));

        let spec = TableSpec::infer(&key_batch.schema(), None, &[]).transient();
        self.warehouse.create_table(&staging, spec).await?;

        let deleted = self.delete_with_staging(target, &staging, key_batch, keys).await;
        let dropped = self.warehouse.drop_table(&staging).await;

        let deleted = deleted?;
        dropped?;
        Ok(deleted)
    }

    async fn delete_with_staging(
        &self,
        target: &TableTarget,
        staging: &TableTarget,
        key_batch: RecordBatch,
        keys: &[String],
    ) -> Result<u64, Error> {
        let staged = self.warehouse.append(staging, key_batch).await?;
        debug!("Staged {} key tuple(s) in {}", staged, staging);

        self.warehouse
            .delete_where(
                target,
                &Predicate::MatchesKeys {
                    staging: staging.clone(),
                    keys: keys.to_vec(),
                },
            )
            .await
    }

    async fn delete_overlapping_dates(
        &self,
        target: &TableTarget,
        incoming: &RecordBatch,
        column: &str,
    ) -> Result<u64, Error> {
        let incoming_dates = column_strings(incoming, column)?;

        let options = ReadOptions::builder().group_by(&[column]).build()?;
        let mut existing_dates = BTreeSet::new();
        for batch in self.warehouse.read(target, &options).await? {
            existing_dates.extend(column_strings(&batch, column)?);
        }

        let mut deleted = 0;
        for date in incoming_dates.intersection(&existing_dates) {
            deleted += self
                .warehouse
                .delete_where(
                    target,
                    &Predicate::Equals {
                        column: column.to_string(),
                        value: ScalarValue::from(date.as_str()),
                    },
                )
                .await?;
            debug!("Cleared {} = {} in {}", column, date, target);
        }

        Ok(deleted)
    }
}
