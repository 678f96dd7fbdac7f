use crate::error::Error;
use crate::read::{AggFunc, Condition, ReadOptions};
use crate::table::TableTarget;
use crate::warehouse::Warehouse;
use chrono::{DateTime, NaiveDate, Utc};
use datafusion::arrow::array::{Array, TimestampMicrosecondArray};
use datafusion::arrow::compute::{cast_with_options, CastOptions};
use datafusion::arrow::datatypes::{DataType, TimeUnit};
use log::{debug, warn};
use std::sync::Arc;

const DATE_COLUMN: &str = "date_start";
const WATERMARK_COLUMN: &str = "last_updated_at";

/// Decides per day whether stored insights are recent enough to skip a fetch.
#[derive(Clone)]
pub struct FreshnessOracle {
    warehouse: Arc<dyn Warehouse>,
    threshold: chrono::Duration,
}

impl FreshnessOracle {
    pub fn new(warehouse: Arc<dyn Warehouse>, threshold: chrono::Duration) -> Self {
        FreshnessOracle {
            warehouse,
            threshold,
        }
    }

    /// Checks whether the rows stored for `day` were written recently enough to skip it.
    /// # Arguments
    /// * `target` - The month-scoped insights table that holds the day.
    /// * `day` - The day matched against `date_start`.
    /// # Returns
    /// `true` when the newest `last_updated_at` of the day is at most the threshold old.
    /// A missing table, a day without rows or a failed check all return `false`.
    pub async fn is_fresh(&self, target: &TableTarget, day: NaiveDate) -> bool {
        self.is_fresh_at(target, day, Utc::now()).await
    }

    /// Never errors: a failed check reports the day as stale so it gets re-fetched.
    pub async fn is_fresh_at(&self, target: &TableTarget, day: NaiveDate, now: DateTime<Utc>) -> bool {
        match self.last_updated(target, day).await {
            Ok(Some(last_updated)) => {
                let age = now - last_updated;
                debug!(
                    "{} for {} last updated at {} ({} min ago)",
                    target,
                    day,
                    last_updated,
                    age.num_minutes()
                );
                age <= self.threshold
            }
            Ok(None) => false,
            Err(err) => {
                warn!(
                    "Freshness check on {} for {} failed, treating as stale: {}",
                    target, day, err
                );
                false
            }
        }
    }

    async fn last_updated(
        &self,
        target: &TableTarget,
        day: NaiveDate,
    ) -> Result<Option<DateTime<Utc>>, Error> {
        let spec = match self.warehouse.table_spec(target).await {
            Ok(spec) => spec,
            Err(Error::TableNotFound { .. }) => {
                debug!("{} does not exist yet", target);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        for column in [DATE_COLUMN, WATERMARK_COLUMN] {
            if spec.column(column).is_none() {
                return Err(Error::MissingColumn {
                    column: column.to_string(),
                });
            }
        }

        let options = ReadOptions::builder()
            .condition(Condition::equals(
                DATE_COLUMN,
                day.format("%Y-%m-%d").to_string(),
            )?)
            .measure(AggFunc::Max, WATERMARK_COLUMN, "last_updated")
            .build()?;
        let batches = self.warehouse.read(target, &options).await?;

        let Some(batch) = batches.iter().find(|b| b.num_rows() > 0) else {
            return Ok(None);
        };

        let column = cast_with_options(
            batch.column(0).as_ref(),
            &DataType::Timestamp(TimeUnit::Microsecond, None),
            &CastOptions::default(),
        )?;
        let Some(values) = column.as_any().downcast_ref::<TimestampMicrosecondArray>() else {
            return Ok(None);
        };

        if values.is_null(0) {
            return Ok(None);
        }
        Ok(DateTime::<Utc>::from_timestamp_micros(values.value(0)))
    }
}
