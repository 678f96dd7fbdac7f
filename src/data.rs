use crate::api_client::InsightRow;
use crate::error::Error;
use crate::retry::FetchReport;
use crate::table::{Entity, MetadataKind};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use datafusion::arrow::array::{
    Array, ArrayRef, Float64Builder, Int64Builder, RecordBatch, StringArray, StringBuilder,
    TimestampMicrosecondBuilder,
};
use datafusion::arrow::compute::{cast_with_options, CastOptions};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use log::warn;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const UTC: &str = "UTC";

/// Rows of one entity type together with what happened while fetching them.
#[derive(Debug, Clone)]
pub struct EntityBatch {
    batch: RecordBatch,
    failed_ids: Vec<String>,
    retryable: bool,
    rows_input: usize,
    time_elapsed: Duration,
}

impl EntityBatch {
    pub fn from_report<T, U: ToString>(batch: RecordBatch, report: &FetchReport<T, U>) -> Self {
        EntityBatch {
            batch,
            failed_ids: report.failed.iter().map(ToString::to_string).collect(),
            retryable: report.retryable,
            rows_input: report.rows_input,
            time_elapsed: report.elapsed,
        }
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn failed_ids(&self) -> &[String] {
        &self.failed_ids
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn rows_input(&self) -> usize {
        self.rows_input
    }

    /// Always the row count of the batch.
    pub fn rows_output(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn time_elapsed(&self) -> Duration {
        self.time_elapsed
    }
}

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some(UTC.into()))
}

/// Creates the schema for insight rows of the given level.
///
/// Ad-level rows additionally carry `adset_id` and `ad_id`.
pub fn insights_schema(entity: Entity) -> SchemaRef {
    let mut fields = vec![
        Field::new("account_id", DataType::Utf8, false),
        Field::new("campaign_id", DataType::Utf8, false),
    ];
    if entity == Entity::Ad {
        fields.push(Field::new("adset_id", DataType::Utf8, true));
        fields.push(Field::new("ad_id", DataType::Utf8, false));
    }
    fields.extend([
        Field::new("date_start", DataType::Utf8, false),
        Field::new("date_stop", DataType::Utf8, false),
        Field::new("date", timestamp_type(), false),
        Field::new("year", DataType::Int64, false),
        Field::new("month", DataType::Int64, false),
        Field::new("spend", DataType::Float64, true),
        Field::new("impressions", DataType::Int64, true),
        Field::new("clicks", DataType::Int64, true),
        Field::new("reach", DataType::Int64, true),
        Field::new("optimization_goal", DataType::Utf8, true),
        Field::new("actions", DataType::Utf8, true),
        Field::new("last_updated_at", timestamp_type(), false),
    ]);
    Arc::new(Schema::new(fields))
}

/// Converts insight rows into a batch stamped with `now` as `last_updated_at`.
pub fn insights_to_batch(
    entity: Entity,
    rows: &[InsightRow],
    now: DateTime<Utc>,
) -> Result<RecordBatch, Error> {
    let num_rows = rows.len();

    let mut account_id_builder = StringBuilder::new();
    let mut campaign_id_builder = StringBuilder::new();
    let mut adset_id_builder = StringBuilder::new();
    let mut ad_id_builder = StringBuilder::new();
    let mut date_start_builder = StringBuilder::new();
    let mut date_stop_builder = StringBuilder::new();
    let mut date_builder = TimestampMicrosecondBuilder::with_capacity(num_rows).with_timezone(UTC);
    let mut year_builder = Int64Builder::with_capacity(num_rows);
    let mut month_builder = Int64Builder::with_capacity(num_rows);
    let mut spend_builder = Float64Builder::with_capacity(num_rows);
    let mut impressions_builder = Int64Builder::with_capacity(num_rows);
    let mut clicks_builder = Int64Builder::with_capacity(num_rows);
    let mut reach_builder = Int64Builder::with_capacity(num_rows);
    let mut goal_builder = StringBuilder::new();
    let mut actions_builder = StringBuilder::new();
    let mut updated_builder =
        TimestampMicrosecondBuilder::with_capacity(num_rows).with_timezone(UTC);

    let updated_at = now.timestamp_micros();

    for row in rows {
        let day = parse_date(&row.date_start)?;

        let campaign_id = row.campaign_id.as_deref().ok_or(Error::MissingColumn {
            column: "campaign_id".to_string(),
        })?;
        if entity == Entity::Ad {
            let ad_id = row.ad_id.as_deref().ok_or(Error::MissingColumn {
                column: "ad_id".to_string(),
            })?;
            adset_id_builder.append_option(row.adset_id.as_deref());
            ad_id_builder.append_value(ad_id);
        }

        account_id_builder.append_value(&row.account_id);
        campaign_id_builder.append_value(campaign_id);
        date_start_builder.append_value(&row.date_start);
        date_stop_builder.append_value(&row.date_stop);
        date_builder.append_value(parse_date_as_unix_micros(&row.date_start)?);
        year_builder.append_value(i64::from(day.year()));
        month_builder.append_value(i64::from(day.month()));
        spend_builder.append_option(row.spend);
        impressions_builder.append_option(row.impressions);
        clicks_builder.append_option(row.clicks);
        reach_builder.append_option(row.reach);
        goal_builder.append_option(row.optimization_goal.as_deref());
        actions_builder.append_option(row.actions.as_ref().map(Value::to_string));
        updated_builder.append_value(updated_at);
    }

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(account_id_builder.finish()),
        Arc::new(campaign_id_builder.finish()),
    ];
    if entity == Entity::Ad {
        columns.push(Arc::new(adset_id_builder.finish()));
        columns.push(Arc::new(ad_id_builder.finish()));
    }
    columns.extend([
        Arc::new(date_start_builder.finish()) as ArrayRef,
        Arc::new(date_stop_builder.finish()),
        Arc::new(date_builder.finish()),
        Arc::new(year_builder.finish()),
        Arc::new(month_builder.finish()),
        Arc::new(spend_builder.finish()),
        Arc::new(impressions_builder.finish()),
        Arc::new(clicks_builder.finish()),
        Arc::new(reach_builder.finish()),
        Arc::new(goal_builder.finish()),
        Arc::new(actions_builder.finish()),
        Arc::new(updated_builder.finish()),
    ]);

    Ok(RecordBatch::try_new(insights_schema(entity), columns)?)
}

/// Output column and the JSON path it is read from.
type ColumnPaths = &'static [(&'static str, &'static [&'static str])];

const CAMPAIGN_COLUMNS: ColumnPaths = &[
    ("campaign_id", &["id"]),
    ("campaign_name", &["name"]),
    ("status", &["status"]),
    ("effective_status", &["effective_status"]),
    ("objective", &["objective"]),
    ("configured_status", &["configured_status"]),
];

const ADSET_COLUMNS: ColumnPaths = &[
    ("adset_id", &["id"]),
    ("adset_name", &["name"]),
    ("status", &["status"]),
    ("effective_status", &["effective_status"]),
    ("campaign_id", &["campaign_id"]),
    ("optimization_goal", &["optimization_goal"]),
];

const AD_COLUMNS: ColumnPaths = &[
    ("ad_id", &["id"]),
    ("ad_name", &["name"]),
    ("status", &["status"]),
    ("effective_status", &["effective_status"]),
    ("adset_id", &["adset_id"]),
    ("campaign_id", &["campaign_id"]),
];

// creatives are fetched through their ad, so `id` is the ad id
const CREATIVE_COLUMNS: ColumnPaths = &[
    ("ad_id", &["id"]),
    ("creative_id", &["creative", "id"]),
    ("creative_name", &["creative", "name"]),
    ("thumbnail_url", &["creative", "thumbnail_url"]),
];

fn metadata_columns(kind: MetadataKind) -> ColumnPaths {
    match kind {
        MetadataKind::Campaign => CAMPAIGN_COLUMNS,
        MetadataKind::Adset => ADSET_COLUMNS,
        MetadataKind::Ad => AD_COLUMNS,
        MetadataKind::Creative => CREATIVE_COLUMNS,
    }
}

fn lookup<'a>(record: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter()
        .try_fold(record.get(*first)?, |value, key| value.get(*key))
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub fn metadata_schema(kind: MetadataKind) -> SchemaRef {
    let mut fields = vec![
        Field::new("account_id", DataType::Utf8, false),
        Field::new("account_name", DataType::Utf8, true),
    ];
    fields.extend(
        metadata_columns(kind)
            .iter()
            .map(|(name, _)| Field::new(*name, DataType::Utf8, true)),
    );
    fields.push(Field::new("last_updated_at", timestamp_type(), false));
    Arc::new(Schema::new(fields))
}

/// Flattens metadata records into a batch. Records without an id are dropped.
pub fn metadata_to_batch(
    kind: MetadataKind,
    records: &[Map<String, Value>],
    account_id: &str,
    account_name: Option<&str>,
    now: DateTime<Utc>,
) -> Result<RecordBatch, Error> {
    let columns = metadata_columns(kind);
    let records: Vec<&Map<String, Value>> = records
        .iter()
        .filter(|record| {
            let has_id = record.get("id").and_then(as_text).is_some();
            if !has_id {
                warn!("Dropping {} metadata record without id", kind);
            }
            has_id
        })
        .collect();

    let mut account_id_builder = StringBuilder::new();
    let mut account_name_builder = StringBuilder::new();
    let mut value_builders: Vec<StringBuilder> =
        columns.iter().map(|_| StringBuilder::new()).collect();
    let mut updated_builder =
        TimestampMicrosecondBuilder::with_capacity(records.len()).with_timezone(UTC);

    for record in &records {
        account_id_builder.append_value(account_id);
        account_name_builder.append_option(account_name);
        for ((_, path), builder) in columns.iter().zip(value_builders.iter_mut()) {
            builder.append_option(lookup(record, path).and_then(as_text));
        }
        updated_builder.append_value(now.timestamp_micros());
    }

    let mut arrays: Vec<ArrayRef> = vec![
        Arc::new(account_id_builder.finish()),
        Arc::new(account_name_builder.finish()),
    ];
    arrays.extend(
        value_builders
            .iter_mut()
            .map(|builder| Arc::new(builder.finish()) as ArrayRef),
    );
    arrays.push(Arc::new(updated_builder.finish()));

    Ok(RecordBatch::try_new(metadata_schema(kind), arrays)?)
}

/// Distinct non-null values of a column, rendered as strings.
pub fn column_strings(batch: &RecordBatch, column: &str) -> Result<BTreeSet<String>, Error> {
    let array = batch.column_by_name(column).ok_or(Error::MissingColumn {
        column: column.to_string(),
    })?;

    let utf8 = if array.data_type() != &DataType::Utf8 {
        cast_with_options(array.as_ref(), &DataType::Utf8, &CastOptions::default())?
    } else {
        array.clone()
    };

    let Some(values) = utf8.as_any().downcast_ref::<StringArray>() else {
        return Ok(BTreeSet::new());
    };

    Ok((0..values.len())
        .filter(|&i| values.is_valid(i))
        .map(|i| values.value(i).to_string())
        .collect())
}

fn parse_date(date: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| Error::InvalidDate {
        date: date.to_string(),
    })
}

fn parse_date_as_unix_micros(date: &str) -> Result<i64, Error> {
    let unix_duration = parse_date(date)? - DateTime::<Utc>::UNIX_EPOCH.date_naive();

    unix_duration
        .num_microseconds()
        .ok_or(Error::InvalidDate {
            date: date.to_string(),
        })
}
