use crate::error::Error;
use crate::read::ReadOptions;
use crate::table::TableTarget;
use async_trait::async_trait;
use datafusion::arrow::array::{new_null_array, ArrayRef, RecordBatch};
use datafusion::arrow::compute::{cast_with_options, CastOptions};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use datafusion::common::{JoinType, ScalarValue, TableReference};
use datafusion::datasource::MemTable;
use datafusion::logical_expr::{binary_expr, cast, ident, lit, Expr, Operator};
use datafusion::parquet::arrow::ArrowWriter;
use datafusion::prelude::{DataFrame, ParquetReadOptions, SessionContext};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

const MANIFEST_EXTENSION: &str = "json";
const DATA_EXTENSION: &str = "parquet";

/// Warehouse column types. Every column is nullable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int64,
    Float64,
    Bool,
    Timestamp,
    String,
}

impl ColumnType {
    /// Maps an Arrow type onto the closest warehouse type.
    pub fn infer(data_type: &DataType) -> Self {
        match data_type {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => ColumnType::Int64,
            DataType::Float16 | DataType::Float32 | DataType::Float64 | DataType::Decimal128(..) => {
                ColumnType::Float64
            }
            DataType::Boolean => ColumnType::Bool,
            DataType::Timestamp(..) | DataType::Date32 | DataType::Date64 => ColumnType::Timestamp,
            _ => ColumnType::String,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::Bool => DataType::Boolean,
            ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            ColumnType::String => DataType::Utf8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

/// Column layout plus partition and cluster hints of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub columns: Vec<ColumnSpec>,
    pub partition: Option<String>,
    pub cluster: Vec<String>,
    /// Transient tables are never persisted.
    #[serde(default)]
    pub transient: bool,
}

impl TableSpec {
    /// Derives a spec from a batch schema. Hints naming absent columns are dropped.
    pub fn infer(schema: &Schema, partition: Option<&str>, cluster: &[&str]) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|field| ColumnSpec {
                name: field.name().clone(),
                column_type: ColumnType::infer(field.data_type()),
            })
            .collect::<Vec<_>>();
        let has = |name: &str| columns.iter().any(|c| c.name == name);

        TableSpec {
            partition: partition.filter(|p| has(*p)).map(str::to_string),
            cluster: cluster
                .iter()
                .filter(|c| has(**c))
                .map(|c| c.to_string())
                .collect(),
            columns,
            transient: false,
        }
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn to_arrow_schema(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(&c.name, c.column_type.data_type(), true))
                .collect::<Vec<_>>(),
        ))
    }
}

/// Row selection for `delete_where`.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Rows whose `column` equals `value`.
    Equals { column: String, value: ScalarValue },
    /// Rows whose key tuple, compared as strings, appears in `staging`. A NULL
    /// component matches a NULL in the same position.
    MatchesKeys {
        staging: TableTarget,
        keys: Vec<String>,
    },
}

#[async_trait]
pub trait Warehouse: Send + Sync + 'static {
    async fn table_exists(&self, target: &TableTarget) -> Result<bool, Error>;

    async fn create_table(&self, target: &TableTarget, spec: TableSpec) -> Result<(), Error>;

    async fn table_spec(&self, target: &TableTarget) -> Result<TableSpec, Error>;

    /// Returns the number of deleted rows.
    async fn delete_where(&self, target: &TableTarget, predicate: &Predicate)
        -> Result<u64, Error>;

    /// Returns the number of appended rows.
    async fn append(&self, target: &TableTarget, batch: RecordBatch) -> Result<u64, Error>;

    /// Runs SQL with positional `$n` parameters. Tables are addressed by
    /// their quoted id, see [`sql_name`].
    async fn query(&self, sql: &str, params: Vec<ScalarValue>) -> Result<Vec<RecordBatch>, Error>;

    async fn read(
        &self,
        target: &TableTarget,
        options: &ReadOptions,
    ) -> Result<Vec<RecordBatch>, Error>;

    /// Dropping a missing table is not an error.
    async fn drop_table(&self, target: &TableTarget) -> Result<(), Error>;
}

/// Quoted identifier of a table inside warehouse SQL.
pub fn sql_name(target: &TableTarget) -> String {
    format!("\"{}\"", target.id())
}

struct StoredTable {
    spec: TableSpec,
    batches: Vec<RecordBatch>,
}

impl StoredTable {
    fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

#[derive(Serialize, Deserialize)]
struct TableManifest {
    table: String,
    spec: TableSpec,
}

/// DataFusion-backed warehouse keeping one in-memory table per id,
/// optionally persisted as parquet under a directory.
pub struct LocalWarehouse {
    ctx: SessionContext,
    root: Option<PathBuf>,
    tables: RwLock<HashMap<String, StoredTable>>,
}

impl LocalWarehouse {
    /// Opens (or creates) a warehouse directory and loads every table found in it.
    pub async fn open(dir: &Path) -> Result<Self, Error> {
        fs::create_dir_all(dir)?;

        let warehouse = LocalWarehouse {
            ctx: SessionContext::new(),
            root: Some(dir.to_path_buf()),
            tables: RwLock::new(HashMap::new()),
        };

        let mut tables = HashMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MANIFEST_EXTENSION) {
                continue;
            }

            let manifest: TableManifest = serde_json::from_slice(&fs::read(&path)?)?;
            let schema = manifest.spec.to_arrow_schema();
            let data_path = dir.join(format!("{}.{}", manifest.table, DATA_EXTENSION));

            let batches = if fs::metadata(&data_path).is_ok() {
                let data_path = data_path.to_string_lossy().to_string();
                warehouse
                    .ctx
                    .read_parquet(&data_path, ParquetReadOptions::new().schema(&schema))
                    .await?
                    .collect()
                    .await?
                    .iter()
                    .map(|batch| conform(&manifest.table, &manifest.spec, batch))
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                Vec::new()
            };

            let stored = StoredTable {
                spec: manifest.spec,
                batches,
            };
            warehouse.register(&manifest.table, &stored)?;
            debug!(
                "Loaded table {} with {} row(s)",
                manifest.table,
                stored.num_rows()
            );
            tables.insert(manifest.table, stored);
        }

        info!("Opened warehouse at {} with {} table(s)", dir.display(), tables.len());
        *warehouse.tables.write().await = tables;
        Ok(warehouse)
    }

    fn register(&self, id: &str, stored: &StoredTable) -> Result<(), Error> {
        let provider = MemTable::try_new(
            stored.spec.to_arrow_schema(),
            vec![stored.batches.clone()],
        )?;
        self.ctx.deregister_table(TableReference::bare(id))?;
        self.ctx
            .register_table(TableReference::bare(id), Arc::new(provider))?;
        Ok(())
    }

    fn persist(&self, id: &str, stored: &StoredTable) -> Result<(), Error> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        if stored.spec.transient {
            return Ok(());
        }

        let manifest = TableManifest {
            table: id.to_string(),
            spec: stored.spec.clone(),
        };
        fs::write(
            root.join(format!("{id}.{MANIFEST_EXTENSION}")),
            serde_json::to_vec_pretty(&manifest)?,
        )?;

        let file = fs::File::create(root.join(format!("{id}.{DATA_EXTENSION}")))?;
        let mut writer = ArrowWriter::try_new(file, stored.spec.to_arrow_schema(), None)?;
        for batch in &stored.batches {
            writer.write(batch)?;
        }
        writer.close()?;
        Ok(())
    }

    fn remove_files(&self, id: &str) -> Result<(), Error> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        for extension in [MANIFEST_EXTENSION, DATA_EXTENSION] {
            match fs::remove_file(root.join(format!("{id}.{extension}"))) {
                Err(err) if err.kind() != std::io::ErrorKind::NotFound => return Err(err.into()),
                _ => {}
            }
        }
        Ok(())
    }

    async fn table(&self, id: &str) -> Result<DataFrame, Error> {
        Ok(self.ctx.table(TableReference::bare(id)).await?)
    }

    async fn rows_not_matching_keys(
        &self,
        id: &str,
        spec: &TableSpec,
        staging: &str,
        keys: &[String],
    ) -> Result<DataFrame, Error> {
        let key_alias = |prefix: &str, key: &str| format!("__{prefix}_{key}");
        let as_string = |key: &str, alias: String| cast(ident(key), DataType::Utf8).alias(alias);

        let left_keys: Vec<String> = keys.iter().map(|k| key_alias("key", k.as_str())).collect();
        let right_keys: Vec<String> = keys.iter().map(|k| key_alias("stg", k.as_str())).collect();

        let left = self.table(id).await?.select(
            spec.columns
                .iter()
                .map(|c| ident(&c.name))
                .chain(
                    keys.iter()
                        .zip(&left_keys)
                        .map(|(key, alias)| as_string(key.as_str(), alias.clone())),
                )
                .collect::<Vec<Expr>>(),
        )?;
        let right = self.table(staging).await?.select(
            keys.iter()
                .zip(&right_keys)
                .map(|(key, alias)| as_string(key.as_str(), alias.clone()))
                .collect::<Vec<Expr>>(),
        )?;

        // NULL key components match each other
        let matches = left_keys
            .iter()
            .zip(&right_keys)
            .map(|(l, r)| binary_expr(ident(l), Operator::IsNotDistinctFrom, ident(r)));
        let left_refs: Vec<&str> = left_keys.iter().map(String::as_str).collect();

        let kept = left
            .join_on(right, JoinType::LeftAnti, matches)?
            .drop_columns(&left_refs)?;
        Ok(kept)
    }
}

/// Casts a batch onto the table schema by column name. Absent columns become
/// null, unknown columns are rejected. A value that does not cast is an error.
fn conform(table: &str, spec: &TableSpec, batch: &RecordBatch) -> Result<RecordBatch, Error> {
    let incoming = batch.schema();
    if let Some(field) = incoming
        .fields()
        .iter()
        .find(|field| spec.column(field.name()).is_none())
    {
        return Err(Error::SchemaMismatch {
            table: table.to_string(),
            column: field.name().clone(),
        });
    }

    let schema = spec.to_arrow_schema();
    let columns = spec
        .columns
        .iter()
        .map(|column| {
            let data_type = column.column_type.data_type();
            match batch.column_by_name(&column.name) {
                Some(array) if array.data_type() == &data_type => Ok(array.clone()),
                Some(array) => cast_with_options(
                    array.as_ref(),
                    &data_type,
                    &CastOptions {
                        safe: false,
                        ..Default::default()
                    },
                ),
                None => Ok(new_null_array(&data_type, batch.num_rows())),
            }
        })
        .collect::<Result<Vec<ArrayRef>, _>>()?;

    Ok(RecordBatch::try_new(schema, columns)?)
}

#[async_trait]
impl Warehouse for LocalWarehouse {
    async fn table_exists(&self, target: &TableTarget) -> Result<bool, Error> {
        Ok(self.tables.read().await.contains_key(&target.id()))
    }

    async fn create_table(&self, target: &TableTarget, spec: TableSpec) -> Result<(), Error> {
        let id = target.id();
        let mut tables = self.tables.write().await;
        if tables.contains_key(&id) {
            return Err(Error::TableExists { table: id });
        }

        let stored = StoredTable {
            spec,
            batches: Vec::new(),
        };
        self.register(&id, &stored)?;
        self.persist(&id, &stored)?;
        debug!(
            "Created table {} (partition {:?}, cluster {:?})",
            id, stored.spec.partition, stored.spec.cluster
        );
        tables.insert(id, stored);
        Ok(())
    }

    async fn table_spec(&self, target: &TableTarget) -> Result<TableSpec, Error> {
        let id = target.id();
        self.tables
            .read()
            .await
            .get(&id)
            .map(|stored| stored.spec.clone())
            .ok_or(Error::TableNotFound { table: id })
    }

    async fn delete_where(
        &self,
        target: &TableTarget,
        predicate: &Predicate,
    ) -> Result<u64, Error> {
        let id = target.id();
        let mut tables = self.tables.write().await;
        let stored = tables
            .get(&id)
            .ok_or_else(|| Error::TableNotFound { table: id.clone() })?;
        let spec = stored.spec.clone();
        let before = stored.num_rows();

        let kept = match predicate {
            Predicate::Equals { column, value } => {
                if spec.column(column).is_none() {
                    return Err(Error::MissingColumn {
                        column: column.clone(),
                    });
                }
                self.table(&id)
                    .await?
                    .filter(ident(column).eq(lit(value.clone())).is_not_true())?
            }
            Predicate::MatchesKeys { staging, keys } => {
                let staging_id = staging.id();
                if !tables.contains_key(&staging_id) {
                    return Err(Error::TableNotFound { table: staging_id });
                }
                if let Some(key) = keys.iter().find(|k| spec.column(k).is_none()) {
                    return Err(Error::MissingColumn {
                        column: key.clone(),
                    });
                }
                self.rows_not_matching_keys(&id, &spec, &staging_id, keys)
                    .await?
            }
        };

        let batches = kept
            .collect()
            .await?
            .iter()
            .map(|batch| conform(&id, &spec, batch))
            .collect::<Result<Vec<_>, _>>()?;

        let stored = StoredTable { spec, batches };
        let deleted = before.saturating_sub(stored.num_rows()) as u64;
        self.register(&id, &stored)?;
        self.persist(&id, &stored)?;
        tables.insert(id.clone(), stored);

        debug!("Deleted {} row(s) from {}", deleted, id);
        Ok(deleted)
    }

    async fn append(&self, target: &TableTarget, batch: RecordBatch) -> Result<u64, Error> {
        let id = target.id();
        let mut tables = self.tables.write().await;
        let stored = tables
            .get_mut(&id)
            .ok_or_else(|| Error::TableNotFound { table: id.clone() })?;

        let batch = conform(&id, &stored.spec, &batch)?;
        let appended = batch.num_rows() as u64;
        stored.batches.push(batch);
        self.register(&id, stored)?;
        self.persist(&id, stored)?;

        debug!("Appended {} row(s) to {}", appended, id);
        Ok(appended)
    }

    async fn query(&self, sql: &str, params: Vec<ScalarValue>) -> Result<Vec<RecordBatch>, Error> {
        let _tables = self.tables.read().await;
        let df = self.ctx.sql(sql).await?;
        let df = if params.is_empty() {
            df
        } else {
            df.with_param_values(params)?
        };
        Ok(df.collect().await?)
    }

    async fn read(
        &self,
        target: &TableTarget,
        options: &ReadOptions,
    ) -> Result<Vec<RecordBatch>, Error> {
        let id = target.id();
        let tables = self.tables.read().await;
        if !tables.contains_key(&id) {
            return Err(Error::TableNotFound { table: id });
        }

        let batches = options.apply(self.table(&id).await?)?.collect().await?;
        options.sample_batches(batches)
    }

    async fn drop_table(&self, target: &TableTarget) -> Result<(), Error> {
        let id = target.id();
        let mut tables = self.tables.write().await;
        if let Some(stored) = tables.remove(&id) {
            self.ctx.deregister_table(TableReference::bare(id.as_str()))?;
            if !stored.spec.transient {
                self.remove_files(&id)?;
            }
            debug!("Dropped table {}", id);
        }
        Ok(())
    }
}

#[cfg(test)]
impl LocalWarehouse {
    pub(crate) fn in_memory() -> Self {
        LocalWarehouse {
            ctx: SessionContext::new(),
            root: None,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) async fn table_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tables.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::read::Condition;
    use datafusion::arrow::array::{Float64Array, Int64Array, StringArray};

    pub(crate) fn target(table: &str) -> TableTarget {
        TableTarget::new("proj", "acme_dataset_facebook_api_raw", table)
    }

    pub(crate) fn string_batch(columns: &[(&str, Vec<Option<&str>>)]) -> RecordBatch {
        let schema = Arc::new(Schema::new(
            columns
                .iter()
                .map(|(name, _)| Field::new(*name, DataType::Utf8, true))
                .collect::<Vec<_>>(),
        ));
        let arrays = columns
            .iter()
            .map(|(_, values)| Arc::new(StringArray::from(values.clone())) as ArrayRef)
            .collect();
        RecordBatch::try_new(schema, arrays).unwrap()
    }

    pub(crate) async fn count_rows(warehouse: &impl Warehouse, target: &TableTarget) -> usize {
        warehouse
            .read(target, &ReadOptions::all())
            .await
            .unwrap()
            .iter()
            .map(|b| b.num_rows())
            .sum()
    }

    fn spend_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("campaign_id", DataType::Utf8, false),
            Field::new("spend", DataType::Float64, false),
            Field::new("clicks", DataType::Int32, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["c1", "c2"])),
                Arc::new(Float64Array::from(vec![1.5, 2.5])),
                Arc::new(datafusion::arrow::array::Int32Array::from(vec![3, 4])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_infer_column_types() {
        let schema = Schema::new(vec![
            Field::new("a", DataType::UInt64, false),
            Field::new("b", DataType::Float32, false),
            Field::new("c", DataType::Boolean, false),
            Field::new("d", DataType::Date32, false),
            Field::new("e", DataType::LargeUtf8, false),
            Field::new("date", DataType::Timestamp(TimeUnit::Microsecond, None), false),
        ]);
        let spec = TableSpec::infer(&schema, Some("date"), &["a", "missing"]);

        let types: Vec<ColumnType> = spec.columns.iter().map(|c| c.column_type).collect();
        assert_eq!(
            types,
            vec![
                ColumnType::Int64,
                ColumnType::Float64,
                ColumnType::Bool,
                ColumnType::Timestamp,
                ColumnType::String,
                ColumnType::Timestamp,
            ]
        );
        assert_eq!(spec.partition.as_deref(), Some("date"));
        assert_eq!(spec.cluster, vec!["a"]);

        let spec = TableSpec::infer(&schema, Some("day"), &[]);
        assert_eq!(spec.partition, None);
    }

    #[tokio::test]
    async fn test_create_append_and_read() {
        let warehouse = LocalWarehouse::in_memory();
        let table = target("spend");
        let batch = spend_batch();

        assert!(!warehouse.table_exists(&table).await.unwrap());
        warehouse
            .create_table(&table, TableSpec::infer(&batch.schema(), None, &[]))
            .await
            .unwrap();
        assert!(warehouse.table_exists(&table).await.unwrap());

        assert_eq!(warehouse.append(&table, batch.clone()).await.unwrap(), 2);
        assert_eq!(count_rows(&warehouse, &table).await, 2);

        let batches = warehouse.read(&table, &ReadOptions::all()).await.unwrap();
        let clicks = batches[0]
            .column_by_name("clicks")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(clicks.value(1), 4);

        let err = warehouse
            .create_table(&table, TableSpec::infer(&batch.schema(), None, &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TableExists { .. }));
    }

    #[tokio::test]
    async fn test_append_fills_missing_and_rejects_unknown_columns() {
        let warehouse = LocalWarehouse::in_memory();
        let table = target("spend");
        warehouse
            .create_table(&table, TableSpec::infer(&spend_batch().schema(), None, &[]))
            .await
            .unwrap();

        let partial = string_batch(&[("campaign_id", vec![Some("c9")])]);
        assert_eq!(warehouse.append(&table, partial).await.unwrap(), 1);

        let unknown = string_batch(&[("campaign_id", vec![Some("c9")]), ("bogus", vec![None])]);
        let err = warehouse.append(&table, unknown).await.unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { column, .. } if column == "bogus"));

        let err = warehouse
            .append(&target("absent"), spend_batch())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TableNotFound { .. }));
    }

    #[tokio::test]
    async fn test_append_rejects_values_that_do_not_cast() {
        let warehouse = LocalWarehouse::in_memory();
        let table = target("spend");
        warehouse
            .create_table(&table, TableSpec::infer(&spend_batch().schema(), None, &[]))
            .await
            .unwrap();

        let castable = string_batch(&[("campaign_id", vec![Some("c1")]), ("spend", vec![Some("7.5")])]);
        assert_eq!(warehouse.append(&table, castable).await.unwrap(), 1);

        let lossy = string_batch(&[("campaign_id", vec![Some("c2")]), ("clicks", vec![Some("many")])]);
        let err = warehouse.append(&table, lossy).await.unwrap_err();
        assert!(matches!(err, Error::Arrow(_)));
        assert_eq!(count_rows(&warehouse, &table).await, 1);
    }

    #[tokio::test]
    async fn test_delete_where_equals() {
        let warehouse = LocalWarehouse::in_memory();
        let table = target("spend");
        let batch = string_batch(&[
            ("date_start", vec![Some("2024-05-01"), Some("2024-05-02"), None]),
            ("spend", vec![Some("1"), Some("2"), Some("3")]),
        ]);
        warehouse
            .create_table(&table, TableSpec::infer(&batch.schema(), None, &[]))
            .await
            .unwrap();
        warehouse.append(&table, batch).await.unwrap();

        let deleted = warehouse
            .delete_where(
                &table,
                &Predicate::Equals {
                    column: "date_start".to_string(),
                    value: ScalarValue::from("2024-05-01"),
                },
            )
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        // null dates survive
        assert_eq!(count_rows(&warehouse, &table).await, 2);
    }

    #[tokio::test]
    async fn test_delete_where_matches_keys() {
        let warehouse = LocalWarehouse::in_memory();
        let table = target("campaign_metadata");
        let staging = target("staging_keys");

        let existing = string_batch(&[
            ("account_id", vec![Some("acc1"), Some("acc1"), Some("acc2"), None]),
            ("campaign_id", vec![Some("c1"), Some("c2"), Some("c1"), Some("c1")]),
        ]);
        warehouse
            .create_table(&table, TableSpec::infer(&existing.schema(), None, &[]))
            .await
            .unwrap();
        warehouse.append(&table, existing).await.unwrap();

        let keys = string_batch(&[
            ("account_id", vec![Some("acc1"), None]),
            ("campaign_id", vec![Some("c1"), Some("c1")]),
        ]);
        warehouse
            .create_table(&staging, TableSpec::infer(&keys.schema(), None, &[]).transient())
            .await
            .unwrap();
        warehouse.append(&staging, keys).await.unwrap();

        let deleted = warehouse
            .delete_where(
                &table,
                &Predicate::MatchesKeys {
                    staging: staging.clone(),
                    keys: vec!["account_id".to_string(), "campaign_id".to_string()],
                },
            )
            .await
            .unwrap();
        // (acc1, c1) and (NULL, c1) go, (acc2, c1) does not match (NULL, c1)
        assert_eq!(deleted, 2);
        assert_eq!(count_rows(&warehouse, &table).await, 2);

        let schema = warehouse.read(&table, &ReadOptions::all()).await.unwrap()[0].schema();
        assert_eq!(schema.fields().len(), 2);
    }

    #[tokio::test]
    async fn test_query_with_parameters() {
        let warehouse = LocalWarehouse::in_memory();
        let table = target("spend");
        let batch = spend_batch();
        warehouse
            .create_table(&table, TableSpec::infer(&batch.schema(), None, &[]))
            .await
            .unwrap();
        warehouse.append(&table, batch).await.unwrap();

        let sql = format!(
            "SELECT SUM(clicks) AS clicks FROM {} WHERE campaign_id = $1",
            sql_name(&table)
        );
        let batches = warehouse
            .query(&sql, vec![ScalarValue::from("c2")])
            .await
            .unwrap();
        let clicks = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(clicks.value(0), 4);
    }

    #[tokio::test]
    async fn test_read_with_options() {
        let warehouse = LocalWarehouse::in_memory();
        let table = target("spend");
        let batch = spend_batch();
        warehouse
            .create_table(&table, TableSpec::infer(&batch.schema(), None, &[]))
            .await
            .unwrap();
        warehouse.append(&table, batch).await.unwrap();

        let options = ReadOptions::builder()
            .condition(Condition::equals("campaign_id", "c1").unwrap())
            .include(&["spend"])
            .build()
            .unwrap();
        let batches = warehouse.read(&table, &options).await.unwrap();
        assert_eq!(batches[0].num_columns(), 1);
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 1);

        let err = warehouse
            .read(&target("absent"), &ReadOptions::all())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TableNotFound { .. }));
    }

    #[tokio::test]
    async fn test_tables_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let table = target("spend");
        let staging = target("temp_keys");
        {
            let warehouse = LocalWarehouse::open(dir.path()).await.unwrap();
            let batch = spend_batch();
            warehouse
                .create_table(&table, TableSpec::infer(&batch.schema(), None, &["campaign_id"]))
                .await
                .unwrap();
            warehouse.append(&table, batch).await.unwrap();
            warehouse
                .create_table(
                    &staging,
                    TableSpec::infer(&spend_batch().schema(), None, &[]).transient(),
                )
                .await
                .unwrap();
        }

        let warehouse = LocalWarehouse::open(dir.path()).await.unwrap();
        assert!(warehouse.table_exists(&table).await.unwrap());
        assert!(!warehouse.table_exists(&staging).await.unwrap());
        assert_eq!(count_rows(&warehouse, &table).await, 2);

        warehouse.drop_table(&table).await.unwrap();
        assert!(!warehouse.table_exists(&table).await.unwrap());
        warehouse.drop_table(&table).await.unwrap();

        let reopened = LocalWarehouse::open(dir.path()).await.unwrap();
        assert!(!reopened.table_exists(&table).await.unwrap());
    }
}
