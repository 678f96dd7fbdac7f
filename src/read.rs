use crate::error::Error;
use clap::Args as ClapArgs;
use datafusion::arrow::array::{BooleanArray, RecordBatch};
use datafusion::arrow::compute::filter_record_batch;
use datafusion::common::ScalarValue;
use datafusion::functions_aggregate::expr_fn::{avg, count, max, min, sum};
use datafusion::logical_expr::{ident, lit, Expr};
use datafusion::prelude::DataFrame;
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

/// A single `WHERE` term. The operand count is checked when built.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    field: String,
    op: CompareOp,
    values: Vec<ScalarValue>,
}

impl Condition {
    pub fn new(field: &str, op: CompareOp, values: Vec<ScalarValue>) -> Result<Self, Error> {
        if field.trim().is_empty() {
            return invalid("condition field must not be empty");
        }

        let arity_ok = match op {
            CompareOp::IsNull | CompareOp::IsNotNull => values.is_empty(),
            CompareOp::In | CompareOp::NotIn => !values.is_empty(),
            _ => values.len() == 1,
        };
        if !arity_ok {
            return invalid(&format!(
                "{:?} on '{}' does not take {} value(s)",
                op,
                field,
                values.len()
            ));
        }

        Ok(Condition {
            field: field.to_string(),
            op,
            values,
        })
    }

    pub fn equals(field: &str, value: impl Into<ScalarValue>) -> Result<Self, Error> {
        Condition::new(field, CompareOp::Eq, vec![value.into()])
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    fn to_expr(&self) -> Expr {
        let column = ident(&self.field);
        let mut operands = self.values.iter().cloned().map(lit);
        match self.op {
            CompareOp::IsNull => column.is_null(),
            CompareOp::IsNotNull => column.is_not_null(),
            CompareOp::In => column.in_list(operands.collect(), false),
            CompareOp::NotIn => column.in_list(operands.collect(), true),
            op => {
                // arity was checked in `new`
                let operand = operands.next().unwrap_or(lit(ScalarValue::Null));
                match op {
                    CompareOp::NotEq => column.not_eq(operand),
                    CompareOp::Gt => column.gt(operand),
                    CompareOp::GtEq => column.gt_eq(operand),
                    CompareOp::Lt => column.lt(operand),
                    CompareOp::LtEq => column.lt_eq(operand),
                    _ => column.eq(operand),
                }
            }
        }
    }
}

/// Parses `field op value` terms such as `spend>=10`, `campaign_id in c1|c2`
/// or `date_start is null`.
pub fn parse_condition(s: &str) -> Result<Condition, String> {
    let term = s.trim();
    let lower = term.to_ascii_lowercase();

    for (suffix, op) in [
        (" is not null", CompareOp::IsNotNull),
        (" is null", CompareOp::IsNull),
    ] {
        if lower.ends_with(suffix) {
            let field = &term[..term.len() - suffix.len()];
            return Condition::new(field.trim(), op, vec![]).map_err(|err| err.to_string());
        }
    }

    for (symbol, op) in [
        (">=", CompareOp::GtEq),
        ("<=", CompareOp::LtEq),
        ("!=", CompareOp::NotEq),
        ("=", CompareOp::Eq),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ] {
        if let Some((field, value)) = term.split_once(symbol) {
            return Condition::new(field.trim(), op, vec![parse_value(value.trim())?])
                .map_err(|err| err.to_string());
        }
    }

    for (keyword, op) in [(" not in ", CompareOp::NotIn), (" in ", CompareOp::In)] {
        if let Some(at) = lower.find(keyword) {
            let values = term[at + keyword.len()..]
                .split('|')
                .map(|value| parse_value(value.trim()))
                .collect::<Result<Vec<_>, _>>()?;
            return Condition::new(term[..at].trim(), op, values).map_err(|err| err.to_string());
        }
    }

    Err(format!(
        "Invalid condition '{term}', expected e.g. spend>10 or campaign_id in c1|c2"
    ))
}

/// Integers, floats and booleans are typed, anything else (or anything in
/// single quotes) is a string.
pub fn parse_value(value: &str) -> Result<ScalarValue, String> {
    if let Some(quoted) = value
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
    {
        return Ok(ScalarValue::from(quoted));
    }
    if let Ok(int) = value.parse::<i64>() {
        return Ok(ScalarValue::from(int));
    }
    if let Ok(float) = value.parse::<f64>() {
        if float.is_finite() {
            return Ok(ScalarValue::from(float));
        }
    }
    Ok(match value {
        "true" => ScalarValue::from(true),
        "false" => ScalarValue::from(false),
        other => ScalarValue::from(other),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Projection {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Min,
    Max,
    Count,
    Avg,
}

impl AggFunc {
    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sum" => Some(AggFunc::Sum),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            "count" => Some(AggFunc::Count),
            "avg" => Some(AggFunc::Avg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measure {
    pub func: AggFunc,
    pub column: String,
    pub alias: String,
}

impl Measure {
    pub fn new(func: AggFunc, column: &str, alias: &str) -> Self {
        Measure {
            func,
            column: column.to_string(),
            alias: alias.to_string(),
        }
    }

    fn to_expr(&self) -> Expr {
        let column = ident(&self.column);
        let expr = match self.func {
            AggFunc::Sum => sum(column),
            AggFunc::Min => min(column),
            AggFunc::Max => max(column),
            AggFunc::Count => count(column),
            AggFunc::Avg => avg(column),
        };
        expr.alias(&self.alias)
    }
}

/// Parses `func:column[:alias]`, e.g. `sum:spend:total_spend`. The alias
/// defaults to `func_column`.
pub fn parse_measure(s: &str) -> Result<Measure, String> {
    let mut parts = s.split(':').map(str::trim);
    let (Some(name), Some(column)) = (parts.next(), parts.next()) else {
        return Err(format!("Invalid measure '{s}', expected func:column[:alias]"));
    };
    let func = AggFunc::parse(name)
        .ok_or_else(|| format!("Unsupported aggregate '{name}', expected sum, min, max, count or avg"))?;
    let alias = match parts.next() {
        Some(alias) => alias.to_string(),
        None => format!("{}_{}", name.to_ascii_lowercase(), column),
    };
    if parts.next().is_some() {
        return Err(format!("Invalid measure '{s}', expected func:column[:alias]"));
    }
    Ok(Measure::new(func, column, &alias))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub group_by: Vec<String>,
    pub measures: Vec<Measure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// Parses `column[:asc|:desc]`, ascending when no direction is given.
pub fn parse_order_by(s: &str) -> Result<OrderBy, String> {
    let (column, ascending) = match s.rsplit_once(':') {
        Some((column, direction)) => match direction.trim().to_ascii_lowercase().as_str() {
            "asc" => (column, true),
            "desc" => (column, false),
            other => return Err(format!("Invalid direction '{other}', expected asc or desc")),
        },
        None => (s, true),
    };
    if column.trim().is_empty() {
        return Err("order-by column must not be empty".to_string());
    }
    Ok(OrderBy {
        column: column.trim().to_string(),
        ascending,
    })
}

/// Typed read request against a warehouse table, applied in the order
/// where, select, aggregate, order, limit, sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOptions {
    conditions: Vec<Condition>,
    projection: Projection,
    aggregate: Option<Aggregate>,
    order_by: Vec<OrderBy>,
    limit: Option<usize>,
    sample: Option<f64>,
}

#[derive(Debug, Default)]
pub struct ReadOptionsBuilder {
    options: ReadOptions,
    include: Vec<String>,
    exclude: Vec<String>,
}

impl ReadOptions {
    pub fn builder() -> ReadOptionsBuilder {
        ReadOptionsBuilder::default()
    }

    /// Reads everything.
    pub fn all() -> Self {
        ReadOptions::default()
    }

    pub fn apply(&self, df: DataFrame) -> Result<DataFrame, Error> {
        let mut df = df;

        for condition in &self.conditions {
            if !df
                .schema()
                .has_column_with_unqualified_name(condition.field())
            {
                warn!(
                    "Skipping condition on '{}': column not present",
                    condition.field()
                );
                continue;
            }
            df = df.filter(condition.to_expr())?;
        }

        match &self.projection {
            Projection::All => {}
            Projection::Include(columns) => {
                for column in columns {
                    if !df.schema().has_column_with_unqualified_name(column) {
                        return Err(Error::MissingColumn {
                            column: column.clone(),
                        });
                    }
                }
                df = df.select(columns.iter().map(ident).collect::<Vec<Expr>>())?;
            }
            Projection::Exclude(columns) => {
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                df = df.drop_columns(&columns)?;
            }
        }

        if let Some(aggregate) = &self.aggregate {
            df = df.aggregate(
                aggregate.group_by.iter().map(ident).collect(),
                aggregate.measures.iter().map(Measure::to_expr).collect(),
            )?;
        }

        if !self.order_by.is_empty() {
            df = df.sort(
                self.order_by
                    .iter()
                    .map(|order| ident(&order.column).sort(order.ascending, false))
                    .collect(),
            )?;
        }

        if let Some(limit) = self.limit {
            df = df.limit(0, Some(limit))?;
        }

        Ok(df)
    }

    /// Keeps every n-th row, n being the rounded inverse of the sample
    /// fraction, so repeated reads return the same sample.
    pub fn sample_batches(&self, batches: Vec<RecordBatch>) -> Result<Vec<RecordBatch>, Error> {
        let Some(fraction) = self.sample else {
            return Ok(batches);
        };

        let stride = ((1.0 / fraction).round() as usize).max(1);
        let mut offset = 0usize;
        let mut sampled = Vec::with_capacity(batches.len());
        for batch in batches {
            let mask: BooleanArray = (0..batch.num_rows())
                .map(|row| Some((offset + row) % stride == 0))
                .collect();
            offset += batch.num_rows();
            sampled.push(filter_record_batch(&batch, &mask)?);
        }

        Ok(sampled)
    }
}

impl ReadOptionsBuilder {
    pub fn condition(mut self, condition: Condition) -> Self {
        self.options.conditions.push(condition);
        self
    }

    pub fn include(mut self, columns: &[&str]) -> Self {
        self.include.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn exclude(mut self, columns: &[&str]) -> Self {
        self.exclude.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn group_by(mut self, columns: &[&str]) -> Self {
        let aggregate = self.options.aggregate.get_or_insert_with(Aggregate::default);
        aggregate
            .group_by
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn measure(mut self, func: AggFunc, column: &str, alias: &str) -> Self {
        let aggregate = self.options.aggregate.get_or_insert_with(Aggregate::default);
        aggregate.measures.push(Measure::new(func, column, alias));
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.options.order_by.push(OrderBy {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn sample(mut self, fraction: f64) -> Self {
        self.options.sample = Some(fraction);
        self
    }

    pub fn build(self) -> Result<ReadOptions, Error> {
        let ReadOptionsBuilder {
            mut options,
            include,
            exclude,
        } = self;

        options.projection = match (include.is_empty(), exclude.is_empty()) {
            (true, true) => Projection::All,
            (false, true) => Projection::Include(include),
            (true, false) => Projection::Exclude(exclude),
            (false, false) => return invalid("include and exclude cannot be combined"),
        };

        if let Some(aggregate) = &options.aggregate {
            if aggregate.group_by.is_empty() && aggregate.measures.is_empty() {
                return invalid("aggregate needs a group-by column or a measure");
            }
            if let Some(measure) = aggregate
                .measures
                .iter()
                .find(|m| m.column.is_empty() || m.alias.is_empty())
            {
                return invalid(&format!("measure {:?} needs a column and an alias", measure.func));
            }
        }

        if options.limit == Some(0) {
            return invalid("limit must be positive");
        }

        if let Some(fraction) = options.sample {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return invalid(&format!("sample fraction {fraction} is outside (0, 1]"));
            }
        }

        Ok(options)
    }
}

/// Read options as given on the command line.
#[derive(ClapArgs, Debug, Clone)]
pub struct ReadArgs {
    #[arg(
        long = "where",
        value_parser = parse_condition,
        help = "Filter such as spend>10, campaign_id in c1|c2 or date_start is null"
    )]
    pub conditions: Vec<Condition>,

    #[arg(long, value_delimiter = ',', conflicts_with = "exclude")]
    pub include: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    pub group_by: Vec<String>,

    #[arg(long, value_parser = parse_measure, help = "Aggregate as func:column[:alias]")]
    pub measure: Vec<Measure>,

    #[arg(long, value_parser = parse_order_by, help = "Sort as column[:asc|:desc]")]
    pub order_by: Vec<OrderBy>,

    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long, help = "Fraction of rows to keep, in (0, 1]")]
    pub sample: Option<f64>,
}

impl ReadArgs {
    pub fn to_options(&self) -> Result<ReadOptions, Error> {
        let mut builder = ReadOptions::builder()
            .include(&as_strs(&self.include))
            .exclude(&as_strs(&self.exclude));

        for condition in &self.conditions {
            builder = builder.condition(condition.clone());
        }
        if !self.group_by.is_empty() {
            builder = builder.group_by(&as_strs(&self.group_by));
        }
        for measure in &self.measure {
            builder = builder.measure(measure.func, &measure.column, &measure.alias);
        }
        for order in &self.order_by {
            builder = builder.order_by(&order.column, order.ascending);
        }
        if let Some(limit) = self.limit {
            builder = builder.limit(limit);
        }
        if let Some(fraction) = self.sample {
            builder = builder.sample(fraction);
        }

        builder.build()
    }
}

fn as_strs(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

fn invalid<T>(reason: &str) -> Result<T, Error> {
    Err(Error::InvalidReadOptions {
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::{Float64Array, Int64Array, StringArray};
    use datafusion::arrow::datatypes::{DataType, Field, Schema};
    use datafusion::prelude::SessionContext;
    use std::sync::Arc;

    fn spend_df(ctx: &SessionContext) -> DataFrame {
        let schema = Arc::new(Schema::new(vec![
            Field::new("campaign_id", DataType::Utf8, true),
            Field::new("date_start", DataType::Utf8, true),
            Field::new("spend", DataType::Float64, true),
            Field::new("clicks", DataType::Int64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["c1", "c1", "c2", "c3"])),
                Arc::new(StringArray::from(vec![
                    Some("2024-05-01"),
                    Some("2024-05-02"),
                    Some("2024-05-01"),
                    None,
                ])),
                Arc::new(Float64Array::from(vec![1.5, 2.5, 10.0, 5.0])),
                Arc::new(Int64Array::from(vec![10, 20, 30, 40])),
            ],
        )
        .unwrap();
        ctx.read_batch(batch).unwrap()
    }

    async fn rows(df: DataFrame) -> usize {
        df.collect()
            .await
            .unwrap()
            .iter()
            .map(|b| b.num_rows())
            .sum()
    }

    #[tokio::test]
    async fn test_conditions_filter_rows() {
        let ctx = SessionContext::new();

        let options = ReadOptions::builder()
            .condition(Condition::equals("campaign_id", "c1").unwrap())
            .build()
            .unwrap();
        assert_eq!(rows(options.apply(spend_df(&ctx)).unwrap()).await, 2);

        let options = ReadOptions::builder()
            .condition(
                Condition::new(
                    "campaign_id",
                    CompareOp::In,
                    vec![ScalarValue::from("c2"), ScalarValue::from("c3")],
                )
                .unwrap(),
            )
            .condition(Condition::new("spend", CompareOp::Gt, vec![ScalarValue::from(5.0)]).unwrap())
            .build()
            .unwrap();
        assert_eq!(rows(options.apply(spend_df(&ctx)).unwrap()).await, 1);

        let options = ReadOptions::builder()
            .condition(Condition::new("date_start", CompareOp::IsNull, vec![]).unwrap())
            .build()
            .unwrap();
        assert_eq!(rows(options.apply(spend_df(&ctx)).unwrap()).await, 1);
    }

    #[tokio::test]
    async fn test_condition_on_absent_column_is_skipped() {
        let ctx = SessionContext::new();
        let options = ReadOptions::builder()
            .condition(Condition::equals("adset_id", "a1").unwrap())
            .build()
            .unwrap();
        assert_eq!(rows(options.apply(spend_df(&ctx)).unwrap()).await, 4);
    }

    #[tokio::test]
    async fn test_include_and_exclude() {
        let ctx = SessionContext::new();

        let options = ReadOptions::builder()
            .include(&["campaign_id", "spend"])
            .build()
            .unwrap();
        let df = options.apply(spend_df(&ctx)).unwrap();
        assert_eq!(df.schema().fields().len(), 2);

        let options = ReadOptions::builder().exclude(&["clicks"]).build().unwrap();
        let df = options.apply(spend_df(&ctx)).unwrap();
        assert_eq!(df.schema().fields().len(), 3);
        assert!(!df.schema().has_column_with_unqualified_name("clicks"));

        let options = ReadOptions::builder().include(&["missing"]).build().unwrap();
        assert!(matches!(
            options.apply(spend_df(&ctx)).unwrap_err(),
            Error::MissingColumn { column } if column == "missing"
        ));
    }

    #[tokio::test]
    async fn test_aggregate_order_and_limit() {
        let ctx = SessionContext::new();
        let options = ReadOptions::builder()
            .group_by(&["campaign_id"])
            .measure(AggFunc::Sum, "spend", "total_spend")
            .measure(AggFunc::Count, "clicks", "days")
            .order_by("total_spend", false)
            .limit(2)
            .build()
            .unwrap();

        let batches = options.apply(spend_df(&ctx)).unwrap().collect().await.unwrap();
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 2);

        let ids = batch
            .column_by_name("campaign_id")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        let totals = batch
            .column_by_name("total_spend")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(ids.value(0), "c2");
        assert_eq!(totals.value(0), 10.0);
        assert_eq!(ids.value(1), "c3");
    }

    #[tokio::test]
    async fn test_sample_keeps_every_nth_row() {
        let ctx = SessionContext::new();
        let options = ReadOptions::builder().sample(0.5).build().unwrap();
        let batches = options.apply(spend_df(&ctx)).unwrap().collect().await.unwrap();
        let sampled = options.sample_batches(batches).unwrap();
        assert_eq!(sampled.iter().map(|b| b.num_rows()).sum::<usize>(), 2);
    }

    #[test]
    fn test_invalid_options_are_rejected_when_built() {
        assert!(Condition::new("spend", CompareOp::Gt, vec![]).is_err());
        assert!(Condition::new("spend", CompareOp::IsNull, vec![ScalarValue::from(1.0)]).is_err());
        assert!(Condition::new("", CompareOp::Eq, vec![ScalarValue::from(1.0)]).is_err());
        assert!(Condition::new("spend", CompareOp::NotIn, vec![]).is_err());

        let err = ReadOptions::builder()
            .include(&["a"])
            .exclude(&["b"])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidReadOptions { .. }));

        assert!(ReadOptions::builder().sample(0.0).build().is_err());
        assert!(ReadOptions::builder().sample(1.5).build().is_err());
        assert!(ReadOptions::builder().limit(0).build().is_err());
        assert!(ReadOptions::builder()
            .measure(AggFunc::Sum, "spend", "")
            .build()
            .is_err());
    }

    #[test]
    fn test_parse_condition() {
        assert_eq!(
            parse_condition("spend >= 10").unwrap(),
            Condition::new("spend", CompareOp::GtEq, vec![ScalarValue::from(10i64)]).unwrap()
        );
        assert_eq!(
            parse_condition("campaign_id!='123'").unwrap(),
            Condition::new("campaign_id", CompareOp::NotEq, vec![ScalarValue::from("123")]).unwrap()
        );
        assert_eq!(
            parse_condition("date_start=2024-05-01").unwrap(),
            Condition::equals("date_start", "2024-05-01").unwrap()
        );
        assert_eq!(
            parse_condition("campaign_id not in c1|c2").unwrap(),
            Condition::new(
                "campaign_id",
                CompareOp::NotIn,
                vec![ScalarValue::from("c1"), ScalarValue::from("c2")]
            )
            .unwrap()
        );
        assert_eq!(
            parse_condition("date_start IS NOT NULL").unwrap(),
            Condition::new("date_start", CompareOp::IsNotNull, vec![]).unwrap()
        );
        assert!(parse_condition("spend").is_err());
        assert!(parse_condition("= 5").is_err());
    }

    #[test]
    fn test_parse_value_types() {
        assert_eq!(parse_value("7").unwrap(), ScalarValue::from(7i64));
        assert_eq!(parse_value("2.5").unwrap(), ScalarValue::from(2.5));
        assert_eq!(parse_value("true").unwrap(), ScalarValue::from(true));
        assert_eq!(parse_value("inf").unwrap(), ScalarValue::from("inf"));
        assert_eq!(parse_value("'42'").unwrap(), ScalarValue::from("42"));
    }

    #[test]
    fn test_parse_measure_and_order_by() {
        assert_eq!(
            parse_measure("sum:spend:total_spend").unwrap(),
            Measure::new(AggFunc::Sum, "spend", "total_spend")
        );
        assert_eq!(
            parse_measure("AVG:cpc").unwrap(),
            Measure::new(AggFunc::Avg, "cpc", "avg_cpc")
        );
        assert!(parse_measure("median:spend").is_err());
        assert!(parse_measure("sum").is_err());
        assert!(parse_measure("sum:spend:total:extra").is_err());

        assert_eq!(
            parse_order_by("spend:desc").unwrap(),
            OrderBy {
                column: "spend".to_string(),
                ascending: false
            }
        );
        assert!(parse_order_by("spend").unwrap().ascending);
        assert!(parse_order_by("spend:sideways").is_err());
    }

    #[derive(clap::Parser)]
    struct Cli {
        #[command(flatten)]
        read: ReadArgs,
    }

    #[tokio::test]
    async fn test_read_args_build_options() {
        use clap::Parser;

        let cli = Cli::try_parse_from([
            "inspect",
            "--where",
            "spend>1",
            "--where",
            "date_start is not null",
            "--group-by",
            "campaign_id",
            "--measure",
            "min:spend:cheapest",
            "--order-by",
            "cheapest:desc",
            "--limit",
            "1",
        ])
        .unwrap();
        let options = cli.read.to_options().unwrap();

        let batches = options.apply(spend_df(&SessionContext::new())).unwrap().collect().await.unwrap();
        let cheapest = batches[0]
            .column_by_name("cheapest")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(batches[0].num_rows(), 1);
        assert_eq!(cheapest.value(0), 10.0);

        let cli = Cli::try_parse_from(["inspect", "--sample", "2"]).unwrap();
        assert!(matches!(
            cli.read.to_options().unwrap_err(),
            Error::InvalidReadOptions { .. }
        ));
        assert!(Cli::try_parse_from(["inspect", "--include", "a", "--exclude", "b"]).is_err());
    }
}
