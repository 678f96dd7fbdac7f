mod api_client;
mod config;
mod data;
mod error;
mod flow;
mod freshness;
mod orchestrator;
mod read;
mod retry;
mod runner;
mod secrets;
mod table;
mod transform;
mod upsert;
mod warehouse;
mod window;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use config::Config;
use datafusion::arrow::util::pretty::pretty_format_batches;
use datafusion::common::ScalarValue;
use error::Error;
use log::error;
use read::{parse_value, ReadArgs};
use runner::Inspection;
use window::{validate_date, IngestionWindow, RelativeWindow};

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest insights and metadata for a date window, then rebuild staging and marts
    Sync {
        #[arg(
            long = "start_date",
            alias = "start-date",
            help = "Date should be in the form YYYY-MM-DD",
            value_parser = validate_date,
            requires = "end_date",
            conflicts_with = "mode"
        )]
        start_date: Option<NaiveDate>,

        #[arg(
            long = "end_date",
            alias = "end-date",
            help = "Date should be in the form YYYY-MM-DD",
            value_parser = validate_date,
            requires = "start_date"
        )]
        end_date: Option<NaiveDate>,

        #[arg(long, value_enum, required_unless_present = "start_date")]
        mode: Option<RelativeWindow>,
    },
    /// Print rows of one raw table, e.g. `--table campaign_m052024`
    Inspect {
        #[arg(long, help = "Table name after the account prefix")]
        table: String,

        #[command(flatten)]
        read: ReadArgs,

        #[arg(
            long,
            help = "SQL to run instead, with {table} for the inspected table",
            conflicts_with_all = [
                "conditions", "include", "exclude", "group_by", "measure", "order_by", "limit", "sample"
            ]
        )]
        sql: Option<String>,

        #[arg(long = "param", requires = "sql", value_parser = parse_value, help = "Value for $1, $2, ...")]
        params: Vec<ScalarValue>,
    },
}

fn resolve_window(
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    mode: Option<RelativeWindow>,
    today: NaiveDate,
) -> Result<IngestionWindow, Error> {
    match (start_date, end_date, mode) {
        (Some(start), Some(end), _) => IngestionWindow::new(start, end),
        (_, _, Some(mode)) => Ok(mode.resolve(today)),
        _ => Err(Error::InvalidConfig {
            key: "window".to_string(),
            reason: "pass --start_date and --end_date, or --mode".to_string(),
        }),
    }
}

fn inspection(read: &ReadArgs, sql: Option<String>, params: Vec<ScalarValue>) -> Result<Inspection, Error> {
    match sql {
        Some(sql) => Ok(Inspection::Sql { sql, params }),
        None => Ok(Inspection::Read(read.to_options()?)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::init();

    match args.command {
        Command::Sync {
            start_date,
            end_date,
            mode,
        } => {
            let today = Local::now().date_naive();
            let result = match resolve_window(start_date, end_date, mode, today) {
                Ok(window) => runner::sync_ads_data(args.config, window).await,
                Err(err) => Err(err),
            };

            if let Err(err) = result {
                error!("failed to sync ads data: {}", err);
                std::process::exit(1);
            }
        }
        Command::Inspect {
            table,
            read,
            sql,
            params,
        } => {
            let result = match inspection(&read, sql, params) {
                Ok(inspection) => runner::inspect_table(args.config, &table, inspection).await,
                Err(err) => Err(err),
            };

            match result.and_then(|batches| Ok(pretty_format_batches(&batches)?.to_string())) {
                Ok(rows) => println!("{rows}"),
                Err(err) => {
                    error!("failed to inspect {}: {}", table, err);
                    std::process::exit(1);
                }
            }
        }
    };

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_explicit_dates_win() {
        let window = resolve_window(
            Some(date("2024-05-01")),
            Some(date("2024-05-03")),
            None,
            date("2024-06-10"),
        )
        .unwrap();
        assert_eq!(window.start(), date("2024-05-01"));
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_start_after_end_is_rejected() {
        let result = resolve_window(
            Some(date("2024-05-03")),
            Some(date("2024-05-01")),
            None,
            date("2024-06-10"),
        );
        assert!(matches!(result.unwrap_err(), Error::StartDateAfterEndDate { .. }));
    }

    #[test]
    fn test_mode_resolves_relative_to_today() {
        let window =
            resolve_window(None, None, Some(RelativeWindow::Today), date("2024-06-10")).unwrap();
        assert_eq!(window, IngestionWindow::single_day(date("2024-06-10")));
    }

    #[test]
    fn test_cli_parses_sync_dates() {
        let args = Args::try_parse_from([
            "ads-raw-sync",
            "--company",
            "acme",
            "sync",
            "--start_date",
            "2024-05-01",
            "--end_date",
            "2024-05-02",
        ])
        .unwrap();
        let Command::Sync {
            start_date, mode, ..
        } = args.command
        else {
            panic!("expected sync");
        };
        assert_eq!(start_date, Some(date("2024-05-01")));
        assert_eq!(mode, None);
    }

    #[test]
    fn test_cli_parses_inspect_read_options() {
        let args = Args::try_parse_from([
            "ads-raw-sync",
            "inspect",
            "--table",
            "campaign_m052024",
            "--where",
            "spend>10",
            "--order-by",
            "spend:desc",
            "--limit",
            "5",
        ])
        .unwrap();
        let Command::Inspect {
            table, read, sql, ..
        } = args.command
        else {
            panic!("expected inspect");
        };
        assert_eq!(table, "campaign_m052024");
        assert!(matches!(inspection(&read, sql, vec![]).unwrap(), Inspection::Read(_)));
    }

    #[test]
    fn test_cli_parses_inspect_sql() {
        let args = Args::try_parse_from([
            "ads-raw-sync",
            "inspect",
            "--table",
            "campaign_m052024",
            "--sql",
            "SELECT COUNT(*) FROM {table} WHERE date_start = $1",
            "--param",
            "2024-05-01",
        ])
        .unwrap();
        let Command::Inspect {
            read, sql, params, ..
        } = args.command
        else {
            panic!("expected inspect");
        };
        assert_eq!(params, vec![ScalarValue::from("2024-05-01")]);
        assert!(matches!(
            inspection(&read, sql, params).unwrap(),
            Inspection::Sql { .. }
        ));

        let result = Args::try_parse_from([
            "ads-raw-sync",
            "inspect",
            "--table",
            "campaign_m052024",
            "--sql",
            "SELECT 1",
            "--limit",
            "5",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_rejects_dates_with_mode() {
        let result = Args::try_parse_from([
            "ads-raw-sync",
            "sync",
            "--start_date",
            "2024-05-01",
            "--end_date",
            "2024-05-02",
            "--mode",
            "today",
        ]);
        assert!(result.is_err());
    }
}
