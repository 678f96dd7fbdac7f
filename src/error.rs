use datafusion::{arrow::error::ArrowError, error::DataFusionError, parquet::errors::ParquetError};
use std::ops::RangeInclusive;
use thiserror::Error;

/// Graph API error codes for throttling and temporary unavailability.
const RETRYABLE_UPSTREAM_CODES: &[i64] = &[1, 2, 4, 17, 32, 341, 613];

/// Business use case rate limits.
const BUSINESS_RATE_LIMIT_CODES: RangeInclusive<i64> = 80000..=80014;

/// Graph API codes for an expired or invalidated access token.
pub const AUTH_ERROR_CODES: &[i64] = &[102, 190];

#[derive(Debug, Error)]
pub enum Error {
    #[error("DataFusion: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet: {0}")]
    Parquet(#[from] ParquetError),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("'The date supplied {date} is invalid'")]
    InvalidDate { date: String },

    #[error("The start date: '{start_date}' is greater than the end date: '{end_date}'")]
    StartDateAfterEndDate {
        start_date: String,
        end_date: String,
    },

    #[error("Missing required configuration value(s): {}", keys.join(", "))]
    MissingConfig { keys: Vec<String> },

    #[error("Invalid configuration for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("Failed to resolve secret {secret_id}: {reason}")]
    Secret { secret_id: String, reason: String },

    #[error("API responded with error: {0}")]
    ApiFailure(#[from] reqwest::Error),

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("Access token rejected (code {code:?}): {message}")]
    AuthExpired { code: Option<i64>, message: String },

    #[error("Upstream returned HTTP {status} (code {code:?}): {message}")]
    Upstream {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    #[error("Remote call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Gave up on {unit} after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        unit: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Required column '{column}' is missing")]
    MissingColumn { column: String },

    #[error("Table {table} not found")]
    TableNotFound { table: String },

    #[error("Table {table} already exists")]
    TableExists { table: String },

    #[error("Column '{column}' does not exist in table {table}")]
    SchemaMismatch { table: String, column: String },

    #[error("Invalid read options: {reason}")]
    InvalidReadOptions { reason: String },

    #[error("Transform {selector} failed: {message}")]
    Transform { selector: String, message: String },

    #[error("Flow {flow} finished with failed section(s): {}", sections.join(", "))]
    SectionsFailed { flow: String, sections: Vec<String> },

    #[error("{} flow(s) failed: {}", names.len(), names.join(", "))]
    FlowsFailed { names: Vec<String> },
}

/// How the retrying fetcher treats a failed unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Defer the unit to the next attempt.
    Retryable,
    /// Stop immediately, regardless of the remaining budget.
    Fatal,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Upstream { status, code, .. } => {
                let throttled = code.is_some_and(|code| {
                    RETRYABLE_UPSTREAM_CODES.contains(&code)
                        || BUSINESS_RATE_LIMIT_CODES.contains(&code)
                });
                if *status >= 500 || throttled {
                    ErrorClass::Retryable
                } else {
                    ErrorClass::Fatal
                }
            }
            Error::Timeout { .. } => ErrorClass::Retryable,
            Error::ApiFailure(err) => {
                let server_side = err.status().is_some_and(|s| s.is_server_error());
                if err.is_timeout() || err.is_connect() || server_side {
                    ErrorClass::Retryable
                } else {
                    ErrorClass::Fatal
                }
            }
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Credential failures abort a whole flow, not just the current section.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::AuthExpired { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(status: u16, code: Option<i64>) -> Error {
        Error::Upstream {
            status,
            code,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(upstream(500, None).is_retryable());
        assert!(upstream(503, Some(100)).is_retryable());
    }

    #[test]
    fn test_throttling_codes_are_retryable() {
        for code in [1, 2, 4, 17, 32, 341, 613, 80000, 80004, 80014] {
            assert!(upstream(400, Some(code)).is_retryable(), "code {code}");
        }
    }

    #[test]
    fn test_client_errors_are_fatal() {
        assert_eq!(upstream(400, Some(100)).class(), ErrorClass::Fatal);
        assert_eq!(upstream(400, Some(80015)).class(), ErrorClass::Fatal);
        assert_eq!(upstream(404, None).class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_auth_is_fatal() {
        let err = Error::AuthExpired {
            code: Some(190),
            message: "Session has expired".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert!(err.is_auth());
    }

    #[test]
    fn test_timeout_is_retryable() {
        assert!(Error::Timeout { seconds: 180 }.is_retryable());
    }

    #[test]
    fn test_unclassified_errors_are_fatal() {
        let err = Error::InvalidReadOptions {
            reason: "limit must be positive".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Fatal);
        let err = Error::MissingColumn {
            column: "date_start".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_display_lists_failed_flows() {
        let err = Error::FlowsFailed {
            names: vec!["ad".to_string(), "campaign".to_string()],
        };
        assert_eq!(err.to_string(), "2 flow(s) failed: ad, campaign");

        let err = Error::MissingConfig {
            keys: vec!["COMPANY".to_string(), "ACCOUNT".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Missing required configuration value(s): COMPANY, ACCOUNT"
        );
    }
}
