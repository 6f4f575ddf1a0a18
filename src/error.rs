// 🚨 Error taxonomy for the merge engine and both storage backends
//
// Fatal errors abort before (document store) or between (remote store)
// mutations. Unresolvable records and consistency drift are NOT errors:
// they are counted in MergeSummary / surfaced in DuplicateReport.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed batch/store file, unrecognized batch shape
    #[error("Input error: {0}")]
    Input(String),

    /// Remote endpoint unreachable, non-success status or envelope
    #[error("Transport error: {0}")]
    Transport(String),

    /// A single call would exceed the endpoint's payload ceiling
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Local SQLite errors (SqliteTransport, query server)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Operator declined a destructive step, or a precondition was not met
    #[error("Refused: {0}")]
    Refused(String),
}

impl Error {
    /// Transport failures leave earlier calls committed; a rerun is safe
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(Error::Transport("503".to_string()).is_retryable());
        assert!(!Error::Input("bad json".to_string()).is_retryable());
        assert!(!Error::Refused("no backup".to_string()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::Input("batch file not found: x.json".to_string());
        assert_eq!(err.to_string(), "Input error: batch file not found: x.json");
    }
}
