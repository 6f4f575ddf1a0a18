// 🔌 Query transports - how statements reach the remote store
//
// A call is an ordered list of statements. The endpoint executes them in
// order WITHOUT a wrapping transaction: a failure part-way leaves the
// earlier statements committed. Callers must keep every call resubmittable.

use super::http::HttpTransport;
use super::sqlite::SqliteTransport;
use super::statement::{QueryOutcome, QueryRequest, Statement};
use crate::error::{Error, Result};

/// Per-call ceilings of the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallLimits {
    pub max_statements: usize,
    pub max_payload_bytes: usize,
    pub id_batch_size: usize,
}

impl Default for CallLimits {
    fn default() -> Self {
        CallLimits {
            max_statements: 50,
            max_payload_bytes: 100_000,
            id_batch_size: 100,
        }
    }
}

impl CallLimits {
    /// Reject a call the endpoint would refuse
    pub fn check(&self, statements: &[Statement]) -> Result<()> {
        if statements.len() > self.max_statements {
            return Err(Error::PayloadTooLarge(format!(
                "{} statements in one call (limit {})",
                statements.len(),
                self.max_statements
            )));
        }

        let bytes = serde_json::to_vec(&QueryRequest::from_statements(statements))?.len();
        if bytes > self.max_payload_bytes {
            return Err(Error::PayloadTooLarge(format!(
                "{} bytes in one call (limit {})",
                bytes, self.max_payload_bytes
            )));
        }

        Ok(())
    }
}

pub trait QueryTransport {
    /// Execute one call; one outcome per statement, in order
    fn execute(&self, statements: &[Statement]) -> Result<Vec<QueryOutcome>>;

    fn limits(&self) -> CallLimits;

    /// Single-statement convenience
    fn query(&self, statement: Statement) -> Result<QueryOutcome> {
        self.execute(std::slice::from_ref(&statement))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Transport("endpoint returned no result".to_string()))
    }
}

/// Transport chosen at runtime from configuration
pub enum RemoteTransport {
    Http(HttpTransport),
    Sqlite(SqliteTransport),
}

impl QueryTransport for RemoteTransport {
    fn execute(&self, statements: &[Statement]) -> Result<Vec<QueryOutcome>> {
        match self {
            RemoteTransport::Http(t) => t.execute(statements),
            RemoteTransport::Sqlite(t) => t.execute(statements),
        }
    }

    fn limits(&self) -> CallLimits {
        match self {
            RemoteTransport::Http(t) => t.limits(),
            RemoteTransport::Sqlite(t) => t.limits(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_reject_too_many_statements() {
        let limits = CallLimits {
            max_statements: 2,
            ..Default::default()
        };
        let statements = vec![Statement::new("SELECT 1"); 3];

        assert!(matches!(limits.check(&statements), Err(Error::PayloadTooLarge(_))));
        assert!(limits.check(&statements[..2]).is_ok());
    }

    #[test]
    fn test_limits_reject_oversized_payload() {
        let limits = CallLimits {
            max_payload_bytes: 64,
            ..Default::default()
        };
        let big = Statement::new("SELECT ?").bind("x".repeat(100));

        assert!(matches!(limits.check(&[big]), Err(Error::PayloadTooLarge(_))));
    }
}
