// 🗄️ SqliteTransport - a local SQLite file behind the query interface
//
// Same partial-failure behaviour as the remote endpoint: statements run one
// by one, autocommit, stop at the first error.

use super::statement::{QueryOutcome, Row, SqlValue, Statement};
use super::transport::{CallLimits, QueryTransport};
use crate::error::Result;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::path::Path;
use tracing::{debug, warn};

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn json_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) | ValueRef::Blob(t) => {
            serde_json::Value::String(String::from_utf8_lossy(t).into_owned())
        }
    }
}

pub struct SqliteTransport {
    conn: Connection,
    limits: CallLimits,
}

impl SqliteTransport {
    pub fn open<P: AsRef<Path>>(path: P, limits: CallLimits) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, limits)
    }

    pub fn in_memory(limits: CallLimits) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, limits)
    }

    fn from_connection(conn: Connection, limits: CallLimits) -> Result<Self> {
        // The hosted endpoint enforces foreign keys; so do we
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(SqliteTransport { conn, limits })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn run(&self, statement: &Statement) -> Result<QueryOutcome> {
        let mut stmt = self.conn.prepare(&statement.sql)?;
        let params = params_from_iter(statement.params.iter());

        if stmt.column_count() == 0 {
            let changes = stmt.execute(params)?;
            return Ok(QueryOutcome {
                rows: Vec::new(),
                changes: changes as u64,
            });
        }

        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();

        while let Some(row) = rows.next()? {
            let mut map = Row::new();
            for (i, name) in names.iter().enumerate() {
                map.insert(name.clone(), json_value(row.get_ref(i)?));
            }
            out.push(map);
        }

        Ok(QueryOutcome {
            rows: out,
            changes: 0,
        })
    }
}

impl QueryTransport for SqliteTransport {
    fn execute(&self, statements: &[Statement]) -> Result<Vec<QueryOutcome>> {
        self.limits.check(statements)?;
        debug!(statements = statements.len(), "executing local call");

        let mut outcomes = Vec::with_capacity(statements.len());
        for (index, statement) in statements.iter().enumerate() {
            match self.run(statement) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(index, sql = %statement.sql, "statement failed, call stopped");
                    return Err(e);
                }
            }
        }

        Ok(outcomes)
    }

    fn limits(&self) -> CallLimits {
        self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn transport() -> SqliteTransport {
        let t = SqliteTransport::in_memory(CallLimits::default()).unwrap();
        t.connection()
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT UNIQUE, score REAL);")
            .unwrap();
        t
    }

    #[test]
    fn test_rows_and_changes() {
        let t = transport();
        let outcomes = t
            .execute(&[
                Statement::new("INSERT INTO t (name, score) VALUES (?, ?)").bind("a").bind(1.5),
                Statement::new("INSERT INTO t (name, score) VALUES (?, ?)").bind("b").bind(SqlValue::Null),
                Statement::new("SELECT name, score FROM t ORDER BY name"),
            ])
            .unwrap();

        assert_eq!(outcomes[0].changes, 1);
        assert_eq!(outcomes[2].column_strings("name"), vec!["a", "b"]);
        assert_eq!(outcomes[2].rows[1].get("score"), Some(&serde_json::Value::Null));
    }

    #[test]
    fn test_failure_keeps_earlier_statements() {
        let t = transport();
        let result = t.execute(&[
            Statement::new("INSERT INTO t (name) VALUES (?)").bind("a"),
            Statement::new("INSERT INTO t (name) VALUES (?)").bind("a"),
            Statement::new("INSERT INTO t (name) VALUES (?)").bind("c"),
        ]);

        assert!(matches!(result, Err(Error::Database(_))));

        let count = t.query(Statement::new("SELECT COUNT(*) AS total FROM t")).unwrap();
        assert_eq!(count.first_i64("total"), 1);
    }

    #[test]
    fn test_call_over_ceiling_is_rejected_before_running() {
        let t = SqliteTransport::in_memory(CallLimits {
            max_statements: 1,
            ..Default::default()
        })
        .unwrap();

        let result = t.execute(&[Statement::new("SELECT 1"), Statement::new("SELECT 2")]);
        assert!(matches!(result, Err(Error::PayloadTooLarge(_))));
    }
}
