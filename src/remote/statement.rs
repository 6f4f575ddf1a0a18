// 🧾 Parameterized statements + the query endpoint's wire envelope
//
// Request body:  {sql, params} or [{sql, params}, ...]
// Response body: {success, errors: [{code, message}],
//                 result: [{results: [row], success, meta: {changes}}]}

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

pub type Row = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// SQL VALUES & STATEMENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        SqlValue::Text(value.clone())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<u64> for SqlValue {
    fn from(value: u64) -> Self {
        SqlValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for SqlValue {
    fn from(value: usize) -> Self {
        SqlValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

/// One SQL statement with positional `?` parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: &str) -> Self {
        Statement {
            sql: sql.to_string(),
            params: Vec::new(),
        }
    }

    /// Append one positional parameter
    pub fn bind<V: Into<SqlValue>>(mut self, value: V) -> Self {
        self.params.push(value.into());
        self
    }

    /// `{prefix} (?, ?, ...)` with one parameter per id
    pub fn with_id_list(prefix: &str, ids: &[String]) -> Self {
        let placeholders = vec!["?"; ids.len()].join(", ");
        Statement {
            sql: format!("{} ({})", prefix, placeholders),
            params: ids.iter().map(SqlValue::from).collect(),
        }
    }

    /// Serialized size on the wire
    pub fn approx_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(self.sql.len())
    }
}

// ============================================================================
// REQUEST BODY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryRequest {
    Single(Statement),
    Batch(Vec<Statement>),
}

impl QueryRequest {
    pub fn from_statements(statements: &[Statement]) -> Self {
        match statements {
            [single] => QueryRequest::Single(single.clone()),
            many => QueryRequest::Batch(many.to_vec()),
        }
    }

    pub fn into_statements(self) -> Vec<Statement> {
        match self {
            QueryRequest::Single(statement) => vec![statement],
            QueryRequest::Batch(statements) => statements,
        }
    }
}

// ============================================================================
// QUERY OUTCOME
// ============================================================================

/// Result of one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    pub rows: Vec<Row>,
    pub changes: u64,
}

impl QueryOutcome {
    /// Integer column of the first row (0 when absent or NULL)
    pub fn first_i64(&self, column: &str) -> i64 {
        self.rows.first().map(|row| row_i64(row, column)).unwrap_or(0)
    }

    /// String column of every row
    pub fn column_strings(&self, column: &str) -> Vec<String> {
        self.rows.iter().map(|row| row_str(row, column)).collect()
    }
}

pub fn row_str(row: &Row, column: &str) -> String {
    match row.get(column) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

pub fn row_i64(row: &Row, column: &str) -> i64 {
    match row.get(column) {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

// ============================================================================
// RESPONSE ENVELOPE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMeta {
    #[serde(default)]
    pub changes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResultItem {
    #[serde(default)]
    pub results: Vec<Row>,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub meta: QueryMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEnvelope {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
    #[serde(default)]
    pub result: Vec<QueryResultItem>,
}

fn default_true() -> bool {
    true
}

impl QueryEnvelope {
    pub fn from_outcomes(outcomes: Vec<QueryOutcome>) -> Self {
        QueryEnvelope {
            success: true,
            errors: Vec::new(),
            result: outcomes
                .into_iter()
                .map(|o| QueryResultItem {
                    results: o.rows,
                    success: true,
                    meta: QueryMeta { changes: o.changes },
                })
                .collect(),
        }
    }

    pub fn from_error(code: i64, message: &str) -> Self {
        QueryEnvelope {
            success: false,
            errors: vec![ApiMessage {
                code,
                message: message.to_string(),
            }],
            result: Vec::new(),
        }
    }

    /// Unwrap a response; any failure flag becomes a Transport error
    pub fn into_outcomes(self) -> Result<Vec<QueryOutcome>> {
        if !self.success || self.result.iter().any(|item| !item.success) {
            let messages: Vec<String> = self
                .errors
                .iter()
                .map(|e| format!("[{}] {}", e.code, e.message))
                .collect();
            let detail = if messages.is_empty() {
                "endpoint reported failure".to_string()
            } else {
                messages.join("; ")
            };
            return Err(Error::Transport(detail));
        }

        Ok(self
            .result
            .into_iter()
            .map(|item| QueryOutcome {
                rows: item.results,
                changes: item.meta.changes,
            })
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_list_is_parameterized() {
        let ids = vec!["a'; DROP TABLE contacts; --".to_string(), "b".to_string()];
        let stmt = Statement::with_id_list("DELETE FROM contacts WHERE id IN", &ids);

        assert_eq!(stmt.sql, "DELETE FROM contacts WHERE id IN (?, ?)");
        assert_eq!(stmt.params.len(), 2);
        assert!(!stmt.sql.contains("DROP"));
    }

    #[test]
    fn test_request_shapes() {
        let one = QueryRequest::from_statements(&[Statement::new("SELECT 1")]);
        assert_eq!(serde_json::to_string(&one).unwrap(), r#"{"sql":"SELECT 1"}"#);

        let two = QueryRequest::from_statements(&[
            Statement::new("SELECT ?").bind(1i64),
            Statement::new("SELECT ?").bind("x"),
        ]);
        assert_eq!(
            serde_json::to_string(&two).unwrap(),
            r#"[{"sql":"SELECT ?","params":[1]},{"sql":"SELECT ?","params":["x"]}]"#
        );

        let parsed: QueryRequest = serde_json::from_str(r#"{"sql":"SELECT 1","params":[null, 2.5]}"#).unwrap();
        let statements = parsed.into_statements();
        assert_eq!(statements[0].params, vec![SqlValue::Null, SqlValue::Real(2.5)]);
    }

    #[test]
    fn test_envelope_success() {
        let json = r#"{
            "success": true,
            "errors": [],
            "result": [{"results": [{"total": 42}], "success": true, "meta": {"changes": 0, "duration": 0.3}}]
        }"#;
        let envelope: QueryEnvelope = serde_json::from_str(json).unwrap();
        let outcomes = envelope.into_outcomes().unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].first_i64("total"), 42);
    }

    #[test]
    fn test_envelope_failure_is_transport_error() {
        let json = r#"{"success": false, "errors": [{"code": 7500, "message": "no such table: contacts"}], "result": []}"#;
        let envelope: QueryEnvelope = serde_json::from_str(json).unwrap();

        match envelope.into_outcomes() {
            Err(Error::Transport(msg)) => assert!(msg.contains("no such table")),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_row_helpers() {
        let mut row = Row::new();
        row.insert("id".to_string(), serde_json::json!("abc"));
        row.insert("n".to_string(), serde_json::json!("12"));
        row.insert("missing".to_string(), serde_json::Value::Null);

        assert_eq!(row_str(&row, "id"), "abc");
        assert_eq!(row_i64(&row, "n"), 12);
        assert_eq!(row_str(&row, "missing"), "");
        assert_eq!(row_i64(&row, "absent"), 0);
    }
}
