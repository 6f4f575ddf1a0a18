// 🌐 HttpTransport - hosted query endpoint over HTTPS
//
// POST {base}/query, bearer auth, D1-style envelope back.

use super::statement::{QueryEnvelope, QueryOutcome, QueryRequest, Statement};
use super::transport::{CallLimits, QueryTransport};
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::time::Duration;
use tracing::{debug, info};

pub struct HttpTransport {
    client: Client,
    query_url: String,
    api_token: String,
    limits: CallLimits,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_token: &str, timeout_secs: u64, limits: CallLimits) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Transport(format!("could not build HTTP client: {}", e)))?;

        Ok(HttpTransport {
            client,
            query_url: query_url(base_url),
            api_token: api_token.to_string(),
            limits,
        })
    }

    pub fn query_url(&self) -> &str {
        &self.query_url
    }
}

/// `{base}/query`, tolerating a trailing slash or an already-complete URL
pub fn query_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/query") {
        trimmed.to_string()
    } else {
        format!("{}/query", trimmed)
    }
}

impl QueryTransport for HttpTransport {
    fn execute(&self, statements: &[Statement]) -> Result<Vec<QueryOutcome>> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }
        self.limits.check(statements)?;

        debug!(statements = statements.len(), url = %self.query_url, "sending call");

        let response = self
            .client
            .post(&self.query_url)
            .bearer_auth(&self.api_token)
            .json(&QueryRequest::from_statements(statements))
            .send()
            .map_err(|e| Error::Transport(format!("endpoint unreachable: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| Error::Transport(format!("could not read response: {}", e)))?;

        if !status.is_success() {
            let snippet: String = body.chars().take(300).collect();
            return Err(Error::Transport(format!("HTTP {}: {}", status, snippet)));
        }

        let envelope: QueryEnvelope = serde_json::from_str(&body)
            .map_err(|e| Error::Transport(format!("unexpected response body: {}", e)))?;
        let outcomes = envelope.into_outcomes()?;

        if outcomes.len() != statements.len() {
            return Err(Error::Transport(format!(
                "sent {} statements, got {} results",
                statements.len(),
                outcomes.len()
            )));
        }

        info!(statements = statements.len(), "call committed");
        Ok(outcomes)
    }

    fn limits(&self) -> CallLimits {
        self.limits
    }
}
