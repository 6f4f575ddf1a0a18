// ⚙️ Configuration - defaults, optional TOML file, environment
//
// Precedence (lowest first):
//   built-in defaults
//   legacy CLOUDFLARE_ACCOUNT_ID / D1_DATABASE_ID / CLOUDFLARE_API_TOKEN
//   contact-merge.toml (or --config PATH)
//   CONTACT_MERGE__* environment (e.g. CONTACT_MERGE__REMOTE__API_TOKEN)

use crate::document_store::DEFAULT_STORE_FILE;
use crate::error::{Error, Result};
use crate::remote::{CallLimits, HttpTransport, RemoteTransport, SqliteTransport};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "contact-merge";

const LEGACY_VARS: &[(&str, &str)] = &[
    ("CLOUDFLARE_ACCOUNT_ID", "remote.account_id"),
    ("D1_DATABASE_ID", "remote.database_id"),
    ("CLOUDFLARE_API_TOKEN", "remote.api_token"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Full base URL of the query endpoint; overrides account/database
    pub endpoint: Option<String>,
    pub account_id: Option<String>,
    pub database_id: Option<String>,
    pub api_token: Option<String>,

    /// Local SQLite file behind the same interface (no HTTP)
    pub sqlite_path: Option<PathBuf>,

    pub timeout_secs: u64,
    pub max_statements_per_call: usize,
    pub max_payload_bytes: usize,
    pub id_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store_path: PathBuf,

    /// JSON keyword lists for the priority scorer
    pub keywords_path: Option<PathBuf>,

    pub remote: RemoteConfig,
}

impl AppConfig {
    /// Load from `path`, or `contact-merge.toml` in the working directory if present
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |var| std::env::var(var).ok())
    }

    pub fn load_with<F>(path: Option<&Path>, legacy_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Config::builder()
            .set_default("store_path", DEFAULT_STORE_FILE)
            .and_then(|b| b.set_default("remote.timeout_secs", 30))
            .and_then(|b| b.set_default("remote.max_statements_per_call", 50))
            .and_then(|b| b.set_default("remote.max_payload_bytes", 100_000))
            .and_then(|b| b.set_default("remote.id_batch_size", 100))
            .map_err(config_error)?;

        for (var, key) in LEGACY_VARS {
            if let Some(value) = legacy_env(var).filter(|v| !v.trim().is_empty()) {
                builder = builder.set_default(*key, value).map_err(config_error)?;
            }
        }

        builder = match path {
            Some(p) => builder.add_source(File::from(p).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        builder
            .add_source(Environment::with_prefix("CONTACT_MERGE").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)
    }
}

fn config_error(e: config::ConfigError) -> Error {
    Error::Config(e.to_string())
}

impl RemoteConfig {
    pub fn limits(&self) -> CallLimits {
        CallLimits {
            max_statements: self.max_statements_per_call.max(1),
            max_payload_bytes: self.max_payload_bytes,
            id_batch_size: self.id_batch_size.max(1),
        }
    }

    /// Explicit endpoint, or the hosted database URL built from its ids
    pub fn base_url(&self) -> Result<String> {
        if let Some(endpoint) = self.endpoint.as_deref().filter(|e| !e.is_empty()) {
            return Ok(endpoint.to_string());
        }

        match (self.account_id.as_deref(), self.database_id.as_deref()) {
            (Some(account), Some(database)) if !account.is_empty() && !database.is_empty() => Ok(format!(
                "https://api.cloudflare.com/client/v4/accounts/{}/d1/database/{}",
                account, database
            )),
            _ => Err(Error::Config(
                "remote endpoint not configured: set remote.endpoint or remote.account_id + remote.database_id"
                    .to_string(),
            )),
        }
    }

    /// Build the transport this configuration describes
    pub fn connect(&self) -> Result<RemoteTransport> {
        if let Some(path) = &self.sqlite_path {
            return Ok(RemoteTransport::Sqlite(SqliteTransport::open(path, self.limits())?));
        }

        let base = self.base_url()?;
        let token = self
            .api_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Config("remote.api_token is not set".to_string()))?;

        Ok(RemoteTransport::Http(HttpTransport::new(
            &base,
            token,
            self.timeout_secs,
            self.limits(),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("contact-merge.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "");

        let config = AppConfig::load_with(Some(&path), no_env).unwrap();

        assert_eq!(config.store_path, PathBuf::from(DEFAULT_STORE_FILE));
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.remote.limits(), CallLimits::default());
        assert!(config.remote.base_url().is_err());
    }

    #[test]
    fn test_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
store_path = "data/master.json"

[remote]
endpoint = "http://127.0.0.1:8787"
api_token = "secret"
max_statements_per_call = 20
"#,
        );

        let config = AppConfig::load_with(Some(&path), no_env).unwrap();

        assert_eq!(config.store_path, PathBuf::from("data/master.json"));
        assert_eq!(config.remote.base_url().unwrap(), "http://127.0.0.1:8787");
        assert_eq!(config.remote.limits().max_statements, 20);
        assert!(matches!(config.remote.connect().unwrap(), RemoteTransport::Http(_)));
    }

    #[test]
    fn test_legacy_variables_build_hosted_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "");
        let env: HashMap<&str, &str> = [
            ("CLOUDFLARE_ACCOUNT_ID", "acct"),
            ("D1_DATABASE_ID", "db"),
            ("CLOUDFLARE_API_TOKEN", "tok"),
        ]
        .into_iter()
        .collect();

        let config = AppConfig::load_with(Some(&path), |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(
            config.remote.base_url().unwrap(),
            "https://api.cloudflare.com/client/v4/accounts/acct/d1/database/db"
        );
        assert_eq!(config.remote.api_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_file_overrides_legacy_variables() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[remote]\napi_token = \"from-file\"\n");

        let config = AppConfig::load_with(Some(&path), |k| {
            (k == "CLOUDFLARE_API_TOKEN").then(|| "from-env".to_string())
        })
        .unwrap();

        assert_eq!(config.remote.api_token.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_sqlite_path_selects_local_transport() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("remote.db");
        let path = write_config(&dir, &format!("[remote]\nsqlite_path = {:?}\n", db.display().to_string()));

        let config = AppConfig::load_with(Some(&path), no_env).unwrap();

        assert!(matches!(config.remote.connect().unwrap(), RemoteTransport::Sqlite(_)));
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[remote]\nendpoint = \"http://localhost\"\n");

        let config = AppConfig::load_with(Some(&path), no_env).unwrap();
        assert!(matches!(config.remote.connect(), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = AppConfig::load_with(Some(Path::new("/nonexistent/contact-merge.toml")), no_env);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
