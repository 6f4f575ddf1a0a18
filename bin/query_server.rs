// query-server: local query endpoint over a SQLite file
//
// POST /query   {sql, params} | [{sql, params}, ...]  → query envelope
// GET  /health

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use clap::Parser;
use contact_merge::remote::{QueryEnvelope, QueryRequest, QueryTransport, SqliteTransport};
use contact_merge::{init_tracing, AppConfig, RemoteStore};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve a SQLite file through the remote query interface", long_about = None)]
struct Args {
    /// SQLite database file (default: remote.sqlite_path from config)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: String,

    /// Bearer token clients must present (default: remote.api_token)
    #[arg(long)]
    token: Option<String>,

    /// Config file
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<SqliteTransport>>,
    token: Option<String>,
}

/// GET /health
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "success": true, "status": "OK" }))
}

/// POST /query
async fn run_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> impl IntoResponse {
    if let Some(expected) = &state.token {
        let presented = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(QueryEnvelope::from_error(10000, "Authentication error")),
            );
        }
    }

    let statements = request.into_statements();
    let db = match state.db.lock() {
        Ok(db) => db,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(QueryEnvelope::from_error(7500, "database lock poisoned")),
            )
        }
    };

    match db.execute(&statements) {
        Ok(outcomes) => (StatusCode::OK, Json(QueryEnvelope::from_outcomes(outcomes))),
        Err(e) => {
            error!("query failed: {}", e);
            (
                StatusCode::BAD_REQUEST,
                Json(QueryEnvelope::from_error(7500, &e.to_string())),
            )
        }
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/query", post(run_query))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref())?;

    let db_path = args
        .db
        .or_else(|| config.remote.sqlite_path.clone())
        .ok_or_else(|| anyhow::anyhow!("no database: pass --db or set remote.sqlite_path"))?;

    // Schema is created up front so clients can start merging immediately
    let transport = SqliteTransport::open(&db_path, config.remote.limits())?;
    let store = RemoteStore::new(transport);
    store.ensure_schema()?;

    let state = AppState {
        db: Arc::new(Mutex::new(store.into_transport())),
        token: args.token.or_else(|| config.remote.api_token.clone()),
    };

    let app = app(state);

    info!("🚀 query server on http://{} ({})", args.listen, db_path.display());

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
