// Contact Merge - Core Library
// Identity resolution, merge engine, priority scoring and both storage
// backends, shared by the merge CLI, the dedupe tool and the query server

pub mod error;
pub mod identity;
pub mod record;
pub mod contact;
pub mod priority;
pub mod merge;
pub mod document_store;
pub mod remote;
pub mod projection;
pub mod maintenance;
pub mod config;

// Re-export commonly used types
pub use error::{Error, Result};
pub use identity::{
    hash_key, normalize_phone, phone_digits, resolve,
    IdentityKey, Resolution, SkipReason,
};
pub use record::{batch_fingerprint, Batch, CanonicalRecord, RawRecord};
pub use contact::{AdditionalInfo, Contact, MasterStore, Source, StoreMetadata};
pub use priority::{
    priority_breakdown, KeywordLists, PriorityLevel, PriorityScore, PriorityScorer,
};
pub use merge::{verify_invariants, InvariantViolation, MergeEngine, MergeSummary};
pub use document_store::{apply_batch_file, DocumentStore, DEFAULT_STORE_FILE};
pub use remote::{
    CallLimits, HttpTransport, QueryTransport, RemoteStore, RemoteTransport,
    SqliteTransport, Statement,
};
pub use projection::{project_unique_phones, rebuild_unique_phones, UniquePhone};
pub use maintenance::{
    CleanReport, Confirm, DuplicateMaintenance, DuplicateReport, FixedAnswer,
    StatusReport, StdinConfirm,
};
pub use crate::config::{AppConfig, RemoteConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the tracing subscriber used by every binary (RUST_LOG, default info)
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // A second install (e.g. from tests) is not an error worth surfacing
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
