// Remote SQL store: wire types, transports, batching, schema, merge

pub mod batcher;
pub mod http;
pub mod schema;
pub mod sqlite;
pub mod statement;
pub mod store;
pub mod transport;

pub use batcher::{id_chunks, StatementBatcher};
pub use http::HttpTransport;
pub use sqlite::SqliteTransport;
pub use statement::{QueryEnvelope, QueryOutcome, QueryRequest, Row, SqlValue, Statement};
pub use store::{RemoteContact, RemoteSource, RemoteStore};
pub use transport::{CallLimits, QueryTransport, RemoteTransport};
