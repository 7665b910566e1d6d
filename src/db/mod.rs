//! Database access: the `Session` seam, the PostgreSQL implementation,
//! connection management and catalog lookups.
//!
//! Everything above this module talks to a `Session` trait object rather
//! than to `tokio_postgres` directly, so the executor and orchestrator can
//! be driven by an in-memory session in tests.

pub mod catalog;
pub mod connection;
pub mod postgres;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;

use crate::errors::DbError;

/// One result row, every column rendered as text (`None` for SQL NULL).
pub type Row = Vec<Option<String>>;

/// A live database session.
///
/// Implementations execute exactly the SQL they are given; transaction
/// control is explicit through `begin`/`commit`/`rollback`.
#[async_trait]
pub trait Session: Send {
    /// Whether the underlying connection is known to be dead.
    fn is_closed(&self) -> bool;

    /// Execute a statement, returning the affected row count when the server
    /// reports one.
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError>;

    /// Execute a read-only statement and collect its rows.
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError>;

    async fn begin(&mut self) -> Result<(), DbError> {
        self.execute("BEGIN").await.map(|_| ())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.execute("COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.execute("ROLLBACK").await.map(|_| ())
    }
}

/// Opens new sessions. Retries and session setup live in
/// `connection::ConnectionManager`.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    async fn connect(&self) -> Result<Self::Session, DbError>;

    /// Human-readable target for logs.
    fn describe(&self) -> String;
}

pub use catalog::{MatviewInfo, list_materialized_views, view_exists};
pub use connection::ConnectionManager;
pub use postgres::{PgConnector, PgSession};
