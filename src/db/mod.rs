mod client;
mod models;

pub use client::Database;
pub use models::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Unknown table: {0}")]
    UnknownTable(String),
    #[error("Invalid column: {0}")]
    InvalidColumn(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),
}

/// Relational metadata storage (allows mocking for tests)
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a row. The store assigns an `id` when the record has none.
    async fn insert(&self, table: &str, record: Record) -> Result<StoredRecord, MetadataStoreError>;

    /// Delete a row by primary key. Deleting a missing row is not an error.
    async fn delete(&self, table: &str, id: &str) -> Result<(), MetadataStoreError>;
}
