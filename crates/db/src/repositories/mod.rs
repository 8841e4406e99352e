use chrono::{DateTime, Utc};
use thiserror::Error;

use signoff_core::approvals::ports::StoreError;

pub mod approval;
pub mod document_status;
pub mod flow;
pub mod memory;
pub mod user;

pub use approval::SqlInstanceRepository;
pub use document_status::{DocumentStatusRow, SqlDocumentStatusLedger};
pub use flow::SqlFlowStore;
pub use memory::{InMemoryFlowStore, InMemoryInstanceRepository, InMemoryUserDirectory};
pub use user::SqlUserDirectory;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(source) => StoreError::Backend(source.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if db_error.is_unique_violation())
}
