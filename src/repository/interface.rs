use std::fmt::Debug;

use async_trait::async_trait;

use crate::data_types::UserId;
use crate::metadata::DatasetMetadata;

/// Wrapper for conversion of database-specific error codes into actual errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unique constraint violation: {0}")]
    UniqueConstraintViolation(sqlx::Error),

    #[error("Error running migrations: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("Metadata record {key:?} can't be decoded: {source}")]
    CorruptRecord {
        key: String,
        source: serde_json::Error,
    },

    #[error("Metadata record can't be encoded: {0}")]
    EncodeError(serde_json::Error),

    // All other errors
    #[error(transparent)]
    SqlxError(sqlx::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Document store of metadata records, keyed identically to the dataset store
#[async_trait]
pub trait MetadataRepository: Send + Sync + Debug {
    async fn setup(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<DatasetMetadata>>;

    /// Insert or overwrite the record under `key`
    async fn put(&self, key: &str, record: &DatasetMetadata) -> Result<()>;

    /// Returns whether there was a record to delete
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically move a record to a new key. Fails if the new key is taken.
    async fn rename(
        &self,
        old_key: &str,
        new_key: &str,
        record: &DatasetMetadata,
    ) -> Result<()>;

    /// Every record (originals and copies) belonging to a user, ordered by key
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<DatasetMetadata>>;
}
