use arrow_schema::ArrowError;
use parquet::errors::ParquetError;

use crate::repository::interface::Error as RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    // Lookup errors
    #[error("Dataset {name:?} doesn't exist")]
    DatasetNotFound { name: String },

    #[error("Dataset {name:?} has no working copy")]
    CopyNotFound { name: String },

    #[error("Column {name:?} doesn't exist")]
    ColumnNotFound { name: String },

    #[error("Dataset {name:?} already exists")]
    AlreadyExists { name: String },

    // Save/revert/repair with nothing to act on
    #[error("No changes to {action} on dataset {name:?}")]
    NoChanges { name: String, action: &'static str },

    #[error("{reason}")]
    InvalidInput { reason: String },

    // The copy file and the copy metadata record disagree
    #[error(
        "Working copy of {name:?} is inconsistent: file present: {file_present}, \
        metadata present: {metadata_present}"
    )]
    Conflict {
        name: String,
        file_present: bool,
        metadata_present: bool,
    },

    // Infrastructure errors
    #[error(transparent)]
    ObjectStoreError(#[from] object_store::Error),

    #[error("Metadata store error: {0:?}")]
    RepositoryError(RepositoryError),

    #[error(transparent)]
    ArrowError(#[from] ArrowError),

    #[error(transparent)]
    ParquetError(#[from] ParquetError),

    #[error("Failed parsing JSON: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl From<RepositoryError> for DatasetError {
    fn from(err: RepositoryError) -> Self {
        DatasetError::RepositoryError(err)
    }
}

impl DatasetError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        DatasetError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Errors that can't be fixed by the caller resubmitting a corrected request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DatasetError::Conflict { .. }
                | DatasetError::ObjectStoreError(_)
                | DatasetError::RepositoryError(_)
                | DatasetError::ArrowError(_)
                | DatasetError::ParquetError(_)
                | DatasetError::SerdeJsonError(_)
        )
    }
}

pub type DatasetResult<T> = Result<T, DatasetError>;
