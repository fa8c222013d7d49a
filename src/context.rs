use std::sync::Arc;

use crate::copy_manager::CopyManager;
use crate::locks::DatasetLocks;
use crate::repository::interface::MetadataRepository;
use crate::store::DatasetStore;

/// Everything a request handler needs, threaded explicitly through every operation
#[derive(Debug)]
pub struct DatasweepContext {
    pub copies: CopyManager,
    pub locks: DatasetLocks,
    pub max_datasets_per_user: usize,
}

impl DatasweepContext {
    pub fn new(
        datasets: DatasetStore,
        metadata: Arc<dyn MetadataRepository>,
        max_datasets_per_user: usize,
    ) -> Self {
        Self {
            copies: CopyManager::new(datasets, metadata),
            locks: DatasetLocks::new(),
            max_datasets_per_user,
        }
    }

    pub fn datasets(&self) -> &DatasetStore {
        self.copies.datasets()
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataRepository> {
        self.copies.metadata()
    }
}

#[cfg(test)]
pub mod test_utils {
    use std::sync::Arc;

    use object_store::memory::InMemory;
    use sqlx::sqlite::SqliteJournalMode;

    use crate::data_types::UserIdentity;
    use crate::datasets::upload_dataset;
    use crate::metadata::DatasetMetadata;
    use crate::repository::sqlite::SqliteMetadataRepository;
    use crate::store::DatasetStore;

    use super::DatasweepContext;

    pub fn test_user() -> UserIdentity {
        UserIdentity::new(1, "ada@example.com")
    }

    pub async fn in_memory_context() -> DatasweepContext {
        let metadata = SqliteMetadataRepository::try_new(
            "sqlite://:memory:".to_string(),
            SqliteJournalMode::Wal,
        )
        .await
        .unwrap();

        DatasweepContext::new(
            DatasetStore::new(Arc::new(InMemory::new())),
            Arc::new(metadata),
            10,
        )
    }

    /// Upload a CSV string as the test user
    pub async fn upload_csv(
        context: &DatasweepContext,
        file_name: &str,
        csv: &str,
    ) -> DatasetMetadata {
        upload_dataset(context, &test_user(), file_name, csv.as_bytes())
            .await
            .unwrap()
    }
}
