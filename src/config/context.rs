use std::sync::Arc;

use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use sqlx::sqlite::SqliteJournalMode;
use tracing::info;

use crate::context::DatasweepContext;
use crate::error::DatasetResult;
use crate::repository::interface::MetadataRepository;
use crate::repository::sqlite::SqliteMetadataRepository;
use crate::store::DatasetStore;

use super::schema;

fn build_object_store(config: &schema::ObjectStore) -> DatasetResult<Arc<dyn ObjectStore>> {
    Ok(match config {
        schema::ObjectStore::Local(schema::Local { data_dir }) => {
            std::fs::create_dir_all(data_dir).map_err(|e| object_store::Error::Generic {
                store: "LocalFileSystem",
                source: Box::new(e),
            })?;
            Arc::new(LocalFileSystem::new_with_prefix(data_dir)?)
        }
        schema::ObjectStore::InMemory(_) => Arc::new(InMemory::new()),
    })
}

async fn build_metadata_repository(
    config: &schema::Catalog,
) -> DatasetResult<Arc<dyn MetadataRepository>> {
    let repository: Arc<dyn MetadataRepository> = match config {
        schema::Catalog::Sqlite(schema::Sqlite { dsn }) => Arc::new(
            SqliteMetadataRepository::try_new(dsn.to_string(), SqliteJournalMode::Wal).await?,
        ),
    };
    Ok(repository)
}

pub async fn build_context(cfg: &schema::DatasweepConfig) -> DatasetResult<DatasweepContext> {
    let object_store = build_object_store(&cfg.object_store)?;
    let metadata = build_metadata_repository(&cfg.catalog).await?;

    info!(
        object_store = %object_store,
        max_datasets_per_user = cfg.misc.max_datasets_per_user,
        "Built context"
    );

    Ok(DatasweepContext::new(
        DatasetStore::new(object_store),
        metadata,
        cfg.misc.max_datasets_per_user,
    ))
}
