//! Columnar dataset files kept in an object store, one Parquet object per dataset variant.

use std::sync::Arc;

use object_store::path::Path;
use object_store::ObjectStore;
use tracing::debug;

use crate::error::{DatasetError, DatasetResult};
use crate::frame::io::{decode_parquet, encode_parquet};
use crate::frame::Frame;

#[derive(Debug, Clone)]
pub struct DatasetStore {
    inner: Arc<dyn ObjectStore>,
}

impl DatasetStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    pub async fn exists(&self, path: &Path) -> DatasetResult<bool> {
        match self.inner.head(path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read(&self, path: &Path) -> DatasetResult<Frame> {
        let result = match self.inner.get(path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(DatasetError::DatasetNotFound {
                    name: path.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        decode_parquet(result.bytes().await?)
    }

    /// Overwrite the object with the frame's contents, returning the stored size in bytes
    pub async fn write(&self, path: &Path, frame: &Frame) -> DatasetResult<u64> {
        let data = encode_parquet(frame)?;
        let size = data.len() as u64;
        self.inner.put(path, data).await?;
        debug!(%path, size, rows = frame.num_rows(), "Wrote dataset file");
        Ok(size)
    }

    /// Returns whether there was an object to delete
    pub async fn delete(&self, path: &Path) -> DatasetResult<bool> {
        // Some stores treat deleting a missing object as success
        if !self.exists(path).await? {
            return Ok(false);
        }
        match self.inner.delete(path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Move an object, replacing whatever is at the destination
    pub async fn rename(&self, from: &Path, to: &Path) -> DatasetResult<()> {
        self.inner.rename(from, to).await?;
        debug!(%from, %to, "Renamed dataset file");
        Ok(())
    }
}
