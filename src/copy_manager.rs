//! Lifecycle of a dataset's working copy.
//!
//! A copy is a pair: a columnar file at `{name}_{user}_copy` and a metadata record under the
//! same key. Everything that creates, reads, commits or discards a copy goes through
//! [`CopyManager`], which treats the two halves as one unit and reports any disagreement
//! between them as [`DatasetError::Conflict`].
//!
//! None of these methods take the dataset lock; callers hold it for the whole operation.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::data_types::{DatasetKey, Variant};
use crate::error::{DatasetError, DatasetResult};
use crate::frame::Frame;
use crate::metadata::DatasetMetadata;
use crate::repository::interface::MetadataRepository;
use crate::store::DatasetStore;

/// A copy's metadata record checked out for mutation. Changes only reach the metadata
/// store through [`CopyManager::save_metadata`].
#[derive(Debug, Clone)]
pub struct MetadataHandle {
    key: DatasetKey,
    pub record: DatasetMetadata,
}

impl MetadataHandle {
    pub fn key(&self) -> &DatasetKey {
        &self.key
    }
}

/// The variant a read should observe: the copy when there is one, otherwise the original
#[derive(Debug, Clone)]
pub struct ActiveDataset {
    pub variant: Variant,
    pub frame: Frame,
    pub metadata: DatasetMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    RemovedOrphanFile,
    RemovedOrphanMetadata,
}

#[derive(Debug, Clone)]
pub struct CopyManager {
    datasets: DatasetStore,
    metadata: Arc<dyn MetadataRepository>,
}

impl CopyManager {
    pub fn new(datasets: DatasetStore, metadata: Arc<dyn MetadataRepository>) -> Self {
        Self { datasets, metadata }
    }

    pub fn datasets(&self) -> &DatasetStore {
        &self.datasets
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataRepository> {
        &self.metadata
    }

    async fn copy_presence(&self, key: &DatasetKey) -> DatasetResult<(bool, bool)> {
        let file_present = self.datasets.exists(&key.path(Variant::Copy)).await?;
        let metadata_present = self.metadata.get(&key.copy_key()).await?.is_some();
        Ok((file_present, metadata_present))
    }

    /// Whether a working copy exists. Its file and its record must agree.
    pub async fn copy_exists(&self, key: &DatasetKey) -> DatasetResult<bool> {
        match self.copy_presence(key).await? {
            (true, true) => Ok(true),
            (false, false) => Ok(false),
            (file_present, metadata_present) => {
                error!(
                    dataset = %key,
                    file_present, metadata_present, "Working copy is out of sync"
                );
                Err(DatasetError::Conflict {
                    name: key.copy_key(),
                    file_present,
                    metadata_present,
                })
            }
        }
    }

    pub async fn original_metadata(&self, key: &DatasetKey) -> DatasetResult<DatasetMetadata> {
        self.metadata
            .get(&key.original_key())
            .await?
            .ok_or_else(|| DatasetError::DatasetNotFound {
                name: key.original_key(),
            })
    }

    /// Record a mutation should validate against: the copy's if there is one
    pub async fn current_metadata(&self, key: &DatasetKey) -> DatasetResult<DatasetMetadata> {
        if self.copy_exists(key).await? {
            self.metadata
                .get(&key.copy_key())
                .await?
                .ok_or_else(|| DatasetError::CopyNotFound {
                    name: key.copy_key(),
                })
        } else {
            self.original_metadata(key).await
        }
    }

    /// Create the working copy from the original unless it's already there. Returns whether
    /// a copy was created.
    pub async fn ensure_copy(&self, key: &DatasetKey) -> DatasetResult<bool> {
        if self.copy_exists(key).await? {
            return Ok(false);
        }

        let original = self.original_metadata(key).await?;
        let frame = self.datasets.read(&key.path(Variant::Original)).await?;

        // File first: a crash in between leaves an orphan file, which `copy_exists`
        // reports and `repair_copy` discards
        let mut record = original.to_copy(key);
        record.dataset_size = self.datasets.write(&key.path(Variant::Copy), &frame).await?;
        self.metadata.put(&key.copy_key(), &record).await?;

        info!(dataset = %key, rows = record.n_rows, "Created working copy");
        Ok(true)
    }

    /// Load the copy for mutation. A record that disagrees with the stored file (left behind
    /// by a crash between persisting and saving metadata) is resynchronised from the file.
    pub async fn load_copy(&self, key: &DatasetKey) -> DatasetResult<(Frame, MetadataHandle)> {
        let copy_not_found = || DatasetError::CopyNotFound {
            name: key.copy_key(),
        };

        let record = self
            .metadata
            .get(&key.copy_key())
            .await?
            .ok_or_else(copy_not_found)?;
        let frame = match self.datasets.read(&key.path(Variant::Copy)).await {
            Err(DatasetError::DatasetNotFound { .. }) => return Err(copy_not_found()),
            result => result?,
        };

        let mut handle = MetadataHandle {
            key: key.clone(),
            record,
        };
        if let Some(drift) = handle.record.drift_from(&frame) {
            warn!(dataset = %key, drift = %drift, "Copy metadata is stale, resynchronising");
            handle.record.sync_shape_and_schema(&frame);
        }
        Ok((frame, handle))
    }

    /// Overwrite the copy's file. Metadata is untouched: save the handle separately.
    pub async fn persist_copy(&self, frame: &Frame, key: &DatasetKey) -> DatasetResult<u64> {
        self.datasets.write(&key.path(Variant::Copy), frame).await
    }

    /// Write a checked-out copy record back, flagging the copy as modified
    pub async fn save_metadata(&self, handle: MetadataHandle) -> DatasetResult<DatasetMetadata> {
        let MetadataHandle { key, mut record } = handle;
        record.is_copy_modified = true;
        record.last_modified = Utc::now();
        self.metadata.put(&key.copy_key(), &record).await?;
        Ok(record)
    }

    /// Commit the copy over the original.
    ///
    /// The steps are ordered so that a crash between any two leaves a state that is either
    /// completed by saving again (copy still whole) or flagged as a conflict and resolved by
    /// `repair_copy` (only the copy's record left, with the original already replaced).
    pub async fn save_copy_as_original(
        &self,
        key: &DatasetKey,
    ) -> DatasetResult<DatasetMetadata> {
        if !self.copy_exists(key).await? {
            return Err(DatasetError::NoChanges {
                name: key.original_key(),
                action: "save",
            });
        }

        let copy = self
            .metadata
            .get(&key.copy_key())
            .await?
            .ok_or_else(|| DatasetError::CopyNotFound {
                name: key.copy_key(),
            })?;
        let original = copy.into_original(key);

        self.metadata.put(&key.original_key(), &original).await?;
        self.datasets
            .rename(&key.path(Variant::Copy), &key.path(Variant::Original))
            .await?;
        self.metadata.delete(&key.copy_key()).await?;

        info!(
            dataset = %key,
            rows = original.n_rows,
            columns = original.n_columns,
            "Saved working copy over the original"
        );
        Ok(original)
    }

    /// Discard the copy, leaving the original as the active dataset
    pub async fn revert_copy(&self, key: &DatasetKey) -> DatasetResult<()> {
        if !self.copy_exists(key).await? {
            return Err(DatasetError::NoChanges {
                name: key.original_key(),
                action: "revert",
            });
        }

        self.datasets.delete(&key.path(Variant::Copy)).await?;
        self.metadata.delete(&key.copy_key()).await?;

        info!(dataset = %key, "Reverted working copy");
        Ok(())
    }

    /// Resolve a conflicted copy by discarding whichever half is orphaned
    pub async fn repair_copy(&self, key: &DatasetKey) -> DatasetResult<RepairOutcome> {
        let outcome = match self.copy_presence(key).await? {
            (true, false) => {
                self.datasets.delete(&key.path(Variant::Copy)).await?;
                RepairOutcome::RemovedOrphanFile
            }
            (false, true) => {
                self.metadata.delete(&key.copy_key()).await?;
                RepairOutcome::RemovedOrphanMetadata
            }
            _ => {
                return Err(DatasetError::NoChanges {
                    name: key.original_key(),
                    action: "repair",
                })
            }
        };

        warn!(dataset = %key, ?outcome, "Repaired working copy");
        Ok(outcome)
    }

    /// The record a read should observe, following the same routing as [`Self::load_active`]
    pub async fn active_metadata(
        &self,
        key: &DatasetKey,
    ) -> DatasetResult<(Variant, DatasetMetadata)> {
        if let Some(record) = self.metadata.get(&key.copy_key()).await? {
            if self.datasets.exists(&key.path(Variant::Copy)).await? {
                return Ok((Variant::Copy, record));
            }
        }
        Ok((Variant::Original, self.original_metadata(key).await?))
    }

    /// Load whatever a read should observe. Only a complete copy is used: a half-present one
    /// is either mid-write by another request or an orphan, and in both cases the original
    /// holds the committed state.
    pub async fn load_active(&self, key: &DatasetKey) -> DatasetResult<ActiveDataset> {
        let copy_record = self.metadata.get(&key.copy_key()).await?;
        let copy_file_present = self.datasets.exists(&key.path(Variant::Copy)).await?;

        match copy_record {
            Some(metadata) if copy_file_present => {
                match self.datasets.read(&key.path(Variant::Copy)).await {
                    Ok(frame) => {
                        return Ok(ActiveDataset {
                            variant: Variant::Copy,
                            frame,
                            metadata,
                        })
                    }
                    // Reverted or saved since we looked
                    Err(DatasetError::DatasetNotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            Some(_) => {
                warn!(dataset = %key, "Copy record without a file, reading the original")
            }
            None if copy_file_present => {
                warn!(dataset = %key, "Copy file without a record, reading the original")
            }
            None => {}
        }

        let metadata = self.original_metadata(key).await?;
        let frame = self.datasets.read(&key.path(Variant::Original)).await?;
        Ok(ActiveDataset {
            variant: Variant::Original,
            frame,
            metadata,
        })
    }
}
