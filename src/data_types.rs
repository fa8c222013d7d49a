use std::fmt;

use lazy_static::lazy_static;
use object_store::path::Path;
use regex::Regex;
use serde::Serialize;

use crate::error::{DatasetError, DatasetResult};

pub type UserId = i64;

pub const COPY_SUFFIX: &str = "_copy";
pub const DATASET_FILE_EXTENSION: &str = "parquet";

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_\-]").unwrap();
}

/// An already-authenticated caller. Nothing in the core verifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserIdentity {
    pub id: UserId,
    pub email: String,
}

impl UserIdentity {
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
        }
    }
}

/// Strip any extension and replace characters that can't appear in a key.
pub fn sanitize_dataset_name(name: &str) -> DatasetResult<String> {
    let stem = name.trim().split('.').next().unwrap_or_default();
    let sanitized = INVALID_NAME_CHARS.replace_all(stem, "_").to_string();

    if sanitized.is_empty() {
        return Err(DatasetError::invalid(format!(
            "Invalid dataset name {name:?}"
        )));
    }
    Ok(sanitized)
}

/// Identity of a dataset: `(user_id, sanitized logical name)`. Derives the keys both
/// stores use for the original and its working copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetKey {
    pub user_id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Original,
    Copy,
}

impl DatasetKey {
    pub fn new(user_id: UserId, logical_name: &str) -> DatasetResult<Self> {
        Ok(Self {
            user_id,
            name: sanitize_dataset_name(logical_name)?,
        })
    }

    pub fn original_key(&self) -> String {
        format!("{}_{}", self.name, self.user_id)
    }

    pub fn copy_key(&self) -> String {
        format!("{}_{}{}", self.name, self.user_id, COPY_SUFFIX)
    }

    pub fn key(&self, variant: Variant) -> String {
        match variant {
            Variant::Original => self.original_key(),
            Variant::Copy => self.copy_key(),
        }
    }

    /// Location of a variant's columnar file inside the object store
    pub fn path(&self, variant: Variant) -> Path {
        Path::from(format!(
            "{}/{}.{DATASET_FILE_EXTENSION}",
            user_prefix(self.user_id),
            self.key(variant)
        ))
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original_key())
    }
}

pub fn user_prefix(user_id: UserId) -> String {
    format!("user_{user_id}")
}
