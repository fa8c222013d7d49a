//! The metadata record kept next to every stored dataset variant, and the helpers that keep it
//! consistent with the data it describes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data_types::{DatasetKey, UserId, UserIdentity, Variant};
use crate::frame::{classify, type_name, ColumnClass, Frame};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DatasetMetadata {
    pub user_id: UserId,
    pub user_email: String,
    /// Sanitised logical name, shared by the original and its copy
    pub dataset_name: String,
    /// Store key of this variant, e.g. `iris_1` or `iris_1_copy`
    pub dataset_file_name: String,
    /// Extension of the file the dataset was uploaded as
    pub dataset_extension: String,
    pub is_copy: bool,
    pub is_copy_modified: bool,
    pub date_created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    /// Size in bytes of the stored columnar file
    pub dataset_size: u64,
    pub n_rows: usize,
    pub n_columns: usize,
    pub n_values: usize,
    pub column_list: Vec<String>,
    pub column_datatypes: BTreeMap<String, String>,
    pub numerical_column_list: Vec<String>,
    pub categorical_column_list: Vec<String>,
    pub column_deleted_status: BTreeMap<String, bool>,
}

impl DatasetMetadata {
    /// Record for a freshly uploaded original
    pub fn new_original(
        key: &DatasetKey,
        user: &UserIdentity,
        extension: &str,
        frame: &Frame,
        dataset_size: u64,
    ) -> Self {
        let now = Utc::now();
        let mut metadata = Self {
            user_id: user.id,
            user_email: user.email.clone(),
            dataset_name: key.name.clone(),
            dataset_file_name: key.original_key(),
            dataset_extension: extension.to_string(),
            is_copy: false,
            is_copy_modified: false,
            date_created: now,
            last_modified: now,
            dataset_size,
            n_rows: 0,
            n_columns: 0,
            n_values: 0,
            column_list: vec![],
            column_datatypes: BTreeMap::new(),
            numerical_column_list: vec![],
            categorical_column_list: vec![],
            column_deleted_status: BTreeMap::new(),
        };
        metadata.sync_shape_and_schema(frame);
        metadata
    }

    /// Clone an original's record for a new working copy. Deletion tracking starts over,
    /// keyed by the original's current columns.
    pub fn to_copy(&self, key: &DatasetKey) -> Self {
        Self {
            dataset_file_name: key.copy_key(),
            is_copy: true,
            is_copy_modified: false,
            column_deleted_status: self
                .column_list
                .iter()
                .map(|c| (c.clone(), false))
                .collect(),
            ..self.clone()
        }
    }

    /// Turn a copy's record into the record of the original it's being saved over
    pub fn into_original(self, key: &DatasetKey) -> Self {
        Self {
            dataset_file_name: key.original_key(),
            is_copy: false,
            is_copy_modified: false,
            column_deleted_status: BTreeMap::new(),
            ..self
        }
    }

    /// Point the record at a (possibly renamed) dataset key
    pub fn rekey(&mut self, key: &DatasetKey, variant: Variant) {
        self.dataset_name = key.name.clone();
        self.dataset_file_name = key.key(variant);
    }

    /// Recompute shape, schema and classification from the frame
    pub fn sync_shape_and_schema(&mut self, frame: &Frame) {
        let fields = frame.fields();

        self.n_rows = frame.num_rows();
        self.n_columns = frame.num_columns();
        self.n_values = frame.num_values();
        self.column_list = fields.iter().map(|(name, _)| name.clone()).collect();
        self.column_datatypes = fields
            .iter()
            .map(|(name, data_type)| (name.clone(), type_name(data_type)))
            .collect();

        self.numerical_column_list.clear();
        self.categorical_column_list.clear();
        for (name, data_type) in fields {
            match classify(&data_type) {
                ColumnClass::Numerical => self.numerical_column_list.push(name),
                ColumnClass::Categorical => self.categorical_column_list.push(name),
            }
        }
    }

    /// Remove a column from the schema fields, remembering the deletion if it's one of the
    /// original's columns
    pub fn mark_column_deleted(&mut self, column_name: &str) {
        if let Some(deleted) = self.column_deleted_status.get_mut(column_name) {
            *deleted = true;
        }
        self.column_list.retain(|c| c != column_name);
        self.numerical_column_list.retain(|c| c != column_name);
        self.categorical_column_list.retain(|c| c != column_name);
        self.column_datatypes.remove(column_name);
    }

    pub fn rename_column(&mut self, old_name: &str, new_name: &str) {
        for list in [
            &mut self.column_list,
            &mut self.numerical_column_list,
            &mut self.categorical_column_list,
        ] {
            for column in list.iter_mut().filter(|c| c.as_str() == old_name) {
                *column = new_name.to_string();
            }
        }
        if let Some(data_type) = self.column_datatypes.remove(old_name) {
            self.column_datatypes.insert(new_name.to_string(), data_type);
        }
    }

    pub fn class_of(&self, column_name: &str) -> Option<ColumnClass> {
        if self.numerical_column_list.iter().any(|c| c == column_name) {
            Some(ColumnClass::Numerical)
        } else if self.categorical_column_list.iter().any(|c| c == column_name) {
            Some(ColumnClass::Categorical)
        } else {
            None
        }
    }

    pub fn has_column(&self, column_name: &str) -> bool {
        self.column_list.iter().any(|c| c == column_name)
    }

    /// Describe how the record disagrees with the frame, if it does
    pub fn drift_from(&self, frame: &Frame) -> Option<String> {
        let columns = frame.column_names();
        if self.column_list != columns {
            return Some(format!(
                "columns {:?} recorded, {:?} stored",
                self.column_list, columns
            ));
        }
        if self.n_rows != frame.num_rows() || self.n_columns != frame.num_columns() {
            return Some(format!(
                "shape {}x{} recorded, {}x{} stored",
                self.n_rows,
                self.n_columns,
                frame.num_rows(),
                frame.num_columns()
            ));
        }
        let datatypes_match = frame.fields().iter().all(|(name, data_type)| {
            self.column_datatypes.get(name) == Some(&type_name(data_type))
        });
        if !datatypes_match {
            return Some("column types differ".to_string());
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeSet;

    use crate::data_types::{DatasetKey, UserIdentity};
    use crate::frame::io::read_csv;
    use crate::frame::Frame;

    use super::DatasetMetadata;

    const CSV: &str = "sepal_length,species,flag\n5.1,setosa,true\n4.9,setosa,false\n";

    /// Both classification lists partition `column_list`
    pub fn assert_partitioned(metadata: &DatasetMetadata) {
        let numerical: BTreeSet<_> = metadata.numerical_column_list.iter().collect();
        let categorical: BTreeSet<_> = metadata.categorical_column_list.iter().collect();
        let all: BTreeSet<_> = metadata.column_list.iter().collect();
        assert!(numerical.is_disjoint(&categorical));
        assert_eq!(
            numerical.union(&categorical).cloned().collect::<BTreeSet<_>>(),
            all
        );
    }

    fn frame() -> Frame {
        read_csv(CSV.as_bytes()).unwrap()
    }

    fn original() -> DatasetMetadata {
        DatasetMetadata::new_original(
            &DatasetKey::new(1, "iris").unwrap(),
            &UserIdentity::new(1, "ada@example.com"),
            "csv",
            &frame(),
            100,
        )
    }

    #[test]
    fn test_new_original_classifies_columns() {
        let metadata = original();
        assert_eq!(metadata.dataset_file_name, "iris_1");
        assert_eq!(metadata.n_values, 6);
        assert_eq!(metadata.numerical_column_list, vec!["sepal_length"]);
        assert_eq!(metadata.categorical_column_list, vec!["species", "flag"]);
        assert_eq!(metadata.column_datatypes["sepal_length"], "Float64");
        assert!(metadata.column_deleted_status.is_empty());
        assert_partitioned(&metadata);
    }

    #[test]
    fn test_copy_seeds_deleted_status() {
        let copy = original().to_copy(&DatasetKey::new(1, "iris").unwrap());
        assert!(copy.is_copy);
        assert_eq!(copy.dataset_file_name, "iris_1_copy");
        assert_eq!(copy.column_deleted_status.len(), 3);
        assert!(copy.column_deleted_status.values().all(|deleted| !deleted));
    }

    #[test]
    fn test_mark_column_deleted_keeps_history() {
        let mut copy = original().to_copy(&DatasetKey::new(1, "iris").unwrap());
        copy.mark_column_deleted("species");
        assert_eq!(copy.column_deleted_status.get("species"), Some(&true));
        assert!(!copy.has_column("species"));
        assert!(!copy.categorical_column_list.contains(&"species".to_string()));
        assert!(!copy.column_datatypes.contains_key("species"));

        // Columns that never existed in the original aren't tracked
        copy.mark_column_deleted("sp_0");
        assert!(!copy.column_deleted_status.contains_key("sp_0"));
        assert_partitioned(&copy);
    }

    #[test]
    fn test_rename_column_preserves_position() {
        let mut metadata = original();
        metadata.rename_column("sepal_length", "sl");
        assert_eq!(metadata.column_list, vec!["sl", "species", "flag"]);
        assert_eq!(metadata.numerical_column_list, vec!["sl"]);
        assert_eq!(metadata.column_datatypes["sl"], "Float64");
        assert!(!metadata.column_datatypes.contains_key("sepal_length"));
    }

    #[test]
    fn test_drift_detection() {
        let mut metadata = original();
        assert!(metadata.drift_from(&frame()).is_none());

        let smaller = frame().slice(0, 1);
        assert!(metadata.drift_from(&smaller).is_some());
        metadata.sync_shape_and_schema(&smaller);
        assert!(metadata.drift_from(&smaller).is_none());
        assert_eq!(metadata.n_rows, 1);
    }

    #[test]
    fn test_into_original_resets_copy_fields() {
        let key = DatasetKey::new(1, "iris").unwrap();
        let mut copy = original().to_copy(&key);
        copy.is_copy_modified = true;
        copy.mark_column_deleted("flag");

        let saved = copy.clone().into_original(&key);
        assert!(!saved.is_copy && !saved.is_copy_modified);
        assert!(saved.column_deleted_status.is_empty());
        assert_eq!(saved.dataset_file_name, "iris_1");
        assert_eq!(saved.column_list, copy.column_list);
    }
}
