//! Data-tree diffs: before/after images plus the changes between them.

use fwd_types::SchemaPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Flat image of a data tree: keyed node path to node value.
pub type DataImage = BTreeMap<SchemaPath, Value>;

/// Kind of a single node change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    /// Derives the change kind from the presence of the two images.
    pub fn from_images(before: Option<&Value>, after: Option<&Value>) -> Option<Self> {
        match (before, after) {
            (None, Some(_)) => Some(ChangeKind::Create),
            (Some(_), Some(_)) => Some(ChangeKind::Update),
            (Some(_), None) => Some(ChangeKind::Delete),
            (None, None) => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Create => f.write_str("create"),
            ChangeKind::Update => f.write_str("update"),
            ChangeKind::Delete => f.write_str("delete"),
        }
    }
}

/// One node change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChange {
    pub path: SchemaPath,
    pub kind: ChangeKind,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// The input of one write transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTreeDiff {
    before: DataImage,
    after: DataImage,
    changes: Vec<DataChange>,
}

impl DataTreeDiff {
    /// Creates a diff from explicit images and changes.
    pub fn new(before: DataImage, after: DataImage, changes: Vec<DataChange>) -> Self {
        Self {
            before,
            after,
            changes,
        }
    }

    /// Computes the minimal change set between two images.
    pub fn between(before: DataImage, after: DataImage) -> Self {
        let mut changes = Vec::new();
        for (path, old) in &before {
            match after.get(path) {
                None => changes.push(DataChange {
                    path: path.clone(),
                    kind: ChangeKind::Delete,
                    before: Some(old.clone()),
                    after: None,
                }),
                Some(new) if new != old => changes.push(DataChange {
                    path: path.clone(),
                    kind: ChangeKind::Update,
                    before: Some(old.clone()),
                    after: Some(new.clone()),
                }),
                Some(_) => {}
            }
        }
        for (path, new) in &after {
            if !before.contains_key(path) {
                changes.push(DataChange {
                    path: path.clone(),
                    kind: ChangeKind::Create,
                    before: None,
                    after: Some(new.clone()),
                });
            }
        }
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            before,
            after,
            changes,
        }
    }

    /// Adds a created node.
    pub fn create(mut self, path: SchemaPath, value: Value) -> Self {
        self.after.insert(path.clone(), value.clone());
        self.changes.push(DataChange {
            path,
            kind: ChangeKind::Create,
            before: None,
            after: Some(value),
        });
        self
    }

    /// Adds an updated node.
    pub fn update(mut self, path: SchemaPath, before: Value, after: Value) -> Self {
        self.before.insert(path.clone(), before.clone());
        self.after.insert(path.clone(), after.clone());
        self.changes.push(DataChange {
            path,
            kind: ChangeKind::Update,
            before: Some(before),
            after: Some(after),
        });
        self
    }

    /// Adds a deleted node.
    pub fn delete(mut self, path: SchemaPath, before: Value) -> Self {
        self.before.insert(path.clone(), before.clone());
        self.changes.push(DataChange {
            path,
            kind: ChangeKind::Delete,
            before: Some(before),
            after: None,
        });
        self
    }

    /// Adds an unchanged node present in both images.
    pub fn unchanged(mut self, path: SchemaPath, value: Value) -> Self {
        self.before.insert(path.clone(), value.clone());
        self.after.insert(path, value);
        self
    }

    pub fn changes(&self) -> &[DataChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Value of `path` in the before image.
    pub fn before(&self, path: &SchemaPath) -> Option<&Value> {
        self.before.get(path)
    }

    /// Value of `path` in the after image.
    pub fn after(&self, path: &SchemaPath) -> Option<&Value> {
        self.after.get(path)
    }

    pub fn before_image(&self) -> &DataImage {
        &self.before
    }

    pub fn after_image(&self) -> &DataImage {
        &self.after
    }
}
