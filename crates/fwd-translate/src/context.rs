//! Contexts handed to customizers during a write or read transaction.

use crate::cache::ModificationCache;
use crate::diff::DataTreeDiff;
use crate::dump::DumpCache;
use crate::error::ContextError;
use crate::naming::{DomainContext, MappingStore, MultiNamingContext, NamingContext, StagedMappings};
use fwd_types::SchemaPath;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// State of one write transaction visible to writers.
pub struct WriteContext {
    transaction_id: Uuid,
    diff: DataTreeDiff,
    cache: ModificationCache,
    mappings: StagedMappings,
}

impl WriteContext {
    pub fn new(transaction_id: Uuid, diff: DataTreeDiff, mappings: StagedMappings) -> Self {
        Self {
            transaction_id,
            diff,
            cache: ModificationCache::new(),
            mappings,
        }
    }

    pub fn transaction_id(&self) -> Uuid {
        self.transaction_id
    }

    /// Value of `path` before the transaction.
    pub fn read_before(&self, path: &SchemaPath) -> Option<&Value> {
        self.diff.before(path)
    }

    /// Value of `path` after the transaction.
    pub fn read_after(&self, path: &SchemaPath) -> Option<&Value> {
        self.diff.after(path)
    }

    /// Nodes strictly below `prefix` in the before image.
    pub fn before_under(&self, prefix: &SchemaPath) -> Vec<(&SchemaPath, &Value)> {
        self.diff
            .before_image()
            .iter()
            .filter(|(path, _)| prefix.is_ancestor_of(path))
            .collect()
    }

    /// Nodes strictly below `prefix` in the after image.
    pub fn after_under(&self, prefix: &SchemaPath) -> Vec<(&SchemaPath, &Value)> {
        self.diff
            .after_image()
            .iter()
            .filter(|(path, _)| prefix.is_ancestor_of(path))
            .collect()
    }

    /// Scratch storage shared by all writers of this transaction.
    pub fn cache(&self) -> &ModificationCache {
        &self.cache
    }

    /// Runs `f` on the staged copy of a naming domain.
    pub fn with_naming<R>(
        &self,
        domain: &str,
        f: impl FnOnce(&mut NamingContext) -> Result<R, ContextError>,
    ) -> Result<R, ContextError> {
        self.mappings.with_naming(domain, f)
    }

    /// Runs `f` on the staged copy of a multi-naming domain.
    pub fn with_multi_naming<R>(
        &self,
        domain: &str,
        f: impl FnOnce(&mut MultiNamingContext) -> Result<R, ContextError>,
    ) -> Result<R, ContextError> {
        self.mappings.with_multi_naming(domain, f)
    }

    pub(crate) fn into_mappings(self) -> StagedMappings {
        self.mappings
    }
}

/// State of one read transaction visible to readers.
///
/// Owns the dump cache, so every cached dump is released together with the
/// read transaction.
pub struct ReadContext {
    dump_cache: DumpCache,
    cache: ModificationCache,
    mappings: Arc<MappingStore>,
    snapshot: Mutex<BTreeMap<String, DomainContext>>,
}

impl ReadContext {
    /// Creates a context with a snapshot of the current mappings.
    pub fn new(mappings: Arc<MappingStore>) -> Self {
        let snapshot = mappings.snapshot();
        Self {
            dump_cache: DumpCache::new(),
            cache: ModificationCache::new(),
            mappings,
            snapshot: Mutex::new(snapshot),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, DomainContext>> {
        self.snapshot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn dump_cache(&self) -> &DumpCache {
        &self.dump_cache
    }

    /// Scratch storage shared by all readers of this transaction.
    pub fn cache(&self) -> &ModificationCache {
        &self.cache
    }

    /// Runs `f` on the snapshot of a naming domain.
    pub fn with_naming<R>(&self, domain: &str, f: impl FnOnce(&NamingContext) -> R) -> Result<R, ContextError> {
        match self.lock().get(domain) {
            Some(DomainContext::Single(ctx)) => Ok(f(ctx)),
            _ => Err(ContextError::unknown_domain(domain)),
        }
    }

    /// Runs `f` on the snapshot of a multi-naming domain.
    pub fn with_multi_naming<R>(
        &self,
        domain: &str,
        f: impl FnOnce(&MultiNamingContext) -> R,
    ) -> Result<R, ContextError> {
        match self.lock().get(domain) {
            Some(DomainContext::Multi(ctx)) => Ok(f(ctx)),
            _ => Err(ContextError::unknown_domain(domain)),
        }
    }

    /// Returns the name of `index`, assigning and learning an artificial name
    /// for objects the data tree does not know about.
    pub fn name_of(&self, domain: &str, index: u32) -> Result<String, ContextError> {
        let name = {
            let mut snapshot = self.lock();
            match snapshot.get_mut(domain) {
                Some(DomainContext::Single(ctx)) => {
                    if let Ok(name) = ctx.name_of(index) {
                        return Ok(name.to_string());
                    }
                    ctx.name_or_artificial(index)?
                }
                _ => return Err(ContextError::unknown_domain(domain)),
            }
        };
        self.mappings.learn(domain, &name, index)?;
        Ok(name)
    }

    /// Records a mapping discovered while reading, in the snapshot and the
    /// shared store. Conflicting mappings are skipped.
    pub fn learn(&self, domain: &str, name: &str, index: u32) -> Result<bool, ContextError> {
        {
            let mut snapshot = self.lock();
            if let Some(DomainContext::Single(ctx)) = snapshot.get_mut(domain) {
                if let Err(e) = ctx.add(name, index) {
                    if !e.is_conflict() {
                        return Err(e);
                    }
                }
            }
        }
        self.mappings.learn(domain, name, index)
    }
}
