//! Name to engine-handle mappings.
//!
//! The data tree identifies objects by name (`eth0`), the engine by numeric
//! handle (`sw_if_index = 3`). Every customizer that creates an engine object
//! records the pair in a [`NamingContext`] so later writes and reads can
//! translate in both directions.
//!
//! Contexts are grouped by domain in a [`MappingStore`]. Write transactions
//! work on [`StagedMappings`], a private copy of the domains they touch that
//! is published only when the commit succeeds.

use crate::error::ContextError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Bidirectional name <-> index table of one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "NamingFile", try_from = "NamingFile")]
pub struct NamingContext {
    domain: String,
    artificial_prefix: String,
    start_index: u32,
    by_name: BTreeMap<String, u32>,
    by_index: BTreeMap<u32, String>,
}

impl NamingContext {
    /// Creates an empty context. Artificial names are `<prefix><index>`.
    pub fn new(domain: impl Into<String>, artificial_prefix: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            artificial_prefix: artificial_prefix.into(),
            start_index: 0,
            by_name: BTreeMap::new(),
            by_index: BTreeMap::new(),
        }
    }

    /// Sets the first index handed out by [`add_next`](Self::add_next).
    pub fn with_start_index(mut self, start_index: u32) -> Self {
        self.start_index = start_index;
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn artificial_prefix(&self) -> &str {
        &self.artificial_prefix
    }

    pub fn start_index(&self) -> u32 {
        self.start_index
    }

    /// Returns the index mapped to `name`.
    pub fn index_of(&self, name: &str) -> Result<u32, ContextError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| ContextError::not_found(&self.domain, format!("name '{}'", name)))
    }

    /// Returns the name mapped to `index`.
    pub fn name_of(&self, index: u32) -> Result<&str, ContextError> {
        self.by_index
            .get(&index)
            .map(String::as_str)
            .ok_or_else(|| ContextError::not_found(&self.domain, format!("index {}", index)))
    }

    /// Returns the name mapped to `index`, creating and storing an artificial
    /// name if there is none (objects created outside the data tree).
    pub fn name_or_artificial(&mut self, index: u32) -> Result<String, ContextError> {
        if let Some(name) = self.by_index.get(&index) {
            return Ok(name.clone());
        }
        let name = self.artificial_name(index);
        self.add(&name, index)?;
        log::debug!("{}: assigned artificial name {} to index {}", self.domain, name, index);
        Ok(name)
    }

    /// Returns the artificial name for `index` without storing it.
    pub fn artificial_name(&self, index: u32) -> String {
        format!("{}{}", self.artificial_prefix, index)
    }

    /// Maps `name` to `index`. Adding an existing pair again is a no-op.
    pub fn add(&mut self, name: &str, index: u32) -> Result<(), ContextError> {
        if let Some(&existing) = self.by_name.get(name) {
            if existing == index {
                return Ok(());
            }
            return Err(ContextError::NameConflict {
                domain: self.domain.clone(),
                name: name.to_string(),
                existing,
                requested: index,
            });
        }
        if let Some(existing) = self.by_index.get(&index) {
            return Err(ContextError::HandleConflict {
                domain: self.domain.clone(),
                index,
                existing: existing.clone(),
                requested: name.to_string(),
            });
        }
        self.by_name.insert(name.to_string(), index);
        self.by_index.insert(index, name.to_string());
        Ok(())
    }

    /// Maps `name` to the next free index (highest index + 1, or the start
    /// index) and returns it. Returns the existing index if already mapped.
    pub fn add_next(&mut self, name: &str) -> Result<u32, ContextError> {
        if let Some(&existing) = self.by_name.get(name) {
            return Ok(existing);
        }
        let index = match self.by_index.keys().next_back() {
            Some(&max) if max < self.start_index => self.start_index,
            Some(&max) => max
                .checked_add(1)
                .ok_or_else(|| ContextError::exhausted(&self.domain, max))?,
            None => self.start_index,
        };
        self.add(name, index)?;
        Ok(index)
    }

    /// Removes the mapping of `name`. Removing an absent name is a no-op.
    pub fn remove(&mut self, name: &str) -> Option<u32> {
        let index = self.by_name.remove(name)?;
        self.by_index.remove(&index);
        Some(index)
    }

    /// Removes the mapping of `index`. Removing an absent index is a no-op.
    pub fn remove_index(&mut self, index: u32) -> Option<String> {
        let name = self.by_index.remove(&index)?;
        self.by_name.remove(&name);
        Some(name)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn contains_index(&self, index: u32) -> bool {
        self.by_index.contains_key(&index)
    }

    /// Iterates the mappings ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.by_name.iter().map(|(n, i)| (n.as_str(), *i))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Replays the difference between `base` and `staged` onto this context.
    /// A staged pair replaces any mapping it conflicts with.
    fn apply_staged(&mut self, base: &NamingContext, staged: &NamingContext) {
        for (name, &index) in &base.by_name {
            if staged.by_name.get(name) != Some(&index) && self.by_name.get(name) == Some(&index) {
                self.remove(name);
            }
        }
        for (name, &index) in &staged.by_name {
            if base.by_name.get(name) == Some(&index) || self.by_name.get(name) == Some(&index) {
                continue;
            }
            if let Some(old) = self.remove(name) {
                log::warn!("{}: {} remapped from {} to {}", self.domain, name, old, index);
            }
            if let Some(old) = self.remove_index(index) {
                log::warn!("{}: index {} taken over from {} by {}", self.domain, index, old, name);
            }
            self.by_name.insert(name.clone(), index);
            self.by_index.insert(index, name.clone());
        }
    }

    /// Drops every mapping whose index is not in `valid`, returning the
    /// removed names. Used after an engine restart invalidated handles.
    pub fn retain_indexes(&mut self, valid: &BTreeSet<u32>) -> Vec<String> {
        let stale: Vec<u32> = self
            .by_index
            .keys()
            .filter(|i| !valid.contains(i))
            .copied()
            .collect();
        stale
            .into_iter()
            .filter_map(|index| self.remove_index(index))
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct NamingFile {
    domain: String,
    #[serde(default)]
    artificial_prefix: String,
    #[serde(default)]
    start_index: u32,
    #[serde(default)]
    mappings: Vec<MappingEntry>,
}

#[derive(Serialize, Deserialize)]
struct MappingEntry {
    name: String,
    index: u32,
}

impl From<NamingContext> for NamingFile {
    fn from(ctx: NamingContext) -> Self {
        let mappings = ctx
            .by_index
            .into_iter()
            .map(|(index, name)| MappingEntry { name, index })
            .collect();
        NamingFile {
            domain: ctx.domain,
            artificial_prefix: ctx.artificial_prefix,
            start_index: ctx.start_index,
            mappings,
        }
    }
}

impl TryFrom<NamingFile> for NamingContext {
    type Error = ContextError;

    fn try_from(file: NamingFile) -> Result<Self, Self::Error> {
        let mut ctx =
            NamingContext::new(file.domain, file.artificial_prefix).with_start_index(file.start_index);
        for entry in file.mappings {
            ctx.add(&entry.name, entry.index)?;
        }
        Ok(ctx)
    }
}

/// Per-parent child tables: parent name -> (child index <-> child name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiNamingContext {
    domain: String,
    start_index: u32,
    #[serde(default)]
    children: BTreeMap<String, BTreeMap<u32, String>>,
}

impl MultiNamingContext {
    pub fn new(domain: impl Into<String>, start_index: u32) -> Self {
        Self {
            domain: domain.into(),
            start_index,
            children: BTreeMap::new(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Maps `child` to `index` under `parent`. Adding an existing pair again
    /// is a no-op.
    pub fn add_child(&mut self, parent: &str, index: u32, child: &str) -> Result<(), ContextError> {
        if index < self.start_index {
            return Err(ContextError::IndexBelowStart {
                domain: self.domain.clone(),
                index,
                start: self.start_index,
            });
        }
        let table = self.children.entry(parent.to_string()).or_default();
        if let Some(existing) = table.get(&index) {
            if existing == child {
                return Ok(());
            }
            return Err(ContextError::HandleConflict {
                domain: self.domain.clone(),
                index,
                existing: existing.clone(),
                requested: child.to_string(),
            });
        }
        if let Some((&existing, _)) = table.iter().find(|(_, name)| name.as_str() == child) {
            return Err(ContextError::NameConflict {
                domain: self.domain.clone(),
                name: child.to_string(),
                existing,
                requested: index,
            });
        }
        table.insert(index, child.to_string());
        Ok(())
    }

    /// Maps `child` to the next free index under `parent` and returns it.
    pub fn add_next_child(&mut self, parent: &str, child: &str) -> Result<u32, ContextError> {
        if let Ok(existing) = self.child_index(parent, child) {
            return Ok(existing);
        }
        let index = match self.children.get(parent).and_then(|t| t.keys().next_back()) {
            Some(&max) => max
                .checked_add(1)
                .ok_or_else(|| ContextError::exhausted(&self.domain, max))?,
            None => self.start_index,
        };
        self.add_child(parent, index, child)?;
        Ok(index)
    }

    pub fn child_index(&self, parent: &str, child: &str) -> Result<u32, ContextError> {
        self.children
            .get(parent)
            .and_then(|t| t.iter().find(|(_, name)| name.as_str() == child))
            .map(|(&index, _)| index)
            .ok_or_else(|| ContextError::not_found(&self.domain, format!("child '{}' of '{}'", child, parent)))
    }

    pub fn child_name(&self, parent: &str, index: u32) -> Result<&str, ContextError> {
        self.children
            .get(parent)
            .and_then(|t| t.get(&index))
            .map(String::as_str)
            .ok_or_else(|| ContextError::not_found(&self.domain, format!("child {} of '{}'", index, parent)))
    }

    /// Removes `child` under `parent`. Removing an absent child is a no-op.
    pub fn remove_child(&mut self, parent: &str, child: &str) -> Option<u32> {
        let table = self.children.get_mut(parent)?;
        let index = table
            .iter()
            .find(|(_, name)| name.as_str() == child)
            .map(|(&index, _)| index)?;
        table.remove(&index);
        if table.is_empty() {
            self.children.remove(parent);
        }
        Some(index)
    }

    fn entries(&self) -> BTreeSet<(&str, u32, &str)> {
        self.children
            .iter()
            .flat_map(|(parent, table)| {
                table
                    .iter()
                    .map(move |(index, child)| (parent.as_str(), *index, child.as_str()))
            })
            .collect()
    }

    /// Replays the difference between `base` and `staged` onto this context.
    fn apply_staged(&mut self, base: &MultiNamingContext, staged: &MultiNamingContext) {
        let before = base.entries();
        let after = staged.entries();
        for &(parent, index, child) in before.difference(&after) {
            if self.child_name(parent, index).ok() == Some(child) {
                self.remove_child(parent, child);
            }
        }
        for &(parent, index, child) in after.difference(&before) {
            if self.child_index(parent, child).ok() == Some(index) {
                continue;
            }
            self.remove_child(parent, child);
            let table = self.children.entry(parent.to_string()).or_default();
            if let Some(old) = table.insert(index, child.to_string()) {
                log::warn!("{}: child {} of {} taken over from {} by {}", self.domain, index, parent, old, child);
            }
        }
    }

    /// Removes every child of `parent`.
    pub fn remove_parent(&mut self, parent: &str) {
        self.children.remove(parent);
    }

    /// Returns the children of `parent` ordered by index.
    pub fn children(&self, parent: &str) -> Vec<(u32, String)> {
        self.children
            .get(parent)
            .map(|t| t.iter().map(|(i, n)| (*i, n.clone())).collect())
            .unwrap_or_default()
    }
}

/// A mapping domain of either shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DomainContext {
    Single(NamingContext),
    Multi(MultiNamingContext),
}

impl DomainContext {
    pub fn domain(&self) -> &str {
        match self {
            DomainContext::Single(ctx) => ctx.domain(),
            DomainContext::Multi(ctx) => ctx.domain(),
        }
    }

    fn apply_staged(&mut self, base: &DomainContext, staged: &DomainContext) {
        match (self, base, staged) {
            (DomainContext::Single(ctx), DomainContext::Single(base), DomainContext::Single(staged)) => {
                ctx.apply_staged(base, staged)
            }
            (DomainContext::Multi(ctx), DomainContext::Multi(base), DomainContext::Multi(staged)) => {
                ctx.apply_staged(base, staged)
            }
            (ctx, _, _) => log::error!("{}: staged mappings of a different kind ignored", ctx.domain()),
        }
    }

    fn same_kind(&self, other: &DomainContext) -> bool {
        matches!(
            (self, other),
            (DomainContext::Single(_), DomainContext::Single(_))
                | (DomainContext::Multi(_), DomainContext::Multi(_))
        )
    }
}

impl From<NamingContext> for DomainContext {
    fn from(ctx: NamingContext) -> Self {
        DomainContext::Single(ctx)
    }
}

impl From<MultiNamingContext> for DomainContext {
    fn from(ctx: MultiNamingContext) -> Self {
        DomainContext::Multi(ctx)
    }
}

fn single<'a>(
    domains: &'a mut BTreeMap<String, DomainContext>,
    domain: &str,
) -> Result<&'a mut NamingContext, ContextError> {
    match domains.get_mut(domain) {
        Some(DomainContext::Single(ctx)) => Ok(ctx),
        _ => Err(ContextError::unknown_domain(domain)),
    }
}

fn multi<'a>(
    domains: &'a mut BTreeMap<String, DomainContext>,
    domain: &str,
) -> Result<&'a mut MultiNamingContext, ContextError> {
    match domains.get_mut(domain) {
        Some(DomainContext::Multi(ctx)) => Ok(ctx),
        _ => Err(ContextError::unknown_domain(domain)),
    }
}

/// All mapping domains of the process.
///
/// Built at startup, shared by `Arc`. Readers take snapshots; writes happen
/// by publishing staged mappings of a committed transaction or by learning
/// non-conflicting entries discovered while reading.
#[derive(Debug, Default)]
pub struct MappingStore {
    domains: RwLock<BTreeMap<String, DomainContext>>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, DomainContext>> {
        self.domains.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, DomainContext>> {
        self.domains.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a domain. Returns false if the domain already existed, in
    /// which case the existing context is kept.
    pub fn register(&self, ctx: impl Into<DomainContext>) -> bool {
        let ctx = ctx.into();
        let mut domains = self.write();
        if domains.contains_key(ctx.domain()) {
            return false;
        }
        domains.insert(ctx.domain().to_string(), ctx);
        true
    }

    pub fn contains_domain(&self, domain: &str) -> bool {
        self.read().contains_key(domain)
    }

    pub fn domains(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Returns a copy of one domain.
    pub fn snapshot_domain(&self, domain: &str) -> Result<DomainContext, ContextError> {
        self.read()
            .get(domain)
            .cloned()
            .ok_or_else(|| ContextError::unknown_domain(domain))
    }

    /// Returns a copy of every domain.
    pub fn snapshot(&self) -> BTreeMap<String, DomainContext> {
        self.read().clone()
    }

    /// Returns a copy of a single-name domain.
    pub fn naming(&self, domain: &str) -> Result<NamingContext, ContextError> {
        match self.read().get(domain) {
            Some(DomainContext::Single(ctx)) => Ok(ctx.clone()),
            _ => Err(ContextError::unknown_domain(domain)),
        }
    }

    /// Returns a copy of a multi-name domain.
    pub fn multi_naming(&self, domain: &str) -> Result<MultiNamingContext, ContextError> {
        match self.read().get(domain) {
            Some(DomainContext::Multi(ctx)) => Ok(ctx.clone()),
            _ => Err(ContextError::unknown_domain(domain)),
        }
    }

    /// Starts a private copy-on-access view for one write transaction.
    pub fn stage(self: &Arc<Self>) -> StagedMappings {
        StagedMappings {
            store: Arc::clone(self),
            touched: Mutex::new(Staged::default()),
        }
    }

    /// Applies the changes a transaction made to its copies. Mappings
    /// learned since the copies were taken are kept.
    fn publish(&self, staged: Staged) {
        if staged.working.is_empty() {
            return;
        }
        let mut domains = self.write();
        for (name, working) in staged.working {
            match (domains.get_mut(&name), staged.base.get(&name)) {
                (Some(current), Some(base)) => current.apply_staged(base, &working),
                _ => {
                    domains.insert(name, working);
                }
            }
        }
    }

    /// Records a mapping discovered while reading. Returns false (and keeps
    /// the store unchanged) if it conflicts with an existing mapping.
    pub fn learn(&self, domain: &str, name: &str, index: u32) -> Result<bool, ContextError> {
        let mut domains = self.write();
        let ctx = single(&mut domains, domain)?;
        match ctx.add(name, index) {
            Ok(()) => Ok(true),
            Err(e) if e.is_conflict() => {
                log::warn!("not learning {} -> {}: {}", name, index, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn domain_file(dir: &Path, domain: &str) -> PathBuf {
        dir.join(format!("{}.json", domain))
    }

    /// Loads every registered domain from `<dir>/<domain>.json`. Missing
    /// files leave the domain empty. Returns the number of files loaded.
    pub fn load_dir(&self, dir: &Path) -> Result<usize, ContextError> {
        let mut domains = self.write();
        let mut loaded = 0;
        for (name, ctx) in domains.iter_mut() {
            let file = Self::domain_file(dir, name);
            if !file.exists() {
                continue;
            }
            let text = std::fs::read_to_string(&file).map_err(|e| ContextError::persistence(name, e))?;
            let stored: DomainContext =
                serde_json::from_str(&text).map_err(|e| ContextError::persistence(name, e))?;
            if stored.domain() != name || !stored.same_kind(ctx) {
                return Err(ContextError::persistence(
                    name,
                    format!("{} does not hold this domain", file.display()),
                ));
            }
            *ctx = stored;
            loaded += 1;
        }
        log::info!("loaded {} mapping domains from {}", loaded, dir.display());
        Ok(loaded)
    }

    /// Saves every domain to `<dir>/<domain>.json`.
    pub fn save_dir(&self, dir: &Path) -> Result<(), ContextError> {
        let domains = self.snapshot();
        std::fs::create_dir_all(dir).map_err(|e| ContextError::persistence("*", e))?;
        for (name, ctx) in &domains {
            let text = serde_json::to_string_pretty(ctx).map_err(|e| ContextError::persistence(name, e))?;
            std::fs::write(Self::domain_file(dir, name), text)
                .map_err(|e| ContextError::persistence(name, e))?;
        }
        log::debug!("saved {} mapping domains to {}", domains.len(), dir.display());
        Ok(())
    }
}

/// Domain copies of one transaction: as taken from the store, and as
/// modified since.
#[derive(Default)]
struct Staged {
    base: BTreeMap<String, DomainContext>,
    working: BTreeMap<String, DomainContext>,
}

/// Mapping changes of one write transaction, invisible to others until
/// [`publish`](Self::publish)ed.
pub struct StagedMappings {
    store: Arc<MappingStore>,
    touched: Mutex<Staged>,
}

impl StagedMappings {
    fn lock(&self) -> MutexGuard<'_, Staged> {
        self.touched.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure(&self, touched: &mut Staged, domain: &str) -> Result<(), ContextError> {
        if !touched.working.contains_key(domain) {
            let ctx = self.store.snapshot_domain(domain)?;
            touched.base.insert(domain.to_string(), ctx.clone());
            touched.working.insert(domain.to_string(), ctx);
        }
        Ok(())
    }

    /// Runs `f` on the staged copy of a single-name domain.
    pub fn with_naming<R>(
        &self,
        domain: &str,
        f: impl FnOnce(&mut NamingContext) -> Result<R, ContextError>,
    ) -> Result<R, ContextError> {
        let mut touched = self.lock();
        self.ensure(&mut touched, domain)?;
        f(single(&mut touched.working, domain)?)
    }

    /// Runs `f` on the staged copy of a multi-name domain.
    pub fn with_multi_naming<R>(
        &self,
        domain: &str,
        f: impl FnOnce(&mut MultiNamingContext) -> Result<R, ContextError>,
    ) -> Result<R, ContextError> {
        let mut touched = self.lock();
        self.ensure(&mut touched, domain)?;
        f(multi(&mut touched.working, domain)?)
    }

    /// Domains accessed through this stage.
    pub fn touched_domains(&self) -> Vec<String> {
        self.lock().working.keys().cloned().collect()
    }

    /// Makes the staged domains visible in the store.
    pub fn publish(self) {
        let touched = self
            .touched
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.store.publish(touched);
    }

    /// Drops the staged changes.
    pub fn discard(self) {
        let count = self.lock().working.len();
        if count > 0 {
            log::debug!("discarding staged changes to {} mapping domains", count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn interfaces() -> NamingContext {
        NamingContext::new("interface-context", "local")
    }

    #[test]
    fn test_add_lookup_conflict() {
        let mut ctx = interfaces();
        ctx.add("foo", 5).unwrap();
        assert_eq!(ctx.index_of("foo").unwrap(), 5);
        assert_eq!(ctx.name_of(5).unwrap(), "foo");

        let err = ctx.add("bar", 5).unwrap_err();
        assert!(matches!(err, ContextError::HandleConflict { index: 5, .. }));
        let err = ctx.add("foo", 6).unwrap_err();
        assert!(matches!(err, ContextError::NameConflict { existing: 5, requested: 6, .. }));

        // same pair again is fine
        ctx.add("foo", 5).unwrap();
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_not_found() {
        let ctx = interfaces();
        assert!(ctx.index_of("eth0").unwrap_err().is_not_found());
        assert!(ctx.name_of(1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_absent_is_silent() {
        let mut ctx = interfaces();
        assert_eq!(ctx.remove("nope"), None);
        ctx.add("eth0", 1).unwrap();
        assert_eq!(ctx.remove("eth0"), Some(1));
        assert_eq!(ctx.remove("eth0"), None);
        assert!(!ctx.contains_index(1));
    }

    #[test]
    fn test_artificial_names() {
        let mut ctx = interfaces();
        ctx.add("eth0", 1).unwrap();
        assert_eq!(ctx.name_or_artificial(1).unwrap(), "eth0");
        assert_eq!(ctx.name_or_artificial(4).unwrap(), "local4");
        assert_eq!(ctx.index_of("local4").unwrap(), 4);
    }

    #[test]
    fn test_add_next() {
        let mut ctx = interfaces().with_start_index(1);
        assert_eq!(ctx.add_next("eth0").unwrap(), 1);
        assert_eq!(ctx.add_next("eth1").unwrap(), 2);
        assert_eq!(ctx.add_next("eth0").unwrap(), 1);
        ctx.add("eth9", 9).unwrap();
        assert_eq!(ctx.add_next("eth10").unwrap(), 10);
    }

    #[test]
    fn test_retain_indexes() {
        let mut ctx = interfaces();
        ctx.add("eth0", 1).unwrap();
        ctx.add("eth1", 2).unwrap();
        ctx.add("eth2", 3).unwrap();
        let removed = ctx.retain_indexes(&BTreeSet::from([2]));
        assert_eq!(removed, vec!["eth0".to_string(), "eth2".to_string()]);
        assert_eq!(ctx.iter().collect::<Vec<_>>(), vec![("eth1", 2)]);
    }

    #[test]
    fn test_multi_naming() {
        let mut ctx = MultiNamingContext::new("subinterface-context", 1);
        ctx.add_child("eth0", 100, "eth0.100").unwrap();
        assert_eq!(ctx.child_index("eth0", "eth0.100").unwrap(), 100);
        assert_eq!(ctx.child_name("eth0", 100).unwrap(), "eth0.100");
        assert_eq!(ctx.add_next_child("eth0", "eth0.101").unwrap(), 101);
        assert_eq!(ctx.add_next_child("eth1", "eth1.x").unwrap(), 1);

        assert!(matches!(
            ctx.add_child("eth0", 0, "eth0.0"),
            Err(ContextError::IndexBelowStart { index: 0, start: 1, .. })
        ));
        assert!(ctx.add_child("eth0", 100, "other").unwrap_err().is_conflict());

        assert_eq!(ctx.remove_child("eth0", "eth0.100"), Some(100));
        assert_eq!(ctx.remove_child("eth0", "eth0.100"), None);
        assert_eq!(ctx.children("eth0"), vec![(101, "eth0.101".to_string())]);
    }

    #[test]
    fn test_staged_changes_publish_and_discard() {
        let store = Arc::new(MappingStore::new());
        store.register(interfaces());

        let staged = store.stage();
        staged
            .with_naming("interface-context", |ctx| ctx.add("eth0", 1))
            .unwrap();
        assert!(!store.naming("interface-context").unwrap().contains_name("eth0"));
        staged.discard();
        assert!(!store.naming("interface-context").unwrap().contains_name("eth0"));

        let staged = store.stage();
        staged
            .with_naming("interface-context", |ctx| ctx.add("eth0", 1))
            .unwrap();
        assert_eq!(staged.touched_domains(), vec!["interface-context".to_string()]);
        staged.publish();
        assert_eq!(store.naming("interface-context").unwrap().index_of("eth0").unwrap(), 1);
    }

    #[test]
    fn test_publish_keeps_mappings_learned_meanwhile() {
        let store = Arc::new(MappingStore::new());
        store.register(interfaces());
        store.learn("interface-context", "eth0", 1).unwrap();

        let staged = store.stage();
        staged
            .with_naming("interface-context", |ctx| {
                ctx.remove("eth0");
                ctx.add("eth1", 2)
            })
            .unwrap();
        assert!(store.learn("interface-context", "eth7", 7).unwrap());
        staged.publish();

        let ctx = store.naming("interface-context").unwrap();
        assert_eq!(ctx.iter().collect::<Vec<_>>(), vec![("eth1", 2), ("eth7", 7)]);
    }

    #[test]
    fn test_publish_overrides_conflicting_learned_mapping() {
        let store = Arc::new(MappingStore::new());
        store.register(interfaces());

        let staged = store.stage();
        staged
            .with_naming("interface-context", |ctx| ctx.add("eth1", 2))
            .unwrap();
        store.learn("interface-context", "local2", 2).unwrap();
        staged.publish();

        let ctx = store.naming("interface-context").unwrap();
        assert_eq!(ctx.iter().collect::<Vec<_>>(), vec![("eth1", 2)]);
    }

    #[test]
    fn test_publish_multi_naming_merges_children() {
        let store = Arc::new(MappingStore::new());
        let mut subs = MultiNamingContext::new("subinterface-context", 1);
        subs.add_child("eth0", 5, "eth0.5").unwrap();
        store.register(subs);

        let staged = store.stage();
        staged
            .with_multi_naming("subinterface-context", |ctx| {
                ctx.remove_child("eth0", "eth0.5");
                ctx.add_child("eth0", 6, "eth0.6")
            })
            .unwrap();
        if let Some(DomainContext::Multi(ctx)) = store.write().get_mut("subinterface-context") {
            ctx.add_child("eth1", 3, "eth1.3").unwrap();
        }
        staged.publish();

        let ctx = store.multi_naming("subinterface-context").unwrap();
        assert_eq!(ctx.children("eth0"), vec![(6, "eth0.6".to_string())]);
        assert_eq!(ctx.children("eth1"), vec![(3, "eth1.3".to_string())]);
    }

    #[test]
    fn test_add_next_at_index_limit() {
        let mut ctx = interfaces();
        ctx.add("max", u32::MAX).unwrap();
        assert!(matches!(
            ctx.add_next("next"),
            Err(ContextError::Exhausted { last: u32::MAX, .. })
        ));
        assert!(!ctx.contains_name("next"));

        let mut subs = MultiNamingContext::new("subinterface-context", 1);
        subs.add_child("eth0", u32::MAX, "eth0.max").unwrap();
        assert!(matches!(
            subs.add_next_child("eth0", "eth0.next"),
            Err(ContextError::Exhausted { .. })
        ));
    }

    #[test]
    fn test_unknown_domain() {
        let store = Arc::new(MappingStore::new());
        let staged = store.stage();
        let err = staged.with_naming("nope", |_| Ok(())).unwrap_err();
        assert_eq!(err, ContextError::unknown_domain("nope"));
        assert!(store.learn("nope", "a", 1).is_err());
    }

    #[test]
    fn test_learn_skips_conflicts() {
        let store = MappingStore::new();
        store.register(interfaces());
        assert!(store.learn("interface-context", "eth0", 1).unwrap());
        assert!(store.learn("interface-context", "eth0", 1).unwrap());
        assert!(!store.learn("interface-context", "eth1", 1).unwrap());
        assert_eq!(store.naming("interface-context").unwrap().len(), 1);
    }

    #[test]
    fn test_register_keeps_existing() {
        let store = MappingStore::new();
        let mut ctx = interfaces();
        ctx.add("eth0", 1).unwrap();
        assert!(store.register(ctx));
        assert!(!store.register(interfaces()));
        assert_eq!(store.naming("interface-context").unwrap().len(), 1);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = MappingStore::new();
        store.register(interfaces());
        store.register(MultiNamingContext::new("subinterface-context", 1));
        store.learn("interface-context", "eth0", 3).unwrap();
        store.save_dir(dir.path()).unwrap();
        assert!(dir.path().join("interface-context.json").exists());
        assert!(dir.path().join("subinterface-context.json").exists());

        let restored = MappingStore::new();
        restored.register(interfaces());
        restored.register(MultiNamingContext::new("subinterface-context", 1));
        restored.register(NamingContext::new("bridge-domain-context", "bd"));
        assert_eq!(restored.load_dir(dir.path()).unwrap(), 2);
        assert_eq!(restored.snapshot(), {
            let mut expected = store.snapshot();
            expected.insert(
                "bridge-domain-context".to_string(),
                NamingContext::new("bridge-domain-context", "bd").into(),
            );
            expected
        });
    }

    #[test]
    fn test_persistence_rejects_wrong_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = MappingStore::new();
        store.register(MultiNamingContext::new("interface-context", 0));
        store.save_dir(dir.path()).unwrap();

        let restored = MappingStore::new();
        restored.register(interfaces());
        assert!(matches!(
            restored.load_dir(dir.path()),
            Err(ContextError::Persistence { .. })
        ));
    }

    #[test]
    fn test_corrupt_mapping_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("interface-context.json"),
            r#"{"kind":"single","domain":"interface-context","mappings":[{"name":"a","index":1},{"name":"b","index":1}]}"#,
        )
        .unwrap();
        let store = MappingStore::new();
        store.register(interfaces());
        assert!(store.load_dir(dir.path()).is_err());
    }
}
