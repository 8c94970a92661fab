//! Handler registries.
//!
//! Plugins register one handler per schema node (in wildcarded form) into a
//! [`RegistryBuilder`]. `build()` resolves the declared relations, adds the
//! implicit parent-before-child edges, rejects cycles and produces an
//! immutable [`SubtreeRegistry`] shared by the engines for the lifetime of
//! the process.

use crate::customizer::{Reader, WriterCustomizer};
use crate::error::{RegistryError, RegistryKind};
use crate::graph::{DependencyGraph, OrderDirection};
use fwd_types::SchemaPath;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of readers.
pub type ReaderRegistry = SubtreeRegistry<Reader>;
/// Registry of writers.
pub type WriterRegistry = SubtreeRegistry<Arc<dyn WriterCustomizer>>;
/// Builder of a [`ReaderRegistry`].
pub type ReaderRegistryBuilder = RegistryBuilder<Reader>;
/// Builder of a [`WriterRegistry`].
pub type WriterRegistryBuilder = RegistryBuilder<Arc<dyn WriterCustomizer>>;

/// One handler bound to a schema node.
pub struct Registration<H> {
    path: SchemaPath,
    handler: H,
    after: Vec<SchemaPath>,
    before: Vec<SchemaPath>,
    handled_children: Vec<SchemaPath>,
    sequence: usize,
    implicit: bool,
}

impl<H> Registration<H> {
    /// Schema path of the handled node.
    pub fn path(&self) -> &SchemaPath {
        &self.path
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Handlers that must run before this one.
    pub fn after(&self) -> &[SchemaPath] {
        &self.after
    }

    /// Handlers that must run after this one.
    pub fn before(&self) -> &[SchemaPath] {
        &self.before
    }

    /// Descendant nodes handled by this (subtree) handler.
    pub fn handled_children(&self) -> &[SchemaPath] {
        &self.handled_children
    }

    pub fn is_subtree(&self) -> bool {
        !self.handled_children.is_empty()
    }

    /// Declaration sequence number.
    pub fn sequence(&self) -> usize {
        self.sequence
    }

    /// True for handlers the registry inserted itself.
    pub fn is_implicit(&self) -> bool {
        self.implicit
    }
}

/// Collects registrations until `build()`.
pub struct RegistryBuilder<H> {
    kind: RegistryKind,
    registrations: Vec<Registration<H>>,
}

impl<H> RegistryBuilder<H> {
    fn new(kind: RegistryKind) -> Self {
        Self {
            kind,
            registrations: Vec::new(),
        }
    }

    pub fn kind(&self) -> RegistryKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Returns true if `path` is bound, directly or as a handled child.
    pub fn contains(&self, path: &SchemaPath) -> bool {
        let schema = path.schema();
        self.registrations
            .iter()
            .any(|r| r.path == schema || r.handled_children.contains(&schema))
    }

    fn push(
        &mut self,
        path: SchemaPath,
        handler: H,
        after: Vec<SchemaPath>,
        before: Vec<SchemaPath>,
        handled_children: Vec<SchemaPath>,
    ) -> Result<&mut Self, RegistryError> {
        let path = path.schema();
        for bound in std::iter::once(&path).chain(handled_children.iter()) {
            if self.contains(bound) {
                return Err(RegistryError::RegistrationConflict {
                    kind: self.kind,
                    path: bound.clone(),
                });
            }
        }
        log::debug!("registering {} for {}", self.kind, path);
        let sequence = self.registrations.len();
        self.registrations.push(Registration {
            path,
            handler,
            after: after.iter().map(SchemaPath::schema).collect(),
            before: before.iter().map(SchemaPath::schema).collect(),
            handled_children,
            sequence,
            implicit: false,
        });
        Ok(self)
    }

    /// Registers `handler` for `path`, running after every path in `after`.
    pub fn register(
        &mut self,
        path: SchemaPath,
        handler: H,
        after: impl IntoIterator<Item = SchemaPath>,
    ) -> Result<&mut Self, RegistryError> {
        self.push(path, handler, after.into_iter().collect(), Vec::new(), Vec::new())
    }

    /// Same as [`register`](Self::register).
    pub fn register_after(
        &mut self,
        path: SchemaPath,
        handler: H,
        after: impl IntoIterator<Item = SchemaPath>,
    ) -> Result<&mut Self, RegistryError> {
        self.register(path, handler, after)
    }

    /// Registers `handler` for `path`, running before every path in `before`.
    pub fn register_before(
        &mut self,
        path: SchemaPath,
        handler: H,
        before: impl IntoIterator<Item = SchemaPath>,
    ) -> Result<&mut Self, RegistryError> {
        self.push(path, handler, Vec::new(), before.into_iter().collect(), Vec::new())
    }

    /// Registers a subtree handler: changes to the `handled_children`
    /// (relative to `path`) are delivered to `handler` as a change of `path`.
    pub fn register_subtree(
        &mut self,
        path: SchemaPath,
        handled_children: impl IntoIterator<Item = SchemaPath>,
        handler: H,
        after: impl IntoIterator<Item = SchemaPath>,
    ) -> Result<&mut Self, RegistryError> {
        let root = path.schema();
        let children = handled_children
            .into_iter()
            .map(|child| root.concat(&child).schema())
            .collect();
        self.push(root, handler, after.into_iter().collect(), Vec::new(), children)
    }

    fn finish(self) -> Result<SubtreeRegistry<H>, RegistryError> {
        let kind = self.kind;
        let entries = self.registrations;
        let by_path: HashMap<SchemaPath, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, r)| (r.path.clone(), i))
            .collect();

        let mut edges = Vec::new();
        for (i, reg) in entries.iter().enumerate() {
            for dependency in &reg.after {
                let j = *by_path
                    .get(dependency)
                    .ok_or_else(|| RegistryError::UnresolvedDependency {
                        kind,
                        path: reg.path.clone(),
                        dependency: dependency.clone(),
                    })?;
                edges.push((i, j));
            }
            for dependent in &reg.before {
                let j = *by_path
                    .get(dependent)
                    .ok_or_else(|| RegistryError::UnresolvedDependency {
                        kind,
                        path: reg.path.clone(),
                        dependency: dependent.clone(),
                    })?;
                edges.push((j, i));
            }
            for (j, other) in entries.iter().enumerate() {
                if other.path.is_ancestor_of(&reg.path) {
                    edges.push((i, j));
                }
            }
        }

        let graph = DependencyGraph::build(kind, entries.iter().map(|r| r.path.clone()).collect(), edges)?;

        let mut subtree_children = HashMap::new();
        let mut children: HashMap<SchemaPath, Vec<usize>> = HashMap::new();
        for (i, reg) in entries.iter().enumerate() {
            for child in &reg.handled_children {
                subtree_children.insert(child.clone(), i);
            }
            if let Some(parent) = reg.path.parent() {
                children.entry(parent).or_default().push(i);
            }
        }
        for siblings in children.values_mut() {
            siblings.sort_by_key(|&i| graph.position(&entries[i].path));
        }

        log::info!("built {} registry with {} handlers", kind, entries.len());
        Ok(SubtreeRegistry {
            kind,
            entries,
            by_path,
            subtree_children,
            children,
            graph,
        })
    }
}

impl RegistryBuilder<Reader> {
    /// Creates an empty reader registry builder.
    pub fn readers() -> Self {
        Self::new(RegistryKind::Reader)
    }

    /// Builds the reader registry.
    ///
    /// Missing container ancestors of registered readers get a structural
    /// reader; a missing list ancestor is an unresolved dependency because
    /// nothing could enumerate its keys.
    pub fn build(mut self) -> Result<ReaderRegistry, RegistryError> {
        let registered: Vec<SchemaPath> = self.registrations.iter().map(|r| r.path.clone()).collect();
        for path in registered {
            for len in 1..path.len() {
                let ancestor = path.truncate(len);
                if self.contains(&ancestor) {
                    continue;
                }
                if ancestor.last().is_some_and(|s| s.is_list()) {
                    return Err(RegistryError::UnresolvedDependency {
                        kind: self.kind,
                        path,
                        dependency: ancestor,
                    });
                }
                log::debug!("inserting structural reader for {}", ancestor);
                let sequence = self.registrations.len();
                self.registrations.push(Registration {
                    path: ancestor,
                    handler: Reader::structural(),
                    after: Vec::new(),
                    before: Vec::new(),
                    handled_children: Vec::new(),
                    sequence,
                    implicit: true,
                });
            }
        }
        self.finish()
    }
}

impl RegistryBuilder<Arc<dyn WriterCustomizer>> {
    /// Creates an empty writer registry builder.
    pub fn writers() -> Self {
        Self::new(RegistryKind::Writer)
    }

    /// Builds the writer registry.
    pub fn build(self) -> Result<WriterRegistry, RegistryError> {
        self.finish()
    }
}

/// Immutable set of handlers with their dependency graph.
pub struct SubtreeRegistry<H> {
    kind: RegistryKind,
    entries: Vec<Registration<H>>,
    by_path: HashMap<SchemaPath, usize>,
    subtree_children: HashMap<SchemaPath, usize>,
    children: HashMap<SchemaPath, Vec<usize>>,
    graph: DependencyGraph,
}

impl<H> SubtreeRegistry<H> {
    pub fn kind(&self) -> RegistryKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registrations in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Registration<H>> {
        self.entries.iter()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Returns the handler registered for the schema form of `path`.
    pub fn lookup(&self, path: &SchemaPath) -> Option<&Registration<H>> {
        self.by_path.get(&path.schema()).map(|&i| &self.entries[i])
    }

    /// Resolves the handler responsible for a change at `path`.
    ///
    /// Returns the registration and the concrete path it must be invoked
    /// with: `path` itself for a direct registration, or `path` cut down to
    /// the subtree root when a subtree handler declares `path` (or one of its
    /// ancestors) as a handled child.
    pub fn resolve(&self, path: &SchemaPath) -> Option<(&Registration<H>, SchemaPath)> {
        let schema = path.schema();
        if let Some(&i) = self.by_path.get(&schema) {
            return Some((&self.entries[i], path.clone()));
        }
        (1..=schema.len()).rev().find_map(|len| {
            let &i = self.subtree_children.get(&schema.truncate(len))?;
            let reg = &self.entries[i];
            Some((reg, path.truncate(reg.path.len())))
        })
    }

    /// Direct child registrations of `path`, in dependency order.
    pub fn children(&self, path: &SchemaPath) -> Vec<&Registration<H>> {
        self.children
            .get(&path.schema())
            .map(|c| c.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }

    /// Orders handler paths, see [`DependencyGraph::order`].
    pub fn order<'a>(
        &self,
        handlers: impl IntoIterator<Item = &'a SchemaPath>,
        direction: OrderDirection,
    ) -> Result<Vec<SchemaPath>, RegistryError> {
        self.graph.order(handlers, direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customizer::NoopWriter;
    use pretty_assertions::assert_eq;

    fn p(s: &str) -> SchemaPath {
        s.parse().unwrap()
    }

    fn noop() -> Arc<dyn WriterCustomizer> {
        Arc::new(NoopWriter)
    }

    fn none() -> Vec<SchemaPath> {
        Vec::new()
    }

    fn order(registry: &WriterRegistry) -> Vec<String> {
        registry
            .graph()
            .full_order()
            .iter()
            .map(|p| p.to_string())
            .collect()
    }

    #[test]
    fn test_conflicting_registration() {
        let mut builder = WriterRegistryBuilder::writers();
        builder.register(p("/if[eth0]"), noop(), none()).unwrap();
        // the schema form is what counts
        let err = builder.register(p("/if[*]"), noop(), none()).err().unwrap();
        assert_eq!(
            err,
            RegistryError::RegistrationConflict {
                kind: RegistryKind::Writer,
                path: p("/if[*]"),
            }
        );
    }

    #[test]
    fn test_subtree_children_conflict() {
        let mut builder = WriterRegistryBuilder::writers();
        builder.register(p("/if[*]/ipv4"), noop(), none()).unwrap();
        let err = builder
            .register_subtree(p("/if[*]"), [p("/ipv4")], noop(), none())
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::RegistrationConflict { .. }));
    }

    #[test]
    fn test_implicit_parent_before_child() {
        let mut builder = WriterRegistryBuilder::writers();
        builder
            .register(p("/if[*]/sub-if[*]"), noop(), none())
            .unwrap()
            .register(p("/if[*]"), noop(), none())
            .unwrap();
        let registry = builder.build().unwrap();
        assert_eq!(order(&registry), vec!["/if[*]", "/if[*]/sub-if[*]"]);
    }

    #[test]
    fn test_declared_relations() {
        let mut builder = WriterRegistryBuilder::writers();
        builder
            .register(p("/route[*]"), noop(), [p("/vrf[*]")])
            .unwrap()
            .register(p("/vrf[*]"), noop(), none())
            .unwrap()
            .register_before(p("/acl[*]"), noop(), [p("/route[*]")])
            .unwrap();
        let registry = builder.build().unwrap();
        assert_eq!(order(&registry), vec!["/vrf[*]", "/acl[*]", "/route[*]"]);
    }

    #[test]
    fn test_unresolved_dependency() {
        let mut builder = WriterRegistryBuilder::writers();
        builder.register(p("/route[*]"), noop(), [p("/vrf[*]")]).unwrap();
        let err = builder.build().err().unwrap();
        assert_eq!(
            err,
            RegistryError::UnresolvedDependency {
                kind: RegistryKind::Writer,
                path: p("/route[*]"),
                dependency: p("/vrf[*]"),
            }
        );
    }

    #[test]
    fn test_declared_cycle_is_rejected() {
        let mut builder = WriterRegistryBuilder::writers();
        builder
            .register(p("/a"), noop(), [p("/b")])
            .unwrap()
            .register(p("/b"), noop(), [p("/c")])
            .unwrap()
            .register(p("/c"), noop(), [p("/a")])
            .unwrap();
        let err = builder.build().err().unwrap();
        assert_eq!(err.cycle(), Some(&[p("/a"), p("/b"), p("/c")][..]));
    }

    #[test]
    fn test_child_declared_before_parent_is_cycle() {
        let mut builder = WriterRegistryBuilder::writers();
        builder
            .register(p("/if[*]"), noop(), none())
            .unwrap()
            .register_before(p("/if[*]/sub-if[*]"), noop(), [p("/if[*]")])
            .unwrap();
        let err = builder.build().err().unwrap();
        assert_eq!(err.cycle(), Some(&[p("/if[*]"), p("/if[*]/sub-if[*]")][..]));
    }

    #[test]
    fn test_resolve_direct_and_subtree() {
        let mut builder = WriterRegistryBuilder::writers();
        builder
            .register(p("/if[*]"), noop(), none())
            .unwrap()
            .register_subtree(
                p("/if[*]/ipv4"),
                [p("/address[*]"), p("/neighbor[*]")],
                noop(),
                none(),
            )
            .unwrap();
        let registry = builder.build().unwrap();

        let (reg, at) = registry.resolve(&p("/if[eth0]")).unwrap();
        assert_eq!(reg.path(), &p("/if[*]"));
        assert_eq!(at, p("/if[eth0]"));

        let (reg, at) = registry.resolve(&p("/if[eth0]/ipv4/address[10.0.0.1]")).unwrap();
        assert_eq!(reg.path(), &p("/if[*]/ipv4"));
        assert!(reg.is_subtree());
        assert_eq!(at, p("/if[eth0]/ipv4"));

        // below a handled child
        let (_, at) = registry
            .resolve(&p("/if[eth0]/ipv4/neighbor[10.0.0.2]/state"))
            .unwrap();
        assert_eq!(at, p("/if[eth0]/ipv4"));

        assert!(registry.resolve(&p("/if[eth0]/ipv6")).is_none());
    }

    #[test]
    fn test_reader_structural_ancestors() {
        let mut builder = ReaderRegistryBuilder::readers();
        builder
            .register(p("/interfaces/interface[*]"), Reader::structural(), none())
            .unwrap()
            .register(p("/interfaces/interface[*]/state/counters"), Reader::structural(), none())
            .unwrap();
        let registry = builder.build().unwrap();

        assert_eq!(registry.len(), 4);
        assert!(registry.lookup(&p("/interfaces")).unwrap().is_implicit());
        assert!(registry.lookup(&p("/interfaces/interface[eth0]/state")).unwrap().is_implicit());
        assert!(!registry.lookup(&p("/interfaces/interface[*]")).unwrap().is_implicit());

        let children: Vec<String> = registry
            .children(&p("/interfaces/interface[eth0]"))
            .iter()
            .map(|r| r.path().to_string())
            .collect();
        assert_eq!(children, vec!["/interfaces/interface[*]/state"]);
        assert_eq!(registry.children(&SchemaPath::root()).len(), 1);
    }

    #[test]
    fn test_reader_missing_list_ancestor() {
        let mut builder = ReaderRegistryBuilder::readers();
        builder
            .register(p("/interfaces/interface[*]/state"), Reader::structural(), none())
            .unwrap();
        let err = builder.build().err().unwrap();
        assert!(matches!(err, RegistryError::UnresolvedDependency { .. }));
    }

    #[test]
    fn test_sibling_children_follow_dependencies() {
        let mut builder = ReaderRegistryBuilder::readers();
        builder
            .register(p("/if"), Reader::structural(), none())
            .unwrap()
            .register(p("/if/b"), Reader::structural(), [p("/if/c")])
            .unwrap()
            .register(p("/if/a"), Reader::structural(), none())
            .unwrap()
            .register(p("/if/c"), Reader::structural(), none())
            .unwrap();
        let registry = builder.build().unwrap();
        let children: Vec<String> = registry
            .children(&p("/if"))
            .iter()
            .map(|r| r.path().to_string())
            .collect();
        assert_eq!(children, vec!["/if/c", "/if/b", "/if/a"]);
    }
}
