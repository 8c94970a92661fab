//! Data-tree reconciliation engine.
//!
//! This crate translates changes of a modeled data tree into ordered calls
//! against the forwarding engine, and engine state back into data-tree
//! nodes:
//!
//! - [`WriterCustomizer`] / [`ReaderCustomizer`]: per-technology handlers
//! - [`PluginRegistry`]: collects handlers and naming domains at startup
//! - [`WriteEngine`]: validate/execute write transactions with rollback
//! - [`ReadEngine`]: recursive reads with per-transaction dump caching
//! - [`MappingStore`]: name <-> index mappings shared by all handlers
//!
//! # Architecture
//!
//! 1. Plugins register writers and readers against schema paths, with
//!    optional ordering constraints between them
//! 2. The registries are validated once (no conflicts, no cycles) and frozen
//! 3. A write resolves each changed path to its writer, orders the writers
//!    by dependency, validates every change, then executes them one by one
//! 4. If a step fails, the executed steps are compensated in reverse order
//!    and the staged name mappings are discarded
//! 5. A read expands wildcards through list readers and merges the child
//!    readers' values into each node
//!
//! # Example
//!
//! ```ignore
//! use fwd_translate::{DataTreeDiff, PluginRegistry};
//!
//! let mut plugins = PluginRegistry::new();
//! interfaces::register(&mut plugins, client.clone())?;
//! let translator = plugins.build()?;
//!
//! let diff = DataTreeDiff::default().create("/interfaces/interface[eth0]".parse()?, json!({"mtu": 9000}));
//! let report = translator.write().commit(diff).await?;
//! ```

mod cache;
mod context;
mod customizer;
mod diff;
mod dump;
mod error;
mod graph;
mod naming;
mod plugin;
mod read;
mod registry;
mod write;

pub use cache::ModificationCache;
pub use context::{ReadContext, WriteContext};
pub use customizer::{
    Accessor, AccessorReader, ListReaderCustomizer, NoopWriter, Reader, ReaderCustomizer, StructuralReader,
    WriterCustomizer,
};
pub use diff::{ChangeKind, DataChange, DataImage, DataTreeDiff};
pub use dump::{CacheKey, DumpCache, DumpExecutor, DumpManager, DumpManagerBuilder, DumpParams, KeyFactory, PostProcess};
pub use error::{
    ContextError, CustomizerError, CustomizerResult, DumpError, ReadError, ReadResult, RegistryError, RegistryKind,
    WriteError, WriteResult,
};
pub use graph::{DependencyGraph, OrderDirection};
pub use naming::{DomainContext, MappingStore, MultiNamingContext, NamingContext, StagedMappings};
pub use plugin::{PluginRegistry, Translator};
pub use read::{ReadEngine, ReadNode, ReadOutput, ReadTransaction};
pub use registry::{
    ReaderRegistry, ReaderRegistryBuilder, Registration, RegistryBuilder, SubtreeRegistry, WriterRegistry,
    WriterRegistryBuilder,
};
pub use write::{
    CommitReport, RevertOutcome, RevertRecord, RollbackReport, RollbackStatus, TransactionState, WriteEngine,
    WriteStep, WriteTransaction,
};

pub use fwd_types::SchemaPath;
