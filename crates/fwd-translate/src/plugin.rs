//! Registration-time wiring of per-technology plugins.
//!
//! Plugins register their writers, readers and naming domains into one
//! [`PluginRegistry`]; [`PluginRegistry::build`] validates the registries
//! and produces the [`Translator`] the agent serves requests with.

use crate::customizer::{Reader, WriterCustomizer};
use crate::error::RegistryError;
use crate::naming::{DomainContext, MappingStore};
use crate::read::ReadEngine;
use crate::registry::{ReaderRegistryBuilder, WriterRegistryBuilder};
use crate::write::WriteEngine;
use fwd_types::SchemaPath;
use std::path::PathBuf;
use std::sync::Arc;

/// Collects registrations from every plugin.
pub struct PluginRegistry {
    writers: WriterRegistryBuilder,
    readers: ReaderRegistryBuilder,
    mappings: Arc<MappingStore>,
    persist_dir: Option<PathBuf>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::with_mappings(Arc::new(MappingStore::new()))
    }

    /// Uses an existing mapping store, e.g. one loaded from disk.
    pub fn with_mappings(mappings: Arc<MappingStore>) -> Self {
        Self {
            writers: WriterRegistryBuilder::writers(),
            readers: ReaderRegistryBuilder::readers(),
            mappings,
            persist_dir: None,
        }
    }

    /// Persists the mapping store to `dir` after every commit.
    pub fn persist_to(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.persist_dir = Some(dir.into());
        self
    }

    pub fn writers(&mut self) -> &mut WriterRegistryBuilder {
        &mut self.writers
    }

    pub fn readers(&mut self) -> &mut ReaderRegistryBuilder {
        &mut self.readers
    }

    pub fn mappings(&self) -> &Arc<MappingStore> {
        &self.mappings
    }

    /// Declares a naming domain. Domains already in the store (loaded from
    /// disk) are kept as they are.
    pub fn add_domain(&mut self, ctx: impl Into<DomainContext>) -> &mut Self {
        let ctx = ctx.into();
        let domain = ctx.domain().to_string();
        if !self.mappings.register(ctx) {
            log::debug!("naming domain {} already present", domain);
        }
        self
    }

    /// Shorthand for registering a writer with `after` dependencies.
    pub fn add_writer(
        &mut self,
        path: SchemaPath,
        writer: impl WriterCustomizer + 'static,
        after: impl IntoIterator<Item = SchemaPath>,
    ) -> Result<&mut Self, RegistryError> {
        self.writers.register(path, Arc::new(writer), after)?;
        Ok(self)
    }

    /// Shorthand for registering a reader with `after` dependencies.
    pub fn add_reader(
        &mut self,
        path: SchemaPath,
        reader: Reader,
        after: impl IntoIterator<Item = SchemaPath>,
    ) -> Result<&mut Self, RegistryError> {
        self.readers.register(path, reader, after)?;
        Ok(self)
    }

    /// Builds both registries and the engines over them.
    pub fn build(self) -> Result<Translator, RegistryError> {
        let writers = Arc::new(self.writers.build()?);
        let readers = Arc::new(self.readers.build()?);
        let mut write = WriteEngine::new(writers, Arc::clone(&self.mappings));
        if let Some(dir) = self.persist_dir {
            write = write.with_persistence(dir);
        }
        let read = ReadEngine::new(readers, Arc::clone(&self.mappings));
        Ok(Translator {
            write,
            read,
            mappings: self.mappings,
        })
    }
}

/// The built translation layer.
pub struct Translator {
    write: WriteEngine,
    read: ReadEngine,
    mappings: Arc<MappingStore>,
}

impl Translator {
    pub fn write(&self) -> &WriteEngine {
        &self.write
    }

    pub fn read(&self) -> &ReadEngine {
        &self.read
    }

    pub fn mappings(&self) -> &Arc<MappingStore> {
        &self.mappings
    }
}
