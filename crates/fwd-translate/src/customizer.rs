//! The customizer SPI: what a per-technology plugin implements.
//!
//! A writer customizer translates node changes into engine calls; a reader
//! customizer translates engine state back into node values. Values are
//! plain JSON ([`serde_json::Value`]) shaped like the modeled node.
//!
//! # Write lifecycle
//!
//! For one transaction the engine calls `validate` on every affected writer,
//! then `create`/`update`/`delete` in dependency order. When a later step
//! fails, already executed steps are compensated with the inverse call
//! (`delete` for a create, `update(after, before)` for an update, `create`
//! for a delete). Writers that cannot update or delete keep the default
//! implementations, which report [`CustomizerError::Unsupported`].
//!
//! # Read lifecycle
//!
//! For each node the engine creates a `builder`, lets the reader fill it in
//! `read_current_attributes`, reads the child readers and merges their
//! values into the builder, and finally asks `is_present`.

use crate::context::{ReadContext, WriteContext};
use crate::error::{CustomizerError, CustomizerResult};
use async_trait::async_trait;
use fwd_types::SchemaPath;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Translates changes of one schema node into engine calls.
#[async_trait]
pub trait WriterCustomizer: Send + Sync {
    /// Checks a change before anything is executed. A rejection aborts the
    /// transaction without any engine call.
    async fn validate(
        &self,
        _path: &SchemaPath,
        _before: Option<&Value>,
        _after: Option<&Value>,
        _ctx: &WriteContext,
    ) -> CustomizerResult<()> {
        Ok(())
    }

    /// Creates the node.
    async fn create(&self, path: &SchemaPath, data: &Value, ctx: &WriteContext) -> CustomizerResult<()>;

    /// Updates the node in place.
    async fn update(
        &self,
        path: &SchemaPath,
        _before: &Value,
        _after: &Value,
        _ctx: &WriteContext,
    ) -> CustomizerResult<()> {
        Err(CustomizerError::unsupported("update", path))
    }

    /// Deletes the node; `data` is its value before deletion.
    async fn delete(&self, path: &SchemaPath, _data: &Value, _ctx: &WriteContext) -> CustomizerResult<()> {
        Err(CustomizerError::unsupported("delete", path))
    }
}

/// Reads one schema node.
#[async_trait]
pub trait ReaderCustomizer: Send + Sync {
    /// Returns a fresh builder for the node at `path`.
    fn builder(&self, _path: &SchemaPath) -> Value {
        Value::Object(Map::new())
    }

    /// Fills the node's own attributes into `builder`.
    ///
    /// Returning an empty-dump error means the node does not exist.
    async fn read_current_attributes(
        &self,
        path: &SchemaPath,
        builder: &mut Value,
        ctx: &ReadContext,
    ) -> CustomizerResult<()>;

    /// Merges this node's value into its parent's builder.
    fn merge(&self, parent: &mut Value, path: &SchemaPath, value: Value) {
        if let (Value::Object(fields), Some(segment)) = (parent, path.last()) {
            fields.insert(segment.name().to_string(), value);
        }
    }

    /// Returns false if the read node does not exist and must be omitted.
    fn is_present(&self, builder: &Value) -> bool {
        match builder {
            Value::Null => false,
            Value::Object(fields) => !fields.is_empty(),
            _ => true,
        }
    }
}

/// Reads a keyed list node.
#[async_trait]
pub trait ListReaderCustomizer: ReaderCustomizer {
    /// Returns the key of every instance under `path`, whose last segment is
    /// the wildcarded list and whose ancestors are concrete.
    async fn all_ids(&self, path: &SchemaPath, ctx: &ReadContext) -> CustomizerResult<Vec<String>>;

    /// Merges the read list elements into the parent's builder. Nothing is
    /// merged for an empty list.
    fn merge_list(&self, parent: &mut Value, path: &SchemaPath, values: Vec<Value>) {
        if values.is_empty() {
            return;
        }
        if let (Value::Object(fields), Some(segment)) = (parent, path.last()) {
            fields.insert(segment.name().to_string(), Value::Array(values));
        }
    }
}

/// A registered reader: scalar (container) or list.
#[derive(Clone)]
pub enum Reader {
    Scalar(Arc<dyn ReaderCustomizer>),
    List(Arc<dyn ListReaderCustomizer>),
}

impl Reader {
    /// Wraps a scalar reader.
    pub fn scalar(reader: impl ReaderCustomizer + 'static) -> Self {
        Reader::Scalar(Arc::new(reader))
    }

    /// Wraps a list reader.
    pub fn list(reader: impl ListReaderCustomizer + 'static) -> Self {
        Reader::List(Arc::new(reader))
    }

    /// A no-op container reader that only hosts child readers.
    pub fn structural() -> Self {
        Reader::Scalar(Arc::new(StructuralReader))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Reader::List(_))
    }

    pub fn builder(&self, path: &SchemaPath) -> Value {
        match self {
            Reader::Scalar(r) => r.builder(path),
            Reader::List(r) => r.builder(path),
        }
    }

    pub async fn read_current_attributes(
        &self,
        path: &SchemaPath,
        builder: &mut Value,
        ctx: &ReadContext,
    ) -> CustomizerResult<()> {
        match self {
            Reader::Scalar(r) => r.read_current_attributes(path, builder, ctx).await,
            Reader::List(r) => r.read_current_attributes(path, builder, ctx).await,
        }
    }

    pub fn merge(&self, parent: &mut Value, path: &SchemaPath, value: Value) {
        match self {
            Reader::Scalar(r) => r.merge(parent, path, value),
            Reader::List(r) => r.merge(parent, path, value),
        }
    }

    pub fn is_present(&self, builder: &Value) -> bool {
        match self {
            Reader::Scalar(r) => r.is_present(builder),
            Reader::List(r) => r.is_present(builder),
        }
    }
}

/// Writer for nodes that need no engine calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWriter;

#[async_trait]
impl WriterCustomizer for NoopWriter {
    async fn create(&self, path: &SchemaPath, _data: &Value, _ctx: &WriteContext) -> CustomizerResult<()> {
        log::trace!("noop create {}", path);
        Ok(())
    }

    async fn update(
        &self,
        path: &SchemaPath,
        _before: &Value,
        _after: &Value,
        _ctx: &WriteContext,
    ) -> CustomizerResult<()> {
        log::trace!("noop update {}", path);
        Ok(())
    }

    async fn delete(&self, path: &SchemaPath, _data: &Value, _ctx: &WriteContext) -> CustomizerResult<()> {
        log::trace!("noop delete {}", path);
        Ok(())
    }
}

/// Container reader without attributes of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralReader;

#[async_trait]
impl ReaderCustomizer for StructuralReader {
    async fn read_current_attributes(
        &self,
        _path: &SchemaPath,
        _builder: &mut Value,
        _ctx: &ReadContext,
    ) -> CustomizerResult<()> {
        Ok(())
    }
}

/// Computes a node's attributes from its path.
pub type Accessor = Arc<dyn Fn(&SchemaPath, &ReadContext) -> CustomizerResult<Option<Value>> + Send + Sync>;

/// Reader whose attributes come from an accessor function.
///
/// The accessor returns `None` when the node does not exist; object values
/// are merged field by field into the builder, other values replace it.
#[derive(Clone)]
pub struct AccessorReader {
    accessor: Accessor,
}

impl AccessorReader {
    pub fn new(
        accessor: impl Fn(&SchemaPath, &ReadContext) -> CustomizerResult<Option<Value>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            accessor: Arc::new(accessor),
        }
    }
}

#[async_trait]
impl ReaderCustomizer for AccessorReader {
    async fn read_current_attributes(
        &self,
        path: &SchemaPath,
        builder: &mut Value,
        ctx: &ReadContext,
    ) -> CustomizerResult<()> {
        match ((self.accessor)(path, ctx)?, builder) {
            (None, _) => Ok(()),
            (Some(Value::Object(attrs)), Value::Object(fields)) => {
                fields.extend(attrs);
                Ok(())
            }
            (Some(value), builder) => {
                *builder = value;
                Ok(())
            }
        }
    }
}
