//! Readers and dump executors backed by in-memory data

use async_trait::async_trait;
use fwd_translate::{
    CustomizerError, CustomizerResult, DumpError, DumpExecutor, ListReaderCustomizer, ReadContext, ReaderCustomizer,
};
use fwd_types::SchemaPath;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Scalar reader returning fixed values per concrete path
///
/// Paths without a value read as absent.
#[derive(Debug, Clone, Default)]
pub struct FixedReader {
    values: BTreeMap<SchemaPath, Value>,
    reads: Arc<AtomicUsize>,
}

impl FixedReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the value of one node
    pub fn with(mut self, path: SchemaPath, value: Value) -> Self {
        self.values.insert(path, value);
        self
    }

    /// Number of `read_current_attributes` calls so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReaderCustomizer for FixedReader {
    async fn read_current_attributes(
        &self,
        path: &SchemaPath,
        builder: &mut Value,
        _ctx: &ReadContext,
    ) -> CustomizerResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match (self.values.get(path), builder) {
            (None, _) => {}
            (Some(Value::Object(attrs)), Value::Object(fields)) => {
                fields.extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            (Some(value), builder) => *builder = value.clone(),
        }
        Ok(())
    }
}

/// List reader over a fixed set of instances
///
/// `all_ids` lists the keys of the instances matching the wildcarded path;
/// an empty result is reported as an empty dump.
#[derive(Debug, Clone, Default)]
pub struct FixedListReader {
    inner: FixedReader,
}

impl FixedListReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one list instance
    pub fn with(mut self, path: SchemaPath, value: Value) -> Self {
        self.inner = self.inner.with(path, value);
        self
    }

    pub fn reads(&self) -> usize {
        self.inner.reads()
    }
}

#[async_trait]
impl ReaderCustomizer for FixedListReader {
    async fn read_current_attributes(
        &self,
        path: &SchemaPath,
        builder: &mut Value,
        ctx: &ReadContext,
    ) -> CustomizerResult<()> {
        self.inner.read_current_attributes(path, builder, ctx).await
    }
}

#[async_trait]
impl ListReaderCustomizer for FixedListReader {
    async fn all_ids(&self, path: &SchemaPath, _ctx: &ReadContext) -> CustomizerResult<Vec<String>> {
        let ids: Vec<String> = self
            .inner
            .values
            .keys()
            .filter(|instance| instance.matches(path))
            .filter_map(|instance| instance.last().and_then(|s| s.exact_key()).map(str::to_string))
            .collect();
        if ids.is_empty() {
            return Err(DumpError::empty(path).into());
        }
        Ok(ids)
    }
}

/// Reader that always fails
#[derive(Debug, Clone)]
pub struct FailingReader {
    reason: String,
}

impl FailingReader {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl ReaderCustomizer for FailingReader {
    async fn read_current_attributes(
        &self,
        path: &SchemaPath,
        _builder: &mut Value,
        _ctx: &ReadContext,
    ) -> CustomizerResult<()> {
        Err(CustomizerError::invalid(path, self.reason.clone()))
    }
}

/// Dump executor returning canned results and counting its calls
///
/// Results are looked up by the first exact key of the dumped path, so one
/// executor can serve a per-interface dump.
pub struct CountingDumpExecutor<T> {
    results: BTreeMap<String, T>,
    calls: AtomicUsize,
}

impl<T: Clone> CountingDumpExecutor<T> {
    pub fn new() -> Self {
        Self {
            results: BTreeMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Result of dumps under the list instance with key `key`
    pub fn with(mut self, key: impl Into<String>, result: T) -> Self {
        self.results.insert(key.into(), result);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<T: Clone> Default for CountingDumpExecutor<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T, P> DumpExecutor<T, P> for CountingDumpExecutor<T>
where
    T: Clone + Send + Sync,
    P: Send + Sync,
{
    async fn execute(&self, path: &SchemaPath, _params: &P) -> Result<T, DumpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = path
            .segments()
            .iter()
            .find_map(|s| s.exact_key())
            .unwrap_or_default();
        self.results
            .get(key)
            .cloned()
            .ok_or_else(|| DumpError::empty(path))
    }
}
