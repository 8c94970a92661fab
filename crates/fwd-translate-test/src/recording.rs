//! Writers that record their invocations

use async_trait::async_trait;
use fwd_translate::{CustomizerError, CustomizerResult, WriteContext, WriterCustomizer};
use fwd_types::SchemaPath;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Writer operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Validate,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Validate => "validate",
            Op::Create => "create",
            Op::Update => "update",
            Op::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One recorded writer call
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Name of the writer
    pub writer: String,
    pub op: Op,
    pub path: SchemaPath,
    /// Data the writer received (after image; before image for deletes)
    pub data: Option<Value>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.writer, self.op, self.path)
    }
}

/// Invocation log shared by several writers
#[derive(Debug, Clone, Default)]
pub struct Trace {
    entries: Arc<Mutex<Vec<Invocation>>>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Invocation>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, invocation: Invocation) {
        log::trace!("recorded {}", invocation);
        self.lock().push(invocation);
    }

    /// All invocations in call order
    pub fn entries(&self) -> Vec<Invocation> {
        self.lock().clone()
    }

    /// Invocations rendered as `"<writer> <op> <path>"`, validations excluded
    pub fn executed(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|i| i.op != Op::Validate)
            .map(ToString::to_string)
            .collect()
    }

    /// Number of invocations of `op`
    pub fn count(&self, op: Op) -> usize {
        self.lock().iter().filter(|i| i.op == op).count()
    }

    /// Returns true if `path` was ever passed to a writer with `op`
    pub fn invoked(&self, op: Op, path: &SchemaPath) -> bool {
        self.lock().iter().any(|i| i.op == op && i.path == *path)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Writer that records every call and fails on request
pub struct RecordingWriter {
    name: String,
    trace: Trace,
    failing: Mutex<HashSet<(Op, Option<SchemaPath>)>>,
    unsupported: HashSet<Op>,
}

impl RecordingWriter {
    /// Create a writer recording into `trace`
    pub fn new(name: impl Into<String>, trace: &Trace) -> Self {
        Self {
            name: name.into(),
            trace: trace.clone(),
            failing: Mutex::new(HashSet::new()),
            unsupported: HashSet::new(),
        }
    }

    /// Fail every call of `op`; `Op::Validate` turns into a rejection
    pub fn failing(self, op: Op) -> Self {
        self.lock_failing().insert((op, None));
        self
    }

    /// Fail calls of `op` for `path` only
    pub fn failing_at(self, op: Op, path: SchemaPath) -> Self {
        self.lock_failing().insert((op, Some(path)));
        self
    }

    /// Report `op` as unsupported, like a writer keeping the default
    pub fn without(mut self, op: Op) -> Self {
        self.unsupported.insert(op);
        self
    }

    /// Stop failing any operation
    pub fn heal(&self) {
        self.lock_failing().clear();
    }

    fn lock_failing(&self) -> MutexGuard<'_, HashSet<(Op, Option<SchemaPath>)>> {
        self.failing.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn call(&self, op: Op, path: &SchemaPath, data: Option<&Value>) -> CustomizerResult<()> {
        self.trace.record(Invocation {
            writer: self.name.clone(),
            op,
            path: path.clone(),
            data: data.cloned(),
        });
        if self.unsupported.contains(&op) {
            return Err(CustomizerError::unsupported(op.to_string(), path));
        }
        let failing = self.lock_failing();
        if failing.contains(&(op, None)) || failing.contains(&(op, Some(path.clone()))) {
            return Err(match op {
                Op::Validate => CustomizerError::invalid(path, format!("rejected by {}", self.name)),
                _ => CustomizerError::internal(format!("{} {} failed in {}", op, path, self.name)),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WriterCustomizer for RecordingWriter {
    async fn validate(
        &self,
        path: &SchemaPath,
        _before: Option<&Value>,
        after: Option<&Value>,
        _ctx: &WriteContext,
    ) -> CustomizerResult<()> {
        self.call(Op::Validate, path, after)
    }

    async fn create(&self, path: &SchemaPath, data: &Value, _ctx: &WriteContext) -> CustomizerResult<()> {
        self.call(Op::Create, path, Some(data))
    }

    async fn update(
        &self,
        path: &SchemaPath,
        _before: &Value,
        after: &Value,
        _ctx: &WriteContext,
    ) -> CustomizerResult<()> {
        self.call(Op::Update, path, Some(after))
    }

    async fn delete(&self, path: &SchemaPath, data: &Value, _ctx: &WriteContext) -> CustomizerResult<()> {
        self.call(Op::Delete, path, Some(data))
    }
}
