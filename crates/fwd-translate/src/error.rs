//! Error taxonomy of the translation engine.
//!
//! Errors are layered: customizers return [`CustomizerError`], which wraps
//! RPC, dump and naming failures. The engines wrap customizer errors with
//! the path they occurred at ([`WriteError`], [`ReadError`]). Registry errors
//! only occur at startup.

use crate::diff::ChangeKind;
use crate::write::RollbackReport;
use fwd_rpc::RpcError;
use fwd_types::SchemaPath;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Which of the two independent registries an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    Reader,
    Writer,
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryKind::Reader => f.write_str("reader"),
            RegistryKind::Writer => f.write_str("writer"),
        }
    }
}

fn join_paths(paths: &[SchemaPath]) -> String {
    paths
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised while building a registry. All of them are fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The path is already bound in this registry.
    #[error("{kind} already registered for {path}")]
    RegistrationConflict { kind: RegistryKind, path: SchemaPath },

    /// The declared dependencies contain a cycle.
    #[error("{kind} dependency cycle among: {}", join_paths(.paths))]
    DependencyCycle {
        kind: RegistryKind,
        paths: Vec<SchemaPath>,
    },

    /// A declared dependency names a path nobody registered.
    #[error("{kind} {path} depends on unregistered {dependency}")]
    UnresolvedDependency {
        kind: RegistryKind,
        path: SchemaPath,
        dependency: SchemaPath,
    },
}

impl RegistryError {
    /// Returns the paths on the cycle for DependencyCycle errors.
    pub fn cycle(&self) -> Option<&[SchemaPath]> {
        match self {
            RegistryError::DependencyCycle { paths, .. } => Some(paths),
            _ => None,
        }
    }
}

/// Errors of the naming/mapping contexts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The name is already bound to another index.
    #[error("{domain}: name '{name}' already mapped to index {existing}, cannot map to {requested}")]
    NameConflict {
        domain: String,
        name: String,
        existing: u32,
        requested: u32,
    },

    /// The index is already bound to another name.
    #[error("{domain}: index {index} already mapped to '{existing}', cannot map to '{requested}'")]
    HandleConflict {
        domain: String,
        index: u32,
        existing: String,
        requested: String,
    },

    /// No mapping exists.
    #[error("{domain}: no mapping for {what}")]
    NotFound { domain: String, what: String },

    /// The mapping domain was never registered.
    #[error("unknown mapping domain '{domain}'")]
    UnknownDomain { domain: String },

    /// The index is below the domain's start index.
    #[error("{domain}: index {index} is below start index {start}")]
    IndexBelowStart { domain: String, index: u32, start: u32 },

    /// No index is left above the highest one in use.
    #[error("{domain}: no free index after {last}")]
    Exhausted { domain: String, last: u32 },

    /// Loading or saving a domain failed.
    #[error("{domain}: persistence failed: {reason}")]
    Persistence { domain: String, reason: String },
}

impl ContextError {
    pub fn not_found(domain: impl Into<String>, what: impl Into<String>) -> Self {
        ContextError::NotFound {
            domain: domain.into(),
            what: what.into(),
        }
    }

    pub fn exhausted(domain: impl Into<String>, last: u32) -> Self {
        ContextError::Exhausted {
            domain: domain.into(),
            last,
        }
    }

    pub fn unknown_domain(domain: impl Into<String>) -> Self {
        ContextError::UnknownDomain {
            domain: domain.into(),
        }
    }

    pub fn persistence(domain: impl Into<String>, reason: impl ToString) -> Self {
        ContextError::Persistence {
            domain: domain.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true for name or handle conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ContextError::NameConflict { .. } | ContextError::HandleConflict { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ContextError::NotFound { .. })
    }
}

/// Errors of bulk dumps.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DumpError {
    /// The engine returned a null reply: nothing exists.
    #[error("dump {key} returned no data")]
    Empty { key: String },

    /// The dump did not complete in time.
    #[error("dump {key} timed out after {timeout_ms} ms")]
    Timeout { key: String, timeout_ms: u64 },

    /// The dump call failed.
    #[error("dump {key} failed: {reason}")]
    CallFailed { key: String, reason: String },
}

impl DumpError {
    pub fn empty(key: impl ToString) -> Self {
        DumpError::Empty {
            key: key.to_string(),
        }
    }

    pub fn call_failed(key: impl ToString, reason: impl ToString) -> Self {
        DumpError::CallFailed {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Maps an RPC failure of the dump identified by `key`.
    pub fn from_rpc(key: impl ToString, err: RpcError) -> Self {
        let key = key.to_string();
        match err {
            RpcError::EmptyReply { .. } => DumpError::Empty { key },
            RpcError::Timeout { timeout_ms, .. } => DumpError::Timeout { key, timeout_ms },
            other => DumpError::CallFailed {
                key,
                reason: other.to_string(),
            },
        }
    }

    /// Returns true for the tolerated "nothing exists" outcome.
    pub fn is_empty(&self) -> bool {
        matches!(self, DumpError::Empty { .. })
    }
}

/// The error every customizer returns.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CustomizerError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Dump(#[from] DumpError),

    #[error(transparent)]
    Context(#[from] ContextError),

    /// The data is not acceptable for this handler.
    #[error("invalid data at {path}: {reason}")]
    Invalid { path: SchemaPath, reason: String },

    /// The handler does not implement the operation.
    #[error("{operation} is not supported for {path}")]
    Unsupported { operation: String, path: SchemaPath },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CustomizerError {
    pub fn invalid(path: &SchemaPath, reason: impl Into<String>) -> Self {
        CustomizerError::Invalid {
            path: path.clone(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(operation: impl Into<String>, path: &SchemaPath) -> Self {
        CustomizerError::Unsupported {
            operation: operation.into(),
            path: path.clone(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CustomizerError::Internal {
            message: message.into(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, CustomizerError::Unsupported { .. })
    }

    /// Returns true if the error stands for an empty dump.
    pub fn is_empty_dump(&self) -> bool {
        match self {
            CustomizerError::Dump(e) => e.is_empty(),
            CustomizerError::Rpc(e) => e.is_empty_reply(),
            _ => false,
        }
    }
}

/// Result type of customizer operations.
pub type CustomizerResult<T> = Result<T, CustomizerError>;

/// Errors of a write transaction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WriteError {
    /// A changed path has no registered writer. Nothing was invoked.
    #[error("no writer registered for {path}")]
    NoWriter { path: SchemaPath },

    /// The diff cannot be applied as given. Nothing was invoked.
    #[error("invalid change at {path}: {reason}")]
    InvalidChange { path: SchemaPath, reason: String },

    /// A writer rejected the data during validation. Nothing was invoked.
    #[error("validation of {path} failed")]
    ValidationFailed {
        transaction_id: Uuid,
        path: SchemaPath,
        #[source]
        source: CustomizerError,
    },

    /// An execute step failed; the earlier steps were rolled back.
    #[error("{kind} of {path} failed ({})", .rollback.status)]
    WriteFailed {
        transaction_id: Uuid,
        path: SchemaPath,
        kind: ChangeKind,
        #[source]
        source: CustomizerError,
        rollback: RollbackReport,
    },

    /// Handlers could not be ordered.
    #[error(transparent)]
    Ordering(#[from] RegistryError),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl WriteError {
    pub fn internal(message: impl Into<String>) -> Self {
        WriteError::Internal {
            message: message.into(),
        }
    }

    /// Returns the path the transaction failed at.
    pub fn path(&self) -> Option<&SchemaPath> {
        match self {
            WriteError::NoWriter { path }
            | WriteError::InvalidChange { path, .. }
            | WriteError::ValidationFailed { path, .. }
            | WriteError::WriteFailed { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Returns the rollback report of a failed execute pass.
    pub fn rollback(&self) -> Option<&RollbackReport> {
        match self {
            WriteError::WriteFailed { rollback, .. } => Some(rollback),
            _ => None,
        }
    }

    /// Renders the error, its causes and the rollback outcome, one per line.
    pub fn cause_chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str("\n  caused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        if let Some(rollback) = self.rollback() {
            for record in &rollback.reverted {
                out.push_str(&format!("\n  revert {}", record));
            }
        }
        out
    }
}

/// Result type of write transactions.
pub type WriteResult<T> = Result<T, WriteError>;

/// Errors of a read.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadError {
    /// No reader is registered for the requested path.
    #[error("no reader registered for {path}")]
    NoReader { path: SchemaPath },

    /// Reading the subtree rooted at `path` failed.
    #[error("read of {path} failed: {source}")]
    ReadFailed {
        path: SchemaPath,
        source: CustomizerError,
    },
}

impl ReadError {
    pub fn path(&self) -> &SchemaPath {
        match self {
            ReadError::NoReader { path } | ReadError::ReadFailed { path, .. } => path,
        }
    }
}

/// Result type of reads.
pub type ReadResult<T> = Result<T, ReadError>;
