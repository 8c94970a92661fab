//! Audit records for configuration transactions.
//!
//! Every commit, rollback and lifecycle step of the agent produces one
//! structured [`AuditRecord`]. Records are emitted through `tracing` on the
//! `audit` target, so they reach whichever backend the agent initialized:
//! `env_logger` (forwarded through the `log` facade) or the JSON subscriber
//! from [`init_logging`].
//!
//! Records of one write transaction share its transaction id as the
//! correlation id.

use chrono::{DateTime, Utc};
use fwd_translate::{CommitReport, WriteError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Audited event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Agent startup and shutdown
    SystemLifecycle,
    /// Connection to the forwarding engine
    EngineConnection,
    /// A write transaction was committed
    TransactionCommit,
    /// A write transaction was rejected before anything was executed
    TransactionReject,
    /// A write transaction failed and was compensated
    TransactionRollback,
    /// Naming mappings were loaded or persisted
    MappingPersistence,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::SystemLifecycle => write!(f, "SYSTEM_LIFECYCLE"),
            AuditCategory::EngineConnection => write!(f, "ENGINE_CONNECTION"),
            AuditCategory::TransactionCommit => write!(f, "TRANSACTION_COMMIT"),
            AuditCategory::TransactionReject => write!(f, "TRANSACTION_REJECT"),
            AuditCategory::TransactionRollback => write!(f, "TRANSACTION_ROLLBACK"),
            AuditCategory::MappingPersistence => write!(f, "MAPPING_PERSISTENCE"),
        }
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    InProgress,
    Denied,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
            AuditOutcome::Denied => write!(f, "denied"),
        }
    }
}

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// UTC creation time
    pub timestamp: DateTime<Utc>,

    pub category: AuditCategory,

    /// Component that produced the record
    pub source: String,

    pub action: String,

    pub outcome: AuditOutcome,

    /// Affected object, e.g. the failing schema path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Transaction id for transaction records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuditRecord {
    /// Creates a record stamped with the current time. The outcome starts as
    /// [`AuditOutcome::InProgress`].
    pub fn new(category: AuditCategory, source: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
            correlation_id: None,
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Sets the error message and marks the record as failed.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Record of a committed transaction.
    pub fn commit(report: &CommitReport) -> Self {
        let applied: Vec<String> = report
            .applied
            .iter()
            .map(|(path, kind)| format!("{} {}", kind, path))
            .collect();
        AuditRecord::new(AuditCategory::TransactionCommit, "WriteEngine", "commit")
            .with_outcome(AuditOutcome::Success)
            .with_object_type("write_transaction")
            .with_correlation_id(report.transaction_id.to_string())
            .with_details(serde_json::json!({ "applied": applied }))
    }

    /// Record of a failed transaction.
    ///
    /// Rejections are [`AuditOutcome::Denied`]; execution failures carry the
    /// rollback status and every revert outcome.
    pub fn failed_commit(err: &WriteError) -> Self {
        let record = match err {
            WriteError::ValidationFailed { .. } | WriteError::NoWriter { .. } | WriteError::InvalidChange { .. } => {
                AuditRecord::new(AuditCategory::TransactionReject, "WriteEngine", "commit")
                    .with_outcome(AuditOutcome::Denied)
            }
            WriteError::WriteFailed { rollback, .. } => {
                let reverted: Vec<String> = rollback.reverted.iter().map(ToString::to_string).collect();
                AuditRecord::new(AuditCategory::TransactionRollback, "WriteEngine", "rollback")
                    .with_outcome(AuditOutcome::Failure)
                    .with_details(serde_json::json!({
                        "status": rollback.status.to_string(),
                        "reverted": reverted,
                    }))
            }
            WriteError::Ordering(_) | WriteError::Internal { .. } => {
                AuditRecord::new(AuditCategory::TransactionRollback, "WriteEngine", "commit")
                    .with_outcome(AuditOutcome::Failure)
            }
        };
        let mut record = record.with_object_type("write_transaction");
        if let Some(path) = err.path() {
            record = record.with_object_id(path.to_string());
        }
        if let WriteError::ValidationFailed { transaction_id, .. } | WriteError::WriteFailed { transaction_id, .. } =
            err
        {
            record = record.with_correlation_id(transaction_id.to_string());
        }
        record.error = Some(err.to_string());
        record
    }

    /// Serializes the record to one line of JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Emits an [`AuditRecord`] on the `audit` target.
///
/// Successes are logged at info, in-progress records at debug, failures
/// and denials at warn.
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        let record = $record;
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                tracing::info!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::InProgress => {
                tracing::debug!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::Failure | $crate::audit::AuditOutcome::Denied => {
                tracing::warn!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    error = record.error.as_deref().unwrap_or(""),
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
        }
    };
}

/// Log output format of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines through `env_logger`
    #[default]
    Text,
    /// One JSON object per event through `tracing-subscriber`
    Json,
}

/// Initializes the global logger. `RUST_LOG` overrides `log_level`.
pub fn init_logging(format: LogFormat, log_level: &str) {
    match format {
        LogFormat::Text => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
        }
        LogFormat::Json => {
            use tracing_subscriber::{fmt, prelude::*, EnvFilter};

            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true)
                        .json(),
                )
                .init();
        }
    }
}
