//! Write transactions: ordered, validated execution with rollback.
//!
//! [`WriteEngine::commit`] turns a [`DataTreeDiff`] into writer invocations:
//!
//! 1. every change is resolved to a writer (nothing runs if one is missing)
//! 2. deletes are ordered dependents-first, creates and updates
//!    prerequisites-first; deletes run before creates and updates
//! 3. all writers validate their change; a rejection aborts the transaction
//! 4. the steps execute one at a time; on the first failure the executed
//!    steps are compensated in reverse order
//!
//! Name mappings recorded by writers are staged and published only when the
//! whole transaction commits.

use crate::context::WriteContext;
use crate::customizer::WriterCustomizer;
use crate::diff::{ChangeKind, DataTreeDiff};
use crate::error::{CustomizerError, CustomizerResult, WriteError, WriteResult};
use crate::graph::OrderDirection;
use crate::naming::MappingStore;
use crate::registry::WriterRegistry;
use fwd_types::SchemaPath;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Lifecycle of a write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionState {
    Created,
    Validating,
    Executing,
    Committed,
    Rejected,
    RollingBack,
    RolledBack,
    RollbackFailed,
}

impl TransactionState {
    /// Returns true if `next` may follow this state.
    pub fn can_transition_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Created, Validating)
                | (Validating, Executing)
                | (Validating, Rejected)
                | (Executing, Committed)
                | (Executing, RollingBack)
                | (RollingBack, RolledBack)
                | (RollingBack, RollbackFailed)
        )
    }

    /// Returns true if no transition leaves this state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Committed
                | TransactionState::Rejected
                | TransactionState::RolledBack
                | TransactionState::RollbackFailed
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Created => "created",
            TransactionState::Validating => "validating",
            TransactionState::Executing => "executing",
            TransactionState::Committed => "committed",
            TransactionState::Rejected => "rejected",
            TransactionState::RollingBack => "rolling-back",
            TransactionState::RolledBack => "rolled-back",
            TransactionState::RollbackFailed => "rollback-failed",
        };
        f.write_str(s)
    }
}

/// One writer invocation of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteStep {
    /// Concrete path the writer is invoked with.
    pub path: SchemaPath,
    /// Schema path of the responsible writer.
    pub handler: SchemaPath,
    pub kind: ChangeKind,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// A write transaction: ordered steps plus state.
#[derive(Debug)]
pub struct WriteTransaction {
    id: Uuid,
    state: TransactionState,
    steps: Vec<WriteStep>,
}

impl WriteTransaction {
    fn new(steps: Vec<WriteStep>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: TransactionState::Created,
            steps,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn steps(&self) -> &[WriteStep] {
        &self.steps
    }

    fn transition(&mut self, next: TransactionState) -> WriteResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(WriteError::internal(format!(
                "transaction {}: illegal transition {} -> {}",
                self.id, self.state, next
            )));
        }
        log::trace!("transaction {}: {} -> {}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }
}

/// Outcome of compensating one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevertOutcome {
    Reverted,
    /// The writer has no inverse operation for this step.
    NotSupported,
    Failed(String),
}

impl fmt::Display for RevertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevertOutcome::Reverted => f.write_str("reverted"),
            RevertOutcome::NotSupported => f.write_str("not supported"),
            RevertOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Compensation record for one executed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevertRecord {
    pub path: SchemaPath,
    /// Kind of the original (compensated) change.
    pub kind: ChangeKind,
    pub outcome: RevertOutcome,
}

impl fmt::Display for RevertRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.path, self.outcome)
    }
}

/// Aggregate outcome of a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackStatus {
    /// Every executed step was reverted (or none had executed).
    RolledBack,
    /// Some steps were reverted, some were not.
    PartiallyRolledBack,
    /// No executed step could be reverted.
    RollbackFailed,
}

impl fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackStatus::RolledBack => f.write_str("rolled back"),
            RollbackStatus::PartiallyRolledBack => f.write_str("partially rolled back"),
            RollbackStatus::RollbackFailed => f.write_str("rollback failed"),
        }
    }
}

/// Result of compensating the executed steps of a failed transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackReport {
    pub status: RollbackStatus,
    /// Records in the order the compensations ran (reverse execution order).
    pub reverted: Vec<RevertRecord>,
}

impl RollbackReport {
    fn from_records(reverted: Vec<RevertRecord>) -> Self {
        let ok = reverted
            .iter()
            .filter(|r| r.outcome == RevertOutcome::Reverted)
            .count();
        let status = if ok == reverted.len() {
            RollbackStatus::RolledBack
        } else if ok == 0 {
            RollbackStatus::RollbackFailed
        } else {
            RollbackStatus::PartiallyRolledBack
        };
        Self { status, reverted }
    }
}

/// Summary of a committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitReport {
    pub transaction_id: Uuid,
    /// Executed steps in execution order.
    pub applied: Vec<(SchemaPath, ChangeKind)>,
}

/// Executes write transactions against the registered writers.
pub struct WriteEngine {
    registry: Arc<WriterRegistry>,
    mappings: Arc<MappingStore>,
    commit_lock: Mutex<()>,
    persist_dir: Option<PathBuf>,
}

impl WriteEngine {
    pub fn new(registry: Arc<WriterRegistry>, mappings: Arc<MappingStore>) -> Self {
        Self {
            registry,
            mappings,
            commit_lock: Mutex::new(()),
            persist_dir: None,
        }
    }

    /// Saves the mapping store to `dir` after every successful commit.
    pub fn with_persistence(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }

    pub fn registry(&self) -> &Arc<WriterRegistry> {
        &self.registry
    }

    pub fn mappings(&self) -> &Arc<MappingStore> {
        &self.mappings
    }

    /// Commits `diff`. Transactions are serialized: a commit starts only
    /// after the previous one has fully completed.
    pub async fn commit(&self, diff: DataTreeDiff) -> WriteResult<CommitReport> {
        let _guard = self.commit_lock.lock().await;

        let steps = self.plan(&diff)?;
        let mut tx = WriteTransaction::new(steps);
        log::info!(
            "transaction {}: {} changes, {} steps",
            tx.id,
            diff.changes().len(),
            tx.steps.len()
        );
        let ctx = WriteContext::new(tx.id, diff, self.mappings.stage());

        tx.transition(TransactionState::Validating)?;
        let mut rejection = None;
        for step in &tx.steps {
            let writer = self.writer(&step.handler)?;
            if let Err(source) = writer
                .validate(&step.path, step.before.as_ref(), step.after.as_ref(), &ctx)
                .await
            {
                rejection = Some((step.path.clone(), source));
                break;
            }
        }
        if let Some((path, source)) = rejection {
            log::error!("transaction {}: validation of {} failed: {}", tx.id, path, source);
            tx.transition(TransactionState::Rejected)?;
            ctx.into_mappings().discard();
            return Err(WriteError::ValidationFailed {
                transaction_id: tx.id,
                path,
                source,
            });
        }

        tx.transition(TransactionState::Executing)?;
        let mut applied = Vec::with_capacity(tx.steps.len());
        let mut failure = None;
        for (k, step) in tx.steps.iter().enumerate() {
            let writer = self.writer(&step.handler)?;
            log::debug!("transaction {}: {} {}", tx.id, step.kind, step.path);
            if let Err(source) = execute(writer.as_ref(), step, &ctx).await {
                failure = Some((k, source));
                break;
            }
            applied.push((step.path.clone(), step.kind));
        }
        if let Some((k, source)) = failure {
            let (path, kind) = (tx.steps[k].path.clone(), tx.steps[k].kind);
            log::error!("transaction {}: {} of {} failed: {}", tx.id, kind, path, source);
            tx.transition(TransactionState::RollingBack)?;
            let rollback = self.rollback(&tx.steps[..k], &ctx).await;
            tx.transition(match rollback.status {
                RollbackStatus::RolledBack => TransactionState::RolledBack,
                _ => TransactionState::RollbackFailed,
            })?;
            log::info!("transaction {}: {}", tx.id, rollback.status);
            ctx.into_mappings().discard();
            return Err(WriteError::WriteFailed {
                transaction_id: tx.id,
                path,
                kind,
                source,
                rollback,
            });
        }

        tx.transition(TransactionState::Committed)?;
        ctx.into_mappings().publish();
        log::info!("transaction {}: committed {} steps", tx.id, applied.len());

        if let Some(dir) = &self.persist_dir {
            if let Err(e) = self.mappings.save_dir(dir) {
                log::error!("transaction {}: failed to persist mappings: {}", tx.id, e);
            }
        }

        Ok(CommitReport {
            transaction_id: tx.id,
            applied,
        })
    }

    fn writer(&self, handler: &SchemaPath) -> WriteResult<&Arc<dyn WriterCustomizer>> {
        self.registry
            .lookup(handler)
            .map(|r| r.handler())
            .ok_or_else(|| WriteError::internal(format!("writer for {} disappeared", handler)))
    }

    /// Resolves and orders the steps of `diff`.
    pub fn plan(&self, diff: &DataTreeDiff) -> WriteResult<Vec<WriteStep>> {
        let mut steps: BTreeMap<SchemaPath, WriteStep> = BTreeMap::new();
        for change in diff.changes() {
            let (registration, at) = self
                .registry
                .resolve(&change.path)
                .ok_or_else(|| WriteError::NoWriter {
                    path: change.path.clone(),
                })?;
            if steps.contains_key(&at) {
                continue;
            }
            let step = if at == change.path {
                WriteStep {
                    path: at.clone(),
                    handler: registration.path().clone(),
                    kind: change.kind,
                    before: change.before.clone(),
                    after: change.after.clone(),
                }
            } else {
                let before = diff.before(&at).cloned();
                let after = diff.after(&at).cloned();
                let kind = ChangeKind::from_images(before.as_ref(), after.as_ref()).ok_or_else(|| {
                    WriteError::InvalidChange {
                        path: at.clone(),
                        reason: format!("{} changed but its subtree root has no data", change.path),
                    }
                })?;
                log::trace!("lifting change of {} to subtree root {}", change.path, at);
                WriteStep {
                    path: at.clone(),
                    handler: registration.path().clone(),
                    kind,
                    before,
                    after,
                }
            };
            steps.insert(at, step);
        }

        let (deletes, writes): (Vec<WriteStep>, Vec<WriteStep>) =
            steps.into_values().partition(|s| s.kind == ChangeKind::Delete);

        let mut ordered = self.order_steps(deletes, OrderDirection::Delete)?;
        ordered.extend(self.order_steps(writes, OrderDirection::Apply)?);
        Ok(ordered)
    }

    /// Orders steps by handler; steps of one handler keep path order.
    fn order_steps(&self, steps: Vec<WriteStep>, direction: OrderDirection) -> WriteResult<Vec<WriteStep>> {
        let handlers: HashSet<SchemaPath> = steps.iter().map(|s| s.handler.clone()).collect();
        let order = self.registry.order(&handlers, direction)?;

        let mut by_handler: BTreeMap<SchemaPath, Vec<WriteStep>> = BTreeMap::new();
        for step in steps {
            by_handler.entry(step.handler.clone()).or_default().push(step);
        }
        let mut ordered = Vec::new();
        for handler in order {
            if let Some(group) = by_handler.remove(&handler) {
                ordered.extend(group);
            }
        }
        Ok(ordered)
    }

    async fn rollback(&self, executed: &[WriteStep], ctx: &WriteContext) -> RollbackReport {
        let mut records = Vec::with_capacity(executed.len());
        for step in executed.iter().rev() {
            let outcome = match self.writer(&step.handler) {
                Ok(writer) => match compensate(writer.as_ref(), step, ctx).await {
                    Ok(()) => RevertOutcome::Reverted,
                    Err(e) if e.is_unsupported() => RevertOutcome::NotSupported,
                    Err(e) => RevertOutcome::Failed(e.to_string()),
                },
                Err(e) => RevertOutcome::Failed(e.to_string()),
            };
            match &outcome {
                RevertOutcome::Reverted => log::debug!("reverted {} {}", step.kind, step.path),
                other => log::warn!("could not revert {} {}: {}", step.kind, step.path, other),
            }
            records.push(RevertRecord {
                path: step.path.clone(),
                kind: step.kind,
                outcome,
            });
        }
        RollbackReport::from_records(records)
    }
}

fn missing(step: &WriteStep, image: &str) -> CustomizerError {
    CustomizerError::internal(format!("{} of {} without {} data", step.kind, step.path, image))
}

async fn execute(writer: &dyn WriterCustomizer, step: &WriteStep, ctx: &WriteContext) -> CustomizerResult<()> {
    match step.kind {
        ChangeKind::Create => {
            let after = step.after.as_ref().ok_or_else(|| missing(step, "after"))?;
            writer.create(&step.path, after, ctx).await
        }
        ChangeKind::Update => {
            let before = step.before.as_ref().ok_or_else(|| missing(step, "before"))?;
            let after = step.after.as_ref().ok_or_else(|| missing(step, "after"))?;
            writer.update(&step.path, before, after, ctx).await
        }
        ChangeKind::Delete => {
            let before = step.before.as_ref().ok_or_else(|| missing(step, "before"))?;
            writer.delete(&step.path, before, ctx).await
        }
    }
}

async fn compensate(writer: &dyn WriterCustomizer, step: &WriteStep, ctx: &WriteContext) -> CustomizerResult<()> {
    match step.kind {
        ChangeKind::Create => {
            let after = step.after.as_ref().ok_or_else(|| missing(step, "after"))?;
            writer.delete(&step.path, after, ctx).await
        }
        ChangeKind::Update => {
            let before = step.before.as_ref().ok_or_else(|| missing(step, "before"))?;
            let after = step.after.as_ref().ok_or_else(|| missing(step, "after"))?;
            writer.update(&step.path, after, before, ctx).await
        }
        ChangeKind::Delete => {
            let before = step.before.as_ref().ok_or_else(|| missing(step, "before"))?;
            writer.create(&step.path, before, ctx).await
        }
    }
}
