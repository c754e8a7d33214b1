// ⚙️ Apply Executor - Replay a plan against the store, one operation at a time
//
// Order: updates, inserts, deletions. A failing operation is recorded and the
// rest still run; there is no rollback.

use crate::error::StoreError;
use crate::planner::ReconciliationPlan;
use crate::store::RecordStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Update,
    Insert,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Update => "update",
            OperationKind::Insert => "insert",
            OperationKind::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub kind: OperationKind,

    /// Same label the plan shows for this operation
    pub label: String,

    /// Record touched; for inserts, the id the store assigned
    pub target_id: Option<String>,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationOutcome {
    fn ok(kind: OperationKind, label: String, target_id: Option<String>) -> Self {
        OperationOutcome {
            kind,
            label,
            target_id,
            success: true,
            error: None,
        }
    }

    fn failed(kind: OperationKind, label: String, target_id: Option<String>, error: String) -> Self {
        OperationOutcome {
            kind,
            label,
            target_id,
            success: false,
            error: Some(error),
        }
    }
}

/// Every operation of the plan, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub outcomes: Vec<OperationOutcome>,
}

impl ApplyReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }
}

pub struct ApplyExecutor;

impl ApplyExecutor {
    pub fn apply<S: RecordStore + ?Sized>(plan: &ReconciliationPlan, store: &mut S) -> ApplyReport {
        let mut report = ApplyReport::default();

        for update in &plan.updates {
            let outcome = match store.update(&update.id, &update.changes()) {
                Ok(Some(_)) => OperationOutcome::ok(
                    OperationKind::Update,
                    update.label.clone(),
                    Some(update.id.clone()),
                ),
                Ok(None) => OperationOutcome::failed(
                    OperationKind::Update,
                    update.label.clone(),
                    Some(update.id.clone()),
                    StoreError::NotFound { id: update.id.clone() }.to_string(),
                ),
                Err(e) => OperationOutcome::failed(
                    OperationKind::Update,
                    update.label.clone(),
                    Some(update.id.clone()),
                    e.to_string(),
                ),
            };
            log_outcome(&outcome);
            report.outcomes.push(outcome);
        }

        for insert in &plan.inserts {
            let outcome = match store.insert(&insert.to_new_member()) {
                Ok(record) => OperationOutcome::ok(OperationKind::Insert, insert.label(), Some(record.id)),
                Err(e) => OperationOutcome::failed(OperationKind::Insert, insert.label(), None, e.to_string()),
            };
            log_outcome(&outcome);
            report.outcomes.push(outcome);
        }

        for record in &plan.deletions {
            let outcome = match store.delete(&record.id) {
                Ok(true) => OperationOutcome::ok(OperationKind::Delete, record.label(), Some(record.id.clone())),
                Ok(false) => OperationOutcome::failed(
                    OperationKind::Delete,
                    record.label(),
                    Some(record.id.clone()),
                    StoreError::NotFound { id: record.id.clone() }.to_string(),
                ),
                Err(e) => OperationOutcome::failed(
                    OperationKind::Delete,
                    record.label(),
                    Some(record.id.clone()),
                    e.to_string(),
                ),
            };
            log_outcome(&outcome);
            report.outcomes.push(outcome);
        }

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "reconciliation applied"
        );
        report
    }
}

fn log_outcome(outcome: &OperationOutcome) {
    let id = outcome.target_id.as_deref().unwrap_or("-");
    match &outcome.error {
        None => info!(kind = %outcome.kind, id, label = %outcome.label, "applied"),
        Some(error) => warn!(kind = %outcome.kind, id, label = %outcome.label, error = %error, "operation failed"),
    }
}
