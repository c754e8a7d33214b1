// 📦 Change Stager - One reviewable plan per session
//
// RosterSession owns the store and at most one staged plan. Planning and
// applying both take `&mut self`, so a session shared behind a single lock
// can never apply while another caller is re-planning.

use crate::error::SessionError;
use crate::executor::{ApplyExecutor, ApplyReport};
use crate::planner::{DiffPlanner, ReconciliationPlan};
use crate::roster::AuthoritativeList;
use crate::store::RecordStore;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unplanned,
    Planned,
    Applying,
    Applied,
}

/// Holds the most recent plan until it is applied or discarded
#[derive(Debug, Default)]
pub struct ChangeStager {
    staged: Option<ReconciliationPlan>,
}

impl ChangeStager {
    pub fn new() -> Self {
        ChangeStager { staged: None }
    }

    /// Replace whatever was staged
    pub fn stage(&mut self, plan: ReconciliationPlan) {
        self.staged = Some(plan);
    }

    pub fn staged(&self) -> Option<&ReconciliationPlan> {
        self.staged.as_ref()
    }

    pub fn take(&mut self) -> Option<ReconciliationPlan> {
        self.staged.take()
    }

    pub fn clear(&mut self) {
        self.staged = None;
    }
}

pub struct RosterSession<S: RecordStore> {
    store: S,
    planner: DiffPlanner,
    stager: ChangeStager,
    state: SessionState,
    last_report: Option<ApplyReport>,
}

impl<S: RecordStore> RosterSession<S> {
    pub fn new(store: S) -> Self {
        Self::with_planner(store, DiffPlanner::new())
    }

    pub fn with_planner(store: S, planner: DiffPlanner) -> Self {
        RosterSession {
            store,
            planner,
            stager: ChangeStager::new(),
            state: SessionState::Unplanned,
            last_report: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Plan against the current store contents and stage the result.
    ///
    /// Any earlier plan is dropped first, applied or not. On failure nothing
    /// is staged and the session is back to `Unplanned`.
    pub fn plan(&mut self, list: &AuthoritativeList) -> Result<&ReconciliationPlan, SessionError> {
        self.stager.clear();
        self.state = SessionState::Unplanned;

        let plan = self
            .planner
            .plan_against(list.entries(), &self.store)
            .inspect_err(|e| warn!(error = %e, "planning failed"))?;

        info!(fingerprint = %plan.fingerprint(), "plan staged");
        self.stager.stage(plan);
        self.state = SessionState::Planned;

        self.stager.staged().ok_or(SessionError::NothingStaged)
    }

    /// Stage a plan computed elsewhere (e.g. loaded from a review file)
    pub fn stage(&mut self, plan: ReconciliationPlan) {
        self.stager.stage(plan);
        self.state = SessionState::Planned;
    }

    pub fn staged(&self) -> Option<&ReconciliationPlan> {
        self.stager.staged()
    }

    pub fn discard(&mut self) -> Option<ReconciliationPlan> {
        let dropped = self.stager.take();
        if dropped.is_some() {
            self.state = SessionState::Unplanned;
        }
        dropped
    }

    /// Apply the staged plan.
    ///
    /// With `expected` set, the staged plan's fingerprint must match or
    /// nothing happens and the plan stays staged. The plan is consumed on
    /// apply; individual operation failures only show up in the report.
    pub fn apply(&mut self, expected: Option<&str>) -> Result<&ApplyReport, SessionError> {
        let plan = self.stager.staged().ok_or(SessionError::NothingStaged)?;

        if let Some(expected) = expected {
            let actual = plan.fingerprint();
            if actual != expected {
                return Err(SessionError::FingerprintMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let plan = self.stager.take().ok_or(SessionError::NothingStaged)?;
        self.state = SessionState::Applying;
        let report = ApplyExecutor::apply(&plan, &mut self.store);
        self.state = SessionState::Applied;

        Ok(self.last_report.insert(report))
    }

    pub fn last_report(&self) -> Option<&ApplyReport> {
        self.last_report.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
