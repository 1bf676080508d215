// ABOUTME: Durable deployment record, mutated only by the cutover controller.
// ABOUTME: Carries the plan, current step index, and the routing state before deploy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::DeployErrorKind;
use super::plan::TrafficShiftPlan;
use super::state::{DeploymentState, Event, IllegalTransition};
use crate::traffic::{RouterState, Weight};
use crate::types::{ArtifactRef, DeploymentId, PoolId, ServiceName};

/// Why a deployment rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RollbackReason {
    #[error("replicas did not become healthy within {waited_secs}s")]
    BindStalled { waited_secs: u64 },

    #[error("failed to stage replicas: {message}")]
    BindFailed { message: String },

    #[error("verification round {round} found standby unhealthy")]
    VerificationFailed { round: u32 },

    #[error("standby became unhealthy at step {step} ({weight}%)")]
    StandbyUnhealthy { step: usize, weight: u8 },

    #[error("traffic shift rejected: {message}")]
    ShiftRejected { message: String },

    #[error("cancelled by operator")]
    Cancelled,
}

impl RollbackReason {
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            RollbackReason::BindStalled { .. } => DeployErrorKind::DeploymentStalled,
            RollbackReason::ShiftRejected { .. } => DeployErrorKind::InvalidWeight,
            _ => DeployErrorKind::RolledBack,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: DeploymentState,
    pub to: DeploymentState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub service: ServiceName,
    pub artifact: ArtifactRef,
    pub started_at: DateTime<Utc>,
    pub state: DeploymentState,
    pub plan: TrafficShiftPlan,
    /// Index of the plan step currently applied. Meaningful from
    /// `ShiftingTraffic` on.
    pub step_index: usize,
    pub current_weight: Weight,
    /// Standby pool at deploy time: where the new replicas go.
    pub target: PoolId,
    /// Routing state immediately before deploy.
    pub prior: RouterState,
    #[serde(default)]
    pub failure: Option<RollbackReason>,
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Deployment {
    pub fn new(
        id: DeploymentId,
        service: ServiceName,
        artifact: ArtifactRef,
        plan: TrafficShiftPlan,
        target: PoolId,
        prior: RouterState,
    ) -> Self {
        Self {
            id,
            service,
            artifact,
            started_at: Utc::now(),
            state: DeploymentState::Idle,
            plan,
            step_index: 0,
            current_weight: Weight::ZERO,
            target,
            prior,
            failure: None,
            history: Vec::new(),
            finished_at: None,
        }
    }

    /// Apply `event` through the transition table and record it.
    pub fn apply(&mut self, event: Event) -> Result<DeploymentState, IllegalTransition> {
        let to = self.state.next(event)?;
        let at = Utc::now();
        self.history.push(TransitionRecord {
            from: self.state,
            to,
            at,
        });
        tracing::info!(
            deployment = %self.id,
            service = %self.service,
            from = %self.state,
            to = %to,
            "deployment transition"
        );
        self.state = to;
        if to.is_terminal() {
            self.finished_at = Some(at);
        }
        Ok(to)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn status(&self) -> DeploymentStatus {
        DeploymentStatus {
            id: self.id.clone(),
            service: self.service.clone(),
            artifact: self.artifact.clone(),
            state: self.state,
            current_weight: self.current_weight,
            started_at: self.started_at,
            step: (self.state == DeploymentState::ShiftingTraffic).then_some(self.step_index + 1),
            steps: self.plan.len(),
            failure: self.failure.clone(),
            finished_at: self.finished_at,
        }
    }
}

/// Dashboard view of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub id: DeploymentId,
    pub service: ServiceName,
    pub artifact: ArtifactRef,
    pub state: DeploymentState,
    pub current_weight: Weight,
    pub started_at: DateTime<Utc>,
    /// 1-based step number while shifting.
    pub step: Option<usize>,
    pub steps: usize,
    pub failure: Option<RollbackReason>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::Slot;

    fn deployment() -> Deployment {
        Deployment::new(
            DeploymentId::new("dep-1"),
            ServiceName::new("web").unwrap(),
            ArtifactRef::parse("registry/web:v2").unwrap(),
            TrafficShiftPlan::default(),
            PoolId::new("web-green"),
            RouterState {
                active: Slot::Blue,
                weight: Weight::ZERO,
            },
        )
    }

    #[test]
    fn apply_records_history() {
        let mut d = deployment();
        d.apply(Event::Deploy).unwrap();
        d.apply(Event::Abort).unwrap();
        d.apply(Event::Reverted).unwrap();

        assert_eq!(d.state, DeploymentState::RolledBack);
        assert_eq!(d.history.len(), 3);
        assert_eq!(d.history[0].from, DeploymentState::Idle);
        assert!(d.finished_at.is_some());
    }

    #[test]
    fn illegal_event_leaves_record_untouched() {
        let mut d = deployment();
        assert!(d.apply(Event::Verified).is_err());
        assert_eq!(d.state, DeploymentState::Idle);
        assert!(d.history.is_empty());
    }

    #[test]
    fn status_reports_step_only_while_shifting() {
        let mut d = deployment();
        d.apply(Event::Deploy).unwrap();
        assert_eq!(d.status().step, None);

        d.apply(Event::Bound).unwrap();
        d.apply(Event::Verified).unwrap();
        d.step_index = 2;
        let status = d.status();
        assert_eq!(status.step, Some(3));
        assert_eq!(status.steps, 10);
    }

    #[test]
    fn reason_kinds_name_the_taxonomy() {
        assert_eq!(
            RollbackReason::BindStalled { waited_secs: 3600 }.kind(),
            DeployErrorKind::DeploymentStalled
        );
        assert_eq!(RollbackReason::Cancelled.kind(), DeployErrorKind::RolledBack);
    }

    #[test]
    fn record_round_trips_through_json() {
        let mut d = deployment();
        d.apply(Event::Deploy).unwrap();
        d.failure = Some(RollbackReason::StandbyUnhealthy { step: 2, weight: 50 });
        let json = serde_json::to_string(&d).unwrap();
        let back: Deployment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
