// ABOUTME: Deployment states and the transition table between them.
// ABOUTME: Every legal transition is one arm of `DeploymentState::next`; anything else is rejected.

use serde::{Deserialize, Serialize};

/// Lifecycle of one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Idle,
    /// Replicas launched into the standby pool, waiting to become healthy.
    Staging,
    /// Probing standby before it takes any external traffic.
    Verifying,
    ShiftingTraffic,
    /// Roles swapped; the former active set is draining. Not cancellable.
    Finalizing,
    Completed,
    RollingBack,
    RolledBack,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Deploy,
    Bound,
    Verified,
    /// Final step (weight 100) held with standby healthy; roles swapped.
    PlanCompleted,
    Drained,
    /// Bind timeout, probe failure, or an unhealthy standby mid-shift.
    Abort,
    Cancel,
    Reverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{event:?} is not allowed while {from}")]
pub struct IllegalTransition {
    pub from: DeploymentState,
    pub event: Event,
}

impl DeploymentState {
    pub fn next(self, event: Event) -> Result<Self, IllegalTransition> {
        use DeploymentState::*;

        let to = match (self, event) {
            (Idle, Event::Deploy) => Staging,
            (Staging, Event::Bound) => Verifying,
            (Verifying, Event::Verified) => ShiftingTraffic,
            (ShiftingTraffic, Event::PlanCompleted) => Finalizing,
            (Finalizing, Event::Drained) => Completed,
            (Staging | Verifying | ShiftingTraffic, Event::Abort | Event::Cancel) => RollingBack,
            (RollingBack, Event::Reverted) => RolledBack,
            (from, event) => return Err(IllegalTransition { from, event }),
        };
        Ok(to)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DeploymentState::Completed | DeploymentState::RolledBack)
    }

    pub fn is_cancellable(self) -> bool {
        self.next(Event::Cancel).is_ok()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentState::Idle => "idle",
            DeploymentState::Staging => "staging",
            DeploymentState::Verifying => "verifying",
            DeploymentState::ShiftingTraffic => "shifting_traffic",
            DeploymentState::Finalizing => "finalizing",
            DeploymentState::Completed => "completed",
            DeploymentState::RollingBack => "rolling_back",
            DeploymentState::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentState::*;

    const ALL: [DeploymentState; 8] = [
        Idle,
        Staging,
        Verifying,
        ShiftingTraffic,
        Finalizing,
        Completed,
        RollingBack,
        RolledBack,
    ];

    #[test]
    fn happy_path() {
        let mut state = Idle;
        for event in [
            Event::Deploy,
            Event::Bound,
            Event::Verified,
            Event::PlanCompleted,
            Event::Drained,
        ] {
            state = state.next(event).unwrap();
        }
        assert_eq!(state, Completed);
    }

    #[test]
    fn rollback_reachable_only_before_finalizing() {
        for state in ALL {
            let expected = matches!(state, Staging | Verifying | ShiftingTraffic);
            assert_eq!(state.next(Event::Abort).is_ok(), expected, "{state}");
            assert_eq!(state.is_cancellable(), expected, "{state}");
        }
    }

    #[test]
    fn cancel_after_finalizing_is_rejected() {
        let err = Finalizing.next(Event::Cancel).unwrap_err();
        assert_eq!(err.from, Finalizing);
        assert_eq!(err.event, Event::Cancel);
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for state in [Completed, RolledBack] {
            assert!(state.is_terminal());
            for event in [
                Event::Deploy,
                Event::Bound,
                Event::Verified,
                Event::PlanCompleted,
                Event::Drained,
                Event::Abort,
                Event::Cancel,
                Event::Reverted,
            ] {
                assert!(state.next(event).is_err());
            }
        }
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&ShiftingTraffic).unwrap();
        assert_eq!(json, "\"shifting_traffic\"");
    }
}
