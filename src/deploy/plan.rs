// ABOUTME: Traffic shift plans: ordered (weight, hold) steps ending at 100%.
// ABOUTME: Provides linear, canary, and all-at-once presets plus explicit step lists.

use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::traffic::Weight;

/// One step of a plan: send `weight` percent to standby, then hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftStep {
    pub weight: Weight,
    #[serde(with = "humantime_serde")]
    pub hold: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("traffic shift plan has no steps")]
    Empty,

    #[error("step {index} has weight 0; every step must move traffic")]
    ZeroWeight { index: usize },

    #[error("step {index} weight {weight} does not exceed previous weight {previous}")]
    NotIncreasing {
        index: usize,
        previous: u8,
        weight: u8,
    },

    #[error("last step must reach 100, found {0}")]
    Incomplete(u8),

    #[error("percent must be between {min} and {max}, got {value}")]
    InvalidPercent { value: u32, min: u32, max: u32 },
}

/// Validated plan: weights strictly increase within `1..=100` and the last
/// step is exactly 100.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ShiftStep>", into = "Vec<ShiftStep>")]
pub struct TrafficShiftPlan {
    steps: NonEmpty<ShiftStep>,
}

impl TrafficShiftPlan {
    pub fn new(steps: Vec<ShiftStep>) -> Result<Self, PlanError> {
        let steps = NonEmpty::from_vec(steps).ok_or(PlanError::Empty)?;

        let mut previous = 0u8;
        for (index, step) in steps.iter().enumerate() {
            let weight = step.weight.get();
            if weight == 0 {
                return Err(PlanError::ZeroWeight { index });
            }
            if weight <= previous {
                return Err(PlanError::NotIncreasing {
                    index,
                    previous,
                    weight,
                });
            }
            previous = weight;
        }
        if previous != 100 {
            return Err(PlanError::Incomplete(previous));
        }

        Ok(Self { steps })
    }

    /// Build from `(weight, hold)` pairs.
    pub fn from_pairs(pairs: &[(u32, Duration)]) -> Result<Self, PlanError> {
        let steps = pairs
            .iter()
            .map(|&(weight, hold)| {
                let weight = Weight::new(weight).map_err(|_| PlanError::InvalidPercent {
                    value: weight,
                    min: 1,
                    max: 100,
                })?;
                Ok(ShiftStep { weight, hold })
            })
            .collect::<Result<Vec<_>, PlanError>>()?;
        Self::new(steps)
    }

    /// Add `percent` every `interval` until 100, the last step capped at 100.
    pub fn linear(percent: u32, interval: Duration) -> Result<Self, PlanError> {
        check_percent(percent, 1, 100)?;
        let mut pairs = Vec::new();
        let mut weight = 0;
        while weight < 100 {
            weight = (weight + percent).min(100);
            pairs.push((weight, interval));
        }
        Self::from_pairs(&pairs)
    }

    /// Send `percent` to standby for `interval`, then everything.
    pub fn canary(percent: u32, interval: Duration) -> Result<Self, PlanError> {
        check_percent(percent, 1, 99)?;
        Self::from_pairs(&[(percent, interval), (100, interval)])
    }

    pub fn all_at_once(hold: Duration) -> Self {
        Self {
            steps: NonEmpty::new(ShiftStep {
                weight: Weight::FULL,
                hold,
            }),
        }
    }

    pub fn steps(&self) -> &NonEmpty<ShiftStep> {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&ShiftStep> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 == self.steps.len()
    }

    /// Sum of all holds: the shortest time the shift can take.
    pub fn total_hold(&self) -> Duration {
        self.steps.iter().map(|s| s.hold).sum()
    }
}

impl Default for TrafficShiftPlan {
    /// Ten percent every minute.
    fn default() -> Self {
        Self::linear(10, Duration::from_secs(60))
            .unwrap_or_else(|_| Self::all_at_once(Duration::from_secs(60)))
    }
}

impl TryFrom<Vec<ShiftStep>> for TrafficShiftPlan {
    type Error = PlanError;

    fn try_from(steps: Vec<ShiftStep>) -> Result<Self, Self::Error> {
        Self::new(steps)
    }
}

impl From<TrafficShiftPlan> for Vec<ShiftStep> {
    fn from(plan: TrafficShiftPlan) -> Self {
        plan.steps.into()
    }
}

fn check_percent(value: u32, min: u32, max: u32) -> Result<(), PlanError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(PlanError::InvalidPercent { value, min, max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_secs(60);

    fn weights(plan: &TrafficShiftPlan) -> Vec<u8> {
        plan.steps().iter().map(|s| s.weight.get()).collect()
    }

    #[test]
    fn linear_ten_percent_reaches_full_in_ten_steps() {
        let plan = TrafficShiftPlan::linear(10, MIN).unwrap();
        assert_eq!(weights(&plan), vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
        assert_eq!(plan.total_hold(), Duration::from_secs(600));
        assert_eq!(plan, TrafficShiftPlan::default());
    }

    #[test]
    fn linear_caps_last_step() {
        let plan = TrafficShiftPlan::linear(40, MIN).unwrap();
        assert_eq!(weights(&plan), vec![40, 80, 100]);
    }

    #[test]
    fn canary_has_two_steps() {
        let plan = TrafficShiftPlan::canary(5, MIN).unwrap();
        assert_eq!(weights(&plan), vec![5, 100]);
        assert!(TrafficShiftPlan::canary(100, MIN).is_err());
    }

    #[test]
    fn rejects_bad_step_lists() {
        assert_eq!(TrafficShiftPlan::new(vec![]), Err(PlanError::Empty));
        assert_eq!(
            TrafficShiftPlan::from_pairs(&[(50, MIN), (50, MIN), (100, MIN)]),
            Err(PlanError::NotIncreasing {
                index: 1,
                previous: 50,
                weight: 50
            })
        );
        assert_eq!(
            TrafficShiftPlan::from_pairs(&[(25, MIN), (50, MIN)]),
            Err(PlanError::Incomplete(50))
        );
        assert_eq!(
            TrafficShiftPlan::from_pairs(&[(0, MIN), (100, MIN)]),
            Err(PlanError::ZeroWeight { index: 0 })
        );
        assert!(TrafficShiftPlan::from_pairs(&[(150, MIN)]).is_err());
        assert!(TrafficShiftPlan::linear(0, MIN).is_err());
    }

    #[test]
    fn deserializes_with_validation() {
        let plan: TrafficShiftPlan =
            serde_json::from_str(r#"[{"weight":25,"hold":"1m"},{"weight":100,"hold":"30s"}]"#)
                .unwrap();
        assert_eq!(weights(&plan), vec![25, 100]);
        assert_eq!(plan.step(1).unwrap().hold, Duration::from_secs(30));

        let bad = serde_json::from_str::<TrafficShiftPlan>(r#"[{"weight":50,"hold":"1m"}]"#);
        assert!(bad.is_err());
    }
}
