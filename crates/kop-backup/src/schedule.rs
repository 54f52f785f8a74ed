//! Capture scheduling decisions
//!
//! Whether a capture cycle starts is a pure function of the trigger policy,
//! the last recovery point and the current time. Requeue signals are merged
//! across the steps of one reconcile so the earliest wins.

use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;

use kop_common::crd::CaptureIdentifier;

/// How soon a requeue counts as immediate
const IMMEDIATE_REQUEUE: Duration = Duration::from_secs(1);

/// When a new capture cycle may start
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerPolicy {
    /// Steady state: one cycle per interval
    Primary {
        /// Time between cycle starts
        interval: Duration,
    },
    /// Failover or relocation: capture once the workload generation moved
    Secondary {
        /// Current workload generation
        generation: i64,
    },
}

/// Outcome of applying a trigger policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureDecision {
    /// Start a cycle now
    StartNow,
    /// Too early; try again after the delay
    DelayUntil(Duration),
    /// The recovery point already covers the workload
    AlreadyCurrent,
}

/// Decide whether a capture cycle should start
pub fn decide(policy: TriggerPolicy, last: &CaptureIdentifier, now: DateTime<Utc>) -> CaptureDecision {
    match policy {
        TriggerPolicy::Primary { interval } => {
            let elapsed = (now - last.start_time).to_std().unwrap_or_default();
            if elapsed < interval {
                CaptureDecision::DelayUntil(interval - elapsed)
            } else {
                CaptureDecision::StartNow
            }
        }
        TriggerPolicy::Secondary { generation } => {
            // A point inherited from the peer counts generations on another cluster
            if generation != last.start_generation {
                CaptureDecision::StartNow
            } else {
                CaptureDecision::AlreadyCurrent
            }
        }
    }
}

/// When the workload should be reconciled again
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Requeue {
    /// Only on the next watch event
    #[default]
    Idle,
    /// As soon as possible
    Immediate,
    /// After a delay
    After(Duration),
}

impl Requeue {
    /// Requeue signal matching a capture decision
    pub fn from_decision(decision: CaptureDecision) -> Self {
        match decision {
            CaptureDecision::StartNow => Requeue::Immediate,
            CaptureDecision::DelayUntil(d) if d.is_zero() => Requeue::Immediate,
            CaptureDecision::DelayUntil(d) => Requeue::After(d),
            CaptureDecision::AlreadyCurrent => Requeue::Idle,
        }
    }

    /// The sooner of two signals
    pub fn min(self, other: Requeue) -> Requeue {
        match (self, other) {
            (Requeue::Immediate, _) | (_, Requeue::Immediate) => Requeue::Immediate,
            (Requeue::Idle, r) | (r, Requeue::Idle) => r,
            (Requeue::After(a), Requeue::After(b)) => Requeue::After(a.min(b)),
        }
    }

    /// Convert to a controller action
    pub fn into_action(self) -> Action {
        match self {
            Requeue::Idle => Action::await_change(),
            Requeue::Immediate => Action::requeue(IMMEDIATE_REQUEUE),
            Requeue::After(d) => Action::requeue(d),
        }
    }
}
