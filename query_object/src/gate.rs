//! Query execution gate
//!
//! Decides whether a query may run from its enable flag and, for resources
//! that need it, the external readiness signal.

use signal_system::ReadinessSignal;
use tokio::sync::watch;

/// Result of evaluating the gate for one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    /// The query's own enable flag is off
    Disabled,
    /// The resource requires readiness and the signal is false
    AwaitingReadiness,
}

impl GateDecision {
    pub fn is_allowed(self) -> bool {
        self == GateDecision::Allowed
    }
}

/// `enabled AND (not requires_readiness OR ready)`
pub fn decide(enabled: bool, requires_readiness: bool, ready: bool) -> GateDecision {
    if !enabled {
        GateDecision::Disabled
    } else if requires_readiness && !ready {
        GateDecision::AwaitingReadiness
    } else {
        GateDecision::Allowed
    }
}

#[derive(Debug, Clone)]
pub struct QueryGate {
    readiness: ReadinessSignal,
}

impl QueryGate {
    pub fn new(readiness: ReadinessSignal) -> Self {
        Self { readiness }
    }

    /// Evaluate against the current readiness value
    pub fn evaluate(&self, enabled: bool, requires_readiness: bool) -> GateDecision {
        decide(enabled, requires_readiness, self.readiness.get())
    }

    pub fn should_run(&self, enabled: bool, requires_readiness: bool) -> bool {
        self.evaluate(enabled, requires_readiness).is_allowed()
    }

    pub fn readiness(&self) -> &ReadinessSignal {
        &self.readiness
    }

    /// Receiver woken whenever readiness changes
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.readiness.subscribe()
    }
}
