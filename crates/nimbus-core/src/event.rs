//! Structured events exposed to observability collaborators.
//!
//! The control loop publishes a [`FleetEvent`] for every externally
//! visible action through an injected [`EventSink`]. Sinks are expected
//! to be cheap and non-blocking; the control loop never waits on them.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{GroupId, NodeId};

/// A structured event describing one externally visible action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FleetEvent {
    /// A scale-up was decided for a group.
    ScaleUpDecided {
        /// Affected group.
        group: GroupId,
        /// Node count before the decision.
        from: u32,
        /// Target node count.
        to: u32,
        /// Human-readable reason.
        reason: String,
    },
    /// A scale-down was decided for a group.
    ScaleDownDecided {
        /// Affected group.
        group: GroupId,
        /// Node count before the decision.
        from: u32,
        /// Target node count.
        to: u32,
        /// Human-readable reason.
        reason: String,
    },
    /// A node drain started.
    DrainStarted {
        /// Node being drained.
        node: NodeId,
    },
    /// A node drain completed and the node was deprovisioned.
    DrainCompleted {
        /// Drained node.
        node: NodeId,
        /// Number of pods evicted.
        evicted_pods: usize,
    },
    /// A node drain failed or was aborted.
    DrainFailed {
        /// Affected node.
        node: NodeId,
        /// Failure description.
        reason: String,
    },
    /// One rebalance batch finished successfully.
    RebalanceBatchCompleted {
        /// Affected group.
        group: GroupId,
        /// Zero-based batch index within the plan.
        batch: usize,
        /// Nodes replaced in this batch.
        replaced: Vec<NodeId>,
    },
    /// One rebalance batch failed and was rolled back.
    RebalanceBatchFailed {
        /// Affected group.
        group: GroupId,
        /// Zero-based batch index within the plan.
        batch: usize,
        /// Failure description.
        reason: String,
    },
}

/// A timestamped event as recorded by a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// The event payload.
    pub event: FleetEvent,
    /// When the event was published.
    pub at: DateTime<Utc>,
}

/// Destination for fleet events.
pub trait EventSink: Send + Sync {
    /// Publishes one event. Must not block.
    fn publish(&self, event: FleetEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: FleetEvent) {}
}

/// In-memory sink that records events for inspection in tests.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: RwLock<Vec<RecordedEvent>>,
}

impl EventRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().clone()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// True if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl EventSink for EventRecorder {
    fn publish(&self, event: FleetEvent) {
        self.events.write().push(RecordedEvent {
            event,
            at: Utc::now(),
        });
    }
}
