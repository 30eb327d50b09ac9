//! Per-listener delivery bookkeeping and the rebalance hook that keeps it honest.
//!
//! [`DeliveryTracker`] remembers the attempt number of every record waiting to be
//! redelivered, and which record (if any) could neither be settled nor rewound. The
//! [`ListenerContext`] drops attempt counts for partitions the group takes away, so a
//! partition that comes back later starts counting from one.

use rdkafka::ClientContext;
use rdkafka::consumer::{ConsumerContext, Rebalance};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct TrackerState {
    attempts: HashMap<(i32, i64), u32>,
    stalled: Option<(i32, i64)>,
}

/// Attempt numbers and stalled records for one listener's partitions.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    state: Mutex<TrackerState>,
}

impl DeliveryTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attempt number of the next delivery of the record at `offset`.
    #[must_use]
    pub fn attempt(&self, partition: i32, offset: i64) -> u32 {
        self.state()
            .attempts
            .get(&(partition, offset))
            .copied()
            .unwrap_or(1)
    }

    /// Number the next delivery of the record at `offset` as `attempt`.
    pub fn schedule(&self, partition: i32, offset: i64, attempt: u32) {
        self.state().attempts.insert((partition, offset), attempt);
    }

    /// Forget a record once progress moved past it.
    pub fn settle(&self, partition: i32, offset: i64) {
        self.state().attempts.remove(&(partition, offset));
    }

    /// Mark a record that was neither settled nor rewound.
    ///
    /// The first stalled record wins; its partition must not make progress past it.
    pub fn stall(&self, partition: i32, offset: i64) {
        self.state().stalled.get_or_insert((partition, offset));
    }

    /// The stalled record, as `(partition, offset)`.
    #[must_use]
    pub fn stalled(&self) -> Option<(i32, i64)> {
        self.state().stalled
    }

    /// Drop attempt numbers for partitions this listener no longer owns.
    pub fn revoke(&self, partitions: &[i32]) {
        let mut state = self.state();
        let before = state.attempts.len();
        state
            .attempts
            .retain(|(partition, _), _| !partitions.contains(partition));
        let dropped = before - state.attempts.len();
        if dropped > 0 {
            debug!(?partitions, dropped, "Dropped attempt numbers for revoked partitions");
        }
    }

    /// Number of records with a pending redelivery.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state().attempts.len()
    }
}

/// rdkafka context of a listener's consumer.
///
/// Clears redelivery bookkeeping for revoked partitions after each rebalance.
pub struct ListenerContext {
    tracker: Arc<DeliveryTracker>,
}

impl ListenerContext {
    /// Create a context that reports revocations to `tracker`.
    #[must_use]
    pub const fn new(tracker: Arc<DeliveryTracker>) -> Self {
        Self { tracker }
    }
}

impl ClientContext for ListenerContext {}

impl ConsumerContext for ListenerContext {
    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Assign(assigned) => {
                let partitions: Vec<i32> = assigned.elements().iter().map(|e| e.partition()).collect();
                info!(?partitions, "Partitions assigned");
            },
            Rebalance::Revoke(revoked) => {
                let partitions: Vec<i32> = revoked.elements().iter().map(|e| e.partition()).collect();
                info!(?partitions, "Partitions revoked");
                self.tracker.revoke(&partitions);
            },
            Rebalance::Error(e) => {
                warn!(error = %e, "Rebalance failed");
            },
        }
    }
}
