// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Readiness gate for bootstrapping a cluster.
//!
//! Messages sent to a node before it listens are lost for good.
//! Nodes therefore only initiate consensus after every node in the cluster
//! has reported ready on the shared [`ReadinessGate`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, warn};

use crate::NodeId;

/// Default interval between two checks in [`ReadinessGate::wait_all_ready`].
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Shared ready flags of all nodes in a cluster.
pub struct ReadinessGate {
    ready: Vec<AtomicBool>,
    poll_interval: Duration,
}

impl ReadinessGate {
    /// Creates a new gate for `num_nodes` nodes, none of which are ready.
    #[must_use]
    pub fn new(num_nodes: usize) -> Self {
        Self {
            ready: (0..num_nodes).map(|_| AtomicBool::new(false)).collect(),
            poll_interval: READINESS_POLL_INTERVAL,
        }
    }

    /// Turns this instance into a new instance with a different poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Marks node `id` as ready to receive messages.
    pub fn mark_ready(&self, id: NodeId) {
        match self.ready.get(id as usize) {
            Some(flag) => {
                if !flag.swap(true, Ordering::AcqRel) {
                    debug!("node {id} is ready");
                }
            }
            None => warn!("ignoring readiness of unknown node {id}"),
        }
    }

    /// Returns `true` iff node `id` has been marked ready.
    #[must_use]
    pub fn is_ready(&self, id: NodeId) -> bool {
        self.ready
            .get(id as usize)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Returns `true` iff all nodes have been marked ready.
    #[must_use]
    pub fn all_ready(&self) -> bool {
        self.ready.iter().all(|flag| flag.load(Ordering::Acquire))
    }

    /// Waits until all nodes have been marked ready.
    ///
    /// Checks the flags every poll interval, there is no timeout.
    pub async fn wait_all_ready(&self) {
        while !self.all_ready() {
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn flags() {
        let gate = ReadinessGate::new(3);
        assert!(!gate.all_ready());
        gate.mark_ready(0);
        gate.mark_ready(0);
        gate.mark_ready(2);
        assert!(gate.is_ready(0));
        assert!(!gate.is_ready(1));
        assert!(!gate.all_ready());
        gate.mark_ready(1);
        assert!(gate.all_ready());

        // unknown nodes are ignored
        gate.mark_ready(3);
        assert!(!gate.is_ready(3));
    }

    #[tokio::test]
    async fn wait_for_all() {
        let gate = Arc::new(ReadinessGate::new(2).with_poll_interval(Duration::from_millis(1)));
        gate.mark_ready(1);

        let g = gate.clone();
        let waiter = tokio::spawn(async move { g.wait_all_ready().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.mark_ready(0);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("gate did not open")
            .unwrap();
    }

    #[tokio::test]
    async fn empty_gate_is_open() {
        let gate = ReadinessGate::new(0);
        assert!(gate.all_ready());
        gate.wait_all_ready().await;
    }
}
