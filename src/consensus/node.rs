// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A single consensus node.
//!
//! [`Node`] is a single-threaded actor around a [`RoundStateMachine`].
//! Every message is applied to the state machine to completion before the
//! next one is looked at. Resulting broadcasts happen after the state machine
//! lock is released, and are best-effort.

use std::fmt;
use std::sync::Arc;

use color_eyre::Result;
use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::state_machine::{NodeState, Phase, RoundStateMachine};
use super::{Action, ConsensusMessage, Value};
use crate::config::{ClusterConfig, ConfigError};
use crate::{All2All, NodeId, ReadinessGate};

/// Health reported by [`Node::status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Faulty,
    Live,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Faulty => write!(f, "faulty"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Consensus node.
///
/// Owns the protocol state of one process and the [`All2All`] instance used
/// to talk to all other nodes. Share it behind an [`Arc`] to both run its
/// receive loop via [`Node::run`] and operate it from outside.
pub struct Node<A: All2All, R: Rng = StdRng> {
    id: NodeId,
    faulty: bool,
    initial_value: Value,
    state_machine: Mutex<RoundStateMachine<R>>,
    all2all: A,
    readiness: Arc<ReadinessGate>,
    cancel_token: CancellationToken,
}

impl<A> Node<A, StdRng>
where
    A: All2All + Send + Sync,
{
    /// Creates node `id` of the cluster described by `config`.
    ///
    /// Ties are broken with an OS-seeded RNG.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownNode`] if `config` has no node `id`.
    pub fn new(
        id: NodeId,
        config: &ClusterConfig,
        all2all: A,
        readiness: Arc<ReadinessGate>,
    ) -> Result<Self, ConfigError> {
        Self::with_rng(id, config, all2all, readiness, StdRng::from_os_rng())
    }
}

impl<A, R> Node<A, R>
where
    A: All2All + Send + Sync,
    R: Rng + Send,
{
    /// Creates node `id` of the cluster described by `config`,
    /// breaking ties with the given random source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownNode`] if `config` has no node `id`.
    pub fn with_rng(
        id: NodeId,
        config: &ClusterConfig,
        all2all: A,
        readiness: Arc<ReadinessGate>,
        rng: R,
    ) -> Result<Self, ConfigError> {
        let node = config.node(id).ok_or(ConfigError::UnknownNode(id))?;
        let (num_nodes, max_faulty) = (config.num_nodes(), config.max_faulty);
        let state_machine = if node.faulty {
            RoundStateMachine::faulty(id, num_nodes, max_faulty, rng)
        } else {
            RoundStateMachine::honest(id, num_nodes, max_faulty, node.initial_value, rng)
        };
        Ok(Self {
            id,
            faulty: node.faulty,
            initial_value: node.initial_value,
            state_machine: Mutex::new(state_machine),
            all2all,
            readiness,
            cancel_token: CancellationToken::new(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Reports whether this node is faulty.
    ///
    /// A stopped honest node still reports [`NodeStatus::Live`].
    #[must_use]
    pub const fn status(&self) -> NodeStatus {
        if self.faulty {
            NodeStatus::Faulty
        } else {
            NodeStatus::Live
        }
    }

    /// Returns a snapshot of the node's protocol state.
    pub async fn get_state(&self) -> NodeState {
        self.state_machine.lock().await.snapshot()
    }

    /// Returns the protocol phase the node is in.
    pub async fn phase(&self) -> Phase {
        self.state_machine.lock().await.phase()
    }

    /// Returns the token that shuts down [`Node::run`] when cancelled.
    pub fn get_cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Delivers `msg` to this node.
    ///
    /// Faulty and stopped nodes acknowledge but otherwise ignore the message.
    #[fastrace::trace(short_name = true)]
    pub async fn message(&self, msg: ConsensusMessage) {
        trace!("[node {}] received {msg}", self.id);
        let action = self.state_machine.lock().await.handle(msg);
        self.perform(action).await;
    }

    /// Initiates consensus with the configured initial value.
    ///
    /// Waits for all nodes to be ready first.
    /// Faulty nodes wait for the gate as well, then do nothing.
    #[fastrace::trace(short_name = true)]
    pub async fn start(&self) {
        self.readiness.wait_all_ready().await;
        if self.faulty {
            debug!("[node {}] faulty, not initiating consensus", self.id);
            return;
        }
        let action = self.state_machine.lock().await.initiate(self.initial_value);
        self.perform(action).await;
    }

    /// Stops the node. Messages delivered afterwards are ignored.
    ///
    /// The receive loop keeps running until cancelled via [`Node::get_cancel_token`].
    pub async fn stop(&self) {
        self.state_machine.lock().await.stop();
    }

    /// Runs the receive loop until the cancel token is cancelled.
    ///
    /// Marks the node as ready on the [`ReadinessGate`] before receiving.
    ///
    /// # Errors
    ///
    /// Returns an error only if the underlying network fails.
    pub async fn run(&self) -> Result<()> {
        self.readiness.mark_ready(self.id);
        loop {
            tokio::select! {
                res = self.all2all.receive() => self.message(res?).await,
                () = self.cancel_token.cancelled() => return Ok(()),
            }
        }
    }

    async fn perform(&self, action: Option<Action>) {
        match action {
            Some(Action::Broadcast(msg)) => {
                debug!("[node {}] broadcasting {msg}", self.id);
                if let Err(err) = self.all2all.broadcast(&msg).await {
                    warn!("[node {}] failed to broadcast {msg}: {err}", self.id);
                }
            }
            Some(Action::Decide { .. }) | None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::consensus::Value::{One, Zero};
    use crate::test_utils::{RecordingAll2All, seeded_rng};

    fn create_node(
        config: &ClusterConfig,
        id: NodeId,
        readiness: Arc<ReadinessGate>,
    ) -> (Node<RecordingAll2All, StdRng>, RecordingAll2All) {
        let all2all = RecordingAll2All::default();
        let node = Node::with_rng(id, config, all2all.clone(), readiness, seeded_rng(id)).unwrap();
        (node, all2all)
    }

    fn ready_gate(num_nodes: usize) -> Arc<ReadinessGate> {
        let gate = ReadinessGate::new(num_nodes);
        for id in 0..num_nodes {
            gate.mark_ready(id as NodeId);
        }
        Arc::new(gate)
    }

    #[test]
    fn status() {
        let config = ClusterConfig::new(vec![Zero, One, One, One], &[3], 1).unwrap();
        let gate = ready_gate(4);
        let (honest, _) = create_node(&config, 0, gate.clone());
        let (faulty, _) = create_node(&config, 3, gate.clone());
        assert_eq!(honest.status(), NodeStatus::Live);
        assert_eq!(faulty.status(), NodeStatus::Faulty);
        assert_eq!(faulty.status().to_string(), "faulty");

        let res = Node::new(4, &config, RecordingAll2All::default(), gate);
        assert!(matches!(res, Err(ConfigError::UnknownNode(4))));
    }

    #[tokio::test]
    async fn quorum_gating() {
        let config = ClusterConfig::new(vec![Zero; 4], &[], 1).unwrap();
        let (node, all2all) = create_node(&config, 0, ready_gate(4));

        node.message(ConsensusMessage::proposal(1, One)).await;
        node.message(ConsensusMessage::proposal(1, One)).await;
        assert!(all2all.sent().is_empty());

        node.message(ConsensusMessage::proposal(1, One)).await;
        assert_eq!(all2all.sent(), vec![ConsensusMessage::vote(1, One)]);

        // no second vote for the same round
        node.message(ConsensusMessage::proposal(1, Zero)).await;
        assert_eq!(all2all.sent().len(), 1);
    }

    #[tokio::test]
    async fn start_waits_for_readiness() {
        let config = ClusterConfig::new(vec![One, Zero], &[], 0).unwrap();
        let gate = Arc::new(ReadinessGate::new(2).with_poll_interval(Duration::from_millis(1)));
        let (node, all2all) = create_node(&config, 0, gate.clone());
        let node = Arc::new(node);
        gate.mark_ready(0);

        let n = node.clone();
        let start = tokio::spawn(async move { n.start().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(all2all.sent().is_empty());
        assert_eq!(node.get_state().await.round, Some(0));

        gate.mark_ready(1);
        start.await.unwrap();
        assert_eq!(all2all.sent(), vec![ConsensusMessage::proposal(1, One)]);
        assert_eq!(node.phase().await, Phase::Proposing(1));
    }

    #[tokio::test]
    async fn faulty_node_stays_silent() {
        let config = ClusterConfig::new(vec![One; 4], &[1], 1).unwrap();
        let (node, all2all) = create_node(&config, 1, ready_gate(4));
        node.start().await;
        for _ in 0..4 {
            node.message(ConsensusMessage::proposal(1, One)).await;
            node.message(ConsensusMessage::vote(1, One)).await;
        }
        assert!(all2all.sent().is_empty());
        let state = node.get_state().await;
        assert_eq!(state.value, None);
        assert_eq!(state.decided, None);
        assert_eq!(state.round, None);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let config = ClusterConfig::new(vec![One; 4], &[], 1).unwrap();
        let (node, all2all) = create_node(&config, 0, ready_gate(4));
        node.start().await;
        node.message(ConsensusMessage::proposal(1, One)).await;

        node.stop().await;
        let stopped = node.get_state().await;
        node.stop().await;
        assert_eq!(node.get_state().await, stopped);
        assert!(stopped.killed);

        let sent_before = all2all.sent().len();
        for _ in 0..4 {
            node.message(ConsensusMessage::proposal(1, One)).await;
            node.message(ConsensusMessage::vote(1, One)).await;
        }
        assert_eq!(node.get_state().await, stopped);
        assert_eq!(all2all.sent().len(), sent_before);
        assert_eq!(node.status(), NodeStatus::Live);
    }

    #[tokio::test]
    async fn run_until_cancelled() {
        let config = ClusterConfig::new(vec![One; 2], &[], 0).unwrap();
        let gate = Arc::new(ReadinessGate::new(2));
        let (node, _) = create_node(&config, 1, gate.clone());
        let node = Arc::new(node);
        let cancel_token = node.get_cancel_token();

        let n = node.clone();
        let handle = tokio::spawn(async move { n.run().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(gate.is_ready(1));
        assert!(!gate.is_ready(0));

        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("receive loop did not stop")
            .unwrap()
            .unwrap();
    }
}
