// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::trace;
use rand::Rng;
use tokio::sync::{Mutex, RwLock, mpsc};

use super::SimulatedNetwork;
use crate::NodeId;
use crate::network::NetworkError;

/// Capacity of each node's incoming packet channel.
const CHANNEL_CAPACITY: usize = 65_536;

/// Simulated network core, where messages are routed between nodes.
///
/// It stores virtual latencies for all links between any pair of nodes.
/// Messages sent by nodes into the network core are then delayed accordingly.
/// Each packet is independently dropped with the configured loss probability.
///
/// Nodes are addressed by port, that is node `i` is reachable at any IP with port `i`.
pub struct SimulatedNetworkCore {
    /// Map from node ID to channel for delivering packets.
    nodes: RwLock<HashMap<NodeId, mpsc::Sender<Vec<u8>>>>,
    /// Latency between each pair of nodes.
    latencies: RwLock<HashMap<(NodeId, NodeId), Duration>>,
    /// Fallback latency to use for any link that is not configured.
    default_latency: Duration,
    /// Maximum jitter to apply to each packet in milliseconds.
    per_packet_jitter_ms: f64,
    /// Any packet is lost with this probability.
    per_packet_loss_probability: f64,
}

impl Default for SimulatedNetworkCore {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedNetworkCore {
    /// Create a new simulated network core without any nodes.
    ///
    /// Defaults to 10 ms latency, 1 ms jitter and no packet loss.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            latencies: RwLock::new(HashMap::new()),
            default_latency: Duration::from_millis(10),
            per_packet_jitter_ms: 1.0,
            per_packet_loss_probability: 0.0,
        }
    }

    /// Turns this instance into a new instance with a different default latency.
    #[must_use]
    pub const fn with_default_latency(mut self, latency: Duration) -> Self {
        self.default_latency = latency;
        self
    }

    /// Turns this instance into a new instance with a different latency jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_ms: f64) -> Self {
        self.per_packet_jitter_ms = jitter_ms;
        self
    }

    /// Turns this instance into a new instance with a different packet loss rate.
    #[must_use]
    pub const fn with_packet_loss(mut self, probability: f64) -> Self {
        self.per_packet_loss_probability = probability;
        self
    }

    /// Adds a node to the simulated network.
    ///
    /// The node is registered in the network core with a channel.
    /// Returns a [`SimulatedNetwork`] interface for the node.
    /// Joining again with the same `id` replaces the previous interface.
    pub async fn join<S, R>(self: &Arc<Self>, id: NodeId) -> SimulatedNetwork<S, R> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.nodes.write().await.insert(id, tx);
        SimulatedNetwork {
            id,
            network_core: Arc::clone(self),
            receiver: Mutex::new(rx),
            _msg_types: PhantomData,
        }
    }

    /// Removes a node from the simulated network.
    ///
    /// Later sends to the node fail, packets already in flight are dropped.
    pub async fn leave(&self, id: NodeId) {
        self.nodes.write().await.remove(&id);
    }

    /// Sets the latency between two nodes.
    ///
    /// The latency is symmetric in both directions.
    /// For asymmetric links, use [`Self::set_asymmetric_latency`] instead.
    pub async fn set_latency(&self, node1: NodeId, node2: NodeId, latency: Duration) {
        let mut guard = self.latencies.write().await;
        guard.insert((node1, node2), latency);
        guard.insert((node2, node1), latency);
    }

    /// Sets the latency from one node to the other.
    ///
    /// The latency is set only in one direction, `from` -> `to`.
    /// For symmetric links, use [`Self::set_latency`] instead.
    pub async fn set_asymmetric_latency(&self, from: NodeId, to: NodeId, latency: Duration) {
        self.latencies.write().await.insert((from, to), latency);
    }

    /// Sends a simulated packet from one node to another.
    ///
    /// This schedules delivery for the packet after the link's propagation delay.
    /// Returns as soon as the packet is scheduled (or lost).
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::UnknownPeer`] if no node is registered for `to`.
    pub(super) async fn send(
        &self,
        payload: Vec<u8>,
        from: NodeId,
        to: SocketAddr,
    ) -> Result<(), NetworkError> {
        let to_id = NodeId::from(to.port());
        let Some(channel) = self.nodes.read().await.get(&to_id).cloned() else {
            return Err(NetworkError::UnknownPeer(to));
        };
        let mut latency = self
            .latencies
            .read()
            .await
            .get(&(from, to_id))
            .copied()
            .unwrap_or(self.default_latency);

        {
            let mut rng = rand::rng();
            let loss = self.per_packet_loss_probability.clamp(0.0, 1.0);
            if rng.random_bool(loss) {
                trace!("simulated loss of packet from {from} to {to_id}");
                return Ok(());
            }
            if self.per_packet_jitter_ms > 0.0 {
                let jitter = rng.random_range(0.0..self.per_packet_jitter_ms);
                latency += Duration::from_secs_f64(jitter / 1000.0);
            }
        }
        if from == to_id {
            latency = Duration::ZERO;
        }

        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            // receiver may be gone if the node left in the meantime
            let _ = channel.send(payload).await;
        });
        Ok(())
    }
}
