// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

use futures::future::join_all;
use log::{trace, warn};

use super::All2All;
use crate::NodeInfo;
use crate::consensus::ConsensusMessage;
use crate::network::{Network, NetworkError, serialize};

/// A trivial implementation of an all-to-all broadcast protocol.
///
/// Sends each message once to every node over the underlying [`Network`].
/// After that the message is forgotten, nothing is ever retransmitted.
/// If the underlying [`Network`] is not reliable, the message might be lost.
/// Failing to send to one node does not affect sending to any other node.
pub struct TrivialAll2All<N: Network> {
    nodes: Vec<NodeInfo>,
    network: N,
}

impl<N: Network> TrivialAll2All<N> {
    /// Creates a new `TrivialAll2All` instance.
    /// Messages will be broadcast to all `nodes` over the provided `network`.
    pub const fn new(nodes: Vec<NodeInfo>, network: N) -> Self {
        Self { nodes, network }
    }
}

impl<N> All2All for TrivialAll2All<N>
where
    N: Network<Send = ConsensusMessage, Recv = ConsensusMessage>,
{
    async fn broadcast(&self, msg: &ConsensusMessage) -> Result<(), NetworkError> {
        let bytes = serialize(msg)?;
        let sends = self.nodes.iter().map(|node| {
            let bytes = &bytes;
            async move { (node, self.network.send_serialized(bytes, node.address).await) }
        });
        for (node, res) in join_all(sends).await {
            match res {
                Ok(()) => trace!("sent {msg} to node {}", node.id),
                Err(err) => warn!("failed to send {msg} to node {}: {err}", node.id),
            }
        }
        Ok(())
    }

    async fn receive(&self) -> Result<ConsensusMessage, NetworkError> {
        self.network.receive().await
    }
}
