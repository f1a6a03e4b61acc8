// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Benor: asynchronous randomized binary consensus under silent faults.
//!
//! Simulates `N` processes running a round-based proposal/vote protocol that
//! tolerates up to `F` omission-faulty processes. Each round has a propose
//! sub-phase and a vote sub-phase; ties are broken by a random coin, which
//! gives probabilistic termination.
//!
//! The algorithmic core is the sans-io [`RoundStateMachine`]. A [`Node`] wires
//! it to an [`All2All`] broadcast layer running over any [`Network`], and
//! [`LocalCluster`] assembles complete clusters for simulations and tests.
//!
//! [`Network`]: crate::network::Network

#![deny(rustdoc::broken_intra_doc_links)]

pub mod all2all;
pub mod cluster;
pub mod config;
pub mod consensus;
pub mod logging;
pub mod network;
pub mod readiness;
#[cfg(test)]
pub mod test_utils;

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

pub use self::all2all::All2All;
pub use self::cluster::LocalCluster;
pub use self::config::ClusterConfig;
pub use self::consensus::{ConsensusMessage, MessageKind, Node, RoundStateMachine, Value};
pub use self::readiness::ReadinessGate;

/// Node ID number type.
///
/// Node IDs are dense, i.e. a cluster of `N` nodes uses IDs `0..N`.
pub type NodeId = u64;

/// Round number type.
///
/// Round 0 means the node has not initiated consensus yet.
/// The first round of the protocol is round 1.
pub type Round = u64;

/// Node information as known about other nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    /// Send [`ConsensusMessage`]s to this address to reach the node.
    pub address: SocketAddr,
}
