// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Local clusters of consensus nodes.
//!
//! A [`LocalCluster`] runs all nodes of a [`ClusterConfig`] inside one process,
//! either over a [`SimulatedNetworkCore`] or over real UDP sockets on localhost.
//! It also plays the role of the initiator, calling [`Node::start`] on every node.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use fastrace::Span;
use fastrace::collector::SpanContext;
use fastrace::future::FutureExt;
use futures::future::join_all;
use log::{info, warn};
use tokio::task::JoinHandle;

use crate::all2all::TrivialAll2All;
use crate::config::{ClusterConfig, ConfigError};
use crate::consensus::{ConsensusMessage, Node, NodeState, Value};
use crate::network::simulated::{SimulatedNetwork, SimulatedNetworkCore};
use crate::network::{UdpNetwork, localhost_ip_sockaddr};
use crate::{All2All, NodeId, NodeInfo, ReadinessGate};

/// Interval at which [`LocalCluster::wait_for_decisions`] checks node states.
const DECISION_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Broadcast layer of nodes in a simulated cluster.
pub type SimulatedAll2All = TrivialAll2All<SimulatedNetwork<ConsensusMessage, ConsensusMessage>>;
/// Broadcast layer of nodes in a UDP cluster.
pub type UdpAll2All = TrivialAll2All<UdpNetwork<ConsensusMessage, ConsensusMessage>>;

/// All nodes of a cluster, running in the current process.
pub struct LocalCluster<A: All2All> {
    config: ClusterConfig,
    nodes: Vec<Arc<Node<A>>>,
    tasks: Vec<JoinHandle<Result<()>>>,
}

impl LocalCluster<SimulatedAll2All> {
    /// Creates all nodes of `config`, attached to the simulated network `core`.
    ///
    /// Node `i` joins the core with ID `i`,
    /// the host and base port of `config` are not used.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PortOutOfRange`] if `config` has too many nodes.
    pub async fn simulated(
        config: ClusterConfig,
        core: Arc<SimulatedNetworkCore>,
    ) -> Result<Self, ConfigError> {
        let infos = config
            .node_ids()
            .map(|id| {
                let port = u16::try_from(id).map_err(|_| ConfigError::PortOutOfRange(id))?;
                Ok(NodeInfo {
                    id,
                    address: localhost_ip_sockaddr(port),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let mut all2all = Vec::with_capacity(infos.len());
        for info in &infos {
            let network = core.join(info.id).await;
            all2all.push(TrivialAll2All::new(infos.clone(), network));
        }
        Self::from_all2all(config, all2all)
    }
}

impl LocalCluster<UdpAll2All> {
    /// Creates all nodes of `config`, each bound to its UDP port.
    ///
    /// # Errors
    ///
    /// Returns an error if any node address is invalid or any port is in use.
    pub async fn udp(config: ClusterConfig) -> Result<Self> {
        let infos = config.node_infos()?;
        let mut networks = Vec::with_capacity(infos.len());
        for info in &infos {
            networks.push(UdpNetwork::bind(info.address.port()).await?);
        }
        Ok(Self::from_udp_networks(config, infos, networks)?)
    }

    /// Creates all nodes of `config`, each bound to a port chosen by the OS.
    ///
    /// The base port of `config` is not used, node addresses use its host.
    ///
    /// # Errors
    ///
    /// Returns an error if any socket can not be opened.
    pub async fn udp_any_ports(config: ClusterConfig) -> Result<Self> {
        let mut infos = Vec::with_capacity(config.num_nodes());
        let mut networks = Vec::with_capacity(config.num_nodes());
        for id in config.node_ids() {
            let network = UdpNetwork::bind_any_port().await?;
            infos.push(NodeInfo {
                id,
                address: SocketAddr::new(config.host, network.port()),
            });
            networks.push(network);
        }
        Ok(Self::from_udp_networks(config, infos, networks)?)
    }

    fn from_udp_networks(
        config: ClusterConfig,
        infos: Vec<NodeInfo>,
        networks: Vec<UdpNetwork<ConsensusMessage, ConsensusMessage>>,
    ) -> Result<Self, ConfigError> {
        let all2all = networks
            .into_iter()
            .map(|network| TrivialAll2All::new(infos.clone(), network))
            .collect();
        Self::from_all2all(config, all2all)
    }
}

impl<A> LocalCluster<A>
where
    A: All2All + Send + Sync + 'static,
{
    /// Creates one node per [`All2All`] instance, node `i` using `all2all[i]`.
    ///
    /// All nodes share one [`ReadinessGate`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownNode`] if there are more instances than nodes in `config`.
    pub fn from_all2all(config: ClusterConfig, all2all: Vec<A>) -> Result<Self, ConfigError> {
        let readiness = Arc::new(ReadinessGate::new(config.num_nodes()));
        let nodes = all2all
            .into_iter()
            .enumerate()
            .map(|(id, all2all)| {
                Node::new(id as NodeId, &config, all2all, Arc::clone(&readiness)).map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            nodes,
            tasks: Vec::new(),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ClusterConfig {
        &self.config
    }

    #[must_use]
    pub fn nodes(&self) -> &[Arc<Node<A>>] {
        &self.nodes
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Arc<Node<A>>> {
        self.nodes.get(id as usize)
    }

    /// Spawns the receive loop of every node.
    pub fn spawn(&mut self) {
        let parent = SpanContext::random();
        for node in &self.nodes {
            let span = Span::root(format!("node {}", node.id()), parent);
            let node = Arc::clone(node);
            self.tasks
                .push(tokio::spawn(async move { node.run().await }.in_span(span)));
        }
    }

    /// Starts consensus on all nodes.
    ///
    /// Resolves once every node has passed the readiness gate
    /// and honest nodes have sent their first proposal.
    pub async fn start_all(&self) {
        join_all(self.nodes.iter().map(|node| node.start())).await;
    }

    /// Waits until every honest node that was not stopped has decided.
    ///
    /// Returns `false` if that did not happen within `timeout`.
    pub async fn wait_for_decisions(&self, timeout: Duration) -> bool {
        let all_decided = async {
            loop {
                let states = self.states().await;
                let pending = self
                    .config
                    .honest_ids()
                    .filter(|id| {
                        let state = &states[*id as usize];
                        !state.killed && state.decided != Some(true)
                    })
                    .count();
                if pending == 0 {
                    return;
                }
                tokio::time::sleep(DECISION_POLL_INTERVAL).await;
            }
        };
        match tokio::time::timeout(timeout, all_decided).await {
            Ok(()) => {
                info!("all honest nodes decided");
                true
            }
            Err(_) => {
                warn!("not all honest nodes decided within {timeout:?}");
                false
            }
        }
    }

    /// Returns a snapshot of every node's state, indexed by node ID.
    pub async fn states(&self) -> Vec<NodeState> {
        join_all(self.nodes.iter().map(|node| node.get_state())).await
    }

    /// Returns the decided value of every honest node that has decided.
    pub async fn decisions(&self) -> Vec<(NodeId, Value)> {
        self.states()
            .await
            .into_iter()
            .enumerate()
            .filter(|(_, state)| state.decided == Some(true))
            .filter_map(|(id, state)| state.value.map(|value| (id as NodeId, value)))
            .collect()
    }

    /// Stops all nodes. Their receive loops keep running.
    pub async fn stop_all(&self) {
        join_all(self.nodes.iter().map(|node| node.stop())).await;
    }

    /// Shuts down the receive loops of all nodes.
    ///
    /// # Errors
    ///
    /// Returns the first error any of the receive loops ended with.
    pub async fn shutdown(self) -> Result<()> {
        for node in &self.nodes {
            node.get_cancel_token().cancel();
        }
        for res in join_all(self.tasks).await {
            res??;
        }
        Ok(())
    }
}
