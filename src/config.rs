// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cluster configuration.
//!
//! A cluster is described by the fault bound `F` and one entry per node,
//! holding the node's initial bit and whether it is faulty.
//! The number of nodes `N` is the number of entries.
//! Node `i` is reachable at `host:(base_port + i)`.
//!
//! # Examples
//!
//! ```
//! use benor::ClusterConfig;
//!
//! let config = ClusterConfig::from_toml_str(
//!     r#"
//!     max_faulty = 1
//!
//!     [[nodes]]
//!     initial_value = "0"
//!
//!     [[nodes]]
//!     initial_value = "0"
//!
//!     [[nodes]]
//!     initial_value = "1"
//!
//!     [[nodes]]
//!     initial_value = "1"
//!     faulty = true
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.num_nodes(), 4);
//! assert_eq!(config.quorum(), 3);
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consensus::Value;
use crate::{NodeId, NodeInfo};

/// Port of node 0 unless configured otherwise.
pub const DEFAULT_BASE_PORT: u16 = 3000;

/// Error type for loading and validating configurations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can not read config file")]
    Io(#[from] std::io::Error),
    #[error("can not parse config")]
    Parse(#[from] toml::de::Error),
    #[error("cluster has no nodes")]
    Empty,
    #[error("fault bound {max_faulty} is not smaller than the number of nodes {num_nodes}")]
    FaultBoundTooLarge { max_faulty: usize, num_nodes: usize },
    #[error("{faulty} nodes are marked faulty but the fault bound is {max_faulty}")]
    TooManyFaulty { faulty: usize, max_faulty: usize },
    #[error("initial value of node {0} is not a bit")]
    InvalidInitialValue(NodeId),
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("port of node {0} is out of range")]
    PortOutOfRange(NodeId),
}

/// Configuration of a single node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Bit the node proposes in round 1.
    pub initial_value: Value,
    /// Faulty nodes stay silent for the whole execution.
    #[serde(default)]
    pub faulty: bool,
}

/// Configuration of a whole cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Maximum number of faulty nodes `F` the protocol is run for.
    pub max_faulty: usize,
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    pub nodes: Vec<NodeConfig>,
}

const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

const fn default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

impl ClusterConfig {
    /// Creates a validated configuration on localhost.
    ///
    /// Node `i` starts with `initial_values[i]`.
    /// The nodes listed in `faulty` are faulty.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `faulty` contains unknown nodes,
    /// or if the configuration does not pass [`Self::validate`].
    pub fn new(
        initial_values: Vec<Value>,
        faulty: &[NodeId],
        max_faulty: usize,
    ) -> Result<Self, ConfigError> {
        let mut nodes = initial_values
            .into_iter()
            .map(|initial_value| NodeConfig {
                initial_value,
                faulty: false,
            })
            .collect::<Vec<_>>();
        for &id in faulty {
            nodes
                .get_mut(id as usize)
                .ok_or(ConfigError::UnknownNode(id))?
                .faulty = true;
        }
        let config = Self {
            max_faulty,
            host: default_host(),
            base_port: DEFAULT_BASE_PORT,
            nodes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file can not be read or parsed,
    /// or if the configuration does not pass [`Self::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates a TOML configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `toml` can not be parsed,
    /// or if the configuration does not pass [`Self::validate`].
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for consistency.
    ///
    /// Fault bounds violating `N > 3F` are accepted with a warning,
    /// this allows running clusters where agreement is not guaranteed.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Empty`] if there are no nodes.
    /// - [`ConfigError::FaultBoundTooLarge`] if `F >= N`.
    /// - [`ConfigError::TooManyFaulty`] if more than `F` nodes are faulty.
    /// - [`ConfigError::InvalidInitialValue`] if any initial value is an abstain.
    /// - [`ConfigError::PortOutOfRange`] if the last node's port overflows.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let num_nodes = self.num_nodes();
        if num_nodes == 0 {
            return Err(ConfigError::Empty);
        }
        if self.max_faulty >= num_nodes {
            return Err(ConfigError::FaultBoundTooLarge {
                max_faulty: self.max_faulty,
                num_nodes,
            });
        }
        let faulty = self.faulty_ids().count();
        if faulty > self.max_faulty {
            return Err(ConfigError::TooManyFaulty {
                faulty,
                max_faulty: self.max_faulty,
            });
        }
        if let Some(id) = self.node_ids().find(|id| !self.nodes[*id as usize].initial_value.is_bit()) {
            return Err(ConfigError::InvalidInitialValue(id));
        }
        self.address(num_nodes as NodeId - 1)?;
        if 3 * self.max_faulty >= num_nodes {
            warn!(
                "fault bound {} for {num_nodes} nodes violates N > 3F, agreement is not guaranteed",
                self.max_faulty
            );
        }
        Ok(())
    }

    /// Total number of nodes `N`.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of messages needed per phase, that is `N - F`.
    #[must_use]
    pub fn quorum(&self) -> usize {
        self.num_nodes().saturating_sub(self.max_faulty)
    }

    /// Number of agreeing votes needed to decide, that is `F + 1`.
    #[must_use]
    pub const fn decision_threshold(&self) -> usize {
        self.max_faulty + 1
    }

    /// Returns the configuration of node `id`, if it exists.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&NodeConfig> {
        self.nodes.get(id as usize)
    }

    /// Iterates over all node IDs.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        0..self.num_nodes() as NodeId
    }

    /// Iterates over the IDs of all honest nodes.
    pub fn honest_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_ids().filter(|id| !self.nodes[*id as usize].faulty)
    }

    /// Iterates over the IDs of all faulty nodes.
    pub fn faulty_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_ids().filter(|id| self.nodes[*id as usize].faulty)
    }

    /// Returns the endpoint of node `id`, that is `host:(base_port + id)`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PortOutOfRange`] if the port does not fit in `u16`.
    pub fn address(&self, id: NodeId) -> Result<SocketAddr, ConfigError> {
        let port = u16::try_from(id)
            .ok()
            .and_then(|offset| self.base_port.checked_add(offset))
            .ok_or(ConfigError::PortOutOfRange(id))?;
        Ok(SocketAddr::new(self.host, port))
    }

    /// Returns [`NodeInfo`] with the endpoint of every node.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PortOutOfRange`] if any port does not fit in `u16`.
    pub fn node_infos(&self) -> Result<Vec<NodeInfo>, ConfigError> {
        self.node_ids()
            .map(|id| {
                Ok(NodeInfo {
                    id,
                    address: self.address(id)?,
                })
            })
            .collect()
    }
}
