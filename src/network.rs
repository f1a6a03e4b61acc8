// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! An abstraction layer for networking.
//!
//! The [`Network`] trait provides a common interface for networking operations.
//! Messages are typed, serialization to bytes happens inside the implementation.
//! Delivery is best-effort: messages may be lost, delayed or reordered,
//! and no implementation ever retransmits.
//!
//! Specific implementations for different underlying network stacks are provided:
//! - [`UdpNetwork`] abstracts a simple UDP socket
//! - [`SimulatedNetwork`] provides a simulated network for local testing
//!
//! # Examples
//!
//! ```
//! use benor::consensus::{ConsensusMessage, Value};
//! use benor::network::{Network, NetworkError, localhost_ip_sockaddr};
//!
//! async fn propose_to_node_0<N>(network: &N) -> Result<ConsensusMessage, NetworkError>
//! where
//!     N: Network<Send = ConsensusMessage, Recv = ConsensusMessage>,
//! {
//!     let msg = ConsensusMessage::proposal(1, Value::One);
//!     network.send(&msg, localhost_ip_sockaddr(3000)).await?;
//!     network.receive().await
//! }
//! ```

pub mod simulated;
mod udp;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use self::simulated::SimulatedNetwork;
pub use self::udp::UdpNetwork;

/// Maximum payload size of a UDP packet.
pub const MTU_BYTES: usize = 1500;

const BINCODE_CONFIG: bincode::config::Configuration = bincode::config::standard();

/// Error type for network operations.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("malformed address")]
    MalformedAddress,
    #[error("serialization error")]
    Serialization(#[from] bincode::error::EncodeError),
    #[error("deserialization error")]
    Deserialization(#[from] bincode::error::DecodeError),
    #[error("message of {0} bytes exceeds the MTU")]
    MessageTooLarge(usize),
    #[error("bad socket state")]
    BadSocket(#[from] std::io::Error),
    #[error("no node listening at {0}")]
    UnknownPeer(SocketAddr),
    #[error("channel closed")]
    ChannelClosed,
}

/// Abstraction of a network interface for sending and receiving messages.
///
/// `Send` is the type of outgoing messages, `Recv` the type of incoming ones.
pub trait Network: Send + Sync {
    type Send;
    type Recv;

    /// Sends `msg` to the node listening at `addr`.
    ///
    /// Success only means the message was handed to the network.
    fn send(
        &self,
        msg: &Self::Send,
        addr: SocketAddr,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    /// Sends already serialized bytes to the node listening at `addr`.
    ///
    /// Useful for sending the same message to many nodes.
    fn send_serialized(
        &self,
        bytes: &[u8],
        addr: SocketAddr,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    /// Receives the next successfully deserialized message.
    ///
    /// Packets that fail to deserialize are skipped.
    fn receive(&self) -> impl Future<Output = Result<Self::Recv, NetworkError>> + Send;
}

/// Serializes `msg` into owned bytes using [`bincode`].
///
/// # Errors
///
/// Returns [`NetworkError::Serialization`] if bincode encoding fails, and
/// [`NetworkError::MessageTooLarge`] if the result does not fit in [`MTU_BYTES`].
pub fn serialize<T: Serialize>(msg: &T) -> Result<Vec<u8>, NetworkError> {
    let bytes = bincode::serde::encode_to_vec(msg, BINCODE_CONFIG)?;
    if bytes.len() > MTU_BYTES {
        return Err(NetworkError::MessageTooLarge(bytes.len()));
    }
    Ok(bytes)
}

/// Tries to deserialize a message from bytes using [`bincode`].
///
/// # Errors
///
/// Returns [`NetworkError::MessageTooLarge`] if `bytes` exceed [`MTU_BYTES`],
/// and [`NetworkError::Deserialization`] if bincode decoding fails.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, NetworkError> {
    if bytes.len() > MTU_BYTES {
        return Err(NetworkError::MessageTooLarge(bytes.len()));
    }
    let (msg, _) = bincode::serde::decode_from_slice(bytes, BINCODE_CONFIG)?;
    Ok(msg)
}

/// Returns the socket address of `port` on localhost.
#[must_use]
pub const fn localhost_ip_sockaddr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}
