// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! UDP network interface.
//!
//! This module provides an implementation of the [`Network`] trait for UDP sockets.
//! It is essentially a wrapper around [`tokio::net::UdpSocket`].

use std::marker::PhantomData;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use log::warn;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::UdpSocket;

use super::{MTU_BYTES, Network, NetworkError, deserialize, serialize};

/// Number of bytes used as buffer for any incoming packet.
///
/// Anything we send fits in one MTU sized packet.
const RECEIVE_BUFFER_SIZE: usize = MTU_BYTES;

/// Implementation of network abstraction over a simple UDP socket.
pub struct UdpNetwork<S, R> {
    socket: UdpSocket,
    local_addr: SocketAddr,
    _msg_types: PhantomData<fn(S) -> R>,
}

impl<S, R> UdpNetwork<S, R> {
    /// Creates a new `UdpNetwork` instance bound to the given `port`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::BadSocket`] if the `port` is already in use.
    pub async fn bind(port: u16) -> Result<Self, NetworkError> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket,
            local_addr,
            _msg_types: PhantomData,
        })
    }

    /// Creates a new `UdpNetwork` instance bound to an arbitrary port.
    /// The port is assigned by the OS.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::BadSocket`] if no socket can be opened.
    pub async fn bind_any_port() -> Result<Self, NetworkError> {
        Self::bind(0).await
    }

    /// Returns the UDP port number the network is bound to.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.local_addr.port()
    }
}

impl<S, R> Network for UdpNetwork<S, R>
where
    S: Serialize + Sync,
    R: DeserializeOwned + Send,
{
    type Send = S;
    type Recv = R;

    async fn send(&self, msg: &S, addr: SocketAddr) -> Result<(), NetworkError> {
        let bytes = serialize(msg)?;
        self.send_serialized(&bytes, addr).await
    }

    async fn send_serialized(&self, bytes: &[u8], addr: SocketAddr) -> Result<(), NetworkError> {
        if bytes.len() > MTU_BYTES {
            return Err(NetworkError::MessageTooLarge(bytes.len()));
        }
        let bytes_sent = self.socket.send_to(bytes, addr).await?;
        debug_assert_eq!(bytes.len(), bytes_sent);
        Ok(())
    }

    async fn receive(&self) -> Result<R, NetworkError> {
        let mut buf = [0; RECEIVE_BUFFER_SIZE];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            match deserialize(&buf[..len]) {
                Ok(msg) => return Ok(msg),
                Err(err) => warn!("dropping undecodable packet from {from}: {err}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{ConsensusMessage, Value};
    use crate::network::localhost_ip_sockaddr;

    type ConsensusUdp = UdpNetwork<ConsensusMessage, ConsensusMessage>;

    #[tokio::test]
    async fn ping_pong() {
        let socket1 = ConsensusUdp::bind_any_port().await.unwrap();
        let socket2 = ConsensusUdp::bind_any_port().await.unwrap();
        let addr1 = localhost_ip_sockaddr(socket1.port());
        let addr2 = localhost_ip_sockaddr(socket2.port());

        let proposal = ConsensusMessage::proposal(1, Value::Zero);
        socket1.send(&proposal, addr2).await.unwrap();
        assert_eq!(socket2.receive().await.unwrap(), proposal);

        let vote = ConsensusMessage::vote(1, Value::Zero);
        socket2.send(&vote, addr1).await.unwrap();
        assert_eq!(socket1.receive().await.unwrap(), vote);
    }

    #[tokio::test]
    async fn skips_garbage() {
        let socket1 = ConsensusUdp::bind_any_port().await.unwrap();
        let socket2 = ConsensusUdp::bind_any_port().await.unwrap();
        let addr2 = localhost_ip_sockaddr(socket2.port());

        // unknown message kind, then a valid message
        socket1.send_serialized(&[1, 1, 9], addr2).await.unwrap();
        let vote = ConsensusMessage::vote(4, Value::Abstain);
        socket1.send(&vote, addr2).await.unwrap();
        assert_eq!(socket2.receive().await.unwrap(), vote);
    }

    #[tokio::test]
    async fn port_in_use() {
        let socket = ConsensusUdp::bind_any_port().await.unwrap();
        assert!(matches!(
            ConsensusUdp::bind(socket.port()).await,
            Err(NetworkError::BadSocket(_))
        ));
    }
}
