// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Simulated network interface.
//!
//! This module provides an implementation of a simulated network interface,
//! which may be used for local testing and simulations.
//! It works by having [`SimulatedNetwork`] instances communicate with eachother
//! via an underlying [`SimulatedNetworkCore`], which links them together.
//! The core delays delivery of packets, simulating network latency, and
//! supports jitter as well as packet loss.

mod core;

use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use log::warn;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc};

pub use self::core::SimulatedNetworkCore;
use super::{MTU_BYTES, Network, NetworkError, deserialize, serialize};
use crate::NodeId;

/// A simulated network interface for local testing and simulations.
pub struct SimulatedNetwork<S, R> {
    /// ID of the node this network interface belongs to.
    id: NodeId,
    /// Reference to the simulated network core this interface is attached to.
    network_core: Arc<SimulatedNetworkCore>,
    /// Receiver for incoming packets.
    receiver: Mutex<mpsc::Receiver<Vec<u8>>>,
    _msg_types: PhantomData<fn(S) -> R>,
}

impl<S, R> SimulatedNetwork<S, R> {
    /// Returns the ID of the node this interface belongs to.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }
}

impl<S, R> Network for SimulatedNetwork<S, R>
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
        self.network_core
            .send(bytes.to_vec(), self.id, addr)
            .await
    }

    async fn receive(&self) -> Result<R, NetworkError> {
        let mut receiver = self.receiver.lock().await;
        loop {
            let Some(bytes) = receiver.recv().await else {
                return Err(NetworkError::ChannelClosed);
            };
            match deserialize(&bytes) {
                Ok(msg) => return Ok(msg),
                Err(err) => warn!("node {} dropping undecodable packet: {err}", self.id),
            }
        }
    }
}
