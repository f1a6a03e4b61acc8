// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Direct all-to-all broadcast protocols.
//!
//! The [`All2All`] trait gives a simple interface for broadcasting messages
//! to every node of the cluster, including the sender itself.
//! It does not impose restrictions on the guarantees that should be provided.
//! However, each implementor should clearly document which guarantees it provides.
//!
//! This module provides [`TrivialAll2All`], a best-effort all-to-all broadcast.
//! Its exact guarantees also depend on the underlying [`Network`].
//!
//! # Examples
//!
//! ```rust
//! use benor::all2all::All2All;
//! use benor::consensus::ConsensusMessage;
//! use benor::network::NetworkError;
//!
//! async fn broadcast_all(
//!     msgs: &[ConsensusMessage],
//!     all2all: impl All2All,
//! ) -> Result<(), NetworkError> {
//!     for msg in msgs {
//!         all2all.broadcast(msg).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! [`Network`]: crate::network::Network

mod trivial;

pub use self::trivial::TrivialAll2All;
use crate::consensus::ConsensusMessage;
use crate::network::NetworkError;

/// Abstraction for a direct all-to-all network communication protocol.
pub trait All2All {
    /// Broadcasts the given message to all known nodes.
    ///
    /// Which delivery guarantees are provided depends on the implementor.
    /// This is allowed to be best-effort or any stronger set of guarantees.
    ///
    /// # Errors
    ///
    /// Implementors should return a [`NetworkError`] only if the message could
    /// not be sent to any node at all, e.g. because it can not be serialized.
    fn broadcast(
        &self,
        msg: &ConsensusMessage,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    /// Receives a message from any of the other nodes.
    ///
    /// Resolves to the next successfully deserialized [`ConsensusMessage`].
    /// Does not provide information on which node sent the message.
    ///
    /// # Errors
    ///
    /// Implementors should return a [`NetworkError`] iff the underlying network fails.
    fn receive(&self) -> impl Future<Output = Result<ConsensusMessage, NetworkError>> + Send;
}
