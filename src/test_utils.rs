// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Utility types and functions for tests.

use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::All2All;
use crate::consensus::ConsensusMessage;
use crate::network::NetworkError;

/// Creates a deterministic RNG for reproducible coin flips.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// [`All2All`] instance that records broadcasts instead of sending them.
///
/// Clones share the same record. Never receives anything.
#[derive(Clone, Default)]
pub struct RecordingAll2All {
    sent: Arc<Mutex<Vec<ConsensusMessage>>>,
}

impl RecordingAll2All {
    /// Returns all messages broadcast so far, in order.
    pub fn sent(&self) -> Vec<ConsensusMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl All2All for RecordingAll2All {
    async fn broadcast(&self, msg: &ConsensusMessage) -> Result<(), NetworkError> {
        self.sent.lock().unwrap().push(*msg);
        Ok(())
    }

    async fn receive(&self) -> Result<ConsensusMessage, NetworkError> {
        futures::future::pending().await
    }
}
