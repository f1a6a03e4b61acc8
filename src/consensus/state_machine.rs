// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Round-based state machine of a single node.
//!
//! The [`RoundStateMachine`] owns all protocol state of one node: the current
//! round, the current value, whether the node has decided, and the proposal
//! and vote buffers for each round. It is fed with incoming messages and
//! returns the [`Action`] the node should take, if any.
//!
//! Threshold actions are latched per round. A node sends at most one vote and
//! evaluates at most one vote quorum per round, no matter how many more
//! messages arrive for that round afterwards.

use std::collections::BTreeMap;

use log::{debug, info, trace, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::tally::{RoundTally, Tally, majority_or_random};
use super::{Action, ConsensusMessage, MessageKind, Value};
use crate::{NodeId, Round};

/// Number of rounds behind and ahead of the current round for which buffers are kept.
///
/// Messages for rounds outside this window are dropped as stale.
pub const MAX_RETAINED_ROUNDS: Round = 16;

/// Externally visible snapshot of a node's protocol state.
///
/// For a faulty node all fields except `killed` are permanently `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    pub killed: bool,
    pub value: Option<Value>,
    pub decided: Option<bool>,
    pub round: Option<Round>,
}

/// Protocol phase a node is currently in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Faulty node, never transitions.
    Silent,
    /// Honest node that has not initiated consensus yet.
    Uninitialized,
    /// Waiting for a quorum of proposals in the given round.
    Proposing(Round),
    /// Sent its vote, waiting for a quorum of votes in the given round.
    Voting(Round),
    /// Decided in the given round, terminal.
    Decided(Round),
}

/// Consensus state machine of a single node.
///
/// Generic over the random source used for breaking ties,
/// so tests can use a seeded RNG to reproduce specific coin flips.
pub struct RoundStateMachine<R: Rng> {
    id: NodeId,
    num_nodes: usize,
    max_faulty: usize,
    faulty: bool,
    killed: bool,

    value: Option<Value>,
    decided: Option<bool>,
    round: Option<Round>,

    /// Messages for rounds below this one are stale.
    oldest_retained_round: Round,
    /// Received proposals by round.
    proposals: BTreeMap<Round, RoundTally>,
    /// Received votes by round.
    votes: BTreeMap<Round, RoundTally>,

    rng: R,
}

impl<R: Rng> RoundStateMachine<R> {
    /// Creates the state machine of an honest node.
    ///
    /// The node starts out in round 0 holding `initial_value`,
    /// it only enters round 1 once [`Self::initiate`] is called.
    pub fn honest(
        id: NodeId,
        num_nodes: usize,
        max_faulty: usize,
        initial_value: Value,
        rng: R,
    ) -> Self {
        Self {
            id,
            num_nodes,
            max_faulty,
            faulty: false,
            killed: false,
            value: Some(initial_value),
            decided: Some(false),
            round: Some(0),
            oldest_retained_round: 1,
            proposals: BTreeMap::new(),
            votes: BTreeMap::new(),
            rng,
        }
    }

    /// Creates the state machine of a silently faulty node.
    ///
    /// It never transitions and never produces any [`Action`].
    pub fn faulty(id: NodeId, num_nodes: usize, max_faulty: usize, rng: R) -> Self {
        Self {
            id,
            num_nodes,
            max_faulty,
            faulty: true,
            killed: false,
            value: None,
            decided: None,
            round: None,
            oldest_retained_round: 1,
            proposals: BTreeMap::new(),
            votes: BTreeMap::new(),
            rng,
        }
    }

    /// Number of messages needed per phase, that is `N - F`.
    #[must_use]
    pub const fn quorum(&self) -> usize {
        self.num_nodes.saturating_sub(self.max_faulty)
    }

    /// Number of agreeing votes needed to decide, that is `F + 1`.
    #[must_use]
    pub const fn decision_threshold(&self) -> usize {
        self.max_faulty + 1
    }

    #[must_use]
    pub const fn is_faulty(&self) -> bool {
        self.faulty
    }

    #[must_use]
    pub const fn is_killed(&self) -> bool {
        self.killed
    }

    #[must_use]
    pub fn is_decided(&self) -> bool {
        self.decided == Some(true)
    }

    /// Returns a snapshot of the externally visible state.
    #[must_use]
    pub const fn snapshot(&self) -> NodeState {
        NodeState {
            killed: self.killed,
            value: self.value,
            decided: self.decided,
            round: self.round,
        }
    }

    /// Returns the protocol phase the node is in.
    #[must_use]
    pub fn phase(&self) -> Phase {
        let Some(round) = self.round else {
            return Phase::Silent;
        };
        if self.is_decided() {
            return Phase::Decided(round);
        }
        if round == 0 {
            return Phase::Uninitialized;
        }
        match self.proposals.get(&round) {
            Some(tally) if tally.quorum_reached() => Phase::Voting(round),
            _ => Phase::Proposing(round),
        }
    }

    /// Enters round 1 with `initial_value` and proposes it.
    ///
    /// Does nothing for faulty, killed or decided nodes,
    /// as well as for nodes that are already past round 0.
    pub fn initiate(&mut self, initial_value: Value) -> Option<Action> {
        if self.faulty || self.killed || self.is_decided() {
            trace!("[node {}] not initiating consensus", self.id);
            return None;
        }
        if let Some(round) = self.round.filter(|r| *r > 0) {
            warn!("[node {}] already initiated, in round {round}", self.id);
            return None;
        }
        self.round = Some(1);
        self.value = Some(initial_value);
        self.decided = Some(false);
        debug!("[node {}] initiating consensus with {initial_value}", self.id);
        Some(Action::Broadcast(ConsensusMessage::proposal(
            1,
            initial_value,
        )))
    }

    /// Handles any incoming message by dispatching on its kind.
    pub fn handle(&mut self, msg: ConsensusMessage) -> Option<Action> {
        match msg.kind {
            MessageKind::Proposal => self.on_proposal(msg.round, msg.value),
            MessageKind::Vote => self.on_vote(msg.round, msg.value),
        }
    }

    /// Handles an incoming proposal `value` for `round`.
    ///
    /// Once `N - F` proposals for `round` have arrived, returns a vote for the
    /// majority proposal (random on a tie). This happens exactly once per round.
    pub fn on_proposal(&mut self, round: Round, value: Value) -> Option<Action> {
        if !self.accepts(MessageKind::Proposal, round) {
            return None;
        }
        let quorum = self.quorum();
        let capacity = self.num_nodes;
        let tally = self.proposals.entry(round).or_default();
        if tally.len() >= capacity {
            debug!(
                "[node {}] ignoring excess proposal for round {round}",
                self.id
            );
            return None;
        }
        if !tally.record(value, quorum) {
            return None;
        }

        let vote = majority_or_random(tally.values(), &mut self.rng);
        debug!(
            "[node {}] proposal quorum in round {round}, voting {vote}",
            self.id
        );
        Some(Action::Broadcast(ConsensusMessage::vote(round, vote)))
    }

    /// Handles an incoming vote `value` for `round`.
    ///
    /// Once `N - F` votes for `round` have arrived, decides if at least `F + 1`
    /// of them agree on a bit. Otherwise moves to the next round and proposes the
    /// majority vote (random on a tie). This happens exactly once per round.
    pub fn on_vote(&mut self, round: Round, value: Value) -> Option<Action> {
        if !self.accepts(MessageKind::Vote, round) {
            return None;
        }
        let quorum = self.quorum();
        let capacity = self.num_nodes;
        let threshold = self.decision_threshold();
        let tally = self.votes.entry(round).or_default();
        if tally.len() >= capacity {
            debug!("[node {}] ignoring excess vote for round {round}", self.id);
            return None;
        }
        if !tally.record(value, quorum) {
            return None;
        }

        let counts = Tally::count(tally.values());
        if let Some(decision) = counts.supported(threshold) {
            return Some(self.decide(round, decision));
        }

        let next_value = majority_or_random(tally.values(), &mut self.rng);
        let Some(next_round) = round.checked_add(1) else {
            warn!("[node {}] vote quorum for last possible round {round}", self.id);
            return None;
        };
        let current_round = self.round.unwrap_or_default();
        if next_round <= current_round {
            debug!(
                "[node {}] vote quorum for round {round} while in round {current_round}",
                self.id
            );
            return None;
        }
        info!(
            "[node {}] no decision in round {round} ({} zeros, {} ones), advancing with {next_value}",
            self.id, counts.zeros, counts.ones
        );
        self.round = Some(next_round);
        self.value = Some(next_value);
        self.prune(next_round);
        Some(Action::Broadcast(ConsensusMessage::proposal(
            next_round, next_value,
        )))
    }

    /// Stops the node, all later messages are ignored.
    ///
    /// Calling this more than once has no additional effect.
    pub fn stop(&mut self) {
        if !self.killed {
            debug!("[node {}] stopped", self.id);
        }
        self.killed = true;
    }

    fn decide(&mut self, round: Round, value: Value) -> Action {
        let round = self.round.unwrap_or_default().max(round);
        info!("[node {}] decided {value} in round {round}", self.id);
        self.round = Some(round);
        self.value = Some(value);
        self.decided = Some(true);
        self.proposals.clear();
        self.votes.clear();
        Action::Decide { round, value }
    }

    /// Checks whether a message of `kind` for `round` should be processed.
    fn accepts(&self, kind: MessageKind, round: Round) -> bool {
        let reason = if self.faulty {
            "node is faulty"
        } else if self.killed {
            "node is stopped"
        } else if self.is_decided() {
            "node has decided"
        } else if round == 0 {
            "round 0 is not a protocol round"
        } else if round < self.oldest_retained_round {
            "round was pruned"
        } else if round > self.round.unwrap_or_default().saturating_add(MAX_RETAINED_ROUNDS) {
            "round is too far ahead"
        } else {
            return true;
        };
        trace!(
            "[node {}] dropping stale {kind} for round {round}: {reason}",
            self.id
        );
        false
    }

    /// Drops buffers for rounds more than [`MAX_RETAINED_ROUNDS`] behind `current_round`.
    fn prune(&mut self, current_round: Round) {
        let oldest = current_round.saturating_sub(MAX_RETAINED_ROUNDS).max(1);
        if oldest <= self.oldest_retained_round {
            return;
        }
        self.oldest_retained_round = oldest;
        self.proposals = self.proposals.split_off(&oldest);
        self.votes = self.votes.split_off(&oldest);
    }
}
