// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Core consensus logic and data structures.
//!
//! Nodes exchange [`ConsensusMessage`]s of two kinds. In round `r` every node
//! broadcasts a proposal. Once a node has collected `N - F` proposals for `r`
//! it broadcasts a vote carrying the majority proposal (or a coin flip on a
//! tie). Once it has collected `N - F` votes for `r` it either decides, if at
//! least `F + 1` of them agree, or moves on to round `r + 1`.
//!
//! The protocol logic lives in the sans-io [`RoundStateMachine`], which turns
//! incoming messages into [`Action`]s. [`Node`] performs those actions over an
//! [`All2All`] broadcast layer.
//!
//! [`All2All`]: crate::All2All

mod node;
mod state_machine;
mod tally;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::node::{Node, NodeStatus};
pub use self::state_machine::{MAX_RETAINED_ROUNDS, NodeState, Phase, RoundStateMachine};
pub use self::tally::{Tally, majority_or_random};
use crate::Round;

/// Value carried by proposals and votes.
///
/// Binary consensus only ever decides on [`Value::Zero`] or [`Value::One`].
/// [`Value::Abstain`] expresses no opinion and is excluded from all tallies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    #[serde(rename = "0")]
    Zero,
    #[serde(rename = "1")]
    One,
    #[serde(rename = "?")]
    Abstain,
}

impl Value {
    /// Returns `true` iff this is either [`Value::Zero`] or [`Value::One`].
    #[must_use]
    pub const fn is_bit(self) -> bool {
        !matches!(self, Self::Abstain)
    }
}

impl From<bool> for Value {
    fn from(bit: bool) -> Self {
        if bit { Self::One } else { Self::Zero }
    }
}

impl TryFrom<u8> for Value {
    type Error = ConsensusError;

    fn try_from(bit: u8) -> Result<Self, Self::Error> {
        match bit {
            0 => Ok(Self::Zero),
            1 => Ok(Self::One),
            other => Err(ConsensusError::InvalidValue(other.to_string())),
        }
    }
}

impl FromStr for Value {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(Self::Zero),
            "1" => Ok(Self::One),
            "?" => Ok(Self::Abstain),
            other => Err(ConsensusError::InvalidValue(other.to_owned())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zero => write!(f, "0"),
            Self::One => write!(f, "1"),
            Self::Abstain => write!(f, "?"),
        }
    }
}

/// Kind of a [`ConsensusMessage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Proposal,
    Vote,
}

impl FromStr for MessageKind {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposal" => Ok(Self::Proposal),
            "vote" => Ok(Self::Vote),
            other => Err(ConsensusError::UnknownMessageKind(other.to_owned())),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proposal => write!(f, "proposal"),
            Self::Vote => write!(f, "vote"),
        }
    }
}

/// Message type exchanged between nodes.
///
/// Carries no sender information, nodes are assumed to never forge messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusMessage {
    pub round: Round,
    pub value: Value,
    pub kind: MessageKind,
}

impl ConsensusMessage {
    /// Creates a new proposal for the given `round`.
    #[must_use]
    pub const fn proposal(round: Round, value: Value) -> Self {
        Self {
            round,
            value,
            kind: MessageKind::Proposal,
        }
    }

    /// Creates a new vote for the given `round`.
    #[must_use]
    pub const fn vote(round: Round, value: Value) -> Self {
        Self {
            round,
            value,
            kind: MessageKind::Vote,
        }
    }

    /// Builds a message from its textual parts, e.g. `("vote", 3, "?")`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::UnknownMessageKind`] if `kind` is neither
    /// `proposal` nor `vote`, and [`ConsensusError::InvalidValue`] if `value`
    /// is not one of `0`, `1` or `?`.
    pub fn parse(kind: &str, round: Round, value: &str) -> Result<Self, ConsensusError> {
        Ok(Self {
            round,
            value: value.parse()?,
            kind: kind.parse()?,
        })
    }
}

impl fmt::Display for ConsensusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {})", self.kind, self.round, self.value)
    }
}

/// Output of a [`RoundStateMachine`] transition.
///
/// The state machine never performs any I/O itself.
/// It is up to the caller to carry out these actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Send the message to all nodes, including ourselves.
    Broadcast(ConsensusMessage),
    /// The node has irrevocably decided on `value` in `round`.
    Decide { round: Round, value: Value },
}

/// Errors arising from interpreting consensus messages.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("unknown message kind `{0}`")]
    UnknownMessageKind(String),
    #[error("invalid value `{0}`, expected one of `0`, `1` or `?`")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_messages() {
        let msg = ConsensusMessage::parse("proposal", 1, "0").unwrap();
        assert_eq!(msg, ConsensusMessage::proposal(1, Value::Zero));
        let msg = ConsensusMessage::parse("vote", 7, "?").unwrap();
        assert_eq!(msg, ConsensusMessage::vote(7, Value::Abstain));
    }

    #[test]
    fn unknown_message_kind() {
        let res = ConsensusMessage::parse("commit", 1, "1");
        assert!(matches!(res, Err(ConsensusError::UnknownMessageKind(k)) if k == "commit"));
    }

    #[test]
    fn invalid_values() {
        assert!(matches!(
            "2".parse::<Value>(),
            Err(ConsensusError::InvalidValue(_))
        ));
        assert!(Value::try_from(2).is_err());
        assert_eq!(Value::try_from(1).unwrap(), Value::One);
        assert!(!Value::Abstain.is_bit());
        assert!(Value::from(false).is_bit());
    }

    #[test]
    fn json_representation() {
        let msg = ConsensusMessage::vote(2, Value::Abstain);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"round":2,"value":"?","kind":"vote"}"#);
        let parsed: ConsensusMessage =
            serde_json::from_str(r#"{"round":1,"value":"1","kind":"proposal"}"#).unwrap();
        assert_eq!(parsed, ConsensusMessage::proposal(1, Value::One));
        assert!(serde_json::from_str::<ConsensusMessage>(r#"{"round":1,"value":"1","kind":"ack"}"#).is_err());
    }
}
