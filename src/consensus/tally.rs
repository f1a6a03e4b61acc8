// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-round buffers of received values and majority computation.

use rand::Rng;

use super::Value;

/// Number of zeros and ones among a set of values.
///
/// Abstains are not counted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub zeros: usize,
    pub ones: usize,
}

impl Tally {
    /// Counts zeros and ones in `values`, ignoring abstains.
    #[must_use]
    pub fn count(values: &[Value]) -> Self {
        let mut tally = Self::default();
        for value in values {
            match value {
                Value::Zero => tally.zeros += 1,
                Value::One => tally.ones += 1,
                Value::Abstain => {}
            }
        }
        tally
    }

    /// Returns the strict majority bit, or `None` on a tie.
    #[must_use]
    pub fn majority(&self) -> Option<Value> {
        match self.zeros.cmp(&self.ones) {
            std::cmp::Ordering::Greater => Some(Value::Zero),
            std::cmp::Ordering::Less => Some(Value::One),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Returns the bit supported by at least `threshold` values, if any.
    ///
    /// If both bits reach the threshold, zero wins only with strictly more support.
    #[must_use]
    pub fn supported(&self, threshold: usize) -> Option<Value> {
        if self.zeros < threshold && self.ones < threshold {
            return None;
        }
        Some(if self.zeros > self.ones {
            Value::Zero
        } else {
            Value::One
        })
    }
}

/// Returns the strict majority bit of `values`, or a uniformly random bit on a tie.
///
/// Abstains are ignored, so an all-abstain input is a (0, 0) tie.
pub fn majority_or_random<R: Rng + ?Sized>(values: &[Value], rng: &mut R) -> Value {
    Tally::count(values)
        .majority()
        .unwrap_or_else(|| Value::from(rng.random::<bool>()))
}

/// Values received for a single round in one phase (proposals or votes).
///
/// Values are kept in arrival order.
/// The buffer latches the first time it reaches the quorum,
/// so threshold actions fire at most once per round.
#[derive(Clone, Debug, Default)]
pub(super) struct RoundTally {
    values: Vec<Value>,
    quorum_reached: bool,
}

impl RoundTally {
    /// Appends `value` to the buffer.
    ///
    /// Returns `true` iff this value made the buffer reach `quorum` for the first time.
    pub(super) fn record(&mut self, value: Value, quorum: usize) -> bool {
        self.values.push(value);
        if !self.quorum_reached && self.values.len() >= quorum {
            self.quorum_reached = true;
            return true;
        }
        false
    }

    pub(super) fn values(&self) -> &[Value] {
        &self.values
    }

    pub(super) fn len(&self) -> usize {
        self.values.len()
    }

    pub(super) const fn quorum_reached(&self) -> bool {
        self.quorum_reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::seeded_rng;

    use crate::consensus::Value::{Abstain, One, Zero};

    #[test]
    fn count_ignores_abstain() {
        let tally = Tally::count(&[Zero, Abstain, One, Zero, Abstain]);
        assert_eq!(tally, Tally { zeros: 2, ones: 1 });
        assert_eq!(Tally::count(&[]), Tally::default());
    }

    #[test]
    fn strict_majority() {
        let mut rng = seeded_rng(0);
        assert_eq!(majority_or_random(&[Zero, Zero, One], &mut rng), Zero);
        assert_eq!(majority_or_random(&[One, Abstain, Abstain], &mut rng), One);
        assert_eq!(majority_or_random(&[One, Zero, One, Abstain], &mut rng), One);
    }

    #[test]
    fn supported_value() {
        let tally = Tally { zeros: 2, ones: 1 };
        assert_eq!(tally.supported(2), Some(Zero));
        assert_eq!(tally.supported(3), None);
        let tally = Tally { zeros: 2, ones: 2 };
        assert_eq!(tally.supported(2), Some(One));
    }

    #[test]
    fn tie_break_distribution() {
        let mut rng = seeded_rng(42);
        let trials = 1000;
        let mut ones = 0;
        for _ in 0..trials {
            if majority_or_random(&[Zero, One, Abstain], &mut rng) == One {
                ones += 1;
            }
        }
        let zeros = trials - ones;
        assert!((400..=600).contains(&ones), "ones = {ones}");
        assert!((400..=600).contains(&zeros), "zeros = {zeros}");
    }

    #[test]
    fn all_abstain_is_a_tie() {
        let mut rng = seeded_rng(7);
        let mut seen = [false; 2];
        for _ in 0..64 {
            match majority_or_random(&[Abstain, Abstain], &mut rng) {
                Zero => seen[0] = true,
                One => seen[1] = true,
                Abstain => panic!("tie-break must produce a bit"),
            }
        }
        assert_eq!(seen, [true, true]);
    }

    #[test]
    fn quorum_latches_once() {
        let mut tally = RoundTally::default();
        assert!(!tally.record(Zero, 3));
        assert!(!tally.record(One, 3));
        assert!(tally.record(Zero, 3));
        assert!(tally.quorum_reached());
        assert!(!tally.record(One, 3));
        assert!(!tally.record(One, 3));
        assert_eq!(tally.len(), 5);
        assert_eq!(tally.values(), &[Zero, One, Zero, One, One]);
    }
}
