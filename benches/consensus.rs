// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;

use benor::NodeId;
use benor::consensus::{Action, ConsensusMessage, RoundStateMachine, Value, majority_or_random};
use benor::network::{deserialize, serialize};
use divan::counter::ItemsCount;
use rand::prelude::*;
use rand::rngs::StdRng;

fn main() {
    // run registered benchmarks.
    divan::main();
}

fn random_values(len: usize) -> Vec<Value> {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| match rng.random_range(0..3) {
            0 => Value::Zero,
            1 => Value::One,
            _ => Value::Abstain,
        })
        .collect()
}

#[divan::bench(args = [4, 64, 1024])]
fn majority(bencher: divan::Bencher, len: usize) {
    bencher
        .counter(ItemsCount::new(len))
        .with_inputs(|| random_values(len))
        .bench_refs(|values| majority_or_random(values, &mut rand::rng()));
}

#[divan::bench]
fn serialize_vote(bencher: divan::Bencher) {
    bencher
        .counter(ItemsCount::new(1_usize))
        .with_inputs(|| ConsensusMessage::vote(1, Value::One))
        .bench_values(|msg: ConsensusMessage| serialize(&msg).unwrap());
}

#[divan::bench]
fn deserialize_vote(bencher: divan::Bencher) {
    bencher
        .counter(ItemsCount::new(1_usize))
        .with_inputs(|| serialize(&ConsensusMessage::vote(1, Value::One)).unwrap())
        .bench_values(|bytes: Vec<u8>| {
            let _msg: ConsensusMessage = deserialize(&bytes).unwrap();
        });
}

/// Runs a whole cluster of state machines until every node decided.
///
/// Every broadcast is delivered to all nodes in the same order.
#[divan::bench(args = [4, 16, 64])]
fn full_cluster(bencher: divan::Bencher, num_nodes: usize) {
    let max_faulty = (num_nodes - 1) / 3;
    bencher
        .counter(ItemsCount::new(num_nodes))
        .with_inputs(|| {
            (0..num_nodes)
                .map(|id| {
                    let initial = Value::from(id % 3 == 0);
                    let rng = StdRng::seed_from_u64(id as u64);
                    let sm = RoundStateMachine::honest(
                        id as NodeId,
                        num_nodes,
                        max_faulty,
                        initial,
                        rng,
                    );
                    (sm, initial)
                })
                .collect::<Vec<_>>()
        })
        .bench_values(|nodes| {
            let mut queue = VecDeque::new();
            let mut machines = Vec::with_capacity(nodes.len());
            for (mut sm, initial) in nodes {
                if let Some(Action::Broadcast(msg)) = sm.initiate(initial) {
                    queue.push_back(msg);
                }
                machines.push(sm);
            }
            while let Some(msg) = queue.pop_front() {
                for sm in &mut machines {
                    if let Some(Action::Broadcast(out)) = sm.handle(msg) {
                        queue.push_back(out);
                    }
                }
            }
            machines
        });
}
