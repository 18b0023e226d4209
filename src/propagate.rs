// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Propagation scheduler: drives group resolution to a fixed point.
//!
//! Work is processed in generations. The pending list is swapped out, each
//! node in it is resolved in insertion order, and nodes dirtied along the way
//! form the next generation. A node that was already swept up in another
//! group during the same generation is skipped. Reaching the iteration cap
//! with work left is reported as a stall, not an error: the last settled
//! values stay in place.

use crate::circuit::Circuit;
use crate::error::{Result, SimError};
use crate::group::{GroupResolver, ResolverOptions};
use crate::netlist::NodeId;

/// Deduplicated node queue that preserves insertion order.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    order: Vec<NodeId>,
    queued: Vec<bool>,
}

impl WorkQueue {
    pub fn new(node_slots: usize) -> Self {
        Self { order: Vec::with_capacity(64), queued: vec![false; node_slots] }
    }

    /// Queue `n` unless it is already pending.
    #[inline]
    pub fn push(&mut self, n: NodeId) {
        if !self.queued[n] {
            self.queued[n] = true;
            self.order.push(n);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.order.iter().copied()
    }

    pub fn clear(&mut self) {
        for &n in &self.order {
            self.queued[n] = false;
        }
        self.order.clear();
    }

    /// Move every pending node into `out` (cleared first), emptying the queue.
    pub fn drain_into(&mut self, out: &mut Vec<NodeId>) {
        out.clear();
        for &n in &self.order {
            self.queued[n] = false;
        }
        std::mem::swap(&mut self.order, out);
    }
}

/// A seed whose flood fill was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunawayReport {
    pub seed: NodeId,
    pub limit: usize,
}

/// Outcome of one propagation call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Generations processed.
    pub iterations: usize,
    pub converged: bool,
    /// Nodes still dirty when the cap was hit, in queue order.
    pub stalled_nodes: Vec<NodeId>,
    /// Group resolutions performed.
    pub resolutions: usize,
    /// Node value flips applied.
    pub changes: usize,
    pub runaway: Vec<RunawayReport>,
}

impl Diagnostics {
    /// Turn a stall into [`SimError::NonConvergent`] for callers that want
    /// to treat it as a failure.
    pub fn into_result(self) -> Result<Self> {
        if self.converged {
            Ok(self)
        } else {
            Err(SimError::NonConvergent { iterations: self.iterations, stalled: self.stalled_nodes })
        }
    }
}

pub struct Scheduler {
    resolver: GroupResolver,
    iteration_cap: usize,
    current: Vec<NodeId>,
    // resolved_in[n] == generation means n was settled in this generation
    resolved_in: Vec<u32>,
    generation: u32,
    last: Diagnostics,
}

impl Scheduler {
    pub fn new(node_slots: usize, iteration_cap: usize, options: ResolverOptions) -> Self {
        Self {
            resolver: GroupResolver::new(node_slots, options),
            iteration_cap,
            current: Vec::new(),
            resolved_in: vec![0; node_slots],
            generation: 0,
            last: Diagnostics { converged: true, ..Default::default() },
        }
    }

    pub fn set_iteration_cap(&mut self, cap: usize) {
        self.iteration_cap = cap;
    }

    /// Diagnostics of the most recent [`Scheduler::propagate`] call.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.last
    }

    fn next_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.resolved_in.iter_mut().for_each(|g| *g = 0);
            self.generation = 1;
        }
    }

    /// Propagate everything pending in `circuit` plus `seeds` until the
    /// circuit settles or the iteration cap is reached.
    pub fn propagate(&mut self, circuit: &mut Circuit, seeds: &[NodeId]) -> &Diagnostics {
        for &n in seeds {
            if circuit.contains(n) && !circuit.is_sentinel(n) {
                circuit.pending.push(n);
            }
        }

        let mut diag = Diagnostics::default();
        while !circuit.pending.is_empty() {
            if diag.iterations >= self.iteration_cap {
                diag.stalled_nodes = circuit.pending.iter().collect();
                circuit.pending.clear();
                break;
            }
            self.next_generation();
            circuit.pending.drain_into(&mut self.current);

            for i in 0..self.current.len() {
                let n = self.current[i];
                if self.resolved_in[n] == self.generation {
                    continue;
                }
                match self.resolver.resolve(circuit, n) {
                    Ok(_) => {}
                    Err(SimError::RunawayGroup { seed, limit }) => {
                        clilog::warn!(
                            "group from node {} exceeds {} nodes ({} found), left unresolved",
                            seed,
                            limit,
                            self.resolver.members().len()
                        );
                        diag.runaway.push(RunawayReport { seed, limit });
                        // other seeds in the same group must not walk it again
                        for &m in self.resolver.members() {
                            self.resolved_in[m] = self.generation;
                        }
                        continue;
                    }
                    Err(e) => {
                        clilog::error!("group resolution from node {} failed: {}", n, e);
                        continue;
                    }
                }
                diag.resolutions += 1;
                for &m in self.resolver.members() {
                    self.resolved_in[m] = self.generation;
                }
                for &m in self.resolver.changed() {
                    circuit.enqueue_dependents(m);
                }
                diag.changes += self.resolver.changed().len();
            }
            diag.iterations += 1;
        }

        diag.converged = diag.stalled_nodes.is_empty();
        if !diag.converged {
            clilog::warn!(
                "propagation stalled after {} iterations with {} dirty nodes",
                diag.iterations,
                diag.stalled_nodes.len()
            );
        }
        self.last = diag;
        &self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::{NetlistBuilder, Pull};

    #[test]
    fn test_work_queue_dedup_order() {
        let mut q = WorkQueue::new(8);
        for n in [3, 1, 3, 5, 1] {
            q.push(n);
        }
        assert_eq!(q.iter().collect::<Vec<_>>(), vec![3, 1, 5]);
        let mut out = vec![7];
        q.drain_into(&mut out);
        assert_eq!(out, vec![3, 1, 5]);
        assert!(q.is_empty());
        q.push(3);
        assert_eq!(q.len(), 1);
    }

    /// `n` inverters in a chain; the first input is a pulled-up node named "in".
    fn inverter_chain(n: usize) -> (Circuit, Vec<NodeId>) {
        let mut b = NetlistBuilder::new();
        let gnd = b.ground("vss");
        b.power("vcc");
        let mut stages = vec![b.named("in", Pull::Up)];
        for _ in 0..n {
            let out = b.node(Pull::Up);
            b.transistor(*stages.last().unwrap(), out, gnd);
            stages.push(out);
        }
        (Circuit::build(&b.build()).unwrap(), stages)
    }

    fn settle_all(s: &mut Scheduler, c: &mut Circuit) -> Diagnostics {
        let all: Vec<_> = c.normal_node_ids().collect();
        s.propagate(c, &all).clone()
    }

    #[test]
    fn test_chain_settles_within_depth() {
        let (mut c, stages) = inverter_chain(6);
        let mut s = Scheduler::new(c.node_slots(), 100, ResolverOptions::default());
        let d = settle_all(&mut s, &mut c);
        assert!(d.converged);
        for (i, &n) in stages.iter().enumerate() {
            assert_eq!(c.value(n), i % 2 == 0, "stage {}", i);
        }

        c.force_node(stages[0], false).unwrap();
        let d = s.propagate(&mut c, &[]).clone();
        assert!(d.converged);
        assert!(d.iterations <= stages.len(), "{} iterations", d.iterations);
        for (i, &n) in stages.iter().enumerate() {
            assert_eq!(c.value(n), i % 2 == 1, "stage {}", i);
        }
    }

    #[test]
    fn test_empty_propagate_is_idempotent() {
        let (mut c, _) = inverter_chain(4);
        let mut s = Scheduler::new(c.node_slots(), 100, ResolverOptions::default());
        settle_all(&mut s, &mut c);
        let before: Vec<_> = c.node_ids().map(|n| c.state(n)).collect();
        let d = s.propagate(&mut c, &[]).clone();
        assert_eq!(d.iterations, 0);
        assert!(d.converged);
        let after: Vec<_> = c.node_ids().map(|n| c.state(n)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_cap_reports_stall() {
        let (mut c, stages) = inverter_chain(8);
        let mut s = Scheduler::new(c.node_slots(), 100, ResolverOptions::default());
        settle_all(&mut s, &mut c);
        s.set_iteration_cap(2);
        c.force_node(stages[0], false).unwrap();
        let d = s.propagate(&mut c, &[]).clone();
        assert!(!d.converged);
        assert_eq!(d.iterations, 2);
        assert!(!d.stalled_nodes.is_empty());
        assert!(c.pending.is_empty());
        let err = d.into_result().unwrap_err();
        assert!(matches!(err, SimError::NonConvergent { iterations: 2, .. }));
    }

    #[test]
    fn test_runaway_is_local() {
        // two independent pass chains, one of them longer than the bound
        let mut b = NetlistBuilder::new();
        b.ground("vss");
        b.power("vcc");
        let on = b.named("on", Pull::Up);
        let long: Vec<_> = (0..5).map(|_| b.node(Pull::Up)).collect();
        for w in long.windows(2) {
            b.transistor(on, w[0], w[1]);
        }
        let short = [b.node(Pull::Up), b.node(Pull::None)];
        b.transistor(on, short[0], short[1]);
        let mut c = Circuit::build(&b.build()).unwrap();
        let opts = ResolverOptions { max_group_size: 3, ..Default::default() };
        let mut s = Scheduler::new(c.node_slots(), 100, opts);
        let d = s.propagate(&mut c, &[long[0], short[1]]).clone();
        assert_eq!(d.runaway, vec![RunawayReport { seed: long[0], limit: 3 }]);
        assert!(d.converged);
        assert_eq!(c.state(short[1]).value, true);
        assert_eq!(c.state(short[1]).floating, false);
    }

    #[test]
    fn test_runaway_group_reported_once() {
        let mut b = NetlistBuilder::new();
        b.ground("vss");
        b.power("vcc");
        let on = b.named("on", Pull::Up);
        let chain: Vec<_> = (0..200).map(|_| b.node(Pull::None)).collect();
        for w in chain.windows(2) {
            b.transistor(on, w[0], w[1]);
        }
        let mut c = Circuit::build(&b.build()).unwrap();
        let opts = ResolverOptions { max_group_size: 50, ..Default::default() };
        let mut s = Scheduler::new(c.node_slots(), 100, opts);
        let d = settle_all(&mut s, &mut c);
        assert_eq!(d.runaway.len(), 1, "{:?}", d.runaway);
        // only the gate node forms a resolvable group
        assert_eq!(d.resolutions, 1);
        assert!(d.converged);
    }
}
