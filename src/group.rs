// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Group resolver.
//!
//! A group is every node reachable from a seed through conducting
//! transistors. All members of a group end up at one value, chosen by the
//! strongest driver present:
//!
//! ```text
//! ground > power > external drive > pull-up / pull-down > retained charge
//! ```
//!
//! Ground and power terminate the flood fill: they drive the group but are
//! never members, so two groups touching the same rail stay separate.

use serde::{Deserialize, Serialize};

use crate::circuit::Circuit;
use crate::error::{Result, SimError};
use crate::netlist::{NodeId, Pull};

/// Which side wins when a group holds both a pull-up and a pull-down (or
/// both a high and a low external drive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullConflict {
    /// The ground-referenced path wins.
    #[default]
    PullDownWins,
    PullUpWins,
}

/// Value given to a group with no driver at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeRule {
    /// Keep the charge of the lowest-id member.
    #[default]
    LowestId,
    /// Any high member pulls the whole group high.
    AnyHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverOptions {
    pub max_group_size: usize,
    pub pull_conflict: PullConflict,
    pub charge_rule: ChargeRule,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            max_group_size: 16384,
            pull_conflict: PullConflict::default(),
            charge_rule: ChargeRule::default(),
        }
    }
}

/// Drivers seen while collecting a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Drivers {
    ground: bool,
    power: bool,
    drive_high: bool,
    drive_low: bool,
    pull_up: bool,
    pull_down: bool,
}

/// Unified value of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupValue {
    pub value: bool,
    pub floating: bool,
}

/// Flood fill and value resolution with reusable scratch buffers.
pub struct GroupResolver {
    options: ResolverOptions,
    members: Vec<NodeId>,
    frontier: Vec<NodeId>,
    changed: Vec<NodeId>,
    // visited[n] == epoch means n is already in the current group
    visited: Vec<u32>,
    epoch: u32,
}

impl GroupResolver {
    pub fn new(node_slots: usize, options: ResolverOptions) -> Self {
        Self {
            options,
            members: Vec::with_capacity(64),
            frontier: Vec::with_capacity(64),
            changed: Vec::with_capacity(64),
            visited: vec![0; node_slots],
            epoch: 0,
        }
    }

    /// Members of the most recently collected group, in discovery order.
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    /// Members whose value flipped in the most recent resolution.
    pub fn changed(&self) -> &[NodeId] {
        &self.changed
    }

    fn next_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if self.epoch == 0 {
            self.visited.iter_mut().for_each(|v| *v = 0);
            self.epoch = 1;
        }
    }

    /// Collect the group containing `seed` and the drivers it sees.
    ///
    /// Nothing in the circuit is modified. A group over the size bound is
    /// still walked to the end so that [`GroupResolver::members`] covers all
    /// of it, then reported as [`SimError::RunawayGroup`].
    fn collect(&mut self, circuit: &Circuit, seed: NodeId) -> Result<Drivers> {
        self.next_epoch();
        self.members.clear();
        self.frontier.clear();
        self.frontier.push(seed);
        let mut drivers = Drivers::default();
        let mut runaway = false;

        while let Some(n) = self.frontier.pop() {
            if n == circuit.ground() {
                drivers.ground = true;
                continue;
            }
            if n == circuit.power() {
                drivers.power = true;
                continue;
            }
            if self.visited[n] == self.epoch {
                continue;
            }
            self.visited[n] = self.epoch;
            self.members.push(n);
            runaway |= self.members.len() > self.options.max_group_size;

            match circuit.drive(n) {
                Some(true) => drivers.drive_high = true,
                Some(false) => drivers.drive_low = true,
                None => {}
            }
            match circuit.pull(n) {
                Pull::Up => drivers.pull_up = true,
                Pull::Down => drivers.pull_down = true,
                Pull::None => {}
            }

            for c in circuit.connections(n) {
                if circuit.transistor_on(c.transistor) && self.visited[c.other] != self.epoch {
                    self.frontier.push(c.other);
                }
            }
        }
        if runaway {
            return Err(SimError::RunawayGroup { seed, limit: self.options.max_group_size });
        }
        Ok(drivers)
    }

    fn value_of(&self, circuit: &Circuit, drivers: Drivers) -> GroupValue {
        let low_wins = self.options.pull_conflict == PullConflict::PullDownWins;
        let pick = |high: bool, low: bool| match (high, low) {
            (true, true) => Some(!low_wins),
            (true, false) => Some(true),
            (false, true) => Some(false),
            (false, false) => None,
        };
        let driven = if drivers.ground {
            Some(false)
        } else if drivers.power {
            Some(true)
        } else {
            pick(drivers.drive_high, drivers.drive_low)
                .or_else(|| pick(drivers.pull_up, drivers.pull_down))
        };
        match driven {
            Some(value) => GroupValue { value, floating: false },
            None => {
                let value = match self.options.charge_rule {
                    ChargeRule::LowestId => self
                        .members
                        .iter()
                        .min()
                        .map(|&n| circuit.value(n))
                        .unwrap_or(false),
                    ChargeRule::AnyHigh => self.members.iter().any(|&n| circuit.value(n)),
                };
                GroupValue { value, floating: true }
            }
        }
    }

    /// Resolve the group containing `seed` and apply its value to every
    /// member. Returns the members whose value flipped.
    ///
    /// On [`SimError::RunawayGroup`] no node is touched.
    pub fn resolve(&mut self, circuit: &mut Circuit, seed: NodeId) -> Result<&[NodeId]> {
        self.changed.clear();
        if circuit.is_sentinel(seed) || !circuit.contains(seed) {
            self.members.clear();
            return Ok(&self.changed);
        }
        let drivers = self.collect(circuit, seed)?;
        let group = self.value_of(circuit, drivers);
        for &n in &self.members {
            if circuit.value(n) != group.value {
                self.changed.push(n);
            }
            circuit.set_state(n, group.value, group.floating);
        }
        Ok(&self.changed)
    }
}
