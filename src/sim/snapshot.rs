// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Checkpoints of the dynamic simulation state.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, SimError};
use crate::netlist::NodeId;
use crate::sim::Simulator;

/// Everything that changes after build: node values and floating flags (one
/// `'0'`/`'1'` character per id slot), external drives, pending work, the
/// clock level and the half-step count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub node_slots: usize,
    pub values: String,
    pub floating: String,
    pub drives: Vec<(NodeId, bool)>,
    pub pending: Vec<NodeId>,
    pub clock_phase: Option<bool>,
    pub half_steps: u64,
}

fn encode(bits: &[bool]) -> String {
    bits.iter().map(|&b| if b { '1' } else { '0' }).collect()
}

fn decode(field: &str, text: &str, len: usize) -> Result<Vec<bool>> {
    if text.len() != len {
        return Err(SimError::SnapshotMismatch(format!(
            "{} has {} entries, circuit has {} node slots",
            field,
            text.len(),
            len
        )));
    }
    text.bytes()
        .map(|b| match b {
            b'0' => Ok(false),
            b'1' => Ok(true),
            _ => Err(SimError::SnapshotMismatch(format!("{} contains {:?}", field, b as char))),
        })
        .collect()
}

impl Snapshot {
    pub fn capture(sim: &Simulator) -> Self {
        let c = &sim.circuit;
        Snapshot {
            node_slots: c.node_slots(),
            values: encode(c.values()),
            floating: encode(c.floatings()),
            drives: c.drives().collect(),
            pending: c.pending.iter().collect(),
            clock_phase: sim.clock_phase(),
            half_steps: sim.half_steps,
        }
    }

    /// Load this snapshot into `sim`. Nothing is modified unless the whole
    /// snapshot is consistent with the circuit.
    pub fn restore(&self, sim: &mut Simulator) -> Result<()> {
        let c = &sim.circuit;
        if self.node_slots != c.node_slots() {
            return Err(SimError::SnapshotMismatch(format!(
                "snapshot has {} node slots, circuit has {}",
                self.node_slots,
                c.node_slots()
            )));
        }
        let values = decode("values", &self.values, self.node_slots)?;
        let floating = decode("floating", &self.floating, self.node_slots)?;
        for &(n, _) in &self.drives {
            if !c.contains(n) || c.is_sentinel(n) {
                return Err(SimError::SnapshotMismatch(format!("drive on node {} cannot exist", n)));
            }
        }
        if let Some(&n) = self.pending.iter().find(|&&n| !c.contains(n)) {
            return Err(SimError::SnapshotMismatch(format!("pending node {} does not exist", n)));
        }
        for n in [c.ground(), c.power()] {
            if values[n] != (n == c.power()) || floating[n] {
                return Err(SimError::SnapshotMismatch(format!("supply node {} has a wrong level", n)));
            }
        }
        if let (Some(clock), Some(phase)) = (sim.clock(), self.clock_phase) {
            if values[clock] != phase {
                return Err(SimError::SnapshotMismatch("clock phase disagrees with clock node".into()));
            }
        }

        let c = &mut sim.circuit;
        c.load_state(&values, &floating, &self.drives);
        for &n in &self.pending {
            c.pending.push(n);
        }
        sim.half_steps = self.half_steps;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)
            .map_err(|e| SimError::SnapshotMismatch(format!("cannot serialize: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| SimError::SnapshotMismatch(format!("{}: {}", path.display(), e)))
    }
}
