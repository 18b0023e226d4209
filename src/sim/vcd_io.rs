// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! VCD output for watched nodes.
//!
//! One scalar wire per watched node, bus bits named `name[i]`. Time is the
//! half-step count, one unit per clock edge.

use std::io::Write;
use vcd_ng::{IdCode, SimulationCommand, TimescaleUnit, Value};

use crate::circuit::Circuit;
use crate::config::WatchlistEntry;
use crate::error::Result;
use crate::netlist::NodeId;

pub struct TraceWriter<W: Write> {
    writer: vcd_ng::Writer<W>,
    /// (node, vcd_variable_id)
    node2vcd: Vec<(NodeId, IdCode)>,
    // 0=V0, 1=V1, 2=not written yet
    last_val: Vec<u8>,
}

impl<W: Write> TraceWriter<W> {
    /// Write the header: a `top` module holding every watchlist wire.
    pub fn new(out: W, top: &str, entries: &[WatchlistEntry]) -> Result<Self> {
        let mut writer = vcd_ng::Writer::new(out);
        writer.timescale(1, TimescaleUnit::NS)?;
        writer.add_module(top)?;

        let mut node2vcd = Vec::new();
        for entry in entries {
            match entry {
                WatchlistEntry::Bit { name, node } => {
                    node2vcd.push((*node, writer.add_wire(1, name)?));
                }
                WatchlistEntry::Bus { name, bus, .. } => {
                    for (i, &pin) in bus.pins().iter().enumerate() {
                        node2vcd.push((pin, writer.add_wire(1, &format!("{}[{}]", name, i))?));
                    }
                }
            }
        }

        writer.upscope()?;
        writer.enddefinitions()?;
        writer.begin(SimulationCommand::Dumpvars)?;
        clilog::debug!("vcd trace with {} wires", node2vcd.len());

        let last_val = vec![2; node2vcd.len()];
        Ok(TraceWriter { writer, node2vcd, last_val })
    }

    pub fn wire_count(&self) -> usize {
        self.node2vcd.len()
    }

    /// Record the current values at `time`; only changed wires are written.
    pub fn sample(&mut self, time: u64, circuit: &Circuit) -> Result<()> {
        self.writer.timestamp(time)?;
        for (i, &(node, vid)) in self.node2vcd.iter().enumerate() {
            let v = circuit.value(node) as u8;
            if v == self.last_val[i] {
                continue;
            }
            self.last_val[i] = v;
            self.writer.change_scalar(vid, if v == 1 { Value::V1 } else { Value::V0 })?;
        }
        Ok(())
    }
}
