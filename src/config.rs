// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Simulation configuration and watchlist types.
//!
//! Everything here is loaded from JSON and every field has a default, so a
//! config file only needs the keys it changes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::circuit::Circuit;
use crate::error::{Result, SimError};
use crate::group::{ChargeRule, PullConflict, ResolverOptions};
use crate::netlist::{NodeId, NodeRef};
use crate::sim::control::StallConfig;
use crate::sim::Bus;

// ── Top-level configuration (loaded from JSON) ──────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimConfig {
    pub netlist_path: Option<String>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub power_on: PowerOnConfig,
    #[serde(default)]
    pub stall: StallConfig,
    /// Signals printed per half-step and dumped to VCD.
    #[serde(default)]
    pub watchlist: Vec<WatchlistSignal>,
    /// Full clock cycles to run after power-on.
    #[serde(default)]
    pub num_cycles: u64,
    pub output_vcd: Option<String>,
}

impl SimConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| SimError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| SimError::Config(e.to_string()))
    }
}

/// Engine limits and resolution policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum propagation generations per call before reporting a stall.
    #[serde(default = "default_iteration_cap")]
    pub iteration_cap: usize,
    /// Largest group a flood fill may collect.
    #[serde(default = "default_max_group_size")]
    pub max_group_size: usize,
    #[serde(default)]
    pub pull_conflict: PullConflict,
    #[serde(default)]
    pub charge_rule: ChargeRule,
    /// Name (or id) of the node toggled by each half-step.
    #[serde(default = "default_clock")]
    pub clock: String,
}

fn default_iteration_cap() -> usize {
    100
}

fn default_max_group_size() -> usize {
    16384
}

fn default_clock() -> String {
    "clk0".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            iteration_cap: default_iteration_cap(),
            max_group_size: default_max_group_size(),
            pull_conflict: PullConflict::default(),
            charge_rule: ChargeRule::default(),
            clock: default_clock(),
        }
    }
}

impl EngineConfig {
    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            max_group_size: self.max_group_size,
            pull_conflict: self.pull_conflict,
            charge_rule: self.charge_rule,
        }
    }

    pub fn clock_ref(&self) -> NodeRef {
        self.clock.parse().unwrap_or_else(|e| match e {})
    }
}

/// Pin levels applied at power-on, and the reset pulse that follows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PowerOnConfig {
    /// Pin name (or id) → level (0 or 1), applied before the first settle.
    #[serde(default)]
    pub initial: IndexMap<String, u8>,
    pub reset_pin: Option<String>,
    #[serde(default)]
    pub reset_active_high: bool,
    /// Full clock cycles the reset pin is held asserted.
    #[serde(default)]
    pub reset_cycles: usize,
}

impl PowerOnConfig {
    /// The NMOS 6502 sequence: inputs idle, RES held low for eight cycles.
    pub fn mos6502() -> Self {
        let initial = [("clk0", 1), ("rdy", 1), ("so", 0), ("irq", 1), ("nmi", 1)]
            .into_iter()
            .map(|(name, level)| (name.to_string(), level))
            .collect();
        Self {
            initial,
            reset_pin: Some("res".to_string()),
            reset_active_high: false,
            reset_cycles: 8,
        }
    }
}

// ── Watchlist types ─────────────────────────────────────────────────────────

/// Watchlist signal entry (from JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistSignal {
    /// Display name for the signal.
    pub name: String,
    /// Node name or id. With `width`, the bus pins are `node0`, `node1`, ...
    pub node: String,
    /// Width for bus signals (e.g., 16 for an address bus).
    #[serde(default)]
    pub width: Option<usize>,
    /// Format for output: "bin", "hex", or "dec".
    #[serde(default)]
    pub format: Option<String>,
}

/// Resolved watchlist entry - either single node or bus.
#[derive(Debug, Clone)]
pub enum WatchlistEntry {
    /// Single node; floating values print with a trailing `~`.
    Bit { name: String, node: NodeId },
    /// Multi-bit bus (pins ordered LSB to MSB).
    Bus { name: String, bus: Bus, format: String },
}

impl WatchlistEntry {
    pub fn resolve(signal: &WatchlistSignal, circuit: &Circuit) -> Result<Self> {
        match signal.width {
            None => {
                let node_ref: NodeRef = signal.node.parse().unwrap_or_else(|e| match e {});
                Ok(WatchlistEntry::Bit { name: signal.name.clone(), node: circuit.resolve(&node_ref)? })
            }
            Some(width) => Ok(WatchlistEntry::Bus {
                name: signal.name.clone(),
                bus: Bus::from_prefix(circuit, &signal.node, width)?,
                format: signal.format.clone().unwrap_or_else(|| "hex".to_string()),
            }),
        }
    }

    pub fn resolve_all(signals: &[WatchlistSignal], circuit: &Circuit) -> Result<Vec<Self>> {
        signals.iter().map(|s| Self::resolve(s, circuit)).collect()
    }

    pub fn name(&self) -> &str {
        match self {
            WatchlistEntry::Bit { name, .. } => name,
            WatchlistEntry::Bus { name, .. } => name,
        }
    }

    /// Nodes covered by this entry, LSB first.
    pub fn nodes(&self) -> &[NodeId] {
        match self {
            WatchlistEntry::Bit { node, .. } => std::slice::from_ref(node),
            WatchlistEntry::Bus { bus, .. } => bus.pins(),
        }
    }

    pub fn format_value(&self, circuit: &Circuit) -> String {
        match self {
            WatchlistEntry::Bit { node, .. } => {
                let st = circuit.state(*node);
                format!("{}{}", st.value as u8, if st.floating { "~" } else { "" })
            }
            WatchlistEntry::Bus { bus, format, .. } => {
                let value = bus.read(circuit);
                match format.as_str() {
                    "bin" => format!("{:0width$b}", value, width = bus.width()),
                    "dec" => format!("{}", value),
                    _ => format!("0x{:0width$X}", value, width = (bus.width() + 3) / 4),
                }
            }
        }
    }
}

/// One trace line: `cycle.phase name=value ...`.
pub fn format_trace_row(half_step: u64, entries: &[WatchlistEntry], circuit: &Circuit) -> String {
    let mut row = format!("{:>6}.{}", half_step / 2, half_step % 2);
    for e in entries {
        row.push(' ');
        row.push_str(e.name());
        row.push('=');
        row.push_str(&e.format_value(circuit));
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::{NetlistBuilder, Pull};

    #[test]
    fn test_defaults_from_empty_json() {
        let cfg = SimConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg.engine.iteration_cap, 100);
        assert_eq!(cfg.engine.max_group_size, 16384);
        assert_eq!(cfg.engine.pull_conflict, PullConflict::PullDownWins);
        assert_eq!(cfg.engine.clock_ref(), NodeRef::Name("clk0".into()));
        assert!(cfg.watchlist.is_empty());
        assert!(cfg.power_on.reset_pin.is_none());
    }

    #[test]
    fn test_full_config() {
        let cfg = SimConfig::from_json_str(
            r#"{
                "netlist_path": "chip.json",
                "engine": { "iteration_cap": 40, "pull_conflict": "pull_up_wins", "charge_rule": "any_high", "clock": "phi0" },
                "power_on": { "initial": { "rdy": 1, "irq": 1 }, "reset_pin": "res", "reset_cycles": 8 },
                "stall": { "on_stall": "terminate", "max_stalls": 3 },
                "watchlist": [
                    { "name": "ab", "node": "ab", "width": 16 },
                    { "name": "rw", "node": "rw" }
                ],
                "num_cycles": 20
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.engine.iteration_cap, 40);
        assert_eq!(cfg.engine.resolver_options().charge_rule, ChargeRule::AnyHigh);
        assert_eq!(cfg.engine.pull_conflict, PullConflict::PullUpWins);
        assert_eq!(cfg.power_on.initial.keys().collect::<Vec<_>>(), vec!["rdy", "irq"]);
        assert_eq!(cfg.stall.max_stalls, Some(3));
        assert_eq!(cfg.watchlist[0].width, Some(16));
        assert_eq!(cfg.num_cycles, 20);
    }

    #[test]
    fn test_bad_config_is_reported() {
        let err = SimConfig::from_json_str(r#"{ "engine": { "pull_conflict": "sideways" } }"#).unwrap_err();
        assert!(matches!(err, SimError::Config(_)), "{}", err);
    }

    #[test]
    fn test_watchlist_formatting() {
        let mut b = NetlistBuilder::new();
        b.ground("vss");
        b.power("vcc");
        b.named("db0", Pull::Up);
        b.named("db1", Pull::None);
        b.named("db2", Pull::Up);
        b.named("rw", Pull::None);
        let circuit = Circuit::build(&b.build()).unwrap();

        let signals = vec![
            WatchlistSignal { name: "db".into(), node: "db".into(), width: Some(3), format: Some("bin".into()) },
            WatchlistSignal { name: "db".into(), node: "db".into(), width: Some(3), format: None },
            WatchlistSignal { name: "rw".into(), node: "rw".into(), width: None, format: None },
        ];
        let entries = WatchlistEntry::resolve_all(&signals, &circuit).unwrap();
        assert_eq!(entries[0].format_value(&circuit), "101");
        assert_eq!(entries[1].format_value(&circuit), "0x5");
        assert_eq!(entries[2].format_value(&circuit), "0~");
        assert_eq!(entries[0].nodes().len(), 3);
        assert_eq!(format_trace_row(5, &entries[1..], &circuit), "     2.1 db=0x5 rw=0~");

        let missing = WatchlistSignal { name: "ab".into(), node: "ab".into(), width: Some(2), format: None };
        assert!(matches!(WatchlistEntry::resolve(&missing, &circuit), Err(SimError::UnknownNode(_))));
    }

    #[test]
    fn test_mos6502_preset() {
        let p = PowerOnConfig::mos6502();
        assert_eq!(p.reset_pin.as_deref(), Some("res"));
        assert!(!p.reset_active_high);
        assert_eq!(p.initial.get("clk0"), Some(&1));
    }
}
