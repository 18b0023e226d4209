// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! The simulator facade: pins, clock edges and reads over one circuit.
//!
//! Every mutating call takes `&mut self` and runs propagation to completion
//! (or to the iteration cap) before returning, so reads always observe a
//! settled or explicitly stalled state.

use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::circuit::{Circuit, NodeState};
use crate::config::{EngineConfig, PowerOnConfig};
use crate::error::{Result, SimError};
use crate::netlist::{Netlist, NodeId, NodeRef};
use crate::propagate::{Diagnostics, Scheduler};
use crate::sim::control::SimControl;

/// An ordered set of pins read or written as one integer, bit 0 first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bus {
    pins: SmallVec<[NodeId; 16]>,
}

impl Bus {
    pub const MAX_WIDTH: usize = 64;

    pub fn new(circuit: &Circuit, refs: &[NodeRef]) -> Result<Self> {
        if refs.len() > Self::MAX_WIDTH {
            return Err(SimError::Config(format!(
                "bus of {} pins is wider than {} bits",
                refs.len(),
                Self::MAX_WIDTH
            )));
        }
        let pins = refs.iter().map(|r| circuit.resolve(r)).collect::<Result<_>>()?;
        Ok(Bus { pins })
    }

    /// Pins named `{prefix}0` .. `{prefix}{width-1}`, as in `ab0`..`ab15`.
    pub fn from_prefix(circuit: &Circuit, prefix: &str, width: usize) -> Result<Self> {
        let refs: Vec<NodeRef> = (0..width).map(|i| NodeRef::from(format!("{}{}", prefix, i))).collect();
        Self::new(circuit, &refs)
    }

    pub fn pins(&self) -> &[NodeId] {
        &self.pins
    }

    pub fn width(&self) -> usize {
        self.pins.len()
    }

    pub fn read(&self, circuit: &Circuit) -> u64 {
        self.pins
            .iter()
            .enumerate()
            .fold(0, |acc, (i, &n)| acc | ((circuit.value(n) as u64) << i))
    }
}

/// Why a batch of half-steps stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// All requested half-steps ran
    Completed,
    /// The observer asked to pause
    Paused,
    /// The observer asked to terminate
    Terminated,
    /// The cancellation flag was set
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Half-steps executed in this batch.
    pub half_steps: u64,
    pub outcome: RunOutcome,
}

pub struct Simulator {
    pub(crate) circuit: Circuit,
    scheduler: Scheduler,
    clock_ref: NodeRef,
    clock: Option<NodeId>,
    pub(crate) half_steps: u64,
}

impl Simulator {
    /// Build the circuit and settle it from its power-up state.
    ///
    /// A missing clock node is not an error here; [`Simulator::half_step`]
    /// reports it when clocking is attempted.
    pub fn initialize(netlist: &Netlist, engine: &EngineConfig) -> Result<Self> {
        let circuit = Circuit::build(netlist)?;
        let scheduler = Scheduler::new(circuit.node_slots(), engine.iteration_cap, engine.resolver_options());
        let clock_ref = engine.clock_ref();
        let clock = circuit.resolve(&clock_ref).ok().filter(|&c| !circuit.is_sentinel(c));
        if clock.is_none() {
            clilog::debug!("clock node {} not found, half-steps unavailable", clock_ref);
        }
        let mut sim = Simulator { circuit, scheduler, clock_ref, clock, half_steps: 0 };
        sim.settle();
        Ok(sim)
    }

    /// Back to power-up values with no drives and nothing pending. Does not
    /// settle; call [`Simulator::settle`] or [`Simulator::power_on`] next.
    pub fn reset(&mut self) {
        self.circuit.reset();
        self.half_steps = 0;
    }

    /// Propagate with every normal node as a seed.
    pub fn settle(&mut self) -> &Diagnostics {
        let seeds: Vec<NodeId> = self.circuit.normal_node_ids().collect();
        self.scheduler.propagate(&mut self.circuit, &seeds)
    }

    /// Propagate whatever is pending without adding seeds.
    pub fn propagate(&mut self) -> &Diagnostics {
        self.scheduler.propagate(&mut self.circuit, &[])
    }

    fn resolve_pin(&self, pin: &NodeRef) -> Result<NodeId> {
        match self.circuit.resolve(pin) {
            Ok(id) if !self.circuit.is_sentinel(id) => Ok(id),
            _ => Err(SimError::UnknownNode(pin.clone())),
        }
    }

    pub fn force_pin(&mut self, pin: impl Into<NodeRef>, value: bool) -> Result<&Diagnostics> {
        let id = self.resolve_pin(&pin.into())?;
        self.circuit.force_node(id, value)?;
        Ok(self.propagate())
    }

    /// Stop driving a pin; it falls back to its pull or its group's value.
    pub fn release_pin(&mut self, pin: impl Into<NodeRef>) -> Result<&Diagnostics> {
        let id = self.resolve_pin(&pin.into())?;
        self.circuit.release_node(id)?;
        Ok(self.propagate())
    }

    /// Force `pins[i]` to bit `i` of `value` and propagate once. Every pin is
    /// resolved before any is driven.
    pub fn write_bus(&mut self, pins: &[NodeRef], value: u64) -> Result<&Diagnostics> {
        if pins.len() > Bus::MAX_WIDTH {
            return Err(SimError::Config(format!("cannot write {} bits at once", pins.len())));
        }
        let ids = pins.iter().map(|p| self.resolve_pin(p)).collect::<Result<Vec<_>>>()?;
        for (i, id) in ids.into_iter().enumerate() {
            self.circuit.force_node(id, (value >> i) & 1 == 1)?;
        }
        Ok(self.propagate())
    }

    /// Toggle the clock and propagate: one clock edge.
    pub fn half_step(&mut self) -> Result<&Diagnostics> {
        let clock = self.clock.ok_or_else(|| SimError::UnknownNode(self.clock_ref.clone()))?;
        let level = !self.circuit.value(clock);
        self.circuit.force_node(clock, level)?;
        self.half_steps += 1;
        Ok(self.propagate())
    }

    /// Run up to `count` half-steps.
    ///
    /// `cancel` is checked before each half-step; `observer` sees the
    /// simulator and the diagnostics after each one.
    pub fn run_half_steps<F>(&mut self, count: u64, cancel: &AtomicBool, mut observer: F) -> Result<RunSummary>
    where
        F: FnMut(&Simulator, &Diagnostics) -> SimControl,
    {
        let mut done = 0;
        while done < count {
            if cancel.load(Ordering::Relaxed) {
                clilog::info!("run cancelled after {} half-steps", done);
                return Ok(RunSummary { half_steps: done, outcome: RunOutcome::Cancelled });
            }
            let diag = self.half_step()?.clone();
            done += 1;
            match observer(self, &diag) {
                SimControl::Continue => {}
                SimControl::Pause => return Ok(RunSummary { half_steps: done, outcome: RunOutcome::Paused }),
                SimControl::Terminate => {
                    return Ok(RunSummary { half_steps: done, outcome: RunOutcome::Terminated })
                }
            }
        }
        Ok(RunSummary { half_steps: done, outcome: RunOutcome::Completed })
    }

    /// Apply initial pin levels, settle the chip, then pulse reset.
    ///
    /// All pins are resolved up front; an unknown pin leaves the state
    /// untouched. The half-step counter restarts at zero afterwards.
    pub fn power_on(&mut self, cfg: &PowerOnConfig) -> Result<()> {
        let initial = cfg
            .initial
            .iter()
            .map(|(pin, &level)| {
                let r: NodeRef = pin.parse().unwrap_or_else(|e| match e {});
                Ok((self.resolve_pin(&r)?, level != 0))
            })
            .collect::<Result<Vec<_>>>()?;
        let reset = match &cfg.reset_pin {
            Some(pin) => {
                let r: NodeRef = pin.parse().unwrap_or_else(|e| match e {});
                Some(self.resolve_pin(&r)?)
            }
            None => None,
        };
        if reset.is_some() && cfg.reset_cycles > 0 && self.clock.is_none() {
            return Err(SimError::UnknownNode(self.clock_ref.clone()));
        }

        for (id, level) in initial {
            self.circuit.force_node(id, level)?;
        }
        if let Some(res) = reset {
            self.circuit.force_node(res, cfg.reset_active_high)?;
        }
        let diag = self.settle();
        clilog::info!(
            "power-on settle: {} iterations, {} changes, converged={}",
            diag.iterations,
            diag.changes,
            diag.converged
        );

        if let Some(res) = reset {
            for _ in 0..cfg.reset_cycles * 2 {
                self.half_step()?;
            }
            self.circuit.force_node(res, !cfg.reset_active_high)?;
            self.propagate();
            clilog::info!("reset released after {} cycles", cfg.reset_cycles);
        }
        self.half_steps = 0;
        Ok(())
    }

    pub fn read_node(&self, pin: impl Into<NodeRef>) -> Result<NodeState> {
        let id = self.circuit.resolve(&pin.into())?;
        Ok(self.circuit.state(id))
    }

    /// Read `pins` as an integer, bit 0 = first pin.
    pub fn read_bus(&self, pins: &[NodeRef]) -> Result<u64> {
        Ok(Bus::new(&self.circuit, pins)?.read(&self.circuit))
    }

    /// Read pins `{prefix}0..{prefix}{width-1}`.
    pub fn read_bits(&self, prefix: &str, width: usize) -> Result<u64> {
        Ok(Bus::from_prefix(&self.circuit, prefix, width)?.read(&self.circuit))
    }

    pub fn propagation_diagnostics(&self) -> &Diagnostics {
        self.scheduler.diagnostics()
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    pub fn set_iteration_cap(&mut self, cap: usize) {
        self.scheduler.set_iteration_cap(cap);
    }

    pub fn clock(&self) -> Option<NodeId> {
        self.clock
    }

    /// Current level of the clock node.
    pub fn clock_phase(&self) -> Option<bool> {
        self.clock.map(|c| self.circuit.value(c))
    }

    /// Half-steps since power-on (or reset).
    pub fn half_steps(&self) -> u64 {
        self.half_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::{NetlistBuilder, Pull};

    /// clk0 drives an inverter onto `nclk`; `a`/`b` form a second inverter.
    fn chip() -> Netlist {
        let mut b = NetlistBuilder::new();
        let gnd = b.ground("vss");
        b.power("vcc");
        let clk = b.named("clk0", Pull::None);
        let nclk = b.named("nclk", Pull::Up);
        b.transistor(clk, nclk, gnd);
        let a = b.named("a", Pull::None);
        let out = b.named("b", Pull::Up);
        b.transistor(a, out, gnd);
        b.named("d0", Pull::None);
        b.named("d1", Pull::None);
        b.named("d2", Pull::None);
        b.build()
    }

    fn sim() -> Simulator {
        Simulator::initialize(&chip(), &EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_force_and_read() {
        let mut s = sim();
        assert!(s.force_pin("a", true).unwrap().converged);
        assert_eq!(s.read_node("b").unwrap(), NodeState { value: false, floating: false });
        s.force_pin("a", false).unwrap();
        assert_eq!(s.read_node("b").unwrap(), NodeState { value: true, floating: false });
    }

    #[test]
    fn test_unknown_pin_is_rejected() {
        let mut s = sim();
        let before: Vec<_> = s.circuit().node_ids().map(|n| s.circuit().state(n)).collect();
        assert!(matches!(s.force_pin("nope", true), Err(SimError::UnknownNode(_))));
        assert!(matches!(s.force_pin("vcc", false), Err(SimError::UnknownNode(_))));
        let after: Vec<_> = s.circuit().node_ids().map(|n| s.circuit().state(n)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_half_steps_toggle_clock() {
        let mut s = sim();
        let start = s.clock_phase().unwrap();
        s.half_step().unwrap();
        assert_eq!(s.clock_phase(), Some(!start));
        assert_eq!(s.read_node("nclk").unwrap().value, start);
        s.half_step().unwrap();
        assert_eq!(s.clock_phase(), Some(start));
        assert_eq!(s.half_steps(), 2);
    }

    #[test]
    fn test_missing_clock() {
        let engine = EngineConfig { clock: "phi2".into(), ..Default::default() };
        let mut s = Simulator::initialize(&chip(), &engine).unwrap();
        assert!(matches!(s.half_step(), Err(SimError::UnknownNode(NodeRef::Name(n))) if n.as_str() == "phi2"));
    }

    #[test]
    fn test_write_and_read_bus() {
        let mut s = sim();
        let pins: Vec<NodeRef> = ["d0", "d1", "d2"].into_iter().map(NodeRef::from).collect();
        s.write_bus(&pins, 0b101).unwrap();
        assert_eq!(s.read_bus(&pins).unwrap(), 0b101);
        assert_eq!(s.read_bits("d", 3).unwrap(), 0b101);

        let bad: Vec<NodeRef> = vec!["d0".into(), "q".into()];
        assert!(s.write_bus(&bad, 0b11).is_err());
        assert_eq!(s.read_bits("d", 3).unwrap(), 0b101);
    }

    #[test]
    fn test_release_pin_floats_back() {
        let mut s = sim();
        s.force_pin("nclk", false).unwrap();
        assert!(!s.read_node("nclk").unwrap().value);
        s.release_pin("nclk").unwrap();
        // clk0 settles low at power-up, so the pull-up wins again
        assert!(s.read_node("nclk").unwrap().value);
    }

    #[test]
    fn test_run_half_steps_observer() {
        let mut s = sim();
        let cancel = AtomicBool::new(false);
        let mut seen = 0;
        let summary = s
            .run_half_steps(10, &cancel, |_, d| {
                assert!(d.converged);
                seen += 1;
                if seen == 3 {
                    SimControl::Pause
                } else {
                    SimControl::Continue
                }
            })
            .unwrap();
        assert_eq!(summary, RunSummary { half_steps: 3, outcome: RunOutcome::Paused });

        let summary = s.run_half_steps(4, &cancel, |_, _| SimControl::Continue).unwrap();
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(s.half_steps(), 7);
    }

    #[test]
    fn test_run_half_steps_cancel() {
        let mut s = sim();
        let cancel = AtomicBool::new(false);
        let summary = s
            .run_half_steps(100, &cancel, |_, _| {
                cancel.store(true, Ordering::Relaxed);
                SimControl::Continue
            })
            .unwrap();
        assert_eq!(summary, RunSummary { half_steps: 1, outcome: RunOutcome::Cancelled });
    }

    #[test]
    fn test_power_on_sequence() {
        let mut s = sim();
        let cfg = PowerOnConfig {
            initial: [("clk0".to_string(), 1), ("a".to_string(), 1)].into_iter().collect(),
            reset_pin: Some("d0".into()),
            reset_active_high: false,
            reset_cycles: 2,
        };
        s.power_on(&cfg).unwrap();
        assert_eq!(s.half_steps(), 0);
        // four half-steps return the clock to its initial level
        assert_eq!(s.clock_phase(), Some(true));
        assert!(s.read_node("d0").unwrap().value);
        assert!(!s.read_node("b").unwrap().value);

        let bad = PowerOnConfig { reset_pin: Some("res".into()), ..cfg };
        assert!(matches!(s.power_on(&bad), Err(SimError::UnknownNode(_))));
    }
}
