// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Simulation driver built on the circuit engine.
//!
//! - [`chip`]: the [`Simulator`] facade (pins, buses, clocking, batches)
//! - [`control`]: stall policy and per-half-step run control
//! - [`snapshot`]: serializable checkpoints of the dynamic state
//! - [`vcd_io`]: VCD output for watched nodes
//! - [`setup`]: loading pipeline (netlist file → powered-on simulator)

pub mod chip;
pub mod control;
pub mod setup;
pub mod snapshot;
pub mod vcd_io;

pub use chip::{Bus, RunOutcome, RunSummary, Simulator};
pub use control::SimControl;
pub use snapshot::Snapshot;
