// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! transim: switch-level transistor simulator for NMOS chip netlists.
//!
//! A die is modelled as nodes (wires) and transistors (switches). A
//! transistor conducts when its gate node is high; the nodes connected
//! through conducting channels form a group whose value is decided by the
//! strongest driver in it. Changing an input re-resolves the affected groups
//! until the chip settles.
//!
//! # Pipeline
//!
//! ```text
//! JSON netlist
//!   → Netlist          (netlist: typed node/transistor records + name map)
//!   → Circuit          (circuit: id-indexed arrays, fixed topology)
//!   → GroupResolver    (group: flood fill + driver priority)
//!   → Scheduler        (propagate: generations until fixed point)
//!   → Simulator        (sim: pins, buses, clock half-steps)
//! ```
//!
//! # Key modules
//!
//! - [`netlist`]: netlist parsing and [`netlist::NetlistBuilder`]
//! - [`circuit`]: circuit model and external drives
//! - [`group`]: group resolution policies ([`group::PullConflict`], [`group::ChargeRule`])
//! - [`propagate`]: work queue, propagation scheduler, [`propagate::Diagnostics`]
//! - [`config`]: simulation configuration and watchlists
//! - [`sim`]: simulator facade, run control, snapshots, VCD output
//! - [`error`]: [`SimError`]

pub mod error;

pub mod netlist;

pub mod circuit;

pub mod group;

pub mod propagate;

pub mod config;

pub mod sim;

pub use error::{Result, SimError};
