// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Error types shared by the netlist loader, circuit model and simulator.

use thiserror::Error;

use crate::netlist::{NodeId, NodeRef};

#[derive(Debug, Error)]
pub enum SimError {
    /// The netlist cannot be turned into a circuit. Fatal at build time.
    #[error("malformed netlist: {0}")]
    MalformedNetlist(String),

    /// A stimulus or read referenced a node that does not exist or
    /// cannot be driven. The circuit state is untouched.
    #[error("unknown node: {0}")]
    UnknownNode(NodeRef),

    /// Flood fill from `seed` grew past `limit` members.
    #[error("runaway group from node {seed}: more than {limit} members")]
    RunawayGroup { seed: NodeId, limit: usize },

    /// Propagation hit its iteration cap with work still pending.
    #[error("propagation did not converge after {iterations} iterations ({} nodes still dirty)", stalled.len())]
    NonConvergent {
        iterations: usize,
        stalled: Vec<NodeId>,
    },

    /// A checkpoint does not match the circuit it is restored into.
    #[error("snapshot mismatch: {0}")]
    SnapshotMismatch(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
