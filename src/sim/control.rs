// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Run control: deciding whether to keep clocking after each half-step.
//!
//! A stalled propagation is not an error. The run loop hands each half-step's
//! diagnostics to [`process_step`], which counts stalls and runaway groups
//! and maps them to a [`SimControl`] according to the [`StallConfig`].

use serde::{Deserialize, Serialize};

use crate::propagate::Diagnostics;

/// What the run loop should do after a half-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimControl {
    /// Keep clocking
    Continue,
    /// Stop here; state is left as is and the run may be resumed
    Pause,
    /// Stop for good
    Terminate,
}

/// Action to take when propagation hits its iteration cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallAction {
    /// Log the stall and continue
    #[default]
    Log,
    Pause,
    Terminate,
}

/// Configuration for how stalls are handled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StallConfig {
    #[serde(default)]
    pub on_stall: StallAction,
    /// Maximum number of stalls before terminating (None = unlimited)
    #[serde(default)]
    pub max_stalls: Option<u32>,
}

/// Statistics tracked across a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub half_steps: u64,
    /// Half-steps whose propagation did not converge
    pub stalls: u32,
    pub runaway_groups: u32,
    /// Total propagation generations
    pub iterations: u64,
    pub changes: u64,
}

/// Fold one half-step's diagnostics into `stats` and decide how to proceed.
pub fn process_step(
    diag: &Diagnostics,
    half_step: u64,
    config: &StallConfig,
    stats: &mut RunStats,
) -> SimControl {
    stats.half_steps += 1;
    stats.iterations += diag.iterations as u64;
    stats.changes += diag.changes as u64;

    for r in &diag.runaway {
        clilog::warn!("[half-step {}] runaway group from node {} (limit {})", half_step, r.seed, r.limit);
        stats.runaway_groups += 1;
    }

    if diag.converged {
        return SimControl::Continue;
    }

    clilog::warn!(
        "[half-step {}] propagation stalled after {} iterations, {} nodes dirty",
        half_step,
        diag.iterations,
        diag.stalled_nodes.len()
    );
    stats.stalls += 1;

    if let Some(max) = config.max_stalls {
        if stats.stalls >= max {
            clilog::error!("Maximum stalls ({}) reached, terminating", max);
            return SimControl::Terminate;
        }
    }

    match config.on_stall {
        StallAction::Log => SimControl::Continue,
        StallAction::Pause => SimControl::Pause,
        StallAction::Terminate => SimControl::Terminate,
    }
}
