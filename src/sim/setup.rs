// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Chip loading pipeline: netlist file → circuit → powered-on simulator.
//!
//! Shared by the CLI subcommands and the integration tests.

use std::path::{Path, PathBuf};

use crate::config::{SimConfig, WatchlistEntry};
use crate::error::{Result, SimError};
use crate::netlist::Netlist;
use crate::sim::Simulator;

/// A simulator ready to clock, with its resolved watchlist.
pub struct LoadedChip {
    pub sim: Simulator,
    pub watchlist: Vec<WatchlistEntry>,
}

/// Read and parse a JSON netlist, logging its size.
pub fn load_netlist(path: &Path) -> Result<Netlist> {
    let timer = clilog::stimer!("load netlist");
    let netlist = Netlist::from_json_file(path)?;
    clilog::finish!(timer);
    clilog::info!("Loaded {}: {}", path.display(), netlist.summary());
    Ok(netlist)
}

/// Netlist path from the command line, falling back to the config file.
pub fn netlist_path(config: &SimConfig, cli: Option<&Path>) -> Result<PathBuf> {
    cli.map(Path::to_path_buf)
        .or_else(|| config.netlist_path.as_ref().map(PathBuf::from))
        .ok_or_else(|| SimError::Config("no netlist path given".into()))
}

/// Build the simulator for `netlist`, run the configured power-on sequence
/// and resolve the watchlist.
pub fn power_on_chip(netlist: &Netlist, config: &SimConfig) -> Result<LoadedChip> {
    let timer = clilog::stimer!("build and power on");
    let mut sim = Simulator::initialize(netlist, &config.engine)?;
    let watchlist = WatchlistEntry::resolve_all(&config.watchlist, sim.circuit())?;
    sim.power_on(&config.power_on)?;
    clilog::finish!(timer);

    let c = sim.circuit();
    clilog::info!(
        "{} nodes, {} transistors, {} conducting after power-on",
        c.node_count(),
        c.transistor_count(),
        c.conducting_count()
    );
    Ok(LoadedChip { sim, watchlist })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netlist_path_precedence() {
        let mut config = SimConfig::default();
        assert!(matches!(netlist_path(&config, None), Err(SimError::Config(_))));
        config.netlist_path = Some("from_config.json".into());
        assert_eq!(netlist_path(&config, None).unwrap(), PathBuf::from("from_config.json"));
        assert_eq!(
            netlist_path(&config, Some(Path::new("cli.json"))).unwrap(),
            PathBuf::from("cli.json")
        );
    }
}
