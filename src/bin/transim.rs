// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Command-line driver for the transim switch-level simulator.

use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use transim::circuit::Circuit;
use transim::config::{format_trace_row, PowerOnConfig, SimConfig};
use transim::netlist::NodeRef;
use transim::sim::control::{process_step, RunStats};
use transim::sim::setup;
use transim::sim::vcd_io::TraceWriter;
use transim::sim::{RunOutcome, SimControl, Snapshot};

#[derive(Parser)]
#[command(name = "transim", about = "transim: switch-level transistor simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print netlist statistics and check that it builds.
    Info(InfoArgs),

    /// Power on a chip and clock it, printing a trace of the watchlist.
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// JSON netlist path.
    netlist: PathBuf,

    /// Names (or ids) of nodes to look up and describe.
    #[clap(long, value_delimiter = ',')]
    nodes: Vec<String>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Simulation configuration JSON.
    #[clap(long)]
    config: Option<PathBuf>,

    /// JSON netlist path. Overrides `netlist_path` in the config.
    #[clap(long)]
    netlist: Option<PathBuf>,

    /// Full clock cycles to run. Overrides `num_cycles` in the config.
    #[clap(long)]
    cycles: Option<u64>,

    /// Output VCD path. Overrides `output_vcd` in the config.
    #[clap(long)]
    output_vcd: Option<PathBuf>,

    /// Use the NMOS 6502 power-on sequence instead of the config's.
    #[clap(long)]
    mos6502: bool,

    /// Restore this snapshot after power-on.
    #[clap(long)]
    load_snapshot: Option<PathBuf>,

    /// Write a snapshot of the final state.
    #[clap(long)]
    save_snapshot: Option<PathBuf>,

    /// Do not print the per-half-step trace.
    #[clap(long)]
    quiet: bool,
}

fn cmd_info(args: InfoArgs) -> Result<()> {
    let netlist = setup::load_netlist(&args.netlist)?;
    let circuit = Circuit::build(&netlist).context("netlist does not form a valid circuit")?;
    println!("nodes:       {} ({} id slots)", circuit.node_count(), circuit.node_slots());
    println!("transistors: {}", circuit.transistor_count());
    println!("names:       {}", circuit.names().len());
    println!("ground:      {}", circuit.ground());
    println!("power:       {}", circuit.power());

    for node in &args.nodes {
        let id = circuit.resolve(&node.parse::<NodeRef>().unwrap_or_else(|e| match e {}))?;
        println!(
            "{} ({}): id {}, {:?}, pull {:?}, {} channel connections",
            node,
            circuit.name_of(id).unwrap_or("-"),
            id,
            circuit.kind(id),
            circuit.pull(id),
            circuit.connections(id).len()
        );
        for &t in circuit.gates(id) {
            if let Some((_, c1, c2)) = circuit.transistor(t) {
                println!("  gates t{}: {} <-> {}", t, c1, c2);
            }
        }
    }
    Ok(())
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SimConfig::from_json_file(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => SimConfig::default(),
    };
    if args.mos6502 {
        config.power_on = PowerOnConfig::mos6502();
    }
    let netlist_path = setup::netlist_path(&config, args.netlist.as_deref())?;
    let netlist = setup::load_netlist(&netlist_path)?;
    let setup::LoadedChip { mut sim, watchlist } = setup::power_on_chip(&netlist, &config)?;

    if let Some(path) = &args.load_snapshot {
        Snapshot::load(path)?
            .restore(&mut sim)
            .with_context(|| format!("cannot restore {}", path.display()))?;
        clilog::info!("restored snapshot {} at half-step {}", path.display(), sim.half_steps());
    }

    let output_vcd = args.output_vcd.clone().or_else(|| config.output_vcd.as_ref().map(PathBuf::from));
    let mut trace = match &output_vcd {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("cannot create {}", path.display()))?;
            let mut t = TraceWriter::new(BufWriter::new(file), "chip", &watchlist)?;
            t.sample(sim.half_steps(), sim.circuit())?;
            Some(t)
        }
        None => None,
    };

    if !args.quiet {
        println!("{}", format_trace_row(sim.half_steps(), &watchlist, sim.circuit()));
    }

    let cycles = args.cycles.unwrap_or(config.num_cycles);
    let cancel = AtomicBool::new(false);
    let mut stats = RunStats::default();
    let mut trace_err = None;
    let timer = clilog::stimer!("simulation");
    let summary = sim.run_half_steps(cycles * 2, &cancel, |sim, diag| {
        let half_step = sim.half_steps();
        if !args.quiet {
            println!("{}", format_trace_row(half_step, &watchlist, sim.circuit()));
        }
        if let Some(t) = trace.as_mut() {
            if let Err(e) = t.sample(half_step, sim.circuit()) {
                trace_err = Some(e);
                return SimControl::Terminate;
            }
        }
        process_step(diag, half_step, &config.stall, &mut stats)
    })?;
    clilog::finish!(timer);
    if let Some(e) = trace_err {
        return Err(e).context("cannot write VCD");
    }
    drop(trace);

    match summary.outcome {
        RunOutcome::Completed => {}
        RunOutcome::Paused => clilog::info!("paused after {} half-steps", summary.half_steps),
        RunOutcome::Terminated => clilog::warn!("terminated after {} half-steps", summary.half_steps),
        RunOutcome::Cancelled => clilog::info!("cancelled after {} half-steps", summary.half_steps),
    }
    clilog::info!(
        "{} half-steps, {} propagation iterations, {} node changes, {} stalls, {} runaway groups",
        stats.half_steps,
        stats.iterations,
        stats.changes,
        stats.stalls,
        stats.runaway_groups
    );

    if let Some(path) = &args.save_snapshot {
        Snapshot::capture(&sim).save(path)?;
        clilog::info!("saved snapshot to {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    clilog::init_stderr_color_debug();
    let cli = Cli::parse();
    match cli.command {
        Commands::Info(args) => {
            clilog::info!("transim info args:\n{:#?}", args);
            cmd_info(args)
        }
        Commands::Run(args) => {
            clilog::info!("transim run args:\n{:#?}", args);
            cmd_run(args)
        }
    }
}
