//! avrsim command-line host.
//!
//! Runs an Intel HEX program on a simulated Arduino board without a GUI and
//! logs every checkpoint plus the port bits that changed since the last one.
//!
//! ```text
//! avrsim blink.hex --board wokwi-arduino-uno --checkpoints 20 --pin 2=1
//! avrsim --list-pins wokwi-arduino-nano
//! ```

use std::error::Error;
use std::path::PathBuf;

use avrsim_core::savestate::{save_to_file, SaveState};
use avrsim_core::{
    load_config, BoardType, Checkpoint, PinMapping, PortSnapshot, RunSummary, SimConfig, SimError, Simulator,
};
use clap::Parser;
use tracing::{debug, error, info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "avrsim", version, about = "Headless AVR Arduino board simulator")]
struct Args {
    /// Intel HEX program to run
    #[arg(required_unless_present = "list_pins")]
    hex: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Board id, overrides the configuration (e.g. wokwi-arduino-mega)
    #[arg(long)]
    board: Option<String>,

    /// Checkpoints to run before stopping
    #[arg(long, default_value_t = 10)]
    checkpoints: u64,

    /// Cycles between checkpoints, overrides the configuration
    #[arg(long)]
    interval: Option<u64>,

    /// External pin level, NAME=0|1 (repeatable)
    #[arg(long = "pin", value_parser = parse_pin_arg)]
    pins: Vec<(String, bool)>,

    /// Write a save state here after stopping
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,

    /// Print the pin table of a board and exit
    #[arg(long, value_name = "BOARD")]
    list_pins: Option<String>,
}

fn parse_pin_arg(s: &str) -> Result<(String, bool), String> {
    let (name, value) = s.split_once('=').ok_or_else(|| format!("expected NAME=0|1, got '{}'", s))?;
    let level = match value {
        "0" | "low" => false,
        "1" | "high" => true,
        _ => return Err(format!("pin level must be 0 or 1, got '{}'", value)),
    };
    Ok((name.to_string(), level))
}

fn list_pins(board_id: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    let board: BoardType = board_id.parse()?;
    let config = board.config();
    println!("{} ({}, {})", config.name, config.id, config.mcu);
    for pin in config.pins() {
        match pin.location {
            Some(m) => println!("  {:<6} {}", pin.name.to_string(), m),
            None => println!("  {:<6} -", pin.name.to_string()),
        }
    }
    Ok(())
}

/// Log the bits that differ between two checkpoints.
fn log_port_changes(prev: &[PortSnapshot], cp: &Checkpoint) {
    for (old, new) in prev.iter().zip(&cp.ports) {
        let changed = (old.port_value ^ new.port_value) | (old.ddr ^ new.ddr);
        for bit in (0..8u8).filter(|b| changed & (1 << *b) != 0) {
            let pin = PinMapping::new(new.port, bit);
            let level = new.port_value & (1 << bit) != 0;
            let dir = if new.ddr & (1 << bit) != 0 { "out" } else { "in" };
            info!("{} {} {}", pin, dir, if level { "HIGH" } else { "LOW" });
        }
    }
}

/// Stop the worker off the async runtime; joining it can take up to one
/// checkpoint interval.
async fn stop_simulator(mut sim: Simulator) -> Result<(Simulator, Result<RunSummary, SimError>), tokio::task::JoinError> {
    tokio::task::spawn_blocking(move || {
        let run = sim.stop();
        (sim, run)
    })
    .await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync + 'static>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => SimConfig::default(),
    };
    if let Some(board) = &args.board {
        config.board = board.clone();
    }
    if let Some(interval) = args.interval {
        config.checkpoint_interval = interval;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    let level: Level = config.log_level.parse().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    if let Some(board) = &args.list_pins {
        return list_pins(board);
    }

    config.validate().map_err(|e| {
        error!("{}", e);
        e
    })?;

    let Some(hex_path) = &args.hex else {
        return Err("no HEX file given".into());
    };
    let hex = std::fs::read_to_string(hex_path)?;

    let mut sim = Simulator::new(config);
    let summary = sim.load_program(&hex)?;
    info!(
        "{}: loaded {} bytes from {} ({} lines skipped)",
        sim.board(),
        summary.bytes_written,
        hex_path.display(),
        summary.skipped_lines
    );
    for (name, value) in &args.pins {
        sim.set_pin_state(name, *value);
    }

    let mut prev = sim.machine().map(|m| m.port_snapshots()).unwrap_or_default();
    let mut rx = sim.start()?;
    let mut seen = 0;
    while seen < args.checkpoints {
        let Some(cp) = rx.recv().await else {
            warn!("worker exited early");
            break;
        };
        seen += 1;
        info!("checkpoint {}: cycle {} pc 0x{:05X}", seen, cp.cycles, cp.pc * 2);
        log_port_changes(&prev, &cp);
        prev = cp.ports;
    }

    let (sim, run) = stop_simulator(sim).await?;
    let run = run?;
    info!(
        "stopped at cycle {} ({} cycles, {:.3} ms emulated)",
        run.end_cycles,
        run.cycles_run(),
        run.cycles_run() as f64 * 1000.0 / avrsim_core::CLOCK_HZ as f64
    );

    for (board, status) in sim.registry().iter() {
        debug!("{}: {}", board.id(), status);
    }

    if let (Some(path), Some(machine)) = (&args.save_state, sim.machine()) {
        save_to_file(&SaveState::capture(machine), path)?;
        info!("save state written to {}", path.display());
    }
    Ok(())
}
