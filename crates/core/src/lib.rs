//! # avrsim-core
//!
//! Arduino board simulation core: pin tables, Intel HEX loading, an AVR
//! machine and a cooperative execution runner.
//!
//! Supported boards are the Arduino Uno and Nano (ATmega328P) and the
//! Arduino Mega 2560 (ATmega2560), all at 16 MHz.
//!
//! ## Architecture
//!
//! - [`pinmap`] - Arduino pin names to `(port, bit)` per board
//! - [`hex`] - Intel HEX loader (lenient and strict)
//! - [`Machine`] - CPU core, memory, GPIO ports and Timer0 for one MCU
//! - [`Runner`] - steps a machine in checkpoint batches, async yield and stop
//! - [`Simulator`] - board selection, program, worker thread, pin requests
//! - [`BoardRegistry`] - per-board lifecycle status
//! - [`savestate`] - compressed machine snapshots
//! - [`config`] - TOML configuration
//!
//! ```no_run
//! use avrsim_core::{BoardType, Runner};
//!
//! # async fn demo(hex: &str) {
//! let mut runner = Runner::new(BoardType::ArduinoUno, hex);
//! let handle = runner.stop_handle();
//! runner
//!     .execute(|m| {
//!         println!("cycle {} pc 0x{:04X}", m.cycles(), m.pc() * 2);
//!         handle.stop();
//!     })
//!     .await;
//! # }
//! ```

pub mod config;
pub mod cpu;
pub mod error;
pub mod hex;
pub mod machine;
pub mod mcu;
pub mod memory;
pub mod opcodes;
pub mod pinmap;
pub mod port;
pub mod runner;
pub mod savestate;
pub mod simulator;
pub mod status;
pub mod timer;

pub use config::{load_config, PinInput, SimConfig};
pub use error::{ConfigError, HexError, LookupError, SaveStateError, SimError};
pub use hex::{load_hex, parse_hex_strict, HexSummary};
pub use machine::Machine;
pub use mcu::Mcu;
pub use pinmap::{lookup, BoardConfig, BoardType, PinMapping, PinName, Port};
pub use port::{PinState, PortSnapshot};
pub use runner::{RunSummary, Runner, RunnerState, StopHandle};
pub use savestate::SaveState;
pub use simulator::{Checkpoint, Simulator};
pub use status::{BoardRegistry, BoardStatus};

/// CPU clock frequency: 16 MHz
pub const CLOCK_HZ: u32 = 16_000_000;
/// Cycles between checkpoints unless configured otherwise (~31 ms at 16 MHz)
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 500_000;

// SREG bit positions
pub const SREG_C: u8 = 0;
pub const SREG_Z: u8 = 1;
pub const SREG_N: u8 = 2;
pub const SREG_V: u8 = 3;
pub const SREG_S: u8 = 4;
pub const SREG_H: u8 = 5;
pub const SREG_T: u8 = 6;
pub const SREG_I: u8 = 7;

/// Status register (data-space address)
pub const SREG_ADDR: u16 = 0x5F;
pub const SPH_ADDR: u16 = 0x5E;
pub const SPL_ADDR: u16 = 0x5D;
