//! Error types shared across the simulator core.

use thiserror::Error;

use crate::pinmap::PinName;

/// Strict Intel HEX parsing failures. The lenient loader never returns these;
/// it counts and skips the offending lines instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexError {
    #[error("line {line}: missing ':' record marker")]
    MissingColon { line: usize },
    #[error("line {line}: odd number of hex digits")]
    OddLength { line: usize },
    #[error("line {line}: invalid hex digit {digit:?}")]
    InvalidDigit { line: usize, digit: char },
    #[error("line {line}: record too short")]
    TooShort { line: usize },
    #[error("line {line}: checksum mismatch (sum 0x{sum:02X})")]
    Checksum { line: usize, sum: u8 },
}

/// Why a pin could not be translated to a `(port, bit)` location.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("unknown board type '{0}'")]
    UnknownBoard(String),
    #[error("unknown pin '{pin}' on {board}")]
    UnknownPin { board: String, pin: String },
    #[error("pin {pin} on {board} has no GPIO register")]
    NoRegister { board: &'static str, pin: PinName },
}

impl LookupError {
    /// True for a board or pin name that does not exist at all, as opposed to
    /// a real pin (power, reference, analog-only) without a port register.
    pub fn is_not_found(&self) -> bool {
        !matches!(self, LookupError::NoRegister { .. })
    }
}

/// Failures surfaced by the [`Simulator`](crate::simulator::Simulator) service.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("simulation is already running")]
    AlreadyRunning,
    #[error("no program loaded")]
    NoProgram,
    #[error("simulation worker panicked: {0}")]
    WorkerPanicked(String),
    #[error("failed to spawn simulation worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Save state encoding and decoding failures.
#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("save state too small")]
    Truncated,
    #[error("invalid save state (bad magic)")]
    BadMagic,
    #[error("unsupported save state version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("MCU mismatch: save={saved} current={current}")]
    McuMismatch { saved: String, current: String },
    #[error("decompress error: {0}")]
    Inflate(String),
    #[error("{what} mismatch: save={saved} current={current}")]
    SizeMismatch { what: &'static str, saved: usize, current: usize },
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
