//! Cooperative execution runner.
//!
//! The runner advances its [`Machine`] one instruction at a time and stops at
//! fixed cycle boundaries ("checkpoints") to hand the machine to an
//! observation callback and yield to the async scheduler. Stopping is
//! advisory: the flag is only looked at after a checkpoint, so at most one
//! checkpoint interval of cycles runs after [`StopHandle::stop`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::hex::HexSummary;
use crate::machine::Machine;
use crate::pinmap::BoardType;
use crate::DEFAULT_CHECKPOINT_INTERVAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerState {
    Idle,
    Running,
    Stopping,
}

/// Outcome of one [`Runner::execute`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub start_cycles: u64,
    pub end_cycles: u64,
    pub checkpoints: u64,
}

impl RunSummary {
    pub fn cycles_run(&self) -> u64 {
        self.end_cycles - self.start_cycles
    }
}

/// Cloneable handle that can request a stop from another task or thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to return at its next checkpoint.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    pub fn state(&self) -> RunnerState {
        match (self.running.load(Ordering::SeqCst), self.is_stop_requested()) {
            (false, _) => RunnerState::Idle,
            (true, false) => RunnerState::Running,
            (true, true) => RunnerState::Stopping,
        }
    }
}

pub struct Runner {
    machine: Machine,
    board: Option<BoardType>,
    interval: u64,
    next_checkpoint: u64,
    handle: StopHandle,
}

impl Runner {
    /// Build a machine for `board` and flash `hex` into it.
    pub fn new(board: BoardType, hex: &str) -> Self {
        let mut machine = Machine::for_board(board);
        machine.load_program(hex);
        let mut runner = Self::with_machine(machine);
        runner.board = Some(board);
        runner
    }

    pub fn with_machine(machine: Machine) -> Self {
        let mut runner = Runner {
            machine,
            board: None,
            interval: DEFAULT_CHECKPOINT_INTERVAL,
            next_checkpoint: 0,
            handle: StopHandle::new(),
        };
        runner.rearm();
        runner
    }

    /// Set the checkpoint interval in cycles. Zero is treated as one.
    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self.rearm();
        self
    }

    /// Next multiple of the interval above the current cycle count.
    fn rearm(&mut self) {
        let cycles = self.machine.cycles();
        self.next_checkpoint = (cycles / self.interval + 1) * self.interval;
    }

    /// Reflash and reset the machine.
    pub fn load_program(&mut self, hex: &str) -> HexSummary {
        let summary = self.machine.load_program(hex);
        self.rearm();
        summary
    }

    pub fn board(&self) -> Option<BoardType> {
        self.board
    }

    pub fn checkpoint_interval(&self) -> u64 {
        self.interval
    }

    pub fn next_checkpoint(&self) -> u64 {
        self.next_checkpoint
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Mutable access between runs, e.g. to drive input pins.
    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> RunnerState {
        self.handle.state()
    }

    /// Run one batch: step until the next checkpoint, then call `callback`.
    /// Returns the cycle count at the checkpoint.
    pub fn run_until_checkpoint<F: FnMut(&Machine)>(&mut self, mut callback: F) -> u64 {
        while self.machine.cycles() < self.next_checkpoint {
            self.machine.step();
        }
        let cycles = self.machine.cycles();
        callback(&self.machine);
        self.rearm();
        cycles
    }

    /// Run until stopped, calling `callback` and yielding at every checkpoint.
    ///
    /// A stop requested before this call is discarded. CPU state is kept on
    /// return, so a second call resumes where this one left off.
    pub async fn execute<F: FnMut(&Machine)>(&mut self, mut callback: F) -> RunSummary {
        self.handle.clear();
        self.handle.running.store(true, Ordering::SeqCst);
        let start_cycles = self.machine.cycles();
        let mut checkpoints = 0;
        debug!("runner started at cycle {}", start_cycles);

        loop {
            self.run_until_checkpoint(&mut callback);
            checkpoints += 1;
            tokio::task::yield_now().await;
            if self.handle.is_stop_requested() {
                break;
            }
        }

        self.handle.running.store(false, Ordering::SeqCst);
        let summary = RunSummary { start_cycles, end_cycles: self.machine.cycles(), checkpoints };
        debug!(
            "runner stopped at cycle {} after {} checkpoints",
            summary.end_cycles, summary.checkpoints
        );
        summary
    }
}
