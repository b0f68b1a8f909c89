//! Simulator service: one active board, a program, and a worker thread.
//!
//! The worker owns the [`Runner`] while the simulation runs and drives it
//! checkpoint by checkpoint. After each checkpoint it sends a [`Checkpoint`]
//! to the host, applies queued pin changes and looks at its stop flag. On
//! stop the runner comes back through the join handle, so CPU state survives
//! for the next [`Simulator::start`].
//!
//! The checkpoint queue holds at most [`CHECKPOINT_QUEUE`] entries. The worker
//! never waits for the host: when the queue is full the new checkpoint is
//! dropped, and the host picks up current state again once it catches up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SimConfig;
use crate::error::SimError;
use crate::hex::HexSummary;
use crate::machine::Machine;
use crate::pinmap::{self, BoardType, PinMapping};
use crate::port::PortSnapshot;
use crate::runner::{RunSummary, Runner};
use crate::status::{BoardRegistry, BoardStatus};

/// Checkpoints buffered for a host that is not reading.
pub const CHECKPOINT_QUEUE: usize = 64;

/// Machine state reported at every checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub cycles: u64,
    /// Word address
    pub pc: u32,
    pub ports: Vec<PortSnapshot>,
}

impl Checkpoint {
    pub fn capture(m: &Machine) -> Self {
        Checkpoint { cycles: m.cycles(), pc: m.pc(), ports: m.port_snapshots() }
    }
}

enum Command {
    SetPin(PinMapping, bool),
    #[cfg(test)]
    Panic,
}

/// What the worker hands back on exit: runner, checkpoints, dropped checkpoints.
type WorkerResult = (Runner, u64, u64);

struct Worker {
    thread: JoinHandle<WorkerResult>,
    stop: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<Command>,
    start_cycles: u64,
}

pub struct Simulator {
    config: SimConfig,
    board: BoardType,
    registry: BoardRegistry,
    program: Option<String>,
    /// Present whenever the worker is not running
    runner: Option<Runner>,
    worker: Option<Worker>,
}

impl Simulator {
    /// Create a simulator for the configured board. An unknown board id in
    /// the configuration falls back to the Uno.
    pub fn new(config: SimConfig) -> Self {
        let board = config.board_type().unwrap_or_else(|| {
            warn!("unknown board '{}', using {}", config.board, BoardType::ArduinoUno.id());
            BoardType::ArduinoUno
        });
        let mut sim = Simulator {
            config,
            board,
            registry: BoardRegistry::new(),
            program: None,
            runner: None,
            worker: None,
        };
        sim.rebuild();
        sim
    }

    /// Fresh machine for the current board, reflashed with the current
    /// program and with the configured inputs applied.
    fn rebuild(&mut self) {
        let mut machine = Machine::for_board(self.board);
        if let Some(hex) = &self.program {
            machine.load_program(hex);
        }
        for input in &self.config.inputs {
            match pinmap::lookup(self.board.id(), &input.pin) {
                Ok(mapping) => {
                    machine.set_pin(mapping, input.value);
                }
                Err(e) => warn!("configured input ignored: {}", e),
            }
        }
        self.runner = Some(Runner::with_machine(machine).with_checkpoint_interval(self.config.checkpoint_interval));
    }

    pub fn board(&self) -> BoardType {
        self.board
    }

    pub fn status(&self, board: BoardType) -> BoardStatus {
        self.registry.status(board)
    }

    /// Status of every board touched so far.
    pub fn registry(&self) -> &BoardRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn has_program(&self) -> bool {
        self.program.is_some()
    }

    /// The machine, unless the worker currently owns it.
    pub fn machine(&self) -> Option<&Machine> {
        self.runner.as_ref().map(Runner::machine)
    }

    pub fn machine_mut(&mut self) -> Option<&mut Machine> {
        self.runner.as_mut().map(Runner::machine_mut)
    }

    /// Switch to another board. A running simulation is stopped first; the
    /// loaded program is flashed into the new machine.
    pub fn set_board(&mut self, board_type: &str) -> Result<(), SimError> {
        let board: BoardType = board_type.parse()?;
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!("{}: {}", self.board.id(), e);
            }
        }
        info!("board {} -> {}", self.board.id(), board.id());
        self.board = board;
        self.rebuild();
        if self.program.is_some() {
            self.registry.mark_loaded(board);
        }
        Ok(())
    }

    /// Flash a new program and reset. Not allowed while running.
    pub fn load_program(&mut self, hex: &str) -> Result<HexSummary, SimError> {
        if self.is_running() {
            return Err(SimError::AlreadyRunning);
        }
        self.program = Some(hex.to_string());
        let runner = self.runner.get_or_insert_with(|| Runner::with_machine(Machine::for_board(self.board)));
        let summary = runner.load_program(hex);
        self.registry.mark_loaded(self.board);
        Ok(summary)
    }

    /// Spawn the worker. Checkpoints arrive on the returned channel until
    /// [`stop`](Self::stop); dropping the receiver does not stop the worker.
    pub fn start(&mut self) -> Result<mpsc::Receiver<Checkpoint>, SimError> {
        if self.is_running() {
            return Err(SimError::AlreadyRunning);
        }
        if !self.has_program() {
            return Err(SimError::NoProgram);
        }
        let Some(mut runner) = self.runner.take() else {
            return Err(SimError::NoProgram);
        };

        let (checkpoint_tx, checkpoint_rx) = mpsc::channel(CHECKPOINT_QUEUE);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<Command>();
        // Set before the thread exists so an early stop() cannot be lost
        let stop = Arc::new(AtomicBool::new(false));
        let start_cycles = runner.machine().cycles();

        let worker_stop = stop.clone();
        let spawned = thread::Builder::new().name(format!("avrsim-{}", self.board.id())).spawn(move || {
            let mut checkpoints = 0u64;
            let mut dropped = 0u64;
            loop {
                runner.run_until_checkpoint(|m| {
                    // Full queue or a host that stopped listening: keep running until told to stop
                    if checkpoint_tx.try_send(Checkpoint::capture(m)).is_err() {
                        dropped += 1;
                    }
                });
                checkpoints += 1;
                while let Ok(cmd) = command_rx.try_recv() {
                    match cmd {
                        Command::SetPin(mapping, value) => {
                            runner.machine_mut().set_pin(mapping, value);
                        }
                        #[cfg(test)]
                        Command::Panic => panic!("worker panic requested"),
                    }
                }
                if worker_stop.load(Ordering::SeqCst) {
                    break;
                }
            }
            (runner, checkpoints, dropped)
        });

        match spawned {
            Ok(thread) => {
                self.worker = Some(Worker { thread, stop, commands: command_tx, start_cycles });
                self.registry.mark_running(self.board);
                debug!("{}: worker started at cycle {}", self.board.id(), start_cycles);
                Ok(checkpoint_rx)
            }
            Err(e) => {
                // The runner went down with the closure
                self.rebuild();
                Err(SimError::Spawn(e))
            }
        }
    }

    /// Stop the worker at its next checkpoint and take the machine back.
    /// Stopping an idle simulator is a no-op.
    pub fn stop(&mut self) -> Result<RunSummary, SimError> {
        let Some(worker) = self.worker.take() else {
            let cycles = self.machine().map(Machine::cycles).unwrap_or(0);
            return Ok(RunSummary { start_cycles: cycles, end_cycles: cycles, checkpoints: 0 });
        };
        worker.stop.store(true, Ordering::SeqCst);
        match worker.thread.join() {
            Ok((runner, checkpoints, dropped)) => {
                let summary = RunSummary {
                    start_cycles: worker.start_cycles,
                    end_cycles: runner.machine().cycles(),
                    checkpoints,
                };
                self.runner = Some(runner);
                self.registry.mark_stopped(self.board);
                debug!(
                    "{}: worker stopped at cycle {}, {} of {} checkpoints dropped",
                    self.board.id(),
                    summary.end_cycles,
                    dropped,
                    checkpoints
                );
                Ok(summary)
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                self.registry.mark_faulted(self.board);
                self.rebuild();
                Err(SimError::WorkerPanicked(msg))
            }
        }
    }

    /// Drive `pin_name` on the active board. Names the board does not know,
    /// or pins without a GPIO register, are logged and ignored. While running
    /// the change is applied at the next checkpoint.
    pub fn set_pin_state(&mut self, pin_name: &str, value: bool) {
        let mapping = match pinmap::lookup(self.board.id(), pin_name) {
            Ok(m) => m,
            Err(e) => {
                warn!("set_pin_state ignored: {}", e);
                return;
            }
        };
        if let Some(worker) = &self.worker {
            if worker.commands.send(Command::SetPin(mapping, value)).is_err() {
                warn!("set_pin_state ignored: worker has exited");
            }
        } else if let Some(runner) = self.runner.as_mut() {
            runner.machine_mut().set_pin(mapping, value);
        }
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::SeqCst);
            let _ = worker.thread.join();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::encode_hex;
    use crate::pinmap::Port;

    fn config(interval: u64) -> SimConfig {
        SimConfig { checkpoint_interval: interval, ..Default::default() }
    }

    fn start_loaded(interval: u64) -> (Simulator, mpsc::Receiver<Checkpoint>) {
        let mut sim = Simulator::new(config(interval));
        sim.load_program(&mirror_program()).unwrap();
        let rx = sim.start().unwrap();
        (sim, rx)
    }

    /// in r16, PIND ; out PORTB, r16 ; rjmp .-6
    fn mirror_program() -> String {
        let words: [u16; 3] = [0xB109, 0xB905, 0xCFFD];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        encode_hex(0, &bytes)
    }

    #[test]
    fn test_start_requires_program() {
        let mut sim = Simulator::new(config(1000));
        assert!(!sim.has_program());
        assert!(matches!(sim.start(), Err(SimError::NoProgram)));
        assert_eq!(sim.status(BoardType::ArduinoUno), BoardStatus::Idle);
        sim.load_program(&mirror_program()).unwrap();
        assert!(sim.has_program());
        assert_eq!(sim.registry().status(BoardType::ArduinoUno), BoardStatus::Loaded);
    }

    #[test]
    fn test_set_board_rejects_unknown() {
        let mut sim = Simulator::new(config(1000));
        let err = sim.set_board("wokwi-esp32").unwrap_err();
        assert!(matches!(err, SimError::Lookup(ref e) if e.is_not_found()));
        assert_eq!(sim.board(), BoardType::ArduinoUno);
    }

    #[test]
    fn test_set_pin_state_ignores_unknown_pins() {
        let mut sim = Simulator::new(config(1000));
        sim.set_pin_state("99", true);
        sim.set_pin_state("GND", true);
        sim.set_pin_state("2", true);
        let pind = sim.machine().and_then(|m| m.port(Port::D)).map(|p| p.snapshot().pin);
        assert_eq!(pind, Some(0x04));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_checkpoints_stream_and_resume() {
        let mut sim = Simulator::new(config(1000));
        sim.load_program(&mirror_program()).unwrap();
        let mut rx = sim.start().unwrap();
        assert!(matches!(sim.start(), Err(SimError::AlreadyRunning)));
        assert_eq!(sim.status(BoardType::ArduinoUno), BoardStatus::Running);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.cycles >= 1000);
        assert!(second.cycles > first.cycles);
        assert_eq!(first.ports.len(), 3);

        let summary = sim.stop().unwrap();
        assert!(summary.checkpoints >= 2);
        assert_eq!(sim.status(BoardType::ArduinoUno), BoardStatus::Stopped);
        let stopped_at = sim.machine().map(Machine::cycles).unwrap();
        assert_eq!(stopped_at, summary.end_cycles);

        // resume keeps the cycle counter
        let _rx = sim.start().unwrap();
        let again = sim.stop().unwrap();
        assert_eq!(again.start_cycles, stopped_at);
        assert!(again.end_cycles > stopped_at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pin_change_reaches_running_program() {
        let mut sim = Simulator::new(config(500));
        sim.load_program(&mirror_program()).unwrap();
        let mut rx = sim.start().unwrap();
        rx.recv().await.unwrap();
        sim.set_pin_state("2", true);
        // Applied at a later checkpoint; earlier ones may still be queued
        let seen = tokio::time::timeout(std::time::Duration::from_secs(10), async {
            while let Some(cp) = rx.recv().await {
                let portb = cp.ports.iter().find(|p| p.port == Port::B).map(|p| p.port_value);
                if portb == Some(0x04) {
                    return true;
                }
            }
            false
        })
        .await;
        sim.stop().unwrap();
        assert_eq!(seen.ok(), Some(true));
    }

    #[test]
    fn test_set_board_stops_and_reflashes() {
        let mut sim = Simulator::new(config(1000));
        sim.load_program(&mirror_program()).unwrap();
        let _rx = sim.start().unwrap();
        sim.set_board("wokwi-arduino-mega").unwrap();
        assert!(!sim.is_running());
        assert_eq!(sim.board(), BoardType::ArduinoMega);
        assert_eq!(sim.status(BoardType::ArduinoUno), BoardStatus::Stopped);
        assert_eq!(sim.status(BoardType::ArduinoMega), BoardStatus::Loaded);
        let m = sim.machine().unwrap();
        assert_eq!(m.cycles(), 0);
        assert_eq!(m.ports().len(), 11);
        assert_eq!(&m.flash()[..2], &[0x09, 0xB1]);
    }

    #[test]
    fn test_configured_inputs_applied() {
        let mut cfg = config(1000);
        cfg.inputs.push(crate::config::PinInput { pin: "8".into(), value: true });
        let sim = Simulator::new(cfg);
        let pinb = sim.machine().and_then(|m| m.port(Port::B)).map(|p| p.snapshot().pin);
        assert_eq!(pinb, Some(0x01));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_host_queue_is_bounded() {
        let (mut sim, mut rx) = start_loaded(1000);
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        let summary = sim.stop().unwrap();
        assert!(summary.checkpoints > CHECKPOINT_QUEUE as u64);

        let mut queued = 0;
        while rx.try_recv().is_ok() {
            queued += 1;
        }
        assert!(queued <= CHECKPOINT_QUEUE);
        assert!(queued > 0);
    }

    #[test]
    fn test_worker_panic_faults_board_and_rebuilds() {
        let (mut sim, _rx) = start_loaded(1000);
        if let Some(worker) = &sim.worker {
            worker.commands.send(Command::Panic).unwrap();
            while !worker.thread.is_finished() {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
        let err = sim.stop().unwrap_err();
        assert!(matches!(err, SimError::WorkerPanicked(ref msg) if msg == "worker panic requested"));
        assert_eq!(sim.status(BoardType::ArduinoUno), BoardStatus::Faulted);
        assert!(!sim.is_running());

        let m = sim.machine().unwrap();
        assert_eq!(m.cycles(), 0);
        assert_eq!(&m.flash()[..2], &[0x09, 0xB1]);

        let _rx = sim.start().unwrap();
        assert_eq!(sim.status(BoardType::ArduinoUno), BoardStatus::Running);
        assert!(sim.stop().unwrap().end_cycles > 0);
    }
}
