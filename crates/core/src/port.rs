//! GPIO port (`PINx`, `DDRx`, `PORTx`).
//!
//! Reading `PINx` returns the output latch for output bits and the external
//! level for input bits. An input bit nobody drives floats to its pull-up:
//! it reads 1 when `PORTx` has the bit set, 0 otherwise. Writing 1s to `PINx`
//! toggles the matching `PORTx` bits.

use serde::{Deserialize, Serialize};

use crate::mcu::PortAddrs;
use crate::pinmap::Port;

/// Electrical view of one port bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinState {
    Low,
    High,
    Input,
    InputPullUp,
}

/// Register values of one port at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub port: Port,
    /// Value `PINx` reads back
    pub pin: u8,
    pub ddr: u8,
    pub port_value: u8,
}

/// Serializable port state for save states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortState {
    pub ddr: u8,
    pub port_value: u8,
    pub input: u8,
    pub driven: u8,
}

#[derive(Debug, Clone)]
pub struct IoPort {
    addrs: PortAddrs,
    ddr: u8,
    port_value: u8,
    /// External levels, only meaningful where `driven` has the bit set
    input: u8,
    driven: u8,
}

impl IoPort {
    pub fn new(addrs: PortAddrs) -> Self {
        IoPort { addrs, ddr: 0, port_value: 0, input: 0, driven: 0 }
    }

    pub fn port(&self) -> Port {
        self.addrs.port
    }

    pub fn addrs(&self) -> PortAddrs {
        self.addrs
    }

    /// Clear DDR and PORT. External inputs stay where the host put them.
    pub fn reset(&mut self) {
        self.ddr = 0;
        self.port_value = 0;
    }

    /// True when `addr` is one of this port's three registers.
    pub fn owns(&self, addr: u16) -> bool {
        (self.addrs.pin..=self.addrs.port_reg()).contains(&addr)
    }

    /// Value `PINx` reads.
    pub fn pin_value(&self) -> u8 {
        let floating = !self.driven & !self.ddr;
        (self.port_value & self.ddr) | (self.input & self.driven & !self.ddr) | (self.port_value & floating)
    }

    pub fn read(&self, addr: u16) -> Option<u8> {
        match addr {
            a if a == self.addrs.pin => Some(self.pin_value()),
            a if a == self.addrs.ddr() => Some(self.ddr),
            a if a == self.addrs.port_reg() => Some(self.port_value),
            _ => None,
        }
    }

    /// Returns false when `addr` is not a register of this port.
    pub fn write(&mut self, addr: u16, value: u8) -> bool {
        match addr {
            a if a == self.addrs.pin => self.port_value ^= value,
            a if a == self.addrs.ddr() => self.ddr = value,
            a if a == self.addrs.port_reg() => self.port_value = value,
            _ => return false,
        }
        true
    }

    /// Drive an external level onto `bit`.
    pub fn set_pin(&mut self, bit: u8, level: bool) {
        let mask = 1u8 << (bit & 7);
        self.driven |= mask;
        if level {
            self.input |= mask;
        } else {
            self.input &= !mask;
        }
    }

    /// Stop driving `bit`; it floats back to its pull-up setting.
    pub fn release_pin(&mut self, bit: u8) {
        let mask = 1u8 << (bit & 7);
        self.driven &= !mask;
        self.input &= !mask;
    }

    pub fn pin_state(&self, bit: u8) -> PinState {
        let mask = 1u8 << (bit & 7);
        match (self.ddr & mask != 0, self.port_value & mask != 0) {
            (true, true) => PinState::High,
            (true, false) => PinState::Low,
            (false, true) => PinState::InputPullUp,
            (false, false) => PinState::Input,
        }
    }

    pub fn output_value(&self) -> u8 {
        self.port_value
    }

    pub fn ddr(&self) -> u8 {
        self.ddr
    }

    pub fn snapshot(&self) -> PortSnapshot {
        PortSnapshot {
            port: self.addrs.port,
            pin: self.pin_value(),
            ddr: self.ddr,
            port_value: self.port_value,
        }
    }

    pub fn save_state(&self) -> PortState {
        PortState { ddr: self.ddr, port_value: self.port_value, input: self.input, driven: self.driven }
    }

    pub fn load_state(&mut self, s: &PortState) {
        self.ddr = s.ddr;
        self.port_value = s.port_value;
        self.input = s.input;
        self.driven = s.driven;
    }
}
