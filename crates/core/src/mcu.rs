//! Per-MCU memory sizes, port register addresses and interrupt vectors.
//!
//! | MCU | Flash | SRAM | I/O space | Ports | PC width |
//! |-----|-------|------|-----------|-------|----------|
//! | ATmega328P | 32 KB | 2 KB | 0x20–0xFF | B, C, D | 16-bit |
//! | ATmega2560 | 256 KB | 8 KB | 0x20–0x1FF | A–H, J, K, L | 22-bit |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pinmap::Port;

/// Data-space addresses of one port's `PINx`, `DDRx` and `PORTx` registers.
/// They are always consecutive, so only `PINx` is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAddrs {
    pub port: Port,
    pub pin: u16,
}

impl PortAddrs {
    const fn new(port: Port, pin: u16) -> Self {
        PortAddrs { port, pin }
    }

    #[inline]
    pub fn ddr(&self) -> u16 {
        self.pin + 1
    }

    #[inline]
    pub fn port_reg(&self) -> u16 {
        self.pin + 2
    }
}

/// Timer/Counter0 interrupt vectors (word addresses).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer0Vectors {
    pub compa: u16,
    pub compb: u16,
    pub ovf: u16,
}

const PORTS_328P: [PortAddrs; 3] = [
    PortAddrs::new(Port::B, 0x23),
    PortAddrs::new(Port::C, 0x26),
    PortAddrs::new(Port::D, 0x29),
];

const PORTS_2560: [PortAddrs; 11] = [
    PortAddrs::new(Port::A, 0x20),
    PortAddrs::new(Port::B, 0x23),
    PortAddrs::new(Port::C, 0x26),
    PortAddrs::new(Port::D, 0x29),
    PortAddrs::new(Port::E, 0x2C),
    PortAddrs::new(Port::F, 0x2F),
    PortAddrs::new(Port::G, 0x32),
    PortAddrs::new(Port::H, 0x100),
    PortAddrs::new(Port::J, 0x103),
    PortAddrs::new(Port::K, 0x106),
    PortAddrs::new(Port::L, 0x109),
];

/// Microcontroller variant. Port layouts differ between variants, so a board
/// switch rebuilds the whole machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mcu {
    Atmega328p,
    Atmega2560,
}

impl Mcu {
    pub fn name(self) -> &'static str {
        match self {
            Mcu::Atmega328p => "ATmega328P",
            Mcu::Atmega2560 => "ATmega2560",
        }
    }

    /// Stable byte tag for save state headers.
    pub fn tag(self) -> u8 {
        match self {
            Mcu::Atmega328p => 0,
            Mcu::Atmega2560 => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Mcu> {
        match tag {
            0 => Some(Mcu::Atmega328p),
            1 => Some(Mcu::Atmega2560),
            _ => None,
        }
    }

    pub fn flash_size(self) -> usize {
        match self {
            Mcu::Atmega328p => 32 * 1024,
            Mcu::Atmega2560 => 256 * 1024,
        }
    }

    pub fn sram_size(self) -> usize {
        match self {
            Mcu::Atmega328p => 2 * 1024,
            Mcu::Atmega2560 => 8 * 1024,
        }
    }

    /// First SRAM address; everything below is registers + I/O.
    pub fn sram_start(self) -> usize {
        match self {
            Mcu::Atmega328p => 0x100,
            Mcu::Atmega2560 => 0x200,
        }
    }

    pub fn data_size(self) -> usize {
        self.sram_start() + self.sram_size()
    }

    pub fn ports(self) -> &'static [PortAddrs] {
        match self {
            Mcu::Atmega328p => &PORTS_328P,
            Mcu::Atmega2560 => &PORTS_2560,
        }
    }

    /// True when the program counter is wider than 16 bits; calls and
    /// interrupts then push three bytes.
    pub fn has_22bit_pc(self) -> bool {
        matches!(self, Mcu::Atmega2560)
    }

    pub fn timer0_vectors(self) -> Timer0Vectors {
        match self {
            Mcu::Atmega328p => Timer0Vectors { compa: 0x1C, compb: 0x1E, ovf: 0x20 },
            Mcu::Atmega2560 => Timer0Vectors { compa: 0x2A, compb: 0x2C, ovf: 0x2E },
        }
    }
}

impl fmt::Display for Mcu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
