//! Machine save states.
//!
//! ## Format
//!
//! ```text
//! +------------------+
//! | Magic "AVRS"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | MCU tag          |  u8 (0 = ATmega328P, 1 = ATmega2560)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```
//!
//! Flash is not part of the state; restore into a machine running the same
//! program.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SaveStateError;
use crate::machine::Machine;
use crate::mcu::Mcu;
use crate::port::PortState;
use crate::timer::Timer0;

const MAGIC: &[u8; 4] = b"AVRS";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveState {
    pub mcu: Mcu,
    pub pc: u32,
    pub cycles: u64,
    pub sleeping: bool,
    /// Registers, I/O space and SRAM
    pub data: Vec<u8>,
    pub timer0: Timer0,
    pub ports: Vec<PortState>,
}

impl SaveState {
    pub fn capture(m: &Machine) -> Self {
        SaveState {
            mcu: m.mcu,
            pc: m.cpu.pc,
            cycles: m.cpu.cycles,
            sleeping: m.cpu.sleeping,
            data: m.mem.data.clone(),
            timer0: m.timer0.clone(),
            ports: m.ports.iter().map(|p| p.save_state()).collect(),
        }
    }

    /// Overwrite `m` with this state. The machine must be the same MCU.
    pub fn restore(&self, m: &mut Machine) -> Result<(), SaveStateError> {
        if self.mcu != m.mcu {
            return Err(mcu_mismatch(self.mcu.tag(), m.mcu));
        }
        if self.data.len() != m.mem.data.len() {
            return Err(SaveStateError::SizeMismatch {
                what: "data space size",
                saved: self.data.len(),
                current: m.mem.data.len(),
            });
        }
        if self.ports.len() != m.ports.len() {
            return Err(SaveStateError::SizeMismatch {
                what: "port count",
                saved: self.ports.len(),
                current: m.ports.len(),
            });
        }
        m.cpu.pc = self.pc;
        m.cpu.cycles = self.cycles;
        m.cpu.sleeping = self.sleeping;
        m.mem.data.copy_from_slice(&self.data);
        m.timer0 = self.timer0.clone();
        for (port, state) in m.ports.iter_mut().zip(&self.ports) {
            port.load_state(state);
        }
        Ok(())
    }
}

fn mcu_mismatch(saved: u8, current: Mcu) -> SaveStateError {
    SaveStateError::McuMismatch {
        saved: Mcu::from_tag(saved).map_or_else(|| format!("tag {}", saved), |m| m.name().to_string()),
        current: current.name().to_string(),
    }
}

/// Encode with header and deflate compression.
pub fn save_to_bytes(state: &SaveState) -> Result<Vec<u8>, SaveStateError> {
    let payload = bincode::serialize(state)?;
    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(state.mcu.tag());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decode, verifying magic, version and MCU.
pub fn load_from_bytes(data: &[u8], expected: Mcu) -> Result<SaveState, SaveStateError> {
    if data.len() < HEADER_LEN {
        return Err(SaveStateError::Truncated);
    }
    if &data[0..4] != MAGIC {
        return Err(SaveStateError::BadMagic);
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(SaveStateError::Version { found: version, expected: FORMAT_VERSION });
    }
    if data[8] != expected.tag() {
        return Err(mcu_mismatch(data[8], expected));
    }

    let payload = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| SaveStateError::Inflate(format!("{:?}", e)))?;
    Ok(bincode::deserialize(&payload)?)
}

pub fn save_to_file(state: &SaveState, path: impl AsRef<Path>) -> Result<(), SaveStateError> {
    let bytes = save_to_bytes(state)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_from_file(path: impl AsRef<Path>, expected: Mcu) -> Result<SaveState, SaveStateError> {
    let data = std::fs::read(path)?;
    load_from_bytes(&data, expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::encode_hex;
    use crate::pinmap::{PinMapping, Port};

    fn running_machine() -> Machine {
        // ldi r16,0xFF ; out DDRB,r16 ; inc r17 ; rjmp .-4
        let words: [u16; 4] = [0xEF0F, 0xB904, 0x9513, 0xCFFE];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let mut m = Machine::new(Mcu::Atmega328p);
        m.load_program(&encode_hex(0, &bytes));
        m.set_pin(PinMapping::new(Port::D, 3), true);
        for _ in 0..50 {
            m.step();
        }
        m
    }

    #[test]
    fn test_restore_reproduces_machine() {
        let mut a = running_machine();
        let bytes = save_to_bytes(&SaveState::capture(&a)).unwrap();

        let mut b = Machine::new(Mcu::Atmega328p);
        b.load_program(&encode_hex(0, &a.flash()[..8]));
        load_from_bytes(&bytes, Mcu::Atmega328p).unwrap().restore(&mut b).unwrap();
        assert_eq!(b.cycles(), a.cycles());
        assert_eq!(b.pc(), a.pc());
        assert_eq!(b.registers(), a.registers());
        assert_eq!(b.port_snapshots(), a.port_snapshots());

        for _ in 0..20 {
            a.step();
            b.step();
        }
        assert_eq!(b.registers()[17], a.registers()[17]);
    }

    #[test]
    fn test_rejects_other_mcu() {
        let bytes = save_to_bytes(&SaveState::capture(&running_machine())).unwrap();
        assert!(matches!(
            load_from_bytes(&bytes, Mcu::Atmega2560),
            Err(SaveStateError::McuMismatch { .. })
        ));
        let state = SaveState::capture(&running_machine());
        let mut mega = Machine::new(Mcu::Atmega2560);
        assert!(state.restore(&mut mega).is_err());
    }

    #[test]
    fn test_restore_rejects_port_count_mismatch() {
        let mut state = SaveState::capture(&running_machine());
        state.ports.pop();
        let mut m = Machine::new(Mcu::Atmega328p);
        assert!(matches!(
            state.restore(&mut m),
            Err(SaveStateError::SizeMismatch { saved: 2, current: 3, .. })
        ));
        assert_eq!(m.cycles(), 0);
    }

    #[test]
    fn test_rejects_bad_header() {
        assert!(matches!(load_from_bytes(b"AVR", Mcu::Atmega328p), Err(SaveStateError::Truncated)));
        assert!(matches!(load_from_bytes(b"ABES\x01\0\0\0\0xx", Mcu::Atmega328p), Err(SaveStateError::BadMagic)));
        assert!(matches!(
            load_from_bytes(b"AVRS\x02\0\0\0\0xx", Mcu::Atmega328p),
            Err(SaveStateError::Version { found: 2, .. })
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uno.state");
        let m = running_machine();
        save_to_file(&SaveState::capture(&m), &path).unwrap();
        let state = load_from_file(&path, Mcu::Atmega328p).unwrap();
        assert_eq!(state.cycles, m.cycles());
    }
}
