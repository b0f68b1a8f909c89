//! AVR memory spaces.
//!
//! | Data address | Content |
//! |--------------|---------|
//! | 0x0000–0x001F | Registers R0–R31 |
//! | 0x0020–0x005F | I/O registers (IN/OUT reachable) |
//! | 0x0060–sram_start-1 | Extended I/O |
//! | sram_start.. | SRAM |
//!
//! Flash is a separate, byte-addressed program image.

use crate::mcu::Mcu;

/// Data space plus flash for one MCU.
pub struct Memory {
    pub data: Vec<u8>,
    pub flash: Vec<u8>,
}

impl Memory {
    pub fn new(mcu: Mcu) -> Self {
        Memory {
            data: vec![0u8; mcu.data_size()],
            flash: vec![0u8; mcu.flash_size()],
        }
    }

    #[inline(always)]
    pub fn reg(&self, r: u8) -> u8 {
        self.data[r as usize]
    }

    #[inline(always)]
    pub fn set_reg(&mut self, r: u8, v: u8) {
        self.data[r as usize] = v;
    }

    /// 16-bit little-endian register pair starting at `lo` (R24, R26, R28, R30...).
    #[inline(always)]
    pub fn pair(&self, lo: u8) -> u16 {
        u16::from_le_bytes([self.data[lo as usize], self.data[lo as usize + 1]])
    }

    #[inline(always)]
    pub fn set_pair(&mut self, lo: u8, v: u16) {
        let [l, h] = v.to_le_bytes();
        self.data[lo as usize] = l;
        self.data[lo as usize + 1] = h;
    }

    #[inline(always)]
    pub fn x(&self) -> u16 {
        self.pair(26)
    }

    #[inline(always)]
    pub fn y(&self) -> u16 {
        self.pair(28)
    }

    #[inline(always)]
    pub fn z(&self) -> u16 {
        self.pair(30)
    }

    /// Program word at a word address; reads past the end of flash yield 0 (NOP).
    #[inline(always)]
    pub fn program_word(&self, word_addr: usize) -> u16 {
        let b = word_addr * 2;
        match self.flash.get(b..b + 2) {
            Some(w) => u16::from_le_bytes([w[0], w[1]]),
            None => 0,
        }
    }

    #[inline(always)]
    pub fn flash_byte(&self, byte_addr: usize) -> u8 {
        self.flash.get(byte_addr).copied().unwrap_or(0)
    }

    #[inline(always)]
    pub fn read_raw(&self, addr: u16) -> u8 {
        self.data.get(addr as usize).copied().unwrap_or(0)
    }

    #[inline(always)]
    pub fn write_raw(&mut self, addr: u16, v: u8) {
        if let Some(slot) = self.data.get_mut(addr as usize) {
            *slot = v;
        }
    }

    /// Number of program words in flash.
    pub fn flash_words(&self) -> usize {
        self.flash.len() / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_pair() {
        let mut mem = Memory::new(Mcu::Atmega328p);
        mem.set_pair(30, 0x1234);
        assert_eq!(mem.z(), 0x1234);
        assert_eq!(mem.data[30], 0x34);
        assert_eq!(mem.data[31], 0x12);
    }

    #[test]
    fn test_program_word() {
        let mut mem = Memory::new(Mcu::Atmega328p);
        mem.flash[0] = 0x0C;
        mem.flash[1] = 0x94;
        assert_eq!(mem.program_word(0), 0x940C);
        assert_eq!(mem.program_word(mem.flash_words()), 0);
    }

    #[test]
    fn test_out_of_range_data() {
        let mut mem = Memory::new(Mcu::Atmega328p);
        mem.write_raw(0xFFFF, 1);
        assert_eq!(mem.read_raw(0xFFFF), 0);
    }
}
