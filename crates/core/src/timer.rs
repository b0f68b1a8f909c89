//! Timer/Counter0.
//!
//! Normal, CTC and fast PWM modes with the 1/8/64/256/1024 prescalers.
//! The counter is advanced lazily from the CPU cycle counter, so it only
//! costs anything when a register is touched or [`Timer0::update`] runs.
//! Arduino's `millis()`/`delay()` depend on the overflow interrupt and on
//! reading `TCNT0` together with `TOV0`.

use serde::{Deserialize, Serialize};

use crate::mcu::Timer0Vectors;

pub const TIFR0: u16 = 0x35;
pub const TCCR0A: u16 = 0x44;
pub const TCCR0B: u16 = 0x45;
pub const TCNT0: u16 = 0x46;
pub const OCR0A: u16 = 0x47;
pub const OCR0B: u16 = 0x48;
pub const TIMSK0: u16 = 0x6E;

const TOV: u8 = 1 << 0;
const OCFA: u8 = 1 << 1;
const OCFB: u8 = 1 << 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer0 {
    /// Cycle count the counter was last brought up to date with
    last_tick: u64,
    tcnt: u8,
    tccr_a: u8,
    tccr_b: u8,
    ocr_a: u8,
    ocr_b: u8,
    timsk: u8,
    tifr: u8,
}

impl Timer0 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Timer0::default();
    }

    fn prescale(&self) -> u64 {
        match self.tccr_b & 7 {
            1 => 1,
            2 => 8,
            3 => 64,
            4 => 256,
            5 => 1024,
            // 0 is stopped, 6/7 are the external T0 clock
            _ => 0,
        }
    }

    /// WGM02..0
    fn mode(&self) -> u8 {
        (self.tccr_a & 3) | ((self.tccr_b >> 1) & 4)
    }

    fn top(&self) -> u8 {
        match self.mode() {
            2 | 7 => self.ocr_a,
            _ => 0xFF,
        }
    }

    pub fn counter(&self) -> u8 {
        self.tcnt
    }

    pub fn flags(&self) -> u8 {
        self.tifr
    }

    pub fn owns(addr: u16) -> bool {
        matches!(addr, TIFR0 | TCCR0A | TCCR0B | TCNT0 | OCR0A | OCR0B | TIMSK0)
    }

    /// Bring the counter up to `tick`, latching overflow and compare flags.
    pub fn update(&mut self, tick: u64) {
        let prescale = self.prescale();
        if prescale == 0 {
            self.last_tick = tick;
            return;
        }
        let counts = tick.saturating_sub(self.last_tick) / prescale;
        if counts == 0 {
            return;
        }
        self.last_tick += counts * prescale;

        let period = self.top() as u64 + 1;
        let old = self.tcnt as u64;
        let end = old + counts;

        // Did the counter land on `value` somewhere in (old, end]?
        let passes = |value: u8| {
            let value = value as u64 % period;
            let first = old + 1 + (value + period - (old + 1) % period) % period;
            first <= end
        };
        if passes(self.ocr_a) {
            self.tifr |= OCFA;
        }
        if passes(self.ocr_b) {
            self.tifr |= OCFB;
        }
        // TOV is set at MAX; in CTC mode the counter only gets there when OCR0A is 0xFF
        let wraps = end >= period;
        if wraps && (self.mode() != 2 || self.top() == 0xFF) {
            self.tifr |= TOV;
        }
        self.tcnt = (end % period) as u8;
    }

    pub fn read(&mut self, addr: u16, tick: u64) -> Option<u8> {
        let v = match addr {
            TIFR0 => {
                self.update(tick);
                self.tifr
            }
            TCNT0 => {
                self.update(tick);
                self.tcnt
            }
            TCCR0A => self.tccr_a,
            TCCR0B => self.tccr_b,
            OCR0A => self.ocr_a,
            OCR0B => self.ocr_b,
            TIMSK0 => self.timsk,
            _ => return None,
        };
        Some(v)
    }

    /// Returns false when `addr` is not a Timer0 register.
    pub fn write(&mut self, addr: u16, value: u8, tick: u64) -> bool {
        if !Self::owns(addr) {
            return false;
        }
        // Account for elapsed time under the old configuration first
        self.update(tick);
        match addr {
            // Writing 1 clears a flag
            TIFR0 => self.tifr &= !(value & 7),
            TCCR0A => self.tccr_a = value,
            TCCR0B => self.tccr_b = value,
            TCNT0 => self.tcnt = value,
            OCR0A => self.ocr_a = value,
            OCR0B => self.ocr_b = value,
            _ => self.timsk = value & 7,
        }
        true
    }

    /// Take the highest-priority enabled pending interrupt, clearing its flag.
    /// Priority is COMPA, COMPB, then OVF.
    pub fn take_interrupt(&mut self, vectors: Timer0Vectors) -> Option<u16> {
        let pending = self.tifr & self.timsk;
        let (flag, vector) = if pending & OCFA != 0 {
            (OCFA, vectors.compa)
        } else if pending & OCFB != 0 {
            (OCFB, vectors.compb)
        } else if pending & TOV != 0 {
            (TOV, vectors.ovf)
        } else {
            return None;
        };
        self.tifr &= !flag;
        Some(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcu::Mcu;

    #[test]
    fn test_stopped_timer_does_not_count() {
        let mut t = Timer0::new();
        t.update(10_000);
        assert_eq!(t.read(TCNT0, 10_000), Some(0));
    }

    #[test]
    fn test_prescaler_64() {
        let mut t = Timer0::new();
        t.write(TCCR0B, 0x03, 0);
        assert_eq!(t.read(TCNT0, 64 * 10 + 63), Some(10));
    }

    #[test]
    fn test_overflow_flag_and_interrupt() {
        let mut t = Timer0::new();
        // fast PWM, clk/64, overflow interrupt: Arduino's wiring init
        t.write(TCCR0A, 0x03, 0);
        t.write(TCCR0B, 0x03, 0);
        t.write(TIMSK0, 0x01, 0);
        t.update(64 * 255);
        assert_eq!(t.flags() & TOV, 0);
        t.update(64 * 256);
        assert_eq!(t.counter(), 0);
        let v = Mcu::Atmega328p.timer0_vectors();
        assert_eq!(t.take_interrupt(v), Some(v.ovf));
        assert_eq!(t.take_interrupt(v), None);
    }

    #[test]
    fn test_ctc_compare_match() {
        let mut t = Timer0::new();
        t.write(OCR0A, 9, 0);
        t.write(TCCR0A, 0x02, 0);
        t.write(TCCR0B, 0x01, 0);
        t.write(TIMSK0, 0x02, 0);
        t.update(9);
        assert_eq!(t.counter(), 9);
        assert_ne!(t.flags() & OCFA, 0);
        t.update(10);
        assert_eq!(t.counter(), 0);
        // CTC never reaches MAX here
        assert_eq!(t.flags() & TOV, 0);
        let v = Mcu::Atmega328p.timer0_vectors();
        assert_eq!(t.take_interrupt(v), Some(v.compa));
    }

    #[test]
    fn test_priority_compa_first() {
        let mut t = Timer0::new();
        t.write(OCR0A, 0x10, 0);
        t.write(OCR0B, 0x20, 0);
        t.write(TCCR0B, 0x01, 0);
        t.write(TIMSK0, 0x07, 0);
        t.update(300);
        let v = Mcu::Atmega328p.timer0_vectors();
        assert_eq!(t.take_interrupt(v), Some(v.compa));
        assert_eq!(t.take_interrupt(v), Some(v.compb));
        assert_eq!(t.take_interrupt(v), Some(v.ovf));
    }

    #[test]
    fn test_tifr_write_one_clears() {
        let mut t = Timer0::new();
        t.write(TCCR0B, 0x01, 0);
        t.update(256);
        assert_eq!(t.read(TIFR0, 256), Some(TOV | OCFA | OCFB));
        t.write(TIFR0, TOV, 256);
        assert_eq!(t.read(TIFR0, 256), Some(OCFA | OCFB));
    }
}
