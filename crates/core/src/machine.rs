//! One emulated microcontroller: CPU core, memory, GPIO ports and Timer0.
//!
//! [`Machine::step`] is the single entry point the runner drives. Data-space
//! accesses from instructions go through [`Machine::read_data`] and
//! [`Machine::write_data`], which route port and timer registers to their
//! peripherals and everything else to plain memory.

use tracing::debug;

use crate::cpu::Cpu;
use crate::hex::{load_hex, HexSummary};
use crate::mcu::Mcu;
use crate::memory::Memory;
use crate::opcodes::decode;
use crate::pinmap::{BoardType, PinMapping, Port};
use crate::port::{IoPort, PortSnapshot};
use crate::timer::{Timer0, TIFR0};
use crate::{SPH_ADDR, SPL_ADDR, SREG_ADDR, SREG_I};

/// Cycles spent entering an interrupt handler.
const INTERRUPT_CYCLES: u64 = 5;

pub struct Machine {
    pub(crate) cpu: Cpu,
    pub(crate) mem: Memory,
    pub(crate) mcu: Mcu,
    pub(crate) ports: Vec<IoPort>,
    pub(crate) timer0: Timer0,
}

impl Machine {
    pub fn new(mcu: Mcu) -> Self {
        let mut m = Machine {
            cpu: Cpu::new(),
            mem: Memory::new(mcu),
            mcu,
            ports: mcu.ports().iter().copied().map(IoPort::new).collect(),
            timer0: Timer0::new(),
        };
        m.reset();
        m
    }

    pub fn for_board(board: BoardType) -> Self {
        Self::new(board.mcu())
    }

    pub fn mcu(&self) -> Mcu {
        self.mcu
    }

    /// Replace flash with the HEX image and reset. Flash not covered by the
    /// image reads as zero (NOP).
    pub fn load_program(&mut self, hex: &str) -> HexSummary {
        self.mem.flash.fill(0);
        let summary = load_hex(hex, &mut self.mem.flash);
        debug!(
            "{}: program loaded, {} bytes, {} lines skipped",
            self.mcu, summary.bytes_written, summary.skipped_lines
        );
        self.reset();
        summary
    }

    /// Clear CPU state, data space and peripherals. Flash and external pin
    /// levels are kept.
    pub fn reset(&mut self) {
        self.cpu = Cpu::new();
        self.mem.data.fill(0);
        for p in &mut self.ports {
            p.reset();
        }
        self.timer0.reset();
        let ramend = (self.mcu.data_size() - 1) as u16;
        self.set_sp(ramend);
    }

    /// Execute one instruction (or one sleep cycle), advance Timer0 and take
    /// a pending interrupt. Returns the cycles consumed.
    pub fn step(&mut self) -> u32 {
        let before = self.cpu.cycles;
        if self.cpu.sleeping {
            self.cpu.cycles += 1;
        } else {
            if self.cpu.pc as usize >= self.mem.flash_words() {
                self.cpu.pc = 0;
            }
            let pc = self.cpu.pc as usize;
            let (inst, size) = decode(self.mem.program_word(pc), self.mem.program_word(pc + 1));
            let cycles = self.execute(inst, size);
            self.cpu.cycles += cycles as u64;
        }
        self.timer0.update(self.cpu.cycles);
        self.service_interrupts();
        (self.cpu.cycles - before) as u32
    }

    fn service_interrupts(&mut self) {
        if self.sreg() & (1 << SREG_I) == 0 {
            return;
        }
        if let Some(vector) = self.timer0.take_interrupt(self.mcu.timer0_vectors()) {
            self.do_interrupt(vector);
        }
    }

    /// Push the PC, clear I and jump to `vector`.
    fn do_interrupt(&mut self, vector: u16) {
        self.cpu.sleeping = false;
        self.push_pc();
        self.set_sreg(self.sreg() & !(1 << SREG_I));
        self.cpu.pc = vector as u32;
        self.cpu.cycles += INTERRUPT_CYCLES;
    }

    pub fn cycles(&self) -> u64 {
        self.cpu.cycles
    }

    /// Program counter as a word address.
    pub fn pc(&self) -> u32 {
        self.cpu.pc
    }

    pub fn is_sleeping(&self) -> bool {
        self.cpu.sleeping
    }

    pub fn sp(&self) -> u16 {
        u16::from_le_bytes([self.mem.read_raw(SPL_ADDR), self.mem.read_raw(SPH_ADDR)])
    }

    pub(crate) fn set_sp(&mut self, sp: u16) {
        let [lo, hi] = sp.to_le_bytes();
        self.mem.write_raw(SPL_ADDR, lo);
        self.mem.write_raw(SPH_ADDR, hi);
    }

    pub fn sreg(&self) -> u8 {
        self.mem.read_raw(SREG_ADDR)
    }

    pub(crate) fn set_sreg(&mut self, v: u8) {
        self.mem.write_raw(SREG_ADDR, v);
    }

    /// R0..R31
    pub fn registers(&self) -> &[u8] {
        &self.mem.data[..32]
    }

    pub fn flash(&self) -> &[u8] {
        &self.mem.flash
    }

    pub fn timer0(&self) -> &Timer0 {
        &self.timer0
    }

    pub fn port(&self, port: Port) -> Option<&IoPort> {
        self.ports.iter().find(|p| p.port() == port)
    }

    pub fn ports(&self) -> &[IoPort] {
        &self.ports
    }

    pub fn port_snapshots(&self) -> Vec<PortSnapshot> {
        self.ports.iter().map(IoPort::snapshot).collect()
    }

    /// Drive an external level onto a pin. Returns false when the port is
    /// not attached to this MCU.
    pub fn set_pin(&mut self, pin: PinMapping, level: bool) -> bool {
        match self.ports.iter_mut().find(|p| p.port() == pin.port) {
            Some(p) => {
                p.set_pin(pin.bit, level);
                true
            }
            None => false,
        }
    }

    /// Read a data-space byte the way an instruction would.
    pub fn read_data(&mut self, addr: u16) -> u8 {
        if let Some(v) = self.ports.iter().find_map(|p| p.read(addr)) {
            return v;
        }
        if let Some(v) = self.timer0.read(addr, self.cpu.cycles) {
            return v;
        }
        self.mem.read_raw(addr)
    }

    /// Write a data-space byte the way an instruction would.
    pub fn write_data(&mut self, addr: u16, value: u8) {
        if let Some(p) = self.ports.iter_mut().find(|p| p.owns(addr)) {
            p.write(addr, value);
            return;
        }
        if self.timer0.write(addr, value, self.cpu.cycles) {
            return;
        }
        self.mem.write_raw(addr, value);
    }

    /// SBI/CBI. On PINx and TIFR0, where a written 1 acts (toggle or clear),
    /// only the addressed bit is written; elsewhere it is read-modify-write.
    pub(crate) fn write_io_bit(&mut self, addr: u16, b: u8, set: bool) {
        let write_one_acts = addr == TIFR0 || self.ports.iter().any(|p| p.addrs().pin == addr);
        if write_one_acts {
            if set {
                self.write_data(addr, 1 << b);
            }
            return;
        }
        let v = self.read_data(addr);
        self.write_data(addr, if set { v | (1 << b) } else { v & !(1 << b) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::encode_hex;
    use crate::timer::{TCCR0B, TCNT0, TIMSK0};

    fn words(ws: &[u16]) -> Vec<u8> {
        ws.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_reset_state() {
        let m = Machine::new(Mcu::Atmega328p);
        assert_eq!(m.pc(), 0);
        assert_eq!(m.cycles(), 0);
        assert_eq!(m.sp(), 0x08FF);
        assert_eq!(m.ports().len(), 3);
        assert_eq!(Machine::new(Mcu::Atmega2560).ports().len(), 11);
        assert!(m.port(Port::A).is_none());
    }

    #[test]
    fn test_blink_writes_port_b() {
        // sbi DDRB,5 ; sbi PORTB,5 ; rjmp .-2
        let prog = words(&[0x9A25, 0x9A2D, 0xCFFF]);
        let mut m = Machine::new(Mcu::Atmega328p);
        m.load_program(&encode_hex(0, &prog));
        assert_eq!(m.step(), 2);
        assert_eq!(m.step(), 2);
        let b = m.port(Port::B).map(IoPort::snapshot);
        assert_eq!(b.map(|s| (s.ddr, s.port_value)), Some((0x20, 0x20)));
        m.step();
        assert_eq!(m.pc(), 2);
        assert_eq!(m.cycles(), 6);
    }

    #[test]
    fn test_external_input_visible_to_program() {
        // in r16, PIND
        let prog = words(&[0xB109]);
        let mut m = Machine::for_board(BoardType::ArduinoUno);
        m.load_program(&encode_hex(0, &prog));
        assert!(m.set_pin(PinMapping::new(Port::D, 2), true));
        m.step();
        assert_eq!(m.registers()[16], 0x04);
        assert!(!m.set_pin(PinMapping::new(Port::L, 0), true));
    }

    #[test]
    fn test_pc_wraps_past_flash_end() {
        let mut m = Machine::new(Mcu::Atmega328p);
        m.cpu.pc = m.mem.flash_words() as u32;
        m.step();
        assert_eq!(m.pc(), 1);
    }

    #[test]
    fn test_unknown_opcode_is_one_cycle_nop() {
        let mut m = Machine::new(Mcu::Atmega328p);
        m.load_program(&encode_hex(0, &words(&[0xFFFF])));
        assert_eq!(m.step(), 1);
        assert_eq!(m.pc(), 1);
    }

    #[test]
    fn test_timer_overflow_wakes_sleep() {
        let mut m = Machine::new(Mcu::Atmega328p);
        // sei ; sleep
        m.load_program(&encode_hex(0, &words(&[0x9478, 0x9588])));
        m.write_data(TCCR0B, 0x01);
        m.write_data(TIMSK0, 0x01);
        m.step();
        m.step();
        assert!(m.is_sleeping());
        while m.is_sleeping() {
            m.step();
        }
        assert_eq!(m.pc(), m.mcu().timer0_vectors().ovf as u32);
        assert_eq!(m.sreg() & (1 << SREG_I), 0);
        assert_eq!(m.sp(), 0x08FF - 2);
    }

    #[test]
    fn test_sbi_on_pin_register_toggles_one_bit() {
        // sbi DDRB,5 ; sbi PINB,5 ; cbi PINB,0
        let prog = words(&[0x9A25, 0x9A1D, 0x9818]);
        let mut m = Machine::for_board(BoardType::ArduinoUno);
        m.load_program(&encode_hex(0, &prog));
        m.set_pin(PinMapping::new(Port::B, 0), true);
        m.step();
        assert_eq!(m.read_data(0x23), 0x01);
        m.step();
        assert_eq!(m.port(Port::B).map(IoPort::output_value), Some(0x20));
        m.step();
        assert_eq!(m.port(Port::B).map(IoPort::output_value), Some(0x20));
    }

    #[test]
    fn test_sbi_on_tifr_clears_one_flag() {
        // sbi TIFR0,1 ; cbi TIFR0,0
        let prog = words(&[0x9AA9, 0x98A8]);
        let mut m = Machine::new(Mcu::Atmega328p);
        m.load_program(&encode_hex(0, &prog));
        m.write_data(TCNT0, 0xFF);
        m.write_data(TCCR0B, 0x01);
        // TCNT0 wraps with OCR0A = 0: OVF and COMPA both pending
        m.timer0.update(m.cpu.cycles + 2);
        assert_eq!(m.timer0().flags() & 0x03, 0x03);
        m.step();
        assert_eq!(m.timer0().flags() & 0x03, 0x01);
        m.step();
        assert_eq!(m.timer0().flags() & 0x03, 0x01);
    }
}
