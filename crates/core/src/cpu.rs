//! AVR CPU core.
//!
//! [`Cpu`] holds the program counter, the cycle counter and the sleep flag.
//! SREG and SP live only in data space (0x5F, 0x5D/0x5E), so IN/OUT and
//! memory-mapped access see the same value the core uses.
//!
//! Instruction execution is implemented on [`Machine`] so loads and stores
//! reach the attached GPIO ports and Timer0 through
//! [`Machine::read_data`] and [`Machine::write_data`].
//!
//! Flag formulas follow the AVR instruction set manual, including the
//! carry chain of SBC/SBCI/CPC where Z is only ever cleared.

use tracing::trace;

use crate::machine::Machine;
use crate::opcodes::{is_two_word, Instruction, Pointer, PtrMode};
use crate::{SREG_C, SREG_H, SREG_I, SREG_N, SREG_S, SREG_T, SREG_V, SREG_Z};

/// RAMPZ: upper flash address byte for ELPM.
const RAMPZ_ADDR: u16 = 0x5B;
/// EIND: upper address byte for EIJMP/EICALL.
const EIND_ADDR: u16 = 0x5C;

/// Program counter, cycle counter and sleep state.
#[derive(Debug, Clone, Default)]
pub struct Cpu {
    /// Program counter (word address)
    pub pc: u32,
    /// Monotonic cycle counter, never reset by stopping the runner
    pub cycles: u64,
    /// Set by SLEEP, cleared when an interrupt is taken
    pub sleeping: bool,
}

impl Cpu {
    pub fn new() -> Self {
        Self::default()
    }
}

#[inline(always)]
fn bit(v: u8, n: u8) -> u8 {
    (v >> n) & 1
}

/// SREG after ADD/ADC.
pub fn add_flags(sreg: u8, rd: u8, rr: u8, r: u8) -> u8 {
    let (rd7, rr7, r7) = (bit(rd, 7), bit(rr, 7), bit(r, 7));
    let (rd3, rr3, r3) = (bit(rd, 3), bit(rr, 3), bit(r, 3));
    let h = (rd3 & rr3) | (rr3 & !r3 & 1) | (!r3 & 1 & rd3);
    let v = (rd7 & rr7 & (r7 ^ 1)) | ((rd7 ^ 1) & (rr7 ^ 1) & r7);
    let c = (rd7 & rr7) | (rr7 & (r7 ^ 1)) | ((r7 ^ 1) & rd7);
    let z = (r == 0) as u8;
    pack(sreg & 0xC0, h, r7 ^ v, v, r7, z, c)
}

/// SREG after SUB/SUBI/CP/CPI (`chain == false`) or SBC/SBCI/CPC
/// (`chain == true`, Z only cleared).
pub fn sub_flags(sreg: u8, rd: u8, rr: u8, r: u8, chain: bool) -> u8 {
    let (rd7, rr7, r7) = (bit(rd, 7), bit(rr, 7), bit(r, 7));
    let (rd3, rr3, r3) = (bit(rd, 3), bit(rr, 3), bit(r, 3));
    let h = ((rd3 ^ 1) & rr3) | (rr3 & r3) | (r3 & (rd3 ^ 1));
    let v = (rd7 & (rr7 ^ 1) & (r7 ^ 1)) | ((rd7 ^ 1) & rr7 & r7);
    let c = ((rd7 ^ 1) & rr7) | (rr7 & r7) | (r7 & (rd7 ^ 1));
    let z = if chain { ((r == 0) as u8) & bit(sreg, SREG_Z) } else { (r == 0) as u8 };
    pack(sreg & 0xC0, h, r7 ^ v, v, r7, z, c)
}

/// SREG after AND/OR/EOR and friends: V cleared, C and H untouched.
pub fn logic_flags(sreg: u8, r: u8) -> u8 {
    let n = bit(r, 7);
    let z = (r == 0) as u8;
    (sreg & 0b1110_0001) | (n << SREG_S) | (n << SREG_N) | (z << SREG_Z)
}

/// SREG after LSR/ASR/ROR: C from bit 0 of the operand, V = N ^ C.
fn shift_flags(sreg: u8, rd: u8, r: u8) -> u8 {
    let c = rd & 1;
    let n = bit(r, 7);
    let v = n ^ c;
    let z = (r == 0) as u8;
    (sreg & 0b1110_0000) | ((n ^ v) << SREG_S) | (v << SREG_V) | (n << SREG_N) | (z << SREG_Z) | c
}

/// SREG after the multiply family: C = bit 15, Z = product is zero.
fn mul_flags(sreg: u8, product: u16) -> u8 {
    (sreg & 0b1111_1100) | (((product == 0) as u8) << SREG_Z) | ((product >> 15) as u8)
}

#[inline(always)]
fn pack(it: u8, h: u8, s: u8, v: u8, n: u8, z: u8, c: u8) -> u8 {
    it | (h << SREG_H) | (s << SREG_S) | (v << SREG_V) | (n << SREG_N) | (z << SREG_Z) | (c << SREG_C)
}

#[inline(always)]
fn rel(pc: u32, k: i32) -> u32 {
    (pc as i64 + k as i64) as u32
}

impl Machine {
    /// Execute one decoded instruction and return its cycle cost.
    ///
    /// The PC has not been advanced yet; `size` is the instruction length in
    /// words.
    pub(crate) fn execute(&mut self, inst: Instruction, size: u8) -> u32 {
        use Instruction::*;
        self.cpu.pc = self.cpu.pc.wrapping_add(size as u32);
        let wide = self.mcu.has_22bit_pc() as u32;

        match inst {
            Nop | Break | Wdr => 1,

            // -- Arithmetic --
            Add { d, r } => self.alu_add(d, self.mem.reg(r), false),
            Adc { d, r } => self.alu_add(d, self.mem.reg(r), true),
            Sub { d, r } => self.alu_sub(d, self.mem.reg(r), false, true),
            Subi { d, k } => self.alu_sub(d, k, false, true),
            Sbc { d, r } => self.alu_sub(d, self.mem.reg(r), true, true),
            Sbci { d, k } => self.alu_sub(d, k, true, true),
            Cp { d, r } => self.alu_sub(d, self.mem.reg(r), false, false),
            Cpc { d, r } => self.alu_sub(d, self.mem.reg(r), true, false),
            Cpi { d, k } => self.alu_sub(d, k, false, false),
            And { d, r } => self.alu_logic(d, self.mem.reg(d) & self.mem.reg(r)),
            Andi { d, k } => self.alu_logic(d, self.mem.reg(d) & k),
            Or { d, r } => self.alu_logic(d, self.mem.reg(d) | self.mem.reg(r)),
            Ori { d, k } => self.alu_logic(d, self.mem.reg(d) | k),
            Eor { d, r } => self.alu_logic(d, self.mem.reg(d) ^ self.mem.reg(r)),
            Com { d } => {
                let res = !self.mem.reg(d);
                self.mem.set_reg(d, res);
                let s = logic_flags(self.sreg(), res) | (1 << SREG_C);
                self.set_sreg(s);
                1
            }
            Neg { d } => {
                let rd = self.mem.reg(d);
                let res = 0u8.wrapping_sub(rd);
                self.mem.set_reg(d, res);
                self.set_sreg(sub_flags(self.sreg(), 0, rd, res, false));
                1
            }
            Inc { d } | Dec { d } => {
                let rd = self.mem.reg(d);
                let (res, v) = if matches!(inst, Inc { .. }) {
                    (rd.wrapping_add(1), (rd == 0x7F) as u8)
                } else {
                    (rd.wrapping_sub(1), (rd == 0x80) as u8)
                };
                self.mem.set_reg(d, res);
                let n = bit(res, 7);
                let z = (res == 0) as u8;
                let s = (self.sreg() & 0b1110_0001)
                    | ((n ^ v) << SREG_S) | (v << SREG_V) | (n << SREG_N) | (z << SREG_Z);
                self.set_sreg(s);
                1
            }
            Adiw { d, k } | Sbiw { d, k } => {
                let val = self.mem.pair(d);
                let add = matches!(inst, Adiw { .. });
                let res = if add { val.wrapping_add(k as u16) } else { val.wrapping_sub(k as u16) };
                self.mem.set_pair(d, res);
                let (vh, rh) = ((val >> 15) as u8, (res >> 15) as u8);
                let (v, c) = if add { ((vh ^ 1) & rh, (rh ^ 1) & vh) } else { (vh & (rh ^ 1), rh & (vh ^ 1)) };
                let z = (res == 0) as u8;
                let s = (self.sreg() & 0b1110_0000)
                    | ((rh ^ v) << SREG_S) | (v << SREG_V) | (rh << SREG_N) | (z << SREG_Z) | c;
                self.set_sreg(s);
                2
            }
            Mul { d, r } => {
                let p = self.mem.reg(d) as u16 * self.mem.reg(r) as u16;
                self.store_product(p)
            }
            Muls { d, r } => {
                let p = (self.mem.reg(d) as i8 as i16 * self.mem.reg(r) as i8 as i16) as u16;
                self.store_product(p)
            }
            Mulsu { d, r } => {
                let p = (self.mem.reg(d) as i8 as i16 * self.mem.reg(r) as i16) as u16;
                self.store_product(p)
            }
            Fmul { d, r } | Fmuls { d, r } | Fmulsu { d, r } => {
                let (a, b) = (self.mem.reg(d), self.mem.reg(r));
                let p = match inst {
                    Fmul { .. } => a as u16 * b as u16,
                    Fmuls { .. } => (a as i8 as i16 * b as i8 as i16) as u16,
                    _ => (a as i8 as i16 * b as i16) as u16,
                };
                // C comes from the unshifted product
                let c = (p >> 15) as u8;
                let res = p << 1;
                self.mem.set_pair(0, res);
                let s = (self.sreg() & 0b1111_1100) | (((res == 0) as u8) << SREG_Z) | c;
                self.set_sreg(s);
                2
            }

            // -- Data transfer --
            Mov { d, r } => { self.mem.set_reg(d, self.mem.reg(r)); 1 }
            Movw { d, r } => { self.mem.set_pair(d, self.mem.pair(r)); 1 }
            Ldi { d, k } => { self.mem.set_reg(d, k); 1 }
            Lds { d, k } => { let v = self.read_data(k); self.mem.set_reg(d, v); 2 }
            Sts { k, r } => { let v = self.mem.reg(r); self.write_data(k, v); 2 }
            Ld { d, ptr, mode } => {
                let a = self.ptr_address(ptr, mode);
                let v = self.read_data(a);
                self.mem.set_reg(d, v);
                2
            }
            St { r, ptr, mode } => {
                let v = self.mem.reg(r);
                let a = self.ptr_address(ptr, mode);
                self.write_data(a, v);
                2
            }
            Ldd { d, ptr, q } => {
                let a = self.mem.pair(ptr.reg()).wrapping_add(q as u16);
                let v = self.read_data(a);
                self.mem.set_reg(d, v);
                2
            }
            Std { r, ptr, q } => {
                let a = self.mem.pair(ptr.reg()).wrapping_add(q as u16);
                let v = self.mem.reg(r);
                self.write_data(a, v);
                2
            }
            Push { r } => { let v = self.mem.reg(r); self.push(v); 2 }
            Pop { d } => { let v = self.pop(); self.mem.set_reg(d, v); 2 }
            Lpm { d, inc } => {
                let z = self.mem.z();
                self.mem.set_reg(d, self.mem.flash_byte(z as usize));
                if inc {
                    self.mem.set_pair(30, z.wrapping_add(1));
                }
                3
            }
            Elpm { d, inc } => {
                let addr = ((self.mem.read_raw(RAMPZ_ADDR) as u32) << 16) | self.mem.z() as u32;
                self.mem.set_reg(d, self.mem.flash_byte(addr as usize));
                if inc {
                    let next = addr.wrapping_add(1);
                    self.mem.set_pair(30, next as u16);
                    self.mem.write_raw(RAMPZ_ADDR, (next >> 16) as u8);
                }
                3
            }
            In { d, a } => { let v = self.read_data(a); self.mem.set_reg(d, v); 1 }
            Out { a, r } => { let v = self.mem.reg(r); self.write_data(a, v); 1 }

            // -- Bit and shift --
            Lsr { d } | Asr { d } | Ror { d } => {
                let rd = self.mem.reg(d);
                let res = match inst {
                    Lsr { .. } => rd >> 1,
                    Asr { .. } => ((rd as i8) >> 1) as u8,
                    _ => (rd >> 1) | (bit(self.sreg(), SREG_C) << 7),
                };
                self.mem.set_reg(d, res);
                self.set_sreg(shift_flags(self.sreg(), rd, res));
                1
            }
            Swap { d } => { let v = self.mem.reg(d); self.mem.set_reg(d, v.rotate_left(4)); 1 }
            Bst { d, b } => {
                let t = bit(self.mem.reg(d), b);
                self.set_sreg((self.sreg() & !(1 << SREG_T)) | (t << SREG_T));
                1
            }
            Bld { d, b } => {
                let v = self.mem.reg(d) & !(1 << b);
                self.mem.set_reg(d, v | (bit(self.sreg(), SREG_T) << b));
                1
            }
            Sbi { a, b } => { self.write_io_bit(a, b, true); 2 }
            Cbi { a, b } => { self.write_io_bit(a, b, false); 2 }
            Bset { s } => { self.set_sreg(self.sreg() | (1 << s)); 1 }
            Bclr { s } => { self.set_sreg(self.sreg() & !(1 << s)); 1 }

            // -- Control flow --
            Rjmp { k } => { self.cpu.pc = rel(self.cpu.pc, k as i32); 2 }
            Rcall { k } => {
                self.push_pc();
                self.cpu.pc = rel(self.cpu.pc, k as i32);
                3 + wide
            }
            Jmp { k } => { self.cpu.pc = k; 3 }
            Call { k } => { self.push_pc(); self.cpu.pc = k; 4 + wide }
            Ijmp => { self.cpu.pc = self.mem.z() as u32; 2 }
            Icall => { self.push_pc(); self.cpu.pc = self.mem.z() as u32; 3 + wide }
            Eijmp => { self.cpu.pc = self.extended_z(); 2 }
            Eicall => { self.push_pc(); self.cpu.pc = self.extended_z(); 4 }
            Ret => { self.cpu.pc = self.pop_pc(); 4 + wide }
            Reti => {
                self.cpu.pc = self.pop_pc();
                self.set_sreg(self.sreg() | (1 << SREG_I));
                4 + wide
            }
            Cpse { d, r } => self.skip_if(self.mem.reg(d) == self.mem.reg(r)),
            Sbrc { r, b } => self.skip_if(bit(self.mem.reg(r), b) == 0),
            Sbrs { r, b } => self.skip_if(bit(self.mem.reg(r), b) == 1),
            Sbic { a, b } => { let v = self.read_data(a); self.skip_if(bit(v, b) == 0) }
            Sbis { a, b } => { let v = self.read_data(a); self.skip_if(bit(v, b) == 1) }
            Brbs { s, k } | Brbc { s, k } => {
                let set = bit(self.sreg(), s) == 1;
                if set == matches!(inst, Brbs { .. }) {
                    self.cpu.pc = rel(self.cpu.pc, k as i32);
                    2
                } else {
                    1
                }
            }

            Sleep => { self.cpu.sleeping = true; 1 }
            Unknown(w) => {
                trace!("unknown opcode 0x{:04X} at pc=0x{:05X}", w, self.cpu.pc.wrapping_sub(1) * 2);
                1
            }
        }
    }

    fn alu_add(&mut self, d: u8, rr: u8, carry: bool) -> u32 {
        let rd = self.mem.reg(d);
        let c = if carry { bit(self.sreg(), SREG_C) } else { 0 };
        let res = rd.wrapping_add(rr).wrapping_add(c);
        self.mem.set_reg(d, res);
        self.set_sreg(add_flags(self.sreg(), rd, rr, res));
        1
    }

    /// SUB/SBC family; `store == false` is the compare form.
    fn alu_sub(&mut self, d: u8, rr: u8, carry: bool, store: bool) -> u32 {
        let rd = self.mem.reg(d);
        let c = if carry { bit(self.sreg(), SREG_C) } else { 0 };
        let res = rd.wrapping_sub(rr).wrapping_sub(c);
        if store {
            self.mem.set_reg(d, res);
        }
        self.set_sreg(sub_flags(self.sreg(), rd, rr, res, carry));
        1
    }

    fn alu_logic(&mut self, d: u8, res: u8) -> u32 {
        self.mem.set_reg(d, res);
        self.set_sreg(logic_flags(self.sreg(), res));
        1
    }

    fn store_product(&mut self, p: u16) -> u32 {
        self.mem.set_pair(0, p);
        self.set_sreg(mul_flags(self.sreg(), p));
        2
    }

    fn ptr_address(&mut self, ptr: Pointer, mode: PtrMode) -> u16 {
        let lo = ptr.reg();
        let v = self.mem.pair(lo);
        match mode {
            PtrMode::Plain => v,
            PtrMode::PostInc => {
                self.mem.set_pair(lo, v.wrapping_add(1));
                v
            }
            PtrMode::PreDec => {
                let a = v.wrapping_sub(1);
                self.mem.set_pair(lo, a);
                a
            }
        }
    }

    fn extended_z(&self) -> u32 {
        ((self.mem.read_raw(EIND_ADDR) as u32) << 16) | self.mem.z() as u32
    }

    /// Skip the next instruction when `cond` holds; 1, 2 or 3 cycles.
    fn skip_if(&mut self, cond: bool) -> u32 {
        if !cond {
            return 1;
        }
        let next = self.mem.program_word(self.cpu.pc as usize);
        if is_two_word(next) {
            self.cpu.pc = self.cpu.pc.wrapping_add(2);
            3
        } else {
            self.cpu.pc = self.cpu.pc.wrapping_add(1);
            2
        }
    }

    pub(crate) fn push(&mut self, v: u8) {
        let sp = self.sp();
        self.mem.write_raw(sp, v);
        self.set_sp(sp.wrapping_sub(1));
    }

    pub(crate) fn pop(&mut self) -> u8 {
        let sp = self.sp().wrapping_add(1);
        self.set_sp(sp);
        self.mem.read_raw(sp)
    }

    /// Push the return address, low byte on top. Three bytes on 22-bit PC parts.
    pub(crate) fn push_pc(&mut self) {
        let pc = self.cpu.pc;
        self.push(pc as u8);
        self.push((pc >> 8) as u8);
        if self.mcu.has_22bit_pc() {
            self.push((pc >> 16) as u8);
        }
    }

    fn pop_pc(&mut self) -> u32 {
        let mut pc = 0u32;
        if self.mcu.has_22bit_pc() {
            pc = (self.pop() as u32) << 16;
        }
        pc |= (self.pop() as u32) << 8;
        pc | self.pop() as u32
    }
}
