//! AVR instruction decoder.
//!
//! Turns one 16-bit program word (plus the following word for the four
//! 32-bit encodings JMP, CALL, LDS, STS) into an [`Instruction`]. I/O
//! addresses are returned already translated to data space (`+0x20`).

/// Decoded AVR instruction with operands.
///
/// `d`/`r` are register indices 0–31, `k` an immediate or address, `a` a
/// data-space I/O address, `b` a bit index and `q` a displacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    // Arithmetic and logic
    Add { d: u8, r: u8 },
    Adc { d: u8, r: u8 },
    Sub { d: u8, r: u8 },
    Subi { d: u8, k: u8 },
    Sbc { d: u8, r: u8 },
    Sbci { d: u8, k: u8 },
    And { d: u8, r: u8 },
    Andi { d: u8, k: u8 },
    Or { d: u8, r: u8 },
    Ori { d: u8, k: u8 },
    Eor { d: u8, r: u8 },
    Com { d: u8 },
    Neg { d: u8 },
    Inc { d: u8 },
    Dec { d: u8 },
    Mul { d: u8, r: u8 },
    Muls { d: u8, r: u8 },
    Mulsu { d: u8, r: u8 },
    Fmul { d: u8, r: u8 },
    Fmuls { d: u8, r: u8 },
    Fmulsu { d: u8, r: u8 },
    Adiw { d: u8, k: u8 },
    Sbiw { d: u8, k: u8 },
    Cp { d: u8, r: u8 },
    Cpc { d: u8, r: u8 },
    Cpi { d: u8, k: u8 },
    // Data transfer
    Mov { d: u8, r: u8 },
    Movw { d: u8, r: u8 },
    Ldi { d: u8, k: u8 },
    Lds { d: u8, k: u16 },
    Sts { k: u16, r: u8 },
    Ld { d: u8, ptr: Pointer, mode: PtrMode },
    St { r: u8, ptr: Pointer, mode: PtrMode },
    Ldd { d: u8, ptr: Pointer, q: u8 },
    Std { r: u8, ptr: Pointer, q: u8 },
    Push { r: u8 },
    Pop { d: u8 },
    Lpm { d: u8, inc: bool },
    Elpm { d: u8, inc: bool },
    In { d: u8, a: u16 },
    Out { a: u16, r: u8 },
    // Bit and shift
    Lsr { d: u8 },
    Asr { d: u8 },
    Ror { d: u8 },
    Swap { d: u8 },
    Bst { d: u8, b: u8 },
    Bld { d: u8, b: u8 },
    Sbi { a: u16, b: u8 },
    Cbi { a: u16, b: u8 },
    Bset { s: u8 },
    Bclr { s: u8 },
    // Control flow
    Rjmp { k: i16 },
    Rcall { k: i16 },
    Jmp { k: u32 },
    Call { k: u32 },
    Ijmp,
    Icall,
    Eijmp,
    Eicall,
    Ret,
    Reti,
    Cpse { d: u8, r: u8 },
    Sbrc { r: u8, b: u8 },
    Sbrs { r: u8, b: u8 },
    Sbic { a: u16, b: u8 },
    Sbis { a: u16, b: u8 },
    Brbs { s: u8, k: i8 },
    Brbc { s: u8, k: i8 },
    // MCU control
    Sleep,
    Wdr,
    Break,
    Unknown(u16),
}

/// Index register used by LD/ST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointer {
    X,
    Y,
    Z,
}

impl Pointer {
    /// Low register of the pointer pair.
    pub fn reg(self) -> u8 {
        match self {
            Pointer::X => 26,
            Pointer::Y => 28,
            Pointer::Z => 30,
        }
    }
}

/// Pointer addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrMode {
    Plain,
    PostInc,
    PreDec,
}

/// True if `word` is the first half of a two-word instruction.
#[inline]
pub fn is_two_word(word: u16) -> bool {
    matches!(word & 0xFE0E, 0x940C | 0x940E) || matches!(word & 0xFE0F, 0x9000 | 0x9200)
}

/// `xxxx xxrd dddd rrrr`
#[inline(always)]
fn rd_rr(word: u16) -> (u8, u8) {
    (((word >> 4) & 0x1F) as u8, ((word & 0x0F) | ((word >> 5) & 0x10)) as u8)
}

/// `xxxx KKKK dddd KKKK`, d in r16–r31
#[inline(always)]
fn rd_imm(word: u16) -> (u8, u8) {
    ((((word >> 4) & 0x0F) + 16) as u8, (((word >> 4) & 0xF0) | (word & 0x0F)) as u8)
}

#[inline(always)]
fn rd5(word: u16) -> u8 {
    ((word >> 4) & 0x1F) as u8
}

/// `xxxx xxxx AAAA Abbb` → (data-space address, bit)
#[inline(always)]
fn io_bit(word: u16) -> (u16, u8) {
    (((word >> 3) & 0x1F) + 0x20, (word & 7) as u8)
}

/// Decode one instruction. Returns the instruction and its size in words.
pub fn decode(word: u16, next: u16) -> (Instruction, u8) {
    use Instruction::*;

    if is_two_word(word) {
        let far = ((((word as u32) >> 3) & 0x3E) | (word as u32 & 1)) << 16 | next as u32;
        let inst = match word & 0xFE0F {
            0x9000 => Lds { d: rd5(word), k: next },
            0x9200 => Sts { k: next, r: rd5(word) },
            _ if word & 0x0002 != 0 => Call { k: far },
            _ => Jmp { k: far },
        };
        return (inst, 2);
    }

    let inst = match word >> 12 {
        0x0 => decode_0000(word),
        0x1 => {
            let (d, r) = rd_rr(word);
            match word & 0x0C00 {
                0x0000 => Cpse { d, r },
                0x0400 => Cp { d, r },
                0x0800 => Sub { d, r },
                _ => Adc { d, r },
            }
        }
        0x2 => {
            let (d, r) = rd_rr(word);
            match word & 0x0C00 {
                0x0000 => And { d, r },
                0x0400 => Eor { d, r },
                0x0800 => Or { d, r },
                _ => Mov { d, r },
            }
        }
        0x3 => { let (d, k) = rd_imm(word); Cpi { d, k } }
        0x4 => { let (d, k) = rd_imm(word); Sbci { d, k } }
        0x5 => { let (d, k) = rd_imm(word); Subi { d, k } }
        0x6 => { let (d, k) = rd_imm(word); Ori { d, k } }
        0x7 => { let (d, k) = rd_imm(word); Andi { d, k } }
        0x8 | 0xA => {
            // 10q0 qqsd dddd yqqq
            let q = ((((word >> 13) & 1) << 5) | (((word >> 10) & 3) << 3) | (word & 7)) as u8;
            let ptr = if word & 0x0008 != 0 { Pointer::Y } else { Pointer::Z };
            let reg = rd5(word);
            match (word & 0x0200 != 0, q) {
                (false, 0) => Ld { d: reg, ptr, mode: PtrMode::Plain },
                (false, q) => Ldd { d: reg, ptr, q },
                (true, 0) => St { r: reg, ptr, mode: PtrMode::Plain },
                (true, q) => Std { r: reg, ptr, q },
            }
        }
        0x9 => decode_1001(word),
        0xB => {
            let reg = rd5(word);
            let a = ((((word >> 9) & 3) << 4) | (word & 0xF)) + 0x20;
            if word & 0x0800 == 0 { In { d: reg, a } } else { Out { a, r: reg } }
        }
        0xC => Rjmp { k: sign_extend(word & 0x0FFF, 12) },
        0xD => Rcall { k: sign_extend(word & 0x0FFF, 12) },
        0xE => { let (d, k) = rd_imm(word); Ldi { d, k } }
        _ => decode_1111(word),
    };
    (inst, 1)
}

fn decode_0000(word: u16) -> Instruction {
    use Instruction::*;
    let lo4 = |w: u16| ((w >> 4) & 0xF) as u8;
    let lo3 = |w: u16| (((w >> 4) & 0x7) + 16) as u8;
    match word & 0xFF00 {
        0x0000 if word == 0 => return Nop,
        0x0100 => return Movw { d: lo4(word) * 2, r: (word & 0xF) as u8 * 2 },
        0x0200 => return Muls { d: lo4(word) + 16, r: (word & 0xF) as u8 + 16 },
        0x0300 => {
            let (d, r) = (lo3(word), ((word & 0x7) + 16) as u8);
            return match word & 0x0088 {
                0x0000 => Mulsu { d, r },
                0x0008 => Fmul { d, r },
                0x0080 => Fmuls { d, r },
                _ => Fmulsu { d, r },
            };
        }
        _ => {}
    }
    let (d, r) = rd_rr(word);
    match word & 0x0C00 {
        0x0400 => Cpc { d, r },
        0x0800 => Sbc { d, r },
        0x0C00 => Add { d, r },
        _ => Unknown(word),
    }
}

fn decode_1001(word: u16) -> Instruction {
    use Instruction::*;
    let reg = rd5(word);

    match word {
        0x9409 => return Ijmp,
        0x9419 => return Eijmp,
        0x9509 => return Icall,
        0x9519 => return Eicall,
        0x9508 => return Ret,
        0x9518 => return Reti,
        0x9588 => return Sleep,
        0x9598 => return Break,
        0x95A8 => return Wdr,
        0x95C8 => return Lpm { d: 0, inc: false },
        0x95D8 => return Elpm { d: 0, inc: false },
        _ => {}
    }

    match word & 0xFE00 {
        // 1001 000d dddd xxxx: loads
        0x9000 => {
            return match word & 0xF {
                0x1 => Ld { d: reg, ptr: Pointer::Z, mode: PtrMode::PostInc },
                0x2 => Ld { d: reg, ptr: Pointer::Z, mode: PtrMode::PreDec },
                0x4 => Lpm { d: reg, inc: false },
                0x5 => Lpm { d: reg, inc: true },
                0x6 => Elpm { d: reg, inc: false },
                0x7 => Elpm { d: reg, inc: true },
                0x9 => Ld { d: reg, ptr: Pointer::Y, mode: PtrMode::PostInc },
                0xA => Ld { d: reg, ptr: Pointer::Y, mode: PtrMode::PreDec },
                0xC => Ld { d: reg, ptr: Pointer::X, mode: PtrMode::Plain },
                0xD => Ld { d: reg, ptr: Pointer::X, mode: PtrMode::PostInc },
                0xE => Ld { d: reg, ptr: Pointer::X, mode: PtrMode::PreDec },
                0xF => Pop { d: reg },
                _ => Unknown(word),
            };
        }
        // 1001 001r rrrr xxxx: stores
        0x9200 => {
            return match word & 0xF {
                0x1 => St { r: reg, ptr: Pointer::Z, mode: PtrMode::PostInc },
                0x2 => St { r: reg, ptr: Pointer::Z, mode: PtrMode::PreDec },
                0x9 => St { r: reg, ptr: Pointer::Y, mode: PtrMode::PostInc },
                0xA => St { r: reg, ptr: Pointer::Y, mode: PtrMode::PreDec },
                0xC => St { r: reg, ptr: Pointer::X, mode: PtrMode::Plain },
                0xD => St { r: reg, ptr: Pointer::X, mode: PtrMode::PostInc },
                0xE => St { r: reg, ptr: Pointer::X, mode: PtrMode::PreDec },
                0xF => Push { r: reg },
                _ => Unknown(word),
            };
        }
        // 1001 010d dddd xxxx: one-operand ops, BSET/BCLR
        0x9400 => {
            return match word & 0xF {
                0x0 => Com { d: reg },
                0x1 => Neg { d: reg },
                0x2 => Swap { d: reg },
                0x3 => Inc { d: reg },
                0x5 => Asr { d: reg },
                0x6 => Lsr { d: reg },
                0x7 => Ror { d: reg },
                0x8 if word & 0xFF8F == 0x9408 => Bset { s: ((word >> 4) & 7) as u8 },
                0x8 if word & 0xFF8F == 0x9488 => Bclr { s: ((word >> 4) & 7) as u8 },
                0xA => Dec { d: reg },
                _ => Unknown(word),
            };
        }
        _ => {}
    }

    match word & 0xFF00 {
        0x9600 | 0x9700 => {
            let d = (((word >> 4) & 3) * 2 + 24) as u8;
            let k = ((((word >> 6) & 3) << 4) | (word & 0xF)) as u8;
            if word & 0x0100 == 0 { Adiw { d, k } } else { Sbiw { d, k } }
        }
        0x9800 => { let (a, b) = io_bit(word); Cbi { a, b } }
        0x9900 => { let (a, b) = io_bit(word); Sbic { a, b } }
        0x9A00 => { let (a, b) = io_bit(word); Sbi { a, b } }
        0x9B00 => { let (a, b) = io_bit(word); Sbis { a, b } }
        _ if word & 0xFC00 == 0x9C00 => { let (d, r) = rd_rr(word); Mul { d, r } }
        _ => Unknown(word),
    }
}

fn decode_1111(word: u16) -> Instruction {
    use Instruction::*;
    let reg = rd5(word);
    let b = (word & 7) as u8;
    match word & 0x0C00 {
        0x0000 => Brbs { s: b, k: sign_extend((word >> 3) & 0x7F, 7) as i8 },
        0x0400 => Brbc { s: b, k: sign_extend((word >> 3) & 0x7F, 7) as i8 },
        _ if word & 0x0008 != 0 => Unknown(word),
        0x0800 if word & 0x0200 == 0 => Bld { d: reg, b },
        0x0800 => Bst { d: reg, b },
        _ if word & 0x0200 == 0 => Sbrc { r: reg, b },
        _ => Sbrs { r: reg, b },
    }
}

#[inline(always)]
fn sign_extend(val: u16, bits: u32) -> i16 {
    let shift = 16 - bits;
    ((val << shift) as i16) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_nop() {
        assert_eq!(decode(0x0000, 0), (Instruction::Nop, 1));
    }

    #[test]
    fn test_decode_ldi() {
        // LDI r16, 0xFF = 0xEF0F
        assert_eq!(decode(0xEF0F, 0).0, Instruction::Ldi { d: 16, k: 0xFF });
        // LDI r24, 0x20 = 0xE280
        assert_eq!(decode(0xE280, 0).0, Instruction::Ldi { d: 24, k: 0x20 });
    }

    #[test]
    fn test_decode_rjmp() {
        assert_eq!(decode(0xCFFF, 0).0, Instruction::Rjmp { k: -1 });
        assert_eq!(decode(0xC005, 0).0, Instruction::Rjmp { k: 5 });
    }

    #[test]
    fn test_decode_jmp_call() {
        assert_eq!(decode(0x940C, 0x0034), (Instruction::Jmp { k: 0x34 }, 2));
        assert_eq!(decode(0x940E, 0x0100), (Instruction::Call { k: 0x100 }, 2));
        assert!(is_two_word(0x9000) && is_two_word(0x9200));
        assert!(!is_two_word(0x9001));
    }

    #[test]
    fn test_decode_io() {
        // OUT 0x05 (PORTB), r24 = 0xB985
        assert_eq!(decode(0xB985, 0).0, Instruction::Out { a: 0x25, r: 24 });
        // IN r24, 0x3F (SREG) = 0xB78F
        assert_eq!(decode(0xB78F, 0).0, Instruction::In { d: 24, a: 0x5F });
        // SBI 0x04, 5 (DDRB bit 5) = 0x9A25
        assert_eq!(decode(0x9A25, 0).0, Instruction::Sbi { a: 0x24, b: 5 });
        // CBI 0x05, 5 = 0x982D
        assert_eq!(decode(0x982D, 0).0, Instruction::Cbi { a: 0x25, b: 5 });
    }

    #[test]
    fn test_decode_ld_st() {
        assert_eq!(decode(0x900F, 0).0, Instruction::Pop { d: 0 });
        assert_eq!(decode(0x920F, 0).0, Instruction::Push { r: 0 });
        assert_eq!(decode(0x918D, 0).0, Instruction::Ld { d: 24, ptr: Pointer::X, mode: PtrMode::PostInc });
        // STD Y+1, r24 = 0x8389
        assert_eq!(decode(0x8389, 0).0, Instruction::Std { r: 24, ptr: Pointer::Y, q: 1 });
        // LDD r24, Z+63 = 0xAD87
        assert_eq!(decode(0xAD87, 0).0, Instruction::Ldd { d: 24, ptr: Pointer::Z, q: 63 });
        // LD r24, Z = 0x8180
        assert_eq!(decode(0x8180, 0).0, Instruction::Ld { d: 24, ptr: Pointer::Z, mode: PtrMode::Plain });
    }

    #[test]
    fn test_decode_adiw_sbiw() {
        // ADIW r24, 1 = 0x9601
        assert_eq!(decode(0x9601, 0).0, Instruction::Adiw { d: 24, k: 1 });
        // SBIW r30, 63 = 0x97FF
        assert_eq!(decode(0x97FF, 0).0, Instruction::Sbiw { d: 30, k: 63 });
    }

    #[test]
    fn test_decode_branches() {
        // BRNE .-2 = BRBC 1, -1 = 0xF7F9
        assert_eq!(decode(0xF7F9, 0).0, Instruction::Brbc { s: 1, k: -1 });
        // BREQ .+4 = BRBS 1, 2 = 0xF011
        assert_eq!(decode(0xF011, 0).0, Instruction::Brbs { s: 1, k: 2 });
        // SBRS r24, 0 = 0xFF80
        assert_eq!(decode(0xFF80, 0).0, Instruction::Sbrs { r: 24, b: 0 });
    }

    #[test]
    fn test_decode_sreg_ops() {
        assert_eq!(decode(0x9478, 0).0, Instruction::Bset { s: 7 }); // SEI
        assert_eq!(decode(0x94F8, 0).0, Instruction::Bclr { s: 7 }); // CLI
        assert_eq!(decode(0x9408, 0).0, Instruction::Bset { s: 0 }); // SEC
    }

    #[test]
    fn test_decode_alu() {
        assert_eq!(decode(0x0C01, 0).0, Instruction::Add { d: 0, r: 1 });
        assert_eq!(decode(0x2411, 0).0, Instruction::Eor { d: 1, r: 1 });
        assert_eq!(decode(0x9C23, 0).0, Instruction::Mul { d: 2, r: 3 });
        assert_eq!(decode(0x0101, 0).0, Instruction::Movw { d: 0, r: 2 });
        assert_eq!(decode(0xFFFF, 0).0, Instruction::Unknown(0xFFFF));
    }
}
