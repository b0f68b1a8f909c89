//! Arduino pin name to AVR port/bit translation.
//!
//! Bit positions inside an 8-bit port follow the silicon pinout, not the
//! Arduino numbering, so each board carries its own static table:
//!
//! | Board | D0–D7 | D8–D13 | A0–A5 |
//! |-------|-------|--------|-------|
//! | Uno / Nano (ATmega328P) | PD0–PD7 | PB0–PB5 | PC0–PC5 |
//!
//! The Mega 2560 spreads its 70 I/O pins over ports A–L; see [`MEGA_PINS`].
//!
//! Power, ground, reference and analog-only inputs are listed too, without a
//! register, so callers can tell "pin exists but is not GPIO" apart from a
//! misspelled pin name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::LookupError;
use crate::mcu::Mcu;

/// An 8-bit AVR I/O port. There is no port I on any AVR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Port {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    J,
    K,
    L,
}

impl Port {
    pub fn letter(self) -> char {
        match self {
            Port::A => 'A',
            Port::B => 'B',
            Port::C => 'C',
            Port::D => 'D',
            Port::E => 'E',
            Port::F => 'F',
            Port::G => 'G',
            Port::H => 'H',
            Port::J => 'J',
            Port::K => 'K',
            Port::L => 'L',
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Physical location of a GPIO pin: port letter plus bit index `0..=7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PinMapping {
    pub port: Port,
    pub bit: u8,
}

impl PinMapping {
    pub const fn new(port: Port, bit: u8) -> Self {
        PinMapping { port, bit }
    }

    #[inline]
    pub fn mask(self) -> u8 {
        1 << self.bit
    }
}

impl fmt::Display for PinMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}{}", self.port, self.bit)
    }
}

/// Named header pins that are not numbered digital/analog pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialPin {
    Gnd,
    Vin,
    V5,
    V3_3,
    Ioref,
    Reset,
    Aref,
    Sda,
    Scl,
}

impl SpecialPin {
    pub const ALL: [SpecialPin; 9] = [
        SpecialPin::Gnd,
        SpecialPin::Vin,
        SpecialPin::V5,
        SpecialPin::V3_3,
        SpecialPin::Ioref,
        SpecialPin::Reset,
        SpecialPin::Aref,
        SpecialPin::Sda,
        SpecialPin::Scl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SpecialPin::Gnd => "GND",
            SpecialPin::Vin => "VIN",
            SpecialPin::V5 => "5V",
            SpecialPin::V3_3 => "3V3",
            SpecialPin::Ioref => "IOREF",
            SpecialPin::Reset => "RESET",
            SpecialPin::Aref => "AREF",
            SpecialPin::Sda => "SDA",
            SpecialPin::Scl => "SCL",
        }
    }
}

/// A validated Arduino pin identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinName {
    /// Bare decimal pin number, `"13"`.
    Digital(u8),
    /// `"A"` followed by the channel number, `"A0"`.
    Analog(u8),
    Special(SpecialPin),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid pin name '{0}'")]
pub struct ParsePinError(pub String);

fn parse_index(digits: &str) -> Option<u8> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Canonical names carry no leading zeros
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    digits.parse().ok()
}

impl FromStr for PinName {
    type Err = ParsePinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(special) = SpecialPin::ALL.iter().find(|p| p.as_str() == s) {
            return Ok(PinName::Special(*special));
        }
        if let Some(rest) = s.strip_prefix('A') {
            return parse_index(rest)
                .map(PinName::Analog)
                .ok_or_else(|| ParsePinError(s.to_string()));
        }
        parse_index(s)
            .map(PinName::Digital)
            .ok_or_else(|| ParsePinError(s.to_string()))
    }
}

impl fmt::Display for PinName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinName::Digital(n) => write!(f, "{}", n),
            PinName::Analog(n) => write!(f, "A{}", n),
            PinName::Special(p) => f.write_str(p.as_str()),
        }
    }
}

/// One header pin of a board and, if it has one, its GPIO register location.
#[derive(Debug, Clone, Copy)]
pub struct PinDef {
    pub name: PinName,
    pub location: Option<PinMapping>,
}

const fn d(n: u8, port: Port, bit: u8) -> PinDef {
    PinDef { name: PinName::Digital(n), location: Some(PinMapping::new(port, bit)) }
}

const fn a(n: u8, port: Port, bit: u8) -> PinDef {
    PinDef { name: PinName::Analog(n), location: Some(PinMapping::new(port, bit)) }
}

const fn analog_only(n: u8) -> PinDef {
    PinDef { name: PinName::Analog(n), location: None }
}

const fn wired(p: SpecialPin, port: Port, bit: u8) -> PinDef {
    PinDef { name: PinName::Special(p), location: Some(PinMapping::new(port, bit)) }
}

const fn power(p: SpecialPin) -> PinDef {
    PinDef { name: PinName::Special(p), location: None }
}

use Port::*;
use SpecialPin::*;

/// Arduino Uno (ATmega328P).
pub static UNO_PINS: [PinDef; 29] = [
    d(0, D, 0), d(1, D, 1), d(2, D, 2), d(3, D, 3),
    d(4, D, 4), d(5, D, 5), d(6, D, 6), d(7, D, 7),
    d(8, B, 0), d(9, B, 1), d(10, B, 2), d(11, B, 3),
    d(12, B, 4), d(13, B, 5),
    a(0, C, 0), a(1, C, 1), a(2, C, 2), a(3, C, 3), a(4, C, 4), a(5, C, 5),
    wired(Sda, C, 4), wired(Scl, C, 5),
    power(Gnd), power(Vin), power(V5), power(V3_3), power(Ioref),
    power(Reset), power(Aref),
];

/// Arduino Nano (ATmega328P, TQFP package with the extra ADC6/ADC7 inputs).
pub static NANO_PINS: [PinDef; 28] = [
    d(0, D, 0), d(1, D, 1), d(2, D, 2), d(3, D, 3),
    d(4, D, 4), d(5, D, 5), d(6, D, 6), d(7, D, 7),
    d(8, B, 0), d(9, B, 1), d(10, B, 2), d(11, B, 3),
    d(12, B, 4), d(13, B, 5),
    a(0, C, 0), a(1, C, 1), a(2, C, 2), a(3, C, 3), a(4, C, 4), a(5, C, 5),
    analog_only(6), analog_only(7),
    power(Gnd), power(Vin), power(V5), power(V3_3), power(Reset), power(Aref),
];

/// Arduino Mega 2560 (ATmega2560).
pub static MEGA_PINS: [PinDef; 79] = [
    d(0, E, 0), d(1, E, 1), d(2, E, 4), d(3, E, 5),
    d(4, G, 5), d(5, E, 3), d(6, H, 3), d(7, H, 4),
    d(8, H, 5), d(9, H, 6), d(10, B, 4), d(11, B, 5),
    d(12, B, 6), d(13, B, 7), d(14, J, 1), d(15, J, 0),
    d(16, H, 1), d(17, H, 0), d(18, D, 3), d(19, D, 2),
    d(20, D, 1), d(21, D, 0), d(22, A, 0), d(23, A, 1),
    d(24, A, 2), d(25, A, 3), d(26, A, 4), d(27, A, 5),
    d(28, A, 6), d(29, A, 7), d(30, C, 7), d(31, C, 6),
    d(32, C, 5), d(33, C, 4), d(34, C, 3), d(35, C, 2),
    d(36, C, 1), d(37, C, 0), d(38, D, 7), d(39, G, 2),
    d(40, G, 1), d(41, G, 0), d(42, L, 7), d(43, L, 6),
    d(44, L, 5), d(45, L, 4), d(46, L, 3), d(47, L, 2),
    d(48, L, 1), d(49, L, 0), d(50, B, 3), d(51, B, 2),
    d(52, B, 1), d(53, B, 0),
    a(0, F, 0), a(1, F, 1), a(2, F, 2), a(3, F, 3),
    a(4, F, 4), a(5, F, 5), a(6, F, 6), a(7, F, 7),
    a(8, K, 0), a(9, K, 1), a(10, K, 2), a(11, K, 3),
    a(12, K, 4), a(13, K, 5), a(14, K, 6), a(15, K, 7),
    wired(Sda, D, 1), wired(Scl, D, 0),
    power(Gnd), power(Vin), power(V5), power(V3_3), power(Ioref),
    power(Reset), power(Aref),
];

/// Supported board variants, identified by their wokwi element names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoardType {
    ArduinoUno,
    ArduinoNano,
    ArduinoMega,
}

impl BoardType {
    pub const ALL: [BoardType; 3] = [BoardType::ArduinoUno, BoardType::ArduinoNano, BoardType::ArduinoMega];

    pub fn id(self) -> &'static str {
        self.config().id
    }

    pub fn from_id(id: &str) -> Option<BoardType> {
        BoardType::ALL.iter().copied().find(|b| b.id() == id)
    }

    pub fn mcu(self) -> Mcu {
        self.config().mcu
    }

    pub fn config(self) -> &'static BoardConfig {
        match self {
            BoardType::ArduinoUno => &UNO,
            BoardType::ArduinoNano => &NANO,
            BoardType::ArduinoMega => &MEGA,
        }
    }

    /// Typed lookup used once a pin name has been validated.
    pub fn lookup(self, pin: PinName) -> Result<PinMapping, LookupError> {
        let config = self.config();
        let def = config.pin(pin).ok_or_else(|| LookupError::UnknownPin {
            board: config.id.to_string(),
            pin: pin.to_string(),
        })?;
        def.location.ok_or(LookupError::NoRegister { board: config.id, pin })
    }
}

impl fmt::Display for BoardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for BoardType {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BoardType::from_id(s).ok_or_else(|| LookupError::UnknownBoard(s.to_string()))
    }
}

/// Static description of one board: identifiers, MCU and header pins.
#[derive(Debug)]
pub struct BoardConfig {
    pub id: &'static str,
    pub name: &'static str,
    pub mcu: Mcu,
    pins: &'static [PinDef],
}

impl BoardConfig {
    /// Every header pin, including the ones without a GPIO register.
    pub fn pins(&self) -> &'static [PinDef] {
        self.pins
    }

    pub fn pin(&self, name: PinName) -> Option<&'static PinDef> {
        self.pins.iter().find(|p| p.name == name)
    }

    /// Every GPIO-capable pin with its location.
    pub fn pin_mappings(&self) -> impl Iterator<Item = (PinName, PinMapping)> + '_ {
        self.pins.iter().filter_map(|p| p.location.map(|loc| (p.name, loc)))
    }
}

static UNO: BoardConfig = BoardConfig {
    id: "wokwi-arduino-uno",
    name: "Arduino Uno",
    mcu: Mcu::Atmega328p,
    pins: &UNO_PINS,
};

static NANO: BoardConfig = BoardConfig {
    id: "wokwi-arduino-nano",
    name: "Arduino Nano",
    mcu: Mcu::Atmega328p,
    pins: &NANO_PINS,
};

static MEGA: BoardConfig = BoardConfig {
    id: "wokwi-arduino-mega",
    name: "Arduino Mega 2560",
    mcu: Mcu::Atmega2560,
    pins: &MEGA_PINS,
};

/// Translate a board identifier and a pin name into a port/bit location.
///
/// Unknown boards and unknown pin names are reported as not found; pins that
/// exist but have no register (GND, AREF, A6 on the Nano...) are reported as
/// [`LookupError::NoRegister`]. Whether either is fatal is the caller's call.
pub fn lookup(board_type: &str, pin_name: &str) -> Result<PinMapping, LookupError> {
    let board: BoardType = board_type.parse()?;
    let pin: PinName = pin_name.parse().map_err(|_| LookupError::UnknownPin {
        board: board.id().to_string(),
        pin: pin_name.to_string(),
    })?;
    board.lookup(pin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uno_examples() {
        assert_eq!(lookup("wokwi-arduino-uno", "13").unwrap(), PinMapping::new(Port::B, 5));
        assert_eq!(lookup("wokwi-arduino-uno", "A0").unwrap(), PinMapping::new(Port::C, 0));
        let err = lookup("wokwi-arduino-uno", "99").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unknown_board() {
        let err = lookup("wokwi-arduino-due", "13").unwrap_err();
        assert_eq!(err, LookupError::UnknownBoard("wokwi-arduino-due".into()));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_power_pins_have_no_register() {
        for board in BoardType::ALL {
            let err = board.lookup(PinName::Special(SpecialPin::Gnd)).unwrap_err();
            assert!(!err.is_not_found(), "{}", board);
        }
        let err = lookup("wokwi-arduino-nano", "A6").unwrap_err();
        assert!(matches!(err, LookupError::NoRegister { .. }));
        // Uno has no A6 at all
        assert!(lookup("wokwi-arduino-uno", "A6").unwrap_err().is_not_found());
    }

    #[test]
    fn test_lookup_totality() {
        for board in BoardType::ALL {
            let config = board.config();
            let mut count = 0;
            for (name, mapping) in config.pin_mappings() {
                assert!(mapping.bit < 8);
                assert_eq!(lookup(config.id, &name.to_string()).unwrap(), mapping);
                count += 1;
            }
            assert!(count > 0);
            for bogus in ["100", "A16", "D13", "gnd", "013", "", "A", " 1"] {
                assert!(lookup(config.id, bogus).unwrap_err().is_not_found(), "{} {}", board, bogus);
            }
        }
    }

    #[test]
    fn test_lookup_deterministic() {
        for _ in 0..3 {
            assert_eq!(lookup("wokwi-arduino-mega", "13"), lookup("wokwi-arduino-mega", "13"));
        }
        assert_eq!(lookup("wokwi-arduino-mega", "13").unwrap(), PinMapping::new(Port::B, 7));
    }

    #[test]
    fn test_gpio_locations_unique() {
        for board in BoardType::ALL {
            let mut seen = HashSet::new();
            for (name, mapping) in board.config().pin_mappings() {
                if matches!(name, PinName::Special(_)) {
                    continue; // SDA/SCL alias a numbered pin
                }
                assert!(seen.insert(mapping), "{} {} duplicates {}", board, name, mapping);
            }
        }
    }

    #[test]
    fn test_mega_table() {
        let mega = BoardType::ArduinoMega;
        assert_eq!(mega.config().pin_mappings().filter(|(n, _)| matches!(n, PinName::Digital(_))).count(), 54);
        assert_eq!(mega.lookup(PinName::Digital(2)).unwrap(), PinMapping::new(Port::E, 4));
        assert_eq!(mega.lookup(PinName::Analog(15)).unwrap(), PinMapping::new(Port::K, 7));
        assert_eq!(mega.lookup(PinName::Special(SpecialPin::Sda)).unwrap(), PinMapping::new(Port::D, 1));
    }

    #[test]
    fn test_parse_pin_names() {
        assert_eq!("0".parse::<PinName>().unwrap(), PinName::Digital(0));
        assert_eq!("A15".parse::<PinName>().unwrap(), PinName::Analog(15));
        assert_eq!("3V3".parse::<PinName>().unwrap(), PinName::Special(SpecialPin::V3_3));
        assert_eq!("5V".parse::<PinName>().unwrap(), PinName::Special(SpecialPin::V5));
        assert!("a0".parse::<PinName>().is_err());
        assert!("256".parse::<PinName>().is_err());
        assert!("-1".parse::<PinName>().is_err());
        for name in ["7", "A3", "AREF", "SCL"] {
            assert_eq!(name.parse::<PinName>().unwrap().to_string(), name);
        }
    }

    #[test]
    fn test_board_ids() {
        for board in BoardType::ALL {
            assert_eq!(BoardType::from_id(board.id()), Some(board));
        }
        assert_eq!(BoardType::ArduinoMega.mcu(), Mcu::Atmega2560);
        assert_eq!(BoardType::ArduinoNano.config().name, "Arduino Nano");
    }
}
