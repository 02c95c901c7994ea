//! GPIO function selection for the PCM pins.
//!
//! Each pin owns a 3-bit field in one of the GPFSELn registers, ten pins per
//! register:
//!
//! ```text
//! GPFSELn offset = (pin / 10) * 4        field shift = (pin % 10) * 3
//!
//! 000 input   001 output   100 ALT0   101 ALT1   110 ALT2   111 ALT3
//!                          011 ALT4   010 ALT5
//! ```
//!
//! [`set_output`] and [`set_alternate`] OR their encoding into the field, so
//! they only produce the right value when the field is already `000`. That
//! precondition is checked: a dirty field is reported as
//! [`ConfigError::FieldNotCleared`] and nothing is written. Use [`select`]
//! (input first, then the target) to switch between two non-input functions.

use core::fmt;

use crate::error::{ConfigError, Result};
use crate::mmio::RegisterIo;
use crate::regs::{
    GPFSEL_FIELD_BITS, GPFSEL_FIELD_MASK, GPFSEL_PINS_PER_REG, GPIO_GPFSEL0, GPIO_PIN_COUNT,
};

/// One of the six alternate functions a pin can be muxed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AltFunction {
    /// ALT0 (`100`)
    Alt0,
    /// ALT1 (`101`)
    Alt1,
    /// ALT2 (`110`)
    Alt2,
    /// ALT3 (`111`)
    Alt3,
    /// ALT4 (`011`)
    Alt4,
    /// ALT5 (`010`)
    Alt5,
}

impl AltFunction {
    /// All alternate functions in index order.
    pub const ALL: [Self; 6] = [
        Self::Alt0,
        Self::Alt1,
        Self::Alt2,
        Self::Alt3,
        Self::Alt4,
        Self::Alt5,
    ];

    /// Alternate function index (0–5).
    pub const fn index(self) -> u8 {
        match self {
            Self::Alt0 => 0,
            Self::Alt1 => 1,
            Self::Alt2 => 2,
            Self::Alt3 => 3,
            Self::Alt4 => 4,
            Self::Alt5 => 5,
        }
    }

    /// The 3-bit GPFSEL encoding. The numbering is not monotonic.
    pub const fn encoding(self) -> u32 {
        match self {
            Self::Alt0 => 0b100,
            Self::Alt1 => 0b101,
            Self::Alt2 => 0b110,
            Self::Alt3 => 0b111,
            Self::Alt4 => 0b011,
            Self::Alt5 => 0b010,
        }
    }
}

impl TryFrom<u8> for AltFunction {
    type Error = ConfigError;

    fn try_from(index: u8) -> core::result::Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .ok_or(ConfigError::AltFunctionOutOfRange(index))
    }
}

impl fmt::Display for AltFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ALT{}", self.index())
    }
}

/// Function currently (or to be) assigned to a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinFunction {
    /// `000`
    Input,
    /// `001`
    Output,
    /// One of the alternate functions.
    Alt(AltFunction),
}

impl PinFunction {
    /// 3-bit field value.
    pub const fn bits(self) -> u32 {
        match self {
            Self::Input => 0b000,
            Self::Output => 0b001,
            Self::Alt(alt) => alt.encoding(),
        }
    }

    /// Decode a field value. Only the low three bits are looked at.
    pub const fn from_bits(bits: u32) -> Self {
        match bits & GPFSEL_FIELD_MASK {
            0b000 => Self::Input,
            0b001 => Self::Output,
            0b010 => Self::Alt(AltFunction::Alt5),
            0b011 => Self::Alt(AltFunction::Alt4),
            0b100 => Self::Alt(AltFunction::Alt0),
            0b101 => Self::Alt(AltFunction::Alt1),
            0b110 => Self::Alt(AltFunction::Alt2),
            _ => Self::Alt(AltFunction::Alt3),
        }
    }
}

impl fmt::Display for PinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
            Self::Alt(alt) => alt.fmt(f),
        }
    }
}

/// Where a pin's function field lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLocation {
    /// Byte offset of the GPFSELn register.
    pub offset: usize,
    /// Bit shift of the pin's field inside that register.
    pub shift: u32,
}

impl FieldLocation {
    fn mask(self) -> u32 {
        GPFSEL_FIELD_MASK << self.shift
    }

    fn extract(self, word: u32) -> u32 {
        (word >> self.shift) & GPFSEL_FIELD_MASK
    }
}

/// Resolve the GPFSEL register and shift for `pin`.
pub fn locate(pin: u8) -> core::result::Result<FieldLocation, ConfigError> {
    if pin >= GPIO_PIN_COUNT {
        return Err(ConfigError::PinOutOfRange {
            pin,
            count: GPIO_PIN_COUNT,
        });
    }
    let register = pin / GPFSEL_PINS_PER_REG;
    let slot = pin % GPFSEL_PINS_PER_REG;
    // pin < 54: register <= 5 and slot <= 9, so neither product can overflow.
    #[allow(clippy::arithmetic_side_effects)]
    let location = FieldLocation {
        offset: GPIO_GPFSEL0 + usize::from(register) * 4,
        shift: u32::from(slot) * GPFSEL_FIELD_BITS,
    };
    Ok(location)
}

/// Read the function currently selected for `pin`.
pub fn function<R: RegisterIo>(regs: &R, pin: u8) -> Result<PinFunction> {
    let loc = locate(pin)?;
    Ok(PinFunction::from_bits(loc.extract(regs.read32(loc.offset))))
}

/// Clear the pin's field to `000` (input). Neighbouring fields are preserved.
pub fn set_input<R: RegisterIo>(regs: &mut R, pin: u8) -> Result<()> {
    let loc = locate(pin)?;
    regs.modify32(loc.offset, |word| word & !loc.mask());
    tracing::debug!(pin, "gpio -> input");
    Ok(())
}

/// OR `001` into the pin's field. The field must currently be input.
pub fn set_output<R: RegisterIo>(regs: &mut R, pin: u8) -> Result<()> {
    or_function(regs, pin, PinFunction::Output)
}

/// OR the alternate-function encoding into the pin's field. The field must
/// currently be input.
pub fn set_alternate<R: RegisterIo>(regs: &mut R, pin: u8, alt: AltFunction) -> Result<()> {
    or_function(regs, pin, PinFunction::Alt(alt))
}

/// Put `pin` into `target`, going through input first.
pub fn select<R: RegisterIo>(regs: &mut R, pin: u8, target: PinFunction) -> Result<()> {
    set_input(regs, pin)?;
    match target {
        PinFunction::Input => Ok(()),
        other => or_function(regs, pin, other),
    }
}

fn or_function<R: RegisterIo>(regs: &mut R, pin: u8, target: PinFunction) -> Result<()> {
    let loc = locate(pin)?;
    let word = regs.read32(loc.offset);
    let current = loc.extract(word);
    if current != 0 {
        // Masked to three bits by `extract`.
        #[allow(clippy::cast_possible_truncation)]
        let current = current as u8;
        return Err(ConfigError::FieldNotCleared { pin, current }.into());
    }
    regs.write32(loc.offset, word | (target.bits() << loc.shift));
    tracing::debug!(pin, function = %target, "gpio function selected");
    Ok(())
}

// ─── Pin groups ──────────────────────────────────────────────────────────────

/// The two pin sets the PCM interface can be routed to.
///
/// Pins are listed in signal order: bit clock, frame sync, data in, data out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinGroup {
    /// GPIO18–21 on ALT0 (40-pin header).
    #[default]
    Alt0Gpio18,
    /// GPIO28–31 on ALT2 (P5 header on early boards).
    Alt2Gpio28,
}

impl PinGroup {
    /// Signal names, in the same order as [`pins`](Self::pins).
    pub const SIGNALS: [&'static str; 4] = ["PCM_CLK", "PCM_FS", "PCM_DIN", "PCM_DOUT"];

    /// GPIO numbers for CLK, FS, DIN, DOUT.
    pub const fn pins(self) -> [u8; 4] {
        match self {
            Self::Alt0Gpio18 => [18, 19, 20, 21],
            Self::Alt2Gpio28 => [28, 29, 30, 31],
        }
    }

    /// Function that routes these pins to the PCM block.
    pub const fn function(self) -> PinFunction {
        match self {
            Self::Alt0Gpio18 => PinFunction::Alt(AltFunction::Alt0),
            Self::Alt2Gpio28 => PinFunction::Alt(AltFunction::Alt2),
        }
    }

    /// Route every pin of the group to PCM.
    pub fn apply<R: RegisterIo>(self, regs: &mut R) -> Result<()> {
        let function = self.function();
        for pin in self.pins() {
            select(regs, pin, function)?;
        }
        tracing::info!(group = ?self, %function, "PCM pins routed");
        Ok(())
    }
}
