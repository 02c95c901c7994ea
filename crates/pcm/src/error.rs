//! Error taxonomy for the PCM driver.
//!
//! Three kinds of failure reach the caller:
//!
//! | Variant                 | Raised by                     | Hardware touched? |
//! |-------------------------|-------------------------------|-------------------|
//! | `Mapping`               | [`crate::mmio`]               | never             |
//! | `BusyTimeout`           | [`crate::clock`] handshakes   | yes, torn down    |
//! | `InvalidConfiguration`  | validation in every module    | never (rejected before the first write) |
//!
//! `FifoTimeout` only comes from the opt-in bounded writer
//! ([`crate::stream::FifoWriter::send_with_budget`]).

use core::fmt;

/// Result alias used across the crate.
pub type Result<T, E = PcmError> = core::result::Result<T, E>;

/// Top-level driver error.
#[derive(Debug, thiserror::Error)]
pub enum PcmError {
    /// The privileged memory device could not be opened or mapped.
    #[error("cannot map {what} at physical {base:#010x}")]
    Mapping {
        /// What was being opened or mapped (device path or block name).
        what: String,
        /// Physical base address requested (0 when opening the device).
        base: u64,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A clock manager status flag did not reach the expected state in time.
    #[error("clock manager BUSY did not {expected} within {polls} polls")]
    BusyTimeout {
        /// The state that was being waited for.
        expected: BusyWait,
        /// Number of delays spent before giving up.
        polls: u32,
    },

    /// A parameter violated a documented invariant. Nothing was written.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    /// The TX FIFO stayed full for the whole bounded-wait budget.
    #[error("TX FIFO still full after {polls} polls")]
    FifoTimeout {
        /// Number of polls spent waiting for space.
        polls: u32,
    },
}

/// Direction of a BUSY handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyWait {
    /// Waiting for the generator to stop (after a disable write).
    Clear,
    /// Waiting for the generator to start (after setting ENAB).
    Set,
}

impl fmt::Display for BusyWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clear => f.write_str("clear"),
            Self::Set => f.write_str("set"),
        }
    }
}

/// A rejected configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The divider would drive the PCM clock above its rated maximum.
    #[error("output {output_hz} Hz exceeds the {max_hz} Hz PCM clock limit")]
    FrequencyTooHigh {
        /// Synthesised output frequency.
        output_hz: u64,
        /// Rated maximum.
        max_hz: u64,
    },

    /// DIVI or DIVF does not fit its 12-bit field.
    #[error("{field} = {value} does not fit in 12 bits")]
    DivisorOutOfRange {
        /// `"DIVI"` or `"DIVF"`.
        field: &'static str,
        /// Rejected value.
        value: u32,
    },

    /// DIVI is below the minimum the selected MASH stage can tolerate.
    #[error("DIVI = {divi} is below the minimum {min} for MASH stage {mash}")]
    DivisorTooSmallForMash {
        /// Requested integer divisor.
        divi: u32,
        /// Minimum for this MASH stage.
        min: u32,
        /// MASH stage (0–3).
        mash: u8,
    },

    /// MASH stage outside 0–3.
    #[error("MASH stage {0} is outside 0..=3")]
    MashOutOfRange(u8),

    /// Clock source code not in the supported set.
    #[error("clock source code {0} is not supported")]
    UnknownClockSource(u8),

    /// Alternate function index outside 0–5.
    #[error("alternate function {0} is outside 0..=5")]
    AltFunctionOutOfRange(u8),

    /// GPIO index beyond the last pin.
    #[error("GPIO {pin} is outside 0..{count}")]
    PinOutOfRange {
        /// Requested pin.
        pin: u8,
        /// Number of pins on the controller.
        count: u8,
    },

    /// OR-encoded function write attempted on a field that is not input.
    #[error("GPIO {pin} function field is {current:#05b}; set it to input first")]
    FieldNotCleared {
        /// Pin whose field is dirty.
        pin: u8,
        /// Current 3-bit field value.
        current: u8,
    },

    /// Divider change requested while the clock generator is enabled.
    #[error("clock generator is running; reset it before changing the divider")]
    ClockRunning,

    /// Divider change requested before a reset handshake completed.
    #[error("clock generator has not been reset; its state is unknown")]
    ClockNotReset,

    /// Enable requested before any divider was programmed.
    #[error("clock generator has no divider configuration to enable")]
    ClockNotConfigured,

    /// Frame length outside 1–1024 clocks.
    #[error("frame length {0} is outside 1..=1024 clocks")]
    FrameLength(u16),

    /// Frame sync length longer than the frame or its 10-bit field.
    #[error("frame sync length {sync} does not fit a {frame}-clock frame")]
    SyncLength {
        /// Requested sync length.
        sync: u16,
        /// Frame length.
        frame: u16,
    },

    /// Channel width outside 8–23 bits.
    #[error("channel {channel} width {width} is outside 8..=23 bits")]
    ChannelWidth {
        /// Channel number (1 or 2).
        channel: u8,
        /// Requested width.
        width: u8,
    },

    /// Channel position does not fit its 10-bit field.
    #[error("channel {channel} position {position} is outside 0..=1023")]
    ChannelPosition {
        /// Channel number (1 or 2).
        channel: u8,
        /// Requested position.
        position: u16,
    },

    /// Channel data runs past the end of the frame.
    #[error("channel {channel} ends at clock {end}, past the {frame}-clock frame")]
    ChannelOverflow {
        /// Channel number (1 or 2).
        channel: u8,
        /// First clock after the channel's last bit.
        end: u32,
        /// Frame length.
        frame: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_timeout_message_names_direction_and_budget() {
        let err = PcmError::BusyTimeout {
            expected: BusyWait::Set,
            polls: 100,
        };
        assert_eq!(
            err.to_string(),
            "clock manager BUSY did not set within 100 polls"
        );
    }

    #[test]
    fn config_error_converts_into_invalid_configuration() {
        let err: PcmError = ConfigError::ClockRunning.into();
        assert!(matches!(
            err,
            PcmError::InvalidConfiguration(ConfigError::ClockRunning)
        ));
    }

    #[test]
    fn mapping_error_keeps_os_source() {
        let err = PcmError::Mapping {
            what: "PCM".into(),
            base: 0x3F20_3000,
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("0x3f203000"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
