//! PCM clock generator (CM_PCMCTL / CM_PCMDIV).
//!
//! The generator is a fractional-N divider with an optional MASH noise
//! shaper:
//!
//! ```text
//! f_out = f_source / (DIVI + DIVF / 4096)
//! ```
//!
//! Changing the divider while the generator runs can glitch it, so the
//! handshake is always:
//!
//! ```text
//!  Unknown ──reset_and_wait──► Resetting ──(BUSY clear)──► Idle
//!                                 │ timeout: stays Resetting
//!  Idle ──configure──► Configured ──enable_and_wait──► Enabling ──(BUSY set)──► Enabled
//!                                                      │ timeout: stays Enabling
//!  Enabled ──shutdown──► Disabling ──(BUSY clear)──► Idle
//! ```
//!
//! Every write to either register carries [`CM_PASSWORD`]; see
//! [`crate::regs`].

use core::fmt;

use embedded_hal::delay::DelayNs;

use crate::error::{BusyWait, ConfigError, PcmError, Result};
use crate::mmio::RegisterIo;
use crate::regs::{
    CM_BUSY, CM_DIVF_SHIFT, CM_DIVI_SHIFT, CM_DIV_MASK, CM_ENAB, CM_MASH_SHIFT, CM_PASSWORD,
    CM_PCMCTL, CM_PCMDIV, CM_SRC_MASK, CM_SRC_SHIFT,
};

/// Delays spent waiting for BUSY before giving up.
pub const BUSY_POLL_ATTEMPTS: u32 = 100;
/// Spacing of BUSY polls in microseconds.
pub const BUSY_POLL_INTERVAL_US: u32 = 100;
/// Wait after writing a new divider before enabling.
pub const DIVIDER_SETTLE_US: u32 = 10;
/// Rated maximum for the PCM clock output.
pub const MAX_PCM_CLOCK_HZ: u64 = 25_000_000;

/// Clock generator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClockSource {
    /// Ground (generator stopped).
    Ground,
    /// 19.2 MHz crystal oscillator.
    #[default]
    Oscillator,
    /// PLLA. Frequency unknown to this driver; reported as 0 Hz.
    PllA,
    /// PLLC, 1 GHz.
    PllC,
    /// PLLD, 500 MHz.
    PllD,
    /// HDMI auxiliary, 216 MHz.
    HdmiAux,
}

impl ClockSource {
    /// Every supported source, in SRC code order.
    pub const ALL: [Self; 6] = [
        Self::Ground,
        Self::Oscillator,
        Self::PllA,
        Self::PllC,
        Self::PllD,
        Self::HdmiAux,
    ];

    /// SRC field value.
    pub const fn code(self) -> u8 {
        match self {
            Self::Ground => 0,
            Self::Oscillator => 1,
            Self::PllA => 4,
            Self::PllC => 5,
            Self::PllD => 6,
            Self::HdmiAux => 7,
        }
    }

    /// Nominal input frequency.
    pub const fn frequency_hz(self) -> u64 {
        match self {
            Self::Ground | Self::PllA => 0,
            Self::Oscillator => 19_200_000,
            Self::PllC => 1_000_000_000,
            Self::PllD => 500_000_000,
            Self::HdmiAux => 216_000_000,
        }
    }
}

impl TryFrom<u8> for ClockSource {
    type Error = ConfigError;

    fn try_from(code: u8) -> core::result::Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or(ConfigError::UnknownClockSource(code))
    }
}

impl fmt::Display for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ground => "GND",
            Self::Oscillator => "OSC",
            Self::PllA => "PLLA",
            Self::PllC => "PLLC",
            Self::PllD => "PLLD",
            Self::HdmiAux => "HDMI",
        };
        f.write_str(name)
    }
}

/// MASH noise-shaping stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MashStage {
    /// Integer division; DIVF ignored.
    Integer,
    /// One-stage MASH.
    #[default]
    One,
    /// Two-stage MASH.
    Two,
    /// Three-stage MASH.
    Three,
}

impl MashStage {
    /// Stage number as programmed into the MASH field.
    pub const fn stage(self) -> u8 {
        match self {
            Self::Integer => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    /// Smallest DIVI this stage works with.
    pub const fn min_divi(self) -> u32 {
        match self {
            Self::Integer => 1,
            Self::One => 2,
            Self::Two => 3,
            Self::Three => 5,
        }
    }
}

impl TryFrom<u8> for MashStage {
    type Error = ConfigError;

    fn try_from(stage: u8) -> core::result::Result<Self, Self::Error> {
        match stage {
            0 => Ok(Self::Integer),
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            other => Err(ConfigError::MashOutOfRange(other)),
        }
    }
}

/// Requested divider setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDividerConfig {
    /// Generator input.
    pub source: ClockSource,
    /// Noise shaper.
    pub mash: MashStage,
    /// Integer divisor (12 bits).
    pub divi: u32,
    /// Fractional divisor in 1/4096 steps (12 bits).
    pub divf: u32,
}

impl Default for ClockDividerConfig {
    /// Oscillator, MASH 1, DIVI 354, DIVF 1260.
    fn default() -> Self {
        Self {
            source: ClockSource::Oscillator,
            mash: MashStage::One,
            divi: 354,
            divf: 1260,
        }
    }
}

impl ClockDividerConfig {
    /// Check every field and the resulting output frequency.
    pub fn validate(&self) -> core::result::Result<(), ConfigError> {
        if self.divi > CM_DIV_MASK {
            return Err(ConfigError::DivisorOutOfRange {
                field: "DIVI",
                value: self.divi,
            });
        }
        if self.divf > CM_DIV_MASK {
            return Err(ConfigError::DivisorOutOfRange {
                field: "DIVF",
                value: self.divf,
            });
        }
        let min = self.mash.min_divi();
        if self.divi < min {
            return Err(ConfigError::DivisorTooSmallForMash {
                divi: self.divi,
                min,
                mash: self.mash.stage(),
            });
        }
        let output_hz = self.output_hz();
        if output_hz > MAX_PCM_CLOCK_HZ {
            return Err(ConfigError::FrequencyTooHigh {
                output_hz,
                max_hz: MAX_PCM_CLOCK_HZ,
            });
        }
        Ok(())
    }

    /// Average output frequency, rounded down. 0 for a zero divisor.
    pub fn output_hz(&self) -> u64 {
        let divisor = u64::from(self.divi)
            .saturating_mul(4096)
            .saturating_add(u64::from(self.divf));
        self.source
            .frequency_hz()
            .saturating_mul(4096)
            .checked_div(divisor)
            .unwrap_or(0)
    }

    /// CM_PCMCTL value for this config, with or without ENAB.
    pub fn control_word(&self, enable: bool) -> u32 {
        let src = (u32::from(self.source.code()) & CM_SRC_MASK) << CM_SRC_SHIFT;
        let mash = u32::from(self.mash.stage()) << CM_MASH_SHIFT;
        let enab = if enable { CM_ENAB } else { 0 };
        CM_PASSWORD | mash | src | enab
    }

    /// CM_PCMDIV value for this config.
    pub fn divider_word(&self) -> u32 {
        divider_word(self.divi, self.divf)
    }
}

/// Pack DIVI / DIVF into a password-carrying CM_PCMDIV value.
/// Each field is truncated to 12 bits.
pub fn divider_word(divi: u32, divf: u32) -> u32 {
    CM_PASSWORD | ((divi & CM_DIV_MASK) << CM_DIVI_SHIFT) | ((divf & CM_DIV_MASK) << CM_DIVF_SHIFT)
}

/// Split a CM_PCMDIV value into `(divi, divf)`.
pub fn unpack_divider(word: u32) -> (u32, u32) {
    (
        (word >> CM_DIVI_SHIFT) & CM_DIV_MASK,
        (word >> CM_DIVF_SHIFT) & CM_DIV_MASK,
    )
}

/// Where the clock generator is in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockState {
    /// Never reset by this manager; the generator may be running.
    #[default]
    Unknown,
    /// Stopped by a completed reset or shutdown.
    Idle,
    /// Disable written, waiting for BUSY to clear.
    Resetting,
    /// Divider written, generator not yet enabled.
    Configured,
    /// ENAB written, waiting for BUSY to set.
    Enabling,
    /// Running.
    Enabled,
    /// Shutdown in progress, waiting for BUSY to clear.
    Disabling,
}

/// Drives the CM_PCMCTL / CM_PCMDIV handshake and tracks its state.
#[derive(Debug, Default)]
pub struct ClockManager {
    state: ClockState,
    config: Option<ClockDividerConfig>,
}

impl ClockManager {
    /// Manager in [`ClockState::Unknown`] with no divider programmed.
    pub const fn new() -> Self {
        Self {
            state: ClockState::Unknown,
            config: None,
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> ClockState {
        self.state
    }

    /// Divider last written by [`configure`](Self::configure).
    pub fn config(&self) -> Option<&ClockDividerConfig> {
        self.config.as_ref()
    }

    /// Stop the generator and zero the divider.
    ///
    /// Writes CTL = password (source 0, ENAB 0), waits for BUSY to clear,
    /// then writes DIV = password.
    pub fn reset_and_wait<R: RegisterIo, D: DelayNs>(
        &mut self,
        regs: &mut R,
        delay: &mut D,
    ) -> Result<()> {
        self.state = ClockState::Resetting;
        regs.write32(CM_PCMCTL, CM_PASSWORD);
        wait_for_busy(regs, delay, BusyWait::Clear)?;
        regs.write32(CM_PCMDIV, CM_PASSWORD);
        self.state = ClockState::Idle;
        self.config = None;
        tracing::debug!("pcm clock reset");
        Ok(())
    }

    /// Program source, MASH and divider with the generator stopped.
    ///
    /// Nothing is written if `cfg` is invalid or the generator is not known
    /// to be stopped: a reset or shutdown must have completed first.
    pub fn configure<R: RegisterIo, D: DelayNs>(
        &mut self,
        regs: &mut R,
        delay: &mut D,
        cfg: &ClockDividerConfig,
    ) -> Result<()> {
        cfg.validate()?;
        match self.state {
            ClockState::Idle | ClockState::Configured => {}
            ClockState::Enabling | ClockState::Enabled => {
                return Err(ConfigError::ClockRunning.into())
            }
            ClockState::Unknown | ClockState::Resetting | ClockState::Disabling => {
                return Err(ConfigError::ClockNotReset.into())
            }
        }
        regs.write32(CM_PCMCTL, cfg.control_word(false));
        regs.write32(CM_PCMDIV, cfg.divider_word());
        delay.delay_us(DIVIDER_SETTLE_US);
        self.state = ClockState::Configured;
        self.config = Some(*cfg);
        tracing::debug!(
            source = %cfg.source,
            mash = cfg.mash.stage(),
            divi = cfg.divi,
            divf = cfg.divf,
            output_hz = cfg.output_hz(),
            "pcm clock divider written"
        );
        Ok(())
    }

    /// Set ENAB and wait for BUSY to rise.
    pub fn enable_and_wait<R: RegisterIo, D: DelayNs>(
        &mut self,
        regs: &mut R,
        delay: &mut D,
    ) -> Result<()> {
        let cfg = match (self.state, self.config) {
            (ClockState::Configured, Some(cfg)) => cfg,
            (ClockState::Enabled | ClockState::Enabling, _) => {
                return Err(ConfigError::ClockRunning.into())
            }
            _ => return Err(ConfigError::ClockNotConfigured.into()),
        };
        self.state = ClockState::Enabling;
        regs.write32(CM_PCMCTL, cfg.control_word(true));
        wait_for_busy(regs, delay, BusyWait::Set)?;
        self.state = ClockState::Enabled;
        tracing::info!(source = %cfg.source, output_hz = cfg.output_hz(), "pcm clock running");
        Ok(())
    }

    /// Validate, reset, configure, enable.
    pub fn bring_up<R: RegisterIo, D: DelayNs>(
        &mut self,
        regs: &mut R,
        delay: &mut D,
        cfg: &ClockDividerConfig,
    ) -> Result<()> {
        cfg.validate()?;
        self.reset_and_wait(regs, delay)?;
        self.configure(regs, delay, cfg)?;
        self.enable_and_wait(regs, delay)
    }

    /// Stop the generator at the end of a run.
    ///
    /// Both disable writes go out whatever the current state; the divider is
    /// zeroed even if BUSY never clears, and the timeout is then returned.
    pub fn shutdown<R: RegisterIo, D: DelayNs>(
        &mut self,
        regs: &mut R,
        delay: &mut D,
    ) -> Result<()> {
        self.state = ClockState::Disabling;
        regs.write32(CM_PCMCTL, CM_PASSWORD);
        let stopped = wait_for_busy(regs, delay, BusyWait::Clear);
        regs.write32(CM_PCMDIV, CM_PASSWORD);
        delay.delay_us(DIVIDER_SETTLE_US);
        stopped?;
        self.state = ClockState::Idle;
        self.config = None;
        tracing::debug!("pcm clock stopped");
        Ok(())
    }
}

/// Sample BUSY once, then again after each of up to
/// [`BUSY_POLL_ATTEMPTS`] delays.
fn wait_for_busy<R: RegisterIo, D: DelayNs>(
    regs: &R,
    delay: &mut D,
    expected: BusyWait,
) -> Result<()> {
    let want_busy = expected == BusyWait::Set;
    let reached = |regs: &R| (regs.read32(CM_PCMCTL) & CM_BUSY != 0) == want_busy;

    for poll in 0..BUSY_POLL_ATTEMPTS {
        if reached(regs) {
            tracing::trace!(poll, %expected, "clock BUSY settled");
            return Ok(());
        }
        delay.delay_us(BUSY_POLL_INTERVAL_US);
    }
    if reached(regs) {
        return Ok(());
    }
    tracing::error!(%expected, polls = BUSY_POLL_ATTEMPTS, "clock BUSY handshake timed out");
    Err(PcmError::BusyTimeout {
        expected,
        polls: BUSY_POLL_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::RegisterBlock;
    use crate::mocks::{ClockBusy, MockDelay, MockRegisters};

    fn clock(busy: ClockBusy) -> MockRegisters {
        MockRegisters::new(RegisterBlock::CLOCK).with_clock_busy(busy)
    }

    #[test]
    fn default_config_matches_reference_divider() {
        let cfg = ClockDividerConfig::default();
        assert_eq!(cfg.control_word(false), 0x5A00_0201);
        assert_eq!(cfg.divider_word(), 0x5A16_24EC);
        assert_eq!(cfg.output_hz(), 54_190);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn pllc_at_default_divider_gives_cd_bit_clock() {
        let cfg = ClockDividerConfig {
            source: ClockSource::PllC,
            ..ClockDividerConfig::default()
        };
        // 44.1 kHz × 64 clocks per frame
        assert_eq!(cfg.output_hz(), 2_822_406);
        assert_eq!(cfg.output_hz() / 64, 44_100);
    }

    #[test]
    fn over_frequency_is_rejected() {
        let cfg = ClockDividerConfig {
            source: ClockSource::PllC,
            mash: MashStage::Integer,
            divi: 2,
            divf: 0,
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::FrequencyTooHigh {
                output_hz: 500_000_000,
                max_hz: MAX_PCM_CLOCK_HZ,
            })
        );
    }

    #[test]
    fn mash_minimum_divi_is_enforced() {
        let cfg = ClockDividerConfig {
            source: ClockSource::Oscillator,
            mash: MashStage::Three,
            divi: 4,
            divf: 0,
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::DivisorTooSmallForMash {
                divi: 4,
                min: 5,
                mash: 3
            })
        );
    }

    #[test]
    fn divisor_fields_must_fit_twelve_bits() {
        let cfg = ClockDividerConfig {
            divf: 4096,
            ..ClockDividerConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::DivisorOutOfRange {
                field: "DIVF",
                value: 4096
            })
        );
    }

    #[test]
    fn source_codes_round_trip() {
        for source in ClockSource::ALL {
            assert_eq!(ClockSource::try_from(source.code()), Ok(source));
        }
        assert_eq!(
            ClockSource::try_from(2),
            Err(ConfigError::UnknownClockSource(2))
        );
    }

    #[test]
    fn bring_up_write_sequence() {
        let mut regs = clock(ClockBusy::FollowsEnable);
        let mut delay = MockDelay::new();
        let mut mgr = ClockManager::new();

        mgr.bring_up(&mut regs, &mut delay, &ClockDividerConfig::default())
            .unwrap();

        assert_eq!(
            regs.writes(),
            vec![
                (CM_PCMCTL, 0x5A00_0000),
                (CM_PCMDIV, 0x5A00_0000),
                (CM_PCMCTL, 0x5A00_0201),
                (CM_PCMDIV, 0x5A16_24EC),
                (CM_PCMCTL, 0x5A00_0211),
            ]
        );
        assert!(regs.writes().iter().all(|&(_, v)| v >> 24 == 0x5A));
        assert_eq!(delay.delays_ns(), vec![10_000]);
        assert_eq!(mgr.state(), ClockState::Enabled);
    }

    #[test]
    fn stuck_busy_times_out_after_full_budget() {
        let mut regs = clock(ClockBusy::Stuck);
        let mut delay = MockDelay::new();
        let mut mgr = ClockManager::new();

        let err = mgr.reset_and_wait(&mut regs, &mut delay).unwrap_err();
        assert!(matches!(
            err,
            PcmError::BusyTimeout {
                expected: BusyWait::Clear,
                polls: 100
            }
        ));
        assert_eq!(delay.calls(), 100);
        assert_eq!(delay.total_ns(), 10_000_000);
        assert_eq!(regs.reads_of(CM_PCMCTL), 101);
        assert_eq!(mgr.state(), ClockState::Resetting);
        // divider is never touched after a failed reset
        assert_eq!(regs.writes_to(CM_PCMDIV), Vec::<u32>::new());
    }

    #[test]
    fn never_busy_times_out_waiting_for_enable() {
        let mut regs = clock(ClockBusy::Never);
        let mut delay = MockDelay::new();
        let mut mgr = ClockManager::new();

        let err = mgr
            .bring_up(&mut regs, &mut delay, &ClockDividerConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            PcmError::BusyTimeout {
                expected: BusyWait::Set,
                ..
            }
        ));
        assert_eq!(mgr.state(), ClockState::Enabling);
    }

    #[test]
    fn configure_while_running_writes_nothing() {
        let mut regs = clock(ClockBusy::FollowsEnable);
        let mut delay = MockDelay::new();
        let mut mgr = ClockManager::new();
        mgr.bring_up(&mut regs, &mut delay, &ClockDividerConfig::default())
            .unwrap();
        regs.clear_log();

        let err = mgr
            .configure(&mut regs, &mut delay, &ClockDividerConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            PcmError::InvalidConfiguration(ConfigError::ClockRunning)
        ));
        assert!(regs.writes().is_empty());
    }

    #[test]
    fn configure_before_reset_writes_nothing() {
        let mut regs = clock(ClockBusy::FollowsEnable);
        // generator left running by a previous user
        regs.set_word(CM_PCMCTL, CM_PASSWORD | CM_ENAB | 1);
        let mut delay = MockDelay::new();
        let mut mgr = ClockManager::new();
        assert_eq!(mgr.state(), ClockState::Unknown);

        let err = mgr
            .configure(&mut regs, &mut delay, &ClockDividerConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            PcmError::InvalidConfiguration(ConfigError::ClockNotReset)
        ));
        assert!(regs.log().is_empty());
        assert_eq!(delay.calls(), 0);

        mgr.reset_and_wait(&mut regs, &mut delay).unwrap();
        assert_eq!(mgr.state(), ClockState::Idle);
        mgr.configure(&mut regs, &mut delay, &ClockDividerConfig::default())
            .unwrap();
        assert_eq!(mgr.state(), ClockState::Configured);
    }

    #[test]
    fn configure_after_timed_out_reset_is_refused() {
        let mut regs = clock(ClockBusy::Stuck);
        let mut delay = MockDelay::new();
        let mut mgr = ClockManager::new();
        assert!(mgr.reset_and_wait(&mut regs, &mut delay).is_err());
        regs.clear_log();

        let err = mgr
            .configure(&mut regs, &mut delay, &ClockDividerConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            PcmError::InvalidConfiguration(ConfigError::ClockNotReset)
        ));
        assert!(regs.writes().is_empty());
    }

    #[test]
    fn enable_without_divider_is_rejected() {
        let mut regs = clock(ClockBusy::FollowsEnable);
        let mut delay = MockDelay::new();
        let mut mgr = ClockManager::new();
        let err = mgr.enable_and_wait(&mut regs, &mut delay).unwrap_err();
        assert!(matches!(
            err,
            PcmError::InvalidConfiguration(ConfigError::ClockNotConfigured)
        ));
        assert!(regs.log().is_empty());
    }

    #[test]
    fn shutdown_zeroes_divider_even_when_busy_sticks() {
        let mut regs = clock(ClockBusy::Stuck);
        let mut delay = MockDelay::new();
        let mut mgr = ClockManager::new();

        assert!(mgr.shutdown(&mut regs, &mut delay).is_err());
        assert_eq!(regs.writes_to(CM_PCMDIV), vec![CM_PASSWORD]);
        assert_eq!(mgr.state(), ClockState::Disabling);
    }
}
