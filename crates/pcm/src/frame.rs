//! PCM frame, channel and FIFO setup (CS_A, TXC_A, MODE_A).
//!
//! CS_A is programmed as a running value: each bring-up step ORs its bits
//! onto whatever the previous step wrote, so [`FrameConfigurator`] keeps a
//! shadow of the last value written instead of reading the register back
//! (several CS_A bits are self-clearing or read-only).
//!
//! Bring-up order:
//!
//! 1. [`disable`](FrameConfigurator::disable), settle 100 µs
//! 2. [`configure_fifo_thresholds_and_clear`](FrameConfigurator::configure_fifo_thresholds_and_clear), settle 10 µs
//! 3. [`configure_channels`](FrameConfigurator::configure_channels)
//! 4. [`configure_frame`](FrameConfigurator::configure_frame)
//! 5. [`leave_standby_and_wait`](FrameConfigurator::leave_standby_and_wait)
//! 6. [`enable_transmit`](FrameConfigurator::enable_transmit) (EN, then TXON)
//! 7. [`check_sync_handshake`](FrameConfigurator::check_sync_handshake), diagnostic only

use embedded_hal::delay::DelayNs;

use crate::error::{ConfigError, Result};
use crate::mmio::RegisterIo;
use crate::regs::{
    CS_EN, CS_RXCLR, CS_RXTHR, CS_STBY, CS_SYNC, CS_TXCLR, CS_TXD, CS_TXE, CS_TXERR, CS_TXON,
    CS_TXTHR, MODE_FLEN_SHIFT, MODE_FSLEN_SHIFT, MODE_FTXP, MODE_LEN_MASK, PCM_CS_A, PCM_MODE_A,
    PCM_TXC_A, TXC_CH1EN, TXC_CH1POS_SHIFT, TXC_CH1WEX, TXC_CH1WID_SHIFT, TXC_CH2EN,
    TXC_CH2POS_SHIFT, TXC_CH2WEX, TXC_CH2WID_SHIFT, TXC_POS_MASK, TXC_WID_MASK,
};

/// Wait after clearing CS_A.
pub const DISABLE_SETTLE_US: u32 = 100;
/// Wait after requesting a FIFO clear (two PCM clocks, with margin).
pub const FIFO_CLEAR_SETTLE_US: u32 = 10;
/// Lower bound on the wait after releasing RAM standby.
pub const STANDBY_SETTLE_MIN_US: u32 = 50;
/// Gap between the two SYNC samples.
pub const SYNC_SAMPLE_DELAY_US: u32 = 1;

/// Longest frame the 10-bit FLEN field can describe.
pub const MAX_FRAME_LENGTH: u16 = 1024;
/// Narrowest channel the width field can describe.
pub const MIN_CHANNEL_WIDTH: u8 = 8;
/// Widest channel the width field can describe.
pub const MAX_CHANNEL_WIDTH: u8 = 23;

/// Placement of one channel inside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    /// Sample width in bits (8–23).
    pub width: u8,
    /// Clock at which the first bit is sent, counted from frame start.
    pub position: u16,
    /// Disabled channels are left out of TXC_A entirely.
    pub enabled: bool,
}

impl ChannelLayout {
    /// An enabled channel.
    pub const fn new(width: u8, position: u16) -> Self {
        Self {
            width,
            position,
            enabled: true,
        }
    }

    /// A channel that sends nothing.
    pub const fn disabled() -> Self {
        Self {
            width: MIN_CHANNEL_WIDTH,
            position: 0,
            enabled: false,
        }
    }

    fn validate(&self, channel: u8, frame_length: u16) -> core::result::Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if !(MIN_CHANNEL_WIDTH..=MAX_CHANNEL_WIDTH).contains(&self.width) {
            return Err(ConfigError::ChannelWidth {
                channel,
                width: self.width,
            });
        }
        if u32::from(self.position) > TXC_POS_MASK {
            return Err(ConfigError::ChannelPosition {
                channel,
                position: self.position,
            });
        }
        let end = u32::from(self.position).saturating_add(u32::from(self.width));
        if end > u32::from(frame_length) {
            return Err(ConfigError::ChannelOverflow {
                channel,
                end,
                frame: frame_length,
            });
        }
        Ok(())
    }

    fn txc_bits(&self, wex: u32, en: u32, pos_shift: u32, wid_shift: u32) -> u32 {
        if !self.enabled {
            return 0;
        }
        let wid = u32::from(self.width.saturating_sub(MIN_CHANNEL_WIDTH)) & TXC_WID_MASK;
        let pos = u32::from(self.position) & TXC_POS_MASK;
        wex | en | (pos << pos_shift) | (wid << wid_shift)
    }
}

/// How samples are laid out in TX FIFO words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FifoPacking {
    /// One sample per FIFO word.
    #[default]
    Unpacked,
    /// Two 16-bit samples per FIFO word, one per channel.
    Packed,
}

/// Frame and channel geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Frame length in PCM clocks (1–1024).
    pub frame_length: u16,
    /// Clocks for which frame sync is held active.
    pub sync_length: u16,
    /// Channel 1 and channel 2.
    pub channels: [ChannelLayout; 2],
    /// FIFO word format.
    pub packing: FifoPacking,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self::stereo_16bit()
    }
}

impl FrameLayout {
    /// 64-clock frame, FS high for 32 clocks, two 16-bit channels at clocks
    /// 1 and 33 (I2S one-bit delay), unpacked FIFO.
    pub const fn stereo_16bit() -> Self {
        Self {
            frame_length: 64,
            sync_length: 32,
            channels: [ChannelLayout::new(16, 1), ChannelLayout::new(16, 33)],
            packing: FifoPacking::Unpacked,
        }
    }

    /// Check the layout fits the hardware fields and the frame.
    pub fn validate(&self) -> core::result::Result<(), ConfigError> {
        if self.frame_length == 0 || self.frame_length > MAX_FRAME_LENGTH {
            return Err(ConfigError::FrameLength(self.frame_length));
        }
        if self.sync_length > self.frame_length || u32::from(self.sync_length) > MODE_LEN_MASK {
            return Err(ConfigError::SyncLength {
                sync: self.sync_length,
                frame: self.frame_length,
            });
        }
        for (channel, layout) in (1u8..).zip(self.channels.iter()) {
            layout.validate(channel, self.frame_length)?;
        }
        Ok(())
    }

    /// TXC_A value. Width extension bits are set for each enabled channel.
    pub fn txc_word(&self) -> u32 {
        let [ch1, ch2] = self.channels;
        ch1.txc_bits(TXC_CH1WEX, TXC_CH1EN, TXC_CH1POS_SHIFT, TXC_CH1WID_SHIFT)
            | ch2.txc_bits(TXC_CH2WEX, TXC_CH2EN, TXC_CH2POS_SHIFT, TXC_CH2WID_SHIFT)
    }

    /// MODE_A value: FSLEN, FLEN (length − 1) and FTXP.
    pub fn mode_word(&self) -> u32 {
        let fslen = (u32::from(self.sync_length) & MODE_LEN_MASK) << MODE_FSLEN_SHIFT;
        let flen =
            (u32::from(self.frame_length.saturating_sub(1)) & MODE_LEN_MASK) << MODE_FLEN_SHIFT;
        let ftxp = match self.packing {
            FifoPacking::Unpacked => 0,
            FifoPacking::Packed => MODE_FTXP,
        };
        fslen | flen | ftxp
    }
}

/// Snapshot of CS_A. Sampled fresh on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoStatus {
    /// TXD: the TX FIFO can take at least one more word.
    pub tx_ready: bool,
    /// TXE: the TX FIFO is empty.
    pub tx_empty: bool,
    /// TXERR: the TX FIFO underran since the flag was last cleared.
    pub tx_error: bool,
    /// SYNC echo.
    pub sync: bool,
    /// STBY: RAM standby released.
    pub standby_released: bool,
    /// Raw CS_A value.
    pub raw: u32,
}

impl FifoStatus {
    /// Decode a CS_A value.
    pub const fn from_cs(raw: u32) -> Self {
        Self {
            tx_ready: raw & CS_TXD != 0,
            tx_empty: raw & CS_TXE != 0,
            tx_error: raw & CS_TXERR != 0,
            sync: raw & CS_SYNC != 0,
            standby_released: raw & CS_STBY != 0,
            raw,
        }
    }
}

/// Result of the SYNC echo check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncObservation {
    /// SYNC read straight after being written.
    pub immediate: bool,
    /// SYNC read after [`SYNC_SAMPLE_DELAY_US`].
    pub delayed: bool,
}

impl SyncObservation {
    /// The PCM clock looks alive: SYNC echoed back after the delay.
    pub const fn clock_running(self) -> bool {
        self.delayed
    }
}

/// Writes the PCM control registers and tracks the running CS_A value.
#[derive(Debug, Default)]
pub struct FrameConfigurator {
    cs: u32,
}

impl FrameConfigurator {
    /// Configurator with an all-clear CS_A shadow.
    pub const fn new() -> Self {
        Self { cs: 0 }
    }

    /// Last value written to CS_A.
    pub fn shadow(&self) -> u32 {
        self.cs
    }

    fn write_cs<R: RegisterIo>(&mut self, regs: &mut R, bits: u32) {
        self.cs |= bits;
        regs.write32(PCM_CS_A, self.cs);
        tracing::debug!(cs = format_args!("{:#010x}", self.cs), "PCM CS_A");
    }

    /// Write CS_A = 0 and reset the shadow.
    pub fn disable<R: RegisterIo>(&mut self, regs: &mut R) {
        self.cs = 0;
        regs.write32(PCM_CS_A, 0);
        tracing::debug!("PCM disabled");
    }

    /// Clear both FIFOs and set the TX/RX threshold fields in one write.
    /// Wait [`FIFO_CLEAR_SETTLE_US`] before the next step.
    pub fn configure_fifo_thresholds_and_clear<R: RegisterIo>(&mut self, regs: &mut R) {
        self.write_cs(regs, CS_TXCLR | CS_RXCLR | CS_TXTHR | CS_RXTHR);
    }

    /// Program TXC_A. Nothing is written for an invalid layout.
    pub fn configure_channels<R: RegisterIo>(
        &mut self,
        regs: &mut R,
        layout: &FrameLayout,
    ) -> Result<()> {
        layout.validate()?;
        let word = layout.txc_word();
        regs.write32(PCM_TXC_A, word);
        tracing::debug!(txc = format_args!("{word:#010x}"), "PCM TXC_A");
        Ok(())
    }

    /// Program MODE_A. Nothing is written for an invalid layout.
    pub fn configure_frame<R: RegisterIo>(
        &mut self,
        regs: &mut R,
        layout: &FrameLayout,
    ) -> Result<()> {
        layout.validate()?;
        let word = layout.mode_word();
        regs.write32(PCM_MODE_A, word);
        tracing::debug!(mode = format_args!("{word:#010x}"), "PCM MODE_A");
        Ok(())
    }

    /// Release RAM standby and wait for it to take effect.
    ///
    /// Standby needs four PCM clocks; the wait is the longer of that and
    /// [`STANDBY_SETTLE_MIN_US`].
    pub fn leave_standby_and_wait<R: RegisterIo, D: DelayNs>(
        &mut self,
        regs: &mut R,
        delay: &mut D,
        bit_clock_hz: u64,
    ) {
        self.write_cs(regs, CS_STBY);
        delay.delay_us(standby_settle_us(bit_clock_hz));
    }

    /// Set EN, then TXON, as two separate writes.
    pub fn enable_transmit<R: RegisterIo>(&mut self, regs: &mut R) {
        self.write_cs(regs, CS_EN);
        self.write_cs(regs, CS_TXON);
        tracing::info!("PCM transmitter on");
    }

    /// Set SYNC and sample it now and after [`SYNC_SAMPLE_DELAY_US`].
    ///
    /// The echo only comes back once the PCM clock is running. A missing echo
    /// is logged and returned; it does not stop bring-up.
    pub fn check_sync_handshake<R: RegisterIo, D: DelayNs>(
        &mut self,
        regs: &mut R,
        delay: &mut D,
    ) -> SyncObservation {
        self.write_cs(regs, CS_SYNC);
        let immediate = self.status(regs).sync;
        delay.delay_us(SYNC_SAMPLE_DELAY_US);
        let delayed = self.status(regs).sync;
        let observation = SyncObservation { immediate, delayed };
        if observation.clock_running() {
            tracing::debug!(immediate, delayed, "PCM SYNC echoed");
        } else {
            tracing::warn!(immediate, delayed, "PCM SYNC did not echo; is the clock running?");
        }
        observation
    }

    /// Read CS_A.
    pub fn status<R: RegisterIo>(&self, regs: &R) -> FifoStatus {
        FifoStatus::from_cs(regs.read32(PCM_CS_A))
    }

    /// Run the full bring-up sequence for `layout`.
    ///
    /// The layout is validated before the first write.
    pub fn bring_up<R: RegisterIo, D: DelayNs>(
        &mut self,
        regs: &mut R,
        delay: &mut D,
        layout: &FrameLayout,
        bit_clock_hz: u64,
    ) -> Result<SyncObservation> {
        layout.validate()?;
        self.disable(regs);
        delay.delay_us(DISABLE_SETTLE_US);
        self.configure_fifo_thresholds_and_clear(regs);
        delay.delay_us(FIFO_CLEAR_SETTLE_US);
        self.configure_channels(regs, layout)?;
        self.configure_frame(regs, layout)?;
        self.leave_standby_and_wait(regs, delay, bit_clock_hz);
        self.enable_transmit(regs);
        Ok(self.check_sync_handshake(regs, delay))
    }
}

/// Microseconds to wait after releasing standby at `bit_clock_hz`.
pub fn standby_settle_us(bit_clock_hz: u64) -> u32 {
    if bit_clock_hz == 0 {
        return STANDBY_SETTLE_MIN_US;
    }
    // ceil(4 clocks in µs)
    let four_clocks_us = 4_000_000u64.div_ceil(bit_clock_hz);
    u32::try_from(four_clocks_us)
        .unwrap_or(u32::MAX)
        .max(STANDBY_SETTLE_MIN_US)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PcmError;
    use crate::mmio::RegisterBlock;
    use crate::mocks::{MockDelay, MockRegisters};

    #[test]
    fn stereo_16bit_matches_reference_words() {
        let layout = FrameLayout::stereo_16bit();
        assert!(layout.validate().is_ok());
        assert_eq!(layout.txc_word(), 0xC018_C218);
        assert_eq!(layout.mode_word(), 0x0000_FC20);
    }

    #[test]
    fn packed_mode_sets_ftxp() {
        let layout = FrameLayout {
            packing: FifoPacking::Packed,
            ..FrameLayout::stereo_16bit()
        };
        assert_eq!(layout.mode_word(), 0x0100_FC20);
    }

    #[test]
    fn disabled_channel_contributes_no_bits() {
        let layout = FrameLayout {
            channels: [ChannelLayout::new(16, 1), ChannelLayout::disabled()],
            ..FrameLayout::stereo_16bit()
        };
        assert_eq!(layout.txc_word(), 0xC018_0000);
    }

    #[test]
    fn channel_past_frame_end_is_rejected() {
        let layout = FrameLayout {
            channels: [ChannelLayout::new(16, 1), ChannelLayout::new(16, 49)],
            ..FrameLayout::stereo_16bit()
        };
        assert_eq!(
            layout.validate(),
            Err(ConfigError::ChannelOverflow {
                channel: 2,
                end: 65,
                frame: 64
            })
        );
    }

    #[test]
    fn frame_and_sync_lengths_are_bounded() {
        let mut layout = FrameLayout::stereo_16bit();
        layout.frame_length = 0;
        assert_eq!(layout.validate(), Err(ConfigError::FrameLength(0)));
        layout.frame_length = 1025;
        assert_eq!(layout.validate(), Err(ConfigError::FrameLength(1025)));
        layout.frame_length = 64;
        layout.sync_length = 65;
        assert_eq!(
            layout.validate(),
            Err(ConfigError::SyncLength { sync: 65, frame: 64 })
        );
    }

    #[test]
    fn width_outside_field_is_rejected() {
        let layout = FrameLayout {
            channels: [ChannelLayout::new(24, 0), ChannelLayout::new(16, 33)],
            ..FrameLayout::stereo_16bit()
        };
        assert_eq!(
            layout.validate(),
            Err(ConfigError::ChannelWidth {
                channel: 1,
                width: 24
            })
        );
    }

    #[test]
    fn bring_up_writes_running_cs_value() {
        let mut regs = MockRegisters::new(RegisterBlock::PCM);
        let mut delay = MockDelay::new();
        let mut frame = FrameConfigurator::new();

        let sync = frame
            .bring_up(&mut regs, &mut delay, &FrameLayout::stereo_16bit(), 54_190)
            .unwrap();

        assert_eq!(
            regs.writes(),
            vec![
                (PCM_CS_A, 0),
                (PCM_CS_A, 0x0000_0178),
                (PCM_TXC_A, 0xC018_C218),
                (PCM_MODE_A, 0x0000_FC20),
                (PCM_CS_A, 0x0200_0178),
                (PCM_CS_A, 0x0200_0179),
                (PCM_CS_A, 0x0200_017D),
                (PCM_CS_A, 0x0300_017D),
            ]
        );
        // 4 clocks at 54.19 kHz is 74 µs, above the 50 µs floor
        assert_eq!(delay.delays_ns(), vec![100_000, 10_000, 74_000, 1_000]);
        assert!(sync.clock_running());
    }

    #[test]
    fn invalid_layout_writes_nothing() {
        let mut regs = MockRegisters::new(RegisterBlock::PCM);
        let mut delay = MockDelay::new();
        let mut frame = FrameConfigurator::new();
        let layout = FrameLayout {
            frame_length: 2000,
            ..FrameLayout::stereo_16bit()
        };

        let err = frame
            .bring_up(&mut regs, &mut delay, &layout, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            PcmError::InvalidConfiguration(ConfigError::FrameLength(2000))
        ));
        assert!(regs.log().is_empty());
        assert_eq!(delay.calls(), 0);
    }

    #[test]
    fn standby_wait_has_a_floor() {
        assert_eq!(standby_settle_us(0), STANDBY_SETTLE_MIN_US);
        assert_eq!(standby_settle_us(3_072_000), STANDBY_SETTLE_MIN_US);
        assert_eq!(standby_settle_us(40_000), 100);
    }

    #[test]
    fn status_decodes_cs_flags() {
        let status = FifoStatus::from_cs(CS_TXD | CS_TXE | CS_SYNC);
        assert!(status.tx_ready && status.tx_empty && status.sync);
        assert!(!status.tx_error && !status.standby_released);
    }
}
