//! Lifecycle: map, bring up, stream, tear down.
//!
//! ```text
//! Session::open ──► PcmController ──bring_up──► writer() ──► teardown()
//!   validate           owns GPIO,       pins            FifoWriter   frame off
//!   map GPIO,PCM,CLK   PCM, CLOCK       clock                        clock off
//!                      + delay          frame                        release CLK,PCM,GPIO
//! ```
//!
//! Teardown runs exactly once: either explicitly, or from `Drop` (which
//! includes unwinding out of a streaming loop). If bring-up never got past
//! validation, teardown only releases the blocks.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use embedded_hal::delay::DelayNs;

use crate::clock::{ClockDividerConfig, ClockManager, ClockState};
use crate::error::{ConfigError, Result};
use crate::frame::{FrameConfigurator, FrameLayout, SyncObservation};
use crate::gpio::PinGroup;
use crate::mmio::{MemDevice, RegisterBlock, RegisterIo, RegisterWindow};
use crate::stream::FifoWriter;

/// SoC family, which decides where the peripherals sit in physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocVariant {
    /// BCM2835 (Pi 1, Zero).
    Bcm2835,
    /// BCM2836 / BCM2837 (Pi 2, Pi 3).
    #[default]
    Bcm2837,
    /// BCM2711 (Pi 4).
    Bcm2711,
}

impl SocVariant {
    /// ARM physical address of the peripheral window.
    pub const fn peripheral_base(self) -> u64 {
        match self {
            Self::Bcm2835 => 0x2000_0000,
            Self::Bcm2837 => 0x3F00_0000,
            Self::Bcm2711 => 0xFE00_0000,
        }
    }
}

/// Everything needed for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmSettings {
    /// Clock generator setup.
    pub clock: ClockDividerConfig,
    /// Frame and channel geometry.
    pub frame: FrameLayout,
    /// Which pins carry the PCM signals.
    pub pins: PinGroup,
    /// SoC family (peripheral base address).
    pub soc: SocVariant,
    /// Physical memory device.
    pub device: PathBuf,
}

impl Default for PcmSettings {
    fn default() -> Self {
        Self {
            clock: ClockDividerConfig::default(),
            frame: FrameLayout::stereo_16bit(),
            pins: PinGroup::default(),
            soc: SocVariant::default(),
            device: PathBuf::from(MemDevice::DEFAULT_PATH),
        }
    }
}

impl PcmSettings {
    /// Check clock and frame before anything is mapped or written.
    pub fn validate(&self) -> core::result::Result<(), ConfigError> {
        self.clock.validate()?;
        self.frame.validate()
    }

    /// PCM bit clock implied by the divider.
    pub fn bit_clock_hz(&self) -> u64 {
        self.clock.output_hz()
    }
}

/// [`DelayNs`] backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

/// Owns the three register blocks and the delay for one run.
#[derive(Debug)]
pub struct PcmController<R: RegisterIo, D: DelayNs> {
    gpio: R,
    pcm: R,
    clock: R,
    delay: D,
    clock_manager: ClockManager,
    frame: FrameConfigurator,
    touched: bool,
    torn_down: bool,
}

impl<R: RegisterIo, D: DelayNs> PcmController<R, D> {
    /// Take ownership of already mapped blocks.
    pub fn new(gpio: R, pcm: R, clock: R, delay: D) -> Self {
        Self {
            gpio,
            pcm,
            clock,
            delay,
            clock_manager: ClockManager::new(),
            frame: FrameConfigurator::new(),
            touched: false,
            torn_down: false,
        }
    }

    /// Route pins, start the clock, configure and enable the transmitter.
    ///
    /// Settings are validated first; an invalid value leaves every register
    /// untouched.
    pub fn bring_up(&mut self, settings: &PcmSettings) -> Result<SyncObservation> {
        settings.validate()?;
        self.touched = true;
        tracing::info!(
            pins = ?settings.pins,
            source = %settings.clock.source,
            bit_clock_hz = settings.bit_clock_hz(),
            "bringing up PCM"
        );
        settings.pins.apply(&mut self.gpio)?;
        self.clock_manager
            .bring_up(&mut self.clock, &mut self.delay, &settings.clock)?;
        self.frame.bring_up(
            &mut self.pcm,
            &mut self.delay,
            &settings.frame,
            settings.bit_clock_hz(),
        )
    }

    /// Writer over the PCM FIFO.
    pub fn writer(&mut self) -> FifoWriter<'_, R, D> {
        FifoWriter::new(&mut self.pcm, &mut self.delay)
    }

    /// Clock generator handshake state.
    pub fn clock_state(&self) -> ClockState {
        self.clock_manager.state()
    }

    /// `true` once [`teardown`](Self::teardown) has run.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Bring up, hand the writer to `stream`, then tear down.
    ///
    /// Teardown runs whatever happens before it; the first error wins.
    pub fn run<T, F>(&mut self, settings: &PcmSettings, stream: F) -> Result<T>
    where
        F: FnOnce(&mut FifoWriter<'_, R, D>) -> Result<T>,
    {
        let outcome = self.bring_up(settings).and_then(|_| {
            let mut writer = self.writer();
            stream(&mut writer)
        });
        let teardown = self.teardown();
        let value = outcome?;
        teardown?;
        Ok(value)
    }

    /// Disable the transmitter, stop the clock, release CLOCK, PCM, GPIO.
    ///
    /// Only the first call does anything. Every step runs even if an earlier
    /// one failed; the first failure is returned. When no register was ever
    /// written the disable steps are skipped and the blocks are only
    /// released.
    pub fn teardown(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        let stopped = if self.touched {
            self.frame.disable(&mut self.pcm);
            self.clock_manager.shutdown(&mut self.clock, &mut self.delay)
        } else {
            tracing::debug!("no register written; releasing blocks only");
            Ok(())
        };
        if let Err(err) = &stopped {
            tracing::warn!(%err, "clock shutdown failed during teardown");
        }
        self.clock.release();
        self.pcm.release();
        self.gpio.release();
        tracing::info!("PCM torn down");
        stopped
    }
}

impl<R: RegisterIo, D: DelayNs> Drop for PcmController<R, D> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            tracing::error!(%err, "teardown on drop failed");
        }
    }
}

/// Controller over real `/dev/mem` mappings.
pub type HardwareController = PcmController<RegisterWindow, StdDelay>;

/// Entry points for running against real hardware.
#[derive(Debug)]
pub struct Session;

impl Session {
    /// Validate `settings`, open the memory device and map GPIO, PCM and
    /// CLOCK in that order.
    ///
    /// If a later mapping fails the earlier ones are released before the
    /// error is returned. The device handle is closed once all three blocks
    /// are mapped.
    pub fn open(settings: &PcmSettings) -> Result<HardwareController> {
        settings.validate()?;
        let device = MemDevice::open(&settings.device)?;
        let base = settings.soc.peripheral_base();

        let (gpio, pcm, clock) = map_blocks(|block| device.acquire_block(base, block))?;
        tracing::info!(
            device = %device.path().display(),
            soc = ?settings.soc,
            base = format_args!("{base:#010x}"),
            "register blocks mapped"
        );
        drop(device);

        Ok(PcmController::new(gpio, pcm, clock, StdDelay))
    }

    /// Open, bring up, stream with `stream`, tear down.
    pub fn run<T, F>(settings: &PcmSettings, stream: F) -> Result<T>
    where
        F: FnOnce(&mut FifoWriter<'_, RegisterWindow, StdDelay>) -> Result<T>,
    {
        let mut controller = Self::open(settings)?;
        controller.run(settings, stream)
    }
}

/// Acquire GPIO, PCM and CLOCK in that order. On failure the blocks
/// already acquired are dropped, which releases them.
fn map_blocks<R, F>(mut acquire: F) -> Result<(R, R, R)>
where
    F: FnMut(RegisterBlock) -> Result<R>,
{
    let gpio = acquire(RegisterBlock::GPIO)?;
    let pcm = acquire(RegisterBlock::PCM)?;
    let clock = acquire(RegisterBlock::CLOCK)?;
    Ok((gpio, pcm, clock))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PcmError;
    use crate::mocks::{ClockBusy, MockDelay, MockRegisters};
    use crate::regs::{CM_PASSWORD, CM_PCMCTL, CM_PCMDIV, MAP_GRANULE, PCM_CS_A};
    use std::{fs, io};

    struct Rig {
        gpio: MockRegisters,
        pcm: MockRegisters,
        clock: MockRegisters,
        delay: MockDelay,
    }

    impl Rig {
        fn new(busy: ClockBusy) -> Self {
            Self {
                gpio: MockRegisters::new(RegisterBlock::GPIO),
                pcm: MockRegisters::new(RegisterBlock::PCM),
                clock: MockRegisters::new(RegisterBlock::CLOCK).with_clock_busy(busy),
                delay: MockDelay::new(),
            }
        }

        fn controller(&self) -> PcmController<MockRegisters, MockDelay> {
            PcmController::new(
                self.gpio.clone(),
                self.pcm.clone(),
                self.clock.clone(),
                self.delay.clone(),
            )
        }
    }

    #[test]
    fn soc_bases() {
        assert_eq!(SocVariant::Bcm2835.peripheral_base(), 0x2000_0000);
        assert_eq!(SocVariant::default().peripheral_base(), 0x3F00_0000);
        assert_eq!(SocVariant::Bcm2711.peripheral_base(), 0xFE00_0000);
    }

    #[test]
    fn invalid_settings_touch_no_register() {
        let rig = Rig::new(ClockBusy::FollowsEnable);
        let mut ctl = rig.controller();
        let settings = PcmSettings {
            clock: ClockDividerConfig {
                divi: 0,
                ..ClockDividerConfig::default()
            },
            ..PcmSettings::default()
        };

        let err = ctl.bring_up(&settings).unwrap_err();
        assert!(matches!(err, PcmError::InvalidConfiguration(_)));
        for block in [&rig.gpio, &rig.pcm, &rig.clock] {
            assert!(block.log().is_empty());
        }
    }

    #[test]
    fn run_with_invalid_settings_only_releases() {
        let rig = Rig::new(ClockBusy::FollowsEnable);
        let mut ctl = rig.controller();
        let settings = PcmSettings {
            clock: ClockDividerConfig {
                divi: 0,
                ..ClockDividerConfig::default()
            },
            ..PcmSettings::default()
        };

        let err = ctl.run(&settings, |_writer| Ok(())).unwrap_err();
        assert!(matches!(err, PcmError::InvalidConfiguration(_)));
        drop(ctl);
        for block in [&rig.gpio, &rig.pcm, &rig.clock] {
            assert!(block.log().is_empty());
            assert_eq!(block.release_count(), 1);
        }
        assert_eq!(rig.delay.calls(), 0);
    }

    #[test]
    fn failed_block_mapping_unmaps_earlier_blocks() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(MAP_GRANULE as u64).unwrap();
        let device = MemDevice::open(file.path()).unwrap();
        let path = file.path().display().to_string();
        let mapped = || fs::read_to_string("/proc/self/maps").unwrap().contains(&path);

        let mut requested = Vec::new();
        let err = map_blocks(|block| {
            requested.push(block.name);
            if block == RegisterBlock::PCM {
                assert!(mapped(), "GPIO block should still be mapped");
                return Err(PcmError::Mapping {
                    what: "PCM block".to_owned(),
                    base: 0,
                    source: io::Error::from(io::ErrorKind::PermissionDenied),
                });
            }
            Ok(device.acquire(0, block.size)?.into_window(block))
        })
        .unwrap_err();

        assert!(matches!(err, PcmError::Mapping { .. }));
        assert_eq!(requested, ["GPIO", "PCM"]);
        assert!(!mapped());
    }

    #[test]
    fn teardown_runs_once_and_releases_in_reverse_order() {
        let rig = Rig::new(ClockBusy::FollowsEnable);
        let mut ctl = rig.controller();
        ctl.bring_up(&PcmSettings::default()).unwrap();

        ctl.teardown().unwrap();
        assert_eq!(rig.pcm.word(PCM_CS_A), 0);
        assert_eq!(rig.clock.word(CM_PCMCTL), CM_PASSWORD);
        assert_eq!(rig.clock.word(CM_PCMDIV), CM_PASSWORD);
        assert_eq!(ctl.clock_state(), ClockState::Idle);

        let writes_after_first: usize = [&rig.gpio, &rig.pcm, &rig.clock]
            .iter()
            .map(|b| b.writes().len())
            .sum();
        ctl.teardown().unwrap();
        drop(ctl);
        let writes_after_drop: usize = [&rig.gpio, &rig.pcm, &rig.clock]
            .iter()
            .map(|b| b.writes().len())
            .sum();
        assert_eq!(writes_after_first, writes_after_drop);
        for block in [&rig.gpio, &rig.pcm, &rig.clock] {
            assert_eq!(block.release_count(), 1);
        }
    }

    #[test]
    fn drop_tears_down_when_not_called_explicitly() {
        let rig = Rig::new(ClockBusy::FollowsEnable);
        {
            let mut ctl = rig.controller();
            ctl.bring_up(&PcmSettings::default()).unwrap();
        }
        assert_eq!(rig.pcm.word(PCM_CS_A), 0);
        assert!(rig.gpio.is_released() && rig.pcm.is_released() && rig.clock.is_released());
    }

    #[test]
    fn run_reports_bring_up_error_after_teardown() {
        let rig = Rig::new(ClockBusy::Stuck);
        let mut ctl = rig.controller();

        let err = ctl
            .run(&PcmSettings::default(), |_writer| Ok(()))
            .unwrap_err();
        assert!(matches!(err, PcmError::BusyTimeout { .. }));
        assert!(ctl.is_torn_down());
        assert!(rig.clock.is_released());
        // never reached the frame configurator before teardown
        assert_eq!(rig.pcm.writes_to(PCM_CS_A), vec![0]);
    }

    #[test]
    fn run_returns_stream_value() {
        let rig = Rig::new(ClockBusy::FollowsEnable);
        let mut ctl = rig.controller();
        let sent = ctl
            .run(&PcmSettings::default(), |writer| {
                writer.send_all([1, 2, 3]);
                Ok(writer.words_sent())
            })
            .unwrap();
        assert_eq!(sent, 3);
        assert_eq!(rig.pcm.fifo_words(), vec![1, 2, 3]);
    }

    #[test]
    fn open_on_missing_device_fails_with_mapping_error() {
        let settings = PcmSettings {
            device: PathBuf::from("/nonexistent/pcm-session-mem"),
            ..PcmSettings::default()
        };
        let err = Session::open(&settings).unwrap_err();
        assert!(matches!(err, PcmError::Mapping { .. }));
    }
}
