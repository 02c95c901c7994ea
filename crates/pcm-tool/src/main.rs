// Binary crate: items are not a public API.
#![allow(missing_docs)]

mod dry_run;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use colored::Colorize;
use embedded_hal::delay::DelayNs;
use pcm::{
    ClockDividerConfig, ClockSource, FifoWriter, FrameLayout, MashStage, MemDevice, PcmSettings,
    PinGroup, RegisterIo, Session, SocVariant,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pcm-tool")]
#[command(about = "Bring up the BCM283x PCM/I2S port and stream a test word", long_about = None)]
#[command(version)]
struct Cli {
    /// Clock generator input
    #[arg(long, value_enum, default_value_t = SourceArg::Osc)]
    source: SourceArg,
    /// MASH noise-shaping stage (0-3)
    #[arg(long, default_value_t = 1)]
    mash: u8,
    /// Integer part of the clock divisor
    #[arg(long, default_value_t = 354)]
    divi: u32,
    /// Fractional part of the clock divisor, in 1/4096 steps
    #[arg(long, default_value_t = 1260)]
    divf: u32,
    /// PCM pin group: GPIO18-21 (ALT0) or GPIO28-31 (ALT2)
    #[arg(long, value_enum, default_value_t = PinsArg::Gpio18)]
    pins: PinsArg,
    /// SoC family, selects the peripheral base address
    #[arg(long, value_enum, default_value_t = SocArg::Bcm2837)]
    soc: SocArg,
    /// Physical memory device
    #[arg(long, default_value = MemDevice::DEFAULT_PATH)]
    device: PathBuf,
    /// 32-bit word to stream (decimal or 0x-prefixed hex)
    #[arg(long, value_parser = parse_word, default_value = "0xA0A0A0A0")]
    word: u32,
    /// Number of words to send; 0 streams until killed
    #[arg(long, default_value_t = 10)]
    count: u64,
    /// Give up on a word after this many TXD polls instead of waiting forever
    #[arg(long)]
    fifo_budget: Option<u32>,
    /// Run the whole sequence against simulated registers and print the writes
    #[arg(long)]
    dry_run: bool,
    /// More logging (-v debug, -vv trace); overrides RUST_LOG
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Gnd,
    Osc,
    Plla,
    Pllc,
    Plld,
    Hdmi,
}

impl From<SourceArg> for ClockSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Gnd => Self::Ground,
            SourceArg::Osc => Self::Oscillator,
            SourceArg::Plla => Self::PllA,
            SourceArg::Pllc => Self::PllC,
            SourceArg::Plld => Self::PllD,
            SourceArg::Hdmi => Self::HdmiAux,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PinsArg {
    #[value(name = "18")]
    Gpio18,
    #[value(name = "28")]
    Gpio28,
}

impl From<PinsArg> for PinGroup {
    fn from(arg: PinsArg) -> Self {
        match arg {
            PinsArg::Gpio18 => Self::Alt0Gpio18,
            PinsArg::Gpio28 => Self::Alt2Gpio28,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SocArg {
    Bcm2835,
    Bcm2837,
    Bcm2711,
}

impl From<SocArg> for SocVariant {
    fn from(arg: SocArg) -> Self {
        match arg {
            SocArg::Bcm2835 => Self::Bcm2835,
            SocArg::Bcm2837 => Self::Bcm2837,
            SocArg::Bcm2711 => Self::Bcm2711,
        }
    }
}

fn parse_word(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("`{s}` is not a 32-bit word: {e}"))
}

/// What to push through the FIFO once the port is up.
#[derive(Clone, Copy)]
pub(crate) struct StreamPlan {
    pub word: u32,
    pub count: u64,
    pub budget: Option<u32>,
}

impl StreamPlan {
    pub fn run<R: RegisterIo, D: DelayNs>(self, writer: &mut FifoWriter<'_, R, D>) -> pcm::Result<u64> {
        while self.count == 0 || writer.words_sent() < self.count {
            match self.budget {
                Some(polls) => writer.send_with_budget(self.word, polls)?,
                None => writer.send(self.word),
            }
        }
        Ok(writer.words_sent())
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn settings_from(cli: &Cli) -> Result<PcmSettings> {
    let mash = MashStage::try_from(cli.mash).context("invalid --mash")?;
    Ok(PcmSettings {
        clock: ClockDividerConfig {
            source: cli.source.into(),
            mash,
            divi: cli.divi,
            divf: cli.divf,
        },
        frame: FrameLayout::stereo_16bit(),
        pins: cli.pins.into(),
        soc: cli.soc.into(),
        device: cli.device.clone(),
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = settings_from(&cli)?;
    settings
        .validate()
        .context("refusing to touch hardware with this configuration")?;
    let plan = StreamPlan {
        word: cli.word,
        count: cli.count,
        budget: cli.fifo_budget,
    };
    tracing::debug!(
        word = format_args!("{:#010x}", plan.word),
        count = plan.count,
        budget = ?plan.budget,
        "stream plan"
    );

    println!();
    println!(
        "{}",
        format!(
            "PCM {} via {} at {} Hz bit clock",
            if cli.dry_run { "dry run" } else { "bring-up" },
            settings.clock.source,
            settings.bit_clock_hz()
        )
        .cyan()
        .bold()
    );

    if cli.dry_run {
        if plan.count == 0 {
            bail!("--count 0 streams forever; pick a finite count for --dry-run");
        }
        return dry_run::run(&settings, plan);
    }

    let sent = Session::run(&settings, |writer| plan.run(writer)).with_context(|| {
        format!(
            "PCM run on {} failed (root is usually required for /dev/mem)",
            settings.device.display()
        )
    })?;

    println!(
        "{}",
        format!("  ✓ sent {sent} × {:#010x}, port torn down", plan.word).green()
    );
    Ok(())
}
