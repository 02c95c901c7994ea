//! `--dry-run`: the full lifecycle against simulated registers.

use anyhow::{Context, Result};
use colored::Colorize;
use pcm::mocks::{Access, ClockBusy, MockDelay, MockRegisters, TxReady};
use pcm::{PcmController, PcmSettings, RegisterBlock};

use crate::StreamPlan;

pub fn run(settings: &PcmSettings, plan: StreamPlan) -> Result<()> {
    let gpio = MockRegisters::new(RegisterBlock::GPIO);
    let pcm = MockRegisters::new(RegisterBlock::PCM).with_tx_ready(TxReady::Fifo {
        capacity: 64,
        drain_per_poll: 1,
    });
    let clock = MockRegisters::new(RegisterBlock::CLOCK).with_clock_busy(ClockBusy::FollowsEnable);
    let delay = MockDelay::new();

    let mut controller = PcmController::new(gpio.clone(), pcm.clone(), clock.clone(), delay.clone());
    let sent = controller
        .run(settings, |writer| plan.run(writer))
        .context("simulated run failed")?;
    drop(controller);

    for block in [&gpio, &clock, &pcm] {
        print_writes(block);
    }
    println!();
    println!(
        "{}",
        format!(
            "  ✓ {sent} FIFO words, {} delays totalling {} µs",
            delay.calls(),
            delay.total_ns() / 1_000
        )
        .green()
    );
    Ok(())
}

fn print_writes(block: &MockRegisters) {
    let info = block.block();
    println!();
    println!("{}", format!("  {} writes", info.name).cyan());
    let mut fifo_words = 0usize;
    for access in block.log() {
        if let Access::Write { offset, value } = access {
            if info == RegisterBlock::PCM && offset == pcm::regs::PCM_FIFO_A {
                fifo_words = fifo_words.saturating_add(1);
                continue;
            }
            println!("    +{offset:#05x} <- {value:#010x}");
        }
    }
    if fifo_words > 0 {
        println!("    +{:#05x} <- ({fifo_words} FIFO words)", pcm::regs::PCM_FIFO_A);
    }
}
