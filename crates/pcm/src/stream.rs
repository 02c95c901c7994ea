//! Flow-controlled writes into the PCM TX FIFO.
//!
//! The writer never buffers: each word goes to FIFO_A as soon as CS_A
//! reports TXD, and the caller blocks until then.

use embedded_hal::delay::DelayNs;

use crate::error::{PcmError, Result};
use crate::frame::FifoStatus;
use crate::mmio::RegisterIo;
use crate::regs::{PCM_CS_A, PCM_FIFO_A};

/// Gap between TXD polls.
pub const TX_POLL_INTERVAL_US: u32 = 1;

/// Pushes 32-bit words into FIFO_A, waiting for space before each one.
///
/// Borrows the PCM register block and the delay provider for as long as it
/// lives; get one from [`PcmController::writer`](crate::session::PcmController::writer).
#[derive(Debug)]
pub struct FifoWriter<'a, R: RegisterIo, D: DelayNs> {
    regs: &'a mut R,
    delay: &'a mut D,
    sent: u64,
}

impl<'a, R: RegisterIo, D: DelayNs> FifoWriter<'a, R, D> {
    /// Writer over an already enabled PCM block.
    pub fn new(regs: &'a mut R, delay: &'a mut D) -> Self {
        Self {
            regs,
            delay,
            sent: 0,
        }
    }

    fn tx_ready(&self) -> bool {
        FifoStatus::from_cs(self.regs.read32(PCM_CS_A)).tx_ready
    }

    fn push(&mut self, word: u32) {
        self.regs.write32(PCM_FIFO_A, word);
        self.sent = self.sent.saturating_add(1);
    }

    /// Write `word` once the FIFO has room. Waits indefinitely.
    pub fn send(&mut self, word: u32) {
        while !self.tx_ready() {
            tracing::trace!("TX FIFO full");
            self.delay.delay_us(TX_POLL_INTERVAL_US);
        }
        self.push(word);
    }

    /// Like [`send`](Self::send) but gives up after `max_polls` waits.
    ///
    /// TXD is sampled at most `max_polls + 1` times. On timeout the word is
    /// not written.
    pub fn send_with_budget(&mut self, word: u32, max_polls: u32) -> Result<()> {
        for _ in 0..max_polls {
            if self.tx_ready() {
                self.push(word);
                return Ok(());
            }
            self.delay.delay_us(TX_POLL_INTERVAL_US);
        }
        if self.tx_ready() {
            self.push(word);
            return Ok(());
        }
        tracing::warn!(max_polls, sent = self.sent, "TX FIFO stayed full");
        Err(PcmError::FifoTimeout { polls: max_polls })
    }

    /// [`send`](Self::send) every word in order.
    pub fn send_all<I: IntoIterator<Item = u32>>(&mut self, words: I) {
        for word in words {
            self.send(word);
        }
    }

    /// Words written to FIFO_A so far.
    pub fn words_sent(&self) -> u64 {
        self.sent
    }
}
