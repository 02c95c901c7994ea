//! Mock register blocks and delay for host-side testing
//!
//! [`MockRegisters`] stands in for a [`RegisterWindow`](crate::mmio::RegisterWindow):
//! it keeps a word map, logs every access, and can simulate the two status
//! flags the driver polls (clock manager BUSY and PCM TXD). Clones share
//! state, so a test can hand one clone to the controller and inspect the
//! other afterwards.

#![cfg(any(test, feature = "mocks"))]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;

use crate::mmio::{RegisterBlock, RegisterIo};
use crate::regs::{CM_BUSY, CM_ENAB, CM_PCMCTL, CS_TXD, PCM_CS_A, PCM_FIFO_A};

/// One logged register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// A read and the value it returned.
    Read {
        /// Byte offset.
        offset: usize,
        /// Value returned.
        value: u32,
    },
    /// A write and the value written.
    Write {
        /// Byte offset.
        offset: usize,
        /// Value written.
        value: u32,
    },
}

/// How CM_PCMCTL reports BUSY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockBusy {
    /// BUSY mirrors the ENAB bit of the last write.
    #[default]
    FollowsEnable,
    /// BUSY is always set.
    Stuck,
    /// BUSY is never set.
    Never,
}

/// How CS_A reports TXD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxReady {
    /// TXD is always set.
    #[default]
    Always,
    /// TXD is clear for the first `n` reads of CS_A, then set.
    AfterPolls(u32),
    /// TXD is never set.
    Never,
    /// Simulated FIFO: each CS_A read drains `drain_per_poll` words; TXD is
    /// set while fewer than `capacity` words are queued.
    Fifo {
        /// Queue depth.
        capacity: u32,
        /// Words consumed per status read.
        drain_per_poll: u32,
    },
}

#[derive(Debug)]
struct MockState {
    block: RegisterBlock,
    words: BTreeMap<usize, u32>,
    log: Vec<Access>,
    releases: u32,
    clock_busy: ClockBusy,
    tx_ready: TxReady,
    fifo_fill: u32,
}

impl MockState {
    fn is_clock(&self) -> bool {
        self.block == RegisterBlock::CLOCK
    }

    fn is_pcm(&self) -> bool {
        self.block == RegisterBlock::PCM
    }

    fn stored(&self, offset: usize) -> u32 {
        self.words.get(&offset).copied().unwrap_or(0)
    }

    fn observe(&mut self, offset: usize) -> u32 {
        let stored = self.stored(offset);
        if self.is_clock() && offset == CM_PCMCTL {
            let busy = match self.clock_busy {
                ClockBusy::FollowsEnable => stored & CM_ENAB != 0,
                ClockBusy::Stuck => true,
                ClockBusy::Never => false,
            };
            return if busy { stored | CM_BUSY } else { stored & !CM_BUSY };
        }
        if self.is_pcm() && offset == PCM_CS_A {
            let ready = match &mut self.tx_ready {
                TxReady::Always => true,
                TxReady::Never => false,
                TxReady::AfterPolls(remaining) => {
                    if *remaining == 0 {
                        true
                    } else {
                        *remaining = remaining.saturating_sub(1);
                        false
                    }
                }
                TxReady::Fifo {
                    capacity,
                    drain_per_poll,
                } => {
                    self.fifo_fill = self.fifo_fill.saturating_sub(*drain_per_poll);
                    self.fifo_fill < *capacity
                }
            };
            return if ready { stored | CS_TXD } else { stored & !CS_TXD };
        }
        stored
    }
}

/// In-memory register block with an access log.
#[derive(Debug, Clone)]
pub struct MockRegisters {
    state: Rc<RefCell<MockState>>,
}

impl MockRegisters {
    /// Empty (all-zero) block. Offsets are checked against `block.size`.
    pub fn new(block: RegisterBlock) -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                block,
                words: BTreeMap::new(),
                log: Vec::new(),
                releases: 0,
                clock_busy: ClockBusy::default(),
                tx_ready: TxReady::default(),
                fifo_fill: 0,
            })),
        }
    }

    /// Set the BUSY behaviour (only meaningful for the CLOCK block).
    #[must_use]
    pub fn with_clock_busy(self, busy: ClockBusy) -> Self {
        self.state.borrow_mut().clock_busy = busy;
        self
    }

    /// Set the TXD behaviour (only meaningful for the PCM block).
    #[must_use]
    pub fn with_tx_ready(self, ready: TxReady) -> Self {
        self.state.borrow_mut().tx_ready = ready;
        self
    }

    /// Which block this mock stands in for.
    pub fn block(&self) -> RegisterBlock {
        self.state.borrow().block
    }

    /// Preload a register without logging.
    pub fn set_word(&mut self, offset: usize, value: u32) {
        self.state.borrow_mut().words.insert(offset, value);
    }

    /// Stored value of a register, without status simulation or logging.
    pub fn word(&self, offset: usize) -> u32 {
        self.state.borrow().stored(offset)
    }

    /// Every access since creation or the last [`clear_log`](Self::clear_log).
    pub fn log(&self) -> Vec<Access> {
        self.state.borrow().log.clone()
    }

    /// `(offset, value)` of every logged write, in order.
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.state
            .borrow()
            .log
            .iter()
            .filter_map(|a| match *a {
                Access::Write { offset, value } => Some((offset, value)),
                Access::Read { .. } => None,
            })
            .collect()
    }

    /// Values written to one register, in order.
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.writes()
            .into_iter()
            .filter(|&(o, _)| o == offset)
            .map(|(_, v)| v)
            .collect()
    }

    /// Number of logged reads of one register.
    pub fn reads_of(&self, offset: usize) -> usize {
        self.state
            .borrow()
            .log
            .iter()
            .filter(|a| matches!(a, Access::Read { offset: o, .. } if *o == offset))
            .count()
    }

    /// Words pushed into FIFO_A (PCM block only).
    pub fn fifo_words(&self) -> Vec<u32> {
        self.writes_to(PCM_FIFO_A)
    }

    /// Forget all logged accesses. Register contents are kept.
    pub fn clear_log(&mut self) {
        self.state.borrow_mut().log.clear();
    }

    /// How many times [`RegisterIo::release`] actually released the block.
    pub fn release_count(&self) -> u32 {
        self.state.borrow().releases
    }

    /// `true` once the block has been released.
    pub fn is_released(&self) -> bool {
        self.release_count() > 0
    }

    fn check(state: &MockState, offset: usize) {
        let in_block = offset
            .checked_add(4)
            .is_some_and(|end| end <= state.block.size);
        assert!(
            offset & 0b11 == 0 && in_block,
            "offset {offset:#x} outside the {}-byte {} block",
            state.block.size,
            state.block.name
        );
        assert!(
            state.releases == 0,
            "{} register window used after release",
            state.block.name
        );
    }
}

impl RegisterIo for MockRegisters {
    fn read32(&self, offset: usize) -> u32 {
        let mut state = self.state.borrow_mut();
        Self::check(&state, offset);
        let value = state.observe(offset);
        state.log.push(Access::Read { offset, value });
        value
    }

    fn write32(&mut self, offset: usize, value: u32) {
        let mut state = self.state.borrow_mut();
        Self::check(&state, offset);
        if state.is_pcm() && offset == PCM_FIFO_A {
            state.fifo_fill = state.fifo_fill.saturating_add(1);
        } else {
            state.words.insert(offset, value);
        }
        state.log.push(Access::Write { offset, value });
    }

    fn release(&mut self) {
        let mut state = self.state.borrow_mut();
        if state.releases == 0 {
            state.releases = 1;
        }
    }
}

// ─── Delay ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DelayLog {
    delays_ns: Vec<u32>,
}

/// Delay provider that records requested durations and returns immediately.
#[derive(Debug, Clone, Default)]
pub struct MockDelay {
    log: Rc<RefCell<DelayLog>>,
}

impl MockDelay {
    /// Fresh recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of delay calls.
    pub fn calls(&self) -> usize {
        self.log.borrow().delays_ns.len()
    }

    /// Every requested duration in nanoseconds, in order.
    pub fn delays_ns(&self) -> Vec<u32> {
        self.log.borrow().delays_ns.clone()
    }

    /// Sum of all requested durations.
    pub fn total_ns(&self) -> u64 {
        self.log
            .borrow()
            .delays_ns
            .iter()
            .map(|&ns| u64::from(ns))
            .sum()
    }

    /// Forget recorded delays.
    pub fn clear(&mut self) {
        self.log.borrow_mut().delays_ns.clear();
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.log.borrow_mut().delays_ns.push(ns);
    }

    fn delay_us(&mut self, us: u32) {
        self.delay_ns(us.saturating_mul(1_000));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::CM_PASSWORD;

    #[test]
    fn busy_follows_enable_bit() {
        let mut clock = MockRegisters::new(RegisterBlock::CLOCK);
        clock.write32(CM_PCMCTL, CM_PASSWORD | CM_ENAB);
        assert_ne!(clock.read32(CM_PCMCTL) & CM_BUSY, 0);
        clock.write32(CM_PCMCTL, CM_PASSWORD);
        assert_eq!(clock.read32(CM_PCMCTL) & CM_BUSY, 0);
    }

    #[test]
    fn fifo_model_applies_backpressure() {
        let mut pcm = MockRegisters::new(RegisterBlock::PCM).with_tx_ready(TxReady::Fifo {
            capacity: 1,
            drain_per_poll: 0,
        });
        assert_ne!(pcm.read32(PCM_CS_A) & CS_TXD, 0);
        pcm.write32(PCM_FIFO_A, 7);
        assert_eq!(pcm.read32(PCM_CS_A) & CS_TXD, 0);
        assert_eq!(pcm.fifo_words(), vec![7]);
        // FIFO data is not stored as a register value
        assert_eq!(pcm.word(PCM_FIFO_A), 0);
    }

    #[test]
    fn release_counts_once_and_clones_share_state() {
        let mut a = MockRegisters::new(RegisterBlock::GPIO);
        let b = a.clone();
        a.release();
        a.release();
        assert_eq!(b.release_count(), 1);
    }

    #[test]
    fn mock_delay_records_microseconds_as_nanoseconds() {
        let mut delay = MockDelay::new();
        let probe = delay.clone();
        delay.delay_us(100);
        delay.delay_us(1);
        assert_eq!(probe.delays_ns(), vec![100_000, 1_000]);
        assert_eq!(probe.total_ns(), 101_000);
    }

    #[test]
    #[should_panic(expected = "outside the 36-byte PCM block")]
    fn out_of_block_access_panics() {
        let pcm = MockRegisters::new(RegisterBlock::PCM);
        let _ = pcm.read32(0x24);
    }
}
