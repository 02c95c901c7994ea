//! BCM283x register map for the PCM/I2S path
//!
//! Sources:
//! - BCM2835 ARM Peripherals (Broadcom, 6 Feb 2012), §6 GPIO and §8 PCM/I2S
//! - BCM2835 audio/PWM clocks errata (G. Van Loo) for CM_PCMCTL / CM_PCMDIV,
//!   which the main datasheet omits
//!
//! # Address spaces
//!
//! The datasheet tables use VideoCore bus addresses (`0x7Exx_xxxx`). Through
//! `/dev/mem` the same registers appear at ARM physical addresses: replace
//! `0x7E` with the SoC's peripheral base (see [`crate::session::SocVariant`]).
//! All offsets below are byte offsets from the start of their block.
//!
//! ## Clock manager password
//! CM_PCMCTL and CM_PCMDIV silently drop any write whose bits \[31:24\] are
//! not `0x5A`. Every value written to either register must include
//! [`CM_PASSWORD`].
//!
//! ## Width extension bits in TXC_A
//! Bits 31 and 15 of TXC_A are written set on every channel configuration.
//! The bring-up sequence this driver reproduces always programs them that
//! way and the attached codecs expect the resulting framing, so they are
//! treated as a fixed part of the channel word rather than a tunable.

// ---------------------------------------------------------------------------
// Block placement (offsets from the SoC peripheral base)
// ---------------------------------------------------------------------------

/// Clock manager block.
pub const CLOCK_BLOCK_OFFSET: u64 = 0x0010_1000;

/// GPIO controller block.
pub const GPIO_BLOCK_OFFSET: u64 = 0x0020_0000;

/// PCM/I2S controller block.
pub const PCM_BLOCK_OFFSET: u64 = 0x0020_3000;

/// Mapping granule: every block is mapped as one page.
pub const MAP_GRANULE: usize = 4 * 1024;

/// Declared size of the GPIO register block (GPFSEL0 .. GPPUDCLK1).
pub const GPIO_BLOCK_SIZE: usize = 0xA0;

/// Declared size of the PCM register block (CS_A .. GRAY).
pub const PCM_BLOCK_SIZE: usize = 0x24;

/// Declared size of the clock manager window used here (up to CM_PCMDIV).
pub const CLOCK_BLOCK_SIZE: usize = 0xA0;

// ---------------------------------------------------------------------------
// PCM block
// ---------------------------------------------------------------------------

/// Control and status.
pub const PCM_CS_A: usize = 0x00;
/// FIFO data (TX on write, RX on read).
pub const PCM_FIFO_A: usize = 0x04;
/// Frame mode.
pub const PCM_MODE_A: usize = 0x08;
/// Receive channel configuration.
pub const PCM_RXC_A: usize = 0x0C;
/// Transmit channel configuration.
pub const PCM_TXC_A: usize = 0x10;
/// DMA request levels.
pub const PCM_DREQ_A: usize = 0x14;
/// Interrupt enables.
pub const PCM_INTEN_A: usize = 0x18;
/// Interrupt status and clear.
pub const PCM_INTSTC_A: usize = 0x1C;
/// Gray code mode control.
pub const PCM_GRAY: usize = 0x20;

/// CS_A: enable the PCM interface.
pub const CS_EN: u32 = 1 << 0;
/// CS_A: enable reception.
pub const CS_RXON: u32 = 1 << 1;
/// CS_A: enable transmission.
pub const CS_TXON: u32 = 1 << 2;
/// CS_A: clear the TX FIFO (takes two PCM clocks).
pub const CS_TXCLR: u32 = 1 << 3;
/// CS_A: clear the RX FIFO (takes two PCM clocks).
pub const CS_RXCLR: u32 = 1 << 4;
/// CS_A: TXTHR = 0b11, TXW set while the FIFO is full except for one sample.
pub const CS_TXTHR: u32 = 0b11 << 5;
/// CS_A: RXTHR = 0b10, RXR set while the FIFO is less than full.
pub const CS_RXTHR: u32 = 0b10 << 7;
/// CS_A: TX FIFO error (underrun).
pub const CS_TXERR: u32 = 1 << 15;
/// CS_A: TX FIFO can accept data.
pub const CS_TXD: u32 = 1 << 19;
/// CS_A: TX FIFO is empty.
pub const CS_TXE: u32 = 1 << 21;
/// CS_A: PCM clock sync helper (echoes back after two PCM clocks).
pub const CS_SYNC: u32 = 1 << 24;
/// CS_A: RAM standby release.
pub const CS_STBY: u32 = 1 << 25;

/// TXC_A: channel 1 width extension.
pub const TXC_CH1WEX: u32 = 1 << 31;
/// TXC_A: channel 1 enable.
pub const TXC_CH1EN: u32 = 1 << 30;
/// TXC_A: channel 1 position field, bits \[29:20\].
pub const TXC_CH1POS_SHIFT: u32 = 20;
/// TXC_A: channel 1 width field, bits \[19:16\].
pub const TXC_CH1WID_SHIFT: u32 = 16;
/// TXC_A: channel 2 width extension.
pub const TXC_CH2WEX: u32 = 1 << 15;
/// TXC_A: channel 2 enable.
pub const TXC_CH2EN: u32 = 1 << 14;
/// TXC_A: channel 2 position field, bits \[13:4\].
pub const TXC_CH2POS_SHIFT: u32 = 4;
/// TXC_A: channel 2 width field, bits \[3:0\].
pub const TXC_CH2WID_SHIFT: u32 = 0;
/// TXC_A: mask of one position field (10 bits).
pub const TXC_POS_MASK: u32 = 0x3FF;
/// TXC_A: mask of one width field (4 bits).
pub const TXC_WID_MASK: u32 = 0xF;

/// MODE_A: frame sync length field, bits \[9:0\].
pub const MODE_FSLEN_SHIFT: u32 = 0;
/// MODE_A: frame length field (clocks − 1), bits \[19:10\].
pub const MODE_FLEN_SHIFT: u32 = 10;
/// MODE_A: mask of FSLEN / FLEN (10 bits).
pub const MODE_LEN_MASK: u32 = 0x3FF;
/// MODE_A: TX frame packed mode (two 16-bit samples per FIFO word).
pub const MODE_FTXP: u32 = 1 << 24;

// ---------------------------------------------------------------------------
// Clock manager block
// ---------------------------------------------------------------------------

/// PCM clock control.
pub const CM_PCMCTL: usize = 0x98;
/// PCM clock divisor.
pub const CM_PCMDIV: usize = 0x9C;

/// Clock manager password, required in bits \[31:24\] of every write.
pub const CM_PASSWORD: u32 = 0x5A << 24;
/// CM_PCMCTL: clock source field, bits \[3:0\].
pub const CM_SRC_SHIFT: u32 = 0;
/// CM_PCMCTL: clock source mask.
pub const CM_SRC_MASK: u32 = 0xF;
/// CM_PCMCTL: enable the clock generator.
pub const CM_ENAB: u32 = 1 << 4;
/// CM_PCMCTL: clock generator is running.
pub const CM_BUSY: u32 = 1 << 7;
/// CM_PCMCTL: MASH filter field, bits \[10:9\].
pub const CM_MASH_SHIFT: u32 = 9;
/// CM_PCMDIV: fractional divisor field, bits \[11:0\].
pub const CM_DIVF_SHIFT: u32 = 0;
/// CM_PCMDIV: integer divisor field, bits \[23:12\].
pub const CM_DIVI_SHIFT: u32 = 12;
/// CM_PCMDIV: mask of one divisor field (12 bits).
pub const CM_DIV_MASK: u32 = 0xFFF;

// ---------------------------------------------------------------------------
// GPIO block
// ---------------------------------------------------------------------------

/// First function select register; GPFSELn follows at `n * 4`.
pub const GPIO_GPFSEL0: usize = 0x00;
/// Width of one pin's function field.
pub const GPFSEL_FIELD_BITS: u32 = 3;
/// Pins sharing one GPFSEL register.
pub const GPFSEL_PINS_PER_REG: u8 = 10;
/// Mask of one function field.
pub const GPFSEL_FIELD_MASK: u32 = 0b111;
/// Number of GPIO lines on the BCM2835 family.
pub const GPIO_PIN_COUNT: u8 = 54;
