//! Register-level driver for the BCM283x PCM/I2S peripheral
//!
//! Drives the audio serial port straight through memory-mapped registers:
//! pin muxing, the PCM clock generator, frame/channel layout and the TX
//! FIFO. No kernel driver is involved; the process needs access to
//! `/dev/mem`.
//!
//! # Architecture
//!
//! ```text
//! session        PcmController / Session   (lifecycle, teardown)
//!    │
//!    ├── gpio    pin function select        ─┐
//!    ├── clock   CM_PCMCTL / CM_PCMDIV       ├─ all written against RegisterIo
//!    ├── frame   CS_A / TXC_A / MODE_A       │
//!    └── stream  FIFO_A with TXD polling    ─┘
//!            │
//! mmio           MemDevice → MappedRegion → RegisterWindow
//! ```
//!
//! Every component talks to hardware through [`RegisterIo`] and waits through
//! [`embedded_hal::delay::DelayNs`], so the whole bring-up runs on a host
//! against `mocks::MockRegisters` and `mocks::MockDelay` (feature `mocks`).
//!
//! # Example
//!
//! ```no_run
//! use pcm::{PcmSettings, Session};
//!
//! # fn main() -> pcm::Result<()> {
//! let settings = PcmSettings::default();
//! Session::run(&settings, |writer| {
//!     for _ in 0..10 {
//!         writer.send(0xA0A0_A0A0);
//!     }
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::print_stdout)] // lib code logs through tracing
// Pedantic lints suppressed for this register-level crate:
#![allow(clippy::doc_markdown)] // register names in doc comments
#![allow(clippy::missing_panics_doc)] // window bounds asserts are documented on RegisterWindow
#![allow(clippy::must_use_candidate)] // register accessors, callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod clock;
pub mod error;
pub mod frame;
pub mod gpio;
pub mod mmio;
pub mod mocks;
pub mod regs;
pub mod session;
pub mod stream;

pub use clock::{ClockDividerConfig, ClockManager, ClockSource, ClockState, MashStage};
pub use error::{BusyWait, ConfigError, PcmError, Result};
pub use frame::{
    ChannelLayout, FifoPacking, FifoStatus, FrameConfigurator, FrameLayout, SyncObservation,
};
pub use gpio::{AltFunction, PinFunction, PinGroup};
pub use mmio::{MappedRegion, MemDevice, RegisterBlock, RegisterIo, RegisterWindow};
pub use session::{HardwareController, PcmController, PcmSettings, Session, SocVariant, StdDelay};
pub use stream::FifoWriter;
