//! Register access layer: physical memory mapping and volatile word access.
//!
//! ```text
//! MemDevice (/dev/mem, O_SYNC)
//!     └─ acquire(base, len) ──► MappedRegion   (one mmap, released once)
//!                                   └─ into_window(block) ──► RegisterWindow
//!                                                               (bounds-checked RegisterIo)
//! ```
//!
//! Every configurator in this crate is written against [`RegisterIo`], so
//! the same code drives a real [`RegisterWindow`] or a `MockRegisters`
//! (feature `mocks`) in host tests.
//!
//! # Out-of-range access
//!
//! Register offsets are compile-time constants from [`crate::regs`]. An
//! offset outside the declared block, a misaligned offset, or an access
//! after release is a bug in this crate, not an input error, so
//! [`RegisterWindow`] asserts instead of returning a `Result`.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use memmap2::{MmapOptions, MmapRaw};

use crate::error::{PcmError, Result};
use crate::regs;

/// Word-addressed access to one peripheral register block.
pub trait RegisterIo {
    /// Volatile read of the 32-bit register at byte `offset`.
    fn read32(&self, offset: usize) -> u32;

    /// Volatile write of the 32-bit register at byte `offset`.
    fn write32(&mut self, offset: usize, value: u32);

    /// Read, transform, write back.
    fn modify32(&mut self, offset: usize, f: impl FnOnce(u32) -> u32) {
        let value = f(self.read32(offset));
        self.write32(offset, value);
    }

    /// Give up the underlying mapping. Idempotent; no-op by default.
    fn release(&mut self) {}
}

/// A named register block and its place in the peripheral address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBlock {
    /// Short name used in logs and errors.
    pub name: &'static str,
    /// Byte offset of the block from the SoC peripheral base.
    pub offset: u64,
    /// Declared size of the block in bytes.
    pub size: usize,
}

impl RegisterBlock {
    /// GPIO function select / level / pull registers.
    pub const GPIO: Self = Self {
        name: "GPIO",
        offset: regs::GPIO_BLOCK_OFFSET,
        size: regs::GPIO_BLOCK_SIZE,
    };

    /// PCM/I2S controller.
    pub const PCM: Self = Self {
        name: "PCM",
        offset: regs::PCM_BLOCK_OFFSET,
        size: regs::PCM_BLOCK_SIZE,
    };

    /// Clock manager, up to and including CM_PCMDIV.
    pub const CLOCK: Self = Self {
        name: "CLOCK",
        offset: regs::CLOCK_BLOCK_OFFSET,
        size: regs::CLOCK_BLOCK_SIZE,
    };

    /// Physical address of this block for the given peripheral base.
    pub fn physical_base(&self, peripheral_base: u64) -> u64 {
        peripheral_base.wrapping_add(self.offset)
    }
}

// ─── Device ──────────────────────────────────────────────────────────────────

/// An open handle on the privileged physical-memory device.
///
/// The handle is only needed while mappings are created; existing
/// [`MappedRegion`]s stay valid after it is dropped.
#[derive(Debug)]
pub struct MemDevice {
    file: File,
    path: PathBuf,
}

impl MemDevice {
    /// Physical memory device on Linux.
    pub const DEFAULT_PATH: &'static str = "/dev/mem";

    /// Open `path` read/write with `O_SYNC` (uncached access).
    ///
    /// Fails with [`PcmError::Mapping`] when the caller lacks privilege or
    /// the device does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|source| PcmError::Mapping {
                what: path.display().to_string(),
                base: 0,
                source,
            })?;
        tracing::debug!(path = %path.display(), "opened physical memory device");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path this device was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Map `len` bytes of physical memory starting at `base`.
    ///
    /// `base` must sit on a [`regs::MAP_GRANULE`] boundary; `len` is rounded
    /// up to a whole number of granules. No retry on failure.
    pub fn acquire(&self, base: u64, len: usize) -> Result<MappedRegion> {
        let mapping_error = |source: io::Error| PcmError::Mapping {
            what: format!("{} bytes of {}", len, self.path.display()),
            base,
            source,
        };

        if base.checked_rem(regs::MAP_GRANULE as u64) != Some(0) {
            return Err(mapping_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "physical base is not granule aligned",
            )));
        }
        let len = len
            .max(1)
            .checked_next_multiple_of(regs::MAP_GRANULE)
            .ok_or_else(|| {
                mapping_error(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "mapping length overflows",
                ))
            })?;

        let map = MmapOptions::new()
            .offset(base)
            .len(len)
            .map_raw(&self.file)
            .map_err(mapping_error)?;

        tracing::debug!(base = format_args!("{base:#010x}"), len, "mapped region");
        Ok(MappedRegion {
            base,
            len,
            map: Some(map),
        })
    }

    /// Map one register block and wrap it in a bounds-checked window.
    pub fn acquire_block(&self, peripheral_base: u64, block: RegisterBlock) -> Result<RegisterWindow> {
        let base = block.physical_base(peripheral_base);
        let region = self.acquire(base, block.size).map_err(|err| match err {
            PcmError::Mapping { base, source, .. } => PcmError::Mapping {
                what: format!("{} block", block.name),
                base,
                source,
            },
            other => other,
        })?;
        Ok(region.into_window(block))
    }
}

// ─── Region ──────────────────────────────────────────────────────────────────

/// One shared mapping of a physical address range.
///
/// The mapping is present from [`MemDevice::acquire`] until the first
/// [`release`](Self::release) (or drop); later releases do nothing.
#[derive(Debug)]
pub struct MappedRegion {
    base: u64,
    len: usize,
    map: Option<MmapRaw>,
}

impl MappedRegion {
    /// Physical base address.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Mapped length in bytes (whole granules).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`: a region covers at least one granule.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Alignment guaranteed for [`base`](Self::base).
    pub fn alignment(&self) -> usize {
        regs::MAP_GRANULE
    }

    /// `true` until the region is released.
    pub fn is_mapped(&self) -> bool {
        self.map.is_some()
    }

    /// Unmap the region. Safe to call any number of times.
    pub fn release(&mut self) {
        if let Some(map) = self.map.take() {
            drop(map);
            tracing::debug!(base = format_args!("{:#010x}", self.base), "unmapped region");
        }
    }

    /// Restrict this region to one register block.
    ///
    /// # Panics
    ///
    /// Panics if the block is larger than the mapping; block sizes are
    /// constants, so this only fires on a wrong register map.
    pub fn into_window(self, block: RegisterBlock) -> RegisterWindow {
        assert!(
            block.size <= self.len,
            "{} block ({} bytes) does not fit a {}-byte mapping",
            block.name,
            block.size,
            self.len
        );
        RegisterWindow {
            region: self,
            block,
        }
    }

    fn as_ptr(&self) -> Option<*mut u8> {
        self.map.as_ref().map(MmapRaw::as_mut_ptr)
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        self.release();
    }
}

// ─── Window ──────────────────────────────────────────────────────────────────

/// A [`MappedRegion`] restricted to one register block.
#[derive(Debug)]
pub struct RegisterWindow {
    region: MappedRegion,
    block: RegisterBlock,
}

impl RegisterWindow {
    /// The block this window exposes.
    pub fn block(&self) -> RegisterBlock {
        self.block
    }

    /// The underlying mapping.
    pub fn region(&self) -> &MappedRegion {
        &self.region
    }

    fn register_ptr(&self, offset: usize) -> *mut u32 {
        let in_block = offset
            .checked_add(4)
            .is_some_and(|end| end <= self.block.size);
        assert!(
            offset & 0b11 == 0 && in_block,
            "offset {offset:#x} outside the {}-byte {} block",
            self.block.size,
            self.block.name
        );
        let Some(base) = self.region.as_ptr() else {
            // Accessing a released window is a sequencing bug in the caller.
            unreachable_released(self.block.name)
        };
        // SAFETY: `offset + 4 <= block.size <= region.len`, so the pointer
        // stays inside the live mapping; the mapping is granule aligned and
        // `offset` is a multiple of 4, so the result is u32 aligned.
        unsafe { base.add(offset).cast::<u32>() }
    }
}

#[cold]
#[allow(clippy::panic)]
fn unreachable_released(block: &str) -> ! {
    panic!("{block} register window used after release")
}

impl RegisterIo for RegisterWindow {
    fn read32(&self, offset: usize) -> u32 {
        let ptr = self.register_ptr(offset);
        // SAFETY: `register_ptr` returns an aligned pointer into the mapping.
        unsafe { ptr.read_volatile() }
    }

    fn write32(&mut self, offset: usize, value: u32) {
        let ptr = self.register_ptr(offset);
        // SAFETY: `register_ptr` returns an aligned pointer into the mapping.
        unsafe { ptr.write_volatile(value) }
    }

    fn release(&mut self) {
        self.region.release();
    }
}
