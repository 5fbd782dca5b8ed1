//! Memory-mapped register access
//!
//! Two layers:
//!
//! - [`RegisterBlock`]: raw 32-bit volatile access to one register window.
//!   [`MappedRegion`] implements it over an `mmap` of a device file (UIO map
//!   or `/dev/mem`); the simulated devices in [`crate::sim`] implement it in
//!   memory.
//! - [`Registers`]: typed access through [`RegisterField`]s, applying each
//!   field's write semantics:
//!
//! ```text
//! Plain  full word: write        partial: read, merge, write
//! W1C    write exactly the requested bits (never read-modify-write)
//! W1P    write base|pulse, then write base  (base = current non-pulse bits)
//! ```
//!
//! Nothing here locks. Callers hold whatever protects the surrounding device
//! state; the interrupt path only ever issues W1C writes.

// MMIO registers are naturally aligned by hardware, so pointer casts are safe
#![allow(clippy::cast_ptr_alignment)]

use crate::error::{PeriphError, Result};
use periph_chip::{FieldSemantics, RegisterField};
use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;

/// Raw 32-bit access to a register window
///
/// Offsets are relative to the window base. Implementations must perform a
/// real access on every call (no caching) since reads and writes have side
/// effects in hardware.
pub trait RegisterBlock: Debug + Send + Sync {
    /// Read a 32-bit register
    fn read32(&self, offset: usize) -> u32;

    /// Write a 32-bit register
    fn write32(&self, offset: usize, value: u32);
}

impl<T: RegisterBlock + ?Sized> RegisterBlock for Arc<T> {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value);
    }
}

/// Typed register interface over a shared register window
#[derive(Debug, Clone)]
pub struct Registers {
    block: Arc<dyn RegisterBlock>,
}

impl Registers {
    /// Wrap a register window.
    pub fn new(block: Arc<dyn RegisterBlock>) -> Self {
        Self { block }
    }

    /// Read a field value (shifted down to bit 0).
    pub fn read(&self, field: RegisterField) -> u32 {
        field.decode(self.block.read32(field.offset()))
    }

    /// Write a field value according to its semantics.
    ///
    /// Plain partial fields read-modify-write their register; do not use them
    /// on registers that also hold W1C bits.
    pub fn write(&self, field: RegisterField, value: u32) {
        let offset = field.offset();
        let bits = field.encode(value);
        match field.semantics() {
            FieldSemantics::Plain if field.is_word() => self.block.write32(offset, bits),
            FieldSemantics::Plain => {
                let current = self.block.read32(offset);
                self.block.write32(offset, (current & !field.mask()) | bits);
            }
            FieldSemantics::WriteOneToClear => self.block.write32(offset, bits),
            FieldSemantics::WriteOnePulse => {
                let base = self.block.read32(offset) & !field.mask();
                self.block.write32(offset, base | bits);
                self.block.write32(offset, base);
            }
        }
    }

    /// Fire a W1P command bit.
    pub fn pulse(&self, field: RegisterField) {
        debug_assert_eq!(field.semantics(), FieldSemantics::WriteOnePulse);
        self.write(field, 1);
    }

    /// Read a whole register.
    pub fn read_word(&self, offset: usize) -> u32 {
        self.block.read32(offset)
    }

    /// Write a whole register with no field semantics applied.
    pub fn write_word(&self, offset: usize, value: u32) {
        self.block.write32(offset, value);
    }

    /// Write a 64-bit bus address split across a low/high register pair.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_addr64(&self, lo: RegisterField, hi: RegisterField, addr: u64) {
        self.write(lo, addr as u32);
        self.write(hi, (addr >> 32) as u32);
    }
}

/// Register window mapped from a device file
pub struct MappedRegion {
    /// Memory-mapped pointer
    ptr: *mut u8,
    /// Size of the mapping
    size: usize,
    /// Backing file, kept open for the lifetime of the mapping
    _file: File,
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

// SAFETY: Send - MappedRegion owns the mapping exclusively. Moving between threads
// doesn't invalidate it (mmap'd memory is process-wide). No thread-local state.
unsafe impl Send for MappedRegion {}

// SAFETY: Sync - every access is a single bounds-checked volatile load or store.
// Serialising multi-register sequences is the caller's job (slow/fast locks).
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Open `path` and map `size` bytes starting at `offset`.
    ///
    /// For UIO devices map N lives at `offset = N * page_size`; for `/dev/mem`
    /// the offset is the physical base address.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The device file does not exist or cannot be opened
    /// - Memory mapping the window fails
    pub fn open(path: &Path, offset: u64, size: usize) -> Result<Self> {
        if !path.exists() {
            return Err(PeriphError::device_not_found(path));
        }

        // O_SYNC makes /dev/mem mappings uncached; UIO ignores it
        #[allow(clippy::cast_possible_wrap)]
        let sync_flag = OFlags::SYNC.bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync_flag)
            .open(path)?;

        Self::map(file, offset, size)
    }

    /// Map `size` bytes of an already-open device file.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or the mmap fails.
    pub fn map(file: File, offset: u64, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(PeriphError::invalid_config("cannot map an empty window"));
        }

        // SAFETY: mmap necessary for MMIO - maps the register window into the process.
        // Invariants: (1) file is an open device fd; (2) size > 0; (3) the mapping is
        // MAP_SHARED so stores reach the device; (4) ptr valid for size bytes or Err.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &file,
                offset,
            )
            .map_err(|e| {
                PeriphError::transfer_failed(format!(
                    "Failed to mmap {size:#x} bytes at {offset:#x}: {e}"
                ))
            })?
        };

        tracing::info!("Mapped register window at {:p}, size={:#x}", ptr, size);

        Ok(Self {
            ptr: ptr.cast(),
            size,
            _file: file,
        })
    }

    /// Get region size
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl RegisterBlock for MappedRegion {
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the mapped region size.
    fn read32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        // SAFETY: read_volatile necessary for MMIO - hardware can change value.
        // Invariants: (1) ptr from mmap, valid for self.size; (2) offset+4 <= size;
        // (3) u32 aligned. Caller guarantees: offset in bounds.
        unsafe { std::ptr::read_volatile(self.ptr.add(offset).cast::<u32>()) }
    }

    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the mapped region size.
    fn write32(&self, offset: usize, value: u32) {
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        // SAFETY: write_volatile necessary for MMIO - triggers hardware side effects.
        // Invariants: (1) ptr from mmap; (2) offset+4 <= size; (3) u32 aligned.
        unsafe {
            std::ptr::write_volatile(self.ptr.add(offset).cast::<u32>(), value);
        }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: munmap necessary - ptr/size are exactly what mmap returned, Drop runs
        // at most once and no references into the mapping outlive self.
        unsafe {
            // Ignore error in Drop (can't propagate)
            let _ = munmap(self.ptr.cast(), self.size);
        }
        tracing::debug!("Unmapped register window ({:#x} bytes)", self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Access, RecordingBlock, RegisterFile};
    use periph_chip::regs::fir;
    use periph_chip::Block;

    fn recorded() -> (Registers, Arc<RecordingBlock<RegisterFile>>) {
        let rec = Arc::new(RecordingBlock::new(RegisterFile::new(Block::Fir.size())));
        (Registers::new(rec.clone()), rec)
    }

    #[test]
    fn test_w1c_is_a_single_write() {
        let (regs, rec) = recorded();
        regs.write(fir::fields::DONE, 1);
        assert_eq!(rec.take(), vec![Access::Write(fir::STATUS, fir::status::DONE)]);
    }

    #[test]
    fn test_w1p_pulses_then_clears() {
        let (regs, rec) = recorded();
        regs.write_word(fir::CTRL, fir::ctrl::EN);
        rec.take();

        regs.pulse(fir::fields::START);
        assert_eq!(
            rec.take(),
            vec![
                Access::Read(fir::CTRL, fir::ctrl::EN),
                Access::Write(fir::CTRL, fir::ctrl::EN | fir::ctrl::START),
                Access::Write(fir::CTRL, fir::ctrl::EN),
            ]
        );
    }

    #[test]
    fn test_plain_partial_field_preserves_neighbours() {
        let (regs, rec) = recorded();
        regs.write_word(fir::LEN, 0xABCD_0000);
        regs.write(fir::fields::LEN, 12);
        assert_eq!(regs.read_word(fir::LEN), 0xABCD_000C);
        assert_eq!(regs.read(fir::fields::LEN), 12);
        assert!(rec.take().len() >= 4);
    }

    #[test]
    fn test_addr64_split() {
        let (regs, _rec) = recorded();
        let lo = RegisterField::word(0x10);
        let hi = RegisterField::word(0x14);
        regs.write_addr64(lo, hi, 0x0000_0012_3456_7000);
        assert_eq!(regs.read_word(0x10), 0x3456_7000);
        assert_eq!(regs.read_word(0x14), 0x12);
    }

    #[test]
    fn test_open_missing_device() {
        let err = MappedRegion::open(Path::new("/dev/periph-does-not-exist"), 0, 4096)
            .expect_err("missing device must fail");
        assert!(matches!(err, PeriphError::DeviceNotFound { .. }));
    }
}
