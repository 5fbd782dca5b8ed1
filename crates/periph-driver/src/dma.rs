//! DMA-coherent sample buffers and bulk transfer descriptors
//!
//! A [`DmaBuffer`] is a page-aligned, zeroed allocation that the device may
//! read or write behind the CPU's back. Its bus address is what gets
//! programmed into the engine's address registers.
//!
//! # Bus addresses
//!
//! Buffers created with [`DmaBuffer::new`] are identity mapped: the bus
//! address is the host virtual address. That is what the simulated engine and
//! a no-IOMMU userspace setup expect. Drivers behind an IOMMU translate
//! before programming (see `BulkDescriptor::new`).
//!
//! # Ownership
//!
//! From the moment a descriptor naming a buffer is armed until the completion
//! signal has reported that transfer, software must not touch the destination
//! buffer. [`TransferSession`](crate::TransferSession) enforces this with its
//! slow lock and transfer phase; the buffer itself does no locking.

use crate::error::{PeriphError, Result};
use periph_chip::regs::axi_dma;
use rustix::mm::{mlock, munlock};
use std::alloc::Layout;

const PAGE_SIZE: usize = 4096;

/// Page-aligned buffer shared with a DMA engine
#[derive(Debug)]
pub struct DmaBuffer {
    /// Virtual address (user-space)
    vaddr: *mut u8,
    /// Device-visible address
    bus_addr: u64,
    /// Size in bytes (multiple of the page size)
    size: usize,
    /// Whether `mlock` succeeded and must be undone on drop
    locked: bool,
}

// SAFETY: Send - the allocation is owned exclusively by this value; moving it
// between threads does not move the memory.
unsafe impl Send for DmaBuffer {}

// SAFETY: Sync - shared access only hands out `&[u8]`; mutation needs `&mut self`.
// Concurrent device writes are excluded by the session's transfer phase.
unsafe impl Sync for DmaBuffer {}

impl DmaBuffer {
    /// Allocate an identity-mapped buffer of at least `size` bytes.
    ///
    /// The buffer is pinned with `mlock` when the memlock limit allows it;
    /// failure to pin is logged, not fatal.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or the allocation fails.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(PeriphError::transfer_failed("DMA buffer size must be non-zero"));
        }
        let aligned = size.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let layout = Layout::from_size_align(aligned, PAGE_SIZE)
            .map_err(|e| PeriphError::transfer_failed(format!("Invalid DMA buffer layout: {e}")))?;

        // SAFETY: Raw alloc_zeroed necessary for page-aligned DMA memory. Invariants:
        // (1) layout size > 0, align 4096 power-of-two; (2) returns valid ptr for
        // layout.size() bytes or null; (3) dealloc in Drop with the same layout.
        let vaddr = unsafe { std::alloc::alloc_zeroed(layout) };
        if vaddr.is_null() {
            return Err(PeriphError::transfer_failed(format!(
                "Failed to allocate {aligned} byte DMA buffer"
            )));
        }

        // SAFETY: mlock on [vaddr, vaddr+aligned), entirely inside the allocation above.
        let locked = match unsafe { mlock(vaddr.cast(), aligned) } {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("DMA buffer not pinned ({aligned:#x} bytes): {e}");
                false
            }
        };

        let bus_addr = vaddr as u64;
        tracing::debug!("Created DMA buffer: vaddr={vaddr:p}, bus={bus_addr:#x}, size={aligned:#x}");

        Ok(Self {
            vaddr,
            bus_addr,
            size: aligned,
            locked,
        })
    }

    /// Device-visible address
    pub const fn bus_addr(&self) -> u64 {
        self.bus_addr
    }

    /// Size in bytes
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Whether the pages are pinned
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Byte view
    pub const fn as_bytes(&self) -> &[u8] {
        // SAFETY: (1) vaddr valid for size bytes; (2) we own the allocation;
        // (3) &self excludes software mutation.
        unsafe { std::slice::from_raw_parts(self.vaddr, self.size) }
    }

    /// Mutable byte view
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: (1) vaddr valid for size; (2) &mut self gives exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.vaddr, self.size) }
    }

    /// Typed view of the whole buffer
    pub fn as_slice<T: bytemuck::Pod>(&self) -> &[T] {
        bytemuck::cast_slice(self.as_bytes())
    }

    /// Mutable typed view of the whole buffer
    pub fn as_mut_slice<T: bytemuck::Pod>(&mut self) -> &mut [T] {
        bytemuck::cast_slice_mut(self.as_bytes_mut())
    }

    /// Capacity in elements of `T`
    pub const fn capacity<T>(&self) -> usize {
        self.size / std::mem::size_of::<T>()
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        if self.locked {
            // SAFETY: same range that was mlock'd in new().
            let _ = unsafe { munlock(self.vaddr.cast(), self.size) };
        }
        // SAFETY: vaddr was allocated in new() with exactly this layout; the
        // owning session halted the engine before dropping its buffers.
        unsafe {
            std::alloc::dealloc(
                self.vaddr,
                Layout::from_size_align_unchecked(self.size, PAGE_SIZE),
            );
        }
        tracing::debug!("Freed DMA buffer at bus={:#x}", self.bus_addr);
    }
}

/// Input/output buffer pair owned by a transfer session
#[derive(Debug)]
pub struct SampleBuffers {
    input: DmaBuffer,
    output: DmaBuffer,
    capacity: usize,
}

impl SampleBuffers {
    /// Allocate buffers for `capacity` `i16` inputs and `i32` outputs.
    ///
    /// # Errors
    ///
    /// Returns an error if either allocation fails.
    pub fn new(capacity: usize) -> Result<Self> {
        let input = DmaBuffer::new(capacity * std::mem::size_of::<i16>())?;
        let output = DmaBuffer::new(capacity * std::mem::size_of::<i32>())?;
        Ok(Self {
            input,
            output,
            capacity,
        })
    }

    /// Capacity in samples
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Input samples
    pub fn input(&self) -> &[i16] {
        &self.input.as_slice::<i16>()[..self.capacity]
    }

    /// Input samples, writable
    pub fn input_mut(&mut self) -> &mut [i16] {
        let capacity = self.capacity;
        &mut self.input.as_mut_slice::<i16>()[..capacity]
    }

    /// Output samples
    pub fn output(&self) -> &[i32] {
        &self.output.as_slice::<i32>()[..self.capacity]
    }

    /// Output samples, writable
    pub fn output_mut(&mut self) -> &mut [i32] {
        let capacity = self.capacity;
        &mut self.output.as_mut_slice::<i32>()[..capacity]
    }

    /// Input buffer (for descriptor programming)
    pub const fn input_buffer(&self) -> &DmaBuffer {
        &self.input
    }

    /// Output buffer (for descriptor programming)
    pub const fn output_buffer(&self) -> &DmaBuffer {
        &self.output
    }
}

/// One bulk transfer: MM2S reads `in_bytes` from `src`, S2MM writes up to
/// `out_bytes` at `dst`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkDescriptor {
    /// Source bus address (memory → peripheral)
    pub src: u64,
    /// Destination bus address (peripheral → memory)
    pub dst: u64,
    /// MM2S length in bytes
    pub in_bytes: u32,
    /// S2MM length in bytes
    pub out_bytes: u32,
}

impl BulkDescriptor {
    /// Describe a transfer of the first `samples` elements of `buffers`.
    ///
    /// # Errors
    ///
    /// Returns an error if `samples` exceeds the buffer capacity or the byte
    /// counts do not fit the engine's length registers.
    pub fn new(buffers: &SampleBuffers, samples: usize) -> Result<Self> {
        if samples == 0 || samples > buffers.capacity() {
            return Err(PeriphError::transfer_failed(format!(
                "descriptor for {samples} samples, capacity {}",
                buffers.capacity()
            )));
        }
        let in_bytes = length_register(samples * std::mem::size_of::<i16>())?;
        let out_bytes = length_register(samples * std::mem::size_of::<i32>())?;
        Ok(Self {
            src: buffers.input_buffer().bus_addr(),
            dst: buffers.output_buffer().bus_addr(),
            in_bytes,
            out_bytes,
        })
    }
}

fn length_register(bytes: usize) -> Result<u32> {
    u32::try_from(bytes)
        .ok()
        .filter(|&b| b <= axi_dma::MAX_LENGTH)
        .ok_or_else(|| {
            PeriphError::transfer_failed(format!(
                "{bytes} bytes exceeds the {} byte length register",
                axi_dma::MAX_LENGTH
            ))
        })
}
