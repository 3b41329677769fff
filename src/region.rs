//! A fixed-size, memory-mapped byte region.
//!
//! `MappedRegion` is the leaf of the stack: it knows nothing about
//! reservations, rolling, or record framing. It exposes bulk byte writes and
//! byte-order-aware 64-bit atomic access at a caller-supplied offset, and
//! owns the OS mapping and the backing file handle for the lifetime of the
//! appender that sits on top of it.
//!
//! No fsync/durability policy is implemented here or anywhere else in this
//! crate (see the crate's Non-goals): pages are written back by the OS on
//! its own schedule, same as the teacher's `RingBuffer`.

use std::fs::File;
use std::sync::atomic::AtomicU64;

use memmap2::MmapMut;

use crate::error::Result;

/// An aligned, fixed-size memory-mapped region backed by a file.
#[derive(Debug)]
pub struct MappedRegion {
    mmap: MmapMut,
    file: File,
}

impl MappedRegion {
    /// Map `file`, which must already be sized to the desired capacity.
    pub fn map(file: File) -> Result<Self> {
        // SAFETY: the file is fully owned by the caller for the lifetime of
        // this mapping; no other process is assumed to truncate it out from
        // under us (the same assumption `ring_buffer.rs` makes).
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { mmap, file })
    }

    /// Total length of the mapped region in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Whether the mapped region has zero length.
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Copy `bytes` into the region starting at `offset`.
    ///
    /// # Panics
    /// Panics if the write would run past the end of the region; the
    /// reservation protocol above this type is responsible for never
    /// requesting that.
    pub fn write_bytes(&self, offset: u64, bytes: &[u8]) {
        let offset = offset as usize;
        assert!(
            offset + bytes.len() <= self.mmap.len(),
            "write of {} bytes at offset {offset} overruns region of length {}",
            bytes.len(),
            self.mmap.len()
        );
        // SAFETY: `MmapMut` gives us a stable base pointer for its lifetime.
        // The bounds check above guarantees `[offset, offset + bytes.len())`
        // lies within the mapping. Concurrent writers only ever touch
        // disjoint ranges by construction of the reservation protocol, so
        // this is not a data race despite the shared `&self`.
        unsafe {
            let dest = self.mmap.as_ptr().add(offset) as *mut u8;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dest, bytes.len());
        }
    }

    /// Borrow the 8 bytes at `offset` as an `AtomicU64`.
    ///
    /// # Panics
    /// Panics if `offset` is not 8-byte aligned or would run past the end of
    /// the region.
    pub fn atomic_u64_at(&self, offset: u64) -> &AtomicU64 {
        let offset = offset as usize;
        assert_eq!(offset % 8, 0, "atomic offset {offset} is not 8-byte aligned");
        assert!(
            offset + 8 <= self.mmap.len(),
            "atomic offset {offset} overruns region of length {}",
            self.mmap.len()
        );
        // SAFETY: alignment and bounds are checked above. The pointer stays
        // valid for `&self`'s lifetime because `mmap` is not moved or
        // unmapped while this reference is alive.
        unsafe {
            let ptr = self.mmap.as_ptr().add(offset) as *const AtomicU64;
            &*ptr
        }
    }

    /// Truncate the backing file to `len` bytes. Must be called before the
    /// mapping is dropped.
    pub fn truncate(&self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    /// Borrow `length` bytes starting at `offset` as a mutable slice, for
    /// the callback write variant where the caller composes the record
    /// directly into the region.
    ///
    /// # Panics
    /// Panics if the range would run past the end of the region.
    ///
    /// # Safety (caller contract, enforced by construction elsewhere)
    /// Two overlapping calls to this method must never be live at once,
    /// and must never alias a range already granted to another writer. The
    /// reservation protocol in `appender.rs` guarantees disjoint ranges, so
    /// this is only ever called with `[offset, offset + length)` exclusive
    /// to the current caller.
    #[allow(clippy::mut_from_ref)]
    pub fn slice_mut(&self, offset: u64, length: u64) -> &mut [u8] {
        let (offset, length) = (offset as usize, length as usize);
        assert!(
            offset + length <= self.mmap.len(),
            "slice of {length} bytes at offset {offset} overruns region of length {}",
            self.mmap.len()
        );
        // SAFETY: see method doc; bounds checked above.
        unsafe {
            let ptr = self.mmap.as_ptr().add(offset) as *mut u8;
            std::slice::from_raw_parts_mut(ptr, length)
        }
    }
}
