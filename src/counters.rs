//! The `(N, W, F)` counter triple and the two places it can live.
//!
//! `N` (next-write-offset), `W` (write-complete) and `F` (final-size) are
//! the whole of an appender's mutable state. The *local* variant keeps them
//! in process memory; the *shared* variant keeps them inside the first 64
//! bytes of the mapped file so that other processes mapping the same file
//! see the same counters. Everything above this module is written once
//! against the [`CounterStorage`] trait and gets both variants for free,
//! matching the "counter storage abstraction" called out in the design.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::region::MappedRegion;

/// Size in bytes of the shared-variant header. Zero for the local variant.
pub const HEADER_SIZE: u64 = 64;

/// Offset of `N` within the shared header.
const OFFSET_N: u64 = 0;
/// Offset of `W` within the shared header.
const OFFSET_W: u64 = 8;
/// Offset of `F` within the shared header.
const OFFSET_F: u64 = 16;
/// Offset of the magic number within the shared header.
const OFFSET_MAGIC: u64 = 24;

/// Magic value written into a freshly created shared-header file and
/// checked on [`crate::facade::map_existing_file`]-style opens. An addition
/// over the bare `spec.md` header layout, in the spirit of the validate-on-open
/// convention the teacher's own mapped structures use.
pub const MAGIC: u64 = 0x4A41_4349_4F00_0001;

/// Sentinel stored in `F` while an appender is not yet sealed.
pub const F_SENTINEL: u64 = u64::MAX; // bit pattern of -1i64

/// Storage for one appender's `(N, W, F)` counters, parameterized so the
/// reservation protocol in [`crate::appender`] doesn't need to know whether
/// they live in process memory or in a mapped header.
///
/// Every method takes the appender's [`MappedRegion`] as a parameter rather
/// than owning a reference to it, so an `Appender` can hold both its region
/// and its counters as ordinary sibling fields without any self-referential
/// borrowing.
pub trait CounterStorage: std::fmt::Debug + Send + Sync {
    /// `H`: offset at which payload begins. `0` for local, [`HEADER_SIZE`]
    /// for shared.
    fn header_offset(&self) -> u64;

    /// Acquire-load `N`.
    fn load_n(&self, region: &MappedRegion) -> u64;

    /// CAS `N` from `current` to `new` with acquire-release ordering.
    /// `Ok` on success (the returned value is `new`), `Err` with the
    /// observed value on failure.
    fn compare_exchange_n(
        &self,
        region: &MappedRegion,
        current: u64,
        new: u64,
    ) -> Result<u64, u64>;

    /// Release fetch-add onto `W`; returns the value of `W` before the add.
    fn fetch_add_w(&self, region: &MappedRegion, delta: u64) -> u64;

    /// Acquire-load `W`.
    fn load_w(&self, region: &MappedRegion) -> u64;

    /// Attempt to record `n` as the sealing offset. Succeeds (returns
    /// `true`) only for the first caller to race past capacity; later
    /// callers observe `F` already set and return `false`. Implemented as a
    /// CAS from [`F_SENTINEL`] so the *first* sealer wins, per the design's
    /// resolution of the "unconditional store" open question.
    fn try_seal(&self, region: &MappedRegion, n: u64) -> bool;

    /// Acquire-load `F` as a signed value (`-1` means "not sealed").
    fn load_f(&self, region: &MappedRegion) -> i64;
}

/// Counters resident in process memory. Only threads of this process ever
/// see them; used for the single-process variant.
#[derive(Debug)]
pub struct LocalCounters {
    header_offset: u64,
    n: AtomicU64,
    w: AtomicU64,
    f: AtomicU64,
}

impl LocalCounters {
    /// Create counters initialized to `(H, H, F_SENTINEL)`.
    pub fn new(header_offset: u64) -> Self {
        Self {
            header_offset,
            n: AtomicU64::new(header_offset),
            w: AtomicU64::new(header_offset),
            f: AtomicU64::new(F_SENTINEL),
        }
    }
}

impl CounterStorage for LocalCounters {
    fn header_offset(&self) -> u64 {
        self.header_offset
    }

    fn load_n(&self, _region: &MappedRegion) -> u64 {
        self.n.load(Ordering::Acquire)
    }

    fn compare_exchange_n(
        &self,
        _region: &MappedRegion,
        current: u64,
        new: u64,
    ) -> Result<u64, u64> {
        self.n
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    fn fetch_add_w(&self, _region: &MappedRegion, delta: u64) -> u64 {
        self.w.fetch_add(delta, Ordering::Release)
    }

    fn load_w(&self, _region: &MappedRegion) -> u64 {
        self.w.load(Ordering::Acquire)
    }

    fn try_seal(&self, _region: &MappedRegion, n: u64) -> bool {
        self.f
            .compare_exchange(F_SENTINEL, n, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    fn load_f(&self, _region: &MappedRegion) -> i64 {
        self.f.load(Ordering::Acquire) as i64
    }
}

/// Counters resident in the mapped file's 64-byte header, visible to every
/// process that maps the same file. Carries no state of its own: all state
/// lives in the region passed to each method.
#[derive(Debug, Default, Clone, Copy)]
pub struct SharedCounters;

impl SharedCounters {
    /// Initialize a freshly created, zero-filled mapping's header to
    /// `(N, W, F) = (HEADER_SIZE, HEADER_SIZE, F_SENTINEL)` plus the magic
    /// number. Must be called exactly once, by the process that creates the
    /// file, before any writer reserves against it.
    pub fn init_header(region: &MappedRegion) {
        region
            .atomic_u64_at(OFFSET_N)
            .store(HEADER_SIZE, Ordering::Release);
        region
            .atomic_u64_at(OFFSET_W)
            .store(HEADER_SIZE, Ordering::Release);
        region
            .atomic_u64_at(OFFSET_F)
            .store(F_SENTINEL, Ordering::Release);
        region
            .atomic_u64_at(OFFSET_MAGIC)
            .store(MAGIC, Ordering::Release);
    }

    /// Validate a header written by [`SharedCounters::init_header`].
    /// Returns the magic value actually found when it doesn't match.
    pub fn check_magic(region: &MappedRegion) -> Result<(), u64> {
        let found = region.atomic_u64_at(OFFSET_MAGIC).load(Ordering::Acquire);
        if found == MAGIC {
            Ok(())
        } else {
            Err(found)
        }
    }
}

impl CounterStorage for SharedCounters {
    fn header_offset(&self) -> u64 {
        HEADER_SIZE
    }

    fn load_n(&self, region: &MappedRegion) -> u64 {
        region.atomic_u64_at(OFFSET_N).load(Ordering::Acquire)
    }

    fn compare_exchange_n(
        &self,
        region: &MappedRegion,
        current: u64,
        new: u64,
    ) -> Result<u64, u64> {
        region.atomic_u64_at(OFFSET_N).compare_exchange(
            current,
            new,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
    }

    fn fetch_add_w(&self, region: &MappedRegion, delta: u64) -> u64 {
        region
            .atomic_u64_at(OFFSET_W)
            .fetch_add(delta, Ordering::Release)
    }

    fn load_w(&self, region: &MappedRegion) -> u64 {
        region.atomic_u64_at(OFFSET_W).load(Ordering::Acquire)
    }

    fn try_seal(&self, region: &MappedRegion, n: u64) -> bool {
        region
            .atomic_u64_at(OFFSET_F)
            .compare_exchange(F_SENTINEL, n, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    fn load_f(&self, region: &MappedRegion) -> i64 {
        region.atomic_u64_at(OFFSET_F).load(Ordering::Acquire) as i64
    }
}
