//! The single-file appender: reservation, completion-tracking, sealing and
//! the write-variant surface. Generic over [`CounterStorage`] so the local
//! and shared-header variants share one implementation of the protocol.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::counters::{CounterStorage, LocalCounters, SharedCounters, HEADER_SIZE};
use crate::error::{AppendLogError, Result};
use crate::region::MappedRegion;

/// Sentinel returned where the Java source used `-1`. Rust callers see
/// `Option<u64>` instead, but the constant documents the parity.
pub const NULL_OFFSET: i64 = -1;

/// A reservation too large to ever fit guarantees sealing, matching the
/// design's `finish()`, which forces a seal by reserving more than any
/// legal capacity (`C <= 2^31 - 1`) could ever have remaining.
const FINISH_RESERVATION: u64 = i32::MAX as u64;

/// Byte order for the multi-byte write variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

/// Zero-copy, lock-free appender over one memory-mapped file.
///
/// `C` selects where the `(N, W, F)` counters live: [`LocalCounters`] for a
/// single-process appender, [`SharedCounters`] for one backed by a header
/// inside the mapped file that other processes can also map.
#[derive(Debug)]
pub struct SingleFileAppender<C: CounterStorage> {
    region: MappedRegion,
    counters: C,
    capacity: u64,
    path: PathBuf,
    closed: AtomicBool,
}

impl<C: CounterStorage> SingleFileAppender<C> {
    /// Total usable bytes, `C` in the design's notation (including the
    /// header, for the shared variant).
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// `H`: offset at which payload begins.
    pub fn header_offset(&self) -> u64 {
        self.counters.header_offset()
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `N < C`, i.e. whether a reservation could still succeed.
    pub fn has_available_capacity(&self) -> bool {
        self.counters.load_n(&self.region) < self.capacity
    }

    /// *Pending* ⇔ `W != N`: there is at least one reservation whose bytes
    /// have not yet been marked complete.
    pub fn is_pending(&self) -> bool {
        self.counters.load_w(&self.region) != self.counters.load_n(&self.region)
    }

    /// *Finished* ⇔ `W = N ∧ N ≥ C`: nothing pending, and no reservation
    /// could ever observe spare capacity again. `F` is deliberately not part
    /// of this predicate — it only gets set on the overflow branch of
    /// `reserve`, so a file that fills to exactly `C` with no overflowing
    /// write never seals `F` at all, and an `F ≥ 0` term would wrongly call
    /// that file unfinished forever.
    pub fn is_finished(&self) -> bool {
        let w = self.counters.load_w(&self.region);
        let n = self.counters.load_n(&self.region);
        w == n && n >= self.capacity
    }

    /// Reserve `length` bytes, returning the grant offset, or `None` if the
    /// file does not have `length` bytes of remaining capacity.
    ///
    /// Implements the algorithm from the design exactly: load `N`, bail if
    /// already at capacity, CAS-bump `N` by `length`, and on a CAS win that
    /// crosses capacity, seal the file and credit the skipped length to `W`
    /// so `is_pending` can still resolve to `false`.
    pub fn reserve(&self, length: u64) -> Option<u64> {
        loop {
            let n = self.counters.load_n(&self.region);
            if n >= self.capacity {
                return None;
            }
            match self.counters.compare_exchange_n(&self.region, n, n + length) {
                Ok(_) => {
                    if n + length <= self.capacity {
                        return Some(n);
                    }
                    // This CAS sealed the file: n + length overruns capacity,
                    // and no later reservation can ever observe n < capacity
                    // again, so exactly one thread reaches this branch.
                    if self.counters.try_seal(&self.region, n) {
                        tracing::warn!(
                            path = ?self.path,
                            final_size = n,
                            "appender sealed",
                        );
                    }
                    // Credit the skipped length so `W` can still reach `N`;
                    // without this, is_pending() would never clear.
                    self.counters.fetch_add_w(&self.region, length);
                    return None;
                }
                Err(_) => continue,
            }
        }
    }

    /// Mark `length` bytes as written. Must only be called after the
    /// payload bytes for the matching `reserve` grant are fully written, so
    /// the release ordering on `W` publishes them.
    pub fn commit(&self, length: u64) {
        self.counters.fetch_add_w(&self.region, length);
    }

    /// Reserve, copy `bytes` into the grant, and commit. The single
    /// primitive all the bulk write variants reduce to.
    pub fn write(&self, bytes: &[u8]) -> Option<u64> {
        let offset = self.reserve(bytes.len() as u64)?;
        self.region.write_bytes(offset, bytes);
        self.commit(bytes.len() as u64);
        Some(offset)
    }

    /// Reserve `length` bytes and let `compose` fill them in place, so the
    /// caller can build a record without first materializing it in a
    /// separate buffer. `compose` must write to every byte of the slice it
    /// is given. Takes `Fn` rather than `FnOnce` so the rolling facade can
    /// re-invoke it against a successor file after a roll.
    pub fn write_with(&self, length: u64, compose: impl Fn(&mut [u8])) -> Option<u64> {
        let offset = self.reserve(length)?;
        let slice = self.region.slice_mut(offset, length);
        compose(slice);
        self.commit(length);
        Some(offset)
    }

    /// One byte per character; any character above ASCII (`> 127`) is
    /// replaced with `?` (0x3F).
    pub fn write_ascii(&self, text: &str) -> Option<u64> {
        let bytes: Vec<u8> = text
            .chars()
            .map(|c| if (c as u32) > 127 { b'?' } else { c as u8 })
            .collect();
        self.write(&bytes)
    }

    /// Two bytes per UTF-16 code unit, in the given byte order.
    pub fn write_chars(&self, text: &str, order: ByteOrder) -> Option<u64> {
        let mut bytes = Vec::with_capacity(text.len() * 2);
        for unit in text.encode_utf16() {
            match order {
                ByteOrder::Big => bytes.extend_from_slice(&unit.to_be_bytes()),
                ByteOrder::Little => bytes.extend_from_slice(&unit.to_le_bytes()),
            }
        }
        self.write(&bytes)
    }

    /// Write one 8-byte integer.
    pub fn write_long(&self, value: u64, order: ByteOrder) -> Option<u64> {
        self.write_longs(&[value], order)
    }

    /// Write a run of 8-byte integers as one contiguous record (covers the
    /// design's 1/2/3/4-arity `writeLongs` overloads with a single slice).
    pub fn write_longs(&self, values: &[u64], order: ByteOrder) -> Option<u64> {
        let mut bytes = Vec::with_capacity(values.len() * 8);
        for value in values {
            match order {
                ByteOrder::Big => bytes.extend_from_slice(&value.to_be_bytes()),
                ByteOrder::Little => bytes.extend_from_slice(&value.to_le_bytes()),
            }
        }
        self.write(&bytes)
    }

    /// Force the file to seal by reserving more bytes than any legal
    /// capacity could have remaining. Used by `finish()` on the facades to
    /// force the next write to roll.
    pub fn finish(&self) {
        let _ = self.reserve(FINISH_RESERVATION);
    }

    /// Close the appender: idempotent once successful. Fails while writes
    /// are still pending so the caller can retry after they drain. If the
    /// file was sealed, truncates it to the final size before returning.
    pub fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let n = self.counters.load_n(&self.region);
        let w = self.counters.load_w(&self.region);
        if w != n {
            return Err(AppendLogError::PendingOnClose {
                path: self.path.clone(),
                pending: n - w,
            });
        }
        let f = self.counters.load_f(&self.region);
        if f >= 0 {
            self.region.truncate(f as u64)?;
        }
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl SingleFileAppender<LocalCounters> {
    /// Create a fresh, bounded, single-process appender. Fails if `path`
    /// already exists — the local variant never modifies an existing file.
    pub fn create(path: impl Into<PathBuf>, capacity: u64, fill_with_zeros: bool) -> Result<Self> {
        let path = path.into();
        let file = create_new_sized_file(&path, capacity, fill_with_zeros)?;
        let region = MappedRegion::map(file)?;
        tracing::debug!(path = ?path, capacity, "created local appender");
        Ok(Self {
            region,
            counters: LocalCounters::new(0),
            capacity,
            path,
            closed: AtomicBool::new(false),
        })
    }
}

impl SingleFileAppender<SharedCounters> {
    /// Create a fresh appender whose counters live in the file's header, so
    /// other processes can map the same file and coordinate through it.
    pub fn create_shared(
        path: impl Into<PathBuf>,
        capacity: u64,
        fill_with_zeros: bool,
    ) -> Result<Self> {
        let path = path.into();
        let file = create_new_sized_file(&path, capacity, fill_with_zeros)?;
        let region = MappedRegion::map(file)?;
        SharedCounters::init_header(&region);
        tracing::debug!(path = ?path, capacity, "created shared appender");
        Ok(Self {
            region,
            counters: SharedCounters,
            capacity,
            path,
            closed: AtomicBool::new(false),
        })
    }

    /// Open an already-created shared file; capacity is derived from the
    /// file's length on disk. Validates the header's magic number.
    pub fn open_shared(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let capacity = file.metadata()?.len();
        let region = MappedRegion::map(file)?;
        if let Err(found) = SharedCounters::check_magic(&region) {
            return Err(AppendLogError::BadMagic {
                path,
                expected: crate::counters::MAGIC,
                found,
            });
        }
        tracing::debug!(path = ?path, capacity, "opened existing shared appender");
        Ok(Self {
            region,
            counters: SharedCounters,
            capacity,
            path,
            closed: AtomicBool::new(false),
        })
    }
}

/// Create a new file at `path`, sized to `total_size` bytes, failing if it
/// already exists. Optionally writes explicit zero bytes rather than
/// relying on the filesystem's sparse-extend behavior of `set_len`.
fn create_new_sized_file(path: &Path, total_size: u64, fill_with_zeros: bool) -> Result<File> {
    let mut file = match OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(AppendLogError::FileExists(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    file.set_len(total_size)?;
    if fill_with_zeros {
        const CHUNK: usize = 64 * 1024;
        let zeros = vec![0u8; CHUNK];
        file.seek(SeekFrom::Start(0))?;
        let mut remaining = total_size;
        while remaining > 0 {
            let n = remaining.min(CHUNK as u64) as usize;
            file.write_all(&zeros[..n])?;
            remaining -= n as u64;
        }
        file.seek(SeekFrom::Start(0))?;
    }
    Ok(file)
}

/// `HEADER_SIZE` re-exported at the module that callers actually construct
/// appenders from, for symmetry with the local variant's `0`.
pub const SHARED_HEADER_SIZE: u64 = HEADER_SIZE;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn local_appender(capacity: u64) -> (tempfile::TempDir, SingleFileAppender<LocalCounters>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.bin");
        let appender = SingleFileAppender::<LocalCounters>::create(&path, capacity, false).unwrap();
        (dir, appender)
    }

    #[test]
    fn exact_fit_then_overflow() {
        let (_dir, a) = local_appender(128);
        let payload: Vec<u8> = (0u8..128).collect();
        assert_eq!(a.write(&payload), Some(0));
        assert_eq!(a.write(&[0u8]), None);
        assert!(!a.is_pending());
        assert!(a.is_finished());
        a.close().unwrap();
        assert_eq!(std::fs::metadata(a.path()).unwrap().len(), 128);
    }

    #[test]
    fn overflow_sets_final_size() {
        let (_dir, a) = local_appender(128);
        let payload = vec![0u8; 129];
        assert_eq!(a.write(&payload), None);
        assert!(!a.is_pending());
        assert!(a.is_finished());
        assert_eq!(a.counters.load_f(&a.region), 0);
    }

    #[test]
    fn two_sequential_writes() {
        let (_dir, a) = local_appender(128);
        assert_eq!(a.write(b"buffer1"), Some(0));
        assert_eq!(a.write(b"bytes2"), Some(7));
        a.close().unwrap();
        let contents = std::fs::read(a.path()).unwrap();
        assert_eq!(&contents[..13], b"buffer1bytes2");
    }

    #[test]
    fn overflow_after_partial_fill() {
        let (_dir, a) = local_appender(20);
        assert_eq!(a.write(b"buffer1"), Some(0));
        assert_eq!(a.write(b"buffer2"), Some(7));
        assert_eq!(a.write(b"buffer3"), None);
        assert_eq!(a.counters.load_f(&a.region), 14);
    }

    #[test]
    fn close_fails_while_pending() {
        let (_dir, a) = local_appender(128);
        let offset = a.reserve(8).unwrap();
        assert!(a.is_pending());
        let err = a.close().unwrap_err();
        assert!(matches!(err, AppendLogError::PendingOnClose { .. }));
        a.commit(8);
        let _ = offset;
        // still not finished (N < C) but no longer pending, so close succeeds.
        a.close().unwrap();
    }

    #[test]
    fn finish_forces_seal() {
        let (_dir, a) = local_appender(128);
        a.write(b"abc").unwrap();
        a.finish();
        assert!(a.is_finished());
        assert_eq!(a.write(b"x"), None);
    }

    #[test]
    fn many_concurrent_writers_get_disjoint_offsets() {
        let threads = 8usize;
        let writes_per_thread = 100usize;
        let record = [0xABu8; 8];
        let (_dir, appender) = local_appender((threads * writes_per_thread * record.len()) as u64);
        let appender = Arc::new(appender);

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let appender = Arc::clone(&appender);
                thread::spawn(move || {
                    let mut offsets = Vec::with_capacity(writes_per_thread);
                    for _ in 0..writes_per_thread {
                        offsets.push(appender.write(&record).unwrap());
                    }
                    offsets
                })
            })
            .collect();

        let mut all_offsets: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all_offsets.sort_unstable();

        let expected: Vec<u64> = (0..(threads * writes_per_thread) as u64)
            .map(|i| i * record.len() as u64)
            .collect();
        assert_eq!(all_offsets, expected);
        assert!(!appender.is_pending());
    }

    #[test]
    fn shared_variant_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.bin");
        {
            let a = SingleFileAppender::<SharedCounters>::create_shared(&path, 128, false).unwrap();
            a.write(b"Hello ").unwrap();
            a.close().unwrap();
        }
        let b = SingleFileAppender::<SharedCounters>::open_shared(&path).unwrap();
        b.write(b"World!").unwrap();
        b.close().unwrap();

        let contents = std::fs::read(&path).unwrap();
        let payload = &contents[HEADER_SIZE as usize..HEADER_SIZE as usize + 12];
        assert_eq!(payload, b"Hello World!");
    }

    #[test]
    fn create_fails_on_existing_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.bin");
        let _a = SingleFileAppender::<LocalCounters>::create(&path, 64, false).unwrap();
        let err = SingleFileAppender::<LocalCounters>::create(&path, 64, false).unwrap_err();
        assert!(matches!(err, AppendLogError::FileExists(_)));
    }
}
