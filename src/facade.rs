//! The uniform contract callers write against, and its two
//! implementations: a bounded appender over one file, and a rolling
//! appender that transparently switches files on exhaustion.

use std::path::PathBuf;

use crate::appender::{ByteOrder, SingleFileAppender};
use crate::counters::CounterStorage;
use crate::error::{AppendLogError, Result};
use crate::roller::RollingCoordinator;

/// The append-log contract. Both the bounded and the rolling appenders
/// implement this, so callers can write against `&dyn Appender` without
/// caring which one they have.
///
/// Every write method returns `Ok(None)` when the record doesn't fit the
/// current file — a normal signaling value, not an error (see the crate's
/// error design). `Err` is reserved for the rolling facade's
/// capacity-exceeded-by-single-record case and for I/O failure.
pub trait Appender: Send + Sync + std::fmt::Debug {
    /// Append `bytes` as one record.
    fn write(&self, bytes: &[u8]) -> Result<Option<u64>>;

    /// Reserve `length` bytes and let `compose` fill them in place.
    /// `compose` is `Fn` rather than `FnOnce` so the rolling facade can
    /// re-invoke it against a successor file after a roll.
    fn write_with(&self, length: u64, compose: &dyn Fn(&mut [u8])) -> Result<Option<u64>>;

    /// One byte per character, non-ASCII replaced with `?`.
    fn write_ascii(&self, text: &str) -> Result<Option<u64>>;

    /// Two bytes per UTF-16 code unit.
    fn write_chars(&self, text: &str, order: ByteOrder) -> Result<Option<u64>>;

    /// One 8-byte integer.
    fn write_long(&self, value: u64, order: ByteOrder) -> Result<Option<u64>>;

    /// A run of 8-byte integers as one record.
    fn write_longs(&self, values: &[u64], order: ByteOrder) -> Result<Option<u64>>;

    /// Whether there is a write in flight whose completion hasn't been
    /// observed yet.
    fn is_pending(&self) -> bool;

    /// Whether this appender (or, for the rolling facade, the underlying
    /// current file) has been sealed and fully drained.
    fn is_finished(&self) -> bool;

    /// Force the current file to seal.
    fn finish(&self);

    /// Close the appender. Idempotent; fails while pending writes remain.
    fn close(&self) -> Result<()>;

    /// Path of the file currently backing this appender.
    fn path(&self) -> PathBuf;

    /// Usable payload capacity per file, `C - H`.
    fn usable_capacity(&self) -> u64;

    /// `N < C`: whether a reservation could still succeed against the
    /// current file.
    fn has_available_capacity(&self) -> bool;
}

impl<C: CounterStorage + 'static> Appender for SingleFileAppender<C> {
    fn write(&self, bytes: &[u8]) -> Result<Option<u64>> {
        Ok(SingleFileAppender::write(self, bytes))
    }

    fn write_with(&self, length: u64, compose: &dyn Fn(&mut [u8])) -> Result<Option<u64>> {
        Ok(SingleFileAppender::write_with(self, length, compose))
    }

    fn write_ascii(&self, text: &str) -> Result<Option<u64>> {
        Ok(SingleFileAppender::write_ascii(self, text))
    }

    fn write_chars(&self, text: &str, order: ByteOrder) -> Result<Option<u64>> {
        Ok(SingleFileAppender::write_chars(self, text, order))
    }

    fn write_long(&self, value: u64, order: ByteOrder) -> Result<Option<u64>> {
        Ok(SingleFileAppender::write_long(self, value, order))
    }

    fn write_longs(&self, values: &[u64], order: ByteOrder) -> Result<Option<u64>> {
        Ok(SingleFileAppender::write_longs(self, values, order))
    }

    fn is_pending(&self) -> bool {
        SingleFileAppender::is_pending(self)
    }

    fn is_finished(&self) -> bool {
        SingleFileAppender::is_finished(self)
    }

    fn finish(&self) {
        SingleFileAppender::finish(self)
    }

    fn close(&self) -> Result<()> {
        SingleFileAppender::close(self)
    }

    fn path(&self) -> PathBuf {
        SingleFileAppender::path(self).to_path_buf()
    }

    fn usable_capacity(&self) -> u64 {
        self.capacity() - self.header_offset()
    }

    fn has_available_capacity(&self) -> bool {
        SingleFileAppender::has_available_capacity(self)
    }
}

/// The bounded facade is just a [`SingleFileAppender`] used directly: it
/// already implements the full [`Appender`] contract, and a write that
/// doesn't fit returns `Ok(None)` rather than rolling to a new file.
pub type BoundedAppender<C> = SingleFileAppender<C>;

/// The rolling facade: delegates every write to whatever file the
/// [`RollingCoordinator`] currently considers current, retrying through a
/// roll when a write comes back `None`.
#[derive(Debug)]
pub struct RollingAppender {
    coordinator: std::sync::Arc<RollingCoordinator>,
}

impl RollingAppender {
    /// Wrap a coordinator as a rolling facade.
    pub fn new(coordinator: std::sync::Arc<RollingCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Reject up front if `record_len` could never fit in a single file;
    /// otherwise loop writing against whatever the coordinator currently
    /// considers the live file, retrying through a roll on every `None`.
    fn write_rolling<R>(
        &self,
        record_len: usize,
        mut attempt: impl FnMut(&dyn Appender) -> Option<R>,
    ) -> Result<Option<R>> {
        let usable = self.coordinator.usable_capacity();
        if record_len as u64 > usable {
            return Err(AppendLogError::CapacityExceeded {
                record_len,
                usable_capacity: usable,
            });
        }
        loop {
            let current = self.coordinator.file_for_write()?;
            if let Some(result) = attempt(&**current) {
                return Ok(Some(result));
            }
            // `None` means the current file sealed under us; the next call
            // to `file_for_write` observes capacity in the successor or
            // performs the roll itself. Forward progress is guaranteed
            // because sealing is permanent and exactly one thread rolls. A
            // provider failure is not retried here: `file_for_write` already
            // propagates it via `?` instead of handing back the exhausted
            // file, so a persistent I/O failure surfaces immediately rather
            // than spinning.
        }
    }
}

impl Appender for RollingAppender {
    fn write(&self, bytes: &[u8]) -> Result<Option<u64>> {
        self.write_rolling(bytes.len(), |a| a.write(bytes).ok().flatten())
    }

    fn write_with(&self, length: u64, compose: &dyn Fn(&mut [u8])) -> Result<Option<u64>> {
        self.write_rolling(length as usize, |a| {
            a.write_with(length, compose).ok().flatten()
        })
    }

    fn write_ascii(&self, text: &str) -> Result<Option<u64>> {
        self.write_rolling(text.len(), |a| a.write_ascii(text).ok().flatten())
    }

    fn write_chars(&self, text: &str, order: ByteOrder) -> Result<Option<u64>> {
        self.write_rolling(text.len() * 2, |a| {
            a.write_chars(text, order).ok().flatten()
        })
    }

    fn write_long(&self, value: u64, order: ByteOrder) -> Result<Option<u64>> {
        self.write_rolling(8, |a| a.write_long(value, order).ok().flatten())
    }

    fn write_longs(&self, values: &[u64], order: ByteOrder) -> Result<Option<u64>> {
        self.write_rolling(values.len() * 8, |a| {
            a.write_longs(values, order).ok().flatten()
        })
    }

    fn is_pending(&self) -> bool {
        self.coordinator.current().is_pending()
    }

    /// Always `false`: a rolling appender is never "finished", only its
    /// individual files are.
    fn is_finished(&self) -> bool {
        false
    }

    fn finish(&self) {
        self.coordinator.current().finish();
    }

    fn close(&self) -> Result<()> {
        self.coordinator.current().close()
    }

    fn path(&self) -> PathBuf {
        self.coordinator.current().path()
    }

    fn usable_capacity(&self) -> u64 {
        self.coordinator.usable_capacity()
    }

    fn has_available_capacity(&self) -> bool {
        self.coordinator.current().has_available_capacity()
    }
}
