//! Plain builder for assembling an [`Appender`], in the style of
//! `ComediStreamWriterBuilder`: a struct of `with_*` setters and a `build`,
//! not a fluent DSL. The deep fluent configuration surface this is
//! distilled from is explicitly out of scope; what's needed is just enough
//! surface for an embedding application to wire up a rolling or bounded
//! appender from its own config.

use std::path::PathBuf;

use crate::appender::SingleFileAppender;
use crate::counters::{LocalCounters, SharedCounters};
use crate::error::Result;
use crate::facade::Appender;
use crate::provider::{FileProvider, Variant};
use crate::roller::{RollingAppender, RollingCoordinator};

pub use crate::roller::RollListeners;

/// Rolling-specific configuration, only consulted when
/// [`AppendLogBuilder::with_roll`] has been called.
#[derive(Default)]
pub struct RollConfig {
    file_name_prefix: String,
    file_name_suffix: String,
    async_close: bool,
    yield_on_allocate_contention: bool,
    listeners: RollListeners,
}

impl RollConfig {
    /// Start from defaults: no prefix/suffix, synchronous close, busy-spin
    /// on allocation contention.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix prepended to every generated file name.
    pub fn with_file_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_name_prefix = prefix.into();
        self
    }

    /// Suffix appended to every generated file name.
    pub fn with_file_name_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.file_name_suffix = suffix.into();
        self
    }

    /// Close the outgoing file on a detached worker instead of inline
    /// during the roll.
    pub fn with_async_close(mut self, async_close: bool) -> Self {
        self.async_close = async_close;
        self
    }

    /// Yield the thread while spinning on the allocating flag / draining
    /// pending writes, instead of busy-spinning.
    pub fn with_yield_on_allocate_contention(mut self, yield_on_contention: bool) -> Self {
        self.yield_on_allocate_contention = yield_on_contention;
        self
    }

    /// Install the roll lifecycle listeners.
    pub fn with_listeners(mut self, listeners: RollListeners) -> Self {
        self.listeners = listeners;
        self
    }
}

/// Builds a bounded or rolling [`Appender`] from a handful of options:
/// location, per-file capacity, whether to zero-fill new files, whether the
/// counters should be shared across processes, and (if rolling is enabled)
/// the roll sub-configuration.
pub struct AppendLogBuilder {
    location: PathBuf,
    capacity: u64,
    fill_with_zeros: bool,
    multi_process: bool,
    roll: Option<RollConfig>,
}

impl AppendLogBuilder {
    /// Start building an appender rooted at `location` (a directory when
    /// rolling is enabled, a single file path otherwise) with `capacity`
    /// usable bytes per file.
    pub fn new(location: impl Into<PathBuf>, capacity: u64) -> Self {
        Self {
            location: location.into(),
            capacity,
            fill_with_zeros: false,
            multi_process: false,
            roll: None,
        }
    }

    /// Zero-fill new files explicitly rather than relying on the
    /// filesystem's sparse-extend behavior.
    pub fn with_fill_with_zeros(mut self, fill_with_zeros: bool) -> Self {
        self.fill_with_zeros = fill_with_zeros;
        self
    }

    /// Use the shared-header variant so other processes mapping the same
    /// file see the same counters.
    pub fn with_multi_process(mut self, multi_process: bool) -> Self {
        self.multi_process = multi_process;
        self
    }

    /// Enable rolling with the given sub-configuration.
    pub fn with_roll(mut self, roll: RollConfig) -> Self {
        self.roll = Some(roll);
        self
    }

    /// Construct the appender. Returns a bounded appender if rolling was
    /// never enabled, otherwise a [`RollingAppender`] backed by a
    /// [`RollingCoordinator`].
    pub fn build(self) -> Result<Box<dyn Appender>> {
        match self.roll {
            None => {
                if self.multi_process {
                    let appender = SingleFileAppender::<SharedCounters>::create_shared(
                        self.location,
                        self.capacity,
                        self.fill_with_zeros,
                    )?;
                    Ok(Box::new(appender))
                } else {
                    let appender = SingleFileAppender::<LocalCounters>::create(
                        self.location,
                        self.capacity,
                        self.fill_with_zeros,
                    )?;
                    Ok(Box::new(appender))
                }
            }
            Some(roll) => {
                let variant = if self.multi_process {
                    Variant::Shared
                } else {
                    Variant::Local
                };
                let provider = FileProvider::new(
                    self.location,
                    roll.file_name_prefix.clone(),
                    roll.file_name_suffix.clone(),
                    self.capacity,
                    self.fill_with_zeros,
                    variant,
                );
                let initial = provider.next()?;
                let coordinator = RollingCoordinator::new(
                    initial,
                    provider,
                    roll.async_close,
                    roll.yield_on_allocate_contention,
                    roll.listeners,
                );
                Ok(Box::new(RollingAppender::new(coordinator)))
            }
        }
    }
}

/// Shorthand for a bounded, local, freshly created appender — equivalent to
/// `AppendLogBuilder::new(path, capacity).with_fill_with_zeros(fill_with_zeros).build()`
/// without the rolling machinery.
pub fn map_new_file(
    path: impl Into<PathBuf>,
    capacity: u64,
    fill_with_zeros: bool,
) -> Result<SingleFileAppender<LocalCounters>> {
    SingleFileAppender::<LocalCounters>::create(path, capacity, fill_with_zeros)
}

/// Open an already-created shared-variant file directly, without going
/// through the builder.
pub fn map_existing_file(path: impl Into<PathBuf>) -> Result<SingleFileAppender<SharedCounters>> {
    SingleFileAppender::<SharedCounters>::open_shared(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_builder_rejects_second_write_over_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let appender = AppendLogBuilder::new(dir.path().join("log.bin"), 16)
            .build()
            .unwrap();
        assert_eq!(appender.write(&[0u8; 16]).unwrap(), Some(0));
        assert_eq!(appender.write(&[0u8; 1]).unwrap(), None);
    }

    #[test]
    fn rolling_builder_rolls_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let appender = AppendLogBuilder::new(dir.path(), 16)
            .with_roll(RollConfig::new().with_file_name_prefix("log-"))
            .build()
            .unwrap();

        for _ in 0..3 {
            assert!(appender.write(&[0u8; 8]).unwrap().is_some());
        }
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn rolling_builder_rejects_oversized_record() {
        let dir = tempfile::tempdir().unwrap();
        let appender = AppendLogBuilder::new(dir.path(), 16)
            .with_roll(RollConfig::new())
            .build()
            .unwrap();
        let err = appender.write(&[0u8; 17]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::AppendLogError::CapacityExceeded { .. }
        ));
    }
}
