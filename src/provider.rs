//! Produces a stream of freshly created, freshly mapped appenders on
//! demand, named from a wall-clock timestamp with a monotonic tiebreaker so
//! concurrent rolls (and concurrent processes, for the shared variant)
//! never collide.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::appender::SingleFileAppender;
use crate::counters::{LocalCounters, SharedCounters};
use crate::error::{AppendLogError, Result};
use crate::facade::Appender;

/// Which counter-storage variant a [`FileProvider`] mints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Counters in process memory; single-process only.
    Local,
    /// Counters in the mapped file's header; visible across processes.
    Shared,
}

/// Mints new [`SingleFileAppender`]s by name, used exclusively by the
/// [`crate::roller::RollingCoordinator`].
#[derive(Debug)]
pub struct FileProvider {
    directory: PathBuf,
    file_name_prefix: String,
    file_name_suffix: String,
    capacity: u64,
    fill_with_zeros: bool,
    variant: Variant,
    tiebreaker: AtomicU64,
}

impl FileProvider {
    /// Build a provider that creates files under `directory`, named
    /// `{prefix}{millis}-{tiebreaker}{suffix}`.
    pub fn new(
        directory: impl Into<PathBuf>,
        file_name_prefix: impl Into<String>,
        file_name_suffix: impl Into<String>,
        capacity: u64,
        fill_with_zeros: bool,
        variant: Variant,
    ) -> Self {
        Self {
            directory: directory.into(),
            file_name_prefix: file_name_prefix.into(),
            file_name_suffix: file_name_suffix.into(),
            capacity,
            fill_with_zeros,
            variant,
            tiebreaker: AtomicU64::new(0),
        }
    }

    /// Produce the next fresh appender. Retries with the next tiebreaker
    /// value on a name collision; propagates any other I/O failure.
    pub fn next(&self) -> Result<Box<dyn Appender>> {
        loop {
            let path = self.directory.join(self.candidate_name());
            let created = match self.variant {
                Variant::Local => {
                    SingleFileAppender::<LocalCounters>::create(&path, self.capacity, self.fill_with_zeros)
                        .map(|a| Box::new(a) as Box<dyn Appender>)
                }
                Variant::Shared => SingleFileAppender::<SharedCounters>::create_shared(
                    &path,
                    self.capacity,
                    self.fill_with_zeros,
                )
                .map(|a| Box::new(a) as Box<dyn Appender>),
            };
            match created {
                Ok(appender) => return Ok(appender),
                Err(AppendLogError::FileExists(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn candidate_name(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let tiebreaker = self.tiebreaker.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}{millis}-{tiebreaker:04}{}",
            self.file_name_prefix, self.file_name_suffix
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_names_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileProvider::new(dir.path(), "log-", ".bin", 64, false, Variant::Local);
        let a = provider.next().unwrap();
        let b = provider.next().unwrap();
        assert_ne!(a.path(), b.path());
    }
}
