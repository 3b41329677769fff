//! Single-writer contention protocol that rolls from an exhausted file to a
//! freshly minted one, while every other writer simply observes the new
//! current file.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::Result;
use crate::facade::Appender;
use crate::provider::FileProvider;

/// Optional hooks fired at each stage of a roll. Any panic or error inside a
/// listener is caught and logged, never propagated — a misbehaving listener
/// must not be able to wedge rolling.
#[derive(Default)]
pub struct RollListeners {
    /// Fired once the successor file has been created on disk.
    pub on_file_created: Option<Box<dyn Fn(&std::path::Path) + Send + Sync>>,
    /// Fired once the successor file has been published as current.
    pub on_file_mapped: Option<Box<dyn Fn(&std::path::Path) + Send + Sync>>,
    /// Fired once the outgoing file's pending writes have all drained.
    pub on_file_complete: Option<Box<dyn Fn(&std::path::Path) + Send + Sync>>,
    /// Fired once the outgoing file has been closed.
    pub on_file_closed: Option<Box<dyn Fn(&std::path::Path) + Send + Sync>>,
}

impl fmt::Debug for RollListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollListeners")
            .field("on_file_created", &self.on_file_created.is_some())
            .field("on_file_mapped", &self.on_file_mapped.is_some())
            .field("on_file_complete", &self.on_file_complete.is_some())
            .field("on_file_closed", &self.on_file_closed.is_some())
            .finish()
    }
}

fn fire(name: &'static str, listener: &Option<Box<dyn Fn(&std::path::Path) + Send + Sync>>, path: &std::path::Path) {
    let Some(listener) = listener else { return };
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(path)));
    if outcome.is_err() {
        tracing::error!(listener = name, path = ?path, "roll listener panicked; ignoring");
    }
}

/// Owns the current appender and coordinates exactly one thread rolling to
/// the next file when it exhausts, while every other writer just observes
/// the swap.
pub struct RollingCoordinator {
    current: ArcSwap<Box<dyn Appender>>,
    allocating: AtomicBool,
    provider: FileProvider,
    async_close: bool,
    yield_on_allocate_contention: bool,
    listeners: Arc<RollListeners>,
}

impl fmt::Debug for RollingCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollingCoordinator")
            .field("current_path", &self.current.load().path())
            .field("allocating", &self.allocating.load(Ordering::Relaxed))
            .field("async_close", &self.async_close)
            .finish()
    }
}

impl RollingCoordinator {
    /// Build a coordinator starting from `initial`, rolling to files minted
    /// by `provider` as each one exhausts.
    pub fn new(
        initial: Box<dyn Appender>,
        provider: FileProvider,
        async_close: bool,
        yield_on_allocate_contention: bool,
        listeners: RollListeners,
    ) -> Arc<Self> {
        Arc::new(Self {
            current: ArcSwap::new(Arc::new(initial)),
            allocating: AtomicBool::new(false),
            provider,
            async_close,
            yield_on_allocate_contention,
            listeners: Arc::new(listeners),
        })
    }

    /// The appender currently considered live.
    pub fn current(&self) -> Arc<Box<dyn Appender>> {
        self.current.load_full()
    }

    /// Usable payload capacity per file, derived from the current file
    /// (every file minted by one provider shares the same capacity).
    pub fn usable_capacity(&self) -> u64 {
        self.current().usable_capacity()
    }

    fn maybe_yield(&self) {
        if self.yield_on_allocate_contention {
            std::thread::yield_now();
        }
    }

    /// Return a file with available capacity, rolling if necessary.
    ///
    /// Implements the five-step algorithm from the design: fast-path return
    /// if the current file still has room; otherwise spin-acquire the
    /// allocating flag (a non-blocking mutex); re-check whether someone else
    /// already rolled while we were spinning; and if not, become the roller
    /// ourselves. Propagates a provider failure (e.g. the filesystem is out
    /// of space) to the caller instead of handing back the exhausted current
    /// file, which would otherwise make the rolling facade's retry loop spin
    /// forever on a failure that will never clear itself.
    pub fn file_for_write(&self) -> Result<Arc<Box<dyn Appender>>> {
        let cur = self.current.load_full();
        if cur.has_available_capacity() {
            return Ok(cur);
        }

        loop {
            if self
                .allocating
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
            self.maybe_yield();
            let latest = self.current.load_full();
            if !Arc::ptr_eq(&latest, &cur) {
                // Someone else already rolled; no need to become the roller.
                return Ok(latest);
            }
        }

        // We hold the allocating flag. Re-check: the roll may have
        // completed between our fast-path load and acquiring the flag.
        let latest = self.current.load_full();
        if !Arc::ptr_eq(&latest, &cur) {
            self.allocating.store(false, Ordering::Release);
            return Ok(latest);
        }

        let next = match self.provider.next() {
            Ok(next) => next,
            Err(error) => {
                tracing::error!(%error, "failed to allocate next file for roll");
                self.allocating.store(false, Ordering::Release);
                return Err(error);
            }
        };
        fire("fileCreated", &self.listeners.on_file_created, &next.path());

        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));
        fire("fileMapped", &self.listeners.on_file_mapped, &next.path());

        let outgoing = Arc::clone(&cur);
        if self.async_close {
            let listeners = Arc::clone(&self.listeners);
            let yield_on_contention = self.yield_on_allocate_contention;
            std::thread::spawn(move || close_outgoing(&outgoing, &listeners, yield_on_contention));
        } else {
            close_outgoing(&outgoing, &self.listeners, self.yield_on_allocate_contention);
        }

        self.allocating.store(false, Ordering::Release);
        Ok(next)
    }
}

/// Spin-wait until the outgoing appender's writes have all drained, then
/// close it. Run either inline or on a detached worker depending on
/// `async_close`; either way the coordinator never joins it, it only needs
/// the final `close()` to observe `W = N`.
fn close_outgoing(appender: &dyn Appender, listeners: &RollListeners, yield_on_contention: bool) {
    while appender.is_pending() {
        if yield_on_contention {
            std::thread::yield_now();
        }
    }
    fire("fileComplete", &listeners.on_file_complete, &appender.path());
    if let Err(error) = appender.close() {
        tracing::error!(%error, path = ?appender.path(), "failed to close rolled-out appender");
    }
    fire("fileClosed", &listeners.on_file_closed, &appender.path());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::LocalCounters;
    use crate::appender::SingleFileAppender;
    use crate::provider::Variant;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc as StdArc;
    use std::thread;

    fn provider(dir: &std::path::Path, capacity: u64) -> FileProvider {
        FileProvider::new(dir, "roll-", ".bin", capacity, false, Variant::Local)
    }

    #[test]
    fn single_roll_under_concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let initial = SingleFileAppender::<LocalCounters>::create(
            dir.path().join("roll-000.bin"),
            32,
            false,
        )
        .unwrap();
        let created = StdArc::new(AtomicUsize::new(0));
        let created_counter = StdArc::clone(&created);
        let listeners = RollListeners {
            on_file_created: Some(Box::new(move |_| {
                created_counter.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        };
        let coordinator = RollingCoordinator::new(
            Box::new(initial),
            provider(dir.path(), 32),
            false,
            true,
            listeners,
        );

        let record = [0u8; 8];
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = StdArc::clone(&coordinator);
                thread::spawn(move || loop {
                    let current = coordinator.file_for_write().unwrap();
                    if current.write(&record).unwrap().is_some() {
                        break;
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(created.load(Ordering::SeqCst), 1);
    }
}
