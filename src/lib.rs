//! Lock-free, multi-writer append logging into memory-mapped files.
//!
//! Producer threads — and, with the shared-header variant, producer
//! processes — concurrently append variable-length records into a
//! pre-sized, memory-mapped file. Each writer atomically reserves a
//! disjoint byte range via a single CAS loop on an offset counter, copies
//! its bytes in, and marks completion on a second counter. When a file
//! fills, an optional rolling coordinator elects one writer to close it and
//! map a successor, so the other writers simply retry against a file that
//! is already there or about to be.
//!
//! # Layout
//!
//! - [`region`] — the memory-mapped byte region.
//! - [`counters`] — the `(N, W, F)` counter triple, local or shared-header.
//! - [`appender`] — the single-file reservation/completion protocol.
//! - [`provider`] — mints freshly created, freshly mapped appenders.
//! - [`roller`] — the single-writer rolling coordinator.
//! - [`facade`] — the `Appender` contract and its bounded/rolling impls.
//! - [`builder`] — the configuration builder embedding applications use.
//!
//! # Example
//!
//! ```
//! use daq_appendlog::builder::map_new_file;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempfile::tempdir()?;
//! let appender = map_new_file(dir.path().join("log.bin"), 1024, false)?;
//! let offset = appender.write(b"hello");
//! assert_eq!(offset, Some(0));
//! # Ok(())
//! # }
//! ```

pub mod appender;
pub mod builder;
pub mod counters;
pub mod error;
pub mod facade;
pub mod provider;
pub mod region;
pub mod roller;

pub use appender::{ByteOrder, SingleFileAppender, NULL_OFFSET};
pub use builder::{map_existing_file, map_new_file, AppendLogBuilder, RollConfig};
pub use counters::{LocalCounters, SharedCounters, HEADER_SIZE};
pub use error::{AppendLogError, Result};
pub use facade::{Appender, BoundedAppender, RollingAppender};
pub use provider::{FileProvider, Variant};
pub use roller::{RollListeners, RollingCoordinator};
