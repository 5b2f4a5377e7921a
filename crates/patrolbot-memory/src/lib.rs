//! `patrolbot-memory` – telemetry history.
//!
//! Every accepted snapshot is appended to a local SQLite store so the bridge
//! can recover its last known state after a restart.
//!
//! # Modules
//!
//! - [`history`] – [`SqliteHistory`][history::SqliteHistory], the
//!   [`TelemetrySink`][history::TelemetrySink] seam, and
//!   [`HistoryError`][history::HistoryError].
//! - [`queue`] – [`PersistQueue`][queue::PersistQueue]: a bounded,
//!   drop-oldest FIFO drained by a dedicated writer thread so ingest never
//!   waits on disk.

pub mod history;
pub mod queue;

pub use history::{HistoryError, SqliteHistory, TelemetrySink};
pub use queue::{DEFAULT_QUEUE_CAPACITY, PersistQueue};
