//! Telemetry history store.
//!
//! Appends every [`RobotStatusSnapshot`] to a local SQLite database and
//! answers "what was the last snapshot?" for cold-start recovery.
//!
//! # Storage layout
//!
//! A single table `robot_status` is created (if it does not already exist):
//!
//! | column        | type    | description                               |
//! |---------------|---------|-------------------------------------------|
//! | id            | INTEGER | Arrival sequence (autoincrement)          |
//! | observed_at   | TEXT    | RFC-3339 arrival time (UTC)               |
//! | battery_level | INTEGER | Percent, `0..=100`                        |
//! | temperature   | REAL    | Degrees Celsius                           |
//! | is_charging   | INTEGER | `0` / `1`                                 |
//! | x, y          | REAL    | Map position, each in `[0, 100]`          |
//! | mode          | TEXT    | Operating mode label                      |
//!
//! "Latest" means highest `id`, i.e. last to arrive, regardless of
//! `observed_at`.
//!
//! # Example
//!
//! ```rust
//! use patrolbot_memory::history::{SqliteHistory, TelemetrySink};
//! use patrolbot_types::RobotStatusSnapshot;
//!
//! let mut history = SqliteHistory::open_in_memory().unwrap();
//! history.append(&RobotStatusSnapshot::default()).unwrap();
//! assert!(history.find_latest().unwrap().is_some());
//! ```

use chrono::{DateTime, Utc};
use patrolbot_types::{PatrolError, Position, RobotStatusSnapshot};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from history operations.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Stored timestamp is not RFC-3339: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("Failed to start history writer: {0}")]
    Writer(#[from] std::io::Error),
}

impl From<HistoryError> for PatrolError {
    fn from(e: HistoryError) -> Self {
        PatrolError::Persistence(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sink trait
// ─────────────────────────────────────────────────────────────────────────────

/// Durable append + latest-snapshot lookup.
///
/// Implementations are moved onto the history writer thread, hence
/// `Send + 'static`.
pub trait TelemetrySink: Send + 'static {
    fn append(&mut self, snapshot: &RobotStatusSnapshot) -> Result<(), HistoryError>;

    fn find_latest(&self) -> Result<Option<RobotStatusSnapshot>, HistoryError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteHistory
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed [`TelemetrySink`].
pub struct SqliteHistory {
    conn: Connection,
}

impl SqliteHistory {
    /// Open (or create) a persistent database at `path`.  `":memory:"` opens
    /// a throwaway in-memory database.
    pub fn open(path: &str) -> Result<Self, HistoryError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Self::open(":memory:")
    }

    fn init_schema(&self) -> Result<(), HistoryError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS robot_status (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                observed_at   TEXT    NOT NULL,
                battery_level INTEGER NOT NULL,
                temperature   REAL    NOT NULL,
                is_charging   INTEGER NOT NULL,
                x             REAL    NOT NULL,
                y             REAL    NOT NULL,
                mode          TEXT    NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Number of stored snapshots.
    #[cfg(test)]
    fn len(&self) -> Result<usize, HistoryError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM robot_status", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    #[cfg(test)]
    fn is_empty(&self) -> Result<bool, HistoryError> {
        Ok(self.len()? == 0)
    }
}

impl TelemetrySink for SqliteHistory {
    fn append(&mut self, snapshot: &RobotStatusSnapshot) -> Result<(), HistoryError> {
        self.conn.execute(
            "INSERT INTO robot_status
                 (observed_at, battery_level, temperature, is_charging, x, y, mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                snapshot.observed_at.to_rfc3339(),
                snapshot.battery_level,
                snapshot.temperature,
                snapshot.is_charging,
                snapshot.position.x,
                snapshot.position.y,
                snapshot.mode,
            ],
        )?;
        Ok(())
    }

    fn find_latest(&self) -> Result<Option<RobotStatusSnapshot>, HistoryError> {
        let row = self
            .conn
            .query_row(
                "SELECT observed_at, battery_level, temperature, is_charging, x, y, mode
                 FROM robot_status
                 ORDER BY id DESC
                 LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u8>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((ts, battery_level, temperature, is_charging, x, y, mode)) = row else {
            return Ok(None);
        };
        let observed_at = DateTime::parse_from_rfc3339(&ts)?.with_timezone(&Utc);

        Ok(Some(RobotStatusSnapshot {
            battery_level,
            temperature,
            is_charging,
            position: Position { x, y },
            mode,
            observed_at,
        }))
    }
}
