//! Bounded persistence queue.
//!
//! Telemetry ingest must never wait on disk.  [`PersistQueue::enqueue`] pushes
//! the snapshot into a fixed-capacity FIFO and returns immediately; a
//! dedicated writer thread drains the FIFO into a [`TelemetrySink`].
//!
//! When the FIFO is full the *oldest* pending snapshot is discarded, so the
//! most recent telemetry always reaches the store.  Append failures are logged
//! and counted, never surfaced to the producer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use patrolbot_types::RobotStatusSnapshot;
use tracing::{debug, error};

use crate::history::{HistoryError, TelemetrySink};

/// Default number of snapshots buffered before drop-oldest kicks in.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct QueueState {
    pending: VecDeque<RobotStatusSnapshot>,
    closed: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    ready: Condvar,
    capacity: usize,
    dropped: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

/// Handle to the history writer thread.
pub struct PersistQueue {
    shared: Arc<Shared>,
    writer: Mutex<Option<JoinHandle<Box<dyn TelemetrySink>>>>,
}

impl PersistQueue {
    /// Start the writer thread over `sink`.
    pub fn spawn(sink: Box<dyn TelemetrySink>, capacity: usize) -> Result<Self, HistoryError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                pending: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            written: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let worker = Arc::clone(&shared);
        let writer = std::thread::Builder::new()
            .name("patrolbot-history".to_string())
            .spawn(move || write_loop(worker, sink))?;

        Ok(Self {
            shared,
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Queue `snapshot` for persistence without blocking.
    ///
    /// Returns `false` if an older pending snapshot had to be discarded to
    /// make room, or if the queue has already been shut down.
    pub fn enqueue(&self, snapshot: RobotStatusSnapshot) -> bool {
        let mut state = self.shared.state.lock();
        if state.closed {
            debug!("history queue closed; snapshot discarded");
            return false;
        }

        let mut kept_all = true;
        if state.pending.len() >= self.shared.capacity {
            state.pending.pop_front();
            let total = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(dropped_total = total, "history queue full; oldest snapshot dropped");
            kept_all = false;
        }
        state.pending.push_back(snapshot);
        drop(state);

        self.shared.ready.notify_one();
        kept_all
    }

    /// Snapshots discarded by the drop-oldest policy so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Snapshots successfully written so far.
    pub fn written(&self) -> u64 {
        self.shared.written.load(Ordering::Relaxed)
    }

    /// Appends that failed at the sink so far.
    pub fn failed(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }

    /// Snapshots waiting for the writer.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Drain whatever is pending, stop the writer, and hand the sink back.
    ///
    /// Blocks until the writer has flushed.  Only the first call returns the
    /// sink; later calls return `None`.
    pub fn shutdown(&self) -> Option<Box<dyn TelemetrySink>> {
        self.close();
        let handle = self.writer.lock().take()?;
        match handle.join() {
            Ok(sink) => Some(sink),
            Err(_) => {
                error!("history writer panicked");
                None
            }
        }
    }

    fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.ready.notify_all();
    }
}

impl Drop for PersistQueue {
    fn drop(&mut self) {
        self.close();
    }
}

fn write_loop(shared: Arc<Shared>, mut sink: Box<dyn TelemetrySink>) -> Box<dyn TelemetrySink> {
    loop {
        let next = {
            let mut state = shared.state.lock();
            while state.pending.is_empty() && !state.closed {
                shared.ready.wait(&mut state);
            }
            match state.pending.pop_front() {
                Some(snapshot) => snapshot,
                None => break,
            }
        };

        match sink.append(&next) {
            Ok(()) => {
                shared.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "failed to persist telemetry snapshot");
            }
        }
    }
    debug!("history writer stopped");
    sink
}
