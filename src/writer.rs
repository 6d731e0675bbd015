//! Table Writer
//!
//! Background worker that drains a transaction log into a target table.
//!
//! ## Responsibilities
//! - Commit pending transactions in batches of `WriterConfig::batch_size`
//! - Requeue whatever a failed batch did not apply, inserts as replaces
//! - Retry transient (I/O) failures after `retry_delay_ms`
//! - Drop single transactions the target rejects for integrity reasons
//! - `flush()` blocks until nothing is pending or in flight
//!
//! ## Lock Order
//! `progress` → log. The worker never holds `progress` while waiting on
//! the log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::config::WriterConfig;
use crate::error::{Result, TableError};
use crate::table::Table;
use crate::transaction::{Transaction, TransactionFlags, TransactionLog};

/// Counters describing what a writer has done so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Transactions applied to the target
    pub written: u64,
    /// Transactions put back after a failed batch
    pub requeued: u64,
    /// Transactions discarded because the target rejected them
    pub dropped: u64,
    /// Batches that failed and were retried
    pub failures: u64,
}

/// Drains a `TransactionLog` into a target table on a background thread
pub struct TableWriter {
    shared: Arc<WriterShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct WriterShared {
    log: Arc<TransactionLog>,
    target: Arc<dyn Table>,
    config: WriterConfig,
    progress: Mutex<Progress>,
    /// Signalled after every batch and when the worker stops
    idle: Condvar,
    stop: AtomicBool,
}

#[derive(Default)]
struct Progress {
    in_flight: usize,
    running: bool,
    stats: WriterStats,
}

enum BatchOutcome {
    /// Nothing was pending
    Idle,
    /// The batch was handled (possibly dropping rejected transactions)
    Written,
    /// The batch failed and was requeued
    Retry(TableError),
}

impl WriterShared {
    fn write_batch(&self) -> BatchOutcome {
        let batch = {
            let mut progress = self.progress.lock();
            let batch = self.log.dequeue_many(self.config.batch_size);
            progress.in_flight = batch.len();
            batch
        };
        if batch.is_empty() {
            return BatchOutcome::Idle;
        }

        let mut stats = WriterStats::default();
        let flags = TransactionFlags::ALLOW_REQUEUE | TransactionFlags::THROW_ERRORS;
        let outcome = match self.target.commit(&batch, flags) {
            Ok(written) => {
                stats.written += written as u64;
                tracing::trace!("Wrote {} transactions to {}", written, self.target.name());
                BatchOutcome::Written
            }
            Err(TableError::Commit { applied, source }) => {
                let applied = applied.min(batch.len());
                stats.written += applied as u64;
                let rest = &batch[applied..];

                if source.is_transient() {
                    stats.requeued += self.requeue(rest) as u64;
                    stats.failures += 1;
                    BatchOutcome::Retry(*source)
                } else {
                    if let Some((rejected, remaining)) = rest.split_first() {
                        tracing::error!(
                            "Dropping {:?} of row {} rejected by {}: {}",
                            rejected.kind(),
                            rejected.id(),
                            self.target.name(),
                            source
                        );
                        stats.dropped += 1;
                        stats.requeued += self.requeue(remaining) as u64;
                    }
                    BatchOutcome::Written
                }
            }
            Err(e) => {
                stats.requeued += self.requeue(&batch) as u64;
                stats.failures += 1;
                BatchOutcome::Retry(e)
            }
        };

        {
            let mut progress = self.progress.lock();
            progress.in_flight = 0;
            progress.stats.written += stats.written;
            progress.stats.requeued += stats.requeued;
            progress.stats.dropped += stats.dropped;
            progress.stats.failures += stats.failures;
        }
        self.idle.notify_all();
        outcome
    }

    fn requeue(&self, transactions: &[Transaction]) -> usize {
        if transactions.is_empty() {
            return 0;
        }
        let report = self.log.requeue(true, transactions.iter().cloned());
        tracing::debug!(
            "Requeued {} transactions for {} ({} converted to replace)",
            report.requeued,
            self.target.name(),
            report.converted
        );
        report.requeued
    }

    fn run(&self) {
        let idle_wait = Duration::from_millis(self.config.idle_wait_ms.max(1));
        let retry_delay = Duration::from_millis(self.config.retry_delay_ms);
        tracing::debug!("Writer for {} started", self.target.name());

        while !self.stop.load(Ordering::SeqCst) {
            match self.write_batch() {
                BatchOutcome::Idle => {
                    self.log.wait(idle_wait);
                }
                BatchOutcome::Written => {}
                BatchOutcome::Retry(e) => {
                    tracing::warn!(
                        "Writing to {} failed, retrying in {:?}: {}",
                        self.target.name(),
                        retry_delay,
                        e
                    );
                    let mut progress = self.progress.lock();
                    if !self.stop.load(Ordering::SeqCst) {
                        self.idle.wait_for(&mut progress, retry_delay);
                    }
                }
            }
        }

        self.progress.lock().running = false;
        self.idle.notify_all();
        tracing::debug!("Writer for {} stopped", self.target.name());
    }
}

impl TableWriter {
    /// Spawn a writer draining `log` into `target`
    pub fn start(log: Arc<TransactionLog>, target: Arc<dyn Table>, config: WriterConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(TableError::Config(
                "writer batch size must be at least 1".to_string(),
            ));
        }

        let name = target.name();
        let shared = Arc::new(WriterShared {
            log,
            target,
            config,
            progress: Mutex::new(Progress {
                running: true,
                ..Progress::default()
            }),
            idle: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("tabula-writer-{}", name))
                .spawn(move || shared.run())?
        };

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn log(&self) -> Arc<TransactionLog> {
        Arc::clone(&self.shared.log)
    }

    pub fn is_running(&self) -> bool {
        self.shared.progress.lock().running
    }

    /// Transactions queued or currently being written
    pub fn pending(&self) -> usize {
        let progress = self.shared.progress.lock();
        progress.in_flight + self.shared.log.count()
    }

    pub fn stats(&self) -> WriterStats {
        self.shared.progress.lock().stats
    }

    /// Block until every pending transaction reached the target.
    ///
    /// A stopped writer drains on the calling thread instead and reports the
    /// first failure.
    pub fn flush(&self) -> Result<()> {
        let poll = Duration::from_millis(self.shared.config.idle_wait_ms.max(1));
        {
            let mut progress = self.shared.progress.lock();
            while progress.running && (progress.in_flight > 0 || !self.shared.log.is_empty()) {
                self.shared.log.pulse();
                self.shared.idle.wait_for(&mut progress, poll);
            }
            if progress.running {
                return Ok(());
            }
        }
        self.drain_inline()
    }

    fn drain_inline(&self) -> Result<()> {
        loop {
            match self.shared.write_batch() {
                BatchOutcome::Idle => return Ok(()),
                BatchOutcome::Written => continue,
                BatchOutcome::Retry(e) => return Err(e),
            }
        }
    }

    /// Flush, then stop the worker thread
    pub fn close(&self) -> Result<()> {
        let flushed = self.flush();
        self.stop();
        flushed
    }

    fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.log.pulse();
        self.shared.idle.notify_all();

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("Writer thread for {} panicked", self.shared.target.name());
                self.shared.progress.lock().running = false;
            }
        }
    }
}

impl Drop for TableWriter {
    fn drop(&mut self) {
        if self.worker.lock().is_none() {
            return;
        }
        let pending = self.pending();
        if pending > 0 {
            tracing::warn!(
                "Writer for {} dropped with {} unwritten transactions",
                self.shared.target.name(),
                pending
            );
        }
        self.stop();
    }
}
