//! Transaction log
//!
//! Ordered queue of pending transactions for one table.
//!
//! ## Coalescing
//! - a newer `Updated` removes the pending `Updated` for the same id
//! - a `Deleted` cancels the pending `Updated` for the same id
//! - a `Replaced` cancels pending updated/deleted/replaced entries for the id,
//!   and inserts that already carry the id
//! - an `Updated` arriving while a `Replaced` is pending becomes a `Replaced`
//!
//! Dequeue order equals append order modulo these rules: the log preserves
//! the final outcome per id, not every intermediate event.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, TableError};
use crate::row::{Row, RowLayout};
use crate::search::{ResultOption, Search};
use crate::table::Table;

use super::{Transaction, TransactionType};

/// Outcome of a `TransactionLog::requeue` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequeueReport {
    /// Entries put back at the head of the log
    pub requeued: usize,
    /// Inserts with an identifier that were turned into replaces
    pub converted: usize,
    /// Inserts without an identifier, requeued unchanged
    pub unassigned_inserts: usize,
    /// Entries dropped because a newer pending entry decides the outcome
    pub superseded: usize,
}

/// Deduplicating FIFO of transactions with wait/pulse support
pub struct TransactionLog {
    layout: Arc<RowLayout>,
    state: Mutex<LogState>,
    signal: Condvar,
}

/// Entries keyed by position; requeued entries get positions below the head.
#[derive(Default)]
struct LogState {
    entries: BTreeMap<i64, Transaction>,
    next_tail: i64,
    next_head: i64,
    updated: HashMap<i64, i64>,
    deleted: HashMap<i64, i64>,
    replaced: HashMap<i64, i64>,
    /// (id, position) of pending inserts
    inserted: BTreeSet<(i64, i64)>,
    pulses: u64,
}

impl LogState {
    fn push_tail(&mut self, transaction: Transaction) -> i64 {
        let position = self.next_tail;
        self.next_tail += 1;
        self.entries.insert(position, transaction);
        position
    }

    fn push_head(&mut self, transaction: Transaction) -> i64 {
        self.next_head -= 1;
        let position = self.next_head;
        self.entries.insert(position, transaction);
        position
    }

    /// Remove a pending entry through one of the id indices
    fn cancel(&mut self, kind: TransactionType, id: i64) -> Option<Transaction> {
        let position = self.index_mut(kind)?.remove(&id)?;
        self.entries.remove(&position)
    }

    /// Remove every pending insert that already carries `id`
    fn cancel_inserts(&mut self, id: i64) {
        let positions: Vec<i64> = self
            .inserted
            .range((id, i64::MIN)..=(id, i64::MAX))
            .map(|(_, position)| *position)
            .collect();
        for position in positions {
            self.inserted.remove(&(id, position));
            self.entries.remove(&position);
        }
    }

    fn index_mut(&mut self, kind: TransactionType) -> Option<&mut HashMap<i64, i64>> {
        match kind {
            TransactionType::Updated => Some(&mut self.updated),
            TransactionType::Deleted => Some(&mut self.deleted),
            TransactionType::Replaced => Some(&mut self.replaced),
            TransactionType::Inserted => None,
        }
    }

    fn register(&mut self, position: i64, kind: TransactionType, id: i64) {
        match self.index_mut(kind) {
            Some(index) => {
                index.insert(id, position);
            }
            None => {
                self.inserted.insert((id, position));
            }
        }
    }

    /// Drop index entries that still point at a removed position
    fn unregister(&mut self, position: i64, transaction: &Transaction) {
        let id = transaction.id();
        match self.index_mut(transaction.kind()) {
            Some(index) => {
                if index.get(&id) == Some(&position) {
                    index.remove(&id);
                }
            }
            None => {
                self.inserted.remove(&(id, position));
            }
        }
    }

    fn pop_front(&mut self) -> Option<Transaction> {
        let (position, transaction) = self.entries.pop_first()?;
        self.unregister(position, &transaction);
        Some(transaction)
    }

    fn append(&mut self, transaction: Transaction) {
        let id = transaction.id();
        let transaction = match transaction.kind() {
            TransactionType::Inserted => transaction,
            TransactionType::Updated => {
                if self.cancel(TransactionType::Replaced, id).is_some() {
                    transaction.into_replaced()
                } else {
                    self.cancel(TransactionType::Updated, id);
                    transaction
                }
            }
            TransactionType::Deleted => {
                self.cancel(TransactionType::Updated, id);
                transaction
            }
            TransactionType::Replaced => {
                self.cancel(TransactionType::Updated, id);
                self.cancel(TransactionType::Deleted, id);
                self.cancel(TransactionType::Replaced, id);
                self.cancel_inserts(id);
                transaction
            }
        };

        let kind = transaction.kind();
        let position = self.push_tail(transaction);
        self.register(position, kind, id);
    }

    /// Whether a newer pending entry already decides the outcome for a
    /// requeued transaction
    fn supersedes(&self, transaction: &Transaction) -> bool {
        let id = transaction.id();
        let decided = self.replaced.contains_key(&id) || self.deleted.contains_key(&id);
        match transaction.kind() {
            TransactionType::Inserted => false,
            TransactionType::Updated => decided || self.updated.contains_key(&id),
            TransactionType::Replaced | TransactionType::Deleted => decided,
        }
    }
}

impl TransactionLog {
    /// Create an empty log for rows of the given layout
    pub fn new(layout: Arc<RowLayout>) -> Self {
        Self {
            layout,
            state: Mutex::new(LogState::default()),
            signal: Condvar::new(),
        }
    }

    /// Build the transactions that turn `target` rows into `source` rows.
    ///
    /// Ids only in `source` become inserts, ids in both become replaces and
    /// ids only in `target` become deletes.
    pub fn from_difference(layout: Arc<RowLayout>, source: &[Row], target: &[Row]) -> Result<Self> {
        let target_ids = target
            .iter()
            .map(|row| layout.row_id(row))
            .collect::<Result<Vec<i64>>>()?;
        let target_set: HashSet<i64> = target_ids.iter().copied().collect();

        let log = Self::new(Arc::clone(&layout));
        let mut source_set = HashSet::with_capacity(source.len());
        {
            let mut state = log.state.lock();
            for row in source {
                let id = layout.row_id(row)?;
                if id <= 0 {
                    return Err(TableError::InvalidId(id));
                }
                source_set.insert(id);

                let transaction = if target_set.contains(&id) {
                    Transaction::replaced(id, row.clone())?
                } else {
                    Transaction::inserted(id, row.clone())
                };
                state.append(transaction);
            }

            for id in target_ids.into_iter().filter(|id| !source_set.contains(id)) {
                state.append(Transaction::deleted(id)?);
            }
        }
        Ok(log)
    }

    /// `from_difference` over the full contents of two tables
    pub fn from_tables(source: &dyn Table, target: &dyn Table) -> Result<Self> {
        let all = Search::All;
        let option = ResultOption::none();
        let source_rows = source.get_rows_where(&all, &option)?;
        let target_rows = target.get_rows_where(&all, &option)?;
        Self::from_difference(target.layout(), &source_rows, &target_rows)
    }

    pub fn layout(&self) -> Arc<RowLayout> {
        Arc::clone(&self.layout)
    }

    // =========================================================================
    // Producers
    // =========================================================================

    /// Append a transaction, applying the coalescing rules, and wake waiters
    pub fn add(&self, transaction: Transaction) {
        self.state.lock().append(transaction);
        self.signal.notify_all();
    }

    /// Append several transactions in order
    pub fn add_range(&self, transactions: impl IntoIterator<Item = Transaction>) {
        {
            let mut state = self.state.lock();
            for transaction in transactions {
                state.append(transaction);
            }
        }
        self.signal.notify_all();
    }

    pub fn add_inserted(&self, row: Row) -> Result<()> {
        self.layout.validate(&row)?;
        let id = self.layout.row_id(&row)?;
        self.add(Transaction::inserted(id, row));
        Ok(())
    }

    pub fn add_updated(&self, row: Row) -> Result<()> {
        self.layout.validate(&row)?;
        let id = self.layout.row_id(&row)?;
        self.add(Transaction::updated(id, row)?);
        Ok(())
    }

    pub fn add_replaced(&self, row: Row) -> Result<()> {
        self.layout.validate(&row)?;
        let id = self.layout.row_id(&row)?;
        self.add(Transaction::replaced(id, row)?);
        Ok(())
    }

    pub fn add_deleted(&self, id: i64) -> Result<()> {
        self.add(Transaction::deleted(id)?);
        Ok(())
    }

    /// Put transactions back at the head of the log, keeping their order.
    ///
    /// With `replace_inserts`, inserts that already carry an identifier are
    /// requeued as replaces so a retry cannot create the row twice. Inserts
    /// without an identifier cannot be made safe and are requeued unchanged.
    pub fn requeue(
        &self,
        replace_inserts: bool,
        transactions: impl IntoIterator<Item = Transaction>,
    ) -> RequeueReport {
        let transactions: Vec<Transaction> = transactions.into_iter().collect();
        let mut report = RequeueReport::default();

        {
            let mut state = self.state.lock();
            for transaction in transactions.into_iter().rev() {
                let transaction = if replace_inserts
                    && transaction.kind() == TransactionType::Inserted
                {
                    if transaction.has_assigned_id() {
                        report.converted += 1;
                        transaction.into_replaced()
                    } else {
                        report.unassigned_inserts += 1;
                        tracing::warn!(
                            "Requeued insert into {} has no identifier; a retry may duplicate the row",
                            self.layout.name()
                        );
                        transaction
                    }
                } else {
                    transaction
                };

                if state.supersedes(&transaction) {
                    report.superseded += 1;
                    continue;
                }

                let (kind, id) = (transaction.kind(), transaction.id());
                let position = state.push_head(transaction);
                state.register(position, kind, id);
                report.requeued += 1;
            }
        }

        if report.requeued > 0 {
            self.signal.notify_all();
        }
        report
    }

    // =========================================================================
    // Consumers
    // =========================================================================

    /// Oldest pending transaction, left in place
    pub fn peek(&self) -> Option<Transaction> {
        self.state
            .lock()
            .entries
            .first_key_value()
            .map(|(_, transaction)| transaction.clone())
    }

    pub fn try_dequeue(&self) -> Option<Transaction> {
        self.state.lock().pop_front()
    }

    /// Remove the oldest transaction; fails with `EmptyLog` when none is pending
    pub fn dequeue(&self) -> Result<Transaction> {
        self.try_dequeue().ok_or(TableError::EmptyLog)
    }

    /// Remove up to `count` oldest transactions in one step (all when 0)
    pub fn dequeue_many(&self, count: usize) -> Vec<Transaction> {
        let mut state = self.state.lock();
        let take = if count == 0 {
            state.entries.len()
        } else {
            count.min(state.entries.len())
        };

        let mut batch = Vec::with_capacity(take);
        while batch.len() < take {
            match state.pop_front() {
                Some(transaction) => batch.push(transaction),
                None => break,
            }
        }
        batch
    }

    /// Smallest pending identifier strictly greater than `id`
    pub fn get_next_used_id(&self, id: i64) -> Option<i64> {
        self.state
            .lock()
            .entries
            .values()
            .map(Transaction::id)
            .filter(|candidate| *candidate > id && *candidate > 0)
            .min()
    }

    /// Block until entries are pending, `pulse` is called, or the timeout elapses.
    ///
    /// Returns false on timeout with nothing pending.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let seen = state.pulses;

        while state.entries.is_empty() && state.pulses == seen {
            if self.signal.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        !state.entries.is_empty() || state.pulses != seen
    }

    /// Wake every waiting consumer
    pub fn pulse(&self) {
        self.state.lock().pulses += 1;
        self.signal.notify_all();
    }

    pub fn count(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Number of pending inserts (with or without identifier)
    pub fn pending_inserts(&self) -> usize {
        self.state.lock().inserted.len()
    }

    /// Discard every pending transaction
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let pulses = state.pulses;
        *state = LogState {
            pulses,
            ..LogState::default()
        };
    }
}
