//! # Tabula
//!
//! An in-memory transactional table engine with:
//! - Synchronized memory tables (spin-then-block reader/writer gate)
//! - Deduplicating transaction logs with requeue and replay
//! - Read-cached tables over slower backing stores
//! - Background writer tables with deferred durability
//! - Journal-backed file tables for crash-safe storage
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Application Code                         │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │ reads                        │ writes
//! ┌──────────────▼──────────────┐  ┌────────────▼────────────────┐
//! │       ReadCachedTable       │  │    BackgroundWriterTable     │
//! │    (snapshot, generation)   │  │   (memory first, deferred)   │
//! └──────────────┬──────────────┘  └────────────┬────────────────┘
//!                │                              │
//!                ▼                              ▼
//!         ┌─────────────┐              ┌─────────────────┐
//!         │ MemoryTable │              │ TransactionLog  │
//!         │ (TableLock) │              │   (coalescing)  │
//!         └─────────────┘              └────────┬────────┘
//!                                               │ drain
//!                                      ┌────────▼────────┐
//!                                      │   TableWriter   │
//!                                      └────────┬────────┘
//!                                               │ commit
//!                                      ┌────────▼────────┐
//!                                      │ FileTable / any │
//!                                      │  backing Table  │
//!                                      └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod row;
pub mod search;
pub mod transaction;
pub mod table;
pub mod writer;
pub mod storage;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, TableError};
pub use config::{Config, JournalSyncStrategy, WriteWaitPolicy, WriterConfig};
pub use row::{DataType, FieldFlags, LayoutRegistry, Row, RowLayout, Value};
pub use search::{ResultOption, Search, SortField};
pub use transaction::{RequeueReport, Transaction, TransactionFlags, TransactionLog, TransactionType};
pub use table::{BackgroundWriterTable, MemoryTable, ReadCachedTable, Table};
pub use writer::{TableWriter, WriterStats};
pub use storage::{FileTable, RecoveryReport};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Tabula
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
