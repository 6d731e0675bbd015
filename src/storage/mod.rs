//! Storage Module
//!
//! Durable backing table built from an in-memory mirror and a journal.
//!
//! ## Responsibilities
//! - Append every applied mutation to a checksummed journal
//! - Rebuild the table on open by replaying the journal
//! - Cut torn or corrupt tails left by a crash
//! - Compact the journal down to the live rows
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Record 1                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2 ...                            │
//! └─────────────────────────────────────────┘
//! ```

mod file_table;
mod journal;

pub use file_table::FileTable;
pub use journal::{encode_frame, Journal, JournalRecord, RecoveryReport, HEADER_SIZE};
