//! Table journal
//!
//! Append-only record file behind a `FileTable`.
//!
//! ## Frame
//! ```text
//! ┌─────────┬─────────┬─────────┬──────────────────────┐
//! │ LSN (8) │ CRC (4) │ Len (4) │ bincode(JournalRecord)│
//! └─────────┴─────────┴─────────┴──────────────────────┘
//! ```
//! All integers little endian. The CRC covers LSN, length and payload.
//! LSNs start at 1 and strictly increase, compaction included.
//!
//! ## Recovery
//! Frames are read until the first torn, corrupt or out-of-order one. The
//! file is truncated there, so later appends never follow garbage.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::config::JournalSyncStrategy;
use crate::error::{Result, TableError};
use crate::transaction::Transaction;

/// Size of the frame header (LSN + CRC + length)
pub const HEADER_SIZE: usize = 16;

/// One durable change to a file table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// A mutation as it was applied (identifiers already assigned)
    Apply(Transaction),

    /// All rows removed
    Clear { reset_ids: bool },

    /// Identifiers up to `high_water` are considered used
    Reserve { high_water: i64 },
}

/// What `Journal::open` found on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Valid records replayed
    pub records_recovered: u64,

    /// LSN of the last valid record (0 for an empty journal)
    pub last_lsn: u64,

    /// Bytes cut from the end of the file
    pub truncated_bytes: u64,

    /// Why reading stopped early, if it did
    pub reason: Option<String>,
}

impl RecoveryReport {
    pub fn was_truncated(&self) -> bool {
        self.truncated_bytes > 0
    }
}

/// Append handle on a journal file
pub struct Journal {
    path: PathBuf,
    file: File,
    /// End of the last complete frame
    offset: u64,
    next_lsn: u64,
    sync: JournalSyncStrategy,
    unsynced: usize,
}

fn frame_crc(lsn: u64, len: u32, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_le_bytes());
    hasher.update(&len.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Serialize a record into a complete frame
pub fn encode_frame(lsn: u64, record: &JournalRecord) -> Result<BytesMut> {
    let payload = bincode::serialize(record)?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        TableError::Serialization(format!("journal record of {} bytes is too large", payload.len()))
    })?;

    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_u64_le(lsn);
    frame.put_u32_le(frame_crc(lsn, len, &payload));
    frame.put_u32_le(len);
    frame.put_slice(&payload);
    Ok(frame)
}

/// Valid prefix of a journal image
struct Scan {
    records: Vec<JournalRecord>,
    valid_len: usize,
    last_lsn: u64,
    reason: Option<String>,
}

fn scan(data: &[u8]) -> Scan {
    let mut result = Scan {
        records: Vec::new(),
        valid_len: 0,
        last_lsn: 0,
        reason: None,
    };
    let mut cursor = data;

    while !cursor.is_empty() {
        if cursor.len() < HEADER_SIZE {
            result.reason = Some(format!("torn frame header ({} bytes)", cursor.len()));
            break;
        }
        let mut header = &cursor[..HEADER_SIZE];
        let lsn = header.get_u64_le();
        let crc = header.get_u32_le();
        let len = header.get_u32_le();

        let frame_len = HEADER_SIZE + len as usize;
        if cursor.len() < frame_len {
            result.reason = Some(format!("torn payload at lsn {}", lsn));
            break;
        }
        let payload = &cursor[HEADER_SIZE..frame_len];
        if frame_crc(lsn, len, payload) != crc {
            result.reason = Some(format!("checksum mismatch at lsn {}", lsn));
            break;
        }
        if lsn <= result.last_lsn {
            result.reason = Some(format!("lsn {} follows lsn {}", lsn, result.last_lsn));
            break;
        }
        match bincode::deserialize::<JournalRecord>(payload) {
            Ok(record) => result.records.push(record),
            Err(e) => {
                result.reason = Some(format!("undecodable record at lsn {}: {}", lsn, e));
                break;
            }
        }

        result.last_lsn = lsn;
        result.valid_len += frame_len;
        cursor.advance(frame_len);
    }
    result
}

impl Journal {
    /// Open or create a journal, returning its valid records in order
    pub fn open(path: &Path, sync: JournalSyncStrategy) -> Result<(Self, Vec<JournalRecord>, RecoveryReport)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let scan = scan(&data);
        let truncated = (data.len() - scan.valid_len) as u64;
        if truncated > 0 {
            tracing::warn!(
                "Truncating {} bytes from journal {}: {}",
                truncated,
                path.display(),
                scan.reason.as_deref().unwrap_or("trailing bytes")
            );
            file.set_len(scan.valid_len as u64)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(scan.valid_len as u64))?;

        let report = RecoveryReport {
            records_recovered: scan.records.len() as u64,
            last_lsn: scan.last_lsn,
            truncated_bytes: truncated,
            reason: scan.reason,
        };
        tracing::debug!(
            "Opened journal {} ({} records, last lsn {})",
            path.display(),
            report.records_recovered,
            report.last_lsn
        );

        let journal = Self {
            path: path.to_path_buf(),
            file,
            offset: scan.valid_len as u64,
            next_lsn: scan.last_lsn + 1,
            sync,
            unsynced: 0,
        };
        Ok((journal, scan.records, report))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// LSN the next appended record will receive
    pub fn next_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// Append one record, returning its LSN.
    ///
    /// A failed write is cut off again so the file ends on a frame boundary.
    pub fn append(&mut self, record: &JournalRecord) -> Result<u64> {
        let lsn = self.next_lsn;
        let frame = encode_frame(lsn, record)?;

        if let Err(e) = self.write_frame(&frame) {
            if let Err(cleanup) = self
                .file
                .set_len(self.offset)
                .and_then(|_| self.file.seek(SeekFrom::Start(self.offset)).map(|_| ()))
            {
                tracing::error!(
                    "Failed to cut torn frame from journal {}: {}",
                    self.path.display(),
                    cleanup
                );
            }
            return Err(e);
        }

        self.offset += frame.len() as u64;
        self.next_lsn += 1;
        Ok(lsn)
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.file.write_all(frame)?;
        self.unsynced += 1;
        let due = match self.sync {
            JournalSyncStrategy::EveryWrite => true,
            JournalSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if due {
            self.sync()?;
        }
        Ok(())
    }

    /// Force buffered records to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Replace the whole journal with `records`.
    ///
    /// The new content is written to a sibling file and renamed over the
    /// journal, so a crash leaves either the old or the new file.
    pub fn rewrite(&mut self, records: &[JournalRecord]) -> Result<()> {
        let tmp_path = self.path.with_extension("compact");
        let mut lsn = self.next_lsn;
        let mut written = 0u64;
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            for record in records {
                let frame = encode_frame(lsn, record)?;
                tmp.write_all(&frame)?;
                written += frame.len() as u64;
                lsn += 1;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        self.file = file;
        self.offset = written;
        self.next_lsn = lsn;
        self.unsynced = 0;
        Ok(())
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        if self.unsynced > 0 {
            if let Err(e) = self.sync() {
                tracing::error!("Failed to sync journal {}: {}", self.path.display(), e);
            }
        }
    }
}
