//! File-backed event log
//!
//! Append-only binary journal standing in for the external partitioned
//! log. Each entry is checksummed with CRC32C and flushed per append, the
//! leader-acknowledgment analogue: when `append` returns, the record is on
//! disk.
//!
//! # Binary format (per entry)
//! ```text
//! [body_len: u32]
//! [offset:    u64]
//! [timestamp: i64]
//! [label_len: u16][label: bytes]
//! [payload_len: u32][payload: bytes]
//! [checksum: u32]   // CRC32C over offset+timestamp+label+payload
//! ```
//!
//! A truncated final entry (torn write) is cut off on open; a checksum
//! mismatch anywhere is corruption and is fatal, forcing a clean restart.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crc32c::crc32c;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::warn;

use crate::log::{EventLog, LogError, LogRecord};

// body_len excludes itself: 8 (offset) + 8 (ts) + 2 (label_len) + 4 (payload_len) + 4 (crc)
const FIXED_BODY_LEN: usize = 26;

/// One durable journal entry; the on-disk form of a [`LogRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub offset: u64,
    pub timestamp_ms: i64,
    pub label: String,
    pub payload: Vec<u8>,
    pub checksum: u32,
}

impl JournalEntry {
    pub fn new(offset: u64, timestamp_ms: i64, label: String, payload: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(offset, timestamp_ms, &label, &payload);
        Self {
            offset,
            timestamp_ms,
            label,
            payload,
            checksum,
        }
    }

    pub fn compute_checksum(offset: u64, timestamp_ms: i64, label: &str, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(16 + label.len() + payload.len());
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(&timestamp_ms.to_le_bytes());
        buf.extend_from_slice(label.as_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum
            == Self::compute_checksum(self.offset, self.timestamp_ms, &self.label, &self.payload)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let label = self.label.as_bytes();
        let body_len = (FIXED_BODY_LEN + label.len() + self.payload.len()) as u32;

        let mut buf = Vec::with_capacity(4 + body_len as usize);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        buf.extend_from_slice(&(label.len() as u16).to_le_bytes());
        buf.extend_from_slice(label);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Parse one entry from the head of `data`.
    ///
    /// Returns `(entry, bytes_consumed)`; `Ok(None)` means the data ends in
    /// an incomplete entry (torn tail), distinguishable from structural
    /// corruption which is an error.
    pub fn from_bytes(data: &[u8]) -> Result<Option<(Self, usize)>, LogError> {
        if data.len() < 4 {
            return Ok(None);
        }
        let body_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if body_len < FIXED_BODY_LEN || body_len > 100_000_000 {
            return Err(LogError::Corruption {
                offset: 0,
                detail: format!("implausible body length {body_len}"),
            });
        }
        let total = 4 + body_len;
        if data.len() < total {
            return Ok(None);
        }

        let body = &data[4..total];
        let mut pos = 0usize;

        let offset = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let timestamp_ms = i64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let label_len = u16::from_le_bytes(body[pos..pos + 2].try_into().unwrap()) as usize;
        pos += 2;

        if pos + label_len + 4 + 4 > body.len() {
            return Err(LogError::Corruption {
                offset,
                detail: format!("label length {label_len} exceeds entry body"),
            });
        }
        let label = String::from_utf8(body[pos..pos + label_len].to_vec()).map_err(|e| {
            LogError::Corruption {
                offset,
                detail: format!("label is not valid utf-8: {e}"),
            }
        })?;
        pos += label_len;

        let payload_len = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if pos + payload_len + 4 != body.len() {
            return Err(LogError::Corruption {
                offset,
                detail: format!("payload length {payload_len} inconsistent with entry body"),
            });
        }
        let payload = body[pos..pos + payload_len].to_vec();
        pos += payload_len;
        let checksum = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());

        Ok(Some((
            Self {
                offset,
                timestamp_ms,
                label,
                payload,
                checksum,
            },
            total,
        )))
    }
}

#[derive(Debug)]
struct FileLogInner {
    file: File,
    next_offset: u64,
    taps: Vec<Sender<LogRecord>>,
}

/// Append-only file-backed [`EventLog`].
///
/// Live tailing works within one process: every subscription first reads
/// the file from the start, then receives subsequent appends through an
/// in-process tap. Peer processes replay the same file on startup.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    inner: Mutex<FileLogInner>,
}

impl FileLog {
    /// Open (or create) the journal at `path`, validating every existing
    /// entry. A torn final entry is truncated away with a warning; any
    /// other inconsistency is fatal corruption.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LogError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let (entries, valid_len) = Self::scan(&mut file)?;
        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                torn_bytes = file_len - valid_len,
                "truncating torn tail entry from journal"
            );
            file.set_len(valid_len)?;
            file.seek(SeekFrom::End(0))?;
        }

        Ok(Self {
            path,
            inner: Mutex::new(FileLogInner {
                file,
                next_offset: entries,
                taps: Vec::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate the whole file; returns (entry count, valid byte length).
    fn scan(file: &mut File) -> Result<(u64, u64), LogError> {
        let mut data = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut data)?;

        let mut pos = 0usize;
        let mut count = 0u64;
        while pos < data.len() {
            match JournalEntry::from_bytes(&data[pos..])? {
                Some((entry, consumed)) => {
                    if !entry.verify_checksum() {
                        return Err(LogError::Corruption {
                            offset: pos as u64,
                            detail: format!("checksum mismatch for record {}", entry.offset),
                        });
                    }
                    if entry.offset != count {
                        return Err(LogError::Corruption {
                            offset: pos as u64,
                            detail: format!("record offset {} where {count} expected", entry.offset),
                        });
                    }
                    pos += consumed;
                    count += 1;
                }
                None => break, // torn tail
            }
        }
        Ok((count, pos as u64))
    }

    /// Read and validate every record currently in the file.
    fn read_all(&self) -> Result<Vec<LogRecord>, LogError> {
        let mut data = Vec::new();
        let mut file = File::open(&self.path)?;
        file.read_to_end(&mut data)?;

        let mut records = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            match JournalEntry::from_bytes(&data[pos..])? {
                Some((entry, consumed)) => {
                    if !entry.verify_checksum() {
                        return Err(LogError::Corruption {
                            offset: pos as u64,
                            detail: format!("checksum mismatch for record {}", entry.offset),
                        });
                    }
                    records.push(LogRecord {
                        offset: entry.offset,
                        timestamp_ms: entry.timestamp_ms,
                        label: entry.label,
                        payload: entry.payload,
                    });
                    pos += consumed;
                }
                None => break,
            }
        }
        Ok(records)
    }
}

impl EventLog for FileLog {
    fn append(&self, label: &str, payload: Vec<u8>, timestamp_ms: i64) -> Result<u64, LogError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let offset = inner.next_offset;
        let entry = JournalEntry::new(offset, timestamp_ms, label.to_string(), payload);
        let bytes = entry.to_bytes();

        inner.file.write_all(&bytes)?;
        // Durable before acknowledging, every write.
        inner.file.sync_all()?;
        inner.next_offset += 1;

        let record = LogRecord {
            offset,
            timestamp_ms,
            label: entry.label,
            payload: entry.payload,
        };
        inner.taps.retain(|tap| tap.send(record.clone()).is_ok());
        Ok(offset)
    }

    fn subscribe(&self) -> Result<Receiver<LogRecord>, LogError> {
        // Hold the writer lock across the catch-up read so no append can
        // slip between history and the live tap.
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let records = self.read_all()?;
        let (tx, rx) = unbounded();
        for record in records {
            if tx.send(record).is_err() {
                return Err(LogError::Closed);
            }
        }
        inner.taps.push(tx);
        Ok(rx)
    }

    fn len(&self) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_entry(offset: u64) -> JournalEntry {
        JournalEntry::new(
            offset,
            1_708_123_456_789 + offset as i64,
            "OrderAck".to_string(),
            format!("{{\"order_nid\":{offset}}}").into_bytes(),
        )
    }

    #[test]
    fn test_entry_checksum_roundtrip() {
        let entry = sample_entry(7);
        assert!(entry.verify_checksum());
        let bytes = entry.to_bytes();
        let (decoded, consumed) = JournalEntry::from_bytes(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_entry_detects_tamper() {
        let mut entry = sample_entry(1);
        entry.payload = b"{\"order_nid\":999}".to_vec();
        assert!(!entry.verify_checksum());
    }

    #[test]
    fn test_incomplete_entry_is_none() {
        let bytes = sample_entry(0).to_bytes();
        assert!(JournalEntry::from_bytes(&bytes[..bytes.len() - 3])
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_append_and_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.log");

        {
            let log = FileLog::open(&path).unwrap();
            for i in 0..10u64 {
                let offset = log
                    .append("OrderAck", format!("{{\"order_nid\":{i}}}").into_bytes(), i as i64)
                    .unwrap();
                assert_eq!(offset, i);
            }
        }

        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.len(), 10);
        let rx = log.subscribe().unwrap();
        let offsets: Vec<u64> = rx.try_iter().map(|r| r.offset).collect();
        assert_eq!(offsets, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_subscribe_replays_then_tails() {
        let tmp = TempDir::new().unwrap();
        let log = FileLog::open(tmp.path().join("ledger.log")).unwrap();
        log.append("Sod", b"{}".to_vec(), 1).unwrap();

        let rx = log.subscribe().unwrap();
        log.append("Eod", b"{}".to_vec(), 2).unwrap();

        let labels: Vec<String> = rx.try_iter().map(|r| r.label).collect();
        assert_eq!(labels, vec!["Sod", "Eod"]);
    }

    #[test]
    fn test_torn_tail_truncated_on_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.log");
        {
            let log = FileLog::open(&path).unwrap();
            log.append("Sod", b"{}".to_vec(), 1).unwrap();
            log.append("Eod", b"{}".to_vec(), 2).unwrap();
        }

        // Chop a few bytes off the last entry to simulate a torn write.
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 5]).unwrap();

        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.len(), 1);
        // The log stays appendable after recovery.
        assert_eq!(log.append("Sod", b"{}".to_vec(), 3).unwrap(), 1);
    }

    #[test]
    fn test_corrupt_entry_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.log");
        {
            let log = FileLog::open(&path).unwrap();
            log.append("Sod", b"{\"date\":\"2025-03-10\"}".to_vec(), 1).unwrap();
        }

        // Flip a payload byte in place, leaving lengths intact.
        let mut data = std::fs::read(&path).unwrap();
        let idx = data.len() - 8;
        data[idx] ^= 0xff;
        std::fs::write(&path, &data).unwrap();

        match FileLog::open(&path) {
            Err(LogError::Corruption { .. }) => {}
            other => panic!("expected corruption error, got {other:?}"),
        }
    }
}
