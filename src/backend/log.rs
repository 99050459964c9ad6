//! Append-only operation log backing [`FileBackend`](super::FileBackend).
//!
//! File layout: a 5-byte header (magic + version) followed by frames of
//! `len: u32 LE | MessagePack(LogEntry) | crc32: u32 LE`.
//!
//! A frame cut short by a crash is a torn tail and is truncated away on
//! open. A complete frame whose checksum does not match is corruption.

use crate::error::{Result, StoreError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for the operation log.
const LOG_MAGIC: &[u8; 4] = b"KSL\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

const HEADER_SIZE: u64 = 5;

/// Frame payload sanity limit.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// A mutation recorded in the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogOp {
    /// Insert or replace a row. Carries the full row.
    Put {
        table: String,
        key: String,
        rowid: u64,
        data: Vec<u8>,
    },
    Delete {
        table: String,
        key: String,
    },
    Clear {
        table: String,
    },
}

/// A single log frame.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub op: LogOp,
}

struct LogFile {
    file: File,
    size: u64,
    next_seq: u64,
    writes_since_sync: u64,
}

/// Operation log with random-access reads of earlier frames.
pub struct OperationLog {
    path: PathBuf,
    inner: Mutex<LogFile>,
    /// Sync every N appends (1 = every append).
    sync_interval: u64,
    /// Fail the next append after its frame reaches the file.
    #[cfg(test)]
    fail_next_write: std::sync::atomic::AtomicBool,
}

impl OperationLog {
    /// Open or create a log, returning every intact entry with its offset.
    pub fn open(
        path: impl AsRef<Path>,
        sync_interval: u64,
    ) -> Result<(Self, Vec<(u64, LogEntry)>)> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len < HEADER_SIZE {
            // Empty, or a crash cut the header short before any frame.
            if len > 0 {
                warn!(path = %path.display(), len, "rewriting short operation log header");
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
            }
            file.write_all(LOG_MAGIC)?;
            file.write_all(&[LOG_VERSION])?;
            file.sync_all()?;
        }

        let (entries, valid_len) = Self::replay(&mut file)?;

        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "truncating torn tail of operation log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let next_seq = entries.last().map(|(_, e)| e.seq + 1).unwrap_or(1);
        debug!(path = %path.display(), entries = entries.len(), "opened operation log");

        let log = Self {
            path,
            inner: Mutex::new(LogFile {
                file,
                size: valid_len,
                next_seq,
                writes_since_sync: 0,
            }),
            sync_interval: sync_interval.max(1),
            #[cfg(test)]
            fail_next_write: std::sync::atomic::AtomicBool::new(false),
        };

        Ok((log, entries))
    }

    /// Append an operation. Returns the offset of its frame.
    pub fn append(&self, op: LogOp) -> Result<u64> {
        let mut inner = self.inner.lock();

        let entry = LogEntry {
            seq: inner.next_seq,
            op,
        };
        let frame = Self::encode_frame(&entry)?;

        let offset = inner.size;
        let sync = inner.writes_since_sync + 1 >= self.sync_interval;
        if let Err(e) = self.write_frame(&mut inner.file, offset, &frame, sync) {
            // A frame the caller was told failed must not replay on reopen.
            if let Err(truncate) = inner.file.set_len(offset) {
                warn!(
                    path = %self.path.display(),
                    offset,
                    error = %truncate,
                    "failed to roll back operation log append"
                );
            }
            return Err(e.into());
        }

        inner.size += frame.len() as u64;
        inner.next_seq += 1;
        inner.writes_since_sync = if sync { 0 } else { inner.writes_since_sync + 1 };

        Ok(offset)
    }

    fn write_frame(
        &self,
        file: &mut File,
        offset: u64,
        frame: &[u8],
        sync: bool,
    ) -> io::Result<()> {
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(frame)?;
        if self.take_injected_failure() {
            return Err(io::Error::new(io::ErrorKind::Other, "injected sync failure"));
        }
        if sync {
            file.sync_data()?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn take_injected_failure(&self) -> bool {
        self.fail_next_write
            .swap(false, std::sync::atomic::Ordering::SeqCst)
    }

    #[cfg(not(test))]
    fn take_injected_failure(&self) -> bool {
        false
    }

    /// Read the entry whose frame starts at `offset`.
    pub fn read_at(&self, offset: u64) -> Result<LogEntry> {
        let mut inner = self.inner.lock();
        if offset < HEADER_SIZE || offset >= inner.size {
            return Err(StoreError::Corruption(format!(
                "log offset {} out of range",
                offset
            )));
        }
        inner.file.seek(SeekFrom::Start(offset))?;
        match Self::read_frame(&mut inner.file)? {
            Some((entry, _)) => Ok(entry),
            None => Err(StoreError::Corruption(format!(
                "truncated frame at offset {}",
                offset
            ))),
        }
    }

    /// Force pending appends to disk.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.sync_all()?;
        inner.writes_since_sync = 0;
        Ok(())
    }

    /// Current log size in bytes.
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Replace the log with `ops`, returning the new frame offsets in order.
    ///
    /// Writes a sibling file and renames it over the log, so a crash leaves
    /// either the old or the new log intact.
    pub fn rewrite(&self, ops: Vec<LogOp>) -> Result<Vec<u64>> {
        let mut inner = self.inner.lock();

        let temp_path = self.path.with_extension("compact");
        let mut temp = File::create(&temp_path)?;
        temp.write_all(LOG_MAGIC)?;
        temp.write_all(&[LOG_VERSION])?;

        let mut offsets = Vec::with_capacity(ops.len());
        let mut offset = HEADER_SIZE;
        let mut seq = 1;
        for op in ops {
            let frame = Self::encode_frame(&LogEntry { seq, op })?;
            temp.write_all(&frame)?;
            offsets.push(offset);
            offset += frame.len() as u64;
            seq += 1;
        }
        temp.sync_all()?;
        drop(temp);

        fs::rename(&temp_path, &self.path)?;

        inner.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        inner.size = offset;
        inner.next_seq = seq;
        inner.writes_since_sync = 0;

        Ok(offsets)
    }

    fn replay(file: &mut File) -> Result<(Vec<(u64, LogEntry)>, u64)> {
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut *file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid log magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported log version: {}",
                version[0]
            )));
        }

        let mut entries = Vec::new();
        let mut offset = HEADER_SIZE;
        while let Some((entry, frame_len)) = Self::read_frame(&mut reader)? {
            entries.push((offset, entry));
            offset += frame_len;
        }

        Ok((entries, offset))
    }

    fn encode_frame(entry: &LogEntry) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec(entry)?;

        let mut frame = Vec::with_capacity(encoded.len() + 8);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
        Ok(frame)
    }

    /// Read one frame and its length. `Ok(None)` means clean EOF or a torn tail.
    fn read_frame<R: Read>(reader: &mut R) -> Result<Option<(LogEntry, u64)>> {
        let mut len_bytes = [0u8; 4];
        if !Self::read_full(reader, &mut len_bytes)? {
            return Ok(None);
        }
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(StoreError::Corruption("log frame too large".into()));
        }

        let mut encoded = vec![0u8; len];
        if !Self::read_full(reader, &mut encoded)? {
            return Ok(None);
        }

        let mut checksum_bytes = [0u8; 4];
        if !Self::read_full(reader, &mut checksum_bytes)? {
            return Ok(None);
        }

        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&encoded);
        if stored != computed {
            return Err(StoreError::Corruption("log checksum mismatch".into()));
        }

        let entry = rmp_serde::from_slice(&encoded)?;
        Ok(Some((entry, len as u64 + 8)))
    }

    /// Fill `buf`, returning false on EOF.
    fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
        match reader.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
