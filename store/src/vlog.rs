//! Append-only value log.
//!
//! Holds every value ever written, as back-to-back records:
//!
//! ```text
//! [sentinel:4 = "data"]        -- reserves offset 0
//! repeated records:
//!   [prev_offset:u32le][length:u32le]
//!   [payload bytes]
//! ```
//!
//! Records for one `(subject, attribute)` pair form a reverse-linked list:
//! each record's `prev_offset` points at the previously written record,
//! and `prev_offset == 0` terminates the list. A record's offset is the
//! byte position of its header, so the sentinel guarantees no valid record
//! ever sits at offset 0.
//!
//! The log performs no locking of its own. Appends are serialized by the
//! resolver's index lock; reads are positional and tolerate truncation by
//! reporting short reads as `None`.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use log::debug;

use crate::flock;

/// Sentinel written at offset 0 of an empty log.
const SENTINEL: &[u8; 4] = b"data";

/// Byte length of a record header.
pub const RECORD_HEADER_LEN: u32 = 8;

/// Records whose declared payload length is at least this are treated as
/// corruption by read paths, which stop traversal rather than allocate.
pub const OVERSIZE_VALUE_LEN: u32 = 100_000;

/// A decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHead {
    /// Offset of the previous record in this value list, 0 at the end.
    pub prev: u32,
    /// Declared payload length in bytes.
    pub length: u32,
}

/// The append-only value log file.
pub struct ValueLog {
    file: File,
}

impl ValueLog {
    /// Open or create the log at `path`. Does not write the sentinel;
    /// call [`ensure_sentinel`](Self::ensure_sentinel) under the index
    /// lock once the resolver's coordination is in place.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be opened or created.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }

    /// Write the 4-byte sentinel if the log is empty.
    ///
    /// Caller must hold the index lock: two processes initializing the
    /// same store race here.
    ///
    /// # Errors
    ///
    /// Returns the I/O error on failure.
    pub fn ensure_sentinel(&self) -> io::Result<()> {
        if self.file.metadata()?.len() == 0 {
            self.file.write_all_at(SENTINEL, 0)?;
            debug!("value log initialized with sentinel prelude");
        }
        Ok(())
    }

    /// Append a record and return its offset.
    ///
    /// Header and payload are written with a single `write`, so a reader
    /// holding the index lock sees either the prior end of file or the
    /// whole record. Caller must hold the index lock.
    ///
    /// # Errors
    ///
    /// Fails if the payload length or the resulting offset does not fit
    /// in 32 bits, or on I/O failure.
    pub fn append(&self, prev_offset: u32, payload: &[u8]) -> io::Result<u32> {
        let length = u32::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload exceeds u32"))?;
        let end = self.file.metadata()?.len();
        let offset = u32::try_from(end)
            .map_err(|_| io::Error::other("value log exceeds u32 offsets"))?;

        let mut record = Vec::with_capacity(RECORD_HEADER_LEN as usize + payload.len());
        record.extend_from_slice(&prev_offset.to_le_bytes());
        record.extend_from_slice(&length.to_le_bytes());
        record.extend_from_slice(payload);
        self.file.write_all_at(&record, end)?;
        Ok(offset)
    }

    /// Read the record header at `offset`.
    ///
    /// A short read (truncated log) yields `None`.
    #[must_use]
    pub fn read_head(&self, offset: u32) -> Option<RecordHead> {
        let mut header = [0u8; RECORD_HEADER_LEN as usize];
        self.file
            .read_exact_at(&mut header, u64::from(offset))
            .ok()?;
        Some(RecordHead {
            prev: u32::from_le_bytes([header[0], header[1], header[2], header[3]]),
            length: u32::from_le_bytes([header[4], header[5], header[6], header[7]]),
        })
    }

    /// Read up to `max` payload bytes of the record at `offset`.
    ///
    /// A short read yields `None` so callers can treat the list as
    /// truncated and stop.
    #[must_use]
    pub fn read_payload(&self, offset: u32, head: RecordHead, max: usize) -> Option<Vec<u8>> {
        let take = (head.length as usize).min(max);
        let mut buf = vec![0u8; take];
        self.file
            .read_exact_at(&mut buf, u64::from(offset) + u64::from(RECORD_HEADER_LEN))
            .ok()?;
        Some(buf)
    }

    /// Blocking exclusive byte-range lock on `[offset, offset + len)`.
    ///
    /// # Errors
    ///
    /// Returns the OS error on failure.
    pub fn lock_range(&self, offset: u32, len: u32) -> io::Result<()> {
        flock::lock_range(&self.file, u64::from(offset), u64::from(len))
    }

    /// Release a byte-range lock taken with [`lock_range`](Self::lock_range).
    ///
    /// # Errors
    ///
    /// Returns the OS error on failure.
    pub fn unlock_range(&self, offset: u32, len: u32) -> io::Result<()> {
        flock::unlock_range(&self.file, u64::from(offset), u64::from(len))
    }
}
