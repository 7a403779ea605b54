//! Embedded persistent key-value table.
//!
//! One file per table. The on-disk form is an append-only record stream
//! behind an 8-byte magic:
//!
//! ```text
//! [magic:8 = "cairnkv1"]
//! repeated records:
//!   [crc:u32le]                -- CRC-32 over everything after it
//!   [flags:u8]                 -- 0 = put, 1 = tombstone
//!   [key_len:u32le][val_len:u32le]
//!   [key bytes][value bytes]   -- tombstones have val_len = 0
//! ```
//!
//! The live map is kept in memory and replayed from the file at open.
//! Replay stops rather than guesses: the first record that is truncated or
//! fails its checksum ends the replay, and the applied prefix is served. A
//! writer that later appends under the file lock re-reads from the same
//! point and retries the tail.
//!
//! Cross-process coherence: every mutation takes a whole-file `fcntl` lock
//! and appends whole records with a single write, so a concurrent reader
//! catching up sees either the prior tail or the complete new record.
//! In-process coherence is a `Mutex` around the map and file handle.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crc::{Crc, CRC_32_ISO_HDLC};
use log::{debug, warn};

use crate::error::KvError;
use crate::flock;

/// Table file magic.
const MAGIC: &[u8; 8] = b"cairnkv1";

/// Record flag: key maps to the record's value.
const FLAG_PUT: u8 = 0;

/// Record flag: key is deleted.
const FLAG_TOMBSTONE: u8 = 1;

/// Bytes in a record before the key: crc + flags + key_len + val_len.
const RECORD_FIXED_LEN: usize = 4 + 1 + 4 + 4;

/// Checksum algorithm for record integrity.
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// A persistent byte-keyed, byte-valued table.
#[derive(Debug)]
pub struct KvFile {
    path: PathBuf,
    inner: Mutex<KvInner>,
}

#[derive(Debug)]
struct KvInner {
    file: File,
    map: HashMap<Vec<u8>, Vec<u8>>,
    /// Byte offset up to which the file has been applied to `map`.
    tail: u64,
}

/// Mutation handle passed to [`KvFile::locked`] closures.
///
/// The whole-file lock and the in-process mutex are already held; `put`
/// and `delete` append directly. Calling back into the owning [`KvFile`]
/// from inside a `locked` closure deadlocks on the mutex — use the guard.
pub struct KvGuard<'a> {
    inner: &'a mut KvInner,
}

impl KvFile {
    /// Open or create the table at `path`.
    ///
    /// `hash_size` is the expected number of live keys and pre-sizes the
    /// in-memory map. An empty file is stamped with the table magic; a
    /// non-empty file must start with it.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::BadMagic`] for a foreign file, or
    /// [`KvError::Io`] on any file-system failure.
    pub fn open(path: &Path, hash_size: u32) -> Result<Self, KvError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        // Initialization races with other processes opening the same
        // table; the whole-file lock serializes the magic stamp.
        flock::lock_file(&file)?;
        let init = Self::check_or_stamp_magic(&mut file, path);

        let mut inner = KvInner {
            file,
            map: HashMap::with_capacity(hash_size as usize),
            tail: MAGIC.len() as u64,
        };
        let replay = init.and_then(|()| catch_up(&mut inner, path));
        let unlock = flock::unlock_file(&inner.file);
        replay?;
        unlock?;

        debug!(
            "opened kv table {} ({} live keys)",
            path.display(),
            inner.map.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(inner),
        })
    }

    fn check_or_stamp_magic(file: &mut File, path: &Path) -> Result<(), KvError> {
        let len = file.metadata()?.len();
        if len == 0 {
            file.write_all(MAGIC)?;
            return Ok(());
        }
        let mut found = [0u8; 8];
        file.seek(SeekFrom::Start(0))?;
        let bad = file.read_exact(&mut found).is_err() || found != *MAGIC;
        if bad {
            return Err(KvError::BadMagic {
                path: path.display().to_string(),
            });
        }
        Ok(())
    }

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, KvInner>, KvError> {
        self.inner.lock().map_err(|_| KvError::Poisoned)
    }

    /// Fetch the value for `key`, if any.
    ///
    /// Applies records appended by other processes since the last call.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] on I/O failure during catch-up.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let mut inner = self.lock_inner()?;
        catch_up(&mut inner, &self.path)?;
        Ok(inner.map.get(key).cloned())
    }

    /// Store `key → value`, replacing any prior value.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] on lock or I/O failure.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.locked(|kv| kv.put(key, value))
    }

    /// Remove `key`. Removing an absent key appends nothing.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] on lock or I/O failure.
    pub fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.locked(|kv| kv.delete(key))
    }

    /// Snapshot of all live keys, in byte order.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] on I/O failure during catch-up.
    pub fn keys(&self) -> Result<Vec<Vec<u8>>, KvError> {
        let mut inner = self.lock_inner()?;
        catch_up(&mut inner, &self.path)?;
        let mut keys: Vec<Vec<u8>> = inner.map.keys().cloned().collect();
        keys.sort_unstable();
        Ok(keys)
    }

    /// Run `f` with the table exclusively locked across processes.
    ///
    /// Acquires the in-process mutex and the whole-file `fcntl` lock,
    /// catches up on foreign appends, then hands `f` a [`KvGuard`]. The
    /// file lock is released before returning, whether or not `f` failed.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] on lock or I/O failure, or whatever `f` returns.
    pub fn locked<T>(
        &self,
        f: impl FnOnce(&mut KvGuard<'_>) -> Result<T, KvError>,
    ) -> Result<T, KvError> {
        let mut inner = self.lock_inner()?;
        flock::lock_file(&inner.file)?;
        let result = catch_up(&mut inner, &self.path)
            .and_then(|()| f(&mut KvGuard { inner: &mut *inner }));
        let unlock = flock::unlock_file(&inner.file);
        let value = result?;
        unlock?;
        Ok(value)
    }
}

impl KvGuard<'_> {
    /// Fetch the value for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.map.get(key).cloned()
    }

    /// Store `key → value` under the already-held lock.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] on I/O failure.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let record = encode_record(FLAG_PUT, key, value)?;
        append_record(self.inner, &record)?;
        self.inner.map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    /// Remove `key` under the already-held lock.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] on I/O failure.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), KvError> {
        if !self.inner.map.contains_key(key) {
            return Ok(());
        }
        let record = encode_record(FLAG_TOMBSTONE, key, &[])?;
        append_record(self.inner, &record)?;
        self.inner.map.remove(key);
        Ok(())
    }
}

/// Apply records appended since `inner.tail`, stopping before the first
/// truncated or checksum-failing record.
fn catch_up(inner: &mut KvInner, path: &Path) -> Result<(), KvError> {
    let end = inner.file.metadata()?.len();
    if end <= inner.tail {
        return Ok(());
    }

    let span = usize::try_from(end - inner.tail).map_err(|_| KvError::Io {
        detail: "table larger than address space".into(),
    })?;
    let mut buf = vec![0u8; span];
    inner.file.seek(SeekFrom::Start(inner.tail))?;
    inner.file.read_exact(&mut buf)?;

    let mut pos = 0usize;
    while let Some(consumed) = apply_record(&mut inner.map, &buf[pos..]) {
        pos += consumed;
    }
    if pos < buf.len() {
        warn!(
            "kv table {}: {} trailing bytes do not form a valid record; replay stopped",
            path.display(),
            buf.len() - pos
        );
    }
    inner.tail += pos as u64;
    Ok(())
}

/// Parse and apply one record from the front of `buf`.
///
/// Returns the record's encoded length, or `None` if `buf` does not start
/// with a complete, checksum-valid record.
fn apply_record(map: &mut HashMap<Vec<u8>, Vec<u8>>, buf: &[u8]) -> Option<usize> {
    if buf.len() < RECORD_FIXED_LEN {
        return None;
    }
    let stored_crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let flags = buf[4];
    let key_len = u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]) as usize;
    let val_len = u32::from_le_bytes([buf[9], buf[10], buf[11], buf[12]]) as usize;

    let total = RECORD_FIXED_LEN
        .checked_add(key_len)?
        .checked_add(val_len)?;
    if buf.len() < total || flags > FLAG_TOMBSTONE {
        return None;
    }
    if CRC32.checksum(&buf[4..total]) != stored_crc {
        return None;
    }

    let key = &buf[RECORD_FIXED_LEN..RECORD_FIXED_LEN + key_len];
    let value = &buf[RECORD_FIXED_LEN + key_len..total];
    if flags == FLAG_PUT {
        map.insert(key.to_vec(), value.to_vec());
    } else {
        map.remove(key);
    }
    Some(total)
}

/// Build the on-disk form of one record.
fn encode_record(flags: u8, key: &[u8], value: &[u8]) -> Result<Vec<u8>, KvError> {
    let key_len = u32::try_from(key.len()).map_err(|_| KvError::Io {
        detail: "key exceeds u32 length".into(),
    })?;
    let val_len = u32::try_from(value.len()).map_err(|_| KvError::Io {
        detail: "value exceeds u32 length".into(),
    })?;

    let mut record = Vec::with_capacity(RECORD_FIXED_LEN + key.len() + value.len());
    record.extend_from_slice(&[0u8; 4]); // crc placeholder
    record.push(flags);
    record.extend_from_slice(&key_len.to_le_bytes());
    record.extend_from_slice(&val_len.to_le_bytes());
    record.extend_from_slice(key);
    record.extend_from_slice(value);

    let crc = CRC32.checksum(&record[4..]);
    record[0..4].copy_from_slice(&crc.to_le_bytes());
    Ok(record)
}

/// Append a fully-encoded record and advance the applied tail.
fn append_record(inner: &mut KvInner, record: &[u8]) -> Result<(), KvError> {
    let offset = inner.file.seek(SeekFrom::End(0))?;
    inner.file.write_all(record)?;
    inner.tail = offset + record.len() as u64;
    Ok(())
}
