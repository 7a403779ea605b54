//! The triple-store resolver.
//!
//! Maps `(subject URN, attribute) → ordered list of values` across four
//! backing files in one directory:
//!
//! | file             | role                                            |
//! |------------------|-------------------------------------------------|
//! | `urn.tdb`        | subject registry (name ↔ id)                    |
//! | `attribute.tdb`  | attribute registry (independent id space)       |
//! | `data.tdb`       | index: `"<sid>:<aid>"` → head offset            |
//! | `data_store.tdb` | value log (reverse-linked value lists)          |
//!
//! Writes intern both names, append a record to the value log whose
//! `prev` pointer is the old head, and repoint the index entry — all
//! inside the index table's locked section, so another process sees
//! either the old head or the new one. Reads walk the reverse chain
//! most-recent-first and fall back along the inheritance chain (the
//! reserved `aff4:inherit` attribute) on a miss.
//!
//! Subject-level advisory locking reserves one value-log record per
//! `(subject, mode)` and takes an exclusive byte-range lock over it.

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, warn};

use crate::error::{KvError, StoreError};
use crate::kvfile::KvFile;
use crate::registry::{decode_id, encode_id, Registry};
use crate::vlog::{RecordHead, ValueLog, OVERSIZE_VALUE_LEN};

/// Reserved attribute whose value names a subject's parent URN.
pub const INHERIT: &[u8] = b"aff4:inherit";

/// Reserved attribute anchoring the write-lock byte range.
pub const WLOCK: &[u8] = b"__WLOCK";

/// Reserved attribute anchoring the read-lock byte range.
pub const RLOCK: &[u8] = b"__RLOCK";

/// Upper bound on inheritance hops. The chain is caller data and may be
/// cyclic; traversal gives up after this many parent substitutions.
pub const MAX_INHERIT_DEPTH: usize = 64;

/// Buffer size for resolving a parent URN during the inheritance walk;
/// longer parent URNs are truncated.
const INHERIT_BUF_LEN: usize = 1024;

/// Open-time configuration.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Expected number of live keys per backing table; sizes the
    /// in-memory indexes.
    pub hash_size: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { hash_size: 1024 }
    }
}

/// A handle on one store directory.
///
/// Multiple `Resolver` instances — in one process or many — may point at
/// the same directory; they synchronize through file locks.
pub struct Resolver {
    subjects: Registry,
    attributes: Registry,
    index: KvFile,
    log: ValueLog,
}

impl Resolver {
    /// Open or create the store in directory `path`.
    ///
    /// Fails atomically: any table that cannot be opened closes the
    /// handles opened before it. The value-log sentinel is written under
    /// the index lock, so racing openers initialize it exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] naming the table that failed.
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self, StoreError> {
        let subjects = Registry::open(&path.join("urn.tdb"), options.hash_size)
            .map_err(|e| open_error("urn.tdb", &e))?;
        let attributes = Registry::open(&path.join("attribute.tdb"), options.hash_size)
            .map_err(|e| open_error("attribute.tdb", &e))?;
        let index = KvFile::open(&path.join("data.tdb"), options.hash_size)
            .map_err(|e| open_error("data.tdb", &e))?;
        let log = ValueLog::open(&path.join("data_store.tdb")).map_err(|e| StoreError::Open {
            table: "data_store.tdb".into(),
            detail: e.to_string(),
        })?;

        let resolver = Self {
            subjects,
            attributes,
            index,
            log,
        };
        let log_ref = &resolver.log;
        resolver
            .index
            .locked(|_| log_ref.ensure_sentinel().map_err(KvError::from))?;
        debug!("opened store at {}", path.display());
        Ok(resolver)
    }

    /// Open with default options.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_default(path: &Path) -> Result<Self, StoreError> {
        Self::open(path, StoreOptions::default())
    }

    // -----------------------------------------------------------------
    // Registry surface
    // -----------------------------------------------------------------

    /// Fetch the subject ID for `urn`, interning it when `create_new`.
    ///
    /// Returns 0 for a missing subject without `create_new`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on table failure.
    pub fn get_id_by_urn(&self, urn: &[u8], create_new: bool) -> Result<u32, StoreError> {
        Ok(self.subjects.get_id(urn, create_new)?)
    }

    /// Fetch the URN interned under `id`, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on table failure.
    pub fn get_urn_by_id(&self, id: u32) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.subjects.get_name(id)?)
    }

    /// All subject URNs, in byte order. Internal `_`-prefixed registry
    /// keys are hidden.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on table failure.
    pub fn export_all_urns(&self) -> Result<Vec<Vec<u8>>, StoreError> {
        Ok(self.subjects.iter_names()?)
    }

    // -----------------------------------------------------------------
    // Statement writes
    // -----------------------------------------------------------------

    /// Append `value` to the list for `(urn, attr)`, interning both names.
    ///
    /// With `unique`, the append is skipped when the value is already
    /// present anywhere on the list (inheritance honoured), making the
    /// call idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on lock, table, or log failure.
    pub fn add(&self, urn: &[u8], attr: &[u8], value: &[u8], unique: bool) -> Result<(), StoreError> {
        if unique && self.is_value_present(urn, attr, value, true)? {
            return Ok(());
        }
        let Some(key) = self.composite_key(urn, attr, true)? else {
            return Ok(());
        };
        let log = &self.log;
        self.index.locked(|kv| {
            let prev = kv.get(key.as_bytes()).map_or(0, |raw| decode_id(&raw));
            let offset = log.append(prev, value)?;
            kv.put(key.as_bytes(), &encode_id(offset))
        })?;
        Ok(())
    }

    /// Make `value` the sole association for `(urn, attr)` — unless it is
    /// already present (inheritance honoured), in which case the existing
    /// list is preserved untouched. A fresh insert starts a new
    /// single-element list; prior records become unreachable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on lock, table, or log failure.
    pub fn set(&self, urn: &[u8], attr: &[u8], value: &[u8]) -> Result<(), StoreError> {
        if self.is_value_present(urn, attr, value, true)? {
            return Ok(());
        }
        self.set_fresh(urn, attr, value)
    }

    /// Write a single-element list for `(urn, attr)`, discarding any
    /// prior head pointer.
    fn set_fresh(&self, urn: &[u8], attr: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let Some(key) = self.composite_key(urn, attr, true)? else {
            return Ok(());
        };
        let log = &self.log;
        self.index.locked(|kv| {
            let offset = log.append(0, value)?;
            kv.put(key.as_bytes(), &encode_id(offset))
        })?;
        Ok(())
    }

    /// Remove the index entry for `(urn, attr)`.
    ///
    /// Value records stay on disk but become unreachable; a later `add`
    /// starts a fresh list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on table failure.
    pub fn delete(&self, urn: &[u8], attr: &[u8]) -> Result<(), StoreError> {
        if let Some(key) = self.composite_key(urn, attr, false)? {
            self.index.delete(key.as_bytes())?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Statement reads
    // -----------------------------------------------------------------

    /// Read the most recent value for `(urn, attr)` into `buf`.
    ///
    /// No inheritance, no chain walk. Returns the number of bytes
    /// written (at most `buf.len()`; longer payloads are truncated), or
    /// `None` when the pair has no head or the log is truncated under it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on table failure.
    pub fn resolve(
        &self,
        urn: &[u8],
        attr: &[u8],
        buf: &mut [u8],
    ) -> Result<Option<usize>, StoreError> {
        let Some((offset, head)) = self.data_head(urn, attr)? else {
            return Ok(None);
        };
        let take = buf.len().min(head.length as usize);
        match self.log.read_payload(offset, head, take) {
            Some(payload) => {
                buf[..payload.len()].copy_from_slice(&payload);
                Ok(Some(payload.len()))
            }
            None => Ok(None),
        }
    }

    /// All values for `(urn, attr)`, most recent first.
    ///
    /// On a miss (no head, or an oversize head record) and with
    /// `follow_inheritance`, the subject is substituted with its parent
    /// from the `aff4:inherit` chain and the lookup retried, up to
    /// [`MAX_INHERIT_DEPTH`] hops. Truncated or oversize records end the
    /// walk with what was read so far.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on table failure.
    pub fn resolve_list(
        &self,
        urn: &[u8],
        attr: &[u8],
        follow_inheritance: bool,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut subject = urn.to_vec();
        for _ in 0..=MAX_INHERIT_DEPTH {
            if let Some((offset, head)) = self.data_head(&subject, attr)? {
                if head.length < OVERSIZE_VALUE_LEN {
                    return Ok(self.collect_list(offset, head));
                }
                warn!(
                    "skipping oversize head record ({} bytes) for attribute {}",
                    head.length,
                    String::from_utf8_lossy(attr)
                );
            }
            if !follow_inheritance {
                break;
            }
            match self.parent_of(&subject)? {
                Some(parent) => subject = parent,
                None => break,
            }
        }
        Ok(Vec::new())
    }

    /// Whether `value` appears byte-wise anywhere on the list for
    /// `(urn, attr)`, optionally following inheritance.
    ///
    /// Payloads are only read when lengths match. A short read reports
    /// `false` for the whole probe; an oversize record is never compared.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on table failure.
    pub fn is_value_present(
        &self,
        urn: &[u8],
        attr: &[u8],
        value: &[u8],
        follow_inheritance: bool,
    ) -> Result<bool, StoreError> {
        let mut subject = urn.to_vec();
        for _ in 0..=MAX_INHERIT_DEPTH {
            if let Some((mut offset, mut head)) = self.data_head(&subject, attr)? {
                loop {
                    if value.len() == head.length as usize && head.length < OVERSIZE_VALUE_LEN {
                        let Some(payload) =
                            self.log.read_payload(offset, head, head.length as usize)
                        else {
                            return Ok(false); // truncated list
                        };
                        if payload == value {
                            return Ok(true);
                        }
                    }
                    if head.prev == 0 {
                        break;
                    }
                    offset = head.prev;
                    match self.log.read_head(offset) {
                        Some(next) => head = next,
                        None => break,
                    }
                }
            }
            if !follow_inheritance {
                break;
            }
            match self.parent_of(&subject)? {
                Some(parent) => subject = parent,
                None => break,
            }
        }
        Ok(false)
    }

    /// Every asserted attribute of `urn` with its full value list.
    ///
    /// Probes the index for each name in the attribute registry, so the
    /// cost is proportional to the number of known attributes, not to how
    /// many the subject carries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on table failure.
    pub fn export_dict(
        &self,
        urn: &[u8],
    ) -> Result<BTreeMap<Vec<u8>, Vec<Vec<u8>>>, StoreError> {
        let mut dict = BTreeMap::new();
        for attr in self.attributes.iter_names()? {
            if let Some((offset, head)) = self.data_head(urn, &attr)? {
                let values = self.collect_list(offset, head);
                dict.insert(attr, values);
            }
        }
        Ok(dict)
    }

    // -----------------------------------------------------------------
    // Subject locks
    // -----------------------------------------------------------------

    /// Take the blocking advisory lock for `urn` in `mode` (`'r'` or
    /// `'w'`).
    ///
    /// The first lock on a `(subject, mode)` pair reserves a value-log
    /// record (payload: the reserved attribute name) whose byte range is
    /// then locked exclusively. The two modes use two distinct ranges and
    /// do not exclude each other; reader/writer discipline is composed by
    /// callers acquiring both when needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidLockMode`] for other modes, or
    /// [`StoreError::LockIo`] when the OS refuses the lock.
    pub fn lock(&self, urn: &[u8], mode: char) -> Result<(), StoreError> {
        let attr = lock_attr(mode)?;
        let (offset, head) = match self.data_head(urn, attr)? {
            Some(found) => found,
            None => {
                self.set_fresh(urn, attr, attr)?;
                self.data_head(urn, attr)?.ok_or_else(|| StoreError::LockIo {
                    detail: "unable to create lock anchor record".into(),
                })?
            }
        };
        self.log
            .lock_range(offset, head.length)
            .map_err(|e| StoreError::LockIo {
                detail: e.to_string(),
            })?;
        debug!(
            "locked {} mode '{mode}' range [{offset}, +{})",
            String::from_utf8_lossy(urn),
            head.length
        );
        Ok(())
    }

    /// Release the advisory lock for `urn` in `mode`.
    ///
    /// Releasing a subject that was never locked in this mode is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidLockMode`] for other modes, or
    /// [`StoreError::LockIo`] when the OS refuses the unlock.
    pub fn release(&self, urn: &[u8], mode: char) -> Result<(), StoreError> {
        let attr = lock_attr(mode)?;
        let Some((offset, head)) = self.data_head(urn, attr)? else {
            return Ok(());
        };
        self.log
            .unlock_range(offset, head.length)
            .map_err(|e| StoreError::LockIo {
                detail: e.to_string(),
            })?;
        debug!(
            "released {} mode '{mode}'",
            String::from_utf8_lossy(urn)
        );
        Ok(())
    }

    // -----------------------------------------------------------------
    // Internal plumbing
    // -----------------------------------------------------------------

    /// The index key for `(urn, attr)`, `"<sid>:<aid>"`.
    ///
    /// `None` when either name is missing and `create_new` is off.
    fn composite_key(
        &self,
        urn: &[u8],
        attr: &[u8],
        create_new: bool,
    ) -> Result<Option<String>, StoreError> {
        let sid = self.subjects.get_id(urn, create_new)?;
        let aid = self.attributes.get_id(attr, create_new)?;
        if sid == 0 || aid == 0 {
            return Ok(None);
        }
        Ok(Some(format!("{sid}:{aid}")))
    }

    /// Head offset stored in the index under `key`, 0 when absent.
    pub(crate) fn head_offset(&self, key: &str) -> Result<u32, StoreError> {
        Ok(self
            .index
            .get(key.as_bytes())?
            .map_or(0, |raw| decode_id(&raw)))
    }

    /// The head record for `(urn, attr)`: its offset and decoded header.
    ///
    /// `None` when the pair is unknown, unindexed, or the log is
    /// truncated under the head.
    fn data_head(&self, urn: &[u8], attr: &[u8]) -> Result<Option<(u32, RecordHead)>, StoreError> {
        let Some(key) = self.composite_key(urn, attr, false)? else {
            return Ok(None);
        };
        let offset = self.head_offset(&key)?;
        if offset == 0 {
            return Ok(None);
        }
        Ok(self.log.read_head(offset).map(|head| (offset, head)))
    }

    /// Walk the reverse chain from a head, most recent first.
    ///
    /// Best effort: truncation or an oversize record ends the walk with
    /// the values gathered so far.
    pub(crate) fn collect_list(&self, offset: u32, head: RecordHead) -> Vec<Vec<u8>> {
        let mut values = Vec::new();
        let mut offset = offset;
        let mut head = head;
        loop {
            if head.length >= OVERSIZE_VALUE_LEN {
                warn!("oversize record ({} bytes) ends list walk", head.length);
                break;
            }
            match self.log.read_payload(offset, head, head.length as usize) {
                Some(payload) => values.push(payload),
                None => {
                    warn!("short read at offset {offset} ends list walk");
                    break;
                }
            }
            if head.prev == 0 {
                break;
            }
            offset = head.prev;
            match self.log.read_head(offset) {
                Some(next) => head = next,
                None => break,
            }
        }
        values
    }

    /// Resolve the parent URN from the inheritance attribute, if any.
    fn parent_of(&self, urn: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let mut buf = [0u8; INHERIT_BUF_LEN];
        match self.resolve(urn, INHERIT, &mut buf)? {
            Some(n) if n > 0 => Ok(Some(buf[..n].to_vec())),
            _ => Ok(None),
        }
    }

    pub(crate) fn attributes(&self) -> &Registry {
        &self.attributes
    }

    pub(crate) fn log(&self) -> &ValueLog {
        &self.log
    }
}

fn open_error(table: &str, err: &KvError) -> StoreError {
    StoreError::Open {
        table: table.into(),
        detail: err.to_string(),
    }
}

/// Map a mode character to its reserved lock-anchor attribute.
fn lock_attr(mode: char) -> Result<&'static [u8], StoreError> {
    match mode {
        'r' => Ok(RLOCK),
        'w' => Ok(WLOCK),
        found => Err(StoreError::InvalidLockMode { found }),
    }
}
