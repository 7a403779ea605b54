//! Name ↔ ID intern registry.
//!
//! A bidirectional mapping between arbitrary byte-string names and strictly
//! positive 32-bit IDs, persisted in one [`KvFile`] table. Two independent
//! instances back the resolver: one for subject URNs, one for attributes.
//!
//! Encoded form of an ID, both as a stored value and as a reverse-lookup
//! key: the ASCII string `"__" + decimal`. The `"__"` prefix keeps numeric
//! keys and the `__MAX` counter out of name enumeration, which skips every
//! key starting with `_`.
//!
//! IDs are never reused and never change once assigned; `0` is the
//! "absent" sentinel and is never allocated.

use std::path::Path;

use crate::error::KvError;
use crate::kvfile::KvFile;

/// Key under which the last-assigned ID is persisted.
pub const MAX_KEY: &[u8] = b"__MAX";

/// Render an ID in its stored ASCII form, `"__<decimal>"`.
#[must_use]
pub(crate) fn encode_id(id: u32) -> Vec<u8> {
    format!("__{id}").into_bytes()
}

/// Decode a stored `"__<decimal>"` value.
///
/// Anything that does not start with `"__"` followed by at least one ASCII
/// digit decodes to 0, the absent sentinel. Parsing stops at the first
/// non-digit; overflow saturates.
#[must_use]
pub(crate) fn decode_id(bytes: &[u8]) -> u32 {
    let Some(digits) = bytes.strip_prefix(b"__") else {
        return 0;
    };
    let mut value: u64 = 0;
    let mut seen = false;
    for &b in digits {
        if !b.is_ascii_digit() {
            break;
        }
        seen = true;
        value = value * 10 + u64::from(b - b'0');
        if value > u64::from(u32::MAX) {
            return u32::MAX;
        }
    }
    if seen {
        u32::try_from(value).unwrap_or(u32::MAX)
    } else {
        0
    }
}

/// A persistent name-interning registry.
pub struct Registry {
    kv: KvFile,
}

impl Registry {
    /// Open or create the registry table at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] if the backing table cannot be opened.
    pub fn open(path: &Path, hash_size: u32) -> Result<Self, KvError> {
        Ok(Self {
            kv: KvFile::open(path, hash_size)?,
        })
    }

    /// Fetch the ID for `name`, optionally interning it.
    ///
    /// With `create_new`, a missing name is assigned the next ID and both
    /// the forward (`name → id`) and reverse (`id → name`) mappings plus
    /// the `__MAX` counter are written inside one locked section, so
    /// concurrent interning of the same name yields one ID. Without
    /// `create_new`, a missing name yields 0.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] on lock or I/O failure.
    pub fn get_id(&self, name: &[u8], create_new: bool) -> Result<u32, KvError> {
        self.kv.locked(|kv| {
            if let Some(existing) = kv.get(name) {
                return Ok(decode_id(&existing));
            }
            if !create_new {
                return Ok(0);
            }

            let next = kv.get(MAX_KEY).map_or(0, |raw| decode_id(&raw)) + 1;
            let encoded = encode_id(next);
            kv.put(name, &encoded)?;
            kv.put(MAX_KEY, &encoded)?;
            kv.put(&encoded, name)?;
            Ok(next)
        })
    }

    /// Fetch the name interned under `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] on I/O failure.
    pub fn get_name(&self, id: u32) -> Result<Option<Vec<u8>>, KvError> {
        if id == 0 {
            return Ok(None);
        }
        self.kv.get(&encode_id(id))
    }

    /// All interned names, in byte order.
    ///
    /// Internal keys (`__MAX`, the reverse `"__<id>"` mappings, and any
    /// other `_`-prefixed key) are hidden.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] on I/O failure.
    pub fn iter_names(&self) -> Result<Vec<Vec<u8>>, KvError> {
        Ok(self
            .kv
            .keys()?
            .into_iter()
            .filter(|k| k.first() != Some(&b'_'))
            .collect())
    }

    /// The last-assigned ID, 0 when nothing has been interned.
    ///
    /// # Errors
    ///
    /// Returns [`KvError`] on I/O failure.
    pub fn max_id(&self) -> Result<u32, KvError> {
        Ok(self.kv.get(MAX_KEY)?.map_or(0, |raw| decode_id(&raw)))
    }
}
