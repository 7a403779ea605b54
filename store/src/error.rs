//! Typed store errors.
//!
//! Read paths favour best-effort empty results: a short read, a failed
//! checksum, or an oversize record stops a traversal without surfacing an
//! error. Write paths and constructors return the typed errors below.

/// Typed failure for the embedded key-value table.
#[derive(Debug)]
pub enum KvError {
    /// Underlying file I/O failed.
    Io { detail: String },

    /// The table file exists but does not start with the expected magic.
    BadMagic { path: String },

    /// The in-process table mutex was poisoned by a panicking thread.
    Poisoned,
}

impl std::fmt::Display for KvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { detail } => write!(f, "I/O error: {detail}"),
            Self::BadMagic { path } => write!(f, "not a kv table file: {path}"),
            Self::Poisoned => write!(f, "table mutex poisoned"),
        }
    }
}

impl std::error::Error for KvError {}

impl From<std::io::Error> for KvError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            detail: err.to_string(),
        }
    }
}

/// Typed failure for resolver operations.
#[derive(Debug)]
pub enum StoreError {
    /// One of the four backing files could not be opened or created.
    /// The constructor fails atomically; handles opened earlier are dropped.
    Open { table: String, detail: String },

    /// A backing table operation failed.
    Kv(KvError),

    /// Value-log I/O failed on a write path.
    Io { detail: String },

    /// The subject URN is not interned.
    SubjectNotFound { urn: String },

    /// Lock mode other than `'r'` or `'w'`.
    InvalidLockMode { found: char },

    /// The OS refused an advisory-lock operation.
    LockIo { detail: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { table, detail } => {
                write!(f, "unable to open {table}: {detail}")
            }
            Self::Kv(e) => write!(f, "table error: {e}"),
            Self::Io { detail } => write!(f, "value log I/O error: {detail}"),
            Self::SubjectNotFound { urn } => write!(f, "urn not found: {urn}"),
            Self::InvalidLockMode { found } => write!(f, "invalid lock mode '{found}'"),
            Self::LockIo { detail } => write!(f, "advisory lock failure: {detail}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<KvError> for StoreError {
    fn from(err: KvError) -> Self {
        Self::Kv(err)
    }
}

/// Typed failure for RDF serialization.
#[derive(Debug)]
pub enum RdfError {
    /// The format selector is not a known serialization syntax.
    UnknownFormat { found: String },

    /// The subject URN is not interned, so it has no triples.
    SubjectNotFound { urn: String },

    /// A store read failed while walking the subject's attributes.
    Store(StoreError),
}

impl std::fmt::Display for RdfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownFormat { found } => write!(f, "unknown serialization format: {found}"),
            Self::SubjectNotFound { urn } => write!(f, "urn not found: {urn}"),
            Self::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for RdfError {}

impl From<StoreError> for RdfError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}
