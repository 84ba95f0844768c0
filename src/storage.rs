// CLASSIFICATION: COMMUNITY
// Filename: storage.rs · fat9p v0.1
// Author: Lukas Bower
//
// The storage adaptor contract. A backend exposes exactly the operations
// below; everything about FAT32 vs. POSIX vs. in-memory is hidden behind
// this trait. Every call is expected to acquire the backend's single
// global lock internally and hold it for no more than one call.

use std::time::Duration;

use thiserror::Error;

/// Default bound on how long a caller waits to acquire the backend's
/// global lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// One backend-reported failure. Mapped to a fixed `Rerror` string by
/// `session::rerror_message`, never surfaced verbatim.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("file not found")]
    NotFound,
    #[error("not mounted")]
    NotMounted,
    #[error("invalid path")]
    InvalidPath,
    #[error("i/o error")]
    Io,
    #[error("file exists")]
    Exists,
    #[error("disk full")]
    NoSpace,
    #[error("directory not empty")]
    NotEmpty,
    #[error("invalid position")]
    InvalidPosition,
    #[error("storage busy")]
    Busy,
}

/// Opaque handle to an open file. Backends are free to make this
/// whatever representation suits them; the session layer only ever
/// stores and passes it back.
pub type Handle = u64;

/// One entry yielded by directory iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// FAT-encoded date (bits 9-15 year-1980, 5-8 month, 0-4 day).
    pub fat_date: u16,
    /// FAT-encoded time (bits 11-15 hours, 5-10 minutes, 0-4 seconds/2).
    pub fat_time: u16,
    pub read_only: bool,
}

/// Metadata about a single open-or-named object, independent of any 9P
/// framing. The filesystem adaptor turns this into a `Stat` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub is_dir: bool,
    pub size: u64,
    pub fat_date: u16,
    pub fat_time: u16,
    pub read_only: bool,
}

/// The backend contract (spec §4.4). Implementors serialize every call
/// behind one lock with a bounded wait; a timeout must surface as `Io`.
pub trait StorageBackend: Send + Sync {
    fn open(&self, path: &str) -> Result<Handle, StorageError>;
    fn create_file(&self, path: &str) -> Result<Handle, StorageError>;
    fn read(&self, handle: Handle, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError>;
    fn write(&self, handle: Handle, offset: u64, buf: &[u8]) -> Result<usize, StorageError>;
    fn size(&self, handle: Handle) -> Result<u64, StorageError>;
    fn truncate(&self, handle: Handle) -> Result<(), StorageError>;
    fn close(&self, handle: Handle);

    fn metadata(&self, path: &str) -> Result<Metadata, StorageError>;
    fn dir_create(&self, path: &str) -> Result<(), StorageError>;
    /// Read the `index`-th entry (0-based, in backend order, `.`/`..`
    /// already excluded) of the directory at `path`.
    fn dir_entry(&self, path: &str, index: usize) -> Result<Option<DirEntry>, StorageError>;
    fn delete(&self, path: &str) -> Result<(), StorageError>;
    fn rename(&self, old: &str, new: &str) -> Result<(), StorageError>;

    fn free_space(&self) -> u64;
    fn total_space(&self) -> u64;
}
