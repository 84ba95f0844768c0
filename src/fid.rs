// CLASSIFICATION: COMMUNITY
// Filename: fid.rs · fat9p v0.1
// Author: Lukas Bower
//
// The per-session handle table. A `Fid` is the unit of addressable state
// a client holds; the table enforces the allocation/capacity rules a
// session must honor on every walk/attach/clunk.

use std::collections::BTreeMap;

use crate::wire::types::{OpenMode, Qid};

/// What a FID currently refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FidKind {
    None,
    File,
    Directory,
    Auth,
}

/// Cursor into an open directory's entry stream, so repeated `Tread`
/// calls at increasing offsets resume rather than restart.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirCursor {
    pub next_index: usize,
    /// Cumulative byte offset this FID has emitted up to so far; a
    /// `Tread` at this exact offset continues from `next_index`.
    pub emitted_offset: u64,
}

/// One live handle-table entry.
#[derive(Debug, Clone)]
pub struct Fid {
    pub kind: FidKind,
    pub qid: Qid,
    /// Canonical absolute, normalized path this FID currently names.
    pub path: String,
    pub open_mode: Option<OpenMode>,
    pub iounit: u32,
    pub dir_cursor: DirCursor,
    /// Backend handle, present only once `open`/`create` succeeded on a
    /// file FID.
    pub storage_handle: Option<crate::storage::Handle>,
}

impl Fid {
    pub fn new_directory(path: impl Into<String>, qid: Qid) -> Self {
        Self {
            kind: FidKind::Directory,
            qid,
            path: path.into(),
            open_mode: None,
            iounit: 0,
            dir_cursor: DirCursor::default(),
            storage_handle: None,
        }
    }

    pub fn new_file(path: impl Into<String>, qid: Qid) -> Self {
        Self {
            kind: FidKind::File,
            qid,
            path: path.into(),
            open_mode: None,
            iounit: 0,
            dir_cursor: DirCursor::default(),
            storage_handle: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open_mode.is_some()
    }

    /// A clone shares path/kind/qid but never the open state: walking
    /// through an already-open FID must not duplicate its handle.
    pub fn cloned_unopened(&self) -> Self {
        Self {
            kind: self.kind,
            qid: self.qid,
            path: self.path.clone(),
            open_mode: None,
            iounit: 0,
            dir_cursor: DirCursor::default(),
            storage_handle: None,
        }
    }
}

/// Errors from handle-table operations, distinct from wire/storage errors
/// because they never leave this module without being mapped to an
/// `Rerror` string by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FidTableError {
    AlreadyInUse,
    Unknown,
    CapacityExceeded,
}

/// Per-session FID table: a bounded, unique mapping from client-chosen
/// 32-bit id to live handle.
#[derive(Debug)]
pub struct FidTable {
    entries: BTreeMap<u32, Fid>,
    capacity: usize,
}

impl FidTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, fid: u32) -> bool {
        self.entries.contains_key(&fid)
    }

    pub fn get(&self, fid: u32) -> Option<&Fid> {
        self.entries.get(&fid)
    }

    pub fn get_mut(&mut self, fid: u32) -> Option<&mut Fid> {
        self.entries.get_mut(&fid)
    }

    /// Insert a brand-new FID. Rejects an id already in use (a protocol
    /// error) and rejects exceeding the session's capacity.
    pub fn insert(&mut self, fid: u32, value: Fid) -> Result<(), FidTableError> {
        if self.entries.contains_key(&fid) {
            return Err(FidTableError::AlreadyInUse);
        }
        if self.entries.len() >= self.capacity {
            return Err(FidTableError::CapacityExceeded);
        }
        self.entries.insert(fid, value);
        Ok(())
    }

    /// Overwrite an existing FID in place (used by `create`, and by
    /// `walk` when `newfid == fid`).
    pub fn replace(&mut self, fid: u32, value: Fid) {
        self.entries.insert(fid, value);
    }

    pub fn remove(&mut self, fid: u32) -> Option<Fid> {
        self.entries.remove(&fid)
    }

    /// Discard every FID. Used on successful `version` renegotiation and
    /// on session teardown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
