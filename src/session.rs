// CLASSIFICATION: COMMUNITY
// Filename: session.rs · fat9p v0.1
// Author: Lukas Bower
//
// One 9P connection's state: version negotiation, the FID table, and the
// 13 message handlers. Every handler runs to completion synchronously;
// nothing here suspends except inside a storage-backend call.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::fid::{Fid, FidKind, FidTable, FidTableError};
use crate::fsadapt;
use crate::storage::{Metadata, StorageBackend, StorageError};
use crate::wire::message;
use crate::wire::types::{
    OpenMode, Qid, QidType, Stat, DEFAULT_MSIZE, DMDIR, MAX_WALK_ELEMENTS, MIN_MSIZE, NOFID,
    RECOMMENDED_IOUNIT, VERSION, VERSION_UNKNOWN,
};
use crate::wire::{Envelope, Request, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connected,
    Versioned,
    Attached,
}

/// Maps a backend failure to the exact `Rerror` string the wire contract
/// promises. The single source of truth for that table; handlers never
/// format their own error text.
fn rerror_message(err: StorageError) -> &'static str {
    match err {
        StorageError::NotFound => "file not found",
        StorageError::NotMounted => "not mounted",
        StorageError::InvalidPath => "invalid path",
        StorageError::Io => "i/o error",
        StorageError::Exists => "file exists",
        StorageError::NoSpace => "disk full",
        StorageError::NotEmpty => "directory not empty",
        StorageError::InvalidPosition => "invalid path",
        StorageError::Busy => "storage busy",
    }
}

/// A single 9P connection. Owns its FID table and a session-lifetime
/// cache mapping resolved paths to the QID path first minted for them,
/// so two FIDs addressing the same object always compare equal and a
/// re-read directory never hands out a fresh QID for an entry it has
/// already described, fixing both a stale-walk-path bug and a
/// repeated-directory-read bug in one mechanism.
pub struct Session {
    fids: FidTable,
    next_qid_path: u64,
    path_qids: HashMap<String, u64>,
    state: SessionState,
    msize: u32,
    msize_ceiling: u32,
    storage: Arc<dyn StorageBackend>,
    readonly: bool,
}

impl Session {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        max_fids: usize,
        msize_ceiling: u32,
        readonly: bool,
    ) -> Self {
        let mut path_qids = HashMap::new();
        path_qids.insert("/".to_string(), 1);
        Self {
            fids: FidTable::new(max_fids),
            next_qid_path: 2,
            path_qids,
            state: SessionState::Connected,
            msize: DEFAULT_MSIZE.min(msize_ceiling),
            msize_ceiling,
            storage,
            readonly,
        }
    }

    pub fn msize(&self) -> u32 {
        self.msize
    }

    pub fn fid_count(&self) -> usize {
        self.fids.len()
    }

    /// Process one decoded request and produce the response to send,
    /// tag already filled in.
    pub fn handle(&mut self, envelope: Envelope<Request>) -> Envelope<Response> {
        let tag = envelope.tag;
        let body = self.dispatch(envelope.body);
        Envelope { tag, body }
    }

    fn error(&self, message: &str) -> Response {
        Response::Error {
            ename: message.to_string(),
        }
    }

    fn qid_for_path(&mut self, path: &str, is_dir: bool) -> Qid {
        let path_num = if let Some(&p) = self.path_qids.get(path) {
            p
        } else {
            let p = self.next_qid_path;
            self.next_qid_path += 1;
            self.path_qids.insert(path.to_string(), p);
            p
        };
        Qid::new(QidType::from(is_dir), path_num)
    }

    fn dispatch(&mut self, req: Request) -> Response {
        if let Some(err) = self.check_sequencing(&req) {
            return err;
        }
        match req {
            Request::Version { msize, version } => self.do_version(msize, version),
            Request::Auth { .. } => self.error("authentication not required"),
            Request::Attach { fid, afid, .. } => self.do_attach(fid, afid),
            Request::Flush { .. } => Response::Flush,
            Request::Walk { fid, newfid, wname } => self.do_walk(fid, newfid, wname),
            Request::Open { fid, mode } => self.do_open(fid, mode),
            Request::Create {
                fid,
                name,
                perm,
                mode,
            } => self.do_create(fid, name, perm, mode),
            Request::Read { fid, offset, count } => self.do_read(fid, offset, count),
            Request::Write { fid, offset, data } => self.do_write(fid, offset, data),
            Request::Clunk { fid } => self.do_clunk(fid),
            Request::Remove { fid } => self.do_remove(fid),
            Request::Stat { fid } => self.do_stat(fid),
            Request::Wstat { fid, stat } => self.do_wstat(fid, stat),
        }
    }

    fn check_sequencing(&self, req: &Request) -> Option<Response> {
        // Version and auth are answered the same way in every state: auth
        // always rejects with its own fixed string rather than falling
        // through to "not attached" in the versioned-but-unattached state.
        if matches!(req, Request::Version { .. } | Request::Auth { .. }) {
            return None;
        }
        match self.state {
            SessionState::Connected => Some(self.error("version not negotiated")),
            SessionState::Versioned => {
                if matches!(req, Request::Attach { .. }) {
                    None
                } else {
                    Some(self.error("not attached"))
                }
            }
            SessionState::Attached => None,
        }
    }

    fn do_version(&mut self, msize: u32, version: String) -> Response {
        let negotiated = msize.min(self.msize_ceiling).max(MIN_MSIZE);
        if version.starts_with("9P2000") {
            self.fids.clear();
            self.msize = negotiated;
            self.state = SessionState::Versioned;
            debug!("version negotiated: msize={negotiated}");
            Response::Version {
                msize: negotiated,
                version: VERSION.to_string(),
            }
        } else {
            self.state = SessionState::Connected;
            Response::Version {
                msize: negotiated,
                version: VERSION_UNKNOWN.to_string(),
            }
        }
    }

    fn do_attach(&mut self, fid: u32, afid: u32) -> Response {
        if afid != NOFID {
            return self.error("authentication not required");
        }
        let qid = self.qid_for_path("/", true);
        let entry = Fid::new_directory("/", qid);
        match self.fids.insert(fid, entry) {
            Ok(()) => {
                self.state = SessionState::Attached;
                Response::Attach { qid }
            }
            Err(FidTableError::AlreadyInUse) => self.error("fid in use"),
            Err(FidTableError::CapacityExceeded) => self.error("out of memory"),
        }
    }

    fn do_walk(&mut self, fid: u32, newfid: u32, wname: Vec<String>) -> Response {
        if wname.len() > MAX_WALK_ELEMENTS {
            return self.error("walk failed");
        }
        let source = match self.fids.get(fid) {
            Some(f) => f.clone(),
            None => return self.error("unknown fid"),
        };
        if source.is_open() {
            return self.error("walk failed");
        }
        if source.kind == FidKind::File && !wname.is_empty() {
            return self.error("walk failed");
        }
        if newfid != fid && self.fids.contains(newfid) {
            return self.error("fid in use");
        }

        if wname.is_empty() {
            if let Err(msg) = self.commit_fid(fid, newfid, source.cloned_unopened()) {
                return self.error(msg);
            }
            return Response::Walk { wqid: Vec::new() };
        }

        let mut path = source.path;
        let mut qids = Vec::with_capacity(wname.len());
        let mut final_is_dir = source.kind == FidKind::Directory;
        for (i, name) in wname.iter().enumerate() {
            let candidate = fsadapt::join(&path, name);
            match self.storage.metadata(&candidate) {
                Ok(meta) => {
                    let qid = self.qid_for_path(&candidate, meta.is_dir);
                    final_is_dir = meta.is_dir;
                    qids.push(qid);
                    // The resolved, normalized candidate becomes the new
                    // current path for the next element — never the raw
                    // re-concatenation of the original path with every
                    // wname in one shot.
                    path = candidate;
                }
                Err(_) => {
                    if i == 0 {
                        return self.error("walk failed");
                    }
                    return Response::Walk { wqid: qids };
                }
            }
        }

        let final_qid = *qids.last().expect("wname is non-empty here");
        let kind = if final_is_dir {
            FidKind::Directory
        } else {
            FidKind::File
        };
        let entry = Fid {
            kind,
            qid: final_qid,
            path,
            open_mode: None,
            iounit: 0,
            dir_cursor: Default::default(),
            storage_handle: None,
        };
        if let Err(msg) = self.commit_fid(fid, newfid, entry) {
            return self.error(msg);
        }
        Response::Walk { wqid: qids }
    }

    fn commit_fid(&mut self, fid: u32, newfid: u32, entry: Fid) -> Result<(), &'static str> {
        if newfid == fid {
            self.fids.replace(newfid, entry);
            Ok(())
        } else {
            match self.fids.insert(newfid, entry) {
                Ok(()) => Ok(()),
                Err(FidTableError::AlreadyInUse) => Err("fid in use"),
                Err(FidTableError::CapacityExceeded) => Err("out of memory"),
            }
        }
    }

    fn do_open(&mut self, fid: u32, mode: u8) -> Response {
        let Some(existing) = self.fids.get(fid) else {
            return self.error("unknown fid");
        };
        if existing.is_open() {
            return self.error("invalid mode");
        }
        let path = existing.path.clone();
        let kind = existing.kind;
        let qid = existing.qid;

        let open_mode = match OpenMode::from_raw(mode) {
            Ok(m) => m,
            Err(_) => return self.error("invalid mode"),
        };
        if self.readonly && open_mode.allows_write() {
            return self.error("permission denied");
        }

        if kind == FidKind::Directory {
            if open_mode.allows_write() {
                return self.error("not a directory");
            }
            if let Some(f) = self.fids.get_mut(fid) {
                f.open_mode = Some(open_mode);
                f.iounit = RECOMMENDED_IOUNIT;
                f.dir_cursor = Default::default();
            }
            return Response::Open {
                qid,
                iounit: RECOMMENDED_IOUNIT,
            };
        }

        match self.storage.open(&path) {
            Ok(handle) => {
                if open_mode.truncate {
                    if let Err(e) = self.storage.truncate(handle) {
                        self.storage.close(handle);
                        return self.error(rerror_message(e));
                    }
                }
                if let Some(f) = self.fids.get_mut(fid) {
                    f.open_mode = Some(open_mode);
                    f.iounit = RECOMMENDED_IOUNIT;
                    f.storage_handle = Some(handle);
                }
                Response::Open {
                    qid,
                    iounit: RECOMMENDED_IOUNIT,
                }
            }
            Err(e) => {
                warn!("open {path} failed: {e}");
                self.error(rerror_message(e))
            }
        }
    }

    fn do_create(&mut self, fid: u32, name: String, perm: u32, mode: u8) -> Response {
        if self.readonly {
            return self.error("permission denied");
        }
        let Some(existing) = self.fids.get(fid) else {
            return self.error("unknown fid");
        };
        if existing.kind != FidKind::Directory {
            return self.error("not a directory");
        }
        if existing.is_open() {
            return self.error("invalid mode");
        }
        let parent = existing.path.clone();

        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return self.error("invalid path");
        }
        if name.len() > 255 {
            return self.error("name too long");
        }
        let open_mode = match OpenMode::from_raw(mode) {
            Ok(m) => m,
            Err(_) => return self.error("invalid mode"),
        };

        let path = fsadapt::join(&parent, &name);
        let is_dir = perm & DMDIR != 0;

        let result = if is_dir {
            self.storage.dir_create(&path).map(|()| None)
        } else {
            self.storage.create_file(&path).map(Some)
        };

        match result {
            Ok(handle) => {
                let qid = self.qid_for_path(&path, is_dir);
                let kind = if is_dir {
                    FidKind::Directory
                } else {
                    FidKind::File
                };
                let entry = Fid {
                    kind,
                    qid,
                    path,
                    open_mode: Some(open_mode),
                    iounit: RECOMMENDED_IOUNIT,
                    dir_cursor: Default::default(),
                    storage_handle: handle,
                };
                self.fids.replace(fid, entry);
                Response::Create {
                    qid,
                    iounit: RECOMMENDED_IOUNIT,
                }
            }
            Err(e) => self.error(rerror_message(e)),
        }
    }

    fn do_read(&mut self, fid: u32, offset: u64, count: u32) -> Response {
        let max_count = self.msize.saturating_sub(11);
        let count = count.min(max_count);
        let Some(existing) = self.fids.get(fid) else {
            return self.error("unknown fid");
        };
        if !existing.is_open() {
            return self.error("file not open");
        }
        match existing.kind {
            FidKind::Directory => self.read_dir(fid, offset, count),
            FidKind::File => self.read_file(fid, offset, count),
            _ => self.error("not a directory"),
        }
    }

    fn read_file(&mut self, fid: u32, offset: u64, count: u32) -> Response {
        let handle = match self.fids.get(fid).and_then(|f| f.storage_handle) {
            Some(h) => h,
            None => return self.error("file not open"),
        };
        let mut buf = vec![0u8; count as usize];
        match self.storage.read(handle, offset, &mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Response::Read { data: buf }
            }
            Err(e) => self.error(rerror_message(e)),
        }
    }

    fn read_dir(&mut self, fid: u32, offset: u64, count: u32) -> Response {
        let (path, mut index, emitted) = match self.fids.get(fid) {
            Some(f) => (f.path.clone(), f.dir_cursor.next_index, f.dir_cursor.emitted_offset),
            None => return self.error("unknown fid"),
        };
        if offset == 0 {
            index = 0;
        } else if offset != emitted {
            return Response::Read { data: Vec::new() };
        }

        let mut out = Vec::new();
        loop {
            let entry = match self.storage.dir_entry(&path, index) {
                Ok(Some(e)) => e,
                Ok(None) => break,
                Err(e) => return self.error(rerror_message(e)),
            };
            let meta = Metadata {
                is_dir: entry.is_dir,
                size: entry.size,
                fat_date: entry.fat_date,
                fat_time: entry.fat_time,
                read_only: entry.read_only,
            };
            let child_path = fsadapt::join(&path, &entry.name);
            let qid = self.qid_for_path(&child_path, entry.is_dir);
            let stat = fsadapt::build_stat(qid, &entry.name, &meta);
            let encoded = match message::encode_stat(&stat, 4096) {
                Ok(b) => b,
                Err(_) => return self.error("invalid stat"),
            };
            if out.len() + encoded.len() > count as usize {
                break;
            }
            out.extend_from_slice(&encoded);
            index += 1;
        }

        let emitted_now = out.len() as u64;
        if let Some(f) = self.fids.get_mut(fid) {
            f.dir_cursor.next_index = index;
            f.dir_cursor.emitted_offset = offset + emitted_now;
        }
        Response::Read { data: out }
    }

    fn do_write(&mut self, fid: u32, offset: u64, data: Vec<u8>) -> Response {
        if self.readonly {
            return self.error("permission denied");
        }
        let Some(existing) = self.fids.get(fid) else {
            return self.error("unknown fid");
        };
        if existing.kind == FidKind::Directory {
            return self.error("cannot write to directory");
        }
        if !existing.is_open() {
            return self.error("file not open");
        }
        let Some(handle) = existing.storage_handle else {
            return self.error("file not open");
        };
        match self.storage.write(handle, offset, &data) {
            Ok(n) => Response::Write { count: n as u32 },
            Err(e) => self.error(rerror_message(e)),
        }
    }

    fn do_clunk(&mut self, fid: u32) -> Response {
        match self.fids.remove(fid) {
            Some(entry) => {
                if let Some(handle) = entry.storage_handle {
                    self.storage.close(handle);
                }
                Response::Clunk
            }
            None => self.error("unknown fid"),
        }
    }

    fn do_remove(&mut self, fid: u32) -> Response {
        let Some(entry) = self.fids.remove(fid) else {
            return self.error("unknown fid");
        };
        if let Some(handle) = entry.storage_handle {
            self.storage.close(handle);
        }
        if self.readonly {
            return self.error("permission denied");
        }
        match self.storage.delete(&entry.path) {
            Ok(()) => Response::Remove,
            Err(e) => self.error(rerror_message(e)),
        }
    }

    fn do_stat(&mut self, fid: u32) -> Response {
        let Some(existing) = self.fids.get(fid) else {
            return self.error("unknown fid");
        };
        let path = existing.path.clone();
        let qid = existing.qid;
        match self.storage.metadata(&path) {
            Ok(meta) => {
                let name = if path == "/" {
                    String::new()
                } else {
                    fsadapt::basename(&path).to_string()
                };
                Response::Stat {
                    stat: fsadapt::build_stat(qid, &name, &meta),
                }
            }
            Err(e) => self.error(rerror_message(e)),
        }
    }

    fn do_wstat(&mut self, fid: u32, stat: Stat) -> Response {
        if self.readonly {
            return self.error("permission denied");
        }
        let Some(existing) = self.fids.get(fid) else {
            return self.error("unknown fid");
        };
        let path = existing.path.clone();

        let rename_to = match fsadapt::validate_wstat(&stat) {
            Ok(name) => name,
            Err(msg) => return self.error(msg),
        };
        let Some(new_name) = rename_to else {
            return Response::Wstat;
        };

        let parent = fsadapt::parent_of(&path);
        let new_path = fsadapt::join(&parent, new_name);
        match self.storage.rename(&path, &new_path) {
            Ok(()) => {
                if let Some(f) = self.fids.get_mut(fid) {
                    f.path = new_path;
                }
                Response::Wstat
            }
            Err(e) => self.error(rerror_message(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfs::MemFs;
    use crate::storage::DEFAULT_LOCK_TIMEOUT;
    use crate::wire::types::MAX_MSIZE;

    fn session_with(fs: Arc<MemFs>) -> Session {
        Session::new(fs, 64, MAX_MSIZE, false)
    }

    fn versioned(session: &mut Session) {
        let resp = session.do_version(8192, "9P2000.u".to_string());
        assert!(matches!(resp, Response::Version { .. }));
    }

    #[test]
    fn version_negotiates_and_clears_fids() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        let mut session = session_with(fs);
        let resp = session.do_version(8192, "9P2000.u".to_string());
        assert_eq!(
            resp,
            Response::Version {
                msize: 8192,
                version: "9P2000.u".to_string(),
            }
        );
        assert_eq!(session.fid_count(), 0);
    }

    #[test]
    fn version_with_unknown_offer_stays_connected() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        let mut session = session_with(fs);
        let resp = session.do_version(8192, "bogus".to_string());
        assert_eq!(
            resp,
            Response::Version {
                msize: 8192,
                version: "unknown".to_string(),
            }
        );
        assert_eq!(session.state, SessionState::Connected);
    }

    #[test]
    fn requests_before_version_are_rejected() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        let mut session = session_with(fs);
        let resp = session.dispatch(Request::Attach {
            fid: 0,
            afid: NOFID,
            uname: "u".into(),
            aname: "".into(),
        });
        assert_eq!(
            resp,
            Response::Error {
                ename: "version not negotiated".into()
            }
        );
    }

    #[test]
    fn flush_before_version_is_rejected() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        let mut session = session_with(fs);
        let resp = session.dispatch(Request::Flush { oldtag: 0 });
        assert_eq!(
            resp,
            Response::Error {
                ename: "version not negotiated".into()
            }
        );
    }

    #[test]
    fn auth_rejects_with_its_own_message_even_when_not_yet_attached() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        let mut session = session_with(fs);
        versioned(&mut session);
        let resp = session.dispatch(Request::Auth {
            afid: 0,
            uname: "u".into(),
            aname: "".into(),
        });
        assert_eq!(
            resp,
            Response::Error {
                ename: "authentication not required".into()
            }
        );
    }

    #[test]
    fn attach_allocates_root_with_qid_path_one() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        let mut session = session_with(fs);
        versioned(&mut session);
        let resp = session.do_attach(0, NOFID);
        assert_eq!(
            resp,
            Response::Attach {
                qid: Qid::new(QidType::DIR, 1)
            }
        );
    }

    #[test]
    fn walking_to_existing_file_yields_one_qid() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        fs.seed_file("/hello.txt", b"hello".to_vec(), false);
        let mut session = session_with(fs);
        versioned(&mut session);
        session.do_attach(0, NOFID);

        let resp = session.do_walk(0, 1, vec!["hello.txt".to_string()]);
        match resp {
            Response::Walk { wqid } => {
                assert_eq!(wqid.len(), 1);
                assert!(!wqid[0].ty.is_dir());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(session.fids.get(1).unwrap().path, "/hello.txt");
    }

    #[test]
    fn walk_failure_past_first_element_leaves_newfid_uncreated() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        fs.seed_dir("/a");
        let mut session = session_with(fs);
        versioned(&mut session);
        session.do_attach(0, NOFID);

        let resp = session.do_walk(0, 2, vec!["a".to_string(), "b".to_string()]);
        match resp {
            Response::Walk { wqid } => assert_eq!(wqid.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!session.fids.contains(2));
        let clunk = session.do_clunk(2);
        assert_eq!(
            clunk,
            Response::Error {
                ename: "unknown fid".into()
            }
        );
    }

    #[test]
    fn walking_from_a_file_fid_fails_unless_wname_is_empty() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        fs.seed_file("/f", vec![], false);
        // A flat namespace entry nested "under" the file path would let a
        // naive implementation resolve it via metadata lookup alone.
        fs.seed_file("/f/nested", vec![], false);
        let mut session = session_with(fs);
        versioned(&mut session);
        session.do_attach(0, NOFID);
        session.do_walk(0, 1, vec!["f".to_string()]);

        let resp = session.do_walk(1, 2, vec!["nested".to_string()]);
        assert_eq!(
            resp,
            Response::Error {
                ename: "walk failed".into()
            }
        );
        assert!(!session.fids.contains(2));

        let clone = session.do_walk(1, 3, vec![]);
        assert!(matches!(clone, Response::Walk { wqid } if wqid.is_empty()));
    }

    #[test]
    fn walk_first_element_failure_is_an_error() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        let mut session = session_with(fs);
        versioned(&mut session);
        session.do_attach(0, NOFID);
        let resp = session.do_walk(0, 1, vec!["missing".to_string()]);
        assert_eq!(
            resp,
            Response::Error {
                ename: "walk failed".into()
            }
        );
    }

    #[test]
    fn revisiting_the_same_path_yields_the_same_qid() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        fs.seed_file("/x", vec![], false);
        let mut session = session_with(fs);
        versioned(&mut session);
        session.do_attach(0, NOFID);
        session.do_walk(0, 1, vec!["x".to_string()]);
        let first = session.fids.get(1).unwrap().qid;
        session.do_clunk(1);
        session.do_walk(0, 1, vec!["x".to_string()]);
        let second = session.fids.get(1).unwrap().qid;
        assert_eq!(first, second);
    }

    #[test]
    fn open_read_round_trips_file_contents() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        fs.seed_file("/f", b"payload".to_vec(), false);
        let mut session = session_with(fs);
        versioned(&mut session);
        session.do_attach(0, NOFID);
        session.do_walk(0, 1, vec!["f".to_string()]);
        let open = session.do_open(1, 0);
        assert!(matches!(open, Response::Open { .. }));
        let read = session.do_read(1, 0, 100);
        assert_eq!(read, Response::Read { data: b"payload".to_vec() });
        let eof = session.do_read(1, 7, 100);
        assert_eq!(eof, Response::Read { data: Vec::new() });
    }

    #[test]
    fn repeated_directory_read_is_stable() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        fs.seed_file("/a", vec![], false);
        fs.seed_file("/b", vec![], false);
        let mut session = session_with(fs);
        versioned(&mut session);
        session.do_attach(0, NOFID);
        session.do_open(0, 0);
        let first = session.do_read(0, 0, 4096);
        let Response::Read { data: first_bytes } = first else {
            panic!("expected read")
        };
        // Reset the cursor and read again from offset 0: must reproduce
        // byte-for-byte identical output, including QIDs, the second time.
        session.fids.get_mut(0).unwrap().dir_cursor = Default::default();
        let second = session.do_read(0, 0, 4096);
        let Response::Read { data: second_bytes } = second else {
            panic!("expected read")
        };
        assert_eq!(first_bytes, second_bytes);
    }

    #[test]
    fn remove_destroys_fid_even_on_failure() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        fs.seed_dir("/d");
        fs.seed_file("/d/x", vec![], false);
        let mut session = session_with(fs);
        versioned(&mut session);
        session.do_attach(0, NOFID);
        session.do_walk(0, 3, vec!["d".to_string()]);
        let resp = session.do_remove(3);
        assert_eq!(
            resp,
            Response::Error {
                ename: "directory not empty".into()
            }
        );
        let stat = session.do_stat(3);
        assert_eq!(
            stat,
            Response::Error {
                ename: "unknown fid".into()
            }
        );
    }

    #[test]
    fn wstat_renames_and_rejects_other_field_changes() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        fs.seed_file("/old.txt", vec![], false);
        let mut session = session_with(fs);
        versioned(&mut session);
        session.do_attach(0, NOFID);
        session.do_walk(0, 1, vec!["old.txt".to_string()]);

        let blank = Stat {
            ty: crate::wire::types::dontcare::U16,
            dev: crate::wire::types::dontcare::U32,
            qid: Qid::new(QidType::FILE, crate::wire::types::dontcare::U64),
            mode: crate::wire::types::dontcare::U32,
            atime: crate::wire::types::dontcare::U32,
            mtime: crate::wire::types::dontcare::U32,
            length: crate::wire::types::dontcare::U64,
            name: "new.txt".to_string(),
            uid: String::new(),
            gid: String::new(),
            muid: String::new(),
            extension: String::new(),
            n_uid: crate::wire::types::dontcare::U32,
            n_gid: crate::wire::types::dontcare::U32,
            n_muid: crate::wire::types::dontcare::U32,
        };
        let resp = session.do_wstat(1, blank.clone());
        assert_eq!(resp, Response::Wstat);
        assert_eq!(session.fids.get(1).unwrap().path, "/new.txt");

        let mut tampered = blank;
        tampered.name = String::new();
        tampered.length = 0;
        let resp = session.do_wstat(1, tampered);
        assert_eq!(
            resp,
            Response::Error {
                ename: "invalid stat".into()
            }
        );
    }

    #[test]
    fn readonly_session_rejects_mutation() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        fs.seed_file("/f", vec![], false);
        let mut session = Session::new(fs, 64, MAX_MSIZE, true);
        versioned(&mut session);
        session.do_attach(0, NOFID);
        session.do_walk(0, 1, vec!["f".to_string()]);
        let resp = session.do_open(1, 1); // write-only
        assert_eq!(
            resp,
            Response::Error {
                ename: "permission denied".into()
            }
        );
    }
}
