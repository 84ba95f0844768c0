// CLASSIFICATION: COMMUNITY
// Filename: memfs.rs · fat9p v0.1
// Author: Lukas Bower
//
// A reference in-memory storage backend. Grounded in the same
// single-lock-over-a-flat-map shape as `CohesixFs`'s node table, widened
// to the full `StorageBackend` contract so it can stand in for any real
// filesystem that implements the same trait.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{trace, warn};

use crate::storage::{DirEntry, Handle, Metadata, StorageBackend, StorageError};

#[derive(Debug, Clone)]
enum Node {
    File {
        data: Vec<u8>,
        read_only: bool,
        fat_date: u16,
        fat_time: u16,
    },
    Dir {
        fat_date: u16,
        fat_time: u16,
    },
}

struct Inner {
    nodes: BTreeMap<String, Node>,
    open_handles: HashMap<Handle, String>,
}

/// In-memory reference backend. Paths are expected to already be
/// normalized by the caller (see `fsadapt::normalize`).
pub struct MemFs {
    inner: Mutex<Inner>,
    next_handle: AtomicU64,
    lock_timeout: Duration,
}

const POLL_INTERVAL: Duration = Duration::from_millis(1);

impl MemFs {
    pub fn new(lock_timeout: Duration) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Dir {
                fat_date: 0,
                fat_time: 0,
            },
        );
        Self {
            inner: Mutex::new(Inner {
                nodes,
                open_handles: HashMap::new(),
            }),
            next_handle: AtomicU64::new(1),
            lock_timeout,
        }
    }

    /// Seed a plain file for tests/fixtures without going through the
    /// 9P handler path.
    pub fn seed_file(&self, path: &str, data: Vec<u8>, read_only: bool) {
        let mut guard = self.lock().expect("seeding happens before contention");
        guard.nodes.insert(
            path.to_string(),
            Node::File {
                data,
                read_only,
                fat_date: 0,
                fat_time: 0,
            },
        );
    }

    pub fn seed_dir(&self, path: &str) {
        let mut guard = self.lock().expect("seeding happens before contention");
        guard.nodes.insert(
            path.to_string(),
            Node::Dir {
                fat_date: 0,
                fat_time: 0,
            },
        );
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StorageError> {
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match self.inner.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(std::sync::TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        warn!("storage lock timed out after {:?}", self.lock_timeout);
                        return Err(StorageError::Busy);
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(std::sync::TryLockError::Poisoned(_)) => {
                    return Err(StorageError::Io);
                }
            }
        }
    }

    fn child_prefix(path: &str) -> String {
        if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        }
    }
}

impl StorageBackend for MemFs {
    fn open(&self, path: &str) -> Result<Handle, StorageError> {
        let mut guard = self.lock()?;
        match guard.nodes.get(path) {
            Some(Node::File { .. }) => {
                let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
                guard.open_handles.insert(handle, path.to_string());
                trace!("opened {path} as handle {handle}");
                Ok(handle)
            }
            Some(Node::Dir { .. }) => Err(StorageError::InvalidPath),
            None => Err(StorageError::NotFound),
        }
    }

    fn create_file(&self, path: &str) -> Result<Handle, StorageError> {
        let mut guard = self.lock()?;
        if guard.nodes.contains_key(path) {
            return Err(StorageError::Exists);
        }
        guard.nodes.insert(
            path.to_string(),
            Node::File {
                data: Vec::new(),
                read_only: false,
                fat_date: 0,
                fat_time: 0,
            },
        );
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        guard.open_handles.insert(handle, path.to_string());
        Ok(handle)
    }

    fn read(&self, handle: Handle, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        let guard = self.lock()?;
        let path = guard.open_handles.get(&handle).ok_or(StorageError::Io)?;
        match guard.nodes.get(path) {
            Some(Node::File { data, .. }) => {
                let offset = offset as usize;
                if offset >= data.len() {
                    return Ok(0);
                }
                let end = (offset + buf.len()).min(data.len());
                let n = end - offset;
                buf[..n].copy_from_slice(&data[offset..end]);
                Ok(n)
            }
            _ => Err(StorageError::Io),
        }
    }

    fn write(&self, handle: Handle, offset: u64, buf: &[u8]) -> Result<usize, StorageError> {
        let mut guard = self.lock()?;
        let path = guard
            .open_handles
            .get(&handle)
            .cloned()
            .ok_or(StorageError::Io)?;
        match guard.nodes.get_mut(&path) {
            Some(Node::File { data, read_only, .. }) => {
                if *read_only {
                    return Err(StorageError::Io);
                }
                let offset = offset as usize;
                let end = offset + buf.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[offset..end].copy_from_slice(buf);
                Ok(buf.len())
            }
            _ => Err(StorageError::Io),
        }
    }

    fn size(&self, handle: Handle) -> Result<u64, StorageError> {
        let guard = self.lock()?;
        let path = guard.open_handles.get(&handle).ok_or(StorageError::Io)?;
        match guard.nodes.get(path) {
            Some(Node::File { data, .. }) => Ok(data.len() as u64),
            _ => Err(StorageError::Io),
        }
    }

    fn truncate(&self, handle: Handle) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let path = guard
            .open_handles
            .get(&handle)
            .cloned()
            .ok_or(StorageError::Io)?;
        match guard.nodes.get_mut(&path) {
            Some(Node::File { data, read_only, .. }) => {
                if *read_only {
                    return Err(StorageError::Io);
                }
                data.clear();
                Ok(())
            }
            _ => Err(StorageError::Io),
        }
    }

    fn close(&self, handle: Handle) {
        if let Ok(mut guard) = self.lock() {
            guard.open_handles.remove(&handle);
        }
    }

    fn metadata(&self, path: &str) -> Result<Metadata, StorageError> {
        let guard = self.lock()?;
        match guard.nodes.get(path) {
            Some(Node::File {
                data,
                read_only,
                fat_date,
                fat_time,
            }) => Ok(Metadata {
                is_dir: false,
                size: data.len() as u64,
                fat_date: *fat_date,
                fat_time: *fat_time,
                read_only: *read_only,
            }),
            Some(Node::Dir { fat_date, fat_time }) => Ok(Metadata {
                is_dir: true,
                size: 0,
                fat_date: *fat_date,
                fat_time: *fat_time,
                read_only: false,
            }),
            None => Err(StorageError::NotFound),
        }
    }

    fn dir_create(&self, path: &str) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if guard.nodes.contains_key(path) {
            return Err(StorageError::Exists);
        }
        guard.nodes.insert(
            path.to_string(),
            Node::Dir {
                fat_date: 0,
                fat_time: 0,
            },
        );
        Ok(())
    }

    fn dir_entry(&self, path: &str, index: usize) -> Result<Option<DirEntry>, StorageError> {
        let guard = self.lock()?;
        match guard.nodes.get(path) {
            Some(Node::Dir { .. }) => {}
            Some(Node::File { .. }) => return Err(StorageError::InvalidPath),
            None => return Err(StorageError::NotFound),
        }
        let prefix = Self::child_prefix(path);
        let mut children: Vec<(&String, &Node)> = guard
            .nodes
            .iter()
            .filter(|(key, _)| {
                key.len() > prefix.len()
                    && key.starts_with(&prefix)
                    && !key[prefix.len()..].contains('/')
            })
            .collect();
        children.sort_by(|a, b| a.0.cmp(b.0));
        let Some((full_path, node)) = children.get(index) else {
            return Ok(None);
        };
        let name = full_path[prefix.len()..].to_string();
        let entry = match node {
            Node::File {
                data,
                read_only,
                fat_date,
                fat_time,
            } => DirEntry {
                name,
                is_dir: false,
                size: data.len() as u64,
                fat_date: *fat_date,
                fat_time: *fat_time,
                read_only: *read_only,
            },
            Node::Dir { fat_date, fat_time } => DirEntry {
                name,
                is_dir: true,
                size: 0,
                fat_date: *fat_date,
                fat_time: *fat_time,
                read_only: false,
            },
        };
        Ok(Some(entry))
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        match guard.nodes.get(path) {
            Some(Node::Dir { .. }) => {
                let prefix = Self::child_prefix(path);
                let has_children = guard.nodes.keys().any(|k| k.starts_with(&prefix) && k != path);
                if has_children {
                    return Err(StorageError::NotEmpty);
                }
            }
            Some(Node::File { .. }) => {}
            None => return Err(StorageError::NotFound),
        }
        guard.nodes.remove(path);
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if !guard.nodes.contains_key(old) {
            return Err(StorageError::NotFound);
        }
        if guard.nodes.contains_key(new) {
            return Err(StorageError::Exists);
        }
        let old_prefix = Self::child_prefix(old);
        let descendants: Vec<String> = guard
            .nodes
            .keys()
            .filter(|k| k.starts_with(&old_prefix))
            .cloned()
            .collect();
        let root = guard.nodes.remove(old).expect("checked above");
        guard.nodes.insert(new.to_string(), root);
        for child in descendants {
            if let Some(node) = guard.nodes.remove(&child) {
                let suffix = &child[old_prefix.len()..];
                guard.nodes.insert(format!("{new}/{suffix}"), node);
            }
        }
        Ok(())
    }

    fn free_space(&self) -> u64 {
        // Advisory only; an in-memory backend has no fixed ceiling, so a
        // representative FAT32-volume-sized value is reported.
        512 * 1024 * 1024
    }

    fn total_space(&self) -> u64 {
        1024 * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DEFAULT_LOCK_TIMEOUT;

    fn fs() -> MemFs {
        MemFs::new(DEFAULT_LOCK_TIMEOUT)
    }

    #[test]
    fn root_exists_and_is_a_directory() {
        let fs = fs();
        let meta = fs.metadata("/").unwrap();
        assert!(meta.is_dir);
    }

    #[test]
    fn create_open_write_read_round_trips() {
        let fs = fs();
        let h = fs.create_file("/a.txt").unwrap();
        fs.write(h, 0, b"hello").unwrap();
        fs.close(h);

        let h2 = fs.open("/a.txt").unwrap();
        let mut buf = [0u8; 5];
        let n = fs.read(h2, 0, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn read_past_eof_returns_zero() {
        let fs = fs();
        let h = fs.create_file("/a.txt").unwrap();
        fs.write(h, 0, b"hi").unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(fs.read(h, 100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn directory_listing_skips_unrelated_entries_and_is_ordered() {
        let fs = fs();
        fs.seed_file("/b.txt", vec![], false);
        fs.seed_file("/a.txt", vec![], false);
        fs.seed_dir("/sub");
        fs.seed_file("/sub/nested.txt", vec![], false);

        let mut names = Vec::new();
        let mut i = 0;
        while let Some(entry) = fs.dir_entry("/", i).unwrap() {
            names.push(entry.name);
            i += 1;
        }
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
    }

    #[test]
    fn delete_nonempty_directory_fails() {
        let fs = fs();
        fs.seed_dir("/sub");
        fs.seed_file("/sub/x", vec![], false);
        assert_eq!(fs.delete("/sub"), Err(StorageError::NotEmpty));
    }

    #[test]
    fn rename_moves_directory_and_descendants() {
        let fs = fs();
        fs.seed_dir("/old");
        fs.seed_file("/old/x", b"x".to_vec(), false);
        fs.rename("/old", "/new").unwrap();
        assert!(fs.metadata("/new").unwrap().is_dir);
        assert!(fs.metadata("/new/x").is_ok());
        assert_eq!(fs.metadata("/old"), Err(StorageError::NotFound));
    }
}
