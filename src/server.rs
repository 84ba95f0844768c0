// CLASSIFICATION: COMMUNITY
// Filename: server.rs · fat9p v0.1
// Author: Lukas Bower
//
// The TCP listener: accepts connections up to a configured session cap,
// hands each one a fresh `Session` and a frame-read/frame-write loop, and
// keeps a small set of counters and a bounded log of why sessions ended
// so an operator can inspect a running server from the outside.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, info, warn};
use serde::Deserialize;

use crate::session::Session;
use crate::storage::StorageBackend;
use crate::stream::Transport;
use crate::wire;
use crate::wire::framing::{self, FrameStatus};
use crate::wire::types::MAX_MSIZE;

/// How many terminated-session causes the control surface remembers.
const TERMINATED_LOG_CAPACITY: usize = 64;

/// Everything a deployment can tune without a rebuild. Mirrors
/// the fields `Session` and a `StorageBackend` need at construction time.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub max_sessions: usize,
    pub max_fids_per_session: usize,
    pub msize_ceiling: u32,
    pub lock_timeout_ms: u64,
    pub readonly: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 564,
            max_sessions: 3,
            max_fids_per_session: 64,
            msize_ceiling: MAX_MSIZE,
            lock_timeout_ms: 5_000,
            readonly: false,
        }
    }
}

impl ServerConfig {
    /// Parse a config from JSON text, falling back to defaults for any
    /// field the document omits.
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// A point-in-time snapshot of the server's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub errors: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

#[derive(Default)]
struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    messages_in: AtomicU64,
    messages_out: AtomicU64,
    errors: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

/// Why one session's connection loop ended, kept around for the bounded
/// ring buffer the control surface exposes.
#[derive(Debug, Clone)]
pub struct TerminatedSession {
    pub id: u64,
    pub cause: String,
}

fn record_termination(log: &Mutex<VecDeque<TerminatedSession>>, id: u64, cause: String) {
    let mut guard = log.lock().expect("terminated-session log mutex");
    if guard.len() >= TERMINATED_LOG_CAPACITY {
        guard.pop_front();
    }
    guard.push_back(TerminatedSession { id, cause });
}

/// A running (or stopped) server. The intended shutdown path is to call
/// `stop` from another thread; there is no signal handling here.
pub struct ServerHandle {
    config: ServerConfig,
    storage: Arc<dyn StorageBackend>,
    running: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    terminated: Arc<Mutex<VecDeque<TerminatedSession>>>,
    active_sessions: Arc<AtomicUsize>,
    next_session_id: Arc<AtomicU64>,
}

impl ServerHandle {
    pub fn new(config: ServerConfig, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            config,
            storage,
            running: Arc::new(AtomicBool::new(false)),
            accept_thread: Mutex::new(None),
            counters: Arc::new(Counters::default()),
            terminated: Arc::new(Mutex::new(VecDeque::with_capacity(TERMINATED_LOG_CAPACITY))),
            active_sessions: Arc::new(AtomicUsize::new(0)),
            next_session_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Bind the configured port and start accepting connections on a
    /// background thread. Idempotent: calling `start` on an
    /// already-running handle is a no-op.
    pub fn start(&self) -> io::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let listener = match TcpListener::bind(("0.0.0.0", self.config.port)) {
            Ok(l) => l,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        info!("fat9p listening on port {}", self.config.port);

        let running = self.running.clone();
        let config = self.config.clone();
        let storage = self.storage.clone();
        let counters = self.counters.clone();
        let terminated = self.terminated.clone();
        let active_sessions = self.active_sessions.clone();
        let next_session_id = self.next_session_id.clone();

        let handle = std::thread::spawn(move || {
            for incoming in listener.incoming() {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                let stream = match incoming {
                    Ok(s) => s,
                    Err(e) => {
                        error!("accept failed: {e}");
                        continue;
                    }
                };
                if active_sessions.load(Ordering::SeqCst) >= config.max_sessions {
                    warn!("rejecting connection: at max_sessions ({})", config.max_sessions);
                    drop(stream);
                    continue;
                }

                active_sessions.fetch_add(1, Ordering::SeqCst);
                counters.total_connections.fetch_add(1, Ordering::Relaxed);
                counters.active_connections.fetch_add(1, Ordering::Relaxed);
                let id = next_session_id.fetch_add(1, Ordering::Relaxed);

                let session = Session::new(
                    storage.clone(),
                    config.max_fids_per_session,
                    config.msize_ceiling,
                    config.readonly,
                );
                let counters_for_thread = counters.clone();
                let terminated = terminated.clone();
                let active_sessions = active_sessions.clone();

                std::thread::spawn(move || {
                    let cause = serve_connection(Box::new(stream), session, &counters_for_thread);
                    active_sessions.fetch_sub(1, Ordering::SeqCst);
                    counters_for_thread
                        .active_connections
                        .fetch_sub(1, Ordering::Relaxed);
                    info!("session {id} terminated: {cause}");
                    record_termination(&terminated, id, cause);
                });
            }
        });
        *self.accept_thread.lock().expect("accept thread mutex") = Some(handle);
        Ok(())
    }

    /// Signal the accept loop to stop taking new connections. Existing
    /// sessions run to their own completion; this does not kick anyone.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn client_count(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }

    pub fn terminated_sessions(&self) -> Vec<TerminatedSession> {
        self.terminated
            .lock()
            .expect("terminated-session log mutex")
            .iter()
            .cloned()
            .collect()
    }
}

/// Drive one connection's read/decode/handle/encode/write loop until the
/// peer disconnects or a framing violation forces termination. Returns a
/// short human-readable cause for the terminated-session log.
fn serve_connection(mut stream: Box<dyn Transport>, mut session: Session, counters: &Counters) -> String {
    let mut recv_buf: Vec<u8> = Vec::new();
    let mut read_chunk = vec![0u8; session.msize().max(4096) as usize];

    loop {
        match framing::check(&recv_buf, session.msize()) {
            FrameStatus::NeedMore => match stream.read(&mut read_chunk) {
                Ok(0) => return "peer closed the connection".to_string(),
                Ok(n) => {
                    recv_buf.extend_from_slice(&read_chunk[..n]);
                    counters.bytes_in.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) => return format!("read error: {e}"),
            },
            FrameStatus::Malformed => return "framing violation".to_string(),
            FrameStatus::OneComplete(len) => {
                let frame: Vec<u8> = recv_buf.drain(..len).collect();
                counters.messages_in.fetch_add(1, Ordering::Relaxed);

                let response = match wire::decode_frame(&frame) {
                    Ok(envelope) => {
                        let resp = session.handle(envelope);
                        wire::encode_frame(resp.tag, &resp.body, session.msize() as usize)
                    }
                    Err(e) => {
                        counters.errors.fetch_add(1, Ordering::Relaxed);
                        let tag = wire::peek_tag(&frame);
                        wire::encode_error_frame(tag, wire::error_message(&e), session.msize() as usize)
                    }
                };

                match response {
                    Ok(bytes) => {
                        if let Err(e) = stream.write_all(&bytes) {
                            return format!("write error: {e}");
                        }
                        counters.bytes_out.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                        counters.messages_out.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => return "response too large to encode".to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfs::MemFs;
    use crate::storage::DEFAULT_LOCK_TIMEOUT;
    use crate::stream::InProcessStream;
    use crate::wire::message;
    use crate::wire::types::{NOTAG, VERSION};
    use crate::wire::{MessageType, Request};

    #[test]
    fn config_defaults_match_documented_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 564);
        assert_eq!(cfg.max_sessions, 3);
        assert_eq!(cfg.max_fids_per_session, 64);
        assert!(!cfg.readonly);
    }

    #[test]
    fn config_from_json_fills_in_missing_fields() {
        let cfg = ServerConfig::from_json(r#"{"port": 9999}"#).unwrap();
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.max_sessions, 3);
    }

    #[test]
    fn serve_connection_answers_a_version_request_then_sees_close() {
        let fs = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        let session = Session::new(fs, 64, MAX_MSIZE, false);
        let (mut client, server_side) = InProcessStream::pair();
        let counters = Counters::default();

        let worker = std::thread::spawn(move || {
            serve_connection(Box::new(server_side), session, &counters);
        });

        let req = Request::Version {
            msize: 8192,
            version: VERSION.to_string(),
        };
        let body = message::encode_request(&req, 64).unwrap();
        let mut frame = Vec::new();
        frame.extend_from_slice(&((7 + body.len()) as u32).to_le_bytes());
        frame.push(MessageType::Tversion as u8);
        frame.extend_from_slice(&NOTAG.to_le_bytes());
        frame.extend_from_slice(&body);
        client.write_all(&frame).unwrap();

        let mut size_buf = [0u8; 4];
        client.read_exact(&mut size_buf).unwrap();
        let total = u32::from_le_bytes(size_buf) as usize;
        let mut rest = vec![0u8; total - 4];
        client.read_exact(&mut rest).unwrap();

        let tag = u16::from_le_bytes([rest[1], rest[2]]);
        assert_eq!(tag, NOTAG);

        drop(client);
        worker.join().unwrap();
    }

    #[test]
    fn handle_reports_zero_clients_before_start() {
        let fs: Arc<dyn StorageBackend> = Arc::new(MemFs::new(DEFAULT_LOCK_TIMEOUT));
        let handle = ServerHandle::new(
            ServerConfig {
                max_sessions: 1,
                ..ServerConfig::default()
            },
            fs,
        );
        assert_eq!(handle.client_count(), 0);
        assert!(!handle.is_running());
        assert_eq!(handle.stats(), ServerStats::default());
        assert!(handle.terminated_sessions().is_empty());
    }
}
