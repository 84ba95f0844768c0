// CLASSIFICATION: COMMUNITY
// Filename: lib.rs · fat9p v0.1
// Author: Lukas Bower
//
// ─────────────────────────────────────────────────────────────────────────────
// fat9p – a 9P2000.u file service over TCP
//
// Exports a hierarchical filesystem to any 9P client: version negotiation,
// walk, open/create, read/write, and stat/wstat, all driven off a small
// `StorageBackend` trait so the wire protocol never has to know whether
// the tree underneath is FAT32, something else on disk, or in memory.
//
// # Public Surface
// * [`wire`] – framing and the typed message codec.
// * [`session`] – per-connection state machine and FID table.
// * [`storage`] / [`memfs`] – the backend contract and a reference backend.
// * [`server`] – the TCP listener, config, and control surface.
// ─────────────────────────────────────────────────────────────────────────────

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! A 9P2000.u file service exporting a FAT32-shaped tree over TCP.

pub mod fid;
pub mod fsadapt;
pub mod memfs;
pub mod server;
pub mod session;
pub mod storage;
pub mod stream;
pub mod wire;

pub use memfs::MemFs;
pub use server::{ServerConfig, ServerHandle, ServerStats, TerminatedSession};
pub use session::Session;
pub use storage::StorageBackend;

use std::sync::Arc;

/// Build a server bound to an in-memory backend and start it, using
/// default configuration. Convenient for smoke tests and local demos;
/// production deployments construct their own `StorageBackend` and feed
/// it to [`ServerHandle::new`] directly.
pub fn start_server() -> std::io::Result<ServerHandle> {
    let config = ServerConfig::default();
    let storage: Arc<dyn StorageBackend> = Arc::new(MemFs::new(config.lock_timeout()));
    let handle = ServerHandle::new(config, storage);
    handle.start()?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 564);
        assert_eq!(cfg.max_sessions, 3);
    }
}
