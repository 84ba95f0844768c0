// CLASSIFICATION: COMMUNITY
// Filename: stream.rs · fat9p v0.1
// Author: Lukas Bower
//
// A byte-stream abstraction the session loop reads/writes against, plus
// an in-process duplex implementation so integration tests can drive a
// `Session` without binding a real socket.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Anything the listener can hand a session: a duplex byte stream that
/// can be cloned to hand the read half and write half to the same
/// session loop independently.
pub trait Transport: Read + Write + Send {
    fn try_clone_transport(&self) -> io::Result<Box<dyn Transport>>;
}

impl Transport for std::net::TcpStream {
    fn try_clone_transport(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.try_clone()?))
    }
}

/// In-process byte stream implemented with crossbeam channels, used by
/// integration tests to exercise `Session` without a socket.
#[derive(Clone)]
pub struct InProcessStream {
    rx: Receiver<Vec<u8>>,
    tx: Sender<Vec<u8>>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl InProcessStream {
    /// Create paired streams for bidirectional communication.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        (
            Self {
                rx: a_rx,
                tx: b_tx,
                buffer: Arc::new(Mutex::new(Vec::new())),
            },
            Self {
                rx: b_rx,
                tx: a_tx,
                buffer: Arc::new(Mutex::new(Vec::new())),
            },
        )
    }
}

impl Read for InProcessStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut local = self.buffer.lock().expect("stream buffer mutex");
        if local.is_empty() {
            match self.rx.recv() {
                Ok(data) => *local = data,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(local.len());
        buf[..n].copy_from_slice(&local[..n]);
        local.drain(..n);
        Ok(n)
    }
}

impl Write for InProcessStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for InProcessStream {
    fn try_clone_transport(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_relays_bytes_in_both_directions() {
        let (mut a, mut b) = InProcessStream::pair();
        a.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        b.write_all(b"pong").unwrap();
        a.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }
}
