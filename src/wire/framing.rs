// CLASSIFICATION: COMMUNITY
// Filename: wire/framing.rs · fat9p v0.1
// Author: Lukas Bower
//
// Splits a byte stream into complete 9P messages. Knows nothing about
// message types; only the 4-byte size prefix.

/// Outcome of checking whether a receive buffer currently holds a
/// complete message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Fewer than 4 bytes buffered, or the declared size has not all
    /// arrived yet.
    NeedMore,
    /// A full message of `len` bytes (including the 7-byte header) is
    /// present at the front of the buffer.
    OneComplete(usize),
    /// The declared size is outside `[7, msize]`. Fatal: the session
    /// that sees this must terminate.
    Malformed,
}

/// Inspect `buf` and report whether it holds one complete message.
///
/// `msize` is the session's negotiated ceiling (or the default before
/// negotiation completes).
pub fn check(buf: &[u8], msize: u32) -> FrameStatus {
    if buf.len() < 4 {
        return FrameStatus::NeedMore;
    }
    let size = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if size < 7 || size > msize {
        return FrameStatus::Malformed;
    }
    if (buf.len() as u64) < size as u64 {
        return FrameStatus::NeedMore;
    }
    FrameStatus::OneComplete(size as usize)
}
