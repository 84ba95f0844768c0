// CLASSIFICATION: COMMUNITY
// Filename: wire/message.rs · fat9p v0.1
// Author: Lukas Bower
//
// Typed request/response bodies and their encode/decode functions. This is
// the only module that knows the 9P2000.u payload shapes; everything above
// it deals in `Request`/`Response` values, never raw bytes.

use super::cursor::{Reader, Writer};
use super::types::{CodecError, Qid, QidType, Stat};

/// The closed set of 9P2000.u message types, plus `Rerror`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Tversion = 100,
    Rversion = 101,
    Tauth = 102,
    Rauth = 103,
    Tattach = 104,
    Rattach = 105,
    Rerror = 107,
    Tflush = 108,
    Rflush = 109,
    Twalk = 110,
    Rwalk = 111,
    Topen = 112,
    Ropen = 113,
    Tcreate = 114,
    Rcreate = 115,
    Tread = 116,
    Rread = 117,
    Twrite = 118,
    Rwrite = 119,
    Tclunk = 120,
    Rclunk = 121,
    Tremove = 122,
    Rremove = 123,
    Tstat = 124,
    Rstat = 125,
    Twstat = 126,
    Rwstat = 127,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(raw: u8) -> Result<Self, CodecError> {
        use MessageType::*;
        Ok(match raw {
            100 => Tversion,
            101 => Rversion,
            102 => Tauth,
            103 => Rauth,
            104 => Tattach,
            105 => Rattach,
            107 => Rerror,
            108 => Tflush,
            109 => Rflush,
            110 => Twalk,
            111 => Rwalk,
            112 => Topen,
            113 => Ropen,
            114 => Tcreate,
            115 => Rcreate,
            116 => Tread,
            117 => Rread,
            118 => Twrite,
            119 => Rwrite,
            120 => Tclunk,
            121 => Rclunk,
            122 => Tremove,
            123 => Rremove,
            124 => Tstat,
            125 => Rstat,
            126 => Twstat,
            127 => Rwstat,
            other => return Err(CodecError::Unsupported(other)),
        })
    }
}

/// A decoded client request, paired with its tag at the `Envelope` level.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Version { msize: u32, version: String },
    Auth { afid: u32, uname: String, aname: String },
    Attach { fid: u32, afid: u32, uname: String, aname: String },
    Flush { oldtag: u16 },
    Walk { fid: u32, newfid: u32, wname: Vec<String> },
    Open { fid: u32, mode: u8 },
    Create { fid: u32, name: String, perm: u32, mode: u8 },
    Read { fid: u32, offset: u64, count: u32 },
    Write { fid: u32, offset: u64, data: Vec<u8> },
    Clunk { fid: u32 },
    Remove { fid: u32 },
    Stat { fid: u32 },
    Wstat { fid: u32, stat: Stat },
}

/// A server response body, paired with the echoed tag by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Version { msize: u32, version: String },
    Auth { aqid: Qid },
    Attach { qid: Qid },
    Error { ename: String },
    Flush,
    Walk { wqid: Vec<Qid> },
    Open { qid: Qid, iounit: u32 },
    Create { qid: Qid, iounit: u32 },
    Read { data: Vec<u8> },
    Write { count: u32 },
    Clunk,
    Remove,
    Stat { stat: Stat },
    Wstat,
}

/// An envelope ties a decoded body to the tag it arrived (or must leave) with.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub tag: u16,
    pub body: T,
}

impl Request {
    pub fn message_type(&self) -> MessageType {
        use MessageType::*;
        match self {
            Request::Version { .. } => Tversion,
            Request::Auth { .. } => Tauth,
            Request::Attach { .. } => Tattach,
            Request::Flush { .. } => Tflush,
            Request::Walk { .. } => Twalk,
            Request::Open { .. } => Topen,
            Request::Create { .. } => Tcreate,
            Request::Read { .. } => Tread,
            Request::Write { .. } => Twrite,
            Request::Clunk { .. } => Tclunk,
            Request::Remove { .. } => Tremove,
            Request::Stat { .. } => Tstat,
            Request::Wstat { .. } => Twstat,
        }
    }
}

impl Response {
    pub fn message_type(&self) -> MessageType {
        use MessageType::*;
        match self {
            Response::Version { .. } => Rversion,
            Response::Auth { .. } => Rauth,
            Response::Attach { .. } => Rattach,
            Response::Error { .. } => Rerror,
            Response::Flush => Rflush,
            Response::Walk { .. } => Rwalk,
            Response::Open { .. } => Ropen,
            Response::Create { .. } => Rcreate,
            Response::Read { .. } => Rread,
            Response::Write { .. } => Rwrite,
            Response::Clunk => Rclunk,
            Response::Remove => Rremove,
            Response::Stat { .. } => Rstat,
            Response::Wstat => Rwstat,
        }
    }
}

fn read_qid(r: &mut Reader) -> Result<Qid, CodecError> {
    let ty = QidType::from_raw(r.u8()?);
    let version = r.u32()?;
    let path = r.u64()?;
    Ok(Qid { ty, version, path })
}

fn write_qid(w: &mut Writer, q: Qid) -> Result<(), CodecError> {
    w.u8(q.ty.raw())?;
    w.u32(q.version)?;
    w.u64(q.path)?;
    Ok(())
}

/// Reads a stat record including its own inner size prefix, per §4.1:
/// signal `Truncated` if the declared size does not match the bytes
/// actually consumed.
fn read_stat(r: &mut Reader) -> Result<Stat, CodecError> {
    let declared = r.u16()? as usize;
    let start = r.position();
    let ty = r.u16()?;
    let dev = r.u32()?;
    let qid = read_qid(r)?;
    let mode = r.u32()?;
    let atime = r.u32()?;
    let mtime = r.u32()?;
    let length = r.u64()?;
    let name = r.string()?;
    let uid = r.string()?;
    let gid = r.string()?;
    let muid = r.string()?;
    let extension = r.string()?;
    let n_uid = r.u32()?;
    let n_gid = r.u32()?;
    let n_muid = r.u32()?;
    let consumed = r.position() - start;
    if consumed != declared {
        return Err(CodecError::LengthMismatch {
            declared: declared as u32,
            actual: consumed,
        });
    }
    Ok(Stat {
        ty,
        dev,
        qid,
        mode,
        atime,
        mtime,
        length,
        name,
        uid,
        gid,
        muid,
        extension,
        n_uid,
        n_gid,
        n_muid,
    })
}

/// Encode a single stat record standalone (used for directory-read
/// entries, which concatenate raw stat encodings rather than wrapping
/// them in an `Rstat` response).
pub fn encode_stat(s: &Stat, capacity: usize) -> Result<Vec<u8>, CodecError> {
    let mut w = Writer::with_capacity(capacity);
    write_stat(&mut w, s)?;
    Ok(w.into_inner())
}

fn write_stat(w: &mut Writer, s: &Stat) -> Result<(), CodecError> {
    w.u16(s.encoded_len())?;
    w.u16(s.ty)?;
    w.u32(s.dev)?;
    write_qid(w, s.qid)?;
    w.u32(s.mode)?;
    w.u32(s.atime)?;
    w.u32(s.mtime)?;
    w.u64(s.length)?;
    w.string(&s.name)?;
    w.string(&s.uid)?;
    w.string(&s.gid)?;
    w.string(&s.muid)?;
    w.string(&s.extension)?;
    w.u32(s.n_uid)?;
    w.u32(s.n_gid)?;
    w.u32(s.n_muid)?;
    Ok(())
}

/// Decode a request body given its already-identified message type.
pub fn decode_request(ty: MessageType, body: &[u8]) -> Result<Request, CodecError> {
    let mut r = Reader::new(body);
    Ok(match ty {
        MessageType::Tversion => Request::Version {
            msize: r.u32()?,
            version: r.string()?,
        },
        MessageType::Tauth => Request::Auth {
            afid: r.u32()?,
            uname: r.string()?,
            aname: r.string()?,
        },
        MessageType::Tattach => Request::Attach {
            fid: r.u32()?,
            afid: r.u32()?,
            uname: r.string()?,
            aname: r.string()?,
        },
        MessageType::Tflush => Request::Flush {
            oldtag: r.u16()?,
        },
        MessageType::Twalk => {
            let fid = r.u32()?;
            let newfid = r.u32()?;
            let nwname = r.u16()? as usize;
            let mut wname = Vec::with_capacity(nwname.min(super::types::MAX_WALK_ELEMENTS));
            for _ in 0..nwname {
                wname.push(r.string()?);
            }
            Request::Walk { fid, newfid, wname }
        }
        MessageType::Topen => Request::Open {
            fid: r.u32()?,
            mode: r.u8()?,
        },
        MessageType::Tcreate => Request::Create {
            fid: r.u32()?,
            name: r.string()?,
            perm: r.u32()?,
            mode: r.u8()?,
        },
        MessageType::Tread => Request::Read {
            fid: r.u32()?,
            offset: r.u64()?,
            count: r.u32()?,
        },
        MessageType::Twrite => {
            let fid = r.u32()?;
            let offset = r.u64()?;
            let count = r.u32()? as usize;
            let data = r.bytes(count)?.to_vec();
            Request::Write { fid, offset, data }
        }
        MessageType::Tclunk => Request::Clunk { fid: r.u32()? },
        MessageType::Tremove => Request::Remove { fid: r.u32()? },
        MessageType::Tstat => Request::Stat { fid: r.u32()? },
        MessageType::Twstat => {
            let fid = r.u32()?;
            let stat = read_stat(&mut r)?;
            Request::Wstat { fid, stat }
        }
        other => return Err(CodecError::Unsupported(other as u8)),
    })
}

/// Encode a request body (used by tests acting as a 9P client).
pub fn encode_request(req: &Request, capacity: usize) -> Result<Vec<u8>, CodecError> {
    let mut w = Writer::with_capacity(capacity);
    match req {
        Request::Version { msize, version } => {
            w.u32(*msize)?;
            w.string(version)?;
        }
        Request::Auth { afid, uname, aname } => {
            w.u32(*afid)?;
            w.string(uname)?;
            w.string(aname)?;
        }
        Request::Attach { fid, afid, uname, aname } => {
            w.u32(*fid)?;
            w.u32(*afid)?;
            w.string(uname)?;
            w.string(aname)?;
        }
        Request::Flush { oldtag } => w.u16(*oldtag)?,
        Request::Walk { fid, newfid, wname } => {
            w.u32(*fid)?;
            w.u32(*newfid)?;
            w.u16(wname.len() as u16)?;
            for name in wname {
                w.string(name)?;
            }
        }
        Request::Open { fid, mode } => {
            w.u32(*fid)?;
            w.u8(*mode)?;
        }
        Request::Create { fid, name, perm, mode } => {
            w.u32(*fid)?;
            w.string(name)?;
            w.u32(*perm)?;
            w.u8(*mode)?;
        }
        Request::Read { fid, offset, count } => {
            w.u32(*fid)?;
            w.u64(*offset)?;
            w.u32(*count)?;
        }
        Request::Write { fid, offset, data } => {
            w.u32(*fid)?;
            w.u64(*offset)?;
            w.u32(data.len() as u32)?;
            w.bytes(data)?;
        }
        Request::Clunk { fid }
        | Request::Remove { fid }
        | Request::Stat { fid } => w.u32(*fid)?,
        Request::Wstat { fid, stat } => {
            w.u32(*fid)?;
            write_stat(&mut w, stat)?;
        }
    }
    Ok(w.into_inner())
}

/// Decode a response body given its already-identified message type.
pub fn decode_response(ty: MessageType, body: &[u8]) -> Result<Response, CodecError> {
    let mut r = Reader::new(body);
    Ok(match ty {
        MessageType::Rversion => Response::Version {
            msize: r.u32()?,
            version: r.string()?,
        },
        MessageType::Rauth => Response::Auth { aqid: read_qid(&mut r)? },
        MessageType::Rattach => Response::Attach { qid: read_qid(&mut r)? },
        MessageType::Rerror => Response::Error { ename: r.string()? },
        MessageType::Rflush => Response::Flush,
        MessageType::Rwalk => {
            let nwqid = r.u16()? as usize;
            let mut wqid = Vec::with_capacity(nwqid.min(super::types::MAX_WALK_ELEMENTS));
            for _ in 0..nwqid {
                wqid.push(read_qid(&mut r)?);
            }
            Response::Walk { wqid }
        }
        MessageType::Ropen => Response::Open {
            qid: read_qid(&mut r)?,
            iounit: r.u32()?,
        },
        MessageType::Rcreate => Response::Create {
            qid: read_qid(&mut r)?,
            iounit: r.u32()?,
        },
        MessageType::Rread => {
            let count = r.u32()? as usize;
            Response::Read { data: r.bytes(count)?.to_vec() }
        }
        MessageType::Rwrite => Response::Write { count: r.u32()? },
        MessageType::Rclunk => Response::Clunk,
        MessageType::Rremove => Response::Remove,
        MessageType::Rstat => Response::Stat { stat: read_stat(&mut r)? },
        MessageType::Rwstat => Response::Wstat,
        other => return Err(CodecError::Unsupported(other as u8)),
    })
}

/// Encode a response body.
pub fn encode_response(resp: &Response, capacity: usize) -> Result<Vec<u8>, CodecError> {
    let mut w = Writer::with_capacity(capacity);
    match resp {
        Response::Version { msize, version } => {
            w.u32(*msize)?;
            w.string(version)?;
        }
        Response::Auth { aqid } => write_qid(&mut w, *aqid)?,
        Response::Attach { qid } => write_qid(&mut w, *qid)?,
        Response::Error { ename } => w.string(ename)?,
        Response::Flush | Response::Clunk | Response::Remove | Response::Wstat => {}
        Response::Walk { wqid } => {
            w.u16(wqid.len() as u16)?;
            for q in wqid {
                write_qid(&mut w, *q)?;
            }
        }
        Response::Open { qid, iounit } => {
            write_qid(&mut w, *qid)?;
            w.u32(*iounit)?;
        }
        Response::Create { qid, iounit } => {
            write_qid(&mut w, *qid)?;
            w.u32(*iounit)?;
        }
        Response::Read { data } => {
            w.u32(data.len() as u32)?;
            w.bytes(data)?;
        }
        Response::Write { count } => w.u32(*count)?,
        Response::Stat { stat } => write_stat(&mut w, stat)?,
    }
    Ok(w.into_inner())
}
