// CLASSIFICATION: COMMUNITY
// Filename: protocol.rs v0.1
// Author: Lukas Bower
//
// End-to-end scenarios driven over a real TCP connection against a
// running `ServerHandle`, exercising the full wire round trip: framing,
// the typed codec, and the session state machine together.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use fat9p::memfs::MemFs;
use fat9p::server::{ServerConfig, ServerHandle};
use fat9p::storage::StorageBackend;
use fat9p::wire::message::{decode_response, encode_request};
use fat9p::wire::types::{NOFID, NOTAG, VERSION};
use fat9p::wire::{MessageType, Request, Response};

use serial_test::serial;

fn start(port: u16) -> ServerHandle {
    let storage: Arc<dyn StorageBackend> = Arc::new(MemFs::new(Duration::from_secs(5)));
    storage.dir_create("/tmp").unwrap();
    storage.create_file("/tmp/greeting.txt").unwrap();
    let handle = storage.open("/tmp/greeting.txt").unwrap();
    storage.write(handle, 0, b"hello world").unwrap();
    storage.close(handle);

    let config = ServerConfig {
        port,
        ..ServerConfig::default()
    };
    let server = ServerHandle::new(config, storage);
    server.start().unwrap_or_else(|e| panic!("server start failed: {e}"));
    std::thread::sleep(Duration::from_millis(100));
    server
}

fn send(stream: &mut TcpStream, tag: u16, req: &Request) -> Response {
    let body = encode_request(req, 8192).unwrap();
    let mut frame = Vec::new();
    frame.extend_from_slice(&((7 + body.len()) as u32).to_le_bytes());
    frame.push(req.message_type() as u8);
    frame.extend_from_slice(&tag.to_le_bytes());
    frame.extend_from_slice(&body);
    stream.write_all(&frame).unwrap();

    let mut size_buf = [0u8; 4];
    stream.read_exact(&mut size_buf).unwrap();
    let total = u32::from_le_bytes(size_buf) as usize;
    let mut rest = vec![0u8; total - 4];
    stream.read_exact(&mut rest).unwrap();

    let msg_type = MessageType::try_from(rest[0]).unwrap();
    let got_tag = u16::from_le_bytes([rest[1], rest[2]]);
    assert_eq!(got_tag, tag, "server must echo the request's tag");
    decode_response(msg_type, &rest[3..]).unwrap()
}

#[test]
#[serial]
fn full_session_walks_opens_reads_and_removes() {
    let server = start(17_564);
    let mut stream = TcpStream::connect("127.0.0.1:17564").unwrap();

    let version = send(
        &mut stream,
        NOTAG,
        &Request::Version {
            msize: 8192,
            version: VERSION.to_string(),
        },
    );
    assert_eq!(
        version,
        Response::Version {
            msize: 8192,
            version: VERSION.to_string()
        }
    );

    let attach = send(
        &mut stream,
        0,
        &Request::Attach {
            fid: 0,
            afid: NOFID,
            uname: "tester".into(),
            aname: String::new(),
        },
    );
    assert!(matches!(attach, Response::Attach { .. }));

    let walk = send(
        &mut stream,
        1,
        &Request::Walk {
            fid: 0,
            newfid: 1,
            wname: vec!["tmp".into(), "greeting.txt".into()],
        },
    );
    match walk {
        Response::Walk { wqid } => assert_eq!(wqid.len(), 2),
        other => panic!("unexpected response: {other:?}"),
    }

    let open = send(&mut stream, 2, &Request::Open { fid: 1, mode: 0 });
    assert!(matches!(open, Response::Open { .. }));

    let read = send(
        &mut stream,
        3,
        &Request::Read {
            fid: 1,
            offset: 0,
            count: 64,
        },
    );
    assert_eq!(
        read,
        Response::Read {
            data: b"hello world".to_vec()
        }
    );

    let clunk = send(&mut stream, 4, &Request::Clunk { fid: 1 });
    assert_eq!(clunk, Response::Clunk);

    assert_eq!(server.stats().total_connections, 1);
    drop(stream);
    server.stop();
}

#[test]
#[serial]
fn walk_failure_past_first_element_still_returns_partial_qids() {
    let server = start(17_565);
    let mut stream = TcpStream::connect("127.0.0.1:17565").unwrap();

    send(
        &mut stream,
        NOTAG,
        &Request::Version {
            msize: 8192,
            version: VERSION.to_string(),
        },
    );
    send(
        &mut stream,
        0,
        &Request::Attach {
            fid: 0,
            afid: NOFID,
            uname: "tester".into(),
            aname: String::new(),
        },
    );

    let walk = send(
        &mut stream,
        1,
        &Request::Walk {
            fid: 0,
            newfid: 1,
            wname: vec!["tmp".into(), "missing.txt".into()],
        },
    );
    match walk {
        Response::Walk { wqid } => assert_eq!(wqid.len(), 1),
        other => panic!("unexpected response: {other:?}"),
    }

    drop(stream);
    server.stop();
}

#[test]
#[serial]
fn request_before_version_is_rejected_with_an_error() {
    let server = start(17_566);
    let mut stream = TcpStream::connect("127.0.0.1:17566").unwrap();

    let resp = send(
        &mut stream,
        0,
        &Request::Attach {
            fid: 0,
            afid: NOFID,
            uname: "tester".into(),
            aname: String::new(),
        },
    );
    assert_eq!(
        resp,
        Response::Error {
            ename: "version not negotiated".into()
        }
    );

    drop(stream);
    server.stop();
}

#[test]
#[serial]
fn oversized_frame_is_rejected_and_connection_terminates() {
    let server = start(17_567);
    let mut stream = TcpStream::connect("127.0.0.1:17567").unwrap();

    // Declare a size above the pre-negotiation default msize; framing
    // must flag this as malformed and close the connection rather than
    // waiting for a payload that will never complete it.
    let bogus_size: u32 = fat9p::wire::types::MAX_MSIZE + 1;
    stream.write_all(&bogus_size.to_le_bytes()).unwrap();
    stream.write_all(&[MessageType::Tversion as u8]).unwrap();
    stream.write_all(&NOTAG.to_le_bytes()).unwrap();

    let mut buf = [0u8; 1];
    let result = stream.read(&mut buf);
    assert!(matches!(result, Ok(0)) || result.is_err());

    server.stop();
}
