//! Scripted in-process server used by the unit tests.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use kvpb_common::{encode_frame, Empty, Message, MSG_PING_RESP};

/// What the scripted server does after reading one request frame.
pub(crate) enum Reply {
    /// Write these bytes and keep serving.
    Raw(Vec<u8>),
    /// Write these bytes, then drop the socket.
    RawThenClose(Vec<u8>),
    /// Write nothing and keep serving.
    Silent,
    /// Drop the socket without answering.
    Close,
}

impl Reply {
    pub(crate) fn ping_ok() -> Self {
        Reply::Raw(frame(MSG_PING_RESP, &Empty))
    }

    pub(crate) fn frame<M: Message>(code: u8, message: &M) -> Self {
        Reply::Raw(frame(code, message))
    }

    pub(crate) fn raw_then_close(bytes: Vec<u8>) -> Self {
        Reply::RawThenClose(bytes)
    }
}

/// Encodes a full frame for the server side of a test.
pub(crate) fn frame<M: Message>(code: u8, message: &M) -> Vec<u8> {
    encode_frame(code, message).expect("encode test frame").to_vec()
}

pub(crate) struct TestServer {
    addr: String,
    accepted: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    frames: Arc<AtomicUsize>,
}

impl TestServer {
    pub(crate) fn addr(&self) -> String {
        self.addr.clone()
    }

    pub(crate) fn connections_accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Accepted sockets the server has stopped serving (client EOF, I/O error
    /// or a closing reply).
    pub(crate) fn connections_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn frames_received(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

/// Spawns a server that answers every request frame through `handler`.
///
/// The handler gets the request opcode and payload. Each accepted socket is
/// served on its own thread.
pub(crate) fn spawn_server<F>(handler: F) -> TestServer
where
    F: Fn(u8, &[u8]) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let accepted = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    let frames = Arc::new(AtomicUsize::new(0));
    let handler = Arc::new(handler);

    let accepted_count = Arc::clone(&accepted);
    let closed_count = Arc::clone(&closed);
    let frame_count = Arc::clone(&frames);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            accepted_count.fetch_add(1, Ordering::SeqCst);
            let handler = Arc::clone(&handler);
            let closed_count = Arc::clone(&closed_count);
            let frame_count = Arc::clone(&frame_count);
            thread::spawn(move || {
                serve(stream, handler.as_ref(), &frame_count);
                closed_count.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    TestServer { addr, accepted, closed, frames }
}

fn serve<F>(mut stream: TcpStream, handler: &F, frames: &AtomicUsize)
where
    F: Fn(u8, &[u8]) -> Reply,
{
    loop {
        let mut header = [0u8; 4];
        if stream.read_exact(&mut header).is_err() {
            return;
        }
        let mut body = vec![0u8; u32::from_be_bytes(header) as usize];
        if stream.read_exact(&mut body).is_err() {
            return;
        }
        frames.fetch_add(1, Ordering::SeqCst);

        let (code, payload) = match body.split_first() {
            Some((code, payload)) => (*code, payload),
            None => return,
        };
        match handler(code, payload) {
            Reply::Raw(bytes) => {
                if stream.write_all(&bytes).is_err() {
                    return;
                }
            }
            Reply::RawThenClose(bytes) => {
                let _ = stream.write_all(&bytes);
                return;
            }
            Reply::Silent => {}
            Reply::Close => return,
        }
    }
}

/// Address that refuses connections: bound once, then released.
pub(crate) fn closed_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);
    addr
}
