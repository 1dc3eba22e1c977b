use std::io::{BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kvpb_client::{Client, ClientConfig, ClientError, Metrics, PoolConfig, Profile};
use kvpb_common::{
    encode_frame, Content, DelReq, Empty, ErrorResp, GetResp, ListKeysReq, ListKeysResp, Message, PutReq, PutResp,
    MSG_DEL_REQ, MSG_DEL_RESP, MSG_ERROR_RESP, MSG_GET_REQ, MSG_GET_RESP, MSG_LIST_KEYS_REQ, MSG_LIST_KEYS_RESP,
    MSG_PING_REQ, MSG_PING_RESP, MSG_PUT_REQ, MSG_PUT_RESP,
};

/// Accepts one connection and hands `expected_frames` request frames to `handler`.
fn spawn_server(expected_frames: usize, handler: fn(usize, u8, Vec<u8>, &mut TcpStream)) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_frames {
            let (code, payload) = read_frame(&mut reader).expect("read frame");
            handler(idx, code, payload, &mut stream);
        }
    });

    addr
}

/// Serves every accepted connection on its own thread until the peer leaves.
fn spawn_echo_server(requests: Arc<AtomicUsize>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let requests = Arc::clone(&requests);
            thread::spawn(move || {
                let mut reader = BufReader::new(stream.try_clone().expect("clone"));
                while let Ok((code, _)) = read_frame(&mut reader) {
                    requests.fetch_add(1, Ordering::SeqCst);
                    match code {
                        MSG_PING_REQ => write_frame(&mut stream, MSG_PING_RESP, &Empty),
                        _ => write_frame(&mut stream, MSG_GET_RESP, &GetResp::default()),
                    }
                }
            });
        }
    });

    addr
}

fn read_frame(reader: &mut BufReader<TcpStream>) -> std::io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    let mut body = vec![0u8; u32::from_be_bytes(header) as usize];
    reader.read_exact(&mut body)?;
    if body.is_empty() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "missing opcode"));
    }
    let code = body.remove(0);
    Ok((code, body))
}

fn write_frame<M: Message>(stream: &mut TcpStream, code: u8, message: &M) {
    let frame = encode_frame(code, message).expect("encode");
    let _ = stream.write_all(&frame);
    let _ = stream.flush();
}

fn client_with_addr(addr: String) -> Client {
    let mut pool = PoolConfig::new(addr, 1);
    pool.dial_timeout = Some(Duration::from_secs(1));
    pool.health_check_interval = None;
    Client::with_config(ClientConfig {
        pool,
        read_timeout: Some(Duration::from_secs(1)),
        write_timeout: Some(Duration::from_secs(1)),
        ..ClientConfig::default()
    })
}

#[test]
fn client_put_get_roundtrip() {
    let addr = spawn_server(2, |idx, code, payload, stream| {
        if idx == 0 {
            assert_eq!(code, MSG_PUT_REQ);
            let req = PutReq::decode(&payload).expect("put req");
            assert_eq!(&req.bucket[..], b"bucket");
            assert_eq!(req.content.expect("content").value, "value");
            write_frame(stream, MSG_PUT_RESP, &PutResp::default());
        } else {
            assert_eq!(code, MSG_GET_REQ);
            let resp = GetResp {
                content: vec![Content { value: "value".into(), ..Content::default() }],
                ..GetResp::default()
            };
            write_frame(stream, MSG_GET_RESP, &resp);
        }
    });

    let client = client_with_addr(addr);
    client.put_value("bucket", b"key", b"value").expect("put");
    let value = client.get_value("bucket", b"key").expect("get");
    assert_eq!(value.as_deref(), Some(&b"value"[..]));
    client.close();
}

#[test]
fn client_delete_and_server_error() {
    let addr = spawn_server(2, |idx, code, _, stream| {
        assert_eq!(code, MSG_DEL_REQ);
        if idx == 0 {
            write_frame(stream, MSG_DEL_RESP, &Empty);
        } else {
            let err = ErrorResp { errmsg: "not allowed".into(), errcode: 7 };
            write_frame(stream, MSG_ERROR_RESP, &err);
        }
    });

    let client = client_with_addr(addr);
    let req = DelReq { bucket: "bucket".into(), key: "key".into(), ..DelReq::default() };
    client.delete(&req).expect("delete");
    let err = client.delete(&req).expect_err("server error");
    assert!(matches!(err, ClientError::Server(ref msg) if msg == "not allowed"));
    assert_eq!(err.to_string(), "server error: not allowed");
}

#[test]
fn client_list_keys_streams_until_done() {
    let addr = spawn_server(1, |_, code, payload, stream| {
        assert_eq!(code, MSG_LIST_KEYS_REQ);
        assert_eq!(&ListKeysReq::decode(&payload).expect("req").bucket[..], b"bucket");
        for (idx, key) in ["a", "b", "c"].iter().enumerate() {
            let resp = ListKeysResp { keys: vec![key.to_string().into()], done: (idx == 2).then_some(true) };
            write_frame(stream, MSG_LIST_KEYS_RESP, &resp);
        }
    });

    let client = client_with_addr(addr);
    let resps = client
        .list_keys(&ListKeysReq { bucket: "bucket".into(), ..ListKeysReq::default() })
        .expect("list keys");
    let keys: Vec<_> = resps.into_iter().flat_map(|resp| resp.keys).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
}

#[test]
fn client_profiles_every_operation() {
    let addr = spawn_server(1, |_, code, _, stream| {
        assert_eq!(code, MSG_PING_REQ);
        write_frame(stream, MSG_PING_RESP, &Empty);
    });

    let client = client_with_addr(addr);
    let lines = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    client.set_instrumenter(Some(Arc::new(move |profile: Profile| sink.lock().push(profile.to_string()))));

    client.ping().expect("ping");
    let lines = lines.lock();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("op=ping obj= success=true retries=0"), "{}", lines[0]);
}

#[test]
fn concurrent_clients_share_pool() {
    let requests = Arc::new(AtomicUsize::new(0));
    let addr = spawn_echo_server(Arc::clone(&requests));

    let mut pool = PoolConfig::new(addr, 3);
    pool.wait_timeout = Duration::from_secs(5);
    let client = Arc::new(Client::with_config(ClientConfig { pool, ..ClientConfig::default() }));
    let metrics = Arc::new(Metrics::new());
    client.set_instrumenter(Some(metrics.instrumenter()));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for _ in 0..25 {
                    client.execute::<_, GetResp>("get", "bucket", MSG_GET_REQ, &Empty).expect("get");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.requests_total, 200);
    assert_eq!(snapshot.errors_total, 0);
    assert_eq!(snapshot.latency.samples, 200);
    assert!(requests.load(Ordering::SeqCst) >= 200);

    let stats = client.pool().stats();
    assert_eq!(stats.available + stats.checked_out + stats.recovering, 3);
    client.close();
    assert!(matches!(client.ping(), Err(ClientError::PoolClosing)));
}

#[test]
fn client_retries_after_dropped_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    thread::spawn(move || {
        // First connection dies mid-exchange; the redialed one answers.
        let (first, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(first.try_clone().expect("clone"));
        let _ = read_frame(&mut reader);
        drop(reader);
        drop(first);

        let (mut second, _) = listener.accept().expect("accept");
        let mut reader = BufReader::new(second.try_clone().expect("clone"));
        let _ = read_frame(&mut reader);
        write_frame(&mut second, MSG_PING_RESP, &Empty);
        thread::sleep(Duration::from_millis(100));
    });

    let client = client_with_addr(addr);
    client.set_retry_attempts(2);
    client.set_retry_delay(Duration::from_millis(10));
    let retries = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&retries);
    client.set_instrumenter(Some(Arc::new(move |profile: Profile| {
        seen.store(profile.retries as usize, Ordering::SeqCst);
    })));

    client.ping().expect("ping after retry");
    assert_eq!(retries.load(Ordering::SeqCst), 1);
}
