//! Typed key/value operations on top of `Client::execute` and
//! `Client::execute_streaming`.

use bytes::Bytes;
use serde_json::json;

use kvpb_common::{
    Content, DelReq, Empty, GetBucketReq, GetBucketResp, GetReq, GetResp, ListBucketsReq, ListBucketsResp,
    ListKeysReq, ListKeysResp, MapRedReq, MapRedResp, PutReq, PutResp, ServerInfoResp, SetBucketReq,
    MSG_DEL_REQ, MSG_GET_BUCKET_REQ, MSG_GET_REQ, MSG_GET_SERVER_INFO_REQ, MSG_LIST_BUCKETS_REQ,
    MSG_LIST_KEYS_REQ, MSG_MAP_RED_REQ, MSG_PUT_REQ, MSG_SET_BUCKET_REQ,
};

use crate::client::Client;
use crate::error::{ClientError, ClientResult};

fn label(bucket: &[u8]) -> String {
    String::from_utf8_lossy(bucket).into_owned()
}

impl Client {
    /// Round-trips the reserved ping request.
    pub fn ping(&self) -> ClientResult<()> {
        let code = self.pool().registry().ping_request();
        self.execute::<_, Empty>("ping", "", code, &Empty).map(|_| ())
    }

    pub fn server_info(&self) -> ClientResult<ServerInfoResp> {
        self.execute("server_info", "", MSG_GET_SERVER_INFO_REQ, &Empty)
    }

    pub fn get(&self, req: &GetReq) -> ClientResult<GetResp> {
        self.execute("get", &label(&req.bucket), MSG_GET_REQ, req)
    }

    /// Value of the first sibling stored under `bucket`/`key`, if any.
    pub fn get_value(&self, bucket: &str, key: &[u8]) -> ClientResult<Option<Bytes>> {
        let req = GetReq {
            bucket: Bytes::copy_from_slice(bucket.as_bytes()),
            key: Bytes::copy_from_slice(key),
            ..GetReq::default()
        };
        let resp = self.get(&req)?;
        Ok(resp.content.into_iter().next().map(|content| content.value))
    }

    pub fn put(&self, req: &PutReq) -> ClientResult<PutResp> {
        self.execute("put", &label(&req.bucket), MSG_PUT_REQ, req)
    }

    /// Stores `value` under `bucket`/`key` without returning the body.
    pub fn put_value(&self, bucket: &str, key: &[u8], value: &[u8]) -> ClientResult<()> {
        let req = PutReq {
            bucket: Bytes::copy_from_slice(bucket.as_bytes()),
            key: Some(Bytes::copy_from_slice(key)),
            content: Some(Content {
                value: Bytes::copy_from_slice(value),
                ..Content::default()
            }),
            ..PutReq::default()
        };
        self.put(&req).map(|_| ())
    }

    pub fn delete(&self, req: &DelReq) -> ClientResult<()> {
        self.execute::<_, Empty>("del", &label(&req.bucket), MSG_DEL_REQ, req)
            .map(|_| ())
    }

    pub fn get_bucket(&self, req: &GetBucketReq) -> ClientResult<GetBucketResp> {
        self.execute("get_bucket", &label(&req.bucket), MSG_GET_BUCKET_REQ, req)
    }

    pub fn set_bucket(&self, req: &SetBucketReq) -> ClientResult<()> {
        self.execute::<_, Empty>("set_bucket", &label(&req.bucket), MSG_SET_BUCKET_REQ, req)
            .map(|_| ())
    }

    /// Bucket listing. Servers usually answer with a single done frame, but
    /// the general streaming loop is used regardless.
    pub fn list_buckets(&self, req: &ListBucketsReq) -> ClientResult<Vec<ListBucketsResp>> {
        self.execute_streaming("list_buckets", "", MSG_LIST_BUCKETS_REQ, req)
    }

    pub fn list_keys(&self, req: &ListKeysReq) -> ClientResult<Vec<ListKeysResp>> {
        self.execute_streaming("list_keys", &label(&req.bucket), MSG_LIST_KEYS_REQ, req)
    }

    pub fn map_reduce(&self, req: &MapRedReq) -> ClientResult<Vec<MapRedResp>> {
        self.execute_streaming("map_red", "", MSG_MAP_RED_REQ, req)
    }

    /// Fetches many JSON documents with one map-reduce job.
    ///
    /// Each returned string is one stored JSON value, still encoded. With an
    /// empty `keys` slice the job runs over the whole bucket.
    pub fn get_many_json(&self, bucket: &str, keys: &[&str]) -> ClientResult<Vec<String>> {
        let req = MapRedReq {
            request: union_map_red_query(bucket, keys).into(),
            content_type: Bytes::from_static(b"application/json"),
        };

        let mut results = Vec::new();
        for resp in self.map_reduce(&req)? {
            let Some(body) = resp.response else { continue };
            let values: Vec<String> =
                serde_json::from_slice(&body).map_err(|err| ClientError::Deserialization(err.to_string()))?;
            results.extend(values);
        }
        Ok(results)
    }
}

/// Map-reduce job: map every input to its stored value, reduce with a set
/// union. Inputs are the bucket/key pairs, or the whole bucket when `keys`
/// is empty.
pub fn union_map_red_query(bucket: &str, keys: &[&str]) -> String {
    let inputs = if keys.is_empty() {
        json!(bucket)
    } else {
        json!(keys.iter().map(|key| [bucket, *key]).collect::<Vec<_>>())
    };
    json!({
        "inputs": inputs,
        "query": [
            {"map": {"language": "erlang", "module": "riak_kv_mapreduce", "function": "map_object_value"}},
            {"reduce": {"language": "erlang", "module": "riak_kv_mapreduce", "function": "reduce_set_union"}},
        ],
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kvpb_common::{
        Message, MSG_DEL_RESP, MSG_GET_RESP, MSG_LIST_BUCKETS_RESP, MSG_MAP_RED_RESP, MSG_PUT_RESP,
    };
    use serde_json::Value;

    use super::*;
    use crate::client::ClientConfig;
    use crate::pool::PoolConfig;
    use crate::testing::{frame, spawn_server, Reply};

    fn client_for(addr: String) -> Client {
        let mut pool = PoolConfig::new(addr, 2);
        pool.health_check_interval = None;
        Client::with_config(ClientConfig {
            pool,
            read_timeout: Some(Duration::from_secs(2)),
            ..ClientConfig::default()
        })
    }

    #[test]
    fn union_query_with_keys() {
        let query: Value = serde_json::from_str(&union_map_red_query("users", &["a", "b\"c"])).unwrap();
        assert_eq!(query["inputs"], serde_json::json!([["users", "a"], ["users", "b\"c"]]));
        assert_eq!(query["query"][0]["map"]["function"], "map_object_value");
        assert_eq!(query["query"][1]["reduce"]["function"], "reduce_set_union");
    }

    #[test]
    fn union_query_without_keys_targets_bucket() {
        let query: Value = serde_json::from_str(&union_map_red_query("users", &[])).unwrap();
        assert_eq!(query["inputs"], "users");
    }

    #[test]
    fn put_then_get_value() {
        let server = spawn_server(|code, payload| match code {
            MSG_PUT_REQ => {
                let req = PutReq::decode(payload).unwrap();
                assert_eq!(req.key.as_deref(), Some(&b"k"[..]));
                Reply::frame(MSG_PUT_RESP, &PutResp::default())
            }
            MSG_GET_REQ => Reply::frame(
                MSG_GET_RESP,
                &GetResp {
                    content: vec![Content { value: "v1".into(), ..Content::default() }],
                    ..GetResp::default()
                },
            ),
            MSG_DEL_REQ => Reply::frame(MSG_DEL_RESP, &Empty),
            other => panic!("unexpected opcode {other}"),
        });
        let client = client_for(server.addr());

        client.put_value("b", b"k", b"v1").unwrap();
        assert_eq!(client.get_value("b", b"k").unwrap().as_deref(), Some(&b"v1"[..]));
        client
            .delete(&DelReq { bucket: "b".into(), key: "k".into(), ..DelReq::default() })
            .unwrap();
        client.close();
    }

    #[test]
    fn list_buckets_uses_stream_loop() {
        let server = spawn_server(|_, _| {
            Reply::frame(
                MSG_LIST_BUCKETS_RESP,
                &ListBucketsResp { buckets: vec!["x".into(), "y".into()], done: Some(true) },
            )
        });
        let client = client_for(server.addr());
        let resps = client.list_buckets(&ListBucketsReq::default()).unwrap();
        assert_eq!(resps.len(), 1);
        assert_eq!(resps[0].buckets, vec!["x", "y"]);
        client.close();
    }

    #[test]
    fn get_many_json_flattens_phases() {
        let server = spawn_server(|code, payload| {
            assert_eq!(code, MSG_MAP_RED_REQ);
            let req = MapRedReq::decode(payload).unwrap();
            assert_eq!(&req.content_type[..], b"application/json");
            let mut bytes = frame(
                MSG_MAP_RED_RESP,
                &MapRedResp { phase: Some(1), response: Some(r#"["{\"id\":1}"]"#.into()), done: None },
            );
            bytes.extend(frame(
                MSG_MAP_RED_RESP,
                &MapRedResp { phase: Some(1), response: Some(r#"["{\"id\":2}"]"#.into()), done: None },
            ));
            bytes.extend(frame(MSG_MAP_RED_RESP, &MapRedResp { done: Some(true), ..MapRedResp::default() }));
            Reply::Raw(bytes)
        });
        let client = client_for(server.addr());

        let docs = client.get_many_json("users", &["1", "2"]).unwrap();
        assert_eq!(docs, vec![r#"{"id":1}"#.to_string(), r#"{"id":2}"#.to_string()]);
        client.close();
    }

    #[test]
    fn get_many_json_rejects_non_json() {
        let server = spawn_server(|_, _| {
            Reply::frame(
                MSG_MAP_RED_RESP,
                &MapRedResp { response: Some("not json".into()), done: Some(true), ..MapRedResp::default() },
            )
        });
        let client = client_for(server.addr());
        let err = client.get_many_json("users", &["1"]).unwrap_err();
        assert!(matches!(err, ClientError::Deserialization(_)));
        client.close();
    }
}
