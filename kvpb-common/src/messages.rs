//! # Built-in Message Types
//!
//! Request/response payloads for the standard key/value operations. Binary
//! fields use `Bytes` so keys and values stay opaque; optional fields are
//! skipped when unset to keep frames small.
//!
//! Requests with required fields validate them in `encode`, so a malformed
//! request never reaches the socket.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CodecResult;
use crate::message::{require_field, Message, MsgPackCodec, StreamedMessage};

/// Payload of the reserved error response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResp {
    pub errmsg: Bytes,
    #[serde(default)]
    pub errcode: u32,
}

impl ErrorResp {
    /// Error text, lossily decoded as UTF-8.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.errmsg).into_owned()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfoResp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<Bytes>,
}

/// Key/value pair used for secondary indexes and user metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub key: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Bytes>,
}

/// One sibling of a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub value: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vtag: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_mod: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Pair>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usermeta: Vec<Pair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetReq {
    pub bucket: Bytes,
    pub key: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notfound_ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetResp {
    #[serde(default)]
    pub content: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vclock: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unchanged: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutReq {
    pub bucket: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vclock: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dw: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_body: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResp {
    #[serde(default)]
    pub content: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vclock: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Bytes>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelReq {
    pub bucket: Bytes,
    pub key: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rw: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vclock: Option<Bytes>,
}

/// Bucket-level replication and conflict settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_val: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_mult: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_write_wins: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dw: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_quorum: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notfound_ok: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBucketReq {
    pub bucket: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBucketResp {
    #[serde(default)]
    pub props: BucketProps,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetBucketReq {
    pub bucket: Bytes,
    #[serde(default)]
    pub props: BucketProps,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBucketsReq {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBucketsResp {
    #[serde(default)]
    pub buckets: Vec<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListKeysReq {
    pub bucket: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListKeysResp {
    #[serde(default)]
    pub keys: Vec<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapRedReq {
    pub request: Bytes,
    pub content_type: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapRedResp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

crate::msgpack_message!(
    ErrorResp,
    ServerInfoResp,
    GetResp,
    PutResp,
    GetBucketResp,
    ListBucketsReq,
    ListBucketsResp,
    ListKeysResp,
    MapRedResp,
);

// Requests with required fields validate before serializing.

impl Message for GetReq {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        require_field(&self.bucket, "bucket")?;
        require_field(&self.key, "key")?;
        MsgPackCodec::encode(self)
    }

    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        MsgPackCodec::decode(bytes)
    }
}

impl Message for PutReq {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        require_field(&self.bucket, "bucket")?;
        if self.content.is_none() {
            return Err(crate::error::CodecError::Serialization(
                "required field content not set".to_string(),
            ));
        }
        MsgPackCodec::encode(self)
    }

    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        MsgPackCodec::decode(bytes)
    }
}

impl Message for DelReq {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        require_field(&self.bucket, "bucket")?;
        require_field(&self.key, "key")?;
        MsgPackCodec::encode(self)
    }

    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        MsgPackCodec::decode(bytes)
    }
}

impl Message for GetBucketReq {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        require_field(&self.bucket, "bucket")?;
        MsgPackCodec::encode(self)
    }

    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        MsgPackCodec::decode(bytes)
    }
}

impl Message for SetBucketReq {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        require_field(&self.bucket, "bucket")?;
        MsgPackCodec::encode(self)
    }

    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        MsgPackCodec::decode(bytes)
    }
}

impl Message for ListKeysReq {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        require_field(&self.bucket, "bucket")?;
        MsgPackCodec::encode(self)
    }

    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        MsgPackCodec::decode(bytes)
    }
}

impl Message for MapRedReq {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        require_field(&self.request, "request")?;
        require_field(&self.content_type, "content_type")?;
        MsgPackCodec::encode(self)
    }

    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        MsgPackCodec::decode(bytes)
    }
}

impl StreamedMessage for ListKeysResp {
    fn is_done(&self) -> bool {
        self.done.unwrap_or(false)
    }
}

impl StreamedMessage for ListBucketsResp {
    fn is_done(&self) -> bool {
        self.done.unwrap_or(false)
    }
}

impl StreamedMessage for MapRedResp {
    fn is_done(&self) -> bool {
        self.done.unwrap_or(false)
    }
}
