// opcode.rs - message codes for the KVPB binary protocol
//
// Every frame on the wire carries a single opcode byte right after the
// 4-byte length prefix. Requests and responses are paired: a request with
// code N is answered by a response with code N+1 (with a few historical
// exceptions in the 40+ range).
//
// ============================================================================
// RESERVED CODES
// ============================================================================
//
// - Code 0 is the error response. Its payload is an `ErrorResp` message and
//   it may be sent in reply to any request.
// - A handful of responses never carry a body (ping, set-client-id,
//   set-bucket, delete). Decoders must ignore any payload bytes on those.
//
// Which codes are "error" and which are "empty" is captured by
// `OpcodeRegistry`, built once at startup and shared by reference, so tests
// and embedders can describe a different server dialect without touching
// global state.

/// Error response (payload: `ErrorResp`).
pub const MSG_ERROR_RESP: u8 = 0;
/// Liveness check request (no payload).
pub const MSG_PING_REQ: u8 = 1;
/// Liveness check response (no payload).
pub const MSG_PING_RESP: u8 = 2;
pub const MSG_GET_CLIENT_ID_REQ: u8 = 3;
pub const MSG_GET_CLIENT_ID_RESP: u8 = 4;
pub const MSG_SET_CLIENT_ID_REQ: u8 = 5;
pub const MSG_SET_CLIENT_ID_RESP: u8 = 6;
pub const MSG_GET_SERVER_INFO_REQ: u8 = 7;
pub const MSG_GET_SERVER_INFO_RESP: u8 = 8;
pub const MSG_GET_REQ: u8 = 9;
pub const MSG_GET_RESP: u8 = 10;
pub const MSG_PUT_REQ: u8 = 11;
pub const MSG_PUT_RESP: u8 = 12;
pub const MSG_DEL_REQ: u8 = 13;
pub const MSG_DEL_RESP: u8 = 14;
pub const MSG_LIST_BUCKETS_REQ: u8 = 15;
pub const MSG_LIST_BUCKETS_RESP: u8 = 16;
/// Streamed: the server answers with several `ListKeysResp` frames.
pub const MSG_LIST_KEYS_REQ: u8 = 17;
pub const MSG_LIST_KEYS_RESP: u8 = 18;
pub const MSG_GET_BUCKET_REQ: u8 = 19;
pub const MSG_GET_BUCKET_RESP: u8 = 20;
pub const MSG_SET_BUCKET_REQ: u8 = 21;
pub const MSG_SET_BUCKET_RESP: u8 = 22;
/// Streamed: the server answers with several `MapRedResp` frames.
pub const MSG_MAP_RED_REQ: u8 = 23;
pub const MSG_MAP_RED_RESP: u8 = 24;
pub const MSG_INDEX_REQ: u8 = 25;
pub const MSG_INDEX_RESP: u8 = 26;
pub const MSG_SEARCH_QUERY_REQ: u8 = 27;
pub const MSG_SEARCH_QUERY_RESP: u8 = 28;
pub const MSG_RESET_BUCKET_REQ: u8 = 29;
pub const MSG_RESET_BUCKET_RESP: u8 = 30;
pub const MSG_CS_BUCKET_REQ: u8 = 40;
pub const MSG_CS_BUCKET_RESP: u8 = 41;
pub const MSG_COUNTER_UPDATE_REQ: u8 = 50;
pub const MSG_COUNTER_UPDATE_RESP: u8 = 51;
pub const MSG_COUNTER_GET_REQ: u8 = 52;
pub const MSG_COUNTER_GET_RESP: u8 = 53;
pub const MSG_DT_FETCH_REQ: u8 = 80;
pub const MSG_DT_FETCH_RESP: u8 = 81;
pub const MSG_DT_UPDATE_REQ: u8 = 82;
pub const MSG_DT_UPDATE_RESP: u8 = 83;

// ============================================================================
// CODE ENUMERATION
// ============================================================================

/// Type-safe view over the known message codes.
///
/// Unknown codes are still legal on the wire (the codec works on raw `u8`);
/// this enum is for naming, logging and classification.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    ErrorResp = MSG_ERROR_RESP,
    PingReq = MSG_PING_REQ,
    PingResp = MSG_PING_RESP,
    GetClientIdReq = MSG_GET_CLIENT_ID_REQ,
    GetClientIdResp = MSG_GET_CLIENT_ID_RESP,
    SetClientIdReq = MSG_SET_CLIENT_ID_REQ,
    SetClientIdResp = MSG_SET_CLIENT_ID_RESP,
    GetServerInfoReq = MSG_GET_SERVER_INFO_REQ,
    GetServerInfoResp = MSG_GET_SERVER_INFO_RESP,
    GetReq = MSG_GET_REQ,
    GetResp = MSG_GET_RESP,
    PutReq = MSG_PUT_REQ,
    PutResp = MSG_PUT_RESP,
    DelReq = MSG_DEL_REQ,
    DelResp = MSG_DEL_RESP,
    ListBucketsReq = MSG_LIST_BUCKETS_REQ,
    ListBucketsResp = MSG_LIST_BUCKETS_RESP,
    ListKeysReq = MSG_LIST_KEYS_REQ,
    ListKeysResp = MSG_LIST_KEYS_RESP,
    GetBucketReq = MSG_GET_BUCKET_REQ,
    GetBucketResp = MSG_GET_BUCKET_RESP,
    SetBucketReq = MSG_SET_BUCKET_REQ,
    SetBucketResp = MSG_SET_BUCKET_RESP,
    MapRedReq = MSG_MAP_RED_REQ,
    MapRedResp = MSG_MAP_RED_RESP,
    IndexReq = MSG_INDEX_REQ,
    IndexResp = MSG_INDEX_RESP,
    SearchQueryReq = MSG_SEARCH_QUERY_REQ,
    SearchQueryResp = MSG_SEARCH_QUERY_RESP,
    ResetBucketReq = MSG_RESET_BUCKET_REQ,
    ResetBucketResp = MSG_RESET_BUCKET_RESP,
    CsBucketReq = MSG_CS_BUCKET_REQ,
    CsBucketResp = MSG_CS_BUCKET_RESP,
    CounterUpdateReq = MSG_COUNTER_UPDATE_REQ,
    CounterUpdateResp = MSG_COUNTER_UPDATE_RESP,
    CounterGetReq = MSG_COUNTER_GET_REQ,
    CounterGetResp = MSG_COUNTER_GET_RESP,
    DtFetchReq = MSG_DT_FETCH_REQ,
    DtFetchResp = MSG_DT_FETCH_RESP,
    DtUpdateReq = MSG_DT_UPDATE_REQ,
    DtUpdateResp = MSG_DT_UPDATE_RESP,
}

impl MessageCode {
    /// Every known code, in wire order.
    pub const ALL: [MessageCode; 41] = [
        Self::ErrorResp,
        Self::PingReq,
        Self::PingResp,
        Self::GetClientIdReq,
        Self::GetClientIdResp,
        Self::SetClientIdReq,
        Self::SetClientIdResp,
        Self::GetServerInfoReq,
        Self::GetServerInfoResp,
        Self::GetReq,
        Self::GetResp,
        Self::PutReq,
        Self::PutResp,
        Self::DelReq,
        Self::DelResp,
        Self::ListBucketsReq,
        Self::ListBucketsResp,
        Self::ListKeysReq,
        Self::ListKeysResp,
        Self::GetBucketReq,
        Self::GetBucketResp,
        Self::SetBucketReq,
        Self::SetBucketResp,
        Self::MapRedReq,
        Self::MapRedResp,
        Self::IndexReq,
        Self::IndexResp,
        Self::SearchQueryReq,
        Self::SearchQueryResp,
        Self::ResetBucketReq,
        Self::ResetBucketResp,
        Self::CsBucketReq,
        Self::CsBucketResp,
        Self::CounterUpdateReq,
        Self::CounterUpdateResp,
        Self::CounterGetReq,
        Self::CounterGetResp,
        Self::DtFetchReq,
        Self::DtFetchResp,
        Self::DtUpdateReq,
        Self::DtUpdateResp,
    ];

    /// Convert code to its wire byte
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to map a wire byte onto a known code
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|code| code.as_u8() == value)
    }

    /// Human-readable code name, used in logs and profiles.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ErrorResp => "ERROR_RESP",
            Self::PingReq => "PING_REQ",
            Self::PingResp => "PING_RESP",
            Self::GetClientIdReq => "GET_CLIENT_ID_REQ",
            Self::GetClientIdResp => "GET_CLIENT_ID_RESP",
            Self::SetClientIdReq => "SET_CLIENT_ID_REQ",
            Self::SetClientIdResp => "SET_CLIENT_ID_RESP",
            Self::GetServerInfoReq => "GET_SERVER_INFO_REQ",
            Self::GetServerInfoResp => "GET_SERVER_INFO_RESP",
            Self::GetReq => "GET_REQ",
            Self::GetResp => "GET_RESP",
            Self::PutReq => "PUT_REQ",
            Self::PutResp => "PUT_RESP",
            Self::DelReq => "DEL_REQ",
            Self::DelResp => "DEL_RESP",
            Self::ListBucketsReq => "LIST_BUCKETS_REQ",
            Self::ListBucketsResp => "LIST_BUCKETS_RESP",
            Self::ListKeysReq => "LIST_KEYS_REQ",
            Self::ListKeysResp => "LIST_KEYS_RESP",
            Self::GetBucketReq => "GET_BUCKET_REQ",
            Self::GetBucketResp => "GET_BUCKET_RESP",
            Self::SetBucketReq => "SET_BUCKET_REQ",
            Self::SetBucketResp => "SET_BUCKET_RESP",
            Self::MapRedReq => "MAP_RED_REQ",
            Self::MapRedResp => "MAP_RED_RESP",
            Self::IndexReq => "INDEX_REQ",
            Self::IndexResp => "INDEX_RESP",
            Self::SearchQueryReq => "SEARCH_QUERY_REQ",
            Self::SearchQueryResp => "SEARCH_QUERY_RESP",
            Self::ResetBucketReq => "RESET_BUCKET_REQ",
            Self::ResetBucketResp => "RESET_BUCKET_RESP",
            Self::CsBucketReq => "CS_BUCKET_REQ",
            Self::CsBucketResp => "CS_BUCKET_RESP",
            Self::CounterUpdateReq => "COUNTER_UPDATE_REQ",
            Self::CounterUpdateResp => "COUNTER_UPDATE_RESP",
            Self::CounterGetReq => "COUNTER_GET_REQ",
            Self::CounterGetResp => "COUNTER_GET_RESP",
            Self::DtFetchReq => "DT_FETCH_REQ",
            Self::DtFetchResp => "DT_FETCH_RESP",
            Self::DtUpdateReq => "DT_UPDATE_REQ",
            Self::DtUpdateResp => "DT_UPDATE_RESP",
        }
    }

    /// Check if this code is sent by clients
    pub const fn is_request(self) -> bool {
        !self.is_response()
    }

    /// Check if this code is sent by the server
    pub const fn is_response(self) -> bool {
        match self {
            Self::ErrorResp => true,
            // The 40/41 pair breaks the odd/even convention.
            Self::CsBucketReq => false,
            Self::CsBucketResp => true,
            // Data-type codes are even requests, odd responses.
            Self::DtFetchReq | Self::DtUpdateReq => false,
            Self::DtFetchResp | Self::DtUpdateResp => true,
            // Counters: 50/52 are requests, 51/53 responses.
            Self::CounterUpdateReq | Self::CounterGetReq => false,
            Self::CounterUpdateResp | Self::CounterGetResp => true,
            other => other.as_u8() % 2 == 0,
        }
    }
}

impl std::fmt::Display for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Human-readable name for any wire byte, including unknown ones.
pub fn code_name(code: u8) -> &'static str {
    match MessageCode::from_u8(code) {
        Some(known) => known.name(),
        None => "UNKNOWN",
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Immutable description of the reserved response codes a server speaks.
///
/// Built once (usually via `OpcodeRegistry::standard()`), wrapped in an `Arc`
/// and shared by every connection of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeRegistry {
    error_code: u8,
    ping_request: u8,
    empty: [bool; 256],
}

impl OpcodeRegistry {
    /// Registry with only the error code reserved and no empty responses.
    pub const fn bare(error_code: u8, ping_request: u8) -> Self {
        OpcodeRegistry {
            error_code,
            ping_request,
            empty: [false; 256],
        }
    }

    /// The standard dialect: error code 0, ping request 1, and the four
    /// body-less responses.
    pub fn standard() -> Self {
        Self::bare(MSG_ERROR_RESP, MSG_PING_REQ)
            .with_empty_response(MSG_PING_RESP)
            .with_empty_response(MSG_SET_CLIENT_ID_RESP)
            .with_empty_response(MSG_SET_BUCKET_RESP)
            .with_empty_response(MSG_DEL_RESP)
    }

    /// Marks `code` as a response that never carries a body.
    pub fn with_empty_response(mut self, code: u8) -> Self {
        self.empty[code as usize] = true;
        self
    }

    /// Code of the reserved error response.
    pub const fn error_code(&self) -> u8 {
        self.error_code
    }

    /// Code sent by liveness checks.
    pub const fn ping_request(&self) -> u8 {
        self.ping_request
    }

    /// Returns true when `code` is the reserved error response.
    pub const fn is_error(&self, code: u8) -> bool {
        code == self.error_code
    }

    /// Returns true when responses with `code` carry no body.
    pub const fn is_empty_response(&self, code: u8) -> bool {
        self.empty[code as usize]
    }
}

impl Default for OpcodeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
