//! # KVPB Sync Client
//!
//! Purpose: Provide a pooled, synchronous client for the length-prefixed
//! binary key/value protocol.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: A fixed set of TCP connections is reused and
//!    healed in the background instead of reconnecting per call.
//! 2. **Guarded Access**: Connection I/O is only reachable through the lock
//!    guard of a checked-out `PooledConnection`.
//! 3. **Minimal Allocation**: Frame buffers live on the connection.
//! 4. **Observable Operations**: Every operation produces one `Profile` for
//!    an optional sink such as `Metrics`.

mod client;
mod conn;
mod error;
mod kv;
mod metrics;
mod pool;
mod profile;
mod stream;

#[cfg(test)]
mod testing;

pub use client::{Client, ClientConfig};
pub use conn::{ConnState, Connection, DEFAULT_MAX_FRAME_LEN};
pub use error::{ClientError, ClientResult};
pub use kv::union_map_red_query;
pub use metrics::{LatencyHistogram, LatencySnapshot, Metrics, MetricsSnapshot, DEFAULT_LATENCY_BUCKETS_US};
pub use pool::{
    ConnectionGuard, Pool, PoolConfig, PoolStats, PooledConnection, DEFAULT_RECOVER_BACKOFF, DEFAULT_RECOVER_DIAL_TIMEOUT,
    DEFAULT_WAIT_TIMEOUT, HEALTH_SWEEP_PERIOD,
};
pub use profile::{Instrumenter, Profile};
pub use stream::ResponseStream;
