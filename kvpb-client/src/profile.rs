//! Per-operation telemetry.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ClientError;

/// Sink receiving every completed `Profile`, exactly once per operation.
pub type Instrumenter = Arc<dyn Fn(Profile) + Send + Sync>;

/// Timing and outcome of one logical operation.
///
/// `request` and `response` accumulate across retries and stream frames;
/// `pool_wait` and `lock` accumulate across retries.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub object: String,
    pub retries: u32,
    pub pool_wait: Duration,
    pub lock: Duration,
    pub request: Duration,
    pub response: Duration,
    pub total: Duration,
    /// Terminal error; `None` on success.
    pub error: Option<ClientError>,
    /// Streamed operation dropped by the caller before its done frame.
    pub abandoned: bool,
    started: Instant,
}

impl Profile {
    pub fn new(name: impl Into<String>, object: impl Into<String>) -> Self {
        Profile {
            name: name.into(),
            object: object.into(),
            retries: 0,
            pool_wait: Duration::ZERO,
            lock: Duration::ZERO,
            request: Duration::ZERO,
            response: Duration::ZERO,
            total: Duration::ZERO,
            error: None,
            abandoned: false,
            started: Instant::now(),
        }
    }

    /// True when the operation ran to completion without an error.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.abandoned
    }

    /// Stamps the outcome and hands the profile to `sink`.
    pub(crate) fn complete(mut self, error: Option<ClientError>, sink: Option<&Instrumenter>) {
        self.error = error;
        self.total = self.started.elapsed();
        debug!(
            op = %self.name,
            obj = %self.object,
            success = self.is_success(),
            retries = self.retries,
            abandoned = self.abandoned,
            total_us = self.total.as_micros() as u64,
            "operation complete"
        );
        if let Some(sink) = sink {
            sink(self);
        }
    }

    /// Completes a profile whose operation the caller gave up on.
    pub(crate) fn abandon(mut self, sink: Option<&Instrumenter>) {
        self.abandoned = true;
        self.complete(None, sink);
    }
}

/// Runs `f`, adding its wall time to `slot`.
pub(crate) fn timed<T>(slot: &mut Duration, f: impl FnOnce() -> T) -> T {
    let started = Instant::now();
    let out = f();
    *slot += started.elapsed();
    out
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "op={} obj={} success={} retries={} total={:?} conn_wait={:?} conn_lock={:?} request={:?} response={:?}",
            self.name,
            self.object,
            self.is_success(),
            self.retries,
            self.total,
            self.pool_wait,
            self.lock,
            self.request,
            self.response
        )?;
        if self.abandoned {
            f.write_str(" abandoned=true")?;
        }
        Ok(())
    }
}
