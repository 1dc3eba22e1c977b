//! # Synchronous Client API
//!
//! Purpose: Run request/response exchanges against the server through a
//! shared connection pool, with retries and per-operation telemetry.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling, locking and framing.
//! 2. **Exchange Atomicity**: One exchange holds one connection's lock from
//!    the request write to the last response read.
//! 3. **Discard On Error**: A connection that saw any error goes to recovery;
//!    only clean exchanges release it for reuse.
//! 4. **Flat Retries**: Whole exchanges are re-run up to `retry_attempts`
//!    times with a fixed delay; payload errors stop the loop at once.

use std::thread;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use kvpb_common::Message;

use crate::conn::Connection;
use crate::error::ClientResult;
use crate::pool::{Pool, PoolConfig, PooledConnection};
use crate::profile::{timed, Instrumenter, Profile};

/// Configuration for the client and its pool.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub pool: PoolConfig,
    /// Extra attempts after the first failure (0 disables retries).
    pub retry_attempts: u32,
    /// Sleep between attempts.
    pub retry_delay: Duration,
    /// Read deadline applied to every exchange; `None` blocks indefinitely.
    pub read_timeout: Option<Duration>,
    /// Write deadline applied to every exchange; `None` blocks indefinitely.
    pub write_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            pool: PoolConfig::default(),
            retry_attempts: 0,
            retry_delay: Duration::from_millis(500),
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// Per-exchange knobs, copied out once per operation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Settings {
    pub(crate) retry_attempts: u32,
    pub(crate) retry_delay: Duration,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
    pub(crate) dial_timeout: Option<Duration>,
}

impl Settings {
    pub(crate) fn apply(&self, conn: &mut Connection) {
        conn.set_read_timeout(self.read_timeout);
        conn.set_write_timeout(self.write_timeout);
        conn.set_dial_timeout(self.dial_timeout);
    }
}

/// Pooled client. Share it between threads behind an `Arc`.
pub struct Client {
    pool: Pool,
    settings: RwLock<Settings>,
    instrumenter: RwLock<Option<Instrumenter>>,
}

impl Client {
    /// Creates a client with `size` pooled connections and default settings.
    pub fn connect(addr: impl Into<String>, size: usize) -> Self {
        Self::with_config(ClientConfig {
            pool: PoolConfig::new(addr, size),
            ..ClientConfig::default()
        })
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        let settings = Settings {
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            dial_timeout: config.pool.dial_timeout,
        };
        Client {
            pool: Pool::new(config.pool),
            settings: RwLock::new(settings),
            instrumenter: RwLock::new(None),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Closes the underlying pool; see `Pool::close`.
    pub fn close(&self) {
        self.pool.close();
    }

    pub fn set_retry_attempts(&self, attempts: u32) {
        self.settings.write().retry_attempts = attempts;
    }

    pub fn set_retry_delay(&self, delay: Duration) {
        self.settings.write().retry_delay = delay;
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        self.settings.write().read_timeout = timeout;
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        self.settings.write().write_timeout = timeout;
    }

    /// Connect timeout for lazy dials made during exchanges.
    pub fn set_dial_timeout(&self, timeout: Option<Duration>) {
        self.settings.write().dial_timeout = timeout;
    }

    pub fn set_wait_timeout(&self, timeout: Duration) {
        self.pool.set_wait_timeout(timeout);
    }

    /// Installs (or with `None` removes) the profile sink.
    pub fn set_instrumenter(&self, instrumenter: Option<Instrumenter>) {
        *self.instrumenter.write() = instrumenter;
    }

    pub(crate) fn settings(&self) -> Settings {
        *self.settings.read()
    }

    pub(crate) fn sink(&self) -> Option<Instrumenter> {
        self.instrumenter.read().clone()
    }

    pub(crate) fn checkout(&self, profile: &mut Profile) -> ClientResult<PooledConnection> {
        timed(&mut profile.pool_wait, || self.pool.checkout())
    }

    /// Sends one request and reads one response, retrying on failure.
    ///
    /// `op` and `object` only label the profile. A body-less response yields
    /// `Resp::default()`.
    ///
    /// # Errors
    /// The last attempt's error once retries are exhausted, or the first
    /// non-retryable error.
    pub fn execute<Req, Resp>(&self, op: &str, object: &str, code: u8, req: &Req) -> ClientResult<Resp>
    where
        Req: Message,
        Resp: Message,
    {
        let settings = self.settings();
        let mut profile = Profile::new(op, object);
        let mut attempt = 0;

        let result = loop {
            match self.exchange(code, req, &settings, &mut profile) {
                Ok(resp) => break Ok(resp),
                Err(err) if !err.is_retryable() || attempt >= settings.retry_attempts => break Err(err),
                Err(err) => {
                    attempt += 1;
                    profile.retries += 1;
                    debug!(op, attempt, error = %err, "exchange failed, retrying");
                    if !settings.retry_delay.is_zero() {
                        thread::sleep(settings.retry_delay);
                    }
                }
            }
        };

        profile.complete(result.as_ref().err().cloned(), self.sink().as_ref());
        result
    }

    /// One attempt: checkout, lock, write, read, then release or discard.
    fn exchange<Req, Resp>(
        &self,
        code: u8,
        req: &Req,
        settings: &Settings,
        profile: &mut Profile,
    ) -> ClientResult<Resp>
    where
        Req: Message,
        Resp: Message,
    {
        let conn = self.checkout(profile)?;
        let result = {
            let mut guard = timed(&mut profile.lock, || conn.lock());
            settings.apply(&mut guard);
            timed(&mut profile.request, || guard.request(code, req))
                .and_then(|()| timed(&mut profile.response, || guard.response::<Resp>()))
        };

        match result {
            Ok(resp) => {
                conn.release();
                Ok(resp.unwrap_or_default())
            }
            Err(err) => {
                conn.discard();
                Err(err)
            }
        }
    }
}
