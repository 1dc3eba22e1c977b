//! # Connection Pool
//!
//! Purpose: Keep a fixed set of connections to one server, hand them out one
//! caller at a time, and heal broken ones in the background.
//!
//! ## Design Principles
//! 1. **Fixed Capacity**: Exactly `size` connections exist for the lifetime of
//!    the pool. At any moment each one is available, checked out, or under
//!    recovery; never two of those, never more than `size` in total.
//! 2. **RAII Checkout**: `checkout` returns a `PooledConnection`; the socket is
//!    only reachable through its lock guard and it always finds its way back
//!    (release when healthy, discard otherwise, discard while panicking).
//! 3. **Supervised Workers**: Each pool owns one recovery thread, which
//!    re-dials discarded connections on a fixed backoff, and one health
//!    thread, which pings idle connections. A slow ping never delays a
//!    redial, and every dial made by recovery is time bounded. `close` wakes
//!    and joins both.
//! 4. **Fail Fast On Close**: The closing flag is an atomic read before any
//!    queue lock is taken.
//!
//! ## Slot Lifecycle
//!
//! ```text
//!            checkout               discard / failed ping
//!   Idle ---------------> CheckedOut ----------------------> Recovering
//!    ^  <--- release ---------+                                  |
//!    +------------------------ recover ok (or pool closing) -----+
//!
//!   close(): every slot is drained back to Idle, then marked Closed.
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::fmt;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use kvpb_common::OpcodeRegistry;

use crate::conn::{Connection, DEFAULT_MAX_FRAME_LEN};
use crate::error::{ClientError, ClientResult};

/// Time between recovery attempts for a discarded connection.
pub const DEFAULT_RECOVER_BACKOFF: Duration = Duration::from_secs(1);

/// How long a checkout waits for a connection by default.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Time for the health check to sweep the whole pool once.
pub const HEALTH_SWEEP_PERIOD: Duration = Duration::from_secs(10);

/// I/O deadline for health-check pings when no timeout is configured.
const HEALTH_CHECK_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect deadline for recovery dials when no dial timeout is configured.
pub const DEFAULT_RECOVER_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:8087".
    pub addr: String,
    /// Number of connections (fixed).
    pub size: usize,
    /// How long `checkout` blocks before failing with `PoolWaitTimeout`.
    pub wait_timeout: Duration,
    /// Optional TCP connect timeout. Recovery dials fall back to
    /// `DEFAULT_RECOVER_DIAL_TIMEOUT` when unset.
    pub dial_timeout: Option<Duration>,
    /// Optional read timeout for pool-initiated I/O (health checks).
    pub read_timeout: Option<Duration>,
    /// Optional write timeout for pool-initiated I/O (health checks).
    pub write_timeout: Option<Duration>,
    /// Delay between recovery attempts of a discarded connection.
    pub recover_backoff: Duration,
    /// Interval between single-connection health checks; `None` disables them.
    pub health_check_interval: Option<Duration>,
    /// Largest response body accepted from the server.
    pub max_frame_len: usize,
    /// Reserved opcode description shared by every connection.
    pub registry: Arc<OpcodeRegistry>,
}

impl PoolConfig {
    /// Configuration for `size` connections to `addr` with default timings.
    ///
    /// The health check interval is scaled so the whole pool is swept about
    /// once every `HEALTH_SWEEP_PERIOD`.
    pub fn new(addr: impl Into<String>, size: usize) -> Self {
        let size = size.max(1);
        PoolConfig {
            addr: addr.into(),
            size,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            dial_timeout: None,
            read_timeout: None,
            write_timeout: None,
            recover_backoff: DEFAULT_RECOVER_BACKOFF,
            health_check_interval: Some(HEALTH_SWEEP_PERIOD / size as u32),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            registry: Arc::new(OpcodeRegistry::standard()),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig::new("127.0.0.1:8087", 8)
    }
}

/// Where a slot currently lives.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle = 0,
    CheckedOut = 1,
    Recovering = 2,
    Closed = 3,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SlotState::Idle,
            1 => SlotState::CheckedOut,
            2 => SlotState::Recovering,
            _ => SlotState::Closed,
        }
    }
}

/// Point-in-time view of the pool.
///
/// Counters are read without a global lock, so a snapshot taken while
/// connections move between sets may be off by one transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub available: usize,
    pub checked_out: usize,
    pub recovering: usize,
    pub closing: bool,
}

struct Slot {
    id: usize,
    state: AtomicU8,
    conn: Mutex<Connection>,
}

enum Maintenance {
    Recover(Arc<Slot>),
}

struct PoolInner {
    config: PoolConfig,
    wait_timeout: RwLock<Duration>,
    available: Mutex<VecDeque<Arc<Slot>>>,
    available_cond: Condvar,
    closing: AtomicBool,
    checked_out: AtomicUsize,
    recovering: AtomicUsize,
    // Taken (and dropped) by `close`; holding this lock while sending keeps
    // discards and shutdown ordered.
    maintenance_tx: Mutex<Option<Sender<Maintenance>>>,
    // Never sent on; dropping it wakes the health thread for shutdown.
    health_stop: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates the pool and dial-attempts every connection.
    ///
    /// Connections that fail to dial go straight to background recovery;
    /// construction never blocks on them beyond the first attempt.
    pub fn new(config: PoolConfig) -> Self {
        let size = config.size.max(1);
        let (tx, rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();

        let inner = Arc::new(PoolInner {
            wait_timeout: RwLock::new(config.wait_timeout),
            available: Mutex::new(VecDeque::with_capacity(size)),
            available_cond: Condvar::new(),
            closing: AtomicBool::new(false),
            checked_out: AtomicUsize::new(0),
            recovering: AtomicUsize::new(0),
            maintenance_tx: Mutex::new(Some(tx)),
            health_stop: Mutex::new(Some(stop_tx)),
            workers: Mutex::new(Vec::with_capacity(2)),
            config: PoolConfig { size, ..config },
        });

        info!(addr = %inner.config.addr, size, "creating connection pool");

        for id in 0..size {
            let mut conn = Connection::new(inner.config.addr.clone(), Arc::clone(&inner.config.registry));
            conn.set_dial_timeout(inner.config.dial_timeout);
            conn.set_read_timeout(inner.config.read_timeout);
            conn.set_write_timeout(inner.config.write_timeout);
            conn.set_max_frame_len(inner.config.max_frame_len);

            let dialed = conn.recover();
            let slot = Arc::new(Slot {
                id,
                state: AtomicU8::new(SlotState::CheckedOut as u8),
                conn: Mutex::new(conn),
            });
            inner.checked_out.fetch_add(1, Ordering::SeqCst);

            match dialed {
                Ok(()) => inner.put_back(slot),
                Err(err) => {
                    warn!(slot = id, error = %err, "initial dial failed, recovering in background");
                    inner.discard(slot);
                }
            }
        }

        let mut workers = inner.workers.lock();
        let weak = Arc::downgrade(&inner);
        workers.push(std::thread::spawn(move || recovery_loop(weak, rx)));
        if let Some(interval) = inner.config.health_check_interval {
            let weak = Arc::downgrade(&inner);
            workers.push(std::thread::spawn(move || health_loop(weak, stop_rx, interval)));
        }
        drop(workers);

        Pool { inner }
    }

    /// Acquires a connection, waiting up to the wait timeout.
    ///
    /// # Errors
    /// `PoolClosing` once `close` has started, `PoolWaitTimeout` when no
    /// connection became available in time.
    pub fn checkout(&self) -> ClientResult<PooledConnection> {
        let slot = self.inner.take(Some(*self.inner.wait_timeout.read()))?;
        Ok(PooledConnection::new(Arc::clone(&self.inner), slot))
    }

    /// Acquires a connection only if one is available right now.
    pub fn try_checkout(&self) -> ClientResult<Option<PooledConnection>> {
        match self.inner.take(None) {
            Ok(slot) => Ok(Some(PooledConnection::new(Arc::clone(&self.inner), slot))),
            Err(ClientError::PoolWaitTimeout) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Returns a healthy connection to the available set.
    pub fn release(&self, conn: PooledConnection) {
        conn.release();
    }

    /// Hands a failed connection to background recovery.
    pub fn discard(&self, conn: PooledConnection) {
        conn.discard();
    }

    /// Changes how long future checkouts wait.
    pub fn set_wait_timeout(&self, timeout: Duration) {
        *self.inner.wait_timeout.write() = timeout;
    }

    pub fn wait_timeout(&self) -> Duration {
        *self.inner.wait_timeout.read()
    }

    pub fn size(&self) -> usize {
        self.inner.config.size
    }

    pub fn addr(&self) -> &str {
        &self.inner.config.addr
    }

    /// Opcode registry shared by every pooled connection.
    pub fn registry(&self) -> &Arc<OpcodeRegistry> {
        &self.inner.config.registry
    }

    pub fn is_closing(&self) -> bool {
        self.inner.is_closing()
    }

    pub fn stats(&self) -> PoolStats {
        let available = self.inner.available.lock().len();
        PoolStats {
            size: self.inner.config.size,
            available,
            checked_out: self.inner.checked_out.load(Ordering::SeqCst),
            recovering: self.inner.recovering.load(Ordering::SeqCst),
            closing: self.inner.is_closing(),
        }
    }

    /// Shuts the pool down.
    ///
    /// New checkouts fail with `PoolClosing` immediately. The call then blocks
    /// until every connection is back (including ones still checked out or
    /// recovering), closes each socket and stops the background workers.
    /// Calling it again is a no-op.
    pub fn close(&self) {
        {
            let mut tx = self.inner.maintenance_tx.lock();
            if self.inner.closing.swap(true, Ordering::SeqCst) {
                return;
            }
            // Dropping the senders wakes both workers.
            tx.take();
            self.inner.health_stop.lock().take();
        }
        info!(addr = %self.inner.config.addr, "closing connection pool");

        let size = self.inner.config.size;
        let mut drained = 0;
        let mut available = self.inner.available.lock();
        // Waiting checkouts must observe the flag and give up.
        self.inner.available_cond.notify_all();
        while drained < size {
            match available.pop_front() {
                Some(slot) => {
                    slot.conn.lock().close();
                    slot.state.store(SlotState::Closed as u8, Ordering::SeqCst);
                    drained += 1;
                }
                None => self.inner.available_cond.wait(&mut available),
            }
        }
        drop(available);

        let workers = std::mem::take(&mut *self.inner.workers.lock());
        for join in workers {
            let _ = join.join();
        }
        info!(addr = %self.inner.config.addr, drained, "connection pool closed");
    }
}

impl PoolInner {
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Pops an available slot; `None` means do not wait at all.
    fn take(&self, wait: Option<Duration>) -> ClientResult<Arc<Slot>> {
        if self.is_closing() {
            return Err(ClientError::PoolClosing);
        }

        let mut available = self.available.lock();
        if let Some(slot) = available.pop_front() {
            drop(available);
            self.mark(&slot, SlotState::CheckedOut);
            return Ok(slot);
        }

        let Some(wait) = wait else {
            return Err(ClientError::PoolWaitTimeout);
        };
        // Waits too long to express as an instant block until woken.
        let deadline = Instant::now().checked_add(wait);
        loop {
            let timed_out = match deadline {
                Some(deadline) => self.available_cond.wait_until(&mut available, deadline).timed_out(),
                None => {
                    self.available_cond.wait(&mut available);
                    false
                }
            };
            if self.is_closing() {
                return Err(ClientError::PoolClosing);
            }
            if let Some(slot) = available.pop_front() {
                drop(available);
                self.mark(&slot, SlotState::CheckedOut);
                return Ok(slot);
            }
            if timed_out {
                return Err(ClientError::PoolWaitTimeout);
            }
        }
    }

    /// Returns a slot to the available queue and wakes a waiter.
    fn put_back(&self, slot: Arc<Slot>) {
        self.mark(&slot, SlotState::Idle);
        let mut available = self.available.lock();
        available.push_back(slot);
        if self.is_closing() {
            // `close` may be waiting alongside checkouts that will bail.
            self.available_cond.notify_all();
        } else {
            self.available_cond.notify_one();
        }
    }

    /// Schedules a slot for background recovery without blocking.
    fn discard(&self, slot: Arc<Slot>) {
        self.mark(&slot, SlotState::Recovering);
        let undelivered = {
            let tx = self.maintenance_tx.lock();
            match tx.as_ref() {
                Some(sender) if !self.is_closing() => sender
                    .send(Maintenance::Recover(slot))
                    .err()
                    .map(|mpsc::SendError(Maintenance::Recover(slot))| slot),
                // Shutting down: skip recovery, `close` will drain it.
                _ => Some(slot),
            }
        };
        if let Some(slot) = undelivered {
            self.put_back(slot);
        }
    }

    /// Moves a slot to `to`, keeping the per-set counters in step.
    fn mark(&self, slot: &Slot, to: SlotState) {
        let from = SlotState::from_u8(slot.state.swap(to as u8, Ordering::SeqCst));
        if let Some(counter) = self.counter(from) {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
        if let Some(counter) = self.counter(to) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter(&self, state: SlotState) -> Option<&AtomicUsize> {
        match state {
            SlotState::CheckedOut => Some(&self.checked_out),
            SlotState::Recovering => Some(&self.recovering),
            SlotState::Idle | SlotState::Closed => None,
        }
    }

    /// Pings one idle connection, if any, and routes it by the outcome.
    ///
    /// The ping runs under pool-level deadlines; the connection's own
    /// timeouts are restored before it is handed back.
    fn health_check(&self) {
        let slot = match self.take(None) {
            Ok(slot) => slot,
            // Everything is busy or recovering; nothing idle to ping.
            Err(_) => return,
        };

        let result = {
            let mut conn = slot.conn.lock();
            let (read, write) = (conn.read_timeout(), conn.write_timeout());
            conn.set_read_timeout(self.config.read_timeout.or(Some(HEALTH_CHECK_IO_TIMEOUT)));
            conn.set_write_timeout(self.config.write_timeout.or(Some(HEALTH_CHECK_IO_TIMEOUT)));
            let result = conn.ping();
            conn.set_read_timeout(read);
            conn.set_write_timeout(write);
            result
        };

        match result {
            Ok(()) => {
                debug!(slot = slot.id, "health check ok");
                self.put_back(slot);
            }
            Err(err) => {
                warn!(slot = slot.id, error = %err, "health check failed, recovering");
                self.discard(slot);
            }
        }
    }

    /// One recovery attempt; returns true when the slot was handed back.
    fn try_recover(&self, slot: &Arc<Slot>) -> bool {
        let result = {
            let mut conn = slot.conn.lock();
            let dial = conn.dial_timeout();
            conn.set_dial_timeout(dial.or(self.config.dial_timeout).or(Some(DEFAULT_RECOVER_DIAL_TIMEOUT)));
            let result = conn.recover();
            conn.set_dial_timeout(dial);
            result
        };
        match result {
            Ok(()) => {
                info!(slot = slot.id, "connection recovered");
                self.put_back(Arc::clone(slot));
                true
            }
            Err(err) => {
                debug!(slot = slot.id, error = %err, "recovery attempt failed");
                false
            }
        }
    }
}

/// Recovery worker: re-dials discarded connections on a fixed backoff.
///
/// Holds only a weak reference between wake-ups so dropping every `Pool`
/// handle tears the worker down too.
fn recovery_loop(pool: Weak<PoolInner>, rx: Receiver<Maintenance>) {
    let backoff = match pool.upgrade() {
        Some(inner) => inner.config.recover_backoff,
        None => return,
    };
    let mut pending: Vec<(Arc<Slot>, Instant)> = Vec::new();

    loop {
        let now = Instant::now();
        let wake = pending.iter().map(|(_, due)| *due).min();
        let message = match wake {
            Some(at) => rx.recv_timeout(at.saturating_duration_since(now)),
            // Idle with nothing scheduled: park until a discard or shutdown.
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match message {
            Ok(Maintenance::Recover(slot)) => pending.push((slot, Instant::now())),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let Some(inner) = pool.upgrade() else { return };
        if inner.is_closing() {
            break;
        }

        let now = Instant::now();
        let mut still_pending = Vec::with_capacity(pending.len());
        for (slot, due) in pending.drain(..) {
            if due > now {
                still_pending.push((slot, due));
            } else if !inner.try_recover(&slot) {
                still_pending.push((slot, Instant::now() + backoff));
            }
        }
        pending = still_pending;
    }

    // Shutdown: hand every slot we still hold back so `close` can drain it.
    let Some(inner) = pool.upgrade() else { return };
    for message in rx.try_iter() {
        let Maintenance::Recover(slot) = message;
        pending.push((slot, Instant::now()));
    }
    for (slot, _) in pending {
        debug!(slot = slot.id, "returning unrecovered connection for shutdown");
        inner.put_back(slot);
    }
}

/// Health worker: pings one idle connection every `interval`.
///
/// Failed connections go through `discard`, so they reach the recovery worker
/// like any other. Exits when `stop` disconnects.
fn health_loop(pool: Weak<PoolInner>, stop: Receiver<()>, interval: Duration) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
        let Some(inner) = pool.upgrade() else { return };
        if inner.is_closing() {
            return;
        }
        inner.health_check();
    }
}

/// Lock guard over a checked-out connection.
pub type ConnectionGuard<'a> = MutexGuard<'a, Connection>;

/// RAII handle for a checked-out connection.
///
/// Dropping the handle returns the connection: released when its socket is
/// still open, discarded for recovery otherwise (or when the thread is
/// panicking, since the exchange state is then unknown).
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    slot: Arc<Slot>,
    returned: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, slot: Arc<Slot>) -> Self {
        PooledConnection { pool, slot, returned: false }
    }

    /// Slot index inside the pool, stable for the pool's lifetime.
    pub fn id(&self) -> usize {
        self.slot.id
    }

    /// Takes the connection's exclusive lock. All I/O goes through the guard.
    pub fn lock(&self) -> ConnectionGuard<'_> {
        self.slot.conn.lock()
    }

    /// Returns the connection to the pool for immediate reuse.
    ///
    /// A connection whose socket is closed is routed to recovery instead.
    pub fn release(mut self) {
        self.returned = true;
        self.pool.return_slot(Arc::clone(&self.slot), false);
    }

    /// Hands the connection to background recovery.
    pub fn discard(mut self) {
        self.returned = true;
        self.pool.return_slot(Arc::clone(&self.slot), true);
    }
}

impl PoolInner {
    fn return_slot(&self, slot: Arc<Slot>, force_discard: bool) {
        let healthy = !force_discard && slot.conn.lock().is_healthy();
        if healthy {
            self.put_back(slot);
        } else {
            if !force_discard {
                debug!(slot = slot.id, "returned connection is not healthy, recovering");
            }
            slot.conn.lock().close();
            self.discard(slot);
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.slot.id)
            .field("state", &SlotState::from_u8(self.slot.state.load(Ordering::SeqCst)))
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if !self.returned {
            self.pool.return_slot(Arc::clone(&self.slot), std::thread::panicking());
        }
    }
}
