//! # Client Load Driver
//!
//! Purpose: Drive a running server through the pooled client from several
//! threads and report throughput plus the latency histogram.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Use a fixed PRNG seed per worker for stable comparisons.
//! 2. **Allocation Control**: Pre-build keys/values to keep setup costs off the hot path.
//! 3. **One Sink**: All workers report through the same `Metrics` instrumenter.
//!
//! Usage: `kvpb-bench [addr] [threads] [ops_per_thread] [pool_size] [key_count] [value_size]`

use std::env;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kvpb_client::{Client, ClientConfig, Metrics, MetricsSnapshot, PoolConfig};

const DEFAULT_ADDR: &str = "127.0.0.1:8087";
const DEFAULT_THREADS: usize = 4;
const DEFAULT_OPS_PER_THREAD: usize = 10_000;
const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_KEY_COUNT: usize = 1 << 10;
const DEFAULT_VALUE_SIZE: usize = 128;
const BUCKET: &str = "kvpb-bench";

#[derive(Debug, Clone, Serialize)]
struct BenchConfig {
    addr: String,
    threads: usize,
    ops_per_thread: usize,
    pool_size: usize,
    key_count: usize,
    value_size: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());
        BenchConfig {
            addr,
            threads: parse_usize(args.next(), DEFAULT_THREADS).max(1),
            ops_per_thread: parse_usize(args.next(), DEFAULT_OPS_PER_THREAD),
            pool_size: parse_usize(args.next(), DEFAULT_POOL_SIZE).max(1),
            key_count: parse_usize(args.next(), DEFAULT_KEY_COUNT).max(1),
            value_size: parse_usize(args.next(), DEFAULT_VALUE_SIZE),
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

/// Tiny deterministic PRNG for key selection.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    #[inline]
    fn next_index(&mut self, len: usize) -> usize {
        (self.next_u64() % len as u64) as usize
    }
}

fn build_keys(count: usize) -> Vec<Vec<u8>> {
    (0..count).map(|i| format!("key-{i:08}").into_bytes()).collect()
}

fn build_value(size: usize, seed: u64) -> Vec<u8> {
    let mut rng = XorShift64::new(seed);
    (0..size).map(|_| rng.next_u64() as u8).collect()
}

#[derive(Serialize)]
struct Summary<'a> {
    phase: &'a str,
    ops: usize,
    secs: f64,
    ops_per_sec: f64,
    p50_us: Option<u64>,
    p99_us: Option<u64>,
    metrics: MetricsSnapshot,
}

fn report(phase: &str, ops: usize, elapsed: Duration, metrics: &Metrics) -> Result<()> {
    let secs = elapsed.as_secs_f64();
    let snapshot = metrics.snapshot();
    let summary = Summary {
        phase,
        ops,
        secs,
        ops_per_sec: (ops as f64) / secs.max(f64::EPSILON),
        p50_us: snapshot.latency.quantile_bound_us(0.50),
        p99_us: snapshot.latency.quantile_bound_us(0.99),
        metrics: snapshot,
    };
    println!("{}", serde_json::to_string_pretty(&summary).context("serialize summary")?);
    Ok(())
}

/// Runs `op` `ops_per_thread` times on every worker; returns the elapsed time.
fn run_phase<F>(config: &BenchConfig, client: &Arc<Client>, op: F) -> Result<Duration>
where
    F: Fn(&Client, &mut XorShift64) -> kvpb_client::ClientResult<()> + Send + Sync + 'static,
{
    let op = Arc::new(op);
    let start = Instant::now();
    let workers: Vec<_> = (0..config.threads)
        .map(|worker| {
            let client = Arc::clone(client);
            let op = Arc::clone(&op);
            let ops = config.ops_per_thread;
            thread::spawn(move || {
                let mut rng = XorShift64::new(0x1234_5678_9ABC_DEF0 ^ worker as u64);
                let mut failures = 0usize;
                for _ in 0..ops {
                    if let Err(err) = op(&client, &mut rng) {
                        failures += 1;
                        if failures == 1 {
                            warn!(worker, error = %err, "operation failed");
                        }
                    }
                }
                failures
            })
        })
        .collect();

    let mut failures = 0;
    for worker in workers {
        match worker.join() {
            Ok(count) => failures += count,
            Err(_) => bail!("bench worker panicked"),
        }
    }
    if failures > 0 {
        warn!(failures, "phase finished with failures");
    }
    Ok(start.elapsed())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run() {
        eprintln!("kvpb-bench failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = BenchConfig::from_args();
    info!(?config, "starting benchmark");

    let mut pool = PoolConfig::new(config.addr.clone(), config.pool_size);
    pool.dial_timeout = Some(Duration::from_secs(2));
    let client = Arc::new(Client::with_config(ClientConfig {
        pool,
        retry_attempts: 1,
        retry_delay: Duration::from_millis(50),
        read_timeout: Some(Duration::from_secs(5)),
        write_timeout: Some(Duration::from_secs(5)),
    }));

    client.ping().with_context(|| format!("server at {} is not answering", config.addr))?;

    let keys = Arc::new(build_keys(config.key_count));
    let value = Arc::new(build_value(config.value_size, 0x5A5A_5A5A_5A5A_5A5A));
    let total_ops = config.threads * config.ops_per_thread;

    let metrics = Arc::new(Metrics::new());
    client.set_instrumenter(Some(metrics.instrumenter()));
    let put_keys = Arc::clone(&keys);
    let elapsed = run_phase(&config, &client, move |client, rng| {
        let key = &put_keys[rng.next_index(put_keys.len())];
        client.put_value(BUCKET, key, &value)
    })?;
    report("put", total_ops, elapsed, &metrics)?;

    let metrics = Arc::new(Metrics::new());
    client.set_instrumenter(Some(metrics.instrumenter()));
    let get_keys = Arc::clone(&keys);
    let elapsed = run_phase(&config, &client, move |client, rng| {
        let key = &get_keys[rng.next_index(get_keys.len())];
        client.get_value(BUCKET, key).map(|_| ())
    })?;
    report("get", total_ops, elapsed, &metrics)?;

    client.set_instrumenter(None);
    info!(stats = ?client.pool().stats(), "closing pool");
    client.close();
    Ok(())
}
