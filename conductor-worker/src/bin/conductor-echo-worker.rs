//! conductor-echo-worker: sample worker that logs a heartbeat until stopped.
//!
//! Launched by the supervisor with the contract flags, followed by its own:
//!
//! ```text
//! conductor-echo-worker --pipe-name <session> [--channel-dir <dir>] [--interval-ms 1000]
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use conductor_worker::{init_tracing, AppServer, WorkerContext, WorkerError, WorkerHost};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

struct EchoWorker {
    interval: Duration,
    stop: Notify,
    generation: AtomicU64,
}

impl EchoWorker {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            stop: Notify::new(),
            generation: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl AppServer for EchoWorker {
    async fn initialize(&self, context: &WorkerContext) -> Result<(), WorkerError> {
        tracing::info!(
            instance = ?context.instance_id(),
            name = context.name().unwrap_or("-"),
            interval = ?self.interval,
            "echo worker initialised",
        );
        Ok(())
    }

    async fn start(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        let mut beats = 0u64;
        loop {
            tokio::select! {
                _ = self.stop.notified() => break,
                _ = ticker.tick() => {
                    beats += 1;
                    tracing::info!(
                        beats,
                        generation = self.generation.load(Ordering::SeqCst),
                        "heartbeat",
                    );
                }
            }
        }
        tracing::info!(beats, "echo worker loop finished");
    }

    async fn stop(&self) {
        self.stop.notify_one();
    }

    async fn reconfigure(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(generation, "echo worker reconfigured");
    }
}

fn parse_interval(args: &[String]) -> Result<Duration> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let value = match arg.split_once('=') {
            Some(("--interval-ms", value)) => value,
            _ if arg == "--interval-ms" => match iter.next() {
                Some(value) => value.as_str(),
                None => bail!("--interval-ms needs a value"),
            },
            _ => continue,
        };
        let millis: u64 = value
            .parse()
            .with_context(|| format!("invalid --interval-ms '{value}'"))?;
        if millis == 0 {
            bail!("--interval-ms must be positive");
        }
        return Ok(Duration::from_millis(millis));
    }
    Ok(DEFAULT_INTERVAL)
}

fn main() -> Result<()> {
    let host = WorkerHost::from_env();
    init_tracing(host.args().log_config.as_deref());
    let interval = parse_interval(&host.args().rest)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let reason = runtime
        .block_on(host.run(Arc::new(EchoWorker::new(interval))))
        .context("echo worker failed")?;
    tracing::info!(reason = ?reason, "echo worker exited");
    Ok(())
}
