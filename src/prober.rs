use crate::rpc::connection::Connection;
use std::io::Write;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub method: String,
    pub interval: Duration,
    /// First integer sent as the probe parameter.
    pub first_id: i64,
    /// Stop after this many probes; run until cancelled when `None`.
    pub count: Option<u64>,
    pub call_timeout: Option<Duration>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            method: "echo".to_string(),
            interval: Duration::from_millis(2),
            first_id: 0,
            count: None,
            call_timeout: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSummary {
    pub sent: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Issue one `method([id])` call per tick until `cancel` fires or `count`
/// probes have been sent. Failed probes are reported and never retried.
pub async fn run_probe<W: Write>(
    conn: &Connection,
    cancel: &CancellationToken,
    config: &ProbeConfig,
    out: &mut W,
) -> ProbeSummary {
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut summary = ProbeSummary::default();
    let mut id = config.first_id;

    loop {
        if config.count.is_some_and(|count| summary.sent >= count) {
            break;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        report(out, format_args!("{} :{}", config.method, id));
        summary.sent += 1;
        match conn
            .call_with_timeout(cancel, &config.method, [id], config.call_timeout)
            .await
        {
            Ok(result) => {
                summary.succeeded += 1;
                debug!(id, %result, "probe succeeded");
                report(out, format_args!("=> {}: {}", id, result));
            }
            Err(err) => {
                summary.failed += 1;
                debug!(id, error = %err, "probe failed");
                report(out, format_args!("Error :{}", err));
            }
        }
        id += 1;
    }

    summary
}

fn report<W: Write>(out: &mut W, line: std::fmt::Arguments<'_>) {
    if let Err(e) = writeln!(out, "{}", line) {
        warn!(error = %e, "failed to write probe output");
    }
}
