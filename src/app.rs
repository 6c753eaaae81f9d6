use anyhow::{anyhow, bail, Context};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::{Config, Mode};
use crate::prober::{run_probe, ProbeConfig, ProbeSummary};
use crate::rpc::{header_stream, Connection, EchoHandler, NullHandler};

pub async fn run(config: Config) -> anyhow::Result<()> {
    match config.mode {
        Mode::Idle => Ok(()),
        Mode::Serve => serve_echo().await,
        Mode::Probe { command, args } => {
            probe_child(&command, &args, config.probe, config.id_seed).await
        }
    }
}

/// Answer `echo` over our own stdin/stdout until the peer hangs up.
pub async fn serve_echo() -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let (reader, writer) = header_stream(tokio::io::stdin(), tokio::io::stdout());
    let conn = Connection::with_handler(reader, writer, Arc::new(EchoHandler), 0, &shutdown);
    info!("serving echo on stdio");

    tokio::select! {
        _ = conn.closed() => debug!("peer closed stdin"),
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            conn.close();
            conn.closed().await;
        }
    }
    Ok(())
}

enum Finished {
    Child(ExitStatus),
    Probe(ProbeSummary),
    Interrupted,
}

async fn probe_child(
    command: &str,
    args: &[String],
    probe: ProbeConfig,
    id_seed: i64,
) -> anyhow::Result<()> {
    let root = CancellationToken::new();
    let (mut child, writer, reader, stderr) = start_child(command, args)?;
    info!(command, pid = child.id(), "spawned child");

    let forward = tokio::spawn(forward_stderr(stderr));
    let (reader, writer) = header_stream(reader, writer);
    let conn = Connection::with_handler(reader, writer, Arc::new(NullHandler), id_seed, &root);

    let mut prober: JoinHandle<ProbeSummary> = {
        let conn = conn.clone();
        let cancel = root.child_token();
        tokio::spawn(async move { run_probe(&conn, &cancel, &probe, &mut std::io::stdout()).await })
    };

    let finished = tokio::select! {
        status = child.wait() => Finished::Child(status.context("failed to wait for child")?),
        summary = &mut prober => Finished::Probe(summary?),
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            Finished::Interrupted
        }
    };
    root.cancel();

    let (status, summary) = match finished {
        Finished::Child(status) => (Some(status), prober.await?),
        Finished::Probe(summary) => {
            debug!("probe count reached, stopping child");
            stop_child(&mut child).await?;
            (None, summary)
        }
        Finished::Interrupted => {
            info!("interrupted, stopping child");
            stop_child(&mut child).await?;
            (None, prober.await?)
        }
    };

    conn.closed().await;
    if let Err(e) = forward.await {
        warn!(error = %e, "stderr forwarding task failed");
    }
    info!(
        sent = summary.sent,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "probe finished"
    );

    match status {
        Some(status) if !status.success() => bail!("{} exited with {}", command, status),
        _ => Ok(()),
    }
}

async fn stop_child(child: &mut Child) -> anyhow::Result<()> {
    if child.try_wait()?.is_none() {
        child.start_kill().context("failed to kill child")?;
        child.wait().await.context("failed to reap child")?;
    }
    Ok(())
}

async fn forward_stderr(mut stderr: ChildStderr) {
    let mut out = tokio::io::stderr();
    if let Err(e) = tokio::io::copy(&mut stderr, &mut out).await {
        warn!(error = %e, "stopped forwarding child stderr");
    }
}

fn start_child(
    exe: &str,
    args: &[String],
) -> anyhow::Result<(Child, ChildStdin, ChildStdout, ChildStderr)> {
    let mut child = Command::new(exe)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {}", exe))?;

    let writer = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("failed to take child stdin"))?;
    let reader = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("failed to take child stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("failed to take child stderr"))?;

    Ok((child, writer, reader, stderr))
}
