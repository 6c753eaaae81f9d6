use clap::Parser;
use std::time::Duration;

use crate::prober::ProbeConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    /// Nothing to run.
    Idle,
    /// Serve `echo` over our own stdin/stdout.
    Serve,
    /// Spawn `command` and probe it.
    Probe { command: String, args: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub probe: ProbeConfig,
    /// Seed for the correlation IDs of our outbound calls.
    pub id_seed: i64,
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(name = "rpc_probe")]
#[command(
    about = "Spawn a JSON-RPC server over stdio and keep probing it with echo calls",
    long_about = None
)]
pub struct Cli {
    /// Milliseconds between probes
    #[arg(long, default_value_t = 2)]
    pub interval_ms: u64,

    /// Method called on every tick
    #[arg(long, default_value = "echo")]
    pub method: String,

    /// Stop after this many probes
    #[arg(long)]
    pub count: Option<u64>,

    /// Per-call timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// First correlation ID used on the connection
    #[arg(long, default_value_t = 0)]
    pub id_seed: i64,

    /// Answer echo calls on stdin/stdout instead of spawning a child
    #[arg(long, conflicts_with = "command")]
    pub serve: bool,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to spawn
    pub command: Option<String>,

    /// Arguments passed to the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn into_config(self) -> Config {
        let mode = match (self.serve, self.command) {
            (true, _) => Mode::Serve,
            (false, Some(command)) => Mode::Probe {
                command,
                args: self.args,
            },
            (false, None) => Mode::Idle,
        };
        Config {
            mode,
            probe: ProbeConfig {
                method: self.method,
                interval: Duration::from_millis(self.interval_ms.max(1)),
                first_id: 0,
                count: self.count,
                call_timeout: self.timeout_ms.map(Duration::from_millis),
            },
            id_seed: self.id_seed,
            verbose: self.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &[&str]) -> Config {
        Cli::try_parse_from(args).expect("parse failed").into_config()
    }

    #[test]
    fn test_defaults_without_command_are_idle() {
        let config = config(&["rpc_probe"]);
        assert_eq!(config.mode, Mode::Idle);
        assert_eq!(config.probe.method, "echo");
        assert_eq!(config.probe.interval, Duration::from_millis(2));
        assert_eq!(config.probe.count, None);
        assert_eq!(config.id_seed, 0);
    }

    #[test]
    fn test_command_keeps_hyphenated_child_args() {
        let config = config(&[
            "rpc_probe",
            "--interval-ms",
            "50",
            "--count",
            "4",
            "--timeout-ms",
            "250",
            "my-server",
            "--stdio",
            "-x",
        ]);
        assert_eq!(
            config.mode,
            Mode::Probe {
                command: "my-server".to_string(),
                args: vec!["--stdio".to_string(), "-x".to_string()],
            }
        );
        assert_eq!(config.probe.interval, Duration::from_millis(50));
        assert_eq!(config.probe.count, Some(4));
        assert_eq!(config.probe.call_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_serve_mode() {
        assert_eq!(config(&["rpc_probe", "--serve"]).mode, Mode::Serve);
        assert!(Cli::try_parse_from(["rpc_probe", "--serve", "child"]).is_err());
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let config = config(&["rpc_probe", "--interval-ms", "0", "child"]);
        assert_eq!(config.probe.interval, Duration::from_millis(1));
    }
}
