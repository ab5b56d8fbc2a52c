//! Command-line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use ebs_attach::ReconcilerConfig;
use ebs_common::DEFAULT_VOLUME_PREFIX;
use ebs_node_gc::NodeGcConfig;

/// EBS operator - attaches and detaches EBS volumes to match node status
#[derive(Parser, Debug)]
#[command(name = "ebs-operator", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// What to do once started
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Reconcile on a fixed interval until SIGINT/SIGTERM (default)
    Run,
    /// Run a single pass and exit
    ///
    /// Exits non-zero when the node list cannot be read.
    Once,
}

/// Log line format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human-readable lines
    Text,
}

/// Settings shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Seconds between the start of two passes
    #[arg(
        long = "interval",
        env = "EBS_POLL_INTERVAL_SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub interval_secs: u64,

    /// Deadline in seconds for one provider operation
    #[arg(
        long = "provider-timeout",
        env = "EBS_PROVIDER_TIMEOUT_SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub provider_timeout_secs: u64,

    /// Only volume references starting with this prefix are reconciled
    #[arg(long, env = "EBS_VOLUME_PREFIX", default_value = DEFAULT_VOLUME_PREFIX)]
    pub volume_prefix: String,

    /// Also delete nodes whose instance no longer exists
    #[arg(long)]
    pub node_gc: bool,

    /// Skip volume attach/detach reconciliation
    #[arg(long)]
    pub no_attach: bool,

    /// Seconds a Ready heartbeat stays fresh for node liveness checks
    #[arg(
        long = "heartbeat-window",
        env = "EBS_HEARTBEAT_WINDOW_SECS",
        default_value_t = 30
    )]
    pub heartbeat_window_secs: u64,

    /// Path to a kubeconfig; in-cluster config, then `KUBECONFIG`, when unset
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Log line format
    #[arg(long, env = "EBS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Settings {
    /// Poll interval
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Provider operation deadline
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Attach reconciler tunables, `None` when attach is disabled
    pub fn reconciler(&self) -> Option<ReconcilerConfig> {
        (!self.no_attach).then(|| ReconcilerConfig {
            volume_prefix: self.volume_prefix.clone(),
            provider_timeout: self.provider_timeout(),
        })
    }

    /// Liveness reconciler tunables, `None` unless node GC is enabled
    pub fn node_gc(&self) -> Option<NodeGcConfig> {
        self.node_gc.then(|| NodeGcConfig {
            heartbeat_window: Duration::from_secs(self.heartbeat_window_secs),
            provider_timeout: self.provider_timeout(),
        })
    }
}
