//! EBS operator - keeps EC2 volume attachments in line with node status

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;

use ebs_cloud::Ec2CloudApi;
use ebs_common::kube_utils::create_client;
use ebs_common::telemetry::{init_telemetry, TelemetryConfig};
use ebs_common::KubeNodeClient;
use ebs_operator::{shutdown_signal, Cli, Command, LogFormat, Operator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        json: cli.settings.log_format == LogFormat::Json,
        ..Default::default()
    })?;

    let client = create_client(cli.settings.kubeconfig.as_deref())
        .await
        .context("failed to create Kubernetes client")?;

    let operator = Operator::new(
        Arc::new(KubeNodeClient::new(client)),
        Arc::new(Ec2CloudApi::new()),
        &cli.settings,
    );

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            operator.run(cli.settings.interval(), shutdown_signal()).await;
        }
        Command::Once => {
            operator
                .run_once()
                .await
                .context("reconciliation pass failed")?;
        }
    }

    tracing::info!("ebs-operator shutting down");
    Ok(())
}
