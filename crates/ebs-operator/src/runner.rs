//! Poll loop driving the reconcilers
//!
//! Each tick runs one attach/detach pass followed by one liveness pass. A
//! shutdown request is only observed between passes, so a pass in flight
//! always finishes. When a pass overruns the interval the next one starts
//! right after it instead of bursting to catch up.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use ebs_attach::{Context, Reconciler};
use ebs_cloud::CloudApi;
use ebs_common::{Error, LastSegmentResolver, NodeClient, ReferenceResolver};
use ebs_node_gc::NodeGc;

use crate::config::Settings;

/// Reconcilers enabled for this process
pub struct Operator {
    attach: Option<Reconciler>,
    node_gc: Option<NodeGc>,
}

impl Operator {
    /// Wire the enabled reconcilers to shared clients
    pub fn new(
        nodes: Arc<dyn NodeClient>,
        cloud: Arc<dyn CloudApi>,
        settings: &Settings,
    ) -> Self {
        let resolver: Arc<dyn ReferenceResolver> = Arc::new(LastSegmentResolver);

        let attach = settings.reconciler().map(|config| {
            Reconciler::new(Context {
                nodes: nodes.clone(),
                cloud: cloud.clone(),
                resolver: resolver.clone(),
                config,
            })
        });
        let node_gc = settings
            .node_gc()
            .map(|config| NodeGc::new(nodes.clone(), cloud.clone(), resolver.clone(), config));

        if attach.is_none() && node_gc.is_none() {
            warn!("attach reconciliation and node GC are both disabled, passes will do nothing");
        }

        Self { attach, node_gc }
    }

    /// Run every enabled reconciler once
    ///
    /// Both reconcilers run even if the first cannot list nodes; the first
    /// listing error is returned.
    pub async fn run_once(&self) -> Result<(), Error> {
        let mut first_error = None;

        if let Some(reconciler) = &self.attach {
            if let Err(e) = reconciler.reconcile_pass().await {
                warn!(error = %e, "attach pass could not list nodes");
                first_error.get_or_insert(e);
            }
        }

        if let Some(gc) = &self.node_gc {
            match gc.reconcile_pass().await {
                Ok(summary) if summary.removed > 0 => {
                    info!(removed = summary.removed, "removed nodes without instances");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "liveness pass could not list nodes");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Run passes every `interval` until `shutdown` resolves
    pub async fn run(&self, interval: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = interval.as_secs(), "starting reconcile loop");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }
            // A failed listing is retried on the next tick
            let _ = self.run_once().await;
        }
        info!("reconcile loop stopped");
    }
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, stopping after current pass"),
        _ = terminate => info!("received SIGTERM, stopping after current pass"),
    }
}
