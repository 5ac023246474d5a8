use crate::output::print_json_line;
use anyhow::Context;
use futures::StreamExt;
use reaper_controller::{
    connect, DispatchOutcome, DispatchReport, KubeDeleter, Lifecycle, PodSource,
};
use reaper_core::config::ReaperConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

pub fn run(config: ReaperConfig, kubeconfig: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    config.ensure_valid()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let client = connect(kubeconfig.as_deref())
            .await
            .context("failed to connect to the cluster")?;

        tracing::info!(
            namespace = config.namespace.as_deref().unwrap_or("<all>"),
            marker = %config.marker_label,
            "starting pod-reaper"
        );

        let source = PodSource::new(
            client.clone(),
            config.namespace.as_deref(),
            config.label_selector.as_deref(),
        );
        let lifecycle = Lifecycle::new(config, source, Arc::new(KubeDeleter::new(client)));

        let stop = CancellationToken::new();
        tokio::spawn(log_reports(lifecycle.reports(), json));
        tokio::spawn(stop_on_signal(stop.clone()));

        lifecycle.run(stop).await.context("controller failed")
    })
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

async fn log_reports(mut reports: BroadcastStream<DispatchReport>, json: bool) {
    while let Some(item) = reports.next().await {
        let report = match item {
            Ok(report) => report,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "delete reports dropped");
                continue;
            }
        };

        if json {
            if let Err(e) = print_json_line(&report) {
                tracing::warn!(error = %e, "failed to write report");
            }
            continue;
        }

        match &report.outcome {
            DispatchOutcome::Deleted => {
                tracing::info!(key = %report.key, attempts = report.attempts, "pod deleted");
            }
            DispatchOutcome::AlreadyGone => {
                tracing::info!(key = %report.key, "pod was already gone");
            }
            DispatchOutcome::Failed { error } => {
                tracing::error!(
                    key = %report.key,
                    attempts = report.attempts,
                    error = %error,
                    "giving up on pod"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

async fn stop_on_signal(stop: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }

    tracing::info!("stop signal received, shutting down");
    stop.cancel();
}
