//! Headless job-stream monitor.
//!
//! Connects to a shelfsync server, performs an initial pull refresh,
//! and logs job status changes, log lines, and connection-state
//! transitions until interrupted.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shelfsync_stream::{Envelope, EventTag, JobStreamManager, StreamConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shelfsync_monitor=info,shelfsync_stream=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StreamConfig::from_env();
    tracing::info!(ws_url = %config.ws_url, api_url = %config.api_url, "Starting monitor");

    let manager = JobStreamManager::start(config);

    manager.subscribe(
        EventTag::Status,
        Arc::new(|envelopes: &[Envelope]| {
            for envelope in envelopes {
                if let Envelope::Status(event) = envelope {
                    tracing::info!(
                        job_id = %event.job_id,
                        status = ?event.status,
                        progress = ?event.progress,
                        "Job status",
                    );
                }
            }
            Ok(())
        }),
    );

    manager.subscribe(
        EventTag::Log,
        Arc::new(|envelopes: &[Envelope]| {
            for envelope in envelopes {
                if let Envelope::Log(event) = envelope {
                    tracing::info!(job_id = ?event.job_id, "{}", event.line);
                }
            }
            Ok(())
        }),
    );

    // Initial pull so the cache holds history before push events land.
    match manager.refresh().await {
        Ok(jobs) => tracing::info!(count = jobs.len(), "Initial job listing loaded"),
        Err(e) => tracing::warn!(error = %e, "Initial job listing failed"),
    }

    let mut state_rx = manager.watch_state();
    let state_task = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow();
            tracing::info!(?state, "Connection state");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl-c");
    tracing::info!("Shutting down");
    manager.shutdown();
    state_task.abort();
}
