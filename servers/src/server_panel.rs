use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;

mod panel_logic;
use panel_logic::{config, downstream, logger};

use lib_panel::core::{BroadcastHub, EventStreamService, StreamConfig};
use lib_panel::persist::{EventSink, NullSink, PostgresSink};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();
    logger::setup_logging(
        config.log_dir.as_deref().unwrap_or_else(|| std::path::Path::new("./logs")),
        config.log_level.as_deref().unwrap_or("info"),
    )?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    // Wire the subsystem explicitly: one hub, one sink, one service.
    let hub = Arc::new(BroadcastHub::new());
    let sink: Arc<dyn EventSink> = match config.database_url.as_deref() {
        Some(url) if !url.is_empty() => match PostgresSink::connect(url, 5).await {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                log::warn!("Database unavailable, events will not be persisted: {e}");
                Arc::new(NullSink)
            }
        },
        _ => {
            log::info!("No database configured, persistence disabled.");
            Arc::new(NullSink)
        }
    };

    let mut stream_config = StreamConfig::new(
        config.upstream_url.as_deref().unwrap_or_default(),
        config.api_token.as_deref().unwrap_or_default(),
        config.system_id.as_deref().unwrap_or_default(),
    );
    if let Some(secs) = config.reconnect_floor_seconds {
        stream_config.backoff_floor = Duration::from_secs(secs);
    }
    if let Some(secs) = config.reconnect_ceiling_seconds {
        stream_config.backoff_ceiling = Duration::from_secs(secs);
    }

    let service = EventStreamService::new(stream_config, Arc::clone(&hub), sink);
    // Configuration problems are the one failure surfaced at boot.
    service.start()?;

    let heartbeat = Duration::from_secs(config.heartbeat_seconds.unwrap_or(30));
    let heartbeat_handle = tokio::spawn(
        Arc::clone(&hub).run_heartbeat(heartbeat, shutdown_tx.subscribe()),
    );

    let downstream_handle = tokio::spawn(downstream::run(
        config.port.unwrap_or(9010),
        downstream::AppState { service: service.clone(), hub: Arc::clone(&hub) },
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate()).unwrap();
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components, then stop ingestion.
    let _ = shutdown_tx.send(());
    service.stop().await;

    // Wait for components to shut down
    let _ = tokio::try_join!(heartbeat_handle, downstream_handle);

    log::info!("Shutdown complete.");
    Ok(())
}
