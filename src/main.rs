use blink_monitor::config::AppConfig;
use blink_monitor::events::MonitorEvent;
use blink_monitor::logging::init_tracing;
use blink_monitor::pipeline::Monitor;
use blink_monitor::sim::{DemoCamera, DemoExtractor};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env();

    init_tracing(&config.log).expect("Failed to initialize logging");
    tracing::info!("Starting blink-monitor");

    let handle = match Monitor::spawn(config.monitor, DemoCamera, DemoExtractor::new()) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Invalid monitor configuration");
            std::process::exit(2);
        }
    };

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(shutdown_signal(shutdown_tx));

    let mut events = BroadcastStream::new(handle.subscribe());
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            next = events.next() => match next {
                Some(Ok(event)) => log_event(&event),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "Event consumer lagging");
                }
                None => break,
            },
        }
    }

    let counters = handle.counters();
    handle.shutdown().await;
    tracing::info!(?counters, "Shutdown complete");
}

fn log_event(event: &MonitorEvent) {
    let payload = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize event");
            return;
        }
    };
    match event {
        MonitorEvent::Alert { .. } | MonitorEvent::CameraError { .. } => {
            tracing::warn!(event = %payload, "Monitor event")
        }
        MonitorEvent::Statistics(_) | MonitorEvent::CalibrationProgress { .. } => {
            tracing::debug!(event = %payload, "Monitor event")
        }
        _ => tracing::info!(event = %payload, "Monitor event"),
    }
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
