// Binary entry point: load configuration, build the service context, and
// run the webhook server and delivery worker side by side until the
// process receives a shutdown signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use convo_gateway::config::Config;
use convo_gateway::context::ServiceContext;
use convo_gateway::worker::DeliveryWorker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env()?;
    init_tracing(&config.log_level, &config.log_format);

    info!(port = config.port, "starting conversational messaging gateway");

    let (context, delivery_receiver) = ServiceContext::build(config).await?;

    let worker = DeliveryWorker::new(
        delivery_receiver,
        context.ai_client.clone(),
        context.outbound.clone(),
        context.task_lock.clone(),
    );
    let worker_handle = tokio::spawn(worker.run());

    let stop = Arc::new(AtomicBool::new(false));
    let server_stop = stop.clone();
    let server_context = context.clone();
    let server_handle = tokio::spawn(async move { convo_gateway::webhook::run_server(server_context, server_stop).await });

    shutdown_signal().await;
    info!("shutdown signal received, stopping webhook server");
    stop.store(true, Ordering::Relaxed);

    if let Err(e) = server_handle.await {
        error!(error = %e, "webhook server task panicked");
    }
    worker_handle.abort();

    Ok(())
}

fn init_tracing(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
