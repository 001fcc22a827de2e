//! Headless print host binary.
//!
//! Starts the BLE session, the bridge WebSocket server and signal handling.

use tracing_subscriber::EnvFilter;

use booth_host_lib::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting booth print host");

    let state = booth_host_lib::init_foundation().await?;
    tracing::info!(
        variant = ?state.device().variant(),
        print_width = state.device().print_width(),
        "Printer session ready"
    );

    let server_state = state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::start_server(server_state).await {
            tracing::error!("Server failed: {e}");
        }
    });

    let s = state.clone();
    tokio::spawn(async move { booth_host_lib::auto_connect(s).await });

    tracing::info!(
        addr = %state.config().bind_addr(),
        "Print host running. Press Ctrl+C to stop."
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    booth_host_lib::graceful_shutdown(&state).await;
    if let Err(e) = server_handle.await {
        tracing::warn!("Server task ended abnormally: {e}");
    }
    Ok(())
}
