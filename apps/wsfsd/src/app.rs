//! Wires the server to the transfer handler and runs until interrupted.

use std::sync::Arc;

use wsfs_server::{TransferHandler, WsfsServer};

use crate::config::Config;

/// Runs the daemon until Ctrl-C or a server error.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let handler = TransferHandler::new(config.transfer_settings());
    let server = WsfsServer::new(config.server_config(), handler);

    let server_run = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { server_run.run().await });

    tokio::select! {
        result = &mut server_task => {
            // The server only returns on its own when it failed to start.
            result??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("interrupt received, shutting down");
        }
    }

    server.shutdown();
    server_task.await??;
    Ok(())
}
