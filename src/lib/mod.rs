//! ## P2P Bridge
//!
//! Connects peers speaking the legacy JSON/event dialect with peers speaking the binary framed
//! dialect.
//!
//! The crate has two entry points:
//!
//! - [`BridgeProxy`] runs the inbound bridge: it accepts peers of both dialects and connects each
//!   of them to a binary host node, translating legacy traffic on the way.
//! - [`network::BridgeClient`] lets an application of either dialect open an outbound connection
//!   to a peer of either dialect, detecting the remote dialect and falling back when needed.
//!
//! Message rewriting lives in [`translator`], the dialects themselves in [`legacy`], [`frame`]
//! and [`codecs`].
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::{
    config::BridgeConfig,
    error::{BridgeError, BridgeResult},
    network::BridgeServer,
    status::{State, Status},
    task_manager::TaskManager,
    translator::TranslatorConfig,
    utils::ShutdownMessage,
};

pub mod codecs;
pub mod config;
pub mod correlation;
pub mod error;
pub mod frame;
pub mod legacy;
pub mod logging;
pub mod method;
pub mod network;
pub mod status;
pub mod task_manager;
pub mod translator;
pub mod types;
pub mod utils;
pub mod version;

/// The inbound bridge service.
#[derive(Clone, Debug)]
pub struct BridgeProxy {
    config: BridgeConfig,
}

impl BridgeProxy {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    fn listen_address(&self) -> BridgeResult<SocketAddr> {
        let address = format!("{}:{}", self.config.listen_address, self.config.listen_port);
        address.parse().map_err(|_| {
            error!("Invalid listen address: {address}");
            BridgeError::BadCliArgs
        })
    }

    /// Runs the bridge until Ctrl+C or a fatal listener error.
    pub async fn start(self) -> BridgeResult<()> {
        info!("Starting P2P bridge...");

        let translator = TranslatorConfig::from_bridge_config(&self.config)?;
        let listen_address = self.listen_address()?;

        let (notify_shutdown, _) = broadcast::channel::<ShutdownMessage>(16);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);
        let task_manager = Arc::new(TaskManager::new());
        let (status_sender, status_receiver) = async_channel::unbounded::<Status>();

        let server = Arc::new(BridgeServer::new(
            listen_address,
            self.config.host_url.clone(),
            translator,
        ));
        let listener = server.bind().await?;

        let notify_shutdown_clone = notify_shutdown.clone();
        task_manager.spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Ctrl+C received, initiating graceful shutdown...");
                        let _ = notify_shutdown_clone.send(ShutdownMessage::ShutdownAll);
                        break;
                    }
                    message = status_receiver.recv() => {
                        let Ok(status) = message else { break };
                        match status.state {
                            State::PeerShutdown { peer_id, reason } => {
                                debug!("Peer {peer_id} ended: {reason}");
                                let _ = notify_shutdown_clone
                                    .send(ShutdownMessage::ConnectionShutdown(peer_id));
                            }
                            State::ListenerShutdown(reason) => {
                                warn!("Listener stopped: {reason}, initiating full shutdown.");
                                let _ = notify_shutdown_clone.send(ShutdownMessage::ShutdownAll);
                                break;
                            }
                        }
                    }
                }
            }
        });

        let listener_status = status::StatusSender::Listener(status_sender.clone());
        let server_notify_shutdown = notify_shutdown.clone();
        let server_shutdown_complete = shutdown_complete_tx.clone();
        let server_task_manager = task_manager.clone();
        task_manager.spawn(async move {
            if let Err(e) = server
                .serve(
                    listener,
                    server_notify_shutdown,
                    server_shutdown_complete,
                    status_sender,
                    server_task_manager,
                )
                .await
            {
                status::handle_error(&listener_status, e).await;
            }
        });

        let mut shutdown_rx = notify_shutdown.subscribe();
        loop {
            match shutdown_rx.recv().await {
                Ok(ShutdownMessage::ShutdownAll) | Err(broadcast::error::RecvError::Closed) => {
                    break
                }
                _ => {}
            }
        }

        drop(shutdown_complete_tx);
        info!("Waiting for bridged connections to close...");
        let shutdown_timeout = tokio::time::Duration::from_secs(5);
        tokio::select! {
            _ = shutdown_complete_rx.recv() => {
                info!("All connections closed.");
            }
            _ = tokio::time::sleep(shutdown_timeout) => {
                warn!("Graceful shutdown timed out after {shutdown_timeout:?}, forcing shutdown.");
                task_manager.abort_all().await;
            }
        }
        info!("Joining remaining tasks...");
        task_manager.join_all().await;
        info!("P2P bridge shutdown complete.");
        Ok(())
    }
}
