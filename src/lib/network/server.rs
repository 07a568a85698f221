//! ## Inbound Bridge Server
//!
//! Accepts peers of both dialects and connects each of them to the binary host behind the
//! bridge.
//!
//! The websocket path of the upgrade request picks the peer's dialect (see
//! [`ServerTranslator::accept`]). Every accepted peer gets its own host connection, and the two
//! are joined by a [`pump`] running a [`ServerTranslator`].
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
};
use tokio_tungstenite::{
    accept_hdr_async, connect_async,
    tungstenite::handshake::server::{ErrorResponse, Request, Response},
};
use tracing::{debug, error, info, warn};

use super::{pump, PumpExit, WsConnection};
use crate::{
    error::{BridgeError, BridgeResult},
    status::{handle_error, Status, StatusSender},
    task_manager::TaskManager,
    translator::{HostHeight, Pipeline, ServerTranslator, TranslatorConfig},
    utils::ShutdownMessage,
};

/// Listens for peers and bridges them to the host node.
#[derive(Debug)]
pub struct BridgeServer {
    listen_address: SocketAddr,
    host_url: String,
    translator: TranslatorConfig,
    host_height: HostHeight,
    peer_counter: AtomicU32,
}

impl BridgeServer {
    pub fn new(listen_address: SocketAddr, host_url: String, translator: TranslatorConfig) -> Self {
        Self {
            listen_address,
            host_url,
            translator,
            host_height: HostHeight::new(),
            peer_counter: AtomicU32::new(1),
        }
    }

    /// Last chain height seen in a host `getStatus` response.
    pub fn host_height(&self) -> u32 {
        self.host_height.get()
    }

    pub async fn bind(&self) -> BridgeResult<TcpListener> {
        TcpListener::bind(self.listen_address).await.map_err(|e| {
            error!("Failed to bind to {}: {}", self.listen_address, e);
            BridgeError::from(e)
        })
    }

    /// Binds the listening address and serves peers until shutdown.
    pub async fn start(
        self: Arc<Self>,
        notify_shutdown: broadcast::Sender<ShutdownMessage>,
        shutdown_complete_tx: mpsc::Sender<()>,
        status_sender: async_channel::Sender<Status>,
        task_manager: Arc<TaskManager>,
    ) -> BridgeResult<()> {
        let listener = self.bind().await?;
        self.serve(
            listener,
            notify_shutdown,
            shutdown_complete_tx,
            status_sender,
            task_manager,
        )
        .await
    }

    /// Accepts peers on `listener` until a [`ShutdownMessage::ShutdownAll`].
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        notify_shutdown: broadcast::Sender<ShutdownMessage>,
        shutdown_complete_tx: mpsc::Sender<()>,
        status_sender: async_channel::Sender<Status>,
        task_manager: Arc<TaskManager>,
    ) -> BridgeResult<()> {
        let mut shutdown_rx = notify_shutdown.subscribe();
        info!(
            "Bridge listening on {}, host at {}",
            listener.local_addr()?,
            self.host_url
        );

        loop {
            tokio::select! {
                message = shutdown_rx.recv() => match message {
                    Ok(ShutdownMessage::ShutdownAll) | Err(broadcast::error::RecvError::Closed) => {
                        debug!("Listener received shutdown signal. Exiting.");
                        break;
                    }
                    Ok(ShutdownMessage::ConnectionShutdown(peer_id)) => {
                        debug!("Peer {peer_id} removed, {} tasks running", task_manager.running());
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                },
                accepted = listener.accept() => match accepted {
                    Ok((stream, address)) => {
                        let peer_id = self.peer_counter.fetch_add(1, Ordering::Relaxed);
                        info!("Peer {peer_id} connected from {address}");
                        let status = StatusSender::Peer {
                            peer_id,
                            tx: status_sender.clone(),
                        };
                        let shutdown = notify_shutdown.subscribe();
                        let shutdown_complete = shutdown_complete_tx.clone();
                        let server = self.clone();
                        task_manager.spawn(async move {
                            if let Err(e) = server.bridge_peer(stream, peer_id, shutdown).await {
                                handle_error(&status, e).await;
                            }
                            drop(shutdown_complete);
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {e}");
                    }
                },
            }
        }

        drop(shutdown_complete_tx);
        Ok(())
    }

    async fn bridge_peer(
        &self,
        stream: TcpStream,
        peer_id: u32,
        mut shutdown: broadcast::Receiver<ShutdownMessage>,
    ) -> BridgeResult<()> {
        let mut path = String::from("/");
        let peer = accept_hdr_async(stream, |request: &Request, response: Response| {
            path = request.uri().path().to_string();
            Ok::<Response, ErrorResponse>(response)
        })
        .await?;
        let peer = WsConnection::new(peer);

        let host = match connect_async(self.host_url.as_str()).await {
            Ok((host, _)) => WsConnection::new(host),
            Err(e) => {
                peer.close();
                return Err(e.into());
            }
        };

        let translator =
            ServerTranslator::accept(&path, self.translator.clone(), self.host_height.clone());
        info!("Peer {peer_id} on {path} speaks {}", translator.dialect());
        let mut pipeline = Pipeline::new().with(translator);

        let (host_rx, host_tx) = (host.receiver(), host.sender());
        let exit = pump(
            &mut pipeline,
            (&host_rx, &host_tx),
            &peer,
            &mut shutdown,
            peer_id,
        )
        .await;

        pipeline.on_close();
        peer.close();
        host.close();

        match exit {
            PumpExit::Closed(BridgeError::PeerDisconnect(code)) => {
                info!("Peer {peer_id} disconnected (code {code:?})");
                Ok(())
            }
            PumpExit::Closed(e) => Err(e),
            PumpExit::Fallback { dialect, .. } => Err(BridgeError::DialectMismatch(format!(
                "unexpected fallback to {dialect} on an accepted connection"
            ))),
            PumpExit::Disconnected | PumpExit::Shutdown => {
                info!("Peer {peer_id} closed");
                Ok(())
            }
        }
    }
}
