//! ## Outbound Bridge Client
//!
//! [`BridgeClient`] gives an application a pair of channels behind which the remote peer may
//! speak either dialect. The application itself sends legacy calls or binary frames and gets
//! answers in the dialect it used.
//!
//! The connection is first opened on the binary path. When the transport handshake is refused,
//! the remote closes before its dialect is known, or it answers with something that is not a
//! frame, the connection is reopened once on the legacy path and the pending handshake is
//! replayed there.
use async_channel::{unbounded, Receiver, Sender};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use super::{pump, PumpExit, WsConnection};
use crate::{
    config::DialectPaths,
    error::{BridgeError, BridgeResult},
    translator::{ClientTranslator, Dialect, Pipeline, TranslatorConfig, WireMessage},
    utils::ShutdownMessage,
};

/// Id used for the single connection of a client in logs and shutdown messages.
const CLIENT_CONNECTION_ID: u32 = 0;

/// An application endpoint connected to a remote peer of unknown dialect.
#[derive(Debug)]
pub struct BridgeClient {
    sender: Sender<WireMessage>,
    receiver: Receiver<WireMessage>,
    notify_shutdown: broadcast::Sender<ShutdownMessage>,
    handle: JoinHandle<BridgeResult<()>>,
}

impl BridgeClient {
    /// Starts connecting to `base_url` (e.g. `ws://10.0.0.5:4000`) in the background.
    ///
    /// Messages sent before the remote dialect is known are queued.
    pub fn connect(base_url: &str, config: TranslatorConfig) -> Self {
        let (app_tx, bridge_rx) = unbounded();
        let (bridge_tx, app_rx) = unbounded();
        let (notify_shutdown, shutdown) = broadcast::channel(1);

        let paths = config.paths.clone();
        let pipeline = Pipeline::new().with(ClientTranslator::new(config));
        let handle = tokio::spawn(run(
            base_url.to_string(),
            paths,
            pipeline,
            (bridge_rx, bridge_tx),
            shutdown,
        ));

        Self {
            sender: app_tx,
            receiver: app_rx,
            notify_shutdown,
            handle,
        }
    }

    pub async fn send(&self, message: WireMessage) -> BridgeResult<()> {
        Ok(self.sender.send(message).await?)
    }

    /// Next message from the remote peer, in the application's dialect.
    pub async fn receive(&self) -> BridgeResult<WireMessage> {
        Ok(self.receiver.recv().await?)
    }

    pub fn sender(&self) -> Sender<WireMessage> {
        self.sender.clone()
    }

    pub fn receiver(&self) -> Receiver<WireMessage> {
        self.receiver.clone()
    }

    /// Closes the connection. Pending requests are dropped.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(ShutdownMessage::ShutdownAll);
    }

    /// Waits for the connection to end and returns why it ended.
    pub async fn join(self) -> BridgeResult<()> {
        let Self {
            notify_shutdown,
            handle,
            ..
        } = self;
        let result = handle.await.unwrap_or(Err(BridgeError::Shutdown));
        drop(notify_shutdown);
        result
    }
}

fn url_for(base_url: &str, paths: &DialectPaths, dialect: Dialect) -> String {
    let path = match dialect {
        Dialect::Binary => &paths.binary,
        Dialect::Legacy => &paths.legacy,
    };
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

async fn run(
    base_url: String,
    paths: DialectPaths,
    mut pipeline: Pipeline,
    local: (Receiver<WireMessage>, Sender<WireMessage>),
    mut shutdown: broadcast::Receiver<ShutdownMessage>,
) -> BridgeResult<()> {
    let (local_rx, local_tx) = local;
    let mut dialect = Dialect::Binary;
    let mut replay = Vec::new();

    let result = loop {
        let url = url_for(&base_url, &paths, dialect);
        debug!("Connecting to {url} as {dialect}");
        let remote = match connect_async(url.as_str()).await {
            Ok((stream, _)) => WsConnection::new(stream),
            Err(e) => {
                let error = BridgeError::from(e);
                match pipeline.on_connect_error(&error) {
                    Some(next) => {
                        warn!("Connection to {url} refused, retrying as {next}");
                        dialect = next;
                        continue;
                    }
                    None => break Err(error),
                }
            }
        };
        info!("Connected to {url}");

        let mut replayed = true;
        for message in replay.drain(..) {
            replayed &= remote.send(message).await;
        }
        if !replayed {
            remote.close();
            break Err(BridgeError::ChannelErrorSender);
        }

        let exit = pump(
            &mut pipeline,
            (&local_rx, &local_tx),
            &remote,
            &mut shutdown,
            CLIENT_CONNECTION_ID,
        )
        .await;
        remote.close();

        match exit {
            PumpExit::Fallback {
                dialect: next,
                replay: messages,
            } => {
                info!("Reconnecting to {base_url} as {next}");
                dialect = next;
                replay = messages;
            }
            PumpExit::Closed(e) => break Err(e),
            PumpExit::Disconnected | PumpExit::Shutdown => break Ok(()),
        }
    };

    pipeline.on_close();
    local_tx.close();
    if let Err(e) = &result {
        warn!("Connection to {base_url} ended: {e}");
    }
    result
}
