//! ## Network Module
//!
//! Websocket plumbing around the translators.
//!
//! Every bridged connection is driven by one [`pump`]: a sequential loop that takes messages
//! from the local side (the application, or the host behind the bridge) and from the remote
//! websocket, runs them through the connection's [`Pipeline`] and acts on the resulting
//! [`Verdict`].
pub mod client;
pub mod connection;
pub mod server;

use async_channel::{Receiver, Sender};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::{
    error::BridgeError,
    translator::{Dialect, Pipeline, Verdict, WireMessage},
    utils::ShutdownMessage,
};
pub use client::BridgeClient;
pub use connection::WsConnection;
pub use server::BridgeServer;

/// Why a pump stopped.
#[derive(Debug)]
pub enum PumpExit {
    /// One of the two sides went away.
    Disconnected,
    /// The pipeline asked to close the connection.
    Closed(BridgeError),
    /// The pipeline asked to reconnect in another dialect.
    Fallback {
        dialect: Dialect,
        replay: Vec<WireMessage>,
    },
    Shutdown,
}

/// Moves messages between `local` and `remote` through `pipeline` until one side stops.
///
/// `connection_id` is matched against [`ShutdownMessage::ConnectionShutdown`].
pub async fn pump(
    pipeline: &mut Pipeline,
    local: (&Receiver<WireMessage>, &Sender<WireMessage>),
    remote: &WsConnection,
    shutdown: &mut broadcast::Receiver<ShutdownMessage>,
    connection_id: u32,
) -> PumpExit {
    let (local_rx, local_tx) = local;
    loop {
        tokio::select! {
            message = local_rx.recv() => {
                let Ok(message) = message else {
                    debug!("Connection {connection_id}: local side closed");
                    return PumpExit::Disconnected;
                };
                match pipeline.outbound(message) {
                    Verdict::Forward(message) => {
                        if !remote.send(message).await {
                            return remote_closed(pipeline, connection_id);
                        }
                    }
                    Verdict::Reply(message) => {
                        if local_tx.send(message).await.is_err() {
                            return PumpExit::Disconnected;
                        }
                    }
                    verdict => {
                        if let Some(exit) = exit_for(verdict) {
                            return exit;
                        }
                    }
                }
            }
            message = remote.receive() => {
                let Some(message) = message else {
                    return remote_closed(pipeline, connection_id);
                };
                trace!("Connection {connection_id}: received {} bytes", message.len());
                match pipeline.inbound(message) {
                    Verdict::Forward(message) => {
                        if local_tx.send(message).await.is_err() {
                            debug!("Connection {connection_id}: local side closed");
                            return PumpExit::Disconnected;
                        }
                    }
                    Verdict::Reply(message) => {
                        if !remote.send(message).await {
                            return remote_closed(pipeline, connection_id);
                        }
                    }
                    verdict => {
                        if let Some(exit) = exit_for(verdict) {
                            return exit;
                        }
                    }
                }
            }
            message = shutdown.recv() => match message {
                Ok(ShutdownMessage::ShutdownAll) => return PumpExit::Shutdown,
                Ok(ShutdownMessage::ConnectionShutdown(id)) if id == connection_id => {
                    return PumpExit::Shutdown
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return PumpExit::Shutdown,
            },
        }
    }
}

/// The exit a terminal verdict asks for. `Forward`, `Reply` and `Drop` keep the pump running, and
/// so does a close for an error that is not fatal.
fn exit_for(verdict: Verdict) -> Option<PumpExit> {
    match verdict {
        Verdict::Close(e) if !e.is_fatal() => {
            warn!("Keeping connection open after: {e}");
            None
        }
        Verdict::Close(e) => Some(PumpExit::Closed(e)),
        Verdict::Fallback { dialect, replay } => Some(PumpExit::Fallback { dialect, replay }),
        Verdict::Forward(_) | Verdict::Reply(_) | Verdict::Drop => None,
    }
}

fn remote_closed(pipeline: &mut Pipeline, connection_id: u32) -> PumpExit {
    debug!("Connection {connection_id}: remote side closed");
    pipeline
        .on_remote_closed()
        .and_then(exit_for)
        .unwrap_or(PumpExit::Disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_fatal_errors_close() {
        assert!(exit_for(Verdict::Close(BridgeError::CorrelationMiss(3))).is_none());
        assert!(matches!(
            exit_for(Verdict::Close(BridgeError::DialectMismatch("text".into()))),
            Some(PumpExit::Closed(BridgeError::DialectMismatch(_)))
        ));
        assert!(matches!(
            exit_for(Verdict::Fallback {
                dialect: Dialect::Legacy,
                replay: vec![],
            }),
            Some(PumpExit::Fallback { .. })
        ));
        assert!(exit_for(Verdict::Drop).is_none());
    }
}
