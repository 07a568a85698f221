//! ## Status Reporting System
//!
//! Lets the tasks of the bridge report shutdowns and fatal errors to the main runtime loop.
//!
//! Each task wraps its report in a [`Status`] and sends it over an async channel, tagged with a
//! [`StatusSender`] variant that identifies the source.

use tracing::{debug, error, warn};

use crate::error::BridgeError;

/// Identifies the component that originated a [`Status`] update.
#[derive(Debug, Clone)]
pub enum StatusSender {
    /// A bridged peer connection.
    Peer {
        peer_id: u32,
        tx: async_channel::Sender<Status>,
    },
    /// The inbound listener.
    Listener(async_channel::Sender<Status>),
}

impl StatusSender {
    /// Sends a [`Status`] update.
    pub async fn send(&self, status: Status) -> Result<(), async_channel::SendError<Status>> {
        match self {
            Self::Peer { peer_id, tx } => {
                debug!("Sending status from Peer [{}]: {:?}", peer_id, status.state);
                tx.send(status).await
            }
            Self::Listener(tx) => {
                debug!("Sending status from Listener: {:?}", status.state);
                tx.send(status).await
            }
        }
    }
}

/// The type of event or error being reported by a component.
#[derive(Debug)]
pub enum State {
    /// A peer connection ended because of an error.
    PeerShutdown { peer_id: u32, reason: BridgeError },
    /// The listener exited unexpectedly.
    ListenerShutdown(BridgeError),
}

/// A message reporting the current [`State`] of a component.
#[derive(Debug)]
pub struct Status {
    pub state: State,
}

async fn send_status(sender: &StatusSender, error: BridgeError) {
    let state = match sender {
        StatusSender::Peer { peer_id, .. } => {
            warn!("Peer [{peer_id}] shutting down due to error: {error}");
            State::PeerShutdown {
                peer_id: *peer_id,
                reason: error,
            }
        }
        StatusSender::Listener(_) => {
            warn!("Listener shutting down due to error: {error}");
            State::ListenerShutdown(error)
        }
    };

    if let Err(e) = sender.send(Status { state }).await {
        error!("Failed to send status update from {sender:?}: {e:?}");
    }
}

/// Logs `e` and reports it to the main loop.
pub async fn handle_error(sender: &StatusSender, e: BridgeError) {
    error!("Error in {:?}: {}", sender, e);
    send_status(sender, e).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_error_reports_peer() {
        let (tx, rx) = async_channel::unbounded();
        let sender = StatusSender::Peer { peer_id: 7, tx };
        handle_error(&sender, BridgeError::PeerDisconnect(Some(1000))).await;

        let status = rx.recv().await.unwrap();
        assert!(matches!(
            status.state,
            State::PeerShutdown {
                peer_id: 7,
                reason: BridgeError::PeerDisconnect(Some(1000))
            }
        ));
    }

    #[tokio::test]
    async fn test_handle_error_with_closed_channel() {
        let (tx, rx) = async_channel::unbounded();
        drop(rx);
        // Nothing to deliver to, only logged.
        handle_error(&StatusSender::Listener(tx), BridgeError::Shutdown).await;
    }
}
