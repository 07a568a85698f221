use async_channel::{unbounded, Receiver, Sender};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{error, trace, warn};

use crate::translator::WireMessage;

/// A websocket connection carrying [`WireMessage`]s.
///
/// A reader and a writer task move messages between the socket and a pair of channels. When
/// either task stops, both channels are closed, so [`WsConnection::receive`] returning `None`
/// means the connection is gone.
#[derive(Debug, Clone)]
pub struct WsConnection {
    receiver: Receiver<WireMessage>,
    sender: Sender<WireMessage>,
}

struct ConnectionState {
    receiver_outgoing: Receiver<WireMessage>,
    sender_outgoing: Sender<WireMessage>,
    receiver_incoming: Receiver<WireMessage>,
    sender_incoming: Sender<WireMessage>,
}

impl ConnectionState {
    fn close(&self) {
        self.receiver_incoming.close();
        self.receiver_outgoing.close();
        self.sender_incoming.close();
        self.sender_outgoing.close();
    }
}

impl WsConnection {
    pub fn new<S>(stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = stream.split();
        let (sender_incoming, receiver_incoming) = unbounded();
        let (sender_outgoing, receiver_outgoing) = unbounded();

        let state = ConnectionState {
            receiver_outgoing: receiver_outgoing.clone(),
            sender_outgoing: sender_outgoing.clone(),
            receiver_incoming: receiver_incoming.clone(),
            sender_incoming: sender_incoming.clone(),
        };

        tokio::spawn(async move {
            tokio::select! {
                _ = Self::run_reader(source, sender_incoming) => {
                    trace!("Websocket reader exited, closing connection");
                }
                _ = Self::run_writer(sink, receiver_outgoing) => {
                    trace!("Websocket writer exited, closing connection");
                }
            }
            state.close();
        });

        Self {
            receiver: receiver_incoming,
            sender: sender_outgoing,
        }
    }

    async fn run_reader<S>(mut source: SplitStream<WebSocketStream<S>>, sender: Sender<WireMessage>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(result) = source.next().await {
            let message = match result {
                Ok(Message::Text(text)) => WireMessage::Text(text),
                Ok(Message::Binary(bytes)) => WireMessage::Binary(bytes),
                Ok(Message::Close(frame)) => {
                    trace!("Websocket closed by remote: {frame:?}");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("Error reading from websocket: {e}");
                    break;
                }
            };
            if sender.send(message).await.is_err() {
                warn!("Receiver dropped, stopping reader");
                break;
            }
        }
    }

    async fn run_writer<S>(
        mut sink: SplitSink<WebSocketStream<S>, Message>,
        receiver: Receiver<WireMessage>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Ok(message) = receiver.recv().await {
            let message = match message {
                WireMessage::Text(text) => Message::Text(text),
                WireMessage::Binary(bytes) => Message::Binary(bytes),
            };
            if let Err(e) = sink.send(message).await {
                error!("Failed to write to websocket: {e}");
                return;
            }
        }
        if let Err(e) = sink.close().await {
            trace!("Websocket close handshake failed: {e}");
        }
    }

    /// Send a message to the other side of the connection.
    pub async fn send(&self, message: WireMessage) -> bool {
        self.sender.send(message).await.is_ok()
    }

    /// Receive a message from the other side of the connection.
    pub async fn receive(&self) -> Option<WireMessage> {
        self.receiver.recv().await.ok()
    }

    pub fn receiver(&self) -> Receiver<WireMessage> {
        self.receiver.clone()
    }

    pub fn sender(&self) -> Sender<WireMessage> {
        self.sender.clone()
    }

    /// Flushes queued messages and closes the websocket.
    pub fn close(&self) {
        self.sender.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, connect_async};

    #[tokio::test]
    async fn test_ws_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            WsConnection::new(accept_async(stream).await.unwrap())
        });
        let (client, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
        let client = WsConnection::new(client);
        let server = accept.await.unwrap();

        assert!(client.send(WireMessage::Text("#2".into())).await);
        assert_eq!(server.receive().await, Some(WireMessage::Text("#2".into())));

        assert!(server.send(WireMessage::Binary(vec![0, 1, 2])).await);
        assert_eq!(client.receive().await, Some(WireMessage::Binary(vec![0, 1, 2])));

        client.close();
        assert_eq!(server.receive().await, None);
    }
}
