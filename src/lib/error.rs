//! ## Error Handling
//!
//! [`BridgeError`] is the single error type returned across the bridge. Leaf errors
//! ([`FrameError`], [`CodecError`], [`ValidationError`]) live next to the code that raises them
//! and convert into it with `?`.
//!
//! Whether an error ends the connection is decided by [`BridgeError::is_fatal`]. Unparsable
//! framing and dialect mismatches close the connection. Request-level problems are answered to
//! the requester and correlation misses are dropped, so the pump keeps a connection open when
//! asked to close it over one of those.
use std::fmt;

use crate::{codecs::CodecError, frame::FrameError, legacy::validation::ValidationError};

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug)]
pub enum BridgeError {
    /// A binary message is not a valid frame.
    Frame(FrameError),
    /// A frame payload could not be decoded for its method.
    Codec(CodecError),
    /// A response arrived for an id with no pending request.
    CorrelationMiss(u32),
    /// A request id was reused while the previous request with that id is pending.
    DuplicateCorrelation(u32),
    /// A legacy request exceeded a size or count limit.
    StructuralLimitExceeded(ValidationError),
    /// A legacy request has an unexpected shape.
    InvalidRequest(ValidationError),
    /// A message does not belong to the dialect pinned for the connection.
    DialectMismatch(String),
    /// The peer asked to close the connection.
    PeerDisconnect(Option<i64>),
    /// Errors on bad configuration file.
    ConfigError(ext_config::ConfigError),
    /// Errors on bad CLI argument input.
    BadCliArgs,
    /// The configured version is not a semantic version.
    InvalidVersion(semver::Error),
    /// Errors on bad `serde_json` serialize/deserialize.
    BadSerdeJson(serde_json::Error),
    /// Errors on bad `TcpStream` connection.
    Io(std::io::Error),
    /// Websocket transport errors, including rejected handshakes.
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    /// Channel receiver error
    ChannelErrorReceiver(async_channel::RecvError),
    /// Channel sender error
    ChannelErrorSender,
    /// Shutdown was requested.
    Shutdown,
}

impl BridgeError {
    /// Whether the connection that produced this error has to be closed.
    pub fn is_fatal(&self) -> bool {
        use BridgeError::*;
        !matches!(
            self,
            Codec(_)
                | CorrelationMiss(_)
                | DuplicateCorrelation(_)
                | StructuralLimitExceeded(_)
                | InvalidRequest(_)
        )
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BridgeError::*;
        match self {
            Frame(e) => write!(f, "Framing error: {e}"),
            Codec(e) => write!(f, "{e}"),
            CorrelationMiss(id) => write!(f, "No pending request with id {id}"),
            DuplicateCorrelation(id) => write!(f, "Request id {id} is already pending"),
            StructuralLimitExceeded(e) => write!(f, "Structural limit exceeded: {e}"),
            InvalidRequest(e) => write!(f, "Invalid request: {e}"),
            DialectMismatch(reason) => write!(f, "Dialect mismatch: {reason}"),
            PeerDisconnect(Some(code)) => write!(f, "Peer disconnected with code {code}"),
            PeerDisconnect(None) => write!(f, "Peer disconnected"),
            ConfigError(e) => write!(f, "Config error: {e:?}"),
            BadCliArgs => write!(f, "Bad CLI arg input"),
            InvalidVersion(e) => write!(f, "Invalid version: `{e}`"),
            BadSerdeJson(ref e) => write!(f, "Bad serde json: `{e:?}`"),
            Io(ref e) => write!(f, "I/O error: `{e:?}`"),
            WebSocket(ref e) => write!(f, "Websocket error: `{e}`"),
            ChannelErrorReceiver(ref e) => write!(f, "Channel receive error: `{e:?}`"),
            ChannelErrorSender => write!(f, "Channel send error"),
            Shutdown => write!(f, "Shutdown requested"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<FrameError> for BridgeError {
    fn from(e: FrameError) -> Self {
        BridgeError::Frame(e)
    }
}

impl From<CodecError> for BridgeError {
    fn from(e: CodecError) -> Self {
        BridgeError::Codec(e)
    }
}

impl From<ValidationError> for BridgeError {
    fn from(e: ValidationError) -> Self {
        if e.is_limit() {
            BridgeError::StructuralLimitExceeded(e)
        } else {
            BridgeError::InvalidRequest(e)
        }
    }
}

impl From<ext_config::ConfigError> for BridgeError {
    fn from(e: ext_config::ConfigError) -> Self {
        BridgeError::ConfigError(e)
    }
}

impl From<semver::Error> for BridgeError {
    fn from(e: semver::Error) -> Self {
        BridgeError::InvalidVersion(e)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::BadSerdeJson(e)
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Io(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        BridgeError::WebSocket(Box::new(e))
    }
}

impl From<async_channel::RecvError> for BridgeError {
    fn from(e: async_channel::RecvError) -> Self {
        BridgeError::ChannelErrorReceiver(e)
    }
}

impl<T> From<async_channel::SendError<T>> for BridgeError {
    fn from(_: async_channel::SendError<T>) -> Self {
        BridgeError::ChannelErrorSender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codecs::CodecErrorKind, method::Method};

    #[test]
    fn test_fatality() {
        assert!(BridgeError::Frame(FrameError::TooShort(3)).is_fatal());
        assert!(BridgeError::DialectMismatch("binary on legacy".into()).is_fatal());
        assert!(!BridgeError::CorrelationMiss(4).is_fatal());
        assert!(!BridgeError::Codec(CodecError::new(
            Method::GetBlocks,
            CodecErrorKind::MissingField("x")
        ))
        .is_fatal());
    }

    #[test]
    fn test_validation_errors_split_by_kind() {
        let limit = ValidationError::TooLarge {
            what: "transactions",
            limit: 40,
            actual: 41,
        };
        assert!(matches!(
            BridgeError::from(limit),
            BridgeError::StructuralLimitExceeded(_)
        ));
        let shape = ValidationError::UnknownEvent("p2p.peer.vote".into());
        assert!(matches!(
            BridgeError::from(shape),
            BridgeError::InvalidRequest(_)
        ));
    }
}
