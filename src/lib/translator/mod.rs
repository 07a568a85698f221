//! ## Translator Module
//!
//! Per-connection message rewriting between the two dialects.
//!
//! Every connection owns a [`Pipeline`] of [`Interceptor`]s. Messages going to the wire run
//! through the interceptors in order (`outbound`), messages coming from the wire run through them
//! in reverse order (`inbound`). Each step returns a [`Verdict`] telling the pump what to do with
//! the message.
//!
//! - [`client::ClientTranslator`] sits on outbound connections and detects the remote dialect.
//! - [`server::ServerTranslator`] sits on accepted connections and always talks binary to the
//!   host behind the bridge.
use std::{fmt, sync::Arc};
use tracing::trace;

use crate::{
    config::{BridgeConfig, DialectPaths, Limits},
    error::BridgeError,
    legacy::transactions::{SerializedFieldFactory, TransactionFactory},
    version::VersionPolicy,
};

pub mod client;
pub mod convert;
pub mod server;

pub use client::ClientTranslator;
pub use server::{HostHeight, ServerTranslator};

/// Frame version byte of hello frames produced by the bridge.
pub const HELLO_VERSION: u8 = 2;

/// The two wire dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// JSON events over websocket text messages.
    Legacy,
    /// Framed protobuf payloads over websocket binary messages.
    Binary,
}

impl Dialect {
    pub fn other(self) -> Self {
        match self {
            Dialect::Legacy => Dialect::Binary,
            Dialect::Binary => Dialect::Legacy,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Legacy => write!(f, "legacy"),
            Dialect::Binary => write!(f, "binary"),
        }
    }
}

/// A websocket data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WireMessage {
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            WireMessage::Text(text) => Some(text),
            WireMessage::Binary(_) => None,
        }
    }
}

/// What the pump does with a message after an interceptor looked at it.
#[derive(Debug)]
pub enum Verdict {
    /// Pass the (possibly rewritten) message on in the same direction.
    Forward(WireMessage),
    /// Send this message back where the original came from.
    Reply(WireMessage),
    /// Swallow the message.
    Drop,
    /// Close the connection.
    Close(BridgeError),
    /// Reconnect speaking `dialect` and send `replay` first.
    Fallback {
        dialect: Dialect,
        replay: Vec<WireMessage>,
    },
}

/// A per-connection message rewriter.
///
/// `outbound` sees messages on their way to the remote end, `inbound` sees messages received from
/// it.
pub trait Interceptor: Send {
    fn name(&self) -> &'static str;

    fn outbound(&mut self, message: WireMessage) -> Verdict;

    fn inbound(&mut self, message: WireMessage) -> Verdict;

    /// Called once when the connection is gone.
    fn on_close(&mut self) {}

    /// Called when the transport could not be opened. Returning a dialect asks the caller to
    /// retry with it.
    fn on_connect_error(&mut self, _error: &BridgeError) -> Option<Dialect> {
        None
    }

    /// Called when the remote end closed the connection. A returned verdict replaces the plain
    /// disconnect, e.g. with a [`Verdict::Fallback`].
    fn on_remote_closed(&mut self) -> Option<Verdict> {
        None
    }
}

/// Ordered interceptors of one connection.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Interceptor>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|stage| stage.name()))
            .finish()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: impl Interceptor + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn push(&mut self, stage: Box<dyn Interceptor>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn outbound(&mut self, message: WireMessage) -> Verdict {
        let mut message = message;
        for stage in self.stages.iter_mut() {
            match stage.outbound(message) {
                Verdict::Forward(next) => message = next,
                other => {
                    trace!("{} stopped an outbound message", stage.name());
                    return other;
                }
            }
        }
        Verdict::Forward(message)
    }

    pub fn inbound(&mut self, message: WireMessage) -> Verdict {
        let mut message = message;
        for stage in self.stages.iter_mut().rev() {
            match stage.inbound(message) {
                Verdict::Forward(next) => message = next,
                other => {
                    trace!("{} stopped an inbound message", stage.name());
                    return other;
                }
            }
        }
        Verdict::Forward(message)
    }

    pub fn on_close(&mut self) {
        self.stages.iter_mut().for_each(|stage| stage.on_close());
    }

    /// Asks every stage about a failed connection attempt. The first dialect returned wins.
    pub fn on_connect_error(&mut self, error: &BridgeError) -> Option<Dialect> {
        self.stages
            .iter_mut()
            .find_map(|stage| stage.on_connect_error(error))
    }

    /// Asks every stage, innermost first, what a remote close means.
    pub fn on_remote_closed(&mut self) -> Option<Verdict> {
        self.stages
            .iter_mut()
            .rev()
            .find_map(|stage| stage.on_remote_closed())
    }
}

/// Settings shared by every translator of a bridge instance.
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    pub version: VersionPolicy,
    pub paths: DialectPaths,
    pub limits: Limits,
    pub transactions: Arc<dyn TransactionFactory>,
}

impl TranslatorConfig {
    pub fn new(version: VersionPolicy) -> Self {
        Self {
            version,
            paths: DialectPaths::default(),
            limits: Limits::default(),
            transactions: Arc::new(SerializedFieldFactory),
        }
    }

    pub fn from_bridge_config(config: &BridgeConfig) -> Result<Self, BridgeError> {
        Ok(Self {
            version: VersionPolicy::new(&config.version, config.hide_prerelease)?,
            paths: config.paths.clone(),
            limits: config.limits.clone(),
            transactions: Arc::new(SerializedFieldFactory),
        })
    }

    pub fn with_transaction_factory(mut self, factory: Arc<dyn TransactionFactory>) -> Self {
        self.transactions = factory;
        self
    }
}
