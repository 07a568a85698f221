//! ## Client Translator
//!
//! Lets an application talk to a remote peer of either dialect.
//!
//! The remote dialect is unknown until the first meaningful message: the connection is first
//! opened on the binary path. If the transport handshake is rejected, the remote closes before
//! answering, or the first inbound message that is not a keep-alive is not a frame, the
//! translator falls back to the legacy dialect, once.
//!
//! The application may speak either dialect as well:
//!
//! - legacy calls are framed for a binary remote and pass through to a legacy one, apart from
//!   screening for bridged binary servers;
//! - frames pass through to a binary remote and are rewritten into legacy calls for a legacy
//!   one, whose replies are turned back into response frames.
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    convert::{error_frame, frame_to_reply, is_bridge_reply, reply_to_frame},
    Dialect, Interceptor, TranslatorConfig, Verdict, WireMessage, HELLO_VERSION,
};
use crate::{
    codecs::{decode_request, encode_request},
    correlation::CorrelationRegistry,
    error::BridgeError,
    frame::{Frame, FrameType},
    legacy::{
        decode_call, request_to_legacy, validation::check_response_size, LegacyCall,
        LegacyMessage, LegacyRequest, LegacyResponse, HANDSHAKE_EVENT, PING, PONG,
        SCREENING_THRESHOLD,
    },
    method::Method,
    types::Headers,
};

#[derive(Debug)]
pub struct ClientTranslator {
    config: TranslatorConfig,
    dialect: Option<Dialect>,
    fallback_taken: bool,
    /// The legacy handshake, kept until the dialect is known so it can be replayed.
    pending_handshake: Option<String>,
    /// Legacy calls waiting for a binary remote.
    registry: CorrelationRegistry,
    /// Request frames waiting for a legacy remote.
    framed: CorrelationRegistry,
    binary_app: bool,
    received_data: bool,
}

/// The `#handshake` call opening a legacy session.
fn handshake_call(cid: u32) -> String {
    LegacyMessage::Request(LegacyRequest {
        event: HANDSHAKE_EVENT.to_string(),
        data: json!({}),
        cid: Some(cid),
    })
    .to_text()
}

fn refuse(id: u32, message: &str) -> Verdict {
    Verdict::Reply(WireMessage::Binary(error_frame(id, message).to_bytes()))
}

impl ClientTranslator {
    pub fn new(config: TranslatorConfig) -> Self {
        Self {
            config,
            dialect: None,
            fallback_taken: false,
            pending_handshake: None,
            registry: CorrelationRegistry::new(),
            framed: CorrelationRegistry::new(),
            binary_app: false,
            received_data: false,
        }
    }

    /// The dialect of the remote peer, once known.
    pub fn dialect(&self) -> Option<Dialect> {
        self.dialect
    }

    pub fn fallback_taken(&self) -> bool {
        self.fallback_taken
    }

    /// The path to open the next connection on.
    pub fn path(&self) -> &str {
        match self.dialect {
            Some(Dialect::Legacy) => &self.config.paths.legacy,
            _ => &self.config.paths.binary,
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.registry.len() + self.framed.len()
    }

    /// Switches to the legacy dialect if the fallback is still available.
    fn fall_back(&mut self) -> bool {
        if self.dialect.is_some() || self.fallback_taken {
            return false;
        }
        info!("Remote peer does not speak the binary dialect, falling back to legacy");
        self.fallback_taken = true;
        self.dialect = Some(Dialect::Legacy);
        self.registry.cancel_all();
        self.framed.cancel_all();
        true
    }

    fn fallback_verdict(&mut self) -> Verdict {
        Verdict::Fallback {
            dialect: Dialect::Legacy,
            replay: self
                .pending_handshake
                .take()
                .map(WireMessage::Text)
                .into_iter()
                .collect(),
        }
    }

    fn pin_binary(&mut self) {
        if self.dialect.is_none() {
            debug!("Remote peer speaks the binary dialect");
            self.dialect = Some(Dialect::Binary);
            self.pending_handshake = None;
        }
    }

    /// Frames a legacy call for a binary remote.
    fn frame_call(&mut self, text: String) -> Verdict {
        if text == PONG {
            return Verdict::Forward(WireMessage::Binary(Frame::ping().to_bytes()));
        }
        let call = match decode_call(
            &text,
            &self.config.limits,
            self.config.transactions.as_ref(),
        ) {
            Ok(call) => call,
            Err(rejected) => {
                return match rejected.cid {
                    Some(cid) => Verdict::Reply(WireMessage::Text(
                        LegacyResponse::error(cid, rejected.error.to_string()).to_text(),
                    )),
                    None => {
                        warn!("Dropping outbound call: {}", rejected.error);
                        Verdict::Drop
                    }
                }
            }
        };

        match call {
            LegacyCall::Handshake { cid } => {
                if self.dialect.is_none() {
                    self.pending_handshake = Some(text);
                }
                let hello = Frame::hello(cid.unwrap_or(1), HELLO_VERSION);
                Verdict::Forward(WireMessage::Binary(hello.to_bytes()))
            }
            LegacyCall::Disconnect { code } => {
                Verdict::Close(BridgeError::PeerDisconnect(Some(code)))
            }
            LegacyCall::Call {
                cid,
                headers,
                request,
            } => {
                let method = request.method();
                if let Err(e) = self.registry.register(cid, method) {
                    return Verdict::Reply(WireMessage::Text(
                        LegacyResponse::error(cid, e.to_string()).to_text(),
                    ));
                }
                let version = match headers.version {
                    Some(version) => self.config.version.translate(&version, Dialect::Binary),
                    None => self.config.version.own_version(),
                };
                let payload = encode_request(&request, &Headers::with_version(version));
                let frame = Frame::request(cid, method.path(), payload);
                Verdict::Forward(WireMessage::Binary(frame.to_bytes()))
            }
        }
    }

    /// Passes a frame of the application on to a remote whose dialect is binary or unknown.
    fn pass_frame(&mut self, bytes: Vec<u8>) -> Verdict {
        self.binary_app = true;
        if self.dialect.is_none() {
            if let Ok(frame) = Frame::from_bytes(&bytes) {
                if frame.frame_type == FrameType::Hello {
                    self.pending_handshake = Some(handshake_call(frame.id));
                }
            }
        }
        Verdict::Forward(WireMessage::Binary(bytes))
    }

    /// Rewrites a frame of the application into a legacy call.
    fn call_for_legacy(&mut self, bytes: &[u8]) -> Verdict {
        let frame = match Frame::from_bytes(bytes) {
            Ok(frame) => frame,
            Err(e) => return Verdict::Close(e.into()),
        };
        self.binary_app = true;
        let call = match frame.frame_type {
            FrameType::Ping => PONG.to_string(),
            FrameType::Hello => handshake_call(frame.id),
            FrameType::Request => {
                let Some(method) = Method::from_path(&frame.path) else {
                    return refuse(frame.id, &format!("Unknown path {:?}", frame.path));
                };
                let request = match decode_request(method, &frame.payload) {
                    Ok((request, _)) => request,
                    Err(e) => return refuse(frame.id, &e.to_string()),
                };
                if let Err(e) = self.framed.register(frame.id, method) {
                    return refuse(frame.id, &e.to_string());
                }
                LegacyMessage::Request(LegacyRequest {
                    event: method.legacy_event().to_string(),
                    data: json!({ "data": request_to_legacy(&request), "headers": {} }),
                    cid: Some(frame.id),
                })
                .to_text()
            }
            FrameType::Update | FrameType::Undefined => {
                debug!("Ignoring {} frame from the application", frame.frame_type);
                return Verdict::Drop;
            }
        };
        Verdict::Forward(WireMessage::Text(call))
    }

    /// Turns a frame from a binary remote into what the legacy application expects.
    fn unframe(&mut self, frame: Frame) -> Verdict {
        match frame.frame_type {
            FrameType::Ping => Verdict::Forward(WireMessage::Text(PING.to_string())),
            FrameType::Hello => Verdict::Forward(WireMessage::Text(
                LegacyResponse::handshake(frame.id, &frame.socket, false).to_text(),
            )),
            FrameType::Request => {
                let Some(entry) = self.registry.resolve(frame.id) else {
                    debug!("{}", BridgeError::CorrelationMiss(frame.id));
                    return Verdict::Drop;
                };
                let reply = frame_to_reply(&frame, entry.method, &self.config.version, |h| h);
                Verdict::Forward(WireMessage::Text(reply.to_text()))
            }
            FrameType::Update | FrameType::Undefined => {
                debug!("Ignoring {} frame from remote", frame.frame_type);
                Verdict::Drop
            }
        }
    }

    /// Turns a message from a legacy remote into a frame for a binary application. Messages
    /// answering nothing the application framed pass through.
    fn frame_for_app(&mut self, text: String) -> Verdict {
        let message = match LegacyMessage::parse(&text) {
            Ok(message) => message,
            Err(e) => {
                debug!("Passing on unreadable legacy message: {e}");
                return Verdict::Forward(WireMessage::Text(text));
            }
        };
        let frame = match message {
            LegacyMessage::Ping => Frame::ping(),
            LegacyMessage::Response(reply) if reply.is_handshake() => {
                let mut hello = Frame::hello(reply.rid, HELLO_VERSION);
                hello.socket = reply
                    .data
                    .as_ref()
                    .and_then(|data| data.get("id"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                hello
            }
            LegacyMessage::Response(reply) => match self.framed.resolve(reply.rid) {
                Some(entry) => reply_to_frame(&reply, entry.method, &self.config.version),
                None => return Verdict::Forward(WireMessage::Text(text)),
            },
            LegacyMessage::Pong | LegacyMessage::Request(_) => {
                return Verdict::Forward(WireMessage::Text(text))
            }
        };
        Verdict::Forward(WireMessage::Binary(frame.to_bytes()))
    }

    fn screen_legacy(&mut self, message: WireMessage) -> Verdict {
        let text = match message {
            WireMessage::Binary(_) => {
                return Verdict::Close(BridgeError::DialectMismatch(
                    "binary message on a legacy connection".into(),
                ))
            }
            WireMessage::Text(text) => text,
        };
        if !self.received_data && text.len() < SCREENING_THRESHOLD && is_bridge_reply(&text) {
            return Verdict::Close(BridgeError::DialectMismatch(
                "remote is a bridged binary server".into(),
            ));
        }
        self.received_data = true;
        if let Err(e) = check_response_size(&text, &self.config.limits) {
            warn!("Dropping legacy response: {e}");
            return Verdict::Drop;
        }
        if self.binary_app {
            return self.frame_for_app(text);
        }
        Verdict::Forward(WireMessage::Text(text))
    }
}

impl Interceptor for ClientTranslator {
    fn name(&self) -> &'static str {
        "client-translator"
    }

    fn outbound(&mut self, message: WireMessage) -> Verdict {
        match (self.dialect, message) {
            (Some(Dialect::Legacy), WireMessage::Text(text)) => {
                Verdict::Forward(WireMessage::Text(text))
            }
            (Some(Dialect::Legacy), WireMessage::Binary(bytes)) => self.call_for_legacy(&bytes),
            (_, WireMessage::Text(text)) => self.frame_call(text),
            (_, WireMessage::Binary(bytes)) => self.pass_frame(bytes),
        }
    }

    fn inbound(&mut self, message: WireMessage) -> Verdict {
        match (self.dialect, message) {
            (Some(Dialect::Legacy), message) => self.screen_legacy(message),
            (dialect, WireMessage::Binary(bytes)) => match Frame::from_bytes(&bytes) {
                Ok(_) if self.binary_app => {
                    self.pin_binary();
                    Verdict::Forward(WireMessage::Binary(bytes))
                }
                Ok(frame) => {
                    self.pin_binary();
                    self.unframe(frame)
                }
                Err(e) if dialect.is_none() && self.fall_back() => {
                    debug!("First message is not a frame: {e}");
                    self.fallback_verdict()
                }
                Err(e) => Verdict::Close(e.into()),
            },
            (None, WireMessage::Text(text)) if text == PING => {
                Verdict::Forward(WireMessage::Text(text))
            }
            (None, WireMessage::Text(_)) if self.fall_back() => self.fallback_verdict(),
            (_, WireMessage::Text(_)) => Verdict::Close(BridgeError::DialectMismatch(
                "text message on a binary connection".into(),
            )),
        }
    }

    fn on_close(&mut self) {
        self.registry.cancel_all();
        self.framed.cancel_all();
    }

    fn on_connect_error(&mut self, error: &BridgeError) -> Option<Dialect> {
        debug!("Connection attempt failed: {error}");
        self.fall_back().then_some(Dialect::Legacy)
    }

    fn on_remote_closed(&mut self) -> Option<Verdict> {
        if !self.fall_back() {
            return None;
        }
        debug!("Remote closed before its dialect was known");
        Some(self.fallback_verdict())
    }
}
