//! ## Server Translator
//!
//! Sits between an accepted peer and the binary host behind the bridge. The connection path
//! decides the peer's dialect for the lifetime of the connection:
//!
//! - On the binary path frames pass through. Only versions are touched: prerelease suffixes are
//!   stripped from request headers and from `getStatus` responses when hiding is enabled.
//! - Every other path is legacy. Calls are validated, typed and framed for the host, and host
//!   frames are turned back into legacy replies. The first message is screened for bridged
//!   binary peers and a binary message closes the connection.
//!
//! Here `inbound` is peer to host and `outbound` is host to peer.
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};
use tracing::{debug, warn};

use super::{
    convert::{error_frame, frame_to_reply, is_bridge_reply, status_for_binary},
    Dialect, Interceptor, TranslatorConfig, Verdict, WireMessage, HELLO_VERSION,
};
use crate::{
    codecs::{decode_request, decode_response, encode_request, encode_response},
    correlation::CorrelationRegistry,
    error::BridgeError,
    frame::{Frame, FrameType},
    legacy::{
        decode_call, validation::check_response_size, LegacyCall, LegacyResponse, PING, PONG,
        SCREENING_THRESHOLD,
    },
    method::Method,
    types::{Headers, Response},
};

/// Last chain height reported by the host, shared by every connection of the bridge.
#[derive(Debug, Clone, Default)]
pub struct HostHeight(Arc<AtomicU32>);

impl HostHeight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn observe(&self, height: u32) {
        self.0.store(height, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct ServerTranslator {
    config: TranslatorConfig,
    dialect: Dialect,
    registry: CorrelationRegistry,
    host_height: HostHeight,
    received_data: bool,
}

impl ServerTranslator {
    /// Builds the translator of a connection accepted on `path`.
    pub fn accept(path: &str, config: TranslatorConfig, host_height: HostHeight) -> Self {
        let path = path.split_once('?').map_or(path, |(path, _)| path);
        let dialect = if path == config.paths.binary {
            Dialect::Binary
        } else {
            Dialect::Legacy
        };
        debug!("Accepted {dialect} connection on {path}");
        Self {
            config,
            dialect,
            registry: CorrelationRegistry::new(),
            host_height,
            received_data: false,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn pending_requests(&self) -> usize {
        self.registry.len()
    }

    fn answer(cid: Option<u32>, error: BridgeError) -> Verdict {
        match cid {
            Some(cid) => Verdict::Reply(WireMessage::Text(
                LegacyResponse::error(cid, error.to_string()).to_text(),
            )),
            None => {
                warn!("Dropping legacy call without a usable cid: {error}");
                Verdict::Drop
            }
        }
    }

    /// Legacy peer to host.
    fn legacy_inbound(&mut self, message: WireMessage) -> Verdict {
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
                "peer is a bridged binary node".into(),
            ));
        }
        self.received_data = true;

        match text.as_str() {
            PONG => return Verdict::Forward(WireMessage::Binary(Frame::ping().to_bytes())),
            PING => return Verdict::Drop,
            _ => {}
        }

        let call = match decode_call(
            &text,
            &self.config.limits,
            self.config.transactions.as_ref(),
        ) {
            Ok(call) => call,
            Err(rejected) => return Self::answer(rejected.cid, rejected.error),
        };

        match call {
            LegacyCall::Handshake { cid } => {
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
                    return Self::answer(Some(cid), e);
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

    /// Host to legacy peer.
    fn legacy_outbound(&mut self, message: WireMessage) -> Verdict {
        let frame = match message {
            WireMessage::Binary(bytes) => match Frame::from_bytes(&bytes) {
                Ok(frame) => frame,
                Err(e) => return Verdict::Close(e.into()),
            },
            WireMessage::Text(_) => {
                debug!("Ignoring text message from host");
                return Verdict::Drop;
            }
        };

        match frame.frame_type {
            FrameType::Ping => Verdict::Forward(WireMessage::Text(PING.to_string())),
            FrameType::Hello => Verdict::Forward(WireMessage::Text(
                LegacyResponse::handshake(frame.id, &frame.socket, true).to_text(),
            )),
            FrameType::Request => {
                let Some(entry) = self.registry.resolve(frame.id) else {
                    debug!("{}", BridgeError::CorrelationMiss(frame.id));
                    return Verdict::Drop;
                };
                let host_height = &self.host_height;
                let reply = frame_to_reply(&frame, entry.method, &self.config.version, |h| {
                    if let Some(h) = h {
                        host_height.observe(h);
                    }
                    Some(host_height.get())
                });
                let text = reply.to_text();
                if let Err(e) = check_response_size(&text, &self.config.limits) {
                    let error = BridgeError::from(e);
                    warn!("Reply {} withheld from peer: {error}", frame.id);
                    return Verdict::Forward(WireMessage::Text(
                        LegacyResponse::error(frame.id, error.to_string()).to_text(),
                    ));
                }
                Verdict::Forward(WireMessage::Text(text))
            }
            FrameType::Update | FrameType::Undefined => {
                debug!("Ignoring {} frame from host", frame.frame_type);
                Verdict::Drop
            }
        }
    }

    /// Binary peer to host.
    fn binary_inbound(&mut self, message: WireMessage) -> Verdict {
        let bytes = match message {
            WireMessage::Binary(bytes) => bytes,
            WireMessage::Text(_) => {
                return Verdict::Close(BridgeError::DialectMismatch(
                    "text message on a binary connection".into(),
                ))
            }
        };
        let mut frame = match Frame::from_bytes(&bytes) {
            Ok(frame) => frame,
            Err(e) => return Verdict::Close(e.into()),
        };
        let method = match (frame.frame_type, Method::from_path(&frame.path)) {
            (FrameType::Request, Some(method)) => method,
            _ => return Verdict::Forward(WireMessage::Binary(bytes)),
        };
        if method == Method::GetStatus {
            if let Err(e) = self.registry.register(frame.id, method) {
                warn!("Refusing status request: {e}");
                return Verdict::Reply(WireMessage::Binary(
                    error_frame(frame.id, &e.to_string()).to_bytes(),
                ));
            }
        }
        if !self.config.version.hides_prerelease() {
            return Verdict::Forward(WireMessage::Binary(bytes));
        }

        match decode_request(method, &frame.payload) {
            Ok((request, headers)) => {
                let Some(version) = headers.version.as_deref() else {
                    return Verdict::Forward(WireMessage::Binary(bytes));
                };
                let relaxed = self.config.version.relax(version);
                if relaxed == version {
                    return Verdict::Forward(WireMessage::Binary(bytes));
                }
                let headers = Headers {
                    version: Some(relaxed),
                    ..headers
                };
                frame.payload = encode_request(&request, &headers);
                Verdict::Forward(WireMessage::Binary(frame.to_bytes()))
            }
            Err(e) => {
                self.registry.cancel(frame.id);
                Verdict::Reply(WireMessage::Binary(
                    error_frame(frame.id, &e.to_string()).to_bytes(),
                ))
            }
        }
    }

    /// Host to binary peer.
    fn binary_outbound(&mut self, message: WireMessage) -> Verdict {
        let bytes = match message {
            WireMessage::Binary(bytes) => bytes,
            text => return Verdict::Forward(text),
        };
        let mut frame = match Frame::from_bytes(&bytes) {
            Ok(frame) => frame,
            Err(e) => return Verdict::Close(e.into()),
        };
        if frame.frame_type != FrameType::Request || frame.id == 0 {
            return Verdict::Forward(WireMessage::Binary(bytes));
        }
        let tracked = self
            .registry
            .resolve(frame.id)
            .is_some_and(|entry| entry.method == Method::GetStatus);
        if !tracked || !frame.is_success() {
            return Verdict::Forward(WireMessage::Binary(bytes));
        }

        match decode_response(Method::GetStatus, &frame.payload) {
            Ok(Response::Status(mut status)) => {
                self.host_height.observe(status.state.height);
                if !self.config.version.hides_prerelease() {
                    return Verdict::Forward(WireMessage::Binary(bytes));
                }
                status_for_binary(&mut status, &self.config.version);
                frame.payload = encode_response(&Response::Status(status));
                Verdict::Forward(WireMessage::Binary(frame.to_bytes()))
            }
            Ok(_) | Err(_) => Verdict::Forward(WireMessage::Binary(bytes)),
        }
    }
}

impl Interceptor for ServerTranslator {
    fn name(&self) -> &'static str {
        "server-translator"
    }

    fn outbound(&mut self, message: WireMessage) -> Verdict {
        match self.dialect {
            Dialect::Legacy => self.legacy_outbound(message),
            Dialect::Binary => self.binary_outbound(message),
        }
    }

    fn inbound(&mut self, message: WireMessage) -> Verdict {
        match self.dialect {
            Dialect::Legacy => self.legacy_inbound(message),
            Dialect::Binary => self.binary_inbound(message),
        }
    }

    fn on_close(&mut self) {
        self.registry.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codecs::MAX_BLOCKS_PER_BATCH,
        translator::convert::error_message,
        types::{fixtures, Block, PeerInfo, Request},
        version::VersionPolicy,
    };
    use serde_json::{json, Value};

    fn config(hide: bool) -> TranslatorConfig {
        TranslatorConfig::new(VersionPolicy::new("3.2.1-next.3", hide).unwrap())
    }

    fn legacy(hide: bool) -> ServerTranslator {
        ServerTranslator::accept("/socketcluster/", config(hide), HostHeight::new())
    }

    fn frame_of(verdict: Verdict) -> Frame {
        match verdict {
            Verdict::Forward(WireMessage::Binary(bytes))
            | Verdict::Reply(WireMessage::Binary(bytes)) => Frame::from_bytes(&bytes).unwrap(),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    fn json_of(verdict: Verdict) -> Value {
        match verdict {
            Verdict::Forward(WireMessage::Text(text)) | Verdict::Reply(WireMessage::Text(text)) => {
                serde_json::from_str(&text).unwrap()
            }
            other => panic!("expected a text message, got {other:?}"),
        }
    }

    fn send(server: &mut ServerTranslator, text: &str) -> Verdict {
        server.inbound(WireMessage::Text(text.to_string()))
    }

    #[test]
    fn test_dialect_by_path() {
        let height = HostHeight::new();
        assert_eq!(
            ServerTranslator::accept("/", config(false), height.clone()).dialect(),
            Dialect::Binary
        );
        assert_eq!(
            ServerTranslator::accept("/?x=1", config(false), height.clone()).dialect(),
            Dialect::Binary
        );
        assert_eq!(
            ServerTranslator::accept("/socketcluster/", config(false), height.clone()).dialect(),
            Dialect::Legacy
        );
        assert_eq!(
            ServerTranslator::accept("/other", config(false), height).dialect(),
            Dialect::Legacy
        );
    }

    #[tokio::test]
    async fn test_legacy_handshake_and_keepalive() {
        let mut server = legacy(false);
        let hello = frame_of(send(&mut server, r##"{"event":"#handshake","data":{},"cid":1}"##));
        assert_eq!(hello.frame_type, FrameType::Hello);
        assert_eq!(hello.version, HELLO_VERSION);
        assert_eq!(hello.id, 1);

        let mut answer = Frame::hello(1, 0);
        answer.socket = "KdFe3".into();
        assert_eq!(
            json_of(server.outbound(WireMessage::Binary(answer.to_bytes()))),
            json!({"rid": 1, "data": {"id": "KdFe3", "pingTimeout": 60000, "isAuthenticated": false, "isNes": true}})
        );

        assert!(matches!(
            server.outbound(WireMessage::Binary(Frame::ping().to_bytes())),
            Verdict::Forward(WireMessage::Text(t)) if t == "#1"
        ));
        assert_eq!(frame_of(send(&mut server, "#2")).frame_type, FrameType::Ping);
    }

    #[tokio::test]
    async fn test_legacy_status_call() {
        let height = HostHeight::new();
        let mut server = ServerTranslator::accept("/socketcluster/", config(true), height.clone());
        let frame = frame_of(send(
            &mut server,
            r#"{"event":"p2p.peer.getStatus","data":{"headers":{"version":"2.7.24","port":4002}},"cid":5}"#,
        ));
        assert_eq!(frame.path, "p2p.peer.getStatus");
        assert_eq!(frame.id, 5);
        let (request, headers) = decode_request(Method::GetStatus, &frame.payload).unwrap();
        assert_eq!(request, Request::GetStatus);
        assert_eq!(headers.version.as_deref(), Some("3.27.24"));

        let status = fixtures::status(6_000_000, "3.2.1-next.3");
        let reply = Frame::response(5, 200, encode_response(&Response::Status(Box::new(status))));
        let value = json_of(server.outbound(WireMessage::Binary(reply.to_bytes())));
        assert_eq!(value["rid"], json!(5));
        assert_eq!(value["data"]["headers"], json!({"height": 6_000_000}));
        assert_eq!(value["data"]["data"]["config"]["version"], json!("2.32.1"));
        assert_eq!(height.get(), 6_000_000);

        // Later replies carry the last observed height.
        frame_of(send(&mut server, r#"{"event":"p2p.peer.getPeers","data":{},"cid":6}"#));
        let peers = Response::Peers(vec![PeerInfo {
            ip: "192.168.1.7".into(),
            port: 4002,
        }]);
        let reply = Frame::response(6, 200, encode_response(&peers));
        let value = json_of(server.outbound(WireMessage::Binary(reply.to_bytes())));
        assert_eq!(
            value,
            json!({"rid": 6, "data": {"data": [{"ip": "192.168.1.7"}], "headers": {"height": 6_000_000}}})
        );
    }

    #[tokio::test]
    async fn test_legacy_version_falls_back_to_own() {
        let mut server = legacy(true);
        let frame = frame_of(send(
            &mut server,
            r#"{"event":"p2p.peer.getPeers","data":{},"cid":2}"#,
        ));
        let (_, headers) = decode_request(Method::GetPeers, &frame.payload).unwrap();
        assert_eq!(headers.version.as_deref(), Some("3.2.1"));
    }

    #[tokio::test]
    async fn test_legacy_blocks_reply() {
        let mut server = legacy(false);
        frame_of(send(
            &mut server,
            r#"{"event":"p2p.peer.getBlocks","data":{"data":{"lastBlockHeight":10,"blockLimit":2}},"cid":3}"#,
        ));
        let blocks: Vec<Block> = (11..13)
            .map(|h| Block {
                header: fixtures::block_header(h),
                transactions: vec![],
            })
            .collect();
        let reply = Frame::response(3, 200, encode_response(&Response::Blocks(blocks)));
        let value = json_of(server.outbound(WireMessage::Binary(reply.to_bytes())));
        let data = value["data"]["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert!(data[0].get("transactions").is_none());
        assert_eq!(data[1]["height"], json!(12));
        assert!(MAX_BLOCKS_PER_BATCH >= data.len());
    }

    #[tokio::test]
    async fn test_legacy_rejections() {
        let mut server = legacy(false);
        let transactions = vec![json!({"serialized": "00"}); 41];
        let call = json!({"event": "p2p.peer.postTransactions", "data": {"data": {"transactions": transactions}}, "cid": 4});
        let value = json_of(send(&mut server, &call.to_string()));
        assert_eq!(value["rid"], json!(4));
        assert!(value["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Structural limit exceeded"));
        assert_eq!(server.pending_requests(), 0);

        assert!(matches!(
            send(&mut server, r#"{"event":"p2p.peer.getStatus","data":{}}"#),
            Verdict::Drop
        ));
        assert!(matches!(
            send(&mut server, r##"{"event":"#disconnect","data":{"code":4100}}"##),
            Verdict::Close(BridgeError::PeerDisconnect(Some(4100)))
        ));
    }

    #[tokio::test]
    async fn test_legacy_screening() {
        let mut server = legacy(false);
        assert!(matches!(
            server.inbound(WireMessage::Binary(Frame::ping().to_bytes())),
            Verdict::Close(BridgeError::DialectMismatch(_))
        ));

        let mut server = legacy(false);
        assert!(matches!(
            send(&mut server, r#"{"rid":1,"data":{"isNes":true}}"#),
            Verdict::Close(BridgeError::DialectMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_host_error_and_unknown_replies() {
        let mut server = legacy(false);
        frame_of(send(&mut server, r#"{"event":"p2p.peer.getPeers","data":{},"cid":7}"#));
        let value = json_of(server.outbound(WireMessage::Binary(
            error_frame(7, "Peer is banned").to_bytes(),
        )));
        assert_eq!(value, json!({"rid": 7, "error": {"message": "Peer is banned"}}));

        let stray = Frame::response(7, 200, vec![]);
        assert!(matches!(
            server.outbound(WireMessage::Binary(stray.to_bytes())),
            Verdict::Drop
        ));
        assert!(matches!(
            server.outbound(WireMessage::Binary(vec![1, 2])),
            Verdict::Close(BridgeError::Frame(_))
        ));
    }

    #[tokio::test]
    async fn test_binary_passthrough_hides_prerelease() {
        let height = HostHeight::new();
        let mut server = ServerTranslator::accept("/", config(true), height.clone());

        let payload = encode_request(&Request::GetStatus, &Headers::with_version("3.1.0-next.2"));
        let request = Frame::request(9, Method::GetStatus.path(), payload);
        let forwarded = frame_of(server.inbound(WireMessage::Binary(request.to_bytes())));
        let (_, headers) = decode_request(Method::GetStatus, &forwarded.payload).unwrap();
        assert_eq!(headers.version.as_deref(), Some("3.1.0"));
        assert_eq!(server.pending_requests(), 1);

        let status = fixtures::status(77, "3.2.1-next.3");
        let reply = Frame::response(9, 200, encode_response(&Response::Status(Box::new(status))));
        let forwarded = frame_of(server.outbound(WireMessage::Binary(reply.to_bytes())));
        let Response::Status(status) =
            decode_response(Method::GetStatus, &forwarded.payload).unwrap()
        else {
            panic!("expected a status");
        };
        assert_eq!(status.config.version, "3.2.1");
        assert_eq!(height.get(), 77);
    }

    #[tokio::test]
    async fn test_binary_passthrough_untouched_without_hiding() {
        let mut server = ServerTranslator::accept("/", config(false), HostHeight::new());
        let payload = encode_request(&Request::GetPeers, &Headers::with_version("3.1.0-next.2"));
        let bytes = Frame::request(3, Method::GetPeers.path(), payload).to_bytes();
        assert!(matches!(
            server.inbound(WireMessage::Binary(bytes.clone())),
            Verdict::Forward(WireMessage::Binary(b)) if b == bytes
        ));
        assert!(matches!(
            server.inbound(WireMessage::Text("#2".into())),
            Verdict::Close(BridgeError::DialectMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_binary_bad_payload_is_answered() {
        let mut server = ServerTranslator::accept("/", config(true), HostHeight::new());
        let request = Frame::request(4, Method::GetBlocks.path(), vec![0xff, 0xff]);
        let reply = frame_of(server.inbound(WireMessage::Binary(request.to_bytes())));
        assert_eq!(reply.id, 4);
        assert_eq!(reply.status_code, 499);
    }

    #[tokio::test]
    async fn test_binary_status_with_live_id_is_refused() {
        let height = HostHeight::new();
        let mut server = ServerTranslator::accept("/", config(false), height.clone());
        let payload = encode_request(&Request::GetStatus, &Headers::with_version("3.1.0"));
        let request = Frame::request(12, Method::GetStatus.path(), payload).to_bytes();
        frame_of(server.inbound(WireMessage::Binary(request.clone())));

        let refused = server.inbound(WireMessage::Binary(request));
        assert!(matches!(refused, Verdict::Reply(_)));
        let reply = frame_of(refused);
        assert_eq!(reply.id, 12);
        assert_eq!(reply.status_code, 499);
        assert!(error_message(&reply.payload).contains("already pending"));
        assert_eq!(server.pending_requests(), 1);

        // The first request is still tracked and its reply observed.
        let status = fixtures::status(31, "3.2.1");
        let reply = Frame::response(12, 200, encode_response(&Response::Status(Box::new(status))));
        frame_of(server.outbound(WireMessage::Binary(reply.to_bytes())));
        assert_eq!(height.get(), 31);
    }
}
