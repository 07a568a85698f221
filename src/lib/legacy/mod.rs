//! ## Legacy Dialect
//!
//! Envelopes of the JSON/event dialect: `{event, data, cid}` calls, `{rid, data | error}`
//! replies and the `#1`/`#2` keep-alive strings.
//!
//! [`decode_call`] is the single entry point for legacy calls: it bounds the size of the message,
//! checks its structure with [`validation`] and only then builds the typed [`Request`].
pub mod transactions;
pub mod validation;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::trace;

use crate::{
    config::Limits,
    error::BridgeError,
    method::Method,
    types::{
        GetBlocksRequest, GetCommonBlocksRequest, Headers, PostBlockRequest,
        PostTransactionsRequest, Request,
    },
};
use transactions::TransactionFactory;
use validation::ValidationError;

/// Keep-alive sent by the accepting side.
pub const PING: &str = "#1";
/// Answer to [`PING`].
pub const PONG: &str = "#2";
pub const HANDSHAKE_EVENT: &str = "#handshake";
pub const DISCONNECT_EVENT: &str = "#disconnect";
/// Advertised in every handshake reply, in milliseconds.
pub const PING_TIMEOUT_MS: u64 = 60_000;
/// First messages shorter than this are screened for a bridged binary server.
pub const SCREENING_THRESHOLD: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LegacyRequest {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyError {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyResponse {
    pub rid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LegacyError>,
}

impl LegacyResponse {
    /// A successful reply, `{rid, data: {data, headers}}`.
    pub fn ok(rid: u32, data: Value, headers: Value) -> Self {
        Self {
            rid,
            data: Some(json!({ "data": data, "headers": headers })),
            error: None,
        }
    }

    pub fn error(rid: u32, message: impl Into<String>) -> Self {
        Self {
            rid,
            data: None,
            error: Some(LegacyError {
                message: message.into(),
            }),
        }
    }

    /// The reply to `#handshake`. Bridges flag themselves with `isNes` so that a client
    /// looking for a legacy server can tell it reached a binary one.
    pub fn handshake(rid: u32, socket: &str, is_bridge: bool) -> Self {
        let mut data = json!({
            "id": socket,
            "pingTimeout": PING_TIMEOUT_MS,
            "isAuthenticated": false,
        });
        if is_bridge {
            data["isNes"] = Value::Bool(true);
        }
        Self {
            rid,
            data: Some(data),
            error: None,
        }
    }

    pub fn is_handshake(&self) -> bool {
        self.data
            .as_ref()
            .is_some_and(|data| data.get("pingTimeout").is_some())
    }

    pub fn to_text(&self) -> String {
        // Serializing a `Value` tree with string keys cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Any text message of the legacy dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyMessage {
    Ping,
    Pong,
    Request(LegacyRequest),
    Response(LegacyResponse),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope {
    Request(LegacyRequest),
    Response(LegacyResponse),
}

impl LegacyMessage {
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        match text {
            PING => Ok(LegacyMessage::Ping),
            PONG => Ok(LegacyMessage::Pong),
            _ => Ok(match serde_json::from_str::<Envelope>(text)? {
                Envelope::Request(request) => LegacyMessage::Request(request),
                Envelope::Response(response) => LegacyMessage::Response(response),
            }),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            LegacyMessage::Ping => PING.to_string(),
            LegacyMessage::Pong => PONG.to_string(),
            LegacyMessage::Request(request) => serde_json::to_string(request).unwrap_or_default(),
            LegacyMessage::Response(response) => response.to_text(),
        }
    }
}

/// A validated legacy call.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyCall {
    Handshake { cid: Option<u32> },
    Disconnect { code: i64 },
    Call {
        cid: u32,
        headers: Headers,
        request: Request,
    },
}

/// A legacy call that could not be turned into a [`LegacyCall`].
///
/// `cid` is set when the call got far enough to be answered.
#[derive(Debug)]
pub struct Rejected {
    pub cid: Option<u32>,
    pub error: BridgeError,
}

impl Rejected {
    fn new(cid: Option<u32>, error: impl Into<BridgeError>) -> Self {
        Self {
            cid,
            error: error.into(),
        }
    }
}

/// Parses, validates and types a legacy call.
pub fn decode_call(
    text: &str,
    limits: &Limits,
    transactions: &dyn TransactionFactory,
) -> Result<LegacyCall, Rejected> {
    validation::check_request_size(text, limits).map_err(|e| Rejected::new(None, e))?;
    let message: Value = serde_json::from_str(text).map_err(|e| Rejected::new(None, e))?;
    let cid = message
        .get("cid")
        .and_then(Value::as_u64)
        .and_then(|cid| u32::try_from(cid).ok());

    validation::validate_request(&message, limits).map_err(|e| Rejected::new(cid, e))?;

    let event = message["event"].as_str().unwrap_or_default();
    let data = &message["data"];
    match event {
        HANDSHAKE_EVENT => Ok(LegacyCall::Handshake { cid }),
        DISCONNECT_EVENT => Ok(LegacyCall::Disconnect {
            code: data["code"].as_i64().unwrap_or_default(),
        }),
        _ => {
            let cid = cid.ok_or_else(|| {
                Rejected::new(None, ValidationError::MissingField("cid"))
            })?;
            let method = Method::from_legacy_event(event)
                .ok_or_else(|| Rejected::new(Some(cid), ValidationError::UnknownEvent(event.into())))?;
            let headers = match data.get("headers") {
                Some(headers) => serde_json::from_value(headers.clone()).map_err(|e| {
                    Rejected::new(Some(cid), ValidationError::InvalidField {
                        field: "headers",
                        reason: e.to_string(),
                    })
                })?,
                None => Headers::default(),
            };
            let request = request_from_legacy(method, data.get("data"), transactions)
                .map_err(|e| Rejected::new(Some(cid), e))?;
            trace!("Decoded legacy call {cid} ({method})");
            Ok(LegacyCall::Call {
                cid,
                headers,
                request,
            })
        }
    }
}

/// Builds the typed request of `method` from the `data.data` body of a legacy call.
pub fn request_from_legacy(
    method: Method,
    body: Option<&Value>,
    transactions: &dyn TransactionFactory,
) -> Result<Request, ValidationError> {
    let body = body.cloned().unwrap_or(Value::Null);
    let invalid = |field: &'static str| {
        move |reason: String| ValidationError::InvalidField { field, reason }
    };

    Ok(match method {
        Method::GetBlocks => Request::GetBlocks(
            serde_json::from_value::<GetBlocksRequest>(body)
                .map_err(|e| invalid("data.data")(e.to_string()))?,
        ),
        Method::GetCommonBlocks => Request::GetCommonBlocks(
            serde_json::from_value::<GetCommonBlocksRequest>(body)
                .map_err(|e| invalid("data.data")(e.to_string()))?,
        ),
        Method::PostBlock => {
            let encoded = body["block"]["data"]
                .as_str()
                .ok_or(ValidationError::MissingField("block.data"))?;
            let block = STANDARD
                .decode(encoded)
                .map_err(|e| invalid("block.data")(e.to_string()))?;
            Request::PostBlock(PostBlockRequest { block })
        }
        Method::PostTransactions => {
            let list = body["transactions"]
                .as_array()
                .ok_or(ValidationError::MissingField("transactions"))?;
            let serialized = list
                .iter()
                .map(|transaction| transactions.serialize(transaction))
                .collect::<Result<Vec<_>, _>>()
                .map_err(invalid("transactions"))?;
            Request::PostTransactions(PostTransactionsRequest {
                transactions: serialized,
            })
        }
        Method::GetPeers => Request::GetPeers,
        Method::GetStatus => Request::GetStatus,
    })
}

/// The `data.data` body of a legacy call carrying `request`.
pub fn request_to_legacy(request: &Request) -> Value {
    match request {
        Request::GetBlocks(r) => serde_json::to_value(r).unwrap_or_default(),
        Request::GetCommonBlocks(r) => serde_json::to_value(r).unwrap_or_default(),
        Request::PostBlock(r) => json!({ "block": { "base64": true, "data": STANDARD.encode(&r.block) } }),
        Request::PostTransactions(r) => json!({
            "transactions": r
                .transactions
                .iter()
                .map(|t| json!({ "serialized": hex::encode(t) }))
                .collect::<Vec<_>>()
        }),
        Request::GetPeers | Request::GetStatus => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::legacy::transactions::SerializedFieldFactory;

    fn decode(text: &str) -> Result<LegacyCall, Rejected> {
        decode_call(text, &Limits::default(), &SerializedFieldFactory)
    }

    #[test]
    fn test_parse_keepalives_and_envelopes() {
        assert_eq!(LegacyMessage::parse("#1").unwrap(), LegacyMessage::Ping);
        assert_eq!(LegacyMessage::parse("#2").unwrap(), LegacyMessage::Pong);
        assert!(matches!(
            LegacyMessage::parse(r#"{"event":"p2p.peer.getStatus","data":{},"cid":5}"#).unwrap(),
            LegacyMessage::Request(LegacyRequest { cid: Some(5), .. })
        ));
        let reply = LegacyMessage::parse(r#"{"rid":5,"error":{"message":"boom"}}"#).unwrap();
        assert_eq!(
            reply,
            LegacyMessage::Response(LegacyResponse::error(5, "boom"))
        );
        assert!(LegacyMessage::parse("not json").is_err());
    }

    #[test]
    fn test_handshake_reply() {
        let reply = LegacyResponse::handshake(1, "abc", true);
        assert!(reply.is_handshake());
        let value: Value = serde_json::from_str(&reply.to_text()).unwrap();
        assert_eq!(
            value,
            json!({"rid": 1, "data": {"id": "abc", "pingTimeout": 60000, "isAuthenticated": false, "isNes": true}})
        );
        let plain = LegacyResponse::handshake(1, "abc", false);
        assert!(plain.data.unwrap().get("isNes").is_none());
    }

    #[test]
    fn test_decode_status_call() {
        let call = decode(r#"{"event":"p2p.peer.getStatus","data":{"headers":{"version":"2.7.24"}},"cid":5}"#).unwrap();
        assert_eq!(
            call,
            LegacyCall::Call {
                cid: 5,
                headers: Headers::with_version("2.7.24"),
                request: Request::GetStatus,
            }
        );
    }

    #[test]
    fn test_decode_control_events() {
        assert_eq!(
            decode(r##"{"event":"#handshake","data":{},"cid":1}"##).unwrap(),
            LegacyCall::Handshake { cid: Some(1) }
        );
        assert_eq!(
            decode(r##"{"event":"#disconnect","data":{"code":4001}}"##).unwrap(),
            LegacyCall::Disconnect { code: 4001 }
        );
    }

    #[test]
    fn test_decode_post_block() {
        let call = decode(
            r#"{"event":"p2p.peer.postBlock","data":{"data":{"block":{"base64":true,"data":"AQID"}}},"cid":2}"#,
        )
        .unwrap();
        let LegacyCall::Call { request, .. } = call else {
            panic!("expected a call");
        };
        assert_eq!(
            request,
            Request::PostBlock(PostBlockRequest {
                block: vec![1, 2, 3]
            })
        );
    }

    #[test]
    fn test_rejections_keep_cid() {
        let rejected = decode(r#"{"event":"p2p.peer.getBlocks","data":{"data":{"lastBlockHeight":0}},"cid":9}"#)
            .unwrap_err();
        assert_eq!(rejected.cid, Some(9));
        assert!(matches!(rejected.error, BridgeError::InvalidRequest(_)));

        let rejected = decode(
            r#"{"event":"p2p.peer.postTransactions","data":{"data":{"transactions":[{"id":"a"}]}},"cid":3}"#,
        )
        .unwrap_err();
        assert_eq!(rejected.cid, Some(3));

        let rejected = decode(r#"{"event":"p2p.peer.getStatus","data":{}}"#).unwrap_err();
        assert_eq!(rejected.cid, None);

        let rejected = decode("{").unwrap_err();
        assert!(matches!(rejected.error, BridgeError::BadSerdeJson(_)));
    }

    #[test]
    fn test_oversized_call() {
        let limits = Limits {
            max_request_bytes: 16,
            ..Limits::default()
        };
        let rejected = decode_call(
            r#"{"event":"p2p.peer.getStatus","data":{},"cid":5}"#,
            &limits,
            &SerializedFieldFactory,
        )
        .unwrap_err();
        assert!(matches!(
            rejected.error,
            BridgeError::StructuralLimitExceeded(_)
        ));
    }

    #[test]
    fn test_request_to_legacy_is_accepted_back() {
        let request = Request::PostTransactions(PostTransactionsRequest {
            transactions: vec![vec![0xaa, 0xbb]],
        });
        let body = request_to_legacy(&request);
        assert_eq!(
            request_from_legacy(Method::PostTransactions, Some(&body), &SerializedFieldFactory)
                .unwrap(),
            request
        );
    }
}
