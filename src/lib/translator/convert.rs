//! Conversions between typed responses and legacy reply bodies, in both directions, and the
//! error payloads of failed binary requests.
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    codecs::{decode_response, encode_response},
    frame::{Frame, STATUS_APPLICATION_ERROR, STATUS_OK},
    legacy::LegacyResponse,
    method::Method,
    types::{PeerStatus, PostBlockResponse, PostTransactionsResponse, Response},
    version::VersionPolicy,
};

use super::Dialect;

/// Message used when an error reply carries nothing better.
pub const UNKNOWN_ERROR: &str = "Unknown";
pub const BLOCK_REJECTED: &str = "Block was not accepted";

/// Turns the binary response to request `rid` into the legacy reply.
///
/// `height` receives the height carried by the decoded response, if any, and returns the height
/// to put in the reply headers.
pub fn frame_to_reply(
    frame: &Frame,
    method: Method,
    policy: &VersionPolicy,
    height: impl FnOnce(Option<u32>) -> Option<u32>,
) -> LegacyResponse {
    let rid = frame.id;
    if !frame.is_success() {
        return LegacyResponse::error(rid, error_message(&frame.payload));
    }
    let response = match decode_response(method, &frame.payload) {
        Ok(response) => response,
        Err(e) => {
            debug!("Answering {rid} with an error: {e}");
            return LegacyResponse::error(rid, e.to_string());
        }
    };
    let headers = legacy_headers(height(response.height()));
    match response {
        Response::PostBlock(ref posted) if !posted.status => {
            LegacyResponse::error(rid, BLOCK_REJECTED)
        }
        _ => LegacyResponse::ok(rid, response_to_legacy(&response, policy), headers),
    }
}

/// Rewrites a status for legacy peers: masked version, pruned plugins.
pub fn status_for_legacy(status: &mut PeerStatus, policy: &VersionPolicy) {
    status.config.version = policy.translate(&status.config.version, Dialect::Legacy);
    status.config.prune_plugins();
}

/// Rewrites a status for binary peers: only the prerelease suffix may go.
pub fn status_for_binary(status: &mut PeerStatus, policy: &VersionPolicy) {
    status.config.version = policy.relax(&status.config.version);
    status.config.prune_plugins();
}

/// The `data.data` body a legacy peer expects for `response`.
pub fn response_to_legacy(response: &Response, policy: &VersionPolicy) -> Value {
    match response {
        Response::Blocks(blocks) => serde_json::to_value(blocks).unwrap_or_default(),
        Response::CommonBlocks(common) => serde_json::to_value(common).unwrap_or_default(),
        Response::Peers(peers) => Value::Array(
            peers
                .iter()
                .map(|peer| json!({ "ip": peer.ip }))
                .collect(),
        ),
        Response::Status(status) => {
            let mut status = status.as_ref().clone();
            status_for_legacy(&mut status, policy);
            serde_json::to_value(status).unwrap_or_default()
        }
        Response::PostBlock(_) => json!({}),
        Response::PostTransactions(posted) => json!(posted.accept),
    }
}

/// Turns the legacy reply to framed request `reply.rid` into the binary response.
///
/// A `postBlock` reply always succeeds at the frame level: its `status` says whether the legacy
/// peer answered without an error.
pub fn reply_to_frame(reply: &LegacyResponse, method: Method, policy: &VersionPolicy) -> Frame {
    let rid = reply.rid;
    if method == Method::PostBlock {
        let height = reply
            .data
            .as_ref()
            .and_then(|data| data.get("headers")?.get("height")?.as_u64())
            .and_then(|height| u32::try_from(height).ok())
            .unwrap_or_default();
        let posted = Response::PostBlock(PostBlockResponse {
            status: reply.error.is_none(),
            height,
        });
        return Frame::response(rid, STATUS_OK, encode_response(&posted));
    }
    if let Some(error) = &reply.error {
        return error_frame(rid, &error.message);
    }
    let body = reply
        .data
        .as_ref()
        .and_then(|data| data.get("data"))
        .cloned()
        .unwrap_or(Value::Null);
    match response_from_legacy(method, body, policy) {
        Ok(response) => Frame::response(rid, STATUS_OK, encode_response(&response)),
        Err(e) => {
            debug!("Answering {rid} with an error: {e}");
            error_frame(rid, &format!("Invalid {method} reply: {e}"))
        }
    }
}

/// Types the `data.data` body of a legacy reply. The inverse of [`response_to_legacy`].
pub fn response_from_legacy(
    method: Method,
    body: Value,
    policy: &VersionPolicy,
) -> Result<Response, serde_json::Error> {
    Ok(match method {
        Method::GetBlocks => Response::Blocks(serde_json::from_value(body)?),
        Method::GetCommonBlocks => Response::CommonBlocks(serde_json::from_value(body)?),
        Method::GetPeers => Response::Peers(serde_json::from_value(body)?),
        Method::GetStatus => {
            let mut status: PeerStatus = serde_json::from_value(body)?;
            status.config.version = policy.translate(&status.config.version, Dialect::Binary);
            status.config.prune_plugins();
            Response::Status(Box::new(status))
        }
        Method::PostBlock => Response::PostBlock(PostBlockResponse {
            status: true,
            height: 0,
        }),
        Method::PostTransactions => Response::PostTransactions(PostTransactionsResponse {
            accept: serde_json::from_value(body)?,
        }),
    })
}

/// Legacy reply headers: `{height}` when a height is known, `{}` otherwise.
pub fn legacy_headers(height: Option<u32>) -> Value {
    match height {
        Some(height) => json!({ "height": height }),
        None => json!({}),
    }
}

/// Whether `text` carries `data.isNes`, the flag a bridge puts in its handshake replies.
pub fn is_bridge_reply(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| value.get("data")?.get("isNes")?.as_bool())
        .unwrap_or(false)
}

/// Payload of a `499` frame.
pub fn error_payload(message: &str) -> Vec<u8> {
    json!({ "error": UNKNOWN_ERROR, "message": message })
        .to_string()
        .into_bytes()
}

/// A `499` frame answering request `id` with `message`.
pub fn error_frame(id: u32, message: &str) -> Frame {
    Frame::response(id, STATUS_APPLICATION_ERROR, error_payload(message))
}

/// Reads the `message` of a `499` payload.
pub fn error_message(payload: &[u8]) -> String {
    serde_json::from_slice::<Value>(payload)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| UNKNOWN_ERROR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{fixtures, PeerInfo, PostBlockResponse, PostTransactionsResponse, API_PLUGIN};

    fn policy(hide: bool) -> VersionPolicy {
        VersionPolicy::new("3.2.1-next.3", hide).unwrap()
    }

    #[test]
    fn test_status_is_masked_for_legacy() {
        let response = Response::Status(Box::new(fixtures::status(12, "3.2.1-next.3")));
        let value = response_to_legacy(&response, &policy(true));
        assert_eq!(value["config"]["version"], json!("2.32.1"));
        assert_eq!(value["state"]["height"], json!(12));
        assert_eq!(
            value["state"]["header"]["totalAmount"],
            json!("123456789012345678901234567890")
        );
        assert_eq!(
            value["config"]["plugins"][API_PLUGIN]["estimateTotalCount"],
            json!(true)
        );

        let value = response_to_legacy(&response, &policy(false));
        assert_eq!(value["config"]["version"], json!("2.32.1-next.3"));
    }

    #[test]
    fn test_binary_status_keeps_dialect() {
        let mut status = fixtures::status(12, "3.2.1-next.3");
        status_for_binary(&mut status, &policy(true));
        assert_eq!(status.config.version, "3.2.1");
    }

    #[test]
    fn test_reply_shapes() {
        let p = policy(false);
        let peers = Response::Peers(vec![PeerInfo {
            ip: "10.0.0.1".into(),
            port: 4002,
        }]);
        assert_eq!(response_to_legacy(&peers, &p), json!([{"ip": "10.0.0.1"}]));

        let posted = Response::PostBlock(PostBlockResponse {
            status: true,
            height: 4,
        });
        assert_eq!(response_to_legacy(&posted, &p), json!({}));

        let accepted = Response::PostTransactions(PostTransactionsResponse {
            accept: vec!["ab".into()],
        });
        assert_eq!(response_to_legacy(&accepted, &p), json!(["ab"]));

        assert_eq!(legacy_headers(Some(7)), json!({"height": 7}));
        assert_eq!(legacy_headers(None), json!({}));
    }

    #[test]
    fn test_frame_to_reply() {
        let p = policy(false);
        let payload = crate::codecs::encode_response(&Response::PostBlock(PostBlockResponse {
            status: true,
            height: 31,
        }));
        let reply = frame_to_reply(&Frame::response(4, 200, payload), Method::PostBlock, &p, |h| h);
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"rid": 4, "data": {"data": {}, "headers": {"height": 31}}})
        );

        let payload = crate::codecs::encode_response(&Response::PostBlock(PostBlockResponse {
            status: false,
            height: 31,
        }));
        let reply = frame_to_reply(&Frame::response(4, 200, payload), Method::PostBlock, &p, |h| h);
        assert_eq!(reply.error.unwrap().message, BLOCK_REJECTED);

        let failed = Frame::response(5, 499, error_payload("Too many requests"));
        let reply = frame_to_reply(&failed, Method::GetPeers, &p, |_| Some(1));
        assert_eq!(reply.rid, 5);
        assert_eq!(reply.error.unwrap().message, "Too many requests");

        let garbage = Frame::response(6, 200, vec![0xff, 0xff, 0xff]);
        let reply = frame_to_reply(&garbage, Method::GetStatus, &p, |h| h);
        assert!(reply.error.unwrap().message.contains("get-status"));

        let peers = crate::codecs::encode_response(&Response::Peers(vec![]));
        let reply = frame_to_reply(&Frame::response(7, 200, peers), Method::GetPeers, &p, |_| Some(88));
        assert_eq!(reply.data.unwrap()["headers"], json!({"height": 88}));
    }

    #[test]
    fn test_legacy_replies_become_frames() {
        let p = policy(false);
        let reply = LegacyResponse::ok(3, json!([{"ip": "1.2.3.4"}]), json!({}));
        let frame = reply_to_frame(&reply, Method::GetPeers, &p);
        assert_eq!(frame.id, 3);
        assert!(frame.is_success());
        assert_eq!(
            decode_response(Method::GetPeers, &frame.payload).unwrap(),
            Response::Peers(vec![PeerInfo {
                ip: "1.2.3.4".into(),
                port: 0,
            }])
        );

        let frame = reply_to_frame(&LegacyResponse::error(4, "Peer is banned"), Method::GetBlocks, &p);
        assert_eq!(frame.status_code, STATUS_APPLICATION_ERROR);
        assert_eq!(error_message(&frame.payload), "Peer is banned");

        let frame = reply_to_frame(&LegacyResponse::ok(5, json!("tall"), json!({})), Method::GetBlocks, &p);
        assert_eq!(frame.status_code, STATUS_APPLICATION_ERROR);
        assert!(error_message(&frame.payload).starts_with("Invalid get-blocks reply"));
    }

    #[test]
    fn test_post_block_status_follows_error() {
        let p = policy(false);
        let accepted = LegacyResponse::ok(6, json!({}), json!({"height": 12}));
        let frame = reply_to_frame(&accepted, Method::PostBlock, &p);
        assert!(frame.is_success());
        assert_eq!(
            decode_response(Method::PostBlock, &frame.payload).unwrap(),
            Response::PostBlock(PostBlockResponse {
                status: true,
                height: 12
            })
        );

        let frame = reply_to_frame(&LegacyResponse::error(7, BLOCK_REJECTED), Method::PostBlock, &p);
        assert!(frame.is_success());
        assert_eq!(
            decode_response(Method::PostBlock, &frame.payload).unwrap(),
            Response::PostBlock(PostBlockResponse {
                status: false,
                height: 0
            })
        );
    }

    #[test]
    fn test_legacy_status_is_unmasked() {
        let status = Response::Status(Box::new(fixtures::status(9, "3.2.1")));
        let body = response_to_legacy(&status, &policy(false));
        assert_eq!(body["config"]["version"], json!("2.32.1"));
        let Response::Status(restored) =
            response_from_legacy(Method::GetStatus, body, &policy(false)).unwrap()
        else {
            panic!("expected a status");
        };
        assert_eq!(restored.config.version, "3.2.1");
        assert_eq!(restored.state.height, 9);

        let mut legacy = fixtures::status(9, "2.7.24-next.1");
        legacy.config.prune_plugins();
        let body = serde_json::to_value(&legacy).unwrap();
        let Response::Status(masked) =
            response_from_legacy(Method::GetStatus, body, &policy(true)).unwrap()
        else {
            panic!("expected a status");
        };
        assert_eq!(masked.config.version, "3.27.24");
    }

    #[test]
    fn test_error_payloads() {
        assert_eq!(error_message(&error_payload("Block rejected")), "Block rejected");
        assert_eq!(error_message(br#"{"error":"Unknown"}"#), "Unknown");
        assert_eq!(error_message(b"\xff"), "Unknown");
    }
}
