//! ## Payload Codec Suite
//!
//! One [`MethodCodec`] per peer-to-peer call converts between frame payloads and the typed
//! records of [`crate::types`]. Requests and responses are handled independently so either side
//! of a connection can use only the half it needs.
//!
//! Lists of blocks and transactions are carried as 4-byte big-endian length-prefixed sub-frames.
//! Decoding stops silently once [`MAX_BLOCKS_PER_BATCH`] blocks or
//! [`MAX_TRANSACTIONS_PER_BLOCK`] transactions have been read.
use num_bigint::BigUint;
use prost::Message;
use std::fmt;

use crate::{
    method::Method,
    types::{Headers, Request, Response},
};

pub mod blocks;
pub mod peer;
mod proto;
pub mod transactions;

pub use blocks::{GetBlocksCodec, PostBlockCodec};
pub use peer::{GetCommonBlocksCodec, GetPeersCodec, GetStatusCodec};
pub use transactions::PostTransactionsCodec;

pub const MAX_BLOCKS_PER_BATCH: usize = 400;
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 500;
const LENGTH_PREFIX_SIZE: usize = 4;

/// What went wrong while decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecErrorKind {
    Protobuf(prost::DecodeError),
    /// A sub-frame declares more bytes than remain in the buffer.
    TruncatedItem {
        offset: usize,
        declared: usize,
        available: usize,
    },
    MissingField(&'static str),
    InvalidAmount { field: &'static str, value: String },
    InvalidPort { field: &'static str, value: u32 },
}

impl fmt::Display for CodecErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use CodecErrorKind::*;
        match self {
            Protobuf(e) => write!(f, "protobuf decode error: {e}"),
            TruncatedItem {
                offset,
                declared,
                available,
            } => write!(
                f,
                "sub-frame at offset {offset} declares {declared} bytes, {available} available"
            ),
            MissingField(field) => write!(f, "missing field `{field}`"),
            InvalidAmount { field, value } => write!(f, "invalid amount in `{field}`: {value:?}"),
            InvalidPort { field, value } => write!(f, "port out of range in `{field}`: {value}"),
        }
    }
}

impl From<prost::DecodeError> for CodecErrorKind {
    fn from(e: prost::DecodeError) -> Self {
        CodecErrorKind::Protobuf(e)
    }
}

/// A payload that could not be decoded, tagged with the call it belonged to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    pub method: Method,
    pub kind: CodecErrorKind,
}

impl CodecError {
    pub fn new(method: Method, kind: impl Into<CodecErrorKind>) -> Self {
        Self {
            method,
            kind: kind.into(),
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to decode {} payload: {}", self.method, self.kind)
    }
}

impl std::error::Error for CodecError {}

/// Request and response codecs of a single call.
pub trait MethodCodec {
    const METHOD: Method;
    type Request;
    type Response;

    fn serialize_request(request: &Self::Request, headers: &Headers) -> Vec<u8>;
    fn deserialize_request(payload: &[u8]) -> Result<(Self::Request, Headers), CodecError>;
    fn serialize_response(response: &Self::Response) -> Vec<u8>;
    fn deserialize_response(payload: &[u8]) -> Result<Self::Response, CodecError>;
}

pub fn encode_request(request: &Request, headers: &Headers) -> Vec<u8> {
    match request {
        Request::GetBlocks(r) => GetBlocksCodec::serialize_request(r, headers),
        Request::PostBlock(r) => PostBlockCodec::serialize_request(r, headers),
        Request::GetCommonBlocks(r) => GetCommonBlocksCodec::serialize_request(r, headers),
        Request::GetPeers => GetPeersCodec::serialize_request(&(), headers),
        Request::GetStatus => GetStatusCodec::serialize_request(&(), headers),
        Request::PostTransactions(r) => PostTransactionsCodec::serialize_request(r, headers),
    }
}

pub fn decode_request(method: Method, payload: &[u8]) -> Result<(Request, Headers), CodecError> {
    Ok(match method {
        Method::GetBlocks => {
            let (r, h) = GetBlocksCodec::deserialize_request(payload)?;
            (Request::GetBlocks(r), h)
        }
        Method::PostBlock => {
            let (r, h) = PostBlockCodec::deserialize_request(payload)?;
            (Request::PostBlock(r), h)
        }
        Method::GetCommonBlocks => {
            let (r, h) = GetCommonBlocksCodec::deserialize_request(payload)?;
            (Request::GetCommonBlocks(r), h)
        }
        Method::GetPeers => (Request::GetPeers, GetPeersCodec::deserialize_request(payload)?.1),
        Method::GetStatus => (Request::GetStatus, GetStatusCodec::deserialize_request(payload)?.1),
        Method::PostTransactions => {
            let (r, h) = PostTransactionsCodec::deserialize_request(payload)?;
            (Request::PostTransactions(r), h)
        }
    })
}

pub fn encode_response(response: &Response) -> Vec<u8> {
    match response {
        Response::Blocks(r) => GetBlocksCodec::serialize_response(r),
        Response::PostBlock(r) => PostBlockCodec::serialize_response(r),
        Response::CommonBlocks(r) => GetCommonBlocksCodec::serialize_response(r),
        Response::Peers(r) => GetPeersCodec::serialize_response(r),
        Response::Status(r) => GetStatusCodec::serialize_response(r),
        Response::PostTransactions(r) => PostTransactionsCodec::serialize_response(r),
    }
}

pub fn decode_response(method: Method, payload: &[u8]) -> Result<Response, CodecError> {
    Ok(match method {
        Method::GetBlocks => Response::Blocks(GetBlocksCodec::deserialize_response(payload)?),
        Method::PostBlock => Response::PostBlock(PostBlockCodec::deserialize_response(payload)?),
        Method::GetCommonBlocks => {
            Response::CommonBlocks(GetCommonBlocksCodec::deserialize_response(payload)?)
        }
        Method::GetPeers => Response::Peers(GetPeersCodec::deserialize_response(payload)?),
        Method::GetStatus => {
            Response::Status(Box::new(GetStatusCodec::deserialize_response(payload)?))
        }
        Method::PostTransactions => {
            Response::PostTransactions(PostTransactionsCodec::deserialize_response(payload)?)
        }
    })
}

/// Concatenates `items`, each behind a 4-byte big-endian length.
pub fn encode_length_prefixed<I, T>(items: I) -> Vec<u8>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for item in items {
        let item = item.as_ref();
        out.extend_from_slice(&(item.len() as u32).to_be_bytes());
        out.extend_from_slice(item);
    }
    out
}

/// Splits a length-prefixed buffer, reading at most `cap` items.
pub fn decode_length_prefixed(buf: &[u8], cap: usize) -> Result<Vec<&[u8]>, CodecErrorKind> {
    let mut items = Vec::new();
    let mut offset = 0;
    while offset < buf.len() && items.len() < cap {
        let available = buf.len() - offset;
        if available < LENGTH_PREFIX_SIZE {
            return Err(CodecErrorKind::TruncatedItem {
                offset,
                declared: LENGTH_PREFIX_SIZE,
                available,
            });
        }
        let declared = u32::from_be_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]) as usize;
        offset += LENGTH_PREFIX_SIZE;
        let available = buf.len() - offset;
        if declared > available {
            return Err(CodecErrorKind::TruncatedItem {
                offset,
                declared,
                available,
            });
        }
        items.push(&buf[offset..offset + declared]);
        offset += declared;
    }
    Ok(items)
}

fn decode_proto<P: Message + Default>(method: Method, payload: &[u8]) -> Result<P, CodecError> {
    P::decode(payload).map_err(|e| CodecError::new(method, e))
}

fn headers_to_proto(headers: &Headers) -> Option<proto::Headers> {
    headers.version.as_ref().map(|version| proto::Headers {
        version: version.clone(),
    })
}

fn headers_from_proto(headers: Option<proto::Headers>) -> Headers {
    match headers {
        Some(h) if !h.version.is_empty() => Headers::with_version(h.version),
        _ => Headers::default(),
    }
}

fn parse_amount(method: Method, field: &'static str, value: &str) -> Result<BigUint, CodecError> {
    value.parse::<BigUint>().map_err(|_| {
        CodecError::new(
            method,
            CodecErrorKind::InvalidAmount {
                field,
                value: value.to_string(),
            },
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{fixtures, PostBlockResponse};

    #[test]
    fn test_length_prefixed_roundtrip() {
        let items: Vec<Vec<u8>> = vec![vec![1, 2, 3], vec![], vec![0xff; 300]];
        let encoded = encode_length_prefixed(&items);
        assert_eq!(&encoded[..4], &[0, 0, 0, 3]);
        let decoded = decode_length_prefixed(&encoded, usize::MAX).unwrap();
        assert_eq!(decoded, items.iter().map(Vec::as_slice).collect::<Vec<_>>());
    }

    #[test]
    fn test_length_prefixed_cap() {
        let items = vec![vec![7u8; 2]; 10];
        let encoded = encode_length_prefixed(&items);
        assert_eq!(decode_length_prefixed(&encoded, 4).unwrap().len(), 4);
    }

    #[test]
    fn test_length_prefixed_truncated() {
        let mut encoded = encode_length_prefixed([vec![1u8; 8]]);
        encoded.truncate(10);
        assert_eq!(
            decode_length_prefixed(&encoded, usize::MAX),
            Err(CodecErrorKind::TruncatedItem {
                offset: 4,
                declared: 8,
                available: 6
            })
        );
        assert!(matches!(
            decode_length_prefixed(&[0, 0], usize::MAX),
            Err(CodecErrorKind::TruncatedItem { offset: 0, .. })
        ));
    }

    #[test]
    fn test_dispatch_roundtrip() {
        let headers = Headers::with_version("3.0.0");
        for method in Method::ALL {
            let request = match method {
                Method::GetBlocks => Request::GetBlocks(crate::types::GetBlocksRequest {
                    last_block_height: 10,
                    block_limit: Some(400),
                    headers_only: true,
                    serialized: false,
                }),
                Method::PostBlock => Request::PostBlock(crate::types::PostBlockRequest {
                    block: vec![1, 2, 3],
                }),
                Method::GetCommonBlocks => {
                    Request::GetCommonBlocks(crate::types::GetCommonBlocksRequest {
                        ids: vec!["123".to_string()],
                    })
                }
                Method::GetPeers => Request::GetPeers,
                Method::GetStatus => Request::GetStatus,
                Method::PostTransactions => {
                    Request::PostTransactions(crate::types::PostTransactionsRequest {
                        transactions: vec![vec![9; 4]],
                    })
                }
            };
            let payload = encode_request(&request, &headers);
            let (decoded, decoded_headers) = decode_request(method, &payload).unwrap();
            assert_eq!(decoded, request);
            assert_eq!(decoded_headers, headers);
        }
    }

    #[test]
    fn test_response_dispatch_roundtrip() {
        let status = Response::Status(Box::new(fixtures::status(12, "3.0.0")));
        let decoded = decode_response(Method::GetStatus, &encode_response(&status)).unwrap();
        assert_eq!(decoded, status);

        let posted = Response::PostBlock(PostBlockResponse {
            status: false,
            height: 3,
        });
        let decoded = decode_response(Method::PostBlock, &encode_response(&posted)).unwrap();
        assert_eq!(decoded, posted);
    }

    #[test]
    fn test_garbage_payload_names_method() {
        let err = decode_response(Method::GetStatus, &[0xff, 0xff, 0xff]).unwrap_err();
        assert_eq!(err.method, Method::GetStatus);
        assert!(err.to_string().contains("get-status"));
    }
}
