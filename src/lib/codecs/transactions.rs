//! Codec for `postTransactions`.
use prost::Message;

use super::{
    decode_length_prefixed, decode_proto, encode_length_prefixed, headers_from_proto,
    headers_to_proto, proto, CodecError, MethodCodec, MAX_TRANSACTIONS_PER_BLOCK,
};
use crate::{
    method::Method,
    types::{Headers, PostTransactionsRequest, PostTransactionsResponse},
};

pub struct PostTransactionsCodec;

impl MethodCodec for PostTransactionsCodec {
    const METHOD: Method = Method::PostTransactions;
    type Request = PostTransactionsRequest;
    type Response = PostTransactionsResponse;

    fn serialize_request(request: &PostTransactionsRequest, headers: &Headers) -> Vec<u8> {
        proto::PostTransactionsRequest {
            transactions: encode_length_prefixed(&request.transactions),
            headers: headers_to_proto(headers),
        }
        .encode_to_vec()
    }

    fn deserialize_request(
        payload: &[u8],
    ) -> Result<(PostTransactionsRequest, Headers), CodecError> {
        let raw: proto::PostTransactionsRequest = decode_proto(Self::METHOD, payload)?;
        let transactions = decode_length_prefixed(&raw.transactions, MAX_TRANSACTIONS_PER_BLOCK)
            .map_err(|e| CodecError::new(Self::METHOD, e))?
            .into_iter()
            .map(<[u8]>::to_vec)
            .collect();
        Ok((
            PostTransactionsRequest { transactions },
            headers_from_proto(raw.headers),
        ))
    }

    fn serialize_response(response: &PostTransactionsResponse) -> Vec<u8> {
        proto::PostTransactionsResponse {
            accept: response.accept.clone(),
        }
        .encode_to_vec()
    }

    fn deserialize_response(payload: &[u8]) -> Result<PostTransactionsResponse, CodecError> {
        let raw: proto::PostTransactionsResponse = decode_proto(Self::METHOD, payload)?;
        Ok(PostTransactionsResponse { accept: raw.accept })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_transactions_roundtrip() {
        let request = PostTransactionsRequest {
            transactions: vec![vec![0xff, 0x02, 0x17], vec![0x01; 180]],
        };
        let payload =
            PostTransactionsCodec::serialize_request(&request, &Headers::with_version("3.0.0"));
        let (decoded, headers) = PostTransactionsCodec::deserialize_request(&payload).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(headers.version.as_deref(), Some("3.0.0"));
    }

    #[test]
    fn test_post_transactions_request_is_capped() {
        let request = PostTransactionsRequest {
            transactions: vec![vec![1, 2]; 600],
        };
        let payload = PostTransactionsCodec::serialize_request(&request, &Headers::default());
        let (decoded, _) = PostTransactionsCodec::deserialize_request(&payload).unwrap();
        assert_eq!(decoded.transactions.len(), MAX_TRANSACTIONS_PER_BLOCK);
    }

    #[test]
    fn test_accept_list_roundtrip() {
        let response = PostTransactionsResponse {
            accept: vec!["a1".to_string(), "b2".to_string()],
        };
        let payload = PostTransactionsCodec::serialize_response(&response);
        assert_eq!(
            PostTransactionsCodec::deserialize_response(&payload).unwrap(),
            response
        );
    }
}
