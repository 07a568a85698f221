//! Codecs for `getBlocks` and `postBlock`.
use prost::Message;

use super::{
    decode_length_prefixed, decode_proto, encode_length_prefixed, headers_from_proto,
    headers_to_proto, parse_amount, proto, CodecError, MethodCodec, MAX_BLOCKS_PER_BATCH,
    MAX_TRANSACTIONS_PER_BLOCK,
};
use crate::{
    method::Method,
    types::{Block, BlockHeader, GetBlocksRequest, Headers, PostBlockRequest, PostBlockResponse},
};

pub struct GetBlocksCodec;

impl MethodCodec for GetBlocksCodec {
    const METHOD: Method = Method::GetBlocks;
    type Request = GetBlocksRequest;
    type Response = Vec<Block>;

    fn serialize_request(request: &GetBlocksRequest, headers: &Headers) -> Vec<u8> {
        proto::GetBlocksRequest {
            last_block_height: request.last_block_height,
            block_limit: request.block_limit.unwrap_or_default(),
            headers_only: request.headers_only,
            serialized: request.serialized,
            headers: headers_to_proto(headers),
        }
        .encode_to_vec()
    }

    fn deserialize_request(payload: &[u8]) -> Result<(GetBlocksRequest, Headers), CodecError> {
        let raw: proto::GetBlocksRequest = decode_proto(Self::METHOD, payload)?;
        let request = GetBlocksRequest {
            last_block_height: raw.last_block_height,
            block_limit: (raw.block_limit != 0).then_some(raw.block_limit),
            headers_only: raw.headers_only,
            serialized: raw.serialized,
        };
        Ok((request, headers_from_proto(raw.headers)))
    }

    fn serialize_response(blocks: &Vec<Block>) -> Vec<u8> {
        let encoded = blocks.iter().map(|block| {
            let transactions = encode_length_prefixed(&block.transactions);
            header_to_proto(&block.header, transactions).encode_to_vec()
        });
        encode_length_prefixed(encoded)
    }

    fn deserialize_response(payload: &[u8]) -> Result<Vec<Block>, CodecError> {
        let items = decode_length_prefixed(payload, MAX_BLOCKS_PER_BATCH)
            .map_err(|e| CodecError::new(Self::METHOD, e))?;
        items
            .into_iter()
            .map(|item| {
                let mut raw: proto::BlockHeader = decode_proto(Self::METHOD, item)?;
                let transactions =
                    decode_length_prefixed(&raw.transactions, MAX_TRANSACTIONS_PER_BLOCK)
                        .map_err(|e| CodecError::new(Self::METHOD, e))?
                        .into_iter()
                        .map(<[u8]>::to_vec)
                        .collect();
                raw.transactions.clear();
                Ok(Block {
                    header: header_from_proto(Self::METHOD, raw)?,
                    transactions,
                })
            })
            .collect()
    }
}

pub struct PostBlockCodec;

impl MethodCodec for PostBlockCodec {
    const METHOD: Method = Method::PostBlock;
    type Request = PostBlockRequest;
    type Response = PostBlockResponse;

    fn serialize_request(request: &PostBlockRequest, headers: &Headers) -> Vec<u8> {
        proto::PostBlockRequest {
            block: request.block.clone(),
            headers: headers_to_proto(headers),
        }
        .encode_to_vec()
    }

    fn deserialize_request(payload: &[u8]) -> Result<(PostBlockRequest, Headers), CodecError> {
        let raw: proto::PostBlockRequest = decode_proto(Self::METHOD, payload)?;
        Ok((
            PostBlockRequest { block: raw.block },
            headers_from_proto(raw.headers),
        ))
    }

    fn serialize_response(response: &PostBlockResponse) -> Vec<u8> {
        proto::PostBlockResponse {
            status: response.status,
            height: response.height,
        }
        .encode_to_vec()
    }

    fn deserialize_response(payload: &[u8]) -> Result<PostBlockResponse, CodecError> {
        let raw: proto::PostBlockResponse = decode_proto(Self::METHOD, payload)?;
        Ok(PostBlockResponse {
            status: raw.status,
            height: raw.height,
        })
    }
}

pub(super) fn header_to_proto(header: &BlockHeader, transactions: Vec<u8>) -> proto::BlockHeader {
    proto::BlockHeader {
        id: header.id.clone(),
        version: header.version,
        timestamp: header.timestamp,
        previous_block: header.previous_block.clone(),
        height: header.height,
        number_of_transactions: header.number_of_transactions,
        total_amount: header.total_amount.to_str_radix(10),
        total_fee: header.total_fee.to_str_radix(10),
        reward: header.reward.to_str_radix(10),
        payload_length: header.payload_length,
        payload_hash: header.payload_hash.clone(),
        generator_public_key: header.generator_public_key.clone(),
        block_signature: header.block_signature.clone(),
        transactions,
    }
}

pub(super) fn header_from_proto(
    method: Method,
    raw: proto::BlockHeader,
) -> Result<BlockHeader, CodecError> {
    Ok(BlockHeader {
        total_amount: parse_amount(method, "totalAmount", &raw.total_amount)?,
        total_fee: parse_amount(method, "totalFee", &raw.total_fee)?,
        reward: parse_amount(method, "reward", &raw.reward)?,
        id: raw.id,
        version: raw.version,
        timestamp: raw.timestamp,
        previous_block: raw.previous_block,
        height: raw.height,
        number_of_transactions: raw.number_of_transactions,
        payload_length: raw.payload_length,
        payload_hash: raw.payload_hash,
        generator_public_key: raw.generator_public_key,
        block_signature: raw.block_signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codecs::CodecErrorKind, types::fixtures};
    use num_bigint::BigUint;

    fn block(height: u32, transactions: usize) -> Block {
        Block {
            header: fixtures::block_header(height),
            transactions: (0..transactions)
                .map(|i| (i as u32).to_be_bytes().to_vec())
                .collect(),
        }
    }

    #[test]
    fn test_blocks_roundtrip_preserves_big_amounts() {
        let mut first = block(1, 3);
        first.header.total_amount = BigUint::from(u64::MAX) * BigUint::from(1_000_000u32);
        let blocks = vec![first, block(2, 0)];

        let payload = GetBlocksCodec::serialize_response(&blocks);
        let decoded = GetBlocksCodec::deserialize_response(&payload).unwrap();
        assert_eq!(decoded, blocks);
        assert_eq!(
            decoded[0].header.total_amount.to_string(),
            "18446744073709551615000000"
        );
    }

    #[test]
    fn test_block_batch_is_capped() {
        let blocks: Vec<Block> = (1..=450).map(|h| block(h, 0)).collect();
        let payload = GetBlocksCodec::serialize_response(&blocks);
        let decoded = GetBlocksCodec::deserialize_response(&payload).unwrap();
        assert_eq!(decoded.len(), MAX_BLOCKS_PER_BATCH);
        assert_eq!(decoded.last().unwrap().header.height, 400);
    }

    #[test]
    fn test_transactions_per_block_are_capped() {
        let blocks = vec![block(1, 600)];
        let payload = GetBlocksCodec::serialize_response(&blocks);
        let decoded = GetBlocksCodec::deserialize_response(&payload).unwrap();
        assert_eq!(decoded[0].transactions.len(), MAX_TRANSACTIONS_PER_BLOCK);
        assert_eq!(decoded[0].transactions[499], 499u32.to_be_bytes().to_vec());
    }

    #[test]
    fn test_invalid_amount_is_rejected() {
        let mut raw = header_to_proto(&fixtures::block_header(1), vec![]);
        raw.reward = "12abc".to_string();
        let payload = encode_length_prefixed([raw.encode_to_vec()]);
        let err = GetBlocksCodec::deserialize_response(&payload).unwrap_err();
        assert_eq!(err.method, Method::GetBlocks);
        assert!(matches!(
            err.kind,
            CodecErrorKind::InvalidAmount { field: "reward", .. }
        ));
    }

    #[test]
    fn test_get_blocks_request_without_limit() {
        let request = GetBlocksRequest {
            last_block_height: 7,
            block_limit: None,
            headers_only: false,
            serialized: true,
        };
        let payload = GetBlocksCodec::serialize_request(&request, &Headers::default());
        let (decoded, headers) = GetBlocksCodec::deserialize_request(&payload).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(headers.version, None);
    }

    #[test]
    fn test_post_block_roundtrip() {
        let request = PostBlockRequest {
            block: vec![0u8, 1, 2, 250],
        };
        let payload = PostBlockCodec::serialize_request(&request, &Headers::with_version("3.0.0"));
        let (decoded, headers) = PostBlockCodec::deserialize_request(&payload).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(headers.version.as_deref(), Some("3.0.0"));
    }
}
