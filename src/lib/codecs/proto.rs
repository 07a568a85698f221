//! Protobuf messages of the binary dialect.
//!
//! Amounts are `string` fields holding decimal integers. Lists of blocks and transactions are
//! `bytes` fields holding 4-byte length-prefixed sub-frames.
use std::collections::BTreeMap;

#[derive(Clone, PartialEq, prost::Message)]
pub struct Headers {
    #[prost(string, tag = "1")]
    pub version: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BlockHeader {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(uint32, tag = "2")]
    pub version: u32,
    #[prost(uint32, tag = "3")]
    pub timestamp: u32,
    #[prost(string, tag = "4")]
    pub previous_block: String,
    #[prost(uint32, tag = "5")]
    pub height: u32,
    #[prost(uint32, tag = "6")]
    pub number_of_transactions: u32,
    #[prost(string, tag = "7")]
    pub total_amount: String,
    #[prost(string, tag = "8")]
    pub total_fee: String,
    #[prost(string, tag = "9")]
    pub reward: String,
    #[prost(uint32, tag = "10")]
    pub payload_length: u32,
    #[prost(string, tag = "11")]
    pub payload_hash: String,
    #[prost(string, tag = "12")]
    pub generator_public_key: String,
    #[prost(string, tag = "13")]
    pub block_signature: String,
    #[prost(bytes = "vec", tag = "14")]
    pub transactions: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetBlocksRequest {
    #[prost(uint32, tag = "1")]
    pub last_block_height: u32,
    #[prost(uint32, tag = "2")]
    pub block_limit: u32,
    #[prost(bool, tag = "3")]
    pub headers_only: bool,
    #[prost(bool, tag = "4")]
    pub serialized: bool,
    #[prost(message, optional, tag = "5")]
    pub headers: Option<Headers>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PostBlockRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub block: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub headers: Option<Headers>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PostBlockResponse {
    #[prost(bool, tag = "1")]
    pub status: bool,
    #[prost(uint32, tag = "2")]
    pub height: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetCommonBlocksRequest {
    #[prost(string, repeated, tag = "1")]
    pub ids: Vec<String>,
    #[prost(message, optional, tag = "2")]
    pub headers: Option<Headers>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CommonBlock {
    #[prost(uint32, tag = "1")]
    pub height: u32,
    #[prost(string, tag = "2")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetCommonBlocksResponse {
    #[prost(message, optional, tag = "1")]
    pub common: Option<CommonBlock>,
}

/// Request body shared by the calls that take no arguments.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EmptyRequest {
    #[prost(message, optional, tag = "1")]
    pub headers: Option<Headers>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Peer {
    #[prost(string, tag = "1")]
    pub ip: String,
    #[prost(uint32, tag = "2")]
    pub port: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetPeersResponse {
    #[prost(message, repeated, tag = "1")]
    pub peers: Vec<Peer>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct State {
    #[prost(uint32, tag = "1")]
    pub height: u32,
    #[prost(bool, tag = "2")]
    pub forging_allowed: bool,
    #[prost(uint32, tag = "3")]
    pub current_slot: u32,
    #[prost(message, optional, tag = "4")]
    pub header: Option<BlockHeader>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Token {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub symbol: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Network {
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub nethash: String,
    #[prost(string, tag = "4")]
    pub explorer: String,
    #[prost(message, optional, tag = "5")]
    pub token: Option<Token>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Plugin {
    #[prost(uint32, tag = "1")]
    pub port: u32,
    #[prost(bool, tag = "2")]
    pub enabled: bool,
    #[prost(bool, optional, tag = "3")]
    pub estimate_total_count: Option<bool>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Config {
    #[prost(string, tag = "1")]
    pub version: String,
    #[prost(message, optional, tag = "2")]
    pub network: Option<Network>,
    #[prost(btree_map = "string, message", tag = "3")]
    pub plugins: BTreeMap<String, Plugin>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetStatusResponse {
    #[prost(message, optional, tag = "1")]
    pub state: Option<State>,
    #[prost(message, optional, tag = "2")]
    pub config: Option<Config>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PostTransactionsRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub transactions: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub headers: Option<Headers>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PostTransactionsResponse {
    #[prost(string, repeated, tag = "1")]
    pub accept: Vec<String>,
}
