//! ## Typed Records
//!
//! In-memory records exchanged by the six peer-to-peer calls. The serde derives describe the
//! legacy (JSON) shape of each record; [`crate::codecs`] maps the same records onto the binary
//! payloads.
//!
//! Amounts (`totalAmount`, `totalFee`, `reward`) are arbitrary-precision integers and travel as
//! decimal strings in both dialects.
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::method::Method;

/// The plugin whose `estimateTotalCount` flag survives status pruning.
pub const API_PLUGIN: &str = "@arkecosystem/core-api";

/// Serde helpers for decimal string amounts.
///
/// Numbers are accepted on input for peers that still send small amounts unquoted.
pub mod amount {
    use num_bigint::BigUint;
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.parse::<BigUint>().map_err(de::Error::custom),
            Repr::Number(n) => Ok(BigUint::from(n)),
        }
    }
}

/// Serde helpers for lists of byte strings written as hex.
pub mod hex_list {
    use serde::{de, ser::SerializeSeq, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in items {
            seq.serialize_element(&hex::encode(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|item| hex::decode(item).map_err(de::Error::custom))
            .collect()
    }
}

/// Request metadata. Only `version` is carried by binary payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(
        rename = "Content-Type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub content_type: Option<String>,
}

impl Headers {
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub id: String,
    pub version: u32,
    pub timestamp: u32,
    #[serde(default)]
    pub previous_block: String,
    pub height: u32,
    pub number_of_transactions: u32,
    #[serde(with = "amount")]
    pub total_amount: BigUint,
    #[serde(with = "amount")]
    pub total_fee: BigUint,
    #[serde(with = "amount")]
    pub reward: BigUint,
    pub payload_length: u32,
    pub payload_hash: String,
    pub generator_public_key: String,
    pub block_signature: String,
}

/// A block header plus its serialized transactions.
///
/// Blocks without transactions omit the field in their JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(flatten)]
    pub header: BlockHeader,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "hex_list")]
    pub transactions: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainState {
    pub height: u32,
    pub forging_allowed: bool,
    pub current_slot: u32,
    pub header: BlockHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub name: String,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub version: u32,
    pub name: String,
    pub nethash: String,
    #[serde(default)]
    pub explorer: String,
    pub token: TokenInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub port: u16,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate_total_count: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub version: String,
    pub network: NetworkInfo,
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginInfo>,
}

impl NodeConfig {
    /// Keeps `estimateTotalCount` on the API plugin only.
    ///
    /// Every other plugin attribute is already dropped by [`PluginInfo`] itself.
    pub fn prune_plugins(&mut self) {
        for (name, plugin) in self.plugins.iter_mut() {
            if name != API_PLUGIN {
                plugin.estimate_total_count = None;
            }
        }
    }
}

/// Response of `getStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    pub state: ChainState,
    pub config: NodeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetBlocksRequest {
    pub last_block_height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_limit: Option<u32>,
    #[serde(default)]
    pub headers_only: bool,
    #[serde(default)]
    pub serialized: bool,
}

/// A serialized block offered to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostBlockRequest {
    pub block: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostBlockResponse {
    pub status: bool,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetCommonBlocksRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonBlock {
    pub height: u32,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonBlocksResponse {
    #[serde(default)]
    pub common: Option<CommonBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub ip: String,
    #[serde(default)]
    pub port: u16,
}

/// Serialized transactions offered to a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostTransactionsRequest {
    pub transactions: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostTransactionsResponse {
    #[serde(default)]
    pub accept: Vec<String>,
}

/// A typed call, one variant per [`Method`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetBlocks(GetBlocksRequest),
    PostBlock(PostBlockRequest),
    GetCommonBlocks(GetCommonBlocksRequest),
    GetPeers,
    GetStatus,
    PostTransactions(PostTransactionsRequest),
}

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Request::GetBlocks(_) => Method::GetBlocks,
            Request::PostBlock(_) => Method::PostBlock,
            Request::GetCommonBlocks(_) => Method::GetCommonBlocks,
            Request::GetPeers => Method::GetPeers,
            Request::GetStatus => Method::GetStatus,
            Request::PostTransactions(_) => Method::PostTransactions,
        }
    }
}

/// A typed reply, one variant per [`Method`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Blocks(Vec<Block>),
    PostBlock(PostBlockResponse),
    CommonBlocks(CommonBlocksResponse),
    Peers(Vec<PeerInfo>),
    Status(Box<PeerStatus>),
    PostTransactions(PostTransactionsResponse),
}

impl Response {
    pub fn method(&self) -> Method {
        match self {
            Response::Blocks(_) => Method::GetBlocks,
            Response::PostBlock(_) => Method::PostBlock,
            Response::CommonBlocks(_) => Method::GetCommonBlocks,
            Response::Peers(_) => Method::GetPeers,
            Response::Status(_) => Method::GetStatus,
            Response::PostTransactions(_) => Method::PostTransactions,
        }
    }

    /// Chain height reported by the responding peer, for the calls that carry one.
    pub fn height(&self) -> Option<u32> {
        match self {
            Response::PostBlock(response) => Some(response.height),
            Response::Status(status) => Some(status.state.height),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn block_header(height: u32) -> BlockHeader {
        BlockHeader {
            id: format!("{:064x}", height),
            version: 0,
            timestamp: 1_000 + height,
            previous_block: format!("{:064x}", height.saturating_sub(1)),
            height,
            number_of_transactions: 0,
            total_amount: "123456789012345678901234567890".parse().unwrap(),
            total_fee: BigUint::from(25_000_000u64),
            reward: BigUint::from(200_000_000u64),
            payload_length: 0,
            payload_hash: "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
                .to_string(),
            generator_public_key:
                "03287bfebba4c7881a0509717e71b34b63f31e40021c321f89ae04f84be6d6ac37".to_string(),
            block_signature: "3045022100aa".to_string(),
        }
    }

    pub fn status(height: u32, version: &str) -> PeerStatus {
        let mut plugins = BTreeMap::new();
        plugins.insert(
            API_PLUGIN.to_string(),
            PluginInfo {
                port: 4003,
                enabled: true,
                estimate_total_count: Some(true),
            },
        );
        plugins.insert(
            "@arkecosystem/core-webhooks".to_string(),
            PluginInfo {
                port: 4004,
                enabled: false,
                estimate_total_count: None,
            },
        );
        PeerStatus {
            state: ChainState {
                height,
                forging_allowed: false,
                current_slot: 4242,
                header: block_header(height),
            },
            config: NodeConfig {
                version: version.to_string(),
                network: NetworkInfo {
                    version: 23,
                    name: "devnet".to_string(),
                    nethash: "2a44f340d76ffc3df204c5f38cd355b7496c9065a1ade2ef92071436bd72e867"
                        .to_string(),
                    explorer: "https://dexplorer.ark.io".to_string(),
                    token: TokenInfo {
                        name: "DARK".to_string(),
                        symbol: "DѦ".to_string(),
                    },
                },
                plugins,
            },
        }
    }
}
