//! Codecs for `getCommonBlocks`, `getPeers` and `getStatus`.
use prost::Message;

use super::{
    blocks::{header_from_proto, header_to_proto},
    decode_proto, headers_from_proto, headers_to_proto, proto, CodecError, CodecErrorKind,
    MethodCodec,
};
use crate::{
    method::Method,
    types::{
        ChainState, CommonBlock, CommonBlocksResponse, GetCommonBlocksRequest, Headers,
        NetworkInfo, NodeConfig, PeerInfo, PeerStatus, PluginInfo, TokenInfo,
    },
};

pub struct GetCommonBlocksCodec;

impl MethodCodec for GetCommonBlocksCodec {
    const METHOD: Method = Method::GetCommonBlocks;
    type Request = GetCommonBlocksRequest;
    type Response = CommonBlocksResponse;

    fn serialize_request(request: &GetCommonBlocksRequest, headers: &Headers) -> Vec<u8> {
        proto::GetCommonBlocksRequest {
            ids: request.ids.clone(),
            headers: headers_to_proto(headers),
        }
        .encode_to_vec()
    }

    fn deserialize_request(
        payload: &[u8],
    ) -> Result<(GetCommonBlocksRequest, Headers), CodecError> {
        let raw: proto::GetCommonBlocksRequest = decode_proto(Self::METHOD, payload)?;
        Ok((
            GetCommonBlocksRequest { ids: raw.ids },
            headers_from_proto(raw.headers),
        ))
    }

    fn serialize_response(response: &CommonBlocksResponse) -> Vec<u8> {
        proto::GetCommonBlocksResponse {
            common: response.common.as_ref().map(|c| proto::CommonBlock {
                height: c.height,
                id: c.id.clone(),
            }),
        }
        .encode_to_vec()
    }

    fn deserialize_response(payload: &[u8]) -> Result<CommonBlocksResponse, CodecError> {
        let raw: proto::GetCommonBlocksResponse = decode_proto(Self::METHOD, payload)?;
        Ok(CommonBlocksResponse {
            common: raw.common.map(|c| CommonBlock {
                height: c.height,
                id: c.id,
            }),
        })
    }
}

pub struct GetPeersCodec;

impl MethodCodec for GetPeersCodec {
    const METHOD: Method = Method::GetPeers;
    type Request = ();
    type Response = Vec<PeerInfo>;

    fn serialize_request(_: &(), headers: &Headers) -> Vec<u8> {
        empty_request(headers)
    }

    fn deserialize_request(payload: &[u8]) -> Result<((), Headers), CodecError> {
        let raw: proto::EmptyRequest = decode_proto(Self::METHOD, payload)?;
        Ok(((), headers_from_proto(raw.headers)))
    }

    fn serialize_response(peers: &Vec<PeerInfo>) -> Vec<u8> {
        proto::GetPeersResponse {
            peers: peers
                .iter()
                .map(|p| proto::Peer {
                    ip: p.ip.clone(),
                    port: p.port as u32,
                })
                .collect(),
        }
        .encode_to_vec()
    }

    fn deserialize_response(payload: &[u8]) -> Result<Vec<PeerInfo>, CodecError> {
        let raw: proto::GetPeersResponse = decode_proto(Self::METHOD, payload)?;
        raw.peers
            .into_iter()
            .map(|p| {
                Ok::<_, CodecError>(PeerInfo {
                    port: port(Self::METHOD, "peers.port", p.port)?,
                    ip: p.ip,
                })
            })
            .collect()
    }
}

pub struct GetStatusCodec;

impl MethodCodec for GetStatusCodec {
    const METHOD: Method = Method::GetStatus;
    type Request = ();
    type Response = PeerStatus;

    fn serialize_request(_: &(), headers: &Headers) -> Vec<u8> {
        empty_request(headers)
    }

    fn deserialize_request(payload: &[u8]) -> Result<((), Headers), CodecError> {
        let raw: proto::EmptyRequest = decode_proto(Self::METHOD, payload)?;
        Ok(((), headers_from_proto(raw.headers)))
    }

    fn serialize_response(status: &PeerStatus) -> Vec<u8> {
        let network = &status.config.network;
        proto::GetStatusResponse {
            state: Some(proto::State {
                height: status.state.height,
                forging_allowed: status.state.forging_allowed,
                current_slot: status.state.current_slot,
                header: Some(header_to_proto(&status.state.header, Vec::new())),
            }),
            config: Some(proto::Config {
                version: status.config.version.clone(),
                network: Some(proto::Network {
                    version: network.version,
                    name: network.name.clone(),
                    nethash: network.nethash.clone(),
                    explorer: network.explorer.clone(),
                    token: Some(proto::Token {
                        name: network.token.name.clone(),
                        symbol: network.token.symbol.clone(),
                    }),
                }),
                plugins: status
                    .config
                    .plugins
                    .iter()
                    .map(|(name, plugin)| {
                        (
                            name.clone(),
                            proto::Plugin {
                                port: plugin.port as u32,
                                enabled: plugin.enabled,
                                estimate_total_count: plugin.estimate_total_count,
                            },
                        )
                    })
                    .collect(),
            }),
        }
        .encode_to_vec()
    }

    fn deserialize_response(payload: &[u8]) -> Result<PeerStatus, CodecError> {
        let raw: proto::GetStatusResponse = decode_proto(Self::METHOD, payload)?;
        let missing = |field| CodecError::new(Self::METHOD, CodecErrorKind::MissingField(field));

        let state = raw.state.ok_or_else(|| missing("state"))?;
        let header = state.header.ok_or_else(|| missing("state.header"))?;
        let config = raw.config.ok_or_else(|| missing("config"))?;
        let network = config.network.ok_or_else(|| missing("config.network"))?;
        let token = network.token.ok_or_else(|| missing("config.network.token"))?;

        Ok(PeerStatus {
            state: ChainState {
                height: state.height,
                forging_allowed: state.forging_allowed,
                current_slot: state.current_slot,
                header: header_from_proto(Self::METHOD, header)?,
            },
            config: NodeConfig {
                version: config.version,
                network: NetworkInfo {
                    version: network.version,
                    name: network.name,
                    nethash: network.nethash,
                    explorer: network.explorer,
                    token: TokenInfo {
                        name: token.name,
                        symbol: token.symbol,
                    },
                },
                plugins: config
                    .plugins
                    .into_iter()
                    .map(|(name, plugin)| {
                        let info = PluginInfo {
                            port: port(Self::METHOD, "config.plugins.port", plugin.port)?,
                            enabled: plugin.enabled,
                            estimate_total_count: plugin.estimate_total_count,
                        };
                        Ok::<_, CodecError>((name, info))
                    })
                    .collect::<Result<_, CodecError>>()?,
            },
        })
    }
}

fn port(method: Method, field: &'static str, value: u32) -> Result<u16, CodecError> {
    u16::try_from(value)
        .map_err(|_| CodecError::new(method, CodecErrorKind::InvalidPort { field, value }))
}

fn empty_request(headers: &Headers) -> Vec<u8> {
    proto::EmptyRequest {
        headers: headers_to_proto(headers),
    }
    .encode_to_vec()
}
