//! The six peer-to-peer calls understood by the bridge and their names in both dialects.
use std::fmt;

/// A peer-to-peer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GetBlocks,
    PostBlock,
    GetCommonBlocks,
    GetPeers,
    GetStatus,
    PostTransactions,
}

impl Method {
    pub const ALL: [Method; 6] = [
        Method::GetBlocks,
        Method::PostBlock,
        Method::GetCommonBlocks,
        Method::GetPeers,
        Method::GetStatus,
        Method::PostTransactions,
    ];

    /// Event name used by the legacy dialect.
    pub fn legacy_event(self) -> &'static str {
        match self {
            Method::GetBlocks => "p2p.peer.getBlocks",
            Method::PostBlock => "p2p.peer.postBlock",
            Method::GetCommonBlocks => "p2p.peer.getCommonBlocks",
            Method::GetPeers => "p2p.peer.getPeers",
            Method::GetStatus => "p2p.peer.getStatus",
            Method::PostTransactions => "p2p.peer.postTransactions",
        }
    }

    /// Frame path used by the binary dialect.
    pub fn path(self) -> &'static str {
        match self {
            Method::GetBlocks => "p2p.blocks.getBlocks",
            Method::PostBlock => "p2p.blocks.postBlock",
            Method::GetCommonBlocks => "p2p.peer.getCommonBlocks",
            Method::GetPeers => "p2p.peer.getPeers",
            Method::GetStatus => "p2p.peer.getStatus",
            Method::PostTransactions => "p2p.transactions.postTransactions",
        }
    }

    pub fn from_legacy_event(event: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.legacy_event() == event)
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.path() == path)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::GetBlocks => "get-blocks",
            Method::PostBlock => "post-block",
            Method::GetCommonBlocks => "get-common-blocks",
            Method::GetPeers => "get-peers",
            Method::GetStatus => "get-status",
            Method::PostTransactions => "post-transactions",
        };
        write!(f, "{name}")
    }
}
