//! Authorization of peers through the `/p2p/filter/` query path.
//!
//! Tendermint asks the application whether it may connect to a peer by issuing a query at
//! `/p2p/filter/id/<node id>` or `/p2p/filter/addr/<host:port>`. A zero response code authorizes
//! the peer; anything else rejects it.
use std::collections::BTreeSet;

use super::AbciCode;

pub(crate) const PEERS_FILTER_PREFIX: &str = "/p2p/filter/";

/// Decides which peers the node may gossip with.
pub trait AuthorizedPeers: Send + Sync {
    fn num_peers(&self) -> usize;
    fn query_peer_by_id(&self, id: &str) -> bool;
    fn query_peer_by_address(&self, address: &str) -> bool;
}

/// Allow-lists of node ids and network addresses.
///
/// An empty list authorizes every peer along its dimension.
#[derive(Clone, Debug, Default)]
pub struct ConfiguredPeers {
    ids: BTreeSet<String>,
    addresses: BTreeSet<String>,
}

impl ConfiguredPeers {
    pub fn new<I, A>(ids: I, addresses: A) -> Self
    where
        I: IntoIterator<Item = String>,
        A: IntoIterator<Item = String>,
    {
        Self {
            ids: ids.into_iter().collect(),
            addresses: addresses.into_iter().collect(),
        }
    }
}

impl AuthorizedPeers for ConfiguredPeers {
    fn num_peers(&self) -> usize {
        self.ids.len().saturating_add(self.addresses.len())
    }

    fn query_peer_by_id(&self, id: &str) -> bool {
        self.ids.is_empty() || self.ids.contains(id)
    }

    fn query_peer_by_address(&self, address: &str) -> bool {
        self.addresses.is_empty() || self.addresses.contains(address)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PeersFilterError {
    #[error("peers filter path `{path}` has {segments} segments, expected 5")]
    SegmentCount {
        path: String,
        segments: usize,
    },
    #[error("unknown peers filter type `{0}`, expected `id` or `addr`")]
    UnknownFilterType(String),
}

/// Resolves a `/p2p/filter/{id|addr}/{value}` query against `peers`.
pub(crate) fn filter(
    peers: &dyn AuthorizedPeers,
    path: &str,
) -> Result<AbciCode, PeersFilterError> {
    let segments: Vec<&str> = path.split('/').collect();
    let [_, _, _, filter_type, value] = segments.as_slice() else {
        return Err(PeersFilterError::SegmentCount {
            path: path.to_string(),
            segments: segments.len(),
        });
    };
    let authorized = match *filter_type {
        "id" => peers.query_peer_by_id(value),
        "addr" => peers.query_peer_by_address(value),
        other => return Err(PeersFilterError::UnknownFilterType(other.to_string())),
    };
    Ok(if authorized {
        AbciCode::PEER_AUTHORIZED
    } else {
        AbciCode::PEER_FORBIDDEN
    })
}
