use std::task::{
    Context,
    Poll,
};

use futures::future;
use tendermint::{
    abci::response::{
        ApplySnapshotChunk,
        ApplySnapshotChunkResult,
        OfferSnapshot,
    },
    v0_34::abci::{
        SnapshotRequest,
        SnapshotResponse,
    },
};
use tower::Service;
use tower_abci::BoxError;
use tracing::debug;

/// Refuses state sync. The node offers no snapshots and rejects any offered to it, so a new node
/// always replays the chain from genesis.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Snapshot;

fn refuse_state_sync(req: SnapshotRequest) -> SnapshotResponse {
    match req {
        SnapshotRequest::ListSnapshots => SnapshotResponse::ListSnapshots(Default::default()),
        SnapshotRequest::OfferSnapshot(offer) => {
            debug!(
                height = %offer.snapshot.height,
                format = offer.snapshot.format,
                "rejecting offered snapshot; state sync is not supported"
            );
            SnapshotResponse::OfferSnapshot(OfferSnapshot::Reject)
        }
        SnapshotRequest::LoadSnapshotChunk(_) => {
            SnapshotResponse::LoadSnapshotChunk(Default::default())
        }
        SnapshotRequest::ApplySnapshotChunk(_) => {
            SnapshotResponse::ApplySnapshotChunk(ApplySnapshotChunk {
                result: ApplySnapshotChunkResult::Abort,
                refetch_chunks: vec![],
                reject_senders: vec![],
            })
        }
    }
}

impl Service<SnapshotRequest> for Snapshot {
    type Error = BoxError;
    type Future = future::Ready<Result<SnapshotResponse, BoxError>>;
    type Response = SnapshotResponse;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: SnapshotRequest) -> Self::Future {
        future::ready(Ok(refuse_state_sync(req)))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tendermint::{
        abci::types,
        v0_34::abci::request,
        AppHash,
    };

    use super::*;

    #[test]
    fn offered_snapshots_are_rejected() {
        let rsp = refuse_state_sync(SnapshotRequest::OfferSnapshot(request::OfferSnapshot {
            snapshot: types::Snapshot {
                height: 10u32.into(),
                format: 1,
                chunks: 1,
                hash: Bytes::new(),
                metadata: Bytes::new(),
            },
            app_hash: AppHash::default(),
        }));
        assert!(matches!(
            rsp,
            SnapshotResponse::OfferSnapshot(OfferSnapshot::Reject)
        ));
    }

    #[test]
    fn no_snapshots_are_listed() {
        let SnapshotResponse::ListSnapshots(list) =
            refuse_state_sync(SnapshotRequest::ListSnapshots)
        else {
            panic!("expected a list snapshots response");
        };
        assert!(list.snapshots.is_empty());
    }
}
