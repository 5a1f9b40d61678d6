use std::{
    sync::Arc,
    task::{
        Context,
        Poll,
    },
};

use futures::future;
use tendermint::v0_34::abci::{
    ConsensusRequest,
    ConsensusResponse,
};
use tokio::sync::mpsc;
use tower::{
    BoxError,
    Service,
};
use tower_actor::Message;
use tracing::{
    instrument,
    warn,
    Instrument as _,
};

use crate::app::App;

/// Processes consensus requests strictly in the order tendermint sent them.
pub(crate) struct Consensus {
    queue: mpsc::Receiver<Message<ConsensusRequest, ConsensusResponse, tower::BoxError>>,
    app: Arc<App>,
}

impl Consensus {
    pub(crate) fn new(
        app: Arc<App>,
        queue: mpsc::Receiver<Message<ConsensusRequest, ConsensusResponse, tower::BoxError>>,
    ) -> Self {
        Self {
            queue,
            app,
        }
    }

    pub(crate) async fn run(mut self) -> Result<(), tower::BoxError> {
        while let Some(Message {
            req,
            rsp_sender,
            span,
        }) = self.queue.recv().await
        {
            let rsp = self.handle_request(req).instrument(span.clone()).await;
            // `send` returns the response if the receiver was dropped, which is not our problem.
            if rsp_sender.send(Ok(rsp)).is_err() {
                warn!(
                    parent: &span,
                    "failed returning consensus response to request sender; dropping response"
                );
            }
        }
        Ok(())
    }

    #[instrument(skip_all)]
    async fn handle_request(&self, req: ConsensusRequest) -> ConsensusResponse {
        match req {
            ConsensusRequest::InitChain(init_chain) => {
                ConsensusResponse::InitChain(self.app.init_chain(init_chain).await)
            }
            ConsensusRequest::BeginBlock(begin_block) => {
                ConsensusResponse::BeginBlock(self.app.begin_block(begin_block).await)
            }
            ConsensusRequest::DeliverTx(deliver_tx) => {
                ConsensusResponse::DeliverTx(self.app.deliver_tx(deliver_tx).await)
            }
            ConsensusRequest::EndBlock(end_block) => {
                ConsensusResponse::EndBlock(self.app.end_block(end_block).await)
            }
            ConsensusRequest::Commit => ConsensusResponse::Commit(self.app.commit().await),
        }
    }
}

/// Refuses every consensus request. Serves the consensus connection of a node that commits
/// without a consensus engine.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Disabled;

impl Service<ConsensusRequest> for Disabled {
    type Error = BoxError;
    type Future = future::Ready<Result<ConsensusResponse, BoxError>>;
    type Response = ConsensusResponse;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: ConsensusRequest) -> Self::Future {
        warn!("refusing consensus request; node is running without consensus");
        future::ready(Err("node is running without consensus".into()))
    }
}
