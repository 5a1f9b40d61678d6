use std::{
    pin::Pin,
    sync::Arc,
    task::{
        Context,
        Poll,
    },
};

use futures::{
    Future,
    FutureExt as _,
};
use penumbra_tower_trace::v034::RequestExt as _;
use tendermint::v0_34::abci::{
    request,
    response,
    MempoolRequest,
    MempoolResponse,
};
use tower::Service;
use tower_abci::BoxError;
use tracing::Instrument as _;

use crate::{
    app::App,
    process::Process,
};

#[derive(Clone)]
enum Backend {
    Checker(Arc<App>),
    Process(Arc<Process>),
}

/// Serves `CheckTx`, either against the checker state ahead of consensus or, without consensus,
/// by executing and committing transactions directly through a [`Process`].
#[derive(Clone)]
pub(crate) struct Mempool {
    backend: Backend,
}

impl Mempool {
    pub(crate) fn new(app: Arc<App>) -> Self {
        Self {
            backend: Backend::Checker(app),
        }
    }

    pub(crate) fn without_consensus(process: Arc<Process>) -> Self {
        Self {
            backend: Backend::Process(process),
        }
    }
}

async fn handle_check_tx(
    backend: Backend,
    check_tx: request::CheckTx,
) -> Result<response::CheckTx, BoxError> {
    match backend {
        Backend::Checker(app) => Ok(app.check_tx(check_tx).await),
        Backend::Process(process) => {
            let mut outcome = None;
            process
                .check_tx(&check_tx.tx, |rsp| outcome = Some(rsp))
                .await
                .map_err(BoxError::from)?;
            let rsp = outcome.ok_or("process returned without reporting the transaction outcome")?;
            Ok(rsp.into())
        }
    }
}

impl Service<MempoolRequest> for Mempool {
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<MempoolResponse, BoxError>> + Send + 'static>>;
    type Response = MempoolResponse;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: MempoolRequest) -> Self::Future {
        let span = req.create_span();
        let backend = self.backend.clone();
        async move {
            let MempoolRequest::CheckTx(check_tx) = req;
            Ok(MempoolResponse::CheckTx(
                handle_check_tx(backend, check_tx).await?,
            ))
        }
        .instrument(span)
        .boxed()
    }
}
