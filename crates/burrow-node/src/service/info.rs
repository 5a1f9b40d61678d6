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
    response::Echo,
    InfoRequest,
    InfoResponse,
};
use tower::Service;
use tower_abci::BoxError;
use tracing::Instrument as _;

use crate::app::App;

/// Serves `Info`, `Query`, `Echo` and `SetOption`.
#[derive(Clone)]
pub(crate) struct Info {
    app: Arc<App>,
}

impl Info {
    pub(crate) fn new(app: Arc<App>) -> Self {
        Self {
            app,
        }
    }

    async fn handle_info_request(self, request: InfoRequest) -> Result<InfoResponse, BoxError> {
        Ok(match request {
            InfoRequest::Info(info) => InfoResponse::Info(self.app.info(info).await),
            InfoRequest::Query(query) => InfoResponse::Query(self.app.query(query).await),
            InfoRequest::Echo(echo) => InfoResponse::Echo(Echo {
                message: echo.message,
            }),
            InfoRequest::SetOption(set_option) => {
                InfoResponse::SetOption(self.app.set_option(set_option).await)
            }
        })
    }
}

impl Service<InfoRequest> for Info {
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;
    type Response = InfoResponse;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: InfoRequest) -> Self::Future {
        let span = req.create_span();
        self.clone()
            .handle_info_request(req)
            .instrument(span)
            .boxed()
    }
}
