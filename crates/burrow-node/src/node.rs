use std::sync::Arc;

use cnidarium::Storage;
use eyre::{
    eyre,
    OptionExt as _,
    Result,
    WrapErr as _,
};
use penumbra_tower_trace::{
    trace::request_span,
    v034::RequestExt as _,
};
use tendermint::v0_34::abci::{
    ConsensusRequest,
    ConsensusResponse,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower::{
    util::BoxCloneService,
    BoxError,
    ServiceExt as _,
};
use tower_abci::v034::Server;
use tracing::{
    error,
    info,
    instrument,
    warn,
};

use crate::{
    app::{
        App,
        Components,
        ConfiguredPeers,
        PanicHook,
    },
    chain::Blockchain,
    config::Config,
    execution::{
        Checker,
        Committer,
    },
    genesis::{
        self,
        GenesisDoc,
    },
    process::Process,
    service,
    storage,
    transaction::BorshDecoder,
    validator::History,
};

pub struct Node;

impl Node {
    /// Runs the node until ctrl-c is received or a fatal error occurs.
    ///
    /// Without consensus, transactions sent on the ABCI mempool connection are executed and
    /// committed directly, and the consensus connection refuses every request.
    ///
    /// # Errors
    /// Returns an error if storage cannot be opened or bootstrapped, if the ABCI server fails, or
    /// if the node was stopped by a fatal error.
    #[instrument(skip_all)]
    pub async fn run_until_stopped(config: Config) -> Result<()> {
        let storage = open_storage(&config).await?;
        let history = History::load(&storage)
            .await
            .wrap_err("failed loading validator history")?;
        let blockchain = Blockchain::load(&storage)
            .await
            .wrap_err("failed loading last block")?;
        info!(
            height = blockchain.last_block_height(),
            app_hash = %blockchain.last_block().app_hash,
            "loaded chain state"
        );

        let fatal = CancellationToken::new();
        let panic_hook = cancelling_panic_hook(fatal.clone());
        let committer = Arc::new(Mutex::new(Committer::new(
            storage.clone(),
            history.clone(),
        )));
        let process = config.no_consensus.then(|| {
            info!(
                commit_interval = ?config.commit_interval(),
                "running without consensus"
            );
            Arc::new(Process::start(
                committer.clone(),
                Arc::new(BorshDecoder),
                blockchain.clone(),
                panic_hook.clone(),
                config.commit_interval(),
            ))
        });

        let app = Arc::new(App::new(Components {
            checker: Arc::new(Mutex::new(Checker::new(storage.clone()))),
            committer,
            validators: Arc::new(history),
            decoder: Arc::new(BorshDecoder),
            peers: Arc::new(ConfiguredPeers::new(
                config.authorized_peer_ids(),
                config.authorized_peer_addresses(),
            )),
            blockchain,
            mempool_lock: None,
            panic_hook,
            node_info: config.node_info.clone(),
        }));
        let (consensus, mempool) = match &process {
            Some(process) => (
                service::DisabledConsensus.boxed_clone(),
                service::Mempool::without_consensus(process.clone()),
            ),
            None => (
                consensus_service(app.clone()),
                service::Mempool::new(app.clone()),
            ),
        };

        let stopped = serve_abci(
            &config,
            consensus,
            mempool,
            service::Info::new(app),
            &fatal,
        )
        .await;
        if let Some(process) = process {
            if let Err(error) = process.shutdown(config.shutdown_timeout()).await {
                warn!(
                    error = &error as &dyn std::error::Error,
                    "failed shutting down process cleanly"
                );
            }
        }
        stopped
    }
}

async fn open_storage(config: &Config) -> Result<Storage> {
    if config
        .db_filepath
        .try_exists()
        .wrap_err("failed checking for existence of db storage file")?
    {
        info!(path = %config.db_filepath.display(), "opening storage db");
    } else {
        info!(path = %config.db_filepath.display(), "creating storage db");
    }
    let storage = storage::load(config.db_filepath.clone()).await?;
    if storage::is_uninitialized(&storage) {
        let genesis = GenesisDoc::read(&config.genesis_filepath)?;
        let last_block = genesis::apply(&storage, &genesis)
            .await
            .wrap_err("failed applying genesis")?;
        info!(
            chain_id = %genesis.chain_id,
            app_hash = %last_block.app_hash,
            "initialized storage from genesis"
        );
    }
    Ok(storage)
}

/// Logs the fatal error and stops the node.
fn cancelling_panic_hook(fatal: CancellationToken) -> PanicHook {
    Arc::new(move |report: eyre::Report| {
        error!(
            error = AsRef::<dyn std::error::Error>::as_ref(&report),
            "node can no longer safely continue; stopping"
        );
        fatal.cancel();
    })
}

type ConsensusService = BoxCloneService<ConsensusRequest, ConsensusResponse, BoxError>;

fn consensus_service(app: Arc<App>) -> ConsensusService {
    tower::ServiceBuilder::new()
        .layer(request_span::layer(|req: &ConsensusRequest| {
            req.create_span()
        }))
        .service(tower_actor::Actor::new(10, |queue: _| {
            service::Consensus::new(app, queue).run()
        }))
        .boxed_clone()
}

async fn serve_abci(
    config: &Config,
    consensus: ConsensusService,
    mempool: service::Mempool,
    info: service::Info,
    fatal: &CancellationToken,
) -> Result<()> {
    let server = Server::builder()
        .consensus(consensus)
        .info(info)
        .mempool(mempool)
        .snapshot(service::Snapshot)
        .finish()
        .ok_or_eyre("server builder didn't return server; are all fields set?")?;

    info!(listen_addr = %config.listen_addr, "starting abci server");
    tokio::select! {
        res = server.listen_tcp(&config.listen_addr) => {
            res.map_err(|error| eyre!(error)).wrap_err("abci server failed")
        }
        () = fatal.cancelled() => Err(eyre!("node stopped after a fatal error")),
        res = tokio::signal::ctrl_c() => {
            res.wrap_err("failed listening for ctrl-c")?;
            info!("received ctrl-c; stopping abci server");
            Ok(())
        }
    }
}
