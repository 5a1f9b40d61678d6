//! The ABCI application: drives the checker and committer from consensus callbacks.
mod abci_code;
mod execute_tx;
mod peers;

use std::{
    collections::BTreeMap,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        Mutex as StdMutex,
        PoisonError,
    },
};

use bytes::Bytes;
use futures::FutureExt as _;
use tendermint::{
    abci::types::VoteInfo,
    account,
    block::Height,
    v0_34::abci::{
        request,
        response,
    },
    validator,
    vote,
};
use tokio::sync::Mutex;
use tracing::{
    debug,
    error,
    info,
    instrument,
    warn,
};

pub use self::{
    abci_code::AbciCode,
    execute_tx::{
        execute_tx,
        TxResponse,
    },
    peers::{
        AuthorizedPeers,
        ConfiguredPeers,
        PeersFilterError,
    },
};
use crate::{
    chain::{
        BlockMeta,
        Blockchain,
    },
    execution::{
        SharedCommitter,
        SharedExecutor,
    },
    primitive::{
        InvalidValidatorKey,
        ValidatorKey,
    },
    transaction::Decoder,
    validator::{
        ValidatorHistory,
        BURROW_VALIDATOR_DELAY_IN_BLOCKS,
        TOTAL_VALIDATOR_DELAY_IN_BLOCKS,
    },
};

/// Receives every fatal error raised while serving ABCI requests.
pub type PanicHook = Arc<dyn Fn(eyre::Report) + Send + Sync>;

const APP_VERSION: u64 = 1;

/// Conditions after which the node can no longer safely take part in consensus.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error(
        "{context}: tendermint reports {tendermint} validators but the application history has \
         {application}"
    )]
    ValidatorCountMismatch {
        context: &'static str,
        tendermint: usize,
        application: usize,
    },
    #[error(
        "{context}: tendermint reports power {tendermint} for validator {validator} but the \
         application history has {application}"
    )]
    ValidatorPowerMismatch {
        context: &'static str,
        validator: String,
        tendermint: u64,
        application: u128,
    },
    #[error(
        "{context}: validator {validator} reported by tendermint is unknown to the application"
    )]
    UnknownValidator {
        context: &'static str,
        validator: String,
    },
    #[error("{context}: tendermint reported an invalid validator key")]
    InvalidValidatorKey {
        context: &'static str,
        #[source]
        source: InvalidValidatorKey,
    },
    #[error(
        "validator {validator} has power {power} which does not fit into a signed 64 bit integer"
    )]
    PowerOverflow {
        validator: ValidatorKey,
        power: u128,
    },
    #[error("validator {0} is not a valid ed25519 public key")]
    NotEd25519(ValidatorKey),
    #[error("commit was called without a block being open")]
    NoOpenBlock,
    #[error("block height {0} cannot be represented")]
    InvalidHeight(u64),
    #[error("failed to commit block")]
    Commit(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl FatalError {
    fn commit(report: eyre::Report) -> Self {
        Self::Commit(report.into())
    }
}

/// The collaborators an [`App`] is built from.
pub struct Components {
    pub checker: SharedExecutor,
    pub committer: SharedCommitter,
    pub validators: Arc<dyn ValidatorHistory>,
    pub decoder: Arc<dyn Decoder>,
    pub peers: Arc<dyn AuthorizedPeers>,
    pub blockchain: Blockchain,
    /// Held by the consensus engine while it rechecks its mempool after a commit. If set, the
    /// checker stays locked after `Commit` returns until this lock has been acquired.
    pub mempool_lock: Option<Arc<Mutex<()>>>,
    pub panic_hook: PanicHook,
    pub node_info: String,
}

/// The ABCI application.
///
/// All methods take `&self`: tendermint calls the consensus methods sequentially through a single
/// connection while mempool and info requests arrive concurrently on their own connections.
pub struct App {
    checker: SharedExecutor,
    committer: SharedCommitter,
    validators: Arc<dyn ValidatorHistory>,
    decoder: Arc<dyn Decoder>,
    peers: Arc<dyn AuthorizedPeers>,
    blockchain: Blockchain,
    mempool_lock: Option<Arc<Mutex<()>>>,
    panic_hook: PanicHook,
    node_info: String,
    /// Set by `BeginBlock`, taken by `Commit`.
    block: StdMutex<Option<BlockMeta>>,
}

impl App {
    #[must_use]
    pub fn new(components: Components) -> Self {
        let Components {
            checker,
            committer,
            validators,
            decoder,
            peers,
            blockchain,
            mempool_lock,
            panic_hook,
            node_info,
        } = components;
        Self {
            checker,
            committer,
            validators,
            decoder,
            peers,
            blockchain,
            mempool_lock,
            panic_hook,
            node_info,
            block: StdMutex::new(None),
        }
    }

    /// Runs `handler`, routing fatal errors and panics to the panic hook and answering with
    /// `fallback` in that case.
    async fn guarded<T, F, D>(&self, method: &'static str, handler: F, fallback: D) -> T
    where
        F: Future<Output = Result<T, FatalError>>,
        D: FnOnce() -> T,
    {
        let report = match AssertUnwindSafe(handler).catch_unwind().await {
            Ok(Ok(response)) => return response,
            Ok(Err(fatal)) => eyre::Report::new(fatal).wrap_err(format!("fatal error in {method}")),
            Err(payload) => eyre::eyre!("{method} panicked: {}", panic_message(&*payload)),
        };
        error!(
            method,
            error = AsRef::<dyn std::error::Error>::as_ref(&report),
            "fatal error while serving ABCI request"
        );
        (self.panic_hook)(report);
        fallback()
    }

    #[instrument(skip_all)]
    pub async fn info(&self, _request: request::Info) -> response::Info {
        self.guarded(
            "info",
            async {
                let last_block = self.blockchain.last_block();
                Ok(response::Info {
                    data: self.node_info.clone(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    app_version: APP_VERSION,
                    last_block_height: Height::try_from(last_block.meta.height)
                        .map_err(|_| FatalError::InvalidHeight(last_block.meta.height))?,
                    last_block_app_hash: last_block.app_hash,
                })
            },
            response::Info::default,
        )
        .await
    }

    /// Dynamic options are not supported.
    #[instrument(skip_all, fields(key = %request.key))]
    pub async fn set_option(&self, request: request::SetOption) -> response::SetOption {
        debug!(value = %request.value, "rejecting set option request");
        response::SetOption {
            code: AbciCode::UNSUPPORTED_REQUEST.into(),
            log: "SetOption is not supported".to_string(),
            info: AbciCode::UNSUPPORTED_REQUEST.info(),
        }
    }

    /// Answers peers filter queries. Any other path, a malformed peers filter path, and a panic in
    /// the peers provider all yield [`AbciCode::UNSUPPORTED_REQUEST`] without bringing the node
    /// down.
    #[instrument(skip_all, fields(path = %request.path))]
    pub async fn query(&self, request: request::Query) -> response::Query {
        if !request.path.starts_with(peers::PEERS_FILTER_PREFIX) {
            return unsupported_query(format!("query path `{}` is not supported", request.path));
        }
        let peers = self.peers.clone();
        let path = request.path.clone();
        match std::panic::catch_unwind(AssertUnwindSafe(|| peers::filter(&*peers, &path))) {
            Ok(Ok(code)) => {
                debug!(%code, "resolved peers filter query");
                response::Query {
                    code: code.into(),
                    ..response::Query::default()
                }
            }
            Ok(Err(error)) => {
                warn!(
                    error = &error as &dyn std::error::Error,
                    "rejecting malformed peers filter query"
                );
                unsupported_query(error.to_string())
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                warn!(panic = %message, "peers provider panicked; rejecting peer");
                unsupported_query(format!("peers filter panicked: {message}"))
            }
        }
    }

    /// Checks that the validators tendermint starts with are the genesis validators.
    pub async fn init_chain(&self, request: request::InitChain) -> response::InitChain {
        self.init_chain_with_validators(&request.chain_id, &request.validators)
            .await
    }

    #[instrument(skip_all, fields(chain_id))]
    pub(crate) async fn init_chain_with_validators(
        &self,
        chain_id: &str,
        validators: &[validator::Update],
    ) -> response::InitChain {
        tracing::Span::current().record("chain_id", chain_id);
        self.guarded(
            "init_chain",
            async {
                self.check_genesis_validators(validators)?;
                let last_block = self.blockchain.last_block();
                info!(
                    validators = validators.len(),
                    app_hash = %last_block.app_hash,
                    "initialized chain"
                );
                Ok(response::InitChain {
                    consensus_params: None,
                    // empty keeps the validators tendermint was started with
                    validators: vec![],
                    app_hash: last_block.app_hash,
                })
            },
            || response::InitChain {
                consensus_params: None,
                validators: vec![],
                app_hash: tendermint::AppHash::default(),
            },
        )
        .await
    }

    fn check_genesis_validators(&self, updates: &[validator::Update]) -> Result<(), FatalError> {
        const CONTEXT: &str = "init chain";
        let expected = self.validators.validators(0);
        if updates.len() != expected.len() {
            return Err(FatalError::ValidatorCountMismatch {
                context: CONTEXT,
                tendermint: updates.len(),
                application: expected.len(),
            });
        }
        for update in updates {
            let key = ValidatorKey::try_from(&update.pub_key).map_err(|source| {
                FatalError::InvalidValidatorKey {
                    context: CONTEXT,
                    source,
                }
            })?;
            let application = expected.power(&key);
            if application == 0 {
                return Err(FatalError::UnknownValidator {
                    context: CONTEXT,
                    validator: key.to_string(),
                });
            }
            if u128::from(update.power.value()) != application {
                return Err(FatalError::ValidatorPowerMismatch {
                    context: CONTEXT,
                    validator: key.to_string(),
                    tendermint: update.power.value(),
                    application,
                });
            }
        }
        Ok(())
    }

    /// Opens a block and, past the first block, checks the votes of the last commit against the
    /// validator set the application had in effect for them.
    #[instrument(skip_all, fields(height = %request.header.height))]
    pub async fn begin_block(&self, request: request::BeginBlock) -> response::BeginBlock {
        self.guarded(
            "begin_block",
            async {
                let height = request.header.height.value();
                *self.block.lock().unwrap_or_else(PoisonError::into_inner) = Some(BlockMeta {
                    height,
                    time: request.header.time,
                    hash: Some(request.hash),
                });
                if height > 1 {
                    self.check_last_commit_votes(&request.last_commit_info.votes)?;
                }
                debug!("opened block");
                Ok(response::BeginBlock::default())
            },
            response::BeginBlock::default,
        )
        .await
    }

    fn check_last_commit_votes(&self, votes: &[VoteInfo]) -> Result<(), FatalError> {
        const CONTEXT: &str = "begin block";
        let expected: BTreeMap<account::Id, (ValidatorKey, u128)> = self
            .validators
            .validators(TOTAL_VALIDATOR_DELAY_IN_BLOCKS)
            .iter()
            .map(|(key, power)| (account::Id::new(*key.address().as_bytes()), (*key, power)))
            .collect();
        if votes.len() != expected.len() {
            return Err(FatalError::ValidatorCountMismatch {
                context: CONTEXT,
                tendermint: votes.len(),
                application: expected.len(),
            });
        }
        for vote in votes {
            let address = account::Id::new(vote.validator.address);
            let Some((key, application)) = expected.get(&address) else {
                return Err(FatalError::UnknownValidator {
                    context: CONTEXT,
                    validator: address.to_string(),
                });
            };
            if u128::from(vote.validator.power.value()) != *application {
                return Err(FatalError::ValidatorPowerMismatch {
                    context: CONTEXT,
                    validator: key.to_string(),
                    tendermint: vote.validator.power.value(),
                    application: *application,
                });
            }
        }
        Ok(())
    }

    /// Executes `request.tx` against the checker state.
    #[instrument(skip_all)]
    pub async fn check_tx(&self, request: request::CheckTx) -> response::CheckTx {
        self.guarded(
            "check_tx",
            async {
                let mut checker = self.checker.lock().await;
                Ok(execute_tx(&mut *checker, &*self.decoder, &request.tx)
                    .await
                    .into())
            },
            internal_error_check_tx,
        )
        .await
    }

    /// Executes `request.tx` against the committer state.
    #[instrument(skip_all)]
    pub async fn deliver_tx(&self, request: request::DeliverTx) -> response::DeliverTx {
        self.guarded(
            "deliver_tx",
            async {
                let mut committer = self.committer.lock().await;
                Ok(execute_tx(&mut *committer, &*self.decoder, &request.tx)
                    .await
                    .into())
            },
            || response::DeliverTx {
                code: AbciCode::TX_EXECUTION_ERROR.into(),
                info: AbciCode::TX_EXECUTION_ERROR.info(),
                ..response::DeliverTx::default()
            },
        )
        .await
    }

    /// Reports the validator changes committed one block ago.
    #[instrument(skip_all, fields(height = request.height))]
    pub async fn end_block(&self, request: request::EndBlock) -> response::EndBlock {
        self.guarded(
            "end_block",
            async {
                let changes = self
                    .validators
                    .validator_changes(BURROW_VALIDATOR_DELAY_IN_BLOCKS);
                let mut validator_updates = Vec::with_capacity(changes.len());
                for (key, power) in &changes {
                    let overflow = || FatalError::PowerOverflow {
                        validator: *key,
                        power: *power,
                    };
                    let power = u64::try_from(*power).map_err(|_| overflow())?;
                    let power = vote::Power::try_from(power).map_err(|_| overflow())?;
                    let pub_key = key.to_tendermint().ok_or(FatalError::NotEd25519(*key))?;
                    validator_updates.push(validator::Update {
                        pub_key,
                        power,
                    });
                }
                if !validator_updates.is_empty() {
                    info!(
                        updates = validator_updates.len(),
                        "reporting validator updates"
                    );
                }
                Ok(response::EndBlock {
                    validator_updates,
                    ..response::EndBlock::default()
                })
            },
            response::EndBlock::default,
        )
        .await
    }

    /// Commits the open block.
    ///
    /// The checker lock is taken before the committer lock and is released only once the checker
    /// has been re-forked from the new state and, if a mempool lock was supplied, once that lock
    /// could be acquired.
    #[instrument(skip_all)]
    pub async fn commit(&self) -> response::Commit {
        self.guarded(
            "commit",
            async {
                let block = self
                    .block
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                    .ok_or(FatalError::NoOpenBlock)?;

                let mut checker = self.checker.clone().lock_owned().await;
                let last_block = self
                    .committer
                    .lock()
                    .await
                    .commit(Some(&block))
                    .await
                    .map_err(FatalError::commit)?;
                checker.reset().await.map_err(FatalError::commit)?;
                self.blockchain
                    .commit_block(last_block.clone())
                    .map_err(FatalError::commit)?;

                match &self.mempool_lock {
                    Some(mempool_lock) => {
                        let mempool_lock = mempool_lock.clone();
                        tokio::spawn(async move {
                            let _mempool = mempool_lock.lock().await;
                            drop(checker);
                        });
                    }
                    None => drop(checker),
                }

                info!(
                    height = last_block.meta.height,
                    app_hash = %last_block.app_hash,
                    "committed block"
                );
                Ok(response::Commit {
                    data: Bytes::copy_from_slice(last_block.app_hash.as_bytes()),
                    ..response::Commit::default()
                })
            },
            response::Commit::default,
        )
        .await
    }
}

fn internal_error_check_tx() -> response::CheckTx {
    response::CheckTx {
        code: AbciCode::TX_EXECUTION_ERROR.into(),
        info: AbciCode::TX_EXECUTION_ERROR.info(),
        ..response::CheckTx::default()
    }
}

fn unsupported_query(log: String) -> response::Query {
    response::Query {
        code: AbciCode::UNSUPPORTED_REQUEST.into(),
        info: AbciCode::UNSUPPORTED_REQUEST.info(),
        log,
        ..response::Query::default()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
