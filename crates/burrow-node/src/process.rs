//! Single node operation without a consensus engine.
//!
//! Transactions are executed directly against the committer state and flushed to storage either
//! after every transaction or periodically, depending on the configured commit interval.
use std::{
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
        Mutex as StdMutex,
        PoisonError,
    },
    time::Duration,
};

use eyre::{
    ensure,
    Result,
    WrapErr as _,
};
use tokio::{
    task::{
        JoinError,
        JoinHandle,
    },
    time::{
        Interval,
        MissedTickBehavior,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    error,
    info,
    instrument,
};

use crate::{
    app::{
        execute_tx,
        PanicHook,
        TxResponse,
    },
    chain::Blockchain,
    execution::{
        BatchCommitter,
        SharedCommitter,
    },
    transaction::Decoder,
};

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("process did not shut down within {0:?}")]
    TimedOut(Duration),
    #[error("process task failed")]
    Task(#[source] JoinError),
}

struct Shared {
    committer: SharedCommitter,
    decoder: Arc<dyn Decoder>,
    blockchain: Blockchain,
    panic_hook: PanicHook,
    /// Only read or written while holding the committer lock.
    commit_needed: AtomicBool,
    commit_after_each_tx: bool,
}

impl Shared {
    /// Flushes the committer if a transaction was accepted since the last flush.
    #[instrument(skip_all)]
    async fn commit(&self) -> Result<()> {
        let mut committer = self.committer.lock().await;
        self.commit_locked(&mut *committer).await
    }

    async fn commit_locked(&self, committer: &mut dyn BatchCommitter) -> Result<()> {
        if !self.commit_needed.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let last_block = match committer.commit(None).await {
            Ok(last_block) => last_block,
            Err(error) => {
                self.commit_needed.store(true, Ordering::SeqCst);
                return Err(error).wrap_err("committer failed to commit");
            }
        };
        info!(
            height = last_block.meta.height,
            app_hash = %last_block.app_hash,
            "committed block without consensus"
        );
        self.blockchain.commit_block(last_block)
    }

    fn fatal(&self, error: eyre::Report) {
        error!(
            error = AsRef::<dyn std::error::Error>::as_ref(&error),
            "fatal error in no-consensus process"
        );
        (self.panic_hook)(error);
    }
}

/// Accepts transactions and commits them without any consensus engine.
pub struct Process {
    shared: Arc<Shared>,
    cancellation_token: CancellationToken,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl Process {
    /// Starts the process. With no `commit_interval` every accepted transaction is committed
    /// immediately; otherwise a ticker commits pending transactions once per interval.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(
        committer: SharedCommitter,
        decoder: Arc<dyn Decoder>,
        blockchain: Blockchain,
        panic_hook: PanicHook,
        commit_interval: Option<Duration>,
    ) -> Self {
        let shared = Arc::new(Shared {
            committer,
            decoder,
            blockchain,
            panic_hook,
            commit_needed: AtomicBool::new(false),
            commit_after_each_tx: commit_interval.is_none(),
        });
        let cancellation_token = CancellationToken::new();
        let ticker = commit_interval.map(|period| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let task = tokio::spawn(run(shared.clone(), cancellation_token.clone(), ticker));
        Self {
            shared,
            cancellation_token,
            task: StdMutex::new(Some(task)),
        }
    }

    /// Executes `tx` against the committer state and passes the outcome to `callback`.
    ///
    /// # Errors
    /// Returns an error if the process was shut down. Execution failures are reported through
    /// `callback`.
    #[instrument(skip_all)]
    pub async fn check_tx<F>(&self, tx: &[u8], callback: F) -> Result<()>
    where
        F: FnOnce(TxResponse),
    {
        let mut committer = self.shared.committer.lock().await;
        // under the lock: the final flush runs after cancellation and takes this lock too
        ensure!(
            !self.cancellation_token.is_cancelled(),
            "process was shut down and accepts no more transactions"
        );
        let response = execute_tx(&mut *committer, &*self.shared.decoder, tx).await;
        if response.is_ok() {
            self.shared.commit_needed.store(true, Ordering::SeqCst);
        }
        callback(response);
        if self.shared.commit_after_each_tx {
            if let Err(error) = self.shared.commit_locked(&mut *committer).await {
                self.shared.fatal(error);
            }
        }
        Ok(())
    }

    /// Stops the ticker, commits pending transactions and waits for the background task to
    /// finish. Calling it again after it returned is a no-op.
    ///
    /// # Errors
    /// Returns an error if the background task did not finish within `timeout` or failed.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            debug!("process was already shut down");
            return Ok(());
        };
        self.cancellation_token.cancel();
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => {
                info!("process shut down");
                Ok(())
            }
            Ok(Err(error)) => Err(ShutdownError::Task(error)),
            Err(_) => Err(ShutdownError::TimedOut(timeout)),
        }
    }
}

async fn run(
    shared: Arc<Shared>,
    cancellation_token: CancellationToken,
    mut ticker: Option<Interval>,
) {
    loop {
        tokio::select! {
            biased;

            () = cancellation_token.cancelled() => break,

            () = tick(&mut ticker) => {
                if let Err(error) = shared.commit().await {
                    shared.fatal(error);
                }
            }
        }
    }
    if let Err(error) = shared.commit().await {
        shared.fatal(error.wrap_err("failed committing pending transactions on shutdown"));
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
