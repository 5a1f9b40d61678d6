use async_trait::async_trait;
use cnidarium::Storage;
use eyre::Result;
use tracing::{
    debug,
    instrument,
};

use super::{
    batch::BatchState,
    AccountView,
    BatchExecutor,
    Executor,
    Receipt,
};
use crate::{
    primitive::Address,
    transaction::Envelope,
};

/// Executes transactions against speculative state to decide mempool admission.
pub struct Checker {
    storage: Storage,
    batch: BatchState,
}

impl Checker {
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        let batch = BatchState::new(storage.latest_snapshot());
        Self {
            storage,
            batch,
        }
    }
}

#[async_trait]
impl Executor for Checker {
    async fn execute(&mut self, envelope: &Envelope) -> Result<Receipt> {
        self.batch.execute(envelope).await
    }
}

#[async_trait]
impl BatchExecutor for Checker {
    #[instrument(skip_all)]
    async fn reset(&mut self) -> Result<()> {
        self.batch = BatchState::new(self.storage.latest_snapshot());
        debug!(
            version = self.storage.latest_version(),
            "re-forked checker state"
        );
        Ok(())
    }

    async fn account(&self, address: &Address) -> Result<AccountView> {
        self.batch.account(address).await
    }
}
