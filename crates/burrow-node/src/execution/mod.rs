//! Execution of transactions against the two working copies of state.
//!
//! The [`Checker`] holds speculative state used to admit transactions into the mempool. It is
//! thrown away and re-forked from the latest committed state after every commit. The
//! [`Committer`] accumulates the effects of the transactions of a block and flushes them to
//! storage atomically on commit.
//!
//! Both are shared behind a [`tokio::sync::Mutex`] which is the only way to reach them: holding the
//! guard is the batch lock.
mod batch;
mod checker;
mod committer;
mod exception;
pub(crate) mod state_ext;

use std::sync::Arc;

use async_trait::async_trait;
use borsh::{
    BorshDeserialize,
    BorshSerialize,
};
use eyre::Result;
use tokio::sync::Mutex;

pub use self::{
    checker::Checker,
    committer::Committer,
    exception::{
        ErrorCode,
        Exception,
    },
};
use crate::{
    chain::{
        BlockMeta,
        LastBlock,
    },
    primitive::{
        Address,
        TxHash,
    },
    transaction::Envelope,
};

/// The result of successfully executing a transaction.
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    /// Set if the transaction created a contract.
    pub contract_address: Option<Address>,
}

impl Receipt {
    #[must_use]
    pub fn creates_contract(&self) -> bool {
        self.contract_address.is_some()
    }

    /// Serializes the receipt for inclusion in an ABCI response.
    ///
    /// # Errors
    /// Returns an error if borsh serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, std::io::Error> {
        borsh::to_vec(self)
    }
}

/// The balance and sequence number of an account as seen by a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccountView {
    pub balance: u128,
    pub sequence: u64,
}

/// Applies single transactions to some working state.
#[async_trait]
pub trait Executor: Send {
    /// Applies the effects of `envelope` to the working state.
    ///
    /// Must be deterministic given identical starting state and envelope. A failed transaction
    /// leaves the working state untouched.
    ///
    /// # Errors
    /// Returns an error wrapping an [`Exception`] if the transaction is invalid against the
    /// working state, or any other error if the state could not be read or written.
    async fn execute(&mut self, envelope: &Envelope) -> Result<Receipt>;
}

/// An executor over speculative state that can be discarded.
#[async_trait]
pub trait BatchExecutor: Executor {
    /// Discards all speculative effects and re-forks the working state from the latest commit.
    ///
    /// # Errors
    /// Returns an error if the latest committed state could not be read.
    async fn reset(&mut self) -> Result<()>;

    /// Reads `address` from the working state.
    ///
    /// # Errors
    /// Returns an error if the working state could not be read.
    async fn account(&self, address: &Address) -> Result<AccountView>;
}

/// An executor whose accumulated effects are flushed to storage as a block.
#[async_trait]
pub trait BatchCommitter: Executor {
    /// Atomically applies all effects accumulated since the last commit together with the
    /// metadata of `block`, returning the committed block and the resulting app hash.
    ///
    /// Without a `block` the next height and the current wall clock time are used.
    ///
    /// # Errors
    /// Returns an error if the block does not follow the last committed block or if storage
    /// rejected the commit. The working state must not be used after an error.
    async fn commit(&mut self, block: Option<&BlockMeta>) -> Result<LastBlock>;

    /// Reads `address` from the working state.
    ///
    /// # Errors
    /// Returns an error if the working state could not be read.
    async fn account(&self, address: &Address) -> Result<AccountView>;
}

pub type SharedExecutor = Arc<Mutex<dyn BatchExecutor>>;
pub type SharedCommitter = Arc<Mutex<dyn BatchCommitter>>;
