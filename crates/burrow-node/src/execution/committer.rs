use async_trait::async_trait;
use cnidarium::Storage;
use eyre::{
    ensure,
    OptionExt as _,
    Result,
};
use tendermint::Time;
use tracing::{
    info,
    instrument,
};

use super::{
    batch::BatchState,
    AccountView,
    BatchCommitter,
    Executor,
    Receipt,
};
use crate::{
    chain::{
        BlockMeta,
        LastBlock,
        StateReadExt as _,
        StateWriteExt as _,
    },
    primitive::Address,
    storage,
    transaction::Envelope,
    validator::{
        state_ext::StateWriteExt as _,
        History,
    },
};

/// Accumulates the effects of a block's transactions and commits them to storage.
pub struct Committer {
    storage: Storage,
    batch: BatchState,
    history: History,
}

impl Committer {
    /// Creates a committer over the latest state in `storage`. Every commit rotates `history`.
    #[must_use]
    pub fn new(storage: Storage, history: History) -> Self {
        let batch = BatchState::new(storage.latest_snapshot());
        Self {
            storage,
            batch,
            history,
        }
    }
}

#[async_trait]
impl Executor for Committer {
    async fn execute(&mut self, envelope: &Envelope) -> Result<Receipt> {
        self.batch.execute(envelope).await
    }
}

#[async_trait]
impl BatchCommitter for Committer {
    #[instrument(skip_all, fields(height))]
    async fn commit(&mut self, block: Option<&BlockMeta>) -> Result<LastBlock> {
        let snapshot = self.storage.latest_snapshot();
        let last = snapshot
            .get_last_block()
            .await?
            .ok_or_eyre("no block was committed to storage; was genesis applied?")?;
        let next_height = last
            .height
            .checked_add(1)
            .ok_or_eyre("block height overflowed")?;
        let meta = match block {
            Some(block) => block.clone(),
            None => BlockMeta {
                height: next_height,
                time: Time::now(),
                hash: None,
            },
        };
        tracing::Span::current().record("height", meta.height);
        ensure!(
            meta.height == next_height,
            "cannot commit block at height {} on top of height {}",
            meta.height,
            last.height,
        );

        let mut ring = self.history.snapshot();
        ring.rotate(self.batch.validator_changes());

        let batch = std::mem::replace(&mut self.batch, BatchState::new(snapshot));
        let mut delta = batch.into_delta()?;
        delta.put_last_block(&meta)?;
        delta.put_validator_ring(&ring)?;
        let root_hash = storage::commit(&self.storage, delta).await?;

        self.history.replace(ring);
        self.batch = BatchState::new(self.storage.latest_snapshot());

        let app_hash = storage::app_hash_from_root(root_hash);
        info!(%app_hash, "committed block");
        Ok(LastBlock {
            meta,
            app_hash,
        })
    }

    async fn account(&self, address: &Address) -> Result<AccountView> {
        self.batch.account(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        execution::{
            ErrorCode,
            Exception,
        },
        primitive::Address,
        test_utils::{
            alice,
            bob,
            bond,
            call,
            genesis,
            other_validator_key,
            send,
            storage_with,
            storage_with_genesis,
            stranger,
            unbond,
            validator_account,
            validator_key,
            ALICE_BALANCE,
            VALIDATOR_ACCOUNT_BALANCE,
            VALIDATOR_POWER,
        },
        validator::{
            ValidatorHistory as _,
            MAX_TOTAL_VOTING_POWER,
        },
    };

    async fn committer() -> (cnidarium::TempStorage, Committer, History) {
        let storage = storage_with_genesis().await;
        let history = History::load(&storage).await.unwrap();
        let committer = Committer::new(Storage::clone(&storage), history.clone());
        (storage, committer, history)
    }

    fn code_of(err: &eyre::Report) -> ErrorCode {
        Exception::from_report(err).code()
    }

    #[tokio::test]
    async fn commit_persists_effects_and_advances_height() {
        let (storage, mut committer, _) = committer().await;
        committer.execute(&send(alice(), bob(), 100, 1)).await.unwrap();

        let last_block = committer.commit(None).await.unwrap();
        assert_eq!(last_block.meta.height, 1);
        assert_eq!(
            last_block.app_hash,
            storage::latest_app_hash(&storage).await.unwrap()
        );
        assert_eq!(
            committer.account(&alice()).await.unwrap(),
            AccountView {
                balance: ALICE_BALANCE - 100,
                sequence: 1,
            }
        );
        assert_eq!(
            storage.latest_snapshot().get_last_block().await.unwrap(),
            Some(last_block.meta)
        );
    }

    #[tokio::test]
    async fn commit_rejects_non_consecutive_block() {
        let (_storage, mut committer, _) = committer().await;
        let block = BlockMeta {
            height: 5,
            time: Time::unix_epoch(),
            hash: None,
        };
        assert!(committer.commit(Some(&block)).await.is_err());
    }

    #[tokio::test]
    async fn failed_transaction_leaves_no_trace() {
        let (_storage, mut committer, _) = committer().await;
        let err = committer
            .execute(&send(alice(), bob(), ALICE_BALANCE + 1, 1))
            .await
            .unwrap_err();
        assert_eq!(code_of(&err), ErrorCode::InsufficientBalance);
        // the sequence bump of the failed transaction was discarded
        assert_eq!(committer.account(&alice()).await.unwrap().sequence, 0);
        committer.execute(&send(alice(), bob(), 1, 1)).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_sender_is_rejected() {
        let (_storage, mut committer, _) = committer().await;
        let err = committer
            .execute(&send(stranger(), bob(), 1, 1))
            .await
            .unwrap_err();
        assert_eq!(code_of(&err), ErrorCode::UnknownAddress);
    }

    #[tokio::test]
    async fn contract_creation_returns_address_and_call_requires_target() {
        let (_storage, mut committer, _) = committer().await;
        let receipt = committer
            .execute(&call(alice(), None, vec![0x60, 0x00], 5, 1))
            .await
            .unwrap();
        let contract = receipt.contract_address.unwrap();
        assert_eq!(contract, Address::for_contract(&alice(), 1));
        assert_eq!(committer.account(&contract).await.unwrap().balance, 5);

        committer
            .execute(&call(alice(), Some(contract), vec![], 1, 2))
            .await
            .unwrap();
        let missing = Address::new([0xcd; crate::primitive::ADDRESS_LEN]);
        let err = committer
            .execute(&call(alice(), Some(missing), vec![], 1, 3))
            .await
            .unwrap_err();
        assert_eq!(code_of(&err), ErrorCode::UnknownAddress);
    }

    #[tokio::test]
    async fn bonding_rotates_validator_history_on_commit() {
        let (_storage, mut committer, history) = committer().await;
        committer
            .execute(&bond(alice(), validator_key(), 50, 1))
            .await
            .unwrap();
        assert_eq!(history.validators(0).power(&validator_key()), VALIDATOR_POWER);

        committer.commit(None).await.unwrap();
        assert_eq!(
            history.validators(0).power(&validator_key()),
            VALIDATOR_POWER + 50
        );
        assert_eq!(
            history.validator_changes(1).power(&validator_key()),
            VALIDATOR_POWER + 50
        );
        assert_eq!(history.validators(1).power(&validator_key()), VALIDATOR_POWER);

        committer.commit(None).await.unwrap();
        assert!(history.validator_changes(1).is_empty());
        assert_eq!(history.validator_changes(2).len(), 1);
    }

    #[tokio::test]
    async fn only_the_validator_account_may_unbond() {
        let (_storage, mut committer, _) = committer().await;
        let err = committer
            .execute(&unbond(alice(), validator_key(), 1, 1))
            .await
            .unwrap_err();
        assert_eq!(code_of(&err), ErrorCode::PermissionDenied);

        let err = committer
            .execute(&unbond(
                validator_account(),
                validator_key(),
                VALIDATOR_POWER + 1,
                1,
            ))
            .await
            .unwrap_err();
        assert_eq!(code_of(&err), ErrorCode::InsufficientPower);

        committer
            .execute(&unbond(
                validator_account(),
                validator_key(),
                VALIDATOR_POWER - 1,
                1,
            ))
            .await
            .unwrap();
        committer.commit(None).await.unwrap();
        let changes = committer.history.validator_changes(1);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.power(&validator_key()), 1);
        assert_eq!(
            committer.account(&validator_account()).await.unwrap().balance,
            VALIDATOR_ACCOUNT_BALANCE + VALIDATOR_POWER - 1
        );
    }

    #[tokio::test]
    async fn the_last_validator_cannot_unbond_completely() {
        let (_storage, mut committer, history) = committer().await;
        let err = committer
            .execute(&unbond(validator_account(), validator_key(), VALIDATOR_POWER, 1))
            .await
            .unwrap_err();
        assert_eq!(code_of(&err), ErrorCode::InsufficientPower);

        // with a second validator bonded the first may leave
        committer
            .execute(&bond(alice(), other_validator_key(), 5, 1))
            .await
            .unwrap();
        committer
            .execute(&unbond(validator_account(), validator_key(), VALIDATOR_POWER, 1))
            .await
            .unwrap();
        committer.commit(None).await.unwrap();
        let changes = history.validator_changes(1);
        assert_eq!(changes.power(&validator_key()), 0);
        assert_eq!(changes.power(&other_validator_key()), 5);
        assert_eq!(history.validators(0).len(), 1);

        // now the other validator is the last one
        let other_account = other_validator_key().address();
        committer
            .execute(&send(alice(), other_account, 1, 2))
            .await
            .unwrap();
        let err = committer
            .execute(&unbond(other_account, other_validator_key(), 5, 1))
            .await
            .unwrap_err();
        assert_eq!(code_of(&err), ErrorCode::InsufficientPower);
    }

    #[tokio::test]
    async fn bonds_are_bounded_by_the_total_voting_power_tendermint_accepts() {
        let mut genesis = genesis();
        genesis.accounts[0].balance = u128::MAX;
        let storage = storage_with(&genesis).await;
        let history = History::load(&storage).await.unwrap();
        let mut committer = Committer::new(Storage::clone(&storage), history);
        let headroom = MAX_TOTAL_VOTING_POWER - VALIDATOR_POWER;

        let err = committer
            .execute(&bond(alice(), other_validator_key(), headroom + 1, 1))
            .await
            .unwrap_err();
        assert_eq!(code_of(&err), ErrorCode::Overflow);
        committer
            .execute(&bond(alice(), other_validator_key(), headroom, 1))
            .await
            .unwrap();
        let err = committer
            .execute(&bond(alice(), validator_key(), 1, 2))
            .await
            .unwrap_err();
        assert_eq!(code_of(&err), ErrorCode::Overflow);
        assert_eq!(
            committer.account(&alice()).await.unwrap().balance,
            u128::MAX - headroom
        );
    }
}
