use async_trait::async_trait;
use borsh::{
    BorshDeserialize,
    BorshSerialize,
};
use cnidarium::{
    StateRead,
    StateWrite,
};
use eyre::{
    Result,
    WrapErr as _,
};
use tracing::instrument;

use crate::{
    primitive::{
        Address,
        ValidatorKey,
    },
    storage::anyhow_to_eyre,
};

const ACCOUNTS_PREFIX: &str = "accounts";
const VALIDATORS_PREFIX: &str = "validators";
const VALIDATOR_TOTALS_KEY: &str = "validator_totals";

/// Newtype wrapper to read and write a u128 balance from rocksdb.
#[derive(BorshSerialize, BorshDeserialize, Debug)]
struct Balance(u128);

/// Newtype wrapper to read and write a u64 sequence number from rocksdb.
#[derive(BorshSerialize, BorshDeserialize, Debug)]
struct Sequence(u64);

/// Newtype wrapper to read and write a u128 validator power from rocksdb.
#[derive(BorshSerialize, BorshDeserialize, Debug)]
struct Power(u128);

/// The number of validators with non-zero power and the sum of their powers.
#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ValidatorTotals {
    pub(crate) count: u64,
    pub(crate) power: u128,
}

fn account_key(address: &Address) -> String {
    format!("{ACCOUNTS_PREFIX}/{}", hex::encode(address.as_bytes()))
}

fn balance_key(address: &Address) -> String {
    format!("{}/balance", account_key(address))
}

fn sequence_key(address: &Address) -> String {
    format!("{}/sequence", account_key(address))
}

fn code_key(address: &Address) -> String {
    format!("{}/code", account_key(address))
}

fn power_key(validator: &ValidatorKey) -> String {
    format!(
        "{VALIDATORS_PREFIX}/{}/power",
        hex::encode(validator.as_bytes())
    )
}

#[async_trait]
pub(crate) trait StateReadExt: StateRead {
    /// An account exists once it has a sequence number, which every write path sets.
    #[instrument(skip_all, fields(%address))]
    async fn account_exists(&self, address: &Address) -> Result<bool> {
        Ok(self
            .get_raw(&sequence_key(address))
            .await
            .map_err(anyhow_to_eyre)
            .wrap_err("failed reading raw account sequence from state")?
            .is_some())
    }

    #[instrument(skip_all, fields(%address))]
    async fn get_account_balance(&self, address: &Address) -> Result<u128> {
        let Some(bytes) = self
            .get_raw(&balance_key(address))
            .await
            .map_err(anyhow_to_eyre)
            .wrap_err("failed reading raw account balance from state")?
        else {
            return Ok(0);
        };
        let Balance(balance) = Balance::try_from_slice(&bytes).wrap_err("invalid balance bytes")?;
        Ok(balance)
    }

    #[instrument(skip_all, fields(%address))]
    async fn get_account_sequence(&self, address: &Address) -> Result<u64> {
        let Some(bytes) = self
            .get_raw(&sequence_key(address))
            .await
            .map_err(anyhow_to_eyre)
            .wrap_err("failed reading raw account sequence from state")?
        else {
            return Ok(0);
        };
        let Sequence(sequence) =
            Sequence::try_from_slice(&bytes).wrap_err("invalid sequence bytes")?;
        Ok(sequence)
    }

    #[instrument(skip_all, fields(%address))]
    async fn get_account_code(&self, address: &Address) -> Result<Option<Vec<u8>>> {
        self.get_raw(&code_key(address))
            .await
            .map_err(anyhow_to_eyre)
            .wrap_err("failed reading raw account code from state")
    }

    #[instrument(skip_all, fields(%validator))]
    async fn get_validator_power(&self, validator: &ValidatorKey) -> Result<u128> {
        let Some(bytes) = self
            .get_raw(&power_key(validator))
            .await
            .map_err(anyhow_to_eyre)
            .wrap_err("failed reading raw validator power from state")?
        else {
            return Ok(0);
        };
        let Power(power) = Power::try_from_slice(&bytes).wrap_err("invalid power bytes")?;
        Ok(power)
    }

    #[instrument(skip_all)]
    async fn get_validator_totals(&self) -> Result<ValidatorTotals> {
        let Some(bytes) = self
            .get_raw(VALIDATOR_TOTALS_KEY)
            .await
            .map_err(anyhow_to_eyre)
            .wrap_err("failed reading raw validator totals from state")?
        else {
            return Ok(ValidatorTotals::default());
        };
        ValidatorTotals::try_from_slice(&bytes).wrap_err("invalid validator totals bytes")
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub(crate) trait StateWriteExt: StateWrite {
    #[instrument(skip(self))]
    fn put_account_balance(&mut self, address: &Address, balance: u128) -> Result<()> {
        let bytes = borsh::to_vec(&Balance(balance)).wrap_err("failed to serialize balance")?;
        self.put_raw(balance_key(address), bytes);
        Ok(())
    }

    #[instrument(skip(self))]
    fn put_account_sequence(&mut self, address: &Address, sequence: u64) -> Result<()> {
        let bytes = borsh::to_vec(&Sequence(sequence)).wrap_err("failed to serialize sequence")?;
        self.put_raw(sequence_key(address), bytes);
        Ok(())
    }

    #[instrument(skip(self, code), fields(code_len = code.len()))]
    fn put_account_code(&mut self, address: &Address, code: Vec<u8>) {
        self.put_raw(code_key(address), code);
    }

    #[instrument(skip(self))]
    fn put_validator_power(&mut self, validator: &ValidatorKey, power: u128) -> Result<()> {
        if power == 0 {
            self.delete(power_key(validator));
            return Ok(());
        }
        let bytes = borsh::to_vec(&Power(power)).wrap_err("failed to serialize power")?;
        self.put_raw(power_key(validator), bytes);
        Ok(())
    }

    #[instrument(skip(self))]
    fn put_validator_totals(&mut self, totals: ValidatorTotals) -> Result<()> {
        let bytes = borsh::to_vec(&totals).wrap_err("failed to serialize validator totals")?;
        self.put_raw(VALIDATOR_TOTALS_KEY.to_string(), bytes);
        Ok(())
    }
}

impl<T: StateWrite> StateWriteExt for T {}
