//! The genesis document and writing it to empty storage.
use std::{
    collections::BTreeSet,
    path::Path,
};

use cnidarium::{
    StateDelta,
    Storage,
};
use eyre::{
    ensure,
    OptionExt as _,
    Result,
    WrapErr as _,
};
use serde::{
    Deserialize,
    Serialize,
};
use tendermint::Time;
use tracing::{
    info,
    instrument,
};

use crate::{
    chain::{
        BlockMeta,
        LastBlock,
        StateWriteExt as _,
    },
    execution::state_ext::{
        StateWriteExt as _,
        ValidatorTotals,
    },
    primitive::{
        Address,
        ValidatorKey,
    },
    storage,
    validator::{
        state_ext::StateWriteExt as _,
        Ring,
        ValidatorSet,
        MAX_TOTAL_VOTING_POWER,
    },
};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GenesisAccount {
    pub address: Address,
    pub balance: u128,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GenesisValidator {
    pub pub_key: ValidatorKey,
    pub power: u128,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GenesisDoc {
    pub chain_id: String,
    pub genesis_time: Time,
    #[serde(default)]
    pub accounts: Vec<GenesisAccount>,
    #[serde(default)]
    pub validators: Vec<GenesisValidator>,
}

impl GenesisDoc {
    /// Reads a JSON genesis document from `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid JSON, or lists an account or
    /// validator twice.
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .wrap_err_with(|| format!("failed reading genesis file `{}`", path.display()))?;
        Self::from_json(&bytes)
    }

    /// Parses a JSON genesis document.
    ///
    /// # Errors
    /// Returns an error if `bytes` is not a valid genesis document, lists an account or
    /// validator twice, or its validators' powers are zero or exceed the total tendermint
    /// accepts.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let genesis: Self =
            serde_json::from_slice(bytes).wrap_err("failed parsing genesis document")?;
        let mut addresses = BTreeSet::new();
        for account in &genesis.accounts {
            ensure!(
                addresses.insert(account.address),
                "genesis account {} is listed twice",
                account.address,
            );
        }
        let mut keys = BTreeSet::new();
        for validator in &genesis.validators {
            ensure!(
                keys.insert(validator.pub_key),
                "genesis validator {} is listed twice",
                validator.pub_key,
            );
            ensure!(
                validator.pub_key.to_tendermint().is_some(),
                "genesis validator {} is not a valid ed25519 public key",
                validator.pub_key,
            );
            ensure!(
                validator.power > 0,
                "genesis validator {} has zero power",
                validator.pub_key,
            );
        }
        let total_power = genesis.validator_set().total_power();
        ensure!(
            total_power.is_some_and(|total| total <= MAX_TOTAL_VOTING_POWER),
            "total power of genesis validators exceeds {MAX_TOTAL_VOTING_POWER}",
        );
        Ok(genesis)
    }

    #[must_use]
    pub fn validator_set(&self) -> ValidatorSet {
        self.validators
            .iter()
            .map(|validator| (validator.pub_key, validator.power))
            .collect()
    }
}

/// Writes `genesis` to empty `storage` and commits it as block 0.
///
/// # Errors
/// Returns an error if `storage` already contains state or the commit failed.
#[instrument(skip_all, fields(chain_id = %genesis.chain_id))]
pub async fn apply(storage: &Storage, genesis: &GenesisDoc) -> Result<LastBlock> {
    ensure!(
        storage::is_uninitialized(storage),
        "refusing to apply genesis on top of existing state"
    );
    let mut delta = StateDelta::new(storage.latest_snapshot());
    for account in &genesis.accounts {
        delta.put_account_sequence(&account.address, 0)?;
        delta.put_account_balance(&account.address, account.balance)?;
    }
    let validators = genesis.validator_set();
    for (key, power) in &validators {
        delta.put_validator_power(key, *power)?;
    }
    delta.put_validator_totals(ValidatorTotals {
        count: u64::try_from(validators.len()).wrap_err("too many genesis validators")?,
        power: validators
            .total_power()
            .ok_or_eyre("total power of genesis validators overflows")?,
    })?;
    delta.put_validator_ring(&Ring::with_default_capacity(validators))?;
    let meta = BlockMeta {
        height: 0,
        time: genesis.genesis_time,
        hash: None,
    };
    delta.put_last_block(&meta)?;

    let root_hash = storage::commit(storage, delta).await?;
    let app_hash = storage::app_hash_from_root(root_hash);
    info!(%app_hash, "applied genesis");
    Ok(LastBlock {
        meta,
        app_hash,
    })
}
