use std::sync::Arc;

use cnidarium::{
    ArcStateDeltaExt as _,
    Snapshot,
    StateDelta,
    StateRead,
    StateWrite,
};
use eyre::{
    eyre,
    OptionExt as _,
    Result,
    WrapErr as _,
};
use tracing::{
    debug,
    instrument,
};

use super::{
    state_ext::{
        StateReadExt as _,
        StateWriteExt as _,
    },
    AccountView,
    ErrorCode,
    Exception,
    Receipt,
};
use crate::{
    primitive::{
        Address,
        ValidatorKey,
    },
    transaction::{
        Envelope,
        Payload,
    },
    validator::{
        ValidatorSet,
        MAX_TOTAL_VOTING_POWER,
    },
};

/// Working state shared by the checker and the committer: a delta over the latest snapshot plus
/// the validator power changes made by the transactions applied to it.
pub(super) struct BatchState {
    state: Arc<StateDelta<Snapshot>>,
    validator_changes: ValidatorSet,
}

impl BatchState {
    pub(super) fn new(snapshot: Snapshot) -> Self {
        Self {
            state: Arc::new(StateDelta::new(snapshot)),
            validator_changes: ValidatorSet::new(),
        }
    }

    pub(super) fn validator_changes(&self) -> &ValidatorSet {
        &self.validator_changes
    }

    /// Unwraps the accumulated delta so it can be committed.
    pub(super) fn into_delta(self) -> Result<StateDelta<Snapshot>> {
        Arc::try_unwrap(self.state)
            .map_err(|_| eyre!("batch state is still referenced elsewhere; cannot commit it"))
    }

    pub(super) async fn account(&self, address: &Address) -> Result<AccountView> {
        Ok(AccountView {
            balance: self.state.get_account_balance(address).await?,
            sequence: self.state.get_account_sequence(address).await?,
        })
    }

    /// Applies `envelope` in a nested transaction that is only applied to the batch if execution
    /// succeeds.
    #[instrument(skip_all, fields(tx_hash = %envelope.hash(), kind = envelope.payload().kind()))]
    pub(super) async fn execute(&mut self, envelope: &Envelope) -> Result<Receipt> {
        let mut state_tx = self
            .state
            .try_begin_transaction()
            .ok_or_eyre("batch state is referenced elsewhere; cannot begin transaction")?;
        let Outcome {
            receipt,
            validator_change,
        } = execute_payload(&mut state_tx, envelope).await?;
        state_tx.apply();

        if let Some((validator, power)) = validator_change {
            // absolute powers, so bonding twice in one block keeps only the final value
            self.validator_changes.record_change(validator, power);
        }
        debug!("executed transaction");
        Ok(receipt)
    }
}

struct Outcome {
    receipt: Receipt,
    validator_change: Option<(ValidatorKey, u128)>,
}

fn exception(code: ErrorCode, message: impl Into<String>) -> eyre::Report {
    Exception::new(code, message).into()
}

async fn execute_payload<S: StateRead + StateWrite>(
    state: &mut S,
    envelope: &Envelope,
) -> Result<Outcome> {
    let payload = envelope.payload();
    let sender = *payload.sender();
    let sequence = check_and_increment_sequence(state, &sender, payload.sequence()).await?;

    let mut contract_address = None;
    let mut validator_change = None;
    match payload {
        Payload::Send {
            to,
            amount,
            ..
        } => transfer(state, &sender, to, *amount).await?,

        Payload::Call {
            address: Some(address),
            amount,
            ..
        } => {
            if !state.account_exists(address).await? {
                return Err(exception(
                    ErrorCode::UnknownAddress,
                    format!("call target {address} does not exist"),
                ));
            }
            transfer(state, &sender, address, *amount).await?;
        }

        Payload::Call {
            address: None,
            data,
            amount,
            ..
        } => {
            let contract = Address::for_contract(&sender, sequence);
            if state.account_exists(&contract).await? {
                return Err(exception(
                    ErrorCode::DuplicateAddress,
                    format!("contract address {contract} is already taken"),
                ));
            }
            state.put_account_sequence(&contract, 0)?;
            state.put_account_code(&contract, data.clone());
            transfer(state, &sender, &contract, *amount).await?;
            contract_address = Some(contract);
        }

        Payload::Bond {
            validator,
            amount,
            ..
        } => {
            debit(state, &sender, *amount).await?;
            let mut totals = state.get_validator_totals().await?;
            let previous = state.get_validator_power(validator).await?;
            // every power stays below the total, which tendermint bounds
            totals.power = totals
                .power
                .checked_add(*amount)
                .filter(|total| *total <= MAX_TOTAL_VOTING_POWER)
                .ok_or_else(|| {
                    exception(
                        ErrorCode::Overflow,
                        format!(
                            "bonding {amount} to validator {validator} raises the total voting \
                             power above {MAX_TOTAL_VOTING_POWER}"
                        ),
                    )
                })?;
            let power = previous.checked_add(*amount).ok_or_else(|| {
                exception(
                    ErrorCode::Overflow,
                    format!("bonding {amount} overflows the power of validator {validator}"),
                )
            })?;
            if previous == 0 && power > 0 {
                totals.count = totals.count.saturating_add(1);
            }
            state.put_validator_power(validator, power)?;
            state.put_validator_totals(totals)?;
            validator_change = Some((*validator, power));
        }

        Payload::Unbond {
            validator,
            amount,
            ..
        } => {
            if validator.address() != sender {
                return Err(exception(
                    ErrorCode::PermissionDenied,
                    format!("{sender} may not unbond validator {validator}"),
                ));
            }
            let power = state.get_validator_power(validator).await?;
            let remaining = power.checked_sub(*amount).ok_or_else(|| {
                exception(
                    ErrorCode::InsufficientPower,
                    format!("validator {validator} has power {power}, cannot unbond {amount}"),
                )
            })?;
            let mut totals = state.get_validator_totals().await?;
            totals.power = totals.power.saturating_sub(*amount);
            if power > 0 && remaining == 0 {
                totals.count = totals.count.saturating_sub(1);
                if totals.count == 0 {
                    return Err(exception(
                        ErrorCode::InsufficientPower,
                        format!("unbonding validator {validator} would leave no validators"),
                    ));
                }
            }
            state.put_validator_power(validator, remaining)?;
            state.put_validator_totals(totals)?;
            credit(state, &sender, *amount).await?;
            validator_change = Some((*validator, remaining));
        }
    }

    Ok(Outcome {
        receipt: Receipt {
            tx_hash: envelope.hash(),
            contract_address,
        },
        validator_change,
    })
}

/// Checks that `sequence` is exactly one above the sender's current sequence and stores it.
async fn check_and_increment_sequence<S: StateRead + StateWrite>(
    state: &mut S,
    sender: &Address,
    sequence: u64,
) -> Result<u64> {
    if !state.account_exists(sender).await? {
        return Err(exception(
            ErrorCode::UnknownAddress,
            format!("sender {sender} does not exist"),
        ));
    }
    let current = state
        .get_account_sequence(sender)
        .await
        .wrap_err("failed reading sender sequence")?;
    let expected = current.checked_add(1).ok_or_else(|| {
        exception(
            ErrorCode::Overflow,
            format!("sequence of {sender} is exhausted"),
        )
    })?;
    if sequence != expected {
        return Err(exception(
            ErrorCode::InvalidSequence,
            format!("expected sequence {expected} for {sender}, got {sequence}"),
        ));
    }
    state.put_account_sequence(sender, expected)?;
    Ok(expected)
}

async fn transfer<S: StateRead + StateWrite>(
    state: &mut S,
    from: &Address,
    to: &Address,
    amount: u128,
) -> Result<()> {
    debit(state, from, amount).await?;
    credit(state, to, amount).await
}

async fn debit<S: StateRead + StateWrite>(
    state: &mut S,
    address: &Address,
    amount: u128,
) -> Result<()> {
    let balance = state.get_account_balance(address).await?;
    let remaining = balance.checked_sub(amount).ok_or_else(|| {
        exception(
            ErrorCode::InsufficientBalance,
            format!("{address} has balance {balance}, needs {amount}"),
        )
    })?;
    state.put_account_balance(address, remaining)
}

/// Credits `address`, creating the account if it does not exist yet.
async fn credit<S: StateRead + StateWrite>(
    state: &mut S,
    address: &Address,
    amount: u128,
) -> Result<()> {
    if !state.account_exists(address).await? {
        state.put_account_sequence(address, 0)?;
    }
    let balance = state.get_account_balance(address).await?;
    let updated = balance.checked_add(amount).ok_or_else(|| {
        exception(
            ErrorCode::Overflow,
            format!("crediting {amount} overflows the balance of {address}"),
        )
    })?;
    state.put_account_balance(address, updated)
}
