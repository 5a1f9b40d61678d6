//! Validator sets and the history of validator sets across committed blocks.
mod ring;
pub(crate) mod state_ext;

use std::{
    collections::{
        btree_map,
        BTreeMap,
    },
    sync::{
        Arc,
        PoisonError,
        RwLock,
    },
};

use borsh::{
    BorshDeserialize,
    BorshSerialize,
};
use cnidarium::Storage;
use eyre::{
    OptionExt as _,
    Result,
};

pub use self::ring::Ring;
use self::state_ext::StateReadExt as _;
use crate::primitive::ValidatorKey;

/// Number of blocks between tendermint receiving a validator update in `EndBlock` and that
/// update being reflected in the votes tendermint reports.
pub const TENDERMINT_VALIDATOR_DELAY_IN_BLOCKS: usize = 2;

/// Number of blocks between a validator change being committed by the application and the
/// application reporting it to tendermint in `EndBlock`.
pub const BURROW_VALIDATOR_DELAY_IN_BLOCKS: usize = 1;

/// The total offset at which the application's validator history lines up with the votes
/// reported by tendermint in `BeginBlock`.
pub const TOTAL_VALIDATOR_DELAY_IN_BLOCKS: usize =
    TENDERMINT_VALIDATOR_DELAY_IN_BLOCKS + BURROW_VALIDATOR_DELAY_IN_BLOCKS;

/// The largest total voting power tendermint accepts for a validator set, `i64::MAX / 8`.
pub const MAX_TOTAL_VOTING_POWER: u128 = 1_152_921_504_606_846_975;

/// Voting power per validator.
///
/// When used as a set, validators with zero power are never stored. When used as a diff, a power
/// of zero marks a validator that was removed.
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorSet {
    powers: BTreeMap<ValidatorKey, u128>,
}

impl ValidatorSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the power of `key`, removing it if `power` is zero.
    pub fn set_power(&mut self, key: ValidatorKey, power: u128) {
        if power == 0 {
            self.powers.remove(&key);
        } else {
            self.powers.insert(key, power);
        }
    }

    /// Records `power` for `key` in a set used as a diff. Unlike [`Self::set_power`] a power of
    /// zero is kept, marking the validator for removal.
    pub fn record_change(&mut self, key: ValidatorKey, power: u128) {
        self.powers.insert(key, power);
    }

    #[must_use]
    pub fn power(&self, key: &ValidatorKey) -> u128 {
        self.powers.get(key).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.powers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.powers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ValidatorKey, u128)> {
        self.powers.iter().map(|(key, power)| (key, *power))
    }

    /// Sum of all powers, `None` on overflow.
    #[must_use]
    pub fn total_power(&self) -> Option<u128> {
        self.powers
            .values()
            .try_fold(0u128, |acc, power| acc.checked_add(*power))
    }

    /// Applies `changes` on top of this set. A power of zero in `changes` removes the validator.
    pub fn apply(&mut self, changes: &ValidatorSet) {
        for (key, power) in &changes.powers {
            self.set_power(*key, *power);
        }
    }

    /// Returns the changes that turn `previous` into `self`: every validator whose power differs,
    /// with validators missing from `self` reported at power zero.
    #[must_use]
    pub fn diff(&self, previous: &ValidatorSet) -> ValidatorSet {
        let mut changes = BTreeMap::new();
        for (key, power) in &self.powers {
            if previous.power(key) != *power {
                changes.insert(*key, *power);
            }
        }
        for key in previous.powers.keys() {
            if !self.powers.contains_key(key) {
                changes.insert(*key, 0);
            }
        }
        Self {
            powers: changes,
        }
    }
}

impl FromIterator<(ValidatorKey, u128)> for ValidatorSet {
    fn from_iter<T: IntoIterator<Item = (ValidatorKey, u128)>>(iter: T) -> Self {
        let mut set = Self::new();
        for (key, power) in iter {
            set.set_power(key, power);
        }
        set
    }
}

impl<'a> IntoIterator for &'a ValidatorSet {
    type IntoIter = btree_map::Iter<'a, ValidatorKey, u128>;
    type Item = (&'a ValidatorKey, &'a u128);

    fn into_iter(self) -> Self::IntoIter {
        self.powers.iter()
    }
}

/// Read access to the validator sets of past blocks.
pub trait ValidatorHistory: Send + Sync {
    /// The validator set as of `blocks_ago` commits before the latest one. `0` is the set after
    /// the latest commit. Offsets reaching before the retained history return the oldest set.
    fn validators(&self, blocks_ago: usize) -> ValidatorSet;

    /// The changes committed `blocks_ago` blocks ago, where `1` is the latest commit. `0` and
    /// offsets reaching before the retained history yield no changes.
    fn validator_changes(&self, blocks_ago: usize) -> ValidatorSet;
}

/// A shared handle to a [`Ring`], rotated by the committer and read by the ABCI app.
#[derive(Clone, Debug)]
pub struct History {
    ring: Arc<RwLock<Ring>>,
}

impl History {
    #[must_use]
    pub fn new(ring: Ring) -> Self {
        Self {
            ring: Arc::new(RwLock::new(ring)),
        }
    }

    /// Reads the validator ring written by the latest commit.
    ///
    /// # Errors
    /// Returns an error if storage holds no ring or it cannot be decoded.
    pub async fn load(storage: &Storage) -> Result<Self> {
        let ring = storage
            .latest_snapshot()
            .get_validator_ring()
            .await?
            .ok_or_eyre("no validator ring was committed to storage; was genesis applied?")?;
        Ok(Self::new(ring))
    }

    /// Returns a copy of the underlying ring.
    #[must_use]
    pub fn snapshot(&self) -> Ring {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the underlying ring.
    pub(crate) fn replace(&self, ring: Ring) {
        *self.ring.write().unwrap_or_else(PoisonError::into_inner) = ring;
    }
}

impl ValidatorHistory for History {
    fn validators(&self, blocks_ago: usize) -> ValidatorSet {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .validators(blocks_ago)
            .clone()
    }

    fn validator_changes(&self, blocks_ago: usize) -> ValidatorSet {
        self.ring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .changes(blocks_ago)
    }
}
