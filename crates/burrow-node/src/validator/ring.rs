use std::collections::VecDeque;

use borsh::{
    BorshDeserialize,
    BorshSerialize,
};

use super::{
    ValidatorSet,
    TOTAL_VALIDATOR_DELAY_IN_BLOCKS,
};

/// Number of committed validator sets retained by default. Must reach at least one block past the
/// total validator delay so that both the delayed set and the delta leading to it are known.
pub const DEFAULT_CAPACITY: usize = TOTAL_VALIDATOR_DELAY_IN_BLOCKS + 2;

/// A bounded history of committed validator sets, latest first.
///
/// The ring is never empty: it is seeded with the genesis set and every commit pushes a new set.
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct Ring {
    capacity: u32,
    sets: VecDeque<ValidatorSet>,
}

impl Ring {
    /// Creates a ring containing only `genesis`. A `capacity` below 2 is raised to 2.
    #[must_use]
    pub fn new(genesis: ValidatorSet, capacity: u32) -> Self {
        let mut sets = VecDeque::new();
        sets.push_back(genesis);
        Self {
            capacity: capacity.max(2),
            sets,
        }
    }

    #[must_use]
    pub fn with_default_capacity(genesis: ValidatorSet) -> Self {
        Self::new(genesis, u32::try_from(DEFAULT_CAPACITY).unwrap_or(u32::MAX))
    }

    /// The latest committed set.
    #[must_use]
    pub fn current(&self) -> &ValidatorSet {
        self.validators(0)
    }

    /// The set committed `blocks_ago` commits before the latest, clamped to the oldest retained.
    #[must_use]
    pub fn validators(&self, blocks_ago: usize) -> &ValidatorSet {
        let index = blocks_ago.min(self.sets.len().saturating_sub(1));
        &self.sets[index]
    }

    /// The delta committed `blocks_ago` blocks ago; `1` is the latest commit.
    #[must_use]
    pub fn changes(&self, blocks_ago: usize) -> ValidatorSet {
        if blocks_ago == 0 || blocks_ago >= self.sets.len() {
            return ValidatorSet::new();
        }
        self.sets[blocks_ago - 1].diff(&self.sets[blocks_ago])
    }

    /// Commits a new set consisting of the latest set with `changes` applied, dropping the oldest
    /// set if the ring is full.
    pub fn rotate(&mut self, changes: &ValidatorSet) {
        let mut next = self.current().clone();
        next.apply(changes);
        self.sets.push_front(next);
        while self.sets.len() > self.capacity as usize {
            self.sets.pop_back();
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
