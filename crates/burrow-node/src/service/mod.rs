//! `tower` services handed to the `tower-abci` server, one per ABCI connection.
pub(crate) mod consensus;
pub(crate) mod info;
pub(crate) mod mempool;
pub(crate) mod snapshot;

pub(crate) use consensus::{
    Consensus,
    Disabled as DisabledConsensus,
};
pub(crate) use info::Info;
pub(crate) use mempool::Mempool;
pub(crate) use snapshot::Snapshot;
