//! Glue between `cnidarium` and the rest of the crate.
//!
//! `cnidarium` reports errors as [`anyhow::Error`]. Everything in this crate uses [`eyre`], so
//! errors are converted at this boundary.
use std::path::PathBuf;

use cnidarium::{
    RootHash,
    Snapshot,
    StateDelta,
    Storage,
};
use eyre::{
    Result,
    WrapErr as _,
};
use tendermint::AppHash;

/// Converts an [`anyhow::Error`] into an [`eyre::Report`], preserving the chain of sources.
pub(crate) fn anyhow_to_eyre(anyhow_error: anyhow::Error) -> eyre::Report {
    let boxed: Box<dyn std::error::Error + Send + Sync> = anyhow_error.into();
    eyre::eyre!(boxed)
}

/// Opens (or creates) the rocksdb backed storage at `path`.
pub(crate) async fn load(path: PathBuf) -> Result<Storage> {
    Storage::load(path.clone(), vec![])
        .await
        .map_err(anyhow_to_eyre)
        .wrap_err_with(|| format!("failed to load storage at `{}`", path.display()))
}

/// Returns `true` if nothing was ever committed to `storage`.
pub(crate) fn is_uninitialized(storage: &Storage) -> bool {
    // cnidarium reports u64::MAX as the version of an empty database
    storage.latest_version() == u64::MAX
}

/// Commits `delta` to `storage`, returning the new root hash.
pub(crate) async fn commit(storage: &Storage, delta: StateDelta<Snapshot>) -> Result<RootHash> {
    storage
        .commit(delta)
        .await
        .map_err(anyhow_to_eyre)
        .wrap_err("failed to commit state delta to storage")
}

/// The app hash of the latest committed state.
pub(crate) async fn latest_app_hash(storage: &Storage) -> Result<AppHash> {
    let root_hash = storage
        .latest_snapshot()
        .root_hash()
        .await
        .map_err(anyhow_to_eyre)
        .wrap_err("failed to read root hash of latest snapshot")?;
    Ok(app_hash_from_root(root_hash))
}

pub(crate) fn app_hash_from_root(root_hash: RootHash) -> AppHash {
    AppHash::try_from(root_hash.0.to_vec()).unwrap_or_default()
}
