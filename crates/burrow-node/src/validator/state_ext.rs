use async_trait::async_trait;
use borsh::BorshDeserialize as _;
use cnidarium::{
    StateRead,
    StateWrite,
};
use eyre::{
    ensure,
    Result,
    WrapErr as _,
};
use tracing::instrument;

use super::Ring;
use crate::storage::anyhow_to_eyre;

const VALIDATOR_RING_KEY: &[u8] = b"burrow/validator_ring";

#[async_trait]
pub(crate) trait StateReadExt: StateRead {
    #[instrument(skip_all)]
    async fn get_validator_ring(&self) -> Result<Option<Ring>> {
        let Some(bytes) = self
            .nonverifiable_get_raw(VALIDATOR_RING_KEY)
            .await
            .map_err(anyhow_to_eyre)
            .wrap_err("failed reading raw validator ring from state")?
        else {
            return Ok(None);
        };
        let ring = Ring::try_from_slice(&bytes).wrap_err("invalid validator ring bytes")?;
        ensure!(
            !ring.is_empty() && ring.len() <= ring.capacity(),
            "stored validator ring holds {} sets but must hold between 1 and its capacity of {}",
            ring.len(),
            ring.capacity(),
        );
        Ok(Some(ring))
    }
}

impl<T: StateRead + ?Sized> StateReadExt for T {}

#[async_trait]
pub(crate) trait StateWriteExt: StateWrite {
    #[instrument(skip_all, fields(retained_sets = ring.len()))]
    fn put_validator_ring(&mut self, ring: &Ring) -> Result<()> {
        let bytes = borsh::to_vec(ring).wrap_err("failed to serialize validator ring")?;
        self.nonverifiable_put_raw(VALIDATOR_RING_KEY.to_vec(), bytes);
        Ok(())
    }
}

impl<T: StateWrite> StateWriteExt for T {}
