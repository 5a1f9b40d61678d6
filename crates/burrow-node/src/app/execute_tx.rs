use bytes::Bytes;
use tendermint::{
    abci::{
        Event,
        EventAttributeIndexExt as _,
    },
    v0_34::abci::response,
};
use tracing::{
    debug,
    warn,
};

use super::AbciCode;
use crate::{
    execution::{
        Exception,
        Executor,
    },
    transaction::Decoder,
};

pub(crate) const TX_EVENT_KIND: &str = "tx";
pub(crate) const TX_HASH_ATTRIBUTE: &str = "hash";
pub(crate) const CREATED_CONTRACT_ADDRESS_ATTRIBUTE: &str = "created_contract_address";
pub(crate) const SUCCESS_LOG: &str = "execution successful";

/// The outcome of decoding and executing one transaction, shared by every path that accepts
/// transactions.
#[derive(Clone, Debug)]
pub struct TxResponse {
    pub code: AbciCode,
    pub events: Vec<Event>,
    pub log: String,
    pub info: String,
    pub data: Bytes,
}

impl TxResponse {
    fn error(code: AbciCode, events: Vec<Event>, log: String) -> Self {
        Self {
            code,
            events,
            log,
            info: code.info(),
            data: Bytes::new(),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == AbciCode::OK
    }
}

/// Decodes `tx` and executes it with `executor`.
///
/// The caller must hold the lock of the batch that `executor` belongs to.
pub async fn execute_tx<E>(executor: &mut E, decoder: &dyn Decoder, tx: &[u8]) -> TxResponse
where
    E: Executor + ?Sized,
{
    let envelope = match decoder.decode_tx(tx) {
        Ok(envelope) => envelope,
        Err(error) => {
            debug!(
                error = &error as &dyn std::error::Error,
                "failed decoding transaction"
            );
            return TxResponse::error(
                AbciCode::ENCODING_ERROR,
                vec![],
                format!("failed decoding transaction: {error}"),
            );
        }
    };

    let hash = envelope.hash().to_string();
    let mut attributes = vec![(TX_HASH_ATTRIBUTE, hash).index()];

    let receipt = match executor.execute(&envelope).await {
        Ok(receipt) => receipt,
        Err(error) => {
            let exception = Exception::from_report(&error);
            warn!(%envelope, %exception, "transaction failed to execute");
            return TxResponse::error(
                AbciCode::TX_EXECUTION_ERROR,
                vec![Event::new(TX_EVENT_KIND, attributes)],
                format!("{envelope}: {exception}"),
            );
        }
    };

    if let Some(address) = receipt.contract_address {
        attributes.push((CREATED_CONTRACT_ADDRESS_ATTRIBUTE, address.to_string()).index());
    }
    let events = vec![Event::new(TX_EVENT_KIND, attributes)];
    let data = match receipt.encode() {
        Ok(data) => data,
        Err(error) => {
            warn!(
                %envelope,
                error = &error as &dyn std::error::Error,
                "failed encoding receipt"
            );
            return TxResponse::error(
                AbciCode::ENCODING_ERROR,
                events,
                format!("{envelope}: failed encoding receipt: {error}"),
            );
        }
    };

    debug!(%envelope, "transaction executed");
    TxResponse {
        code: AbciCode::OK,
        events,
        log: SUCCESS_LOG.to_string(),
        info: String::new(),
        data: data.into(),
    }
}

impl From<TxResponse> for response::CheckTx {
    fn from(tx_response: TxResponse) -> Self {
        Self {
            code: tx_response.code.into(),
            data: tx_response.data,
            log: tx_response.log,
            info: tx_response.info,
            events: tx_response.events,
            ..Self::default()
        }
    }
}

impl From<TxResponse> for response::DeliverTx {
    fn from(tx_response: TxResponse) -> Self {
        Self {
            code: tx_response.code.into(),
            data: tx_response.data,
            log: tx_response.log,
            info: tx_response.info,
            events: tx_response.events,
            ..Self::default()
        }
    }
}
