//! Transaction payloads, the envelope wrapping them, and the decoder that produces envelopes
//! from wire bytes.
//!
//! On the wire a transaction is a borsh encoded [`SignedTransaction`]: the borsh encoded
//! [`Payload`], the ed25519 verification key of its signer, and the signature over the payload
//! bytes. The payload's sender must be the address of the verification key.
use std::fmt;

use borsh::{
    BorshDeserialize,
    BorshSerialize,
};
use bytes::Bytes;
use ed25519_consensus::{
    Signature,
    SigningKey,
    VerificationKey,
};

use crate::primitive::{
    Address,
    TxHash,
    ValidatorKey,
    VALIDATOR_KEY_LEN,
};

const SIGNATURE_LEN: usize = 64;

/// The application specific content of a transaction.
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Transfers `amount` from `from` to `to`, creating `to` if it does not exist.
    Send {
        from: Address,
        to: Address,
        amount: u128,
        sequence: u64,
    },
    /// Calls the account at `address`, or creates a new contract holding `data` as its code if
    /// `address` is `None`.
    Call {
        from: Address,
        address: Option<Address>,
        data: Vec<u8>,
        amount: u128,
        sequence: u64,
    },
    /// Moves `amount` out of `from`'s balance and into the voting power of `validator`.
    Bond {
        from: Address,
        validator: ValidatorKey,
        amount: u128,
        sequence: u64,
    },
    /// Moves `amount` of `validator`'s voting power back into the balance of `from`. Only the
    /// account derived from the validator key may unbond.
    Unbond {
        from: Address,
        validator: ValidatorKey,
        amount: u128,
        sequence: u64,
    },
}

impl Payload {
    #[must_use]
    pub fn sender(&self) -> &Address {
        match self {
            Self::Send {
                from, ..
            }
            | Self::Call {
                from, ..
            }
            | Self::Bond {
                from, ..
            }
            | Self::Unbond {
                from, ..
            } => from,
        }
    }

    #[must_use]
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Send {
                sequence, ..
            }
            | Self::Call {
                sequence, ..
            }
            | Self::Bond {
                sequence, ..
            }
            | Self::Unbond {
                sequence, ..
            } => *sequence,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Send {
                ..
            } => "send",
            Self::Call {
                ..
            } => "call",
            Self::Bond {
                ..
            } => "bond",
            Self::Unbond {
                ..
            } => "unbond",
        }
    }

    /// Encodes the payload. These are the bytes covered by the signature.
    ///
    /// # Errors
    /// Returns an error if borsh serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, std::io::Error> {
        borsh::to_vec(self)
    }

    /// Signs the payload with `signing_key` and encodes the result into its wire format.
    ///
    /// The sender of the payload must be the address of `signing_key` for the transaction to be
    /// accepted.
    ///
    /// # Errors
    /// Returns an error if borsh serialization fails.
    pub fn sign(&self, signing_key: &SigningKey) -> Result<Vec<u8>, std::io::Error> {
        let payload = self.encode()?;
        let signature = signing_key.sign(&payload);
        borsh::to_vec(&SignedTransaction {
            payload,
            verification_key: signing_key.verification_key().to_bytes(),
            signature: signature.to_bytes(),
        })
    }
}

/// The wire format of a transaction.
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignedTransaction {
    pub payload: Vec<u8>,
    pub verification_key: [u8; VALIDATOR_KEY_LEN],
    pub signature: [u8; SIGNATURE_LEN],
}

/// A decoded transaction together with the bytes it was decoded from.
///
/// Envelopes are never mutated after decoding.
#[derive(Clone, Debug)]
pub struct Envelope {
    payload: Payload,
    hash: TxHash,
    raw: Bytes,
}

impl Envelope {
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[must_use]
    pub fn hash(&self) -> TxHash {
        self.hash
    }

    #[must_use]
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope{{hash: {}, kind: {}, from: {}, sequence: {}}}",
            self.hash,
            self.payload.kind(),
            self.payload.sender(),
            self.payload.sequence(),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("transaction bytes were empty")]
    Empty,
    #[error("failed decoding signed transaction")]
    SignedTransaction(#[source] std::io::Error),
    #[error("`verification_key` is not a valid ed25519 key")]
    VerificationKey(#[source] ed25519_consensus::Error),
    #[error("transaction could not be verified given the signature and verification key")]
    Signature(#[source] ed25519_consensus::Error),
    #[error("failed decoding transaction payload")]
    Payload(#[source] std::io::Error),
    #[error("transaction was signed by {signer} but sent from {sender}")]
    SignerMismatch {
        signer: Address,
        sender: Address,
    },
}

/// Turns wire bytes into envelopes.
///
/// Implementations must be deterministic and must reject malformed input with an error instead of
/// panicking.
pub trait Decoder: Send + Sync {
    /// Decodes `bytes` into an envelope.
    ///
    /// # Errors
    /// Returns an error if `bytes` is not a valid encoding of a transaction.
    fn decode_tx(&self, bytes: &[u8]) -> Result<Envelope, DecodeError>;
}

/// Decodes borsh-encoded [`SignedTransaction`]s, only producing envelopes whose signature
/// verifies and whose sender is the signer.
#[derive(Clone, Copy, Debug, Default)]
pub struct BorshDecoder;

impl Decoder for BorshDecoder {
    fn decode_tx(&self, bytes: &[u8]) -> Result<Envelope, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let SignedTransaction {
            payload,
            verification_key,
            signature,
        } = SignedTransaction::try_from_slice(bytes).map_err(DecodeError::SignedTransaction)?;
        VerificationKey::try_from(verification_key)
            .map_err(DecodeError::VerificationKey)?
            .verify(&Signature::from(signature), &payload)
            .map_err(DecodeError::Signature)?;
        let payload = Payload::try_from_slice(&payload).map_err(DecodeError::Payload)?;

        let signer = Address::from_public_key(&verification_key);
        if *payload.sender() != signer {
            return Err(DecodeError::SignerMismatch {
                signer,
                sender: *payload.sender(),
            });
        }
        Ok(Envelope {
            payload,
            hash: TxHash::of(bytes),
            raw: Bytes::copy_from_slice(bytes),
        })
    }
}
