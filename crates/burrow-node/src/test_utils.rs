use std::sync::{
    Arc,
    Mutex as StdMutex,
};

use cnidarium::{
    Storage,
    TempStorage,
};
use ed25519_consensus::SigningKey;
use tendermint::Time;
use tokio::sync::Mutex;

use crate::{
    app::{
        App,
        Components,
        ConfiguredPeers,
        PanicHook,
    },
    chain::Blockchain,
    execution::{
        Checker,
        Committer,
    },
    genesis::{
        self,
        GenesisAccount,
        GenesisDoc,
        GenesisValidator,
    },
    primitive::{
        Address,
        ValidatorKey,
    },
    transaction::{
        BorshDecoder,
        Decoder as _,
        Envelope,
        Payload,
    },
    validator::History,
};

pub(crate) const ALICE_BALANCE: u128 = 1_000_000;
pub(crate) const BOB_BALANCE: u128 = 1_000;
pub(crate) const VALIDATOR_ACCOUNT_BALANCE: u128 = 500;
pub(crate) const VALIDATOR_POWER: u128 = 10;
pub(crate) const CHAIN_ID: &str = "burrow-test";
pub(crate) const NODE_INFO: &str = "burrow-test-node";

fn address_of(signing_key: &SigningKey) -> Address {
    Address::from_public_key(&signing_key.verification_key().to_bytes())
}

fn signing_key_from_hex(hex_key: &str) -> SigningKey {
    let seed: [u8; 32] = hex::decode(hex_key).unwrap().try_into().unwrap();
    SigningKey::from(seed)
}

pub(crate) fn alice_signing_key() -> SigningKey {
    SigningKey::from([0xa1; 32])
}

pub(crate) fn alice() -> Address {
    address_of(&alice_signing_key())
}

pub(crate) fn bob_signing_key() -> SigningKey {
    SigningKey::from([0xb0; 32])
}

pub(crate) fn bob() -> Address {
    address_of(&bob_signing_key())
}

/// Signs valid transactions but holds no account in genesis.
pub(crate) fn stranger_signing_key() -> SigningKey {
    SigningKey::from([0xee; 32])
}

pub(crate) fn stranger() -> Address {
    address_of(&stranger_signing_key())
}

/// The secret key of the first RFC 8032 ed25519 test vector, the single genesis validator.
pub(crate) fn validator_signing_key() -> SigningKey {
    signing_key_from_hex("9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60")
}

pub(crate) fn validator_key() -> ValidatorKey {
    ValidatorKey::new(validator_signing_key().verification_key().to_bytes())
}

/// The secret key of the second RFC 8032 ed25519 test vector, not part of genesis.
pub(crate) fn other_validator_signing_key() -> SigningKey {
    signing_key_from_hex("4ccd089b28ff96da9db6c346ec114e0f5b8a319f35aba624da8cf6ed4fb8a6fb")
}

pub(crate) fn other_validator_key() -> ValidatorKey {
    ValidatorKey::new(other_validator_signing_key().verification_key().to_bytes())
}

/// The account controlled by the genesis validator.
pub(crate) fn validator_account() -> Address {
    validator_key().address()
}

pub(crate) fn genesis() -> GenesisDoc {
    GenesisDoc {
        chain_id: CHAIN_ID.to_string(),
        genesis_time: Time::unix_epoch(),
        accounts: vec![
            GenesisAccount {
                address: alice(),
                balance: ALICE_BALANCE,
            },
            GenesisAccount {
                address: bob(),
                balance: BOB_BALANCE,
            },
            GenesisAccount {
                address: validator_account(),
                balance: VALIDATOR_ACCOUNT_BALANCE,
            },
        ],
        validators: vec![GenesisValidator {
            pub_key: validator_key(),
            power: VALIDATOR_POWER,
        }],
    }
}

pub(crate) async fn storage_with_genesis() -> TempStorage {
    storage_with(&genesis()).await
}

pub(crate) async fn storage_with(genesis: &GenesisDoc) -> TempStorage {
    let storage = TempStorage::new().await.unwrap();
    genesis::apply(&storage, genesis).await.unwrap();
    storage
}

/// The key of whichever test account sent `payload`.
fn signing_key_of(payload: &Payload) -> SigningKey {
    [
        alice_signing_key(),
        bob_signing_key(),
        stranger_signing_key(),
        validator_signing_key(),
        other_validator_signing_key(),
    ]
    .into_iter()
    .find(|key| address_of(key) == *payload.sender())
    .expect("payloads in tests must be sent by one of the test accounts")
}

/// Signs `payload` with its sender's key and decodes it.
pub(crate) fn envelope(payload: &Payload) -> Envelope {
    let bytes = payload.sign(&signing_key_of(payload)).unwrap();
    BorshDecoder.decode_tx(&bytes).unwrap()
}

pub(crate) fn send(from: Address, to: Address, amount: u128, sequence: u64) -> Envelope {
    envelope(&Payload::Send {
        from,
        to,
        amount,
        sequence,
    })
}

pub(crate) fn call(
    from: Address,
    address: Option<Address>,
    data: Vec<u8>,
    amount: u128,
    sequence: u64,
) -> Envelope {
    envelope(&Payload::Call {
        from,
        address,
        data,
        amount,
        sequence,
    })
}

pub(crate) fn bond(
    from: Address,
    validator: ValidatorKey,
    amount: u128,
    sequence: u64,
) -> Envelope {
    envelope(&Payload::Bond {
        from,
        validator,
        amount,
        sequence,
    })
}

pub(crate) fn unbond(
    from: Address,
    validator: ValidatorKey,
    amount: u128,
    sequence: u64,
) -> Envelope {
    envelope(&Payload::Unbond {
        from,
        validator,
        amount,
        sequence,
    })
}

/// A panic hook that records every fatal error it receives.
pub(crate) fn recording_panic_hook(errors: Arc<StdMutex<Vec<String>>>) -> PanicHook {
    Arc::new(move |error: eyre::Report| {
        errors.lock().unwrap().push(format!("{error:#}"));
    })
}

/// A fully wired [`App`] over temporary storage initialized with [`genesis`].
pub(crate) struct Fixture {
    pub(crate) storage: TempStorage,
    pub(crate) app: Arc<App>,
    pub(crate) checker: Arc<Mutex<Checker>>,
    pub(crate) committer: Arc<Mutex<Committer>>,
    pub(crate) history: History,
    pub(crate) blockchain: Blockchain,
    /// Every error passed to the panic hook, rendered.
    pub(crate) fatal_errors: Arc<StdMutex<Vec<String>>>,
    mempool_lock: Option<Arc<Mutex<()>>>,
}

impl Fixture {
    pub(crate) async fn new() -> Self {
        Self::build(&genesis(), None).await
    }

    pub(crate) async fn with_mempool_lock(mempool_lock: Option<Arc<Mutex<()>>>) -> Self {
        Self::build(&genesis(), mempool_lock).await
    }

    pub(crate) async fn with_genesis(genesis: &GenesisDoc) -> Self {
        Self::build(genesis, None).await
    }

    async fn build(genesis: &GenesisDoc, mempool_lock: Option<Arc<Mutex<()>>>) -> Self {
        let storage = storage_with(genesis).await;
        let history = History::load(&storage).await.unwrap();
        let blockchain = Blockchain::load(&storage).await.unwrap();
        let checker = Arc::new(Mutex::new(Checker::new(Storage::clone(&storage))));
        let committer = Arc::new(Mutex::new(Committer::new(
            Storage::clone(&storage),
            history.clone(),
        )));
        let fatal_errors = Arc::new(StdMutex::new(Vec::new()));
        let app = Arc::new(App::new(Components {
            checker: checker.clone(),
            committer: committer.clone(),
            validators: Arc::new(history.clone()),
            decoder: Arc::new(BorshDecoder),
            peers: Arc::new(ConfiguredPeers::default()),
            blockchain: blockchain.clone(),
            mempool_lock: mempool_lock.clone(),
            panic_hook: recording_panic_hook(fatal_errors.clone()),
            node_info: NODE_INFO.to_string(),
        }));
        Self {
            storage,
            app,
            checker,
            committer,
            history,
            blockchain,
            fatal_errors,
            mempool_lock,
        }
    }

    /// The collaborators of the fixture's app, for building apps with some of them replaced.
    pub(crate) fn components(&self) -> Components {
        Components {
            checker: self.checker.clone(),
            committer: self.committer.clone(),
            validators: Arc::new(self.history.clone()),
            decoder: Arc::new(BorshDecoder),
            peers: Arc::new(ConfiguredPeers::default()),
            blockchain: self.blockchain.clone(),
            mempool_lock: self.mempool_lock.clone(),
            panic_hook: recording_panic_hook(self.fatal_errors.clone()),
            node_info: NODE_INFO.to_string(),
        }
    }

    pub(crate) fn fatal_errors(&self) -> Vec<String> {
        self.fatal_errors.lock().unwrap().clone()
    }
}
