//! Deterministic in-memory harness for protocol testing.
//!
//! Supplies test implementations of every collaborator interface: a manual
//! clock with seeded RNG, and a transport that invokes the relay validator
//! in-process under a fixed caller identity (standing in for the
//! bearer-token layer). No network, no real time; a seed reproduces a run
//! exactly.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use rand::{rngs::StdRng, RngCore, SeedableRng};

use cloak_client::{Client, ClientConfig, KeyStore as _, MemoryKeyStore};
use cloak_core::{CoreError, Environment, Transport, TransportError};
use cloak_crypto::SigningKeyPair;
use cloak_proto::{
    ConfirmRequest, ConfirmResponse, InitiateRequest, InitiateResponse, MessageAccepted,
    MessageSubmission, PendingSession, RespondRequest, RespondResponse, SessionView, StatusView,
    StoredMessage,
};
use cloak_relay::{
    Caller, MemoryAudit, MemoryDirectory, MemoryLedger, Validator, ValidatorConfig,
};

/// Wall-clock start of every simulated run.
pub const START_MS: u64 = 1_700_000_000_000;

/// Manual-clock environment with seeded randomness.
///
/// `sleep` advances the virtual clock instead of waiting, so poll loops
/// run at full speed and deadline behavior stays testable.
#[derive(Clone)]
pub struct TestEnv {
    now: Arc<AtomicU64>,
    rng: Arc<Mutex<StdRng>>,
}

impl TestEnv {
    /// Create an environment seeded for reproducibility. The seed is
    /// logged so failures can be replayed.
    pub fn with_seed(seed: u64) -> Self {
        tracing::debug!(seed, "test environment created");
        Self {
            now: Arc::new(AtomicU64::new(START_MS)),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Advance the virtual clock.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::Relaxed);
    }
}

impl Environment for TestEnv {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration.as_millis() as u64);
        async {}
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).fill_bytes(buffer);
    }
}

/// The validator type every harness component shares.
pub type TestValidator = Validator<TestEnv, MemoryDirectory, MemoryLedger, MemoryAudit>;

/// In-process transport bound to one caller identity.
///
/// Models an authenticated HTTPS client: the bearer-token layer resolved
/// the identity, every call lands on the validator directly.
#[derive(Clone)]
pub struct LocalTransport {
    user_id: String,
    ip: String,
    validator: Arc<TestValidator>,
}

impl LocalTransport {
    /// Bind a transport to a caller identity.
    pub fn new(user_id: &str, ip: &str, validator: Arc<TestValidator>) -> Self {
        Self { user_id: user_id.to_string(), ip: ip.to_string(), validator }
    }

    fn caller(&self) -> Caller<'_> {
        Caller { user_id: &self.user_id, ip: &self.ip }
    }
}

fn to_transport(err: CoreError) -> TransportError {
    TransportError::new(err.code(), err.to_string())
}

impl Transport for LocalTransport {
    fn initiate(
        &self,
        request: &InitiateRequest,
    ) -> impl std::future::Future<Output = Result<InitiateResponse, TransportError>> + Send {
        let result = self.validator.initiate(self.caller(), request).map_err(to_transport);
        async move { result }
    }

    fn respond(
        &self,
        request: &RespondRequest,
    ) -> impl std::future::Future<Output = Result<RespondResponse, TransportError>> + Send {
        let result = self.validator.respond(self.caller(), request).map_err(to_transport);
        async move { result }
    }

    fn confirm(
        &self,
        request: &ConfirmRequest,
    ) -> impl std::future::Future<Output = Result<ConfirmResponse, TransportError>> + Send {
        let result = self.validator.confirm(self.caller(), request).map_err(to_transport);
        async move { result }
    }

    fn session(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<SessionView, TransportError>> + Send {
        let result = self.validator.session_view(self.caller(), session_id).map_err(to_transport);
        async move { result }
    }

    fn status(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<StatusView, TransportError>> + Send {
        let result = self.validator.status_view(self.caller(), session_id).map_err(to_transport);
        async move { result }
    }

    fn pending(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<PendingSession>, TransportError>> + Send
    {
        let result = self.validator.pending_for(self.caller()).map_err(to_transport);
        async move { result }
    }

    fn report_mismatch(
        &self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send {
        let result =
            self.validator.report_mismatch(self.caller(), session_id).map_err(to_transport);
        async move { result }
    }

    fn submit_message(
        &self,
        message: &MessageSubmission,
    ) -> impl std::future::Future<Output = Result<MessageAccepted, TransportError>> + Send {
        let result = self.validator.submit_message(self.caller(), message).map_err(to_transport);
        async move { result }
    }

    fn conversation(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<StoredMessage>, TransportError>> + Send
    {
        let result = self.validator.conversation(self.caller(), user_id).map_err(to_transport);
        async move { result }
    }
}

/// One relay plus its collaborators, everything in memory.
pub struct TestWorld {
    /// Shared manual-clock environment.
    pub env: TestEnv,
    /// Identity directory.
    pub directory: MemoryDirectory,
    /// Session ledger.
    pub ledger: MemoryLedger,
    /// Audit sink.
    pub audit: MemoryAudit,
    /// The validator all transports call into.
    pub validator: Arc<TestValidator>,
}

impl TestWorld {
    /// Build a world with default validator limits.
    pub fn new(seed: u64) -> Self {
        let env = TestEnv::with_seed(seed);
        let directory = MemoryDirectory::new();
        let ledger = MemoryLedger::new();
        let audit = MemoryAudit::new();
        let validator = Arc::new(Validator::new(
            env.clone(),
            directory.clone(),
            ledger.clone(),
            audit.clone(),
            ValidatorConfig::default(),
        ));
        Self { env, directory, ledger, audit, validator }
    }

    /// Transport bound to `user_id`.
    pub fn transport_for(&self, user_id: &str) -> LocalTransport {
        self.transport_with_ip(user_id, "127.0.0.1")
    }

    /// Transport bound to `user_id` with an explicit remote address.
    pub fn transport_with_ip(&self, user_id: &str, ip: &str) -> LocalTransport {
        LocalTransport::new(user_id, ip, Arc::clone(&self.validator))
    }

    /// Register `user_id` in the directory with `signer`'s verification
    /// key and return a client whose key store holds the private half.
    ///
    /// The key store is returned alongside so tests can inspect stored
    /// session blobs (e.g. to compare derived keys bytewise).
    pub fn client_for(
        &self,
        user_id: &str,
        signer: &SigningKeyPair,
    ) -> (Client<TestEnv, LocalTransport, MemoryKeyStore>, MemoryKeyStore) {
        self.directory.register(user_id, signer.verifying_key());

        let store = MemoryKeyStore::new();
        store
            .store_signing_key(user_id, &signer.to_pkcs8_der().expect("signing key encodes"))
            .expect("memory store never fails");

        let client = Client::new(
            self.env.clone(),
            self.transport_for(user_id),
            store.clone(),
            user_id,
            ClientConfig::default(),
        );
        (client, store)
    }
}

/// Long-term signing keys shared across the test binary.
///
/// 2048-bit generation is slow in debug builds; every test reuses these
/// three identities (two honest parties plus an attacker).
pub fn test_signer(index: usize) -> &'static SigningKeyPair {
    static PAIRS: [OnceLock<SigningKeyPair>; 3] =
        [OnceLock::new(), OnceLock::new(), OnceLock::new()];
    PAIRS[index].get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(1000 + index as u64);
        SigningKeyPair::generate(&mut rng).expect("RSA generation succeeds")
    })
}

/// Initialize tracing once for a test binary, honoring `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry().with(fmt::layer().with_test_writer()).with(filter).try_init();
    });
}
