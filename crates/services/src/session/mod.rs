//! The session & keystore gateway.
//!
//! Everything above this layer is gated on it: the gateway owns the
//! decrypted node key for the session lifetime, mints and verifies the
//! signed session cookie, walks the four-step sign-up procedure, and is the
//! funnel for every outward-going signed action. The node key never leaves
//! this module's memory; what reaches disk is always ciphertext.

mod token;

#[cfg(test)]
mod tests;

pub use token::TokenClaims;

use crate::registry::NodeRegistry;
use parking_lot::{Mutex, RwLock};
use renderhive_api::consensus::{
    ConsensusProvider, ContractCall, ContractParams, FrozenTransaction, SubmitOptions,
    TopicHandler, TransactionReceipt,
};
use renderhive_api::storage::PinningProvider;
use renderhive_crypto::keystore;
use renderhive_crypto::sign::Ed25519KeyPair;
use renderhive_crypto::CryptoError;
use renderhive_types::app::{AccountAddress, NodeRecord, NodeRoles, Operator};
use renderhive_types::command::Command;
use renderhive_types::error::{
    ConfigError, CoreError, KeystoreError, NetworkError, StateError,
};
use renderhive_types::paths;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex as AsyncMutex;

/// Domain string for deriving the session-only signing seed from the node
/// seed. The node key itself never signs in the cookie context.
const SESSION_SIGNING_DOMAIN: &str = "renderhive/session-signing/v1";
/// Bearer tokens expire one hour after minting.
const SESSION_TTL: Duration = Duration::from_secs(3600);
/// Minimum wait before the account-creation transaction is expected to be
/// observable on the mirror.
const MIRROR_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// The signed-in state, exactly as the data model describes it.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub active: bool,
    pub expires_at: SystemTime,
    pub cookie_name: String,
    pub cookie_value: String,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            active: false,
            expires_at: SystemTime::UNIX_EPOCH,
            cookie_name: paths::SESSION_COOKIE_NAME.to_owned(),
            cookie_value: String::new(),
        }
    }
}

/// The sign-up procedure's sub-steps, in required order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignUpStep {
    Init,
    Create,
    Contract,
    Storage,
    Finalize,
}

impl FromStr for SignUpStep {
    type Err = StateError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(Self::Init),
            "create" => Ok(Self::Create),
            "contract" => Ok(Self::Contract),
            "storage" => Ok(Self::Storage),
            "finalize" => Ok(Self::Finalize),
            other => Err(StateError::InvalidValue(format!("unknown sign-up step `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorDraft {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub address: AccountAddress,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignUpRequest {
    pub step: String,
    #[serde(default)]
    pub operator: Option<OperatorDraft>,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub create_transaction_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignUpResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_account_address: Option<String>,
    /// base64 of a frozen transaction for the operator wallet to sign.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignInResponse {
    pub signed_in: bool,
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignOutResponse {
    pub signed_in: bool,
}

/// Key material generated by `init` and consumed by `create`.
struct PendingSignUp {
    alias: AccountAddress,
    public_key_hex: String,
    node_name: String,
}

/// The gateway itself. One per process, constructed by the lifecycle
/// manager after the consensus and storage adapters.
pub struct SessionGateway {
    registry: Arc<AsyncMutex<NodeRegistry>>,
    consensus: Arc<dyn ConsensusProvider>,
    pinning: Arc<dyn PinningProvider>,
    sync_topic: AccountAddress,
    contract: AccountAddress,
    gas_limit: u64,
    default_roles: NodeRoles,
    default_node_name: String,

    state: RwLock<SessionState>,
    node_keys: Mutex<Option<Ed25519KeyPair>>,
    session_keys: Mutex<Option<Ed25519KeyPair>>,
    pending_signup: Mutex<Option<PendingSignUp>>,
    local_address: RwLock<Option<AccountAddress>>,
    /// Topic handlers registered by the lifecycle manager; subscribed from
    /// genesis at sign-in, once per process.
    handlers: Mutex<Vec<(AccountAddress, TopicHandler)>>,
    subscribed: AtomicBool,
}

impl SessionGateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AsyncMutex<NodeRegistry>>,
        consensus: Arc<dyn ConsensusProvider>,
        pinning: Arc<dyn PinningProvider>,
        sync_topic: AccountAddress,
        contract: AccountAddress,
        gas_limit: u64,
        default_roles: NodeRoles,
        default_node_name: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            consensus,
            pinning,
            sync_topic,
            contract,
            gas_limit,
            default_roles,
            default_node_name,
            state: RwLock::new(SessionState::default()),
            node_keys: Mutex::new(None),
            session_keys: Mutex::new(None),
            pending_signup: Mutex::new(None),
            local_address: RwLock::new(None),
            handlers: Mutex::new(Vec::new()),
            subscribed: AtomicBool::new(false),
        })
    }

    /// Registers a topic handler to be subscribed at sign-in.
    pub fn register_topic_handler(&self, topic: AccountAddress, handler: TopicHandler) {
        self.handlers.lock().push((topic, handler));
    }

    /// Seeds the cached local address from an already-present node record.
    pub async fn load_local_address(&self) {
        let registry = self.registry.lock().await;
        *self.local_address.write() = registry.node().map(|n| n.address.clone());
    }

    pub fn local_address(&self) -> Option<AccountAddress> {
        self.local_address.read().clone()
    }

    pub fn session_state(&self) -> SessionState {
        self.state.read().clone()
    }

    pub fn is_active(&self) -> bool {
        let state = self.state.read();
        state.active && SystemTime::now() < state.expires_at
    }

    // --- Sign-up ----------------------------------------------------------

    pub async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpResponse, CoreError> {
        match request.step.parse::<SignUpStep>().map_err(CoreError::from)? {
            SignUpStep::Init => self.sign_up_init(request).await,
            SignUpStep::Create => self.sign_up_create(request).await,
            SignUpStep::Contract => self.sign_up_contract().await,
            SignUpStep::Storage => self.sign_up_storage().await,
            SignUpStep::Finalize => self.sign_up_finalize(request).await,
        }
    }

    /// `init`: persist the operator record and stage the node key pair under
    /// its alias address. Idempotent when the operator record exists.
    async fn sign_up_init(&self, request: SignUpRequest) -> Result<SignUpResponse, CoreError> {
        let mut registry = self.registry.lock().await;

        if registry.operator().is_none() {
            let draft = request.operator.ok_or_else(|| {
                StateError::InvalidValue("init requires the operator record".into())
            })?;
            // The mirror is the authority on the operator's public key.
            let info = self.consensus.account_info(&draft.address).await?;
            registry.save_operator(Operator {
                user_id: draft.user_id,
                username: draft.username,
                email: draft.email,
                address: draft.address,
                public_key: info.public_key,
            })?;
        }

        if let Some(node) = registry.node() {
            return Ok(SignUpResponse {
                message: "node account already exists".into(),
                node_account_address: Some(node.address.to_string()),
                payload: None,
            });
        }

        let mut pending = self.pending_signup.lock();
        if pending.is_none() {
            let passphrase = request
                .passphrase
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| StateError::InvalidValue("init requires a passphrase".into()))?;
            let pair = Ed25519KeyPair::generate();
            let alias = AccountAddress::alias_for(&pair.public_key().to_bytes());
            let seed = pair.seed();
            keystore::save_encrypted_file(
                &paths::keystore_path(registry.config_dir(), &alias),
                &seed.0,
                passphrase,
            )
            .map_err(map_keystore_error)?;
            *pending = Some(PendingSignUp {
                alias,
                public_key_hex: hex::encode(pair.public_key().to_bytes()),
                node_name: request
                    .node_name
                    .unwrap_or_else(|| self.default_node_name.clone()),
            });
            tracing::info!(target: "session", "node key generated and staged for sign-up");
        }

        let alias = pending.as_ref().map(|p| p.alias.to_string());
        Ok(SignUpResponse {
            message: "operator persisted, node key staged".into(),
            node_account_address: alias,
            payload: None,
        })
    }

    /// `create`: confirm the account-creation transaction on the mirror,
    /// adopt the assigned address, persist the node record.
    async fn sign_up_create(&self, request: SignUpRequest) -> Result<SignUpResponse, CoreError> {
        let mut registry = self.registry.lock().await;
        if registry.operator().is_none() {
            return Err(StateError::SignUpOrder {
                step: "create".into(),
                requires: "init".into(),
            }
            .into());
        }
        if let Some(node) = registry.node() {
            return Ok(SignUpResponse {
                message: "node account already exists".into(),
                node_account_address: Some(node.address.to_string()),
                payload: None,
            });
        }
        let (alias, public_key_hex, node_name) = {
            let pending = self.pending_signup.lock();
            let p = pending.as_ref().ok_or_else(|| StateError::SignUpOrder {
                step: "create".into(),
                requires: "init".into(),
            })?;
            (p.alias.clone(), p.public_key_hex.clone(), p.node_name.clone())
        };
        let transaction_id = request.create_transaction_id.ok_or_else(|| {
            StateError::InvalidValue("create requires the creation transaction id".into())
        })?;

        // The mirror lags the ledger; give the transaction time to appear.
        tokio::time::sleep(MIRROR_SETTLE_DELAY).await;

        let info = self.consensus.transaction_info(&transaction_id).await?;
        if !info.is_account_creation() {
            return Err(NetworkError::Mirror(format!(
                "transaction {transaction_id} is {} ({}), not a successful account creation",
                info.name, info.result
            ))
            .into());
        }
        let assigned = info.entity.ok_or_else(|| {
            NetworkError::Mirror(format!(
                "transaction {transaction_id} confirmed without a created account"
            ))
        })?;

        let config_dir = registry.config_dir().to_path_buf();
        std::fs::rename(
            paths::keystore_path(&config_dir, &alias),
            paths::keystore_path(&config_dir, &assigned),
        )
        .map_err(|e| CoreError::Keystore(KeystoreError::Io(e.to_string())))?;

        registry.save_node(NodeRecord {
            node_id: -1,
            name: node_name,
            address: assigned.clone(),
            public_key: public_key_hex,
            roles: self.default_roles,
        })?;
        *self.pending_signup.lock() = None;
        *self.local_address.write() = Some(assigned.clone());

        tracing::info!(target: "session", address = %assigned, "node account adopted");
        Ok(SignUpResponse {
            message: "node account created and keystore renamed".into(),
            node_account_address: Some(assigned.to_string()),
            payload: None,
        })
    }

    /// `contract`: compose the node-registration contract call for the
    /// operator wallet to sign.
    async fn sign_up_contract(&self) -> Result<SignUpResponse, CoreError> {
        let registry = self.registry.lock().await;
        let node = registry.node().ok_or_else(|| StateError::SignUpOrder {
            step: "contract".into(),
            requires: "create".into(),
        })?;
        let operator = registry.operator().ok_or_else(|| StateError::SignUpOrder {
            step: "contract".into(),
            requires: "init".into(),
        })?;

        let call = ContractCall {
            contract: self.contract.clone(),
            function: "addNode".into(),
            params: ContractParams::new()
                .add_address(&node.address)
                .add_string(&node.public_key)
                .add_bool(node.roles.render),
            gas: self.gas_limit,
        };
        let frozen = self
            .consensus
            .compose_contract_call(call, &operator.address)
            .await?;
        Ok(SignUpResponse {
            message: "sign the registration transaction with the operator wallet".into(),
            node_account_address: Some(node.address.to_string()),
            payload: Some(encode_frozen(&frozen)),
        })
    }

    /// `storage`: verify the pinning agent identity and make sure a space
    /// exists for this node's uploads.
    async fn sign_up_storage(&self) -> Result<SignUpResponse, CoreError> {
        let node_name = {
            let registry = self.registry.lock().await;
            registry
                .node()
                .ok_or_else(|| StateError::SignUpOrder {
                    step: "storage".into(),
                    requires: "create".into(),
                })?
                .name
                .clone()
        };
        let did = self.pinning.whoami().await?;
        let spaces = self.pinning.space_list().await?;
        if spaces.is_empty() {
            let space = self.pinning.space_create(&node_name).await?;
            self.pinning.space_use(&space).await?;
            tracing::info!(target: "session", space = %space.0, "created pinning space");
        }
        Ok(SignUpResponse {
            message: format!("pinning agent ready as {}", did.0),
            node_account_address: None,
            payload: None,
        })
    }

    /// `finalize`: record the contract-assigned node id.
    async fn sign_up_finalize(&self, request: SignUpRequest) -> Result<SignUpResponse, CoreError> {
        let mut registry = self.registry.lock().await;
        let mut node = registry
            .node()
            .cloned()
            .ok_or_else(|| StateError::SignUpOrder {
                step: "finalize".into(),
                requires: "create".into(),
            })?;
        let node_id = request.node_id.ok_or_else(|| {
            StateError::InvalidValue("finalize requires the contract-assigned node id".into())
        })?;
        node.node_id = node_id;
        registry.save_node(node.clone())?;
        Ok(SignUpResponse {
            message: "sign-up complete".into(),
            node_account_address: Some(node.address.to_string()),
            payload: None,
        })
    }

    // --- Sign-in / sign-out ----------------------------------------------

    /// The sign-in challenge: the node fingerprint.
    pub async fn get_sign_in_payload(&self) -> Result<[u8; 32], CoreError> {
        let registry = self.registry.lock().await;
        Ok(registry.node_fingerprint()?)
    }

    pub async fn sign_in(&self, passphrase: &str) -> Result<SignInResponse, CoreError> {
        let (node, keystore_path) = {
            let registry = self.registry.lock().await;
            let node = registry
                .node()
                .cloned()
                .ok_or_else(|| ConfigError::MissingFile {
                    path: paths::NODE_FILE.into(),
                })?;
            let path = paths::keystore_path(registry.config_dir(), &node.address);
            (node, path)
        };
        if !keystore_path.exists() {
            return Err(KeystoreError::NotFound {
                path: keystore_path.display().to_string(),
            }
            .into());
        }

        let seed = keystore::load_encrypted_file(&keystore_path, passphrase)
            .map_err(map_keystore_error)?;
        let node_pair = Ed25519KeyPair::from_seed_bytes(&seed.0)
            .map_err(|_| KeystoreError::Malformed("keystore payload is not a seed".into()))?;
        if hex::encode(node_pair.public_key().to_bytes()) != node.public_key {
            return Err(KeystoreError::Malformed(
                "keystore does not match the node record".into(),
            )
            .into());
        }

        // The session pair is derived, not the node key reused: the seed is
        // hashed under a fixed domain string.
        let session_seed = renderhive_crypto::derive_seed(
            SESSION_SIGNING_DOMAIN,
            &node_pair.seed().0,
        );
        let session_pair = Ed25519KeyPair::from_seed(&session_seed);

        let expires_at = SystemTime::now() + SESSION_TTL;
        let token = token::mint(&session_pair, node.address.as_str(), expires_at);

        {
            let mut state = self.state.write();
            state.active = true;
            state.expires_at = expires_at;
            state.cookie_value = token.clone();
        }
        *self.node_keys.lock() = Some(node_pair);
        *self.session_keys.lock() = Some(session_pair);
        *self.local_address.write() = Some(node.address.clone());

        self.subscribe_registered_topics().await?;

        tracing::info!(target: "session", address = %node.address, "session opened");
        Ok(SignInResponse {
            signed_in: true,
            token,
        })
    }

    /// Subscribes every registered handler from genesis, once per process.
    async fn subscribe_registered_topics(&self) -> Result<(), CoreError> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let handlers: Vec<_> = self.handlers.lock().clone();
        for (topic, handler) in handlers {
            self.consensus
                .subscribe(&topic, renderhive_types::app::ConsensusTimestamp::GENESIS, handler)
                .await?;
            tracing::info!(target: "session", %topic, "subscribed from genesis");
        }
        Ok(())
    }

    pub fn sign_out(&self) -> SignOutResponse {
        {
            let mut state = self.state.write();
            state.active = false;
            state.expires_at = SystemTime::now();
            state.cookie_value.clear();
        }
        *self.node_keys.lock() = None;
        *self.session_keys.lock() = None;
        tracing::info!(target: "session", "session closed");
        SignOutResponse { signed_in: false }
    }

    /// Invalidates the session after a consistency violation. Not a normal
    /// sign-out: the operator must intervene before signing in again.
    pub fn invalidate(&self, reason: &str) {
        tracing::error!(target: "session", reason, "session invalidated");
        self.sign_out();
    }

    /// Verifies a presented cookie value against the live session.
    pub fn verify_cookie(&self, value: &str) -> Result<(), CoreError> {
        if !self.is_active() {
            return Err(CoreError::Unauthorized);
        }
        let keys = self.session_keys.lock();
        let session_pair = keys.as_ref().ok_or(CoreError::Unauthorized)?;
        let claims = token::verify(&session_pair.public_key(), value)
            .map_err(|_| CoreError::Unauthorized)?;
        let expected = self.local_address.read();
        match expected.as_ref() {
            Some(addr) if addr.as_str() == claims.sub => Ok(()),
            _ => Err(CoreError::Unauthorized),
        }
    }

    // --- The signed-action funnel ----------------------------------------

    /// Publishes a command envelope on a topic, signed with the node key.
    pub async fn publish_command(
        &self,
        topic: &AccountAddress,
        command: &Command,
    ) -> Result<TransactionReceipt, CoreError> {
        let envelope = command.encode()?;
        let payload = serde_json::to_vec(&envelope)
            .map_err(|e| StateError::InvalidValue(format!("envelope encode: {e}")))?;
        let payer = self
            .local_address()
            .ok_or(StateError::SessionInactive)?;
        let signer = self.checked_node_keys()?;
        let receipt = self
            .consensus
            .submit_message(topic, payload, &payer, &signer, SubmitOptions::default())
            .await?;
        Ok(receipt)
    }

    /// Executes a contract call signed with the node key.
    pub async fn execute_contract(
        &self,
        function: &str,
        params: ContractParams,
        gas: Option<u64>,
    ) -> Result<TransactionReceipt, CoreError> {
        let payer = self
            .local_address()
            .ok_or(StateError::SessionInactive)?;
        let signer = self.checked_node_keys()?;
        let call = ContractCall {
            contract: self.contract.clone(),
            function: function.to_owned(),
            params,
            gas: gas.unwrap_or(self.gas_limit),
        };
        let receipt = self
            .consensus
            .execute_contract_call(call, &payer, &signer)
            .await?;
        Ok(receipt)
    }

    /// Composes an unsigned contract call for the operator wallet.
    pub async fn compose_contract(
        &self,
        function: &str,
        params: ContractParams,
        gas: Option<u64>,
    ) -> Result<FrozenTransaction, CoreError> {
        let payer = {
            let registry = self.registry.lock().await;
            registry
                .operator()
                .map(|o| o.address.clone())
                .ok_or_else(|| ConfigError::MissingFile {
                    path: paths::OPERATOR_FILE.into(),
                })?
        };
        let call = ContractCall {
            contract: self.contract.clone(),
            function: function.to_owned(),
            params,
            gas: gas.unwrap_or(self.gas_limit),
        };
        Ok(self.consensus.compose_contract_call(call, &payer).await?)
    }

    /// Composes an unsigned contract-creation transaction for the wallet.
    pub async fn compose_contract_deploy(
        &self,
        bytecode: Vec<u8>,
        gas: Option<u64>,
    ) -> Result<FrozenTransaction, CoreError> {
        let payer = {
            let registry = self.registry.lock().await;
            registry
                .operator()
                .map(|o| o.address.clone())
                .ok_or_else(|| ConfigError::MissingFile {
                    path: paths::OPERATOR_FILE.into(),
                })?
        };
        Ok(self
            .consensus
            .compose_contract_create(bytecode, gas.unwrap_or(self.gas_limit), &payer)
            .await?)
    }

    /// Read-only contract query.
    pub async fn query_contract(
        &self,
        function: &str,
        params: ContractParams,
    ) -> Result<Vec<u8>, CoreError> {
        let call = ContractCall {
            contract: self.contract.clone(),
            function: function.to_owned(),
            params,
            gas: self.gas_limit,
        };
        Ok(self.consensus.query_contract(call).await?)
    }

    /// The synchronization topic, for diagnostics surfaces.
    pub fn sync_topic(&self) -> &AccountAddress {
        &self.sync_topic
    }

    /// Clones the node key pair for signing, enforcing the session gate.
    ///
    /// The clone stays inside this module's callers on the stack and is
    /// dropped at the end of the call; ciphertext remains the only on-disk
    /// form.
    fn checked_node_keys(&self) -> Result<Ed25519KeyPair, CoreError> {
        if !self.is_active() {
            return Err(StateError::SessionInactive.into());
        }
        let keys = self.node_keys.lock();
        let pair = keys.as_ref().ok_or(StateError::SessionInactive)?;
        Ok(Ed25519KeyPair::from_seed(&pair.seed().0))
    }
}

fn encode_frozen(frozen: &FrozenTransaction) -> String {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    BASE64.encode(&frozen.bytes)
}

fn map_keystore_error(e: CryptoError) -> CoreError {
    let mapped = match e {
        CryptoError::DecryptionFailed => KeystoreError::WrongPassphrase,
        CryptoError::InvalidInput(msg) if msg.contains("too short") => KeystoreError::Truncated,
        CryptoError::InvalidInput(msg) | CryptoError::Unsupported(msg) => {
            KeystoreError::Malformed(msg)
        }
        other => KeystoreError::Io(other.to_string()),
    };
    mapped.into()
}
