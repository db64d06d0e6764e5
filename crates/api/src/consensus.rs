//! The seam to the external consensus service and its mirror.

use async_trait::async_trait;
use renderhive_crypto::sign::Ed25519KeyPair;
use renderhive_types::app::{AccountAddress, ConsensusTimestamp};
use renderhive_types::error::NetworkError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One message delivered from a topic, in consensus order.
#[derive(Debug, Clone)]
pub struct TopicMessage {
    pub topic: AccountAddress,
    /// Strictly increasing per topic; the exactly-once delivery cursor.
    pub sequence_number: u64,
    pub consensus_timestamp: ConsensusTimestamp,
    /// The account that paid for the submission, as reported by the mirror.
    pub payer: Option<AccountAddress>,
    pub payload: Vec<u8>,
}

/// Topic handlers must not block: they run on the adapter's dispatch task
/// and should hand work to their component's own channels.
pub type TopicHandler = Arc<dyn Fn(TopicMessage) + Send + Sync>;

/// Submission knobs mirroring the consensus SDK's optional parameters.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub scheduled: bool,
    pub expiry: Option<ConsensusTimestamp>,
    pub wait_for_expiry: bool,
}

/// The confirmed outcome of an executed transaction.
#[derive(Debug, Clone)]
pub struct TransactionReceipt {
    pub transaction_id: String,
    pub status: String,
    /// Account created by the transaction, when it created one.
    pub account_address: Option<AccountAddress>,
    pub consensus_timestamp: Option<ConsensusTimestamp>,
}

impl TransactionReceipt {
    pub fn is_success(&self) -> bool {
        self.status == "SUCCESS"
    }
}

/// Mirror view of an account.
#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub address: AccountAddress,
    pub public_key: String,
    pub balance: u64,
}

/// Mirror view of a transaction.
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub transaction_id: String,
    /// The transaction type name, e.g. `CRYPTOCREATEACCOUNT`.
    pub name: String,
    pub result: String,
    pub consensus_timestamp: Option<ConsensusTimestamp>,
    /// The entity the transaction created or touched, when the mirror
    /// reports one.
    pub entity: Option<AccountAddress>,
}

impl TransactionInfo {
    /// True when this is a successful account-creation transaction.
    pub fn is_account_creation(&self) -> bool {
        self.name == "CRYPTOCREATEACCOUNT" && self.result == "SUCCESS"
    }
}

/// Admin view of a topic.
#[derive(Debug, Clone)]
pub struct TopicInfo {
    pub topic: AccountAddress,
    pub memo: String,
    pub admin_key: Option<String>,
    pub submit_key: Option<String>,
    pub sequence_number: u64,
}

/// One page of mirror topic messages plus the pagination cursor.
#[derive(Debug, Clone)]
pub struct TopicMessagePage {
    pub messages: Vec<TopicMessage>,
    pub next: Option<String>,
}

/// A typed parameter of a contract function call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContractParam {
    String(String),
    Uint64(u64),
    Uint32(u32),
    Bool(bool),
    Address(String),
    /// Hex-encoded opaque 32 bytes, forwarded verbatim.
    Bytes32(String),
}

/// Ordered parameter list with a builder the handlers chain onto.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractParams(pub Vec<ContractParam>);

impl ContractParams {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add_string(mut self, v: impl Into<String>) -> Self {
        self.0.push(ContractParam::String(v.into()));
        self
    }
    pub fn add_uint64(mut self, v: u64) -> Self {
        self.0.push(ContractParam::Uint64(v));
        self
    }
    pub fn add_uint32(mut self, v: u32) -> Self {
        self.0.push(ContractParam::Uint32(v));
        self
    }
    pub fn add_bool(mut self, v: bool) -> Self {
        self.0.push(ContractParam::Bool(v));
        self
    }
    pub fn add_address(mut self, v: &AccountAddress) -> Self {
        self.0.push(ContractParam::Address(v.to_string()));
        self
    }
    pub fn add_bytes32(mut self, v: &[u8; 32]) -> Self {
        self.0.push(ContractParam::Bytes32(hex::encode(v)));
        self
    }
}

/// A contract function invocation, read or write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    pub contract: AccountAddress,
    pub function: String,
    pub params: ContractParams,
    pub gas: u64,
}

/// A composed-and-frozen transaction: the unsigned canonical bytes handed to
/// the operator wallet for signing, plus the id that identifies the eventual
/// submission on the mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrozenTransaction {
    pub transaction_id: String,
    pub bytes: Vec<u8>,
}

/// Mirror view of a deployed contract.
#[derive(Debug, Clone)]
pub struct ContractInfo {
    pub contract: AccountAddress,
    pub memo: String,
    pub created_timestamp: Option<ConsensusTimestamp>,
}

/// Thin wrapper over the external consensus SDK.
///
/// Ordering guarantee: messages on a topic are delivered to that topic's
/// handler in consensus order, exactly once per subscription stream. No
/// cross-topic ordering is guaranteed.
#[async_trait]
pub trait ConsensusProvider: Send + Sync {
    /// Submits a message to a topic as `payer`, signing with `signer`, and
    /// returns the receipt after confirmation.
    async fn submit_message(
        &self,
        topic: &AccountAddress,
        payload: Vec<u8>,
        payer: &AccountAddress,
        signer: &Ed25519KeyPair,
        options: SubmitOptions,
    ) -> Result<TransactionReceipt, NetworkError>;

    /// Starts a dispatch stream for `topic`, replaying from `start_time`.
    /// The handler is invoked once per message in consensus order and must
    /// not block.
    async fn subscribe(
        &self,
        topic: &AccountAddress,
        start_time: ConsensusTimestamp,
        handler: TopicHandler,
    ) -> Result<(), NetworkError>;

    async fn create_topic(
        &self,
        memo: &str,
        payer: &AccountAddress,
        signer: &Ed25519KeyPair,
    ) -> Result<TopicInfo, NetworkError>;
    async fn update_topic(
        &self,
        topic: &AccountAddress,
        memo: &str,
        payer: &AccountAddress,
        signer: &Ed25519KeyPair,
    ) -> Result<TopicInfo, NetworkError>;
    async fn delete_topic(
        &self,
        topic: &AccountAddress,
        payer: &AccountAddress,
        signer: &Ed25519KeyPair,
    ) -> Result<(), NetworkError>;
    async fn topic_info(&self, topic: &AccountAddress) -> Result<TopicInfo, NetworkError>;

    async fn account_info(&self, address: &AccountAddress) -> Result<AccountInfo, NetworkError>;
    async fn transaction_info(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionInfo, NetworkError>;
    async fn topic_messages(
        &self,
        topic: &AccountAddress,
        limit: u32,
        ascending: bool,
        next: Option<String>,
    ) -> Result<TopicMessagePage, NetworkError>;

    /// Composes and freezes a state-mutating contract call without signing;
    /// `payer` is the wallet account that will sign the returned bytes.
    async fn compose_contract_call(
        &self,
        call: ContractCall,
        payer: &AccountAddress,
    ) -> Result<FrozenTransaction, NetworkError>;

    /// Executes a contract call signed with the node key (claims,
    /// settlements) and waits for the confirmed receipt.
    async fn execute_contract_call(
        &self,
        call: ContractCall,
        payer: &AccountAddress,
        signer: &Ed25519KeyPair,
    ) -> Result<TransactionReceipt, NetworkError>;

    /// Read-only contract query; returns the raw function result.
    async fn query_contract(&self, call: ContractCall) -> Result<Vec<u8>, NetworkError>;

    /// Composes and freezes a contract-creation transaction for the wallet.
    async fn compose_contract_create(
        &self,
        bytecode: Vec<u8>,
        gas: u64,
        payer: &AccountAddress,
    ) -> Result<FrozenTransaction, NetworkError>;

    async fn contract_info(&self, contract: &AccountAddress)
        -> Result<ContractInfo, NetworkError>;

    async fn delete_contract(
        &self,
        contract: &AccountAddress,
        payer: &AccountAddress,
        signer: &Ed25519KeyPair,
    ) -> Result<(), NetworkError>;
}
