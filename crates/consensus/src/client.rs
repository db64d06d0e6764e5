//! The concrete `ConsensusProvider` over the HTTP bridge and the mirror.

use crate::mirror::MirrorClient;
use crate::retry::with_backoff;
use crate::subscribe::spawn_subscription;
use crate::transaction::{SignedTransaction, Transaction, TransactionBody};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::Mutex;
use renderhive_api::consensus::{
    AccountInfo, ConsensusProvider, ContractCall, ContractInfo, FrozenTransaction, SubmitOptions,
    TopicHandler, TopicInfo, TopicMessagePage, TransactionInfo, TransactionReceipt,
};
use renderhive_crypto::sign::Ed25519KeyPair;
use renderhive_types::app::{AccountAddress, ConsensusTimestamp};
use renderhive_types::config::NetworkConfig;
use renderhive_types::error::NetworkError;
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const SUBSCRIPTION_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// The coordinator's client to the external consensus service.
pub struct RestConsensusClient {
    http: reqwest::Client,
    mirror: MirrorClient,
    submit_base: String,
    max_fee: u64,
    quit: watch::Receiver<bool>,
    subscriptions: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Deserialize)]
struct SubmitResponseDto {
    transaction_id: String,
}

#[derive(Deserialize)]
struct QueryResponseDto {
    /// base64 function result.
    result: String,
}

impl RestConsensusClient {
    pub fn new(network: &NetworkConfig, quit: watch::Receiver<bool>) -> Result<Self, NetworkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(network.request_timeout_secs))
            .build()
            .map_err(|e| NetworkError::Http {
                endpoint: "client".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            mirror: MirrorClient::new(http.clone(), &network.mirror_base_url),
            submit_base: network.submit_base_url.trim_end_matches('/').to_owned(),
            max_fee: network.max_transaction_fee,
            http,
            quit,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Awaits all subscription tasks after the quit broadcast.
    pub async fn join_subscriptions(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.subscriptions.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn compose(&self, payer: &AccountAddress, body: TransactionBody) -> Transaction {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Transaction::new(
            payer.clone(),
            ConsensusTimestamp::new(now.as_secs() as i64, now.subsec_nanos()),
            self.max_fee,
            body,
        )
    }

    /// POSTs a signed transaction to the bridge and waits for the mirror to
    /// confirm it. Confirmation polling is idempotent and retried.
    async fn execute(&self, signed: &SignedTransaction) -> Result<TransactionReceipt, NetworkError> {
        let url = format!("{}/api/v1/transactions", self.submit_base);
        let response = self
            .http
            .post(&url)
            .json(signed)
            .send()
            .await
            .map_err(|e| NetworkError::Http {
                endpoint: url.clone(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(NetworkError::Http {
                endpoint: url.clone(),
                reason: format!("status {}", response.status()),
            });
        }
        let accepted: SubmitResponseDto = response
            .json()
            .await
            .map_err(|e| NetworkError::Http {
                endpoint: url,
                reason: e.to_string(),
            })?;

        let info = with_backoff("transaction confirmation", || async {
            self.mirror.transaction_info(&accepted.transaction_id).await
        })
        .await?;

        let receipt = TransactionReceipt {
            transaction_id: info.transaction_id,
            status: info.result,
            account_address: info.entity,
            consensus_timestamp: info.consensus_timestamp,
        };
        if !receipt.is_success() {
            return Err(NetworkError::ReceiptStatus {
                status: receipt.status,
            });
        }
        Ok(receipt)
    }

    async fn sign_and_execute(
        &self,
        payer: &AccountAddress,
        signer: &Ed25519KeyPair,
        body: TransactionBody,
    ) -> Result<TransactionReceipt, NetworkError> {
        let frozen = self.compose(payer, body).freeze()?;
        let signed = SignedTransaction::sign(&frozen, signer);
        self.execute(&signed).await
    }
}

#[async_trait]
impl ConsensusProvider for RestConsensusClient {
    async fn submit_message(
        &self,
        topic: &AccountAddress,
        payload: Vec<u8>,
        payer: &AccountAddress,
        signer: &Ed25519KeyPair,
        options: SubmitOptions,
    ) -> Result<TransactionReceipt, NetworkError> {
        let body = TransactionBody::ConsensusSubmit {
            topic: topic.clone(),
            message: BASE64.encode(payload),
            scheduled: options.scheduled,
        };
        // Submission is idempotent under its transaction id: the ledger
        // accepts the first copy and rejects duplicates, so retry is safe.
        let frozen = self.compose(payer, body).freeze()?;
        let signed = SignedTransaction::sign(&frozen, signer);
        let receipt = with_backoff("submit message", || async {
            self.execute(&signed).await
        })
        .await?;
        if options.wait_for_expiry {
            if let Some(expiry) = options.expiry {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs() as i64;
                let wait = (expiry.seconds - now).max(0) as u64;
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
        }
        Ok(receipt)
    }

    async fn subscribe(
        &self,
        topic: &AccountAddress,
        start_time: ConsensusTimestamp,
        handler: TopicHandler,
    ) -> Result<(), NetworkError> {
        let handle = spawn_subscription(
            self.mirror.clone(),
            topic.clone(),
            start_time,
            handler,
            SUBSCRIPTION_POLL_INTERVAL,
            self.quit.clone(),
        );
        self.subscriptions.lock().push(handle);
        Ok(())
    }

    async fn create_topic(
        &self,
        memo: &str,
        payer: &AccountAddress,
        signer: &Ed25519KeyPair,
    ) -> Result<TopicInfo, NetworkError> {
        let receipt = self
            .sign_and_execute(payer, signer, TransactionBody::TopicCreate { memo: memo.into() })
            .await?;
        let topic = receipt.account_address.ok_or_else(|| {
            NetworkError::Mirror("topic creation confirmed without an entity id".into())
        })?;
        self.mirror.topic_info(&topic).await
    }

    async fn update_topic(
        &self,
        topic: &AccountAddress,
        memo: &str,
        payer: &AccountAddress,
        signer: &Ed25519KeyPair,
    ) -> Result<TopicInfo, NetworkError> {
        self.sign_and_execute(
            payer,
            signer,
            TransactionBody::TopicUpdate {
                topic: topic.clone(),
                memo: memo.into(),
            },
        )
        .await?;
        self.mirror.topic_info(topic).await
    }

    async fn delete_topic(
        &self,
        topic: &AccountAddress,
        payer: &AccountAddress,
        signer: &Ed25519KeyPair,
    ) -> Result<(), NetworkError> {
        self.sign_and_execute(
            payer,
            signer,
            TransactionBody::TopicDelete { topic: topic.clone() },
        )
        .await
        .map(|_| ())
    }

    async fn topic_info(&self, topic: &AccountAddress) -> Result<TopicInfo, NetworkError> {
        with_backoff("topic info", || async { self.mirror.topic_info(topic).await }).await
    }

    async fn account_info(&self, address: &AccountAddress) -> Result<AccountInfo, NetworkError> {
        with_backoff("account info", || async {
            self.mirror.account_info(address).await
        })
        .await
    }

    async fn transaction_info(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionInfo, NetworkError> {
        with_backoff("transaction info", || async {
            self.mirror.transaction_info(transaction_id).await
        })
        .await
    }

    async fn topic_messages(
        &self,
        topic: &AccountAddress,
        limit: u32,
        ascending: bool,
        next: Option<String>,
    ) -> Result<TopicMessagePage, NetworkError> {
        with_backoff("topic messages", || async {
            self.mirror
                .topic_messages(topic, limit, ascending, None, next.clone())
                .await
        })
        .await
    }

    async fn compose_contract_call(
        &self,
        call: ContractCall,
        payer: &AccountAddress,
    ) -> Result<FrozenTransaction, NetworkError> {
        self.compose(
            payer,
            TransactionBody::ContractCall {
                contract: call.contract,
                function: call.function,
                params: call.params,
                gas: call.gas,
            },
        )
        .freeze()
    }

    async fn execute_contract_call(
        &self,
        call: ContractCall,
        payer: &AccountAddress,
        signer: &Ed25519KeyPair,
    ) -> Result<TransactionReceipt, NetworkError> {
        self.sign_and_execute(
            payer,
            signer,
            TransactionBody::ContractCall {
                contract: call.contract,
                function: call.function,
                params: call.params,
                gas: call.gas,
            },
        )
        .await
    }

    async fn query_contract(&self, call: ContractCall) -> Result<Vec<u8>, NetworkError> {
        let url = format!(
            "{}/api/v1/contracts/{}/query",
            self.submit_base, call.contract
        );
        let result = with_backoff("contract query", || async {
            let response = self
                .http
                .post(&url)
                .json(&call)
                .send()
                .await
                .map_err(|e| NetworkError::Http {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                })?;
            if !response.status().is_success() {
                return Err(NetworkError::Http {
                    endpoint: url.clone(),
                    reason: format!("status {}", response.status()),
                });
            }
            response
                .json::<QueryResponseDto>()
                .await
                .map_err(|e| NetworkError::Http {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                })
        })
        .await?;
        BASE64
            .decode(&result.result)
            .map_err(|e| NetworkError::Http {
                endpoint: url,
                reason: format!("bad result base64: {e}"),
            })
    }

    async fn compose_contract_create(
        &self,
        bytecode: Vec<u8>,
        gas: u64,
        payer: &AccountAddress,
    ) -> Result<FrozenTransaction, NetworkError> {
        self.compose(
            payer,
            TransactionBody::ContractCreate {
                bytecode: hex::encode(bytecode),
                gas,
            },
        )
        .freeze()
    }

    async fn contract_info(
        &self,
        contract: &AccountAddress,
    ) -> Result<ContractInfo, NetworkError> {
        with_backoff("contract info", || async {
            self.mirror.contract_info(contract).await
        })
        .await
    }

    async fn delete_contract(
        &self,
        contract: &AccountAddress,
        payer: &AccountAddress,
        signer: &Ed25519KeyPair,
    ) -> Result<(), NetworkError> {
        self.sign_and_execute(
            payer,
            signer,
            TransactionBody::ContractDelete {
                contract: contract.clone(),
            },
        )
        .await
        .map(|_| ())
    }
}
