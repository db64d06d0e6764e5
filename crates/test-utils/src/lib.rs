#![forbid(unsafe_code)]

//! In-memory doubles for the consensus, storage, pinning and renderer seams,
//! shared by the service and gateway test suites. Never linked into release
//! binaries.

use async_trait::async_trait;
use parking_lot::Mutex;
use renderhive_api::consensus::{
    AccountInfo, ConsensusProvider, ContractCall, ContractInfo, FrozenTransaction, SubmitOptions,
    TopicHandler, TopicInfo, TopicMessagePage, TransactionInfo, TransactionReceipt,
};
use renderhive_api::render::{RenderInvocation, RenderOutcome, RendererDriver};
use renderhive_api::storage::{Did, ObjectStore, PeerInfo, PinningProvider, SpaceInfo, UploadRecord};
use renderhive_crypto::sign::Ed25519KeyPair;
use renderhive_types::app::{AccountAddress, Cid, ConsensusTimestamp};
use renderhive_types::error::{NetworkError, RendererError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Default)]
pub struct MockConsensus {
    pub accounts: Mutex<HashMap<String, AccountInfo>>,
    pub transactions: Mutex<HashMap<String, TransactionInfo>>,
    pub submitted: Mutex<Vec<(AccountAddress, Vec<u8>)>>,
    pub executed_calls: Mutex<Vec<ContractCall>>,
    pub subscribed_topics: Mutex<Vec<AccountAddress>>,
}

impl MockConsensus {
    pub fn with_account(self, address: &str, public_key: &str) -> Self {
        self.accounts.lock().insert(
            address.to_owned(),
            AccountInfo {
                address: AccountAddress::parse(address).unwrap(),
                public_key: public_key.to_owned(),
                balance: 1_000,
            },
        );
        self
    }

    pub fn with_creation_transaction(self, id: &str, created: &str) -> Self {
        self.transactions.lock().insert(
            id.to_owned(),
            TransactionInfo {
                transaction_id: id.to_owned(),
                name: "CRYPTOCREATEACCOUNT".into(),
                result: "SUCCESS".into(),
                consensus_timestamp: Some(ConsensusTimestamp::from_unix_secs(1)),
                entity: Some(AccountAddress::parse(created).unwrap()),
            },
        );
        self
    }
}

#[async_trait]
impl ConsensusProvider for MockConsensus {
    async fn submit_message(
        &self,
        topic: &AccountAddress,
        payload: Vec<u8>,
        _payer: &AccountAddress,
        _signer: &Ed25519KeyPair,
        _options: SubmitOptions,
    ) -> Result<TransactionReceipt, NetworkError> {
        self.submitted.lock().push((topic.clone(), payload));
        Ok(TransactionReceipt {
            transaction_id: "0.0.1@0.000000000".into(),
            status: "SUCCESS".into(),
            account_address: None,
            consensus_timestamp: Some(ConsensusTimestamp::from_unix_secs(1)),
        })
    }

    async fn subscribe(
        &self,
        topic: &AccountAddress,
        _start_time: ConsensusTimestamp,
        _handler: TopicHandler,
    ) -> Result<(), NetworkError> {
        self.subscribed_topics.lock().push(topic.clone());
        Ok(())
    }

    async fn create_topic(
        &self,
        _memo: &str,
        _payer: &AccountAddress,
        _signer: &Ed25519KeyPair,
    ) -> Result<TopicInfo, NetworkError> {
        Err(NetworkError::Mirror("not supported by the mock".into()))
    }

    async fn update_topic(
        &self,
        _topic: &AccountAddress,
        _memo: &str,
        _payer: &AccountAddress,
        _signer: &Ed25519KeyPair,
    ) -> Result<TopicInfo, NetworkError> {
        Err(NetworkError::Mirror("not supported by the mock".into()))
    }

    async fn delete_topic(
        &self,
        _topic: &AccountAddress,
        _payer: &AccountAddress,
        _signer: &Ed25519KeyPair,
    ) -> Result<(), NetworkError> {
        Err(NetworkError::Mirror("not supported by the mock".into()))
    }

    async fn topic_info(&self, _topic: &AccountAddress) -> Result<TopicInfo, NetworkError> {
        Err(NetworkError::Mirror("not supported by the mock".into()))
    }

    async fn account_info(&self, address: &AccountAddress) -> Result<AccountInfo, NetworkError> {
        self.accounts
            .lock()
            .get(address.as_str())
            .cloned()
            .ok_or_else(|| NetworkError::Mirror(format!("account {address} not found")))
    }

    async fn transaction_info(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionInfo, NetworkError> {
        self.transactions
            .lock()
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| NetworkError::Mirror(format!("transaction {transaction_id} not found")))
    }

    async fn topic_messages(
        &self,
        _topic: &AccountAddress,
        _limit: u32,
        _ascending: bool,
        _next: Option<String>,
    ) -> Result<TopicMessagePage, NetworkError> {
        Ok(TopicMessagePage {
            messages: Vec::new(),
            next: None,
        })
    }

    async fn compose_contract_call(
        &self,
        call: ContractCall,
        payer: &AccountAddress,
    ) -> Result<FrozenTransaction, NetworkError> {
        Ok(FrozenTransaction {
            transaction_id: format!("{payer}@1.000000000"),
            bytes: serde_json::to_vec(&call).unwrap(),
        })
    }

    async fn execute_contract_call(
        &self,
        call: ContractCall,
        _payer: &AccountAddress,
        _signer: &Ed25519KeyPair,
    ) -> Result<TransactionReceipt, NetworkError> {
        self.executed_calls.lock().push(call);
        Ok(TransactionReceipt {
            transaction_id: "0.0.1@2.000000000".into(),
            status: "SUCCESS".into(),
            account_address: None,
            consensus_timestamp: Some(ConsensusTimestamp::from_unix_secs(2)),
        })
    }

    async fn query_contract(&self, _call: ContractCall) -> Result<Vec<u8>, NetworkError> {
        Ok(Vec::new())
    }

    async fn compose_contract_create(
        &self,
        bytecode: Vec<u8>,
        _gas: u64,
        payer: &AccountAddress,
    ) -> Result<FrozenTransaction, NetworkError> {
        Ok(FrozenTransaction {
            transaction_id: format!("{payer}@3.000000000"),
            bytes: bytecode,
        })
    }

    async fn contract_info(
        &self,
        contract: &AccountAddress,
    ) -> Result<ContractInfo, NetworkError> {
        Ok(ContractInfo {
            contract: contract.clone(),
            memo: String::new(),
            created_timestamp: None,
        })
    }

    async fn delete_contract(
        &self,
        _contract: &AccountAddress,
        _payer: &AccountAddress,
        _signer: &Ed25519KeyPair,
    ) -> Result<(), NetworkError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MockStore {
    pub pinned: Mutex<HashSet<Cid>>,
    pub fetched: Mutex<Vec<Cid>>,
}

fn cid_for(path: &Path) -> Cid {
    let content = std::fs::read(path).unwrap_or_default();
    Cid(format!("bafk{}", hex::encode(&renderhive_crypto::sha256(&content)[..8])))
}

#[async_trait]
impl ObjectStore for MockStore {
    async fn add(&self, path: &Path, pin: bool) -> Result<Cid, NetworkError> {
        let cid = cid_for(path);
        if pin {
            self.pinned.lock().insert(cid.clone());
        }
        Ok(cid)
    }

    async fn hash_only(&self, path: &Path) -> Result<Cid, NetworkError> {
        Ok(cid_for(path))
    }

    async fn get(&self, cid: &Cid, out_path: &Path) -> Result<PathBuf, NetworkError> {
        self.fetched.lock().push(cid.clone());
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(out_path, b"scene-bytes").unwrap();
        Ok(out_path.to_path_buf())
    }

    async fn pin(&self, cid: &Cid) -> Result<bool, NetworkError> {
        self.pinned.lock().insert(cid.clone());
        Ok(true)
    }

    async fn unpin(&self, cid: &Cid) -> Result<bool, NetworkError> {
        Ok(self.pinned.lock().remove(cid))
    }

    async fn swarm_connect(&self, _multiaddr: &str) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn swarm_disconnect(&self, _multiaddr: &str) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn connected_peers(&self) -> Result<Vec<PeerInfo>, NetworkError> {
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), NetworkError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPinning {
    pub spaces: Mutex<Vec<SpaceInfo>>,
}

#[async_trait]
impl PinningProvider for MockPinning {
    async fn whoami(&self) -> Result<Did, NetworkError> {
        Ok(Did("did:key:z6MkTestAgent".into()))
    }

    async fn space_list(&self) -> Result<Vec<SpaceInfo>, NetworkError> {
        Ok(self.spaces.lock().clone())
    }

    async fn space_create(&self, name: &str) -> Result<Did, NetworkError> {
        let did = Did(format!("did:key:z6Mk{name}"));
        self.spaces.lock().push(SpaceInfo {
            did: did.clone(),
            name: name.to_owned(),
            current: false,
        });
        Ok(did)
    }

    async fn space_add(&self, _proof: &str) -> Result<Did, NetworkError> {
        Err(NetworkError::Pinning("not supported by the mock".into()))
    }

    async fn space_use(&self, did: &Did) -> Result<(), NetworkError> {
        for space in self.spaces.lock().iter_mut() {
            space.current = space.did == *did;
        }
        Ok(())
    }

    async fn upload_list(&self) -> Result<Vec<UploadRecord>, NetworkError> {
        Ok(Vec::new())
    }

    async fn upload(&self, _paths: &[PathBuf]) -> Result<UploadRecord, NetworkError> {
        Err(NetworkError::Pinning("not supported by the mock".into()))
    }

    async fn remove(&self, _cid: &Cid) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn delegation_create(&self, _audience: &Did) -> Result<String, NetworkError> {
        Err(NetworkError::Pinning("not supported by the mock".into()))
    }

    async fn delegation_list(&self) -> Result<Vec<String>, NetworkError> {
        Ok(Vec::new())
    }

    async fn proof_add(&self, _proof_path: &Path) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn proof_list(&self) -> Result<Vec<String>, NetworkError> {
        Ok(Vec::new())
    }
}

/// A renderer that writes one frame and succeeds.
#[derive(Default)]
pub struct MockRenderer {
    pub invocations: Mutex<Vec<RenderInvocation>>,
}

#[async_trait]
impl RendererDriver for MockRenderer {
    async fn render(&self, invocation: RenderInvocation) -> Result<RenderOutcome, RendererError> {
        std::fs::create_dir_all(&invocation.output_dir)
            .map_err(|e| RendererError::Spawn(e.to_string()))?;
        let frame = invocation.output_dir.join("frame_00001.png");
        std::fs::write(&frame, b"pixels").map_err(|e| RendererError::Spawn(e.to_string()))?;
        self.invocations.lock().push(invocation);
        Ok(RenderOutcome {
            output_files: vec![frame],
        })
    }
}
