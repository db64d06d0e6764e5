//! Transaction composition, freezing and signing.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use renderhive_api::consensus::{ContractParams, FrozenTransaction};
use renderhive_crypto::sign::Ed25519KeyPair;
use renderhive_types::app::{AccountAddress, ConsensusTimestamp};
use renderhive_types::error::NetworkError;
use serde::{Deserialize, Serialize};

/// The operation a transaction performs on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionBody {
    ConsensusSubmit {
        topic: AccountAddress,
        /// base64 of the raw message payload.
        message: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        scheduled: bool,
    },
    TopicCreate {
        memo: String,
    },
    TopicUpdate {
        topic: AccountAddress,
        memo: String,
    },
    TopicDelete {
        topic: AccountAddress,
    },
    ContractCall {
        contract: AccountAddress,
        function: String,
        params: ContractParams,
        gas: u64,
    },
    ContractCreate {
        /// Hex contract bytecode.
        bytecode: String,
        gas: u64,
    },
    ContractDelete {
        contract: AccountAddress,
    },
    CryptoCreate {
        /// Hex public key of the account being created.
        public_key: String,
        initial_balance: u64,
    },
}

/// A composed transaction, not yet frozen.
///
/// The transaction id is `payer@validStart` and is what the mirror indexes
/// the eventual submission under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub payer: AccountAddress,
    pub valid_start: ConsensusTimestamp,
    pub max_fee: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memo: String,
    pub body: TransactionBody,
}

impl Transaction {
    pub fn new(
        payer: AccountAddress,
        valid_start: ConsensusTimestamp,
        max_fee: u64,
        body: TransactionBody,
    ) -> Self {
        Self {
            transaction_id: format!("{payer}@{valid_start}"),
            payer,
            valid_start,
            max_fee,
            memo: String::new(),
            body,
        }
    }

    /// Freezes the transaction into the canonical unsigned byte form.
    ///
    /// These bytes are what a wallet signs; any later mutation would change
    /// the signature input, so the frozen form is final.
    pub fn freeze(&self) -> Result<FrozenTransaction, NetworkError> {
        let bytes = serde_json::to_vec(self).map_err(|e| NetworkError::Http {
            endpoint: "freeze".into(),
            reason: e.to_string(),
        })?;
        Ok(FrozenTransaction {
            transaction_id: self.transaction_id.clone(),
            bytes,
        })
    }
}

/// One signature over the frozen bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePair {
    /// Hex Ed25519 public key.
    pub public_key: String,
    /// Hex detached signature.
    pub signature: String,
}

/// The wire form handed to the submission bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction_id: String,
    /// base64 of the frozen transaction bytes.
    pub body: String,
    pub signatures: Vec<SignaturePair>,
}

impl SignedTransaction {
    /// Signs frozen bytes with the node's key, appending to any existing
    /// signatures (multi-key topics take several passes).
    pub fn sign(frozen: &FrozenTransaction, signer: &Ed25519KeyPair) -> Self {
        let signature = signer.sign(&frozen.bytes);
        Self {
            transaction_id: frozen.transaction_id.clone(),
            body: BASE64.encode(&frozen.bytes),
            signatures: vec![SignaturePair {
                public_key: hex::encode(signer.public_key().to_bytes()),
                signature: hex::encode(signature.to_bytes()),
            }],
        }
    }

    pub fn add_signature(&mut self, frozen: &FrozenTransaction, signer: &Ed25519KeyPair) {
        let signature = signer.sign(&frozen.bytes);
        self.signatures.push(SignaturePair {
            public_key: hex::encode(signer.public_key().to_bytes()),
            signature: hex::encode(signature.to_bytes()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> AccountAddress {
        AccountAddress::parse(s).unwrap()
    }

    #[test]
    fn transaction_id_embeds_payer_and_valid_start() {
        let tx = Transaction::new(
            addr("0.0.1001"),
            ConsensusTimestamp::new(1683577645, 500),
            100,
            TransactionBody::TopicCreate { memo: "m".into() },
        );
        assert_eq!(tx.transaction_id, "0.0.1001@1683577645.000000500");
    }

    #[test]
    fn freeze_is_deterministic_and_signable() {
        let tx = Transaction::new(
            addr("0.0.1001"),
            ConsensusTimestamp::from_unix_secs(7),
            100,
            TransactionBody::ConsensusSubmit {
                topic: addr("0.0.2002"),
                message: BASE64.encode(b"hello"),
                scheduled: false,
            },
        );
        let a = tx.freeze().unwrap();
        let b = tx.freeze().unwrap();
        assert_eq!(a.bytes, b.bytes);

        let signer = Ed25519KeyPair::generate();
        let signed = SignedTransaction::sign(&a, &signer);
        assert_eq!(signed.signatures.len(), 1);

        // The signature verifies over exactly the frozen bytes.
        let sig = renderhive_crypto::sign::Ed25519Signature::from_bytes(
            &hex::decode(&signed.signatures[0].signature).unwrap(),
        )
        .unwrap();
        signer.public_key().verify(&a.bytes, &sig).unwrap();
    }
}
