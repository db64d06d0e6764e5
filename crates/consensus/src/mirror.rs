//! The mirror REST client: the read side of the consensus service.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use renderhive_api::consensus::{
    AccountInfo, ContractInfo, TopicInfo, TopicMessage, TopicMessagePage, TransactionInfo,
};
use renderhive_types::app::{AccountAddress, ConsensusTimestamp};
use renderhive_types::error::NetworkError;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub(crate) struct MirrorClient {
    http: reqwest::Client,
    base: String,
}

// Wire DTOs, kept private: the api-level structs are what cross the seam.

#[derive(Deserialize)]
struct KeyDto {
    key: String,
}

#[derive(Deserialize)]
struct BalanceDto {
    balance: u64,
}

#[derive(Deserialize)]
struct AccountDto {
    account: String,
    key: Option<KeyDto>,
    balance: Option<BalanceDto>,
}

#[derive(Deserialize)]
struct TransactionDto {
    transaction_id: String,
    name: String,
    result: String,
    consensus_timestamp: Option<String>,
    entity_id: Option<String>,
}

#[derive(Deserialize)]
struct TransactionsDto {
    #[serde(default)]
    transactions: Vec<TransactionDto>,
}

#[derive(Deserialize)]
struct TopicMessageDto {
    consensus_timestamp: String,
    /// base64 payload.
    message: String,
    payer_account_id: Option<String>,
    sequence_number: u64,
    topic_id: String,
}

#[derive(Deserialize, Default)]
struct LinksDto {
    next: Option<String>,
}

#[derive(Deserialize)]
struct TopicMessagesDto {
    #[serde(default)]
    messages: Vec<TopicMessageDto>,
    #[serde(default)]
    links: Option<LinksDto>,
}

#[derive(Deserialize)]
struct ContractDto {
    contract_id: String,
    #[serde(default)]
    memo: String,
    created_timestamp: Option<String>,
}

#[derive(Deserialize)]
struct TopicDto {
    topic_id: String,
    #[serde(default)]
    memo: String,
    admin_key: Option<KeyDto>,
    submit_key: Option<KeyDto>,
    #[serde(default)]
    sequence_number: u64,
}

impl MirrorClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base: base_url.trim_end_matches('/').to_owned(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, NetworkError> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| NetworkError::Http {
                endpoint: url.clone(),
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(NetworkError::Mirror(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        response.json().await.map_err(|e| NetworkError::Mirror(format!("{url}: {e}")))
    }

    pub async fn account_info(&self, address: &AccountAddress) -> Result<AccountInfo, NetworkError> {
        let dto: AccountDto = self.get_json(&format!("/api/v1/accounts/{address}")).await?;
        Ok(AccountInfo {
            address: AccountAddress::parse(&dto.account)
                .map_err(|e| NetworkError::Mirror(e.to_string()))?,
            public_key: dto.key.map(|k| k.key).unwrap_or_default(),
            balance: dto.balance.map(|b| b.balance).unwrap_or_default(),
        })
    }

    pub async fn transaction_info(
        &self,
        transaction_id: &str,
    ) -> Result<TransactionInfo, NetworkError> {
        let dto: TransactionsDto = self
            .get_json(&format!("/api/v1/transactions/{transaction_id}"))
            .await?;
        let tx = dto
            .transactions
            .into_iter()
            .next()
            .ok_or_else(|| NetworkError::Mirror(format!("transaction {transaction_id} not found")))?;
        Ok(TransactionInfo {
            transaction_id: tx.transaction_id,
            name: tx.name,
            result: tx.result,
            consensus_timestamp: parse_ts_opt(tx.consensus_timestamp)?,
            entity: tx
                .entity_id
                .map(|id| AccountAddress::parse(&id))
                .transpose()
                .map_err(|e| NetworkError::Mirror(e.to_string()))?,
        })
    }

    pub async fn topic_info(&self, topic: &AccountAddress) -> Result<TopicInfo, NetworkError> {
        let dto: TopicDto = self.get_json(&format!("/api/v1/topics/{topic}")).await?;
        Ok(TopicInfo {
            topic: AccountAddress::parse(&dto.topic_id)
                .map_err(|e| NetworkError::Mirror(e.to_string()))?,
            memo: dto.memo,
            admin_key: dto.admin_key.map(|k| k.key),
            submit_key: dto.submit_key.map(|k| k.key),
            sequence_number: dto.sequence_number,
        })
    }

    pub async fn contract_info(
        &self,
        contract: &AccountAddress,
    ) -> Result<ContractInfo, NetworkError> {
        let dto: ContractDto = self.get_json(&format!("/api/v1/contracts/{contract}")).await?;
        Ok(ContractInfo {
            contract: AccountAddress::parse(&dto.contract_id)
                .map_err(|e| NetworkError::Mirror(e.to_string()))?,
            memo: dto.memo,
            created_timestamp: parse_ts_opt(dto.created_timestamp)?,
        })
    }

    /// One page of topic messages. `next` (when given) is the mirror's own
    /// pagination link and wins over the other parameters; `after` filters
    /// to messages strictly later than the given timestamp.
    pub async fn topic_messages(
        &self,
        topic: &AccountAddress,
        limit: u32,
        ascending: bool,
        after: Option<ConsensusTimestamp>,
        next: Option<String>,
    ) -> Result<TopicMessagePage, NetworkError> {
        let path = match next {
            Some(link) => link,
            None => {
                let order = if ascending { "asc" } else { "desc" };
                let mut path =
                    format!("/api/v1/topics/{topic}/messages?limit={limit}&order={order}");
                if let Some(ts) = after {
                    path.push_str(&format!("&timestamp=gt:{ts}"));
                }
                path
            }
        };
        let dto: TopicMessagesDto = self.get_json(&path).await?;

        let mut messages = Vec::with_capacity(dto.messages.len());
        for m in dto.messages {
            messages.push(TopicMessage {
                topic: AccountAddress::parse(&m.topic_id)
                    .map_err(|e| NetworkError::Mirror(e.to_string()))?,
                sequence_number: m.sequence_number,
                consensus_timestamp: m
                    .consensus_timestamp
                    .parse()
                    .map_err(|_| NetworkError::Mirror("bad consensus timestamp".into()))?,
                payer: m
                    .payer_account_id
                    .map(|id| AccountAddress::parse(&id))
                    .transpose()
                    .map_err(|e| NetworkError::Mirror(e.to_string()))?,
                payload: BASE64
                    .decode(&m.message)
                    .map_err(|e| NetworkError::Mirror(format!("bad message base64: {e}")))?,
            });
        }
        Ok(TopicMessagePage {
            messages,
            next: dto.links.and_then(|l| l.next),
        })
    }
}

fn parse_ts_opt(raw: Option<String>) -> Result<Option<ConsensusTimestamp>, NetworkError> {
    raw.map(|s| {
        s.parse()
            .map_err(|_| NetworkError::Mirror("bad consensus timestamp".into()))
    })
    .transpose()
}
