use super::*;
use crate::registry::NodeRegistry;
use renderhive_test_utils::{MockConsensus, MockPinning};
use renderhive_types::error::KeystoreError;
use std::path::Path;
use std::sync::Arc;

const OPERATOR_ADDR: &str = "0.0.390079";
const ASSIGNED_ADDR: &str = "0.0.4117950";
const CREATE_TX: &str = "0.0.390079-1683577645-123456789";

fn addr(s: &str) -> AccountAddress {
    AccountAddress::parse(s).unwrap()
}

fn gateway(config_dir: &Path, consensus: Arc<MockConsensus>) -> Arc<SessionGateway> {
    let registry = Arc::new(AsyncMutex::new(NodeRegistry::open(config_dir).unwrap()));
    SessionGateway::new(
        registry,
        consensus,
        Arc::new(MockPinning::default()),
        addr("0.0.4200001"),
        addr("0.0.4200000"),
        300_000,
        NodeRoles {
            client: true,
            render: true,
        },
        "alice-mac".into(),
    )
}

fn init_request() -> SignUpRequest {
    SignUpRequest {
        step: "init".into(),
        operator: Some(OperatorDraft {
            user_id: 1,
            username: "alice".into(),
            email: "alice@example.org".into(),
            address: addr(OPERATOR_ADDR),
        }),
        node_name: Some("alice-mac".into()),
        passphrase: Some("p@ss".into()),
        create_transaction_id: None,
        node_id: None,
    }
}

fn create_request() -> SignUpRequest {
    SignUpRequest {
        step: "create".into(),
        operator: None,
        node_name: None,
        passphrase: None,
        create_transaction_id: Some(CREATE_TX.into()),
        node_id: None,
    }
}

fn mock_consensus() -> Arc<MockConsensus> {
    Arc::new(
        MockConsensus::default()
            .with_account(OPERATOR_ADDR, "302a300506032b6570032100aa")
            .with_creation_transaction(CREATE_TX, ASSIGNED_ADDR),
    )
}

#[tokio::test(start_paused = true)]
async fn fresh_sign_up_to_sign_in() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(dir.path(), mock_consensus());

    // init: operator persisted, node key staged under its alias.
    let init = gateway.sign_up(init_request()).await.unwrap();
    let alias = init.node_account_address.unwrap();
    assert!(alias.starts_with("x."));
    assert!(dir.path().join(paths::OPERATOR_FILE).exists());
    assert!(paths::keystore_path(dir.path(), &addr(&alias)).exists());

    // init again is idempotent: same alias, no second keystore.
    let again = gateway.sign_up(init_request()).await.unwrap();
    assert_eq!(again.node_account_address.unwrap(), alias);

    // create: keystore renamed to the assigned address, node.json persisted.
    let created = gateway.sign_up(create_request()).await.unwrap();
    assert_eq!(created.node_account_address.unwrap(), ASSIGNED_ADDR);
    assert!(dir.path().join(paths::NODE_FILE).exists());
    assert!(!paths::keystore_path(dir.path(), &addr(&alias)).exists());
    assert!(paths::keystore_path(dir.path(), &addr(ASSIGNED_ADDR)).exists());

    // The sign-in payload is the hash of the node record file.
    let node_bytes = std::fs::read(dir.path().join(paths::NODE_FILE)).unwrap();
    assert_eq!(
        gateway.get_sign_in_payload().await.unwrap(),
        renderhive_crypto::sha256(&node_bytes)
    );

    // Wrong passphrase is a keystore error and leaves the session closed.
    let err = gateway.sign_in("wrong").await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Keystore(KeystoreError::WrongPassphrase)
    ));
    assert!(!gateway.is_active());

    // The right passphrase opens the session and mints a verifiable cookie.
    let signed_in = gateway.sign_in("p@ss").await.unwrap();
    assert!(signed_in.signed_in);
    assert!(gateway.is_active());
    gateway.verify_cookie(&signed_in.token).unwrap();

    // Sign-out flips the flag and the cookie dies with the session.
    let signed_out = gateway.sign_out();
    assert!(!signed_out.signed_in);
    assert!(!gateway.is_active());
    assert!(gateway.verify_cookie(&signed_in.token).is_err());
}

#[tokio::test(start_paused = true)]
async fn create_before_init_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(dir.path(), mock_consensus());
    let err = gateway.sign_up(create_request()).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::State(StateError::SignUpOrder { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn create_rejects_non_creation_transactions() {
    let dir = tempfile::tempdir().unwrap();
    let consensus = mock_consensus();
    consensus.transactions.lock().insert(
        "sometx".into(),
        renderhive_api::consensus::TransactionInfo {
            transaction_id: "sometx".into(),
            name: "CONTRACTCALL".into(),
            result: "SUCCESS".into(),
            consensus_timestamp: None,
            entity: None,
        },
    );
    let gateway = gateway(dir.path(), consensus);
    gateway.sign_up(init_request()).await.unwrap();

    let mut request = create_request();
    request.create_transaction_id = Some("sometx".into());
    let err = gateway.sign_up(request).await.unwrap_err();
    assert!(matches!(err, CoreError::Network(_)));
    // The failure left no node record behind; init state is recoverable.
    assert!(!dir.path().join(paths::NODE_FILE).exists());
}

#[tokio::test(start_paused = true)]
async fn contract_step_composes_a_wallet_payload() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(dir.path(), mock_consensus());
    gateway.sign_up(init_request()).await.unwrap();
    gateway.sign_up(create_request()).await.unwrap();

    let response = gateway
        .sign_up(SignUpRequest {
            step: "contract".into(),
            operator: None,
            node_name: None,
            passphrase: None,
            create_transaction_id: None,
            node_id: None,
        })
        .await
        .unwrap();
    assert!(response.payload.is_some());

    let storage = gateway
        .sign_up(SignUpRequest {
            step: "storage".into(),
            operator: None,
            node_name: None,
            passphrase: None,
            create_transaction_id: None,
            node_id: None,
        })
        .await
        .unwrap();
    assert!(storage.message.contains("did:key:"));

    let finalized = gateway
        .sign_up(SignUpRequest {
            step: "finalize".into(),
            operator: None,
            node_name: None,
            passphrase: None,
            create_transaction_id: None,
            node_id: Some(42),
        })
        .await
        .unwrap();
    assert_eq!(finalized.message, "sign-up complete");
}

#[tokio::test(start_paused = true)]
async fn sign_in_subscribes_registered_topics_from_genesis() {
    let dir = tempfile::tempdir().unwrap();
    let consensus = mock_consensus();
    let gateway = gateway(dir.path(), consensus.clone());
    gateway.sign_up(init_request()).await.unwrap();
    gateway.sign_up(create_request()).await.unwrap();

    gateway.register_topic_handler(addr("0.0.4200001"), Arc::new(|_message| {}));
    gateway.register_topic_handler(addr("0.0.4200004"), Arc::new(|_message| {}));
    gateway.sign_in("p@ss").await.unwrap();

    let topics = consensus.subscribed_topics.lock();
    assert_eq!(topics.len(), 2);

    // A repeated sign-in must not double-subscribe.
    drop(topics);
    gateway.sign_out();
    gateway.sign_in("p@ss").await.unwrap();
    assert_eq!(consensus.subscribed_topics.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn signing_requires_an_active_session()
{
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway(dir.path(), mock_consensus());
    gateway.sign_up(init_request()).await.unwrap();
    gateway.sign_up(create_request()).await.unwrap();

    let command = Command::broadcast(
        renderhive_types::command::find("PingService.SayHello").unwrap(),
        serde_json::json!({}),
    );
    let err = gateway
        .publish_command(&addr("0.0.4200004"), &command)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::State(StateError::SessionInactive)
    ));

    gateway.sign_in("p@ss").await.unwrap();
    gateway
        .publish_command(&addr("0.0.4200004"), &command)
        .await
        .unwrap();
}
