use super::*;
use base64::Engine as _;
use crate::cycle::HiveCycleEngine;
use crate::registry::NodeRegistry;
use crate::session::SessionGateway;
use renderhive_test_utils::{MockConsensus, MockPinning, MockRenderer, MockStore};
use renderhive_api::consensus::TopicMessage;
use renderhive_crypto::keystore;
use renderhive_crypto::sign::Ed25519KeyPair;
use renderhive_types::app::{
    ConsensusTimestamp, HiveCycleConfigurationMessage, NodeRecord, NodeRoles,
    RendererVersionSupport,
};
use renderhive_types::paths;
use tokio::sync::Mutex as AsyncMutex;

const NODE_ADDR: &str = "0.0.999";
const ADMIN_ADDR: &str = "0.0.390000";
const QUEUE_TOPIC: &str = "0.0.4200004";

fn addr(s: &str) -> AccountAddress {
    AccountAddress::parse(s).unwrap()
}

struct Harness {
    manager: Arc<JobManager>,
    session: Arc<SessionGateway>,
    consensus: Arc<MockConsensus>,
    store: Arc<MockStore>,
    cycle: Arc<HiveCycleEngine>,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join("config");
    let data_dir = dir.path().join("data");

    // A registered node with a decryptable keystore, so the session gateway
    // can open a real session against the mocks.
    let pair = Ed25519KeyPair::generate();
    let node = NodeRecord {
        node_id: 7,
        name: "test-node".into(),
        address: addr(NODE_ADDR),
        public_key: hex::encode(pair.public_key().to_bytes()),
        roles: NodeRoles {
            client: true,
            render: true,
        },
    };
    let registry = {
        let mut registry = NodeRegistry::open(&config_dir).unwrap();
        registry.save_node(node.clone()).unwrap();
        Arc::new(AsyncMutex::new(registry))
    };
    keystore::save_encrypted_file(
        &paths::keystore_path(&config_dir, &node.address),
        &pair.seed().0,
        "p@ss",
    )
    .unwrap();

    let consensus = Arc::new(MockConsensus::default());
    let store = Arc::new(MockStore::default());
    let session = SessionGateway::new(
        registry,
        consensus.clone(),
        Arc::new(MockPinning::default()),
        addr("0.0.4200001"),
        addr("0.0.4200000"),
        300_000,
        node.roles,
        node.name.clone(),
    );
    session.sign_in("p@ss").await.unwrap();

    let cycle = HiveCycleEngine::new(addr(ADMIN_ADDR));
    cycle
        .apply_message(&config_message(1, 300, ConsensusTimestamp::from_unix_secs(1), 1))
        .unwrap();

    let manager = JobManager::new(
        session.clone(),
        consensus.clone(),
        store.clone(),
        Arc::new(MockRenderer::default()),
        cycle.clone(),
        addr(QUEUE_TOPIC),
        data_dir,
        true,
    );
    Harness {
        manager,
        session,
        consensus,
        store,
        cycle,
        _dir: dir,
    }
}

fn config_message(
    iteration: u64,
    duration: u64,
    at: ConsensusTimestamp,
    sequence: u64,
) -> TopicMessage {
    TopicMessage {
        topic: addr("0.0.4200001"),
        sequence_number: sequence,
        consensus_timestamp: at,
        payer: Some(addr(ADMIN_ADDR)),
        payload: serde_json::to_vec(&HiveCycleConfigurationMessage {
            iteration,
            duration,
            timestamp: at,
        })
        .unwrap(),
    }
}

fn queue_message(command: &Command, sequence: u64) -> TopicMessage {
    let envelope = command.encode().unwrap();
    TopicMessage {
        topic: addr(QUEUE_TOPIC),
        sequence_number: sequence,
        consensus_timestamp: ConsensusTimestamp::from_unix_secs(100 + sequence as i64),
        payer: None,
        payload: serde_json::to_vec(&envelope).unwrap(),
    }
}

fn remote_request(cid: &str, owner: &str) -> RenderRequest {
    RenderRequest {
        cid: Some(Cid(cid.into())),
        user_id: 11,
        node_address: addr(owner),
        version: "4.1.1".into(),
        engine: RenderEngine::Cycles,
        device: RenderDevice::Cpu,
        frame_start: 1,
        frame_end: 10,
        frame_step: 1,
        output_format: "PNG".into(),
        max_price: 100,
        scene_file: "scene.blend".into(),
    }
}

fn submit_command(request: &RenderRequest) -> Command {
    Command::broadcast(
        command::find("NodeService.SubmitRenderRequest").unwrap(),
        serde_json::to_value(request).unwrap(),
    )
}

fn claim_command(cid: &str, claimant: &str, cycle: u64) -> Command {
    Command::broadcast(
        command::find("NodeService.ClaimRenderJob").unwrap(),
        serde_json::to_value(ClaimParams {
            cid: Cid(cid.into()),
            claim: JobClaim {
                node_address: addr(claimant),
                hive_cycle: cycle,
                work_share: FULL_WORK_SHARE,
                consensus_root: [0u8; 32],
                job_root: [0u8; 32],
            },
        })
        .unwrap(),
    )
}

fn offer_params() -> CreateRenderOfferParams {
    let mut versions = BTreeMap::new();
    versions.insert(
        "4.1.1".to_owned(),
        RendererVersionSupport {
            engines: vec![RenderEngine::Cycles, RenderEngine::Eevee],
            devices: vec![RenderDevice::Cpu],
            threads: 8,
            executable: "/usr/bin/blender".into(),
        },
    );
    CreateRenderOfferParams {
        versions,
        price: Some(50),
        benchmark: None,
    }
}

#[tokio::test]
async fn queue_membership_follows_consensus_order() {
    let h = harness().await;
    let handler = h.manager.queue_handler();

    handler(queue_message(&submit_command(&remote_request("bafyjob1", "0.0.111")), 1));
    handler(queue_message(&submit_command(&remote_request("bafyjob2", "0.0.222")), 2));
    // A replayed duplicate leaves the queue untouched.
    handler(queue_message(&submit_command(&remote_request("bafyjob1", "0.0.111")), 3));

    let queue = h.manager.queue_snapshot();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[0].request_cid.as_str(), "bafyjob1");
    assert_eq!(queue[1].request_cid.as_str(), "bafyjob2");
    assert!(queue.iter().all(|j| j.state == JobState::Queued));
}

#[tokio::test]
async fn claim_single_winner_and_loser_returns_to_idle() {
    let h = harness().await;
    h.manager.create_render_offer(offer_params()).unwrap();
    let handler = h.manager.queue_handler();

    handler(queue_message(&submit_command(&remote_request("bafyjob", "0.0.111")), 1));

    // Another node's claim is included first; ours was staked meanwhile.
    h.manager.set_busy(true);
    handler(queue_message(&claim_command("bafyjob", "0.0.222", 1), 2));
    handler(queue_message(&claim_command("bafyjob", NODE_ADDR, 1), 3));

    let job = &h.manager.queue_snapshot()[0];
    assert_eq!(job.state, JobState::Claimed);
    assert_eq!(job.winner.as_ref().unwrap().as_str(), "0.0.222");
    assert_eq!(job.claims.len(), 2);
    // The loser is idle again; the winner's state is untouched.
    assert!(!h.manager.is_busy());
}

#[tokio::test]
async fn double_claim_invalidates_the_session() {
    let h = harness().await;
    let handler = h.manager.queue_handler();

    handler(queue_message(&submit_command(&remote_request("bafyjob", "0.0.111")), 1));
    handler(queue_message(&claim_command("bafyjob", "0.0.222", 1), 2));
    assert!(h.session.is_active());
    handler(queue_message(&claim_command("bafyjob", "0.0.222", 1), 3));
    assert!(!h.session.is_active());
}

#[tokio::test]
async fn completion_advances_to_rendered() {
    let h = harness().await;
    let handler = h.manager.queue_handler();

    handler(queue_message(&submit_command(&remote_request("bafyjob", "0.0.111")), 1));
    handler(queue_message(&claim_command("bafyjob", "0.0.222", 1), 2));
    let complete = Command::broadcast(
        command::find("NodeService.CompleteRenderJob").unwrap(),
        serde_json::to_value(CompleteParams {
            cid: Cid("bafyjob".into()),
            output_cid: Cid("bafyout".into()),
        })
        .unwrap(),
    );
    handler(queue_message(&complete, 3));

    let job = &h.manager.queue_snapshot()[0];
    assert_eq!(job.state, JobState::Rendered);
    assert_eq!(job.output_cid.as_ref().unwrap().as_str(), "bafyout");
}

#[tokio::test]
async fn claim_timeout_requeues_the_job() {
    let h = harness().await;
    let handler = h.manager.queue_handler();

    handler(queue_message(&submit_command(&remote_request("bafyjob", "0.0.111")), 1));
    handler(queue_message(&claim_command("bafyjob", "0.0.222", 1), 2));
    assert_eq!(h.manager.queue_snapshot()[0].state, JobState::Claimed);

    // Claimed in cycle 1, so the deadline is cycle 2; crossing into cycle 3
    // with no completion requeues.
    h.manager.sweep_claim_timeouts(2);
    assert_eq!(h.manager.queue_snapshot()[0].state, JobState::Claimed);
    h.manager.sweep_claim_timeouts(3);
    let job = &h.manager.queue_snapshot()[0];
    assert_eq!(job.state, JobState::Queued);
    assert!(job.claims.is_empty());
    assert!(job.winner.is_none());
}

#[tokio::test]
async fn cancel_is_rejected_after_claim() {
    let h = harness().await;
    let handler = h.manager.queue_handler();

    // Stage a local request so there is something to cancel.
    let created = h
        .manager
        .create_render_request(CreateRenderRequestParams {
            version: "4.1.1".into(),
            engine: RenderEngine::Cycles,
            device: RenderDevice::Cpu,
            frame_start: 1,
            frame_end: 4,
            frame_step: 1,
            output_format: "PNG".into(),
            max_price: 100,
            files: vec![FileUpload {
                name: "scene.blend".into(),
                content: base64::engine::general_purpose::STANDARD.encode(b"my scene"),
            }],
        })
        .await
        .unwrap();

    // The announcement comes back in consensus order, then a claim lands.
    let mut request = remote_request(created.cid.as_str(), NODE_ADDR);
    request.cid = Some(created.cid.clone());
    handler(queue_message(&submit_command(&request), 1));
    handler(queue_message(&claim_command(created.cid.as_str(), "0.0.222", 1), 2));

    let err = h.manager.cancel_render_request(&created.cid).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::State(StateError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn cancel_while_queued_publishes_and_transitions_on_replay() {
    let h = harness().await;
    let handler = h.manager.queue_handler();

    let created = h
        .manager
        .create_render_request(CreateRenderRequestParams {
            version: "4.1.1".into(),
            engine: RenderEngine::Cycles,
            device: RenderDevice::Cpu,
            frame_start: 1,
            frame_end: 4,
            frame_step: 1,
            output_format: "PNG".into(),
            max_price: 100,
            files: vec![FileUpload {
                name: "scene.blend".into(),
                content: base64::engine::general_purpose::STANDARD.encode(b"other scene"),
            }],
        })
        .await
        .unwrap();
    let mut request = remote_request(created.cid.as_str(), NODE_ADDR);
    request.cid = Some(created.cid.clone());
    handler(queue_message(&submit_command(&request), 1));

    h.manager.cancel_render_request(&created.cid).await.unwrap();
    assert_eq!(h.consensus.submitted.lock().len(), 1);

    // The cancellation envelope returns through the topic.
    let cancel = Command::broadcast(
        command::find("NodeService.CancelRenderRequest").unwrap(),
        serde_json::to_value(CancelParams {
            cid: created.cid.clone(),
        })
        .unwrap(),
    );
    handler(queue_message(&cancel, 2));
    assert_eq!(h.manager.queue_snapshot()[0].state, JobState::Cancelled);
}

#[tokio::test]
async fn audience_filtered_envelopes_are_dropped() {
    let h = harness().await;
    let handler = h.manager.queue_handler();

    // Addressed to someone else entirely.
    let command = Command::addressed(
        vec![addr("0.0.777")],
        command::find("NodeService.SubmitRenderRequest").unwrap(),
        serde_json::to_value(remote_request("bafyjob", "0.0.111")).unwrap(),
    );
    handler(queue_message(&command, 1));
    assert!(h.manager.queue_snapshot().is_empty());

    // Addressed to us explicitly.
    let command = Command::addressed(
        vec![addr(NODE_ADDR)],
        command::find("NodeService.SubmitRenderRequest").unwrap(),
        serde_json::to_value(remote_request("bafyjob", "0.0.111")).unwrap(),
    );
    handler(queue_message(&command, 2));
    assert_eq!(h.manager.queue_snapshot().len(), 1);
}

#[tokio::test]
async fn compatible_queued_job_enqueues_a_claim_attempt() {
    let h = harness().await;
    h.manager.create_render_offer(offer_params()).unwrap();
    let handler = h.manager.queue_handler();
    handler(queue_message(&submit_command(&remote_request("bafyjob", "0.0.111")), 1));

    // The deferred claim runs on the manager loop and reaches the contract.
    let (quit_tx, quit_rx) = tokio::sync::watch::channel(false);
    let loop_handle = tokio::spawn(h.manager.clone().run(quit_rx));
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    quit_tx.send(true).unwrap();
    loop_handle.await.unwrap();

    let calls = h.consensus.executed_calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].function, "claimRenderJob");
    // The claim envelope followed the contract call onto the queue topic.
    assert_eq!(h.consensus.submitted.lock().len(), 1);
    // Current cycle is embedded in the claim.
    assert!(h.cycle.current_cycle().is_ok());
    // Still busy until the winning claim comes back on the topic.
    assert!(h.manager.is_busy());
}

#[tokio::test]
async fn incompatible_or_own_jobs_are_not_claimed() {
    let h = harness().await;
    h.manager.create_render_offer(offer_params()).unwrap();
    let handler = h.manager.queue_handler();

    // Wrong device: no claim attempt.
    let mut incompatible = remote_request("bafyjob1", "0.0.111");
    incompatible.device = RenderDevice::Optix;
    handler(queue_message(&submit_command(&incompatible), 1));

    // Our own submission: never claimed by us.
    handler(queue_message(&submit_command(&remote_request("bafyjob2", NODE_ADDR)), 2));

    let (quit_tx, quit_rx) = tokio::sync::watch::channel(false);
    let loop_handle = tokio::spawn(h.manager.clone().run(quit_rx));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    quit_tx.send(true).unwrap();
    loop_handle.await.unwrap();

    assert!(h.consensus.executed_calls.lock().is_empty());
    assert!(!h.manager.is_busy());
}

#[tokio::test]
async fn won_claim_executes_renders_and_settles() {
    let h = harness().await;
    h.manager.create_render_offer(offer_params()).unwrap();
    let handler = h.manager.queue_handler();

    handler(queue_message(&submit_command(&remote_request("bafyjob", "0.0.111")), 1));
    // We win the claim outright.
    h.manager.set_busy(true);
    handler(queue_message(&claim_command("bafyjob", NODE_ADDR, 1), 2));

    let (quit_tx, quit_rx) = tokio::sync::watch::channel(false);
    let loop_handle = tokio::spawn(h.manager.clone().run(quit_rx));
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    quit_tx.send(true).unwrap();
    loop_handle.await.unwrap();

    // Scene fetched, frames pinned, completion envelope and settlement call
    // issued, node idle again.
    assert_eq!(h.store.fetched.lock().len(), 1);
    assert!(!h.store.pinned.lock().is_empty());
    let calls = h.consensus.executed_calls.lock();
    assert!(calls.iter().any(|c| c.function == "completeRenderJob"));
    assert!(h
        .consensus
        .submitted
        .lock()
        .iter()
        .any(|(topic, _)| topic.as_str() == QUEUE_TOPIC));
    assert!(!h.manager.is_busy());
}

#[tokio::test]
async fn offer_publish_is_immutable_after_cid() {
    let h = harness().await;
    h.manager.create_render_offer(offer_params()).unwrap();
    let published = h.manager.submit_render_offer().await.unwrap();
    assert!(!published.cid.as_str().is_empty());

    // A second publish of the same draft is rejected; a new draft is the
    // only way to a new CID.
    let err = h.manager.submit_render_offer().await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::State(StateError::AlreadyPublished(_))
    ));
    h.manager.create_render_offer(offer_params()).unwrap();
    assert!(h.manager.submit_render_offer().await.is_ok());
}
