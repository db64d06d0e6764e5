#![forbid(unsafe_code)]

//! The concurrent lifecycle manager of the coordinator process.
//!
//! Subsystems are constructed leaves-first and passed down by dependency
//! injection; teardown runs in reverse. A single `watch` channel broadcasts
//! quit, every background loop selects on it, and `stop` waits for the whole
//! group before closing the storage adapter and clearing the session.

use parking_lot::Mutex;
use renderhive_api::storage::ObjectStore;
use renderhive_consensus::RestConsensusClient;
use renderhive_gateway::GatewayContext;
use renderhive_services::cycle::{CycleEvent, HiveCycleEngine};
use renderhive_services::jobs::JobManager;
use renderhive_services::registry::NodeRegistry;
use renderhive_services::renderer::BlenderDriver;
use renderhive_services::session::SessionGateway;
use renderhive_storage::{IpfsStore, PinningCli};
use renderhive_types::app::{AccountAddress, NodeRoles};
use renderhive_types::config::NodeConfig;
use renderhive_types::error::{ConfigError, CoreError};
use renderhive_types::paths;
use std::sync::Arc;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// The running coordinator: every subsystem, plus the quit broadcast and
/// the background task group.
pub struct Coordinator {
    session: Arc<SessionGateway>,
    jobs: Arc<JobManager>,
    cycle: Arc<HiveCycleEngine>,
    consensus: Arc<RestConsensusClient>,
    store: Arc<IpfsStore>,
    quit_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn parse_address(value: &str, what: &str) -> Result<AccountAddress, CoreError> {
    AccountAddress::parse(value)
        .map_err(|_| ConfigError::Invalid(format!("{what}: `{value}` is not an address")).into())
}

impl Coordinator {
    /// Builds and starts the whole node. Failure here is fatal and the
    /// process exits non-zero; runtime errors later surface through RPC
    /// responses and the log.
    pub async fn start(config: NodeConfig) -> Result<Arc<Self>, CoreError> {
        config.validate()?;

        let data_dir = config.paths.data_dir.clone();
        for dir in [
            paths::RENDER_REQUESTS_LOCAL_DIR,
            paths::RENDER_REQUESTS_NETWORK_DIR,
            paths::BENCHMARKS_DIR,
        ] {
            std::fs::create_dir_all(data_dir.join(dir)).map_err(ConfigError::from)?;
        }

        let sync_topic = parse_address(
            &config.network.topics.hive_cycle_synchronization,
            "hive-cycle synchronization topic",
        )?;
        let queue_topic =
            parse_address(&config.network.topics.render_job_queue, "render job queue topic")?;
        let admin = parse_address(
            &config.network.topics.synchronization_admin,
            "synchronization admin",
        )?;
        let contract = parse_address(&config.network.contract, "coordination contract")?;

        let (quit_tx, quit_rx) = watch::channel(false);

        // Leaves first: consensus and storage adapters, then the registry,
        // the session gateway, the engines, and finally the RPC surface.
        let consensus = Arc::new(RestConsensusClient::new(&config.network, quit_rx.clone())?);
        let store = Arc::new(IpfsStore::start(&config.storage).await?);
        let pinning = Arc::new(PinningCli::new(config.storage.pinning_cli.clone()));
        let registry = Arc::new(AsyncMutex::new(NodeRegistry::open(
            &config.paths.config_dir,
        )?));

        let roles = NodeRoles {
            client: config.node.client_role,
            render: config.node.render_role,
        };
        let session = SessionGateway::new(
            registry,
            consensus.clone(),
            pinning,
            sync_topic.clone(),
            contract,
            config.network.gas_limit,
            roles,
            config.node.name.clone(),
        );
        session.load_local_address().await;

        let cycle = HiveCycleEngine::new(admin);
        let renderer = Arc::new(BlenderDriver::new(config.renderer.stderr_tail_lines));
        let jobs = JobManager::new(
            session.clone(),
            consensus.clone(),
            store.clone(),
            renderer,
            cycle.clone(),
            queue_topic.clone(),
            data_dir,
            roles.render,
        );

        // Topic intake is wired now and subscribed from genesis at sign-in.
        session.register_topic_handler(sync_topic, cycle.topic_handler());
        session.register_topic_handler(queue_topic, jobs.queue_handler());

        let coordinator = Arc::new(Self {
            session: session.clone(),
            jobs: jobs.clone(),
            cycle: cycle.clone(),
            consensus,
            store,
            quit_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(cycle.clone().run(quit_rx.clone())));
        tasks.push(tokio::spawn(jobs.clone().run(quit_rx.clone())));
        tasks.push(tokio::spawn(watch_consistency(
            cycle.clone(),
            session.clone(),
            quit_rx.clone(),
        )));

        let ctx = Arc::new(GatewayContext {
            session,
            jobs,
            cycle,
        });
        let rpc = config.rpc.clone();
        let config_dir = config.paths.config_dir.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) =
                renderhive_gateway::run_server(&rpc, &config_dir, ctx, quit_rx).await
            {
                tracing::error!(target: "node", error = %e, "local RPC endpoint failed");
            }
        }));
        *coordinator.tasks.lock() = tasks;

        tracing::info!(target: "node", "coordinator started");
        Ok(coordinator)
    }

    pub fn session(&self) -> &Arc<SessionGateway> {
        &self.session
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }

    pub fn cycle(&self) -> &Arc<HiveCycleEngine> {
        &self.cycle
    }

    /// Graceful shutdown: broadcast quit, wait for the task group, then
    /// close the storage daemon and clear the session.
    pub async fn stop(&self) {
        tracing::info!(target: "node", "shutting down");
        let _ = self.quit_tx.send(true);

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.consensus.join_subscriptions().await;

        if let Err(e) = self.store.close().await {
            tracing::warn!(target: "node", error = %e, "storage close failed");
        }
        self.session.sign_out();
        tracing::info!(target: "node", event = "shutdown", reason = "complete");
    }
}

/// Invalidates the session when the hive-cycle engine reports contradictory
/// replay; there is no automatic recovery from that state.
async fn watch_consistency(
    cycle: Arc<HiveCycleEngine>,
    session: Arc<SessionGateway>,
    mut quit: watch::Receiver<bool>,
) {
    let mut events = cycle.subscribe_events();
    loop {
        tokio::select! {
            _ = quit.changed() => {
                if *quit.borrow() {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(CycleEvent::Inconsistent) => {
                    session.invalidate("hive cycle history is inconsistent");
                }
                Ok(_) => {}
                Err(_) => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderhive_crypto::keystore;
    use renderhive_crypto::sign::Ed25519KeyPair;
    use renderhive_test_utils::{MockConsensus, MockPinning, MockRenderer, MockStore};
    use renderhive_types::app::NodeRecord;
    use std::time::{Duration, Instant};

    fn addr(s: &str) -> AccountAddress {
        AccountAddress::parse(s).unwrap()
    }

    /// Quit must reach every loop fast: all background tasks exit within
    /// 200ms of the broadcast.
    #[tokio::test]
    async fn quit_broadcast_stops_all_loops_quickly() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("config");

        let pair = Ed25519KeyPair::generate();
        let node = NodeRecord {
            node_id: 1,
            name: "shutdown-test".into(),
            address: addr("0.0.999"),
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

        let session = SessionGateway::new(
            registry,
            Arc::new(MockConsensus::default()),
            Arc::new(MockPinning::default()),
            addr("0.0.4200001"),
            addr("0.0.4200000"),
            300_000,
            node.roles,
            node.name.clone(),
        );
        session.sign_in("p@ss").await.unwrap();

        let cycle = HiveCycleEngine::new(addr("0.0.390000"));
        let jobs = JobManager::new(
            session.clone(),
            Arc::new(MockConsensus::default()),
            Arc::new(MockStore::default()),
            Arc::new(MockRenderer::default()),
            cycle.clone(),
            addr("0.0.4200004"),
            dir.path().join("data"),
            true,
        );

        let (quit_tx, quit_rx) = watch::channel(false);
        let handles = vec![
            tokio::spawn(cycle.clone().run(quit_rx.clone())),
            tokio::spawn(jobs.clone().run(quit_rx.clone())),
            tokio::spawn(watch_consistency(cycle, session, quit_rx)),
        ];
        // Let the loops reach their select points.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        quit_tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_millis(200), handle)
                .await
                .expect("loop did not exit within 200ms")
                .unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(200));
    }
}
