//! The render-job lifecycle: request → queue → claim → execute → settle.
//!
//! All network-visible state changes travel as envelopes on the queue topic
//! and are applied here in consensus order; the local RPC operations only
//! stage work and compose transactions. The manager owns the renderer
//! subprocess and the job entries.

mod store;

#[cfg(test)]
mod tests;

use crate::cycle::{CycleEvent, HiveCycleEngine};
use crate::session::SessionGateway;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::Mutex;
use renderhive_api::consensus::{ConsensusProvider, ContractParams, TopicHandler, TopicMessage};
use renderhive_api::render::{RenderInvocation, RendererDriver};
use renderhive_api::storage::ObjectStore;
use renderhive_types::app::{
    AccountAddress, BenchmarkResult, Cid, JobClaim, JobState, RenderDevice, RenderEngine,
    RenderJob, RenderOffer, RenderRequest, RendererVersionSupport,
};
use renderhive_types::command::{self, Command, MethodDescriptor, ServiceId};
use renderhive_types::error::{ConsistencyError, CoreError, ProtocolError, StateError};
use renderhive_types::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use store::JobStore;
use tokio::sync::{mpsc, watch};

/// The full work share, in parts per 10 000, until split rendering exists.
const FULL_WORK_SHARE: u32 = 10_000;

/// Deferred work the topic handler hands to the manager's own loop so the
/// handler itself never blocks.
#[derive(Debug)]
enum WorkItem {
    TryClaim(Cid),
    Execute(Cid),
    ConfirmSubmission { cid: Cid, transaction_id: String },
    Unpin(Cid),
}

// --- Local RPC parameter and response shapes ------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct FileUpload {
    pub name: String,
    /// base64 file content as received from the UI.
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRenderRequestParams {
    pub version: String,
    pub engine: RenderEngine,
    pub device: RenderDevice,
    pub frame_start: i64,
    pub frame_end: i64,
    pub frame_step: u32,
    pub output_format: String,
    pub max_price: u64,
    pub files: Vec<FileUpload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRenderOfferParams {
    pub versions: BTreeMap<String, RendererVersionSupport>,
    #[serde(default)]
    pub price: Option<u64>,
    #[serde(default)]
    pub benchmark: Option<BenchmarkResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CidResponse {
    pub cid: Cid,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub transaction_id: String,
    /// base64 of the frozen contract transaction for the wallet.
    pub payload: String,
}

// --- Queue-topic envelope payloads ----------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CancelParams {
    cid: Cid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClaimParams {
    cid: Cid,
    claim: JobClaim,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CompleteParams {
    cid: Cid,
    output_cid: Cid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PauseOfferParams {
    node_address: AccountAddress,
    paused: bool,
}

/// The job lifecycle manager.
pub struct JobManager {
    session: Arc<SessionGateway>,
    consensus: Arc<dyn ConsensusProvider>,
    store: Arc<dyn ObjectStore>,
    renderer: Arc<dyn RendererDriver>,
    cycle: Arc<HiveCycleEngine>,
    queue_topic: AccountAddress,
    data_dir: PathBuf,
    render_role: bool,
    state: Mutex<JobStore>,
    /// True while this node is claiming or rendering; a busy node never
    /// stakes another claim.
    busy: AtomicBool,
    staging_counter: AtomicU64,
    work_tx: mpsc::UnboundedSender<WorkItem>,
    work_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkItem>>>,
}

impl JobManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<SessionGateway>,
        consensus: Arc<dyn ConsensusProvider>,
        store: Arc<dyn ObjectStore>,
        renderer: Arc<dyn RendererDriver>,
        cycle: Arc<HiveCycleEngine>,
        queue_topic: AccountAddress,
        data_dir: PathBuf,
        render_role: bool,
    ) -> Arc<Self> {
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            session,
            consensus,
            store,
            renderer,
            cycle,
            queue_topic,
            data_dir,
            render_role,
            state: Mutex::new(JobStore::default()),
            busy: AtomicBool::new(false),
            staging_counter: AtomicU64::new(0),
            work_tx,
            work_rx: Mutex::new(Some(work_rx)),
        })
    }

    // --- Local RPC operations (demand side) ------------------------------

    /// Receives the request files from the UI, stages them under the local
    /// requests directory, and computes the CID without pinning.
    pub async fn create_render_request(
        &self,
        params: CreateRenderRequestParams,
    ) -> Result<CidResponse, CoreError> {
        let node_address = self
            .session
            .local_address()
            .ok_or(StateError::SessionInactive)?;
        if params.files.is_empty() {
            return Err(StateError::InvalidValue("no files in request".into()).into());
        }

        let staging = self.local_requests_dir().join(format!(
            "staging-{}-{}",
            std::process::id(),
            self.staging_counter.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| StateError::InvalidValue(format!("staging directory: {e}")))?;

        let mut scene_file = None;
        for file in &params.files {
            if file.name.contains('/') || file.name.contains("..") {
                return Err(
                    StateError::InvalidValue(format!("unsafe file name `{}`", file.name)).into(),
                );
            }
            let bytes = BASE64
                .decode(&file.content)
                .map_err(|e| StateError::InvalidValue(format!("file `{}`: {e}", file.name)))?;
            tokio::fs::write(staging.join(&file.name), &bytes)
                .await
                .map_err(|e| StateError::InvalidValue(format!("write `{}`: {e}", file.name)))?;
            if scene_file.is_none() || file.name.ends_with(".blend") {
                scene_file = Some(file.name.clone());
            }
        }
        let scene_file = scene_file.unwrap_or_default();

        let mut request = RenderRequest {
            cid: None,
            user_id: 0,
            node_address,
            version: params.version,
            engine: params.engine,
            device: params.device,
            frame_start: params.frame_start,
            frame_end: params.frame_end,
            frame_step: params.frame_step,
            output_format: params.output_format,
            max_price: params.max_price,
            scene_file,
        };
        request.validate().map_err(CoreError::from)?;

        let cid = self
            .store
            .hash_only(&staging.join(&request.scene_file))
            .await?;
        request.cid = Some(cid.clone());

        // Settle the staging directory under its content address.
        let final_dir = self.local_requests_dir().join(cid.as_str());
        if final_dir.exists() {
            tokio::fs::remove_dir_all(&staging).await.ok();
        } else {
            tokio::fs::rename(&staging, &final_dir)
                .await
                .map_err(|e| StateError::InvalidValue(format!("request directory: {e}")))?;
        }
        let descriptor_json = serde_json::to_vec_pretty(&request)
            .map_err(|e| StateError::InvalidValue(e.to_string()))?;
        tokio::fs::write(final_dir.join("request.json"), descriptor_json)
            .await
            .map_err(|e| StateError::InvalidValue(format!("request.json: {e}")))?;

        self.state
            .lock()
            .local_requests
            .insert(cid.clone(), request);
        tracing::info!(target: "jobs", %cid, "render request staged");
        Ok(CidResponse { cid })
    }

    /// Composes the `AddRenderJob` contract call for the wallet and arms the
    /// confirmation watcher that will pin and publish once the mirror sees
    /// the signed transaction.
    pub async fn submit_render_request(&self, cid: &Cid) -> Result<SubmitResponse, CoreError> {
        let request = self
            .state
            .lock()
            .local_requests
            .get(cid)
            .cloned()
            .ok_or_else(|| StateError::NotFound(cid.to_string()))?;

        let frozen = self
            .session
            .compose_contract(
                "addRenderJob",
                ContractParams::new()
                    .add_string(cid.as_str())
                    .add_uint64(request.max_price)
                    .add_uint32(FULL_WORK_SHARE),
                None,
            )
            .await?;

        let _ = self.work_tx.send(WorkItem::ConfirmSubmission {
            cid: cid.clone(),
            transaction_id: frozen.transaction_id.clone(),
        });
        Ok(SubmitResponse {
            transaction_id: frozen.transaction_id,
            payload: BASE64.encode(&frozen.bytes),
        })
    }

    /// Cancels an own request. Only a still-queued job may be cancelled; the
    /// actual transition happens when the cancellation envelope returns in
    /// consensus order.
    pub async fn cancel_render_request(&self, cid: &Cid) -> Result<(), CoreError> {
        {
            let state = self.state.lock();
            if !state.local_requests.contains_key(cid) {
                return Err(StateError::NotFound(cid.to_string()).into());
            }
            if let Some(job) = state.job(cid) {
                if job.state != JobState::Queued {
                    return Err(StateError::InvalidTransition {
                        from: job.state,
                        to: JobState::Cancelled,
                    }
                    .into());
                }
            }
        }
        let command = Command::broadcast(
            descriptor("NodeService.CancelRenderRequest")?,
            serde_json::to_value(CancelParams { cid: cid.clone() })
                .map_err(|e| StateError::InvalidValue(e.to_string()))?,
        );
        self.session
            .publish_command(&self.queue_topic, &command)
            .await?;
        let _ = self.work_tx.send(WorkItem::Unpin(cid.clone()));
        Ok(())
    }

    // --- Local RPC operations (supply side) ------------------------------

    /// Stages a new offer draft. Drafts are mutable; a published offer is
    /// addressed by its CID and can only be superseded, never edited.
    pub fn create_render_offer(
        &self,
        params: CreateRenderOfferParams,
    ) -> Result<(), CoreError> {
        let node_address = self
            .session
            .local_address()
            .ok_or(StateError::SessionInactive)?;
        if params.versions.is_empty() {
            return Err(StateError::InvalidValue("offer advertises no renderer versions".into())
                .into());
        }
        let offer = RenderOffer {
            cid: None,
            node_address,
            versions: params.versions,
            price: params.price,
            benchmark: params.benchmark,
            paused: false,
        };
        self.state.lock().offer = Some(offer);
        tracing::info!(target: "jobs", "render offer drafted");
        Ok(())
    }

    /// Publishes the drafted offer: pins it, fixes its CID, announces it.
    pub async fn submit_render_offer(&self) -> Result<CidResponse, CoreError> {
        let offer = {
            let state = self.state.lock();
            let offer = state
                .offer
                .clone()
                .ok_or_else(|| StateError::NotFound("no offer drafted".into()))?;
            if offer.is_published() {
                return Err(StateError::AlreadyPublished("render offer".into()).into());
            }
            offer
        };

        let offer_dir = self.data_dir.join("render_offers");
        tokio::fs::create_dir_all(&offer_dir)
            .await
            .map_err(|e| StateError::InvalidValue(format!("offer directory: {e}")))?;
        let offer_path = offer_dir.join("offer.json");
        let bytes = serde_json::to_vec_pretty(&offer)
            .map_err(|e| StateError::InvalidValue(e.to_string()))?;
        tokio::fs::write(&offer_path, bytes)
            .await
            .map_err(|e| StateError::InvalidValue(format!("offer.json: {e}")))?;

        let cid = self.store.add(&offer_path, true).await?;
        let published = {
            let mut state = self.state.lock();
            let offer = state.offer.as_mut().filter(|o| !o.is_published());
            let Some(offer) = offer else {
                return Err(StateError::AlreadyPublished("render offer".into()).into());
            };
            offer.cid = Some(cid.clone());
            offer.clone()
        };

        let command = Command::broadcast(
            descriptor("NodeService.SubmitRenderOffer")?,
            serde_json::to_value(&published)
                .map_err(|e| StateError::InvalidValue(e.to_string()))?,
        );
        self.session
            .publish_command(&self.queue_topic, &command)
            .await?;
        tracing::info!(target: "jobs", %cid, "render offer published");
        Ok(CidResponse { cid })
    }

    /// Announces a pause or resume of the published offer.
    pub async fn pause_render_offer(&self, paused: bool) -> Result<(), CoreError> {
        let node_address = {
            let state = self.state.lock();
            let offer = state
                .offer
                .as_ref()
                .ok_or_else(|| StateError::NotFound("no offer".into()))?;
            if !offer.is_published() {
                return Err(
                    StateError::InvalidValue("offer is not published yet".into()).into(),
                );
            }
            offer.node_address.clone()
        };
        let command = Command::broadcast(
            descriptor("NodeService.PauseRenderOffer")?,
            serde_json::to_value(PauseOfferParams {
                node_address,
                paused,
            })
            .map_err(|e| StateError::InvalidValue(e.to_string()))?,
        );
        self.session
            .publish_command(&self.queue_topic, &command)
            .await?;
        Ok(())
    }

    // --- State snapshots --------------------------------------------------

    pub fn queue_snapshot(&self) -> Vec<RenderJob> {
        self.state.lock().queue()
    }

    pub fn local_requests_snapshot(&self) -> Vec<RenderRequest> {
        self.state.lock().local_requests.values().cloned().collect()
    }

    pub fn offer_snapshot(&self) -> Option<RenderOffer> {
        self.state.lock().offer.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    // --- Queue topic intake -----------------------------------------------

    /// The handler to register on the render-job queue topic.
    pub fn queue_handler(self: &Arc<Self>) -> TopicHandler {
        let manager = Arc::clone(self);
        Arc::new(move |message| manager.handle_queue_message(message))
    }

    fn handle_queue_message(&self, message: TopicMessage) {
        let Some(local) = self.session.local_address() else {
            return;
        };
        let envelope = match serde_json::from_slice(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Inbound from the log: protocol violations are dropped.
                tracing::debug!(target: "jobs", error = %e, "dropping non-envelope payload");
                return;
            }
        };
        let command = match Command::decode(&envelope, &local) {
            Ok(Some(command)) => command,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(target: "jobs", error = %e, "dropping undecodable envelope");
                return;
            }
        };
        if command.descriptor.local_only {
            tracing::debug!(
                target: "jobs",
                method = command.descriptor.method,
                "dropping local-only method from the log"
            );
            return;
        }
        if let Err(e) = self.apply_command(&command, &message, &local) {
            tracing::debug!(
                target: "jobs",
                method = command.descriptor.method,
                error = %e,
                "envelope not applied"
            );
        }
    }

    /// Applies one decoded queue-topic command, in consensus order.
    fn apply_command(
        &self,
        command: &Command,
        message: &TopicMessage,
        local: &AccountAddress,
    ) -> Result<(), CoreError> {
        match (command.descriptor.service, command.descriptor.method) {
            (ServiceId::Ping, "SayHello") => {
                tracing::info!(target: "jobs", payer = ?message.payer, "hello from the hive");
                Ok(())
            }
            (ServiceId::Node, "SubmitRenderRequest") => {
                let request: RenderRequest = parse_params(&command.params)?;
                self.apply_submit(request, message, local)
            }
            (ServiceId::Node, "CancelRenderRequest") => {
                let params: CancelParams = parse_params(&command.params)?;
                self.apply_cancel(&params.cid, local)
            }
            (ServiceId::Node, "ClaimRenderJob") => {
                let params: ClaimParams = parse_params(&command.params)?;
                self.apply_claim(params, local)
            }
            (ServiceId::Node, "CompleteRenderJob") => {
                let params: CompleteParams = parse_params(&command.params)?;
                self.apply_complete(params)
            }
            (ServiceId::Node, "SubmitRenderOffer") => {
                let offer: RenderOffer = parse_params(&command.params)?;
                self.state
                    .lock()
                    .remote_offers
                    .insert(offer.node_address.clone(), offer);
                Ok(())
            }
            (ServiceId::Node, "PauseRenderOffer") => {
                let params: PauseOfferParams = parse_params(&command.params)?;
                let mut state = self.state.lock();
                if params.node_address == *local {
                    if let Some(offer) = state.offer.as_mut() {
                        offer.paused = params.paused;
                    }
                }
                if let Some(offer) = state.remote_offers.get_mut(&params.node_address) {
                    offer.paused = params.paused;
                }
                Ok(())
            }
            _ => Err(ProtocolError::NotRoutable {
                method: command.descriptor.full_name(),
            }
            .into()),
        }
    }

    fn apply_submit(
        &self,
        request: RenderRequest,
        message: &TopicMessage,
        local: &AccountAddress,
    ) -> Result<(), CoreError> {
        let cid = request
            .cid
            .clone()
            .ok_or_else(|| ProtocolError::InvalidParams("queue entry without cid".into()))?;
        let job = RenderJob::new(
            cid.clone(),
            message.consensus_timestamp,
            request.user_id,
            request.node_address.clone(),
        );
        let mut state = self.state.lock();
        if !state.insert_job(job) {
            return Ok(());
        }
        state.requests.insert(cid.clone(), request.clone());
        let compatible = state
            .offer
            .as_ref()
            .is_some_and(|offer| offer.is_compatible(&request));
        drop(state);
        tracing::info!(target: "jobs", %cid, "job queued");

        let ours = request.node_address == *local;
        if self.render_role && compatible && !ours && !self.is_busy() {
            let _ = self.work_tx.send(WorkItem::TryClaim(cid));
        }
        Ok(())
    }

    fn apply_cancel(&self, cid: &Cid, local: &AccountAddress) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        let job = state
            .job_mut(cid)
            .ok_or_else(|| StateError::NotFound(cid.to_string()))?;
        job.transition(JobState::Cancelled)?;
        let ours = job.node_address == *local;
        state.claim_deadlines.remove(cid);
        drop(state);
        tracing::info!(target: "jobs", %cid, "job cancelled");
        if ours {
            let _ = self.work_tx.send(WorkItem::Unpin(cid.clone()));
        }
        Ok(())
    }

    fn apply_claim(&self, params: ClaimParams, local: &AccountAddress) -> Result<(), CoreError> {
        let ClaimParams { cid, claim } = params;
        let mut state = self.state.lock();
        let job = state
            .job_mut(&cid)
            .ok_or_else(|| StateError::NotFound(cid.to_string()))?;

        // The same node staking twice in one cycle is a consistency breach:
        // log, invalidate the session, never auto-recover.
        let duplicate = job
            .claims
            .iter()
            .any(|c| c.node_address == claim.node_address && c.hive_cycle == claim.hive_cycle);
        if duplicate {
            let err = ConsistencyError::DoubleClaim {
                cid: cid.to_string(),
                address: claim.node_address.to_string(),
            };
            tracing::error!(target: "jobs", error = %err, "double claim observed");
            drop(state);
            self.session.invalidate("double claim on the queue topic");
            return Err(err.into());
        }

        let claimant = claim.node_address.clone();
        let claim_cycle = claim.hive_cycle;
        job.claims.push(claim);

        let won = if job.state == JobState::Queued {
            // First claim in consensus order wins the cycle.
            job.transition(JobState::Claimed)?;
            job.winner = Some(claimant.clone());
            true
        } else {
            false
        };
        let lost_by_us = !won && claimant == *local && job.winner.as_ref() != Some(local);
        if won {
            state.claim_deadlines.insert(cid.clone(), claim_cycle + 1);
        }
        drop(state);

        if won && claimant == *local {
            tracing::info!(target: "jobs", %cid, "claim won, scheduling execution");
            self.busy.store(true, Ordering::SeqCst);
            let _ = self.work_tx.send(WorkItem::Execute(cid));
        } else if lost_by_us {
            // Our claim was included later; back to idle, no side effects on
            // the winner.
            tracing::info!(target: "jobs", %cid, "claim lost");
            self.busy.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn apply_complete(&self, params: CompleteParams) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        let job = state
            .job_mut(&params.cid)
            .ok_or_else(|| StateError::NotFound(params.cid.to_string()))?;
        if job.state == JobState::Claimed {
            job.transition(JobState::Rendering)?;
        }
        job.transition(JobState::Rendered)?;
        job.output_cid = Some(params.output_cid);
        state.claim_deadlines.remove(&params.cid);
        tracing::info!(target: "jobs", cid = %params.cid, "job rendered");
        Ok(())
    }

    // --- The manager loop -------------------------------------------------

    /// The background loop: consumes deferred work and cycle transitions.
    pub async fn run(self: Arc<Self>, mut quit: watch::Receiver<bool>) {
        let mut rx = {
            let mut slot = self.work_rx.lock();
            match slot.take() {
                Some(rx) => rx,
                None => return,
            }
        };
        let mut events = self.cycle.subscribe_events();
        loop {
            tokio::select! {
                _ = quit.changed() => {
                    if *quit.borrow() {
                        break;
                    }
                }
                item = rx.recv() => match item {
                    Some(item) => self.process(item).await,
                    None => break,
                },
                event = events.recv() => {
                    if let Ok(CycleEvent::Transition { cycle }) = event {
                        self.sweep_claim_timeouts(cycle);
                    }
                }
            }
        }
        tracing::debug!(target: "jobs", "manager loop stopped");
    }

    async fn process(&self, item: WorkItem) {
        match item {
            WorkItem::TryClaim(cid) => self.try_claim(&cid).await,
            WorkItem::Execute(cid) => self.execute(&cid).await,
            WorkItem::ConfirmSubmission {
                cid,
                transaction_id,
            } => self.confirm_submission(&cid, &transaction_id).await,
            WorkItem::Unpin(cid) => {
                if let Err(e) = self.store.unpin(&cid).await {
                    tracing::warn!(target: "jobs", %cid, error = %e, "unpin failed");
                }
            }
        }
    }

    /// Stakes a claim: contract call first (the contract resolves the
    /// winner by inclusion order), then the claim envelope for the hive.
    async fn try_claim(&self, cid: &Cid) {
        if self.busy.swap(true, Ordering::SeqCst) {
            return;
        }
        let eligible = {
            let state = self.state.lock();
            state.job(cid).map(|j| j.state) == Some(JobState::Queued)
        };
        let Some(local) = self.session.local_address() else {
            self.busy.store(false, Ordering::SeqCst);
            return;
        };
        if !eligible {
            self.busy.store(false, Ordering::SeqCst);
            return;
        }
        let cycle = match self.cycle.current_cycle() {
            Ok(cycle) => cycle,
            Err(e) => {
                tracing::warn!(target: "jobs", %cid, error = %e, "no hive cycle, claim skipped");
                self.busy.store(false, Ordering::SeqCst);
                return;
            }
        };

        // Roots are opaque commitments; this node forwards zeroes until the
        // commitment scheme is specified.
        let claim = JobClaim {
            node_address: local,
            hive_cycle: cycle,
            work_share: FULL_WORK_SHARE,
            consensus_root: [0u8; 32],
            job_root: [0u8; 32],
        };

        let contract_result = self
            .session
            .execute_contract(
                "claimRenderJob",
                ContractParams::new()
                    .add_string(cid.as_str())
                    .add_uint64(cycle)
                    .add_uint32(claim.work_share)
                    .add_bytes32(&claim.consensus_root)
                    .add_bytes32(&claim.job_root),
                None,
            )
            .await;
        if let Err(e) = contract_result {
            tracing::warn!(target: "jobs", %cid, error = %e, "claim contract call failed");
            self.busy.store(false, Ordering::SeqCst);
            return;
        }

        let params = match serde_json::to_value(ClaimParams {
            cid: cid.clone(),
            claim,
        }) {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!(target: "jobs", %cid, error = %e, "claim encode failed");
                self.busy.store(false, Ordering::SeqCst);
                return;
            }
        };
        let Ok(claim_descriptor) = descriptor("NodeService.ClaimRenderJob") else {
            self.busy.store(false, Ordering::SeqCst);
            return;
        };
        let command = Command::broadcast(claim_descriptor, params);
        if let Err(e) = self
            .session
            .publish_command(&self.queue_topic, &command)
            .await
        {
            tracing::warn!(target: "jobs", %cid, error = %e, "claim envelope failed");
            self.busy.store(false, Ordering::SeqCst);
        }
        // Stay busy until the winning claim is observed on the topic.
    }

    /// Runs a won job: fetch the scene, drive the renderer, publish the
    /// output, settle on the contract.
    async fn execute(&self, cid: &Cid) {
        self.busy.store(true, Ordering::SeqCst);

        let (request, support) = {
            let mut state = self.state.lock();
            let request = match state.requests.get(cid) {
                Some(request) => request.clone(),
                None => {
                    tracing::error!(target: "jobs", %cid, "won a job with no request details");
                    self.busy.store(false, Ordering::SeqCst);
                    return;
                }
            };
            let support = state
                .offer
                .as_ref()
                .and_then(|offer| offer.versions.get(&request.version).cloned());
            if let Some(job) = state.job_mut(cid) {
                if job.state == JobState::Claimed {
                    let _ = job.transition(JobState::Rendering);
                }
            }
            (request, support)
        };
        let Some(support) = support else {
            tracing::error!(target: "jobs", %cid, "offer no longer covers the job's version");
            self.fail_job(cid, "offer withdrawn");
            return;
        };

        let job_dir = self.network_requests_dir().join(cid.as_str());
        let scene_path = job_dir.join(&request.scene_file);
        if let Err(e) = self.store.get(cid, &scene_path).await {
            tracing::error!(target: "jobs", %cid, error = %e, "scene fetch failed");
            self.fail_job(cid, "scene fetch failed");
            return;
        }

        let invocation = RenderInvocation {
            executable: support.executable.clone(),
            scene: scene_path,
            engine: request.engine,
            device: request.device,
            frame_start: request.frame_start,
            frame_end: request.frame_end,
            frame_step: request.frame_step,
            output_dir: job_dir.join("output"),
            threads: support.threads,
        };
        let outcome = match self.renderer.render(invocation).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Renderer failures are terminal for the job; no retry.
                tracing::error!(target: "jobs", %cid, error = %e, "render failed");
                self.fail_job(cid, "renderer failed");
                return;
            }
        };

        match self.settle(cid, &outcome.output_files).await {
            Ok(output_cid) => {
                tracing::info!(target: "jobs", %cid, %output_cid, "job settled");
                let mut state = self.state.lock();
                if let Some(job) = state.job_mut(cid) {
                    if job.state == JobState::Rendered {
                        let _ = job.transition(JobState::Settled);
                    }
                    job.output_cid.get_or_insert(output_cid);
                }
            }
            Err(e) => {
                tracing::error!(target: "jobs", %cid, error = %e, "settlement failed");
            }
        }
        self.busy.store(false, Ordering::SeqCst);
    }

    /// Pins the frames, publishes the completion envelope and calls the
    /// settlement contract function. Returns the output manifest CID.
    async fn settle(&self, cid: &Cid, frames: &[PathBuf]) -> Result<Cid, CoreError> {
        #[derive(Serialize)]
        struct ManifestFrame {
            file: String,
            cid: Cid,
        }
        let mut manifest = Vec::with_capacity(frames.len());
        for frame in frames {
            let frame_cid = self.store.add(frame, true).await?;
            manifest.push(ManifestFrame {
                file: frame
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                cid: frame_cid,
            });
        }
        let manifest_path = self
            .network_requests_dir()
            .join(cid.as_str())
            .join("output-manifest.json");
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| StateError::InvalidValue(e.to_string()))?;
        tokio::fs::write(&manifest_path, bytes)
            .await
            .map_err(|e| StateError::InvalidValue(format!("manifest: {e}")))?;
        let output_cid = self.store.add(&manifest_path, true).await?;

        let command = Command::broadcast(
            descriptor("NodeService.CompleteRenderJob")?,
            serde_json::to_value(CompleteParams {
                cid: cid.clone(),
                output_cid: output_cid.clone(),
            })
            .map_err(|e| StateError::InvalidValue(e.to_string()))?,
        );
        self.session
            .publish_command(&self.queue_topic, &command)
            .await?;

        self.session
            .execute_contract(
                "completeRenderJob",
                ContractParams::new()
                    .add_string(cid.as_str())
                    .add_string(output_cid.as_str()),
                None,
            )
            .await?;
        Ok(output_cid)
    }

    /// Confirmation watcher armed by `submit_render_request`: once the
    /// wallet-signed transaction is visible on the mirror, pin the scene
    /// locally and announce the job on the queue topic.
    async fn confirm_submission(&self, cid: &Cid, transaction_id: &str) {
        let info = match self.consensus.transaction_info(transaction_id).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(
                    target: "jobs",
                    %cid,
                    transaction_id,
                    error = %e,
                    "submission not confirmed"
                );
                return;
            }
        };
        if info.result != "SUCCESS" {
            tracing::warn!(
                target: "jobs",
                %cid,
                result = info.result,
                "submission rejected by the ledger"
            );
            return;
        }

        let request = {
            let state = self.state.lock();
            state.local_requests.get(cid).cloned()
        };
        let Some(request) = request else {
            return;
        };

        let scene_path = self
            .local_requests_dir()
            .join(cid.as_str())
            .join(&request.scene_file);
        if let Err(e) = self.store.add(&scene_path, true).await {
            tracing::warn!(target: "jobs", %cid, error = %e, "pin after confirmation failed");
        }

        let params = match serde_json::to_value(&request) {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!(target: "jobs", %cid, error = %e, "request encode failed");
                return;
            }
        };
        let Ok(submit_descriptor) = descriptor("NodeService.SubmitRenderRequest") else {
            return;
        };
        let command = Command::broadcast(submit_descriptor, params);
        match self
            .session
            .publish_command(&self.queue_topic, &command)
            .await
        {
            Ok(_) => tracing::info!(target: "jobs", %cid, "job announced on the queue"),
            Err(e) => {
                tracing::warn!(target: "jobs", %cid, error = %e, "queue announcement failed");
            }
        }
    }

    /// Claim timeout: a job claimed in cycle C with no completion by the end
    /// of cycle C+1 returns to the queue.
    fn sweep_claim_timeouts(&self, current_cycle: u64) {
        let mut state = self.state.lock();
        let expired: Vec<Cid> = state
            .claim_deadlines
            .iter()
            .filter(|(_, deadline)| current_cycle > **deadline)
            .map(|(cid, _)| cid.clone())
            .collect();
        for cid in expired {
            state.claim_deadlines.remove(&cid);
            let Some(local) = self.session.local_address() else {
                continue;
            };
            if let Some(job) = state.job_mut(&cid) {
                if job.state == JobState::Claimed {
                    let was_ours = job.winner.as_ref() == Some(&local);
                    if job.transition(JobState::Queued).is_ok() {
                        job.winner = None;
                        job.claims.clear();
                        tracing::warn!(target: "jobs", %cid, "claim timed out, job requeued");
                        if was_ours {
                            self.busy.store(false, Ordering::SeqCst);
                        }
                    }
                }
            }
        }
    }

    fn fail_job(&self, cid: &Cid, reason: &str) {
        let mut state = self.state.lock();
        if let Some(job) = state.job_mut(cid) {
            if job.state == JobState::Claimed {
                let _ = job.transition(JobState::Rendering);
            }
            if job.transition(JobState::Failed).is_err() {
                tracing::debug!(target: "jobs", %cid, "job not in a failable state");
            }
        }
        state.claim_deadlines.remove(cid);
        drop(state);
        tracing::warn!(target: "jobs", %cid, reason, "job failed");
        self.busy.store(false, Ordering::SeqCst);
    }

    fn local_requests_dir(&self) -> PathBuf {
        self.data_dir.join(paths::RENDER_REQUESTS_LOCAL_DIR)
    }

    fn network_requests_dir(&self) -> PathBuf {
        self.data_dir.join(paths::RENDER_REQUESTS_NETWORK_DIR)
    }
}

fn descriptor(name: &str) -> Result<&'static MethodDescriptor, CoreError> {
    command::find(name).ok_or_else(|| {
        ProtocolError::UnknownMethod {
            method: name.to_owned(),
        }
        .into()
    })
}

fn parse_params<T: serde::de::DeserializeOwned>(
    params: &serde_json::Value,
) -> Result<T, CoreError> {
    serde_json::from_value(params.clone())
        .map_err(|e| ProtocolError::InvalidParams(e.to_string()).into())
}
