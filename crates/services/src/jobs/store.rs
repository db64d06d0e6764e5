//! In-memory job state: own submissions, the published offer, and the
//! network queue in consensus order.

use renderhive_types::app::{AccountAddress, Cid, RenderJob, RenderOffer, RenderRequest};
use std::collections::HashMap;

/// Everything the job lifecycle tracks between envelopes.
///
/// `local_requests` (own submissions) and the network queue are separate
/// structures; queue membership and order mirror the consensus order of the
/// queue topic.
#[derive(Default)]
pub(crate) struct JobStore {
    pub local_requests: HashMap<Cid, RenderRequest>,
    /// This node's offer, published or draft.
    pub offer: Option<RenderOffer>,
    /// Offers other nodes have advertised, by owner.
    pub remote_offers: HashMap<AccountAddress, RenderOffer>,
    /// Queue order as the topic delivered it.
    order: Vec<Cid>,
    jobs: HashMap<Cid, RenderJob>,
    /// Request details for queue entries, needed for compatibility checks
    /// and execution.
    pub requests: HashMap<Cid, RenderRequest>,
    /// Cycle by which a claimed job must have completed before it is
    /// requeued.
    pub claim_deadlines: HashMap<Cid, u64>,
}

impl JobStore {
    /// Appends a job in consensus order; an already-known CID is left
    /// untouched (the CID is the immutable handle, replays are no-ops).
    pub fn insert_job(&mut self, job: RenderJob) -> bool {
        if self.jobs.contains_key(&job.request_cid) {
            return false;
        }
        self.order.push(job.request_cid.clone());
        self.jobs.insert(job.request_cid.clone(), job);
        true
    }

    pub fn job(&self, cid: &Cid) -> Option<&RenderJob> {
        self.jobs.get(cid)
    }

    pub fn job_mut(&mut self, cid: &Cid) -> Option<&mut RenderJob> {
        self.jobs.get_mut(cid)
    }

    /// Queue snapshot in consensus order.
    pub fn queue(&self) -> Vec<RenderJob> {
        self.order
            .iter()
            .filter_map(|cid| self.jobs.get(cid))
            .cloned()
            .collect()
    }
}
