//! Render offers, render requests and the network job queue entries.

use super::{AccountAddress, Cid, ConsensusTimestamp};
use crate::error::StateError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The render engines a request may demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderEngine {
    #[serde(rename = "EEVEE")]
    Eevee,
    #[serde(rename = "CYCLES")]
    Cycles,
}

impl RenderEngine {
    /// The value passed to the renderer's `--engine` flag.
    pub fn flag_value(&self) -> &'static str {
        match self {
            Self::Eevee => "EEVEE",
            Self::Cycles => "CYCLES",
        }
    }
}

/// The compute devices a request may demand, including the CPU-hybrid
/// variants supported by recent renderer releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderDevice {
    #[serde(rename = "CPU")]
    Cpu,
    #[serde(rename = "CUDA")]
    Cuda,
    #[serde(rename = "OPTIX")]
    Optix,
    #[serde(rename = "HIP")]
    Hip,
    #[serde(rename = "ONEAPI")]
    OneApi,
    #[serde(rename = "METAL")]
    Metal,
    #[serde(rename = "CUDA+CPU")]
    CudaCpu,
    #[serde(rename = "OPTIX+CPU")]
    OptixCpu,
    #[serde(rename = "HIP+CPU")]
    HipCpu,
    #[serde(rename = "ONEAPI+CPU")]
    OneApiCpu,
    #[serde(rename = "METAL+CPU")]
    MetalCpu,
}

impl RenderDevice {
    /// The value passed to the renderer's `--device` flag.
    pub fn flag_value(&self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Cuda => "CUDA",
            Self::Optix => "OPTIX",
            Self::Hip => "HIP",
            Self::OneApi => "ONEAPI",
            Self::Metal => "METAL",
            Self::CudaCpu => "CUDA+CPU",
            Self::OptixCpu => "OPTIX+CPU",
            Self::HipCpu => "HIP+CPU",
            Self::OneApiCpu => "ONEAPI+CPU",
            Self::MetalCpu => "METAL+CPU",
        }
    }
}

/// What one offered renderer version can do on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererVersionSupport {
    pub engines: Vec<RenderEngine>,
    pub devices: Vec<RenderDevice>,
    /// Upper bound on render threads this node is willing to spend.
    pub threads: u32,
    /// Path to the renderer executable providing this version.
    pub executable: PathBuf,
}

/// A benchmark sample stored under `data/blender_benchmarks/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub scene: String,
    pub samples_per_minute: f64,
    pub measured_at: ConsensusTimestamp,
}

/// This node's supply-side advertisement.
///
/// Mutable only while unpublished; `publish` fixes the CID and from then on
/// the offer is addressed by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOffer {
    pub cid: Option<Cid>,
    pub node_address: AccountAddress,
    /// Renderer version string → capabilities.
    pub versions: BTreeMap<String, RendererVersionSupport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<BenchmarkResult>,
    #[serde(default)]
    pub paused: bool,
}

impl RenderOffer {
    pub fn is_published(&self) -> bool {
        self.cid.is_some()
    }

    /// True when this offer can serve `request` with any advertised version.
    pub fn is_compatible(&self, request: &RenderRequest) -> bool {
        if self.paused {
            return false;
        }
        self.versions.get(&request.version).is_some_and(|support| {
            support.engines.contains(&request.engine)
                && support.devices.contains(&request.device)
                && support.threads > 0
        })
    }
}

/// A user-submitted job description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub cid: Option<Cid>,
    pub user_id: i64,
    pub node_address: AccountAddress,
    pub version: String,
    pub engine: RenderEngine,
    pub device: RenderDevice,
    pub frame_start: i64,
    pub frame_end: i64,
    pub frame_step: u32,
    pub output_format: String,
    pub max_price: u64,
    /// Scene file name relative to the request directory.
    pub scene_file: String,
}

impl RenderRequest {
    /// Validates the user-facing constraints before a CID is computed.
    pub fn validate(&self) -> Result<(), StateError> {
        if self.frame_start > self.frame_end {
            return Err(StateError::InvalidValue(format!(
                "empty frame range {}..{}",
                self.frame_start, self.frame_end
            )));
        }
        if self.frame_step == 0 {
            return Err(StateError::InvalidValue("frame step must be >= 1".into()));
        }
        if self.version.is_empty() {
            return Err(StateError::InvalidValue("renderer version missing".into()));
        }
        if self.scene_file.is_empty() {
            return Err(StateError::InvalidValue("scene file missing".into()));
        }
        Ok(())
    }
}

/// The lifecycle states of a job on the network queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Claimed,
    Rendering,
    Rendered,
    Settled,
    Cancelled,
    Failed,
}

impl JobState {
    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// `claimed → queued` is the claim-timeout path; everything else follows
    /// the forward arrows plus the terminal transitions.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (*self, next),
            (Queued, Claimed)
                | (Queued, Cancelled)
                | (Claimed, Rendering)
                | (Claimed, Queued)
                | (Rendering, Rendered)
                | (Rendering, Failed)
                | (Rendered, Settled)
                | (Rendered, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Settled | JobState::Cancelled | JobState::Failed)
    }
}

/// A claim staked against a queued job.
///
/// The two roots are opaque 32-byte commitments accepted and forwarded
/// verbatim; this node never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobClaim {
    pub node_address: AccountAddress,
    pub hive_cycle: u64,
    /// Share of the work claimed, in parts per 10 000.
    pub work_share: u32,
    #[serde(with = "super::serde_hex32")]
    pub consensus_root: [u8; 32],
    #[serde(with = "super::serde_hex32")]
    pub job_root: [u8; 32],
}

/// An entry in the network render queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
    pub request_cid: Cid,
    pub submitted_at: ConsensusTimestamp,
    pub user_id: i64,
    pub node_address: AccountAddress,
    pub state: JobState,
    #[serde(default)]
    pub claims: Vec<JobClaim>,
    /// Winning claimant, once the contract has resolved the cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<AccountAddress>,
    /// CID of the rendered output, set on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_cid: Option<Cid>,
}

impl RenderJob {
    pub fn new(
        request_cid: Cid,
        submitted_at: ConsensusTimestamp,
        user_id: i64,
        node_address: AccountAddress,
    ) -> Self {
        Self {
            request_cid,
            submitted_at,
            user_id,
            node_address,
            state: JobState::Queued,
            claims: Vec::new(),
            winner: None,
            output_cid: None,
        }
    }

    /// Applies a state transition, rejecting anything the machine forbids.
    pub fn transition(&mut self, next: JobState) -> Result<(), StateError> {
        if !self.state.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RenderRequest {
        RenderRequest {
            cid: None,
            user_id: 7,
            node_address: AccountAddress::parse("0.0.1001").unwrap(),
            version: "4.1.1".into(),
            engine: RenderEngine::Cycles,
            device: RenderDevice::Optix,
            frame_start: 1,
            frame_end: 100,
            frame_step: 2,
            output_format: "PNG".into(),
            max_price: 250,
            scene_file: "scene.blend".into(),
        }
    }

    fn offer_for(request: &RenderRequest) -> RenderOffer {
        let mut versions = BTreeMap::new();
        versions.insert(
            request.version.clone(),
            RendererVersionSupport {
                engines: vec![RenderEngine::Cycles, RenderEngine::Eevee],
                devices: vec![RenderDevice::Optix, RenderDevice::Cpu],
                threads: 16,
                executable: PathBuf::from("/usr/bin/blender"),
            },
        );
        RenderOffer {
            cid: None,
            node_address: AccountAddress::parse("0.0.2002").unwrap(),
            versions,
            price: Some(100),
            benchmark: None,
            paused: false,
        }
    }

    #[test]
    fn offer_compatibility() {
        let req = request();
        let mut offer = offer_for(&req);
        assert!(offer.is_compatible(&req));

        offer.paused = true;
        assert!(!offer.is_compatible(&req));
        offer.paused = false;

        let mut other = req.clone();
        other.device = RenderDevice::Metal;
        assert!(!offer.is_compatible(&other));

        other = req.clone();
        other.version = "3.6.0".into();
        assert!(!offer.is_compatible(&other));
    }

    #[test]
    fn request_validation() {
        assert!(request().validate().is_ok());

        let mut bad = request();
        bad.frame_step = 0;
        assert!(bad.validate().is_err());

        bad = request();
        bad.frame_start = 10;
        bad.frame_end = 5;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn state_machine_paths() {
        use JobState::*;
        // The happy path and the two documented detours are valid.
        for path in [
            vec![Queued, Claimed, Rendering, Rendered, Settled],
            vec![Queued, Cancelled],
            vec![Queued, Claimed, Queued],
            vec![Queued, Claimed, Rendering, Failed],
        ] {
            let mut job = RenderJob::new(
                Cid("bafytest".into()),
                ConsensusTimestamp::from_unix_secs(1),
                1,
                AccountAddress::parse("0.0.1").unwrap(),
            );
            for next in path.into_iter().skip(1) {
                job.transition(next).unwrap();
            }
        }

        // Cancel after claim is rejected.
        let mut job = RenderJob::new(
            Cid("bafytest".into()),
            ConsensusTimestamp::from_unix_secs(1),
            1,
            AccountAddress::parse("0.0.1").unwrap(),
        );
        job.transition(Claimed).unwrap();
        assert!(job.transition(Cancelled).is_err());
    }
}
