//! The hive-cycle engine: a monotonic, network-wide epoch number derived
//! from the synchronization topic, with no trust in local wall clocks.

use parking_lot::Mutex;
use renderhive_api::consensus::{TopicHandler, TopicMessage};
use renderhive_types::app::{
    AccountAddress, ConsensusTimestamp, HiveCycle, HiveCycleConfiguration,
    HiveCycleConfigurationMessage,
};
use renderhive_types::error::{ConsistencyError, CoreError, StateError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, watch};

/// Events raised towards the job lifecycle and the session gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleEvent {
    /// The engine crossed into a new cycle.
    Transition { cycle: u64 },
    /// Replay produced contradictory configurations; the engine is parked
    /// and the session must be invalidated. No automatic recovery.
    Inconsistent,
}

/// The engine. One per process, owned by the lifecycle manager; the
/// configuration list is append-only for the lifetime of the process.
pub struct HiveCycleEngine {
    admin: AccountAddress,
    configs: Mutex<Vec<HiveCycleConfiguration>>,
    /// Offset from local wall time to network time, in nanoseconds, as
    /// observed on the most recent configuration message.
    clock_offset_nanos: Mutex<i128>,
    poisoned: AtomicBool,
    events: broadcast::Sender<CycleEvent>,
}

impl HiveCycleEngine {
    pub fn new(admin: AccountAddress) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            admin,
            configs: Mutex::new(Vec::new()),
            clock_offset_nanos: Mutex::new(0),
            poisoned: AtomicBool::new(false),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CycleEvent> {
        self.events.subscribe()
    }

    /// The handler to register on the synchronization topic.
    pub fn topic_handler(self: &Arc<Self>) -> TopicHandler {
        let engine = Arc::clone(self);
        Arc::new(move |message| {
            if let Err(e) = engine.apply_message(&message) {
                tracing::error!(target: "hive-cycle", error = %e, "configuration rejected");
            }
        })
    }

    /// Applies one synchronization-topic message, in consensus order.
    pub fn apply_message(&self, message: &TopicMessage) -> Result<(), CoreError> {
        // Only the topic admin may reconfigure; anything else is noise.
        if message.payer.as_ref() != Some(&self.admin) {
            tracing::debug!(
                target: "hive-cycle",
                sequence = message.sequence_number,
                "ignoring configuration from non-admin sender"
            );
            return Ok(());
        }
        let parsed: HiveCycleConfigurationMessage = serde_json::from_slice(&message.payload)
            .map_err(|e| StateError::InvalidValue(format!("configuration message: {e}")))?;
        let config = HiveCycleConfiguration {
            iteration: parsed.iteration,
            duration_secs: parsed.duration,
            network_start: message.consensus_timestamp,
        };
        if config.duration_secs == 0 {
            return Err(StateError::InvalidValue("zero cycle duration".into()).into());
        }

        let mut configs = self.configs.lock();
        if let Some(last) = configs.last() {
            // Replay gaps can surface a later iteration claiming an earlier
            // start; that contradicts the append-only history and parks the
            // engine.
            if config.iteration <= last.iteration || config.network_start <= last.network_start {
                let seen_iteration = last.iteration;
                let seen_start = last.network_start.to_string();
                drop(configs);
                self.poisoned.store(true, Ordering::SeqCst);
                let _ = self.events.send(CycleEvent::Inconsistent);
                return Err(ConsistencyError::HiveCycleInconsistent {
                    iteration: config.iteration,
                    start: config.network_start.to_string(),
                    seen_iteration,
                    seen_start,
                }
                .into());
            }
        }
        tracing::info!(
            target: "hive-cycle",
            iteration = config.iteration,
            duration_secs = config.duration_secs,
            start = %config.network_start,
            "configuration accepted"
        );
        configs.push(config);
        drop(configs);

        // Re-anchor network time on the message's consensus timestamp.
        let wall = wall_nanos();
        let network = timestamp_nanos(message.consensus_timestamp);
        *self.clock_offset_nanos.lock() = network - wall;
        Ok(())
    }

    /// Network "now": local wall clock shifted by the last observed offset.
    pub fn network_now(&self) -> ConsensusTimestamp {
        let nanos = wall_nanos() + *self.clock_offset_nanos.lock();
        nanos_to_timestamp(nanos)
    }

    /// The current cycle number under the latest configuration.
    pub fn current_cycle(&self) -> Result<u64, CoreError> {
        self.current_cycle_at(self.network_now())
    }

    /// The cycle number at an explicit network time. Pure given the
    /// configuration history, which is what makes replay deterministic.
    pub fn current_cycle_at(&self, now: ConsensusTimestamp) -> Result<u64, CoreError> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(StateError::InvalidValue("hive-cycle engine is parked".into()).into());
        }
        let configs = self.configs.lock();
        let latest = configs
            .last()
            .ok_or_else(|| StateError::NotFound("no hive-cycle configuration yet".into()))?;
        Ok(latest.cycle_at(now))
    }

    /// Snapshot of the accepted configurations, for diagnostics.
    pub fn configurations(&self) -> Vec<HiveCycleConfiguration> {
        self.configs.lock().clone()
    }

    /// The concrete epoch the node is in right now.
    pub fn current_cycle_info(&self) -> Result<HiveCycle, CoreError> {
        let now = self.network_now();
        let number = self.current_cycle_at(now)?;
        let configs = self.configs.lock();
        let latest = configs
            .last()
            .ok_or_else(|| StateError::NotFound("no hive-cycle configuration yet".into()))?;
        // Wall-clock reading of the current cycle's start, recovered from
        // the network-time offset.
        let elapsed_in_cycle = now.secs_since(latest.network_start) % latest.duration_secs.max(1);
        let local_start = SystemTime::now() - Duration::from_secs(elapsed_in_cycle);
        Ok(HiveCycle {
            number,
            duration_secs: latest.duration_secs,
            network_start: latest.network_start,
            local_start,
        })
    }

    /// The re-check period of the background loop: a tenth of the current
    /// cycle duration, expressed in `Duration` arithmetic.
    fn recheck_period(&self) -> Duration {
        self.configs
            .lock()
            .last()
            .map(|c| Duration::from_millis(c.duration_secs.saturating_mul(100).max(100)))
            .unwrap_or(Duration::from_secs(1))
    }

    /// The background loop: re-evaluates the cycle number and raises a
    /// transition event on every boundary crossing.
    pub async fn run(self: Arc<Self>, mut quit: watch::Receiver<bool>) {
        let mut last_cycle: Option<u64> = None;
        loop {
            tokio::select! {
                _ = quit.changed() => {
                    if *quit.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.recheck_period()) => {}
            }
            if self.poisoned.load(Ordering::SeqCst) {
                continue;
            }
            if let Ok(cycle) = self.current_cycle() {
                if last_cycle.is_some_and(|last| cycle > last) {
                    tracing::info!(target: "hive-cycle", cycle, "cycle transition");
                    let _ = self.events.send(CycleEvent::Transition { cycle });
                }
                last_cycle = Some(cycle);
            }
        }
        tracing::debug!(target: "hive-cycle", "engine loop stopped");
    }
}

fn wall_nanos() -> i128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i128)
        .unwrap_or_default()
}

fn timestamp_nanos(ts: ConsensusTimestamp) -> i128 {
    i128::from(ts.seconds) * 1_000_000_000 + i128::from(ts.nanos)
}

fn nanos_to_timestamp(nanos: i128) -> ConsensusTimestamp {
    let seconds = nanos.div_euclid(1_000_000_000);
    let frac = nanos.rem_euclid(1_000_000_000);
    ConsensusTimestamp::new(seconds as i64, frac as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> AccountAddress {
        AccountAddress::parse("0.0.390000").unwrap()
    }

    fn config_message(
        iteration: u64,
        duration: u64,
        at: ConsensusTimestamp,
        payer: &AccountAddress,
        sequence: u64,
    ) -> TopicMessage {
        let body = HiveCycleConfigurationMessage {
            iteration,
            duration,
            timestamp: at,
        };
        TopicMessage {
            topic: AccountAddress::parse("0.0.4200001").unwrap(),
            sequence_number: sequence,
            consensus_timestamp: at,
            payer: Some(payer.clone()),
            payload: serde_json::to_vec(&body).unwrap(),
        }
    }

    #[test]
    fn replay_is_deterministic_across_instances() {
        let t0 = ConsensusTimestamp::from_unix_secs(1_000_000);
        let stream = [
            config_message(1, 300, t0, &admin(), 1),
            config_message(2, 600, t0 + Duration::from_secs(900), &admin(), 2),
        ];

        let a = HiveCycleEngine::new(admin());
        let b = HiveCycleEngine::new(admin());
        for engine in [&a, &b] {
            for message in &stream {
                engine.apply_message(message).unwrap();
            }
        }
        assert_eq!(a.configurations(), b.configurations());

        // At T0+1800 the latest configuration (iteration 2, 600s, start
        // T0+900) yields floor(900/600) + 2 = 3 on both instances.
        let now = t0 + Duration::from_secs(1800);
        assert_eq!(a.current_cycle_at(now).unwrap(), 3);
        assert_eq!(b.current_cycle_at(now).unwrap(), 3);

        // The concrete epoch view tracks the latest configuration.
        let current = a.current_cycle_info().unwrap();
        assert_eq!(current.duration_secs, 600);
        assert_eq!(current.network_start, t0 + Duration::from_secs(900));
    }

    #[test]
    fn non_admin_messages_are_ignored() {
        let engine = HiveCycleEngine::new(admin());
        let outsider = AccountAddress::parse("0.0.999").unwrap();
        let t0 = ConsensusTimestamp::from_unix_secs(100);
        engine
            .apply_message(&config_message(1, 300, t0, &outsider, 1))
            .unwrap();
        assert!(engine.configurations().is_empty());
    }

    #[test]
    fn inconsistent_replay_parks_the_engine() {
        let engine = HiveCycleEngine::new(admin());
        let mut events = engine.subscribe_events();
        let t0 = ConsensusTimestamp::from_unix_secs(1_000);

        engine
            .apply_message(&config_message(5, 300, t0 + Duration::from_secs(600), &admin(), 1))
            .unwrap();
        // A later iteration claiming an earlier start contradicts history.
        let err = engine
            .apply_message(&config_message(6, 300, t0, &admin(), 2))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Consistency(ConsistencyError::HiveCycleInconsistent { .. })
        ));
        assert_eq!(events.try_recv().unwrap(), CycleEvent::Inconsistent);
        assert!(engine.current_cycle_at(t0).is_err());
    }

    #[test]
    fn cycle_numbers_never_decrease_across_reconfiguration() {
        let engine = HiveCycleEngine::new(admin());
        let t0 = ConsensusTimestamp::from_unix_secs(0);
        engine
            .apply_message(&config_message(1, 300, t0, &admin(), 1))
            .unwrap();
        let before = engine
            .current_cycle_at(t0 + Duration::from_secs(899))
            .unwrap();
        engine
            .apply_message(&config_message(4, 600, t0 + Duration::from_secs(900), &admin(), 2))
            .unwrap();
        let after = engine
            .current_cycle_at(t0 + Duration::from_secs(900))
            .unwrap();
        assert!(after >= before);
    }
}
