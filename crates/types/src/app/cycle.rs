//! Hive-cycle epochs and the synchronization-topic configuration messages.

use super::ConsensusTimestamp;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// The JSON body carried on the hive-cycle synchronization topic.
///
/// Only the topic admin may publish these; `timestamp` is informational, the
/// authoritative start time of the configuration is the consensus timestamp
/// the log assigned to the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiveCycleConfigurationMessage {
    pub iteration: u64,
    /// Cycle duration in seconds.
    pub duration: u64,
    pub timestamp: ConsensusTimestamp,
}

/// One accepted entry of the append-only configuration list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiveCycleConfiguration {
    /// The cycle number at which this configuration takes effect.
    pub iteration: u64,
    pub duration_secs: u64,
    /// Consensus timestamp of the defining synchronization message.
    pub network_start: ConsensusTimestamp,
}

impl HiveCycleConfiguration {
    /// The cycle number at `now` under this configuration.
    ///
    /// `floor((now - network_start) / duration) + iteration`; times before
    /// `network_start` clamp to `iteration`.
    pub fn cycle_at(&self, now: ConsensusTimestamp) -> u64 {
        if self.duration_secs == 0 {
            return self.iteration;
        }
        self.iteration + now.secs_since(self.network_start) / self.duration_secs
    }
}

/// A concrete epoch the node is currently in.
#[derive(Debug, Clone, PartialEq)]
pub struct HiveCycle {
    pub number: u64,
    pub duration_secs: u64,
    /// Consensus timestamp of the governing configuration message.
    pub network_start: ConsensusTimestamp,
    /// Wall-clock reading when the governing configuration was received.
    pub local_start: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_formula() {
        let config = HiveCycleConfiguration {
            iteration: 2,
            duration_secs: 600,
            network_start: ConsensusTimestamp::from_unix_secs(900),
        };
        // 900 elapsed seconds = 1 full cycle under a 600s duration.
        assert_eq!(config.cycle_at(ConsensusTimestamp::from_unix_secs(1800)), 3);
        // Before the configuration start, the iteration itself is reported.
        assert_eq!(config.cycle_at(ConsensusTimestamp::from_unix_secs(100)), 2);
        // Exactly on a boundary the next cycle begins.
        assert_eq!(config.cycle_at(ConsensusTimestamp::from_unix_secs(2100)), 4);
    }
}
