//! Ledger-facing identity and time primitives.

use crate::error::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Add;
use std::str::FromStr;
use std::time::Duration;

mod cycle;
mod jobs;

/// Hex (de)serialization for opaque 32-byte roots.
pub(crate) mod serde_hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = hex::decode(&s).map_err(serde::de::Error::custom)?;
        raw.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

pub use cycle::{HiveCycle, HiveCycleConfiguration, HiveCycleConfigurationMessage};
pub use jobs::{
    BenchmarkResult, JobClaim, JobState, RenderDevice, RenderEngine, RenderJob, RenderOffer,
    RenderRequest, RendererVersionSupport,
};

/// An account address on the external ledger.
///
/// Registered accounts use the dotted `shard.realm.num` form
/// (e.g. `0.0.390079`). Before the ledger has assigned an account, a node is
/// addressed by its alias form `x.<base58(public key)>`, which the sign-up
/// `create` step replaces with the assigned dotted address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountAddress(String);

impl AccountAddress {
    /// Parses and validates an address in either the dotted or alias form.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        if let Some(alias) = s.strip_prefix("x.") {
            if alias.is_empty() || bs58::decode(alias).into_vec().is_err() {
                return Err(ProtocolError::Malformed(format!(
                    "invalid alias account address: {s}"
                )));
            }
            return Ok(Self(s.to_owned()));
        }
        let parts: Vec<&str> = s.split('.').collect();
        let dotted = parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
        if !dotted {
            return Err(ProtocolError::Malformed(format!(
                "invalid account address: {s}"
            )));
        }
        Ok(Self(s.to_owned()))
    }

    /// Builds the alias address for a not-yet-registered key pair.
    pub fn alias_for(public_key: &[u8]) -> Self {
        Self(format!("x.{}", bs58::encode(public_key).into_string()))
    }

    /// True while the address is an alias rather than a ledger-assigned one.
    pub fn is_alias(&self) -> bool {
        self.0.starts_with("x.")
    }

    /// The address with dots stripped: the keystore file stem.
    pub fn strip_dots(&self) -> String {
        self.0.replace('.', "")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountAddress {
    type Err = ProtocolError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for AccountAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AccountAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A content identifier handed out by the content-addressed storage layer.
///
/// Immutable handle for scene files, offers, requests and results; any
/// mutation of the underlying content produces a new `Cid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(pub String);

impl Cid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A consensus timestamp: seconds and nanoseconds since the Unix epoch, as
/// assigned by the external consensus service.
///
/// The mirror wire form is `"sss.nnnnnnnnn"`; ordering is total and follows
/// consensus order on any single topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ConsensusTimestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl ConsensusTimestamp {
    pub const GENESIS: Self = Self { seconds: 0, nanos: 0 };

    pub fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    pub fn from_unix_secs(seconds: i64) -> Self {
        Self { seconds, nanos: 0 }
    }

    /// Whole seconds elapsed since `earlier`, saturating at zero.
    pub fn secs_since(&self, earlier: Self) -> u64 {
        if *self < earlier {
            return 0;
        }
        let mut secs = (self.seconds - earlier.seconds) as u64;
        if self.nanos < earlier.nanos && secs > 0 {
            secs -= 1;
        }
        secs
    }
}

impl Add<Duration> for ConsensusTimestamp {
    type Output = Self;
    fn add(self, rhs: Duration) -> Self {
        let mut seconds = self.seconds + rhs.as_secs() as i64;
        let mut nanos = self.nanos + rhs.subsec_nanos();
        if nanos >= 1_000_000_000 {
            nanos -= 1_000_000_000;
            seconds += 1;
        }
        Self { seconds, nanos }
    }
}

impl fmt::Display for ConsensusTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

impl FromStr for ConsensusTimestamp {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ProtocolError::Malformed(format!("invalid consensus timestamp: {s}"));
        let (secs, nanos) = match s.split_once('.') {
            Some((secs, nanos)) => {
                if nanos.is_empty() || nanos.len() > 9 || !nanos.chars().all(|c| c.is_ascii_digit())
                {
                    return Err(bad());
                }
                // Right-pad to nanosecond precision: "1.5" means 1.500000000.
                let scale = 10u32.pow(9 - nanos.len() as u32);
                let frac: u32 = nanos.parse().map_err(|_| bad())?;
                (secs, frac * scale)
            }
            None => (s, 0),
        };
        Ok(Self {
            seconds: secs.parse().map_err(|_| bad())?,
            nanos,
        })
    }
}

impl Serialize for ConsensusTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ConsensusTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The human-identified account that controls funds and owns nodes.
///
/// Persisted as `config/operator.json`; exactly one per node directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub address: AccountAddress,
    pub public_key: String,
}

/// The role flags a node advertises on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NodeRoles {
    pub client: bool,
    pub render: bool,
}

/// This machine's identity on the network.
///
/// `node_id` stays at -1 until the smart contract assigns one. The SHA-256
/// digest of the persisted `node.json` is the node fingerprint used as the
/// sign-in challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: i64,
    pub name: String,
    pub address: AccountAddress,
    pub public_key: String,
    pub roles: NodeRoles,
}

impl NodeRecord {
    pub fn is_registered(&self) -> bool {
        self.node_id >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_address_forms() {
        let a = AccountAddress::parse("0.0.390079").unwrap();
        assert!(!a.is_alias());
        assert_eq!(a.strip_dots(), "00390079");

        let alias = AccountAddress::alias_for(&[1, 2, 3]);
        assert!(alias.is_alias());
        assert!(AccountAddress::parse(alias.as_str()).is_ok());

        assert!(AccountAddress::parse("0.0").is_err());
        assert!(AccountAddress::parse("a.b.c").is_err());
        assert!(AccountAddress::parse("x.").is_err());
    }

    #[test]
    fn timestamp_roundtrip_and_order() {
        let t: ConsensusTimestamp = "1683577645.123456789".parse().unwrap();
        assert_eq!(t.seconds, 1683577645);
        assert_eq!(t.nanos, 123456789);
        assert_eq!(t.to_string(), "1683577645.123456789");

        let short: ConsensusTimestamp = "5.5".parse().unwrap();
        assert_eq!(short.nanos, 500_000_000);

        let later: ConsensusTimestamp = "1683577646.0".parse().unwrap();
        assert!(t < later);
        assert_eq!(later.secs_since(t), 0);
        let much_later = later + Duration::from_secs(90);
        assert_eq!(much_later.secs_since(t), 90);
    }

    #[test]
    fn timestamp_rejects_garbage() {
        assert!("".parse::<ConsensusTimestamp>().is_err());
        assert!("1.".parse::<ConsensusTimestamp>().is_err());
        assert!("1.0000000001".parse::<ConsensusTimestamp>().is_err());
        assert!("abc.5".parse::<ConsensusTimestamp>().is_err());
    }
}
