use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use futures_util::Stream;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{AddrParseError, IpAddr};
use std::pin::Pin;
use std::str::FromStr;

/// Instant at which a ping from an address was recorded.
pub type Observation = DateTime<Utc>;

/// Canonical textual form of a source host address.
///
/// IPv4-mapped IPv6 addresses collapse to their IPv4 form, so a host seen
/// through either header keeps a single history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Address(ip.to_canonical().to_string())
    }
}

impl FromStr for Address {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<IpAddr>().map(Address::from)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time copy of the ping log. Also the on-disk and `/json` document.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PingSnapshot {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub pings: BTreeMap<Address, Vec<Observation>>,
}

impl PingSnapshot {
    pub fn observation_count(&self) -> usize {
        self.pings.values().map(Vec::len).sum()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<Address, Vec<Observation>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<BTreeMap<Address, Vec<Observation>>>::deserialize(deserializer)
        .map(Option::unwrap_or_default)
}

pub type GenericBoxedStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;
