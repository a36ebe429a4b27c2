//! Core types for the bully election node
//!
//! Priority keys, rank derivation and the configuration sections shared by
//! the networking, election, probing and fault-injection components.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::p2p::{P2PError, P2PResult};

/// Ordered identity of a node.
///
/// Keys compare lexicographically: `rank` first, then `tiebreak`. The node
/// holding the largest key among the live members is the rightful leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriorityKey {
    /// Days until the node's reference date
    pub rank: u32,
    /// Numeric identifier breaking ties between equal ranks
    pub tiebreak: u64,
}

impl PriorityKey {
    pub fn new(rank: u32, tiebreak: u64) -> Self {
        Self { rank, tiebreak }
    }

    /// Build a key whose rank is the number of days from today until the
    /// next `MM-DD` occurrence.
    pub fn from_birthday(birthday: &str, tiebreak: u64) -> P2PResult<Self> {
        let rank = days_until(birthday, Local::now().date_naive())?;
        Ok(Self::new(rank, tiebreak))
    }

    /// True when this key outranks `other`
    pub fn outranks(&self, other: &PriorityKey) -> bool {
        self > other
    }
}

impl fmt::Display for PriorityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.rank, self.tiebreak)
    }
}

/// Days from `today` until the next occurrence of `mmdd`.
///
/// Today counts as zero. A date already past this year rolls over to the
/// next year; Feb 29 rolls forward to the next leap year.
pub fn days_until(mmdd: &str, today: NaiveDate) -> P2PResult<u32> {
    let (month, day) = parse_month_day(mmdd)?;

    let mut year = today.year();
    loop {
        if let Some(candidate) = NaiveDate::from_ymd_opt(year, month, day) {
            if candidate >= today {
                return Ok((candidate - today).num_days() as u32);
            }
        }
        year += 1;
        // Feb 29 is at most eight years away (century rule)
        if year > today.year() + 8 {
            return Err(P2PError::Configuration(format!("date {} never occurs", mmdd)));
        }
    }
}

fn parse_month_day(mmdd: &str) -> P2PResult<(u32, u32)> {
    let invalid = || P2PError::Configuration(format!("date must be MM-DD, got {:?}", mmdd));

    let (month, day) = mmdd.split_once('-').ok_or_else(invalid)?;
    if month.len() != 2 || day.len() != 2 {
        return Err(invalid());
    }
    let month: u32 = month.parse().map_err(|_| invalid())?;
    let day: u32 = day.parse().map_err(|_| invalid())?;

    // validate against a leap year so 02-29 is accepted
    if NaiveDate::from_ymd_opt(2024, month, day).is_none() {
        return Err(invalid());
    }
    Ok((month, day))
}

/// Configuration for a bully node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the peer listener binds to
    pub listen_address: SocketAddr,
    /// Directory (`host:port`) used to discover the group
    pub directory_address: String,
    /// Network timeouts and limits
    pub network: NetworkConfig,
    /// Election timing
    pub election: ElectionConfig,
    /// Leader probing
    pub probe: ProbeConfig,
    /// Simulated failures
    pub fault_injection: FaultInjectionConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            directory_address: "localhost:50600".to_string(),
            network: NetworkConfig::default(),
            election: ElectionConfig::default(),
            probe: ProbeConfig::default(),
            fault_injection: FaultInjectionConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Reject zero timeouts and inverted ranges
    pub fn validate(&self) -> P2PResult<()> {
        if self.directory_address.is_empty() {
            return Err(P2PError::Configuration("directory address is empty".to_string()));
        }
        if self.network.peer_timeout_ms == 0 {
            return Err(P2PError::Configuration("network.peer_timeout_ms must be positive".to_string()));
        }
        if self.network.max_message_size < 64 {
            return Err(P2PError::Configuration("network.max_message_size is too small".to_string()));
        }
        if self.election.election_wait_ms == 0 || self.election.leader_wait_ms == 0 {
            return Err(P2PError::Configuration("election timings must be positive".to_string()));
        }
        check_range("probe interval", self.probe.min_interval_ms, self.probe.max_interval_ms)?;
        check_range(
            "fault_injection uptime",
            self.fault_injection.min_uptime_ms,
            self.fault_injection.max_uptime_ms,
        )?;
        check_range(
            "fault_injection downtime",
            self.fault_injection.min_downtime_ms,
            self.fault_injection.max_downtime_ms,
        )?;
        Ok(())
    }
}

fn check_range(name: &str, min: u64, max: u64) -> P2PResult<()> {
    if min > max {
        return Err(P2PError::Configuration(format!("{} range is inverted: {} > {}", name, min, max)));
    }
    Ok(())
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Bound on every outbound exchange and on reading an inbound request
    pub peer_timeout_ms: u64,
    /// Maximum frame size in bytes
    pub max_message_size: usize,
}

impl NetworkConfig {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            peer_timeout_ms: 1500,
            max_message_size: 64 * 1024,
        }
    }
}

/// Election timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// How long to wait for any higher peer to acknowledge `ELECT`
    pub election_wait_ms: u64,
    /// How long to wait for `I_AM_LEADER` after a higher peer acknowledged
    pub leader_wait_ms: u64,
}

impl ElectionConfig {
    pub fn election_wait(&self) -> Duration {
        Duration::from_millis(self.election_wait_ms)
    }

    pub fn leader_wait(&self) -> Duration {
        Duration::from_millis(self.leader_wait_ms)
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_wait_ms: 2000,
            leader_wait_ms: 4000,
        }
    }
}

/// Leader probing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub enabled: bool,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_ms: 500,
            max_interval_ms: 3000,
        }
    }
}

/// Simulated crash/recovery cycles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultInjectionConfig {
    pub enabled: bool,
    /// Healthy period before each simulated failure
    pub min_uptime_ms: u64,
    pub max_uptime_ms: u64,
    /// How long each simulated failure lasts
    pub min_downtime_ms: u64,
    pub max_downtime_ms: u64,
}

impl Default for FaultInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_uptime_ms: 0,
            max_uptime_ms: 10_000,
            min_downtime_ms: 1000,
            max_downtime_ms: 4000,
        }
    }
}

/// Pick a uniformly random duration in `[min_ms, max_ms]`
pub(crate) fn random_duration(min_ms: u64, max_ms: u64) -> Duration {
    use rand::Rng;
    if min_ms >= max_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}
