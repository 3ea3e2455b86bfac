use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A named configuration profile. Content lives at `path`; the metadata never changes after save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigProfile {
    pub id: String,
    pub name: String,
    pub path: String,
}

/// Settings persisted by the host bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub config_dir: String,
    pub singbox_path: String,
}

/// Observed truth about the controlled process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Stopped,
    Running,
}

impl ServiceStatus {
    pub fn from_running(running: bool) -> Self {
        if running {
            ServiceStatus::Running
        } else {
            ServiceStatus::Stopped
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, ServiceStatus::Running)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Stopped => f.write_str("stopped"),
            ServiceStatus::Running => f.write_str("running"),
        }
    }
}

/// Client-side condition while a lifecycle command is in flight. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Starting,
    Stopping,
}

/// Proxy entry kind as reported by the control API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GroupType {
    Selector,
    UrlTest,
    Other(String),
}

impl GroupType {
    /// Only selector and url-test groups can be switched by the user.
    pub fn is_selectable(&self) -> bool {
        matches!(self, GroupType::Selector | GroupType::UrlTest)
    }

    pub fn as_str(&self) -> &str {
        match self {
            GroupType::Selector => "Selector",
            GroupType::UrlTest => "URLTest",
            GroupType::Other(raw) => raw,
        }
    }

    /// Short label for listings.
    pub fn display_name(&self) -> String {
        match self.as_str().to_ascii_lowercase().as_str() {
            "selector" => "selector".into(),
            "urltest" => "urltest".into(),
            "direct" => "direct".into(),
            "reject" => "reject".into(),
            "dns" => "DNS".into(),
            "vmess" => "VMess".into(),
            "vless" => "VLESS".into(),
            "shadowsocks" => "SS".into(),
            "trojan" => "Trojan".into(),
            "hysteria2" => "Hysteria2".into(),
            _ => self.as_str().to_string(),
        }
    }
}

impl From<String> for GroupType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Selector" => GroupType::Selector,
            "URLTest" => GroupType::UrlTest,
            _ => GroupType::Other(raw),
        }
    }
}

impl From<GroupType> for String {
    fn from(t: GroupType) -> Self {
        t.as_str().to_string()
    }
}

/// One entry of a group's delay history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRecord {
    pub time: String,
    pub delay: u64,
}

/// A proxy group (or raw proxy entry) from one topology snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyGroup {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: GroupType,
    #[serde(rename = "now", default)]
    pub current: Option<String>,
    #[serde(rename = "all", default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub history: Vec<DelayRecord>,
    #[serde(default)]
    pub udp: bool,
}

impl ProxyGroup {
    /// Most recent delay the control API recorded for this entry.
    pub fn last_delay(&self) -> Option<u64> {
        self.history.last().map(|r| r.delay)
    }
}

/// Full snapshot keyed by group name. Replaced wholesale on every successful fetch.
pub type Topology = BTreeMap<String, ProxyGroup>;

/// Member name to measured round-trip milliseconds. Empty means "no data".
pub type LatencyResult = BTreeMap<String, u64>;

/// Presentation tiers for a measured delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyTier {
    Best,
    Good,
    Marginal,
    Poor,
}

impl LatencyTier {
    pub fn classify(millis: u64) -> Self {
        match millis {
            0..=199 => LatencyTier::Best,
            200..=499 => LatencyTier::Good,
            500..=699 => LatencyTier::Marginal,
            _ => LatencyTier::Poor,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LatencyTier::Best => "best",
            LatencyTier::Good => "good",
            LatencyTier::Marginal => "marginal",
            LatencyTier::Poor => "poor",
        }
    }
}

/// Cadence of the two independent background polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(with = "humantime_serde")]
    pub status_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub topology_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(5),
            topology_interval: Duration::from_secs(5),
        }
    }
}

/// Latency probe parameters sent to the control API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSettings {
    pub url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            url: "https://www.gstatic.com/generate_204".into(),
            timeout: Duration::from_millis(5000),
        }
    }
}
