use serde::{Deserialize, Serialize};
use std::fmt;

/// A conversational stream tag — `"chat:<room>"`, `"terminal:<id>"`,
/// `"reflection"`, etc. Not a network channel; see the glossary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for channels that behave like a DM: every inbound message is
    /// implicitly a mention (§4.7).
    pub fn is_dm_like(&self) -> bool {
        self.0.starts_with("dm:")
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifies a daemon instance competing for claims on peer channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    /// A fresh instance id, e.g. `bus-3f21a9c4`. Stable for the lifetime
    /// of the process.
    pub fn generate() -> Self {
        Self(format!("bus-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Current UTC instant as an RFC3339 string — the on-disk timestamp format
/// used by every table in this workspace.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
