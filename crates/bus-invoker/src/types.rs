use crate::error::{InvokerError, Result};

/// Identifies one long-lived worker session: one per logical channel
/// family (chat, reflection, terminal, …), not per individual channel.
///
/// Wire format: `{agent_id}:{channel_family}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub agent_id: String,
    pub channel_family: String,
}

impl SessionKey {
    pub fn new(agent_id: impl Into<String>, channel_family: impl Into<String>) -> Self {
        Self { agent_id: agent_id.into(), channel_family: channel_family.into() }
    }

    pub fn format(&self) -> String {
        format!("{}:{}", self.agent_id, self.channel_family)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (agent_id, channel_family) = s
            .split_once(':')
            .ok_or_else(|| InvokerError::InvalidKey(format!("missing ':' separator: {s}")))?;
        if agent_id.is_empty() || channel_family.is_empty() {
            return Err(InvokerError::InvalidKey(format!("key components must not be empty: {s}")));
        }
        Ok(Self { agent_id: agent_id.to_string(), channel_family: channel_family.to_string() })
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

/// Outcome of a single worker invocation.
#[derive(Debug, Clone)]
pub enum InvokeOutcome {
    Ok(String),
    PassiveSkip,
}

/// Options accepted by [`crate::manager::Invoker::invoke`].
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    pub use_session: bool,
    pub timeout_seconds: u64,
    pub model_override: Option<String>,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self { use_session: true, timeout_seconds: 180, model_override: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_round_trips() {
        let key = SessionKey::new("lyra", "chat");
        let formatted = key.format();
        assert_eq!(formatted, "lyra:chat");
        let parsed = SessionKey::parse(&formatted).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn session_key_rejects_missing_separator() {
        assert!(SessionKey::parse("no-separator-here").is_err());
    }

    #[test]
    fn session_key_rejects_empty_components() {
        assert!(SessionKey::parse(":chat").is_err());
        assert!(SessionKey::parse("lyra:").is_err());
    }
}
