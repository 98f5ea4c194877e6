use std::path::PathBuf;
use std::sync::RwLock;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use bus_core::config::TokenGateConfig;

use crate::error::{Result, TokenGateError};

/// Operations a short exempt set bypasses auth entirely for: health
/// checks and shared-read RAG (§4.9). Write paths (anchor_save,
/// texture_add*, crystallize, store_message, texture_delete) are never
/// exempt.
pub const EXEMPT_OPERATIONS: &[&str] =
    &["pps_health", "ambient_recall", "raw_search", "anchor_search", "texture_search", "get_crystals"];

fn is_exempt(operation: &str) -> bool {
    EXEMPT_OPERATIONS.contains(&operation)
}

/// Per-entity auth gate (C9), grounded on `skynet-users`'s permission
/// check (an outcome enum, an admin-equivalent bypass token) scaled down
/// to this crate's narrower "one shared secret plus one master override"
/// model.
pub struct TokenGate {
    entity_path: PathBuf,
    entity_token: RwLock<String>,
    master_token: Option<String>,
    strict: bool,
}

impl TokenGate {
    /// Load (or generate and persist) the entity token from
    /// `config.entity_path`, matching §4.9's boot behaviour.
    pub fn load(config: &TokenGateConfig) -> Result<Self> {
        let entity_path = PathBuf::from(&config.entity_path);
        let entity_token = match std::fs::read_to_string(&entity_path) {
            Ok(contents) => contents.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let generated = Uuid::new_v4().to_string();
                persist(&entity_path, &generated)?;
                info!(path = %entity_path.display(), "generated new entity token");
                generated
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            entity_path,
            entity_token: RwLock::new(entity_token),
            master_token: config.master_token.clone(),
            strict: config.strict,
        })
    }

    /// Validate `token` for `operation`. Exempt operations always pass.
    /// Strict mode rejects a missing token; permissive mode lets a
    /// missing token through but still rejects an invalid one.
    #[instrument(skip(self, token), fields(operation))]
    pub fn validate(&self, token: Option<&str>, operation: &str) -> Result<()> {
        if is_exempt(operation) {
            return Ok(());
        }

        match token {
            Some(t) if t == self.entity_token.read().unwrap().as_str() => Ok(()),
            Some(t) if self.master_token.as_deref() == Some(t) => Ok(()),
            Some(_) => Err(TokenGateError::AuthRejected("token does not match entity or master token".into())),
            None if self.strict => Err(TokenGateError::AuthRejected("token required in strict mode".into())),
            None => Ok(()),
        }
    }

    /// Atomically replace the entity token. Master-only: `requester`
    /// must equal the configured master token.
    #[instrument(skip(self, requester))]
    pub fn regenerate_token(&self, requester: &str) -> Result<String> {
        match &self.master_token {
            Some(master) if master == requester => {}
            _ => return Err(TokenGateError::MasterRequired),
        }

        let new_token = Uuid::new_v4().to_string();
        persist(&self.entity_path, &new_token)?;
        *self.entity_token.write().unwrap() = new_token.clone();
        warn!("entity token regenerated");
        Ok(new_token)
    }

    pub fn entity_token(&self) -> String {
        self.entity_token.read().unwrap().clone()
    }
}

fn persist(path: &std::path::Path, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, token)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir, strict: bool, master: Option<&str>) -> TokenGateConfig {
        TokenGateConfig {
            strict,
            entity_path: dir.path().join("entity_token").to_string_lossy().to_string(),
            master_token: master.map(|m| m.to_string()),
        }
    }

    #[test]
    fn missing_file_generates_and_persists_a_token() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, false, None);
        let gate = TokenGate::load(&cfg).unwrap();
        assert!(!gate.entity_token().is_empty());
        let reloaded = TokenGate::load(&cfg).unwrap();
        assert_eq!(gate.entity_token(), reloaded.entity_token());
    }

    #[test]
    fn entity_token_validates() {
        let dir = TempDir::new().unwrap();
        let gate = TokenGate::load(&config(&dir, true, None)).unwrap();
        let token = gate.entity_token();
        assert!(gate.validate(Some(&token), "store_message").is_ok());
    }

    #[test]
    fn strict_mode_rejects_missing_token() {
        let dir = TempDir::new().unwrap();
        let gate = TokenGate::load(&config(&dir, true, None)).unwrap();
        assert!(gate.validate(None, "store_message").is_err());
    }

    #[test]
    fn permissive_mode_allows_missing_token() {
        let dir = TempDir::new().unwrap();
        let gate = TokenGate::load(&config(&dir, false, None)).unwrap();
        assert!(gate.validate(None, "store_message").is_ok());
    }

    #[test]
    fn invalid_token_always_rejected() {
        let dir = TempDir::new().unwrap();
        let gate = TokenGate::load(&config(&dir, false, None)).unwrap();
        assert!(gate.validate(Some("garbage"), "store_message").is_err());
    }

    #[test]
    fn exempt_operations_bypass_auth_even_without_a_token() {
        let dir = TempDir::new().unwrap();
        let gate = TokenGate::load(&config(&dir, true, None)).unwrap();
        assert!(gate.validate(None, "pps_health").is_ok());
        assert!(gate.validate(None, "raw_search").is_ok());
    }

    #[test]
    fn master_token_also_validates() {
        let dir = TempDir::new().unwrap();
        let gate = TokenGate::load(&config(&dir, true, Some("master-secret"))).unwrap();
        assert!(gate.validate(Some("master-secret"), "store_message").is_ok());
    }

    #[test]
    fn regenerate_requires_master_token() {
        let dir = TempDir::new().unwrap();
        let gate = TokenGate::load(&config(&dir, true, Some("master-secret"))).unwrap();
        assert!(matches!(gate.regenerate_token("wrong"), Err(TokenGateError::MasterRequired)));

        let old = gate.entity_token();
        let new_token = gate.regenerate_token("master-secret").unwrap();
        assert_ne!(old, new_token);
        assert!(gate.validate(Some(&old), "store_message").is_err());
        assert!(gate.validate(Some(&new_token), "store_message").is_ok());
    }
}
