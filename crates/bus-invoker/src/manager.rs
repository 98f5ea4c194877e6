use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, instrument, warn};

use crate::backend::WorkerBackend;
use crate::error::{InvokerError, Result};
use crate::types::{InvokeOptions, InvokeOutcome, SessionKey};

const PASSIVE_SKIP_SENTINEL: &str = "PASSIVE_SKIP";

const PROMPT_TOO_LONG_PATTERNS: &[&str] = &["prompt is too long", "context_length_exceeded"];

const IDENTITY_FAILURE_PATTERNS: &[&str] = &[
    "can't roleplay",
    "cannot roleplay",
    "can't pretend",
    "cannot pretend",
    "persistent memory",
    "persistent memories",
    "i'm claude",
    "i am claude",
    "as an ai assistant",
];

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    patterns.iter().any(|p| lower.contains(p))
}

struct SessionState {
    initialized: bool,
    turn_count: u32,
    context_tokens: u64,
    last_activity: Instant,
}

impl SessionState {
    fn fresh() -> Self {
        Self { initialized: false, turn_count: 0, context_tokens: 0, last_activity: Instant::now() }
    }
}

/// Bounds beyond which a session is torn down and reinitialised.
#[derive(Debug, Clone, Copy)]
pub struct SessionBounds {
    pub max_context_tokens: u64,
    pub max_turns: u32,
    pub max_idle_seconds: u64,
}

impl Default for SessionBounds {
    fn default() -> Self {
        Self { max_context_tokens: 100_000, max_turns: 200, max_idle_seconds: 3600 }
    }
}

/// Owns a pool of long-lived worker sessions, one per [`SessionKey`], and
/// serialises invocations per session (a pool lock guards session-key
/// lookup; each session itself is effectively single-threaded).
pub struct Invoker {
    backend: Arc<dyn WorkerBackend>,
    sessions: DashMap<SessionKey, Mutex<SessionState>>,
    model: String,
    bounds: SessionBounds,
    diagnostics_dir: Option<std::path::PathBuf>,
}

impl Invoker {
    pub fn new(backend: Arc<dyn WorkerBackend>, model: impl Into<String>, bounds: SessionBounds) -> Self {
        Self { backend, sessions: DashMap::new(), model: model.into(), bounds, diagnostics_dir: None }
    }

    /// Enable identity-failure diagnostic artefacts under `dir` (§4.6:
    /// "write a diagnostic artefact for later inspection").
    pub fn with_diagnostics_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.diagnostics_dir = Some(dir.into());
        self
    }

    /// Best-effort write of a reply that matched the identity-failure
    /// heuristic; failures to write are logged, never propagated — the
    /// reply is still returned to the caller regardless.
    fn record_identity_failure(&self, session_key: &SessionKey, reply: &str) {
        let Some(dir) = &self.diagnostics_dir else { return };
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(error = %e, "failed to create diagnostics directory");
            return;
        }
        let path = dir.join(format!("identity-failure-{}-{}.txt", session_key.format(), chrono::Utc::now().timestamp_millis()));
        if let Err(e) = std::fs::write(&path, reply) {
            warn!(error = %e, path = %path.display(), "failed to write identity-failure diagnostic artefact");
        }
    }

    /// Tear down and reinitialise a session if any of its bounds have
    /// tripped. Returns `true` if a restart occurred.
    fn check_and_restart(&self, key: &SessionKey) -> bool {
        let entry = self.sessions.entry(key.clone()).or_insert_with(|| Mutex::new(SessionState::fresh()));
        let mut state = entry.lock().unwrap();
        let idle = state.last_activity.elapsed() >= Duration::from_secs(self.bounds.max_idle_seconds);
        let over_context = state.context_tokens >= self.bounds.max_context_tokens;
        let over_turns = state.turn_count >= self.bounds.max_turns;

        if idle || over_context || over_turns {
            info!(
                session = %key,
                idle,
                over_context,
                over_turns,
                "session bound tripped, restarting"
            );
            *state = SessionState::fresh();
            true
        } else {
            false
        }
    }

    /// Invoke the worker once for `prompt`, tracking session state on
    /// success. Returns `Err(PromptTooLong)` when the configured
    /// substring patterns are detected in stdout/stderr, surfacing the
    /// condition to the dispatcher rather than retrying internally.
    #[instrument(skip(self, prompt), fields(session = %session_key))]
    pub async fn invoke(
        &self,
        prompt: &str,
        session_key: &SessionKey,
        options: &InvokeOptions,
    ) -> Result<InvokeOutcome> {
        self.check_and_restart(session_key);

        let entry = self
            .sessions
            .entry(session_key.clone())
            .or_insert_with(|| Mutex::new(SessionState::fresh()));
        let already_initialized = entry.lock().unwrap().initialized;

        let resume_id = if options.use_session && already_initialized {
            Some(session_key.format())
        } else {
            None
        };
        let model = options.model_override.as_deref().unwrap_or(&self.model);
        let timeout = Duration::from_secs(options.timeout_seconds);

        let raw = self.backend.run(prompt, model, resume_id.as_deref(), timeout).await?;

        if contains_any(&raw.stdout, PROMPT_TOO_LONG_PATTERNS)
            || contains_any(&raw.stderr, PROMPT_TOO_LONG_PATTERNS)
        {
            return Err(InvokerError::PromptTooLong);
        }

        if !raw.success {
            return Err(InvokerError::WorkerFailure(raw.stderr));
        }

        if contains_any(&raw.stdout, IDENTITY_FAILURE_PATTERNS) {
            warn!(session = %session_key, "identity failure heuristic matched in worker reply");
            self.record_identity_failure(session_key, &raw.stdout);
        }

        {
            let mut state = entry.lock().unwrap();
            state.initialized = true;
            state.turn_count += 1;
            state.context_tokens += (prompt.len() as u64 + raw.stdout.len() as u64) / 4;
            state.last_activity = Instant::now();
        }

        if raw.stdout.is_empty() || raw.stdout == PASSIVE_SKIP_SENTINEL {
            return Ok(InvokeOutcome::PassiveSkip);
        }
        Ok(InvokeOutcome::Ok(raw.stdout))
    }

    /// Invoke with progressive context reduction: on `PromptTooLong`,
    /// call `reducer(prompt, retry_count)` to shrink the prompt and try
    /// again, up to `max_retries` times.
    pub async fn invoke_with_retry(
        &self,
        prompt: &str,
        session_key: &SessionKey,
        options: &InvokeOptions,
        max_retries: u32,
        reducer: impl Fn(&str, u32) -> String,
    ) -> Result<InvokeOutcome> {
        let mut current = prompt.to_string();
        for retry in 0..=max_retries {
            match self.invoke(&current, session_key, options).await {
                Ok(outcome) => return Ok(outcome),
                Err(InvokerError::PromptTooLong) => {
                    if retry >= max_retries {
                        return Err(InvokerError::PromptTooLong);
                    }
                    current = reducer(&current, retry + 1);
                }
                Err(e) => return Err(e),
            }
        }
        Err(InvokerError::PromptTooLong)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RawOutput;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedBackend {
        responses: Mutex<Vec<RawOutput>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WorkerBackend for ScriptedBackend {
        async fn run(
            &self,
            _prompt: &str,
            _model: &str,
            _resume_session_id: Option<&str>,
            _timeout: Duration,
        ) -> Result<RawOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            Ok(responses.remove(0))
        }
    }

    fn ok(text: &str) -> RawOutput {
        RawOutput { stdout: text.to_string(), stderr: String::new(), success: true }
    }

    #[tokio::test]
    async fn successful_invocation_tracks_session_state() {
        let backend = Arc::new(ScriptedBackend {
            responses: Mutex::new(vec![ok("hello there")]),
            calls: AtomicUsize::new(0),
        });
        let invoker = Invoker::new(backend, "sonnet", SessionBounds::default());
        let key = SessionKey::new("lyra", "chat");
        let outcome = invoker.invoke("hi", &key, &InvokeOptions::default()).await.unwrap();
        match outcome {
            InvokeOutcome::Ok(text) => assert_eq!(text, "hello there"),
            InvokeOutcome::PassiveSkip => panic!("expected Ok outcome"),
        }
    }

    #[tokio::test]
    async fn empty_reply_is_passive_skip() {
        let backend = Arc::new(ScriptedBackend {
            responses: Mutex::new(vec![ok("")]),
            calls: AtomicUsize::new(0),
        });
        let invoker = Invoker::new(backend, "sonnet", SessionBounds::default());
        let key = SessionKey::new("lyra", "reflection");
        let outcome = invoker.invoke("hi", &key, &InvokeOptions::default()).await.unwrap();
        assert!(matches!(outcome, InvokeOutcome::PassiveSkip));
    }

    #[tokio::test]
    async fn prompt_too_long_is_detected() {
        let backend = Arc::new(ScriptedBackend {
            responses: Mutex::new(vec![RawOutput {
                stdout: "Prompt is too long for this model".to_string(),
                stderr: String::new(),
                success: true,
            }]),
            calls: AtomicUsize::new(0),
        });
        let invoker = Invoker::new(backend, "sonnet", SessionBounds::default());
        let key = SessionKey::new("lyra", "chat");
        let err = invoker.invoke("hi", &key, &InvokeOptions::default()).await.unwrap_err();
        assert!(matches!(err, InvokerError::PromptTooLong));
    }

    #[tokio::test]
    async fn retry_reduces_prompt_until_it_fits() {
        let backend = Arc::new(ScriptedBackend {
            responses: Mutex::new(vec![
                RawOutput { stdout: "prompt is too long".to_string(), stderr: String::new(), success: true },
                ok("fits now"),
            ]),
            calls: AtomicUsize::new(0),
        });
        let invoker = Invoker::new(backend.clone(), "sonnet", SessionBounds::default());
        let key = SessionKey::new("lyra", "chat");
        let outcome = invoker
            .invoke_with_retry("a long prompt", &key, &InvokeOptions::default(), 3, |p, _retry| {
                p[..p.len() / 2].to_string()
            })
            .await
            .unwrap();
        match outcome {
            InvokeOutcome::Ok(text) => assert_eq!(text, "fits now"),
            InvokeOutcome::PassiveSkip => panic!("expected Ok outcome"),
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn restart_resets_session_after_turn_limit() {
        let backend = Arc::new(ScriptedBackend {
            responses: Mutex::new(vec![ok("one"), ok("two")]),
            calls: AtomicUsize::new(0),
        });
        let bounds = SessionBounds { max_context_tokens: 100_000, max_turns: 1, max_idle_seconds: 3600 };
        let invoker = Invoker::new(backend, "sonnet", bounds);
        let key = SessionKey::new("lyra", "chat");
        invoker.invoke("hi", &key, &InvokeOptions::default()).await.unwrap();
        assert!(invoker.check_and_restart(&key));
    }

    #[tokio::test]
    async fn identity_failure_reply_is_still_returned_and_logged_to_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend {
            responses: Mutex::new(vec![ok("As an AI assistant, I can't roleplay that persona.")]),
            calls: AtomicUsize::new(0),
        });
        let invoker =
            Invoker::new(backend, "sonnet", SessionBounds::default()).with_diagnostics_dir(dir.path());
        let key = SessionKey::new("lyra", "chat");
        let outcome = invoker.invoke("hi", &key, &InvokeOptions::default()).await.unwrap();

        match outcome {
            InvokeOutcome::Ok(text) => assert!(text.contains("As an AI assistant")),
            InvokeOutcome::PassiveSkip => panic!("expected Ok outcome, reply still returned to caller"),
        }
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
