use serde::{Deserialize, Serialize};

/// A channel currently in "active mode" — the daemon may respond to
/// messages it was not directly addressed in (§3 ActiveMode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveMode {
    pub channel_id: String,
    pub entered_at: String,
    pub last_activity: String,
    pub instance_id: String,
}
