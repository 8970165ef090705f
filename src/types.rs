use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a session was discovered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Origin {
    Local,
    Remote(String),
}

impl Origin {
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            Origin::Local => None,
            Origin::Remote(host) => Some(host.as_str()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Origin::Local => "local",
            Origin::Remote(host) => host.as_str(),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity of a session. Names are only unique within one origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub origin: Origin,
    pub name: String,
}

impl SessionKey {
    pub fn new(origin: Origin, name: impl Into<String>) -> Self {
        Self {
            origin,
            name: name.into(),
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::new(Origin::Local, name)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Origin::Local => f.write_str(&self.name),
            Origin::Remote(host) => write!(f, "{host}:{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Working,
    Waiting,
    NeedsPermission,
    Done,
    Error,
    Unknown,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 6] = [
        SessionStatus::Working,
        SessionStatus::Waiting,
        SessionStatus::NeedsPermission,
        SessionStatus::Done,
        SessionStatus::Error,
        SessionStatus::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Working => "working",
            SessionStatus::Waiting => "waiting",
            SessionStatus::NeedsPermission => "needs-permission",
            SessionStatus::Done => "done",
            SessionStatus::Error => "error",
            SessionStatus::Unknown => "unknown",
        }
    }

    /// Maps the raw strings agents report onto the canonical set.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "working" | "running" | "busy" | "thinking" | "active" | "processing" => {
                SessionStatus::Working
            }
            "waiting" | "idle" | "input" | "waiting-for-input" | "waiting_for_input" => {
                SessionStatus::Waiting
            }
            "needs-permission" | "needs_permission" | "permission" | "approval" | "blocked" => {
                SessionStatus::NeedsPermission
            }
            "done" | "completed" | "complete" | "finished" | "stopped" => SessionStatus::Done,
            "error" | "failed" | "crashed" => SessionStatus::Error,
            _ => SessionStatus::Unknown,
        }
    }

    pub fn needs_attention(self) -> bool {
        matches!(
            self,
            SessionStatus::NeedsPermission | SessionStatus::Waiting | SessionStatus::Error
        )
    }

    pub fn is_completed(self) -> bool {
        self == SessionStatus::Done
    }

    /// Lower ranks sort first in the canonical priority order.
    pub fn priority_rank(self) -> u8 {
        match self {
            SessionStatus::NeedsPermission => 0,
            SessionStatus::Waiting => 1,
            SessionStatus::Error => 2,
            SessionStatus::Working => 3,
            SessionStatus::Unknown => 4,
            SessionStatus::Done => 5,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsInfo {
    pub branch: Option<String>,
    pub ahead: usize,
    pub behind: usize,
    pub changed_files: usize,
    pub last_commit: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub rss_kb: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetrics {
    pub tokens: u64,
    pub cost_usd: f64,
}

/// One monitored session. Metadata fields stay `None` until a fetch fills them.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub origin: Origin,
    pub name: String,
    pub status: SessionStatus,
    pub working_dir: PathBuf,
    pub last_activity: DateTime<Utc>,
    pub attached: bool,
    pub message: Option<String>,
    pub metrics: Option<TokenMetrics>,
    pub vcs: Option<VcsInfo>,
    pub resources: Option<ResourceUsage>,
}

impl Session {
    pub fn new(origin: Origin, name: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            origin,
            name: name.into(),
            status: SessionStatus::Unknown,
            working_dir: working_dir.into(),
            last_activity: DateTime::<Utc>::UNIX_EPOCH,
            attached: false,
            message: None,
            metrics: None,
            vcs: None,
            resources: None,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.origin.clone(), self.name.clone())
    }

    pub fn is(&self, key: &SessionKey) -> bool {
        self.origin == key.origin && self.name == key.name
    }

    /// Scope key used by the version-control cache.
    pub fn vcs_key(&self) -> DirKey {
        DirKey::new(self.origin.clone(), self.working_dir.clone())
    }
}

/// A working directory on a specific origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirKey {
    pub origin: Origin,
    pub dir: PathBuf,
}

impl DirKey {
    pub fn new(origin: Origin, dir: impl Into<PathBuf>) -> Self {
        Self {
            origin,
            dir: dir.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Todo,
    InProgress,
    Blocked,
    Done,
    Unknown,
}

impl TaskStatus {
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "todo" | "open" | "pending" | "backlog" => TaskStatus::Todo,
            "in-progress" | "in_progress" | "doing" | "active" | "started" => {
                TaskStatus::InProgress
            }
            "blocked" | "on-hold" => TaskStatus::Blocked,
            "done" | "closed" | "completed" | "merged" => TaskStatus::Done,
            _ => TaskStatus::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
            TaskStatus::Unknown => "unknown",
        }
    }

    pub fn sort_rank(self) -> u8 {
        match self {
            TaskStatus::Blocked => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Todo => 2,
            TaskStatus::Unknown => 3,
            TaskStatus::Done => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGroup {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrCheckState {
    Pending,
    Passed,
    Failed,
    Skipped,
}

impl PrCheckState {
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pass" | "success" | "passed" => PrCheckState::Passed,
            "fail" | "failure" | "failed" | "cancelled" | "error" => PrCheckState::Failed,
            "skipping" | "skipped" | "neutral" => PrCheckState::Skipped,
            _ => PrCheckState::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrCheck {
    pub name: String,
    pub state: PrCheckState,
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_from_raw() {
        assert_eq!(SessionStatus::from_raw(" Running "), SessionStatus::Working);
        assert_eq!(SessionStatus::from_raw("idle"), SessionStatus::Waiting);
        assert_eq!(
            SessionStatus::from_raw("needs_permission"),
            SessionStatus::NeedsPermission
        );
        assert_eq!(SessionStatus::from_raw("completed"), SessionStatus::Done);
        assert_eq!(SessionStatus::from_raw("FAILED"), SessionStatus::Error);
        assert_eq!(SessionStatus::from_raw(""), SessionStatus::Unknown);
    }

    #[test]
    fn test_attention_statuses_rank_first() {
        let mut statuses = SessionStatus::ALL.to_vec();
        statuses.sort_by_key(|status| status.priority_rank());
        assert!(statuses[0].needs_attention());
        assert!(statuses[1].needs_attention());
        assert_eq!(statuses.last().copied(), Some(SessionStatus::Done));
    }

    #[test]
    fn test_session_key_display() {
        assert_eq!(SessionKey::local("api").to_string(), "api");
        assert_eq!(
            SessionKey::new(Origin::Remote("box".to_string()), "api").to_string(),
            "box:api"
        );
    }

    #[test]
    fn test_same_name_on_different_origins_is_distinct() {
        let local = Session::new(Origin::Local, "api", "/w");
        let remote = Session::new(Origin::Remote("box".to_string()), "api", "/w");
        assert_ne!(local.key(), remote.key());
        assert_ne!(local.vcs_key(), remote.vcs_key());
    }

    #[test]
    fn test_pr_check_state_from_raw() {
        assert_eq!(PrCheckState::from_raw("pass"), PrCheckState::Passed);
        assert_eq!(PrCheckState::from_raw("fail"), PrCheckState::Failed);
        assert_eq!(PrCheckState::from_raw("pending"), PrCheckState::Pending);
        assert_eq!(PrCheckState::from_raw("skipping"), PrCheckState::Skipped);
    }

    #[test]
    fn test_task_status_from_raw() {
        assert_eq!(TaskStatus::from_raw("In_Progress"), TaskStatus::InProgress);
        assert_eq!(TaskStatus::from_raw("closed"), TaskStatus::Done);
        assert_eq!(TaskStatus::from_raw("???"), TaskStatus::Unknown);
    }
}
