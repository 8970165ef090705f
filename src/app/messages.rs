//! Everything that flows into `App::update` and every side effect it asks for.
//!
//! Results cross the worker boundary with errors flattened to `String`.

use std::path::PathBuf;

use crossterm::event::KeyEvent;

use crate::provider::ProviderOutcome;
use crate::types::{DirKey, Origin, PrCheck, ResourceUsage, Session, SessionKey, SessionStatus, VcsInfo};

use super::reconcile::StatusBaseline;

pub type FetchResult<T> = Result<T, String>;

/// Periodic timers owned by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Poller {
    Local,
    Remote,
    Vcs,
    Resources,
    Tasks,
    PrChecks,
    /// One-second heartbeat for transient UI state.
    Housekeeping,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectTasks {
    pub project: PathBuf,
    pub outcome: FetchResult<ProviderOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutateAction {
    Kill,
    Rename(String),
    /// Clears the agent status record; the session itself keeps running.
    Dismiss,
}

impl MutateAction {
    pub fn verb(&self) -> &'static str {
        match self {
            MutateAction::Kill => "kill",
            MutateAction::Rename(_) => "rename",
            MutateAction::Dismiss => "dismiss",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub origin: Origin,
    pub name: String,
    pub working_dir: PathBuf,
    pub command: Option<String>,
}

impl CreateRequest {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.origin.clone(), self.name.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Key(KeyEvent),
    Resize(u16, u16),
    Tick(Poller),
    LocalSessions {
        epoch: u64,
        result: FetchResult<Vec<Session>>,
    },
    RemoteSessions {
        host: String,
        epoch: u64,
        result: FetchResult<Vec<Session>>,
    },
    VcsBatch(Vec<(DirKey, FetchResult<VcsInfo>)>),
    ResourceBatch(Vec<(SessionKey, FetchResult<ResourceUsage>)>),
    TaskBatch(Vec<ProjectTasks>),
    PrChecks {
        dir: DirKey,
        requested: bool,
        result: FetchResult<Vec<PrCheck>>,
    },
    PreviewCaptured {
        key: SessionKey,
        result: FetchResult<String>,
    },
    ScrollbackLoaded {
        key: SessionKey,
        result: FetchResult<String>,
    },
    MutationFinished {
        key: SessionKey,
        action: MutateAction,
        result: FetchResult<()>,
    },
    SessionCreated {
        key: SessionKey,
        result: FetchResult<()>,
    },
    AttachFinished {
        key: SessionKey,
        baseline: StatusBaseline,
        result: FetchResult<()>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RefreshLocal { epoch: u64 },
    RefreshRemote { host: String, epoch: u64 },
    FetchVcs(Vec<DirKey>),
    FetchResources(Vec<SessionKey>),
    RunTaskProviders(Vec<PathBuf>),
    FetchPrChecks { dir: DirKey, requested: bool },
    StartPrChecksTicker,
    StopPrChecksTicker,
    CapturePreview(SessionKey),
    LoadScrollback(SessionKey),
    Mutate { key: SessionKey, action: MutateAction },
    Create(CreateRequest),
    Attach(SessionKey),
    Notify { key: SessionKey, status: SessionStatus },
    OpenLink(String),
    Quit,
}
