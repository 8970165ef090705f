//! Focus modes, dialog states and the small bits of view state around them.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::matching::RankedCandidate;
use crate::types::{DirKey, PrCheck, PrCheckState, SessionKey, Task};

use super::messages::FetchResult;
use super::viewport::{ListCursor, Viewport};

const NOTICE_TTL_TICKS: u8 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum FocusMode {
    /// Primary list focused; the resting state.
    List,
    Tasks,
    Preview,
    Briefing(BriefingState),
    Dialog(ActiveDialog),
}

impl FocusMode {
    pub fn is_modal(&self) -> bool {
        matches!(self, FocusMode::Dialog(_))
    }

    pub fn dialog(&self) -> Option<&ActiveDialog> {
        match self {
            FocusMode::Dialog(dialog) => Some(dialog),
            _ => None,
        }
    }

    pub fn dialog_mut(&mut self) -> Option<&mut ActiveDialog> {
        match self {
            FocusMode::Dialog(dialog) => Some(dialog),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActiveDialog {
    CreateSession(CreateSessionState),
    Rename(RenameState),
    ConfirmKill(ConfirmKillState),
    SessionDetail(SessionDetailState),
    TaskDetail(TaskDetailState),
    Content(ContentState),
    ProjectPicker(ProjectPickerState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateField {
    Name,
    Directory,
    Command,
    Origin,
}

impl CreateField {
    pub fn next(self) -> Self {
        match self {
            CreateField::Name => CreateField::Directory,
            CreateField::Directory => CreateField::Command,
            CreateField::Command => CreateField::Origin,
            CreateField::Origin => CreateField::Name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSessionState {
    pub name: String,
    pub directory: String,
    pub command: String,
    /// 0 is local, `n` is the n-th configured host.
    pub origin_index: usize,
    pub field: CreateField,
    pub error: Option<String>,
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameState {
    pub key: SessionKey,
    pub input: String,
    pub error: Option<String>,
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmKillState {
    pub key: SessionKey,
    pub error: Option<String>,
    pub pending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDetailState {
    pub key: SessionKey,
    pub dir: DirKey,
    pub checks: Option<FetchResult<Vec<PrCheck>>>,
    pub viewport: Viewport,
}

impl SessionDetailState {
    pub fn has_pending_checks(&self) -> bool {
        match &self.checks {
            Some(Ok(checks)) => checks
                .iter()
                .any(|check| check.state == PrCheckState::Pending),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDetailState {
    pub project: PathBuf,
    pub group_title: String,
    pub task: Task,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    Scrollback(SessionKey),
    Text,
}

/// Full-screen text. Closing returns to `return_to` when set.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentState {
    pub title: String,
    pub source: ContentSource,
    pub body: Option<FetchResult<String>>,
    pub viewport: Viewport,
    pub return_to: Option<Box<ActiveDialog>>,
}

impl ContentState {
    pub fn line_count(&self) -> usize {
        match &self.body {
            Some(Ok(text)) => text.lines().count(),
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPickerState {
    pub query: String,
    pub candidates: Vec<PathBuf>,
    pub ranked: Vec<RankedCandidate>,
    pub list: ListCursor,
}

impl ProjectPickerState {
    pub fn selected(&self) -> Option<&PathBuf> {
        self.ranked
            .get(self.list.cursor)
            .and_then(|ranked| self.candidates.get(ranked.index))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BriefingState {
    pub viewport: Viewport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchTarget {
    #[default]
    Sessions,
    Tasks,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchState {
    pub target: SearchTarget,
    pub query: String,
    pub editing: bool,
}

impl SearchState {
    pub fn is_active(&self) -> bool {
        !self.query.trim().is_empty()
    }

    pub fn applies_to(&self, target: SearchTarget) -> bool {
        self.target == target && self.is_active()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub is_error: bool,
    ttl_ticks: u8,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
            ttl_ticks: NOTICE_TTL_TICKS,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
            ttl_ticks: NOTICE_TTL_TICKS,
        }
    }

    /// Returns false once the notice has expired.
    pub fn tick(&mut self) -> bool {
        self.ttl_ticks = self.ttl_ticks.saturating_sub(1);
        self.ttl_ticks > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewState {
    pub target: Option<SessionKey>,
    pub text: Option<FetchResult<String>>,
    pub viewport: Viewport,
    /// Stick to the newest output until the user scrolls up.
    pub follow_tail: bool,
}

impl PreviewState {
    pub fn line_count(&self) -> usize {
        match &self.text {
            Some(Ok(text)) => text.lines().count(),
            _ => 0,
        }
    }
}

/// Keys with a fetch outstanding. Nothing is issued twice for the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InFlight {
    pub local: bool,
    pub remote: HashSet<String>,
    pub vcs: HashSet<DirKey>,
    pub resources: HashSet<SessionKey>,
    pub tasks: HashSet<PathBuf>,
    pub pr_checks: Option<DirKey>,
}

impl InFlight {
    pub fn clear_sessions(&mut self) {
        self.local = false;
        self.remote.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_expires() {
        let mut notice = Notice::info("saved");
        let mut ticks = 0;
        while notice.tick() {
            ticks += 1;
        }
        assert_eq!(ticks, usize::from(NOTICE_TTL_TICKS) - 1);
        assert!(!notice.is_error);
    }

    #[test]
    fn test_search_applies_only_to_its_target() {
        let search = SearchState {
            target: SearchTarget::Tasks,
            query: "auth".to_string(),
            editing: false,
        };
        assert!(search.applies_to(SearchTarget::Tasks));
        assert!(!search.applies_to(SearchTarget::Sessions));
        assert!(!SearchState::default().is_active());
    }

    #[test]
    fn test_create_field_cycle() {
        let mut field = CreateField::Name;
        for _ in 0..4 {
            field = field.next();
        }
        assert_eq!(field, CreateField::Name);
    }
}
