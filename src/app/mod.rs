pub mod briefing;
pub mod dialogs;
pub mod input;
pub mod messages;
pub mod pipeline;
pub mod polling;
pub mod reconcile;
pub mod runtime;
pub mod state;
pub mod tasks;
pub mod update;
pub mod viewport;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cache::Cache;
use crate::provider::ProviderOutcome;
use crate::settings::Settings;
use crate::types::{DirKey, ResourceUsage, Session, SessionKey, TaskGroup, VcsInfo};

pub use self::messages::{
    CreateRequest, Effect, FetchResult, Message, MutateAction, Poller, ProjectTasks,
};
pub use self::pipeline::{FilterState, OriginFilter, SortMode};
pub use self::reconcile::StatusBaseline;
pub use self::state::{
    ActiveDialog, BriefingState, ConfirmKillState, ContentSource, ContentState, CreateField,
    CreateSessionState, FocusMode, InFlight, Notice, PreviewState, ProjectPickerState,
    RenameState, SearchState, SearchTarget, SessionDetailState, TaskDetailState,
};
pub use self::tasks::{TaskRow, TaskSortMode};
pub use self::viewport::{ListCursor, Viewport, Window};

const DEFAULT_VIEWPORT: (u16, u16) = (120, 40);
pub const PREVIEW_LINES: usize = 200;
pub const SCROLLBACK_LINES: usize = 5_000;

/// Inner heights (borders excluded) of every scrollable area. The renderer
/// lays panels out from these same numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelHeights {
    pub list: usize,
    pub tasks: usize,
    pub preview: usize,
    pub overlay: usize,
}

impl PanelHeights {
    pub fn for_terminal(height: u16) -> Self {
        let body = usize::from(height).saturating_sub(1);
        let list_outer = body * 3 / 5;
        let tasks_outer = body - list_outer;
        Self {
            list: list_outer.saturating_sub(2),
            tasks: tasks_outer.saturating_sub(2),
            preview: body.saturating_sub(2),
            overlay: usize::from(height).saturating_sub(4),
        }
    }

    pub fn list_outer(height: u16) -> u16 {
        height.saturating_sub(1) * 3 / 5
    }
}

pub struct App {
    pub settings: Settings,
    pub should_quit: bool,
    pub viewport: (u16, u16),
    pub sessions: Vec<Session>,
    pub vcs_cache: Cache<DirKey, VcsInfo>,
    pub resource_cache: Cache<SessionKey, ResourceUsage>,
    pub task_cache: Cache<PathBuf, ProviderOutcome>,
    pub baseline: StatusBaseline,
    pub in_flight: InFlight,
    /// Bumped when an attach hands its baseline back; older list results are dropped.
    pub poll_epoch: u64,
    pub filter: FilterState,
    pub sort: SortMode,
    pub task_sort: TaskSortMode,
    pub search: SearchState,
    pub list: ListCursor,
    pub task_list: ListCursor,
    pub expanded_groups: HashSet<String>,
    pub displayed: Vec<usize>,
    pub matches: Vec<usize>,
    pub task_groups: Vec<TaskGroup>,
    pub task_rows: Vec<TaskRow>,
    pub task_matches: Vec<usize>,
    /// Project the task panel was last built for.
    pub task_project: Option<PathBuf>,
    pub restore_selection: Option<SessionKey>,
    pub focus: FocusMode,
    pub preview: PreviewState,
    pub notice: Option<Notice>,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        Self {
            vcs_cache: Cache::new(settings.vcs_stale_after()),
            resource_cache: Cache::new(settings.resource_stale_after()),
            task_cache: Cache::new(settings.task_stale_after()),
            settings,
            should_quit: false,
            viewport: DEFAULT_VIEWPORT,
            sessions: Vec::new(),
            baseline: StatusBaseline::default(),
            in_flight: InFlight::default(),
            poll_epoch: 0,
            filter: FilterState::default(),
            sort: SortMode::default(),
            task_sort: TaskSortMode::default(),
            search: SearchState::default(),
            list: ListCursor::default(),
            task_list: ListCursor::default(),
            expanded_groups: HashSet::new(),
            displayed: Vec::new(),
            matches: Vec::new(),
            task_groups: Vec::new(),
            task_rows: Vec::new(),
            task_matches: Vec::new(),
            task_project: None,
            restore_selection: None,
            focus: FocusMode::List,
            preview: PreviewState {
                follow_tail: true,
                ..PreviewState::default()
            },
            notice: None,
        }
    }

    pub fn with_scope(mut self, scope: Option<PathBuf>) -> Self {
        self.filter.scope = scope;
        self
    }

    pub fn hosts(&self) -> Vec<String> {
        self.settings
            .remote_hosts
            .iter()
            .map(|host| host.name.clone())
            .collect()
    }

    pub fn heights(&self) -> PanelHeights {
        PanelHeights::for_terminal(self.viewport.1)
    }

    pub fn selected_session(&self) -> Option<&Session> {
        let index = *self.displayed.get(self.list.cursor)?;
        self.sessions.get(index)
    }

    pub fn selected_key(&self) -> Option<SessionKey> {
        self.selected_session().map(Session::key)
    }

    pub fn session(&self, key: &SessionKey) -> Option<&Session> {
        self.sessions.iter().find(|session| session.is(key))
    }

    pub fn displayed_sessions(&self) -> impl Iterator<Item = &Session> {
        self.displayed
            .iter()
            .filter_map(|index| self.sessions.get(*index))
    }

    /// The settings project containing `dir`, or `dir` itself.
    pub fn project_for_dir(&self, dir: &Path) -> PathBuf {
        self.settings
            .projects
            .iter()
            .map(|project| project.path.as_path())
            .filter(|path| dir.starts_with(path))
            .max_by_key(|path| path.components().count())
            .unwrap_or(dir)
            .to_path_buf()
    }

    /// Project whose tasks the task panel shows: the scope filter if set,
    /// otherwise the selected local session's project.
    pub fn focused_project(&self) -> Option<PathBuf> {
        if let Some(scope) = &self.filter.scope {
            return Some(scope.clone());
        }
        let session = self.selected_session()?;
        if !session.origin.is_local() || session.working_dir.as_os_str().is_empty() {
            return None;
        }
        Some(self.project_for_dir(&session.working_dir))
    }

    /// Configured projects plus every local session's project, deduplicated.
    pub fn known_projects(&self) -> Vec<PathBuf> {
        let mut projects: Vec<PathBuf> = self
            .settings
            .projects
            .iter()
            .map(|project| project.path.clone())
            .collect();
        for session in self.sessions.iter().filter(|s| s.origin.is_local()) {
            if session.working_dir.as_os_str().is_empty() {
                continue;
            }
            let project = self.project_for_dir(&session.working_dir);
            if !projects.contains(&project) {
                projects.push(project);
            }
        }
        projects
    }

    pub fn set_notice(&mut self, notice: Notice) {
        self.notice = Some(notice);
    }

    /// Identities to try, in order, when restoring the cursor after the
    /// displayed list changes: a pending restore intent, then the current row.
    /// Must be taken before the session list is mutated.
    pub(crate) fn selection_anchors(&self) -> Vec<SessionKey> {
        self.restore_selection
            .iter()
            .cloned()
            .chain(self.selected_key())
            .collect()
    }

    /// Recomputes the displayed list and everything derived from it. The
    /// cursor lands on the first anchor still displayed, otherwise it is
    /// clamped. Any restore intent is consumed either way.
    pub(crate) fn rederive(&mut self, anchors: &[SessionKey]) {
        self.displayed = pipeline::derive_displayed(&self.sessions, &self.filter, self.sort);

        let restored = anchors.iter().find_map(|key| {
            self.displayed
                .iter()
                .position(|index| self.sessions[*index].is(key))
        });
        match restored {
            Some(position) => self.list.cursor = position,
            None => {
                if !anchors.is_empty() {
                    debug!("selection anchor no longer displayed; clamping cursor");
                }
                self.list.clamp(self.displayed.len());
            }
        }
        self.restore_selection = None;

        let height = self.heights().list;
        self.list.sync_viewport(self.displayed.len(), height);
        self.refresh_matches();
        self.rebuild_task_rows();
    }

    pub(crate) fn refresh_matches(&mut self) {
        self.matches = if self.search.applies_to(SearchTarget::Sessions) {
            pipeline::session_matches(&self.sessions, &self.displayed, &self.search.query)
        } else {
            Vec::new()
        };
    }

    pub(crate) fn open_dialog(&mut self, dialog: ActiveDialog) {
        self.search.editing = false;
        self.focus = FocusMode::Dialog(dialog);
    }

    pub(crate) fn close_dialog(&mut self) {
        self.focus = FocusMode::List;
    }
}
