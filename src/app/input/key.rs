use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::debug;

use crate::app::pipeline::step_match;
use crate::app::{
    ActiveDialog, App, BriefingState, ConfirmKillState, ContentSource, ContentState, CreateField,
    CreateSessionState, Effect, FocusMode, MutateAction, Notice, RenameState, SearchTarget,
    SessionDetailState, TaskDetailState, TaskRow,
};
use crate::types::Origin;

const PAGE: isize = 10;

fn is_plain(key: &KeyEvent) -> bool {
    !key.modifiers
        .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
}

impl App {
    pub(crate) fn handle_key(&mut self, key: KeyEvent) -> Vec<Effect> {
        if self.focus.is_modal() {
            return self.handle_dialog_key(key);
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return self.quit();
        }

        if self.search.editing {
            self.handle_search_key(key);
            return Vec::new();
        }

        if matches!(self.focus, FocusMode::Briefing(_)) {
            let (total, height) = (self.briefing_lines().len(), self.heights().overlay);
            let FocusMode::Briefing(state) = &mut self.focus else {
                return Vec::new();
            };
            match key.code {
                KeyCode::Esc | KeyCode::Char('b') => self.focus = FocusMode::List,
                KeyCode::Char('q') => return self.quit(),
                KeyCode::Down | KeyCode::Char('j') => state.viewport.scroll_by(1, total, height),
                KeyCode::Up | KeyCode::Char('k') => state.viewport.scroll_by(-1, total, height),
                KeyCode::PageDown => state.viewport.scroll_by(PAGE, total, height),
                KeyCode::PageUp => state.viewport.scroll_by(-PAGE, total, height),
                _ => {}
            }
            return Vec::new();
        }

        if !is_plain(&key) {
            return Vec::new();
        }

        match key.code {
            KeyCode::Char('q') => return self.quit(),
            KeyCode::Tab => {
                self.focus = match self.focus {
                    FocusMode::List => FocusMode::Tasks,
                    FocusMode::Tasks => FocusMode::Preview,
                    _ => FocusMode::List,
                };
                return Vec::new();
            }
            KeyCode::BackTab => {
                self.focus = match self.focus {
                    FocusMode::List => FocusMode::Preview,
                    FocusMode::Preview => FocusMode::Tasks,
                    _ => FocusMode::List,
                };
                return Vec::new();
            }
            KeyCode::Char('R') => return self.refresh_all(),
            KeyCode::Char('/') => {
                self.search.target = if self.focus == FocusMode::Tasks {
                    SearchTarget::Tasks
                } else {
                    SearchTarget::Sessions
                };
                self.search.query.clear();
                self.search.editing = true;
                self.refresh_search();
                return Vec::new();
            }
            KeyCode::Char('n') if self.search.is_active() => {
                self.step_search(true);
                return Vec::new();
            }
            KeyCode::Char('N') if self.search.is_active() => {
                self.step_search(false);
                return Vec::new();
            }
            KeyCode::Esc => {
                if self.search.is_active() {
                    self.search.query.clear();
                    self.refresh_search();
                } else {
                    self.notice = None;
                }
                return Vec::new();
            }
            KeyCode::Char('b') => {
                self.search.editing = false;
                self.focus = FocusMode::Briefing(BriefingState::default());
                return Vec::new();
            }
            KeyCode::Char('p') => {
                self.open_project_picker();
                return Vec::new();
            }
            KeyCode::Char('c') => {
                self.open_create_dialog();
                return Vec::new();
            }
            _ => {}
        }

        match self.focus {
            FocusMode::Tasks => self.handle_tasks_key(key),
            FocusMode::Preview => {
                self.handle_preview_key(key);
                Vec::new()
            }
            _ => self.handle_list_key(key),
        }
    }

    fn quit(&mut self) -> Vec<Effect> {
        self.should_quit = true;
        vec![Effect::Quit]
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.search.editing = false;
                self.search.query.clear();
            }
            KeyCode::Enter => self.search.editing = false,
            KeyCode::Backspace => {
                self.search.query.pop();
            }
            KeyCode::Char(ch) if is_plain(&key) => self.search.query.push(ch),
            _ => return,
        }
        self.refresh_search();
        if self.search.is_active() {
            self.jump_to_first_match();
        }
    }

    fn refresh_search(&mut self) {
        self.refresh_matches();
        self.refresh_task_matches();
    }

    /// Moves to the first match at or after the cursor, wrapping.
    fn jump_to_first_match(&mut self) {
        let (matches, cursor) = match self.search.target {
            SearchTarget::Sessions => (&self.matches, self.list.cursor),
            SearchTarget::Tasks => (&self.task_matches, self.task_list.cursor),
        };
        if matches.contains(&cursor) {
            return;
        }
        if let Some(position) = step_match(matches, cursor, true) {
            self.select_search_position(position);
        }
    }

    fn step_search(&mut self, forward: bool) {
        let (matches, cursor) = match self.search.target {
            SearchTarget::Sessions => (&self.matches, self.list.cursor),
            SearchTarget::Tasks => (&self.task_matches, self.task_list.cursor),
        };
        match step_match(matches, cursor, forward) {
            Some(position) => self.select_search_position(position),
            None => self.set_notice(Notice::info(format!("no match for {}", self.search.query))),
        }
    }

    fn select_search_position(&mut self, position: usize) {
        let heights = self.heights();
        match self.search.target {
            SearchTarget::Sessions => {
                self.list.select(position, self.displayed.len());
                self.list.sync_viewport(self.displayed.len(), heights.list);
            }
            SearchTarget::Tasks => {
                self.task_list.select(position, self.task_rows.len());
                self.task_list
                    .sync_viewport(self.task_rows.len(), heights.tasks);
            }
        }
    }

    fn move_list(&mut self, delta: isize) {
        let (len, height) = (self.displayed.len(), self.heights().list);
        self.list.move_by(delta, len);
        self.list.sync_viewport(len, height);
    }

    fn move_tasks(&mut self, delta: isize) {
        let (len, height) = (self.task_rows.len(), self.heights().tasks);
        self.task_list.move_by(delta, len);
        self.task_list.sync_viewport(len, height);
    }

    fn handle_list_key(&mut self, key: KeyEvent) -> Vec<Effect> {
        let len = self.displayed.len();
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => self.move_list(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_list(-1),
            KeyCode::PageDown => self.move_list(PAGE),
            KeyCode::PageUp => self.move_list(-PAGE),
            KeyCode::Home | KeyCode::Char('g') => self.move_list(-(len as isize)),
            KeyCode::End | KeyCode::Char('G') => self.move_list(len as isize),
            KeyCode::Char('f') => self.change_filter(|app| app.filter.origin = app.filter.origin.next()),
            KeyCode::Char('s') => self.change_filter(|app| app.filter.cycle_status()),
            KeyCode::Char('h') => {
                self.change_filter(|app| app.filter.hide_completed = !app.filter.hide_completed)
            }
            KeyCode::Char('o') => {
                self.change_filter(|app| app.sort = app.sort.next());
                self.set_notice(Notice::info(format!("sort: {}", self.sort.label())));
            }
            KeyCode::Enter => {
                if let Some(key) = self.selected_key() {
                    return vec![Effect::Attach(key)];
                }
            }
            KeyCode::Char('i') => return self.open_session_detail(),
            KeyCode::Char('v') => return self.open_scrollback(None),
            KeyCode::Char('r') => {
                if let Some(key) = self.selected_key() {
                    let input = key.name.clone();
                    self.open_dialog(ActiveDialog::Rename(RenameState {
                        key,
                        input,
                        error: None,
                        pending: false,
                    }));
                }
            }
            KeyCode::Char('x') => {
                if let Some(key) = self.selected_key() {
                    self.open_dialog(ActiveDialog::ConfirmKill(ConfirmKillState {
                        key,
                        error: None,
                        pending: false,
                    }));
                }
            }
            KeyCode::Char('d') => {
                if let Some(key) = self.selected_key() {
                    return vec![Effect::Mutate {
                        key,
                        action: MutateAction::Dismiss,
                    }];
                }
            }
            _ => {}
        }
        Vec::new()
    }

    /// Applies a filter or sort change and re-runs the pipeline, keeping the
    /// selected session when it is still displayed.
    fn change_filter(&mut self, change: impl FnOnce(&mut App)) {
        let anchors = self.selection_anchors();
        change(self);
        self.rederive(&anchors);
        debug!(
            origin = self.filter.origin.label(),
            status = ?self.filter.status,
            hide_completed = self.filter.hide_completed,
            sort = self.sort.label(),
            displayed = self.displayed.len(),
            "pipeline changed"
        );
    }

    fn handle_tasks_key(&mut self, key: KeyEvent) -> Vec<Effect> {
        let len = self.task_rows.len();
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => self.move_tasks(1),
            KeyCode::Up | KeyCode::Char('k') => self.move_tasks(-1),
            KeyCode::PageDown => self.move_tasks(PAGE),
            KeyCode::PageUp => self.move_tasks(-PAGE),
            KeyCode::Home | KeyCode::Char('g') => self.move_tasks(-(len as isize)),
            KeyCode::End | KeyCode::Char('G') => self.move_tasks(len as isize),
            KeyCode::Char('o') => {
                self.task_sort = self.task_sort.next();
                self.rebuild_task_rows();
                self.set_notice(Notice::info(format!("task sort: {}", self.task_sort.label())));
            }
            KeyCode::Enter | KeyCode::Char(' ') => match self.selected_task_row() {
                Some(TaskRow::Group { group }) => self.toggle_group(group),
                Some(TaskRow::Task { group, task }) => self.open_task_detail(group, task),
                None => {}
            },
            KeyCode::Char('O') => {
                if let Some(TaskRow::Task { group, task }) = self.selected_task_row()
                    && let Some(url) = self
                        .task_groups
                        .get(group)
                        .and_then(|group| group.tasks.get(task))
                        .and_then(|task| task.url.clone())
                {
                    return vec![Effect::OpenLink(url)];
                }
            }
            _ => {}
        }
        Vec::new()
    }

    fn handle_preview_key(&mut self, key: KeyEvent) {
        let (total, height) = (self.preview.line_count(), self.heights().preview);
        let viewport = &mut self.preview.viewport;
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => viewport.scroll_by(1, total, height),
            KeyCode::Up | KeyCode::Char('k') => viewport.scroll_by(-1, total, height),
            KeyCode::PageDown => viewport.scroll_by(PAGE, total, height),
            KeyCode::PageUp => viewport.scroll_by(-PAGE, total, height),
            KeyCode::Home | KeyCode::Char('g') => viewport.offset = 0,
            KeyCode::End | KeyCode::Char('G') => {
                viewport.scroll_to_end(total, height);
                self.preview.follow_tail = true;
                return;
            }
            _ => return,
        }
        self.preview.follow_tail =
            self.preview.viewport.offset == crate::app::viewport::max_scroll(total, height);
    }

    fn open_session_detail(&mut self) -> Vec<Effect> {
        let Some(session) = self.selected_session() else {
            return Vec::new();
        };
        let (key, dir) = (session.key(), session.vcs_key());
        self.open_dialog(ActiveDialog::SessionDetail(SessionDetailState {
            key,
            dir: dir.clone(),
            checks: None,
            viewport: Default::default(),
        }));
        self.in_flight.pr_checks = Some(dir.clone());
        vec![Effect::FetchPrChecks {
            dir,
            requested: true,
        }]
    }

    /// Opens the scrollback overlay for the selected session. `return_to`
    /// is the dialog to go back to on close.
    pub(crate) fn open_scrollback(&mut self, return_to: Option<ActiveDialog>) -> Vec<Effect> {
        let key = match &return_to {
            Some(ActiveDialog::SessionDetail(detail)) => Some(detail.key.clone()),
            _ => self.selected_key(),
        };
        let Some(key) = key else {
            return Vec::new();
        };
        self.open_dialog(ActiveDialog::Content(ContentState {
            title: format!("{key} scrollback"),
            source: ContentSource::Scrollback(key.clone()),
            body: None,
            viewport: Default::default(),
            return_to: return_to.map(Box::new),
        }));
        vec![Effect::LoadScrollback(key)]
    }

    fn open_task_detail(&mut self, group: usize, task: usize) {
        let Some(project) = self.focused_project() else {
            return;
        };
        let Some(group) = self.task_groups.get(group) else {
            return;
        };
        let Some(task) = group.tasks.get(task).cloned() else {
            return;
        };
        let group_title = group.title.clone();
        self.open_dialog(ActiveDialog::TaskDetail(TaskDetailState {
            project,
            group_title,
            task,
        }));
    }

    fn open_create_dialog(&mut self) {
        let directory = self
            .focused_project()
            .map(|project| project.display().to_string())
            .unwrap_or_default();
        let origin_index = match self.selected_session().map(|s| &s.origin) {
            Some(Origin::Remote(host)) => self
                .hosts()
                .iter()
                .position(|candidate| candidate == host)
                .map_or(0, |index| index + 1),
            _ => 0,
        };
        self.open_dialog(ActiveDialog::CreateSession(CreateSessionState {
            name: String::new(),
            directory,
            command: String::new(),
            origin_index,
            field: CreateField::Name,
            error: None,
            pending: false,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Message, SortMode};
    use crate::settings::Settings;
    use crate::types::{Session, SessionKey, SessionStatus};

    fn press(app: &mut App, code: KeyCode) -> Vec<Effect> {
        app.update(Message::Key(KeyEvent::from(code)))
    }

    fn app_with(names: &[(&str, SessionStatus)]) -> App {
        let mut app = App::new(Settings::default());
        let sessions = names
            .iter()
            .map(|(name, status)| {
                let mut session = Session::new(Origin::Local, *name, format!("/w/{name}"));
                session.status = *status;
                session
            })
            .collect();
        app.update(Message::LocalSessions {
            epoch: 0,
            result: Ok(sessions),
        });
        app
    }

    #[test]
    fn test_quit_keys() {
        let mut app = App::new(Settings::default());
        assert_eq!(press(&mut app, KeyCode::Char('q')), vec![Effect::Quit]);
        assert!(app.should_quit);

        let mut app = App::new(Settings::default());
        let effects = app.update(Message::Key(KeyEvent::new(
            KeyCode::Char('c'),
            KeyModifiers::CONTROL,
        )));
        assert_eq!(effects, vec![Effect::Quit]);
    }

    #[test]
    fn test_briefing_opens_at_top_and_closes() {
        let mut app = app_with(&[("alpha", SessionStatus::Waiting)]);
        press(&mut app, KeyCode::Char('b'));
        assert_eq!(app.focus, FocusMode::Briefing(BriefingState::default()));

        press(&mut app, KeyCode::Char('k'));
        assert_eq!(app.focus, FocusMode::Briefing(BriefingState::default()));

        press(&mut app, KeyCode::Esc);
        assert_eq!(app.focus, FocusMode::List);
    }

    #[test]
    fn test_search_typing_jumps_to_match_without_hiding_rows() {
        let mut app = app_with(&[
            ("alpha", SessionStatus::Working),
            ("beta", SessionStatus::Working),
            ("gamma", SessionStatus::Working),
        ]);
        press(&mut app, KeyCode::Char('/'));
        for ch in "gm".chars() {
            press(&mut app, KeyCode::Char(ch));
        }
        assert_eq!(app.displayed.len(), 3);
        assert_eq!(app.matches, vec![2]);
        assert_eq!(app.selected_key(), Some(SessionKey::local("gamma")));

        press(&mut app, KeyCode::Enter);
        assert!(!app.search.editing);
        press(&mut app, KeyCode::Char('n'));
        assert_eq!(app.selected_key(), Some(SessionKey::local("gamma")));

        press(&mut app, KeyCode::Esc);
        assert!(app.matches.is_empty());
    }

    #[test]
    fn test_sort_keeps_selected_session() {
        let mut app = app_with(&[
            ("zeta", SessionStatus::Waiting),
            ("alpha", SessionStatus::Working),
        ]);
        assert_eq!(app.selected_key(), Some(SessionKey::local("zeta")));
        press(&mut app, KeyCode::Char('o'));
        assert_eq!(app.sort, SortMode::Alphabetical);
        assert_eq!(app.selected_key(), Some(SessionKey::local("zeta")));
        assert_eq!(app.list.cursor, 1);
    }

    #[test]
    fn test_tab_cycles_panels_and_modal_blocks_it() {
        let mut app = app_with(&[("a", SessionStatus::Working)]);
        press(&mut app, KeyCode::Tab);
        assert_eq!(app.focus, FocusMode::Tasks);
        press(&mut app, KeyCode::Tab);
        assert_eq!(app.focus, FocusMode::Preview);
        press(&mut app, KeyCode::Tab);
        assert_eq!(app.focus, FocusMode::List);

        press(&mut app, KeyCode::Char('x'));
        assert!(matches!(app.focus.dialog(), Some(ActiveDialog::ConfirmKill(_))));
        press(&mut app, KeyCode::Tab);
        assert!(matches!(app.focus.dialog(), Some(ActiveDialog::ConfirmKill(_))));
    }

    #[test]
    fn test_enter_attaches_selected_session() {
        let mut app = app_with(&[("a", SessionStatus::Working)]);
        let effects = press(&mut app, KeyCode::Enter);
        assert_eq!(effects, vec![Effect::Attach(SessionKey::local("a"))]);
    }

    #[test]
    fn test_status_filter_cycles() {
        let mut app = app_with(&[
            ("a", SessionStatus::Working),
            ("b", SessionStatus::Waiting),
        ]);
        press(&mut app, KeyCode::Char('s'));
        assert_eq!(app.filter.status, Some(SessionStatus::ALL[0]));
        assert!(app.displayed.len() <= 1);
    }
}
