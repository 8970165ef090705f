//! Key handling for modal dialogs. A dialog captures every key until it
//! closes or hands focus back to the dialog that opened it.

use std::path::PathBuf;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::debug;

use crate::matching::rank_candidates;
use crate::tmux::sanitize_session_name;
use crate::types::Origin;

use super::messages::{CreateRequest, Effect, MutateAction};
use super::state::{
    ActiveDialog, ConfirmKillState, ContentSource, ContentState, CreateField, CreateSessionState,
    FocusMode, Notice, ProjectPickerState, RenameState, SessionDetailState, TaskDetailState,
};
use super::viewport::ListCursor;
use super::App;

const PAGE: isize = 10;

/// What the app should do after a dialog consumed a key.
#[derive(Debug, Clone, PartialEq)]
pub enum DialogOutcome {
    Stay,
    Close,
    /// Replace the active dialog, e.g. closing an overlay back into its opener.
    Switch(ActiveDialog),
    Effects(Vec<Effect>),
    /// Project picker result; `None` clears the scope filter.
    ApplyScope(Option<PathBuf>),
}

/// Values a dialog needs from outside its own state.
pub struct DialogContext {
    pub hosts: Vec<String>,
    pub overlay_height: usize,
}

pub fn handle_dialog_key(
    dialog: &mut ActiveDialog,
    key: KeyEvent,
    ctx: &DialogContext,
) -> DialogOutcome {
    if let Some(outcome) = acknowledge_error(dialog, key) {
        return outcome;
    }
    match dialog {
        ActiveDialog::CreateSession(state) => handle_create_key(state, key, ctx),
        ActiveDialog::Rename(state) => handle_rename_key(state, key),
        ActiveDialog::ConfirmKill(state) => handle_confirm_kill_key(state, key),
        ActiveDialog::SessionDetail(state) => {
            let opener = ActiveDialog::SessionDetail(state.clone());
            handle_session_detail_key(state, key, ctx, opener)
        }
        ActiveDialog::TaskDetail(state) => {
            let opener = ActiveDialog::TaskDetail(state.clone());
            handle_task_detail_key(state, key, opener)
        }
        ActiveDialog::Content(state) => handle_content_key(state, key, ctx),
        ActiveDialog::ProjectPicker(state) => handle_picker_key(state, key, ctx),
    }
}

/// Pending dialogs ignore input. A shown error swallows keys until Esc
/// clears it; the next Esc closes the dialog.
fn acknowledge_error(dialog: &mut ActiveDialog, key: KeyEvent) -> Option<DialogOutcome> {
    let (error, pending) = match dialog {
        ActiveDialog::CreateSession(state) => (&mut state.error, state.pending),
        ActiveDialog::Rename(state) => (&mut state.error, state.pending),
        ActiveDialog::ConfirmKill(state) => (&mut state.error, state.pending),
        _ => return None,
    };
    if pending {
        return Some(DialogOutcome::Stay);
    }
    if error.is_some() {
        if key.code == KeyCode::Esc {
            *error = None;
        }
        return Some(DialogOutcome::Stay);
    }
    None
}

fn edit_text(text: &mut String, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Backspace => {
            text.pop();
            true
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            text.clear();
            true
        }
        KeyCode::Char(ch) if !key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) => {
            text.push(ch);
            true
        }
        _ => false,
    }
}

fn handle_create_key(
    state: &mut CreateSessionState,
    key: KeyEvent,
    ctx: &DialogContext,
) -> DialogOutcome {
    match key.code {
        KeyCode::Esc => return DialogOutcome::Close,
        KeyCode::Tab | KeyCode::Down => state.field = state.field.next(),
        KeyCode::BackTab | KeyCode::Up => {
            for _ in 0..3 {
                state.field = state.field.next();
            }
        }
        KeyCode::Enter => return submit_create(state, ctx),
        _ if state.field == CreateField::Origin => {
            let choices = ctx.hosts.len() + 1;
            match key.code {
                KeyCode::Left | KeyCode::Char('h') => {
                    state.origin_index = (state.origin_index + choices - 1) % choices;
                }
                KeyCode::Right | KeyCode::Char('l') | KeyCode::Char(' ') => {
                    state.origin_index = (state.origin_index + 1) % choices;
                }
                _ => {}
            }
        }
        _ => {
            let text = match state.field {
                CreateField::Name => &mut state.name,
                CreateField::Directory => &mut state.directory,
                CreateField::Command => &mut state.command,
                CreateField::Origin => return DialogOutcome::Stay,
            };
            edit_text(text, key);
        }
    }
    DialogOutcome::Stay
}

fn submit_create(state: &mut CreateSessionState, ctx: &DialogContext) -> DialogOutcome {
    let name = sanitize_session_name(&state.name);
    if name.is_empty() {
        state.error = Some("Session name cannot be empty".to_string());
        return DialogOutcome::Stay;
    }
    let directory = state.directory.trim();
    if directory.is_empty() {
        state.error = Some("Working directory cannot be empty".to_string());
        return DialogOutcome::Stay;
    }
    let origin = match state.origin_index {
        0 => Origin::Local,
        index => match ctx.hosts.get(index - 1) {
            Some(host) => Origin::Remote(host.clone()),
            None => {
                state.error = Some("Unknown host".to_string());
                return DialogOutcome::Stay;
            }
        },
    };
    let command = state.command.trim();
    state.pending = true;
    DialogOutcome::Effects(vec![Effect::Create(CreateRequest {
        origin,
        name,
        working_dir: PathBuf::from(directory),
        command: (!command.is_empty()).then(|| command.to_string()),
    })])
}

fn handle_rename_key(state: &mut RenameState, key: KeyEvent) -> DialogOutcome {
    match key.code {
        KeyCode::Esc => DialogOutcome::Close,
        KeyCode::Enter => {
            let name = sanitize_session_name(&state.input);
            if name.is_empty() {
                state.error = Some("Session name cannot be empty".to_string());
                return DialogOutcome::Stay;
            }
            if name == state.key.name {
                return DialogOutcome::Close;
            }
            state.pending = true;
            DialogOutcome::Effects(vec![Effect::Mutate {
                key: state.key.clone(),
                action: MutateAction::Rename(name),
            }])
        }
        _ => {
            edit_text(&mut state.input, key);
            DialogOutcome::Stay
        }
    }
}

fn handle_confirm_kill_key(state: &mut ConfirmKillState, key: KeyEvent) -> DialogOutcome {
    match key.code {
        KeyCode::Esc | KeyCode::Char('n') => DialogOutcome::Close,
        KeyCode::Enter | KeyCode::Char('y') => {
            state.pending = true;
            DialogOutcome::Effects(vec![Effect::Mutate {
                key: state.key.clone(),
                action: MutateAction::Kill,
            }])
        }
        _ => DialogOutcome::Stay,
    }
}

fn handle_session_detail_key(
    state: &mut SessionDetailState,
    key: KeyEvent,
    ctx: &DialogContext,
    opener: ActiveDialog,
) -> DialogOutcome {
    let total = match &state.checks {
        Some(Ok(checks)) => checks.len(),
        _ => 0,
    };
    let height = ctx.overlay_height;
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('i') => {
            return DialogOutcome::Effects(vec![Effect::StopPrChecksTicker]);
        }
        KeyCode::Down | KeyCode::Char('j') => state.viewport.scroll_by(1, total, height),
        KeyCode::Up | KeyCode::Char('k') => state.viewport.scroll_by(-1, total, height),
        KeyCode::Char('r') => {
            return DialogOutcome::Effects(vec![Effect::FetchPrChecks {
                dir: state.dir.clone(),
                requested: true,
            }]);
        }
        KeyCode::Char('v') => {
            return DialogOutcome::Switch(ActiveDialog::Content(ContentState {
                title: format!("{} scrollback", state.key),
                source: ContentSource::Scrollback(state.key.clone()),
                body: None,
                viewport: Default::default(),
                return_to: Some(Box::new(opener)),
            }));
        }
        _ => {}
    }
    DialogOutcome::Stay
}

fn handle_task_detail_key(
    state: &TaskDetailState,
    key: KeyEvent,
    opener: ActiveDialog,
) -> DialogOutcome {
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => DialogOutcome::Close,
        KeyCode::Char('o') => match &state.task.url {
            Some(url) => DialogOutcome::Effects(vec![Effect::OpenLink(url.clone())]),
            None => DialogOutcome::Stay,
        },
        KeyCode::Char('v') => DialogOutcome::Switch(ActiveDialog::Content(ContentState {
            title: state.task.title.clone(),
            source: ContentSource::Text,
            body: Some(Ok(task_text(state))),
            viewport: Default::default(),
            return_to: Some(Box::new(opener)),
        })),
        _ => DialogOutcome::Stay,
    }
}

pub fn task_text(state: &TaskDetailState) -> String {
    let mut lines = vec![
        format!("Project: {}", state.project.display()),
        format!("Group:   {}", state.group_title),
        format!("Task:    {}", state.task.title),
        format!("Id:      {}", state.task.id),
        format!("Status:  {}", state.task.status.as_str()),
    ];
    if let Some(url) = &state.task.url {
        lines.push(format!("Link:    {url}"));
    }
    lines.join("\n")
}

fn handle_content_key(state: &mut ContentState, key: KeyEvent, ctx: &DialogContext) -> DialogOutcome {
    let (total, height) = (state.line_count(), ctx.overlay_height);
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => {
            return match state.return_to.take() {
                Some(opener) => DialogOutcome::Switch(*opener),
                None => DialogOutcome::Close,
            };
        }
        KeyCode::Down | KeyCode::Char('j') => state.viewport.scroll_by(1, total, height),
        KeyCode::Up | KeyCode::Char('k') => state.viewport.scroll_by(-1, total, height),
        KeyCode::PageDown | KeyCode::Char(' ') => state.viewport.scroll_by(PAGE, total, height),
        KeyCode::PageUp => state.viewport.scroll_by(-PAGE, total, height),
        KeyCode::Home | KeyCode::Char('g') => state.viewport.offset = 0,
        KeyCode::End | KeyCode::Char('G') => state.viewport.scroll_to_end(total, height),
        _ => {}
    }
    DialogOutcome::Stay
}

pub fn new_picker(candidates: Vec<PathBuf>) -> ProjectPickerState {
    let mut state = ProjectPickerState {
        query: String::new(),
        candidates,
        ranked: Vec::new(),
        list: ListCursor::default(),
    };
    rerank(&mut state);
    state
}

fn rerank(state: &mut ProjectPickerState) {
    let labels: Vec<String> = state
        .candidates
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    state.ranked = rank_candidates(&state.query, &labels);
    state.list.select(0, state.ranked.len());
}

fn handle_picker_key(
    state: &mut ProjectPickerState,
    key: KeyEvent,
    ctx: &DialogContext,
) -> DialogOutcome {
    let (len, height) = (state.ranked.len(), ctx.overlay_height.saturating_sub(2));
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Esc => return DialogOutcome::Close,
        KeyCode::Enter => {
            return match state.selected() {
                Some(project) => DialogOutcome::ApplyScope(Some(project.clone())),
                None => DialogOutcome::Stay,
            };
        }
        KeyCode::Delete => return DialogOutcome::ApplyScope(None),
        KeyCode::Down => state.list.move_by(1, len),
        KeyCode::Char('n') if ctrl => state.list.move_by(1, len),
        KeyCode::Up => state.list.move_by(-1, len),
        KeyCode::Char('p') if ctrl => state.list.move_by(-1, len),
        _ => {
            if edit_text(&mut state.query, key) {
                rerank(state);
            }
        }
    }
    state.list.sync_viewport(state.ranked.len(), height);
    DialogOutcome::Stay
}

impl App {
    pub(crate) fn handle_dialog_key(&mut self, key: KeyEvent) -> Vec<Effect> {
        let ctx = DialogContext {
            hosts: self.hosts(),
            overlay_height: self.heights().overlay,
        };
        let FocusMode::Dialog(dialog) = &mut self.focus else {
            return Vec::new();
        };
        match handle_dialog_key(dialog, key, &ctx) {
            DialogOutcome::Stay => Vec::new(),
            DialogOutcome::Close => {
                self.close_dialog();
                Vec::new()
            }
            DialogOutcome::Switch(next) => {
                let effects = match &next {
                    ActiveDialog::Content(ContentState {
                        source: ContentSource::Scrollback(session),
                        body: None,
                        ..
                    }) => vec![Effect::LoadScrollback(session.clone())],
                    ActiveDialog::SessionDetail(detail) => {
                        self.in_flight.pr_checks = Some(detail.dir.clone());
                        vec![Effect::FetchPrChecks {
                            dir: detail.dir.clone(),
                            requested: false,
                        }]
                    }
                    _ => Vec::new(),
                };
                self.focus = FocusMode::Dialog(next);
                effects
            }
            DialogOutcome::Effects(effects) => {
                if effects.contains(&Effect::StopPrChecksTicker) {
                    self.in_flight.pr_checks = None;
                    self.close_dialog();
                }
                for effect in &effects {
                    if let Effect::FetchPrChecks { dir, .. } = effect {
                        self.in_flight.pr_checks = Some(dir.clone());
                    }
                }
                effects
            }
            DialogOutcome::ApplyScope(scope) => {
                self.close_dialog();
                let label = scope
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "all projects".to_string());
                debug!(scope = %label, "scope changed");
                let anchors = self.selection_anchors();
                self.filter.scope = scope;
                self.rederive(&anchors);
                self.set_notice(Notice::info(format!("scope: {label}")));
                Vec::new()
            }
        }
    }

    pub(crate) fn open_project_picker(&mut self) {
        let picker = new_picker(self.known_projects());
        self.open_dialog(ActiveDialog::ProjectPicker(picker));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Message, SessionKey};
    use crate::settings::{RemoteHostConfig, Settings};
    use crate::types::{Session, Task, TaskStatus};

    fn ctx() -> DialogContext {
        DialogContext {
            hosts: vec!["build".to_string()],
            overlay_height: 20,
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::from(code)
    }

    fn type_text(dialog: &mut ActiveDialog, text: &str) {
        for ch in text.chars() {
            handle_dialog_key(dialog, key(KeyCode::Char(ch)), &ctx());
        }
    }

    fn create_dialog() -> ActiveDialog {
        ActiveDialog::CreateSession(CreateSessionState {
            name: String::new(),
            directory: "/w/api".to_string(),
            command: String::new(),
            origin_index: 0,
            field: CreateField::Name,
            error: None,
            pending: false,
        })
    }

    #[test]
    fn test_create_submits_remote_request() {
        let mut dialog = create_dialog();
        type_text(&mut dialog, "fix login");
        handle_dialog_key(&mut dialog, key(KeyCode::Tab), &ctx());
        handle_dialog_key(&mut dialog, key(KeyCode::Tab), &ctx());
        type_text(&mut dialog, "claude");
        handle_dialog_key(&mut dialog, key(KeyCode::Tab), &ctx());
        handle_dialog_key(&mut dialog, key(KeyCode::Right), &ctx());

        let outcome = handle_dialog_key(&mut dialog, key(KeyCode::Enter), &ctx());
        assert_eq!(
            outcome,
            DialogOutcome::Effects(vec![Effect::Create(CreateRequest {
                origin: Origin::Remote("build".to_string()),
                name: "fix-login".to_string(),
                working_dir: PathBuf::from("/w/api"),
                command: Some("claude".to_string()),
            })])
        );

        // Pending dialogs ignore keys, including Esc.
        let outcome = handle_dialog_key(&mut dialog, key(KeyCode::Esc), &ctx());
        assert_eq!(outcome, DialogOutcome::Stay);
    }

    #[test]
    fn test_error_needs_acknowledgement_before_close() {
        let mut dialog = create_dialog();
        let outcome = handle_dialog_key(&mut dialog, key(KeyCode::Enter), &ctx());
        assert_eq!(outcome, DialogOutcome::Stay);
        let ActiveDialog::CreateSession(state) = &dialog else {
            panic!("expected create dialog");
        };
        assert!(state.error.is_some());

        assert_eq!(
            handle_dialog_key(&mut dialog, key(KeyCode::Char('x')), &ctx()),
            DialogOutcome::Stay
        );
        assert_eq!(
            handle_dialog_key(&mut dialog, key(KeyCode::Esc), &ctx()),
            DialogOutcome::Stay
        );
        assert_eq!(
            handle_dialog_key(&mut dialog, key(KeyCode::Esc), &ctx()),
            DialogOutcome::Close
        );
    }

    #[test]
    fn test_rename_to_same_name_just_closes() {
        let mut dialog = ActiveDialog::Rename(RenameState {
            key: SessionKey::local("api"),
            input: "api".to_string(),
            error: None,
            pending: false,
        });
        assert_eq!(
            handle_dialog_key(&mut dialog, key(KeyCode::Enter), &ctx()),
            DialogOutcome::Close
        );
    }

    #[test]
    fn test_content_overlay_returns_to_opener() {
        let detail = ActiveDialog::TaskDetail(TaskDetailState {
            project: PathBuf::from("/w/api"),
            group_title: "Auth".to_string(),
            task: Task {
                id: "t1".to_string(),
                title: "Login".to_string(),
                status: TaskStatus::Todo,
                url: Some("https://example.com/1".to_string()),
            },
        });
        let mut dialog = detail.clone();
        let DialogOutcome::Switch(mut overlay) =
            handle_dialog_key(&mut dialog, key(KeyCode::Char('v')), &ctx())
        else {
            panic!("expected overlay");
        };
        assert_eq!(
            handle_dialog_key(&mut overlay, key(KeyCode::Esc), &ctx()),
            DialogOutcome::Switch(detail)
        );
    }

    #[test]
    fn test_picker_ranks_and_applies_scope() {
        let mut dialog = ActiveDialog::ProjectPicker(new_picker(vec![
            PathBuf::from("/w/web"),
            PathBuf::from("/w/api"),
        ]));
        type_text(&mut dialog, "api");
        assert_eq!(
            handle_dialog_key(&mut dialog, key(KeyCode::Enter), &ctx()),
            DialogOutcome::ApplyScope(Some(PathBuf::from("/w/api")))
        );
        assert_eq!(
            handle_dialog_key(&mut dialog, key(KeyCode::Delete), &ctx()),
            DialogOutcome::ApplyScope(None)
        );
    }

    #[test]
    fn test_kill_failure_is_shown_in_dialog() {
        let mut settings = Settings::default();
        settings.remote_hosts.push(RemoteHostConfig {
            name: "build".to_string(),
            ssh_target: None,
            max_connections: 2,
        });
        let mut app = App::new(settings);
        app.update(Message::LocalSessions {
            epoch: 0,
            result: Ok(vec![Session::new(Origin::Local, "api", "/w/api")]),
        });
        app.update(Message::Key(key(KeyCode::Char('x'))));
        let effects = app.update(Message::Key(key(KeyCode::Char('y'))));
        assert_eq!(
            effects.first(),
            Some(&Effect::Mutate {
                key: SessionKey::local("api"),
                action: MutateAction::Kill,
            })
        );

        app.update(Message::MutationFinished {
            key: SessionKey::local("api"),
            action: MutateAction::Kill,
            result: Err("no such session".to_string()),
        });
        let Some(ActiveDialog::ConfirmKill(state)) = app.focus.dialog() else {
            panic!("dialog should stay open");
        };
        assert_eq!(state.error.as_deref(), Some("no such session"));
        assert!(!state.pending);
    }

    #[test]
    fn test_picker_scope_filters_sessions() {
        let mut app = App::new(Settings::default());
        app.update(Message::LocalSessions {
            epoch: 0,
            result: Ok(vec![
                Session::new(Origin::Local, "api", "/w/api"),
                Session::new(Origin::Local, "web", "/w/web"),
            ]),
        });
        app.update(Message::Key(key(KeyCode::Char('p'))));
        for ch in "web".chars() {
            app.update(Message::Key(key(KeyCode::Char(ch))));
        }
        app.update(Message::Key(key(KeyCode::Enter)));
        assert_eq!(app.focus, FocusMode::List);
        assert_eq!(app.filter.scope, Some(PathBuf::from("/w/web")));
        assert_eq!(app.displayed.len(), 1);
        assert_eq!(app.selected_key(), Some(SessionKey::local("web")));
    }
}
