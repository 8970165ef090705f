use std::time::SystemTime;

use tracing::{debug, warn};

use super::*;
use crate::types::{DirKey, Origin, PrCheck};

impl App {
    /// The single state transition. Everything the app wants done outside
    /// itself comes back as effects.
    pub fn update(&mut self, message: Message) -> Vec<Effect> {
        let mut effects = match message {
            Message::Key(key) => self.handle_key(key),
            Message::Resize(width, height) => {
                self.viewport = (width, height);
                self.resync_viewports();
                Vec::new()
            }
            Message::Tick(poller) => self.on_tick(poller),
            Message::LocalSessions { epoch, result } => self.on_local_sessions(epoch, result),
            Message::RemoteSessions {
                host,
                epoch,
                result,
            } => self.on_remote_sessions(host, epoch, result),
            Message::VcsBatch(batch) => {
                self.on_vcs_batch(batch);
                Vec::new()
            }
            Message::ResourceBatch(batch) => {
                self.on_resource_batch(batch);
                Vec::new()
            }
            Message::TaskBatch(batch) => {
                self.on_task_batch(batch);
                Vec::new()
            }
            Message::PrChecks {
                dir,
                requested,
                result,
            } => self.on_pr_checks(dir, requested, result),
            Message::PreviewCaptured { key, result } => {
                self.on_preview(key, result);
                Vec::new()
            }
            Message::ScrollbackLoaded { key, result } => {
                self.on_scrollback(key, result);
                Vec::new()
            }
            Message::MutationFinished {
                key,
                action,
                result,
            } => self.on_mutation_finished(key, action, result),
            Message::SessionCreated { key, result } => self.on_session_created(key, result),
            Message::AttachFinished {
                key,
                baseline,
                result,
            } => self.on_attach_finished(key, baseline, result),
        };
        self.settle(&mut effects);
        effects
    }

    /// Keeps the preview and the task panel pointed at the current selection.
    fn settle(&mut self, effects: &mut Vec<Effect>) {
        let selected = self.selected_key();
        if selected != self.preview.target {
            self.preview = PreviewState {
                target: selected.clone(),
                follow_tail: true,
                ..PreviewState::default()
            };
            if let Some(key) = selected {
                effects.push(Effect::CapturePreview(key));
            }
        }

        let project = self.focused_project();
        if project != self.task_project {
            self.task_project = project;
            self.task_list = ListCursor::default();
            self.rebuild_task_rows();
        }
        if let Some(effect) = self.task_cold_start() {
            effects.push(effect);
        }
    }

    pub(crate) fn resync_viewports(&mut self) {
        let heights = self.heights();
        self.list.sync_viewport(self.displayed.len(), heights.list);
        self.task_list
            .sync_viewport(self.task_rows.len(), heights.tasks);
        self.preview
            .viewport
            .clamp(self.preview.line_count(), heights.preview);
    }

    fn on_tick(&mut self, poller: Poller) -> Vec<Effect> {
        let now = SystemTime::now();
        match poller {
            Poller::Local => {
                let mut effects = Vec::new();
                if !self.in_flight.local {
                    self.in_flight.local = true;
                    effects.push(Effect::RefreshLocal {
                        epoch: self.poll_epoch,
                    });
                }
                if let Some(key) = self.preview.target.clone() {
                    effects.push(Effect::CapturePreview(key));
                }
                effects
            }
            Poller::Remote => self.refresh_remotes(),
            Poller::Vcs => self.vcs_refresh_for(None, now).into_iter().collect(),
            Poller::Resources => {
                let candidates: Vec<SessionKey> = self
                    .sessions
                    .iter()
                    .filter(|session| session.origin.is_local())
                    .map(Session::key)
                    .collect();
                let keys: Vec<SessionKey> = self
                    .resource_cache
                    .keys_needing_refresh(candidates.iter(), now)
                    .into_iter()
                    .filter(|key| !self.in_flight.resources.contains(key))
                    .collect();
                if keys.is_empty() {
                    return Vec::new();
                }
                self.in_flight.resources.extend(keys.iter().cloned());
                vec![Effect::FetchResources(keys)]
            }
            Poller::Tasks => {
                let projects: Vec<PathBuf> = self
                    .task_cache
                    .keys_needing_refresh(self.known_projects().iter(), now)
                    .into_iter()
                    .filter(|project| !self.in_flight.tasks.contains(project))
                    .collect();
                if projects.is_empty() {
                    return Vec::new();
                }
                debug!(count = projects.len(), "task providers due");
                self.in_flight.tasks.extend(projects.iter().cloned());
                vec![Effect::RunTaskProviders(projects)]
            }
            Poller::PrChecks => {
                let Some(ActiveDialog::SessionDetail(detail)) = self.focus.dialog() else {
                    return vec![Effect::StopPrChecksTicker];
                };
                if self.in_flight.pr_checks.is_some() {
                    return Vec::new();
                }
                let dir = detail.dir.clone();
                self.in_flight.pr_checks = Some(dir.clone());
                vec![Effect::FetchPrChecks {
                    dir,
                    requested: false,
                }]
            }
            Poller::Housekeeping => {
                if let Some(notice) = self.notice.as_mut()
                    && !notice.tick()
                {
                    self.notice = None;
                }
                Vec::new()
            }
        }
    }

    fn on_pr_checks(
        &mut self,
        dir: DirKey,
        requested: bool,
        result: FetchResult<Vec<PrCheck>>,
    ) -> Vec<Effect> {
        if self.in_flight.pr_checks.as_ref() == Some(&dir) {
            self.in_flight.pr_checks = None;
        }
        let mut notice = None;
        let effect = match self.focus.dialog_mut() {
            Some(ActiveDialog::SessionDetail(detail)) if detail.dir == dir => {
                match result {
                    Ok(checks) => detail.checks = Some(Ok(checks)),
                    Err(error) if requested || detail.checks.is_none() => {
                        if requested {
                            notice = Some(Notice::error(format!("PR checks: {error}")));
                        }
                        detail.checks = Some(Err(error));
                    }
                    Err(error) => warn!(error = %error, "background PR check refresh failed"),
                }
                if detail.has_pending_checks() {
                    Effect::StartPrChecksTicker
                } else {
                    Effect::StopPrChecksTicker
                }
            }
            _ => Effect::StopPrChecksTicker,
        };
        if let Some(notice) = notice {
            self.set_notice(notice);
        }
        vec![effect]
    }

    fn on_preview(&mut self, key: SessionKey, result: FetchResult<String>) {
        if self.preview.target.as_ref() != Some(&key) {
            debug!(session = %key, "dropping preview for a session no longer selected");
            return;
        }
        self.preview.text = Some(result.map(|text| crate::tmux::strip_ansi(&text)));
        let (lines, height) = (self.preview.line_count(), self.heights().preview);
        if self.preview.follow_tail {
            self.preview.viewport.scroll_to_end(lines, height);
        } else {
            self.preview.viewport.clamp(lines, height);
        }
    }

    fn on_scrollback(&mut self, key: SessionKey, result: FetchResult<String>) {
        let height = self.heights().overlay;
        let mut notice = None;
        if let Some(ActiveDialog::Content(content)) = self.focus.dialog_mut()
            && content.source == ContentSource::Scrollback(key.clone())
        {
            if let Err(error) = &result {
                notice = Some(Notice::error(format!("capture {key}: {error}")));
            }
            content.body = Some(result.map(|text| crate::tmux::strip_ansi(&text)));
            let lines = content.line_count();
            content.viewport.scroll_to_end(lines, height);
        }
        if let Some(notice) = notice {
            self.set_notice(notice);
        }
    }

    fn on_mutation_finished(
        &mut self,
        key: SessionKey,
        action: MutateAction,
        result: FetchResult<()>,
    ) -> Vec<Effect> {
        match (&action, result) {
            (MutateAction::Kill, Ok(())) => {
                if matches!(self.focus.dialog(), Some(ActiveDialog::ConfirmKill(state)) if state.key == key)
                {
                    self.close_dialog();
                }
                self.set_notice(Notice::info(format!("killed {key}")));
            }
            (MutateAction::Rename(new_name), Ok(())) => {
                if matches!(self.focus.dialog(), Some(ActiveDialog::Rename(state)) if state.key == key)
                {
                    self.close_dialog();
                }
                self.restore_selection = Some(SessionKey::new(key.origin.clone(), new_name.clone()));
                self.set_notice(Notice::info(format!("renamed {key} to {new_name}")));
            }
            (MutateAction::Dismiss, Ok(())) => {
                self.set_notice(Notice::info(format!("dismissed {key}")));
            }
            (_, Err(error)) => {
                let shown_in_dialog = match self.focus.dialog_mut() {
                    Some(ActiveDialog::ConfirmKill(state)) if state.key == key => {
                        state.pending = false;
                        state.error = Some(error.clone());
                        true
                    }
                    Some(ActiveDialog::Rename(state)) if state.key == key => {
                        state.pending = false;
                        state.error = Some(error.clone());
                        true
                    }
                    _ => false,
                };
                if !shown_in_dialog {
                    self.set_notice(Notice::error(format!(
                        "{} {key} failed: {error}",
                        action.verb()
                    )));
                }
                return Vec::new();
            }
        }
        self.refresh_origin(&key.origin)
    }

    fn on_session_created(&mut self, key: SessionKey, result: FetchResult<()>) -> Vec<Effect> {
        match result {
            Ok(()) => {
                if matches!(self.focus.dialog(), Some(ActiveDialog::CreateSession(_))) {
                    self.close_dialog();
                }
                self.set_notice(Notice::info(format!("created {key}")));
                self.restore_selection = Some(key.clone());
                self.refresh_origin(&key.origin)
            }
            Err(error) => {
                match self.focus.dialog_mut() {
                    Some(ActiveDialog::CreateSession(state)) => {
                        state.pending = false;
                        state.error = Some(error);
                    }
                    _ => self.set_notice(Notice::error(format!("create {key} failed: {error}"))),
                }
                Vec::new()
            }
        }
    }

    pub(crate) fn refresh_origin(&mut self, origin: &Origin) -> Vec<Effect> {
        match origin {
            Origin::Local if !self.in_flight.local => {
                self.in_flight.local = true;
                vec![Effect::RefreshLocal {
                    epoch: self.poll_epoch,
                }]
            }
            Origin::Remote(host) if self.in_flight.remote.insert(host.clone()) => {
                vec![Effect::RefreshRemote {
                    host: host.clone(),
                    epoch: self.poll_epoch,
                }]
            }
            _ => Vec::new(),
        }
    }

    /// Manual refresh: forget every cached value and poll everything again.
    pub(crate) fn refresh_all(&mut self) -> Vec<Effect> {
        self.vcs_cache.invalidate_all();
        self.resource_cache.invalidate_all();
        self.task_cache.invalidate_all();
        let mut effects = self.refresh_sessions();
        for poller in [Poller::Vcs, Poller::Resources, Poller::Tasks] {
            effects.extend(self.on_tick(poller));
        }
        self.set_notice(Notice::info("refreshing"));
        effects
    }
}
