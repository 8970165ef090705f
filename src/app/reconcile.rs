//! Merging fetch results into the authoritative session list.
//!
//! Each origin's sessions are replaced wholesale by that origin's poll and
//! nothing else, and the combined list is kept in a total canonical order, so
//! applying local and remote results in either order converges on the same list.

use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::cache::Cache;
use crate::types::{DirKey, Origin, ResourceUsage, Session, SessionKey, SessionStatus, VcsInfo};

use super::messages::{Effect, FetchResult, ProjectTasks};
use super::pipeline::sort_canonical;
use super::App;

/// Last status seen per session, per origin. An origin's first observation
/// only seeds it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusBaseline {
    origins: BTreeMap<Origin, HashMap<String, SessionStatus>>,
}

impl StatusBaseline {
    pub fn is_seeded(&self, origin: &Origin) -> bool {
        self.origins.contains_key(origin)
    }

    pub fn status_of(&self, key: &SessionKey) -> Option<SessionStatus> {
        self.origins.get(&key.origin)?.get(&key.name).copied()
    }

    /// Records `sessions` as the current state of `origin` and returns the
    /// sessions whose status changed since the previous observation.
    pub fn observe(
        &mut self,
        origin: &Origin,
        sessions: &[Session],
    ) -> Vec<(SessionKey, SessionStatus)> {
        let current: HashMap<String, SessionStatus> = sessions
            .iter()
            .filter(|session| session.origin == *origin)
            .map(|session| (session.name.clone(), session.status))
            .collect();

        let transitions = match self.origins.get(origin) {
            None => Vec::new(),
            Some(previous) => {
                let mut changed: Vec<(SessionKey, SessionStatus)> = current
                    .iter()
                    .filter(|(name, status)| {
                        previous
                            .get(*name)
                            .is_some_and(|before| before != *status)
                    })
                    .map(|(name, status)| (SessionKey::new(origin.clone(), name.clone()), *status))
                    .collect();
                changed.sort_by(|a, b| a.0.cmp(&b.0));
                changed
            }
        };

        self.origins.insert(origin.clone(), current);
        transitions
    }
}

/// Replaces every session of `origin` with `incoming` and restores canonical order.
pub fn merge_origin(store: &mut Vec<Session>, origin: &Origin, incoming: Vec<Session>) {
    store.retain(|session| session.origin != *origin);
    store.extend(incoming.into_iter().map(|mut session| {
        session.origin = origin.clone();
        session
    }));
    sort_canonical(store);
}

/// Pushes cached metadata onto every session, so a list refresh never blanks it.
pub fn apply_cached_metadata(
    store: &mut [Session],
    vcs: &Cache<DirKey, VcsInfo>,
    resources: &Cache<SessionKey, ResourceUsage>,
) {
    for session in store {
        session.vcs = vcs.value(&session.vcs_key()).cloned();
        session.resources = resources.value(&session.key()).copied();
    }
}

/// Background failures keep the last good value; an error is only stored
/// when there is nothing better to show.
fn store_background<K, V>(cache: &mut Cache<K, V>, key: K, outcome: FetchResult<V>)
where
    K: Eq + std::hash::Hash + Clone,
{
    match outcome {
        Ok(value) => cache.set(key, Ok(value)),
        Err(error) => {
            if cache.value(&key).is_none() {
                cache.set(key, Err(error));
            }
        }
    }
}

impl App {
    pub(crate) fn on_local_sessions(
        &mut self,
        epoch: u64,
        result: FetchResult<Vec<Session>>,
    ) -> Vec<Effect> {
        if epoch != self.poll_epoch {
            debug!(epoch, current = self.poll_epoch, "dropping local result from before attach");
            return Vec::new();
        }
        self.in_flight.local = false;
        match result {
            Ok(sessions) => self.reconcile_origin(Origin::Local, sessions),
            Err(error) => {
                warn!(error = %error, "local session poll failed");
                Vec::new()
            }
        }
    }

    pub(crate) fn on_remote_sessions(
        &mut self,
        host: String,
        epoch: u64,
        result: FetchResult<Vec<Session>>,
    ) -> Vec<Effect> {
        if epoch != self.poll_epoch {
            debug!(host = %host, "dropping remote result from before attach");
            return Vec::new();
        }
        self.in_flight.remote.remove(&host);
        if !self.hosts().contains(&host) {
            return Vec::new();
        }
        match result {
            Ok(sessions) => self.reconcile_origin(Origin::Remote(host), sessions),
            Err(error) => {
                // Previous sessions for the host stay until a poll succeeds.
                warn!(host = %host, error = %error, "remote session poll failed");
                Vec::new()
            }
        }
    }

    fn reconcile_origin(&mut self, origin: Origin, sessions: Vec<Session>) -> Vec<Effect> {
        let anchors = self.selection_anchors();
        merge_origin(&mut self.sessions, &origin, sessions);
        apply_cached_metadata(&mut self.sessions, &self.vcs_cache, &self.resource_cache);
        self.rederive(&anchors);

        let seeded = self.baseline.is_seeded(&origin);
        let transitions = self.baseline.observe(&origin, &self.sessions);
        if !seeded {
            debug!(origin = %origin, "status baseline seeded");
        }
        debug!(
            origin = %origin,
            total = self.sessions.len(),
            displayed = self.displayed.len(),
            transitions = transitions.len(),
            "session list reconciled"
        );

        let mut effects: Vec<Effect> = transitions
            .into_iter()
            .map(|(key, status)| Effect::Notify { key, status })
            .collect();
        if let Some(effect) = self.vcs_refresh_for(Some(&origin), SystemTime::now()) {
            effects.push(effect);
        }
        effects
    }

    /// Directories (of one origin, or all) whose version-control entry is
    /// missing or stale and not already being fetched.
    pub(crate) fn vcs_refresh_for(&mut self, origin: Option<&Origin>, now: SystemTime) -> Option<Effect> {
        let candidates: Vec<DirKey> = self
            .sessions
            .iter()
            .filter(|session| origin.is_none_or(|origin| session.origin == *origin))
            .filter(|session| !session.working_dir.as_os_str().is_empty())
            .map(Session::vcs_key)
            .collect();
        let dirs: Vec<DirKey> = self
            .vcs_cache
            .keys_needing_refresh(candidates.iter(), now)
            .into_iter()
            .filter(|dir| !self.in_flight.vcs.contains(dir))
            .collect();
        if dirs.is_empty() {
            return None;
        }
        self.in_flight.vcs.extend(dirs.iter().cloned());
        Some(Effect::FetchVcs(dirs))
    }

    pub(crate) fn on_vcs_batch(&mut self, batch: Vec<(DirKey, FetchResult<VcsInfo>)>) {
        for (dir, outcome) in batch {
            self.in_flight.vcs.remove(&dir);
            if let Err(error) = &outcome {
                warn!(origin = %dir.origin, dir = %dir.dir.display(), error = %error, "vcs fetch failed");
            }
            store_background(&mut self.vcs_cache, dir.clone(), outcome);
            let value = self.vcs_cache.value(&dir).cloned();
            for session in self.sessions.iter_mut().filter(|s| s.vcs_key() == dir) {
                session.vcs = value.clone();
            }
        }
    }

    pub(crate) fn on_resource_batch(&mut self, batch: Vec<(SessionKey, FetchResult<ResourceUsage>)>) {
        for (key, outcome) in batch {
            self.in_flight.resources.remove(&key);
            if let Err(error) = &outcome {
                debug!(session = %key, error = %error, "resource fetch failed");
            }
            store_background(&mut self.resource_cache, key.clone(), outcome);
            let value = self.resource_cache.value(&key).copied();
            if let Some(session) = self.sessions.iter_mut().find(|s| s.is(&key)) {
                session.resources = value;
            }
        }
    }

    pub(crate) fn on_task_batch(&mut self, batch: Vec<ProjectTasks>) {
        for ProjectTasks { project, outcome } in batch {
            self.in_flight.tasks.remove(&project);
            if let Err(error) = &outcome {
                warn!(project = %project.display(), error = %error, "task provider failed");
            }
            store_background(&mut self.task_cache, project, outcome);
        }
        self.rebuild_task_rows();
    }

    /// Runs the focused project's provider right away when nothing has been
    /// fetched for it yet, or when it was unconfigured but settings name a command.
    pub(crate) fn task_cold_start(&mut self) -> Option<Effect> {
        let project = self.focused_project()?;
        if self.in_flight.tasks.contains(&project) {
            return None;
        }
        let lookup = self.task_cache.lookup(&project);
        let unconfigured = lookup.value.is_some_and(|outcome| !outcome.is_configured());
        let should_run = !lookup.found
            || (unconfigured && self.settings.provider_command_for(&project).is_some());
        if !should_run {
            return None;
        }
        self.in_flight.tasks.insert(project.clone());
        Some(Effect::RunTaskProviders(vec![project]))
    }

    /// Adopts the attach monitor's baseline and restarts list polling from a
    /// clean epoch.
    pub(crate) fn on_attach_finished(
        &mut self,
        key: SessionKey,
        baseline: StatusBaseline,
        result: FetchResult<()>,
    ) -> Vec<Effect> {
        self.baseline = baseline;
        self.poll_epoch += 1;
        self.in_flight.clear_sessions();
        if let Err(error) = result {
            self.set_notice(super::Notice::error(format!("attach to {key} failed: {error}")));
        }
        self.restore_selection = Some(key);
        self.refresh_sessions()
    }

    /// List polls for every origin not already in flight.
    pub(crate) fn refresh_sessions(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.in_flight.local {
            self.in_flight.local = true;
            effects.push(Effect::RefreshLocal {
                epoch: self.poll_epoch,
            });
        }
        effects.extend(self.refresh_remotes());
        effects
    }

    pub(crate) fn refresh_remotes(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        for host in self.hosts() {
            if self.in_flight.remote.insert(host.clone()) {
                effects.push(Effect::RefreshRemote {
                    host,
                    epoch: self.poll_epoch,
                });
            }
        }
        effects
    }
}
