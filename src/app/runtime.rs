//! Runtime trait and implementation for tmux, git and ssh operations.
//!
//! Every method blocks; the dispatcher runs them on the blocking pool.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::agent_status::{
    build_sessions, read_status_dir, remove_status_file, rename_status_file,
};
use crate::git::{gh_pr_checks, git_vcs_info};
use crate::provider::{ProviderOutcome, run_task_provider};
use crate::remote::SshTransport;
use crate::resources::session_resource_usage;
use crate::settings::Settings;
use crate::tmux::{
    tmux_attach_command, tmux_capture_pane, tmux_create_session, tmux_kill_session,
    tmux_list_sessions, tmux_rename_session,
};
use crate::types::{DirKey, Origin, PrCheck, ResourceUsage, Session, SessionKey, VcsInfo};

use super::messages::{CreateRequest, MutateAction};

/// Everything the dashboard asks of the outside world.
pub trait SessionRuntime: Send + Sync + 'static {
    fn list_local(&self) -> Result<Vec<Session>>;
    fn list_remote(&self, host: &str) -> Result<Vec<Session>>;
    fn fetch_vcs(&self, dir: &DirKey) -> Result<VcsInfo>;
    fn fetch_resources(&self, key: &SessionKey) -> Result<ResourceUsage>;
    fn fetch_pr_checks(&self, dir: &DirKey) -> Result<Vec<PrCheck>>;
    fn run_task_provider(&self, project: &Path) -> Result<ProviderOutcome>;
    fn capture(&self, key: &SessionKey, lines: usize) -> Result<String>;
    fn mutate(&self, key: &SessionKey, action: &MutateAction) -> Result<()>;
    fn create(&self, request: &CreateRequest) -> Result<()>;
    /// Command that takes over the terminal until the user detaches.
    fn attach_command(&self, key: &SessionKey) -> Result<Command>;
}

/// Real implementation backed by tmux, git, gh and ssh.
pub struct RealSessionRuntime {
    settings: Settings,
    transports: HashMap<String, SshTransport>,
}

impl RealSessionRuntime {
    pub fn new(settings: Settings) -> Self {
        let transports = settings
            .remote_hosts
            .iter()
            .map(|host| (host.name.clone(), SshTransport::new(host)))
            .collect();
        Self {
            settings,
            transports,
        }
    }

    fn transport(&self, host: &str) -> Result<&SshTransport> {
        self.transports
            .get(host)
            .ok_or_else(|| anyhow!("host '{host}' is not configured"))
    }

    fn provider_timeout(&self) -> Duration {
        self.settings.provider_timeout()
    }
}

impl SessionRuntime for RealSessionRuntime {
    fn list_local(&self) -> Result<Vec<Session>> {
        let tmux_sessions = tmux_list_sessions()?;
        let records = match self.settings.status_dir() {
            Some(dir) => read_status_dir(&dir)?,
            None => HashMap::new(),
        };
        let normalize = |raw: &str| self.settings.normalize_status(raw);
        Ok(build_sessions(
            &Origin::Local,
            tmux_sessions,
            &records,
            &normalize,
        ))
    }

    fn list_remote(&self, host: &str) -> Result<Vec<Session>> {
        let (tmux_sessions, records) = self.transport(host)?.list_sessions()?;
        let normalize = |raw: &str| self.settings.normalize_status(raw);
        Ok(build_sessions(
            &Origin::Remote(host.to_string()),
            tmux_sessions,
            &records,
            &normalize,
        ))
    }

    fn fetch_vcs(&self, dir: &DirKey) -> Result<VcsInfo> {
        match &dir.origin {
            Origin::Local => git_vcs_info(&dir.dir),
            Origin::Remote(host) => self.transport(host)?.vcs_info(&dir.dir),
        }
    }

    fn fetch_resources(&self, key: &SessionKey) -> Result<ResourceUsage> {
        match &key.origin {
            Origin::Local => session_resource_usage(&key.name),
            Origin::Remote(host) => Err(anyhow!("resource usage is not sampled on {host}")),
        }
    }

    fn fetch_pr_checks(&self, dir: &DirKey) -> Result<Vec<PrCheck>> {
        match &dir.origin {
            Origin::Local => gh_pr_checks(&dir.dir),
            Origin::Remote(host) => self.transport(host)?.pr_checks(&dir.dir),
        }
    }

    fn run_task_provider(&self, project: &Path) -> Result<ProviderOutcome> {
        run_task_provider(
            project,
            self.settings.provider_command_for(project),
            self.provider_timeout(),
        )
    }

    fn capture(&self, key: &SessionKey, lines: usize) -> Result<String> {
        match &key.origin {
            Origin::Local => tmux_capture_pane(&key.name, lines),
            Origin::Remote(host) => self.transport(host)?.capture_pane(&key.name, lines),
        }
    }

    fn mutate(&self, key: &SessionKey, action: &MutateAction) -> Result<()> {
        match (&key.origin, action) {
            (Origin::Local, MutateAction::Kill) => {
                tmux_kill_session(&key.name)?;
                if let Some(dir) = self.settings.status_dir() {
                    remove_status_file(&dir, &key.name)?;
                }
                Ok(())
            }
            (Origin::Local, MutateAction::Rename(new_name)) => {
                tmux_rename_session(&key.name, new_name)?;
                if let Some(dir) = self.settings.status_dir() {
                    rename_status_file(&dir, &key.name, new_name)?;
                }
                Ok(())
            }
            (Origin::Local, MutateAction::Dismiss) => {
                let dir = self
                    .settings
                    .status_dir()
                    .context("no status directory configured")?;
                remove_status_file(&dir, &key.name)
            }
            (Origin::Remote(host), MutateAction::Kill) => {
                self.transport(host)?.kill_session(&key.name)
            }
            (Origin::Remote(host), MutateAction::Rename(new_name)) => {
                self.transport(host)?.rename_session(&key.name, new_name)
            }
            (Origin::Remote(host), MutateAction::Dismiss) => {
                self.transport(host)?.dismiss(&key.name)
            }
        }
    }

    fn create(&self, request: &CreateRequest) -> Result<()> {
        let command = request.command.as_deref();
        match &request.origin {
            Origin::Local => {
                if !request.working_dir.is_dir() {
                    return Err(anyhow!(
                        "{} is not a directory",
                        request.working_dir.display()
                    ));
                }
                tmux_create_session(&request.name, &request.working_dir, command)
            }
            Origin::Remote(host) => {
                self.transport(host)?
                    .create_session(&request.name, &request.working_dir, command)
            }
        }
    }

    fn attach_command(&self, key: &SessionKey) -> Result<Command> {
        match &key.origin {
            Origin::Local => Ok(tmux_attach_command(&key.name)),
            Origin::Remote(host) => Ok(self.transport(host)?.attach_command(&key.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RemoteHostConfig;

    #[test]
    fn test_unknown_host_is_an_error() {
        let runtime = RealSessionRuntime::new(Settings::default());
        let err = runtime.list_remote("nowhere").unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn test_remote_resources_are_not_sampled() {
        let mut settings = Settings::default();
        settings.remote_hosts.push(RemoteHostConfig {
            name: "build".to_string(),
            ssh_target: None,
            max_connections: 1,
        });
        let runtime = RealSessionRuntime::new(settings);
        let key = SessionKey::new(Origin::Remote("build".to_string()), "api");
        assert!(runtime.fetch_resources(&key).is_err());
    }

    #[test]
    fn test_local_create_requires_directory() {
        let runtime = RealSessionRuntime::new(Settings::default());
        let request = CreateRequest {
            origin: Origin::Local,
            name: "api".to_string(),
            working_dir: "/definitely/not/here".into(),
            command: None,
        };
        assert!(runtime.create(&request).is_err());
    }
}
