use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::notification::NotificationBackend;
use crate::types::SessionStatus;

const MIN_POLL_INTERVAL_MS: u64 = 250;
const MAX_POLL_INTERVAL_MS: u64 = 600_000;
const DEFAULT_LOCAL_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_REMOTE_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_VCS_POLL_INTERVAL_MS: u64 = 5_000;
const DEFAULT_RESOURCE_POLL_INTERVAL_MS: u64 = 4_000;
const DEFAULT_TASK_POLL_INTERVAL_MS: u64 = 30_000;
const DEFAULT_PR_CHECKS_INTERVAL_MS: u64 = 30_000;
const MIN_DEBOUNCE_MS: u64 = 10;
const MAX_DEBOUNCE_MS: u64 = 2_000;
const DEFAULT_PREVIEW_DEBOUNCE_MS: u64 = 150;
const DEFAULT_VCS_STALE_AFTER_MS: u64 = 10_000;
const DEFAULT_TASK_STALE_AFTER_MS: u64 = 120_000;
const DEFAULT_RESOURCE_STALE_AFTER_MS: u64 = 5_000;
const MIN_PROVIDER_TIMEOUT_MS: u64 = 1_000;
const MAX_PROVIDER_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 20_000;
const DEFAULT_NOTIFICATION_BACKEND: &str = "tmux";
const MAX_HOST_CONNECTIONS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHostConfig {
    pub name: String,
    /// Anything `ssh` accepts as a destination; defaults to `name`.
    #[serde(default)]
    pub ssh_target: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    1
}

impl RemoteHostConfig {
    pub fn target(&self) -> &str {
        self.ssh_target.as_deref().unwrap_or(self.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub path: PathBuf,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub local_poll_interval_ms: u64,
    pub remote_poll_interval_ms: u64,
    pub vcs_poll_interval_ms: u64,
    pub resource_poll_interval_ms: u64,
    pub task_poll_interval_ms: u64,
    pub pr_checks_interval_ms: u64,
    pub preview_debounce_ms: u64,
    pub vcs_stale_after_ms: u64,
    pub task_stale_after_ms: u64,
    pub resource_stale_after_ms: u64,
    pub provider_timeout_ms: u64,
    pub remote_hosts: Vec<RemoteHostConfig>,
    pub projects: Vec<ProjectConfig>,
    pub status_aliases: HashMap<String, String>,
    pub notification_backend: String,
    pub notify_on: Vec<String>,
    pub status_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            local_poll_interval_ms: DEFAULT_LOCAL_POLL_INTERVAL_MS,
            remote_poll_interval_ms: DEFAULT_REMOTE_POLL_INTERVAL_MS,
            vcs_poll_interval_ms: DEFAULT_VCS_POLL_INTERVAL_MS,
            resource_poll_interval_ms: DEFAULT_RESOURCE_POLL_INTERVAL_MS,
            task_poll_interval_ms: DEFAULT_TASK_POLL_INTERVAL_MS,
            pr_checks_interval_ms: DEFAULT_PR_CHECKS_INTERVAL_MS,
            preview_debounce_ms: DEFAULT_PREVIEW_DEBOUNCE_MS,
            vcs_stale_after_ms: DEFAULT_VCS_STALE_AFTER_MS,
            task_stale_after_ms: DEFAULT_TASK_STALE_AFTER_MS,
            resource_stale_after_ms: DEFAULT_RESOURCE_STALE_AFTER_MS,
            provider_timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
            remote_hosts: Vec::new(),
            projects: Vec::new(),
            status_aliases: HashMap::new(),
            notification_backend: DEFAULT_NOTIFICATION_BACKEND.to_string(),
            notify_on: default_notify_on(),
            status_dir: None,
        }
    }
}

fn default_notify_on() -> Vec<String> {
    [
        SessionStatus::Waiting,
        SessionStatus::NeedsPermission,
        SessionStatus::Done,
        SessionStatus::Error,
    ]
    .iter()
    .map(|status| status.as_str().to_string())
    .collect()
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("session-deck");
        path.push("settings.toml");
        Some(path)
    }

    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(mut settings) => {
                    settings.validate();
                    settings
                }
                Err(error) => {
                    warn!(
                        "failed to parse settings config '{}': {}",
                        path.display(),
                        error
                    );
                    Self::default()
                }
            },
            Err(error) => {
                warn!(
                    "failed to read settings config '{}': {}",
                    path.display(),
                    error
                );
                Self::default()
            }
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path().ok_or_else(|| anyhow!("unable to determine config path"))?;
        self.save_to_path(&path)
    }

    fn save_to_path(&self, path: &Path) -> anyhow::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("invalid settings config path"))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory '{}'", parent.display()))?;

        let mut validated = self.clone();
        validated.validate();
        let contents =
            toml::to_string_pretty(&validated).context("failed to serialize settings to TOML")?;

        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("invalid settings config file name"))?
            .to_string_lossy()
            .to_string();
        let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

        fs::write(&tmp_path, contents).with_context(|| {
            format!(
                "failed to write temporary settings file '{}'",
                tmp_path.display()
            )
        })?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "failed to atomically rename settings file '{}' to '{}'",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }

    pub fn validate(&mut self) {
        for interval in [
            &mut self.local_poll_interval_ms,
            &mut self.remote_poll_interval_ms,
            &mut self.vcs_poll_interval_ms,
            &mut self.resource_poll_interval_ms,
            &mut self.task_poll_interval_ms,
            &mut self.pr_checks_interval_ms,
            &mut self.vcs_stale_after_ms,
            &mut self.task_stale_after_ms,
            &mut self.resource_stale_after_ms,
        ] {
            *interval = (*interval).clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS);
        }
        self.preview_debounce_ms = self
            .preview_debounce_ms
            .clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);
        self.provider_timeout_ms = self
            .provider_timeout_ms
            .clamp(MIN_PROVIDER_TIMEOUT_MS, MAX_PROVIDER_TIMEOUT_MS);

        self.remote_hosts.retain(|host| {
            let keep = !host.name.trim().is_empty();
            if !keep {
                warn!("ignoring remote host with empty name in settings config");
            }
            keep
        });
        let mut seen = Vec::new();
        self.remote_hosts.retain(|host| {
            if seen.contains(&host.name) {
                warn!("ignoring duplicate remote host '{}'", host.name);
                return false;
            }
            seen.push(host.name.clone());
            true
        });
        for host in &mut self.remote_hosts {
            host.max_connections = host.max_connections.clamp(1, MAX_HOST_CONNECTIONS);
        }

        self.notification_backend = match NotificationBackend::from_str(&self.notification_backend)
        {
            Ok(backend) => backend.as_str().to_string(),
            Err(()) => {
                warn!(
                    "invalid notification_backend '{}' in settings config; falling back to {}",
                    self.notification_backend, DEFAULT_NOTIFICATION_BACKEND
                );
                DEFAULT_NOTIFICATION_BACKEND.to_string()
            }
        };
    }

    /// Normalizes a raw agent status through the configured alias map first.
    pub fn normalize_status(&self, raw: &str) -> SessionStatus {
        let key = raw.trim().to_ascii_lowercase();
        match self.status_aliases.get(&key) {
            Some(alias) => SessionStatus::from_raw(alias),
            None => SessionStatus::from_raw(&key),
        }
    }

    pub fn notification_backend(&self) -> NotificationBackend {
        NotificationBackend::from_str(&self.notification_backend).unwrap_or_default()
    }

    pub fn notify_statuses(&self) -> Vec<SessionStatus> {
        self.notify_on
            .iter()
            .map(|raw| self.normalize_status(raw))
            .filter(|status| *status != SessionStatus::Unknown)
            .collect()
    }

    pub fn status_dir(&self) -> Option<PathBuf> {
        self.status_dir.clone().or_else(|| {
            dirs::data_local_dir().map(|dir| dir.join("session-deck").join("status"))
        })
    }

    pub fn provider_command_for(&self, project: &Path) -> Option<&str> {
        self.projects
            .iter()
            .find(|config| config.path == project)
            .map(|config| config.command.as_str())
    }

    pub fn vcs_stale_after(&self) -> Duration {
        Duration::from_millis(self.vcs_stale_after_ms)
    }

    pub fn task_stale_after(&self) -> Duration {
        Duration::from_millis(self.task_stale_after_ms)
    }

    pub fn resource_stale_after(&self) -> Duration {
        Duration::from_millis(self.resource_stale_after_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings_file_path(temp_dir: &TempDir) -> PathBuf {
        temp_dir.path().join("session-deck").join("settings.toml")
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.local_poll_interval_ms, 1_000);
        assert_eq!(settings.pr_checks_interval_ms, 30_000);
        assert!(settings.vcs_stale_after() < settings.task_stale_after());
        assert!(settings.remote_hosts.is_empty());
        assert_eq!(settings.notification_backend(), NotificationBackend::Tmux);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().expect("temp dir");
        let settings = Settings::load_from_path(&settings_file_path(&temp_dir));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_malformed_toml() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = settings_file_path(&temp_dir);
        fs::create_dir_all(path.parent().expect("settings path should have parent"))
            .expect("failed to create config dir");
        fs::write(&path, "local_poll_interval_ms = [invalid").expect("write settings");

        assert_eq!(Settings::load_from_path(&path), Settings::default());
    }

    #[test]
    fn test_load_hosts_and_projects() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = settings_file_path(&temp_dir);
        fs::create_dir_all(path.parent().expect("settings path should have parent"))
            .expect("failed to create config dir");
        fs::write(
            &path,
            r#"
remote_poll_interval_ms = 5000

[[remote_hosts]]
name = "gpu-box"
ssh_target = "me@10.0.0.4"

[[remote_hosts]]
name = "build"
max_connections = 40

[[projects]]
path = "/work/api"
command = "tasks --json"

[status_aliases]
thinking_hard = "working"
"#,
        )
        .expect("write settings");

        let settings = Settings::load_from_path(&path);
        assert_eq!(settings.remote_poll_interval_ms, 5_000);
        assert_eq!(settings.remote_hosts.len(), 2);
        assert_eq!(settings.remote_hosts[0].target(), "me@10.0.0.4");
        assert_eq!(settings.remote_hosts[1].target(), "build");
        assert_eq!(settings.remote_hosts[1].max_connections, MAX_HOST_CONNECTIONS);
        assert_eq!(
            settings.provider_command_for(Path::new("/work/api")),
            Some("tasks --json")
        );
        assert_eq!(
            settings.normalize_status("Thinking_Hard"),
            SessionStatus::Working
        );
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = settings_file_path(&temp_dir);
        let mut expected = Settings {
            remote_poll_interval_ms: 7_000,
            notification_backend: "both".to_string(),
            ..Settings::default()
        };
        expected.validate();

        expected.save_to_path(&path).expect("save settings");
        assert_eq!(Settings::load_from_path(&path), expected);
    }

    #[test]
    fn test_validate_clamps_values() {
        let mut settings = Settings {
            local_poll_interval_ms: 1,
            preview_debounce_ms: u64::MAX,
            provider_timeout_ms: 0,
            ..Settings::default()
        };

        settings.validate();

        assert_eq!(settings.local_poll_interval_ms, MIN_POLL_INTERVAL_MS);
        assert_eq!(settings.preview_debounce_ms, MAX_DEBOUNCE_MS);
        assert_eq!(settings.provider_timeout_ms, MIN_PROVIDER_TIMEOUT_MS);
    }

    #[test]
    fn test_validate_drops_unnamed_and_duplicate_hosts() {
        let host = |name: &str| RemoteHostConfig {
            name: name.to_string(),
            ssh_target: None,
            max_connections: 0,
        };
        let mut settings = Settings {
            remote_hosts: vec![host("a"), host(" "), host("a"), host("b")],
            ..Settings::default()
        };

        settings.validate();

        let names: Vec<&str> = settings
            .remote_hosts
            .iter()
            .map(|host| host.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(settings.remote_hosts.iter().all(|h| h.max_connections == 1));
    }

    #[test]
    fn test_validate_invalid_backend() {
        let mut settings = Settings {
            notification_backend: "pager".to_string(),
            ..Settings::default()
        };
        settings.validate();
        assert_eq!(settings.notification_backend, "tmux");
    }

    #[test]
    fn test_notify_statuses_skip_unknown_entries() {
        let settings = Settings {
            notify_on: vec!["done".to_string(), "nonsense".to_string()],
            ..Settings::default()
        };
        assert_eq!(settings.notify_statuses(), vec![SessionStatus::Done]);
    }
}
