//! External task providers.
//!
//! A provider is any shell command that prints task groups as JSON on stdout.
//! Projects opt in either through `[[projects]]` in the settings file or by
//! carrying a `.session-deck/tasks.toml` with a `command` key.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use crate::types::{Task, TaskGroup, TaskStatus};

pub const PROJECT_CONFIG_FILE: &str = ".session-deck/tasks.toml";
const WAIT_STEP: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    Groups(Vec<TaskGroup>),
    /// The project has no provider; not an error.
    NotConfigured,
}

impl ProviderOutcome {
    pub fn groups(&self) -> &[TaskGroup] {
        match self {
            ProviderOutcome::Groups(groups) => groups,
            ProviderOutcome::NotConfigured => &[],
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, ProviderOutcome::Groups(_))
    }
}

#[derive(Debug, Deserialize)]
struct ProjectFile {
    command: String,
}

/// Reads the provider command from the project's own config file, if any.
pub fn discover_command(project: &Path) -> Option<String> {
    let path = project.join(PROJECT_CONFIG_FILE);
    let contents = fs::read_to_string(&path).ok()?;
    match toml::from_str::<ProjectFile>(&contents) {
        Ok(file) if !file.command.trim().is_empty() => Some(file.command),
        Ok(_) => None,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "ignoring malformed provider config");
            None
        }
    }
}

/// Resolves the command (settings first, then discovery) and runs it.
pub fn run_task_provider(
    project: &Path,
    configured: Option<&str>,
    timeout: Duration,
) -> Result<ProviderOutcome> {
    let command = match configured {
        Some(command) => command.to_string(),
        None => match discover_command(project) {
            Some(command) => command,
            None => return Ok(ProviderOutcome::NotConfigured),
        },
    };
    let stdout = run_with_timeout(&command, project, timeout)?;
    Ok(ProviderOutcome::Groups(parse_provider_output(&stdout)?))
}

fn run_with_timeout(command: &str, cwd: &Path, timeout: Duration) -> Result<String> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to start task provider '{command}'"))?;

    // Both pipes are drained while the child runs; a full pipe would stall it.
    let stdout = drain(child.stdout.take().context("provider stdout unavailable")?);
    let stderr = drain(child.stderr.take().context("provider stderr unavailable")?);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait().context("failed to wait for task provider")? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            bail!("task provider timed out after {}ms", timeout.as_millis());
        }
        thread::sleep(WAIT_STEP);
    };

    let output = stdout.join().unwrap_or_default();
    let errors = stderr.join().unwrap_or_default();
    if !status.success() {
        bail!("task provider exited with {status}: {}", errors.trim());
    }
    if !errors.trim().is_empty() {
        debug!(bytes = errors.len(), "task provider wrote to stderr");
    }
    Ok(output)
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        let _ = pipe.read_to_end(&mut bytes);
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    #[serde(default)]
    id: Option<String>,
    title: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(default)]
    id: Option<String>,
    title: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Accepts either a bare array of groups or `{"groups": [...]}`.
pub fn parse_provider_output(stdout: &str) -> Result<Vec<TaskGroup>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Document {
        Groups(Vec<RawGroup>),
        Wrapped { groups: Vec<RawGroup> },
    }

    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let document: Document =
        serde_json::from_str(trimmed).context("task provider printed invalid JSON")?;
    let raw = match document {
        Document::Groups(groups) | Document::Wrapped { groups } => groups,
    };

    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(group_index, group)| {
            let group_id = group.id.unwrap_or_else(|| format!("group-{group_index}"));
            let tasks = group
                .tasks
                .into_iter()
                .enumerate()
                .map(|(task_index, task)| Task {
                    id: task
                        .id
                        .unwrap_or_else(|| format!("{group_id}-{task_index}")),
                    title: task.title,
                    status: task
                        .status
                        .as_deref()
                        .map(TaskStatus::from_raw)
                        .unwrap_or(TaskStatus::Unknown),
                    url: task.url.filter(|url| !url.is_empty()),
                })
                .collect();
            TaskGroup {
                id: group_id,
                title: group.title,
                status: group
                    .status
                    .as_deref()
                    .map(TaskStatus::from_raw)
                    .unwrap_or(TaskStatus::Unknown),
                tasks,
            }
        })
        .collect())
}
