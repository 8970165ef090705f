//! Remote hosts reached over ssh.
//!
//! Every host shares one multiplexed ssh connection (ControlMaster), so
//! operations that talk to the same host are serialized through `HostPool`.
//! Distinct hosts never wait on each other.

use std::collections::HashMap;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

use crate::agent_status::{AgentStatusRecord, parse_status_lines};
use crate::git::{
    interpret_pr_checks, parse_vcs_output, pr_checks_script, shell_quote, vcs_script,
};
use crate::settings::RemoteHostConfig;
use crate::tmux::{LIST_SESSIONS_FORMAT, TmuxSession, is_no_server_error, parse_list_sessions};
use crate::types::{PrCheck, VcsInfo};

const REMOTE_STATUS_DIR: &str = "$HOME/.local/share/session-deck/status";
const SECTION_SEPARATOR: &str = "--session-deck-status--";
const CONNECT_TIMEOUT_SECS: u32 = 5;

#[derive(Debug, Clone)]
pub struct SshTransport {
    target: String,
}

impl SshTransport {
    pub fn new(config: &RemoteHostConfig) -> Self {
        Self {
            target: config.target().to_string(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(ssh_base_args(&self.target));
        cmd
    }

    pub fn run(&self, script: &str) -> Result<Output> {
        self.command()
            .arg(script)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run ssh to {}", self.target))
    }

    fn run_checked(&self, script: &str, operation: &str) -> Result<String> {
        let output = self.run(script)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{operation} on {} failed: {}", self.target, stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Sessions and their status records in one round trip.
    pub fn list_sessions(&self) -> Result<(Vec<TmuxSession>, HashMap<String, AgentStatusRecord>)> {
        let stdout = self.run_checked(&list_script(), "listing sessions")?;
        parse_list_output(&stdout)
    }

    pub fn vcs_info(&self, dir: &Path) -> Result<VcsInfo> {
        let stdout = self.run_checked(&vcs_script(&dir.to_string_lossy()), "git status")?;
        Ok(parse_vcs_output(&stdout))
    }

    pub fn pr_checks(&self, dir: &Path) -> Result<Vec<PrCheck>> {
        let output = self.run(&pr_checks_script(&dir.to_string_lossy()))?;
        interpret_pr_checks(
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )
    }

    pub fn capture_pane(&self, session_name: &str, lines: usize) -> Result<String> {
        self.run_checked(
            &format!(
                "tmux capture-pane -p -J -t {} -S -{lines}",
                shell_quote(&format!("={session_name}"))
            ),
            "capture-pane",
        )
    }

    pub fn kill_session(&self, session_name: &str) -> Result<()> {
        self.run_checked(
            &format!(
                "tmux kill-session -t {}",
                shell_quote(&format!("={session_name}"))
            ),
            "kill-session",
        )
        .map(|_| ())
    }

    pub fn rename_session(&self, session_name: &str, new_name: &str) -> Result<()> {
        let script = format!(
            "tmux rename-session -t {} {} && (mv {dir}/{from}.json {dir}/{to}.json 2>/dev/null || true)",
            shell_quote(&format!("={session_name}")),
            shell_quote(new_name),
            dir = REMOTE_STATUS_DIR,
            from = shell_quote(session_name),
            to = shell_quote(new_name),
        );
        self.run_checked(&script, "rename-session").map(|_| ())
    }

    pub fn dismiss(&self, session_name: &str) -> Result<()> {
        let script = format!(
            "rm -f {REMOTE_STATUS_DIR}/{}.json",
            shell_quote(session_name)
        );
        self.run_checked(&script, "dismiss").map(|_| ())
    }

    pub fn create_session(&self, session_name: &str, dir: &Path, command: Option<&str>) -> Result<()> {
        let mut script = format!(
            "tmux new-session -d -s {} -c {}",
            shell_quote(session_name),
            shell_quote(&dir.to_string_lossy())
        );
        if let Some(command) = command.filter(|command| !command.trim().is_empty()) {
            script.push(' ');
            script.push_str(&shell_quote(command));
        }
        self.run_checked(&script, "new-session").map(|_| ())
    }

    /// Interactive attach; inherits the terminal.
    pub fn attach_command(&self, session_name: &str) -> Command {
        let mut cmd = self.command();
        cmd.arg("-t").arg(format!(
            "tmux attach-session -t {}",
            shell_quote(&format!("={session_name}"))
        ));
        cmd
    }
}

fn ssh_base_args(target: &str) -> Vec<String> {
    vec![
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"),
        "-o".to_string(),
        "ControlMaster=auto".to_string(),
        "-o".to_string(),
        "ControlPath=~/.ssh/session-deck-%C".to_string(),
        "-o".to_string(),
        "ControlPersist=60".to_string(),
        target.to_string(),
    ]
}

fn list_script() -> String {
    format!(
        "tmux list-sessions -F '{LIST_SESSIONS_FORMAT}' 2>&1; echo {SECTION_SEPARATOR}; \
         for f in {REMOTE_STATUS_DIR}/*.json; do [ -f \"$f\" ] || continue; \
         printf '%s\\t' \"$(basename \"$f\" .json)\"; tr -d '\\n' < \"$f\"; echo; done"
    )
}

fn parse_list_output(
    stdout: &str,
) -> Result<(Vec<TmuxSession>, HashMap<String, AgentStatusRecord>)> {
    let (sessions_raw, status_raw) = stdout
        .split_once(SECTION_SEPARATOR)
        .context("remote listing is missing the status section")?;

    let first_line = sessions_raw.lines().next().unwrap_or_default();
    if is_no_server_error(first_line) {
        return Ok((Vec::new(), parse_status_lines(status_raw)));
    }
    if first_line.starts_with("tmux:") || first_line.contains("command not found") {
        bail!("remote tmux unavailable: {}", first_line.trim());
    }

    Ok((parse_list_sessions(sessions_raw), parse_status_lines(status_raw)))
}

struct HostSlot {
    serial: Arc<Mutex<()>>,
    connections: Arc<Semaphore>,
}

/// Per-host concurrency limits. `serialize` orders whole operations against a
/// host; `connection` bounds how many ssh processes one operation may run at
/// once while fanning out.
#[derive(Clone, Default)]
pub struct HostPool {
    slots: Arc<HashMap<String, HostSlot>>,
}

impl HostPool {
    pub fn new(hosts: &[RemoteHostConfig]) -> Self {
        let slots = hosts
            .iter()
            .map(|host| {
                (
                    host.name.clone(),
                    HostSlot {
                        serial: Arc::new(Mutex::new(())),
                        connections: Arc::new(Semaphore::new(host.max_connections.max(1))),
                    },
                )
            })
            .collect();
        Self {
            slots: Arc::new(slots),
        }
    }

    pub fn contains(&self, host: &str) -> bool {
        self.slots.contains_key(host)
    }

    pub async fn serialize(&self, host: &str) -> Result<OwnedMutexGuard<()>> {
        let slot = self
            .slots
            .get(host)
            .with_context(|| format!("unknown remote host '{host}'"))?;
        Ok(Arc::clone(&slot.serial).lock_owned().await)
    }

    pub async fn connection(&self, host: &str) -> Result<OwnedSemaphorePermit> {
        let slot = self
            .slots
            .get(host)
            .with_context(|| format!("unknown remote host '{host}'"))?;
        Arc::clone(&slot.connections)
            .acquire_owned()
            .await
            .context("host connection pool closed")
    }
}
