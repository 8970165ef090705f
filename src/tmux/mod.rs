use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use regex::Regex;

const SOCKET_ENV: &str = "SESSION_DECK_TMUX_SOCKET";

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("valid ansi regex"));

/// `list-sessions` format shared by the local and remote listers.
pub const LIST_SESSIONS_FORMAT: &str =
    "#{session_name}\t#{session_created}\t#{session_attached}\t#{session_activity}\t#{session_path}";

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TmuxSession {
    pub name: String,
    pub created_at: i64,
    pub attached: bool,
    pub activity_at: i64,
    pub path: PathBuf,
}

impl TmuxSession {
    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.activity_at.max(self.created_at), 0)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

pub fn ensure_tmux_installed() -> Result<()> {
    let output = Command::new("tmux")
        .arg("-V")
        .output()
        .context("failed to execute tmux")?;

    if output.status.success() {
        Ok(())
    } else {
        bail!(
            "tmux is required but not available. Install tmux and ensure it is on PATH, then retry."
        )
    }
}

pub fn inside_tmux() -> bool {
    env::var_os("TMUX").is_some()
}

pub fn tmux_list_sessions() -> Result<Vec<TmuxSession>> {
    let output = tmux_command()
        .args(list_sessions_args())
        .output()
        .context("failed to run tmux list-sessions")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_no_server_error(&stderr) {
            return Ok(Vec::new());
        }
        bail!("tmux list-sessions failed: {}", stderr.trim());
    }

    Ok(parse_list_sessions(&String::from_utf8_lossy(&output.stdout)))
}

pub fn tmux_list_session_names() -> Vec<String> {
    tmux_list_sessions()
        .map(|sessions| sessions.into_iter().map(|session| session.name).collect())
        .unwrap_or_default()
}

pub fn is_no_server_error(stderr: &str) -> bool {
    stderr.contains("no server running")
        || stderr.contains("failed to connect")
        || stderr.contains("error connecting")
}

pub fn parse_list_sessions(stdout: &str) -> Vec<TmuxSession> {
    let mut sessions = Vec::new();

    for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
        let mut parts = line.split('\t');
        let Some(name) = parts.next().filter(|name| !name.is_empty()) else {
            continue;
        };
        let Some(created_raw) = parts.next() else {
            continue;
        };
        let Some(attached_raw) = parts.next() else {
            continue;
        };
        let activity_raw = parts.next().unwrap_or_default();
        let path_raw = parts.next().unwrap_or_default();

        sessions.push(TmuxSession {
            name: name.to_string(),
            created_at: created_raw.parse::<i64>().unwrap_or_default(),
            attached: attached_raw.trim() != "0" && !attached_raw.trim().is_empty(),
            activity_at: activity_raw.parse::<i64>().unwrap_or_default(),
            path: PathBuf::from(path_raw),
        });
    }

    sessions
}

pub fn tmux_create_session(
    session_name: &str,
    working_dir: &Path,
    command: Option<&str>,
) -> Result<()> {
    let mut args = new_session_args(session_name, working_dir);
    if let Some(command) = command.filter(|command| !command.trim().is_empty()) {
        args.push(command.to_string());
    }

    let output = tmux_command()
        .args(args)
        .output()
        .context("failed to run tmux new-session")?;
    ensure_success(&output, "new-session")
}

pub fn tmux_kill_session(session_name: &str) -> Result<()> {
    let output = tmux_command()
        .args(kill_session_args(session_name))
        .output()
        .context("failed to run tmux kill-session")?;
    ensure_success(&output, "kill-session")
}

pub fn tmux_rename_session(session_name: &str, new_name: &str) -> Result<()> {
    let output = tmux_command()
        .args(rename_session_args(session_name, new_name))
        .output()
        .context("failed to run tmux rename-session")?;
    ensure_success(&output, "rename-session")
}

/// Command that hands the terminal over to a session. Blocks until the user
/// detaches (or returns immediately when switching clients inside tmux).
pub fn tmux_attach_command(session_name: &str) -> Command {
    let mut cmd = tmux_command();
    if inside_tmux() {
        cmd.args(switch_client_args(session_name));
    } else {
        cmd.args(attach_session_args(session_name));
    }
    cmd
}

pub fn tmux_capture_pane(session_name: &str, lines: usize) -> Result<String> {
    let output = tmux_command()
        .args(capture_pane_args(session_name, lines))
        .output()
        .context("failed to run tmux capture-pane")?;
    ensure_success(&output, "capture-pane")?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub fn tmux_get_pane_pid(session_name: &str) -> Option<u32> {
    let output = tmux_command()
        .args(list_panes_args(session_name))
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())?
        .parse()
        .ok()
}

pub fn tmux_broadcast_to_sessions(
    sessions: &[String],
    message: &str,
    display_duration_ms: u64,
) -> Result<()> {
    let mut failures = Vec::new();
    for session in sessions {
        let output = tmux_command()
            .args(display_message_args(session, message, display_duration_ms))
            .output()
            .context("failed to run tmux display-message")?;
        if !output.status.success() {
            failures.push(session.clone());
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        bail!("tmux display-message failed for {}", failures.join(", "))
    }
}

pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

/// Maps a free-form name onto characters tmux accepts in session names.
pub fn sanitize_session_name(input: &str) -> String {
    let mut name: String = input
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    name.truncate(200);
    name
}

fn tmux_command() -> Command {
    let mut cmd = Command::new("tmux");
    let socket = tmux_socket();
    if !socket.is_empty() {
        cmd.args(["-L", socket.as_str()]);
    }
    cmd
}

fn tmux_socket() -> String {
    env::var(SOCKET_ENV)
        .map(|socket| socket.trim().to_string())
        .unwrap_or_default()
}

pub(crate) fn list_sessions_args() -> Vec<String> {
    vec![
        "list-sessions".to_string(),
        "-F".to_string(),
        LIST_SESSIONS_FORMAT.to_string(),
    ]
}

pub(crate) fn new_session_args(session_name: &str, working_dir: &Path) -> Vec<String> {
    vec![
        "new-session".to_string(),
        "-d".to_string(),
        "-s".to_string(),
        session_name.to_string(),
        "-c".to_string(),
        working_dir.to_string_lossy().to_string(),
    ]
}

pub(crate) fn kill_session_args(session_name: &str) -> Vec<String> {
    vec![
        "kill-session".to_string(),
        "-t".to_string(),
        exact_target(session_name),
    ]
}

pub(crate) fn rename_session_args(session_name: &str, new_name: &str) -> Vec<String> {
    vec![
        "rename-session".to_string(),
        "-t".to_string(),
        exact_target(session_name),
        new_name.to_string(),
    ]
}

pub(crate) fn attach_session_args(session_name: &str) -> Vec<String> {
    vec![
        "attach-session".to_string(),
        "-t".to_string(),
        exact_target(session_name),
    ]
}

fn switch_client_args(session_name: &str) -> Vec<String> {
    vec![
        "switch-client".to_string(),
        "-t".to_string(),
        exact_target(session_name),
    ]
}

pub(crate) fn capture_pane_args(session_name: &str, lines: usize) -> Vec<String> {
    vec![
        "capture-pane".to_string(),
        "-t".to_string(),
        exact_target(session_name),
        "-p".to_string(),
        "-J".to_string(),
        "-S".to_string(),
        format!("-{lines}"),
    ]
}

fn list_panes_args(session_name: &str) -> Vec<String> {
    vec![
        "list-panes".to_string(),
        "-t".to_string(),
        exact_target(session_name),
        "-F".to_string(),
        "#{pane_pid}".to_string(),
    ]
}

fn display_message_args(session_name: &str, message: &str, duration_ms: u64) -> Vec<String> {
    vec![
        "display-message".to_string(),
        "-d".to_string(),
        duration_ms.to_string(),
        "-t".to_string(),
        exact_target(session_name),
        message.to_string(),
    ]
}

/// `=name` stops tmux from prefix-matching another session.
fn exact_target(session_name: &str) -> String {
    format!("={session_name}")
}

fn ensure_success(output: &Output, operation: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    bail!("tmux {operation} failed: {}", stderr.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_sessions() {
        let stdout = "api\t1700000000\t1\t1700000500\t/work/api\nweb\t1700000100\t0\t\t/work/web\n\n";
        let sessions = parse_list_sessions(stdout);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].name, "api");
        assert!(sessions[0].attached);
        assert_eq!(sessions[0].activity_at, 1_700_000_500);
        assert_eq!(sessions[0].path, PathBuf::from("/work/api"));
        assert!(!sessions[1].attached);
        assert_eq!(sessions[1].activity_at, 0);
    }

    #[test]
    fn test_parse_list_sessions_skips_malformed_lines() {
        let sessions = parse_list_sessions("only-name\n\t1\t0\nok\t1\t0");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "ok");
        assert_eq!(sessions[0].path, PathBuf::new());
    }

    #[test]
    fn test_last_activity_falls_back_to_created() {
        let session = TmuxSession {
            name: "a".to_string(),
            created_at: 1_700_000_000,
            attached: false,
            activity_at: 0,
            path: PathBuf::new(),
        };
        assert_eq!(session.last_activity().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_sanitize_session_name() {
        assert_eq!(sanitize_session_name(" fix/login bug "), "fix-login-bug");
        assert_eq!(sanitize_session_name("a.b:c"), "a-b-c");
        assert_eq!(sanitize_session_name("keep_me-1"), "keep_me-1");
    }

    #[test]
    fn test_targets_are_exact() {
        assert_eq!(kill_session_args("api")[2], "=api");
        assert_eq!(rename_session_args("api", "api2")[3], "api2");
        assert_eq!(capture_pane_args("api", 200).last().map(String::as_str), Some("-200"));
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m plain"), "red plain");
    }

    #[test]
    fn test_no_server_error_detection() {
        assert!(is_no_server_error("no server running on /tmp/tmux-1000/default"));
        assert!(!is_no_server_error("can't find session: nope"));
    }
}
