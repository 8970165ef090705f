//! Agent status files written by agent hooks, one JSON document per session.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tmux::TmuxSession;
use crate::types::{Origin, Session, SessionStatus, TokenMetrics};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusRecord {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
}

impl AgentStatusRecord {
    fn metrics(&self) -> Option<TokenMetrics> {
        if self.tokens.is_none() && self.cost_usd.is_none() {
            return None;
        }
        Some(TokenMetrics {
            tokens: self.tokens.unwrap_or_default(),
            cost_usd: self.cost_usd.unwrap_or_default(),
        })
    }
}

pub fn read_status_dir(dir: &Path) -> Result<HashMap<String, AgentStatusRecord>> {
    let mut records = HashMap::new();
    if !dir.exists() {
        return Ok(records);
    }

    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read status directory '{}'", dir.display()))?;
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(session) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let Ok(contents) = fs::read_to_string(&path) else {
            continue;
        };
        match serde_json::from_str::<AgentStatusRecord>(&contents) {
            Ok(record) => {
                records.insert(session.to_string(), record);
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "skipping unreadable status file");
            }
        }
    }
    Ok(records)
}

/// Parses `name<TAB>json` lines, the shape produced by the remote status dump.
pub fn parse_status_lines(stdout: &str) -> HashMap<String, AgentStatusRecord> {
    stdout
        .lines()
        .filter_map(|line| {
            let (name, json) = line.split_once('\t')?;
            let record = serde_json::from_str::<AgentStatusRecord>(json.trim()).ok()?;
            Some((name.trim().to_string(), record))
        })
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

pub fn remove_status_file(dir: &Path, session_name: &str) -> Result<()> {
    let path = dir.join(format!("{session_name}.json"));
    if !path.exists() {
        return Ok(());
    }
    fs::remove_file(&path)
        .with_context(|| format!("failed to remove status file '{}'", path.display()))
}

pub fn rename_status_file(dir: &Path, session_name: &str, new_name: &str) -> Result<()> {
    let from = dir.join(format!("{session_name}.json"));
    if !from.exists() {
        return Ok(());
    }
    let to = dir.join(format!("{new_name}.json"));
    fs::rename(&from, &to)
        .with_context(|| format!("failed to rename status file '{}'", from.display()))
}

/// Joins tmux sessions with their status records into entities for `origin`.
pub fn build_sessions(
    origin: &Origin,
    tmux_sessions: Vec<TmuxSession>,
    records: &HashMap<String, AgentStatusRecord>,
    normalize: &dyn Fn(&str) -> SessionStatus,
) -> Vec<Session> {
    tmux_sessions
        .into_iter()
        .map(|tmux_session| {
            let mut session = Session::new(
                origin.clone(),
                tmux_session.name.clone(),
                tmux_session.path.clone(),
            );
            session.attached = tmux_session.attached;
            session.last_activity = tmux_session.last_activity();

            if let Some(record) = records.get(&tmux_session.name) {
                session.status = normalize(&record.status);
                session.message = record
                    .message
                    .as_ref()
                    .map(|message| message.trim().to_string())
                    .filter(|message| !message.is_empty());
                session.metrics = record.metrics();
                if let Some(updated_at) = record.updated_at
                    && updated_at > session.last_activity
                {
                    session.last_activity = updated_at;
                }
            }
            session
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn tmux_session(name: &str, activity_at: i64) -> TmuxSession {
        TmuxSession {
            name: name.to_string(),
            created_at: 1,
            attached: false,
            activity_at,
            path: PathBuf::from(format!("/work/{name}")),
        }
    }

    #[test]
    fn test_read_status_dir_skips_non_json_and_garbage() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(
            dir.path().join("api.json"),
            r#"{"status":"waiting","message":"Approve edit?","tokens":1200,"cost_usd":0.5}"#,
        )
        .expect("write status");
        fs::write(dir.path().join("web.json"), "not json").expect("write garbage");
        fs::write(dir.path().join("notes.txt"), "{}").expect("write txt");

        let records = read_status_dir(dir.path()).expect("read dir");
        assert_eq!(records.len(), 1);
        let record = &records["api"];
        assert_eq!(record.status, "waiting");
        assert_eq!(record.tokens, Some(1200));
    }

    #[test]
    fn test_read_missing_status_dir_is_empty() {
        let dir = TempDir::new().expect("temp dir");
        let records = read_status_dir(&dir.path().join("absent")).expect("read dir");
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_status_lines() {
        let stdout = "api\t{\"status\":\"done\"}\nbroken\t{\n\t{\"status\":\"done\"}\n";
        let records = parse_status_lines(stdout);
        assert_eq!(records.len(), 1);
        assert_eq!(records["api"].status, "done");
    }

    #[test]
    fn test_build_sessions_joins_records() {
        let mut records = HashMap::new();
        records.insert(
            "api".to_string(),
            AgentStatusRecord {
                status: "needs_permission".to_string(),
                message: Some("  run rm?  ".to_string()),
                updated_at: DateTime::<Utc>::from_timestamp(5_000, 0),
                tokens: Some(10),
                cost_usd: None,
            },
        );

        let sessions = build_sessions(
            &Origin::Local,
            vec![tmux_session("api", 100), tmux_session("web", 100)],
            &records,
            &SessionStatus::from_raw,
        );

        assert_eq!(sessions[0].status, SessionStatus::NeedsPermission);
        assert_eq!(sessions[0].message.as_deref(), Some("run rm?"));
        assert_eq!(sessions[0].last_activity.timestamp(), 5_000);
        assert_eq!(sessions[0].metrics.map(|m| m.tokens), Some(10));
        assert_eq!(sessions[1].status, SessionStatus::Unknown);
        assert_eq!(sessions[1].last_activity.timestamp(), 100);
        assert!(sessions[1].metrics.is_none());
    }

    #[test]
    fn test_remove_and_rename_status_file() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join("a.json"), "{}").expect("write");
        rename_status_file(dir.path(), "a", "b").expect("rename");
        assert!(dir.path().join("b.json").exists());
        remove_status_file(dir.path(), "b").expect("remove");
        assert!(!dir.path().join("b.json").exists());
        remove_status_file(dir.path(), "missing").expect("missing is fine");
    }
}
