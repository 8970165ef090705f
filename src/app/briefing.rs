//! Full-screen project summary.

use std::collections::BTreeMap;
use std::path::Path;

use crate::types::{Session, SessionStatus, TaskStatus};

use super::App;

impl App {
    /// Plain lines for the briefing screen: status counts, sessions waiting on
    /// the user, then task totals for the focused project.
    pub fn briefing_lines(&self) -> Vec<String> {
        let project = self.focused_project();
        let in_scope = |session: &&Session| {
            project
                .as_deref()
                .is_none_or(|project: &Path| session.working_dir.starts_with(project))
        };
        let sessions: Vec<&Session> = self.sessions.iter().filter(in_scope).collect();

        let mut lines = Vec::new();
        lines.push(match &project {
            Some(project) => format!("Project {}", project.display()),
            None => "All sessions".to_string(),
        });
        lines.push(String::new());

        let counts = SessionStatus::ALL
            .iter()
            .map(|status| {
                let count = sessions.iter().filter(|s| s.status == *status).count();
                format!("{status} {count}")
            })
            .collect::<Vec<_>>()
            .join("  ");
        lines.push(format!("{} sessions: {counts}", sessions.len()));
        lines.push(String::new());

        let attention: Vec<&&Session> = sessions
            .iter()
            .filter(|session| session.status.needs_attention())
            .collect();
        if attention.is_empty() {
            lines.push("Nothing needs attention.".to_string());
        } else {
            lines.push("Needs attention:".to_string());
            for session in attention {
                let message = session.message.as_deref().unwrap_or("");
                lines.push(format!("  {} [{}] {message}", session.key(), session.status));
            }
        }

        if let Some(project) = &project {
            lines.push(String::new());
            let lookup = self.task_cache.lookup(project);
            match (lookup.value, lookup.error) {
                (Some(outcome), _) if outcome.is_configured() => {
                    let mut totals: BTreeMap<u8, (TaskStatus, usize)> = BTreeMap::new();
                    let mut total = 0;
                    for task in outcome.groups().iter().flat_map(|group| &group.tasks) {
                        total += 1;
                        totals
                            .entry(task.status.sort_rank())
                            .or_insert((task.status, 0))
                            .1 += 1;
                    }
                    let summary = totals
                        .values()
                        .map(|(status, count)| format!("{} {count}", status.as_str()))
                        .collect::<Vec<_>>()
                        .join("  ");
                    lines.push(format!(
                        "{} groups, {total} tasks: {summary}",
                        outcome.groups().len()
                    ));
                }
                (Some(_), _) => lines.push(
                    "No task provider. Add .session-deck/tasks.toml with a command.".to_string(),
                ),
                (None, Some(error)) => lines.push(format!("Task provider failed: {error}")),
                (None, None) => lines.push("Loading tasks...".to_string()),
            }
        }
        lines
    }
}
