use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::types::{PrCheck, PrCheckState, VcsInfo};

/// Separates `git status` output from the last commit subject in the combined
/// script run over ssh.
pub const LOG_SEPARATOR: &str = "--session-deck-log--";

/// Shell snippet producing the combined output `parse_vcs_output` expects.
pub fn vcs_script(dir: &str) -> String {
    let quoted = shell_quote(dir);
    format!(
        "cd {quoted} && git status --porcelain=v2 --branch && echo {LOG_SEPARATOR} && (git log -1 --format=%s 2>/dev/null || true)"
    )
}

pub fn git_vcs_info(dir: &Path) -> Result<VcsInfo> {
    let status = run_git_output(dir, ["status", "--porcelain=v2", "--branch"])
        .context("failed to read git status")?;
    let mut info = parse_status_porcelain(&String::from_utf8_lossy(&status.stdout));

    if let Ok(log) = run_git_output(dir, ["log", "-1", "--format=%s"]) {
        info.last_commit = non_empty(String::from_utf8_lossy(&log.stdout).trim());
    }

    Ok(info)
}

pub fn parse_vcs_output(stdout: &str) -> VcsInfo {
    let (status, log) = match stdout.split_once(LOG_SEPARATOR) {
        Some((status, log)) => (status, log),
        None => (stdout, ""),
    };
    let mut info = parse_status_porcelain(status);
    info.last_commit = non_empty(log.trim());
    info
}

pub fn parse_status_porcelain(output: &str) -> VcsInfo {
    let mut info = VcsInfo::default();
    for line in output.lines() {
        if let Some(head) = line.strip_prefix("# branch.head ") {
            let head = head.trim();
            if head != "(detached)" {
                info.branch = non_empty(head);
            }
        } else if let Some(ab) = line.strip_prefix("# branch.ab ") {
            for part in ab.split_whitespace() {
                if let Some(ahead) = part.strip_prefix('+') {
                    info.ahead = ahead.parse().unwrap_or_default();
                } else if let Some(behind) = part.strip_prefix('-') {
                    info.behind = behind.parse().unwrap_or_default();
                }
            }
        } else if !line.starts_with('#') && !line.trim().is_empty() {
            info.changed_files += 1;
        }
    }
    info
}

#[derive(Debug, Deserialize)]
struct GhCheck {
    name: String,
    state: String,
    #[serde(default)]
    link: Option<String>,
}

pub fn gh_pr_checks(dir: &Path) -> Result<Vec<PrCheck>> {
    let output = Command::new("gh")
        .args(["pr", "checks", "--json", "name,state,link"])
        .current_dir(dir)
        .output()
        .with_context(|| format!("failed to run gh pr checks in {}", dir.display()))?;
    interpret_pr_checks(
        output.status.success(),
        &String::from_utf8_lossy(&output.stdout),
        &String::from_utf8_lossy(&output.stderr),
    )
}

/// Shell snippet running `gh pr checks` inside `dir`, for remote hosts.
pub fn pr_checks_script(dir: &str) -> String {
    format!(
        "cd {} && gh pr checks --json name,state,link",
        shell_quote(dir)
    )
}

/// Maps a finished `gh pr checks` run to its checks. No PR means no checks.
pub fn interpret_pr_checks(success: bool, stdout: &str, stderr: &str) -> Result<Vec<PrCheck>> {
    if !success {
        if stderr.contains("no pull requests found") || stderr.contains("no checks reported") {
            return Ok(Vec::new());
        }
        // gh exits non-zero while checks are pending or failing but still prints JSON
        if stdout.trim_start().starts_with('[') {
            return parse_pr_checks(stdout);
        }
        bail!("gh pr checks failed: {}", stderr.trim());
    }
    parse_pr_checks(stdout)
}

pub fn parse_pr_checks(json: &str) -> Result<Vec<PrCheck>> {
    let checks: Vec<GhCheck> =
        serde_json::from_str(json.trim()).context("failed to parse gh pr checks output")?;
    Ok(checks
        .into_iter()
        .map(|check| PrCheck {
            name: check.name,
            state: PrCheckState::from_raw(&check.state),
            url: check.link.filter(|link| !link.is_empty()),
        })
        .collect())
}

pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn run_git_output<I, S>(repo_path: &Path, args: I) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let args_vec: Vec<String> = args
        .into_iter()
        .map(|arg| arg.as_ref().to_string())
        .collect();
    let output = Command::new("git")
        .args(args_vec.iter().map(String::as_str))
        .current_dir(repo_path)
        .output()
        .with_context(|| {
            format!(
                "failed to run git command in {}: git {}",
                repo_path.display(),
                args_vec.join(" ")
            )
        })?;

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "git command failed in {}: git {}\nstderr: {}",
            repo_path.display(),
            args_vec.join(" "),
            stderr.trim()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "# branch.oid 1234\n# branch.head feature/x\n# branch.upstream origin/feature/x\n# branch.ab +3 -1\n1 .M N... 100644 100644 100644 a b src/lib.rs\n? notes.md\n";

    #[test]
    fn test_interpret_pr_checks_tolerates_failing_exit() {
        let json = r#"[{"name":"ci","state":"PENDING","link":""}]"#;
        let checks = interpret_pr_checks(false, json, "").unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].state, PrCheckState::Pending);
        assert_eq!(checks[0].url, None);

        let none = interpret_pr_checks(false, "", "no pull requests found for branch \"x\"").unwrap();
        assert!(none.is_empty());

        assert!(interpret_pr_checks(false, "", "authentication required").is_err());
    }

    #[test]
    fn test_parse_status_porcelain() {
        let info = parse_status_porcelain(STATUS);
        assert_eq!(info.branch.as_deref(), Some("feature/x"));
        assert_eq!(info.ahead, 3);
        assert_eq!(info.behind, 1);
        assert_eq!(info.changed_files, 2);
        assert_eq!(info.last_commit, None);
    }

    #[test]
    fn test_parse_status_detached_head() {
        let info = parse_status_porcelain("# branch.head (detached)\n");
        assert_eq!(info.branch, None);
    }

    #[test]
    fn test_parse_vcs_output_with_log() {
        let combined = format!("{STATUS}{LOG_SEPARATOR}\nFix the parser\n");
        let info = parse_vcs_output(&combined);
        assert_eq!(info.branch.as_deref(), Some("feature/x"));
        assert_eq!(info.last_commit.as_deref(), Some("Fix the parser"));
    }

    #[test]
    fn test_parse_pr_checks() {
        let json = r#"[{"name":"ci","state":"PENDING","link":""},{"name":"lint","state":"SUCCESS","link":"https://ci/1"}]"#;
        let checks = parse_pr_checks(json).expect("parse checks");
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].state, PrCheckState::Pending);
        assert_eq!(checks[0].url, None);
        assert_eq!(checks[1].state, PrCheckState::Passed);
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/a b/it's"), r"'/a b/it'\''s'");
        assert!(vcs_script("/w").starts_with("cd '/w' && git status"));
    }
}
