//! CPU and memory of the process running in a session's pane.

use std::process::Command;

use anyhow::{Context, Result, bail};

use crate::tmux::tmux_get_pane_pid;
use crate::types::ResourceUsage;

pub fn session_resource_usage(session_name: &str) -> Result<ResourceUsage> {
    let Some(pid) = tmux_get_pane_pid(session_name) else {
        bail!("no pane process for session {session_name}");
    };
    process_resource_usage(pid)
}

pub fn process_resource_usage(pid: u32) -> Result<ResourceUsage> {
    let output = Command::new("ps")
        .args(["-o", "%cpu=,rss=", "-p", &pid.to_string()])
        .output()
        .context("failed to run ps")?;
    if !output.status.success() {
        bail!("process {pid} is not running");
    }
    parse_ps_output(&String::from_utf8_lossy(&output.stdout))
        .with_context(|| format!("unexpected ps output for pid {pid}"))
}

pub fn parse_ps_output(stdout: &str) -> Result<ResourceUsage> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .context("empty ps output")?;
    let mut parts = line.split_whitespace();
    let cpu_percent = parts
        .next()
        .context("missing cpu column")?
        .replace(',', ".")
        .parse::<f32>()
        .context("invalid cpu column")?;
    let rss_kb = parts
        .next()
        .context("missing rss column")?
        .parse::<u64>()
        .context("invalid rss column")?;
    Ok(ResourceUsage {
        cpu_percent,
        rss_kb,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ps_output() {
        let usage = parse_ps_output("  12.5  204800\n").expect("parse ps");
        assert_eq!(usage.cpu_percent, 12.5);
        assert_eq!(usage.rss_kb, 204_800);
    }

    #[test]
    fn test_parse_ps_output_accepts_comma_decimal() {
        let usage = parse_ps_output("3,0 10").expect("parse ps");
        assert_eq!(usage.cpu_percent, 3.0);
    }

    #[test]
    fn test_parse_ps_output_rejects_garbage() {
        assert!(parse_ps_output("").is_err());
        assert!(parse_ps_output("abc 1").is_err());
        assert!(parse_ps_output("1.0").is_err());
    }
}
