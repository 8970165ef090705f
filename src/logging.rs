//! File logging. The terminal belongs to the dashboard, so every event goes
//! to a per-run file under the local data directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_LEVEL_ENV: &str = "SESSION_DECK_LOG_LEVEL";
const LOG_FILE_PREFIX: &str = "session-deck-";
const KEEP_LOG_FILES: usize = 10;

/// Installs the global subscriber. `level` (from the command line) wins over
/// the environment, which wins over `warn`.
pub fn init_logging(level: Option<&str>) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let log_dir = get_log_directory()?;
    fs::create_dir_all(&log_dir)?;
    prune_old_logs(&log_dir, KEEP_LOG_FILES);

    let log_file_path = get_log_file_path(&log_dir);
    let file = fs::File::create(&log_file_path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    // The writer must outlive every thread that logs, including panics.
    std::mem::forget(guard);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(build_log_filter(level))
        .with(file_layer)
        .init();

    tracing::info!(
        version = env!("SESSION_DECK_BUILD_VERSION"),
        "Logging initialized. Log file: {}",
        log_file_path.display()
    );

    Ok(log_file_path)
}

fn build_log_filter(level: Option<&str>) -> EnvFilter {
    let from_env = std::env::var(LOG_LEVEL_ENV).ok();
    let level = level
        .and_then(normalize_log_level)
        .or_else(|| from_env.as_deref().and_then(normalize_log_level))
        .unwrap_or("warn");
    EnvFilter::new(format!("warn,session_deck={level}"))
}

fn normalize_log_level(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

pub fn get_log_directory() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let data_dir = dirs::data_local_dir().ok_or("Failed to determine local data directory")?;
    Ok(data_dir.join("session-deck").join("logs"))
}

pub fn get_log_file_path(log_dir: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    log_dir.join(format!("{LOG_FILE_PREFIX}{timestamp}.log"))
}

pub fn print_log_location(log_path: &Path) {
    println!();
    println!("  Log file: {}", log_path.display());
    println!();
}

fn log_files(log_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".log"))
        })
        .collect();
    // Timestamped names sort chronologically.
    files.sort();
    files
}

/// Deletes all but the `keep` newest log files.
pub fn prune_old_logs(log_dir: &Path, keep: usize) {
    let files = log_files(log_dir);
    let excess = files.len().saturating_sub(keep);
    for path in files.into_iter().take(excess) {
        if let Err(err) = fs::remove_file(&path) {
            eprintln!("warning: failed to remove old log {}: {err}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_log_directory() {
        let path = get_log_directory().unwrap();
        assert!(path.to_string_lossy().contains("session-deck"));
    }

    #[test]
    fn test_get_log_file_path() {
        let path = get_log_file_path(Path::new("/tmp/test-logs"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(LOG_FILE_PREFIX));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_normalize_log_level() {
        assert_eq!(normalize_log_level("TRACE"), Some("trace"));
        assert_eq!(normalize_log_level(" warning "), Some("warn"));
        assert_eq!(normalize_log_level("nope"), None);
    }

    #[test]
    fn test_prune_keeps_newest_logs() {
        let dir = TempDir::new().unwrap();
        for day in 1..=4 {
            let name = format!("{LOG_FILE_PREFIX}2026-01-0{day}_00-00-00.log");
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), "").unwrap();

        prune_old_logs(dir.path(), 2);

        let remaining: Vec<String> = log_files(dir.path())
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            remaining,
            vec![
                format!("{LOG_FILE_PREFIX}2026-01-03_00-00-00.log"),
                format!("{LOG_FILE_PREFIX}2026-01-04_00-00-00.log"),
            ]
        );
        assert!(dir.path().join("unrelated.txt").exists());
    }
}
