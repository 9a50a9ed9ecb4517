// LogManager Service
// Retention cleanup and tail reading for the multitrack output log files

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Delete `.log` files older than `retention_days`; zero keeps everything
pub fn prune_logs(log_dir: &Path, retention_days: u32) -> Result<usize, String> {
    if retention_days == 0 || !log_dir.exists() {
        return Ok(0);
    }

    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(retention_days as u64 * SECONDS_PER_DAY))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let entries = fs::read_dir(log_dir).map_err(|e| format!("Failed to read log dir: {e}"))?;
    let mut removed = 0;

    for (path, modified) in entries.flatten().filter_map(log_entry) {
        if modified < cutoff {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to remove old log {}: {e}", path.display()),
            }
        }
    }

    Ok(removed)
}

/// Last `max_lines` non-empty lines of the newest log file
pub fn read_recent_logs(log_dir: &Path, max_lines: usize) -> Result<Vec<String>, String> {
    match find_latest_log_file(log_dir) {
        Some(path) => read_log_lines(&path, max_lines),
        None => Ok(Vec::new()),
    }
}

fn log_entry(entry: fs::DirEntry) -> Option<(PathBuf, SystemTime)> {
    let path = entry.path();
    if path.extension().and_then(|ext| ext.to_str()) != Some("log") {
        return None;
    }
    let modified = entry
        .metadata()
        .and_then(|metadata| metadata.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH);
    Some((path, modified))
}

fn find_latest_log_file(log_dir: &Path) -> Option<PathBuf> {
    fs::read_dir(log_dir)
        .ok()?
        .flatten()
        .filter_map(log_entry)
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path)
}

fn read_log_lines(path: &Path, max_lines: usize) -> Result<Vec<String>, String> {
    let bytes = fs::read(path).map_err(|e| format!("Failed to read log file: {e}"))?;
    let content = String::from_utf8_lossy(&bytes);
    let lines: Vec<String> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();

    let start = lines.len().saturating_sub(max_lines);
    Ok(lines[start..].to_vec())
}
