// LogManager Service
// Startup rotation and retention for the server log files

use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Active log file inside the log directory
pub const LOG_FILE_NAME: &str = "camrelay-server.log";
const LOG_STEM: &str = "camrelay-server";

/// Move a non-empty active log aside as `camrelay-server.<timestamp>.log`,
/// stamped with its last write time. Returns the rotated path, if any.
pub fn rotate_log(log_dir: &Path) -> Result<Option<PathBuf>, String> {
    let active = log_dir.join(LOG_FILE_NAME);
    let Ok(metadata) = fs::metadata(&active) else {
        return Ok(None);
    };
    if metadata.len() == 0 {
        return Ok(None);
    }

    let written: DateTime<Local> = metadata
        .modified()
        .map(DateTime::from)
        .unwrap_or_else(|_| Local::now());
    let stamp = written.format("%Y%m%d-%H%M%S").to_string();

    let mut rotated = log_dir.join(format!("{LOG_STEM}.{stamp}.log"));
    let mut suffix = 1;
    while rotated.exists() {
        rotated = log_dir.join(format!("{LOG_STEM}.{stamp}-{suffix}.log"));
        suffix += 1;
    }

    fs::rename(&active, &rotated).map_err(|e| format!("Failed to rotate log: {e}"))?;
    Ok(Some(rotated))
}

fn is_rotated_log(name: &str) -> bool {
    name != LOG_FILE_NAME
        && name.ends_with(".log")
        && name
            .strip_prefix(LOG_STEM)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Delete rotated logs older than `retention_days`; 0 keeps everything
pub fn prune_logs(log_dir: &Path, retention_days: u32) -> Result<usize, String> {
    if retention_days == 0 {
        return Ok(0);
    }

    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    prune_logs_before(log_dir, cutoff)
}

fn prune_logs_before(log_dir: &Path, cutoff: SystemTime) -> Result<usize, String> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let entries = fs::read_dir(log_dir).map_err(|e| format!("Failed to read log dir: {e}"))?;
    let mut removed = 0;

    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_str().is_some_and(is_rotated_log) {
            continue;
        }

        let modified = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if modified < cutoff && fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rotation_moves_active_log_aside() {
        let temp = TempDir::new().unwrap();
        let active = temp.path().join(LOG_FILE_NAME);
        fs::write(&active, "line\n").unwrap();

        let rotated = rotate_log(temp.path()).unwrap().unwrap();
        assert!(!active.exists());
        let name = rotated.file_name().unwrap().to_str().unwrap().to_string();
        assert!(is_rotated_log(&name), "{name}");
        assert_eq!(fs::read_to_string(&rotated).unwrap(), "line\n");

        // Same timestamp twice gets a suffix instead of overwriting
        fs::write(&active, "again\n").unwrap();
        let filetime = fs::metadata(&rotated).unwrap().modified().unwrap();
        let file = fs::OpenOptions::new().write(true).open(&active).unwrap();
        file.set_modified(filetime).unwrap();
        let second = rotate_log(temp.path()).unwrap().unwrap();
        assert_ne!(second, rotated);
        assert_eq!(fs::read_to_string(&rotated).unwrap(), "line\n");
    }

    #[test]
    fn test_empty_or_missing_log_is_not_rotated() {
        let temp = TempDir::new().unwrap();
        assert_eq!(rotate_log(temp.path()).unwrap(), None);

        fs::write(temp.path().join(LOG_FILE_NAME), "").unwrap();
        assert_eq!(rotate_log(temp.path()).unwrap(), None);
        assert!(temp.path().join(LOG_FILE_NAME).exists());
    }

    #[test]
    fn test_only_rotated_logs_are_pruned() {
        let temp = TempDir::new().unwrap();
        for name in [
            LOG_FILE_NAME,
            "camrelay-server.20260101-120000.log",
            "camrelay-server.20260102-120000-1.log",
            "mediamtx.log",
            "camrelay-serverX.log",
            "notes.txt",
        ] {
            fs::write(temp.path().join(name), "line\n").unwrap();
        }

        let future = SystemTime::now() + Duration::from_secs(3600);
        assert_eq!(prune_logs_before(temp.path(), future).unwrap(), 2);
        assert!(temp.path().join(LOG_FILE_NAME).exists());
        assert!(temp.path().join("mediamtx.log").exists());
        assert!(temp.path().join("camrelay-serverX.log").exists());
        assert!(temp.path().join("notes.txt").exists());
    }

    #[test]
    fn test_fresh_logs_are_kept() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("camrelay-server.20260101-120000.log"), "line\n").unwrap();
        assert_eq!(prune_logs(temp.path(), 30).unwrap(), 0);
    }

    #[test]
    fn test_zero_retention_disables_pruning() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("camrelay-server.20200101-000000.log"), "line\n").unwrap();
        assert_eq!(prune_logs(temp.path(), 0).unwrap(), 0);
    }

    #[test]
    fn test_missing_dir_is_not_an_error() {
        let temp = TempDir::new().unwrap();
        assert_eq!(prune_logs(&temp.path().join("absent"), 7).unwrap(), 0);
    }
}
