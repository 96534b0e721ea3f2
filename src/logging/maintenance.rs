//! 历史日志清理: 删除超过保留天数的日志, 压缩更早日期的日志.

use super::LoggingConfig;
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

pub(super) fn cleanup_logs(config: &LoggingConfig) -> Result<()> {
    let Some(directory) = config.directory.as_deref().map(Path::new) else {
        return Ok(());
    };
    if !directory.exists() {
        return Ok(());
    }

    let today = Local::now().date_naive();
    let cutoff = today - ChronoDuration::days(config.retention_days);

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let file_path = entry.path();

        let Some((date, compressed)) = parse_rotated_log_name(&file_name, &config.file_prefix)
        else {
            continue;
        };

        if date < cutoff {
            if let Err(err) = fs::remove_file(&file_path) {
                warn!("删除过期日志失败, path={}: {}", file_path.display(), err);
            }
            continue;
        }

        if config.compress_history && !compressed && date < today {
            if let Err(err) = compress_to_gz(&file_path) {
                warn!("压缩历史日志失败: {:#}", err);
            }
        }
    }

    Ok(())
}

fn compress_to_gz(path: &Path) -> Result<()> {
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    if gz_path.exists() {
        return Ok(());
    }

    let mut input =
        File::open(path).with_context(|| format!("打开待压缩日志失败, path={}", path.display()))?;
    let output = File::create(&gz_path)
        .with_context(|| format!("创建压缩日志失败, path={}", gz_path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;

    fs::remove_file(path)
        .with_context(|| format!("删除已压缩日志失败, path={}", path.display()))?;
    Ok(())
}

fn parse_rotated_log_name(file_name: &str, prefix: &str) -> Option<(NaiveDate, bool)> {
    let with_dot = file_name.strip_prefix(prefix)?.strip_prefix('.')?;

    if let Some(date_part) = with_dot.strip_suffix(".log") {
        return Some((parse_date(date_part)?, false));
    }
    if let Some(date_part) = with_dot.strip_suffix(".log.gz") {
        return Some((parse_date(date_part)?, true));
    }
    None
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::build_current_log_path;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir) -> LoggingConfig {
        LoggingConfig {
            directory: Some(dir.path().to_string_lossy().to_string()),
            file_prefix: "tao-lc3".to_string(),
            retention_days: 7,
            compress_history: true,
            ..LoggingConfig::default()
        }
    }

    #[test]
    fn test_parse_rotated_log_name() {
        let prefix = "tao-lc3";

        let parsed = parse_rotated_log_name("tao-lc3.2026-02-06.log", prefix);
        assert_eq!(parsed, NaiveDate::from_ymd_opt(2026, 2, 6).map(|d| (d, false)));

        let parsed = parse_rotated_log_name("tao-lc3.2026-02-06.log.gz", prefix);
        assert_eq!(parsed, NaiveDate::from_ymd_opt(2026, 2, 6).map(|d| (d, true)));

        assert!(parse_rotated_log_name("tao-lc3.log", prefix).is_none());
        assert!(parse_rotated_log_name("other.2026-02-06.log", prefix).is_none());
    }

    #[test]
    fn test_清理过期与压缩历史日志() {
        let temp_dir = match TempDir::new() {
            Ok(temp_dir) => temp_dir,
            Err(err) => panic!("创建临时目录失败: {}", err),
        };
        let config = config_for(&temp_dir);
        let dir = temp_dir.path();
        let today = Local::now().date_naive();

        let expired = build_current_log_path(dir, "tao-lc3", today - ChronoDuration::days(30));
        let yesterday = build_current_log_path(dir, "tao-lc3", today - ChronoDuration::days(1));
        let current = build_current_log_path(dir, "tao-lc3", today);
        for path in [&expired, &yesterday, &current] {
            fs::write(path, b"log line\n").unwrap();
        }

        cleanup_logs(&config).unwrap();

        assert!(!expired.exists(), "过期日志应被删除");
        assert!(!yesterday.exists(), "历史日志应被压缩");
        assert!(PathBuf::from(format!("{}.gz", yesterday.display())).exists());
        assert!(current.exists(), "当天日志应保留");
    }
}
