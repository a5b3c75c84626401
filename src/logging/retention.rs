//! 历史日志的保留策略: 过期删除, 非当天文件 gzip 压缩.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// 一次清理的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// 删除的过期文件数
    pub removed: usize,
    /// 新压缩的文件数
    pub compressed: usize,
}

pub(super) fn cleanup_logs(
    directory: &Path,
    prefix: &str,
    retention_days: i64,
    compress_history: bool,
    today: NaiveDate,
) -> Result<RetentionReport> {
    let mut report = RetentionReport::default();
    if !directory.exists() {
        return Ok(report);
    }

    let cutoff = today - ChronoDuration::days(retention_days);
    let entries = fs::read_dir(directory)
        .with_context(|| format!("读取日志目录失败, path={}", directory.display()))?;

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let file_path = entry.path();

        let Some((date, compressed)) = parse_rotated_log_name(&file_name, prefix) else {
            continue;
        };

        if date < cutoff {
            match fs::remove_file(&file_path) {
                Ok(()) => report.removed += 1,
                Err(err) => warn!("删除过期日志失败, path={}: {}", file_path.display(), err),
            }
            continue;
        }

        if compress_history && !compressed && date < today {
            match compress_to_gz(&file_path) {
                Ok(true) => report.compressed += 1,
                Ok(false) => {}
                Err(err) => warn!("压缩日志失败, path={}: {:#}", file_path.display(), err),
            }
        }
    }

    Ok(report)
}

/// 压缩为同名 `.gz` 并删除原文件; 目标已存在时跳过并返回 false
fn compress_to_gz(path: &Path) -> Result<bool> {
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    if gz_path.exists() {
        return Ok(false);
    }

    let mut input =
        File::open(path).with_context(|| format!("打开待压缩日志失败, path={}", path.display()))?;
    let output = File::create(&gz_path)
        .with_context(|| format!("创建压缩日志失败, path={}", gz_path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::default());

    let mut buf = [0u8; 8 * 1024];
    loop {
        let read = input.read(&mut buf)?;
        if read == 0 {
            break;
        }
        encoder.write_all(&buf[..read])?;
    }

    encoder.finish()?;
    fs::remove_file(path)
        .with_context(|| format!("删除已压缩日志失败, path={}", path.display()))?;
    Ok(true)
}

/// 解析 `<前缀>.<日期>.log[.gz]`, 返回日期与是否已压缩
fn parse_rotated_log_name(file_name: &str, prefix: &str) -> Option<(NaiveDate, bool)> {
    let rest = file_name.strip_prefix(prefix)?.strip_prefix('.')?;

    if let Some(date_part) = rest.strip_suffix(".log") {
        return parse_date(date_part).map(|date| (date, false));
    }
    if let Some(date_part) = rest.strip_suffix(".log.gz") {
        return parse_date(date_part).map(|date| (date, true));
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

    #[test]
    fn test_parse_rotated_log_name() {
        let prefix = "vp8dec";

        let parsed = parse_rotated_log_name("vp8dec.2026-02-06.log", prefix);
        assert_eq!(parsed, NaiveDate::from_ymd_opt(2026, 2, 6).map(|d| (d, false)));

        let parsed = parse_rotated_log_name("vp8dec.2026-02-06.log.gz", prefix);
        assert_eq!(parsed, NaiveDate::from_ymd_opt(2026, 2, 6).map(|d| (d, true)));

        assert!(parse_rotated_log_name("vp8dec.log", prefix).is_none());
        assert!(parse_rotated_log_name("other.2026-02-06.log", prefix).is_none());
        assert!(parse_rotated_log_name("vp8dec.2026-2-6.log", prefix).is_none());
    }
}
