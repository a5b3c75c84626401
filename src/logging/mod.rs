//! 日志系统.
//!
//! 控制台输出始终开启; 配置了目录时另写一份按日滚动的日志文件,
//! 文件名为 `<前缀>.<YYYY-MM-DD>.log` (UTC 日期). 解码器 crate 通过 `log` 宏输出,
//! 由订阅器的 `tracing-log` 桥接到这里.

use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

mod retention;

pub use retention::RetentionReport;

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 过滤指令, 与 `RUST_LOG` 语法相同, 例如 `info,vp8dec_codec=debug`
    #[serde(default = "default_level")]
    pub level: String,
    /// 日志文件目录, None 时只输出到控制台
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// 历史日志保留天数
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// 是否 gzip 压缩非当天的日志
    #[serde(default = "default_true")]
    pub compress_history: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "vp8dec".to_string()
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> i64 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            directory: None,
            file_prefix: default_file_prefix(),
            retention_days: default_retention_days(),
            compress_history: true,
        }
    }
}

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// 安装全局日志订阅器
///
/// 控制台过滤优先读取 `RUST_LOG`, 未设置时使用 `config.level`.
/// 进程内只能成功调用一次.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("无效的日志级别: {}", config.level))?,
    };
    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .event_format(ConsoleFormatter)
        .with_filter(console_filter);

    let file_layer = match &config.directory {
        Some(directory) => {
            let directory = Path::new(directory);
            std::fs::create_dir_all(directory)
                .with_context(|| format!("创建日志目录失败, path={}", directory.display()))?;
            maintain_log_directory(config)?;

            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .build(directory)
                .with_context(|| format!("创建日志文件失败, path={}", directory.display()))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            LOG_GUARD.set(guard).ok();

            let file_filter = EnvFilter::try_new(&config.level)
                .with_context(|| format!("无效的日志级别: {}", config.level))?;
            Some(
                fmt::Layer::default()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(FileFormatter)
                    .with_filter(file_filter),
            )
        }
        None => None,
    };

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("安装全局日志订阅器失败")?;
    Ok(())
}

/// 清理日志目录: 删除过期文件, 按配置压缩历史文件
///
/// 未配置目录时什么也不做.
pub fn maintain_log_directory(config: &LoggingConfig) -> Result<RetentionReport> {
    let Some(directory) = &config.directory else {
        return Ok(RetentionReport::default());
    };
    retention::cleanup_logs(
        Path::new(directory),
        &config.file_prefix,
        config.retention_days,
        config.compress_history,
        Utc::now().date_naive(),
    )
}

/// 指定日期的日志文件路径
pub fn log_file_path(directory: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}.{}.log", prefix, date.format("%Y-%m-%d")))
}

struct ConsoleFormatter;

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let meta = event.metadata();
        write!(
            writer,
            "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] ",
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis()
        )?;
        let color = match *meta.level() {
            tracing::Level::ERROR => "\x1b[31m",
            tracing::Level::WARN => "\x1b[33m",
            tracing::Level::INFO => "\x1b[32m",
            _ => "\x1b[34m",
        };
        write!(
            writer,
            "{}{:5}\x1b[0m {} > ",
            color,
            meta.level().to_string(),
            meta.target()
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let meta = event.metadata();
        write!(
            writer,
            "[{} {:5} {}:{}] ",
            now.format("%Y-%m-%d %H:%M:%S%.3f"),
            meta.level().to_string(),
            meta.file().unwrap_or("unknown"),
            meta.line().unwrap_or(0)
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
