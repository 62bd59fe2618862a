//! 日志初始化和配置模块
//!
//! 这个模块提供了统一的日志初始化功能，使用 tracing 库。
//! 默认配置：info 级别，输出到控制台，可选按天滚动写入日志目录。

use std::io;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::SystemTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// 日志配置结构体
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: Level,
    /// 是否输出到控制台
    pub enable_stdout: bool,
    /// 日志文件目录，`None` 表示不写文件
    pub log_dir: Option<String>,
}

impl LogConfig {
    /// 创建新的日志配置，使用默认级别
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置日志级别
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// 设置日志文件目录
    pub fn log_dir<S: Into<String>>(mut self, dir: S) -> Self {
        let dir = dir.into();
        self.log_dir = if dir.is_empty() { None } else { Some(dir) };
        self
    }

    /// 设置是否输出到控制台
    pub fn enable_stdout(mut self, enable: bool) -> Self {
        self.enable_stdout = enable;
        self
    }

    /// 从配置文件中的日志段构建
    pub fn from_config(config: &crate::config::LogConfig) -> LogResult<Self> {
        let level = parse_level(&config.level)?;
        Ok(Self::new()
            .level(level)
            .enable_stdout(config.enable_stdout)
            .log_dir(config.log_dir.clone()))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: Level::INFO, enable_stdout: true, log_dir: None }
    }
}

/// 将字符串解析为日志级别
pub fn parse_level(level: &str) -> LogResult<Level> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(LogError::Config(format!("无效的日志级别: {other}"))),
    }
}

/// 自动初始化日志系统（仅初始化一次）
static INIT_LOGGER: Once = Once::new();

/// 确保日志系统已初始化
///
/// 首次调用时使用默认配置初始化，后续调用不会重复初始化。
/// 初始化失败（比如已被宿主程序初始化）时安静地忽略。
pub(crate) fn ensure_logger_initialized() {
    INIT_LOGGER.call_once(|| {
        let _ = init_default_logging();
    });
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("IO错误: {0}")]
    Io(#[from] io::Error),
    #[error("日志配置错误: {0}")]
    Config(String),
    #[error("日志初始化错误: {0}")]
    Init(String),
}

/// 日志初始化结果
pub type LogResult<T> = Result<T, LogError>;

/// 初始化日志系统
///
/// - `RUST_LOG` 环境变量优先于配置的级别
/// - 控制台输出带线程信息，便于观察分片工作线程
/// - 配置了 `log_dir` 时按天滚动写入 `slowlog.*` 文件
///
/// # Examples
///
/// ```no_run
/// use slowlog_analysis::logging::{init_logging, LogConfig};
/// use tracing::Level;
///
/// let config = LogConfig::new().level(Level::DEBUG).log_dir("logs");
/// init_logging(config).unwrap();
/// ```
pub fn init_logging(config: LogConfig) -> LogResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let console_layer = config.enable_stdout.then(|| {
        fmt::layer()
            .with_writer(io::stderr)
            .with_timer(SystemTime)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_ansi(true)
            .boxed()
    });

    let mut guard = None;
    let file_layer = match config.log_dir.as_deref() {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "slowlog");
            let (non_blocking, g) = tracing_appender::non_blocking(file_appender);
            guard = Some(g);
            Some(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_timer(SystemTime)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_ansi(false) // 文件中不使用颜色
                    .boxed(),
            )
        }
        None => None,
    };

    let subscriber = Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);

    match subscriber.try_init() {
        Ok(_) => {
            // appender 的 guard 必须存活到进程结束
            if let Some(g) = guard {
                std::mem::forget(g);
            }
            tracing::info!(
                "日志系统初始化完成 - 级别: {}, 日志目录: {}",
                config.level,
                config.log_dir.as_deref().unwrap_or("(无)")
            );
            Ok(())
        }
        // 已经初始化过了，这不是错误
        Err(_) => Ok(()),
    }
}

/// 使用默认配置初始化日志系统
pub fn init_default_logging() -> LogResult<()> {
    init_logging(LogConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("warn").unwrap(), Level::WARN);
        assert!(parse_level("verbose").is_err());
    }

    #[test]
    fn test_log_dir_empty_means_none() {
        let config = LogConfig::new().log_dir("");
        assert!(config.log_dir.is_none());
        let config = LogConfig::new().log_dir("logs");
        assert_eq!(config.log_dir.as_deref(), Some("logs"));
    }

    #[test]
    fn test_init_twice_is_ok() {
        let config = LogConfig::new().enable_stdout(false);
        assert!(init_logging(config.clone()).is_ok());
        assert!(init_logging(config).is_ok());
    }
}
