//! 错误类型定义
//!
//! 这个模块定义了库中使用的所有错误类型，使用 thiserror 提供丰富的错误信息。
//! 只有致命错误会以 `Err` 形式跨越模块边界；单行解码失败、字段缺失、
//! 阈值过滤等可恢复情况都在本地吸收，只体现在运行计数器中。

/// 慢日志分析的结果类型
pub type Result<T> = std::result::Result<T, SlowlogError>;

/// 慢日志分析错误类型
#[derive(Debug, thiserror::Error)]
pub enum SlowlogError {
    /// IO错误（输入文件不存在、不可读，或输出文件写入失败）
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// 正则表达式错误（排除规则编译失败）
    #[error("正则表达式错误: {0}")]
    Regex(#[from] regex::Error),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 时间窗口选择器无效
    #[error("无效的时间窗口: {0}")]
    InvalidWindow(String),

    /// 运行被外部取消（停止标志或超时）
    #[error("运行已取消: {0}")]
    Cancelled(String),

    /// 导出错误
    #[error("导出器 {exporter} 失败: {message}")]
    Export { exporter: String, message: String },

    /// TOML 反序列化错误
    #[error("配置文件解析错误: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML 序列化错误
    #[error("配置文件序列化错误: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// JSON 序列化错误
    #[cfg(any(feature = "exporter-json", feature = "exporter-es"))]
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP 错误（Elasticsearch）
    #[cfg(feature = "exporter-es")]
    #[error("HTTP错误: {0}")]
    Http(#[from] reqwest::Error),

    /// 日志错误（仅在启用 logging feature 时可用）
    #[cfg(feature = "logging")]
    #[error("日志错误: {0}")]
    Log(#[from] crate::logging::LogError),

    /// 其他错误
    #[error("未知错误: {0}")]
    Other(String),
}

impl SlowlogError {
    /// 创建一个配置错误
    pub fn config_error<S: Into<String>>(message: S) -> Self {
        let message = message.into();
        #[cfg(feature = "logging")]
        {
            crate::logging::ensure_logger_initialized();
            tracing::error!("配置错误: {}", message);
        }
        Self::Config(message)
    }

    /// 创建一个时间窗口错误
    pub fn invalid_window<S: Into<String>>(selector: S) -> Self {
        let selector = selector.into();
        #[cfg(feature = "logging")]
        {
            crate::logging::ensure_logger_initialized();
            tracing::error!("无效的时间窗口: {}", selector);
        }
        Self::InvalidWindow(selector)
    }

    /// 创建一个取消错误
    pub fn cancelled<S: Into<String>>(reason: S) -> Self {
        let reason = reason.into();
        #[cfg(feature = "logging")]
        tracing::warn!("运行已取消: {}", reason);
        Self::Cancelled(reason)
    }

    /// 创建一个导出错误
    pub fn export_error<E: Into<String>, M: Into<String>>(
        exporter: E,
        message: M,
    ) -> Self {
        let exporter = exporter.into();
        let message = message.into();
        #[cfg(feature = "logging")]
        {
            crate::logging::ensure_logger_initialized();
            tracing::error!("导出器 {} 失败: {}", exporter, message);
        }
        Self::Export { exporter, message }
    }

    /// 创建一个其他类型错误
    pub fn other<S: Into<String>>(message: S) -> Self {
        let message = message.into();
        #[cfg(feature = "logging")]
        {
            crate::logging::ensure_logger_initialized();
            tracing::error!("未知错误: {}", message);
        }
        Self::Other(message)
    }

    /// 检查是否为 IO 错误
    pub fn is_io_error(&self) -> bool {
        matches!(self, SlowlogError::Io(_))
    }

    /// 检查是否为配置错误（含时间窗口与正则错误）
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SlowlogError::Config(_)
                | SlowlogError::InvalidWindow(_)
                | SlowlogError::Regex(_)
                | SlowlogError::TomlDe(_)
        )
    }

    /// 检查是否为取消
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SlowlogError::Cancelled(_))
    }
}
