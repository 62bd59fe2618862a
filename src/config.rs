//! 配置管理模块
//!
//! 提供统一的配置文件读取和管理功能。所有段都带 `#[serde(default)]`，
//! 配置文件只需写出与默认值不同的项。

use crate::analysis::RecordFilter;
use crate::error::{Result, SlowlogError};
use crate::exporter::ColumnLang;
use crate::slowlog::parser::ParserOptions;
use crate::slowlog::sampler::{
    DEFAULT_SAMPLE_BUDGET, DEFAULT_SAMPLE_POINTS, MAX_SAMPLE_POINTS, SamplerOptions, TimeRange,
    TimeWindow,
};
use crate::slowlog::types::{DEFAULT_EXAMPLE_MAX_LEN, StartPolicy};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Elasticsearch 索引名中的日期占位符
pub const ES_DATE_PLACEHOLDER: &str = "%{+yyyy.MM.dd}";

/// 主配置结构体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 日志配置
    pub log: LogConfig,
    /// 分析配置
    pub analysis: AnalysisConfig,
    /// 导出配置
    pub export: ExportConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 是否启用控制台输出
    pub enable_stdout: bool,
    /// 日志输出目录，空字符串表示不写文件
    pub log_dir: String,
    /// 日志级别 (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { enable_stdout: true, log_dir: String::new(), level: "info".to_string() }
    }
}

/// 分析配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// 最小耗时（秒）
    pub min_time: f64,
    /// 过滤 mysqldump 导出语句
    pub exclude_dumps: bool,
    /// 额外的排除正则，匹配规范化后的 SQL
    pub exclude_patterns: Vec<String>,
    /// 并发线程数
    pub jobs: usize,
    /// 宽松起始模式
    pub loose_start: bool,
    /// 在截断记录的示例 SQL 后追加标记
    pub mark_truncated: bool,
    /// 时间窗口：all / today / last-N-days / Nd / N
    pub window: String,
    /// 排名视图的行数
    pub top: usize,
    /// 时间预检的采样字节预算
    pub sample_budget_bytes: u64,
    /// 头尾之外的中间采样点数
    pub sample_points: usize,
    /// 示例 SQL 最大长度（字符）
    pub example_max_len: usize,
    /// 运行超时（秒），0 表示不限
    pub timeout_secs: u64,
    /// 表头语言
    pub lang: ColumnLang,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_time: 0.0,
            exclude_dumps: false,
            exclude_patterns: Vec::new(),
            jobs: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            loose_start: false,
            mark_truncated: false,
            window: "all".to_string(),
            top: 30,
            sample_budget_bytes: DEFAULT_SAMPLE_BUDGET,
            sample_points: DEFAULT_SAMPLE_POINTS,
            example_max_len: DEFAULT_EXAMPLE_MAX_LEN,
            timeout_secs: 0,
            lang: ColumnLang::Zh,
        }
    }
}

impl AnalysisConfig {
    pub fn time_window(&self) -> Result<TimeWindow> {
        TimeWindow::parse(&self.window)
    }

    pub fn start_policy(&self) -> StartPolicy {
        StartPolicy::from_loose(self.loose_start)
    }

    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions::with_policy(self.start_policy())
    }

    pub fn sampler_options(&self) -> SamplerOptions {
        SamplerOptions { budget_bytes: self.sample_budget_bytes, interior_points: self.sample_points }
    }

    /// 编译排除正则，生成记录过滤器
    pub fn record_filter(&self, window: Option<TimeRange>) -> Result<RecordFilter> {
        let exclude_patterns = self
            .exclude_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(RecordFilter {
            min_time: self.min_time,
            exclude_dumps: self.exclude_dumps,
            exclude_patterns,
            window,
            mark_truncated: self.mark_truncated,
            example_max_len: self.example_max_len,
        })
    }
}

/// 导出配置，未配置的导出器不启用
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// CSV 导出配置（全部指纹）
    pub csv: Option<FileOutputConfig>,
    /// Markdown 导出配置（前 N 名）
    pub markdown: Option<FileOutputConfig>,
    /// JSON 导出配置（全部指纹）
    pub json: Option<FileOutputConfig>,
    /// Elasticsearch 导出配置
    pub elasticsearch: Option<EsConfig>,
}

impl ExportConfig {
    pub fn is_empty(&self) -> bool {
        self.csv.is_none()
            && self.markdown.is_none()
            && self.json.is_none()
            && self.elasticsearch.is_none()
    }
}

/// 文件类导出配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOutputConfig {
    /// 输出文件路径
    pub out_path: String,
}

impl FileOutputConfig {
    pub fn new<S: Into<String>>(out_path: S) -> Self {
        Self { out_path: out_path.into() }
    }
}

/// Elasticsearch 连接与文档配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EsConfig {
    /// 节点地址，依次尝试
    pub hosts: Vec<String>,
    /// 索引名模式
    pub index: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// 校验 TLS 证书
    pub verify_certs: bool,
    /// 覆盖文档中的主机名
    pub hostname: Option<String>,
    /// 每个 `_bulk` 请求的文档数
    pub chunk_size: usize,
    pub timeout_secs: u64,
}

impl Default for EsConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            index: format!("mysql-slowlog-{ES_DATE_PLACEHOLDER}"),
            user: None,
            password: None,
            verify_certs: true,
            hostname: None,
            chunk_size: 100,
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// 从字符串加载配置
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        // 验证日志级别
        match self.log.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(SlowlogError::config_error(format!(
                    "无效的日志级别: {}",
                    self.log.level
                )));
            }
        }

        let analysis = &self.analysis;
        if analysis.jobs == 0 {
            return Err(SlowlogError::config_error("工作线程数必须大于 0"));
        }
        if !analysis.min_time.is_finite() || analysis.min_time < 0.0 {
            return Err(SlowlogError::config_error(format!(
                "最小耗时必须是非负数: {}",
                analysis.min_time
            )));
        }
        if analysis.top == 0 {
            return Err(SlowlogError::config_error("top 必须大于 0"));
        }
        if analysis.sample_points > MAX_SAMPLE_POINTS {
            return Err(SlowlogError::config_error(format!(
                "中间采样点数不能超过 {MAX_SAMPLE_POINTS}: {}",
                analysis.sample_points
            )));
        }
        analysis.time_window()?;
        for pattern in &analysis.exclude_patterns {
            Regex::new(pattern)?;
        }

        if let Some(es) = &self.export.elasticsearch {
            if es.hosts.is_empty() {
                return Err(SlowlogError::config_error("Elasticsearch 至少需要一个节点地址"));
            }
        }

        if self.export.is_empty() {
            #[cfg(feature = "logging")]
            tracing::warn!("没有配置任何导出格式");
        }

        Ok(())
    }
}
