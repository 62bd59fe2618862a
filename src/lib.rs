//! MySQL 慢查询日志分析库
//!
//! 把慢日志按记录边界切成分片并行解析，按规范化 SQL 的指纹聚合，
//! 输出按总耗时排名的报告（CSV、Markdown、JSON、Elasticsearch）。

// 核心模块 - 始终可用
pub mod analysis;
pub mod app;
pub mod config;
pub mod error;
pub mod slowlog;

// 导出模块 - 各导出器由对应的 feature 控制
pub mod exporter;

// 日志模块 - 需要 logging 功能
#[cfg(feature = "logging")]
pub mod logging;

pub use analysis::{AnalysisReport, CancelToken, ReportRow, RunSummary};
pub use app::{RunOutcome, analyze_files, run};
pub use config::Config;
pub use error::{Result, SlowlogError};
pub use slowlog::{Fingerprint, Record, TimeWindow, normalize_sql};

