//! 报告导出模块
//!
//! 提供统一的导出接口和多种导出格式支持。导出器只消费 [`AnalysisReport`]，
//! 不参与聚合计算。
//!
//! [`AnalysisReport`]: crate::analysis::AnalysisReport

pub mod stats;
pub use stats::ExportStats;

pub mod sync_impl;

#[cfg(feature = "exporter-csv")]
pub use sync_impl::SyncCsvExporter;
#[cfg(feature = "exporter-es")]
pub use sync_impl::SyncElasticsearchExporter;
#[cfg(feature = "exporter-json")]
pub use sync_impl::SyncJsonExporter;
#[cfg(feature = "exporter-markdown")]
pub use sync_impl::SyncMarkdownExporter;
pub use sync_impl::{SyncExporter, SyncMultiExporter};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// 表头语言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnLang {
    #[default]
    Zh,
    En,
}

impl ColumnLang {
    /// 未知取值回退到中文
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("en") { Self::En } else { Self::Zh }
    }

    /// 表格列名，顺序与 [`ReportRow`] 字段一致
    ///
    /// [`ReportRow`]: crate::analysis::ReportRow
    pub fn columns(&self) -> &'static [&'static str; 21] {
        match self {
            Self::Zh => &ZH_COLUMNS,
            Self::En => &EN_COLUMNS,
        }
    }
}

const ZH_COLUMNS: [&str; 21] = [
    "指纹",
    "样本数",
    "总耗时(s)",
    "平均耗时(s)",
    "P95耗时(s)",
    "最大耗时(s)",
    "总耗时占比(%)",
    "次数占比(%)",
    "平均锁等待(s)",
    "扫描行数-总计",
    "扫描行数-平均",
    "返回行数-总计",
    "返回行数-平均",
    "数据库",
    "主表",
    "用户@主机",
    "规范化SQL",
    "示例SQL",
    "首次出现时间",
    "最后出现时间",
    "含截断样本",
];

const EN_COLUMNS: [&str; 21] = [
    "fingerprint",
    "samples",
    "total_time_s",
    "avg_time_s",
    "p95_time_s",
    "max_time_s",
    "time_share_pct",
    "count_share_pct",
    "avg_lock_time_s",
    "rows_examined_total",
    "rows_examined_avg",
    "rows_sent_total",
    "rows_sent_avg",
    "db",
    "main_table",
    "user_host",
    "norm_sql",
    "example_query",
    "first_seen",
    "last_seen",
    "has_truncated",
];

/// 时间戳统一输出为 RFC 3339（微秒，`Z` 结尾）
pub fn format_timestamp(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true)).unwrap_or_default()
}
