//! 同步导出器实现模块

use crate::analysis::{AnalysisReport, ReportRow};
use crate::error::Result;
use crate::exporter::ExportStats;

/// 同步报告导出器的统一接口
pub trait SyncExporter: Send {
    /// 导出器名称
    fn name(&self) -> &str;

    /// 开始导出一份报告（写表头、标题等）
    fn begin(&mut self, _report: &AnalysisReport) -> Result<()> {
        Ok(())
    }

    /// 导出单行
    fn export_row(&mut self, row: &ReportRow) -> Result<()>;

    /// 批量导出
    fn export_rows(&mut self, rows: &[ReportRow]) -> Result<()> {
        for row in rows {
            self.export_row(row)?;
        }
        Ok(())
    }

    /// 完成导出，刷新并释放资源
    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }

    /// 导出整份报告；默认导出全部行，只展示前 N 名的导出器可覆盖
    fn export_report(&mut self, report: &AnalysisReport) -> Result<()> {
        self.begin(report)?;
        self.export_rows(report.rows())?;
        self.finalize()
    }

    /// 获取导出统计信息
    fn get_stats(&self) -> ExportStats {
        ExportStats::default()
    }
}

#[cfg(feature = "exporter-csv")]
pub mod csv;
#[cfg(feature = "exporter-es")]
pub mod elasticsearch;
#[cfg(feature = "exporter-json")]
pub mod json;
#[cfg(feature = "exporter-markdown")]
pub mod markdown;
pub mod multi_exporter;

#[cfg(feature = "exporter-csv")]
pub use csv::SyncCsvExporter;
#[cfg(feature = "exporter-es")]
pub use elasticsearch::{EsConfig, SyncElasticsearchExporter};
#[cfg(feature = "exporter-json")]
pub use json::SyncJsonExporter;
#[cfg(feature = "exporter-markdown")]
pub use markdown::SyncMarkdownExporter;
pub use multi_exporter::SyncMultiExporter;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::analysis::{AnalysisReport, RecordFilter, RunSummary, ShardAggregate};
    use crate::slowlog::types::Record;
    use crate::slowlog::utils::parse_timestamp;

    /// 三个指纹、五条记录的小报告
    pub(crate) fn sample_report(top: usize) -> AnalysisReport {
        let rows = [
            ("SELECT * FROM orders WHERE id = 1", 2.0, Some("2024-01-15T10:00:00Z")),
            ("SELECT * FROM orders WHERE id = 2", 4.0, Some("2024-01-15T11:00:00Z")),
            ("UPDATE users SET name = 'a|b' WHERE id = 3", 1.5, None),
            ("INSERT INTO logs VALUES (1, \"x,y\")", 0.5, Some("2024-01-15T09:00:00Z")),
            ("INSERT INTO logs VALUES (2, 'z')", 0.5, Some("2024-01-15T12:00:00Z")),
        ];
        let filter = RecordFilter::default();
        let mut agg = ShardAggregate::new();
        for (i, (sql, qt, ts)) in rows.iter().enumerate() {
            let mut r = Record {
                offset: i as u64 * 100,
                query_time: *qt,
                rows_examined: 10,
                rows_sent: 1,
                user_host: "app[app] @ web1 [10.0.0.1]".to_string(),
                database: Some("shop".to_string()),
                raw_sql: sql.to_string(),
                ..Default::default()
            };
            r.times.time = ts.and_then(parse_timestamp);
            agg.offer(&r, &filter);
        }
        let generated = parse_timestamp("2024-01-16T08:00:00Z").unwrap_or_default();
        AnalysisReport::build(agg, top, RunSummary::default(), generated)
    }
}
