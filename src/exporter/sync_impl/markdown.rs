//! Markdown 导出器：按总耗时排名的前 N 个指纹

use super::SyncExporter;
use crate::analysis::{AnalysisReport, ReportRow};
use crate::error::Result;
use crate::exporter::{ColumnLang, ExportStats};
use crate::slowlog::utils::truncate_chars;
use std::io::{BufWriter, Write};
use std::path::Path;

/// 表格中规范化 SQL 的最大长度（字符）
const SQL_PREVIEW_CHARS: usize = 120;

/// 同步 Markdown 导出器
pub struct SyncMarkdownExporter {
    writer: BufWriter<std::fs::File>,
    lang: ColumnLang,
    stats: ExportStats,
    header_written: bool,
}

impl SyncMarkdownExporter {
    pub fn new<P: AsRef<Path>>(path: P, lang: ColumnLang) -> Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            lang,
            stats: ExportStats::new(),
            header_written: false,
        })
    }

    fn write_str(&mut self, s: &str) -> Result<()> {
        self.writer.write_all(s.as_bytes())?;
        self.stats.bytes_written += s.len() as u64;
        Ok(())
    }

    fn title(&self, shown: usize) -> String {
        match self.lang {
            ColumnLang::Zh => format!("# MySQL 慢日志汇总（Top {shown} 按总耗时）\n\n"),
            ColumnLang::En => format!("# MySQL slow log summary (top {shown} by total time)\n\n"),
        }
    }

    fn table_header(&self) -> &'static str {
        match self.lang {
            ColumnLang::Zh => {
                "| 排名 | 样本数 | 总耗时(s) | 平均耗时(s) | P95耗时(s) | 最大耗时(s) | 总耗时占比(%) | 主表 | 数据库 | 指纹 | 规范化SQL(前120字) |\n"
            }
            ColumnLang::En => {
                "| rank | samples | total(s) | avg(s) | p95(s) | max(s) | time share(%) | table | db | fingerprint | normalized SQL (first 120 chars) |\n"
            }
        }
    }

    /// 单元格内的 `|` 与换行需要转义
    fn escape_cell(s: &str) -> String {
        s.replace('|', "\\|").replace(['\n', '\r'], " ")
    }

    fn format_row(row: &ReportRow) -> String {
        format!(
            "| {} | {} | {:.3} | {:.3} | {:.3} | {:.3} | {:.3} | {} | {} | `{}` | {} |\n",
            row.rank,
            row.sample_count,
            row.total_time,
            row.avg_time,
            row.p95_time,
            row.max_time,
            row.time_share_pct,
            Self::escape_cell(row.main_table.as_deref().unwrap_or("")),
            Self::escape_cell(row.database.as_deref().unwrap_or("")),
            row.fingerprint,
            Self::escape_cell(truncate_chars(&row.normalized_sql, SQL_PREVIEW_CHARS)),
        )
    }
}

impl SyncExporter for SyncMarkdownExporter {
    fn name(&self) -> &str {
        "Markdown"
    }

    fn begin(&mut self, report: &AnalysisReport) -> Result<()> {
        if report.is_empty() {
            let empty = match self.lang {
                ColumnLang::Zh => "# MySQL 慢日志汇总\n\n（无数据）\n",
                ColumnLang::En => "# MySQL slow log summary\n\n(no data)\n",
            };
            self.write_str(empty)?;
            return Ok(());
        }

        let shown = report.ranked().len();
        let total_samples: u64 = report.rows().iter().map(|r| r.sample_count).sum();
        let mut head = self.title(shown);
        match self.lang {
            ColumnLang::Zh => {
                head.push_str(&format!("- 总样本数：**{total_samples}**\n"));
                head.push_str(&format!("- 总耗时：**{:.3} s**\n\n", report.total_time()));
            }
            ColumnLang::En => {
                head.push_str(&format!("- samples: **{total_samples}**\n"));
                head.push_str(&format!("- total time: **{:.3} s**\n\n", report.total_time()));
            }
        }
        head.push_str(self.table_header());
        head.push_str("|---:|---:|---:|---:|---:|---:|---:|---|---|---|---|\n");
        self.write_str(&head)?;
        self.header_written = true;
        Ok(())
    }

    fn export_row(&mut self, row: &ReportRow) -> Result<()> {
        let line = Self::format_row(row);
        self.write_str(&line)?;
        self.stats.exported_rows += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.stats.finish();

        #[cfg(feature = "logging")]
        tracing::info!("Markdown导出完成: {} 行", self.stats.exported_rows);

        Ok(())
    }

    /// 只输出前 N 名
    fn export_report(&mut self, report: &AnalysisReport) -> Result<()> {
        self.begin(report)?;
        if self.header_written {
            self.export_rows(report.ranked())?;
        }
        self.finalize()
    }

    fn get_stats(&self) -> ExportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::RunSummary;
    use crate::exporter::sync_impl::test_support::sample_report;
    use tempfile::NamedTempFile;

    #[test]
    fn test_markdown_top_n() {
        let tmp = NamedTempFile::new().unwrap();
        let report = sample_report(2);
        let mut exporter = SyncMarkdownExporter::new(tmp.path(), ColumnLang::Zh).unwrap();
        exporter.export_report(&report).unwrap();

        let s = std::fs::read_to_string(tmp.path()).unwrap();
        assert!(s.starts_with("# MySQL 慢日志汇总（Top 2 按总耗时）"));
        assert!(s.contains("- 总样本数：**5**"));
        assert!(s.contains("- 总耗时：**8.500 s**"));
        assert!(s.contains("| 1 | 2 | 6.000 | 3.000 |"));
        assert!(s.contains("| 2 | 1 | 1.500 |"));
        assert!(!s.contains("| 3 |"));
        assert_eq!(exporter.get_stats().exported_rows, 2);
    }

    #[test]
    fn test_markdown_empty_report() {
        let tmp = NamedTempFile::new().unwrap();
        let report = AnalysisReport::empty(10, RunSummary::default(), chrono::Utc::now());
        let mut exporter = SyncMarkdownExporter::new(tmp.path(), ColumnLang::Zh).unwrap();
        exporter.export_report(&report).unwrap();

        let s = std::fs::read_to_string(tmp.path()).unwrap();
        assert_eq!(s, "# MySQL 慢日志汇总\n\n（无数据）\n");
    }

    #[test]
    fn test_escape_cell() {
        assert_eq!(SyncMarkdownExporter::escape_cell("a|b\nc"), "a\\|b c");
    }
}
