//! CSV 导出器实现 (同步版本)

use super::SyncExporter;
use crate::analysis::{AnalysisReport, ReportRow};
use crate::error::Result;
use crate::exporter::{ColumnLang, ExportStats, format_timestamp};
use std::io::{BufWriter, Write};
use std::path::Path;

/// 同步 CSV 导出器，输出全部指纹行
pub struct SyncCsvExporter {
    writer: BufWriter<std::fs::File>,
    lang: ColumnLang,
    stats: ExportStats,
    header_written: bool,
}

impl SyncCsvExporter {
    /// 创建新的同步 CSV 导出器
    pub fn new<P: AsRef<Path>>(path: P, lang: ColumnLang) -> Result<Self> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);

        Ok(Self { writer, lang, stats: ExportStats::new(), header_written: false })
    }

    /// 写入 CSV 头部
    fn write_header(&mut self) -> Result<()> {
        let header = format!("{}\n", self.lang.columns().join(","));
        self.writer.write_all(header.as_bytes())?;
        self.stats.bytes_written += header.len() as u64;
        self.header_written = true;
        Ok(())
    }

    /// 转义 CSV 字段
    fn escape_csv_field(field: &str) -> String {
        if field.contains(',')
            || field.contains('"')
            || field.contains('\n')
            || field.contains('\r')
        {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }

    /// 格式化一行
    fn format_row(row: &ReportRow) -> String {
        let fields = [
            row.fingerprint.clone(),
            row.sample_count.to_string(),
            format!("{:.6}", row.total_time),
            format!("{:.6}", row.avg_time),
            format!("{:.6}", row.p95_time),
            format!("{:.6}", row.max_time),
            format!("{:.3}", row.time_share_pct),
            format!("{:.3}", row.count_share_pct),
            format!("{:.6}", row.avg_lock_time),
            row.rows_examined_total.to_string(),
            format!("{:.3}", row.rows_examined_avg),
            row.rows_sent_total.to_string(),
            format!("{:.3}", row.rows_sent_avg),
            Self::escape_csv_field(row.database.as_deref().unwrap_or("")),
            Self::escape_csv_field(row.main_table.as_deref().unwrap_or("")),
            Self::escape_csv_field(row.user_host.as_deref().unwrap_or("")),
            Self::escape_csv_field(&row.normalized_sql),
            Self::escape_csv_field(&row.example_sql),
            format_timestamp(row.first_seen),
            format_timestamp(row.last_seen),
            row.has_truncated.to_string(),
        ];

        format!("{}\n", fields.join(","))
    }
}

impl SyncExporter for SyncCsvExporter {
    fn name(&self) -> &str {
        "CSV"
    }

    fn begin(&mut self, _report: &AnalysisReport) -> Result<()> {
        if !self.header_written {
            self.write_header()?;
        }
        Ok(())
    }

    fn export_row(&mut self, row: &ReportRow) -> Result<()> {
        if !self.header_written {
            self.write_header()?;
        }

        let line = Self::format_row(row);
        self.writer.write_all(line.as_bytes())?;
        self.stats.bytes_written += line.len() as u64;
        self.stats.exported_rows += 1;

        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        // 没有数据时仍然输出表头
        if !self.header_written {
            self.write_header()?;
        }

        self.writer.flush()?;
        self.stats.finish();

        #[cfg(feature = "logging")]
        tracing::info!("CSV导出完成: {} 行", self.stats.exported_rows);

        Ok(())
    }

    fn get_stats(&self) -> ExportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::sync_impl::test_support::sample_report;
    use tempfile::NamedTempFile;

    fn read(tmp: &NamedTempFile) -> String {
        std::fs::read_to_string(tmp.path()).unwrap()
    }

    #[test]
    fn test_escape_csv_field_various() {
        assert_eq!(SyncCsvExporter::escape_csv_field("simple"), "simple");
        assert_eq!(SyncCsvExporter::escape_csv_field("with,comma"), "\"with,comma\"");
        assert_eq!(SyncCsvExporter::escape_csv_field("quote\"here"), "\"quote\"\"here\"");
        assert_eq!(SyncCsvExporter::escape_csv_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn test_export_report_writes_all_rows() {
        let tmp = NamedTempFile::new().unwrap();
        let report = sample_report(1);

        let mut exporter = SyncCsvExporter::new(tmp.path(), ColumnLang::Zh).unwrap();
        exporter.export_report(&report).unwrap();

        let s = read(&tmp);
        let lines: Vec<&str> = s.lines().collect();
        assert!(lines[0].starts_with("指纹,样本数,总耗时(s)"));
        // top 只影响排名视图，CSV 输出全部 3 个指纹
        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains(",2,6.000000,3.000000,"));
        assert!(s.contains("\"INSERT INTO logs VALUES (1, \"\"x,y\"\")\""));
        assert!(s.contains("2024-01-15T10:00:00.000000Z"));
        assert_eq!(exporter.get_stats().exported_rows, 3);
    }

    #[test]
    fn test_empty_report_writes_header_only() {
        let tmp = NamedTempFile::new().unwrap();
        let mut exporter = SyncCsvExporter::new(tmp.path(), ColumnLang::En).unwrap();
        exporter.finalize().unwrap();

        let s = read(&tmp);
        assert_eq!(s.lines().count(), 1);
        assert!(s.starts_with("fingerprint,samples,total_time_s"));
    }

    #[test]
    fn test_header_written_once() {
        let tmp = NamedTempFile::new().unwrap();
        let report = sample_report(10);
        let mut exporter = SyncCsvExporter::new(tmp.path(), ColumnLang::En).unwrap();
        exporter.begin(&report).unwrap();
        exporter.export_rows(report.rows()).unwrap();
        exporter.finalize().unwrap();

        assert_eq!(read(&tmp).matches("fingerprint,samples").count(), 1);
    }
}
