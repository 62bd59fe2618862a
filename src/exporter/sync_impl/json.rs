//! JSON 导出器实现 (同步版本)

use super::SyncExporter;
use crate::analysis::ReportRow;
use crate::error::Result;
use crate::exporter::ExportStats;
use std::io::{BufWriter, Write};
use std::path::Path;

/// 同步 JSON 导出器，输出一个包含全部指纹行的数组
pub struct SyncJsonExporter {
    writer: BufWriter<std::fs::File>,
    stats: ExportStats,
    first_row: bool,
}

impl SyncJsonExporter {
    /// 创建新的同步 JSON 导出器
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::create(path)?;
        let mut writer = BufWriter::new(file);

        // 写入 JSON 数组开始符
        writer.write_all(b"[\n")?;

        Ok(Self { writer, stats: ExportStats::new(), first_row: true })
    }
}

impl SyncExporter for SyncJsonExporter {
    fn name(&self) -> &str {
        "JSON"
    }

    fn export_row(&mut self, row: &ReportRow) -> Result<()> {
        if !self.first_row {
            self.writer.write_all(b",\n")?;
        }
        self.first_row = false;

        let json_str = serde_json::to_string_pretty(row)?;
        // 为每行添加适当的缩进
        let indented = json_str
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n");

        self.writer.write_all(indented.as_bytes())?;
        self.stats.bytes_written += indented.len() as u64;
        self.stats.exported_rows += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.writer.write_all(b"\n]\n")?;
        self.writer.flush()?;
        self.stats.finish();

        #[cfg(feature = "logging")]
        tracing::info!("JSON导出完成: {} 行", self.stats.exported_rows);

        Ok(())
    }

    fn get_stats(&self) -> ExportStats {
        self.stats.clone()
    }
}
