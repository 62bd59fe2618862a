//! 导出统计信息模块

use std::time::{Duration, Instant};

/// 单个导出器的统计信息
#[derive(Debug, Default, Clone)]
pub struct ExportStats {
    /// 已导出的行数（CSV/JSON 行、Markdown 表格行或 ES 文档）
    pub exported_rows: usize,
    /// 导出失败的行数
    pub failed_rows: usize,
    /// 写入的字节数（HTTP 导出器为请求体大小）
    pub bytes_written: u64,
    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,
}

impl ExportStats {
    /// 创建新的统计信息，记录开始时间
    pub fn new() -> Self {
        Self { start_time: Some(Instant::now()), ..Default::default() }
    }

    /// 标记导出完成
    pub fn finish(&mut self) {
        self.end_time = Some(Instant::now());
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    /// 每秒导出行数
    pub fn rows_per_second(&self) -> Option<f64> {
        self.duration().map(|d| {
            if d.as_secs_f64() > 0.0 {
                self.exported_rows as f64 / d.as_secs_f64()
            } else {
                0.0
            }
        })
    }

    /// 成功率（%）
    pub fn success_rate(&self) -> f64 {
        let total = self.total_rows();
        if total > 0 {
            self.exported_rows as f64 / total as f64 * 100.0
        } else {
            0.0
        }
    }

    pub fn total_rows(&self) -> usize {
        self.exported_rows + self.failed_rows
    }

    /// 合并其他统计信息：计数相加，时间取最早开始与最晚结束
    pub fn merge(&mut self, other: &ExportStats) {
        self.exported_rows += other.exported_rows;
        self.failed_rows += other.failed_rows;
        self.bytes_written += other.bytes_written;

        self.start_time = match (self.start_time, other.start_time) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.end_time = match (self.end_time, other.end_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

impl std::fmt::Display for ExportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "成功: {}, 失败: {}", self.exported_rows, self.failed_rows)?;

        if self.bytes_written > 0 {
            write!(f, ", 字节: {}", self.bytes_written)?;
        }

        if let Some(duration) = self.duration() {
            write!(f, ", 耗时: {:.2}s", duration.as_secs_f64())?;
        }

        write!(f, ", 成功率: {:.1}%", self.success_rate())
    }
}
