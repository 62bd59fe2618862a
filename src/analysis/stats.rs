//! 运行统计：记录级计数器与各阶段耗时

use crate::slowlog::parser::ParseCounters;
use std::time::{Duration, Instant};

/// 一次运行（或一个分片）的记录计数
///
/// 可恢复的情况（解码替换、字段缺失、阈值与排除过滤、截断）都只体现在这里。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunCounters {
    /// 解析器的行级计数
    pub parse: ParseCounters,
    /// 进入聚合的记录数
    pub accepted: u64,
    /// 低于耗时阈值被过滤的记录数
    pub filtered_by_threshold: u64,
    /// 命中排除规则（导出语句、排除正则）被过滤的记录数
    pub filtered_by_exclusion: u64,
    /// 不在时间窗口内被过滤的记录数
    pub filtered_by_window: u64,
}

impl RunCounters {
    /// 解析出的记录总数（含被过滤的）
    pub fn records_seen(&self) -> u64 {
        self.parse.records
    }

    pub fn truncated(&self) -> u64 {
        self.parse.truncated_records
    }

    /// 所有被过滤的记录数
    pub fn filtered(&self) -> u64 {
        self.filtered_by_threshold + self.filtered_by_exclusion + self.filtered_by_window
    }

    /// 合并另一个分片的计数
    pub fn merge(&mut self, other: &RunCounters) {
        self.parse.merge(&other.parse);
        self.accepted += other.accepted;
        self.filtered_by_threshold += other.filtered_by_threshold;
        self.filtered_by_exclusion += other.filtered_by_exclusion;
        self.filtered_by_window += other.filtered_by_window;
    }
}

impl std::fmt::Display for RunCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "记录: {}, 采纳: {}, 阈值过滤: {}, 排除: {}, 时间窗口过滤: {}, 截断: {}",
            self.records_seen(),
            self.accepted,
            self.filtered_by_threshold,
            self.filtered_by_exclusion,
            self.filtered_by_window,
            self.truncated()
        )?;
        if self.parse.decode_replacements > 0 {
            write!(f, ", 解码替换: {}", self.parse.decode_replacements)?;
        }
        if self.parse.empty_records > 0 {
            write!(f, ", 空记录: {}", self.parse.empty_records)?;
        }
        Ok(())
    }
}

/// 各阶段耗时
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageTimings {
    pub sample: Duration,
    pub scan: Duration,
    pub parse: Duration,
    pub merge: Duration,
    pub report: Duration,
}

impl StageTimings {
    pub fn total(&self) -> Duration {
        self.sample + self.scan + self.parse + self.merge + self.report
    }
}

impl std::fmt::Display for StageTimings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "预检 {:.3}s, 扫描 {:.3}s, 解析 {:.3}s, 合并 {:.3}s, 报告 {:.3}s, 合计 {:.3}s",
            self.sample.as_secs_f64(),
            self.scan.as_secs_f64(),
            self.parse.as_secs_f64(),
            self.merge.as_secs_f64(),
            self.report.as_secs_f64(),
            self.total().as_secs_f64()
        )
    }
}

/// 阶段计时器
#[derive(Debug)]
pub struct StageTimer {
    start: Instant,
}

impl StageTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
