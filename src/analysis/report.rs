//! 报告生成：排序、排名、占比与精确分位数

use crate::analysis::aggregate::{FingerprintAggregate, ShardAggregate};
use crate::analysis::stats::{RunCounters, StageTimings};
use crate::slowlog::sampler::{TimeRangeEstimate, TimeWindow};
use crate::slowlog::utils::micros_to_seconds;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// 分位数：最近秩之间线性插值，秩 = p/100 × (n−1)
///
/// `sorted` 必须升序；返回值单位为秒。1..100 秒的 P95 为 95.05。
pub fn percentile(sorted: &[u64], p: f64) -> Option<f64> {
    let (&first, &last) = (sorted.first()?, sorted.last()?);
    if p <= 0.0 {
        return Some(micros_to_seconds(first));
    }
    if p >= 100.0 {
        return Some(micros_to_seconds(last));
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let (a, b) = (sorted[lo] as f64, sorted[hi] as f64);
    Some((a + (b - a) * (rank - lo as f64)) / 1_000_000.0)
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 { 0.0 } else { part as f64 / total as f64 }
}

/// 报告中的一行（一个指纹）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    /// 从 1 开始的排名
    pub rank: usize,
    pub fingerprint: String,
    pub sample_count: u64,
    /// 秒
    pub total_time: f64,
    pub avg_time: f64,
    pub p95_time: f64,
    pub max_time: f64,
    /// 总耗时占比（%，保留 3 位小数）
    pub time_share_pct: f64,
    /// 次数占比（%，保留 3 位小数）
    pub count_share_pct: f64,
    pub avg_lock_time: f64,
    pub rows_examined_total: u64,
    pub rows_examined_avg: f64,
    pub rows_sent_total: u64,
    pub rows_sent_avg: f64,
    pub database: Option<String>,
    pub main_table: Option<String>,
    pub user_host: Option<String>,
    pub normalized_sql: String,
    pub example_sql: String,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub has_truncated: bool,
}

impl ReportRow {
    fn from_aggregate(
        rank: usize,
        agg: &FingerprintAggregate,
        total_us: u64,
        total_samples: u64,
    ) -> Self {
        let n = agg.sample_count.max(1) as f64;
        let sorted = agg.sorted_durations();
        Self {
            rank,
            fingerprint: agg.fingerprint.to_hex(),
            sample_count: agg.sample_count,
            total_time: micros_to_seconds(agg.sum_query_us),
            avg_time: micros_to_seconds(agg.sum_query_us) / n,
            p95_time: percentile(&sorted, 95.0).unwrap_or(0.0),
            max_time: micros_to_seconds(agg.max_query_us),
            time_share_pct: round3(ratio(agg.sum_query_us, total_us) * 100.0),
            count_share_pct: round3(ratio(agg.sample_count, total_samples) * 100.0),
            avg_lock_time: micros_to_seconds(agg.sum_lock_us) / n,
            rows_examined_total: agg.rows_examined_total,
            rows_examined_avg: agg.rows_examined_total as f64 / n,
            rows_sent_total: agg.rows_sent_total,
            rows_sent_avg: agg.rows_sent_total as f64 / n,
            database: agg.database().map(str::to_string),
            main_table: agg.main_table().map(str::to_string),
            user_host: agg.user_host().map(str::to_string),
            normalized_sql: agg.normalized_sql.clone(),
            example_sql: agg.example_sql().to_string(),
            first_seen: agg.first_seen,
            last_seen: agg.last_seen,
            has_truncated: agg.has_truncated,
        }
    }
}

/// 运行级汇总信息
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub counters: RunCounters,
    /// 边界扫描找到的记录起始数
    pub record_starts: u64,
    pub file_size: u64,
    pub shards: usize,
    pub workers: usize,
    pub window: TimeWindow,
    /// 每个输入文件的时间预检结果，按输入顺序；未设窗口时为空
    pub time_ranges: Vec<(PathBuf, TimeRangeEstimate)>,
    /// 预检判定无重叠，跳过了完整解析
    pub skipped: bool,
    pub timings: StageTimings,
}

/// 最终报告，生成后不再修改
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    rows: Vec<ReportRow>,
    top: usize,
    generated_at: DateTime<Utc>,
    pub summary: RunSummary,
}

impl AnalysisReport {
    /// 由合并后的全局聚合生成报告
    ///
    /// 按总耗时降序排列，相同时按指纹升序。
    pub fn build(
        global: ShardAggregate,
        top: usize,
        mut summary: RunSummary,
        generated_at: DateTime<Utc>,
    ) -> Self {
        summary.counters = global.counters;

        let mut groups: Vec<FingerprintAggregate> = global.groups.into_values().collect();
        groups.sort_by(|a, b| {
            b.sum_query_us
                .cmp(&a.sum_query_us)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });

        let total_us = groups.iter().fold(0u64, |acc, g| acc.saturating_add(g.sum_query_us));
        let total_samples: u64 = groups.iter().map(|g| g.sample_count).sum();

        let rows = groups
            .iter()
            .enumerate()
            .map(|(i, g)| ReportRow::from_aggregate(i + 1, g, total_us, total_samples))
            .collect();

        Self { rows, top, generated_at, summary }
    }

    /// 空报告（预检判定无重叠时使用）
    pub fn empty(top: usize, summary: RunSummary, generated_at: DateTime<Utc>) -> Self {
        Self { rows: Vec::new(), top, generated_at, summary }
    }

    /// 全部行，供表格导出
    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    /// 前 N 行
    pub fn ranked(&self) -> &[ReportRow] {
        &self.rows[..self.top.min(self.rows.len())]
    }

    pub fn top(&self) -> usize {
        self.top
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_time(&self) -> f64 {
        self.rows.iter().map(|r| r.total_time).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::aggregate::RecordFilter;
    use crate::slowlog::types::Record;

    fn records(sql: &str, times: &[f64]) -> Vec<Record> {
        times
            .iter()
            .enumerate()
            .map(|(i, &qt)| Record {
                offset: i as u64,
                query_time: qt,
                raw_sql: sql.to_string(),
                ..Default::default()
            })
            .collect()
    }

    fn build(records: &[Record], top: usize) -> AnalysisReport {
        let filter = RecordFilter::default();
        let mut agg = ShardAggregate::new();
        for r in records {
            agg.offer(r, &filter);
        }
        AnalysisReport::build(agg, top, RunSummary::default(), Utc::now())
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let values: Vec<u64> = (1..=100).map(|s| s * 1_000_000).collect();
        let p95 = percentile(&values, 95.0).unwrap();
        assert!((p95 - 95.05).abs() < 1e-9, "P95 应为 95.05, 实际 {p95}");
        assert_eq!(percentile(&values, 0.0), Some(1.0));
        assert_eq!(percentile(&values, 100.0), Some(100.0));
        assert_eq!(percentile(&[2_000_000], 95.0), Some(2.0));
        assert_eq!(percentile(&[], 95.0), None);
    }

    #[test]
    fn test_rows_sorted_and_shares() {
        let mut all = records("select * from a where x = 1", &[1.0, 1.0]);
        all.extend(records("select * from b", &[3.0]));
        all.extend(records("select * from c", &[1.0]));
        let report = build(&all, 2);

        let rows = report.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].normalized_sql, "select * from b");
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[0].time_share_pct, 50.0);
        assert_eq!(rows[0].count_share_pct, 25.0);
        // a 与 c 总耗时分别为 2 和 1
        assert_eq!(rows[1].normalized_sql, "select * from a where x = ?");
        assert_eq!(rows[1].avg_time, 1.0);
        assert_eq!(rows[1].time_share_pct, 33.333);
        assert_eq!(report.ranked().len(), 2);
        assert_eq!(report.total_time(), 6.0);
    }

    #[test]
    fn test_ties_broken_by_fingerprint() {
        let mut all = records("select * from x", &[1.0]);
        all.extend(records("select * from y", &[1.0]));
        all.extend(records("select * from z", &[1.0]));
        let report = build(&all, 10);
        let fps: Vec<&str> = report.rows().iter().map(|r| r.fingerprint.as_str()).collect();
        let mut sorted = fps.clone();
        sorted.sort();
        assert_eq!(fps, sorted);
    }

    #[test]
    fn test_empty_report() {
        let report = AnalysisReport::empty(10, RunSummary::default(), Utc::now());
        assert!(report.is_empty());
        assert!(report.ranked().is_empty());
    }
}
