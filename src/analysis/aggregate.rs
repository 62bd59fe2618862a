//! 分片聚合与合并
//!
//! 每个分片维护 `指纹 → FingerprintAggregate` 的局部映射，分片之间没有任何
//! 共享状态。合并对每个字段都是交换且结合的：
//!
//! - 计数与求和相加（耗时按整数微秒累加，结果与分片方式无关）；
//! - min/max 取极值，首次/末次出现时间取较早/较晚者；
//! - 耗时样本直接拼接，顺序无关（报告阶段排序后计算分位数）；
//! - 数据库、用户@主机、主表按出现次数累加，最终取次数最多者，平局取字典序最小者；
//! - 示例 SQL 保留 `(最早时间戳, 字节偏移)` 最小的那条记录，没有时间戳的排在后面。

use crate::analysis::stats::RunCounters;
use crate::slowlog::normalize::{Fingerprint, NormalizedSql, extract_main_table, is_dump_statement};
use crate::slowlog::sampler::TimeRange;
use crate::slowlog::types::{DEFAULT_EXAMPLE_MAX_LEN, Record, TRUNCATED_MARK};
use crate::slowlog::utils::{seconds_to_micros, truncate_chars};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

/// 记录过滤与示例保留策略
#[derive(Debug, Clone)]
pub struct RecordFilter {
    /// 最小耗时（秒），低于该值的记录被过滤
    pub min_time: f64,
    /// 过滤 mysqldump 导出语句
    pub exclude_dumps: bool,
    /// 命中规范化文本即过滤
    pub exclude_patterns: Vec<Regex>,
    /// 时间窗口，`None` 表示不限
    pub window: Option<TimeRange>,
    /// 截断记录的示例 SQL 追加截断标记
    pub mark_truncated: bool,
    /// 示例 SQL 最大长度（字符）
    pub example_max_len: usize,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self {
            min_time: 0.0,
            exclude_dumps: false,
            exclude_patterns: Vec::new(),
            window: None,
            mark_truncated: false,
            example_max_len: DEFAULT_EXAMPLE_MAX_LEN,
        }
    }
}

impl RecordFilter {
    /// 任一时间来源落在窗口内即视为命中
    fn in_window(&self, record: &Record) -> bool {
        match &self.window {
            None => true,
            Some(w) => record.times.iter().any(|t| w.contains(t)),
        }
    }

    fn example_text(&self, record: &Record) -> String {
        let mut text = truncate_chars(&record.raw_sql, self.example_max_len).to_string();
        if record.is_truncated && self.mark_truncated {
            text.push_str(TRUNCATED_MARK);
        }
        text
    }
}

/// 示例 SQL 的选取键：越小越优先
type ExampleKey = (bool, Option<DateTime<Utc>>, u64);

fn example_key(record: &Record) -> ExampleKey {
    let ts = record.times.earliest();
    (ts.is_none(), ts, record.offset)
}

fn bump(map: &mut BTreeMap<String, u64>, key: &str, n: u64) {
    if key.is_empty() {
        return;
    }
    match map.get_mut(key) {
        Some(c) => *c += n,
        None => {
            map.insert(key.to_string(), n);
        }
    }
}

fn merge_counts(into: &mut BTreeMap<String, u64>, from: BTreeMap<String, u64>) {
    for (k, n) in from {
        *into.entry(k).or_insert(0) += n;
    }
}

/// 出现次数最多的值，平局取字典序最小者
fn most_frequent(map: &BTreeMap<String, u64>) -> Option<&str> {
    let mut best: Option<(&str, u64)> = None;
    for (k, &n) in map {
        if best.is_none_or(|(_, b)| n > b) {
            best = Some((k.as_str(), n));
        }
    }
    best.map(|(k, _)| k)
}

/// 单个指纹的部分统计量
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintAggregate {
    pub fingerprint: Fingerprint,
    pub normalized_sql: String,
    pub sample_count: u64,
    /// 耗时合计（微秒）
    pub sum_query_us: u64,
    pub min_query_us: u64,
    pub max_query_us: u64,
    /// 每条记录的耗时（微秒），用于精确分位数
    pub durations_us: Vec<u64>,
    pub sum_lock_us: u64,
    pub rows_examined_total: u64,
    pub rows_sent_total: u64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub has_truncated: bool,
    databases: BTreeMap<String, u64>,
    user_hosts: BTreeMap<String, u64>,
    tables: BTreeMap<String, u64>,
    example_key: ExampleKey,
    example_sql: String,
}

impl FingerprintAggregate {
    fn new(normalized: NormalizedSql, record: &Record, filter: &RecordFilter) -> Self {
        let mut agg = Self {
            fingerprint: normalized.fingerprint,
            normalized_sql: normalized.text,
            sample_count: 0,
            sum_query_us: 0,
            min_query_us: u64::MAX,
            max_query_us: 0,
            durations_us: Vec::new(),
            sum_lock_us: 0,
            rows_examined_total: 0,
            rows_sent_total: 0,
            first_seen: None,
            last_seen: None,
            has_truncated: false,
            databases: BTreeMap::new(),
            user_hosts: BTreeMap::new(),
            tables: BTreeMap::new(),
            example_key: example_key(record),
            example_sql: filter.example_text(record),
        };
        agg.add(record, filter);
        agg
    }

    /// 累加一条记录
    fn add(&mut self, record: &Record, filter: &RecordFilter) {
        let qt = seconds_to_micros(record.query_time);
        self.sample_count += 1;
        self.sum_query_us = self.sum_query_us.saturating_add(qt);
        self.min_query_us = self.min_query_us.min(qt);
        self.max_query_us = self.max_query_us.max(qt);
        self.durations_us.push(qt);
        self.sum_lock_us = self.sum_lock_us.saturating_add(seconds_to_micros(record.lock_time));
        self.rows_examined_total = self.rows_examined_total.saturating_add(record.rows_examined);
        self.rows_sent_total = self.rows_sent_total.saturating_add(record.rows_sent);
        self.has_truncated |= record.is_truncated;

        if let Some(t) = record.times.earliest() {
            self.first_seen = Some(self.first_seen.map_or(t, |f| f.min(t)));
        }
        if let Some(t) = record.times.latest() {
            self.last_seen = Some(self.last_seen.map_or(t, |l| l.max(t)));
        }

        if let Some(db) = &record.database {
            bump(&mut self.databases, db, 1);
        }
        bump(&mut self.user_hosts, &record.user_host, 1);
        if let Some(table) = extract_main_table(&record.raw_sql) {
            bump(&mut self.tables, &table, 1);
        }

        let key = example_key(record);
        if key < self.example_key {
            self.example_key = key;
            self.example_sql = filter.example_text(record);
        }
    }

    /// 合并同一指纹的另一份部分统计
    pub fn merge(&mut self, other: FingerprintAggregate) {
        debug_assert_eq!(self.fingerprint, other.fingerprint);
        self.sample_count += other.sample_count;
        self.sum_query_us = self.sum_query_us.saturating_add(other.sum_query_us);
        self.min_query_us = self.min_query_us.min(other.min_query_us);
        self.max_query_us = self.max_query_us.max(other.max_query_us);
        self.durations_us.extend(other.durations_us);
        self.sum_lock_us = self.sum_lock_us.saturating_add(other.sum_lock_us);
        self.rows_examined_total = self.rows_examined_total.saturating_add(other.rows_examined_total);
        self.rows_sent_total = self.rows_sent_total.saturating_add(other.rows_sent_total);
        self.has_truncated |= other.has_truncated;

        self.first_seen = match (self.first_seen, other.first_seen) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_seen = match (self.last_seen, other.last_seen) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        merge_counts(&mut self.databases, other.databases);
        merge_counts(&mut self.user_hosts, other.user_hosts);
        merge_counts(&mut self.tables, other.tables);

        if other.example_key < self.example_key {
            self.example_key = other.example_key;
            self.example_sql = other.example_sql;
        }
    }

    pub fn database(&self) -> Option<&str> {
        most_frequent(&self.databases)
    }

    pub fn user_host(&self) -> Option<&str> {
        most_frequent(&self.user_hosts)
    }

    pub fn main_table(&self) -> Option<&str> {
        most_frequent(&self.tables)
    }

    /// 保留的示例 SQL
    pub fn example_sql(&self) -> &str {
        &self.example_sql
    }

    /// 排好序的耗时样本
    pub fn sorted_durations(&self) -> Vec<u64> {
        let mut v = self.durations_us.clone();
        v.sort_unstable();
        v
    }
}

/// 一个分片（或合并后全局）的聚合结果
#[derive(Debug, Default, Clone)]
pub struct ShardAggregate {
    pub groups: HashMap<Fingerprint, FingerprintAggregate>,
    pub counters: RunCounters,
}

impl ShardAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// 按过滤策略处理一条记录：过滤则计数，否则归入对应指纹
    ///
    /// 过滤顺序：导出语句 → 耗时阈值 → 时间窗口 → 排除正则（作用于规范化文本）。
    pub fn offer(&mut self, record: &Record, filter: &RecordFilter) {
        if filter.exclude_dumps && is_dump_statement(&record.raw_sql) {
            self.counters.filtered_by_exclusion += 1;
            return;
        }
        if record.query_time < filter.min_time {
            self.counters.filtered_by_threshold += 1;
            return;
        }
        if !filter.in_window(record) {
            self.counters.filtered_by_window += 1;
            return;
        }

        let normalized = NormalizedSql::new(&record.raw_sql);
        if filter.exclude_patterns.iter().any(|re| re.is_match(&normalized.text)) {
            self.counters.filtered_by_exclusion += 1;
            return;
        }

        self.counters.accepted += 1;
        match self.groups.get_mut(&normalized.fingerprint) {
            Some(agg) => agg.add(record, filter),
            None => {
                let fp = normalized.fingerprint;
                self.groups.insert(fp, FingerprintAggregate::new(normalized, record, filter));
            }
        }
    }

    /// 合并另一个分片的结果；对方缺失的指纹视为单位元
    pub fn merge(&mut self, other: ShardAggregate) {
        self.counters.merge(&other.counters);
        for (fp, agg) in other.groups {
            match self.groups.get_mut(&fp) {
                Some(existing) => existing.merge(agg),
                None => {
                    self.groups.insert(fp, agg);
                }
            }
        }
    }

    /// 按顺序折叠多个分片结果
    pub fn merge_all<I: IntoIterator<Item = ShardAggregate>>(parts: I) -> Self {
        parts.into_iter().fold(Self::new(), |mut acc, part| {
            acc.merge(part);
            acc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slowlog::utils::parse_timestamp;

    fn record(offset: u64, ts: Option<&str>, qt: f64, sql: &str) -> Record {
        let mut r = Record {
            offset,
            query_time: qt,
            lock_time: 0.001,
            rows_sent: 1,
            rows_examined: 10,
            user_host: "app[app] @ web1 []".to_string(),
            database: Some("shop".to_string()),
            raw_sql: sql.to_string(),
            ..Default::default()
        };
        r.times.time = ts.and_then(parse_timestamp);
        r
    }

    fn sample() -> Vec<Record> {
        vec![
            record(0, Some("2024-01-15T10:00:00Z"), 1.5, "SELECT * FROM orders WHERE id = 1"),
            record(100, Some("2024-01-15T09:00:00Z"), 0.5, "SELECT * FROM orders WHERE id = 2"),
            record(200, None, 2.0, "UPDATE users SET a = 3"),
            record(300, Some("2024-01-15T11:00:00Z"), 3.0, "select * from orders where id = 99"),
        ]
    }

    fn aggregate(records: &[Record], filter: &RecordFilter) -> ShardAggregate {
        let mut agg = ShardAggregate::new();
        for r in records {
            agg.offer(r, filter);
        }
        agg
    }

    #[test]
    fn test_group_by_fingerprint() {
        let filter = RecordFilter::default();
        let agg = aggregate(&sample(), &filter);
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.counters.accepted, 4);

        let orders = agg
            .groups
            .values()
            .find(|g| g.normalized_sql.contains("orders"))
            .unwrap();
        assert_eq!(orders.sample_count, 3);
        assert_eq!(orders.sum_query_us, 5_000_000);
        assert_eq!(orders.min_query_us, 500_000);
        assert_eq!(orders.max_query_us, 3_000_000);
        assert_eq!(orders.sum_lock_us, 3_000);
        assert_eq!(orders.rows_examined_total, 30);
        assert_eq!(orders.first_seen, parse_timestamp("2024-01-15T09:00:00Z"));
        assert_eq!(orders.last_seen, parse_timestamp("2024-01-15T11:00:00Z"));
        // 最早时间戳的那条是示例
        assert_eq!(orders.example_sql(), "SELECT * FROM orders WHERE id = 2");
        assert_eq!(orders.database(), Some("shop"));
        assert_eq!(orders.main_table(), Some("orders"));
    }

    #[test]
    fn test_merge_is_order_independent() {
        let filter = RecordFilter::default();
        let records = sample();
        let whole = aggregate(&records, &filter);

        let a = aggregate(&records[..2], &filter);
        let b = aggregate(&records[2..], &filter);

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b;
        ba.merge(a);

        for merged in [&ab, &ba] {
            assert_eq!(merged.counters, whole.counters);
            assert_eq!(merged.len(), whole.len());
            for (fp, g) in &whole.groups {
                let m = &merged.groups[fp];
                assert_eq!(m.sample_count, g.sample_count);
                assert_eq!(m.sum_query_us, g.sum_query_us);
                assert_eq!(m.sorted_durations(), g.sorted_durations());
                assert_eq!(m.example_sql(), g.example_sql());
                assert_eq!(m.first_seen, g.first_seen);
                assert_eq!(m.last_seen, g.last_seen);
                assert_eq!(m.database(), g.database());
            }
        }
    }

    #[test]
    fn test_huge_metrics_saturate() {
        let filter = RecordFilter::default();
        let mut records = vec![
            record(0, None, 1e19, "SELECT * FROM big WHERE id = 1"),
            record(100, None, 1e19, "SELECT * FROM big WHERE id = 2"),
        ];
        for r in &mut records {
            r.rows_examined = u64::MAX;
        }
        let mut agg = aggregate(&records, &filter);
        agg.merge(aggregate(&records, &filter));

        let g = agg.groups.values().next().unwrap();
        assert_eq!(g.sample_count, 4);
        assert_eq!(g.sum_query_us, u64::MAX);
        assert_eq!(g.max_query_us, u64::MAX);
        assert_eq!(g.rows_examined_total, u64::MAX);
    }

    #[test]
    fn test_filters_are_counted() {
        let mut records = sample();
        records.push(record(400, None, 9.0, "SELECT /*!40001 SQL_NO_CACHE */ * FROM `orders`"));
        let filter = RecordFilter {
            min_time: 1.0,
            exclude_dumps: true,
            exclude_patterns: vec![Regex::new("^update").unwrap()],
            window: Some(TimeRange {
                start: parse_timestamp("2024-01-15T10:00:00Z").unwrap(),
                end: parse_timestamp("2024-01-15T11:00:00Z").unwrap(),
            }),
            ..Default::default()
        };
        let agg = aggregate(&records, &filter);
        assert_eq!(agg.counters.filtered_by_exclusion, 1);
        assert_eq!(agg.counters.filtered_by_threshold, 1);
        // UPDATE 没有时间戳，11:00 的记录落在半开区间之外
        assert_eq!(agg.counters.filtered_by_window, 2);
        assert_eq!(agg.counters.accepted, 1);
    }

    #[test]
    fn test_truncated_example_is_marked() {
        let mut r = record(0, None, 1.0, "SELECT * FROM big WHERE");
        r.is_truncated = true;
        let filter = RecordFilter { mark_truncated: true, ..Default::default() };
        let agg = aggregate(&[r], &filter);
        let g = agg.groups.values().next().unwrap();
        assert!(g.has_truncated);
        assert_eq!(g.example_sql(), "SELECT * FROM big WHERE /* TRUNCATED */");
    }

    #[test]
    fn test_most_frequent_tie_breaks_lexicographically() {
        let mut map = BTreeMap::new();
        bump(&mut map, "b", 2);
        bump(&mut map, "a", 2);
        bump(&mut map, "c", 1);
        bump(&mut map, "", 5);
        assert_eq!(most_frequent(&map), Some("a"));
        assert_eq!(most_frequent(&BTreeMap::new()), None);
    }
}
