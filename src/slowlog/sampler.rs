//! 时间范围预检
//!
//! 在固定的字节预算内（与文件大小无关）读取文件头、若干均匀分布的中间点
//! 和文件尾，收集其中能识别的时间戳，估计日志覆盖的时间跨度，并判断请求
//! 的时间窗口是否与之相交。
//!
//! 预检只是建议：它从不过滤记录，完整解析时仍会逐条按时间窗口精确过滤。
//! 预算内一个时间戳都没读到时，结论是 [`Verdict::Unknown`]，调用方应回退到
//! 完整解析，而不是当作“没有数据”。

use crate::error::{Result, SlowlogError};
use crate::slowlog::utils::{
    HeaderFields, LineKind, classify_line, parse_timestamp,
};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use memchr::{memchr, memrchr};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;

/// 默认采样预算
pub const DEFAULT_SAMPLE_BUDGET: u64 = 32 * 1024 * 1024;
/// 默认中间采样点数
pub const DEFAULT_SAMPLE_POINTS: usize = 3;
/// 中间采样点数上限
pub const MAX_SAMPLE_POINTS: usize = 64;
/// `LastDays` 允许的最大天数
pub const MAX_WINDOW_DAYS: u32 = 36_500;

/// 时间窗口选择器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeWindow {
    #[default]
    All,
    /// UTC 当天
    Today,
    /// 从 N 天前的 UTC 零点到现在
    LastDays(u32),
}

impl TimeWindow {
    /// 解析窗口选择器：`all`、`today`、`N`、`Nd`、`last-N-days`
    ///
    /// `0` 天等同于 `today`。
    pub fn parse(selector: &str) -> Result<Self> {
        let s = selector.trim().to_ascii_lowercase();
        match s.as_str() {
            "" | "all" => return Ok(Self::All),
            "today" => return Ok(Self::Today),
            _ => {}
        }
        let digits = s
            .strip_prefix("last-")
            .and_then(|rest| {
                rest.strip_suffix("-days").or_else(|| rest.strip_suffix("-day"))
            })
            .or_else(|| s.strip_suffix('d'))
            .unwrap_or(s.as_str());
        match digits.parse::<u32>() {
            Ok(0) => Ok(Self::Today),
            Ok(n) if n <= MAX_WINDOW_DAYS => Ok(Self::LastDays(n)),
            _ => Err(SlowlogError::invalid_window(selector)),
        }
    }

    /// 以 `now` 为基准解析成具体时间范围，`All` 返回 `None`
    pub fn resolve(&self, now: DateTime<Utc>) -> Option<TimeRange> {
        let midnight = Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN));
        match *self {
            Self::All => None,
            Self::Today => Some(TimeRange { start: midnight, end: midnight + Duration::days(1) }),
            Self::LastDays(n) => Some(TimeRange {
                start: midnight - Duration::days(i64::from(n)),
                end: now,
            }),
        }
    }
}

impl FromStr for TimeWindow {
    type Err = SlowlogError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Today => write!(f, "today"),
            Self::LastDays(n) => write!(f, "last-{n}-days"),
        }
    }
}

/// 半开时间区间 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    /// 与闭区间 `[min, max]` 是否相交
    pub fn intersects(&self, min: DateTime<Utc>, max: DateTime<Utc>) -> bool {
        self.start <= max && min < self.end
    }
}

/// 覆盖程度分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// 文件时间跨度完全落在窗口内
    FullFileInRange,
    /// 窗口完全落在文件时间跨度内
    FullRangeCovered,
    MostlyCovered,
    PartiallyCovered,
    LimitedOverlap,
    NoOverlap,
    Unknown,
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FullFileInRange => "full_file_in_range",
            Self::FullRangeCovered => "full_range_covered",
            Self::MostlyCovered => "mostly_covered",
            Self::PartiallyCovered => "partially_covered",
            Self::LimitedOverlap => "limited_overlap",
            Self::NoOverlap => "no_overlap",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// 预检结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// 有重叠，需要完整解析
    Overlap,
    /// 无重叠，可以直接输出空报告
    NoOverlap,
    /// 没读到时间戳，回退到完整解析
    Unknown,
}

/// 采样选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerOptions {
    /// 总字节预算
    pub budget_bytes: u64,
    /// 头尾之外的中间采样点数
    pub interior_points: usize,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self { budget_bytes: DEFAULT_SAMPLE_BUDGET, interior_points: DEFAULT_SAMPLE_POINTS }
    }
}

/// 时间范围估计
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRangeEstimate {
    pub observed_min: Option<DateTime<Utc>>,
    pub observed_max: Option<DateTime<Utc>>,
    /// 读到的时间戳个数
    pub hits: usize,
    pub bytes_sampled: u64,
    pub file_size: u64,
    pub coverage: Coverage,
    /// `[0, 1]` 的覆盖置信度
    pub confidence: f64,
    pub verdict: Verdict,
}

impl TimeRangeEstimate {
    /// 是否可以跳过完整解析
    pub fn should_skip(&self) -> bool {
        self.verdict == Verdict::NoOverlap
    }
}

/// 采样时累积的时间戳
#[derive(Debug, Default)]
struct Observed {
    min: Option<DateTime<Utc>>,
    max: Option<DateTime<Utc>>,
    hits: usize,
}

impl Observed {
    fn add(&mut self, t: DateTime<Utc>) {
        self.hits += 1;
        self.min = Some(self.min.map_or(t, |m| m.min(t)));
        self.max = Some(self.max.map_or(t, |m| m.max(t)));
    }

    fn scan_text(&mut self, text: &str) {
        for line in text.lines() {
            match classify_line(line) {
                LineKind::TimeHeader(v) | LineKind::SetTimestamp(v) => {
                    if let Some(t) = parse_timestamp(v) {
                        self.add(t);
                    }
                }
                LineKind::Metrics(v) if v.contains("Start:") || v.contains("End:") => {
                    let fields = HeaderFields::parse(v);
                    for t in [fields.start, fields.end].into_iter().flatten() {
                        self.add(t);
                    }
                }
                _ => {}
            }
        }
    }
}

/// 计算各采样窗口 `(offset, len)`
fn sample_windows(file_size: u64, opts: &SamplerOptions) -> Vec<(u64, u64)> {
    if file_size <= opts.budget_bytes {
        return vec![(0, file_size)];
    }
    let interior = opts.interior_points.min(MAX_SAMPLE_POINTS) as u64;
    let points = interior + 2;
    let per = (opts.budget_bytes / points).max(1);

    let mut windows = Vec::with_capacity(points as usize);
    windows.push((0, per));
    for i in 1..=interior {
        let center = (u128::from(file_size) * u128::from(i) / u128::from(points - 1)) as u64;
        windows.push((center.saturating_sub(per / 2).min(file_size - per), per));
    }
    windows.push((file_size - per, per));
    windows
}

/// 从可随机访问的输入中采样
pub fn sample_reader<R: Read + Seek>(
    mut reader: R,
    file_size: u64,
    window: Option<&TimeRange>,
    opts: &SamplerOptions,
) -> io::Result<TimeRangeEstimate> {
    let mut observed = Observed::default();
    let mut bytes_sampled = 0;
    let mut buf = Vec::new();

    for (offset, len) in sample_windows(file_size, opts) {
        reader.seek(SeekFrom::Start(offset))?;
        buf.clear();
        (&mut reader).take(len).read_to_end(&mut buf)?;
        bytes_sampled += buf.len() as u64;

        // 窗口首尾的残行不可信
        let begin = if offset == 0 {
            0
        } else {
            memchr(b'\n', &buf).map_or(buf.len(), |i| i + 1)
        };
        let end = if offset + buf.len() as u64 >= file_size {
            buf.len()
        } else {
            memrchr(b'\n', &buf).map_or(0, |i| i + 1)
        };
        if begin < end {
            observed.scan_text(&String::from_utf8_lossy(&buf[begin..end]));
        }
    }

    let (coverage, confidence, verdict) =
        classify(observed.min, observed.max, window);

    Ok(TimeRangeEstimate {
        observed_min: observed.min,
        observed_max: observed.max,
        hits: observed.hits,
        bytes_sampled,
        file_size,
        coverage,
        confidence,
        verdict,
    })
}

/// 对文件做预检
pub fn sample_file<P: AsRef<Path>>(
    path: P,
    window: Option<&TimeRange>,
    opts: &SamplerOptions,
) -> Result<TimeRangeEstimate> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let estimate = sample_reader(file, file_size, window, opts)?;

    #[cfg(feature = "logging")]
    tracing::info!(
        "时间范围预检: {}, 采样 {} 字节, 时间戳 {} 个, 覆盖 {} ({:.2}), 结论 {:?}",
        path.display(),
        estimate.bytes_sampled,
        estimate.hits,
        estimate.coverage,
        estimate.confidence,
        estimate.verdict
    );

    Ok(estimate)
}

/// 根据观测到的时间跨度与请求窗口给出覆盖分类、置信度和结论
pub fn classify(
    min: Option<DateTime<Utc>>,
    max: Option<DateTime<Utc>>,
    window: Option<&TimeRange>,
) -> (Coverage, f64, Verdict) {
    let (Some(min), Some(max)) = (min, max) else {
        return (Coverage::Unknown, 0.0, Verdict::Unknown);
    };
    let Some(w) = window else {
        return (Coverage::FullFileInRange, 1.0, Verdict::Overlap);
    };
    if !w.intersects(min, max) {
        return (Coverage::NoOverlap, 0.0, Verdict::NoOverlap);
    }

    if min >= w.start && max < w.end {
        return (Coverage::FullFileInRange, 1.0, Verdict::Overlap);
    }
    if w.start >= min && w.end <= max {
        return (Coverage::FullRangeCovered, 1.0, Verdict::Overlap);
    }

    let file_span = (max - min).num_milliseconds() as f64;
    let overlap = (max.min(w.end) - min.max(w.start)).num_milliseconds() as f64;
    let ratio = if file_span > 0.0 { (overlap / file_span).clamp(0.0, 1.0) } else { 1.0 };
    let (coverage, confidence) = if ratio > 0.8 {
        (Coverage::MostlyCovered, 0.9)
    } else if ratio > 0.5 {
        (Coverage::PartiallyCovered, 0.7)
    } else {
        (Coverage::LimitedOverlap, ratio * 0.5)
    };
    (coverage, confidence, Verdict::Overlap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn at(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    fn january_log(records: usize) -> String {
        let mut s = String::new();
        for i in 0..records {
            s.push_str(&format!(
                "# Time: 2024-01-{:02}T10:00:00Z\n# Query_time: 1.0  Lock_time: 0.0 Rows_sent: 1  Rows_examined: 1\nselect {i};\n",
                i % 28 + 1
            ));
        }
        s
    }

    #[test]
    fn test_parse_window_selectors() {
        assert_eq!(TimeWindow::parse("all").unwrap(), TimeWindow::All);
        assert_eq!(TimeWindow::parse("Today").unwrap(), TimeWindow::Today);
        assert_eq!(TimeWindow::parse("0").unwrap(), TimeWindow::Today);
        assert_eq!(TimeWindow::parse("7").unwrap(), TimeWindow::LastDays(7));
        assert_eq!(TimeWindow::parse("7d").unwrap(), TimeWindow::LastDays(7));
        assert_eq!(TimeWindow::parse("last-30-days").unwrap(), TimeWindow::LastDays(30));
        assert!(TimeWindow::parse("yesterday").is_err());
        assert!(TimeWindow::parse("-1").is_err());
        assert!(TimeWindow::parse("99999999").is_err());
        assert_eq!("last-3-days".parse::<TimeWindow>().unwrap().to_string(), "last-3-days");
    }

    #[test]
    fn test_resolve_windows() {
        let now = at("2024-03-10T15:30:00Z");
        assert!(TimeWindow::All.resolve(now).is_none());
        let today = TimeWindow::Today.resolve(now).unwrap();
        assert_eq!(today.start, at("2024-03-10T00:00:00Z"));
        assert_eq!(today.end, at("2024-03-11T00:00:00Z"));
        let last = TimeWindow::LastDays(1).resolve(now).unwrap();
        assert_eq!(last.start, at("2024-03-09T00:00:00Z"));
        assert_eq!(last.end, now);
        assert!(last.contains(at("2024-03-09T00:00:00Z")));
        assert!(!last.contains(now));
    }

    #[test]
    fn test_january_log_last_day_is_no_overlap() {
        let log = january_log(200);
        let window = TimeWindow::LastDays(1).resolve(at("2024-03-01T12:00:00Z"));
        let est = sample_reader(
            Cursor::new(log.as_bytes()),
            log.len() as u64,
            window.as_ref(),
            &SamplerOptions::default(),
        )
        .unwrap();
        assert_eq!(est.verdict, Verdict::NoOverlap);
        assert!(est.should_skip());
        assert_eq!(est.observed_min, Some(at("2024-01-01T10:00:00Z")));
        assert_eq!(est.observed_max, Some(at("2024-01-28T10:00:00Z")));
    }

    #[test]
    fn test_small_budget_samples_head_interior_and_tail() {
        let log = january_log(2000);
        let opts = SamplerOptions { budget_bytes: 4096, interior_points: 3 };
        let est = sample_reader(Cursor::new(log.as_bytes()), log.len() as u64, None, &opts)
            .unwrap();
        assert!(est.bytes_sampled <= 4096);
        assert!(est.hits > 0);
        assert_eq!(est.verdict, Verdict::Overlap);
    }

    #[test]
    fn test_interior_points_are_capped() {
        let opts = SamplerOptions { budget_bytes: 4096, interior_points: usize::MAX };
        let windows = sample_windows(1 << 20, &opts);
        assert_eq!(windows.len(), MAX_SAMPLE_POINTS + 2);
        assert!(windows.iter().all(|&(offset, len)| offset + len <= 1 << 20));
    }

    #[test]
    fn test_no_timestamps_is_unknown() {
        let log = "select 1;\nselect 2;\n";
        let window = TimeWindow::Today.resolve(Utc::now());
        let est = sample_reader(
            Cursor::new(log.as_bytes()),
            log.len() as u64,
            window.as_ref(),
            &SamplerOptions::default(),
        )
        .unwrap();
        assert_eq!(est.verdict, Verdict::Unknown);
        assert_eq!(est.coverage, Coverage::Unknown);
        assert!(!est.should_skip());
    }

    #[test]
    fn test_set_timestamp_and_start_end_are_sources() {
        let log = "SET timestamp=1705312800;\n# Query_time: 1.0 Start: 2024-01-20T00:00:00Z End: 2024-01-20T00:00:01Z\n";
        let est = sample_reader(
            Cursor::new(log.as_bytes()),
            log.len() as u64,
            None,
            &SamplerOptions::default(),
        )
        .unwrap();
        assert_eq!(est.hits, 3);
        assert_eq!(est.observed_min, Some(at("2024-01-15T10:00:00Z")));
        assert_eq!(est.observed_max, Some(at("2024-01-20T00:00:01Z")));
    }

    #[test]
    fn test_classify_coverage() {
        let w = TimeRange { start: at("2024-01-10T00:00:00Z"), end: at("2024-01-20T00:00:00Z") };
        let c = |a: &str, b: &str| classify(Some(at(a)), Some(at(b)), Some(&w));

        assert_eq!(c("2024-01-11T00:00:00Z", "2024-01-12T00:00:00Z").0, Coverage::FullFileInRange);
        assert_eq!(c("2024-01-01T00:00:00Z", "2024-01-31T00:00:00Z").0, Coverage::FullRangeCovered);
        assert_eq!(c("2024-01-09T00:00:00Z", "2024-01-19T12:00:00Z").0, Coverage::MostlyCovered);
        let (cov, conf, verdict) = c("2024-01-01T00:00:00Z", "2024-01-11T00:00:00Z");
        assert_eq!(cov, Coverage::LimitedOverlap);
        assert!((conf - 0.05).abs() < 1e-9);
        assert_eq!(verdict, Verdict::Overlap);
        assert_eq!(c("2024-02-01T00:00:00Z", "2024-02-02T00:00:00Z").2, Verdict::NoOverlap);
        assert_eq!(classify(None, None, Some(&w)).2, Verdict::Unknown);
    }
}
