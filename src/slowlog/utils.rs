//! 慢日志行级工具函数：起始标记判定、行分类、头部字段与时间戳解析

use crate::slowlog::types::StartPolicy;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

/// 主起始标记
pub const TIME_MARKER: &[u8] = b"# Time:";
/// 次级起始标记（宽松模式）
pub const QUERY_TIME_MARKER: &[u8] = b"# Query_time:";
pub const USER_HOST_MARKER: &[u8] = b"# User@Host:";

/// 判定起始标记只需要行首的这么多字节
pub const LINE_HEAD_LEN: usize = 16;

/// 记录起始判定器
///
/// 边界扫描器与记录解析器共用同一个判定器，保证两者对“哪一行是记录起始”
/// 的结论完全一致，分片因此不会切开记录。
///
/// 规则：
/// - `# Time:` 总是起始；
/// - 宽松模式下，`# User@Host:` / `# Query_time:` 在上一非空行不是 `# ` 头部行时
///   也是起始（即一段头部注释块的第一行）；
/// - 空白行不改变状态。
#[derive(Debug, Clone)]
pub struct StartDetector {
    policy: StartPolicy,
    prev_header: bool,
}

impl StartDetector {
    pub fn new(policy: StartPolicy) -> Self {
        Self { policy, prev_header: false }
    }

    /// 观察一整行（不含换行符），返回其是否为记录起始
    pub fn observe(&mut self, line: &[u8]) -> bool {
        let head = &line[..line.len().min(LINE_HEAD_LEN)];
        let blank = line.iter().all(u8::is_ascii_whitespace);
        self.observe_head(head, blank)
    }

    /// 只凭行首若干字节和“是否空白行”判定，供流式扫描使用
    pub fn observe_head(&mut self, head: &[u8], blank: bool) -> bool {
        if blank {
            return false;
        }
        let is_start = if head.starts_with(TIME_MARKER) {
            true
        } else if self.policy == StartPolicy::Loose
            && (head.starts_with(QUERY_TIME_MARKER)
                || head.starts_with(USER_HOST_MARKER))
        {
            !self.prev_header
        } else {
            false
        };
        self.prev_header = head.starts_with(b"# ");
        is_start
    }
}

/// 单行的语义分类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    Blank,
    /// `# Time:` 之后的文本
    TimeHeader(&'a str),
    /// `# User@Host:` 之后的文本（已去掉 `Id:`）
    UserHost(&'a str),
    /// 其他 `# ` 开头的头部行，内容为带标签的字段
    Metrics(&'a str),
    /// `use db;`
    UseDatabase(&'a str),
    /// `SET timestamp=N;` 中的 N
    SetTimestamp(&'a str),
    /// 服务重启时写入的横幅行
    Banner,
    /// SQL 语句正文
    Sql(&'a str),
}

lazy_static! {
    static ref USE_RE: Regex =
        Regex::new(r#"(?i)^\s*use\s+([`"\w.\-]+)\s*;"#).unwrap();
    static ref SET_TIMESTAMP_RE: Regex =
        Regex::new(r"^SET timestamp=(\d+);").unwrap();
    static ref BANNER_RES: [Regex; 3] = [
        Regex::new(r"^\S.*, Version: .*started with:\s*$").unwrap(),
        Regex::new(r"^Tcp port: \d+").unwrap(),
        Regex::new(r"^Time\s+Id\s+Command\s+Argument").unwrap(),
    ];
    static ref USER_HOST_ID_RE: Regex = Regex::new(r"\s+Id:\s*\d+\s*$").unwrap();
}

/// 对一行（已解码、去掉换行符）做分类
pub fn classify_line(line: &str) -> LineKind<'_> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return LineKind::Blank;
    }
    if let Some(rest) = line.strip_prefix("# Time:") {
        return LineKind::TimeHeader(rest.trim());
    }
    if let Some(rest) = line.strip_prefix("# User@Host:") {
        let rest = match USER_HOST_ID_RE.find(rest) {
            Some(m) => &rest[..m.start()],
            None => rest,
        };
        return LineKind::UserHost(rest.trim());
    }
    if let Some(rest) = line.strip_prefix("# ") {
        return LineKind::Metrics(rest);
    }
    if let Some(caps) = SET_TIMESTAMP_RE.captures(line) {
        if let Some(m) = caps.get(1) {
            return LineKind::SetTimestamp(m.as_str());
        }
    }
    if let Some(caps) = USE_RE.captures(line) {
        if let Some(m) = caps.get(1) {
            return LineKind::UseDatabase(m.as_str().trim_matches(['`', '"']));
        }
    }
    if BANNER_RES.iter().any(|re| re.is_match(line)) {
        return LineKind::Banner;
    }
    LineKind::Sql(line)
}

/// 头部行中已知的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderKey {
    QueryTime,
    LockTime,
    RowsSent,
    RowsExamined,
    Schema,
    Start,
    End,
}

impl HeaderKey {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Query_time" => Some(Self::QueryTime),
            "Lock_time" => Some(Self::LockTime),
            "Rows_sent" => Some(Self::RowsSent),
            "Rows_examined" => Some(Self::RowsExamined),
            "Schema" => Some(Self::Schema),
            "Start" => Some(Self::Start),
            "End" => Some(Self::End),
            _ => None,
        }
    }
}

/// 从 `Key: value` 形式的头部行中提取的字段，缺失即为 `None`
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HeaderFields {
    pub query_time: Option<f64>,
    pub lock_time: Option<f64>,
    pub rows_sent: Option<u64>,
    pub rows_examined: Option<u64>,
    pub schema: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl HeaderFields {
    /// 解析一行头部字段，无法识别的标签和格式错误的值都被忽略
    ///
    /// `Query_time: 2.000123  Lock_time: 0.000050 Rows_sent: 1  Rows_examined: 1000`
    pub fn parse(text: &str) -> Self {
        let mut fields = Self::default();
        let mut tokens = text.split_whitespace();
        while let Some(token) = tokens.next() {
            let Some(tag) = token.strip_suffix(':') else {
                continue;
            };
            let Some(key) = HeaderKey::from_tag(tag) else {
                continue;
            };
            let Some(value) = tokens.next() else {
                break;
            };
            match key {
                HeaderKey::QueryTime => {
                    fields.query_time = parse_seconds(value);
                }
                HeaderKey::LockTime => fields.lock_time = parse_seconds(value),
                HeaderKey::RowsSent => fields.rows_sent = value.parse().ok(),
                HeaderKey::RowsExamined => {
                    fields.rows_examined = value.parse().ok();
                }
                HeaderKey::Schema => {
                    let v = value.trim_matches(['`', '"']);
                    if !v.is_empty() {
                        fields.schema = Some(v.to_string());
                    }
                }
                HeaderKey::Start => fields.start = parse_timestamp(value),
                HeaderKey::End => fields.end = parse_timestamp(value),
            }
        }
        fields
    }
}

/// 单个耗时字段可接受的上限（秒），超出按缺失处理
pub const MAX_SECONDS: f64 = 1e9;

/// 解析非负秒数
pub fn parse_seconds(value: &str) -> Option<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && (0.0..=MAX_SECONDS).contains(v))
}

/// 秒 → 整数微秒；聚合时用整数累加，保证求和与分片方式无关
pub fn seconds_to_micros(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * 1_000_000.0).round() as u64
}

/// 整数微秒 → 秒
pub fn micros_to_seconds(micros: u64) -> f64 {
    micros as f64 / 1_000_000.0
}

/// 解析慢日志中出现的各种时间格式，不带时区的一律按 UTC 处理
///
/// - `2024-01-15T10:00:00.123456Z` / 带偏移的 RFC 3339
/// - `2024-01-15T10:00:00.123456`
/// - `2024-01-15 10:00:00`
/// - `240115 10:00:00`（MySQL 5.x，小时可能只有一位）
/// - `1705312800`（Unix 秒）
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        if s.len() > 10 {
            return None;
        }
        let secs: i64 = s.parse().ok()?;
        return Utc.timestamp_opt(secs, 0).single();
    }

    if s.contains('T') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        return NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|n| n.and_utc());
    }

    if s.contains('-') {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(n.and_utc());
        }
        return s
            .get(..19)
            .and_then(|p| {
                NaiveDateTime::parse_from_str(p, "%Y-%m-%d %H:%M:%S").ok()
            })
            .map(|n| n.and_utc());
    }

    let mut parts = s.split_whitespace();
    let date = parts.next()?;
    let time = parts.next()?;
    if date.len() != 6 {
        return None;
    }
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%y%m%d %H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
}

/// 将一行字节解码为字符串，非法 UTF-8 以替换字符代替
///
/// 返回值的第二项表示是否发生了替换，调用方只计数，不视为错误。
pub fn decode_line(line_bytes: &[u8]) -> (Cow<'_, str>, bool) {
    let decoded = String::from_utf8_lossy(line_bytes);
    let replaced = matches!(decoded, Cow::Owned(_));
    (decoded, replaced)
}

/// 去掉行尾的 `\n` / `\r\n`
pub fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// 按字符数截取，避免切断多字节字符
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
