//! 记录解析器 - 分片内的行状态机
//!
//! ## 状态
//!
//! ```text
//!                 起始标记                 非头部的正文行
//! SeekingStart ─────────────▶ InHeader ─────────────────▶ InStatement
//!      ▲                         │  ▲                          │
//!      │                         └──┘ 头部/use/SET 行           │
//!      └──── 分片结束 ◀──────────────────── 下一个起始标记 ◀─────┘
//! ```
//!
//! - 分片开头、遇到第一个起始标记之前的行是残片，直接丢弃；
//! - 头部行按固定字段表解析，缺失字段取 0 / `None`，不会中止记录；
//! - 分片在 `InStatement` 状态下到达文件末尾时，记录照常产出但标记为截断；
//! - 非法 UTF-8 字节被替换并计数，从不报错。

use crate::error::{Result, SlowlogError};
use crate::slowlog::types::{
    Record, RecordTimes, ShardBoundary, StartPolicy,
};
use crate::slowlog::utils::{
    HeaderFields, LineKind, StartDetector, classify_line, decode_line,
    parse_timestamp, trim_line_ending, truncate_chars,
};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// 单条记录保留的 SQL 正文上限（字符）
pub const DEFAULT_MAX_SQL_CHARS: usize = 1 << 20;

/// 每处理这么多行检查一次取消标志
pub const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// 解析选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserOptions {
    pub policy: StartPolicy,
    pub max_sql_chars: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self { policy: StartPolicy::Strict, max_sql_chars: DEFAULT_MAX_SQL_CHARS }
    }
}

impl ParserOptions {
    pub fn with_policy(policy: StartPolicy) -> Self {
        Self { policy, ..Self::default() }
    }
}

/// 解析阶段的行级计数器
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParseCounters {
    /// 处理的行数
    pub lines: u64,
    /// `# Time:` 行数
    pub header_lines: u64,
    /// `# Query_time:` 行数
    pub metric_lines: u64,
    /// 发生字节替换的行数
    pub decode_replacements: u64,
    /// 分片开头被丢弃的残片行数
    pub fragment_lines: u64,
    /// 跳过的服务器横幅行数
    pub banner_lines: u64,
    /// 产出的记录数
    pub records: u64,
    /// 有起始标记但没有 SQL 正文的记录数
    pub empty_records: u64,
    /// 截断记录数
    pub truncated_records: u64,
}

impl ParseCounters {
    pub fn merge(&mut self, other: &ParseCounters) {
        self.lines += other.lines;
        self.header_lines += other.header_lines;
        self.metric_lines += other.metric_lines;
        self.decode_replacements += other.decode_replacements;
        self.fragment_lines += other.fragment_lines;
        self.banner_lines += other.banner_lines;
        self.records += other.records;
        self.empty_records += other.empty_records;
        self.truncated_records += other.truncated_records;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    SeekingStart,
    InHeader,
    InStatement,
}

/// 正在累积的记录
#[derive(Debug, Default)]
struct PendingRecord {
    offset: u64,
    times: RecordTimes,
    fields: HeaderFields,
    user_host: String,
    database: Option<String>,
    sql: String,
    sql_chars: usize,
}

impl PendingRecord {
    fn merge_fields(&mut self, fields: HeaderFields) {
        let f = &mut self.fields;
        f.query_time = fields.query_time.or(f.query_time);
        f.lock_time = fields.lock_time.or(f.lock_time);
        f.rows_sent = fields.rows_sent.or(f.rows_sent);
        f.rows_examined = fields.rows_examined.or(f.rows_examined);
        if fields.schema.is_some() {
            f.schema = fields.schema;
        }
        if fields.start.is_some() {
            self.times.start = fields.start;
        }
        if fields.end.is_some() {
            self.times.end = fields.end;
        }
    }

    fn push_sql(&mut self, line: &str, max_chars: usize) {
        if self.sql_chars >= max_chars {
            return;
        }
        if !self.sql.is_empty() {
            self.sql.push('\n');
            self.sql_chars += 1;
        }
        let kept = truncate_chars(line, max_chars.saturating_sub(self.sql_chars));
        self.sql.push_str(kept);
        self.sql_chars += kept.chars().count();
    }
}

/// 行驱动的记录解析器，每产出一条记录就交给回调
pub struct RecordParser<F: FnMut(Record)> {
    options: ParserOptions,
    at_eof: bool,
    state: ParseState,
    detector: StartDetector,
    current: PendingRecord,
    counters: ParseCounters,
    on_record: F,
}

impl<F: FnMut(Record)> RecordParser<F> {
    /// `at_eof` 表示本分片的末尾就是文件末尾
    pub fn new(options: ParserOptions, at_eof: bool, on_record: F) -> Self {
        let detector = StartDetector::new(options.policy);
        Self {
            options,
            at_eof,
            state: ParseState::SeekingStart,
            detector,
            current: PendingRecord::default(),
            counters: ParseCounters::default(),
            on_record,
        }
    }

    /// 处理一行，`offset` 为该行在文件中的绝对偏移
    pub fn push_line(&mut self, raw: &[u8], offset: u64) {
        self.counters.lines += 1;
        let bytes = trim_line_ending(raw);

        if self.detector.observe(bytes) {
            self.flush(false);
            self.current = PendingRecord { offset, ..PendingRecord::default() };
            self.state = ParseState::InHeader;
        }

        if self.state == ParseState::SeekingStart {
            self.counters.fragment_lines += 1;
            return;
        }

        let (line, replaced) = decode_line(bytes);
        if replaced {
            self.counters.decode_replacements += 1;
            #[cfg(feature = "logging")]
            tracing::trace!(offset, "行内存在非法 UTF-8 字节，已替换");
        }

        match classify_line(&line) {
            LineKind::Blank => {}
            LineKind::TimeHeader(value) => {
                self.counters.header_lines += 1;
                self.current.times.time = parse_timestamp(value);
            }
            LineKind::UserHost(value) => {
                self.current.user_host = value.to_string();
            }
            LineKind::Metrics(text) => {
                if text.starts_with("Query_time:") {
                    self.counters.metric_lines += 1;
                }
                self.current.merge_fields(HeaderFields::parse(text));
            }
            LineKind::UseDatabase(db) => {
                self.current.database = Some(db.to_string());
            }
            LineKind::SetTimestamp(value) => {
                self.current.times.set_timestamp = parse_timestamp(value);
            }
            LineKind::Banner => self.counters.banner_lines += 1,
            LineKind::Sql(text) => {
                self.current.push_sql(text, self.options.max_sql_chars);
                self.state = ParseState::InStatement;
            }
        }
    }

    /// 分片结束：刷出最后一条记录并返回计数
    pub fn finish(mut self) -> ParseCounters {
        self.flush(true);
        self.counters
    }

    fn flush(&mut self, end_of_range: bool) {
        if self.state == ParseState::SeekingStart {
            return;
        }
        let truncated =
            end_of_range && self.at_eof && self.state == ParseState::InStatement;
        let pending = std::mem::take(&mut self.current);
        self.state = ParseState::SeekingStart;

        let sql = pending.sql.trim();
        if sql.is_empty() {
            self.counters.empty_records += 1;
            #[cfg(feature = "logging")]
            tracing::trace!(offset = pending.offset, "记录没有 SQL 正文，跳过");
            return;
        }

        self.counters.records += 1;
        if truncated {
            self.counters.truncated_records += 1;
        }

        let database = pending.database.or(pending.fields.schema);
        let record = Record {
            offset: pending.offset,
            times: pending.times,
            query_time: pending.fields.query_time.unwrap_or(0.0),
            lock_time: pending.fields.lock_time.unwrap_or(0.0),
            rows_sent: pending.fields.rows_sent.unwrap_or(0),
            rows_examined: pending.fields.rows_examined.unwrap_or(0),
            user_host: pending.user_host,
            database,
            raw_sql: sql.to_string(),
            is_truncated: truncated,
        };
        (self.on_record)(record);
    }
}

/// 从任意 `BufRead` 解析记录
///
/// `base_offset` 为读取起点在文件中的偏移；`should_stop` 每隔
/// [`CANCEL_CHECK_INTERVAL`] 行检查一次，返回 `true` 时放弃本分片。
pub fn parse_reader<R, S, F>(
    mut reader: R,
    base_offset: u64,
    at_eof: bool,
    options: &ParserOptions,
    should_stop: S,
    on_record: F,
) -> Result<ParseCounters>
where
    R: BufRead,
    S: Fn() -> bool,
    F: FnMut(Record),
{
    let mut parser = RecordParser::new(options.clone(), at_eof, on_record);
    let mut buf = Vec::with_capacity(4096);
    let mut offset = base_offset;
    let mut line_no: u64 = 0;

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        parser.push_line(&buf, offset);
        offset += n as u64;
        line_no += 1;
        if line_no % CANCEL_CHECK_INTERVAL == 0 && should_stop() {
            return Err(SlowlogError::cancelled(format!(
                "解析在偏移 {offset} 处中止"
            )));
        }
    }

    Ok(parser.finish())
}

/// 只读取并解析文件中的一个分片
pub fn parse_shard<P, S, F>(
    path: P,
    shard: &ShardBoundary,
    at_eof: bool,
    options: &ParserOptions,
    should_stop: S,
    on_record: F,
) -> Result<ParseCounters>
where
    P: AsRef<Path>,
    S: Fn() -> bool,
    F: FnMut(Record),
{
    let mut file = File::open(path.as_ref())?;
    file.seek(SeekFrom::Start(shard.start))?;
    let reader = BufReader::with_capacity(1 << 16, file.take(shard.len()));
    parse_reader(reader, shard.start, at_eof, options, should_stop, on_record)
}

/// 解析一段完整的文本（视为整个文件）
pub fn parse_str(text: &str, options: &ParserOptions) -> (Vec<Record>, ParseCounters) {
    let mut records = Vec::new();
    let counters = parse_reader(
        text.as_bytes(),
        0,
        true,
        options,
        || false,
        |r| records.push(r),
    )
    .unwrap_or_default();
    (records, counters)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "# Time: 2024-01-15T10:00:00.000000Z
# User@Host: app[app] @ web1 [10.0.0.1]  Id:    42
# Query_time: 2.500000  Lock_time: 0.000100 Rows_sent: 10  Rows_examined: 5000
use shop;
SET timestamp=1705312800;
SELECT * FROM orders
WHERE id = 42;
# Time: 2024-01-15T10:00:05.000000Z
# User@Host: app[app] @ web1 [10.0.0.1]  Id:    43
# Query_time: 0.100000  Lock_time: 0.000000 Rows_sent: 0  Rows_examined: 0
UPDATE orders SET status = 'paid' WHERE id = 7;
";

    #[test]
    fn test_parse_two_records_with_fields() {
        let (records, counters) = parse_str(LOG, &ParserOptions::default());
        assert_eq!(records.len(), 2);
        assert_eq!(counters.header_lines, 2);
        assert_eq!(counters.metric_lines, 2);

        let r = &records[0];
        assert_eq!(r.offset, 0);
        assert_eq!(r.query_time, 2.5);
        assert_eq!(r.lock_time, 0.0001);
        assert_eq!(r.rows_sent, 10);
        assert_eq!(r.rows_examined, 5000);
        assert_eq!(r.user_host, "app[app] @ web1 [10.0.0.1]");
        assert_eq!(r.database.as_deref(), Some("shop"));
        assert_eq!(r.raw_sql, "SELECT * FROM orders\nWHERE id = 42;");
        assert!(r.times.set_timestamp.is_some());
        assert!(!r.is_truncated);

        let second = &records[1];
        assert!(LOG[second.offset as usize..].starts_with("# Time: 2024-01-15T10:00:05"));
        assert!(second.database.is_none());
    }

    #[test]
    fn test_missing_fields_default_to_zero() {
        let text = "# Time: 2024-01-15T10:00:00Z\nselect 1;\n";
        let (records, _) = parse_str(text, &ParserOptions::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].query_time, 0.0);
        assert_eq!(records[0].rows_examined, 0);
        assert_eq!(records[0].user_host, "");
    }

    #[test]
    fn test_leading_fragment_discarded() {
        let text = "WHERE tail = 'of previous record';\n# Time: 2024-01-15T10:00:00Z\n# Query_time: 1.0\nselect 1;\n";
        let (records, counters) = parse_str(text, &ParserOptions::default());
        assert_eq!(records.len(), 1);
        assert_eq!(counters.fragment_lines, 1);
        assert_eq!(records[0].raw_sql, "select 1;");
    }

    #[test]
    fn test_last_record_at_eof_is_truncated_only_when_at_eof() {
        let text = "# Time: 2024-01-15T10:00:00Z\n# Query_time: 1.0\nselect 1;\n# Time: 2024-01-15T10:00:01Z\n# Query_time: 9.0\nSELECT * FROM big WHERE";
        let (records, counters) = parse_str(text, &ParserOptions::default());
        assert_eq!(records.len(), 2);
        assert!(!records[0].is_truncated);
        assert!(records[1].is_truncated);
        assert_eq!(counters.truncated_records, 1);

        let mut not_eof = Vec::new();
        parse_reader(
            text.as_bytes(),
            0,
            false,
            &ParserOptions::default(),
            || false,
            |r| not_eof.push(r),
        )
        .unwrap();
        assert!(not_eof.iter().all(|r| !r.is_truncated));
    }

    #[test]
    fn test_empty_record_is_counted_not_emitted() {
        let text = "# Time: 2024-01-15T10:00:00Z\n# Query_time: 1.0\n# Time: 2024-01-15T10:00:01Z\n# Query_time: 1.0\nselect 1;\n";
        let (records, counters) = parse_str(text, &ParserOptions::default());
        assert_eq!(records.len(), 1);
        assert_eq!(counters.empty_records, 1);
    }

    #[test]
    fn test_loose_mode_splits_records_without_time_marker() {
        let text = "# Time: 2024-01-15T10:00:00Z\n# Query_time: 1.0\nselect 1;\n# User@Host: b[b] @ h []\n# Query_time: 2.0\nselect 2;\n";
        let (strict, _) = parse_str(text, &ParserOptions::default());
        assert_eq!(strict.len(), 1);

        let (loose, _) =
            parse_str(text, &ParserOptions::with_policy(StartPolicy::Loose));
        assert_eq!(loose.len(), 2);
        assert_eq!(loose[1].query_time, 2.0);
        assert_eq!(loose[1].user_host, "b[b] @ h []");
    }

    #[test]
    fn test_invalid_utf8_is_replaced_and_counted() {
        let mut data = b"# Time: 2024-01-15T10:00:00Z\n# Query_time: 1.0\nselect '".to_vec();
        data.extend_from_slice(&[0xff, 0xfe]);
        data.extend_from_slice(b"';\n");
        let mut records = Vec::new();
        let counters = parse_reader(
            data.as_slice(),
            0,
            true,
            &ParserOptions::default(),
            || false,
            |r| records.push(r),
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(counters.decode_replacements, 1);
        assert!(records[0].raw_sql.contains('\u{FFFD}'));
    }

    #[test]
    fn test_banner_lines_are_not_sql() {
        let text = "# Time: 2024-01-15T10:00:00Z\n# Query_time: 1.0\nselect 1;\n/usr/sbin/mysqld, Version: 8.0.36 (MySQL). started with:\nTcp port: 3306  Unix socket: /tmp/mysql.sock\nTime                 Id Command    Argument\n";
        let (records, counters) = parse_str(text, &ParserOptions::default());
        assert_eq!(records[0].raw_sql, "select 1;");
        assert_eq!(counters.banner_lines, 3);
    }

    #[test]
    fn test_should_stop_cancels() {
        let text = "select 1;\n".repeat(CANCEL_CHECK_INTERVAL as usize + 1);
        let res = parse_reader(
            text.as_bytes(),
            0,
            true,
            &ParserOptions::default(),
            || true,
            |_| {},
        );
        assert!(res.unwrap_err().is_cancelled());
    }
}
