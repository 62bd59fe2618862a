//! 慢日志记录模型与分片边界

use chrono::{DateTime, Utc};

/// 默认保留的示例 SQL 最大长度（字符）
pub const DEFAULT_EXAMPLE_MAX_LEN: usize = 1500;

/// 截断标记，追加在被截断记录的示例 SQL 之后
pub const TRUNCATED_MARK: &str = " /* TRUNCATED */";

/// 记录起始标记策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPolicy {
    /// 只有 `# Time:` 视为新记录开始
    #[default]
    Strict,
    /// `# User@Host:` / `# Query_time:` 在前一行不是头部注释时也视为新记录开始，
    /// 用于恢复缺失 `# Time:` 的日志
    Loose,
}

impl StartPolicy {
    pub fn from_loose(loose: bool) -> Self {
        if loose { Self::Loose } else { Self::Strict }
    }
}

/// 一条记录可能携带的所有时间来源
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordTimes {
    /// `# Time:` 头部
    pub time: Option<DateTime<Utc>>,
    /// `SET timestamp=N;`
    pub set_timestamp: Option<DateTime<Utc>>,
    /// 指标行中的 `Start:`
    pub start: Option<DateTime<Utc>>,
    /// 指标行中的 `End:`
    pub end: Option<DateTime<Utc>>,
}

impl RecordTimes {
    /// 按优先级遍历存在的时间来源
    pub fn iter(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        [self.time, self.set_timestamp, self.start, self.end]
            .into_iter()
            .flatten()
    }

    /// 主时间戳：第一个存在的来源
    pub fn primary(&self) -> Option<DateTime<Utc>> {
        self.iter().next()
    }

    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.iter().min()
    }

    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.iter().max()
    }

    pub fn is_empty(&self) -> bool {
        self.primary().is_none()
    }
}

/// 单条已解析的慢日志记录
///
/// 由记录解析器从一个分片的连续字节区间产生，聚合后即丢弃，
/// 只有派生统计和每个指纹的首个示例 SQL 会保留下来。
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Record {
    /// 记录起始行在文件中的绝对字节偏移
    pub offset: u64,
    /// 时间来源
    pub times: RecordTimes,
    /// 执行耗时（秒）
    pub query_time: f64,
    /// 锁等待（秒）
    pub lock_time: f64,
    /// 返回行数
    pub rows_sent: u64,
    /// 扫描行数
    pub rows_examined: u64,
    /// `user[user] @ host [ip]`
    pub user_host: String,
    /// 数据库名
    pub database: Option<String>,
    /// 原始 SQL 文本（已按保留长度截取）
    pub raw_sql: String,
    /// 记录体在文件末尾被截断
    pub is_truncated: bool,
}

impl Record {
    /// 主时间戳
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.times.primary()
    }
}

/// 按记录起始对齐的分片 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardBoundary {
    /// 分片序号，与字节顺序一致
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ShardBoundary {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// 边界扫描结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundaryScan {
    /// 严格递增的记录起始偏移
    pub record_starts: Vec<u64>,
    /// 文件总字节数
    pub file_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_times_order() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
        let times = RecordTimes {
            time: None,
            set_timestamp: Some(t1),
            start: Some(t2),
            end: None,
        };
        assert_eq!(times.primary(), Some(t1));
        assert_eq!(times.earliest(), Some(t2));
        assert_eq!(times.latest(), Some(t1));
        assert!(RecordTimes::default().is_empty());
    }

    #[test]
    fn test_start_policy_from_flag() {
        assert_eq!(StartPolicy::from_loose(true), StartPolicy::Loose);
        assert_eq!(StartPolicy::from_loose(false), StartPolicy::Strict);
    }
}
