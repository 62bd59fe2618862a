//! 慢日志解析模块
//!
//! 提供 MySQL 慢查询日志的边界扫描、时间范围预检、记录解析和 SQL 规范化

pub mod boundary;
pub mod normalize;
pub mod parser;
pub mod sampler;
pub mod types;
pub mod utils;

// 重新导出核心类型和函数
pub use boundary::{plan_shards, scan_file, scan_record_starts};
pub use normalize::{
    Fingerprint, NormalizedSql, extract_main_table, fingerprint, is_dump_statement,
    normalize_sql,
};
pub use parser::{ParseCounters, ParserOptions, RecordParser, parse_reader, parse_shard};
pub use sampler::{
    Coverage, SamplerOptions, TimeRange, TimeRangeEstimate, TimeWindow, Verdict,
    sample_file,
};
pub use types::{BoundaryScan, Record, RecordTimes, ShardBoundary, StartPolicy};
