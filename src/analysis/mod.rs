//! 聚合分析模块
//!
//! 分片聚合、合并归约、并行调度和报告生成

pub mod aggregate;
pub mod report;
pub mod stats;
pub mod workers;

pub use aggregate::{FingerprintAggregate, RecordFilter, ShardAggregate};
pub use report::{AnalysisReport, ReportRow, RunSummary, percentile};
pub use stats::{RunCounters, StageTimer, StageTimings};
pub use workers::{CancelToken, ShardJob, analyze_shard, analyze_shards};
