//! 分片并行解析与聚合
//!
//! fork-join 模型：每个分片由一个工作线程独占处理，构建自己的局部聚合，
//! 线程之间不共享可变状态。所有分片完成后，按分片序号顺序单线程折叠合并。

use crate::analysis::aggregate::{RecordFilter, ShardAggregate};
use crate::error::{Result, SlowlogError};
use crate::slowlog::parser::{ParserOptions, parse_shard};
use crate::slowlog::types::ShardBoundary;
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// 外部取消令牌：停止标志 + 可选截止时间
///
/// 克隆出的令牌共享同一个停止标志，可以从其他线程调用 [`CancelToken::cancel`]。
/// 工作线程每处理一定行数检查一次，一旦取消，所有部分结果都被丢弃。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从现在起 `timeout` 后自动取消
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// 已取消时返回 `Err(Cancelled)`
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SlowlogError::cancelled("收到停止信号或已超时"))
        } else {
            Ok(())
        }
    }
}

/// 并行解析任务
#[derive(Debug, Clone)]
pub struct ShardJob<'a> {
    pub path: &'a Path,
    pub shards: &'a [ShardBoundary],
    pub file_size: u64,
    pub parser: &'a ParserOptions,
    pub filter: &'a RecordFilter,
}

/// 处理单个分片
pub fn analyze_shard(
    path: &Path,
    shard: &ShardBoundary,
    file_size: u64,
    parser: &ParserOptions,
    filter: &RecordFilter,
    cancel: &CancelToken,
) -> Result<ShardAggregate> {
    #[cfg(feature = "logging")]
    let started = Instant::now();

    let mut agg = ShardAggregate::new();
    let at_eof = shard.end >= file_size;
    let counters = parse_shard(
        path,
        shard,
        at_eof,
        parser,
        || cancel.is_cancelled(),
        |record| agg.offer(&record, filter),
    )?;
    agg.counters.parse = counters;

    #[cfg(feature = "logging")]
    tracing::debug!(
        "分片 {} [{}, {}) 完成: {} 条记录, {} 个指纹, 耗时 {:?}",
        shard.index,
        shard.start,
        shard.end,
        counters.records,
        agg.len(),
        started.elapsed()
    );

    Ok(agg)
}

/// 用 `workers` 个线程并行处理所有分片，返回按分片顺序合并后的全局聚合
pub fn analyze_shards(
    job: &ShardJob<'_>,
    workers: usize,
    cancel: &CancelToken,
) -> Result<ShardAggregate> {
    if workers == 0 {
        return Err(SlowlogError::config_error("工作线程数必须大于 0"));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("slowlog-worker-{i}"))
        .build()
        .map_err(|e| SlowlogError::other(format!("创建线程池失败: {e}")))?;

    #[cfg(feature = "logging")]
    tracing::info!("启动 {} 个工作线程处理 {} 个分片", workers, job.shards.len());

    let parts: Vec<ShardAggregate> = pool.install(|| {
        job.shards
            .par_iter()
            .map(|shard| {
                cancel.check()?;
                analyze_shard(job.path, shard, job.file_size, job.parser, job.filter, cancel)
            })
            .collect::<Result<Vec<_>>>()
    })?;

    // 所有分片都已完成，但取消可能发生在最后一个检查点之后
    cancel.check()?;

    Ok(ShardAggregate::merge_all(parts))
}
