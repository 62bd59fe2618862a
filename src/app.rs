//! 运行编排
//!
//! 时间预检 → 边界扫描 → 分片并行解析 → 合并 → 报告 → 导出。
//! 致命错误（输入不可读、窗口无效、线程数为 0）都在打开任何导出器之前返回，
//! 因此失败的运行不会留下半成品输出文件。

use crate::analysis::{
    AnalysisReport, CancelToken, RunSummary, ShardAggregate, ShardJob, StageTimer, analyze_shards,
};
use crate::config::{AnalysisConfig, Config, ExportConfig};
use crate::error::{Result, SlowlogError};
use crate::exporter::{ColumnLang, ExportStats, SyncMultiExporter};
use crate::slowlog::{plan_shards, sample_file, scan_file};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 一次完整运行的结果
#[derive(Debug)]
pub struct RunOutcome {
    pub report: AnalysisReport,
    /// 每个导出器的名称与统计
    pub export_stats: Vec<(String, ExportStats)>,
}

/// 按配置分析输入文件并导出报告
pub fn run(config: &Config, paths: &[PathBuf], cancel: &CancelToken) -> Result<RunOutcome> {
    run_at(config, paths, cancel, Utc::now())
}

/// 同 [`run`]，`now` 决定时间窗口的解析基准
pub fn run_at(
    config: &Config,
    paths: &[PathBuf],
    cancel: &CancelToken,
    now: DateTime<Utc>,
) -> Result<RunOutcome> {
    config.validate()?;
    ensure_exporters_available(&config.export)?;

    let cancel = match config.analysis.timeout_secs {
        0 => cancel.clone(),
        secs => cancel.clone().with_timeout(Duration::from_secs(secs)),
    };

    let report = analyze_files(paths, &config.analysis, &cancel, now)?;

    let mut exporters =
        build_exporters(&config.export, config.analysis.lang, paths.first().map(PathBuf::as_path))?;
    if !exporters.is_empty() {
        exporters.export_report(&report)?;
    }

    Ok(RunOutcome { export_stats: exporters.get_all_stats(), report })
}

/// 分析一个或多个慢日志文件，所有文件的记录合并到同一份报告
pub fn analyze_files(
    paths: &[PathBuf],
    analysis: &AnalysisConfig,
    cancel: &CancelToken,
    now: DateTime<Utc>,
) -> Result<AnalysisReport> {
    if paths.is_empty() {
        return Err(SlowlogError::config_error("没有指定输入文件"));
    }
    if analysis.jobs == 0 {
        return Err(SlowlogError::config_error("工作线程数必须大于 0"));
    }
    let window = analysis.time_window()?;
    let range = window.resolve(now);
    let filter = analysis.record_filter(range)?;
    let parser = analysis.parser_options();
    let sampler = analysis.sampler_options();

    // 先确认所有输入都可读，再开始任何解析
    for path in paths {
        check_input(path)?;
    }

    let mut summary = RunSummary { window, workers: analysis.jobs, ..Default::default() };
    let mut parts: Vec<ShardAggregate> = Vec::with_capacity(paths.len());
    let mut skipped_files = 0usize;

    for path in paths {
        cancel.check()?;

        if let Some(range) = range.as_ref() {
            let timer = StageTimer::start();
            let estimate = sample_file(path, Some(range), &sampler)?;
            summary.timings.sample += timer.elapsed();
            let skip = estimate.should_skip();
            summary.time_ranges.push((path.to_path_buf(), estimate));
            if skip {
                #[cfg(feature = "logging")]
                tracing::info!("{} 与时间窗口 {} 无重叠，跳过完整解析", path.display(), window);
                summary.file_size += std::fs::metadata(path)?.len();
                skipped_files += 1;
                continue;
            }
        }

        let timer = StageTimer::start();
        let scan = scan_file(path, analysis.start_policy())?;
        let shards = plan_shards(&scan, analysis.jobs);
        summary.timings.scan += timer.elapsed();
        summary.record_starts += scan.record_starts.len() as u64;
        summary.file_size += scan.file_size;
        summary.shards += shards.len();

        #[cfg(feature = "logging")]
        tracing::info!(
            "{}: {} 字节, {} 个记录起始点, {} 个分片",
            path.display(),
            scan.file_size,
            scan.record_starts.len(),
            shards.len()
        );

        let timer = StageTimer::start();
        let job = ShardJob {
            path,
            shards: &shards,
            file_size: scan.file_size,
            parser: &parser,
            filter: &filter,
        };
        parts.push(analyze_shards(&job, analysis.jobs, cancel)?);
        summary.timings.parse += timer.elapsed();
    }
    summary.skipped = skipped_files == paths.len();

    let timer = StageTimer::start();
    let global = ShardAggregate::merge_all(parts);
    summary.timings.merge = timer.elapsed();

    let timer = StageTimer::start();
    let mut report = AnalysisReport::build(global, analysis.top, summary, now);
    report.summary.timings.report = timer.elapsed();

    #[cfg(feature = "logging")]
    tracing::info!(
        "分析完成: {} 个指纹; {}; {}",
        report.rows().len(),
        report.summary.counters,
        report.summary.timings
    );

    Ok(report)
}

fn check_input(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path)?;
    if !meta.is_file() {
        return Err(SlowlogError::config_error(format!(
            "输入路径不是文件: {}",
            path.display()
        )));
    }
    Ok(())
}

/// 配置了未编译进来的导出器时提前报错
pub fn ensure_exporters_available(export: &ExportConfig) -> Result<()> {
    let missing = [
        ("csv", export.csv.is_some(), cfg!(feature = "exporter-csv")),
        ("markdown", export.markdown.is_some(), cfg!(feature = "exporter-markdown")),
        ("json", export.json.is_some(), cfg!(feature = "exporter-json")),
        ("es", export.elasticsearch.is_some(), cfg!(feature = "exporter-es")),
    ];
    for (name, wanted, compiled) in missing {
        if wanted && !compiled {
            return Err(SlowlogError::config_error(format!(
                "配置了 {name} 导出，但未启用 exporter-{name} 功能"
            )));
        }
    }
    Ok(())
}

/// 按配置创建导出器
#[allow(unused_variables, unused_mut)]
pub fn build_exporters(
    export: &ExportConfig,
    lang: ColumnLang,
    log_file: Option<&Path>,
) -> Result<SyncMultiExporter> {
    let mut multi = SyncMultiExporter::new();

    #[cfg(feature = "exporter-csv")]
    {
        if let Some(csv) = &export.csv {
            multi.add_exporter(crate::exporter::SyncCsvExporter::new(&csv.out_path, lang)?);
        }
    }
    #[cfg(feature = "exporter-markdown")]
    {
        if let Some(md) = &export.markdown {
            multi.add_exporter(crate::exporter::SyncMarkdownExporter::new(&md.out_path, lang)?);
        }
    }
    #[cfg(feature = "exporter-json")]
    {
        if let Some(json) = &export.json {
            multi.add_exporter(crate::exporter::SyncJsonExporter::new(&json.out_path)?);
        }
    }
    #[cfg(feature = "exporter-es")]
    {
        if let Some(es) = &export.elasticsearch {
            multi.add_exporter(crate::exporter::SyncElasticsearchExporter::new(
                es.clone(),
                log_file,
            )?);
        }
    }

    #[cfg(feature = "logging")]
    tracing::debug!("已创建 {} 个导出器", multi.len());

    Ok(multi)
}

/// `--stats` 输出的运行摘要
pub fn format_run_stats(summary: &RunSummary) -> String {
    let c = &summary.counters;
    let mut out = String::new();
    out.push_str("=== 运行统计 ===\n");
    out.push_str(&format!("文件大小: {} 字节\n", summary.file_size));
    out.push_str(&format!("时间窗口: {}\n", summary.window));
    for (path, est) in &summary.time_ranges {
        out.push_str(&format!(
            "时间预检 {}: 覆盖 {} (置信度 {:.2}), 采样 {} 字节\n",
            path.display(),
            est.coverage,
            est.confidence,
            est.bytes_sampled
        ));
    }
    if summary.skipped {
        out.push_str("预检判定无重叠，已跳过完整解析\n");
    }
    out.push_str(&format!("记录起始点: {}\n", summary.record_starts));
    out.push_str(&format!("分片/线程: {}/{}\n", summary.shards, summary.workers));
    out.push_str(&format!("# Time 行: {}\n", c.parse.header_lines));
    out.push_str(&format!("# Query_time 行: {}\n", c.parse.metric_lines));
    out.push_str(&format!("{c}\n"));
    out.push_str(&format!("耗时: {}\n", summary.timings));
    out
}
