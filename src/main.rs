use anyhow::{Context, Result};
use clap::Parser;
use slowlog_analysis::analysis::CancelToken;
use slowlog_analysis::app;
use slowlog_analysis::config::{Config, EsConfig, FileOutputConfig};
use slowlog_analysis::exporter::ColumnLang;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "slowlog-cli")]
#[command(version, about = "MySQL 慢查询日志并行分析：按 SQL 指纹聚合并输出 Top N 报告", long_about = None)]
struct Cli {
    /// 慢日志文件
    #[arg(value_name = "FILE", required = true)]
    logfiles: Vec<PathBuf>,

    /// TOML 配置文件，命令行参数覆盖其中的值
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 最小耗时（秒）
    #[arg(long, value_name = "SECONDS")]
    min_time: Option<f64>,

    /// 排除 mysqldump 导出语句
    #[arg(long)]
    exclude_dumps: bool,

    /// 额外的排除正则（匹配规范化 SQL），可重复
    #[arg(long = "exclude", value_name = "REGEX")]
    exclude: Vec<String>,

    /// 工作线程数
    #[arg(short, long)]
    jobs: Option<usize>,

    /// 宽松起始模式：`# User@Host:` 也可作为记录起始
    #[arg(long)]
    loose_start: bool,

    /// 截断记录的示例 SQL 追加标记
    #[arg(long)]
    mark_truncated: bool,

    /// 时间窗口：all / today / last-N-days / Nd / N
    #[arg(long, conflicts_with_all = ["today", "days"])]
    window: Option<String>,

    /// 只分析 UTC 当天
    #[arg(long, conflicts_with = "days")]
    today: bool,

    /// 只分析最近 N 天
    #[arg(long, value_name = "N")]
    days: Option<u32>,

    /// 排名视图的行数
    #[arg(long)]
    top: Option<usize>,

    /// CSV 输出路径（全部指纹）
    #[arg(long, value_name = "FILE")]
    out_csv: Option<String>,

    /// Markdown 输出路径（Top N）
    #[arg(long, value_name = "FILE")]
    out_md: Option<String>,

    /// JSON 输出路径（全部指纹）
    #[arg(long, value_name = "FILE")]
    out_json: Option<String>,

    /// Elasticsearch 节点地址，可重复
    #[arg(long = "es-host", value_name = "URL")]
    es_hosts: Vec<String>,

    /// Elasticsearch 索引名模式
    #[arg(long)]
    es_index: Option<String>,

    #[arg(long)]
    es_user: Option<String>,

    #[arg(long)]
    es_password: Option<String>,

    /// 不校验 Elasticsearch 的 TLS 证书
    #[arg(long)]
    es_no_verify: bool,

    /// 文档中的主机名
    #[arg(long)]
    es_hostname: Option<String>,

    /// 表头语言：zh / en
    #[arg(long)]
    lang: Option<String>,

    /// 运行超时（秒）
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// 日志级别
    #[arg(long)]
    log_level: Option<String>,

    /// 打印运行统计
    #[arg(long)]
    stats: bool,
}

impl Cli {
    /// 命令行参数覆盖配置文件
    fn apply(&self, config: &mut Config) {
        let a = &mut config.analysis;
        if let Some(v) = self.min_time {
            a.min_time = v;
        }
        a.exclude_dumps |= self.exclude_dumps;
        a.exclude_patterns.extend(self.exclude.iter().cloned());
        if let Some(v) = self.jobs {
            a.jobs = v;
        }
        a.loose_start |= self.loose_start;
        a.mark_truncated |= self.mark_truncated;
        if let Some(w) = &self.window {
            a.window = w.clone();
        } else if self.today {
            a.window = "today".to_string();
        } else if let Some(n) = self.days {
            a.window = n.to_string();
        }
        if let Some(v) = self.top {
            a.top = v;
        }
        if let Some(lang) = &self.lang {
            a.lang = ColumnLang::parse(lang);
        }
        if let Some(v) = self.timeout {
            a.timeout_secs = v;
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }

        let export = &mut config.export;
        if let Some(p) = &self.out_csv {
            export.csv = Some(FileOutputConfig::new(p.clone()));
        }
        if let Some(p) = &self.out_md {
            export.markdown = Some(FileOutputConfig::new(p.clone()));
        }
        if let Some(p) = &self.out_json {
            export.json = Some(FileOutputConfig::new(p.clone()));
        }
        if !self.es_hosts.is_empty() {
            let es = export.elasticsearch.get_or_insert_with(EsConfig::default);
            es.hosts = self.es_hosts.clone();
        }
        if let Some(es) = export.elasticsearch.as_mut() {
            if let Some(index) = &self.es_index {
                es.index = index.clone();
            }
            if self.es_user.is_some() {
                es.user = self.es_user.clone();
            }
            if self.es_password.is_some() {
                es.password = self.es_password.clone();
            }
            if self.es_no_verify {
                es.verify_certs = false;
            }
            if self.es_hostname.is_some() {
                es.hostname = self.es_hostname.clone();
            }
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?,
        None => Config::default(),
    };
    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn real_main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    #[cfg(feature = "logging")]
    {
        let log_config = slowlog_analysis::logging::LogConfig::from_config(&config.log)?;
        slowlog_analysis::logging::init_logging(log_config)?;
    }

    let outcome = app::run(&config, &cli.logfiles, &CancelToken::new())?;
    let report = &outcome.report;

    if config.export.is_empty() {
        for row in report.ranked() {
            println!(
                "{:>3}. {:>6} 次  总耗时 {:>10.3}s  P95 {:>8.3}s  {}",
                row.rank, row.sample_count, row.total_time, row.p95_time, row.normalized_sql
            );
        }
    }

    if cli.stats {
        print!("{}", app::format_run_stats(&report.summary));
        for (name, stats) in &outcome.export_stats {
            println!("导出器 {name}: {stats}");
        }
    }

    println!(
        "分析完成：{} 个指纹，{} 条记录，耗时 {:.3}s",
        report.rows().len(),
        report.summary.counters.accepted,
        report.summary.timings.total().as_secs_f64()
    );
    Ok(())
}

fn main() -> ExitCode {
    match real_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("错误: {e:#}");
            ExitCode::FAILURE
        }
    }
}
