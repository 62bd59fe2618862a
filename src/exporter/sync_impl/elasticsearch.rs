//! Elasticsearch 导出器
//!
//! 每次运行为每个指纹生成一个文档，经 `_bulk` 接口按块（默认 100 条）写入。
//! 单个块失败只计入失败数，不中止其余块。

use super::SyncExporter;
use crate::analysis::{AnalysisReport, ReportRow};
pub use crate::config::EsConfig;
use crate::config::ES_DATE_PLACEHOLDER;
use crate::error::Result;
use crate::exporter::{ExportStats, format_timestamp};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 展开索引名中的日期占位符
pub fn index_name(pattern: &str, at: DateTime<Utc>) -> String {
    pattern.replace(ES_DATE_PLACEHOLDER, &at.format("%Y.%m.%d").to_string())
}

/// 每份报告共用的文档元数据
#[derive(Debug, Clone)]
pub struct DocMeta {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub log_file: Option<PathBuf>,
}

impl DocMeta {
    fn file_fields(&self) -> Value {
        match &self.log_file {
            Some(path) => {
                let abs = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
                let full = abs.to_string_lossy().replace('\\', "/");
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let dir = abs
                    .parent()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                json!({ "path": full, "name": name, "directory": dir })
            }
            None => json!({ "path": "unknown", "name": "unknown", "directory": "unknown" }),
        }
    }
}

/// 本机主机名：`HOSTNAME` 环境变量或 `/etc/hostname`
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// 构建单个指纹的文档
pub fn build_document(row: &ReportRow, meta: &DocMeta) -> Value {
    json!({
        "@timestamp": meta.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        "analysis_date": meta.timestamp.format("%Y-%m-%d").to_string(),
        "host": {
            "name": meta.hostname,
            "ip": meta.hostname,
            "os": {
                "family": std::env::consts::FAMILY,
                "platform": std::env::consts::OS,
                "architecture": std::env::consts::ARCH,
            }
        },
        "log": { "file": meta.file_fields() },
        "agent": {
            "name": "mysql_slowlog_analyzer",
            "version": env!("CARGO_PKG_VERSION"),
            "type": "mysql_analyzer",
        },
        "service": { "name": "mysql", "type": "database" },
        "database": {
            "slowlog": {
                "fingerprint": row.fingerprint,
                "samples": row.sample_count,
                "query_time": {
                    "total_seconds": row.total_time,
                    "avg_seconds": row.avg_time,
                    "p95_seconds": row.p95_time,
                    "max_seconds": row.max_time,
                },
                "share": {
                    "time_percent": row.time_share_pct,
                    "count_percent": row.count_share_pct,
                },
                "lock_time": { "avg_seconds": row.avg_lock_time },
                "rows": {
                    "examined_total": row.rows_examined_total,
                    "examined_avg": row.rows_examined_avg,
                    "sent_total": row.rows_sent_total,
                    "sent_avg": row.rows_sent_avg,
                },
                "database": row.database.as_deref().unwrap_or(""),
                "table": row.main_table.as_deref().unwrap_or(""),
                "user_host": row.user_host.as_deref().unwrap_or(""),
                "sql": {
                    "normalized": row.normalized_sql,
                    "example": row.example_sql,
                    "has_truncated": row.has_truncated,
                },
                "time_range": {
                    "first_seen": format_timestamp(row.first_seen),
                    "last_seen": format_timestamp(row.last_seen),
                }
            }
        }
    })
}

/// 生成 `_bulk` 请求体（NDJSON）
pub fn bulk_body(index: &str, docs: &[Value]) -> Result<String> {
    let mut body = String::new();
    let action = serde_json::to_string(&json!({ "index": { "_index": index } }))?;
    for doc in docs {
        body.push_str(&action);
        body.push('\n');
        body.push_str(&serde_json::to_string(doc)?);
        body.push('\n');
    }
    Ok(body)
}

/// 统计 `_bulk` 响应中失败的条目数
fn count_bulk_failures(response: &Value) -> usize {
    if response.get("errors").and_then(Value::as_bool) != Some(true) {
        return 0;
    }
    response
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| {
                    item.get("index")
                        .and_then(|i| i.get("status"))
                        .and_then(Value::as_u64)
                        .is_none_or(|s| s >= 300)
                })
                .count()
        })
        .unwrap_or(0)
}

/// 同步 Elasticsearch 导出器
pub struct SyncElasticsearchExporter {
    config: EsConfig,
    client: reqwest::blocking::Client,
    log_file: Option<PathBuf>,
    meta: Option<DocMeta>,
    index: String,
    pending: Vec<Value>,
    stats: ExportStats,
}

impl SyncElasticsearchExporter {
    /// `log_file` 为被分析的慢日志路径，写入文档的 `log.file.*`
    pub fn new(config: EsConfig, log_file: Option<&Path>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .danger_accept_invalid_certs(!config.verify_certs)
            .build()?;
        Ok(Self {
            config,
            client,
            log_file: log_file.map(Path::to_path_buf),
            meta: None,
            index: String::new(),
            pending: Vec::new(),
            stats: ExportStats::new(),
        })
    }

    fn meta(&mut self) -> &DocMeta {
        let hostname = self.config.hostname.clone();
        let log_file = self.log_file.clone();
        self.meta.get_or_insert_with(|| DocMeta {
            timestamp: Utc::now(),
            hostname: hostname.unwrap_or_else(local_hostname),
            log_file,
        })
    }

    /// 发送一个块，依次尝试各个节点
    fn send_chunk(&mut self, docs: Vec<Value>) -> Result<()> {
        let n = docs.len();
        let body = bulk_body(&self.index, &docs)?;
        let mut last_error = String::from("没有配置 Elasticsearch 节点");

        for host in &self.config.hosts {
            let url = format!("{}/_bulk?refresh=true", host.trim_end_matches('/'));
            let mut req = self
                .client
                .post(&url)
                .header("Content-Type", "application/x-ndjson")
                .body(body.clone());
            if let Some(user) = &self.config.user {
                req = req.basic_auth(user, self.config.password.as_deref());
            }

            match req.send().and_then(|r| r.error_for_status()) {
                Ok(resp) => {
                    let failed = resp
                        .text()
                        .ok()
                        .and_then(|t| serde_json::from_str::<Value>(&t).ok())
                        .map(|v| count_bulk_failures(&v))
                        .unwrap_or(0)
                        .min(n);
                    self.stats.exported_rows += n - failed;
                    self.stats.failed_rows += failed;
                    self.stats.bytes_written += body.len() as u64;
                    #[cfg(feature = "logging")]
                    tracing::debug!("ES 批量写入 {}: 成功 {}, 失败 {}", host, n - failed, failed);
                    return Ok(());
                }
                Err(e) => {
                    #[cfg(feature = "logging")]
                    tracing::warn!("ES 节点 {} 写入失败: {}", host, e);
                    last_error = e.to_string();
                }
            }
        }

        #[cfg(feature = "logging")]
        tracing::warn!("ES 批量写入失败 ({} 条): {}", n, last_error);
        #[cfg(not(feature = "logging"))]
        let _ = last_error;
        self.stats.failed_rows += n;
        Ok(())
    }

    fn flush_full_chunks(&mut self, force: bool) -> Result<()> {
        let chunk = self.config.chunk_size.max(1);
        while self.pending.len() >= chunk || (force && !self.pending.is_empty()) {
            let take = chunk.min(self.pending.len());
            let docs: Vec<Value> = self.pending.drain(..take).collect();
            self.send_chunk(docs)?;
        }
        Ok(())
    }
}

impl SyncExporter for SyncElasticsearchExporter {
    fn name(&self) -> &str {
        "Elasticsearch"
    }

    fn begin(&mut self, report: &AnalysisReport) -> Result<()> {
        let hostname = self.config.hostname.clone().unwrap_or_else(local_hostname);
        self.meta = Some(DocMeta {
            timestamp: report.generated_at(),
            hostname,
            log_file: self.log_file.clone(),
        });
        self.index = index_name(&self.config.index, report.generated_at());
        Ok(())
    }

    fn export_row(&mut self, row: &ReportRow) -> Result<()> {
        if self.index.is_empty() {
            self.index = index_name(&self.config.index, Utc::now());
        }
        let doc = build_document(row, self.meta());
        self.pending.push(doc);
        self.flush_full_chunks(false)
    }

    fn finalize(&mut self) -> Result<()> {
        self.flush_full_chunks(true)?;
        self.stats.finish();

        #[cfg(feature = "logging")]
        tracing::info!("Elasticsearch 导出完成 (索引 {}): {}", self.index, self.stats);

        Ok(())
    }

    fn get_stats(&self) -> ExportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::sync_impl::test_support::sample_report;
    use crate::slowlog::utils::parse_timestamp;

    fn meta() -> DocMeta {
        DocMeta {
            timestamp: parse_timestamp("2024-01-16T08:00:00Z").unwrap(),
            hostname: "db-01".to_string(),
            log_file: None,
        }
    }

    #[test]
    fn test_index_name_expands_date() {
        let at = parse_timestamp("2024-01-16T08:00:00Z").unwrap();
        assert_eq!(index_name("mysql-slowlog-%{+yyyy.MM.dd}", at), "mysql-slowlog-2024.01.16");
        assert_eq!(index_name("fixed", at), "fixed");
    }

    #[test]
    fn test_document_shape() {
        let report = sample_report(10);
        let doc = build_document(&report.rows()[0], &meta());
        assert_eq!(doc["analysis_date"], "2024-01-16");
        assert_eq!(doc["host"]["name"], "db-01");
        assert_eq!(doc["service"]["name"], "mysql");
        assert_eq!(doc["log"]["file"]["name"], "unknown");
        let slow = &doc["database"]["slowlog"];
        assert_eq!(slow["samples"], 2);
        assert_eq!(slow["query_time"]["total_seconds"], 6.0);
        assert_eq!(slow["database"], "shop");
        assert_eq!(slow["table"], "orders");
        assert_eq!(slow["sql"]["normalized"], "select * from orders where id = ?");
        assert_eq!(slow["time_range"]["first_seen"], "2024-01-15T10:00:00.000000Z");
    }

    #[test]
    fn test_bulk_body_is_ndjson() {
        let docs = vec![json!({"a": 1}), json!({"b": 2})];
        let body = bulk_body("idx", &docs).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], r#"{"index":{"_index":"idx"}}"#);
        assert_eq!(lines[3], r#"{"b":2}"#);
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_count_bulk_failures() {
        let ok = json!({"errors": false, "items": []});
        assert_eq!(count_bulk_failures(&ok), 0);
        let partial = json!({"errors": true, "items": [
            {"index": {"status": 201}},
            {"index": {"status": 400, "error": {}}},
        ]});
        assert_eq!(count_bulk_failures(&partial), 1);
    }

    #[test]
    fn test_unreachable_host_counts_failures() {
        let config = EsConfig {
            hosts: vec!["http://127.0.0.1:1".to_string()],
            chunk_size: 2,
            timeout_secs: 2,
            ..Default::default()
        };
        let report = sample_report(10);
        let mut exporter = SyncElasticsearchExporter::new(config, None).unwrap();
        exporter.export_report(&report).unwrap();
        let stats = exporter.get_stats();
        assert_eq!(stats.exported_rows, 0);
        assert_eq!(stats.failed_rows, 3);
    }
}
