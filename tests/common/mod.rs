//! 集成测试公共模块

use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// 写入测试用的慢日志文件
#[allow(dead_code)]
pub fn write_log(dir: &TempDir, filename: &str, content: &str) -> PathBuf {
    let file_path = dir.path().join(filename);
    fs::write(&file_path, content).expect("Failed to write test file");
    file_path
}

/// 慢日志内容构造器
#[derive(Default)]
pub struct LogBuilder {
    text: String,
}

#[allow(dead_code)]
impl LogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 服务器启动横幅
    pub fn banner(mut self) -> Self {
        self.text.push_str(
            "/usr/sbin/mysqld, Version: 8.0.36 (MySQL Community Server - GPL). started with:\n\
             Tcp port: 3306  Unix socket: /var/run/mysqld/mysqld.sock\n\
             Time                 Id Command    Argument\n",
        );
        self
    }

    /// 完整的一条记录
    pub fn record(mut self, time: &str, query_time: f64, db: Option<&str>, sql: &str) -> Self {
        self.text.push_str(&format!("# Time: {time}\n"));
        self.text.push_str("# User@Host: app[app] @ web1 [10.0.0.1]  Id:    42\n");
        self.text.push_str(&format!(
            "# Query_time: {query_time:.6}  Lock_time: 0.000100 Rows_sent: 1  Rows_examined: 100\n"
        ));
        if let Some(db) = db {
            self.text.push_str(&format!("use {db};\n"));
        }
        self.text.push_str(sql);
        self.text.push('\n');
        self
    }

    /// 原样追加
    pub fn raw(mut self, text: &str) -> Self {
        self.text.push_str(text);
        self
    }

    pub fn build(self) -> String {
        self.text
    }

    pub fn write(self, dir: &TempDir, filename: &str) -> PathBuf {
        write_log(dir, filename, &self.text)
    }
}

/// 生成 `n` 条记录的较大日志，覆盖多种语句、跨行 SQL、横幅和缺失字段
#[allow(dead_code)]
pub fn mixed_log(n: usize) -> String {
    let mut b = LogBuilder::new();
    for i in 0..n {
        if i == n / 2 {
            b = b.banner();
        }
        let time = format!("2024-01-15T{:02}:{:02}:{:02}.{:06}Z", i / 3600 % 24, i / 60 % 60, i % 60, i);
        let qt = (i % 17) as f64 * 0.125 + (i % 5) as f64 * 0.000_001;
        let db = match i % 3 {
            0 => Some("shop"),
            1 => Some("crm"),
            _ => None,
        };
        let sql = match i % 6 {
            0 => format!("SELECT * FROM orders WHERE id = {i};"),
            1 => format!("select name,\n  email\nfrom users\nwhere id in ({}, {}, {});", i, i + 1, i + 2),
            2 => format!("UPDATE stock SET qty = qty - {} WHERE sku = 'SKU-{i}';", i % 9),
            3 => format!("INSERT INTO audit (msg) VALUES ('event {i}');"),
            4 => format!("/* app:{i} */ SELECT COUNT(*) FROM logs WHERE ts > {};", 1_700_000_000 + i),
            _ => format!("DELETE FROM sessions WHERE expires < {i};"),
        };
        b = b.record(&time, qt, db, &sql);
    }
    b.build()
}
