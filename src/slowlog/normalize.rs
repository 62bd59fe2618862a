//! SQL 规范化与指纹
//!
//! 处理顺序固定，每一步都对任意输入有定义：
//!
//! 1. 去掉优化器 hint：`/*!40001 ... */`、`/*!STRAIGHT_JOIN */`、`/*+ ... */`
//! 2. 去掉其余块注释与 `--` 行注释
//! 3. 字符串与数字字面量替换为 `?`
//! 4. 括号内逗号分隔的一串 `?`（如 `IN (...)` 列表）合并为一个 `(?)`
//! 5. 转小写、空白折叠为单个空格、去掉末尾的语句结束符
//!
//! 指纹是第 5 步输出的 MD5。指纹相同的语句规范化文本一定相同；反之，
//! 不同的原始语句可能落到同一个指纹上，这是按文本模式分组的既定近似。

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;
use std::fmt;

lazy_static! {
    static ref HINT_VERSIONED_RE: Regex = Regex::new(r"(?s)/\*![0-9]{5}.*?\*/").unwrap();
    static ref HINT_SIMPLE_RE: Regex = Regex::new(r"(?s)/\*!.*?\*/").unwrap();
    static ref HINT_EXECUTOR_RE: Regex = Regex::new(r"(?s)/\*\+.*?\*/").unwrap();
    static ref BLOCK_COMMENT_RE: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    static ref LINE_COMMENT_RE: Regex = Regex::new(r"(?m)--[^\n]*$").unwrap();
    static ref STRING_RE: Regex =
        Regex::new(r#"(?s)'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#).unwrap();
    static ref NUMERIC_RE: Regex = Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap();
    static ref PLACEHOLDER_LIST_RE: Regex =
        Regex::new(r"\(\s*\?(?:\s*,\s*\?)*\s*\)").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
    static ref TABLE_RES: [Regex; 3] = [
        Regex::new(r#"(?i)\bfrom\s+([`"\w.\-]+)"#).unwrap(),
        Regex::new(r#"(?i)\bupdate\s+([`"\w.\-]+)"#).unwrap(),
        Regex::new(r#"(?i)\binto\s+([`"\w.\-]+)"#).unwrap(),
    ];
}

/// 规范化 SQL 的内容指纹（MD5）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub [u8; 16]);

impl Fingerprint {
    /// 计算规范化文本的指纹
    pub fn of(normalized: &str) -> Self {
        Self(md5::compute(normalized.as_bytes()).0)
    }

    /// 32 位小写十六进制
    pub fn to_hex(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// 规范化结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSql {
    pub text: String,
    pub fingerprint: Fingerprint,
}

impl NormalizedSql {
    pub fn new(raw_sql: &str) -> Self {
        let text = normalize_sql(raw_sql);
        let fingerprint = Fingerprint::of(&text);
        Self { text, fingerprint }
    }
}

fn replace<'a>(re: &Regex, s: Cow<'a, str>, with: &str) -> Cow<'a, str> {
    let replaced = match re.replace_all(&s, with) {
        Cow::Borrowed(_) => None,
        Cow::Owned(o) => Some(o),
    };
    match replaced {
        Some(o) => Cow::Owned(o),
        None => s,
    }
}

/// 规范化一条 SQL，结果对再次规范化保持不变
pub fn normalize_sql(sql: &str) -> String {
    let mut s = Cow::Borrowed(sql.trim());

    s = replace(&HINT_VERSIONED_RE, s, " ");
    s = replace(&HINT_SIMPLE_RE, s, " ");
    s = replace(&HINT_EXECUTOR_RE, s, " ");

    s = replace(&BLOCK_COMMENT_RE, s, " ");
    s = replace(&LINE_COMMENT_RE, s, " ");

    s = replace(&STRING_RE, s, "?");
    s = replace(&NUMERIC_RE, s, "?");
    s = replace(&PLACEHOLDER_LIST_RE, s, "(?)");

    let collapsed = WHITESPACE_RE.replace_all(&s, " ");
    collapsed
        .trim_end_matches([';', ' '])
        .trim()
        .to_lowercase()
}

/// 规范化文本的指纹
pub fn fingerprint(sql: &str) -> Fingerprint {
    Fingerprint::of(&normalize_sql(sql))
}

/// 尽力提取语句的主表：依次查找 `FROM` / `UPDATE` / `INTO` 后的标识符
pub fn extract_main_table(sql: &str) -> Option<String> {
    TABLE_RES.iter().find_map(|re| {
        let name = re.captures(sql)?.get(1)?.as_str().replace(['`', '"'], "");
        (!name.is_empty()).then_some(name)
    })
}

/// mysqldump 导出语句：带 `/*!` 版本注释且含 `SQL_NO_CACHE`
pub fn is_dump_statement(sql: &str) -> bool {
    sql.contains("/*!") && sql.to_ascii_lowercase().contains("sql_no_cache")
}
