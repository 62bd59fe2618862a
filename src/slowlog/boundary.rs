//! 边界扫描与分片
//!
//! 单次前向扫描整个输入，找出所有记录起始行的偏移，再按字节距离把文件切成
//! 至多 W 个对齐到记录起始的分片。扫描以固定大小的块流式读取，只保留每行
//! 行首的少量字节，内存占用与文件大小和行长度都无关；扫描只看字节，不做
//! UTF-8 解码，因此任意二进制内容都不会导致失败。

use crate::error::Result;
use crate::slowlog::types::{BoundaryScan, ShardBoundary, StartPolicy};
use crate::slowlog::utils::{LINE_HEAD_LEN, StartDetector};
use memchr::memchr;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// 扫描时每次读取的块大小
pub const SCAN_CHUNK_SIZE: usize = 1 << 20;

/// 扫描任意字节流，返回所有记录起始偏移
pub fn scan_record_starts<R: Read>(
    mut reader: R,
    policy: StartPolicy,
) -> io::Result<BoundaryScan> {
    let mut buf = vec![0u8; SCAN_CHUNK_SIZE];
    let mut detector = StartDetector::new(policy);
    let mut record_starts = Vec::new();

    // buf[0] 在文件中的偏移
    let mut offset: u64 = 0;
    let mut line_start: u64 = 0;
    let mut head: Vec<u8> = Vec::with_capacity(LINE_HEAD_LEN);
    let mut blank = true;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let chunk = &buf[..n];
        let mut pos = 0;

        while pos < n {
            let rest = &chunk[pos..];
            let newline = memchr(b'\n', rest);
            let segment = match newline {
                Some(i) => &rest[..i],
                None => rest,
            };

            if head.len() < LINE_HEAD_LEN {
                let take = (LINE_HEAD_LEN - head.len()).min(segment.len());
                head.extend_from_slice(&segment[..take]);
            }
            if blank {
                blank = segment.iter().all(u8::is_ascii_whitespace);
            }

            match newline {
                Some(i) => {
                    if detector.observe_head(&head, blank) {
                        record_starts.push(line_start);
                    }
                    pos += i + 1;
                    line_start = offset + pos as u64;
                    head.clear();
                    blank = true;
                }
                None => pos = n,
            }
        }
        offset += n as u64;
    }

    // 最后一行没有换行符
    if offset > line_start && detector.observe_head(&head, blank) {
        record_starts.push(line_start);
    }

    Ok(BoundaryScan { record_starts, file_size: offset })
}

/// 扫描文件
pub fn scan_file<P: AsRef<Path>>(
    path: P,
    policy: StartPolicy,
) -> Result<BoundaryScan> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let scan = scan_record_starts(file, policy)?;

    #[cfg(feature = "logging")]
    tracing::debug!(
        "边界扫描完成: {}, 文件大小 {} 字节, 记录起始点 {} 个",
        path.display(),
        scan.file_size,
        scan.record_starts.len()
    );

    Ok(scan)
}

/// 根据扫描结果切分至多 `workers` 个分片
///
/// - 切点取自 `i * size / workers` 处之后最近的记录起始；
/// - 第一个记录起始永远不作为切点，避免前部出现只含残片的分片；
/// - 第一个分片从 0 开始，最后一个分片止于文件末尾，分片之间首尾相接。
pub fn plan_shards(scan: &BoundaryScan, workers: usize) -> Vec<ShardBoundary> {
    let size = scan.file_size;
    let workers = workers.max(1);
    let eligible = scan.record_starts.get(1..).unwrap_or(&[]);

    let mut cuts: Vec<u64> = Vec::with_capacity(workers.saturating_sub(1));
    for i in 1..workers {
        let target = (u128::from(size) * i as u128 / workers as u128) as u64;
        let idx = eligible.partition_point(|&s| s < target);
        if let Some(&cut) = eligible.get(idx) {
            if cut > 0 && cut < size && cuts.last().is_none_or(|&c| cut > c) {
                cuts.push(cut);
            }
        }
    }

    let mut bounds = Vec::with_capacity(cuts.len() + 2);
    bounds.push(0);
    bounds.extend(cuts);
    bounds.push(size);

    let shards: Vec<ShardBoundary> = bounds
        .windows(2)
        .enumerate()
        .map(|(index, w)| ShardBoundary { index, start: w[0], end: w[1] })
        .collect();

    #[cfg(feature = "logging")]
    tracing::debug!(
        "分片规划: 目标 {} 个, 实际 {} 个, 记录起始点 {} 个",
        workers,
        shards.len(),
        scan.record_starts.len()
    );

    shards
}
