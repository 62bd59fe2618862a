//! 同步多导出器管理模块

use super::SyncExporter;
use crate::analysis::AnalysisReport;
use crate::error::{Result, SlowlogError};
use crate::exporter::ExportStats;

/// 同步多导出器管理器，把同一份报告依次交给每个导出器
pub struct SyncMultiExporter {
    exporters: Vec<Box<dyn SyncExporter>>,
}

impl SyncMultiExporter {
    /// 创建新的同步多导出器
    pub fn new() -> Self {
        Self { exporters: Vec::new() }
    }

    /// 添加导出器
    pub fn add_exporter<E>(&mut self, exporter: E)
    where
        E: SyncExporter + 'static,
    {
        self.exporters.push(Box::new(exporter));
    }

    pub fn len(&self) -> usize {
        self.exporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exporters.is_empty()
    }

    /// 导出到所有导出器
    ///
    /// 某个导出器失败不影响其余导出器，全部执行完后返回第一个错误。
    pub fn export_report(&mut self, report: &AnalysisReport) -> Result<()> {
        let mut first_error: Option<SlowlogError> = None;

        for exporter in self.exporters.iter_mut() {
            if let Err(e) = exporter.export_report(report) {
                #[cfg(feature = "logging")]
                tracing::error!("导出器 {} 失败: {}", exporter.name(), e);

                if first_error.is_none() {
                    first_error = Some(SlowlogError::export_error(exporter.name(), e.to_string()));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 获取所有导出器的统计信息
    pub fn get_all_stats(&self) -> Vec<(String, ExportStats)> {
        self.exporters
            .iter()
            .map(|exporter| (exporter.name().to_string(), exporter.get_stats()))
            .collect()
    }
}

impl Default for SyncMultiExporter {
    fn default() -> Self {
        Self::new()
    }
}
