//! 单次运行的诊断通道
//!
//! 流水线内部不直接写全局 logger，而是通过调用方传入的 [`Diagnostics`]
//! 句柄上报。默认实现 [`LogDiagnostics`] 转发到 `log` facade，
//! 以运行标识作为 target，便于区分并发的多个视频。

use log::Level;
use std::sync::Mutex;

pub trait Diagnostics: Send + Sync {
    fn record(&self, level: Level, message: &str);

    fn info(&self, message: &str) {
        self.record(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.record(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.record(Level::Error, message);
    }

    fn debug(&self, message: &str) {
        self.record(Level::Debug, message);
    }
}

/// 转发到 `log` facade
pub struct LogDiagnostics {
    target: String,
}

impl LogDiagnostics {
    pub fn new<S: Into<String>>(target: S) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl Default for LogDiagnostics {
    fn default() -> Self {
        Self::new("keyframe_lib")
    }
}

impl Diagnostics for LogDiagnostics {
    fn record(&self, level: Level, message: &str) {
        log::log!(target: self.target.as_str(), level, "{}", message);
    }
}

/// Captures every record in memory. Used by tests and by callers that want
/// to attach the run's diagnostics to a report.
#[derive(Default)]
pub struct CollectingDiagnostics {
    records: Mutex<Vec<(Level, String)>>,
}

impl CollectingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Level, String)> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn count_at(&self, level: Level) -> usize {
        self.records().iter().filter(|(l, _)| *l == level).count()
    }
}

impl Diagnostics for CollectingDiagnostics {
    fn record(&self, level: Level, message: &str) {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push((level, message.to_string()));
    }
}
