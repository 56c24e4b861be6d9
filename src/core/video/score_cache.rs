//! 相似度记录（一次写入，多次回放）
//!
//! Workers append one [`SimilarityRecord`] per scored candidate, in whatever
//! order they finish. The sweep reads the whole store back and filters it per
//! threshold. Records are keyed by `output_key`, the same key the sink used.

use super::error::{ExtractError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityRecord {
    pub output_key: String,
    pub score: f64,
}

impl SimilarityRecord {
    pub fn new<S: Into<String>>(output_key: S, score: f64) -> Self {
        Self {
            output_key: output_key.into(),
            score,
        }
    }

    pub fn retained_at(&self, threshold: f64) -> bool {
        self.score < threshold
    }
}

pub trait ScoreStore: Send + Sync {
    fn append(&self, record: SimilarityRecord) -> Result<()>;

    fn read_all(&self) -> Result<Vec<SimilarityRecord>>;
}

/// 按阈值过滤，返回排好序的 key
pub fn retained_keys(records: &[SimilarityRecord], threshold: f64) -> Vec<String> {
    let mut keys: Vec<String> = records
        .iter()
        .filter(|r| r.retained_at(threshold))
        .map(|r| r.output_key.clone())
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Default)]
pub struct MemoryScoreCache {
    records: Mutex<Vec<SimilarityRecord>>,
}

impl MemoryScoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }
}

impl ScoreStore for MemoryScoreCache {
    fn append(&self, record: SimilarityRecord) -> Result<()> {
        lock(&self.records).push(record);
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<SimilarityRecord>> {
        Ok(lock(&self.records).clone())
    }
}

/// JSON Lines 持久化日志，每行一个记录
pub struct JsonlScoreLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlScoreLog {
    /// 追加模式打开（已有记录保留）
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("📝 JsonlScoreLog: appending to {}", path.display());
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// 清空后重新开始
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Self::open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取任意 JSONL 日志；坏行跳过并告警
    pub fn read_path<P: AsRef<Path>>(path: P) -> Result<Vec<SimilarityRecord>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            ExtractError::ScoreLog(format!("cannot open {}: {}", path.display(), e))
        })?;

        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SimilarityRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "⚠️ {}:{}: skipping unparseable score record: {}",
                    path.display(),
                    number + 1,
                    e
                ),
            }
        }
        Ok(records)
    }
}

impl ScoreStore for JsonlScoreLog {
    fn append(&self, record: SimilarityRecord) -> Result<()> {
        let line = serde_json::to_string(&record)?;
        let mut writer = lock(&self.writer);
        writeln!(writer, "{}", line)?;
        // 逐条 flush
        writer.flush()?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<SimilarityRecord>> {
        lock(&self.writer).flush()?;
        Self::read_path(&self.path)
    }
}
