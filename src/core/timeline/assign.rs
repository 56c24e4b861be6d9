//! 字幕 → 关键帧分桶
//!
//! Keyframes sorted by timestamp split the timeline into buckets. A caption
//! belongs to the bucket of the latest keyframe at or before its start. A
//! caption that starts before the first keyframe has no bucket and is handed
//! back as unassigned.

use super::timestamp::OutputKey;
use crate::core::video::error::{ExtractError, Result};
use log::{debug, info};
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptionSpan<T> {
    pub start: f64,
    pub end: f64,
    pub payload: T,
}

impl<T> CaptionSpan<T> {
    pub fn new(start: f64, end: f64, payload: T) -> Self {
        Self {
            start,
            end,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameBucket<T> {
    pub timestamp_seconds: f64,
    pub key: String,
    /// 可以为空
    pub captions: Vec<CaptionSpan<T>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptionAssignment<T> {
    /// 与 [`KeyframeIndex`] 一一对应，按时间排序
    pub buckets: Vec<FrameBucket<T>>,
    /// 早于第一帧开始的字幕
    pub unassigned: Vec<CaptionSpan<T>>,
}

/// 按时间排序的 (timestamp, key)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyframeIndex {
    entries: Vec<(f64, String)>,
}

impl KeyframeIndex {
    pub fn new(mut entries: Vec<(f64, String)>) -> Result<Self> {
        if let Some((t, key)) = entries.iter().find(|(t, _)| !t.is_finite() || *t < 0.0) {
            return Err(ExtractError::InvalidTimestamp(format!(
                "{} has timestamp {}",
                key, t
            )));
        }

        entries.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        // 同一时间戳只保留一帧
        entries.dedup_by(|later, earlier| {
            let same = later.0 == earlier.0;
            if same {
                debug!("{} shares timestamp with {}, ignored", later.1, earlier.1);
            }
            same
        });
        Ok(Self { entries })
    }

    /// 从输出 key（或文件名）解析时间戳
    pub fn from_keys<I, S>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = keys
            .into_iter()
            .map(|name| {
                let key = OutputKey::parse(name.as_ref())?;
                Ok((key.timestamp_seconds, key.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(entries)
    }

    /// 扫描关键帧目录；不符合命名规则的文件跳过
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut entries = Vec::new();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) if !name.starts_with('.') => name,
                _ => continue,
            };
            match OutputKey::parse(name) {
                Ok(key) => entries.push((key.timestamp_seconds, key.to_string())),
                Err(_) => debug!("skipping {}, not a keyframe file", path.display()),
            }
        }

        let index = Self::new(entries)?;
        info!(
            "🗂️ KeyframeIndex: {} keyframes in {}",
            index.len(),
            dir.display()
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(f64, String)] {
        &self.entries
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.entries.iter().map(|(t, _)| *t).collect()
    }

    /// 最大的 i 使 t_i ≤ start
    pub fn bucket_for(&self, start: f64) -> Option<usize> {
        let count = self.entries.partition_point(|(t, _)| *t <= start);
        count.checked_sub(1)
    }

    pub fn assign<T>(&self, captions: Vec<CaptionSpan<T>>) -> CaptionAssignment<T> {
        let mut buckets: Vec<FrameBucket<T>> = self
            .entries
            .iter()
            .map(|(t, key)| FrameBucket {
                timestamp_seconds: *t,
                key: key.clone(),
                captions: Vec::new(),
            })
            .collect();
        let mut unassigned = Vec::new();

        for caption in captions {
            match self.bucket_for(caption.start) {
                Some(i) => buckets[i].captions.push(caption),
                None => unassigned.push(caption),
            }
        }

        CaptionAssignment {
            buckets,
            unassigned,
        }
    }
}
