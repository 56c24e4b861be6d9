use super::error::{ExtractError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// threshold_tester 默认扫描的阈值
pub const DEFAULT_SWEEP_THRESHOLDS: [f64; 6] = [0.95, 0.9, 0.85, 0.8, 0.75, 0.7];

/// 关键帧提取配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// 相似度低于该值才保留，取值 [0, 1]
    pub similarity_threshold: f64,
    /// 每秒采样几帧作为候选
    pub sampling_fps: f64,
    /// 打分线程数，必须 > 1
    pub worker_count: usize,
    /// 任务队列容量，缺省为 2 × worker_count
    pub channel_capacity: Option<usize>,
    /// 队列空时 worker 的轮询间隔
    pub poll_interval_ms: u64,
    /// 输出文件名前缀（通常是视频文件名）
    pub output_prefix: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.95,
            sampling_fps: 1.0,
            worker_count: 5,
            channel_capacity: None,
            poll_interval_ms: 1000,
            output_prefix: "video".to_string(),
        }
    }
}

impl ExtractionConfig {
    /// 按本机核数分配 worker
    pub fn for_host() -> Self {
        Self {
            worker_count: num_cpus::get().max(2),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn effective_capacity(&self) -> usize {
        self.channel_capacity.unwrap_or(self.worker_count * 2)
    }

    /// 内存中候选帧的上限：队列 + 每个 worker 手上一个 + 采样器的参考帧
    pub fn max_live_frames(&self) -> usize {
        self.effective_capacity() + self.worker_count + 1
    }

    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.similarity_threshold)?;

        if !self.sampling_fps.is_finite() || self.sampling_fps <= 0.0 {
            return Err(ExtractError::config(format!(
                "sampling_fps must be a positive, non-zero value (got {})",
                self.sampling_fps
            )));
        }
        if self.worker_count <= 1 {
            return Err(ExtractError::config(format!(
                "worker_count must be greater than 1 (got {})",
                self.worker_count
            )));
        }
        if self.effective_capacity() == 0 {
            return Err(ExtractError::config("channel_capacity must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ExtractError::config("poll_interval_ms must be at least 1"));
        }
        if self.output_prefix.is_empty() || self.output_prefix.contains(&['/', '\\'][..]) {
            return Err(ExtractError::config(format!(
                "output_prefix must be a plain file name stem (got {:?})",
                self.output_prefix
            )));
        }
        Ok(())
    }

    /// 源帧率 / 采样帧率
    pub fn frames_per_sample(&self, native_fps: f64) -> Result<f64> {
        if !native_fps.is_finite() || native_fps <= 0.0 {
            return Err(ExtractError::config(format!(
                "frame source reports an unusable frame rate ({})",
                native_fps
            )));
        }
        Ok(native_fps / self.sampling_fps)
    }
}

/// 保留策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetentionPolicy {
    /// `score < threshold` 时写出
    Threshold(f64),
    /// 每个候选都写出（扫描模式的参考集）
    RetainAll,
}

impl RetentionPolicy {
    pub fn retains(self, score: f64) -> bool {
        match self {
            RetentionPolicy::Threshold(threshold) => score < threshold,
            RetentionPolicy::RetainAll => true,
        }
    }

    /// 写进任务里的阈值
    pub fn threshold(self) -> f64 {
        match self {
            RetentionPolicy::Threshold(threshold) => threshold,
            RetentionPolicy::RetainAll => f64::INFINITY,
        }
    }
}

/// 阈值扫描配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub thresholds: Vec<f64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            thresholds: DEFAULT_SWEEP_THRESHOLDS.to_vec(),
        }
    }
}

impl SweepConfig {
    pub fn new(thresholds: Vec<f64>) -> Self {
        Self { thresholds }
    }

    /// 校验并返回去重、降序排列的阈值
    pub fn normalized(&self) -> Result<Vec<f64>> {
        if self.thresholds.is_empty() {
            return Err(ExtractError::config("threshold sweep set is empty"));
        }
        for &t in &self.thresholds {
            validate_threshold(t)?;
        }

        let mut thresholds = self.thresholds.clone();
        thresholds.sort_by(|a, b| b.total_cmp(a));
        thresholds.dedup();
        Ok(thresholds)
    }
}

fn validate_threshold(threshold: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ExtractError::config(format!(
            "similarity threshold must be a float between 0.0 and 1.0 (got {})",
            threshold
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ExtractionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_capacity(), 10);
        assert_eq!(config.max_live_frames(), 16);
    }

    #[test]
    fn test_invalid_settings_are_config_errors() {
        let cases = [
            ExtractionConfig {
                similarity_threshold: 1.5,
                ..Default::default()
            },
            ExtractionConfig {
                similarity_threshold: f64::NAN,
                ..Default::default()
            },
            ExtractionConfig {
                sampling_fps: 0.0,
                ..Default::default()
            },
            ExtractionConfig {
                sampling_fps: -2.0,
                ..Default::default()
            },
            ExtractionConfig {
                worker_count: 1,
                ..Default::default()
            },
            ExtractionConfig {
                channel_capacity: Some(0),
                ..Default::default()
            },
            ExtractionConfig {
                output_prefix: "a/b".to_string(),
                ..Default::default()
            },
        ];

        for config in cases {
            let err = config.validate().unwrap_err();
            assert!(err.is_config(), "{:?} -> {}", config, err);
        }
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config =
            ExtractionConfig::from_json_str(r#"{"similarity_threshold": 0.8, "worker_count": 3}"#)
                .unwrap();
        assert_eq!(config.similarity_threshold, 0.8);
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.sampling_fps, 1.0);
        assert_eq!(config.effective_capacity(), 6);

        assert!(ExtractionConfig::from_json_str(r#"{"worker_count": 0}"#).is_err());
    }

    #[test]
    fn test_frames_per_sample() {
        let config = ExtractionConfig {
            sampling_fps: 2.0,
            ..Default::default()
        };
        assert_eq!(config.frames_per_sample(29.97).unwrap(), 14.985);
        assert!(config.frames_per_sample(0.0).is_err());
    }

    #[test]
    fn test_retention_policy() {
        assert!(RetentionPolicy::Threshold(0.9).retains(0.5));
        assert!(!RetentionPolicy::Threshold(0.9).retains(0.9));
        assert!(RetentionPolicy::RetainAll.retains(1.0));
    }

    #[test]
    fn test_sweep_thresholds_normalized() {
        let sweep = SweepConfig::new(vec![0.7, 0.95, 0.7, 0.8]);
        assert_eq!(sweep.normalized().unwrap(), vec![0.95, 0.8, 0.7]);

        assert!(SweepConfig::new(vec![]).normalized().is_err());
        assert!(SweepConfig::new(vec![0.5, 2.0]).normalized().is_err());
    }
}
