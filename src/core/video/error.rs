use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExtractError>;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Frame source unavailable: {0}")]
    Source(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corrupt frame #{index}: expected {expected} bytes, got {actual}")]
    CorruptFrame {
        index: u64,
        expected: usize,
        actual: usize,
    },
    #[error("Frame dimensions differ: {left:?} vs {right:?}")]
    DimensionMismatch { left: (u32, u32), right: (u32, u32) },
    #[error("Frame {width}x{height} is smaller than the {window}x{window} similarity window")]
    FrameTooSmall { width: u32, height: u32, window: u32 },
    #[error("Similarity scoring failed: {0}")]
    Similarity(String),
    #[error("Sink write failed for {key}: {reason}")]
    Sink { key: String, reason: String },
    #[error("Score log error: {0}")]
    ScoreLog(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("Invalid output key: {0}")]
    InvalidOutputKey(String),
    #[error("Task channel closed")]
    Channel,
}

impl ExtractError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        Self::Source(msg.into())
    }

    pub fn sink<K: Into<String>, S: Into<String>>(key: K, reason: S) -> Self {
        Self::Sink {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// 配置错误在流水线启动前就失败，调用方据此决定退出码
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
