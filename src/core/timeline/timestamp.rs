//! 时间戳与输出文件名

use crate::core::video::error::{ExtractError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

type Pattern = Lazy<std::result::Result<Regex, regex::Error>>;

static VTT_TIMESTAMP: Pattern = Lazy::new(|| {
    Regex::new(r"^(?:(?P<h>\d+):)?(?P<m>[0-5]\d):(?P<s>[0-5]\d)[.,](?P<ms>\d{3})$")
});

static OUTPUT_KEY: Pattern = Lazy::new(|| {
    Regex::new(r"^(?P<prefix>.+)_frame_(?P<index>\d+)_(?P<ts>\d+(?:\.\d+)?)s(?:\.[A-Za-z0-9]+)?$")
});

fn compiled(pattern: &'static Pattern) -> Result<&'static Regex> {
    match &**pattern {
        Ok(regex) => Ok(regex),
        Err(e) => Err(ExtractError::config(format!("regex error: {}", e))),
    }
}

/// 秒 → `HH:MM:SS.mmm`
pub fn format_vtt_timestamp(seconds: f64) -> Result<String> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ExtractError::InvalidTimestamp(format!(
            "cannot format {} seconds",
            seconds
        )));
    }

    let total_ms = (seconds * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    Ok(format!(
        "{:02}:{:02}:{:02}.{:03}",
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60,
        ms
    ))
}

/// `HH:MM:SS.mmm` 或 `MM:SS.mmm` → 秒（兼容 SRT 的逗号）
pub fn parse_vtt_timestamp(text: &str) -> Result<f64> {
    let text = text.trim();
    let caps = compiled(&VTT_TIMESTAMP)?
        .captures(text)
        .ok_or_else(|| ExtractError::InvalidTimestamp(text.to_string()))?;

    let field = |name: &str| -> Result<u64> {
        caps.name(name)
            .map(|m| m.as_str().parse::<u64>())
            .unwrap_or(Ok(0))
            .map_err(|_| ExtractError::InvalidTimestamp(text.to_string()))
    };

    let total_ms = ((field("h")? * 60 + field("m")?) * 60 + field("s")?) * 1000 + field("ms")?;
    Ok(total_ms as f64 / 1000.0)
}

/// 关键帧的确定性名字：`{prefix}_frame_{index:04}_{timestamp:.3}s`
#[derive(Debug, Clone, PartialEq)]
pub struct OutputKey {
    pub prefix: String,
    pub sequence_index: u64,
    pub timestamp_seconds: f64,
}

impl OutputKey {
    pub fn new(prefix: &str, sequence_index: u64, timestamp_seconds: f64) -> Self {
        Self {
            prefix: prefix.to_string(),
            sequence_index,
            timestamp_seconds,
        }
    }

    /// 接受 key 本身或带扩展名的文件名
    pub fn parse(name: &str) -> Result<Self> {
        let caps = compiled(&OUTPUT_KEY)?
            .captures(name)
            .ok_or_else(|| ExtractError::InvalidOutputKey(name.to_string()))?;

        let invalid = || ExtractError::InvalidOutputKey(name.to_string());
        let sequence_index = caps["index"].parse::<u64>().map_err(|_| invalid())?;
        let timestamp_seconds = caps["ts"].parse::<f64>().map_err(|_| invalid())?;

        Ok(Self {
            prefix: caps["prefix"].to_string(),
            sequence_index,
            timestamp_seconds,
        })
    }
}

impl fmt::Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_frame_{:04}_{:.3}s",
            self.prefix, self.sequence_index, self.timestamp_seconds
        )
    }
}

impl FromStr for OutputKey {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
