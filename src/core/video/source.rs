//! 帧来源
//!
//! The pipeline never decodes a container itself. A decode collaborator
//! implements [`FrameSource`]; two plain implementations ship here.

use super::error::{ExtractError, Result};
use super::frame::Frame;
use log::{debug, info};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

pub trait FrameSource: Send {
    /// 源的原生帧率
    fn native_fps(&self) -> f64;

    /// 按 sequence_index 递增返回下一帧；`None` 表示结束
    fn next_frame(&mut self) -> Option<Result<Frame>>;

    /// 总帧数（已知时）
    fn frame_count_hint(&self) -> Option<u64> {
        None
    }
}

/// 内存中的帧序列
pub struct VecFrameSource {
    frames: VecDeque<Frame>,
    fps: f64,
    total: u64,
}

impl VecFrameSource {
    pub fn new(frames: Vec<Frame>, fps: f64) -> Self {
        let total = frames.len() as u64;
        Self {
            frames: frames.into(),
            fps,
            total,
        }
    }
}

impl FrameSource for VecFrameSource {
    fn native_fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.frames.pop_front().map(Ok)
    }

    fn frame_count_hint(&self) -> Option<u64> {
        Some(self.total)
    }
}

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// 已解码的图片序列目录（按文件名排序），逐帧惰性读取
pub struct ImageSequenceSource {
    paths: VecDeque<PathBuf>,
    fps: f64,
    next_index: u64,
    total: u64,
}

impl ImageSequenceSource {
    pub fn open<P: AsRef<Path>>(dir: P, fps: f64) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ExtractError::unavailable(format!(
                "{} is not a readable directory",
                dir.display()
            )));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| ExtractError::unavailable(format!("{}: {}", dir.display(), e)))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(ExtractError::unavailable(format!(
                "no image frames found in {}",
                dir.display()
            )));
        }

        info!(
            "🎞️ ImageSequenceSource: {} frames in {} at {} fps",
            paths.len(),
            dir.display(),
            fps
        );

        let total = paths.len() as u64;
        Ok(Self {
            paths: paths.into(),
            fps,
            next_index: 0,
            total,
        })
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn native_fps(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Option<Result<Frame>> {
        let path = self.paths.pop_front()?;
        let index = self.next_index;
        self.next_index += 1;

        debug!("decoding {}", path.display());
        let timestamp = index as f64 / self.fps;
        Some(
            image::open(&path)
                .map(|img| Frame::from_image(img, index, timestamp))
                .map_err(ExtractError::from),
        )
    }

    fn frame_count_hint(&self) -> Option<u64> {
        Some(self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::video::frame::PixelFormat;
    use image::{GrayImage, Luma};

    #[test]
    fn test_vec_source_yields_in_order() {
        let frames = (0..3)
            .map(|i| Frame::new(1, 1, PixelFormat::Gray8, vec![0], i, 0.0))
            .collect();
        let mut source = VecFrameSource::new(frames, 30.0);

        assert_eq!(source.frame_count_hint(), Some(3));
        let indices: Vec<u64> = std::iter::from_fn(|| source.next_frame())
            .map(|f| f.unwrap().sequence_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_missing_directory_is_source_error() {
        let err = ImageSequenceSource::open("/definitely/not/here", 25.0)
            .err()
            .unwrap();
        assert!(matches!(err, ExtractError::Source(_)));
    }

    #[test]
    fn test_empty_directory_is_source_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "hi").unwrap();
        assert!(matches!(
            ImageSequenceSource::open(dir.path(), 25.0),
            Err(ExtractError::Source(_))
        ));
    }

    #[test]
    fn test_image_sequence_reads_sorted_frames() {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [("b.png", 200u8), ("a.png", 10u8)] {
            GrayImage::from_pixel(4, 4, Luma([value]))
                .save(dir.path().join(name))
                .unwrap();
        }
        fs::write(dir.path().join("c.png"), b"not a png").unwrap();

        let mut source = ImageSequenceSource::open(dir.path(), 2.0).unwrap();
        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.sequence_index, 0);
        assert_eq!(first.data[0], 10);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.sequence_index, 1);
        assert_eq!(second.timestamp_seconds, 0.5);

        assert!(source.next_frame().unwrap().is_err());
        assert!(source.next_frame().is_none());
    }
}
