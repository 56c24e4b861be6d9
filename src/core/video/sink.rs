//! 关键帧输出
//!
//! Writes are keyed by `output_key`, unique per candidate, so workers never
//! contend for the same destination. [`DirectorySink`] writes to a temporary
//! name and renames into place, which makes each key's write atomic and an
//! overwrite of the same key safe.

use super::error::{ExtractError, Result};
use super::frame::{Frame, PixelFormat};
use crate::core::timeline::OutputKey;
use image::{DynamicImage, ImageOutputFormat};
use log::info;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const JPEG_QUALITY: u8 = 90;

pub trait FrameSink: Send + Sync {
    fn write(&self, key: &str, frame: &Frame) -> Result<()>;
}

/// 以 JPEG 写入目录，文件名为 `{key}.jpg`
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!("📁 DirectorySink: writing keyframes to {}", root.display());
        Ok(Self { root })
    }

    /// 同 `create`，并清掉目录里上一次运行留下的关键帧和临时文件；其他文件不动
    pub fn recreate<P: AsRef<Path>>(root: P) -> Result<Self> {
        let sink = Self::create(root)?;
        let mut removed = 0usize;
        for entry in fs::read_dir(&sink.root)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let stale = path.file_name().and_then(|n| n.to_str()).map_or(false, |name| {
                let leftover = name.starts_with('.') && name.ends_with(".jpg.tmp");
                let keyframe = name.ends_with(".jpg") && OutputKey::parse(name).is_ok();
                leftover || keyframe
            });
            if stale {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(
                "🧹 DirectorySink: removed {} stale files from {}",
                removed,
                sink.root.display()
            );
        }
        Ok(sink)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.jpg", key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    /// 从另一个目录复制已落盘的关键帧（不移动，不重新编码）
    pub fn copy_from(&self, source: &DirectorySink, key: &str) -> Result<()> {
        let from = source.path_for(key);
        if !from.is_file() {
            return Err(ExtractError::sink(
                key,
                format!("reference frame missing at {}", from.display()),
            ));
        }

        let tmp = self.root.join(format!(".{}.jpg.tmp", key));
        fs::copy(&from, &tmp)?;
        fs::rename(&tmp, self.path_for(key))?;
        Ok(())
    }
}

impl FrameSink for DirectorySink {
    fn write(&self, key: &str, frame: &Frame) -> Result<()> {
        // JPEG 不带 alpha
        let image = match frame.format {
            PixelFormat::Rgba8 => DynamicImage::ImageRgb8(frame.to_image()?.to_rgb8()),
            _ => frame.to_image()?,
        };
        let tmp = self.root.join(format!(".{}.jpg.tmp", key));

        let written = File::create(&tmp)
            .map_err(ExtractError::from)
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                image.write_to(&mut writer, ImageOutputFormat::Jpeg(JPEG_QUALITY))?;
                writer.flush()?;
                Ok(())
            });

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(ExtractError::sink(key, e.to_string()));
        }

        fs::rename(&tmp, self.path_for(key)).map_err(|e| ExtractError::sink(key, e.to_string()))
    }
}

/// 内存 sink，按 key 保存帧的副本
#[derive(Default)]
pub struct MemorySink {
    frames: Mutex<HashMap<String, Frame>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<Frame> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Frame>> {
        match self.frames.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl FrameSink for MemorySink {
    fn write(&self, key: &str, frame: &Frame) -> Result<()> {
        frame.validate()?;
        self.lock().insert(key.to_string(), frame.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_frame(index: u64, fill: u8) -> Frame {
        Frame::new(16, 16, PixelFormat::Rgb8, vec![fill; 16 * 16 * 3], index, index as f64)
    }

    #[test]
    fn test_directory_sink_writes_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::create(dir.path().join("frames")).unwrap();

        sink.write("clip_frame_0000_0.000s", &rgb_frame(0, 120)).unwrap();

        let path = sink.path_for("clip_frame_0000_0.000s");
        assert!(path.is_file());
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));

        // 没有残留的临时文件
        let leftovers = fs::read_dir(sink.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_directory_sink_overwrite_is_safe() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::create(dir.path()).unwrap();

        sink.write("k", &rgb_frame(0, 10)).unwrap();
        sink.write("k", &rgb_frame(0, 250)).unwrap();

        let decoded = image::open(sink.path_for("k")).unwrap().to_luma8();
        assert!(decoded.get_pixel(8, 8)[0] > 200);
    }

    #[test]
    fn test_directory_sink_rejects_corrupt_frame() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::create(dir.path()).unwrap();
        let broken = Frame::new(16, 16, PixelFormat::Rgb8, vec![0; 10], 3, 0.0);

        assert!(sink.write("broken", &broken).is_err());
        assert!(!sink.contains("broken"));
    }

    #[test]
    fn test_copy_from_reference() {
        let dir = tempfile::tempdir().unwrap();
        let reference = DirectorySink::create(dir.path().join("all")).unwrap();
        let target = DirectorySink::create(dir.path().join("threshold_0.9")).unwrap();

        reference.write("k1", &rgb_frame(1, 50)).unwrap();
        target.copy_from(&reference, "k1").unwrap();

        assert!(target.contains("k1"));
        assert!(reference.contains("k1"));
        assert!(matches!(
            target.copy_from(&reference, "missing"),
            Err(ExtractError::Sink { .. })
        ));
    }

    #[test]
    fn test_recreate_clears_previous_keyframes_only() {
        let dir = tempfile::tempdir().unwrap();
        let first = DirectorySink::create(dir.path()).unwrap();
        first.write("old_frame_0000_0.000s", &rgb_frame(0, 10)).unwrap();
        fs::write(dir.path().join(".old_frame_0001_1.000s.jpg.tmp"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep").unwrap();
        fs::write(dir.path().join("cover.jpg"), b"keep").unwrap();

        let sink = DirectorySink::recreate(dir.path()).unwrap();
        assert!(!sink.contains("old_frame_0000_0.000s"));
        assert!(!dir.path().join(".old_frame_0001_1.000s.jpg.tmp").exists());
        assert!(dir.path().join("notes.txt").is_file());
        assert!(dir.path().join("cover.jpg").is_file());

        let fresh = DirectorySink::recreate(dir.path().join("new")).unwrap();
        assert!(fresh.root().is_dir());
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());

        sink.write("b", &rgb_frame(2, 1)).unwrap();
        sink.write("a", &rgb_frame(1, 1)).unwrap();

        assert_eq!(sink.keys(), vec!["a", "b"]);
        assert_eq!(sink.get("b").unwrap().sequence_index, 2);
        assert_eq!(sink.len(), 2);
    }
}
