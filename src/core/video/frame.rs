use super::error::{ExtractError, Result};
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

/// 像素布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// 帧数据结构
///
/// 解码后不可变；在流水线中以 `Arc<Frame>` 共享给相邻的两个比较任务。
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    pub sequence_index: u64,
    pub timestamp_seconds: f64,
}

impl Frame {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
        sequence_index: u64,
        timestamp_seconds: f64,
    ) -> Self {
        Self {
            width,
            height,
            format,
            data,
            sequence_index,
            timestamp_seconds,
        }
    }

    pub fn from_image(image: DynamicImage, sequence_index: u64, timestamp_seconds: f64) -> Self {
        let (width, height) = (image.width(), image.height());
        let (format, data) = match image {
            DynamicImage::ImageLuma8(img) => (PixelFormat::Gray8, img.into_raw()),
            DynamicImage::ImageRgba8(img) => (PixelFormat::Rgba8, img.into_raw()),
            other => (PixelFormat::Rgb8, other.to_rgb8().into_raw()),
        };
        Self::new(width, height, format, data, sequence_index, timestamp_seconds)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn expected_len(&self) -> usize {
        self.pixel_count() * self.format.channels()
    }

    /// 缓冲区长度与声明的尺寸不符即视为损坏帧
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.data.len() != self.expected_len() {
            return Err(ExtractError::CorruptFrame {
                index: self.sequence_index,
                expected: self.expected_len(),
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// 转灰度（BT.601 整数系数）
    pub fn to_luma(&self) -> Result<GrayImage> {
        self.validate()?;

        let gray: Vec<u8> = match self.format {
            PixelFormat::Gray8 => self.data.clone(),
            PixelFormat::Rgb8 => self.data.chunks_exact(3).map(luma).collect(),
            PixelFormat::Rgba8 => self.data.chunks_exact(4).map(luma).collect(),
        };

        GrayImage::from_raw(self.width, self.height, gray).ok_or_else(|| self.corrupt())
    }

    pub fn to_image(&self) -> Result<DynamicImage> {
        self.validate()?;

        let data = self.data.clone();
        let image = match self.format {
            PixelFormat::Gray8 => {
                GrayImage::from_raw(self.width, self.height, data).map(DynamicImage::ImageLuma8)
            }
            PixelFormat::Rgb8 => {
                RgbImage::from_raw(self.width, self.height, data).map(DynamicImage::ImageRgb8)
            }
            PixelFormat::Rgba8 => {
                RgbaImage::from_raw(self.width, self.height, data).map(DynamicImage::ImageRgba8)
            }
        };
        image.ok_or_else(|| self.corrupt())
    }

    fn corrupt(&self) -> ExtractError {
        ExtractError::CorruptFrame {
            index: self.sequence_index,
            expected: self.expected_len(),
            actual: self.data.len(),
        }
    }
}

fn luma(px: &[u8]) -> u8 {
    ((px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000) as u8
}
