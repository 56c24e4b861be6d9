//! 结构相似度（SSIM）
//!
//! Mean SSIM of two grayscale images, scored by `image_compare` with its
//! `MSSIMSimple` algorithm (8x8 windows, K1=0.01, K2=0.03).

use super::error::{ExtractError, Result};
use image::GrayImage;
use image_compare::Algorithm;

/// image_compare 的窗口边长
pub const WINDOW: u32 = 8;

/// 满分（两帧完全相同）
pub const MAX_SCORE: f64 = 1.0;

/// SSIM 理论下界
pub const MIN_SCORE: f64 = -1.0;

/// 计算两张灰度图的 SSIM
pub fn ssim(a: &GrayImage, b: &GrayImage) -> Result<f64> {
    if a.dimensions() != b.dimensions() {
        return Err(ExtractError::DimensionMismatch {
            left: a.dimensions(),
            right: b.dimensions(),
        });
    }

    let (width, height) = a.dimensions();
    if width < WINDOW || height < WINDOW {
        return Err(ExtractError::FrameTooSmall {
            width,
            height,
            window: WINDOW,
        });
    }

    // 完全相同的缓冲直接满分
    if a.as_raw() == b.as_raw() {
        return Ok(MAX_SCORE);
    }

    let similarity = image_compare::gray_similarity_structure(&Algorithm::MSSIMSimple, a, b)
        .map_err(|e| ExtractError::Similarity(e.to_string()))?;
    Ok(similarity.score.clamp(MIN_SCORE, MAX_SCORE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]))
    }

    fn checkerboard(width: u32, height: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Luma([20])
            } else {
                Luma([230])
            }
        })
    }

    #[test]
    fn test_identical_images_score_max() {
        let img = gradient(64, 48);
        assert_eq!(ssim(&img, &img).unwrap(), MAX_SCORE);

        let flat = GrayImage::from_pixel(32, 32, Luma([128]));
        assert_eq!(ssim(&flat, &flat.clone()).unwrap(), MAX_SCORE);
    }

    #[test]
    fn test_symmetric() {
        let a = gradient(40, 32);
        let b = checkerboard(40, 32, 4);
        let ab = ssim(&a, &b).unwrap();
        let ba = ssim(&b, &a).unwrap();
        assert!((ab - ba).abs() < 1e-9, "{} vs {}", ab, ba);
        assert!(ab < MAX_SCORE);
    }

    #[test]
    fn test_different_images_score_lower() {
        let a = checkerboard(48, 48, 6);
        let inverted = GrayImage::from_fn(48, 48, |x, y| Luma([255 - a.get_pixel(x, y)[0]]));

        let score = ssim(&a, &inverted).unwrap();
        assert!(score < 0.0, "inverted pattern should anti-correlate, got {}", score);
        assert!(score >= MIN_SCORE);
    }

    #[test]
    fn test_small_change_stays_close_to_max() {
        let a = gradient(64, 64);
        let mut b = a.clone();
        b.put_pixel(10, 10, Luma([0]));

        let score = ssim(&a, &b).unwrap();
        assert!(score > 0.9 && score < MAX_SCORE, "score = {}", score);
    }

    #[test]
    fn test_rejects_mismatched_dimensions() {
        let a = gradient(32, 32);
        let b = gradient(32, 31);
        assert!(matches!(
            ssim(&a, &b),
            Err(ExtractError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_images_smaller_than_window() {
        let a = gradient(6, 20);
        assert!(matches!(
            ssim(&a, &a),
            Err(ExtractError::FrameTooSmall { window: 8, .. })
        ));
    }
}
