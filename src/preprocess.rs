// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/preprocess.rs - 图像预处理流水线
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info};

pub mod crop;
pub mod detect;
pub mod enhance;
pub mod quality;

pub use self::crop::{NormalizedRect, PixelRect, crop_bounds, crop_to_region};
pub use self::detect::{BoxDetection, DetectionMethod, detect_box};
pub use self::enhance::{EnhancePlan, enhance_image};
pub use self::quality::{QualityReport, QualityTier, assess_quality};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("图像解码失败: {0}")]
  DecodeError(#[from] image::ImageError),
}

/// 单张图像的预处理结果
///
/// 三幅图像以 `Arc` 共享：质量为 high 时 `enhanced` 与 `original` 是同一实例，
/// 未找到包装箱时 `processed` 与 `enhanced` 是同一实例。
#[derive(Debug, Clone)]
pub struct PreprocessResult {
  pub original: Arc<RgbImage>,
  pub enhanced: Arc<RgbImage>,
  pub processed: Arc<RgbImage>,
  pub quality: QualityReport,
  pub detection: BoxDetection,
}

/// 解码、评估、检测、增强、裁剪
///
/// 除解码外没有副作用：不写文件，不访问网络。
pub fn preprocess(raw: &[u8]) -> Result<PreprocessResult, PreprocessError> {
  let original = Arc::new(image::load_from_memory(raw)?.to_rgb8());
  debug!("图像解码完成: {}x{}", original.width(), original.height());

  let quality = assess_quality(&original);
  info!(
    "图像质量: {} (清晰度 {:.1}, 对比度 {:.0}, 亮度 {:.1})",
    quality.tier, quality.sharpness, quality.contrast, quality.brightness
  );

  // 检测器直接处理原始字节
  let detection = detect_box(raw);

  let enhanced = if quality.tier != QualityTier::High {
    Arc::new(enhance_image(&original))
  } else {
    Arc::clone(&original)
  };

  let processed = crop_to_region(&enhanced, detection.region.as_ref());

  Ok(PreprocessResult {
    original,
    enhanced,
    processed,
    quality,
    detection,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{ImageFormat, Rgb};

  fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
  }

  fn checkerboard() -> RgbImage {
    RgbImage::from_fn(64, 64, |x, y| {
      let v = if ((x / 4) + (y / 4)) % 2 == 0 { 0 } else { 255 };
      Rgb([v, v, v])
    })
  }

  #[test]
  fn undecodable_bytes_are_an_error() {
    let err = preprocess(b"\x89PNG broken").unwrap_err();
    assert!(matches!(err, PreprocessError::DecodeError(_)));
  }

  #[test]
  fn high_quality_image_is_not_enhanced() {
    let result = preprocess(&encode_png(&checkerboard())).unwrap();
    assert_eq!(result.quality.tier, QualityTier::High);
    assert!(Arc::ptr_eq(&result.original, &result.enhanced));
    assert_eq!(*result.enhanced, checkerboard());
  }

  #[test]
  fn low_quality_image_is_enhanced_and_kept_whole() {
    let flat = RgbImage::from_pixel(48, 48, Rgb([60, 60, 60]));
    let result = preprocess(&encode_png(&flat)).unwrap();
    assert_eq!(result.quality.tier, QualityTier::Low);
    assert!(!Arc::ptr_eq(&result.original, &result.enhanced));
    // 60 * 1.3 = 78
    assert_eq!(result.enhanced.get_pixel(10, 10).0, [78, 78, 78]);
    assert!(!result.detection.is_found());
    assert!(Arc::ptr_eq(&result.enhanced, &result.processed));
  }

  #[test]
  fn detected_box_is_cropped_with_margin() {
    let image = RgbImage::from_fn(160, 120, |x, y| {
      if (40..120).contains(&x) && (30..90).contains(&y) {
        Rgb([230, 200, 160])
      } else {
        Rgb([20, 20, 20])
      }
    });
    let result = preprocess(&encode_png(&image)).unwrap();

    assert_eq!(result.detection.method, DetectionMethod::Geometric);
    let region = result.detection.region.unwrap();
    let bounds = crop_bounds(result.enhanced.width(), result.enhanced.height(), &region);
    assert_eq!(result.processed.dimensions(), (88, 68));
    assert_eq!(result.processed.dimensions(), (bounds.width(), bounds.height()));

    let expected = image::imageops::crop_imm(
      result.enhanced.as_ref(),
      bounds.x1,
      bounds.y1,
      bounds.width(),
      bounds.height(),
    )
    .to_image();
    assert_eq!(*result.processed, expected);
  }

  #[test]
  fn preprocessing_is_deterministic() {
    let image = RgbImage::from_fn(96, 72, |x, y| {
      Rgb([(x * 2) as u8, (y * 3) as u8, ((x + y) % 200) as u8])
    });
    let bytes = encode_png(&image);
    let a = preprocess(&bytes).unwrap();
    let b = preprocess(&bytes).unwrap();
    assert_eq!(a.quality, b.quality);
    assert_eq!(a.detection, b.detection);
    assert_eq!(*a.enhanced, *b.enhanced);
    assert_eq!(*a.processed, *b.processed);
  }
}
