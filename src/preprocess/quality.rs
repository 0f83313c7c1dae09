// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/preprocess/quality.rs - 图像质量评估
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

//! 图像质量评估
//!
//! 在亮度通道上计算三个指标：拉普拉斯方差（清晰度）、最大最小亮度差（对比度）
//! 和平均亮度。三个指标共同决定质量等级，等级再决定是否需要增强。

use image::{GrayImage, Luma, RgbImage};
use imageproc::filter::laplacian_filter;
use serde::{Deserialize, Serialize};

/// 质量等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
  High,
  Medium,
  Low,
}

impl QualityTier {
  /// 按顺序匹配阈值，先命中者为准
  pub fn classify(sharpness: f64, contrast: f64, brightness: f64) -> Self {
    if sharpness > 100.0 && contrast > 80.0 && brightness > 50.0 && brightness < 200.0 {
      QualityTier::High
    } else if sharpness > 50.0 && contrast > 40.0 && brightness > 30.0 && brightness < 220.0 {
      QualityTier::Medium
    } else {
      QualityTier::Low
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      QualityTier::High => "high",
      QualityTier::Medium => "medium",
      QualityTier::Low => "low",
    }
  }
}

impl std::fmt::Display for QualityTier {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 质量评估结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
  pub tier: QualityTier,
  pub sharpness: f64,
  pub contrast: f64,
  pub brightness: f64,
}

/// 亮度通道的基本统计量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LumaStats {
  pub min: u8,
  pub max: u8,
  pub mean: f64,
}

impl LumaStats {
  pub fn of(gray: &GrayImage) -> Self {
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    let mut sum = 0u64;
    for Luma([v]) in gray.pixels() {
      min = min.min(*v);
      max = max.max(*v);
      sum += *v as u64;
    }

    let count = gray.width() as u64 * gray.height() as u64;
    if count == 0 {
      return Self {
        min: 0,
        max: 0,
        mean: 0.0,
      };
    }

    Self {
      min,
      max,
      mean: sum as f64 / count as f64,
    }
  }

  /// 最大最小亮度差
  pub fn range(&self) -> f64 {
    (self.max - self.min) as f64
  }
}

/// RGB 转单通道亮度（ITU-R BT.601 系数）
pub fn luminance(image: &RgbImage) -> GrayImage {
  GrayImage::from_fn(image.width(), image.height(), |x, y| {
    let [r, g, b] = image.get_pixel(x, y).0;
    let l = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    Luma([l.round().clamp(0.0, 255.0) as u8])
  })
}

/// 拉普拉斯响应的方差，越大说明高频细节越多
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
  let (w, h) = gray.dimensions();
  if w == 0 || h == 0 {
    return 0.0;
  }

  let lap = laplacian_filter(gray);
  let count = (w as u64 * h as u64) as f64;
  let mean = lap.pixels().map(|Luma([v])| *v as f64).sum::<f64>() / count;
  lap
    .pixels()
    .map(|Luma([v])| {
      let d = *v as f64 - mean;
      d * d
    })
    .sum::<f64>()
    / count
}

/// 评估图像质量
pub fn assess_quality(image: &RgbImage) -> QualityReport {
  let gray = luminance(image);
  let stats = LumaStats::of(&gray);
  let sharpness = laplacian_variance(&gray);
  let contrast = stats.range();
  let brightness = stats.mean;

  QualityReport {
    tier: QualityTier::classify(sharpness, contrast, brightness),
    sharpness,
    contrast,
    brightness,
  }
}
