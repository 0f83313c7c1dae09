// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/preprocess/enhance.rs - 条件图像增强
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

use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::filter::filter3x3;
use tracing::debug;

use crate::preprocess::quality::{LumaStats, luminance};

// 对比度低于该值时先拉伸对比度再增强锐度
const LOW_CONTRAST_RANGE: f64 = 100.0;
// 平均亮度低于该值时提亮
const DARK_MEAN_LUMA: f64 = 100.0;

const CONTRAST_GAIN: f32 = 1.5;
const SHARPNESS_GAIN: f32 = 1.5;
const BRIGHTNESS_GAIN: f32 = 1.3;

// 平滑核（权重和 13），锐度增强时作为退化图像
const SMOOTH_WEIGHTS: [f32; 9] = [1.0, 1.0, 1.0, 1.0, 5.0, 1.0, 1.0, 1.0, 1.0];
const SMOOTH_SCALE: f32 = 13.0;

// 通用锐化核（权重和 16）
const SHARPEN_WEIGHTS: [f32; 9] = [-2.0, -2.0, -2.0, -2.0, 32.0, -2.0, -2.0, -2.0, -2.0];
const SHARPEN_SCALE: f32 = 16.0;

/// 增强计划，由原图亮度统计决定；两个条件互不排斥
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnhancePlan {
  /// 对比度 x1.5，随后锐度 x1.5
  pub boost_contrast: bool,
  /// 亮度 x1.3
  pub boost_brightness: bool,
}

impl EnhancePlan {
  pub fn from_stats(stats: &LumaStats) -> Self {
    Self {
      boost_contrast: stats.range() < LOW_CONTRAST_RANGE,
      boost_brightness: stats.mean < DARK_MEAN_LUMA,
    }
  }

  pub fn for_image(image: &RgbImage) -> Self {
    Self::from_stats(&LumaStats::of(&luminance(image)))
  }
}

/// 按计划增强图像，最后总是做一次通用锐化；输入不会被修改
pub fn enhance_image(image: &RgbImage) -> RgbImage {
  let plan = EnhancePlan::for_image(image);
  debug!(
    "增强计划: 对比度={}, 亮度={}",
    plan.boost_contrast, plan.boost_brightness
  );
  apply_plan(image, &plan)
}

pub fn apply_plan(image: &RgbImage, plan: &EnhancePlan) -> RgbImage {
  let mut enhanced = image.clone();

  if plan.boost_contrast {
    enhanced = adjust_contrast(&enhanced, CONTRAST_GAIN);
    enhanced = adjust_sharpness(&enhanced, SHARPNESS_GAIN);
  }

  if plan.boost_brightness {
    enhanced = adjust_brightness(&enhanced, BRIGHTNESS_GAIN);
  }

  sharpen(&enhanced)
}

/// 以 `degenerate` 为基准按 `factor` 外插：out = degenerate + factor * (image - degenerate)
fn blend_with<F>(image: &RgbImage, factor: f32, degenerate: F) -> RgbImage
where
  F: Fn(u32, u32, usize) -> f32,
{
  RgbImage::from_fn(image.width(), image.height(), |x, y| {
    let px = image.get_pixel(x, y).0;
    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
      let base = degenerate(x, y, c);
      let v = base + factor * (px[c] as f32 - base);
      *value = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
  })
}

/// 对比度：以平均灰度构成的纯色图为退化图像
pub fn adjust_contrast(image: &RgbImage, factor: f32) -> RgbImage {
  let mean = LumaStats::of(&luminance(image)).mean.round() as f32;
  blend_with(image, factor, |_, _, _| mean)
}

/// 锐度：以平滑后的图像为退化图像
pub fn adjust_sharpness(image: &RgbImage, factor: f32) -> RgbImage {
  let smoothed = weighted_filter(image, &SMOOTH_WEIGHTS);
  blend_with(image, factor, |x, y, c| {
    smoothed.get_pixel(x, y).0[c] / SMOOTH_SCALE
  })
}

/// 亮度：以全黑图像为退化图像
pub fn adjust_brightness(image: &RgbImage, factor: f32) -> RgbImage {
  blend_with(image, factor, |_, _, _| 0.0)
}

/// 通用 3x3 锐化
pub fn sharpen(image: &RgbImage) -> RgbImage {
  let sums = weighted_filter(image, &SHARPEN_WEIGHTS);
  RgbImage::from_fn(image.width(), image.height(), |x, y| {
    let px = sums.get_pixel(x, y).0;
    Rgb(px.map(|v| (v / SHARPEN_SCALE).round().clamp(0.0, 255.0) as u8))
  })
}

// 以浮点累加 3x3 加权和，边缘按延拓处理
fn weighted_filter(image: &RgbImage, weights: &[f32; 9]) -> ImageBuffer<Rgb<f32>, Vec<f32>> {
  filter3x3::<_, f32, f32>(image, weights)
}
