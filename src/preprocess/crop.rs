// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/preprocess/crop.rs - 按检测区域裁剪
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
use serde::{Deserialize, Serialize};
use tracing::debug;

// 裁剪时在检测框每侧额外保留的比例
const CROP_MARGIN_RATIO: f64 = 0.05;

/// 归一化矩形，坐标为图像宽高的比例 [x1, y1, x2, y2]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl NormalizedRect {
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  /// 从任意长度的切片构造，长度不为 4 时返回 None
  pub fn from_slice(values: &[f32]) -> Option<Self> {
    match values {
      [x1, y1, x2, y2] => Some(Self::new(*x1, *y1, *x2, *y2)),
      _ => None,
    }
  }

  /// 坐标有限且严格单调
  pub fn is_well_formed(&self) -> bool {
    [self.x1, self.y1, self.x2, self.y2]
      .iter()
      .all(|v| v.is_finite())
      && self.x1 < self.x2
      && self.y1 < self.y2
  }

  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  /// 归一化面积，退化矩形为 0
  pub fn area(&self) -> f32 {
    (self.width() * self.height()).max(0.0)
  }

  pub fn to_array(&self) -> [f32; 4] {
    [self.x1, self.y1, self.x2, self.y2]
  }
}

/// 像素坐标下的裁剪范围，始终落在 [0, width] x [0, height] 内
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
  pub x1: u32,
  pub y1: u32,
  pub x2: u32,
  pub y2: u32,
}

impl PixelRect {
  pub fn width(&self) -> u32 {
    self.x2.saturating_sub(self.x1)
  }

  pub fn height(&self) -> u32 {
    self.y2.saturating_sub(self.y1)
  }
}

/// 计算带边距的裁剪范围
///
/// 归一化坐标先换算为像素（向零截断），再按框自身宽高的 5% 向外扩展，
/// 最后把四个坐标都钳制到图像范围内。倒置或越界的输入同样会得到合法范围，
/// 此时范围可能为空。
pub fn crop_bounds(width: u32, height: u32, rect: &NormalizedRect) -> PixelRect {
  let (w, h) = (width as f64, height as f64);

  let x1 = (rect.x1 as f64 * w).trunc();
  let x2 = (rect.x2 as f64 * w).trunc();
  let y1 = (rect.y1 as f64 * h).trunc();
  let y2 = (rect.y2 as f64 * h).trunc();

  let margin_x = ((x2 - x1) * CROP_MARGIN_RATIO).trunc();
  let margin_y = ((y2 - y1) * CROP_MARGIN_RATIO).trunc();

  // NaN 经 `as` 转换后为 0
  let x1 = (x1 - margin_x).clamp(0.0, w) as u32;
  let y1 = (y1 - margin_y).clamp(0.0, h) as u32;
  let x2 = (x2 + margin_x).clamp(0.0, w) as u32;
  let y2 = (y2 + margin_y).clamp(0.0, h) as u32;

  PixelRect {
    x1,
    y1,
    x2: x2.max(x1),
    y2: y2.max(y1),
  }
}

/// 按归一化区域裁剪图像
///
/// 没有区域时直接返回同一个 `Arc`，不做任何复制。
pub fn crop_to_region(image: &Arc<RgbImage>, region: Option<&NormalizedRect>) -> Arc<RgbImage> {
  let Some(rect) = region else {
    return Arc::clone(image);
  };

  let bounds = crop_bounds(image.width(), image.height(), rect);
  debug!(
    "裁剪区域: ({}, {}) - ({}, {}), 原图 {}x{}",
    bounds.x1,
    bounds.y1,
    bounds.x2,
    bounds.y2,
    image.width(),
    image.height()
  );

  let cropped = image::imageops::crop_imm(
    image.as_ref(),
    bounds.x1,
    bounds.y1,
    bounds.width(),
    bounds.height(),
  )
  .to_image();

  Arc::new(cropped)
}
