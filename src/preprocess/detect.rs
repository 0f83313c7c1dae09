// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/preprocess/detect.rs - 基于轮廓的包装箱定位
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

use std::panic::{AssertUnwindSafe, catch_unwind};

use imageproc::{
  contours::{BorderType, Contour, find_contours},
  edges::canny,
  filter::gaussian_blur_f32,
  geometry::contour_area,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::preprocess::{crop::NormalizedRect, quality::luminance};

// 5x5 高斯核对应的标准差
const BLUR_SIGMA: f32 = 1.1;
const CANNY_LOW_THRESHOLD: f32 = 50.0;
const CANNY_HIGH_THRESHOLD: f32 = 150.0;
// 轮廓面积至少占整幅图像的比例
const MIN_AREA_RATIO: f64 = 0.05;
// 外接矩形宽高比的开区间
const MIN_ASPECT_RATIO: f64 = 0.5;
const MAX_ASPECT_RATIO: f64 = 2.0;

/// 检测方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMethod {
  /// 几何轮廓分析找到了包装箱
  #[serde(rename = "geometric")]
  Geometric,
  /// 没有轮廓同时满足面积和宽高比条件
  #[serde(rename = "none")]
  NotFound,
  /// 解码或处理失败，按未找到处理
  #[serde(rename = "error")]
  Failed,
}

/// 包装箱检测结果，`region` 仅在找到时存在
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxDetection {
  pub method: DetectionMethod,
  pub region: Option<NormalizedRect>,
}

impl BoxDetection {
  pub fn found(region: NormalizedRect) -> Self {
    Self {
      method: DetectionMethod::Geometric,
      region: Some(region),
    }
  }

  pub fn not_found() -> Self {
    Self {
      method: DetectionMethod::NotFound,
      region: None,
    }
  }

  pub fn failed() -> Self {
    Self {
      method: DetectionMethod::Failed,
      region: None,
    }
  }

  pub fn is_found(&self) -> bool {
    self.region.is_some()
  }
}

#[derive(Error, Debug)]
enum DetectError {
  #[error("图像解码失败: {0}")]
  Decode(#[from] image::ImageError),
  #[error("图像尺寸为空: {0}x{1}")]
  EmptyImage(u32, u32),
  #[error("检测过程异常终止")]
  Panicked,
}

/// 在编码后的图像字节中定位包装箱
///
/// 任何失败都降级为 `DetectionMethod::Failed`，不会向上传播。
pub fn detect_box(raw: &[u8]) -> BoxDetection {
  let outcome = catch_unwind(AssertUnwindSafe(|| locate_box(raw)))
    .unwrap_or(Err(DetectError::Panicked));

  match outcome {
    Ok(Some(region)) => {
      debug!("检测到包装箱: {:?}", region.to_array());
      BoxDetection::found(region)
    }
    Ok(None) => {
      debug!("未检测到包装箱");
      BoxDetection::not_found()
    }
    Err(e) => {
      warn!("包装箱检测失败，将使用整幅图像: {}", e);
      BoxDetection::failed()
    }
  }
}

fn locate_box(raw: &[u8]) -> Result<Option<NormalizedRect>, DetectError> {
  let image = image::load_from_memory(raw)?.to_rgb8();
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    return Err(DetectError::EmptyImage(width, height));
  }

  let gray = luminance(&image);
  let blurred = gaussian_blur_f32(&gray, BLUR_SIGMA);
  let edges = canny(&blurred, CANNY_LOW_THRESHOLD, CANNY_HIGH_THRESHOLD);
  let contours = find_contours::<i32>(&edges);
  debug!("边缘图中共有 {} 条轮廓", contours.len());

  Ok(select_largest_box(&contours, width, height))
}

/// 从最外层轮廓中挑出归一化面积最大的类箱体矩形
pub fn select_largest_box(
  contours: &[Contour<i32>],
  width: u32,
  height: u32,
) -> Option<NormalizedRect> {
  let image_area = width as f64 * height as f64;
  let (w, h) = (width as f32, height as f32);

  let mut best: Option<NormalizedRect> = None;
  for contour in contours {
    if contour.border_type != BorderType::Outer || contour.parent.is_some() {
      continue;
    }

    let area = contour_area(&contour.points);
    if area <= image_area * MIN_AREA_RATIO {
      continue;
    }

    let Some((x, y, bw, bh)) = bounding_rect(contour) else {
      continue;
    };

    let aspect = bw as f64 / bh as f64;
    if aspect <= MIN_ASPECT_RATIO || aspect >= MAX_ASPECT_RATIO {
      continue;
    }

    let rect = NormalizedRect::new(
      x as f32 / w,
      y as f32 / h,
      (x + bw) as f32 / w,
      (y + bh) as f32 / h,
    );
    // 面积相同保留先出现者
    if best.is_none_or(|b| rect.area() > b.area()) {
      best = Some(rect);
    }
  }

  best
}

// 轴对齐外接矩形 (x, y, w, h)，宽高按像素个数计
fn bounding_rect(contour: &Contour<i32>) -> Option<(i32, i32, i32, i32)> {
  let first = contour.points.first()?;
  let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
  for p in &contour.points {
    min_x = min_x.min(p.x);
    min_y = min_y.min(p.y);
    max_x = max_x.max(p.x);
    max_y = max_y.max(p.y);
  }
  Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}
