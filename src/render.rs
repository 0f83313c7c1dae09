// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/render.rs - 违规区域可视化
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

use std::{
  collections::HashSet,
  path::{Path, PathBuf},
};

use ab_glyph::{FontArc, PxScale};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::compliance::{Violation, ViolationKind};

const FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");
const FONT_SIZE: f32 = 16.0;
const STROKE_WIDTH: i32 = 3;
// 标签相对框顶部的偏移，允许越出画布
const LABEL_OFFSET_Y: i32 = 15;
const PACKAGING_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TAPE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
// 像素坐标的上限，避免离谱的区域值溢出
const MAX_COORD: f64 = 1_000_000.0;

const ANNOTATED_PREFIX: &str = "annotated_";

#[derive(Error, Debug)]
pub enum RenderError {
  #[error("无法加载字体: {0}")]
  FontError(#[from] ab_glyph::InvalidFont),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像保存失败: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 违规区域标注器
#[derive(Clone)]
pub struct ViolationRenderer {
  font: FontArc,
  font_scale: PxScale,
}

impl ViolationRenderer {
  pub fn new() -> Result<Self, RenderError> {
    let font = FontArc::try_from_slice(FONT_DATA)?;
    Ok(Self {
      font,
      font_scale: PxScale::from(FONT_SIZE),
    })
  }

  fn color_of(kind: ViolationKind) -> Rgb<u8> {
    match kind {
      ViolationKind::Packaging => PACKAGING_COLOR,
      ViolationKind::Tape => TAPE_COLOR,
    }
  }

  /// 在副本上绘制违规框和标签，输入图像不变
  ///
  /// 区域缺失或形状不对的条目直接跳过。
  pub fn render(&self, image: &RgbImage, violations: &[Violation]) -> RgbImage {
    let mut canvas = image.clone();
    let (w, h) = (canvas.width() as f64, canvas.height() as f64);

    for violation in violations {
      let Some(region) = violation.region.filter(|r| r.is_well_formed()) else {
        debug!("跳过没有有效区域的违规: {}", violation.description);
        continue;
      };

      let to_px =
        |v: f32, size: f64| (v as f64 * size).trunc().clamp(-MAX_COORD, MAX_COORD) as i32;
      let x1 = to_px(region.x1, w);
      let y1 = to_px(region.y1, h);
      let x2 = to_px(region.x2, w);
      let y2 = to_px(region.y2, h);

      let color = Self::color_of(violation.kind);

      // 由外向内描边，端点包含在内
      for inset in 0..STROKE_WIDTH {
        let width = x2 - x1 + 1 - 2 * inset;
        let height = y2 - y1 + 1 - 2 * inset;
        if width <= 0 || height <= 0 {
          break;
        }
        let rect = Rect::at(x1 + inset, y1 + inset).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(&mut canvas, rect, color);
      }

      let label = format!("{}: {}", violation.kind.label(), violation.brand);
      draw_text_mut(
        &mut canvas,
        color,
        x1,
        y1 - LABEL_OFFSET_Y,
        self.font_scale,
        &self.font,
        &label,
      );
    }

    canvas
  }
}

/// 标注图像的文件名：`annotated_<原文件名>`，扩展名不可写时追加 `.png`
pub fn annotated_file_name(filename: &str) -> String {
  let base = Path::new(filename)
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| "image".to_string());

  let writable = ImageFormat::from_path(&base)
    .map(|f| f.writing_enabled())
    .unwrap_or(false);

  if writable {
    format!("{}{}", ANNOTATED_PREFIX, base)
  } else {
    format!("{}{}.png", ANNOTATED_PREFIX, base)
  }
}

/// 为一批输入生成互不相同的标注文件名
///
/// 按输入顺序分配，重名的后来者在扩展名前追加 `-1`、`-2` ...
pub fn unique_annotated_names<'a>(filenames: impl IntoIterator<Item = &'a str>) -> Vec<String> {
  let mut taken = HashSet::new();
  filenames
    .into_iter()
    .map(|filename| {
      let name = annotated_file_name(filename);
      if taken.insert(name.clone()) {
        return name;
      }

      let path = Path::new(&name);
      let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
      let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
      let mut suffix = 1usize;
      loop {
        let candidate = format!("{}-{}.{}", stem, suffix, ext);
        if taken.insert(candidate.clone()) {
          return candidate;
        }
        suffix += 1;
      }
    })
    .collect()
}

/// 把标注图像写入目录，返回写入的路径
pub fn save_annotated(
  dir: &Path,
  filename: &str,
  image: &RgbImage,
) -> Result<PathBuf, RenderError> {
  save_annotated_as(dir, &annotated_file_name(filename), image)
}

/// 以给定的文件名写入标注图像
pub fn save_annotated_as(
  dir: &Path,
  name: &str,
  image: &RgbImage,
) -> Result<PathBuf, RenderError> {
  std::fs::create_dir_all(dir)?;
  let path = dir.join(name);
  image.save(&path)?;
  info!("保存标注图像到文件: {}", path.display());
  Ok(path)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::preprocess::NormalizedRect;

  const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

  fn violation(kind: ViolationKind, region: Option<NormalizedRect>) -> Violation {
    Violation {
      kind,
      description: "logo".to_string(),
      brand: "Acme".to_string(),
      region,
    }
  }

  #[test]
  fn draws_three_pixel_outline_in_kind_color() {
    let renderer = ViolationRenderer::new().unwrap();
    let image = RgbImage::from_pixel(100, 100, WHITE);
    let violations = [
      violation(ViolationKind::Packaging, Some(NormalizedRect::new(0.1, 0.25, 0.5, 0.75))),
      violation(ViolationKind::Tape, Some(NormalizedRect::new(0.625, 0.25, 0.875, 0.75))),
    ];
    let out = renderer.render(&image, &violations);

    // 左边框 x = 10..=12
    for x in 10..=12 {
      assert_eq!(*out.get_pixel(x, 50), PACKAGING_COLOR);
    }
    assert_eq!(*out.get_pixel(13, 50), WHITE);
    assert_eq!(*out.get_pixel(30, 50), WHITE);
    // 右边框 x = 50
    assert_eq!(*out.get_pixel(50, 50), PACKAGING_COLOR);
    assert_eq!(*out.get_pixel(51, 50), WHITE);
    // 底边 y = 75
    assert_eq!(*out.get_pixel(30, 75), PACKAGING_COLOR);

    assert_eq!(*out.get_pixel(62, 50), TAPE_COLOR);
    assert_eq!(*out.get_pixel(87, 50), TAPE_COLOR);
  }

  #[test]
  fn input_is_not_mutated() {
    let renderer = ViolationRenderer::new().unwrap();
    let image = RgbImage::from_pixel(40, 40, WHITE);
    let before = image.clone();
    let out = renderer.render(
      &image,
      &[violation(ViolationKind::Packaging, Some(NormalizedRect::new(0.0, 0.0, 0.5, 0.5)))],
    );
    assert_eq!(image, before);
    assert_ne!(out, before);
  }

  #[test]
  fn malformed_regions_are_skipped() {
    let renderer = ViolationRenderer::new().unwrap();
    let image = RgbImage::from_pixel(40, 40, WHITE);
    let violations = [
      violation(ViolationKind::Tape, None),
      violation(ViolationKind::Tape, Some(NormalizedRect::new(0.6, 0.2, 0.4, 0.8))),
      violation(ViolationKind::Packaging, Some(NormalizedRect::new(f32::NAN, 0.0, 0.5, 0.5))),
    ];
    assert_eq!(renderer.render(&image, &violations), image);
  }

  #[test]
  fn boxes_at_the_edge_do_not_panic() {
    let renderer = ViolationRenderer::new().unwrap();
    let image = RgbImage::from_pixel(20, 20, WHITE);
    let violations = [
      violation(ViolationKind::Packaging, Some(NormalizedRect::new(0.0, 0.0, 1.0, 1.0))),
      violation(ViolationKind::Tape, Some(NormalizedRect::new(0.9, 0.9, 5.0, 7.5))),
      violation(ViolationKind::Tape, Some(NormalizedRect::new(0.5, 0.5, 0.51, 0.51))),
    ];
    let out = renderer.render(&image, &violations);
    assert_eq!(*out.get_pixel(0, 10), PACKAGING_COLOR);
  }

  #[test]
  fn annotated_names_keep_writable_extensions() {
    assert_eq!(annotated_file_name("box.jpg"), "annotated_box.jpg");
    assert_eq!(annotated_file_name("dir/box.png"), "annotated_box.png");
    assert_eq!(annotated_file_name("scan.heic"), "annotated_scan.heic.png");
    assert_eq!(annotated_file_name("noext"), "annotated_noext.png");
  }

  #[test]
  fn duplicate_names_get_suffixes_in_input_order() {
    let names = unique_annotated_names([
      "a/box.png",
      "b/box.png",
      "c/box.png",
      "box-1.png",
      "scan.heic",
      "scan.heic",
    ]);
    assert_eq!(
      names,
      [
        "annotated_box.png",
        "annotated_box-1.png",
        "annotated_box-2.png",
        "annotated_box-1-1.png",
        "annotated_scan.heic.png",
        "annotated_scan.heic-1.png",
      ]
    );
  }

  #[test]
  fn saves_into_directory() {
    let dir = tempfile::tempdir().unwrap();
    let image = RgbImage::from_pixel(8, 8, WHITE);
    let path = save_annotated(&dir.path().join("run"), "a.png", &image).unwrap();
    assert!(path.ends_with("annotated_a.png"));
    let reloaded = image::open(&path).unwrap().to_rgb8();
    assert_eq!(reloaded, image);
  }
}
