// 该文件是 Xiangjian （箱检） 项目的一部分。
// tests/single_image.rs - 单张图像检查集成测试
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

mod common;

use std::sync::Arc;

use image::{Rgb, RgbImage};
use xiangjian::{
  input::InputImage,
  preprocess::{EnhancePlan, QualityTier, assess_quality, enhance::apply_plan, enhance::sharpen},
  task::{SingleImageTask, Task},
};

use common::{ScriptedAnalyzer, encode_png, png_item};

#[test]
fn compliant_image_is_not_annotated() {
  let out = tempfile::tempdir().unwrap();
  let report = SingleImageTask::new(png_item("ok_box.png"), Arc::new(ScriptedAnalyzer::new()))
    .unwrap()
    .run_task(Some(out.path()))
    .unwrap();

  assert!(!report.is_degraded());
  assert_eq!(report.result.score, 100);
  assert!(report.result.compliant);
  assert!(report.result.violations.is_empty());
  assert!(report.annotated.is_none());
  assert!(report.annotated_path.is_none());
  assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
  assert!(report.display_image().is_some());
}

#[test]
fn backend_failure_still_yields_a_displayable_result() {
  let report = SingleImageTask::new(png_item("fail_box.png"), Arc::new(ScriptedAnalyzer::new()))
    .unwrap()
    .run_task(None)
    .unwrap();

  assert!(report.is_degraded());
  assert_eq!(report.result.score, 0);
  assert!(!report.result.compliant);
  assert!(report.result.violations.is_empty());
  assert!(report.result.summary.contains("Error"));
  assert!(report.error.as_deref().unwrap().contains("503"));
  assert!(report.preprocessed.is_some());
  assert!(report.display_image().is_some());
}

#[test]
fn undecodable_upload_has_no_image_to_show() {
  let analyzer = Arc::new(ScriptedAnalyzer::new());
  let image = InputImage::new("ok_broken.png", vec![0x89, b'P', b'N', b'G']);
  let report = SingleImageTask::new(image, analyzer.clone())
    .unwrap()
    .run_task(None)
    .unwrap();

  assert_eq!(analyzer.calls(), 0);
  assert!(report.is_degraded());
  assert!(report.result.summary.starts_with("Error processing image"));
  assert!(report.display_image().is_none());
}

#[test]
fn violations_are_drawn_and_saved() {
  let out = tempfile::tempdir().unwrap();
  let report = SingleImageTask::new(png_item("bad_box.png"), Arc::new(ScriptedAnalyzer::new()))
    .unwrap()
    .run_task(Some(out.path()))
    .unwrap();

  assert!(!report.result.compliant);
  let annotated = report.annotated.as_ref().unwrap();
  let processed = &report.preprocessed.as_ref().unwrap().processed;
  assert_eq!(annotated.dimensions(), processed.dimensions());
  assert_ne!(annotated, processed.as_ref());
  assert!(std::ptr::eq(report.display_image().unwrap(), annotated));

  let path = report.annotated_path.as_ref().unwrap();
  assert_eq!(path, &out.path().join("annotated_bad_box.png"));
  assert!(path.exists());
}

#[test]
fn unwritable_output_keeps_the_analysis_result() {
  let dir = tempfile::tempdir().unwrap();
  let not_a_dir = dir.path().join("taken");
  std::fs::write(&not_a_dir, b"occupied").unwrap();

  let report = SingleImageTask::new(png_item("bad_box.png"), Arc::new(ScriptedAnalyzer::new()))
    .unwrap()
    .run_task(Some(not_a_dir.as_path()))
    .unwrap();

  assert!(!report.is_degraded());
  assert_eq!(report.result.score, 30);
  assert_eq!(report.result.violations.len(), 1);
  assert!(report.annotated.is_some());
  assert!(report.annotated_path.is_none());
  assert!(report.save_error.is_some());
  assert!(report.display_image().is_some());
}

#[test]
fn compliant_result_with_violations_is_not_drawn() {
  let out = tempfile::tempdir().unwrap();
  let report = SingleImageTask::new(png_item("mixed_box.png"), Arc::new(ScriptedAnalyzer::new()))
    .unwrap()
    .run_task(Some(out.path()))
    .unwrap();

  assert!(report.result.compliant);
  assert_eq!(report.result.violations.len(), 1);
  assert!(report.annotated.is_none());
  assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn dim_flat_image_is_low_quality_and_fully_enhanced() {
  // 亮度 50、对比度 60，只有一条竖直边缘，拉普拉斯方差 2 * 60^2 / 160 = 45
  let image = RgbImage::from_fn(160, 60, |x, _| {
    let v = if x < 80 { 20 } else { 80 };
    Rgb([v, v, v])
  });
  let quality = assess_quality(&image);
  assert_eq!(quality.contrast, 60.0);
  assert_eq!(quality.brightness, 50.0);
  assert_eq!(quality.sharpness, 45.0);
  assert_eq!(quality.tier, QualityTier::Low);

  let plan = EnhancePlan::for_image(&image);
  assert!(plan.boost_contrast);
  assert!(plan.boost_brightness);

  let enhanced = apply_plan(&image, &plan);
  let report = xiangjian::preprocess::preprocess(&encode_png(&image)).unwrap();
  assert_eq!(*report.enhanced, enhanced);

  // 锐化总在最后执行
  let without_sharpen = apply_plan(
    &image,
    &EnhancePlan {
      boost_contrast: false,
      boost_brightness: false,
    },
  );
  assert_eq!(without_sharpen, sharpen(&image));
}
