// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/task/single.rs - 单张图像检查
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
  path::{Path, PathBuf},
  sync::Arc,
  time::Instant,
};

use image::RgbImage;
use tracing::{error, info, warn};

use crate::{
  analysis::{AnalysisImage, Analyzer},
  compliance::ComplianceResult,
  input::InputImage,
  preprocess::{PreprocessResult, preprocess},
  render::{ViolationRenderer, save_annotated},
  task::{Task, TaskError},
};

pub struct SingleImageTask {
  image: InputImage,
  analyzer: Arc<dyn Analyzer>,
  renderer: ViolationRenderer,
}

/// 单张图像的检查结果
///
/// 出错时 `result` 为降级结果，`error` 为错误描述。
/// 标注图像保存失败不影响分析结果，只记录在 `save_error`。
pub struct SingleImageReport {
  pub filename: String,
  pub result: ComplianceResult,
  pub error: Option<String>,
  pub preprocessed: Option<PreprocessResult>,
  pub annotated: Option<RgbImage>,
  pub annotated_path: Option<PathBuf>,
  pub save_error: Option<String>,
}

impl SingleImageReport {
  pub fn is_degraded(&self) -> bool {
    self.error.is_some()
  }

  /// 最适合展示的图像：标注图，其次预处理图，最后原图；无法解码时为 None
  pub fn display_image(&self) -> Option<&RgbImage> {
    if let Some(annotated) = &self.annotated {
      return Some(annotated);
    }
    self.preprocessed.as_ref().map(|p| {
      if p.processed.width() > 0 && p.processed.height() > 0 {
        p.processed.as_ref()
      } else {
        p.original.as_ref()
      }
    })
  }
}

impl SingleImageTask {
  pub fn new(image: InputImage, analyzer: Arc<dyn Analyzer>) -> Result<Self, TaskError> {
    Ok(Self {
      image,
      analyzer,
      renderer: ViolationRenderer::new()?,
    })
  }
}

impl Task<Option<&Path>> for SingleImageTask {
  type Output = SingleImageReport;
  type Error = TaskError;

  /// `output` 给出时把标注图像写入该目录
  fn run_task(self, output: Option<&Path>) -> Result<Self::Output, Self::Error> {
    let filename = self.image.filename.clone();
    info!("开始检查 {}，后端 {}", filename, self.analyzer.name());
    let now = Instant::now();

    let preprocessed = match preprocess(&self.image.data) {
      Ok(p) => p,
      Err(e) => {
        warn!("{} 预处理失败: {}", filename, e);
        return Ok(SingleImageReport {
          filename,
          result: ComplianceResult::degraded(&e),
          error: Some(e.to_string()),
          preprocessed: None,
          annotated: None,
          annotated_path: None,
          save_error: None,
        });
      }
    };
    info!("预处理完成，耗时: {:.2?}", now.elapsed());

    let image = AnalysisImage::new(&filename, &self.image.data, &preprocessed);
    let outcome = self.analyzer.analyze(&image);
    info!("分析完成，耗时: {:.2?}", now.elapsed());

    let (result, error) = match outcome {
      Ok(result) => (result, None),
      Err(e) => {
        warn!("{} 分析失败: {}", filename, e);
        (ComplianceResult::degraded(&e), Some(e.to_string()))
      }
    };

    let annotated = result.needs_annotation().then(|| {
      self
        .renderer
        .render(image.image_for(self.analyzer.source()), &result.violations)
    });

    let (annotated_path, save_error) = match (&annotated, output) {
      (Some(annotated), Some(dir)) => match save_annotated(dir, &filename, annotated) {
        Ok(path) => (Some(path), None),
        Err(e) => {
          error!("{} 的标注图像保存失败: {}", filename, e);
          (None, Some(e.to_string()))
        }
      },
      _ => (None, None),
    };

    Ok(SingleImageReport {
      filename,
      result,
      error,
      preprocessed: Some(preprocessed),
      annotated,
      annotated_path,
      save_error,
    })
  }
}
