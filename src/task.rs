// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/task.rs - 检查任务
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

use std::path::PathBuf;

use thiserror::Error;

use crate::{analysis::AnalysisError, render::RenderError};

pub mod batch;
pub mod progress;
pub mod single;
pub mod sink;

pub use self::batch::{BatchJob, BatchReport, BatchState, MAX_WORKERS, MIN_WORKERS};
pub use self::progress::{CancelToken, ItemStatus, ProgressEvent};
pub use self::single::{SingleImageReport, SingleImageTask};
pub use self::sink::{BatchResultRow, BatchSummary, ResultSink, SinkError};

/// 一次检查任务，`O` 为结果的输出位置
pub trait Task<O>: Sized {
  type Output;
  type Error;
  fn run_task(self, output: O) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("配置错误: 并发数 {0} 超出范围 [{min}, {max}]", min = MIN_WORKERS, max = MAX_WORKERS)]
  InvalidWorkerCount(usize),
  #[error("配置错误: 没有待处理的图像")]
  EmptyBatch,
  #[error("配置错误: {0}")]
  Backend(#[from] AnalysisError),
  #[error("无法创建输出目录 {path}: {source}")]
  OutputDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("线程池创建失败: {0}")]
  Pool(#[from] rayon::ThreadPoolBuildError),
  #[error("结果文件错误: {0}")]
  Sink(#[from] SinkError),
  #[error("标注失败: {0}")]
  Render(#[from] RenderError),
}

impl TaskError {
  /// 启动前即可发现的配置问题
  pub fn is_configuration_error(&self) -> bool {
    matches!(
      self,
      TaskError::InvalidWorkerCount(_) | TaskError::EmptyBatch | TaskError::Backend(_)
    )
  }
}
