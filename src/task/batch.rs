// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/task/batch.rs - 并发批处理
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
  any::Any,
  io::ErrorKind,
  panic::{AssertUnwindSafe, catch_unwind},
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
    mpsc::Sender,
  },
  time::Instant,
};

use chrono::Local;
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::{
  analysis::{AnalysisImage, Analyzer},
  compliance::ComplianceResult,
  input::InputImage,
  preprocess::preprocess,
  render::{ViolationRenderer, save_annotated_as, unique_annotated_names},
  task::{
    Task, TaskError,
    progress::{CancelToken, ItemStatus, ProgressEvent},
    sink::{BatchResultRow, BatchSummary, ResultSink, SINK_FILE_NAME},
  },
};

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 10;
pub const DEFAULT_WORKERS: usize = 3;

const RUN_DIR_PREFIX: &str = "results_";

/// 批处理的生命周期，没有失败终态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
  Created,
  Running,
  Completed,
}

/// 一次批处理
pub struct BatchJob {
  id: String,
  items: Vec<InputImage>,
  // 与 items 一一对应，重名输入也不会互相覆盖
  annotated_names: Vec<String>,
  worker_count: usize,
  analyzer: Arc<dyn Analyzer>,
  renderer: ViolationRenderer,
  progress: Option<Sender<ProgressEvent>>,
  cancel: CancelToken,
  state: BatchState,
}

/// 批处理完成后的报告，结果文件和标注图像留在磁盘上
#[derive(Debug, Clone)]
pub struct BatchReport {
  pub id: String,
  pub state: BatchState,
  pub summary: BatchSummary,
  pub run_dir: PathBuf,
  pub sink_path: PathBuf,
}

impl BatchJob {
  /// 校验配置，不产生任何副作用
  pub fn new(
    items: Vec<InputImage>,
    worker_count: usize,
    analyzer: Arc<dyn Analyzer>,
  ) -> Result<Self, TaskError> {
    if !(MIN_WORKERS..=MAX_WORKERS).contains(&worker_count) {
      return Err(TaskError::InvalidWorkerCount(worker_count));
    }
    if items.is_empty() {
      return Err(TaskError::EmptyBatch);
    }

    let annotated_names = unique_annotated_names(items.iter().map(|i| i.filename.as_str()));

    Ok(Self {
      id: Local::now().format("%Y%m%d-%H%M%S").to_string(),
      items,
      annotated_names,
      worker_count,
      analyzer,
      renderer: ViolationRenderer::new()?,
      progress: None,
      cancel: CancelToken::new(),
      state: BatchState::Created,
    })
  }

  pub fn with_progress(mut self, progress: Sender<ProgressEvent>) -> Self {
    self.progress = Some(progress);
    self
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn state(&self) -> BatchState {
    self.state
  }

  pub fn worker_count(&self) -> usize {
    self.worker_count
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  fn emit(&self, event: ProgressEvent) {
    if let Some(tx) = &self.progress {
      // 接收端已关闭时静默丢弃
      let _ = tx.send(event);
    }
  }

  fn enter(&mut self, state: BatchState) {
    info!("批处理 {}: {:?} -> {:?}", self.id, self.state, state);
    self.state = state;
  }

  // 预处理、分析、按需标注；任何错误都交给调用方降级
  fn process_item(
    &self,
    index: usize,
    item: &InputImage,
    run_dir: &Path,
  ) -> anyhow::Result<ComplianceResult> {
    let preprocessed = preprocess(&item.data)?;
    let image = AnalysisImage::new(&item.filename, &item.data, &preprocessed);
    let result = self.analyzer.analyze(&image)?;

    if result.needs_annotation() {
      let canvas = image.image_for(self.analyzer.source());
      let annotated = self.renderer.render(canvas, &result.violations);
      save_annotated_as(run_dir, &self.annotated_names[index], &annotated)?;
    }

    Ok(result)
  }

  fn run_item(
    &self,
    index: usize,
    item: &InputImage,
    run_dir: &Path,
    sink: &ResultSink,
    finished: &AtomicUsize,
  ) {
    if self.cancel.is_cancelled() {
      info!("[{}] 已取消，跳过 {}", index, item.filename);
      self.emit(ProgressEvent::ItemSkipped {
        filename: item.filename.clone(),
      });
      return;
    }

    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| self.process_item(index, item, run_dir)));
    let (result, degraded) = match outcome {
      Ok(Ok(result)) => (result, false),
      Ok(Err(e)) => {
        warn!("[{}] {} 处理失败: {:#}", index, item.filename, e);
        (ComplianceResult::degraded(format!("{:#}", e)), true)
      }
      Err(panic) => {
        let reason = panic_message(panic.as_ref());
        error!("[{}] {} 处理时崩溃: {}", index, item.filename, reason);
        (ComplianceResult::degraded(reason), true)
      }
    };

    let row = BatchResultRow::from_result(item.filename.clone(), &result);
    // 写入失败的条目不计入汇总，但进度照常推进
    let status = match sink.append(&row) {
      Ok(()) => ItemStatus::of(&result, degraded),
      Err(e) => {
        error!("[{}] {} 的结果写入失败: {}", index, item.filename, e);
        ItemStatus::Degraded
      }
    };

    let position = finished.fetch_add(1, Ordering::SeqCst) + 1;
    info!(
      "[{}/{}] {} -> {} 分 ({:.2?})",
      position,
      self.items.len(),
      item.filename,
      result.score,
      started.elapsed()
    );
    self.emit(ProgressEvent::ItemFinished {
      position,
      total: self.items.len(),
      filename: item.filename.clone(),
      status,
    });
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "未知错误".to_string()
  }
}

/// 在输出根目录下新建 `results_<时间戳>`，重名时追加 `-1`、`-2` ...
pub fn create_run_dir(output_root: &Path, id: &str) -> Result<PathBuf, TaskError> {
  let dir_err = |path: &Path, source| TaskError::OutputDir {
    path: path.to_path_buf(),
    source,
  };
  std::fs::create_dir_all(output_root).map_err(|e| dir_err(output_root, e))?;

  let base = format!("{}{}", RUN_DIR_PREFIX, id);
  let mut suffix = 0usize;
  loop {
    let name = if suffix == 0 {
      base.clone()
    } else {
      format!("{}-{}", base, suffix)
    };
    let candidate = output_root.join(name);
    match std::fs::create_dir(&candidate) {
      Ok(()) => return Ok(candidate),
      Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
      Err(e) => return Err(dir_err(&candidate, e)),
    }
  }
}

impl Task<&Path> for BatchJob {
  type Output = BatchReport;
  type Error = TaskError;

  fn run_task(mut self, output_root: &Path) -> Result<Self::Output, Self::Error> {
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(self.worker_count)
      .thread_name(|i| format!("xiangjian-worker-{}", i))
      .build()?;

    let run_dir = create_run_dir(output_root, &self.id)?;
    let sink = ResultSink::create(run_dir.join(SINK_FILE_NAME))?;

    self.enter(BatchState::Running);
    info!(
      "共 {} 张图像，{} 个并发，后端 {}",
      self.items.len(),
      self.worker_count,
      self.analyzer.name()
    );
    self.emit(ProgressEvent::Started {
      total: self.items.len(),
      run_dir: run_dir.clone(),
    });

    let finished = AtomicUsize::new(0);
    {
      let job = &self;
      pool.install(|| {
        job
          .items
          .par_iter()
          .enumerate()
          .for_each(|(index, item)| job.run_item(index, item, &run_dir, &sink, &finished));
      });
    }

    let summary = sink.summarize()?;
    self.enter(BatchState::Completed);
    info!("批处理完成: {}", summary);
    self.emit(ProgressEvent::Completed {
      summary: summary.clone(),
    });

    Ok(BatchReport {
      id: self.id.clone(),
      state: self.state,
      summary,
      sink_path: sink.path().to_path_buf(),
      run_dir,
    })
  }
}
