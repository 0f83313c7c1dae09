// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/task/progress.rs - 批处理进度与取消
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
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use crate::{compliance::ComplianceResult, task::sink::BatchSummary};

/// 单项的处理结局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
  Compliant,
  NonCompliant,
  /// 处理失败，记录为降级行
  Degraded,
}

impl ItemStatus {
  pub fn of(result: &ComplianceResult, degraded: bool) -> Self {
    if degraded {
      ItemStatus::Degraded
    } else if result.compliant {
      ItemStatus::Compliant
    } else {
      ItemStatus::NonCompliant
    }
  }
}

/// 批处理过程中发出的事件
#[derive(Debug, Clone)]
pub enum ProgressEvent {
  /// 结果目录已建好，开始派发
  Started { total: usize, run_dir: PathBuf },
  /// 一项处理完毕并已写入结果文件；`position` 为完成顺序，从 1 开始
  ItemFinished {
    position: usize,
    total: usize,
    filename: String,
    status: ItemStatus,
  },
  /// 取消后未开始的项
  ItemSkipped { filename: String },
  Completed { summary: BatchSummary },
}

/// 协作式取消标记，可跨线程克隆
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  flag: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.flag.load(Ordering::SeqCst)
  }
}
