// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/task/sink.rs - 批处理结果文件
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
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
  sync::Mutex,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::compliance::ComplianceResult;

pub const SINK_FILE_NAME: &str = "compliance_results.csv";

#[derive(Error, Debug)]
pub enum SinkError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("CSV 错误: {0}")]
  CsvError(#[from] csv::Error),
  #[error("结果文件锁已失效")]
  Poisoned,
}

/// 结果文件中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResultRow {
  pub filename: String,
  #[serde(rename = "compliance_score")]
  pub score: u8,
  #[serde(rename = "is_compliant")]
  pub compliant: bool,
  pub violation_count: usize,
  pub summary: String,
}

impl BatchResultRow {
  pub fn from_result(filename: impl Into<String>, result: &ComplianceResult) -> Self {
    Self {
      filename: filename.into(),
      score: result.score,
      compliant: result.compliant,
      violation_count: result.violations.len(),
      summary: result.summary.clone(),
    }
  }
}

/// 批处理汇总，只由结果文件中的行计算
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
  pub processed_count: usize,
  pub compliant_count: usize,
  /// 没有任何行时为 None，与真实的 0 分区分
  pub average_score: Option<f64>,
}

impl BatchSummary {
  pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a BatchResultRow>) -> Self {
    let (mut processed, mut compliant, mut total) = (0usize, 0usize, 0u64);
    for row in rows {
      processed += 1;
      total += row.score as u64;
      if row.compliant {
        compliant += 1;
      }
    }

    Self {
      processed_count: processed,
      compliant_count: compliant,
      average_score: (processed > 0).then(|| total as f64 / processed as f64),
    }
  }
}

impl std::fmt::Display for BatchSummary {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "已处理 {} 张，合规 {} 张，平均分 ",
      self.processed_count, self.compliant_count
    )?;
    match self.average_score {
      Some(avg) => write!(f, "{:.1}", avg),
      None => write!(f, "n/a"),
    }
  }
}

/// 追加写入的 CSV 结果文件
///
/// 每行独立地打开、追加、关闭，写入在互斥锁内完成，并发写入不会交错。
#[derive(Debug)]
pub struct ResultSink {
  path: PathBuf,
  lock: Mutex<()>,
}

impl ResultSink {
  /// 新建结果文件并写入表头，已存在的同名文件会被清空
  pub fn create(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
    let path = path.into();
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record([
      "filename",
      "compliance_score",
      "is_compliant",
      "violation_count",
      "summary",
    ])?;
    writer.flush()?;
    info!("结果文件: {}", path.display());

    Ok(Self {
      path,
      lock: Mutex::new(()),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn append(&self, row: &BatchResultRow) -> Result<(), SinkError> {
    // 先在内存中编码整行，再一次性写入
    let mut encoder = csv::WriterBuilder::new()
      .has_headers(false)
      .from_writer(Vec::new());
    encoder.serialize(row)?;
    let line = encoder
      .into_inner()
      .map_err(|e| SinkError::IoError(e.into_error()))?;

    let _guard = self.lock.lock().map_err(|_| SinkError::Poisoned)?;
    let mut file = OpenOptions::new().append(true).open(&self.path)?;
    file.write_all(&line)?;
    file.flush()?;
    debug!("写入结果: {}", row.filename);
    Ok(())
  }

  pub fn read_rows(&self) -> Result<Vec<BatchResultRow>, SinkError> {
    let _guard = self.lock.lock().map_err(|_| SinkError::Poisoned)?;
    read_rows(&self.path)
  }

  /// 读回全部行后汇总
  pub fn summarize(&self) -> Result<BatchSummary, SinkError> {
    Ok(BatchSummary::from_rows(&self.read_rows()?))
  }
}

/// 读取结果文件中的全部行
pub fn read_rows(path: &Path) -> Result<Vec<BatchResultRow>, SinkError> {
  let mut reader = csv::Reader::from_path(path)?;
  let rows = reader
    .deserialize::<BatchResultRow>()
    .collect::<Result<Vec<_>, _>>()?;
  Ok(rows)
}
