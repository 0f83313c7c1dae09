// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/bin/check_batch.rs - 批量图像检查
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

use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use anyhow::Result;
use clap::{Parser, builder::TypedValueParser};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use xiangjian::{
  FromUrl,
  analysis::{AnalyzerConfig, AnalyzerWrapper},
  input::expand_inputs,
  task::{
    BatchJob, CancelToken, ItemStatus, ProgressEvent, Task,
    batch::{DEFAULT_WORKERS, MAX_WORKERS, MIN_WORKERS},
  },
};

/// 并发检查一批快递包裹照片，结果写入 CSV
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 分析后端，如 gemini://gemini-1.5-pro、gpt4o://gpt-4o、claude://claude-3-5-sonnet-latest
  #[arg(long, value_name = "BACKEND", default_value = "gemini://gemini-1.5-pro")]
  pub backend: Url,
  /// API 密钥，缺省时读取后端对应的环境变量
  #[arg(long, value_name = "KEY")]
  pub api_key: Option<String>,
  /// 覆盖后端 URL 中的模型名
  #[arg(long, value_name = "MODEL")]
  pub model: Option<String>,
  /// 并发数
  #[arg(
    long,
    value_name = "N",
    default_value_t = DEFAULT_WORKERS,
    value_parser = clap::value_parser!(u16).range(MIN_WORKERS as i64..=MAX_WORKERS as i64).map(usize::from)
  )]
  pub workers: usize,
  /// 结果根目录，每次运行在其下新建 results_<时间戳>
  #[arg(long, value_name = "DIR", default_value = ".")]
  pub output: PathBuf,
  /// 图像文件或目录
  #[arg(value_name = "INPUT", required = true)]
  pub inputs: Vec<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  info!("分析后端: {}", args.backend);
  info!("并发数: {}", args.workers);
  info!("结果根目录: {}", args.output.display());

  let mut config = AnalyzerConfig::from_url(&args.backend)?.resolve_api_key(args.api_key);
  if let Some(model) = args.model {
    config = config.with_model(model);
  }
  info!("模型: {}", config.model);
  let analyzer = Arc::new(AnalyzerWrapper::from_config(config)?);
  let items = expand_inputs(&args.inputs)?;
  info!("共找到 {} 张图像", items.len());

  let cancel = CancelToken::new();
  {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
      warn!("收到中断信号，不再派发新的图像...");
      cancel.cancel();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
  }

  let (tx, rx) = std::sync::mpsc::channel();
  let printer = thread::spawn(move || {
    for event in rx {
      match event {
        ProgressEvent::Started { total, run_dir } => {
          println!("开始处理 {} 张图像，结果目录 {}", total, run_dir.display());
        }
        ProgressEvent::ItemFinished {
          position,
          total,
          filename,
          status,
        } => {
          let mark = match status {
            ItemStatus::Compliant => "合规",
            ItemStatus::NonCompliant => "不合规",
            ItemStatus::Degraded => "出错",
          };
          println!("[{}/{}] {} {}", position, total, filename, mark);
        }
        ProgressEvent::ItemSkipped { filename } => println!("跳过 {}", filename),
        ProgressEvent::Completed { .. } => {}
      }
    }
  });

  let job = BatchJob::new(items, args.workers, analyzer)?
    .with_progress(tx)
    .with_cancel(cancel);
  let report = job.run_task(args.output.as_path())?;
  // 任务结束时发送端随 job 一同释放
  let _ = printer.join();

  let summary = &report.summary;
  println!();
  println!("已处理: {}", summary.processed_count);
  println!("合规: {}", summary.compliant_count);
  match summary.average_score {
    Some(avg) => println!("平均分: {:.1}", avg),
    None => println!("平均分: n/a"),
  }
  println!("结果目录: {}", report.run_dir.display());
  println!("结果文件: {}", report.sink_path.display());

  Ok(())
}
