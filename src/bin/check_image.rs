// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/bin/check_image.rs - 单张图像检查
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
};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use xiangjian::{
  FromUrl, FromUrlWithScheme,
  analysis::{AnalyzerConfig, AnalyzerWrapper},
  input::InputImage,
  task::{SingleImageTask, Task},
};

/// 检查一张快递包裹照片是否带有零售品牌
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
  /// 标注图像的输出目录
  #[arg(long, value_name = "DIR")]
  pub output: Option<PathBuf>,
  /// 以 JSON 输出分析结果
  #[arg(long)]
  pub json: bool,
  /// 待检图像，文件路径或 image:///path/to/box.jpg
  #[arg(value_name = "IMAGE")]
  pub input: String,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  info!("分析后端: {}", args.backend);
  info!("输入图像: {}", args.input);

  let mut config = AnalyzerConfig::from_url(&args.backend)?.resolve_api_key(args.api_key);
  if let Some(model) = args.model {
    config = config.with_model(model);
  }
  info!("模型: {}", config.model);
  let analyzer = Arc::new(AnalyzerWrapper::from_config(config)?);
  let image = match Url::parse(&args.input) {
    Ok(url) if url.scheme() == InputImage::SCHEME => InputImage::from_url(&url)?,
    _ => InputImage::from_path(Path::new(&args.input))?,
  };

  let report = SingleImageTask::new(image, analyzer)?.run_task(args.output.as_deref())?;

  if args.json {
    println!("{}", serde_json::to_string_pretty(&report.result)?);
  } else {
    let result = &report.result;
    println!("文件: {}", report.filename);
    println!("合规分数: {}", result.score);
    println!("是否合规: {}", if result.compliant { "是" } else { "否" });
    println!("违规数量: {}", result.violations.len());
    for (i, v) in result.violations.iter().enumerate() {
      println!("  {}. [{}] {} ({})", i + 1, v.kind.label(), v.description, v.brand);
    }
    println!("摘要: {}", result.summary);
  }

  if let Some(path) = &report.annotated_path {
    println!("标注图像: {}", path.display());
  }
  if let Some(error) = &report.save_error {
    eprintln!("标注图像未能保存: {}", error);
  }
  if let Some(error) = &report.error {
    anyhow::bail!("检查失败: {}", error);
  }

  Ok(())
}
