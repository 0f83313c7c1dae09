// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/input.rs - 待检图像的读取
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// 目录展开时收录的扩展名
const SUPPORTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("读取 {path} 失败: {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("没有可处理的图像")]
  NoImages,
}

/// 一张待检图像：文件名与未解码的原始字节
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputImage {
  pub filename: String,
  pub data: Vec<u8>,
}

impl InputImage {
  pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
    Self {
      filename: filename.into(),
      data,
    }
  }

  pub fn from_path(path: &Path) -> Result<Self, InputError> {
    let data = std::fs::read(path).map_err(|source| InputError::IoError {
      path: path.to_path_buf(),
      source,
    })?;
    let filename = path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| path.display().to_string());
    debug!("读取图像 {} ({} 字节)", filename, data.len());
    Ok(Self::new(filename, data))
  }
}

impl FromUrlWithScheme for InputImage {
  const SCHEME: &'static str = "image";
}

/// `image:///path/to/box.jpg`
impl FromUrl for InputImage {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.scheme().to_string()));
    }
    Self::from_path(Path::new(url.path()))
  }
}

fn is_supported(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| {
      SUPPORTED_EXTENSIONS
        .iter()
        .any(|s| s.eq_ignore_ascii_case(e))
    })
    .unwrap_or(false)
}

/// 展开命令行给出的路径
///
/// 文件原样收录；目录只收录其第一层中扩展名受支持的文件，按文件名排序。
pub fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<InputImage>, InputError> {
  let mut images = Vec::new();

  for path in paths {
    if path.is_dir() {
      let io_err = |source| InputError::IoError {
        path: path.clone(),
        source,
      };
      let mut entries = std::fs::read_dir(path)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
      entries.retain(|p| p.is_file() && is_supported(p));
      entries.sort();
      debug!("目录 {} 中找到 {} 张图像", path.display(), entries.len());

      for entry in entries {
        images.push(InputImage::from_path(&entry)?);
      }
    } else {
      images.push(InputImage::from_path(path)?);
    }
  }

  if images.is_empty() {
    return Err(InputError::NoImages);
  }
  Ok(images)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn directories_expand_to_sorted_images() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.PNG", "a.jpg", "notes.txt", "c.jpeg"] {
      std::fs::write(dir.path().join(name), name.as_bytes()).unwrap();
    }
    std::fs::create_dir(dir.path().join("nested.png")).unwrap();

    let images = expand_inputs(&[dir.path().to_path_buf()]).unwrap();
    let names: Vec<_> = images.iter().map(|i| i.filename.as_str()).collect();
    assert_eq!(names, ["a.jpg", "b.PNG", "c.jpeg"]);
    assert_eq!(images[0].data, b"a.jpg");
  }

  #[test]
  fn explicit_files_are_kept_as_given() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.bin");
    std::fs::write(&path, [1u8, 2, 3]).unwrap();
    let images = expand_inputs(&[path]).unwrap();
    assert_eq!(images, [InputImage::new("scan.bin", vec![1, 2, 3])]);
  }

  #[test]
  fn missing_file_and_empty_dir_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      expand_inputs(&[dir.path().join("nope.jpg")]),
      Err(InputError::IoError { .. })
    ));
    assert!(matches!(
      expand_inputs(&[dir.path().to_path_buf()]),
      Err(InputError::NoImages)
    ));
  }

  #[test]
  fn from_url_checks_scheme() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("x.png");
    std::fs::write(&path, b"png").unwrap();

    let url = Url::from_file_path(&path).unwrap();
    assert!(matches!(
      InputImage::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let image = InputImage::from_url(&url).unwrap();
    assert_eq!(image.filename, "x.png");
  }
}
