// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/model/recorded.rs - 回放已保存的模型输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::LetterboxedFrame,
  model::{Model, RawTensor},
};

#[derive(Error, Debug)]
pub enum RecordedModelError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("张量文件 {0} 解析错误: {1}")]
  ParseError(PathBuf, serde_json::Error),
  #[error("没有更多已保存的输出")]
  Exhausted,
}

/// 按文件名顺序回放 JSON 格式的输出张量，每次推理取一个
///
/// 用于在没有推理运行时的环境下复现检测结果。
pub struct RecordedModel {
  files: Vec<PathBuf>,
  cursor: Mutex<usize>,
}

impl FromUrlWithScheme for RecordedModel {
  const SCHEME: &'static str = "recorded";
}

impl FromUrl for RecordedModel {
  type Error = RecordedModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecordedModelError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Self::open(url.path())
  }
}

impl RecordedModel {
  /// 路径可以是单个 JSON 文件或包含 JSON 文件的目录
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RecordedModelError> {
    let path = path.as_ref();
    let files = if path.is_dir() {
      let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
      files.sort();
      files
    } else {
      vec![path.to_path_buf()]
    };

    info!("已保存的模型输出: {} 个", files.len());
    Ok(Self {
      files,
      cursor: Mutex::new(0),
    })
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  fn next_path(&self) -> Option<&PathBuf> {
    let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
    let path = self.files.get(*cursor)?;
    *cursor += 1;
    Some(path)
  }
}

pub fn load_tensor(path: &Path) -> Result<RawTensor, RecordedModelError> {
  let text = std::fs::read_to_string(path)?;
  serde_json::from_str(&text).map_err(|e| RecordedModelError::ParseError(path.to_path_buf(), e))
}

impl Model for RecordedModel {
  type Input = LetterboxedFrame;
  type Output = RawTensor;
  type Error = RecordedModelError;

  fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let path = self.next_path().ok_or(RecordedModelError::Exhausted)?;
    debug!("读取输出张量: {}", path.display());
    load_tensor(path)
  }
}
