// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/input/transcript.rs - 已记录的 OCR 读数
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::io::BufRead;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::FieldLabel};

#[derive(Error, Debug)]
pub enum TranscriptInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("第 {line} 行解析错误: {source}")]
  ParseError {
    line: usize,
    source: serde_json::Error,
  },
}

/// 一次 OCR 读数，`label` 使用检测器的字段名
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
  pub label: String,
  pub text: String,
}

impl Observation {
  pub fn field(&self) -> FieldLabel {
    self.label.parse().unwrap_or(FieldLabel::Unknown)
  }
}

/// JSON Lines 格式的读数记录，每行一个 [`Observation`]
#[derive(Debug, Clone)]
pub struct TranscriptInput {
  observations: Vec<Observation>,
}

impl FromUrlWithScheme for TranscriptInput {
  const SCHEME: &'static str = "transcript";
}

impl FromUrl for TranscriptInput {
  type Error = TranscriptInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TranscriptInputError::SchemeMismatch);
    }

    let file = std::fs::File::open(url.path())?;
    let input = Self::from_reader(std::io::BufReader::new(file))?;
    info!("读取 {} 条 OCR 读数: {}", input.len(), url.path());
    Ok(input)
  }
}

impl TranscriptInput {
  pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, TranscriptInputError> {
    let mut observations = Vec::new();
    for (index, line) in reader.lines().enumerate() {
      let line = line?;
      if line.trim().is_empty() {
        continue;
      }
      let observation = serde_json::from_str(&line).map_err(|source| {
        TranscriptInputError::ParseError {
          line: index + 1,
          source,
        }
      })?;
      observations.push(observation);
    }
    Ok(Self { observations })
  }

  pub fn len(&self) -> usize {
    self.observations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.observations.is_empty()
  }
}

impl IntoIterator for TranscriptInput {
  type Item = Observation;
  type IntoIter = std::vec::IntoIter<Observation>;

  fn into_iter(self) -> Self::IntoIter {
    self.observations.into_iter()
  }
}
