// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/stabilizer.rs - 凭据读数稳定器
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

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
  config::{ConfigError, StabilizerConfig},
  model::FieldLabel,
  text::TextNormalizer,
};

/// 确认凭据后如何处理已有读数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmPolicy {
  /// 保留窗口，只通过上一次确认的结果抑制重复
  #[default]
  KeepWindows,
  /// 确认后清空窗口，下一张票据重新累积
  ClearWindows,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
  pub username: String,
  pub password: String,
}

/// 最近读数的有界 FIFO 窗口
#[derive(Debug, Clone)]
pub struct RecentWindow {
  values: VecDeque<String>,
  capacity: usize,
}

impl RecentWindow {
  pub fn new(capacity: usize) -> Self {
    Self {
      values: VecDeque::with_capacity(capacity + 1),
      capacity,
    }
  }

  pub fn push(&mut self, value: String) {
    self.values.push_back(value);
    while self.values.len() > self.capacity {
      self.values.pop_front();
    }
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  pub fn clear(&mut self) {
    self.values.clear();
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.values.iter().map(String::as_str)
  }

  pub fn count(&self, value: &str) -> usize {
    self.iter().filter(|v| *v == value).count()
  }

  /// 出现次数最多且不少于 `min_count` 次的值；次数相同时取最先出现的
  pub fn stable_value(&self, min_count: usize) -> Option<&str> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for value in self.iter() {
      match counts.iter_mut().find(|(v, _)| *v == value) {
        Some((_, n)) => *n += 1,
        None => counts.push((value, 1)),
      }
    }

    let mut best: Option<(&str, usize)> = None;
    for (value, n) in counts {
      if best.is_none_or(|(_, m)| n > m) {
        best = Some((value, n));
      }
    }

    best.filter(|(_, n)| *n >= min_count).map(|(v, _)| v)
  }
}

/// 把逐帧的 OCR 读数稳定为一对确认的凭据
#[derive(Debug, Clone)]
pub struct CredentialStabilizer {
  normalizer: TextNormalizer,
  username: RecentWindow,
  password: RecentWindow,
  stability_count: usize,
  policy: ConfirmPolicy,
  last_confirmed: Option<Credentials>,
}

impl Default for CredentialStabilizer {
  fn default() -> Self {
    Self::build(&StabilizerConfig::default())
  }
}

impl CredentialStabilizer {
  pub fn new(config: &StabilizerConfig) -> Result<Self, ConfigError> {
    config.validate()?;
    Ok(Self::build(config))
  }

  fn build(config: &StabilizerConfig) -> Self {
    Self {
      normalizer: TextNormalizer::new(config.max_normalized_length),
      username: RecentWindow::new(config.window_capacity),
      password: RecentWindow::new(config.window_capacity),
      stability_count: config.stability_count,
      policy: config.confirm_policy,
      last_confirmed: None,
    }
  }

  /// 记录一次读数，凭据首次（或变化后）稳定时返回确认结果
  pub fn observe(&mut self, label: FieldLabel, raw_text: &str) -> Option<Credentials> {
    let Some(text) = self.normalizer.normalize(raw_text) else {
      debug!("忽略无效读数 {}: {:?}", label, raw_text);
      return None;
    };

    match label {
      FieldLabel::Username => self.username.push(text),
      FieldLabel::Password => self.password.push(text),
      FieldLabel::Unknown => {
        debug!("忽略未知字段的读数: {}", text);
        return None;
      }
    }

    self.check_stable()
  }

  fn check_stable(&mut self) -> Option<Credentials> {
    let username = self.username.stable_value(self.stability_count)?;
    let password = self.password.stable_value(self.stability_count)?;

    if let Some(last) = &self.last_confirmed
      && last.username == username
      && last.password == password
    {
      return None;
    }

    let credentials = Credentials {
      username: username.to_string(),
      password: password.to_string(),
    };
    info!(
      "凭据已确认: user={} pass={}",
      credentials.username, credentials.password
    );

    if self.policy == ConfirmPolicy::ClearWindows {
      self.username.clear();
      self.password.clear();
    }
    self.last_confirmed = Some(credentials.clone());
    Some(credentials)
  }

  /// 开始新的采集会话
  pub fn reset(&mut self) {
    self.username.clear();
    self.password.clear();
    self.last_confirmed = None;
  }

  pub fn window(&self, label: FieldLabel) -> Option<&RecentWindow> {
    match label {
      FieldLabel::Username => Some(&self.username),
      FieldLabel::Password => Some(&self.password),
      FieldLabel::Unknown => None,
    }
  }

  pub fn last_confirmed(&self) -> Option<&Credentials> {
    self.last_confirmed.as_ref()
  }
}

/// 多个 OCR 回调并发写入时使用，追加与配对检查在同一把锁内完成
#[derive(Debug, Clone, Default)]
pub struct SharedStabilizer {
  inner: Arc<Mutex<CredentialStabilizer>>,
}

impl SharedStabilizer {
  pub fn new(stabilizer: CredentialStabilizer) -> Self {
    Self {
      inner: Arc::new(Mutex::new(stabilizer)),
    }
  }

  pub fn observe(&self, label: FieldLabel, raw_text: &str) -> Option<Credentials> {
    self
      .inner
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .observe(label, raw_text)
  }

  pub fn reset(&self) {
    self
      .inner
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .reset();
  }

  pub fn last_confirmed(&self) -> Option<Credentials> {
    self
      .inner
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .last_confirmed()
      .cloned()
  }
}
