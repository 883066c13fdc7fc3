// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/config.rs - 检测与稳定器配置
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{CoordSpace, OutputLayout, Quantization},
  stabilizer::ConfirmPolicy,
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.7;
pub const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;
pub const DEFAULT_NUM_CLASSES: usize = 2;
pub const DEFAULT_NUM_ANCHORS: usize = 8400;
pub const DEFAULT_NMS_ROWS: usize = 300;
pub const DEFAULT_WINDOW_CAPACITY: usize = 10;
pub const DEFAULT_STABILITY_COUNT: usize = 4;
pub const DEFAULT_MAX_NORMALIZED_LENGTH: usize = 12;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("置信度阈值必须在 [0, 1] 内, 实际为 {0}")]
  ConfidenceOutOfRange(f32),
  #[error("IoU 阈值必须在 [0, 1] 内, 实际为 {0}")]
  IouOutOfRange(f32),
  #[error("模型输入尺寸不能为 0")]
  ZeroInputSize,
  #[error("{0} 不能为 0")]
  ZeroCount(&'static str),
  #[error("稳定次数 {count} 必须在 [1, {capacity}] 内")]
  StabilityCount { count: usize, capacity: usize },
  #[error("量化参数无效: scale = {0}")]
  InvalidQuantization(f32),
  #[error("量化零点 {0} 超出 int8 范围")]
  ZeroPointOutOfRange(i32),
  #[error("输出缓冲区长度溢出")]
  BufferLenOverflow,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 检测解码参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub model_input_size: u32,
  pub layout: OutputLayout,
  pub coord_space: CoordSpace,
  pub num_classes: usize,
  pub num_anchors: usize,
  pub nms_rows: usize,
  /// 仅对 int8 输出有效，加载模型时从输出张量读取一次
  pub quantization: Quantization,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      model_input_size: DEFAULT_MODEL_INPUT_SIZE,
      layout: OutputLayout::NmsFloat,
      coord_space: CoordSpace::Normalized,
      num_classes: DEFAULT_NUM_CLASSES,
      num_anchors: DEFAULT_NUM_ANCHORS,
      nms_rows: DEFAULT_NMS_ROWS,
      quantization: Quantization::default(),
    }
  }
}

impl DetectorConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(ConfigError::ConfidenceOutOfRange(self.confidence_threshold));
    }
    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return Err(ConfigError::IouOutOfRange(self.iou_threshold));
    }
    if self.model_input_size == 0 {
      return Err(ConfigError::ZeroInputSize);
    }
    if self.num_classes == 0 {
      return Err(ConfigError::ZeroCount("num_classes"));
    }
    if self.layout.is_raw() && self.num_anchors == 0 {
      return Err(ConfigError::ZeroCount("num_anchors"));
    }
    if !self.layout.is_raw() && self.nms_rows == 0 {
      return Err(ConfigError::ZeroCount("nms_rows"));
    }
    if self.layout.is_quantized() {
      let scale = self.quantization.scale;
      if !scale.is_finite() || scale <= 0.0 {
        return Err(ConfigError::InvalidQuantization(scale));
      }
      let zero_point = self.quantization.zero_point;
      if !(i8::MIN as i32..=i8::MAX as i32).contains(&zero_point) {
        return Err(ConfigError::ZeroPointOutOfRange(zero_point));
      }
    }
    self.expected_len()?;
    Ok(())
  }

  /// 输出缓冲区应有的元素数量
  pub fn expected_len(&self) -> Result<usize, ConfigError> {
    let len = if self.layout.is_raw() {
      self
        .num_classes
        .checked_add(4)
        .and_then(|channels| channels.checked_mul(self.num_anchors))
    } else {
      self.nms_rows.checked_mul(crate::model::NMS_ROW_LEN)
    };
    len.ok_or(ConfigError::BufferLenOverflow)
  }
}

/// 凭据稳定器参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
  pub window_capacity: usize,
  pub stability_count: usize,
  pub max_normalized_length: usize,
  pub confirm_policy: ConfirmPolicy,
}

impl Default for StabilizerConfig {
  fn default() -> Self {
    Self {
      window_capacity: DEFAULT_WINDOW_CAPACITY,
      stability_count: DEFAULT_STABILITY_COUNT,
      max_normalized_length: DEFAULT_MAX_NORMALIZED_LENGTH,
      confirm_policy: ConfirmPolicy::default(),
    }
  }
}

impl StabilizerConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.window_capacity == 0 {
      return Err(ConfigError::ZeroCount("window_capacity"));
    }
    if self.max_normalized_length == 0 {
      return Err(ConfigError::ZeroCount("max_normalized_length"));
    }
    if self.stability_count == 0 || self.stability_count > self.window_capacity {
      return Err(ConfigError::StabilityCount {
        count: self.stability_count,
        capacity: self.window_capacity,
      });
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub detector: DetectorConfig,
  pub stabilizer: StabilizerConfig,
}

impl Config {
  pub fn validate(&self) -> Result<(), ConfigError> {
    self.detector.validate()?;
    self.stabilizer.validate()
  }

  pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
    let config: Config = serde_json::from_str(text)?;
    config.validate()?;
    Ok(config)
  }
}

impl FromUrlWithScheme for Config {
  const SCHEME: &'static str = "config";
}

impl FromUrl for Config {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    info!("加载配置文件: {}", url.path());
    let text = std::fs::read_to_string(url.path())?;
    let config = Self::from_json_str(&text)?;
    debug!("配置: {:?}", config);
    Ok(config)
  }
}
