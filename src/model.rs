// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/model.rs - 模型与检测结果
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 推理运行时接口，模型本身由外部提供
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn from_label_id(id: u32) -> Self;
}

/// 票据上的字段类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldLabel {
  Password,
  Username,
  Unknown,
}

/// 类别编号与检测器训练时的顺序一致
const FIELD_LABELS: [FieldLabel; 2] = [FieldLabel::Password, FieldLabel::Username];

impl WithLabel for FieldLabel {
  fn to_label_str(&self) -> String {
    match self {
      FieldLabel::Password => "password_field",
      FieldLabel::Username => "username_field",
      FieldLabel::Unknown => "unknown",
    }
    .to_string()
  }

  fn from_label_id(id: u32) -> Self {
    FIELD_LABELS
      .get(id as usize)
      .copied()
      .unwrap_or(FieldLabel::Unknown)
  }
}

impl FromStr for FieldLabel {
  type Err = std::convert::Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s.trim().to_ascii_lowercase().as_str() {
      "username" | "username_field" => FieldLabel::Username,
      "password" | "password_field" => FieldLabel::Password,
      _ => FieldLabel::Unknown,
    })
  }
}

impl std::fmt::Display for FieldLabel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.to_label_str())
  }
}

/// 源图像像素坐标下的矩形
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl Rect {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn is_degenerate(&self) -> bool {
    !(self.right > self.left && self.bottom > self.top)
  }

  pub fn translate(&self, dx: f32, dy: f32) -> Self {
    Self::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
  }

  /// 归一化到 [0, 1]，供覆盖层绘制使用
  pub fn normalized(&self, width: u32, height: u32) -> Self {
    let (w, h) = (width as f32, height as f32);
    Self::new(self.left / w, self.top / h, self.right / w, self.bottom / h)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedBox {
  pub class_id: u32,
  pub score: f32,
  pub rect: Rect,
}

impl DetectedBox {
  pub fn label(&self) -> FieldLabel {
    FieldLabel::from_label_id(self.class_id)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectResult {
  pub items: Box<[DetectedBox]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// 每个类别只保留得分最高的框，按类别首次出现顺序
  pub fn best_per_class(&self) -> DetectResult {
    let mut best: Vec<DetectedBox> = Vec::new();
    for item in self.items.iter() {
      match best.iter_mut().find(|b| b.class_id == item.class_id) {
        Some(current) if item.score > current.score => *current = item.clone(),
        Some(_) => {}
        None => best.push(item.clone()),
      }
    }
    DetectResult::from(best)
  }
}

impl From<Vec<DetectedBox>> for DetectResult {
  fn from(items: Vec<DetectedBox>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

mod decode;
mod nms;
mod recorded;

pub use self::decode::{
  CoordSpace, DecodeError, NMS_ROW_LEN, OutputLayout, Quantization, RawTensor, decode, postprocess,
};
pub use self::nms::{iou, nms_per_class};
pub use self::recorded::{RecordedModel, RecordedModelError, load_tensor};
