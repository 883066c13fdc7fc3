// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/model/decode.rs - 检测输出解码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::{
  config::{ConfigError, DetectorConfig},
  letterbox::LetterboxMapping,
  model::{DetectResult, DetectedBox, Rect, nms::nms_per_class},
};

/// 模型内置 NMS 时每行的元素个数: left, top, right, bottom, score, class
pub const NMS_ROW_LEN: usize = 6;

/// 模型输出布局，由配置决定，不在运行时猜测
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
  /// `(4 + K) x anchors`，通道优先
  RawFloat,
  RawInt8,
  /// `rows x 6`，行优先，已经过 NMS
  NmsFloat,
  NmsInt8,
}

impl OutputLayout {
  pub fn is_raw(&self) -> bool {
    matches!(self, OutputLayout::RawFloat | OutputLayout::RawInt8)
  }

  pub fn is_quantized(&self) -> bool {
    matches!(self, OutputLayout::RawInt8 | OutputLayout::NmsInt8)
  }

  /// 原始 anchor 输出没有经过筛选，需要再做一次 NMS
  pub fn requires_nms(&self) -> bool {
    self.is_raw()
  }
}

/// 输出坐标所在空间
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordSpace {
  /// 相对模型输入的 [0, 1] 坐标
  #[default]
  Normalized,
  /// 模型输入像素坐标
  Pixel,
}

/// int8 输出的反量化参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantization {
  pub scale: f32,
  pub zero_point: i32,
}

impl Default for Quantization {
  fn default() -> Self {
    Self {
      scale: 1.0,
      zero_point: 0,
    }
  }
}

impl Quantization {
  pub fn dequantize(&self, raw: i8) -> f32 {
    (raw as f32 - self.zero_point as f32) * self.scale
  }
}

/// 推理运行时给出的原始输出张量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "data", rename_all = "lowercase")]
pub enum RawTensor {
  F32(Vec<f32>),
  I8(Vec<i8>),
}

impl RawTensor {
  pub fn len(&self) -> usize {
    match self {
      RawTensor::F32(data) => data.len(),
      RawTensor::I8(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn dtype(&self) -> &'static str {
    match self {
      RawTensor::F32(_) => "f32",
      RawTensor::I8(_) => "i8",
    }
  }
}

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("配置无效: {0}")]
  Config(#[from] ConfigError),
  #[error("输出形状不匹配: 期望 {expected} 个元素, 实际 {actual} 个")]
  ShapeMismatch { expected: usize, actual: usize },
  #[error("输出类型不匹配: 布局 {layout:?} 不接受 {dtype} 张量")]
  DataTypeMismatch {
    layout: OutputLayout,
    dtype: &'static str,
  },
}

/// 原始标量到浮点数的转换，int8 需要反量化
trait RawScalar: Copy {
  /// 类别分数相同时是否取后一个类别
  const PREFER_LAST_ON_TIE: bool;
  fn value(self, quant: &Quantization) -> f32;
}

impl RawScalar for f32 {
  const PREFER_LAST_ON_TIE: bool = false;

  fn value(self, _quant: &Quantization) -> f32 {
    self
  }
}

impl RawScalar for i8 {
  const PREFER_LAST_ON_TIE: bool = true;

  fn value(self, quant: &Quantization) -> f32 {
    quant.dequantize(self)
  }
}

/// 模型输入坐标 -> 源图像坐标
struct Unprojector<'a> {
  mapping: &'a LetterboxMapping,
  coord_scale: f32,
  width: f32,
  height: f32,
}

impl Unprojector<'_> {
  fn to_model_px(&self, v: f32) -> f32 {
    v * self.coord_scale
  }

  fn to_source(&self, left: f32, top: f32, right: f32, bottom: f32) -> Option<Rect> {
    let (left, top) = self.mapping.inverse_point(left, top);
    let (right, bottom) = self.mapping.inverse_point(right, bottom);

    let rect = Rect::new(
      left.clamp(0.0, self.width),
      top.clamp(0.0, self.height),
      right.clamp(0.0, self.width),
      bottom.clamp(0.0, self.height),
    );
    if rect.is_degenerate() { None } else { Some(rect) }
  }
}

/// 将一次推理的原始输出解码为源图像坐标下的候选框（不含 NMS）
pub fn decode(
  output: &RawTensor,
  mapping: &LetterboxMapping,
  source_width: u32,
  source_height: u32,
  config: &DetectorConfig,
) -> Result<Vec<DetectedBox>, DecodeError> {
  config.validate()?;

  let expected = config.expected_len()?;
  if output.len() != expected {
    error!(
      "输出形状不匹配: 布局 {:?}, 期望 {}, 实际 {}",
      config.layout,
      expected,
      output.len()
    );
    return Err(DecodeError::ShapeMismatch {
      expected,
      actual: output.len(),
    });
  }

  let unprojector = Unprojector {
    mapping,
    coord_scale: match config.coord_space {
      CoordSpace::Normalized => config.model_input_size as f32,
      CoordSpace::Pixel => 1.0,
    },
    width: source_width as f32,
    height: source_height as f32,
  };
  let quant = &config.quantization;

  let boxes = match (config.layout, output) {
    (OutputLayout::RawFloat, RawTensor::F32(data)) => {
      decode_anchors(data, config, &Quantization::default(), &unprojector)
    }
    (OutputLayout::RawInt8, RawTensor::I8(data)) => {
      decode_anchors(data, config, quant, &unprojector)
    }
    (OutputLayout::NmsFloat, RawTensor::F32(data)) => {
      decode_nms_rows(data, config, &Quantization::default(), &unprojector)
    }
    (OutputLayout::NmsInt8, RawTensor::I8(data)) => {
      decode_nms_rows(data, config, quant, &unprojector)
    }
    (layout, tensor) => {
      error!("布局 {:?} 不接受 {} 张量", layout, tensor.dtype());
      return Err(DecodeError::DataTypeMismatch {
        layout,
        dtype: tensor.dtype(),
      });
    }
  };

  debug!("解码得到 {} 个候选框", boxes.len());
  Ok(boxes)
}

/// 解码并在需要时执行按类别 NMS
pub fn postprocess(
  output: &RawTensor,
  mapping: &LetterboxMapping,
  source_width: u32,
  source_height: u32,
  config: &DetectorConfig,
) -> Result<DetectResult, DecodeError> {
  let boxes = decode(output, mapping, source_width, source_height, config)?;
  let boxes = if config.layout.requires_nms() {
    let before = boxes.len();
    let kept = nms_per_class(boxes, config.iou_threshold);
    debug!("NMS: {} -> {}", before, kept.len());
    kept
  } else {
    boxes
  };
  Ok(DetectResult::from(boxes))
}

fn decode_anchors<T: RawScalar>(
  data: &[T],
  config: &DetectorConfig,
  quant: &Quantization,
  unprojector: &Unprojector,
) -> Vec<DetectedBox> {
  let anchors = config.num_anchors;
  let mut boxes = Vec::new();

  for i in 0..anchors {
    let at = |channel: usize| data[channel * anchors + i].value(quant);

    let mut class_id = 0usize;
    let mut score = at(4);
    for c in 1..config.num_classes {
      let s = at(4 + c);
      if s > score || (T::PREFER_LAST_ON_TIE && s == score) {
        class_id = c;
        score = s;
      }
    }

    if !score.is_finite() || score < config.confidence_threshold {
      continue;
    }

    let cx = unprojector.to_model_px(at(0));
    let cy = unprojector.to_model_px(at(1));
    let w = unprojector.to_model_px(at(2));
    let h = unprojector.to_model_px(at(3));
    if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
      debug!("跳过无效 anchor {}", i);
      continue;
    }

    let rect = unprojector.to_source(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0);
    if let Some(rect) = rect {
      boxes.push(DetectedBox {
        class_id: class_id as u32,
        score,
        rect,
      });
    }
  }

  boxes
}

fn decode_nms_rows<T: RawScalar>(
  data: &[T],
  config: &DetectorConfig,
  quant: &Quantization,
  unprojector: &Unprojector,
) -> Vec<DetectedBox> {
  let mut boxes = Vec::new();

  for (index, row) in data.chunks_exact(NMS_ROW_LEN).enumerate() {
    let v: [f32; NMS_ROW_LEN] = std::array::from_fn(|k| row[k].value(quant));

    let score = v[4];
    if !score.is_finite() || score < config.confidence_threshold {
      continue;
    }
    if !v.iter().all(|x| x.is_finite()) {
      debug!("跳过无效行 {}: {:?}", index, v);
      continue;
    }

    let class = v[5].trunc();
    if class < 0.0 || class > u32::MAX as f32 {
      debug!("跳过类别无效的行 {}: {}", index, v[5]);
      continue;
    }

    let rect = unprojector.to_source(
      unprojector.to_model_px(v[0]),
      unprojector.to_model_px(v[1]),
      unprojector.to_model_px(v[2]),
      unprojector.to_model_px(v[3]),
    );
    if let Some(rect) = rect {
      boxes.push(DetectedBox {
        class_id: class as u32,
        score,
        rect,
      });
    }
  }

  boxes
}

#[cfg(test)]
mod tests {
  use super::*;

  const EPS: f32 = 1e-3;

  fn nms_config(rows: usize) -> DetectorConfig {
    DetectorConfig {
      layout: OutputLayout::NmsFloat,
      nms_rows: rows,
      ..Default::default()
    }
  }

  fn raw_config(anchors: usize) -> DetectorConfig {
    DetectorConfig {
      layout: OutputLayout::RawFloat,
      num_anchors: anchors,
      ..Default::default()
    }
  }

  /// 按通道优先顺序排列 anchor
  fn channel_major(anchors: &[[f32; 6]]) -> Vec<f32> {
    let mut data = vec![0.0; 6 * anchors.len()];
    for (i, anchor) in anchors.iter().enumerate() {
      for (c, v) in anchor.iter().enumerate() {
        data[c * anchors.len() + i] = *v;
      }
    }
    data
  }

  fn assert_rect(rect: &Rect, expected: [f32; 4]) {
    let got = [rect.left, rect.top, rect.right, rect.bottom];
    for (g, e) in got.iter().zip(expected.iter()) {
      assert!((g - e).abs() < EPS, "got {:?}, expected {:?}", got, expected);
    }
  }

  #[test]
  fn nms_rows_are_unprojected() {
    let mapping = LetterboxMapping::new(1280, 720, 640).unwrap();
    let output = RawTensor::F32(vec![0.25, 0.5, 0.75, 0.75, 0.9, 1.0]);
    let boxes = decode(&output, &mapping, 1280, 720, &nms_config(1)).unwrap();

    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].class_id, 1);
    assert_eq!(boxes[0].score, 0.9);
    assert_rect(&boxes[0].rect, [320.0, 360.0, 960.0, 680.0]);
  }

  #[test]
  fn boxes_are_clamped_to_source() {
    let mapping = LetterboxMapping::new(1280, 720, 640).unwrap();
    let output = RawTensor::F32(vec![0.0, 0.0, 1.0, 1.0, 0.8, 0.0]);
    let boxes = decode(&output, &mapping, 1280, 720, &nms_config(1)).unwrap();
    assert_rect(&boxes[0].rect, [0.0, 0.0, 1280.0, 720.0]);
  }

  #[test]
  fn boxes_inside_padding_are_dropped() {
    let mapping = LetterboxMapping::new(1280, 720, 640).unwrap();
    let output = RawTensor::F32(vec![0.1, 0.0, 0.5, 0.2, 0.8, 0.0]);
    let boxes = decode(&output, &mapping, 1280, 720, &nms_config(1)).unwrap();
    assert!(boxes.is_empty());
  }

  #[test]
  fn confidence_threshold_is_inclusive() {
    let mapping = LetterboxMapping::new(640, 640, 640).unwrap();
    let output = RawTensor::F32(vec![
      0.1, 0.1, 0.3, 0.3, 0.25, 0.0, //
      0.5, 0.5, 0.7, 0.7, 0.2499, 0.0,
    ]);
    let boxes = decode(&output, &mapping, 640, 640, &nms_config(2)).unwrap();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].score, 0.25);
  }

  #[test]
  fn malformed_rows_are_skipped() {
    let mapping = LetterboxMapping::new(640, 640, 640).unwrap();
    let output = RawTensor::F32(vec![
      f32::NAN, 0.1, 0.3, 0.3, 0.9, 0.0, //
      0.1, 0.1, 0.3, 0.3, f32::NAN, 0.0, //
      0.1, 0.1, 0.3, 0.3, 0.9, -3.0, //
      0.1, 0.1, 0.3, 0.3, 0.9, 1.0,
    ]);
    let boxes = decode(&output, &mapping, 640, 640, &nms_config(4)).unwrap();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].class_id, 1);
  }

  #[test]
  fn zero_rows_give_empty_result() {
    let mapping = LetterboxMapping::new(640, 480, 640).unwrap();
    let output = RawTensor::F32(vec![0.0; 300 * NMS_ROW_LEN]);
    let result = postprocess(&output, &mapping, 640, 480, &DetectorConfig::default()).unwrap();
    assert!(result.is_empty());
  }

  #[test]
  fn pixel_coordinates_skip_scaling() {
    let mapping = LetterboxMapping::new(640, 640, 640).unwrap();
    let config = DetectorConfig {
      coord_space: CoordSpace::Pixel,
      ..nms_config(1)
    };
    let output = RawTensor::F32(vec![10.0, 20.0, 110.0, 220.0, 0.5, 0.0]);
    let boxes = decode(&output, &mapping, 640, 640, &config).unwrap();
    assert_rect(&boxes[0].rect, [10.0, 20.0, 110.0, 220.0]);
  }

  #[test]
  fn shape_mismatch_is_fatal() {
    let mapping = LetterboxMapping::new(640, 640, 640).unwrap();
    let output = RawTensor::F32(vec![0.0; 10]);
    let err = decode(&output, &mapping, 640, 640, &nms_config(300)).unwrap_err();
    assert!(matches!(
      err,
      DecodeError::ShapeMismatch {
        expected: 1800,
        actual: 10
      }
    ));
  }

  #[test]
  fn dtype_must_match_layout() {
    let mapping = LetterboxMapping::new(640, 640, 640).unwrap();
    let output = RawTensor::I8(vec![0; 6]);
    let err = decode(&output, &mapping, 640, 640, &nms_config(1)).unwrap_err();
    assert!(matches!(err, DecodeError::DataTypeMismatch { dtype: "i8", .. }));
  }

  #[test]
  fn invalid_config_is_fatal() {
    let mapping = LetterboxMapping::new(640, 640, 640).unwrap();
    let output = RawTensor::F32(vec![0.0; 6]);
    let config = DetectorConfig {
      iou_threshold: 1.2,
      ..nms_config(1)
    };
    assert!(matches!(
      decode(&output, &mapping, 640, 640, &config),
      Err(DecodeError::Config(ConfigError::IouOutOfRange(_)))
    ));
  }

  #[test]
  fn raw_anchors_take_argmax_and_need_nms() {
    let mapping = LetterboxMapping::new(640, 640, 640).unwrap();
    let data = channel_major(&[
      [0.5, 0.5, 0.25, 0.25, 0.1, 0.8],
      [0.5, 0.5, 0.25, 0.25, 0.7, 0.2],
      [0.51, 0.5, 0.25, 0.25, 0.05, 0.6],
      [0.2, 0.2, 0.1, 0.1, 0.1, 0.2],
    ]);
    let output = RawTensor::F32(data);
    let config = raw_config(4);

    let boxes = decode(&output, &mapping, 640, 640, &config).unwrap();
    assert_eq!(boxes.len(), 3);
    assert_eq!(boxes[0].class_id, 1);
    assert_eq!(boxes[0].score, 0.8);
    assert_rect(&boxes[0].rect, [240.0, 240.0, 400.0, 400.0]);
    assert_eq!(boxes[1].class_id, 0);

    let result = postprocess(&output, &mapping, 640, 640, &config).unwrap();
    assert_eq!(result.len(), 2);
    assert!(result.items.iter().any(|b| b.class_id == 0 && b.score == 0.7));
    assert!(result.items.iter().any(|b| b.class_id == 1 && b.score == 0.8));
  }

  #[test]
  fn float_ties_prefer_first_class() {
    let mapping = LetterboxMapping::new(640, 640, 640).unwrap();
    let output = RawTensor::F32(channel_major(&[[0.5, 0.5, 0.2, 0.2, 0.6, 0.6]]));
    let boxes = decode(&output, &mapping, 640, 640, &raw_config(1)).unwrap();
    assert_eq!(boxes[0].class_id, 0);
  }

  #[test]
  fn int8_anchors_are_dequantized() {
    let mapping = LetterboxMapping::new(640, 640, 640).unwrap();
    let quant = Quantization {
      scale: 1.0 / 256.0,
      zero_point: -128,
    };
    let config = DetectorConfig {
      layout: OutputLayout::RawInt8,
      num_anchors: 2,
      quantization: quant,
      ..Default::default()
    };
    // 0 -> 0.5, -64 -> 0.25, 77 -> 0.80078125, -128 -> 0.0
    let anchors: [[i8; 6]; 2] = [[0, 0, -64, -64, -128, 77], [0, 0, -64, -64, 50, 50]];
    let mut data = vec![0i8; 12];
    for (i, anchor) in anchors.iter().enumerate() {
      for (c, v) in anchor.iter().enumerate() {
        data[c * 2 + i] = *v;
      }
    }

    let boxes = decode(&RawTensor::I8(data), &mapping, 640, 640, &config).unwrap();
    assert_eq!(boxes.len(), 2);
    assert_eq!(boxes[0].class_id, 1);
    assert!((boxes[0].score - 0.800_781_25).abs() < 1e-6);
    assert_rect(&boxes[0].rect, [240.0, 240.0, 400.0, 400.0]);
    // int8 分数相同时取后一个类别
    assert_eq!(boxes[1].class_id, 1);
  }

  #[test]
  fn int8_nms_rows_are_dequantized() {
    let mapping = LetterboxMapping::new(640, 640, 640).unwrap();
    let config = DetectorConfig {
      layout: OutputLayout::NmsInt8,
      nms_rows: 1,
      quantization: Quantization {
        scale: 1.0 / 128.0,
        zero_point: 0,
      },
      ..Default::default()
    };
    // 32/128 = 0.25, 96/128 = 0.75, 64/128 = 0.5, class 128/128 = 1
    let output = RawTensor::I8(vec![32, 32, 96, 96, 64, 127]);
    let boxes = decode(&output, &mapping, 640, 640, &config).unwrap();
    assert_eq!(boxes.len(), 1);
    // 127/128 截断为类别 0
    assert_eq!(boxes[0].class_id, 0);
    assert_eq!(boxes[0].score, 0.5);
    assert_rect(&boxes[0].rect, [160.0, 160.0, 480.0, 480.0]);
  }

  #[test]
  fn out_of_range_zero_point_is_config_error() {
    let mapping = LetterboxMapping::new(640, 640, 640).unwrap();
    let config = DetectorConfig {
      layout: OutputLayout::NmsInt8,
      nms_rows: 1,
      quantization: Quantization {
        scale: 0.01,
        zero_point: i32::MIN,
      },
      ..Default::default()
    };
    let output = RawTensor::I8(vec![-128; NMS_ROW_LEN]);
    assert!(matches!(
      decode(&output, &mapping, 640, 640, &config),
      Err(DecodeError::Config(ConfigError::ZeroPointOutOfRange(i32::MIN)))
    ));
  }

  #[test]
  fn overflowing_shape_is_config_error() {
    let mapping = LetterboxMapping::new(640, 640, 640).unwrap();
    let output = RawTensor::F32(vec![0.0; 6]);
    assert!(matches!(
      decode(&output, &mapping, 640, 640, &raw_config(usize::MAX / 2)),
      Err(DecodeError::Config(ConfigError::BufferLenOverflow))
    ));
  }

  #[test]
  fn dequantize_handles_extreme_zero_point() {
    let quant = Quantization {
      scale: 1.0,
      zero_point: i32::MIN,
    };
    assert!(quant.dequantize(i8::MAX).is_finite());
  }

  #[test]
  fn raw_tensor_json_shape() {
    let tensor: RawTensor = serde_json::from_str(r#"{"dtype":"i8","data":[1,-2,3]}"#).unwrap();
    assert_eq!(tensor, RawTensor::I8(vec![1, -2, 3]));
    assert_eq!(tensor.dtype(), "i8");
  }
}
