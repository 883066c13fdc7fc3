// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/letterbox.rs - 等比缩放加填充（letterbox）变换
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

use image::{Rgb, RgbImage, imageops};
use thiserror::Error;
use tracing::debug;

/// 填充颜色，与 YOLO 预处理保持一致
pub const LETTERBOX_FILL: u8 = 114;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LetterboxError {
  #[error("源图像尺寸无效: {0}x{1}")]
  EmptySource(u32, u32),
  #[error("模型输入尺寸不能为 0")]
  ZeroInputSize,
}

/// 源图像与正方形模型输入之间的映射
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxMapping {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub input_size: u32,
}

impl LetterboxMapping {
  pub fn new(
    source_width: u32,
    source_height: u32,
    input_size: u32,
  ) -> Result<Self, LetterboxError> {
    if source_width == 0 || source_height == 0 {
      return Err(LetterboxError::EmptySource(source_width, source_height));
    }
    if input_size == 0 {
      return Err(LetterboxError::ZeroInputSize);
    }

    let size = input_size as f32;
    let (w, h) = (source_width as f32, source_height as f32);
    let scale = (size / w).min(size / h);
    let pad_x = (size - w * scale) / 2.0;
    let pad_y = (size - h * scale) / 2.0;

    Ok(Self {
      scale,
      pad_x,
      pad_y,
      input_size,
    })
  }

  /// 源图像坐标 -> 模型输入坐标
  pub fn forward_point(&self, x: f32, y: f32) -> (f32, f32) {
    (x * self.scale + self.pad_x, y * self.scale + self.pad_y)
  }

  /// 模型输入坐标 -> 源图像坐标
  pub fn inverse_point(&self, x: f32, y: f32) -> (f32, f32) {
    ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
  }

  /// 缩放后图像在画布上的整数尺寸
  pub fn resized_dimensions(&self, source_width: u32, source_height: u32) -> (u32, u32) {
    let fit = |v: u32| {
      ((v as f32 * self.scale).round() as u32).clamp(1, self.input_size)
    };
    (fit(source_width), fit(source_height))
  }
}

/// 将图像等比缩放并居中放到 `input_size x input_size` 的画布上
pub fn letterbox_image(
  image: &RgbImage,
  input_size: u32,
) -> Result<(RgbImage, LetterboxMapping), LetterboxError> {
  let (width, height) = image.dimensions();
  let mapping = LetterboxMapping::new(width, height, input_size)?;
  let (new_w, new_h) = mapping.resized_dimensions(width, height);

  let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle);
  let mut canvas = RgbImage::from_pixel(input_size, input_size, Rgb([LETTERBOX_FILL; 3]));
  let offset_x = (input_size - new_w) / 2;
  let offset_y = (input_size - new_h) / 2;
  imageops::replace(&mut canvas, &resized, offset_x as i64, offset_y as i64);

  debug!(
    "letterbox: {}x{} -> {}x{}, scale={:.4}, pad=({:.1}, {:.1})",
    width, height, new_w, new_h, mapping.scale, mapping.pad_x, mapping.pad_y
  );

  Ok((canvas, mapping))
}
