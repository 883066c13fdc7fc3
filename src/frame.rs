// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/frame.rs - 模型输入帧定义
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

use image::RgbImage;

use crate::letterbox::{LetterboxError, LetterboxMapping, letterbox_image};

const RGB_CHANNELS: usize = 3;

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

/// 正方形 NHWC RGB 帧，int8 模型直接使用
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  size: u32,
  data: Box<[u8]>,
}

impl RgbNhwcFrame {
  pub fn with_size(size: u32) -> Self {
    let len = RGB_CHANNELS * (size as usize) * (size as usize);
    Self {
      size,
      data: vec![0u8; len].into_boxed_slice(),
    }
  }

  pub fn size(&self) -> u32 {
    self.size
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// float 模型的输入：像素值 / 255
  pub fn to_f32_normalized(&self) -> Vec<f32> {
    self.data.iter().map(|&v| v as f32 / 255.0).collect()
  }
}

impl AsMut<[u8]> for RgbNhwcFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl AsNhwcFrame for RgbNhwcFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

impl TryFrom<RgbImage> for RgbNhwcFrame {
  type Error = RgbImage;

  /// 只接受正方形图像，否则原样返回
  fn try_from(image: RgbImage) -> Result<Self, Self::Error> {
    let (width, height) = image.dimensions();
    if width != height {
      return Err(image);
    }
    Ok(Self {
      size: width,
      data: image.into_raw().into_boxed_slice(),
    })
  }
}

/// 一次推理所需的输入帧及解码所需的映射
#[derive(Debug, Clone)]
pub struct LetterboxedFrame {
  pub frame: RgbNhwcFrame,
  pub mapping: LetterboxMapping,
  pub source_width: u32,
  pub source_height: u32,
}

impl LetterboxedFrame {
  pub fn from_image(image: &RgbImage, input_size: u32) -> Result<Self, LetterboxError> {
    let (source_width, source_height) = image.dimensions();
    let (canvas, mapping) = letterbox_image(image, input_size)?;
    let frame = RgbNhwcFrame {
      size: input_size,
      data: canvas.into_raw().into_boxed_slice(),
    };
    Ok(Self {
      frame,
      mapping,
      source_width,
      source_height,
    })
  }
}

impl AsNhwcFrame for LetterboxedFrame {
  fn as_nhwc(&self) -> &[u8] {
    self.frame.as_nhwc()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn square_image_becomes_frame() {
    let image = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
    let frame = RgbNhwcFrame::try_from(image).unwrap();
    assert_eq!(frame.size(), 4);
    assert_eq!(frame.as_nhwc().len(), 4 * 4 * 3);
    assert_eq!(&frame.as_nhwc()[..3], &[10, 20, 30]);
  }

  #[test]
  fn non_square_image_is_returned() {
    let image = RgbImage::new(4, 2);
    let rejected = RgbNhwcFrame::try_from(image).unwrap_err();
    assert_eq!(rejected.dimensions(), (4, 2));
  }

  #[test]
  fn normalized_values_are_in_unit_range() {
    let mut frame = RgbNhwcFrame::with_size(2);
    frame.as_mut()[0] = 255;
    frame.as_mut()[1] = 51;
    let values = frame.to_f32_normalized();
    assert_eq!(values.len(), 12);
    assert_eq!(values[0], 1.0);
    assert!((values[1] - 0.2).abs() < 1e-6);
    assert_eq!(values[2], 0.0);
  }

  #[test]
  fn letterboxed_frame_keeps_source_size() {
    let image = RgbImage::new(300, 150);
    let lb = LetterboxedFrame::from_image(&image, 32).unwrap();
    assert_eq!((lb.source_width, lb.source_height), (300, 150));
    assert_eq!(lb.frame.size(), 32);
    assert_eq!(lb.as_nhwc().len(), 32 * 32 * 3);
  }
}
