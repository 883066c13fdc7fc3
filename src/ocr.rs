// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/ocr.rs - OCR 接口与裁剪
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
use std::sync::{Mutex, PoisonError};

use image::{RgbImage, imageops};
use thiserror::Error;

use crate::{input::TranscriptInput, model::Rect};

/// 小字号字段放大后再识别
pub const OCR_UPSCALE: u32 = 4;

/// 外部 OCR 引擎
pub trait TextReader {
  type Error;

  fn read_text(&self, image: &RgbImage) -> Result<String, Self::Error>;
}

/// 只做检测时使用，不识别任何文字
#[derive(Debug, Default, Clone, Copy)]
pub struct NoText;

impl TextReader for NoText {
  type Error = std::convert::Infallible;

  fn read_text(&self, _image: &RgbImage) -> Result<String, Self::Error> {
    Ok(String::new())
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordedReaderError {
  #[error("OCR 记录已读完")]
  Exhausted,
}

/// 按顺序返回已记录的 OCR 文本，不看图像内容
#[derive(Debug, Default)]
pub struct RecordedReader {
  texts: Mutex<VecDeque<String>>,
}

impl RecordedReader {
  pub fn new<I: IntoIterator<Item = String>>(texts: I) -> Self {
    Self {
      texts: Mutex::new(texts.into_iter().collect()),
    }
  }

  pub fn remaining(&self) -> usize {
    self.texts.lock().unwrap_or_else(PoisonError::into_inner).len()
  }
}

impl From<TranscriptInput> for RecordedReader {
  fn from(transcript: TranscriptInput) -> Self {
    Self::new(transcript.into_iter().map(|observation| observation.text))
  }
}

impl TextReader for RecordedReader {
  type Error = RecordedReaderError;

  fn read_text(&self, _image: &RgbImage) -> Result<String, Self::Error> {
    self
      .texts
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .pop_front()
      .ok_or(RecordedReaderError::Exhausted)
  }
}

/// 将浮点框取整并限制在图像内，保证至少 1x1
pub fn clamp_crop(rect: &Rect, width: u32, height: u32) -> (u32, u32, u32, u32) {
  let (w, h) = (width as i64, height as i64);
  let left = (rect.left as i64).clamp(0, w - 1);
  let top = (rect.top as i64).clamp(0, h - 1);
  let right = (rect.right as i64).clamp(left + 1, w);
  let bottom = (rect.bottom as i64).clamp(top + 1, h);

  (
    left as u32,
    top as u32,
    (right - left) as u32,
    (bottom - top) as u32,
  )
}

/// 裁出检测框并放大 `upscale` 倍
pub fn crop_for_ocr(image: &RgbImage, rect: &Rect, upscale: u32) -> Option<RgbImage> {
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 {
    return None;
  }

  let (x, y, w, h) = clamp_crop(rect, width, height);
  let cropped = imageops::crop_imm(image, x, y, w, h).to_image();
  let upscale = upscale.max(1);
  if upscale == 1 {
    return Some(cropped);
  }

  Some(imageops::resize(
    &cropped,
    w * upscale,
    h * upscale,
    imageops::FilterType::Triangle,
  ))
}
