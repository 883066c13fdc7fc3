// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/task.rs - 采集任务
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

use std::{borrow::Cow, str::FromStr, sync::mpsc::Receiver};

use chrono::{DateTime, Utc};
use image::{RgbImage, imageops};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::DetectorConfig,
  frame::LetterboxedFrame,
  input::TranscriptInput,
  model::{DetectResult, DetectedBox, Model, RawTensor, postprocess},
  ocr::{OCR_UPSCALE, TextReader, crop_for_ocr},
  stabilizer::{Credentials, SharedStabilizer},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmedEvent {
  pub credentials: Credentials,
  pub frame_index: usize,
  pub confirmed_at: DateTime<Utc>,
}

impl ConfirmedEvent {
  fn now(credentials: Credentials, frame_index: usize) -> Self {
    Self {
      credentials,
      frame_index,
      confirmed_at: Utc::now(),
    }
  }
}

/// 取景框内的区域，检测只在此区域内进行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusRegion {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl FocusRegion {
  /// 区域超出图像时返回 None，该帧跳过
  pub fn crop(&self, image: &RgbImage) -> Option<RgbImage> {
    let (w, h) = image.dimensions();
    let fits = self.width > 0
      && self.height > 0
      && self.x.checked_add(self.width).is_some_and(|r| r <= w)
      && self.y.checked_add(self.height).is_some_and(|b| b <= h);
    if !fits {
      return None;
    }
    Some(imageops::crop_imm(image, self.x, self.y, self.width, self.height).to_image())
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("取景区域格式应为 x,y,width,height: {0}")]
pub struct FocusRegionParseError(String);

impl FromStr for FocusRegion {
  type Err = FocusRegionParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let parts: Vec<u32> = s
      .split(',')
      .map(|p| p.trim().parse::<u32>())
      .collect::<Result<_, _>>()
      .map_err(|_| FocusRegionParseError(s.to_string()))?;
    match parts[..] {
      [x, y, width, height] => Ok(Self {
        x,
        y,
        width,
        height,
      }),
      _ => Err(FocusRegionParseError(s.to_string())),
    }
  }
}

/// 单帧处理：letterbox -> 推理 -> 解码 -> 裁剪 -> OCR -> 稳定器
pub struct FramePipeline<M, R> {
  config: DetectorConfig,
  model: M,
  reader: R,
  focus: Option<FocusRegion>,
}

impl<M, R> FramePipeline<M, R>
where
  M: Model<Input = LetterboxedFrame, Output = RawTensor>,
  M::Error: std::error::Error + Send + Sync + 'static,
  R: TextReader,
  R::Error: std::fmt::Display,
{
  pub fn new(config: DetectorConfig, model: M, reader: R) -> anyhow::Result<Self> {
    config.validate()?;
    Ok(Self {
      config,
      model,
      reader,
      focus: None,
    })
  }

  pub fn with_focus(mut self, focus: Option<FocusRegion>) -> Self {
    self.focus = focus;
    self
  }

  /// 检测框坐标相对于完整的输入图像
  pub fn detect(&self, image: &RgbImage) -> anyhow::Result<DetectResult> {
    let (region, offset) = match self.focus {
      Some(focus) => match focus.crop(image) {
        Some(cropped) => (Cow::Owned(cropped), (focus.x as f32, focus.y as f32)),
        None => {
          warn!("取景区域 {:?} 超出图像范围，跳过该帧", focus);
          return Ok(DetectResult::default());
        }
      },
      None => (Cow::Borrowed(image), (0.0, 0.0)),
    };

    let input = LetterboxedFrame::from_image(&region, self.config.model_input_size)?;
    let output = self.model.infer(&input)?;
    let result = postprocess(
      &output,
      &input.mapping,
      input.source_width,
      input.source_height,
      &self.config,
    )?;

    if offset == (0.0, 0.0) {
      return Ok(result);
    }
    let items: Vec<DetectedBox> = result
      .items
      .iter()
      .map(|item| DetectedBox {
        rect: item.rect.translate(offset.0, offset.1),
        ..item.clone()
      })
      .collect();
    Ok(DetectResult::from(items))
  }

  /// 对每个检测框做 OCR 并送入稳定器
  pub fn read_fields(
    &self,
    image: &RgbImage,
    result: &DetectResult,
    stabilizer: &SharedStabilizer,
  ) -> Vec<Credentials> {
    let mut confirmed = Vec::new();
    for item in result.items.iter() {
      let label = item.label();
      let Some(crop) = crop_for_ocr(image, &item.rect, OCR_UPSCALE) else {
        continue;
      };
      // OCR 失败按空文本处理
      let text = self.reader.read_text(&crop).unwrap_or_else(|e| {
        warn!("OCR 失败 ({}): {}", label, e);
        String::new()
      });
      debug!("{} -> {:?}", label, text);
      confirmed.extend(stabilizer.observe(label, &text));
    }
    confirmed
  }

  pub fn process(
    &self,
    image: &RgbImage,
    stabilizer: &SharedStabilizer,
  ) -> anyhow::Result<Vec<Credentials>> {
    let result = self.detect(image)?;
    debug!("检测到 {} 个字段", result.len());
    Ok(self.read_fields(image, &result, stabilizer))
  }
}

pub trait Task<I, M, R>: Sized {
  type Error;
  fn run_task(
    self,
    input: I,
    pipeline: &FramePipeline<M, R>,
    stabilizer: &SharedStabilizer,
  ) -> Result<Vec<ConfirmedEvent>, Self::Error>;
}

/// 单张静态图像，每个类别只读取得分最高的框
pub struct OneShotTask;

impl<I, M, R> Task<I, M, R> for OneShotTask
where
  I: Iterator<Item = RgbImage>,
  M: Model<Input = LetterboxedFrame, Output = RawTensor>,
  M::Error: std::error::Error + Send + Sync + 'static,
  R: TextReader,
  R::Error: std::fmt::Display,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    pipeline: &FramePipeline<M, R>,
    stabilizer: &SharedStabilizer,
  ) -> Result<Vec<ConfirmedEvent>, Self::Error> {
    info!("开始任务...");
    let image = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    let now = std::time::Instant::now();
    let result = pipeline.detect(&image)?.best_per_class();
    info!("检测完成，耗时: {:.2?}，字段数: {}", now.elapsed(), result.len());

    if result.is_empty() {
      warn!("图像中没有找到凭据字段");
      return Ok(Vec::new());
    }

    let events = pipeline
      .read_fields(&image, &result, stabilizer)
      .into_iter()
      .map(|c| ConfirmedEvent::now(c, 0))
      .collect();
    Ok(events)
  }
}

/// 连续帧，直到帧数上限、收到停止信号或（可选）首次确认
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  stop_on_confirm: bool,
  stop: Option<Receiver<()>>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_stop_on_confirm(mut self, stop_on_confirm: bool) -> Self {
    self.stop_on_confirm = stop_on_confirm;
    self
  }

  pub fn with_stop_signal(mut self, stop: Receiver<()>) -> Self {
    self.stop = Some(stop);
    self
  }
}

impl<I, M, R> Task<I, M, R> for ContinuousTask
where
  I: Iterator<Item = RgbImage>,
  M: Model<Input = LetterboxedFrame, Output = RawTensor>,
  M::Error: std::error::Error + Send + Sync + 'static,
  R: TextReader,
  R::Error: std::fmt::Display,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    pipeline: &FramePipeline<M, R>,
    stabilizer: &SharedStabilizer,
  ) -> Result<Vec<ConfirmedEvent>, Self::Error> {
    info!("开始任务...");
    let mut events = Vec::new();

    for (frame_index, image) in input.enumerate() {
      debug!("处理第 {} 帧图像", frame_index + 1);
      let now = std::time::Instant::now();
      let confirmed = pipeline.process(&image, stabilizer)?;
      debug!("第 {} 帧耗时: {:.2?}", frame_index + 1, now.elapsed());

      let found = !confirmed.is_empty();
      events.extend(confirmed.into_iter().map(|c| ConfirmedEvent::now(c, frame_index)));

      if found && self.stop_on_confirm {
        info!("凭据已确认，退出任务循环");
        break;
      }
      if self.frame_number.is_some_and(|n| frame_index + 1 >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index + 1);
        break;
      }
      if self.stop.as_ref().is_some_and(|rx| rx.try_recv().is_ok()) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，确认 {} 次", events.len());
    Ok(events)
  }
}

/// 将记录的 OCR 读数依次送入稳定器
pub fn replay_transcript(
  transcript: TranscriptInput,
  stabilizer: &SharedStabilizer,
) -> Vec<ConfirmedEvent> {
  transcript
    .into_iter()
    .enumerate()
    .filter_map(|(index, observation)| {
      stabilizer
        .observe(observation.field(), &observation.text)
        .map(|c| ConfirmedEvent::now(c, index))
    })
    .collect()
}
