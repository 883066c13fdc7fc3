// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::sync::mpsc::Receiver;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use ticket_reader::{
  FromUrl,
  config::Config,
  input::{InputWrapper, TranscriptInput},
  model::{DetectedBox, RecordedModel},
  ocr::{NoText, RecordedReader},
  stabilizer::{CredentialStabilizer, SharedStabilizer},
  task::{ContinuousTask, FramePipeline, OneShotTask, Task},
};

#[derive(Serialize)]
struct FrameDetections<'a> {
  frame_index: usize,
  detections: &'a [DetectedBox],
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型输出: {}", args.model);
  info!("输入来源: {}", args.input);

  let config = match &args.config {
    Some(url) => Config::from_url(url)?,
    None => Config::default(),
  };
  let input = InputWrapper::from_url(&args.input)?;
  let model = RecordedModel::from_url(&args.model)?;

  let (tx, rx) = std::sync::mpsc::channel();
  ctrlc::set_handler(move || {
    let _ = tx.send(());
  })?;

  match &args.ocr {
    Some(ocr) => read_credentials(&args, config, input, model, ocr, rx),
    None => {
      let pipeline = FramePipeline::new(config.detector, model, NoText)?.with_focus(args.focus);
      print_detections(&args, &pipeline, input, rx)
    }
  }
}

/// 检测 -> OCR -> 稳定器，输出每次确认
fn read_credentials(
  args: &args::Args,
  config: Config,
  input: InputWrapper,
  model: RecordedModel,
  ocr: &url::Url,
  stop: Receiver<()>,
) -> Result<()> {
  info!("OCR 读数: {}", ocr);
  let reader = RecordedReader::from(TranscriptInput::from_url(ocr)?);
  let pipeline = FramePipeline::new(config.detector, model, reader)?.with_focus(args.focus);
  let stabilizer = SharedStabilizer::new(CredentialStabilizer::new(&config.stabilizer)?);

  let events = match input {
    InputWrapper::ReadImageFile(_) => OneShotTask.run_task(input, &pipeline, &stabilizer)?,
    InputWrapper::Directory(_) => ContinuousTask::default()
      .with_frame_number(args.frame_number)
      .with_stop_on_confirm(args.stop_on_confirm)
      .with_stop_signal(stop)
      .run_task(input, &pipeline, &stabilizer)?,
  };
  for event in &events {
    println!("{}", serde_json::to_string(event)?);
  }
  Ok(())
}

/// 只检测，每帧输出一行 JSON
fn print_detections(
  args: &args::Args,
  pipeline: &FramePipeline<RecordedModel, NoText>,
  input: InputWrapper,
  stop: Receiver<()>,
) -> Result<()> {
  for (frame_index, image) in input.enumerate() {
    let mut result = pipeline.detect(&image)?;
    if args.best_per_class {
      result = result.best_per_class();
    }
    let line = serde_json::to_string(&FrameDetections {
      frame_index,
      detections: &result.items,
    })?;
    println!("{}", line);

    if args.frame_number.is_some_and(|n| frame_index + 1 >= n) {
      info!("达到指定帧数 {}, 退出", frame_index + 1);
      break;
    }
    if stop.try_recv().is_ok() {
      warn!("中断信号接收，退出");
      break;
    }
  }
  Ok(())
}
