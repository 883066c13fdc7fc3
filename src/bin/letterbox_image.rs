// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/bin/letterbox_image.rs - 生成模型输入图像
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use ticket_reader::{FromUrl, input::ImageFileInput, letterbox::letterbox_image};

/// 将图像按 letterbox 方式缩放填充，保存为模型输入
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像，image:///path/ticket.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出 PNG 路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,

  /// 模型输入边长
  #[arg(long, default_value = "640", value_name = "SIZE")]
  pub size: u32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let mut input = ImageFileInput::from_url(&args.input)?;
  let image = input
    .next()
    .ok_or_else(|| anyhow::anyhow!("没有读取到图像"))?;
  let (padded, mapping) = letterbox_image(&image, args.size)?;
  padded.save(&args.output)?;

  info!(
    "缩放比例: {:.4}, 填充: ({:.1}, {:.1}), 输出: {}",
    mapping.scale,
    mapping.pad_x,
    mapping.pad_y,
    args.output.display()
  );
  println!("{}", serde_json::json!({
    "scale": mapping.scale,
    "pad_x": mapping.pad_x,
    "pad_y": mapping.pad_y,
    "input_size": mapping.input_size,
  }));

  Ok(())
}
