// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use clap::Parser;
use ticket_reader::task::FocusRegion;
use url::Url;

/// 检测票据图像中的用户名与密码字段
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 已记录的模型输出，recorded:///file.json 或 recorded:///dir
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源
  /// 支持格式:
  /// - 单张图像: image:///path/ticket.png
  /// - 图像目录: folder:///path/frames
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 配置文件，config:///path/config.json
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<Url>,

  /// 取景区域 x,y,width,height（像素）
  #[arg(long, value_name = "REGION")]
  pub focus: Option<FocusRegion>,

  /// 每个类别只输出得分最高的框
  #[arg(long)]
  pub best_per_class: bool,

  /// 已记录的 OCR 读数，transcript:///path/session.jsonl；
  /// 给出时读取凭据并输出确认事件，否则只输出检测框
  #[arg(long, value_name = "OCR")]
  pub ocr: Option<Url>,

  /// 首次确认凭据后停止
  #[arg(long)]
  pub stop_on_confirm: bool,

  /// 最大处理帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}
