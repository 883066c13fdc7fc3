// 该文件是 Ticket Reader （票据读取） 项目的一部分。
// src/bin/replay_credentials.rs - 重放已记录的 OCR 读数
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use ticket_reader::{
  FromUrl,
  config::Config,
  input::TranscriptInput,
  stabilizer::{CredentialStabilizer, SharedStabilizer},
  task::replay_transcript,
};

/// 将 OCR 读数送入稳定器，输出每次确认的凭据
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 读数记录，transcript:///path/session.jsonl
  #[arg(long, value_name = "TRANSCRIPT")]
  pub transcript: Url,

  /// 配置文件，config:///path/config.json
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<Url>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let config = match &args.config {
    Some(url) => Config::from_url(url)?,
    None => Config::default(),
  };
  let transcript = TranscriptInput::from_url(&args.transcript)?;
  let stabilizer = SharedStabilizer::new(CredentialStabilizer::new(&config.stabilizer)?);

  let events = replay_transcript(transcript, &stabilizer);
  for event in &events {
    println!("{}", serde_json::to_string(event)?);
  }
  info!("共确认 {} 次", events.len());

  Ok(())
}
