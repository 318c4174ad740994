// 该文件是 Tancha （探查） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

mod args;

use std::{thread, time::Duration};

use ab_glyph::FontArc;
use anyhow::{Result, bail};
use clap::Parser;
use tracing::{info, warn};

use tancha::{
  FromUrl,
  input::InputWrapper,
  model::SsdBuilder,
  output::{Announce, CommandSpeaker, OutputWrapper, SilentSpeaker, Speaker},
  task::{Controller, LoopConfig, Phase},
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let provider = SsdBuilder::from_url(&args.model)?;
  let mut output = OutputWrapper::from_url(&args.output)?;

  if let Some(path) = &args.font {
    let font = FontArc::try_from_vec(std::fs::read(path)?)?;
    info!("使用字体: {}", path.display());
    output = output.with_font(font);
  }

  let speaker: Box<dyn Speaker> = match &args.speech_command {
    Some(program) => {
      info!("语音播报程序: {} {:?}", program, args.speech_arg);
      Box::new(CommandSpeaker::new(program, args.speech_arg.clone()))
    }
    None => Box::new(SilentSpeaker),
  };

  let config = LoopConfig::default()
    .with_interval(Duration::from_millis(args.interval_ms))
    .with_frame_limit(args.frame_number)
    .with_max_consecutive_failures(args.max_failures);

  let session = Controller::new(config).mount(provider, input, Announce::new(output, speaker));

  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  tokio::select! {
    _ = rx.recv() => warn!("中断信号接收，退出任务循环"),
    state = session.wait_for(|s| s.phase.is_terminal()) => info!("检测循环结束: {:?}", state.phase),
  }
  session.teardown();

  let state = session.state();
  let stats = &state.stats;
  info!(
    "共 {} 次检测，{} 次推理，{} 次失败，渲染 {} 帧，跳过 {} 次",
    stats.ticks, stats.inferences, stats.failures, stats.rendered, stats.skipped_in_flight
  );

  if state.phase == Phase::LoadFailed {
    bail!("模型加载失败: {}", args.model);
  }
  Ok(())
}
