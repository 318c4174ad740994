// 该文件是 Tancha （探查） 项目的一部分。
// src/bin/simple_oneshot.rs - 单帧推理测试代码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::info;
use url::Url;

use tancha::{
  FromUrl,
  input::{FrameSource, InputWrapper},
  model::{Model, ModelProvider, SsdBuilder},
  output::{OutputWrapper, OverlayStyle, Render, SurfaceSize, plan_overlay},
};

/// 单帧推理参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 等待输入就绪的最长时间（秒）
  #[arg(long, value_name = "SECONDS", default_value_t = 5)]
  pub wait: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let now = Instant::now();
  let model = SsdBuilder::from_url(&args.model)?.load().await?;
  info!("模型加载完成，耗时: {:.2?}", now.elapsed());

  tokio::time::timeout(Duration::from_secs(args.wait), async {
    while !input.ready_state().is_ready() {
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
  })
  .await
  .context("等待输入就绪超时")?;

  let frame = input.capture().ok_or_else(|| anyhow!("没有可用的输入帧"))?;

  let now = Instant::now();
  let result = model.detect(&frame).await?;
  info!("推理完成，耗时: {:.2?}, 检测到 {} 个对象", now.elapsed(), result.len());

  let overlay = plan_overlay(
    result,
    SurfaceSize::new(frame.width(), frame.height()),
    &OverlayStyle::default(),
  );
  output.render_result(&frame, &overlay)?;
  info!("渲染完成");

  Ok(())
}
