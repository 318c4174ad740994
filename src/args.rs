// 该文件是 Tancha （探查） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Tancha 实时检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径
  /// - ssd:///models/ssd_mobilenet_v2.onnx?threshold=0.5&max=20&threads=1
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源
  /// - v4l:///dev/video0?width=640&height=480
  /// - image:///path/to/frame.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出路径
  /// - log://
  /// - image:///tmp/live.png[?overlay]
  /// - folder:///data/records[?record=draw|name|id|json&always]
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,

  /// 检测间隔（毫秒）
  #[arg(long, value_name = "MS", default_value_t = 20)]
  pub interval_ms: u64,

  /// 标签字体文件（TTF/OTF），不指定时不绘制文字
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 语音播报程序，例如 espeak-ng
  #[arg(long, value_name = "PROGRAM")]
  pub speech_command: Option<String>,

  /// 传给语音播报程序的参数，可重复
  #[arg(long, value_name = "ARG", allow_hyphen_values = true)]
  pub speech_arg: Vec<String>,

  /// 渲染指定帧数后退出
  #[arg(long, value_name = "COUNT")]
  pub frame_number: Option<u64>,

  /// 连续推理失败达到该次数后暂停
  #[arg(long, value_name = "COUNT")]
  pub max_failures: Option<u32>,
}
