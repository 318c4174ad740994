// 该文件是 Tancha （探查） 项目的一部分。
// src/output/directory_record.rs - 按日期目录记录检测帧
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

use std::{
  path::{Path, PathBuf},
  sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  output::{
    Overlay, Render,
    draw::{Draw, Record},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

pub enum DrawWrapper {
  Draw(Draw),
  Record(Record),
  Json,
}

impl DrawWrapper {
  pub fn save_result(
    &self,
    path: &Path,
    frame: &RgbFrame,
    overlay: &Overlay,
  ) -> Result<(), DirectoryRecordOutputError> {
    match self {
      DrawWrapper::Draw(draw) => {
        draw.render_frame(frame, overlay).save(path)?;
      }
      DrawWrapper::Record(record) => {
        frame.to_rgb_image().save(path)?;
        record.record(&overlay.result, path)?;
      }
      DrawWrapper::Json => {
        frame.to_rgb_image().save(path)?;
        Record::record_json(&overlay.result, path)?;
      }
    };

    Ok(())
  }

  pub fn with(kind: &str) -> Self {
    match kind {
      "name" => DrawWrapper::Record(Record {
        label_with_name: true,
      }),
      "id" => DrawWrapper::Record(Record {
        label_with_name: false,
      }),
      "json" => DrawWrapper::Json,
      _ => DrawWrapper::Draw(Draw::default()),
    }
  }
}

/// folder:///data/records?record=name&always
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  frame_counters: Mutex<u16>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let kind = uri
      .query_pairs()
      .find(|(k, _)| k == "record")
      .map(|(_, v)| v.into_owned())
      .unwrap_or_else(|| "draw".to_string());

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw: DrawWrapper::with(&kind),
      frame_counters: Mutex::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  /// 只有绘制模式会用到字体
  pub fn with_draw(mut self, draw: Draw) -> Self {
    if let DrawWrapper::Draw(_) = self.draw {
      self.draw = DrawWrapper::Draw(draw);
    }
    self
  }

  fn frame_id(&self) -> u16 {
    let mut counter = self
      .frame_counters
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    *counter = counter.wrapping_add(1);
    *counter
  }

  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render<RgbFrame, Overlay> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbFrame, result: &Overlay) -> Result<(), Self::Error> {
    if !self.always && result.result.is_empty() {
      return Ok(());
    }
    let path = self.frame_path(Utc::now())?;
    self.draw.save_result(&path, frame, result)?;
    debug!("记录检测帧: {}", path.display());
    Ok(())
  }
}
