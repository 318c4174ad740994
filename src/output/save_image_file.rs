// 该文件是 Tancha （探查） 项目的一部分。
// src/output/save_image_file.rs - 图像文件输出
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

use std::path::Path;

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  output::{Draw, Overlay, Render},
};

/// 每次检测覆盖写入同一个文件；`?overlay` 时只写透明叠加层
pub struct SaveImageFileOutput {
  path: String,
  draw: Draw,
  overlay_only: bool,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: uri.path().to_string(),
      draw: Draw::default(),
      overlay_only: uri.query_pairs().any(|(k, _)| k == "overlay"),
    })
  }
}

impl SaveImageFileOutput {
  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  fn prepare_parent(&self) -> Result<(), SaveImageFileError> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    Ok(())
  }
}

impl Render<RgbFrame, Overlay> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &RgbFrame, result: &Overlay) -> Result<(), Self::Error> {
    self.prepare_parent()?;
    if self.overlay_only {
      self.draw.render_layer(result).save(&self.path)?;
    } else {
      self.draw.render_frame(frame, result).save(&self.path)?;
    }
    debug!("保存图像到文件: {}", self.path);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{BBox, DetectResult, Detection},
    output::{OverlayStyle, SurfaceSize, plan_overlay},
  };

  fn overlay() -> Overlay {
    let result = DetectResult::from(vec![Detection {
      label: "person".to_string(),
      score: 0.93,
      bbox: BBox::new(4.0, 30.0, 20.0, 20.0),
    }]);
    plan_overlay(result, SurfaceSize::new(64, 64), &OverlayStyle::default())
  }

  #[test]
  fn writes_composited_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/live.png");
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    let frame = RgbFrame::with_shape(64, 64).unwrap();
    output.render_result(&frame, &overlay()).unwrap();

    let saved = image::open(&path).unwrap().into_rgb8();
    assert_eq!(saved.dimensions(), (64, 64));
    assert_ne!(saved.get_pixel(4, 40), &image::Rgb([0, 0, 0]));
    assert_eq!(saved.get_pixel(14, 40), &image::Rgb([0, 0, 0]));
  }

  #[test]
  fn overlay_only_keeps_transparency() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("overlay.png");
    let url = Url::parse(&format!("image://{}?overlay", path.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    output
      .render_result(&RgbFrame::with_shape(64, 64).unwrap(), &overlay())
      .unwrap();

    let saved = image::open(&path).unwrap().into_rgba8();
    assert_eq!(saved.get_pixel(14, 40)[3], 0);
    assert_eq!(saved.get_pixel(4, 40)[3], 255);
  }
}
