// 该文件是 Tancha （探查） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  input::{FrameSource, ReadyState},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 以静态图片模拟一路始终就绪的视频
pub struct ImageFileInput {
  frame: RgbFrame,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = url.path();
    let image = ImageReader::open(path)?.decode()?.into_rgb8();
    info!("读取图片 {}: {}x{}", path, image.width(), image.height());

    Ok(ImageFileInput {
      frame: RgbFrame::from(image),
    })
  }
}

impl ImageFileInput {
  pub fn from_frame(frame: RgbFrame) -> Self {
    Self { frame }
  }
}

impl FrameSource for ImageFileInput {
  fn ready_state(&self) -> ReadyState {
    ReadyState::HaveEnoughData
  }

  fn dimensions(&self) -> Option<(u32, u32)> {
    Some(self.frame.dimensions())
  }

  fn capture(&self) -> Option<RgbFrame> {
    Some(self.frame.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_image_and_is_always_ready() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("still.png");
    image::RgbImage::from_pixel(8, 6, image::Rgb([1, 2, 3]))
      .save(&path)
      .unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&format!("image://{}", url.path())).unwrap();
    let input = ImageFileInput::from_url(&url).unwrap();

    assert!(input.ready_state().is_ready());
    assert_eq!(input.dimensions(), Some((8, 6)));
    let frame = input.capture().unwrap();
    assert_eq!(&frame.as_nhwc()[..3], &[1, 2, 3]);
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("file:///tmp/a.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }
}
