// 该文件是 Tancha （探查） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

use std::sync::Arc;

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {0}x{1}")]
  EmptyShape(u32, u32),
}

/// 按 NHWC 排布的 RGB 帧，像素数据共享，克隆开销很小
#[derive(Debug, Clone)]
pub struct RgbFrame {
  width: u32,
  height: u32,
  data: Arc<[u8]>,
}

impl RgbFrame {
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::EmptyShape(width, height));
    }
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into(),
    })
  }

  /// 纯黑帧
  pub fn with_shape(width: u32, height: u32) -> Result<Self, FrameError> {
    Self::from_raw(
      width,
      height,
      vec![0u8; RGB_CHANNELS * width as usize * height as usize],
    )
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    let width = self.width as usize;
    ImageBuffer::from_fn(self.width, self.height, |x, y| {
      let idx = (y as usize * width + x as usize) * RGB_CHANNELS;
      Rgb([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    })
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    // RgbImage 本身就是紧凑的 HWC 排布
    Self {
      width,
      height,
      data: image.into_raw().into(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_mismatched_length() {
    let err = RgbFrame::from_raw(2, 2, vec![0u8; 11]).unwrap_err();
    assert!(matches!(
      err,
      FrameError::LengthMismatch {
        expected: 12,
        actual: 11
      }
    ));
    assert!(RgbFrame::with_shape(0, 4).is_err());
  }

  #[test]
  fn image_conversion_keeps_pixel_layout() {
    let mut image = RgbImage::new(3, 2);
    image.put_pixel(2, 1, Rgb([10, 20, 30]));
    let frame = RgbFrame::from(image.clone());
    assert_eq!(frame.dimensions(), (3, 2));
    // 第 1 行第 2 列
    let idx = (3 + 2) * RGB_CHANNELS;
    assert_eq!(&frame.as_nhwc()[idx..idx + 3], &[10, 20, 30]);
    assert_eq!(frame.to_rgb_image(), image);
  }
}
