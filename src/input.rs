// 该文件是 Tancha （探查） 项目的一部分。
// src/input.rs - 帧来源
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

use thiserror::Error;

use crate::{FromUrl, frame::RgbFrame};

/// 帧来源的就绪程度，只有 `HaveEnoughData` 才允许取帧
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadyState {
  HaveNothing = 0,
  HaveMetadata = 1,
  HaveCurrentData = 2,
  HaveFutureData = 3,
  HaveEnoughData = 4,
}

impl ReadyState {
  pub fn is_ready(self) -> bool {
    self == ReadyState::HaveEnoughData
  }

  pub(crate) fn from_u8(value: u8) -> Self {
    match value {
      4 => ReadyState::HaveEnoughData,
      3 => ReadyState::HaveFutureData,
      2 => ReadyState::HaveCurrentData,
      1 => ReadyState::HaveMetadata,
      _ => ReadyState::HaveNothing,
    }
  }
}

/// 可轮询的实时帧来源
pub trait FrameSource: Send + Sync {
  fn ready_state(&self) -> ReadyState;

  /// 当前帧尺寸 (宽, 高)，未知时为 `None`
  fn dimensions(&self) -> Option<(u32, u32)>;

  /// 取当前帧，没有可用帧时返回 `None`
  fn capture(&self) -> Option<RgbFrame>;
}

impl<S: FrameSource + ?Sized> FrameSource for std::sync::Arc<S> {
  fn ready_state(&self) -> ReadyState {
    (**self).ready_state()
  }

  fn dimensions(&self) -> Option<(u32, u32)> {
    (**self).dimensions()
  }

  fn capture(&self) -> Option<RgbFrame> {
    (**self).capture()
  }
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l_input")]
mod v4l_input;
#[cfg(feature = "v4l_input")]
pub use self::v4l_input::{V4lInput, V4lInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L input error: {0}")]
  V4lInputError(#[from] V4lInputError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l_input")]
  V4l(V4lInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lInput::SCHEME {
        let input = V4lInput::from_url(url)?;
        return Ok(InputWrapper::V4l(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSource for InputWrapper {
  fn ready_state(&self) -> ReadyState {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.ready_state(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.ready_state(),
    }
  }

  fn dimensions(&self) -> Option<(u32, u32)> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.dimensions(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.dimensions(),
    }
  }

  fn capture(&self) -> Option<RgbFrame> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.capture(),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l(input) => input.capture(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_enough_data_is_ready() {
    assert!(ReadyState::HaveEnoughData.is_ready());
    assert!(!ReadyState::HaveFutureData.is_ready());
    assert!(!ReadyState::HaveNothing.is_ready());
    assert!(ReadyState::HaveMetadata < ReadyState::HaveEnoughData);
    assert_eq!(ReadyState::from_u8(4), ReadyState::HaveEnoughData);
    assert_eq!(ReadyState::from_u8(9), ReadyState::HaveNothing);
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = url::Url::parse("rtsp://camera.local/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(scheme)) if scheme == "rtsp"
    ));
  }
}
