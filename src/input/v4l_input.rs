// 该文件是 Tancha （探查） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
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
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicU8, Ordering},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;
use v4l::{FourCC, io::traits::CaptureStream, video::Capture};

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  input::{FrameSource, ReadyState},
  query_param,
};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
const RETRY_DELAY: Duration = Duration::from_millis(200);
/// 出队等待上限，超时后重新检查运行标记
const CAPTURE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
  #[error("Frame decode error: {0}")]
  DecodeError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Rgb3,
  Yuyv,
  Mjpg,
}

impl PixelFormat {
  fn from_fourcc(fourcc: FourCC) -> Option<Self> {
    match &fourcc.repr {
      b"RGB3" => Some(PixelFormat::Rgb3),
      b"YUYV" => Some(PixelFormat::Yuyv),
      b"MJPG" => Some(PixelFormat::Mjpg),
      _ => None,
    }
  }

  fn decode(self, buf: &[u8], width: u32, height: u32) -> Result<RgbFrame, V4lInputError> {
    let pixels = width as usize * height as usize;
    let data = match self {
      PixelFormat::Rgb3 => {
        if buf.len() < pixels * 3 {
          return Err(V4lInputError::DecodeError(format!(
            "RGB3 缓冲区过短: {} < {}",
            buf.len(),
            pixels * 3
          )));
        }
        buf[..pixels * 3].to_vec()
      }
      PixelFormat::Yuyv => yuyv_to_rgb(buf, width, height)?,
      PixelFormat::Mjpg => {
        let image = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
          .map_err(|e| V4lInputError::DecodeError(e.to_string()))?
          .into_rgb8();
        if image.dimensions() != (width, height) {
          return Err(V4lInputError::DecodeError(format!(
            "MJPG 帧尺寸 {}x{} 与协商尺寸 {}x{} 不一致",
            image.width(),
            image.height(),
            width,
            height
          )));
        }
        return Ok(RgbFrame::from(image));
      }
    };
    RgbFrame::from_raw(width, height, data).map_err(|e| V4lInputError::DecodeError(e.to_string()))
  }
}

/// YUYV 4:2:2 转 RGB24 (BT.601)
fn yuyv_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, V4lInputError> {
  let pixels = width as usize * height as usize;
  if width % 2 != 0 || buf.len() < pixels * 2 {
    return Err(V4lInputError::DecodeError(format!(
      "YUYV 缓冲区无效: {} 字节, {}x{}",
      buf.len(),
      width,
      height
    )));
  }

  let mut rgb = Vec::with_capacity(pixels * 3);
  for chunk in buf[..pixels * 2].chunks_exact(4) {
    let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
    for y in [y0, y1] {
      let c = y as f32 - 16.0;
      let d = u as f32 - 128.0;
      let e = v as f32 - 128.0;
      rgb.push((1.164 * c + 1.596 * e).clamp(0.0, 255.0) as u8);
      rgb.push((1.164 * c - 0.392 * d - 0.813 * e).clamp(0.0, 255.0) as u8);
      rgb.push((1.164 * c + 2.017 * d).clamp(0.0, 255.0) as u8);
    }
  }
  Ok(rgb)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureFailure {
  Timeout,
  Device,
}

impl CaptureFailure {
  fn of(e: &std::io::Error) -> Self {
    match e.kind() {
      std::io::ErrorKind::TimedOut => CaptureFailure::Timeout,
      _ => CaptureFailure::Device,
    }
  }
}

struct Shared {
  state: AtomicU8,
  running: AtomicBool,
  latest: Mutex<Option<RgbFrame>>,
}

/// 后台线程持续采集，只保留最新一帧
pub struct V4lInput {
  shared: Arc<Shared>,
  width: u32,
  height: u32,
  worker: Option<JoinHandle<()>>,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    // v4l:///dev/video0?width=640&height=480
    let device_path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };
    let width = query_param(url, "width").unwrap_or(DEFAULT_WIDTH);
    let height = query_param(url, "height").unwrap_or(DEFAULT_HEIGHT);

    V4lInput::open(&device_path, width, height)
  }
}

impl V4lInput {
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, V4lInputError> {
    info!("打开摄像头 {}", device_path);
    let device = v4l::Device::with_path(device_path)?;

    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;

    let pixel_format = PixelFormat::from_fourcc(format.fourcc).ok_or_else(|| {
      V4lInputError::UnsupportedPixelFormat(
        format
          .fourcc
          .str()
          .map(str::to_string)
          .unwrap_or_else(|_| format!("{:?}", format.fourcc.repr)),
      )
    })?;
    info!(
      "摄像头格式: {}x{} {:?}",
      format.width, format.height, pixel_format
    );

    let shared = Arc::new(Shared {
      state: AtomicU8::new(ReadyState::HaveMetadata as u8),
      running: AtomicBool::new(true),
      latest: Mutex::new(None),
    });

    let worker = {
      let shared = shared.clone();
      let (width, height) = (format.width, format.height);
      thread::Builder::new()
        .name("v4l-capture".to_string())
        .spawn(move || capture_loop(device, pixel_format, width, height, &shared))?
    };

    Ok(V4lInput {
      shared,
      width: format.width,
      height: format.height,
      worker: Some(worker),
    })
  }
}

fn capture_loop(
  mut device: v4l::Device,
  pixel_format: PixelFormat,
  width: u32,
  height: u32,
  shared: &Shared,
) {
  while shared.running.load(Ordering::Acquire) {
    let mut stream =
      match v4l::io::mmap::Stream::with_buffers(&mut device, v4l::buffer::Type::VideoCapture, STREAM_BUFFERS) {
        Ok(stream) => stream,
        Err(e) => {
          error!("创建采集流失败: {}", e);
          shared
            .state
            .store(ReadyState::HaveMetadata as u8, Ordering::Release);
          thread::sleep(RETRY_DELAY);
          continue;
        }
      };
    stream.set_timeout(CAPTURE_TIMEOUT);

    while shared.running.load(Ordering::Acquire) {
      let buf = match stream.next() {
        Ok((buf, _meta)) => buf,
        // 超时的缓冲区仍在驱动队列中，mmap 流无法接着出队，只能重建
        Err(e) if CaptureFailure::of(&e) == CaptureFailure::Timeout => {
          debug!("{:?} 内没有新帧", CAPTURE_TIMEOUT);
          break;
        }
        Err(e) => {
          warn!("采集帧失败: {}", e);
          shared
            .state
            .store(ReadyState::HaveMetadata as u8, Ordering::Release);
          break;
        }
      };

      match pixel_format.decode(buf, width, height) {
        Ok(frame) => {
          *shared.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
          shared
            .state
            .store(ReadyState::HaveEnoughData as u8, Ordering::Release);
        }
        Err(e) => debug!("丢弃无法解码的帧: {}", e),
      }
    }
  }
  info!("摄像头采集线程退出");
}

impl FrameSource for V4lInput {
  fn ready_state(&self) -> ReadyState {
    ReadyState::from_u8(self.shared.state.load(Ordering::Acquire))
  }

  fn dimensions(&self) -> Option<(u32, u32)> {
    Some((self.width, self.height))
  }

  fn capture(&self) -> Option<RgbFrame> {
    self
      .shared
      .latest
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
}

impl Drop for V4lInput {
  fn drop(&mut self) {
    self.shared.running.store(false, Ordering::Release);
    if let Some(worker) = self.worker.take()
      && worker.join().is_err()
    {
      error!("摄像头采集线程异常退出");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yuyv_gray_maps_to_gray() {
    // Y=128, U=V=128 为中灰
    let buf = [128u8, 128, 128, 128];
    let rgb = yuyv_to_rgb(&buf, 2, 1).unwrap();
    assert_eq!(rgb.len(), 6);
    assert!(rgb.iter().all(|&c| (128..=131).contains(&c)));
  }

  #[test]
  fn yuyv_rejects_short_buffer() {
    assert!(yuyv_to_rgb(&[0u8; 6], 2, 2).is_err());
    assert!(yuyv_to_rgb(&[0u8; 6], 3, 1).is_err());
  }

  #[test]
  fn fourcc_detection() {
    assert_eq!(
      PixelFormat::from_fourcc(FourCC::new(b"MJPG")),
      Some(PixelFormat::Mjpg)
    );
    assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"NV12")), None);
  }

  fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height))
      .write_to(&mut buf, image::ImageFormat::Jpeg)
      .unwrap();
    buf.into_inner()
  }

  #[test]
  fn mjpg_decode_checks_negotiated_size() {
    let buf = jpeg(8, 4);
    let frame = PixelFormat::Mjpg.decode(&buf, 8, 4).unwrap();
    assert_eq!(frame.dimensions(), (8, 4));
    assert!(matches!(
      PixelFormat::Mjpg.decode(&buf, 640, 480),
      Err(V4lInputError::DecodeError(_))
    ));
  }

  #[test]
  fn capture_timeout_is_not_a_device_failure() {
    let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "VIDIOC_DQBUF");
    assert_eq!(CaptureFailure::of(&timeout), CaptureFailure::Timeout);
    let gone = std::io::Error::from_raw_os_error(19);
    assert_eq!(CaptureFailure::of(&gone), CaptureFailure::Device);
  }

  #[test]
  fn rgb3_decode_checks_length() {
    assert!(PixelFormat::Rgb3.decode(&[0u8; 5], 1, 2).is_err());
    let frame = PixelFormat::Rgb3.decode(&[9u8; 6], 1, 2).unwrap();
    assert_eq!(frame.dimensions(), (1, 2));
  }
}
