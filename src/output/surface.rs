// 该文件是 Tancha （探查） 项目的一部分。
// src/output/surface.rs - 叠加绘制层尺寸
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

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct SurfaceSize {
  pub width: u32,
  pub height: u32,
}

impl SurfaceSize {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }
}

/// 叠加层，尺寸跟随帧来源
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Surface {
  size: SurfaceSize,
  resizes: u64,
}

impl Surface {
  pub fn size(&self) -> SurfaceSize {
    self.size
  }

  /// 实际发生尺寸变化的次数
  pub fn resizes(&self) -> u64 {
    self.resizes
  }

  /// 调整尺寸，尺寸相同时不产生任何变化，返回是否发生了变化
  pub fn resize(&mut self, width: u32, height: u32) -> bool {
    let size = SurfaceSize::new(width, height);
    if self.size == size {
      return false;
    }
    self.size = size;
    self.resizes += 1;
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn resize_is_idempotent() {
    let mut once = Surface::default();
    assert!(once.resize(640, 480));

    let mut twice = Surface::default();
    twice.resize(640, 480);
    assert!(!twice.resize(640, 480));

    assert_eq!(once, twice);
    assert_eq!(twice.size(), SurfaceSize::new(640, 480));
    assert_eq!(twice.resizes(), 1);
  }

  #[test]
  fn resize_tracks_changes() {
    let mut surface = Surface::default();
    assert!(surface.size().is_empty());
    surface.resize(640, 480);
    surface.resize(1280, 720);
    assert_eq!(surface.resizes(), 2);
    assert_eq!(surface.size(), SurfaceSize::new(1280, 720));
  }
}
