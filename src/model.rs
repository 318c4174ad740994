// 该文件是 Tancha （探查） 项目的一部分。
// src/model.rs - 检测模型
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

use std::future::Future;

use serde::Serialize;

use crate::frame::RgbFrame;

mod coco;
pub use self::coco::{COCO_UNKNOWN_LABEL, coco_label};

#[cfg(feature = "model_ssd")]
mod ssd;
#[cfg(feature = "model_ssd")]
pub use self::ssd::{SsdBuilder, SsdError, SsdModel};

/// 已加载的检测模型，加载后只读共享
pub trait Model: Send + Sync + 'static {
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect(
    &self,
    frame: &RgbFrame,
  ) -> impl Future<Output = Result<DetectResult, Self::Error>> + Send;
}

/// 模型加载器
pub trait ModelProvider: Send + 'static {
  type Model: Model;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(self) -> impl Future<Output = Result<Self::Model, Self::Error>> + Send;
}

/// 像素坐标下的边界框
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub label: String,
  pub score: f32,
  pub bbox: BBox,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// 置信度最高的检测结果
  pub fn best(&self) -> Option<&Detection> {
    self
      .items
      .iter()
      .max_by(|a, b| a.score.total_cmp(&b.score))
  }

  pub fn contains_label(&self, label: &str) -> bool {
    self.items.iter().any(|item| item.label == label)
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(label: &str, score: f32) -> Detection {
    Detection {
      label: label.to_string(),
      score,
      bbox: BBox::new(0.0, 0.0, 1.0, 1.0),
    }
  }

  #[test]
  fn best_picks_highest_score() {
    let result = DetectResult::from(vec![item("cup", 0.6), item("person", 0.93), item("dog", 0.7)]);
    assert_eq!(result.best().map(|d| d.label.as_str()), Some("person"));
    assert!(result.contains_label("dog"));
    assert!(!result.contains_label("cat"));
    assert_eq!(DetectResult::default().best(), None);
  }

  #[test]
  fn serializes_as_plain_json() {
    let result = DetectResult::from(vec![Detection {
      label: "person".to_string(),
      score: 0.5,
      bbox: BBox::new(10.0, 20.0, 100.0, 200.0),
    }]);
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["items"][0]["label"], "person");
    assert_eq!(json["items"][0]["bbox"]["width"], 100.0);
  }
}
