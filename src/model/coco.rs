// 该文件是 Tancha （探查） 项目的一部分。
// src/model/coco.rs - COCO 类别标签
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

pub const COCO_UNKNOWN_LABEL: &str = "unknown";

// TensorFlow 目标检测导出的 90 类编号，空字符串为未使用的编号
const COCO_LABELS: [&str; 91] = [
  "",
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "",
  "backpack",
  "umbrella",
  "",
  "",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "",
  "dining table",
  "",
  "",
  "toilet",
  "",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 类别编号转标签名
pub fn coco_label(class_id: u32) -> Option<&'static str> {
  COCO_LABELS
    .get(class_id as usize)
    .copied()
    .filter(|label| !label.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn maps_sparse_ids() {
    assert_eq!(coco_label(1), Some("person"));
    assert_eq!(coco_label(13), Some("stop sign"));
    assert_eq!(coco_label(90), Some("toothbrush"));
    assert_eq!(coco_label(12), None);
    assert_eq!(coco_label(0), None);
    assert_eq!(coco_label(91), None);
  }

  #[test]
  fn has_eighty_named_classes() {
    assert_eq!(COCO_LABELS.iter().filter(|l| !l.is_empty()).count(), 80);
  }
}
