// 该文件是 Tancha （探查） 项目的一部分。
// src/model/ssd.rs - COCO SSD 检测模型 (ONNX Runtime)
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
  fmt::Display,
  sync::{Arc, Mutex, PoisonError},
  time::Instant,
};

use ort::{
  session::{Session, SessionOutputs},
  value::Tensor,
};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{RGB_CHANNELS, RgbFrame},
  model::{BBox, COCO_UNKNOWN_LABEL, DetectResult, Detection, Model, ModelProvider, coco_label},
  query_param,
};

// 与 COCO-SSD 的默认参数一致
const SSD_MIN_SCORE: f32 = 0.5;
const SSD_MAX_BOXES: usize = 20;
const SSD_INTRA_THREADS: usize = 1;

const OUTPUT_BOXES: &str = "detection_boxes";
const OUTPUT_CLASSES: &str = "detection_classes";
const OUTPUT_SCORES: &str = "detection_scores";
const OUTPUT_COUNT: &str = "num_detections";

#[derive(Error, Debug)]
pub enum SsdError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("ONNX Runtime 错误: {0}")]
  RuntimeError(String),
  #[error("推理线程错误: {0}")]
  JoinError(#[from] tokio::task::JoinError),
}

impl SsdError {
  fn runtime(err: impl Display) -> Self {
    SsdError::RuntimeError(err.to_string())
  }
}

pub struct SsdBuilder {
  model_path: String,
  min_score: f32,
  max_boxes: usize,
  intra_threads: usize,
}

impl FromUrlWithScheme for SsdBuilder {
  const SCHEME: &'static str = "ssd";
}

impl FromUrl for SsdBuilder {
  type Error = SsdError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SsdError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(SsdBuilder {
      model_path: url.path().to_string(),
      min_score: query_param(url, "threshold").unwrap_or(SSD_MIN_SCORE),
      max_boxes: query_param(url, "max").unwrap_or(SSD_MAX_BOXES),
      intra_threads: query_param(url, "threads").unwrap_or(SSD_INTRA_THREADS),
    })
  }
}

impl SsdBuilder {
  pub fn min_score(mut self, min_score: f32) -> Self {
    self.min_score = min_score;
    self
  }

  pub fn max_boxes(mut self, max_boxes: usize) -> Self {
    self.max_boxes = max_boxes;
    self
  }

  pub fn build(self) -> Result<SsdModel, SsdError> {
    info!("加载模型文件: {}", self.model_path);
    let now = Instant::now();

    let session = Session::builder()
      .map_err(SsdError::runtime)?
      .with_intra_threads(self.intra_threads)
      .map_err(SsdError::runtime)?
      .commit_from_file(&self.model_path)
      .map_err(SsdError::runtime)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .ok_or_else(|| SsdError::ModelInvalid("模型没有输入".to_string()))?;

    let output_names: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
    debug!("模型输入: {}, 模型输出: {:?}", input_name, output_names);
    let outputs = OutputNames {
      boxes: find_output(&output_names, OUTPUT_BOXES)?,
      classes: find_output(&output_names, OUTPUT_CLASSES)?,
      scores: find_output(&output_names, OUTPUT_SCORES)?,
      count: find_output(&output_names, OUTPUT_COUNT).ok(),
    };

    info!("模型加载完成，耗时: {:.2?}", now.elapsed());

    Ok(SsdModel {
      inner: Arc::new(SsdInner {
        session: Mutex::new(session),
        input_name,
        outputs,
        min_score: self.min_score,
        max_boxes: self.max_boxes,
      }),
    })
  }
}

impl ModelProvider for SsdBuilder {
  type Model = SsdModel;
  type Error = SsdError;

  async fn load(self) -> Result<SsdModel, SsdError> {
    tokio::task::spawn_blocking(move || self.build()).await?
  }
}

/// 导出的名称可能带有 `:0` 之类的后缀，按前缀匹配
fn find_output(names: &[&str], prefix: &str) -> Result<String, SsdError> {
  names
    .iter()
    .find(|name| name.starts_with(prefix))
    .map(|name| name.to_string())
    .ok_or_else(|| {
      error!("模型缺少输出 {}", prefix);
      SsdError::ModelInvalid(format!("缺少输出 {}", prefix))
    })
}

struct OutputNames {
  boxes: String,
  classes: String,
  scores: String,
  count: Option<String>,
}

struct SsdInner {
  session: Mutex<Session>,
  input_name: String,
  outputs: OutputNames,
  min_score: f32,
  max_boxes: usize,
}

#[derive(Clone)]
pub struct SsdModel {
  inner: Arc<SsdInner>,
}

impl SsdInner {
  fn run(&self, frame: &RgbFrame) -> Result<DetectResult, SsdError> {
    let (width, height) = frame.dimensions();
    let shape = [1usize, height as usize, width as usize, RGB_CHANNELS];
    let input = Tensor::from_array((shape, frame.as_nhwc().to_vec().into_boxed_slice()))
      .map_err(SsdError::runtime)?
      .into_dyn();

    let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
    debug!("执行模型推理");
    let outputs = session
      .run(ort::inputs![self.input_name.as_str() => input])
      .map_err(SsdError::runtime)?;

    let boxes = extract_f32(&outputs, &self.outputs.boxes)?;
    let classes = extract_f32(&outputs, &self.outputs.classes)?;
    let scores = extract_f32(&outputs, &self.outputs.scores)?;
    let count = match &self.outputs.count {
      Some(name) => extract_f32(&outputs, name)?
        .first()
        .map(|&n| n.max(0.0) as usize),
      None => None,
    };

    Ok(decode_detections(
      &RawDetections {
        boxes: &boxes,
        classes: &classes,
        scores: &scores,
        count,
      },
      width,
      height,
      self.min_score,
      self.max_boxes,
    ))
  }
}

fn extract_f32(outputs: &SessionOutputs<'_>, name: &str) -> Result<Vec<f32>, SsdError> {
  let (_, value) = outputs
    .iter()
    .find(|(key, _)| *key == name)
    .ok_or_else(|| SsdError::ModelInvalid(format!("推理结果缺少 {}", name)))?;
  let (_shape, data) = value
    .try_extract_tensor::<f32>()
    .map_err(SsdError::runtime)?;
  Ok(data.to_vec())
}

impl Model for SsdModel {
  type Error = SsdError;

  async fn detect(&self, frame: &RgbFrame) -> Result<DetectResult, SsdError> {
    let inner = self.inner.clone();
    let frame = frame.clone();
    let now = Instant::now();
    let result = tokio::task::spawn_blocking(move || inner.run(&frame)).await??;
    debug!("推理完成，耗时: {:.2?}, 检测到 {} 个物体", now.elapsed(), result.len());
    Ok(result)
  }
}

/// 模型原始输出，框为归一化的 [ymin, xmin, ymax, xmax]
pub(crate) struct RawDetections<'a> {
  pub boxes: &'a [f32],
  pub classes: &'a [f32],
  pub scores: &'a [f32],
  pub count: Option<usize>,
}

pub(crate) fn decode_detections(
  raw: &RawDetections<'_>,
  width: u32,
  height: u32,
  min_score: f32,
  max_boxes: usize,
) -> DetectResult {
  let (w, h) = (width as f32, height as f32);
  let available = raw
    .scores
    .len()
    .min(raw.classes.len())
    .min(raw.boxes.len() / 4);
  let count = raw.count.map_or(available, |n| n.min(available));

  let mut items: Vec<Detection> = (0..count)
    .filter(|&i| raw.scores[i] >= min_score)
    .filter_map(|i| {
      let b = &raw.boxes[i * 4..i * 4 + 4];
      let ymin = b[0].clamp(0.0, 1.0) * h;
      let xmin = b[1].clamp(0.0, 1.0) * w;
      let ymax = b[2].clamp(0.0, 1.0) * h;
      let xmax = b[3].clamp(0.0, 1.0) * w;
      if xmax <= xmin || ymax <= ymin {
        return None;
      }

      let label = coco_label(raw.classes[i].round() as u32).unwrap_or(COCO_UNKNOWN_LABEL);
      Some(Detection {
        label: label.to_string(),
        score: raw.scores[i],
        bbox: BBox::new(xmin, ymin, xmax - xmin, ymax - ymin),
      })
    })
    .collect();

  items.sort_by(|a, b| b.score.total_cmp(&a.score));
  items.truncate(max_boxes);
  DetectResult::from(items)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_normalized_boxes_into_pixels() {
    let boxes = [0.1, 0.25, 0.5, 0.75, 0.0, 0.0, 1.0, 1.0];
    let raw = RawDetections {
      boxes: &boxes,
      classes: &[1.0, 18.0],
      scores: &[0.93, 0.2],
      count: Some(2),
    };
    let result = decode_detections(&raw, 640, 480, 0.5, 20);
    assert_eq!(result.len(), 1);
    let person = &result.items[0];
    assert_eq!(person.label, "person");
    assert_eq!(person.bbox, BBox::new(160.0, 48.0, 320.0, 192.0));
  }

  #[test]
  fn respects_count_max_and_unknown_ids() {
    let boxes = [0.0, 0.0, 0.5, 0.5].repeat(3);
    let raw = RawDetections {
      boxes: &boxes,
      classes: &[12.0, 3.0, 1.0],
      scores: &[0.6, 0.9, 0.99],
      count: Some(2),
    };
    let result = decode_detections(&raw, 100, 100, 0.5, 1);
    assert_eq!(result.len(), 1);
    assert_eq!(result.items[0].label, "car");

    let result = decode_detections(&raw, 100, 100, 0.5, 20);
    assert_eq!(result.items[1].label, COCO_UNKNOWN_LABEL);
  }

  #[test]
  fn drops_degenerate_boxes() {
    let raw = RawDetections {
      boxes: &[0.5, 0.5, 0.5, 0.9],
      classes: &[1.0],
      scores: &[0.9],
      count: None,
    };
    assert!(decode_detections(&raw, 10, 10, 0.1, 5).is_empty());
  }

  #[test]
  fn url_sets_thresholds() {
    let url = Url::parse("ssd:///models/ssd_mobilenet.onnx?threshold=0.3&max=5").unwrap();
    let builder = SsdBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, "/models/ssd_mobilenet.onnx");
    assert_eq!(builder.min_score, 0.3);
    assert_eq!(builder.max_boxes, 5);
    assert!(SsdBuilder::from_url(&Url::parse("yolo:///m.onnx").unwrap()).is_err());
  }

  #[test]
  fn output_names_match_by_prefix() {
    let names = ["detection_boxes:0", "detection_scores:0"];
    assert_eq!(find_output(&names, OUTPUT_BOXES).unwrap(), "detection_boxes:0");
    assert!(find_output(&names, OUTPUT_CLASSES).is_err());
  }
}
