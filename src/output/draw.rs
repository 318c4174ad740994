// 该文件是 Tancha （探查） 项目的一部分。
// src/output/draw.rs - 叠加层绘制
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

use ab_glyph::{FontArc, PxScale};
use image::{DynamicImage, Rgba, RgbImage, RgbaImage, imageops};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};

use crate::{
  frame::RgbFrame,
  model::DetectResult,
  output::surface::SurfaceSize,
};

const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LINE_WIDTH: u32 = 2;
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

/// 绘制指令，与具体画布无关
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
  /// 清空整个叠加层
  Clear,
  StrokeRect {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    color: [u8; 3],
    line_width: u32,
  },
  FillRect {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    color: [u8; 3],
  },
  Text {
    x: i32,
    y: i32,
    text: String,
    color: [u8; 3],
    size: f32,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStyle {
  pub font_size: f32,
  pub label_text_height: i32,
  pub label_char_width: f32,
  pub label_text_vertical_padding: i32,
  pub line_width: u32,
}

impl Default for OverlayStyle {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      line_width: LINE_WIDTH,
    }
  }
}

/// 一次检测对应的叠加层内容
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
  pub result: DetectResult,
  pub surface: SurfaceSize,
  pub commands: Vec<DrawCommand>,
}

/// 由检测结果和叠加层尺寸生成绘制指令
pub fn plan_overlay(result: DetectResult, surface: SurfaceSize, style: &OverlayStyle) -> Overlay {
  let mut commands = vec![DrawCommand::Clear];

  if !surface.is_empty() {
    let (w, h) = (surface.width as i32, surface.height as i32);

    for item in result.items.iter() {
      let bbox = &item.bbox;
      let x_min = (bbox.x.floor() as i32).clamp(0, w - 1);
      let y_min = (bbox.y.floor() as i32).clamp(0, h - 1);
      let x_max = ((bbox.x + bbox.width).ceil() as i32).clamp(0, w - 1);
      let y_max = ((bbox.y + bbox.height).ceil() as i32).clamp(0, h - 1);

      if x_min >= x_max || y_min >= y_max {
        continue;
      }

      let color = label_color(&item.label);
      commands.push(DrawCommand::StrokeRect {
        x: x_min,
        y: y_min,
        width: (x_max - x_min + 1) as u32,
        height: (y_max - y_min + 1) as u32,
        color,
        line_width: style.line_width,
      });

      // 标签放在边框上方，超出顶部时贴边
      let text = format!("{} {:.2}", item.label, item.score);
      let text_width = (text.chars().count() as f32 * style.label_char_width) as i32;
      let label_x = x_min;
      let label_y = (y_min - style.label_text_height).max(0);
      let label_width = text_width.min(w - label_x);

      if label_width > 0 && style.label_text_height > 0 {
        commands.push(DrawCommand::FillRect {
          x: label_x,
          y: label_y,
          width: label_width as u32,
          height: style.label_text_height as u32,
          color,
        });
        commands.push(DrawCommand::Text {
          x: label_x,
          y: label_y + style.label_text_vertical_padding,
          text,
          color: TEXT_COLOR,
          size: style.font_size,
        });
      }
    }
  }

  Overlay {
    result,
    surface,
    commands,
  }
}

/// 同一标签始终使用同一颜色
pub fn label_color(label: &str) -> [u8; 3] {
  // FNV-1a
  let hash = label
    .bytes()
    .fold(0x811c9dc5u32, |h, b| (h ^ b as u32).wrapping_mul(0x01000193));
  hsv_to_rgb((hash % 360) as f32, 0.8, 0.9)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  [
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ]
}

/// 执行绘制指令，没有字体时跳过文字
#[derive(Clone, Default)]
pub struct Draw {
  font: Option<FontArc>,
}

impl Draw {
  pub fn with_font(font: FontArc) -> Self {
    Self { font: Some(font) }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn paint(&self, canvas: &mut RgbaImage, commands: &[DrawCommand]) {
    for command in commands {
      match command {
        DrawCommand::Clear => {
          canvas.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));
        }
        DrawCommand::StrokeRect {
          x,
          y,
          width,
          height,
          color,
          line_width,
        } => {
          for t in 0..*line_width {
            if *width <= 2 * t || *height <= 2 * t {
              break;
            }
            let rect = Rect::at(x + t as i32, y + t as i32).of_size(width - 2 * t, height - 2 * t);
            draw_hollow_rect_mut(canvas, rect, opaque(*color));
          }
        }
        DrawCommand::FillRect {
          x,
          y,
          width,
          height,
          color,
        } => {
          if *width > 0 && *height > 0 {
            draw_filled_rect_mut(canvas, Rect::at(*x, *y).of_size(*width, *height), opaque(*color));
          }
        }
        DrawCommand::Text {
          x,
          y,
          text,
          color,
          size,
        } => {
          if let Some(font) = &self.font {
            draw_text_mut(canvas, opaque(*color), *x, *y, PxScale::from(*size), font, text);
          }
        }
      }
    }
  }

  /// 只绘制透明叠加层
  pub fn render_layer(&self, overlay: &Overlay) -> RgbaImage {
    let mut layer = RgbaImage::new(overlay.surface.width, overlay.surface.height);
    self.paint(&mut layer, &overlay.commands);
    layer
  }

  /// 把叠加层合成到帧上
  pub fn render_frame(&self, frame: &RgbFrame, overlay: &Overlay) -> RgbImage {
    let mut base = DynamicImage::ImageRgb8(frame.to_rgb_image()).to_rgba8();
    let layer = self.render_layer(overlay);
    imageops::overlay(&mut base, &layer, 0, 0);
    DynamicImage::ImageRgba8(base).to_rgb8()
  }
}

fn opaque(color: [u8; 3]) -> Rgba<u8> {
  Rgba([color[0], color[1], color[2], 255])
}

pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn record(&self, result: &DetectResult, path: &std::path::Path) -> Result<(), std::io::Error> {
    let records: Vec<String> = result
      .items
      .iter()
      .enumerate()
      .map(|(index, item)| {
        let name = if self.label_with_name {
          item.label.clone()
        } else {
          index.to_string()
        };
        format!(
          "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
          name, item.score, item.bbox.x, item.bbox.y, item.bbox.width, item.bbox.height
        )
      })
      .collect();
    std::fs::write(path.with_extension("txt"), records.join("\n"))
  }

  pub fn record_json(result: &DetectResult, path: &std::path::Path) -> Result<(), std::io::Error> {
    let json = serde_json::to_string_pretty(result).map_err(std::io::Error::other)?;
    std::fs::write(path.with_extension("json"), json)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BBox, Detection};

  fn person() -> DetectResult {
    DetectResult::from(vec![Detection {
      label: "person".to_string(),
      score: 0.93,
      bbox: BBox::new(10.0, 20.0, 100.0, 200.0),
    }])
  }

  #[test]
  fn plans_box_and_label() {
    let overlay = plan_overlay(person(), SurfaceSize::new(640, 480), &OverlayStyle::default());
    assert_eq!(overlay.commands[0], DrawCommand::Clear);
    let color = label_color("person");
    assert_eq!(
      overlay.commands[1],
      DrawCommand::StrokeRect {
        x: 10,
        y: 20,
        width: 101,
        height: 201,
        color,
        line_width: LINE_WIDTH,
      }
    );
    // 标签在框上方，顶部不足时贴边
    assert!(matches!(
      overlay.commands[2],
      DrawCommand::FillRect { x: 10, y: 0, .. }
    ));
    assert!(matches!(
      &overlay.commands[3],
      DrawCommand::Text { text, .. } if text == "person 0.93"
    ));
  }

  #[test]
  fn empty_surface_only_clears() {
    let overlay = plan_overlay(person(), SurfaceSize::default(), &OverlayStyle::default());
    assert_eq!(overlay.commands, vec![DrawCommand::Clear]);
  }

  #[test]
  fn boxes_outside_surface_are_skipped() {
    let result = DetectResult::from(vec![Detection {
      label: "cat".to_string(),
      score: 0.8,
      bbox: BBox::new(700.0, 500.0, 50.0, 50.0),
    }]);
    let overlay = plan_overlay(result, SurfaceSize::new(640, 480), &OverlayStyle::default());
    assert_eq!(overlay.commands.len(), 1);
  }

  #[test]
  fn label_color_is_stable() {
    assert_eq!(label_color("dog"), label_color("dog"));
    assert_ne!(label_color("dog"), label_color("person"));
  }

  #[test]
  fn paints_box_edges_onto_layer() {
    let overlay = plan_overlay(person(), SurfaceSize::new(640, 480), &OverlayStyle::default());
    let layer = Draw::default().render_layer(&overlay);
    let color = opaque(label_color("person"));
    assert_eq!(layer.get_pixel(10, 100), &color);
    assert_eq!(layer.get_pixel(110, 100), &color);
    // 框内部保持透明
    assert_eq!(layer.get_pixel(60, 100)[3], 0);
  }

  #[test]
  fn composite_keeps_frame_outside_overlay() {
    let frame = RgbFrame::from(RgbImage::from_pixel(64, 48, image::Rgb([5, 6, 7])));
    let overlay = plan_overlay(DetectResult::default(), SurfaceSize::new(64, 48), &OverlayStyle::default());
    let image = Draw::default().render_frame(&frame, &overlay);
    assert_eq!(image.get_pixel(30, 30), &image::Rgb([5, 6, 7]));
  }

  #[test]
  fn record_writes_text_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    Record {
      label_with_name: true,
    }
    .record(&person(), &path)
    .unwrap();
    let text = std::fs::read_to_string(dir.path().join("frame.txt")).unwrap();
    assert_eq!(text, "person, 0.9300, 10.0, 20.0, 100.0, 200.0");

    Record::record_json(&person(), &path).unwrap();
    let json: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(dir.path().join("frame.json")).unwrap()).unwrap();
    assert_eq!(json["items"][0]["label"], "person");
  }
}
