// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage, imageops};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{frame::Frame, model::Detection};

const BOX_THICKNESS: u32 = 2;
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_PADDING: u32 = 2;
const LABEL_TEXT_COLOR: [u8; 3] = [255, 255, 255];
const SEPARATOR_WIDTH: u32 = 4;
const SEPARATOR_COLOR: [u8; 3] = [255, 255, 255];

// 按类别编号循环取色
const PALETTE: [[u8; 3]; 6] = [
  [255, 128, 0],
  [0, 200, 255],
  [0, 255, 0],
  [255, 0, 255],
  [255, 255, 0],
  [0, 0, 255],
];

#[derive(Error, Debug)]
pub enum FontError {
  #[error("读取字体文件失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  Invalid(#[from] ab_glyph::InvalidFont),
}

/// 框上方的标签文本，如 `basketball 0.8765`
pub fn label_text(det: &Detection) -> String {
  format!("{} {:.4}", det.class_name, det.score)
}

/// 未加载字体时只画框
pub struct Draw {
  thickness: u32,
  palette: Vec<[u8; 3]>,
  font: Option<FontVec>,
  font_size: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      thickness: BOX_THICKNESS,
      palette: PALETTE.to_vec(),
      font: None,
      font_size: LABEL_FONT_SIZE,
    }
  }
}

impl Draw {
  pub fn with_font(mut self, font: FontVec) -> Self {
    self.font = Some(font);
    self
  }

  pub fn load_font(path: impl AsRef<Path>) -> Result<FontVec, FontError> {
    let path = path.as_ref();
    let font = FontVec::try_from_vec(std::fs::read(path)?)?;
    info!("加载标签字体: {}", path.display());
    Ok(font)
  }

  /// 读取输出 URI 的 `font=<path>` 参数
  pub fn from_url(url: &Url) -> Result<Self, FontError> {
    let draw = Self::default();
    match url.query_pairs().find(|(k, _)| k == "font") {
      Some((_, path)) => Ok(draw.with_font(Self::load_font(&*path)?)),
      None => Ok(draw),
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn color(&self, class_id: usize) -> [u8; 3] {
    self.palette[class_id % self.palette.len()]
  }

  // bbox 为原图像素坐标，超出部分截断
  fn draw_bbox(&self, image: &mut RgbImage, bbox: &[f32; 4], color: [u8; 3]) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);

    for t in 0..self.thickness as i32 {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }
  }

  // 标签画在框上方，贴顶时画在框内
  fn draw_label(&self, image: &mut RgbImage, det: &Detection, color: [u8; 3]) {
    let Some(font) = &self.font else {
      return;
    };
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let text = label_text(det);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, &text);
    let box_w = text_w + 2 * LABEL_PADDING;
    let box_h = text_h + 2 * LABEL_PADDING;

    let x = (det.bbox[0].floor() as i32).clamp(0, w - 1);
    let top = (det.bbox[1].floor() as i32).clamp(0, h - 1);
    let y = if top >= box_h as i32 { top - box_h as i32 } else { top };

    draw_filled_rect_mut(image, Rect::at(x, y).of_size(box_w, box_h), Rgb(color));
    draw_text_mut(
      image,
      Rgb(LABEL_TEXT_COLOR),
      x + LABEL_PADDING as i32,
      y + LABEL_PADDING as i32,
      scale,
      font,
      &text,
    );
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, detections: &[Detection]) {
    for det in detections {
      let color = self.color(det.class_id);
      self.draw_bbox(image, &det.bbox, color);
      self.draw_label(image, det, color);
    }
  }

  pub fn draw_detection(&self, frame: &Frame, detections: &[Detection]) -> RgbImage {
    let mut image = frame.image.clone();
    self.draw_detections_on_image(&mut image, detections);
    image
  }

  /// 左参考右候选的并排对比图，中间为白色分隔线
  pub fn draw_comparison(
    &self,
    frame: &Frame,
    reference: &[Detection],
    candidate: &[Detection],
  ) -> RgbImage {
    let left = self.draw_detection(frame, reference);
    let right = self.draw_detection(frame, candidate);
    let (width, height) = left.dimensions();

    let mut combined =
      RgbImage::from_pixel(width * 2 + SEPARATOR_WIDTH, height, Rgb(SEPARATOR_COLOR));
    imageops::replace(&mut combined, &left, 0, 0);
    imageops::replace(&mut combined, &right, (width + SEPARATOR_WIDTH) as i64, 0);
    combined
  }
}

/// 每帧检测结果的 JSON 旁路文件
#[derive(Debug, Serialize)]
pub struct Record<'a> {
  pub frame_index: usize,
  pub frame_name: &'a str,
  pub timestamp: String,
  pub width: u32,
  pub height: u32,
  pub detections: &'a [Detection],
}

impl<'a> Record<'a> {
  pub fn new(frame: &'a Frame, detections: &'a [Detection], timestamp: String) -> Self {
    Self {
      frame_index: frame.index,
      frame_name: &frame.name,
      timestamp,
      width: frame.width(),
      height: frame.height(),
      detections,
    }
  }

  pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
    let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(class_id: usize, bbox: [f32; 4]) -> Detection {
    Detection {
      bbox,
      score: 0.9,
      class_id,
      class_name: "basketball".into(),
    }
  }

  #[test]
  fn box_outline_is_drawn() {
    let draw = Draw::default();
    let frame = Frame::new(1, "f.png", RgbImage::new(32, 32));
    let image = draw.draw_detection(&frame, &[det(0, [4.0, 4.0, 20.0, 20.0])]);
    let color = Rgb(draw.color(0));
    assert_eq!(image.get_pixel(4, 10), &color);
    assert_eq!(image.get_pixel(5, 10), &color);
    assert_eq!(image.get_pixel(20, 4), &color);
    assert_eq!(image.get_pixel(12, 12), &Rgb([0, 0, 0]));
  }

  #[test]
  fn boxes_outside_image_are_clamped() {
    let draw = Draw::default();
    let frame = Frame::new(1, "f.png", RgbImage::new(8, 8));
    let image = draw.draw_detection(&frame, &[det(1, [-10.0, -10.0, 100.0, 100.0])]);
    assert_eq!(image.get_pixel(0, 0), &Rgb(draw.color(1)));
    assert_eq!(image.get_pixel(7, 7), &Rgb(draw.color(1)));
  }

  #[test]
  fn label_carries_name_and_score() {
    let mut d = det(1, [0.0, 0.0, 4.0, 4.0]);
    d.class_name = "rim".into();
    d.score = 0.87654;
    assert_eq!(label_text(&d), "rim 0.8765");
  }

  #[test]
  fn font_query_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let plain = Url::parse(&format!("image://{}/out.png", dir.path().display())).unwrap();
    assert!(!Draw::from_url(&plain).unwrap().has_font());

    let missing = Url::parse(&format!(
      "image://{}/out.png?font={}/none.ttf",
      dir.path().display(),
      dir.path().display()
    ))
    .unwrap();
    assert!(matches!(Draw::from_url(&missing), Err(FontError::Io(_))));

    let junk = dir.path().join("junk.ttf");
    std::fs::write(&junk, b"not a font").unwrap();
    assert!(matches!(Draw::load_font(&junk), Err(FontError::Invalid(_))));
  }

  #[test]
  fn comparison_is_side_by_side() {
    let draw = Draw::default();
    let frame = Frame::new(1, "f.png", RgbImage::new(10, 6));
    let image = draw.draw_comparison(&frame, &[], &[]);
    assert_eq!(image.dimensions(), (24, 6));
    assert_eq!(image.get_pixel(11, 3), &Rgb(SEPARATOR_COLOR));
    assert_eq!(image.get_pixel(14, 3), &Rgb([0, 0, 0]));
  }
}
