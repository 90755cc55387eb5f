// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use serde::{Deserialize, Serialize};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 单个检测结果，bbox 为原图像素坐标 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub bbox: [f32; 4],
  pub score: f32,
  pub class_id: usize,
  pub class_name: String,
}

impl Detection {
  pub fn width(&self) -> f32 {
    self.bbox[2] - self.bbox[0]
  }

  pub fn height(&self) -> f32 {
    self.bbox[3] - self.bbox[1]
  }

  pub fn area(&self) -> f32 {
    self.width().max(0.0) * self.height().max(0.0)
  }

  pub fn iou(&self, other: &Detection) -> f32 {
    let x1 = self.bbox[0].max(other.bbox[0]);
    let y1 = self.bbox[1].max(other.bbox[1]);
    let x2 = self.bbox[2].min(other.bbox[2]);
    let y2 = self.bbox[3].min(other.bbox[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
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
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 类别名称表，模型构建时固定，解码时只读共享
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(Vec<String>);

impl Labels {
  pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
    Self(names.into_iter().map(Into::into).collect())
  }

  /// 解析逗号分隔的类别列表，如 `basketball,rim`
  pub fn parse(list: &str) -> Self {
    Self::new(
      list
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty()),
    )
  }

  pub fn name(&self, class_id: usize) -> String {
    self
      .0
      .get(class_id)
      .cloned()
      .unwrap_or_else(|| format!("class_{}", class_id))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

pub mod anchor;
pub mod backend;
pub mod decode;
pub mod dedup;
pub mod dfl;
pub mod head;

mod detector;
pub use self::detector::{Detector, DetectorError};

#[cfg(test)]
mod tests {
  use super::*;

  fn det(bbox: [f32; 4]) -> Detection {
    Detection {
      bbox,
      score: 0.9,
      class_id: 0,
      class_name: "basketball".into(),
    }
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let a = det([10.0, 10.0, 20.0, 20.0]);
    assert!((a.iou(&a) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn iou_of_half_overlap() {
    let a = det([0.0, 0.0, 10.0, 10.0]);
    let b = det([5.0, 0.0, 15.0, 10.0]);
    assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
  }

  #[test]
  fn labels_fall_back_to_index() {
    let labels = Labels::parse("basketball, rim,");
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.name(1), "rim");
    assert_eq!(labels.name(5), "class_5");
  }
}
