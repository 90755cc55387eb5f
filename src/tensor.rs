// 该文件是 Shanan （山南西风） 项目的一部分。
// src/tensor.rs - 张量辅助工具
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

use std::fmt;

use ndarray::{ArrayD, ArrayView4, Ix4, IxDyn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// sigmoid 输入截断范围，避免 exp 溢出
const SIGMOID_CLIP: f32 = 50.0;

#[derive(Error, Debug)]
pub enum TensorError {
  #[error("张量数据长度与形状不匹配: 形状 {shape:?}, 数据长度 {len}")]
  LengthMismatch { shape: Vec<usize>, len: usize },
  #[error("张量维度错误: 期望 4 维, 实际 {0:?}")]
  NotRank4(Vec<usize>),
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
  let x = x.clamp(-SIGMOID_CLIP, SIGMOID_CLIP);
  1.0 / (1.0 + (-x).exp())
}

/// 分类输出的数值形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClsKind {
  /// 未激活的 logits，解码时做一次 sigmoid
  Logits,
  /// 全部落在 [0, 1] 内，很可能已经在图内做过 sigmoid
  Probabilities,
}

impl fmt::Display for ClsKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ClsKind::Logits => write!(f, "logits"),
      ClsKind::Probabilities => write!(f, "概率"),
    }
  }
}

/// 张量取值的最小值、最大值与均值
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TensorStats {
  pub min: f32,
  pub max: f32,
  pub mean: f32,
}

impl TensorStats {
  /// 空张量返回 `None`
  pub fn of<'a>(values: impl IntoIterator<Item = &'a f32>) -> Option<Self> {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for &v in values {
      min = min.min(v);
      max = max.max(v);
      sum += v as f64;
      count += 1;
    }
    (count > 0).then(|| Self {
      min,
      max,
      mean: (sum / count as f64) as f32,
    })
  }

  pub fn cls_kind(&self) -> ClsKind {
    if self.min >= 0.0 && self.max <= 1.0 {
      ClsKind::Probabilities
    } else {
      ClsKind::Logits
    }
  }
}

/// 以 `[batch, channels, height, width]` 视图访问动态维度张量
pub fn view4(tensor: &ArrayD<f32>) -> Result<ArrayView4<'_, f32>, TensorError> {
  tensor
    .view()
    .into_dimensionality::<Ix4>()
    .map_err(|_| TensorError::NotRank4(tensor.shape().to_vec()))
}

/// 可序列化的张量记录，用于输出转储与回放
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorRecord {
  pub name: String,
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

impl TensorRecord {
  pub fn from_array(name: impl Into<String>, tensor: &ArrayD<f32>) -> Self {
    Self {
      name: name.into(),
      shape: tensor.shape().to_vec(),
      data: tensor.iter().copied().collect(),
    }
  }

  pub fn into_array(self) -> Result<ArrayD<f32>, TensorError> {
    let len = self.data.len();
    ArrayD::from_shape_vec(IxDyn(&self.shape), self.data).map_err(|_| {
      TensorError::LengthMismatch {
        shape: self.shape,
        len,
      }
    })
  }
}

/// 一次推理的全部输出
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputRecord {
  pub outputs: Vec<TensorRecord>,
}

impl OutputRecord {
  pub fn from_arrays(names: &[String], tensors: &[ArrayD<f32>]) -> Self {
    let outputs = tensors
      .iter()
      .enumerate()
      .map(|(idx, tensor)| {
        let name = names
          .get(idx)
          .cloned()
          .unwrap_or_else(|| format!("output{}", idx));
        TensorRecord::from_array(name, tensor)
      })
      .collect();
    Self { outputs }
  }

  /// 每个输出的名称、形状与取值统计
  pub fn summary(&self) -> Vec<TensorSummary> {
    self
      .outputs
      .iter()
      .map(|record| TensorSummary {
        name: record.name.clone(),
        shape: record.shape.clone(),
        stats: TensorStats::of(&record.data),
      })
      .collect()
  }

  pub fn into_arrays(self) -> Result<Vec<ArrayD<f32>>, TensorError> {
    self
      .outputs
      .into_iter()
      .map(TensorRecord::into_array)
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorSummary {
  pub name: String,
  pub shape: Vec<usize>,
  pub stats: Option<TensorStats>,
}

impl TensorSummary {
  /// 名称以 `cls` 开头的输出给出数值形态
  pub fn cls_kind(&self) -> Option<ClsKind> {
    if self.name.starts_with("cls") {
      self.stats.map(|stats| stats.cls_kind())
    } else {
      None
    }
  }
}
