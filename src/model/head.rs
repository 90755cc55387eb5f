// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/head.rs - 检测头导出图
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

//! YOLOv8 检测头的两种输出布局。
//!
//! `Standard` 为原始的稠密输出 `[B, 4 + NC, N]`（框为 xywh 像素坐标，类别已 sigmoid）；
//! `Rk3588` 将每个尺度拆成回归与分类两路，共 6 个张量，DFL 期望已在图内完成，
//! 分类保持原始 logits。

use std::{
  fmt, fs,
  path::{Path, PathBuf},
  str::FromStr,
};

use ndarray::{Array3, Array4, ArrayD, Axis, concatenate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{
  Labels,
  anchor::make_grid_points,
  dfl::{self, DflError, REG_MAX},
};
use crate::tensor::sigmoid;

/// RK3588 布局支持的最大尺度数，输出固定为 `2 * MAX_SCALES` 个张量
pub const MAX_SCALES: usize = 3;
pub const RK3588_NUM_OUTPUTS: usize = 2 * MAX_SCALES;
pub const RK3588_OUTPUT_NAMES: [&str; RK3588_NUM_OUTPUTS] =
  ["reg1", "cls1", "reg2", "cls2", "reg3", "cls3"];
pub const STANDARD_OUTPUT_NAME: &str = "output0";
pub const INPUT_NAME: &str = "data";
pub const DEFAULT_STRIDES: [u32; MAX_SCALES] = [8, 16, 32];
pub const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Error, Debug)]
pub enum HeadError {
  #[error("检测尺度过多: 模型有 {0} 个尺度, RK3588 布局最多支持 {max} 个", max = MAX_SCALES)]
  TooManyScales(usize),
  #[error("检测尺度不足: 模型有 {0} 个尺度, RK3588 布局需要 {max} 个", max = MAX_SCALES)]
  TooFewScales(usize),
  #[error("类别数必须大于 0")]
  NoClasses,
  #[error("输入尺寸 {input_size} 不能被步长 {stride} 整除")]
  InputNotDivisible { input_size: u32, stride: u32 },
  #[error("特征数量不匹配: 期望 {expected} 个尺度, 实际 {actual}")]
  FeatureCount { expected: usize, actual: usize },
  #[error("尺度 {scale} 特征形状错误: {reason}")]
  FeatureShape { scale: usize, reason: String },
  #[error("尺度 {scale} DFL 处理失败: {source}")]
  Dfl { scale: usize, source: DflError },
  #[error("未知导出格式: {0}")]
  UnknownFormat(String),
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型描述解析失败: {0}")]
  Json(#[from] serde_json::Error),
}

/// 导出布局，在构建图时显式选择，构建后不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
  Standard,
  Rk3588,
}

impl fmt::Display for ExportFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ExportFormat::Standard => write!(f, "standard"),
      ExportFormat::Rk3588 => write!(f, "rk3588"),
    }
  }
}

impl FromStr for ExportFormat {
  type Err = HeadError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "standard" => Ok(ExportFormat::Standard),
      "rk3588" => Ok(ExportFormat::Rk3588),
      other => Err(HeadError::UnknownFormat(other.to_string())),
    }
  }
}

fn default_input_size() -> u32 {
  DEFAULT_INPUT_SIZE
}

fn default_strides() -> Vec<u32> {
  DEFAULT_STRIDES.to_vec()
}

/// 检测头描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadSpec {
  pub num_classes: usize,
  #[serde(default = "default_strides")]
  pub strides: Vec<u32>,
  #[serde(default = "default_input_size")]
  pub input_size: u32,
  #[serde(default)]
  pub names: Labels,
}

impl HeadSpec {
  pub fn new(num_classes: usize) -> Self {
    Self {
      num_classes,
      strides: default_strides(),
      input_size: DEFAULT_INPUT_SIZE,
      names: Labels::default(),
    }
  }

  pub fn with_strides(mut self, strides: impl Into<Vec<u32>>) -> Self {
    self.strides = strides.into();
    self
  }

  pub fn with_input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn with_names(mut self, names: Labels) -> Self {
    self.names = names;
    self
  }

  /// 每个尺度的网格尺寸 `(H, W)`
  pub fn grid_sizes(&self) -> Result<Vec<(usize, usize)>, HeadError> {
    self
      .strides
      .iter()
      .map(|&stride| {
        if stride == 0 || self.input_size % stride != 0 {
          return Err(HeadError::InputNotDivisible {
            input_size: self.input_size,
            stride,
          });
        }
        let size = (self.input_size / stride) as usize;
        Ok((size, size))
      })
      .collect()
  }

  pub fn num_anchors(&self) -> Result<usize, HeadError> {
    Ok(self.grid_sizes()?.iter().map(|(h, w)| h * w).sum())
  }

  /// 从 JSON 描述文件读取检测头
  pub fn load(path: impl AsRef<Path>) -> Result<Self, HeadError> {
    let path = path.as_ref();
    if !path.is_file() {
      return Err(HeadError::ModelNotFound(path.to_path_buf()));
    }
    Ok(serde_json::from_slice(&fs::read(path)?)?)
  }
}

/// 外部卷积分支产生的单尺度特征
#[derive(Debug, Clone)]
pub struct BranchFeatures {
  /// `[B, 4 * 16, H, W]`
  pub reg: Array4<f32>,
  /// `[B, NC, H, W]`
  pub cls: Array4<f32>,
}

/// 输出张量描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
  pub name: String,
  pub shape: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct HeadGraph {
  spec: HeadSpec,
  format: ExportFormat,
  grids: Vec<(usize, usize)>,
}

/// 按导出格式构建检测头输出图
pub fn build_graph(spec: HeadSpec, format: ExportFormat) -> Result<HeadGraph, HeadError> {
  if spec.num_classes == 0 {
    return Err(HeadError::NoClasses);
  }
  if format == ExportFormat::Rk3588 {
    match spec.strides.len() {
      n if n > MAX_SCALES => return Err(HeadError::TooManyScales(n)),
      n if n < MAX_SCALES => return Err(HeadError::TooFewScales(n)),
      _ => {}
    }
  }
  if spec.strides.is_empty() {
    return Err(HeadError::TooFewScales(0));
  }
  let grids = spec.grid_sizes()?;
  debug!(
    "构建检测头: 格式={}, 类别数={}, 步长={:?}, 网格={:?}",
    format, spec.num_classes, spec.strides, grids
  );
  Ok(HeadGraph {
    spec,
    format,
    grids,
  })
}

impl HeadGraph {
  pub fn spec(&self) -> &HeadSpec {
    &self.spec
  }

  pub fn format(&self) -> ExportFormat {
    self.format
  }

  pub fn input(&self, batch: usize) -> TensorSpec {
    let size = self.spec.input_size as usize;
    TensorSpec {
      name: INPUT_NAME.to_string(),
      shape: vec![batch, 3, size, size],
    }
  }

  /// 输出张量表，顺序即导出顺序
  pub fn outputs(&self, batch: usize) -> Vec<TensorSpec> {
    let nc = self.spec.num_classes;
    match self.format {
      ExportFormat::Rk3588 => self
        .grids
        .iter()
        .enumerate()
        .flat_map(|(scale, &(h, w))| {
          [
            TensorSpec {
              name: RK3588_OUTPUT_NAMES[2 * scale].to_string(),
              shape: vec![batch, 1, 4, h * w],
            },
            TensorSpec {
              name: RK3588_OUTPUT_NAMES[2 * scale + 1].to_string(),
              shape: vec![batch, nc, h, w],
            },
          ]
        })
        .collect(),
      ExportFormat::Standard => {
        let anchors = self.grids.iter().map(|(h, w)| h * w).sum();
        vec![TensorSpec {
          name: STANDARD_OUTPUT_NAME.to_string(),
          shape: vec![batch, 4 + nc, anchors],
        }]
      }
    }
  }

  pub fn output_names(&self) -> Vec<String> {
    self.outputs(1).into_iter().map(|t| t.name).collect()
  }

  pub fn manifest(&self, source: impl Into<String>) -> ExportManifest {
    ExportManifest {
      source: source.into(),
      format: self.format,
      num_classes: self.spec.num_classes,
      strides: self.spec.strides.clone(),
      names: self.spec.names.clone(),
      input: self.input(1),
      outputs: self.outputs(1),
    }
  }

  fn check_features(&self, features: &[BranchFeatures]) -> Result<usize, HeadError> {
    if features.len() != self.grids.len() {
      return Err(HeadError::FeatureCount {
        expected: self.grids.len(),
        actual: features.len(),
      });
    }

    let batch = features.first().map(|f| f.reg.dim().0).unwrap_or(0);
    for (scale, (feat, &(h, w))) in features.iter().zip(self.grids.iter()).enumerate() {
      let (rb, rc, rh, rw) = feat.reg.dim();
      let (cb, cc, ch, cw) = feat.cls.dim();
      let reason = if rc != 4 * REG_MAX {
        Some(format!("回归通道数 {} != {}", rc, 4 * REG_MAX))
      } else if cc != self.spec.num_classes {
        Some(format!("分类通道数 {} != {}", cc, self.spec.num_classes))
      } else if rb != batch || cb != batch {
        Some(format!("batch 不一致: 回归 {}, 分类 {}, 期望 {}", rb, cb, batch))
      } else if (rh, rw) != (h, w) || (ch, cw) != (h, w) {
        Some(format!(
          "空间尺寸不一致: 回归 {}x{}, 分类 {}x{}, 期望 {}x{}",
          rh, rw, ch, cw, h, w
        ))
      } else {
        None
      };
      if let Some(reason) = reason {
        return Err(HeadError::FeatureShape { scale, reason });
      }
    }
    Ok(batch)
  }

  /// 执行检测头的输出计算，不修改任何权重
  pub fn forward(&self, features: &[BranchFeatures]) -> Result<Vec<ArrayD<f32>>, HeadError> {
    let batch = self.check_features(features)?;
    match self.format {
      ExportFormat::Rk3588 => self.forward_rk3588(features),
      ExportFormat::Standard => self.forward_standard(features, batch).map(|y| vec![y]),
    }
  }

  fn forward_rk3588(&self, features: &[BranchFeatures]) -> Result<Vec<ArrayD<f32>>, HeadError> {
    let mut outputs = Vec::with_capacity(RK3588_NUM_OUTPUTS);
    for (scale, feat) in features.iter().enumerate() {
      let reg = dfl::reduce(feat.reg.view()).map_err(|source| HeadError::Dfl { scale, source })?;
      outputs.push(reg.into_dyn());
      // 分类分支保持 logits，不做 sigmoid
      outputs.push(feat.cls.clone().into_dyn());
    }
    Ok(outputs)
  }

  fn forward_standard(
    &self,
    features: &[BranchFeatures],
    batch: usize,
  ) -> Result<ArrayD<f32>, HeadError> {
    let nc = self.spec.num_classes;
    let mut per_scale = Vec::with_capacity(features.len());

    for (scale, (feat, &(h, w))) in features.iter().zip(self.grids.iter()).enumerate() {
      let stride = self.spec.strides[scale] as f32;
      let dist = dfl::reduce(feat.reg.view()).map_err(|source| HeadError::Dfl { scale, source })?;
      let grid = make_grid_points(h, w);
      let hw = h * w;

      let mut y = Array3::<f32>::zeros((batch, 4 + nc, hw));
      for b in 0..batch {
        for (idx, &(gx, gy)) in grid.iter().enumerate() {
          let x1 = gx - dist[[b, 0, 0, idx]];
          let y1 = gy - dist[[b, 0, 1, idx]];
          let x2 = gx + dist[[b, 0, 2, idx]];
          let y2 = gy + dist[[b, 0, 3, idx]];
          y[[b, 0, idx]] = (x1 + x2) / 2.0 * stride;
          y[[b, 1, idx]] = (y1 + y2) / 2.0 * stride;
          y[[b, 2, idx]] = (x2 - x1) * stride;
          y[[b, 3, idx]] = (y2 - y1) * stride;
          for c in 0..nc {
            y[[b, 4 + c, idx]] = sigmoid(feat.cls[[b, c, idx / w, idx % w]]);
          }
        }
      }
      per_scale.push(y);
    }

    let views: Vec<_> = per_scale.iter().map(|a| a.view()).collect();
    let dense = concatenate(Axis(2), &views).map_err(|e| HeadError::FeatureShape {
      scale: 0,
      reason: e.to_string(),
    })?;
    Ok(dense.into_dyn())
  }
}

/// 导出产物描述：输入输出张量表与检测头参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
  pub source: String,
  pub format: ExportFormat,
  pub num_classes: usize,
  pub strides: Vec<u32>,
  pub names: Labels,
  pub input: TensorSpec,
  pub outputs: Vec<TensorSpec>,
}

/// 默认导出路径 `<目录>/<文件名>_<格式>.json`
pub fn default_export_path(model_path: &Path, format: ExportFormat) -> PathBuf {
  let stem = model_path
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_else(|| "model".to_string());
  model_path.with_file_name(format!("{}_{}.json", stem, format))
}

/// 读取检测头描述，按 `format` 构建输出图并写出导出描述，返回写出的路径
pub fn export(
  model_path: impl AsRef<Path>,
  output_path: Option<&Path>,
  format: ExportFormat,
) -> Result<PathBuf, HeadError> {
  let model_path = model_path.as_ref();
  let spec = HeadSpec::load(model_path)?;
  let graph = build_graph(spec, format)?;

  let output_path = output_path
    .map(Path::to_path_buf)
    .unwrap_or_else(|| default_export_path(model_path, format));
  if let Some(parent) = output_path.parent()
    && !parent.as_os_str().is_empty()
  {
    fs::create_dir_all(parent)?;
  }

  info!(
    "导出 {} 布局: {} 个类别, 步长 {:?}",
    graph.format(),
    graph.spec().num_classes,
    graph.spec().strides
  );
  let manifest = graph.manifest(model_path.display().to_string());
  fs::write(&output_path, serde_json::to_string_pretty(&manifest)?)?;
  for t in &manifest.outputs {
    info!("输出 {}: {:?}", t.name, t.shape);
  }
  info!("导出完成: {}", output_path.display());
  Ok(output_path)
}
