// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/decode.rs - 检测输出后处理
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

//! 将模型原始输出解码为原图坐标下的检测列表。
//!
//! RK3588 布局：回归张量已完成 DFL 期望，这里只做线性的步长缩放；分类张量为 logits，
//! 在此处做且只做一次 sigmoid。标准布局的框与得分均已在图内解码。

use ndarray::{ArrayD, ArrayView3, ArrayView4, Ix3};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  model::{
    Detection, Labels,
    anchor::make_anchors,
    dedup::DedupPolicy,
    head::{DEFAULT_STRIDES, ExportFormat, MAX_SCALES, RK3588_NUM_OUTPUTS, RK3588_OUTPUT_NAMES},
  },
  preprocess::LetterboxParams,
  tensor::{ClsKind, TensorStats, sigmoid, view4},
};

pub const DEFAULT_CONFIDENCE: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("输出数量错误: 期望 {expected}, 实际 {actual}")]
  OutputCount { expected: usize, actual: usize },
  #[error("步长数量错误: 期望 {expected}, 实际 {actual}")]
  StrideCount { expected: usize, actual: usize },
  #[error("尺度 {scale} 张量形状不匹配: {reason}")]
  ShapeMismatch { scale: usize, reason: String },
  #[error("letterbox 参数数量 {params} 与 batch 大小 {batch} 不一致")]
  LetterboxCount { params: usize, batch: usize },
  #[error("尺度 {scale} 分类输出全部位于 [0, 1] ({min:.4} ~ {max:.4}), 疑似已做过 sigmoid")]
  ActivatedScores { scale: usize, min: f32, max: f32 },
}

impl DecodeError {
  fn shape(scale: usize, reason: impl Into<String>) -> Self {
    DecodeError::ShapeMismatch {
      scale,
      reason: reason.into(),
    }
  }
}

/// 解码配置，每次调用只读
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeConfig {
  pub confidence: f32,
  pub strides: Vec<u32>,
  pub dedup: DedupPolicy,
  pub labels: Labels,
  /// 分类输出疑似已激活时报错而不是警告
  pub reject_activated: bool,
}

impl Default for DecodeConfig {
  fn default() -> Self {
    Self {
      confidence: DEFAULT_CONFIDENCE,
      strides: DEFAULT_STRIDES.to_vec(),
      dedup: DedupPolicy::default(),
      labels: Labels::default(),
      reject_activated: false,
    }
  }
}

impl DecodeConfig {
  pub fn with_confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn with_strides(mut self, strides: impl Into<Vec<u32>>) -> Self {
    self.strides = strides.into();
    self
  }

  pub fn with_dedup(mut self, dedup: DedupPolicy) -> Self {
    self.dedup = dedup;
    self
  }

  pub fn with_labels(mut self, labels: Labels) -> Self {
    self.labels = labels;
    self
  }

  pub fn with_reject_activated(mut self, reject_activated: bool) -> Self {
    self.reject_activated = reject_activated;
    self
  }
}

/// 单尺度的回归与分类视图
struct ScaleView<'a> {
  reg: ArrayView4<'a, f32>,
  cls: ArrayView4<'a, f32>,
  stride: f32,
}

#[derive(Debug, Clone)]
pub struct Decoder {
  layout: ExportFormat,
  config: DecodeConfig,
}

impl Decoder {
  pub fn new(layout: ExportFormat, config: DecodeConfig) -> Self {
    Self { layout, config }
  }

  pub fn rk3588(config: DecodeConfig) -> Self {
    Self::new(ExportFormat::Rk3588, config)
  }

  pub fn standard(config: DecodeConfig) -> Self {
    Self::new(ExportFormat::Standard, config)
  }

  pub fn layout(&self) -> ExportFormat {
    self.layout
  }

  pub fn config(&self) -> &DecodeConfig {
    &self.config
  }

  /// 解码 batch 为 1 的输出
  pub fn decode(
    &self,
    outputs: &[ArrayD<f32>],
    letterbox: &LetterboxParams,
  ) -> Result<Vec<Detection>, DecodeError> {
    let mut frames = self.decode_batch(outputs, std::slice::from_ref(letterbox))?;
    Ok(frames.pop().unwrap_or_default())
  }

  /// 解码整个 batch，每张图像对应一个 letterbox 参数
  pub fn decode_batch(
    &self,
    outputs: &[ArrayD<f32>],
    letterboxes: &[LetterboxParams],
  ) -> Result<Vec<Vec<Detection>>, DecodeError> {
    let batch = self.batch_size(outputs)?;
    if batch != letterboxes.len() {
      return Err(DecodeError::LetterboxCount {
        params: letterboxes.len(),
        batch,
      });
    }

    let mut frames = Vec::with_capacity(batch);
    for (index, letterbox) in letterboxes.iter().enumerate() {
      let candidates = self.candidates(outputs, index)?;
      let restored = candidates
        .into_iter()
        .map(|mut det| {
          det.bbox = letterbox.restore(det.bbox);
          det
        })
        .collect();
      let detections = self.config.dedup.apply(restored);
      debug!("图像 {}: 去重后保留 {} 个检测", index, detections.len());
      frames.push(detections);
    }
    Ok(frames)
  }

  fn batch_size(&self, outputs: &[ArrayD<f32>]) -> Result<usize, DecodeError> {
    match self.layout {
      ExportFormat::Rk3588 => Ok(self.scale_views(outputs)?[0].reg.dim().0),
      ExportFormat::Standard => Ok(dense_view(outputs)?.dim().0),
    }
  }

  /// 模型输入空间下、去重前的候选框
  pub fn candidates(
    &self,
    outputs: &[ArrayD<f32>],
    batch_index: usize,
  ) -> Result<Vec<Detection>, DecodeError> {
    match self.layout {
      ExportFormat::Rk3588 => self.rk3588_candidates(outputs, batch_index),
      ExportFormat::Standard => self.standard_candidates(outputs, batch_index),
    }
  }

  fn scale_views<'a>(&self, outputs: &'a [ArrayD<f32>]) -> Result<Vec<ScaleView<'a>>, DecodeError> {
    if outputs.len() != RK3588_NUM_OUTPUTS {
      return Err(DecodeError::OutputCount {
        expected: RK3588_NUM_OUTPUTS,
        actual: outputs.len(),
      });
    }
    if self.config.strides.len() != MAX_SCALES {
      return Err(DecodeError::StrideCount {
        expected: MAX_SCALES,
        actual: self.config.strides.len(),
      });
    }

    let mut views: Vec<ScaleView<'a>> = Vec::with_capacity(MAX_SCALES);
    for scale in 0..MAX_SCALES {
      let reg = view4(&outputs[2 * scale])
        .map_err(|e| DecodeError::shape(scale, format!("{}: {}", RK3588_OUTPUT_NAMES[2 * scale], e)))?;
      let cls = view4(&outputs[2 * scale + 1]).map_err(|e| {
        DecodeError::shape(scale, format!("{}: {}", RK3588_OUTPUT_NAMES[2 * scale + 1], e))
      })?;

      let (rb, one, four, hw) = reg.dim();
      let (cb, nc, h, w) = cls.dim();
      if one != 1 || four != 4 {
        return Err(DecodeError::shape(
          scale,
          format!("回归张量应为 [B, 1, 4, H*W], 实际 {:?}", reg.shape()),
        ));
      }
      if hw != h * w {
        return Err(DecodeError::shape(
          scale,
          format!("回归 H*W = {} 与分类 {}x{} 不一致", hw, h, w),
        ));
      }
      if rb != cb {
        return Err(DecodeError::shape(
          scale,
          format!("batch 不一致: 回归 {}, 分类 {}", rb, cb),
        ));
      }
      if nc == 0 {
        return Err(DecodeError::shape(scale, "分类张量没有类别通道"));
      }
      if let Some(first) = views.first()
        && first.reg.dim().0 != rb
      {
        return Err(DecodeError::shape(
          scale,
          format!("batch 与尺度 0 不一致: {} != {}", rb, first.reg.dim().0),
        ));
      }

      views.push(ScaleView {
        reg,
        cls,
        stride: self.config.strides[scale] as f32,
      });
    }
    Ok(views)
  }

  /// 各尺度分类输出的数值形态，标准布局返回空列表
  pub fn cls_kinds(&self, outputs: &[ArrayD<f32>]) -> Result<Vec<ClsKind>, DecodeError> {
    match self.layout {
      ExportFormat::Rk3588 => Ok(
        self
          .scale_views(outputs)?
          .iter()
          .filter_map(|view| TensorStats::of(view.cls.iter()).map(|stats| stats.cls_kind()))
          .collect(),
      ),
      ExportFormat::Standard => Ok(Vec::new()),
    }
  }

  fn check_activation(&self, scale: usize, cls: &ArrayView4<'_, f32>) -> Result<(), DecodeError> {
    let Some(stats) = TensorStats::of(cls.iter()) else {
      return Ok(());
    };
    if stats.cls_kind() == ClsKind::Logits {
      return Ok(());
    }
    if self.config.reject_activated {
      return Err(DecodeError::ActivatedScores {
        scale,
        min: stats.min,
        max: stats.max,
      });
    }
    warn!(
      "尺度 {} 分类输出全部位于 [0, 1] ({:.4} ~ {:.4}), 疑似已做过 sigmoid, 得分将被重复激活",
      scale, stats.min, stats.max
    );
    Ok(())
  }

  fn rk3588_candidates(
    &self,
    outputs: &[ArrayD<f32>],
    b: usize,
  ) -> Result<Vec<Detection>, DecodeError> {
    let views = self.scale_views(outputs)?;
    let mut detections = Vec::new();

    for (scale, view) in views.iter().enumerate() {
      self.check_activation(scale, &view.cls)?;
      let (_, nc, h, w) = view.cls.dim();
      let anchors = make_anchors(h, w, view.stride);
      let mut kept = 0usize;
      let mut best = 0.0f32;

      for (idx, anchor) in anchors.iter().enumerate() {
        let (row, col) = (idx / w, idx % w);

        let mut score = f32::MIN;
        let mut class_id = 0usize;
        for c in 0..nc {
          let s = sigmoid(view.cls[[b, c, row, col]]);
          if s > score {
            score = s;
            class_id = c;
          }
        }
        best = best.max(score);

        if score <= self.config.confidence {
          continue;
        }

        let left = view.reg[[b, 0, 0, idx]];
        let top = view.reg[[b, 0, 1, idx]];
        let right = view.reg[[b, 0, 2, idx]];
        let bottom = view.reg[[b, 0, 3, idx]];

        let x1 = anchor.cx - left * view.stride;
        let y1 = anchor.cy - top * view.stride;
        let x2 = anchor.cx + right * view.stride;
        let y2 = anchor.cy + bottom * view.stride;

        if x2 <= x1 || y2 <= y1 {
          continue;
        }

        kept += 1;
        detections.push(Detection {
          bbox: [x1, y1, x2, y2],
          score,
          class_id,
          class_name: self.config.labels.name(class_id),
        });
      }

      debug!(
        "尺度 {}: 网格 {}x{}, 步长 {}, 最高置信度 {:.4}, 超阈值 {}",
        scale, h, w, view.stride, best, kept
      );
    }

    Ok(detections)
  }

  fn standard_candidates(
    &self,
    outputs: &[ArrayD<f32>],
    b: usize,
  ) -> Result<Vec<Detection>, DecodeError> {
    let y = dense_view(outputs)?;
    let (_, channels, anchors) = y.dim();
    let nc = channels - 4;
    let mut detections = Vec::new();

    for n in 0..anchors {
      let mut score = f32::MIN;
      let mut class_id = 0usize;
      for c in 0..nc {
        let s = y[[b, 4 + c, n]];
        if s > score {
          score = s;
          class_id = c;
        }
      }
      if score <= self.config.confidence {
        continue;
      }

      let (cx, cy, w, h) = (y[[b, 0, n]], y[[b, 1, n]], y[[b, 2, n]], y[[b, 3, n]]);
      let bbox = [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0];
      if bbox[2] <= bbox[0] || bbox[3] <= bbox[1] {
        continue;
      }

      detections.push(Detection {
        bbox,
        score,
        class_id,
        class_name: self.config.labels.name(class_id),
      });
    }

    debug!("稠密输出: {} 个锚点, 超阈值 {}", anchors, detections.len());
    Ok(detections)
  }
}

fn dense_view(outputs: &[ArrayD<f32>]) -> Result<ArrayView3<'_, f32>, DecodeError> {
  if outputs.len() != 1 {
    return Err(DecodeError::OutputCount {
      expected: 1,
      actual: outputs.len(),
    });
  }
  let y = outputs[0]
    .view()
    .into_dimensionality::<Ix3>()
    .map_err(|_| DecodeError::shape(0, format!("稠密输出应为 [B, 4+NC, N], 实际 {:?}", outputs[0].shape())))?;
  if y.dim().1 <= 4 {
    return Err(DecodeError::shape(0, "稠密输出没有类别通道"));
  }
  Ok(y)
}

/// 解码一帧，失败时记录原因并返回空结果，不中断数据流
pub fn decode_or_empty(
  decoder: &Decoder,
  outputs: &[ArrayD<f32>],
  letterbox: &LetterboxParams,
) -> Vec<Detection> {
  match decoder.decode(outputs, letterbox) {
    Ok(detections) => detections,
    Err(e) => {
      warn!("解码失败, 本帧检测结果置空: {}", e);
      Vec::new()
    }
  }
}
