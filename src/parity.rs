// 该文件是 Shanan （山南西风） 项目的一部分。
// src/parity.rs - 双模型一致性校验
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

//! 用同一帧驱动参考模型（稠密输出）与候选模型（6 张量输出），逐类别比较最高置信度。
//!
//! 比较只看每个类别的最高置信度：两侧都有检测时记录差值，只有一侧有检测时记为另一侧丢失。
//! 丢失总是显著差异。

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::Frame,
  model::{DetectResult, Detection, Labels, Model},
};

pub const DEFAULT_DIFF_THRESHOLD: f32 = 0.1;
/// 超过该差值的比较计入严重差异
pub const CRITICAL_DIFF: f32 = 0.3;
const HIGH_CONSISTENCY: f32 = 0.1;
const MEDIUM_CONSISTENCY: f32 = 0.3;

#[derive(Error, Debug)]
pub enum ParityError {
  #[error("参考模型推理失败: {0}")]
  Reference(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("候选模型推理失败: {0}")]
  Candidate(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 推理失败的一侧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
  Reference,
  Candidate,
}

/// 单个类别在一帧中的比较结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClassComparison {
  Both {
    reference: f32,
    candidate: f32,
    diff: f32,
  },
  /// 只有参考模型检测到
  CandidateMiss { reference: f32 },
  /// 只有候选模型检测到
  ReferenceMiss { candidate: f32 },
  Absent,
}

impl ClassComparison {
  pub fn is_miss(&self) -> bool {
    matches!(
      self,
      ClassComparison::CandidateMiss { .. } | ClassComparison::ReferenceMiss { .. }
    )
  }

  pub fn diff(&self) -> Option<f32> {
    match self {
      ClassComparison::Both { diff, .. } => Some(*diff),
      _ => None,
    }
  }

  pub fn is_significant(&self, threshold: f32) -> bool {
    self.is_miss() || self.diff().is_some_and(|d| d >= threshold)
  }
}

impl fmt::Display for ClassComparison {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ClassComparison::Both { diff, .. } => write!(f, "{:.3}", diff),
      ClassComparison::CandidateMiss { .. } => write!(f, "候选丢失"),
      ClassComparison::ReferenceMiss { .. } => write!(f, "参考丢失"),
      ClassComparison::Absent => write!(f, "-"),
    }
  }
}

/// 一帧的逐类别比较，下标即类别编号
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameComparison {
  pub classes: Vec<ClassComparison>,
}

impl FrameComparison {
  pub fn is_significant(&self, threshold: f32) -> bool {
    self.classes.iter().any(|c| c.is_significant(threshold))
  }

  pub fn get(&self, class_id: usize) -> ClassComparison {
    self
      .classes
      .get(class_id)
      .copied()
      .unwrap_or(ClassComparison::Absent)
  }
}

fn max_score(detections: &[Detection], class_id: usize) -> Option<f32> {
  detections
    .iter()
    .filter(|det| det.class_id == class_id)
    .map(|det| det.score)
    .reduce(f32::max)
}

/// 比较两侧检测中类别 `0..num_classes` 的最高置信度
pub fn compare_frame(
  reference: &[Detection],
  candidate: &[Detection],
  num_classes: usize,
) -> FrameComparison {
  let classes = (0..num_classes)
    .map(
      |class_id| match (max_score(reference, class_id), max_score(candidate, class_id)) {
        (Some(r), Some(c)) => ClassComparison::Both {
          reference: r,
          candidate: c,
          diff: (r - c).abs(),
        },
        (Some(r), None) => ClassComparison::CandidateMiss { reference: r },
        (None, Some(c)) => ClassComparison::ReferenceMiss { candidate: c },
        (None, None) => ClassComparison::Absent,
      },
    )
    .collect();
  FrameComparison { classes }
}

#[derive(Debug, Clone, Default)]
struct ClassStats {
  diffs: Vec<f32>,
  reference_miss: usize,
  candidate_miss: usize,
}

/// 校验过程中的累计统计，由调用方持有
#[derive(Debug, Clone)]
pub struct ParitySession {
  labels: Labels,
  diff_threshold: f32,
  started_at: DateTime<Local>,
  frames: usize,
  reference_detections: usize,
  candidate_detections: usize,
  significant_frames: usize,
  reference_failures: usize,
  candidate_failures: usize,
  classes: Vec<ClassStats>,
}

impl ParitySession {
  pub fn new(labels: Labels, diff_threshold: f32) -> Self {
    let classes = vec![ClassStats::default(); labels.len()];
    Self {
      labels,
      diff_threshold,
      started_at: Local::now(),
      frames: 0,
      reference_detections: 0,
      candidate_detections: 0,
      significant_frames: 0,
      reference_failures: 0,
      candidate_failures: 0,
      classes,
    }
  }

  pub fn diff_threshold(&self) -> f32 {
    self.diff_threshold
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  /// 记录一次推理失败，该帧不参与比较但计入报告
  pub fn fail(&mut self, side: Side) {
    match side {
      Side::Reference => self.reference_failures += 1,
      Side::Candidate => self.candidate_failures += 1,
    }
  }

  /// 记录一帧的两侧检测，返回该帧的比较结果
  pub fn observe(&mut self, reference: &[Detection], candidate: &[Detection]) -> FrameComparison {
    // 未给出类别表时按出现过的最大类别编号扩展
    let seen = reference
      .iter()
      .chain(candidate.iter())
      .map(|det| det.class_id + 1)
      .max()
      .unwrap_or(0);
    if seen > self.classes.len() {
      self.classes.resize_with(seen, ClassStats::default);
    }

    let comparison = compare_frame(reference, candidate, self.classes.len());
    for (stats, class) in self.classes.iter_mut().zip(comparison.classes.iter()) {
      match class {
        ClassComparison::Both { diff, .. } => stats.diffs.push(*diff),
        ClassComparison::CandidateMiss { .. } => stats.candidate_miss += 1,
        ClassComparison::ReferenceMiss { .. } => stats.reference_miss += 1,
        ClassComparison::Absent => {}
      }
    }

    self.frames += 1;
    self.reference_detections += reference.len();
    self.candidate_detections += candidate.len();
    if comparison.is_significant(self.diff_threshold) {
      self.significant_frames += 1;
    }
    comparison
  }

  pub fn report(&self) -> ParityReport {
    let frames = self.frames;
    let rate = |count: usize| {
      if frames > 0 {
        count as f32 / frames as f32
      } else {
        0.0
      }
    };

    let classes: Vec<ClassReport> = self
      .classes
      .iter()
      .enumerate()
      .map(|(class_id, stats)| {
        let (avg_diff, max_diff, min_diff) = if stats.diffs.is_empty() {
          (0.0, 0.0, 0.0)
        } else {
          let sum: f32 = stats.diffs.iter().sum();
          (
            sum / stats.diffs.len() as f32,
            stats.diffs.iter().copied().fold(f32::MIN, f32::max),
            stats.diffs.iter().copied().fold(f32::MAX, f32::min),
          )
        };
        ClassReport {
          class_id,
          class_name: self.labels.name(class_id),
          comparisons: stats.diffs.len(),
          avg_diff,
          max_diff,
          min_diff,
          reference_miss: stats.reference_miss,
          candidate_miss: stats.candidate_miss,
          reference_miss_rate: rate(stats.reference_miss),
          candidate_miss_rate: rate(stats.candidate_miss),
        }
      })
      .collect();

    let critical_differences = self
      .classes
      .iter()
      .flat_map(|stats| stats.diffs.iter())
      .filter(|&&d| d > CRITICAL_DIFF)
      .count();

    ParityReport {
      started_at: self.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
      generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
      frames,
      reference_detections: self.reference_detections,
      candidate_detections: self.candidate_detections,
      diff_threshold: self.diff_threshold,
      significant_frames: self.significant_frames,
      significant_rate: rate(self.significant_frames),
      reference_failures: self.reference_failures,
      candidate_failures: self.candidate_failures,
      consistency: Consistency::grade(&classes),
      critical_differences,
      classes,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consistency {
  High,
  Medium,
  Low,
}

impl Consistency {
  /// 按各类别平均差值分级
  pub fn grade(classes: &[ClassReport]) -> Self {
    if classes.iter().all(|c| c.avg_diff < HIGH_CONSISTENCY) {
      Consistency::High
    } else if classes.iter().all(|c| c.avg_diff < MEDIUM_CONSISTENCY) {
      Consistency::Medium
    } else {
      Consistency::Low
    }
  }
}

impl fmt::Display for Consistency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Consistency::High => write!(f, "高"),
      Consistency::Medium => write!(f, "中"),
      Consistency::Low => write!(f, "低"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
  pub class_id: usize,
  pub class_name: String,
  pub comparisons: usize,
  pub avg_diff: f32,
  pub max_diff: f32,
  pub min_diff: f32,
  pub reference_miss: usize,
  pub candidate_miss: usize,
  pub reference_miss_rate: f32,
  pub candidate_miss_rate: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParityReport {
  pub started_at: String,
  pub generated_at: String,
  pub frames: usize,
  pub reference_detections: usize,
  pub candidate_detections: usize,
  pub diff_threshold: f32,
  pub significant_frames: usize,
  pub significant_rate: f32,
  pub reference_failures: usize,
  pub candidate_failures: usize,
  pub consistency: Consistency,
  pub critical_differences: usize,
  pub classes: Vec<ClassReport>,
}

impl ParityReport {
  pub fn max_diff(&self) -> f32 {
    self.classes.iter().map(|c| c.max_diff).fold(0.0, f32::max)
  }

  pub fn total_misses(&self) -> usize {
    self
      .classes
      .iter()
      .map(|c| c.reference_miss + c.candidate_miss)
      .sum()
  }

  pub fn failures(&self) -> usize {
    self.reference_failures + self.candidate_failures
  }

  /// 至少比较过一帧，没有推理失败与丢失，且所有类别的最大差值低于 `tolerance`
  pub fn within_tolerance(&self, tolerance: f32) -> bool {
    self.frames > 0
      && self.failures() == 0
      && self.total_misses() == 0
      && self.classes.iter().all(|c| c.max_diff < tolerance)
  }
}

impl fmt::Display for ParityReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let rule = "=".repeat(72);
    writeln!(f, "{}", rule)?;
    writeln!(f, "模型一致性校验报告")?;
    writeln!(f, "{}", rule)?;
    writeln!(f, "开始时间:       {}", self.started_at)?;
    writeln!(f, "生成时间:       {}", self.generated_at)?;
    writeln!(f, "总帧数:         {}", self.frames)?;
    writeln!(f, "参考推理失败:   {}", self.reference_failures)?;
    writeln!(f, "候选推理失败:   {}", self.candidate_failures)?;
    writeln!(f, "差异阈值:       {:.3}", self.diff_threshold)?;
    writeln!(f)?;
    writeln!(f, "参考模型检测数: {}", self.reference_detections)?;
    writeln!(f, "候选模型检测数: {}", self.candidate_detections)?;
    writeln!(
      f,
      "检测数差异:     {}",
      self.reference_detections.abs_diff(self.candidate_detections)
    )?;
    for class in &self.classes {
      writeln!(f)?;
      writeln!(f, "[{}] {}", class.class_id, class.class_name)?;
      writeln!(f, "  比较次数:     {}", class.comparisons)?;
      writeln!(f, "  平均差值:     {:.4}", class.avg_diff)?;
      writeln!(f, "  最大差值:     {:.4}", class.max_diff)?;
      writeln!(f, "  最小差值:     {:.4}", class.min_diff)?;
      writeln!(
        f,
        "  参考丢失:     {} 帧 ({:.2}%)",
        class.reference_miss,
        class.reference_miss_rate * 100.0
      )?;
      writeln!(
        f,
        "  候选丢失:     {} 帧 ({:.2}%)",
        class.candidate_miss,
        class.candidate_miss_rate * 100.0
      )?;
    }
    writeln!(f)?;
    writeln!(
      f,
      "显著差异帧:     {} ({:.2}%)",
      self.significant_frames,
      self.significant_rate * 100.0
    )?;
    writeln!(
      f,
      "严重差异:       {} 次差值 > {}",
      self.critical_differences, CRITICAL_DIFF
    )?;
    writeln!(f, "一致性:         {}", self.consistency)?;
    write!(f, "{}", rule)
  }
}

/// 单帧校验结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParityFrame {
  pub frame_index: usize,
  pub frame_name: String,
  pub diff_threshold: f32,
  pub significant: bool,
  pub reference: Vec<Detection>,
  pub candidate: Vec<Detection>,
  pub comparison: FrameComparison,
}

/// 用同一帧驱动两个模型
pub struct ParityValidator<R, C> {
  reference: R,
  candidate: C,
}

impl<R, C, RE, CE> ParityValidator<R, C>
where
  R: Model<Input = Frame, Output = DetectResult, Error = RE>,
  C: Model<Input = Frame, Output = DetectResult, Error = CE>,
  RE: std::error::Error + Send + Sync + 'static,
  CE: std::error::Error + Send + Sync + 'static,
{
  pub fn new(reference: R, candidate: C) -> Self {
    Self {
      reference,
      candidate,
    }
  }

  pub fn check(
    &self,
    frame: &Frame,
    session: &mut ParitySession,
  ) -> Result<ParityFrame, ParityError> {
    let reference = self.reference.infer(frame).map_err(|e| {
      session.fail(Side::Reference);
      ParityError::Reference(Box::new(e))
    })?;
    let candidate = self.candidate.infer(frame).map_err(|e| {
      session.fail(Side::Candidate);
      ParityError::Candidate(Box::new(e))
    })?;

    let comparison = session.observe(&reference.items, &candidate.items);
    let significant = comparison.is_significant(session.diff_threshold());
    debug!(
      "第 {} 帧: 参考 {} 个, 候选 {} 个, 显著差异 {}",
      frame.index,
      reference.len(),
      candidate.len(),
      significant
    );
    if significant {
      let details: Vec<String> = comparison
        .classes
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_significant(session.diff_threshold()))
        .map(|(id, c)| format!("{}: {}", session.labels().name(id), c))
        .collect();
      info!("第 {} 帧存在显著差异: {}", frame.index, details.join(", "));
    }

    Ok(ParityFrame {
      frame_index: frame.index,
      frame_name: frame.name.clone(),
      diff_threshold: session.diff_threshold(),
      significant,
      reference: reference.items.into_vec(),
      candidate: candidate.items.into_vec(),
      comparison,
    })
  }
}
