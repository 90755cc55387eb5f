// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/dfl.rs - DFL 期望解码
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

use ndarray::{Array4, ArrayView1, ArrayView4, Axis};
use thiserror::Error;

/// 每条边的离散分布长度
pub const REG_MAX: usize = 16;

/// 1x16 卷积的固定权重 `[0, 1, ..., 15]`
pub const DFL_WEIGHTS: [f32; REG_MAX] = [
  0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0,
];

const DFL_EPSILON: f32 = 1e-8;

#[derive(Error, Debug)]
pub enum DflError {
  #[error("回归特征通道数错误: 期望 {expected}, 实际 {actual}")]
  Channels { expected: usize, actual: usize },
  #[error("回归特征重排失败: {0}")]
  Reshape(#[from] ndarray::ShapeError),
}

/// 原地 softmax，先减去最大值保证数值稳定
pub fn softmax(values: &mut [f32]) {
  let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let mut sum = 0.0f32;
  for v in values.iter_mut() {
    *v = (*v - max).exp();
    sum += *v;
  }
  let denom = sum + DFL_EPSILON;
  for v in values.iter_mut() {
    *v /= denom;
  }
}

/// 概率分布与固定权重的点积，即 1x16 卷积
pub fn expectation(probs: &[f32; REG_MAX]) -> f32 {
  probs
    .iter()
    .zip(DFL_WEIGHTS.iter())
    .fold(0.0f32, |acc, (p, w)| acc + p * w)
}

/// 单条边的 16 个 logits 解码为一个距离，结果位于 `[0, 15]`
pub fn decode_side(logits: &[f32; REG_MAX]) -> f32 {
  let mut probs = *logits;
  softmax(&mut probs);
  expectation(&probs)
}

fn decode_lane(lane: ArrayView1<'_, f32>) -> f32 {
  let mut logits = [0.0f32; REG_MAX];
  for (dst, src) in logits.iter_mut().zip(lane.iter()) {
    *dst = *src;
  }
  decode_side(&logits)
}

/// 将 `[B, 64, H, W]` 的回归特征规约为 `[B, 1, 4, H*W]`。
///
/// 等价于 `view(B, 4, 16, HW).transpose(1, 2).softmax(1)` 后接权重为 `[0..15]` 的 1x1 卷积。
pub fn reduce(reg: ArrayView4<'_, f32>) -> Result<Array4<f32>, DflError> {
  let (batch, channels, height, width) = reg.dim();
  if channels != 4 * REG_MAX {
    return Err(DflError::Channels {
      expected: 4 * REG_MAX,
      actual: channels,
    });
  }

  let hw = height * width;
  let bins = reg
    .as_standard_layout()
    .into_owned()
    .into_shape_with_order((batch, 4, REG_MAX, hw))?
    .permuted_axes([0, 2, 1, 3]);

  // [B, 16, 4, HW] 沿分布轴规约 -> [B, 4, HW]
  let reduced = bins.map_axis(Axis(1), decode_lane);
  Ok(reduced.insert_axis(Axis(1)))
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 参考实现：显式 softmax 加权求和，使用 f64
  fn reference(logits: &[f32; REG_MAX]) -> f64 {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = logits.iter().map(|&l| (l as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps
      .iter()
      .enumerate()
      .map(|(i, e)| i as f64 * e / sum)
      .sum()
  }

  #[test]
  fn uniform_logits_give_midpoint() {
    assert_eq!(decode_side(&[0.0; REG_MAX]), 7.5);
    assert_eq!(decode_side(&[3.25; REG_MAX]), 7.5);
  }

  #[test]
  fn peaked_distribution_hits_bin() {
    let mut logits = [-100.0f32; REG_MAX];
    logits[3] = 100.0;
    assert!((decode_side(&logits) - 3.0).abs() < 1e-5);
  }

  #[test]
  fn matches_reference_and_stays_in_range() {
    let mut state = 0x2545_f491_u32;
    for _ in 0..200 {
      let mut logits = [0.0f32; REG_MAX];
      for l in logits.iter_mut() {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        *l = (state % 2000) as f32 / 50.0 - 20.0;
      }
      let got = decode_side(&logits);
      assert!((0.0..=15.0).contains(&got));
      assert!((got as f64 - reference(&logits)).abs() < 1e-5);
    }
  }

  #[test]
  fn large_logits_do_not_overflow() {
    let mut logits = [1000.0f32; REG_MAX];
    logits[15] = 1010.0;
    let got = decode_side(&logits);
    assert!(got.is_finite());
    assert!(got > 14.9);
  }

  #[test]
  fn reduce_follows_channel_layout() {
    // 第 s 条边的第 k 个 bin 位于通道 s * 16 + k
    let mut reg = Array4::<f32>::from_elem((1, 64, 1, 2), -50.0);
    let peaks = [2usize, 5, 9, 14];
    for (side, &bin) in peaks.iter().enumerate() {
      reg[[0, side * REG_MAX + bin, 0, 0]] = 50.0;
    }
    let out = reduce(reg.view()).unwrap();
    assert_eq!(out.dim(), (1, 1, 4, 2));
    for (side, &bin) in peaks.iter().enumerate() {
      assert!((out[[0, 0, side, 0]] - bin as f32).abs() < 1e-4);
      // 第二个位置全部相同 -> 7.5
      assert_eq!(out[[0, 0, side, 1]], 7.5);
    }
  }

  #[test]
  fn reduce_rejects_wrong_channels() {
    let reg = Array4::<f32>::zeros((1, 60, 2, 2));
    assert!(matches!(
      reduce(reg.view()),
      Err(DflError::Channels { actual: 60, .. })
    ));
  }
}
