// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/common/mod.rs - 集成测试共用的合成特征
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

#![allow(dead_code)]

use std::convert::Infallible;

use ndarray::Array4;

use shanan_rkhead::model::{
  backend::FeatureExtractor,
  dfl::REG_MAX,
  head::{BranchFeatures, HeadSpec},
};

/// 背景分类 logits，sigmoid 后远低于阈值
pub const BACKGROUND: f32 = -8.0;

/// 一个激活位置：尺度、行、列、类别、logit、四边距离 (网格单位)
#[derive(Debug, Clone, Copy)]
pub struct Peak {
  pub scale: usize,
  pub row: usize,
  pub col: usize,
  pub class_id: usize,
  pub logit: f32,
  pub dist: [usize; 4],
}

/// 不依赖输入内容的合成特征：回归为带噪声的 logits，
/// 激活位置的四条边在对应 bin 上取极大值
pub struct Synthetic {
  pub spec: HeadSpec,
  pub peaks: Vec<Peak>,
  pub noise: bool,
}

impl Synthetic {
  pub fn new(spec: HeadSpec, peaks: Vec<Peak>) -> Self {
    Self {
      spec,
      peaks,
      noise: false,
    }
  }

  pub fn with_noise(mut self) -> Self {
    self.noise = true;
    self
  }
}

impl FeatureExtractor for Synthetic {
  type Error = Infallible;

  fn extract(&self, input: &Array4<f32>) -> Result<Vec<BranchFeatures>, Infallible> {
    let batch = input.dim().0;
    let nc = self.spec.num_classes;
    let grids = self.spec.grid_sizes().unwrap();

    let mut features: Vec<BranchFeatures> = grids
      .iter()
      .map(|&(h, w)| {
        let reg = if self.noise {
          Array4::from_shape_fn((batch, 4 * REG_MAX, h, w), |(_, c, y, x)| {
            ((c * 7 + y * 3 + x) % 11) as f32 * 0.3 - 1.5
          })
        } else {
          Array4::zeros((batch, 4 * REG_MAX, h, w))
        };
        BranchFeatures {
          reg,
          cls: Array4::from_elem((batch, nc, h, w), BACKGROUND),
        }
      })
      .collect();

    for peak in &self.peaks {
      let feat = &mut features[peak.scale];
      for b in 0..batch {
        for (side, &bin) in peak.dist.iter().enumerate() {
          feat.reg[[b, side * REG_MAX + bin, peak.row, peak.col]] = 100.0;
        }
        feat.cls[[b, peak.class_id, peak.row, peak.col]] = peak.logit;
      }
    }
    Ok(features)
  }
}
