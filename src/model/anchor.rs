// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/anchor.rs - 锚点网格生成
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

/// 网格单元中心点（像素坐标）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorPoint {
  pub cx: f32,
  pub cy: f32,
}

/// 生成 `height * width` 个锚点，按行优先顺序排列，与特征图展平顺序一致。
///
/// 第 `row * width + col` 个锚点为 `((col + 0.5) * stride, (row + 0.5) * stride)`。
pub fn make_anchors(height: usize, width: usize, stride: f32) -> Vec<AnchorPoint> {
  let mut anchors = Vec::with_capacity(height * width);
  for row in 0..height {
    for col in 0..width {
      anchors.push(AnchorPoint {
        cx: (col as f32 + 0.5) * stride,
        cy: (row as f32 + 0.5) * stride,
      });
    }
  }
  anchors
}

/// 网格单位下的锚点（未乘 stride），用于标准检测头的 dist2bbox
pub(crate) fn make_grid_points(height: usize, width: usize) -> Vec<(f32, f32)> {
  make_anchors(height, width, 1.0)
    .into_iter()
    .map(|a| (a.cx, a.cy))
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn anchors_are_row_major() {
    let anchors = make_anchors(3, 5, 8.0);
    assert_eq!(anchors.len(), 15);
    for row in 0..3 {
      for col in 0..5 {
        let a = anchors[row * 5 + col];
        assert_eq!(a.cx, (col as f32 + 0.5) * 8.0);
        assert_eq!(a.cy, (row as f32 + 0.5) * 8.0);
      }
    }
    // 第二个元素沿 x 方向移动，而不是 y
    assert_eq!(anchors[1], AnchorPoint { cx: 12.0, cy: 4.0 });
  }

  #[test]
  fn anchors_are_deterministic() {
    assert_eq!(make_anchors(40, 40, 16.0), make_anchors(40, 40, 16.0));
  }

  #[test]
  fn non_square_grid() {
    let anchors = make_anchors(2, 4, 32.0);
    assert_eq!(anchors.last().copied(), Some(AnchorPoint { cx: 112.0, cy: 48.0 }));
  }

  #[test]
  fn grid_points_match_unit_stride() {
    let grid = make_grid_points(2, 2);
    assert_eq!(grid, vec![(0.5, 0.5), (1.5, 0.5), (0.5, 1.5), (1.5, 1.5)]);
  }
}
