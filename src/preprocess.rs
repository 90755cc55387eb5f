// 该文件是 Shanan （山南西风） 项目的一部分。
// src/preprocess.rs - letterbox 预处理
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

//! 保持宽高比的缩放与填充，以及检测框从模型输入空间到原图空间的逆映射。

use image::{Rgb, RgbImage, imageops::FilterType};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// 与训练框架一致的灰色填充
pub const LETTERBOX_FILL: [u8; 3] = [114, 114, 114];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LetterboxError {
  #[error("图像尺寸无效: {width}x{height}")]
  InvalidImageDimensions { width: u32, height: u32 },
  #[error("目标尺寸无效: {0}")]
  InvalidTargetSize(u32),
}

/// 一帧的 letterbox 参数，只在该帧的推理与逆映射之间传递
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LetterboxParams {
  /// 缩放比例 `min(S / h0, S / w0)`
  pub ratio: f32,
  /// 每侧的半填充量 `(dw, dh)`
  pub pad: (f32, f32),
  /// 缩放后未填充的尺寸 `(width, height)`
  pub resized: (u32, u32),
  /// 实际左侧与上侧填充像素
  pub border: (u32, u32),
  /// 原图尺寸 `(width, height)`
  pub original: (u32, u32),
}

impl LetterboxParams {
  /// 原图已是模型输入尺寸时使用
  pub fn identity(width: u32, height: u32) -> Self {
    Self {
      ratio: 1.0,
      pad: (0.0, 0.0),
      resized: (width, height),
      border: (0, 0),
      original: (width, height),
    }
  }

  /// 计算尺寸 `(w0, h0)` 的图像缩放到 `size x size` 时的参数
  pub fn compute(width: u32, height: u32, size: u32) -> Result<Self, LetterboxError> {
    if width == 0 || height == 0 {
      return Err(LetterboxError::InvalidImageDimensions { width, height });
    }
    if size == 0 {
      return Err(LetterboxError::InvalidTargetSize(size));
    }

    let (w0, h0, s) = (width as f64, height as f64, size as f64);
    let r = (s / h0).min(s / w0);
    let (new_w, new_h) = unpadded(width, height, r);
    let dw = (s - new_w as f64) / 2.0;
    let dh = (s - new_h as f64) / 2.0;
    let left = (dw - 0.1).round_ties_even().max(0.0) as u32;
    let top = (dh - 0.1).round_ties_even().max(0.0) as u32;

    Ok(Self {
      ratio: r as f32,
      pad: (dw as f32, dh as f32),
      resized: (new_w, new_h),
      border: (left, top),
      original: (width, height),
    })
  }

  /// 模型输入空间的框映射回原图并截断到图像范围内
  pub fn restore(&self, bbox: [f32; 4]) -> [f32; 4] {
    let (dw, dh) = self.pad;
    let max_x = self.original.0.saturating_sub(1) as f32;
    let max_y = self.original.1.saturating_sub(1) as f32;
    [
      ((bbox[0] - dw) / self.ratio).clamp(0.0, max_x),
      ((bbox[1] - dh) / self.ratio).clamp(0.0, max_y),
      ((bbox[2] - dw) / self.ratio).clamp(0.0, max_x),
      ((bbox[3] - dh) / self.ratio).clamp(0.0, max_y),
    ]
  }
}

fn unpadded(width: u32, height: u32, r: f64) -> (u32, u32) {
  let new_w = (width as f64 * r).round_ties_even() as u32;
  let new_h = (height as f64 * r).round_ties_even() as u32;
  (new_w, new_h)
}

/// letterbox 后的图像及其参数
#[derive(Debug, Clone)]
pub struct Letterboxed {
  pub image: RgbImage,
  pub params: LetterboxParams,
}

/// 将图像缩放并填充到 `size x size`
pub fn letterbox(image: &RgbImage, size: u32) -> Result<Letterboxed, LetterboxError> {
  let (width, height) = image.dimensions();
  let params = LetterboxParams::compute(width, height, size)?;
  let (new_w, new_h) = params.resized;
  let (left, top) = params.border;

  debug!(
    "letterbox: {}x{} -> {}x{}, 比例 {:.6}, 填充 ({:.1}, {:.1})",
    width, height, new_w, new_h, params.ratio, params.pad.0, params.pad.1
  );

  let mut canvas = RgbImage::from_pixel(size, size, Rgb(LETTERBOX_FILL));
  if (new_w, new_h) == (width, height) {
    image::imageops::replace(&mut canvas, image, left as i64, top as i64);
  } else {
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);
    image::imageops::replace(&mut canvas, &resized, left as i64, top as i64);
  }

  Ok(Letterboxed {
    image: canvas,
    params,
  })
}

/// RGB8 图像转为 `[1, 3, H, W]`，数值归一化到 `[0, 1]`
pub fn to_nchw_tensor(image: &RgbImage) -> Array4<f32> {
  let (width, height) = image.dimensions();
  let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
  for (x, y, pixel) in image.enumerate_pixels() {
    for c in 0..3 {
      tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
    }
  }
  tensor
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_dimension_is_rejected() {
    assert_eq!(
      LetterboxParams::compute(0, 480, 640),
      Err(LetterboxError::InvalidImageDimensions {
        width: 0,
        height: 480
      })
    );
  }

  #[test]
  fn landscape_pads_vertically() {
    let params = LetterboxParams::compute(1280, 720, 640).unwrap();
    assert_eq!(params.ratio, 0.5);
    assert_eq!(params.resized, (640, 360));
    assert_eq!(params.pad, (0.0, 140.0));
    assert_eq!(params.border, (0, 140));
  }

  #[test]
  fn odd_padding_splits_with_bias() {
    // 高度缩放后为 639, 剩余 1 像素全部落在下侧
    let params = LetterboxParams::compute(1000, 998, 640).unwrap();
    let (_, new_h) = params.resized;
    assert_eq!(new_h, 639);
    assert_eq!(params.pad.1, 0.5);
    assert_eq!(params.border.1, 0);
  }

  #[test]
  fn ties_round_to_even() {
    // 5 * 0.5 = 2.5 -> 2
    let params = LetterboxParams::compute(5, 10, 5).unwrap();
    assert_eq!(params.resized, (2, 5));
    assert_eq!(params.pad.0, 1.5);
    // round(1.4) = 1 在左侧, round(1.6) = 2 在右侧
    assert_eq!(params.border.0, 1);
  }

  #[test]
  fn letterbox_image_is_square_with_fill() {
    let image = RgbImage::from_pixel(200, 100, Rgb([10, 20, 30]));
    let out = letterbox(&image, 64).unwrap();
    assert_eq!(out.image.dimensions(), (64, 64));
    assert_eq!(out.params.border, (0, 16));
    assert_eq!(out.image.get_pixel(0, 0), &Rgb(LETTERBOX_FILL));
    assert_eq!(out.image.get_pixel(32, 32), &Rgb([10, 20, 30]));
    assert_eq!(out.image.get_pixel(32, 63), &Rgb(LETTERBOX_FILL));
  }

  #[test]
  fn restore_clamps_to_image() {
    let params = LetterboxParams::compute(1280, 720, 640).unwrap();
    let restored = params.restore([0.0, 0.0, 640.0, 640.0]);
    assert_eq!(restored, [0.0, 0.0, 1279.0, 719.0]);
    let inner = params.restore([100.0, 240.0, 200.0, 340.0]);
    assert_eq!(inner, [200.0, 200.0, 400.0, 400.0]);
  }

  #[test]
  fn tensor_is_channel_first_and_normalized() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(1, 0, Rgb([255, 0, 51]));
    let tensor = to_nchw_tensor(&image);
    assert_eq!(tensor.dim(), (1, 3, 1, 2));
    assert_eq!(tensor[[0, 0, 0, 1]], 1.0);
    assert_eq!(tensor[[0, 2, 0, 1]], 0.2);
    assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
  }
}
