// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/detector.rs - 检测流水线
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

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::Frame,
  model::{
    DetectResult, Detection, Model,
    backend::Backend,
    decode::{DecodeError, Decoder},
    head::DEFAULT_INPUT_SIZE,
  },
  preprocess::{LetterboxError, letterbox, to_nchw_tensor},
};

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("预处理失败: {0}")]
  Letterbox(#[from] LetterboxError),
  #[error("推理失败: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("解码失败: {0}")]
  Decode(#[from] DecodeError),
}

/// letterbox -> NCHW 张量 -> 后端 -> 解码
pub struct Detector<B> {
  backend: B,
  decoder: Decoder,
  input_size: u32,
}

impl<B: Backend> Detector<B> {
  pub fn new(backend: B, decoder: Decoder) -> Self {
    Self {
      backend,
      decoder,
      input_size: DEFAULT_INPUT_SIZE,
    }
  }

  pub fn with_input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn decoder(&self) -> &Decoder {
    &self.decoder
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  pub fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
    self.run(None, image)
  }

  /// 后端可按 `frame_name` 选择该帧自己的输出
  pub fn detect_named(
    &self,
    frame_name: &str,
    image: &RgbImage,
  ) -> Result<Vec<Detection>, DetectorError> {
    self.run(Some(frame_name), image)
  }

  fn run(&self, frame_name: Option<&str>, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
    let letterboxed = letterbox(image, self.input_size)?;
    let tensor = to_nchw_tensor(&letterboxed.image);
    let outputs = match frame_name {
      Some(name) => self.backend.forward_named(name, &tensor),
      None => self.backend.forward(&tensor),
    }
    .map_err(|e| DetectorError::Backend(Box::new(e)))?;
    let detections = self.decoder.decode(&outputs, &letterboxed.params)?;
    debug!(
      "{} 布局检测完成: {} 个结果",
      self.decoder.layout(),
      detections.len()
    );
    Ok(detections)
  }
}

impl<B: Backend> Model for Detector<B> {
  type Input = Frame;
  type Output = DetectResult;
  type Error = DetectorError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self
      .detect_named(&input.name, &input.image)
      .map(DetectResult::from)
  }
}
