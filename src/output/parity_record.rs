// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/parity_record.rs - 一致性校验差异记录
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

use std::{
  fs,
  path::{Path, PathBuf},
  sync::Mutex,
};

use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::Detection,
  output::{
    Render,
    draw::{Draw, FontError},
  },
  parity::{FrameComparison, ParityFrame, ParityReport},
};

#[derive(Error, Debug)]
pub enum ParityRecordError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("字体错误: {0}")]
  FontError(#[from] FontError),
}

#[derive(Serialize)]
struct DiffInfo<'a> {
  frame_id: usize,
  frame_name: &'a str,
  timestamp: &'a str,
  diff_threshold: f32,
  reference_detections: &'a [Detection],
  candidate_detections: &'a [Detection],
  comparison: &'a FrameComparison,
}

/// 只保存存在显著差异的帧：`<id>_comparison.png` 与 `<id>_info.json`。
///
/// `?font=<path>` 在对比图的框上标注类别与置信度。
pub struct ParityRecordOutput {
  directory: PathBuf,
  draw: Draw,
  saved: Mutex<usize>,
}

impl FromUrlWithScheme for ParityRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ParityRecordOutput {
  type Error = ParityRecordError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(ParityRecordError::SchemeMismatch(uri.scheme().to_string()));
    }
    Ok(Self::new(uri.path())?.with_draw(Draw::from_url(uri)?))
  }
}

impl ParityRecordOutput {
  pub fn new(directory: impl AsRef<Path>) -> Result<Self, ParityRecordError> {
    let directory = directory.as_ref().to_path_buf();
    fs::create_dir_all(&directory)?;
    Ok(Self {
      directory,
      draw: Draw::default(),
      saved: Mutex::new(0),
    })
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn saved(&self) -> usize {
    *self.saved.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// 写出 `<时间>_parity_report.log` 与同名 `.json`
  pub fn finish(&self, report: &ParityReport) -> Result<(PathBuf, PathBuf), ParityRecordError> {
    let stem = format!("{}_parity_report", Local::now().format("%Y%m%d_%H%M%S"));
    let log_path = self.directory.join(format!("{}.log", stem));
    let json_path = self.directory.join(format!("{}.json", stem));
    fs::write(&log_path, format!("{}\n", report))?;
    fs::write(&json_path, serde_json::to_string_pretty(report)?)?;
    info!("校验报告已保存: {}", log_path.display());
    Ok((log_path, json_path))
  }
}

impl Render<Frame, ParityFrame> for ParityRecordOutput {
  type Error = ParityRecordError;

  fn render_result(&self, frame: &Frame, result: &ParityFrame) -> Result<(), Self::Error> {
    if !result.significant {
      return Ok(());
    }

    let timestamp = Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
    let frame_id = format!("frame_{:06}_{}", result.frame_index, timestamp);

    self
      .draw
      .draw_comparison(frame, &result.reference, &result.candidate)
      .save(self.directory.join(format!("{}_comparison.png", frame_id)))?;

    let info = DiffInfo {
      frame_id: result.frame_index,
      frame_name: &result.frame_name,
      timestamp: &timestamp,
      diff_threshold: result.diff_threshold,
      reference_detections: &result.reference,
      candidate_detections: &result.candidate,
      comparison: &result.comparison,
    };
    fs::write(
      self.directory.join(format!("{}_info.json", frame_id)),
      serde_json::to_string_pretty(&info)?,
    )?;

    *self.saved.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    Ok(())
  }
}
