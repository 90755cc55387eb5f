// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::{path::PathBuf, sync::Mutex};

use chrono::{Datelike, Local};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::DetectResult,
  output::{
    Render,
    draw::{Draw, FontError, Record},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体错误: {0}")]
  FontError(#[from] FontError),
}

/// 按日期分目录保存每帧图像与 JSON 旁路文件。
///
/// `folder:///dir` 保存画框后的图像；`?record` 保存原图；`?always` 时无检测的帧也保存；
/// `?font=<path>` 在框上标注类别与置信度。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Option<Draw>,
  frame_counter: Mutex<u32>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let record = uri.query_pairs().any(|(k, _)| k == "record");
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    let draw = if record { None } else { Some(Draw::from_url(uri)?) };

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw,
      frame_counter: Mutex::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u32 {
    let mut counter = self.frame_counter.lock().unwrap_or_else(|e| e.into_inner());
    *counter += 1;
    *counter
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render<Frame, DetectResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    match &self.draw {
      Some(draw) => draw.draw_detection(frame, &result.items).save(&path)?,
      None => frame.image.save(&path)?,
    }
    let timestamp = Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
    Record::new(frame, &result.items, timestamp).save(&path.with_extension("json"))?;
    debug!("记录第 {} 帧到 {}", frame.index, path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Detection;
  use image::RgbImage;

  fn collect_files(dir: &std::path::Path, ext: &str, out: &mut Vec<PathBuf>) {
    for entry in std::fs::read_dir(dir).unwrap() {
      let path = entry.unwrap().path();
      if path.is_dir() {
        collect_files(&path, ext, out);
      } else if path.extension().is_some_and(|e| e == ext) {
        out.push(path);
      }
    }
  }

  #[test]
  fn empty_results_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let frame = Frame::new(1, "f.png", RgbImage::new(8, 8));

    let url = url::Url::parse(&format!("folder://{}", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.render_result(&frame, &DetectResult::default()).unwrap();
    let mut files = Vec::new();
    collect_files(dir.path(), "png", &mut files);
    assert!(files.is_empty());

    let url = url::Url::parse(&format!("folder://{}?always", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.render_result(&frame, &DetectResult::default()).unwrap();
    collect_files(dir.path(), "png", &mut files);
    assert_eq!(files.len(), 1);
  }

  #[test]
  fn sidecar_lists_detections() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?record", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    let frame = Frame::new(7, "court.png", RgbImage::new(8, 8));
    let result = DetectResult::from(vec![Detection {
      bbox: [1.0, 1.0, 5.0, 5.0],
      score: 0.75,
      class_id: 1,
      class_name: "rim".into(),
    }]);
    output.render_result(&frame, &result).unwrap();

    let mut sidecars = Vec::new();
    collect_files(dir.path(), "json", &mut sidecars);
    assert_eq!(sidecars.len(), 1);
    let json: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(&sidecars[0]).unwrap()).unwrap();
    assert_eq!(json["frame_index"], 7);
    assert_eq!(json["frame_name"], "court.png");
    assert_eq!(json["detections"][0]["class_name"], "rim");
  }
}
