// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/record_output.rs - 转储回放与目录记录
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

#![cfg(all(feature = "save_image_file", feature = "directory_record"))]

mod common;

use std::{
  fs,
  path::{Path, PathBuf},
};

use image::{Rgb, RgbImage};
use ndarray::Array4;
use url::Url;

use shanan_rkhead::{
  FromUrl,
  input::InputWrapper,
  model::{
    Detector, Labels,
    backend::{Backend, DumpBackend, HeadBackend},
    decode::{DecodeConfig, Decoder},
    head::{ExportFormat, HeadSpec, build_graph},
  },
  output::OutputWrapper,
  task::{ContinuousTask, OneShotTask, Task},
};

use common::{Peak, Synthetic};

/// 步长 16 尺度上第 19 行、第 `col` 列的框，四边距离为 1 格
fn peak_at(col: usize) -> Peak {
  Peak {
    scale: 1,
    row: 19,
    col,
    class_id: 0,
    logit: 10.0,
    dist: [1, 1, 1, 1],
  }
}

/// 用检测头为每个 `(stem, col)` 计算一组 rk3588 输出，写为 `<stem>.json`
fn record_dumps(dir: &Path, frames: &[(&str, usize)]) {
  let spec = HeadSpec::new(2);
  for &(stem, col) in frames {
    let graph = build_graph(spec.clone(), ExportFormat::Rk3588).unwrap();
    let names = graph.output_names();
    let backend = HeadBackend::new(graph, Synthetic::new(spec.clone(), vec![peak_at(col)]));
    let outputs = backend
      .forward(&Array4::zeros((1, 3, 640, 640)))
      .unwrap();
    DumpBackend::record(dir, stem, &names, &outputs).unwrap();
  }
}

fn write_images(dir: &Path) {
  fs::create_dir_all(dir).unwrap();
  for (name, (w, h)) in [("a.png", (640, 640)), ("b.png", (1280, 720)), ("c.png", (320, 320))] {
    RgbImage::from_pixel(w, h, Rgb([60, 60, 60]))
      .save(dir.join(name))
      .unwrap();
  }
}

fn detector(dumps: &Path) -> Detector<DumpBackend> {
  let config = DecodeConfig::default().with_labels(Labels::parse("basketball,rim"));
  Detector::new(DumpBackend::open(dumps).unwrap(), Decoder::rk3588(config))
}

fn url(scheme: &str, path: &Path, query: &str) -> Url {
  Url::parse(&format!("{}://{}{}", scheme, path.display(), query)).unwrap()
}

fn json_files(dir: &Path, out: &mut Vec<PathBuf>) {
  for entry in fs::read_dir(dir).unwrap() {
    let path = entry.unwrap().path();
    if path.is_dir() {
      json_files(&path, out);
    } else if path.extension().is_some_and(|e| e == "json") {
      out.push(path);
    }
  }
}

#[test]
fn replayed_outputs_are_recorded_per_frame() {
  let root = tempfile::tempdir().unwrap();
  let images = root.path().join("images");
  let dumps = root.path().join("dumps");
  let records = root.path().join("records");
  write_images(&images);
  // c.png 没有对应输出，该帧推理失败
  record_dumps(&dumps, &[("a", 19), ("b", 19)]);

  let input = InputWrapper::from_url(&url("folder", &images, "")).unwrap();
  assert_eq!(input.len(), 3);
  let output = OutputWrapper::from_url(&url("folder", &records, "?always")).unwrap();

  let failed = ContinuousTask::default()
    .run_task(input.into_iter(), detector(&dumps), output)
    .unwrap();
  assert_eq!(failed, 1);

  let mut sidecars = Vec::new();
  json_files(&records, &mut sidecars);
  assert_eq!(sidecars.len(), 3);

  let mut detected = Vec::new();
  for path in &sidecars {
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    let dets = json["detections"].as_array().unwrap();
    if !dets.is_empty() {
      assert_eq!(dets[0]["class_name"], "basketball");
      detected.push(json["frame_name"].as_str().unwrap().to_string());
    }
    assert!(path.with_extension("png").exists());
  }
  detected.sort();
  assert_eq!(detected, vec!["a.png", "b.png"]);
}

#[test]
fn single_image_is_drawn_to_file() {
  let root = tempfile::tempdir().unwrap();
  let image = root.path().join("shot.png");
  let dumps = root.path().join("dumps");
  let annotated = root.path().join("out").join("shot_det.png");
  RgbImage::from_pixel(640, 640, Rgb([0, 0, 0]))
    .save(&image)
    .unwrap();
  record_dumps(&dumps, &[("shot", 19)]);

  let input = InputWrapper::from_url(&url("image", &image, "")).unwrap();
  let output = OutputWrapper::from_url(&url("image", &annotated, "")).unwrap();
  OneShotTask
    .run_task(input.into_iter(), detector(&dumps), output)
    .unwrap();

  let drawn = image::open(&annotated).unwrap().to_rgb8();
  assert_eq!(drawn.dimensions(), (640, 640));
  // 框的左上角被描边，框外保持原色
  assert_ne!(drawn.get_pixel(296, 296).0, [0, 0, 0]);
  assert_eq!(drawn.get_pixel(100, 100).0, [0, 0, 0]);
}

#[test]
fn unreadable_image_does_not_shift_dumps() {
  let root = tempfile::tempdir().unwrap();
  let images = root.path().join("images");
  let dumps = root.path().join("dumps");
  let records = root.path().join("records");
  fs::create_dir_all(&images).unwrap();
  for name in ["a.png", "c.png"] {
    RgbImage::new(640, 640).save(images.join(name)).unwrap();
  }
  fs::write(images.join("b.jpg"), b"not a jpeg").unwrap();
  record_dumps(&dumps, &[("a", 5), ("b", 19), ("c", 30)]);

  let input = InputWrapper::from_url(&url("folder", &images, "")).unwrap();
  assert_eq!(input.len(), 3);
  let output = OutputWrapper::from_url(&url("folder", &records, "?always")).unwrap();
  let failed = ContinuousTask::default()
    .run_task(input.into_iter(), detector(&dumps), output)
    .unwrap();
  assert_eq!(failed, 0);

  let mut sidecars = Vec::new();
  json_files(&records, &mut sidecars);
  assert_eq!(sidecars.len(), 2);
  for path in &sidecars {
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    let x_min = json["detections"][0]["bbox"][0].as_f64().unwrap();
    match json["frame_name"].as_str().unwrap() {
      // (5 + 0.5 - 1) * 16
      "a.png" => assert!((x_min - 72.0).abs() < 1e-3),
      // (30 + 0.5 - 1) * 16
      "c.png" => assert!((x_min - 472.0).abs() < 1e-3),
      other => panic!("unexpected frame {}", other),
    }
  }
}
