// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/end_to_end.rs - 6 输出端到端解码
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

mod common;

use image::{Rgb, RgbImage};
use ndarray::{Array4, IxDyn};

use shanan_rkhead::{
  frame::Frame,
  model::{
    Detector, Labels, Model,
    backend::{Backend, HeadBackend},
    decode::{DecodeConfig, Decoder},
    dedup::DedupPolicy,
    head::{ExportFormat, HeadSpec, RK3588_OUTPUT_NAMES, build_graph},
  },
  tensor::sigmoid,
};

use common::{Peak, Synthetic};

fn assert_bbox(actual: [f32; 4], expected: [f32; 4]) {
  for (a, e) in actual.iter().zip(expected.iter()) {
    assert!((a - e).abs() < 1e-3, "{:?} != {:?}", actual, expected);
  }
}

fn detector(peaks: Vec<Peak>, dedup: DedupPolicy) -> Detector<HeadBackend<Synthetic>> {
  let spec = HeadSpec::new(2);
  let graph = build_graph(spec.clone(), ExportFormat::Rk3588).unwrap();
  let config = DecodeConfig::default()
    .with_labels(Labels::parse("basketball,rim"))
    .with_dedup(dedup);
  Detector::new(
    HeadBackend::new(graph, Synthetic::new(spec, peaks)),
    Decoder::rk3588(config),
  )
}

/// 16 步长尺度上 (19, 19) 位置，四边距离均为 1
fn center_peak() -> Peak {
  Peak {
    scale: 1,
    row: 19,
    col: 19,
    class_id: 0,
    logit: 10.0,
    dist: [1, 1, 1, 1],
  }
}

#[test]
fn six_outputs_follow_wire_table() {
  let spec = HeadSpec::new(2);
  let graph = build_graph(spec.clone(), ExportFormat::Rk3588).unwrap();
  let backend = HeadBackend::new(graph, Synthetic::new(spec, vec![center_peak()]));
  let input = Array4::<f32>::zeros((1, 3, 640, 640));
  let outputs = backend.forward(&input).unwrap();

  assert_eq!(outputs.len(), 6);
  assert_eq!(backend.graph().output_names(), RK3588_OUTPUT_NAMES.to_vec());
  let shapes: Vec<Vec<usize>> = outputs.iter().map(|o| o.shape().to_vec()).collect();
  assert_eq!(
    shapes,
    vec![
      vec![1, 1, 4, 6400],
      vec![1, 2, 80, 80],
      vec![1, 1, 4, 1600],
      vec![1, 2, 40, 40],
      vec![1, 1, 4, 400],
      vec![1, 2, 20, 20],
    ]
  );
  // cls 输出仍是 logits
  assert_eq!(outputs[3][IxDyn(&[0, 0, 19, 19])], 10.0);
  assert!((outputs[2][IxDyn(&[0, 0, 0, 19 * 40 + 19])] - 1.0).abs() < 1e-5);
}

#[test]
fn square_frame_decodes_single_box() {
  let detector = detector(vec![center_peak()], DedupPolicy::BestPerClass);
  let frame = Frame::new(1, "court.png", RgbImage::from_pixel(640, 640, Rgb([30, 90, 30])));
  let result = detector.infer(&frame).unwrap();

  assert_eq!(result.len(), 1);
  let det = &result.items[0];
  assert_eq!(det.class_id, 0);
  assert_eq!(det.class_name, "basketball");
  assert!((det.score - sigmoid(10.0)).abs() < 1e-6);
  assert_bbox(det.bbox, [296.0, 296.0, 328.0, 328.0]);
}

#[test]
fn wide_frame_is_mapped_back_through_letterbox() {
  let detector = detector(vec![center_peak()], DedupPolicy::BestPerClass);
  // 1280x720 -> 比例 0.5, 上下各填充 140
  let image = RgbImage::from_pixel(1280, 720, Rgb([200, 120, 40]));
  let dets = detector.detect(&image).unwrap();

  assert_eq!(dets.len(), 1);
  assert_bbox(dets[0].bbox, [592.0, 312.0, 656.0, 376.0]);
}

#[test]
fn boxes_are_clamped_to_the_original_frame() {
  let corner = Peak {
    scale: 2,
    row: 0,
    col: 0,
    class_id: 1,
    logit: 4.0,
    dist: [3, 3, 2, 2],
  };
  let detector = detector(vec![corner], DedupPolicy::None);
  let dets = detector.detect(&RgbImage::new(640, 640)).unwrap();

  assert_eq!(dets.len(), 1);
  assert_eq!(dets[0].class_name, "rim");
  // 锚点 (16, 16)，左上越界被截断为 0
  assert_bbox(dets[0].bbox, [0.0, 0.0, 80.0, 80.0]);
}

#[test]
fn background_frame_has_no_detections() {
  let detector = detector(Vec::new(), DedupPolicy::BestPerClass);
  let dets = detector.detect(&RgbImage::new(320, 480)).unwrap();
  assert!(dets.is_empty());
}

#[test]
fn best_per_class_keeps_one_box_per_class() {
  let peaks = vec![
    center_peak(),
    Peak {
      scale: 0,
      row: 10,
      col: 10,
      class_id: 0,
      logit: 3.0,
      dist: [2, 2, 2, 2],
    },
    Peak {
      scale: 2,
      row: 4,
      col: 6,
      class_id: 1,
      logit: 2.0,
      dist: [1, 1, 1, 1],
    },
  ];
  let dets = detector(peaks.clone(), DedupPolicy::BestPerClass)
    .detect(&RgbImage::new(640, 640))
    .unwrap();
  assert_eq!(dets.len(), 2);
  let ball = dets.iter().find(|d| d.class_id == 0).unwrap();
  assert!((ball.score - sigmoid(10.0)).abs() < 1e-6);

  let all = detector(peaks, DedupPolicy::None)
    .detect(&RgbImage::new(640, 640))
    .unwrap();
  assert_eq!(all.len(), 3);
}
