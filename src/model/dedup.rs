// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/dedup.rs - 检测结果去重
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

use std::collections::HashMap;

use crate::model::Detection;

pub const DEFAULT_NMS_IOU: f32 = 0.3;

/// 贪心 NMS 配置
#[derive(Debug, Clone, PartialEq)]
pub struct NmsConfig {
  /// 未在 `class_iou` 中出现的类别使用的阈值
  pub default_iou: f32,
  /// 按类别覆盖的 IoU 阈值，由保留框的类别决定本轮阈值
  pub class_iou: HashMap<usize, f32>,
  /// 为 true 时跨类别抑制
  pub agnostic: bool,
}

impl Default for NmsConfig {
  fn default() -> Self {
    Self {
      default_iou: DEFAULT_NMS_IOU,
      class_iou: HashMap::new(),
      agnostic: true,
    }
  }
}

impl NmsConfig {
  pub fn with_default_iou(mut self, iou: f32) -> Self {
    self.default_iou = iou;
    self
  }

  pub fn with_class_iou(mut self, class_id: usize, iou: f32) -> Self {
    self.class_iou.insert(class_id, iou);
    self
  }

  pub fn with_agnostic(mut self, agnostic: bool) -> Self {
    self.agnostic = agnostic;
    self
  }

  pub fn threshold(&self, class_id: usize) -> f32 {
    self
      .class_iou
      .get(&class_id)
      .copied()
      .unwrap_or(self.default_iou)
  }

  /// 解析 `0=0.2,1=0.3` 形式的按类别阈值
  pub fn parse_class_iou(list: &str) -> Result<HashMap<usize, f32>, String> {
    list
      .split(',')
      .map(str::trim)
      .filter(|item| !item.is_empty())
      .map(|item| {
        let (id, iou) = item
          .split_once('=')
          .ok_or_else(|| format!("缺少 '=': {}", item))?;
        let id = id
          .trim()
          .parse::<usize>()
          .map_err(|e| format!("类别编号无效 '{}': {}", id, e))?;
        let iou = iou
          .trim()
          .parse::<f32>()
          .map_err(|e| format!("IoU 阈值无效 '{}': {}", iou, e))?;
        Ok((id, iou))
      })
      .collect()
  }
}

/// 去重策略，由调用方选择
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DedupPolicy {
  /// 不去重
  None,
  /// 每个类别只保留得分最高的一个
  #[default]
  BestPerClass,
  /// 贪心 NMS
  Nms(NmsConfig),
}

impl DedupPolicy {
  pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
    match self {
      DedupPolicy::None => detections,
      DedupPolicy::BestPerClass => best_per_class(detections),
      DedupPolicy::Nms(config) => nms(detections, config),
    }
  }
}

/// 按类别保留最高分，输出按类别编号排序
pub fn best_per_class(detections: Vec<Detection>) -> Vec<Detection> {
  let mut best: HashMap<usize, Detection> = HashMap::new();
  for det in detections {
    match best.get(&det.class_id) {
      Some(current) if current.score >= det.score => {}
      _ => {
        best.insert(det.class_id, det);
      }
    }
  }
  let mut kept: Vec<Detection> = best.into_values().collect();
  kept.sort_by_key(|det| det.class_id);
  kept
}

/// 贪心 NMS，得分降序逐个保留，抑制 IoU 大于阈值的剩余框
pub fn nms(mut pending: Vec<Detection>, config: &NmsConfig) -> Vec<Detection> {
  pending.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<Detection> = Vec::new();
  while !pending.is_empty() {
    let best = pending.remove(0);
    let threshold = config.threshold(best.class_id);
    pending.retain(|det| {
      if !config.agnostic && det.class_id != best.class_id {
        return true;
      }
      best.iou(det) <= threshold
    });
    kept.push(best);
  }

  kept
}
