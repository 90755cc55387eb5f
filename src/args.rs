// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::{Args, ValueEnum};

use crate::model::{
  Labels,
  decode::{DEFAULT_CONFIDENCE, DecodeConfig},
  dedup::{DEFAULT_NMS_IOU, DedupPolicy, NmsConfig},
  head::{DEFAULT_INPUT_SIZE, DEFAULT_STRIDES},
};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
  /// 不去重
  #[value(name = "none")]
  Off,
  /// 每个类别保留最高分
  Best,
  /// 贪心 NMS
  Nms,
}

/// 解码参数，各可执行文件共用
#[derive(Args, Debug, Clone)]
pub struct DecodeArgs {
  /// 置信度阈值 (0.0 - 1.0)，得分须严格大于该值
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 各尺度步长，逗号分隔
  #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_STRIDES, value_name = "STRIDES")]
  pub strides: Vec<u32>,

  /// 模型输入尺寸
  #[arg(long, default_value_t = DEFAULT_INPUT_SIZE, value_name = "SIZE")]
  pub input_size: u32,

  /// 去重方式
  #[arg(long, value_enum, default_value_t = DedupMode::Best)]
  pub dedup: DedupMode,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_NMS_IOU, value_name = "THRESHOLD")]
  pub nms_iou: f32,

  /// 按类别覆盖的 NMS 阈值，例如 `0=0.2,1=0.3`
  #[arg(long, value_parser = NmsConfig::parse_class_iou, value_name = "MAP")]
  pub class_iou: Option<HashMap<usize, f32>>,

  /// NMS 只在同类别内抑制
  #[arg(long)]
  pub per_class_nms: bool,

  /// 分类输出疑似已做过 sigmoid 时报错，默认只警告
  #[arg(long)]
  pub reject_activated: bool,

  /// 类别名称，逗号分隔，例如 `basketball,rim`
  #[arg(long, default_value = "", value_name = "NAMES")]
  pub labels: String,
}

impl DecodeArgs {
  pub fn labels(&self) -> Labels {
    Labels::parse(&self.labels)
  }

  pub fn dedup_policy(&self) -> DedupPolicy {
    match self.dedup {
      DedupMode::Off => DedupPolicy::None,
      DedupMode::Best => DedupPolicy::BestPerClass,
      DedupMode::Nms => {
        let mut config = NmsConfig::default()
          .with_default_iou(self.nms_iou)
          .with_agnostic(!self.per_class_nms);
        if let Some(class_iou) = &self.class_iou {
          config.class_iou = class_iou.clone();
        }
        DedupPolicy::Nms(config)
      }
    }
  }

  pub fn config(&self) -> DecodeConfig {
    DecodeConfig::default()
      .with_confidence(self.confidence)
      .with_strides(self.strides.clone())
      .with_dedup(self.dedup_policy())
      .with_labels(self.labels())
      .with_reject_activated(self.reject_activated)
  }
}
