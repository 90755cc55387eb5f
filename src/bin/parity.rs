// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/parity.rs - 标准布局与 rk3588 布局一致性校验
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

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use url::Url;

use shanan_rkhead::{
  FromUrl,
  args::DecodeArgs,
  input::InputWrapper,
  model::{
    Detector,
    backend::DumpBackend,
    decode::Decoder,
  },
  output::ParityRecordOutput,
  parity::{DEFAULT_DIFF_THRESHOLD, ParityValidator},
  task::{ParityTask, Task},
};

/// 对比标准布局与 rk3588 布局的检测结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 标准布局输出转储目录，每帧对应同名 `<stem>.json`
  #[arg(long, value_name = "REFERENCE")]
  pub reference: Url,
  /// rk3588 布局输出转储目录，每帧对应同名 `<stem>.json`
  #[arg(long, value_name = "CANDIDATE")]
  pub candidate: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 差异记录目录，例如 `folder:///tmp/parity?font=/usr/share/fonts/DejaVuSans.ttf`
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 记录差异帧的置信度差阈值
  #[arg(long, default_value_t = DEFAULT_DIFF_THRESHOLD, value_name = "THRESHOLD")]
  pub diff_threshold: f32,
  /// 允许的最大置信度差
  #[arg(long, default_value_t = 1e-6, value_name = "TOLERANCE")]
  pub tolerance: f32,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  #[command(flatten)]
  pub decode: DecodeArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("标准布局转储: {}", args.reference);
  info!("rk3588 布局转储: {}", args.candidate);
  info!("输入来源: {}", args.input);
  info!("差异记录目录: {}", args.output);

  let input = InputWrapper::from_url(&args.input).context("打开输入来源失败")?;
  let output = ParityRecordOutput::from_url(&args.output).context("创建差异记录目录失败")?;

  let config = args.decode.config();
  let reference = Detector::new(
    DumpBackend::from_url(&args.reference).context("打开标准布局转储失败")?,
    Decoder::standard(config.clone()),
  )
  .with_input_size(args.decode.input_size);
  let candidate = Detector::new(
    DumpBackend::from_url(&args.candidate).context("打开 rk3588 布局转储失败")?,
    Decoder::rk3588(config),
  )
  .with_input_size(args.decode.input_size);

  let report = ParityTask::new(args.decode.labels(), args.diff_threshold)
    .with_frame_number(args.frame_number)
    .run_task(
      input.into_iter(),
      ParityValidator::new(reference, candidate),
      &output,
    )?;

  let (log_path, json_path) = output.finish(&report)?;
  info!("差异帧 {} 帧已保存", output.saved());
  info!("报告: {} / {}", log_path.display(), json_path.display());
  println!("{}", report);

  if !report.within_tolerance(args.tolerance) {
    bail!(
      "一致性校验未通过: 比较 {} 帧, 推理失败 {} (参考 {} / 候选 {}), 最大差值 {:.6} (容差 {:e}), 漏检 {}",
      report.frames,
      report.failures(),
      report.reference_failures,
      report.candidate_failures,
      report.max_diff(),
      args.tolerance,
      report.total_misses()
    );
  }
  info!("一致性校验通过");

  Ok(())
}
