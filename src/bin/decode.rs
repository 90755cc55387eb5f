// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/decode.rs - 回放输出并解码检测结果
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use shanan_rkhead::{
  FromUrl,
  args::DecodeArgs,
  input::InputWrapper,
  model::{
    Detector,
    backend::DumpBackend,
    decode::Decoder,
    head::ExportFormat,
  },
  output::OutputWrapper,
  task::{ContinuousTask, Task},
};

/// 回放记录的模型输出，解码并绘制检测结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型输出转储目录，例如 `dump:///data/rk3588`，每帧对应同名 `<stem>.json`
  #[arg(long, value_name = "OUTPUTS")]
  pub outputs: Url,
  /// 输出转储的布局
  #[arg(long, default_value = "rk3588", value_name = "LAYOUT")]
  pub layout: ExportFormat,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，`image://` 或 `folder://`，可附带 `?font=<path>` 标注类别与置信度
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  #[command(flatten)]
  pub decode: DecodeArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输出转储: {} ({})", args.outputs, args.layout);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("解码参数: {:?}", args.decode);

  let backend = DumpBackend::from_url(&args.outputs).context("打开输出转储失败")?;
  let input = InputWrapper::from_url(&args.input).context("打开输入来源失败")?;
  let output = OutputWrapper::from_url(&args.output).context("创建输出失败")?;

  let decoder = Decoder::new(args.layout, args.decode.config());
  let detector = Detector::new(backend, decoder).with_input_size(args.decode.input_size);
  info!(
    "解码布局 {}, 置信度阈值 {:.2}, 步长 {:?}",
    detector.decoder().layout(),
    detector.decoder().config().confidence,
    detector.decoder().config().strides
  );
  if input.len() != detector.backend().len() {
    warn!(
      "输入 {} 帧, 输出转储 {} 组, 两者不一致",
      input.len(),
      detector.backend().len()
    );
  }

  let failed = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .run_task(input.into_iter(), detector, output)?;
  if failed > 0 {
    warn!("{} 帧解码失败", failed);
  }

  Ok(())
}
