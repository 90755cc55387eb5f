// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/export.rs - 检测头导出工具
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use shanan_rkhead::model::head::{self, ExportFormat};

/// 导出 rk3588 检测头布局
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测头描述文件路径
  #[arg(value_name = "MODEL")]
  pub model: PathBuf,
  /// 导出路径，缺省为 `<文件名>_<格式>.json`
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<PathBuf>,
  /// 导出布局
  #[arg(long, default_value = "rk3588", value_name = "FORMAT")]
  pub format: ExportFormat,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("导出布局: {}", args.format);

  let path = head::export(&args.model, args.output.as_deref(), args.format)
    .with_context(|| format!("导出 {} 失败", args.model.display()))?;
  info!("导出文件: {}", path.display());

  Ok(())
}
