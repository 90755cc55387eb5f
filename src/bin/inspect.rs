// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/inspect.rs - 输出转储检查工具
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
use tracing::{info, warn};
use url::Url;

use shanan_rkhead::{FromUrl, model::backend::DumpBackend, tensor::ClsKind};

/// 检查输出转储中各张量的取值范围，判断分类输出是否为 logits
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型输出转储目录，例如 `dump:///data/rk3588`
  #[arg(value_name = "DUMP")]
  pub outputs: Url,
  /// 最多检查的转储组数
  #[arg(long, value_name = "COUNT")]
  pub limit: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let backend = DumpBackend::from_url(&args.outputs).context("打开输出转储失败")?;

  let mut activated = 0usize;
  let limit = args.limit.unwrap_or(backend.len());
  for path in backend.paths().iter().take(limit) {
    let record =
      DumpBackend::read(path).with_context(|| format!("读取 {} 失败", path.display()))?;
    println!("{}", path.display());
    for summary in record.summary() {
      let Some(stats) = summary.stats else {
        warn!("{}: 空张量", summary.name);
        continue;
      };
      let kind = summary
        .cls_kind()
        .map(|kind| format!(" [{}]", kind))
        .unwrap_or_default();
      println!(
        "  {:<8} {:?} min {:.6} max {:.6} mean {:.6}{}",
        summary.name, summary.shape, stats.min, stats.max, stats.mean, kind
      );
      if summary.cls_kind() == Some(ClsKind::Probabilities) {
        activated += 1;
      }
    }
  }

  if activated > 0 {
    bail!("{} 个分类输出全部位于 [0, 1], 疑似已做过 sigmoid", activated);
  }
  info!("分类输出均为 logits");

  Ok(())
}
