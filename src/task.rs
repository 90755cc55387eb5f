// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 任务执行器
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
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};

use tracing::{error, info, warn};

use crate::{
  frame::Frame,
  model::{DetectResult, Labels, Model},
  output::Render,
  parity::{ParityFrame, ParityReport, ParitySession, ParityValidator},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 安装 ctrl-c 处理，收到信号后通过通道通知任务循环
fn interrupt_channel() -> Receiver<()> {
  let (tx, rx) = mpsc::channel();
  if let Err(e) = ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  }) {
    warn!("无法设置中断处理: {}", e);
  }
  rx
}

pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Output = ();
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  F,
  D: Default,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  /// 推理失败的帧数
  type Output = usize;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let rx = interrupt_channel();

    let mut frame_index = 0usize;
    let mut failed = 0usize;
    let mut now = Instant::now();
    for frame in input {
      frame_index += 1;
      info!("处理第 {} 帧图像", frame_index);
      let result = match model.infer(&frame) {
        Ok(result) => result,
        Err(e) => {
          error!("第 {} 帧推理失败, 以空结果继续: {}", frame_index, e);
          failed += 1;
          D::default()
        }
      };
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，共 {} 帧, 失败 {} 帧", frame_index, failed);
    Ok(failed)
  }
}

/// 逐帧驱动两个模型并累计统计，结束时返回报告
#[derive(Debug)]
pub struct ParityTask {
  labels: Labels,
  diff_threshold: f32,
  frame_number: Option<usize>,
}

impl ParityTask {
  pub fn new(labels: Labels, diff_threshold: f32) -> Self {
    Self {
      labels,
      diff_threshold,
      frame_number: None,
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<I, R, C, RE, CE, O, OE> Task<I, ParityValidator<R, C>, O> for ParityTask
where
  I: Iterator<Item = Frame>,
  R: Model<Input = Frame, Output = DetectResult, Error = RE>,
  C: Model<Input = Frame, Output = DetectResult, Error = CE>,
  RE: std::error::Error + Send + Sync + 'static,
  CE: std::error::Error + Send + Sync + 'static,
  O: Render<Frame, ParityFrame, Error = OE>,
  OE: std::error::Error + Send + Sync + 'static,
{
  type Output = ParityReport;
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    model: ParityValidator<R, C>,
    output: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始一致性校验, 差异阈值 {:.3}", self.diff_threshold);
    let rx = interrupt_channel();
    let mut session = ParitySession::new(self.labels, self.diff_threshold);

    let mut processed = 0usize;
    for frame in input {
      processed += 1;
      match model.check(&frame, &mut session) {
        Ok(result) => output.render_result(&frame, &result)?,
        Err(e) => error!("第 {} 帧 ({}) 校验失败: {}", frame.index, frame.name, e),
      }
      if self.frame_number.is_some_and(|n| processed >= n) {
        info!("达到指定帧数 {}, 结束校验", processed);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，结束校验");
        break;
      }
    }

    let report = session.report();
    info!(
      "校验完成: {} 帧, 推理失败 {} 帧, 显著差异 {} 帧, 最大差值 {:.6}, 一致性 {}",
      report.frames,
      report.failures(),
      report.significant_frames,
      report.max_diff(),
      report.consistency
    );
    Ok(report)
  }
}
