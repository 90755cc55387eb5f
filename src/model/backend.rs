// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/backend.rs - 推理后端
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

//! 推理引擎边界：输入 `[B, 3, S, S]` 的 f32 张量，输出原始张量列表。

use std::{
  fs,
  path::{Path, PathBuf},
  sync::Mutex,
};

use ndarray::{Array4, ArrayD};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::head::{BranchFeatures, HeadError, HeadGraph},
  tensor::{OutputRecord, TensorError},
};

pub trait Backend {
  type Error: std::error::Error + Send + Sync + 'static;

  fn forward(&self, input: &Array4<f32>) -> Result<Vec<ArrayD<f32>>, Self::Error>;

  /// 带帧名称的前向，默认忽略名称
  fn forward_named(
    &self,
    _frame_name: &str,
    input: &Array4<f32>,
  ) -> Result<Vec<ArrayD<f32>>, Self::Error> {
    self.forward(input)
  }
}

#[derive(Error, Debug)]
pub enum BackendError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("输出转储目录不存在: {0}")]
  NotFound(PathBuf),
  #[error("输出转储目录为空: {0}")]
  Empty(PathBuf),
  #[error("输出转储已回放完毕, 共 {0} 组")]
  Exhausted(usize),
  #[error("帧 {0} 没有对应的输出转储")]
  Missing(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
  #[error("检测头错误: {0}")]
  Head(#[from] HeadError),
  #[error("特征提取失败: {0}")]
  Extractor(#[source] Box<dyn std::error::Error + Send + Sync>),
}

const DUMP_EXTENSION: &str = "json";

/// 回放事先记录的输出张量。
///
/// 帧经 [`Backend::forward_named`] 按文件名主干匹配 `<stem>.json`；
/// 不带名称的 [`Backend::forward`] 按文件名顺序依次回放。
#[derive(Debug)]
pub struct DumpBackend {
  files: Vec<PathBuf>,
  cursor: Mutex<usize>,
}

impl FromUrlWithScheme for DumpBackend {
  const SCHEME: &'static str = "dump";
}

impl FromUrl for DumpBackend {
  type Error = BackendError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(BackendError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }
    Self::open(url.path())
  }
}

impl DumpBackend {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, BackendError> {
    let directory = directory.as_ref();
    if !directory.is_dir() {
      return Err(BackendError::NotFound(directory.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(directory)? {
      let path = entry?.path();
      if path.is_file() && path.extension().is_some_and(|ext| ext == DUMP_EXTENSION) {
        files.push(path);
      }
    }
    if files.is_empty() {
      return Err(BackendError::Empty(directory.to_path_buf()));
    }
    files.sort();

    info!("加载输出转储: {} 组, 目录 {}", files.len(), directory.display());
    Ok(Self {
      files,
      cursor: Mutex::new(0),
    })
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  /// 将一组输出写为 `<directory>/<stem>.json`
  pub fn record(
    directory: impl AsRef<Path>,
    stem: &str,
    names: &[String],
    tensors: &[ArrayD<f32>],
  ) -> Result<PathBuf, BackendError> {
    let directory = directory.as_ref();
    fs::create_dir_all(directory)?;
    let path = directory.join(format!("{}.{}", stem, DUMP_EXTENSION));
    let record = OutputRecord::from_arrays(names, tensors);
    fs::write(&path, serde_json::to_vec(&record)?)?;
    Ok(path)
  }

  /// 按文件名排序的全部转储文件
  pub fn paths(&self) -> &[PathBuf] {
    &self.files
  }

  pub fn read(path: &Path) -> Result<OutputRecord, BackendError> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
  }

  /// 查找与帧同主干的转储，`a.png` 对应 `a.json`
  pub fn lookup(&self, frame_name: &str) -> Option<&Path> {
    let stem = Path::new(frame_name).file_stem()?;
    self
      .files
      .iter()
      .find(|path| path.file_stem() == Some(stem))
      .map(PathBuf::as_path)
  }

  fn load(path: &Path) -> Result<Vec<ArrayD<f32>>, BackendError> {
    debug!("回放输出转储: {}", path.display());
    Ok(Self::read(path)?.into_arrays()?)
  }

  fn next_file(&self) -> Result<&Path, BackendError> {
    let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
    let path = self
      .files
      .get(*cursor)
      .ok_or(BackendError::Exhausted(self.files.len()))?;
    *cursor += 1;
    Ok(path)
  }
}

impl Backend for DumpBackend {
  type Error = BackendError;

  fn forward(&self, _input: &Array4<f32>) -> Result<Vec<ArrayD<f32>>, Self::Error> {
    Self::load(self.next_file()?)
  }

  fn forward_named(
    &self,
    frame_name: &str,
    _input: &Array4<f32>,
  ) -> Result<Vec<ArrayD<f32>>, Self::Error> {
    let path = self
      .lookup(frame_name)
      .ok_or_else(|| BackendError::Missing(frame_name.to_string()))?;
    Self::load(path)
  }
}

/// 外部卷积分支，给出每个尺度的回归与分类特征
pub trait FeatureExtractor {
  type Error: std::error::Error + Send + Sync + 'static;

  fn extract(&self, input: &Array4<f32>) -> Result<Vec<BranchFeatures>, Self::Error>;
}

/// 在外部特征上执行检测头输出计算
pub struct HeadBackend<E> {
  graph: HeadGraph,
  extractor: E,
}

impl<E: FeatureExtractor> HeadBackend<E> {
  pub fn new(graph: HeadGraph, extractor: E) -> Self {
    Self { graph, extractor }
  }

  pub fn graph(&self) -> &HeadGraph {
    &self.graph
  }
}

impl<E: FeatureExtractor> Backend for HeadBackend<E> {
  type Error = BackendError;

  fn forward(&self, input: &Array4<f32>) -> Result<Vec<ArrayD<f32>>, Self::Error> {
    let features = self
      .extractor
      .extract(input)
      .map_err(|e| BackendError::Extractor(Box::new(e)))?;
    Ok(self.graph.forward(&features)?)
  }
}
