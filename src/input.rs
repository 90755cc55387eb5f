// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 图像输入
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod image_folder;
mod read_image_file;

pub use self::image_folder::{ImageFolderInput, ImageFolderIter};
pub use self::read_image_file::{ImageFileInput, ImageFileIter};

/// 文件夹输入识别的图像扩展名
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("输入路径不存在: {0}")]
  NotFound(PathBuf),
  #[error("数据集为空: {0} 中没有图像文件")]
  EmptyDataset(PathBuf),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  Image(#[from] image::ImageError),
}

pub(crate) fn check_scheme<T: FromUrlWithScheme>(url: &Url) -> Result<(), InputError> {
  if url.scheme() != T::SCHEME {
    return Err(InputError::SchemeMismatch {
      expected: T::SCHEME.to_string(),
      actual: url.scheme().to_string(),
    });
  }
  Ok(())
}

pub(crate) fn file_name(path: &Path) -> String {
  path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_default()
}

pub(crate) fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

pub enum InputWrapper {
  ImageFile(ImageFileInput),
  ImageFolder(ImageFolderInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ImageFile(ImageFileInput::from_url(url)?)),
      ImageFolderInput::SCHEME => Ok(InputWrapper::ImageFolder(ImageFolderInput::from_url(url)?)),
      other => Err(InputError::SchemeMismatch {
        expected: format!("{}|{}", ImageFileInput::SCHEME, ImageFolderInput::SCHEME),
        actual: other.to_string(),
      }),
    }
  }
}

impl InputWrapper {
  pub fn len(&self) -> usize {
    match self {
      InputWrapper::ImageFile(_) => 1,
      InputWrapper::ImageFolder(input) => input.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

pub enum InputWrapperIter {
  ImageFile(ImageFileIter),
  ImageFolder(ImageFolderIter),
}

impl IntoIterator for InputWrapper {
  type Item = Frame;
  type IntoIter = InputWrapperIter;

  fn into_iter(self) -> Self::IntoIter {
    match self {
      InputWrapper::ImageFile(input) => InputWrapperIter::ImageFile(input.into_iter()),
      InputWrapper::ImageFolder(input) => InputWrapperIter::ImageFolder(input.into_iter()),
    }
  }
}

impl Iterator for InputWrapperIter {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapperIter::ImageFile(input) => input.next(),
      InputWrapperIter::ImageFolder(input) => input.next(),
    }
  }
}
