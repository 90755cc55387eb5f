// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/image_folder.rs - 图像文件夹输入
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
  fs,
  path::{Path, PathBuf},
  vec,
};

use image::ImageReader;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{InputError, check_scheme, file_name, is_image},
};

/// 文件夹中的图像按文件名排序逐帧读取
pub struct ImageFolderInput {
  files: Vec<PathBuf>,
}

impl FromUrlWithScheme for ImageFolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageFolderInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    check_scheme::<Self>(url)?;
    Self::open(url.path())
  }
}

impl ImageFolderInput {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, InputError> {
    let directory = directory.as_ref();
    if !directory.is_dir() {
      return Err(InputError::NotFound(directory.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(directory)? {
      let path = entry?.path();
      if path.is_file() && is_image(&path) {
        files.push(path);
      }
    }
    if files.is_empty() {
      return Err(InputError::EmptyDataset(directory.to_path_buf()));
    }
    files.sort();

    info!("图像文件夹 {}: {} 张图像", directory.display(), files.len());
    Ok(Self { files })
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

pub struct ImageFolderIter {
  files: vec::IntoIter<PathBuf>,
  index: usize,
}

impl IntoIterator for ImageFolderInput {
  type Item = Frame;
  type IntoIter = ImageFolderIter;

  fn into_iter(self) -> Self::IntoIter {
    ImageFolderIter {
      files: self.files.into_iter(),
      index: 0,
    }
  }
}

impl Iterator for ImageFolderIter {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      let image = match ImageReader::open(&path).map_err(InputError::from).and_then(|reader| {
        reader.decode().map_err(InputError::from)
      }) {
        Ok(image) => image.to_rgb8(),
        Err(e) => {
          warn!("跳过无法读取的图像 {}: {}", path.display(), e);
          continue;
        }
      };
      self.index += 1;
      return Some(Frame::new(self.index, file_name(&path), image));
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  #[test]
  fn frames_follow_name_order() {
    let dir = tempfile::tempdir().unwrap();
    for (name, value) in [("b.png", 2u8), ("a.png", 1), ("c.bmp", 3)] {
      RgbImage::from_pixel(4, 4, Rgb([value; 3]))
        .save(dir.path().join(name))
        .unwrap();
    }
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
    fs::write(dir.path().join("broken.jpg"), "not an image").unwrap();

    let input = ImageFolderInput::open(dir.path()).unwrap();
    assert_eq!(input.len(), 4);
    let frames: Vec<Frame> = input.into_iter().collect();
    let names: Vec<&str> = frames.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["a.png", "b.png", "c.bmp"]);
    assert_eq!(frames[2].index, 3);
    assert_eq!(frames[1].image.get_pixel(0, 0), &Rgb([2, 2, 2]));
  }

  #[test]
  fn folder_without_images_is_empty_dataset() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
    assert!(matches!(
      ImageFolderInput::open(dir.path()),
      Err(InputError::EmptyDataset(_))
    ));
  }
}
