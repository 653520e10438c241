//! OpenCV 后端：SIFT 特征点、CNN 特征提取与 YOLO 目标检测

mod cnn;
mod sift;
mod yolo;

use std::path::Path;

use ndarray::Array2;
use opencv::core::Mat;
use opencv::imgcodecs;
use opencv::prelude::*;

pub use self::cnn::CnnExtractor;
pub use self::sift::SiftFeatures;
pub use self::yolo::YoloDetector;
use crate::error::{Error, Result};

/// 读取图片，文件不存在或无法解码时返回错误而不是空矩阵
pub fn imread(path: &Path, flags: i32) -> Result<Mat> {
    let img = imgcodecs::imread(&path.to_string_lossy(), flags)?;
    if img.empty() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("无法读取图片: {}", path.display()),
        )));
    }
    Ok(img)
}

/// 单通道 f32 矩阵转换为 ndarray
pub fn mat_to_array(mat: &Mat) -> Result<Array2<f32>> {
    if mat.empty() {
        return Ok(Array2::zeros((0, 0)));
    }
    let (rows, cols) = (mat.rows() as usize, mat.cols() as usize);
    let data = match mat.is_continuous() {
        true => mat.data_typed::<f32>()?.to_vec(),
        false => mat.try_clone()?.data_typed::<f32>()?.to_vec(),
    };
    Array2::from_shape_vec((rows, cols), data)
        .map_err(|e| Error::Parse(format!("矩阵形状错误: {e}")))
}
