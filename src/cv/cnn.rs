use std::path::Path;
use std::sync::Mutex;

use log::info;
use opencv::core::{CV_32F, Scalar, Size};
use opencv::dnn::{self, Net};
use opencv::imgcodecs;
use opencv::prelude::*;

use super::imread;
use crate::error::{Error, Result};
use crate::feature::{FeatureExtractor, FeatureModel, FeatureVector};

/// 网络输入大小
const INPUT_SIZE: i32 = 224;
/// ImageNet 的 BGR 均值，按 caffe 方式预处理
const MEAN_BGR: (f64, f64, f64) = (103.939, 116.779, 123.68);

/// 使用 ONNX 格式的 CNN 提取全局特征，输出按 L1 归一化
pub struct CnnExtractor {
    model: FeatureModel,
    dim: usize,
    net: Mutex<Net>,
}

impl CnnExtractor {
    pub fn open(model: FeatureModel, path: &Path) -> Result<Self> {
        let dim = model
            .fixed_dim()
            .ok_or_else(|| Error::BackendUnavailable(format!("{model} 不是 CNN 模型")))?;
        if !path.exists() {
            return Err(Error::NotFound(format!("模型文件不存在: {}", path.display())));
        }
        let net = dnn::read_net_from_onnx(&path.to_string_lossy())?;
        info!("加载 {} 模型: {}", model, path.display());
        Ok(Self { model, dim, net: Mutex::new(net) })
    }
}

impl FeatureExtractor for CnnExtractor {
    fn model(&self) -> FeatureModel {
        self.model
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn extract(&self, path: &Path) -> Result<FeatureVector> {
        let img = imread(path, imgcodecs::IMREAD_COLOR)?;
        let (b, g, r) = MEAN_BGR;
        let blob = dnn::blob_from_image(
            &img,
            1.0,
            Size::new(INPUT_SIZE, INPUT_SIZE),
            Scalar::new(b, g, r, 0.0),
            false,
            false,
            CV_32F,
        )?;
        let output = {
            let mut net = self.net.lock().unwrap_or_else(|e| e.into_inner());
            net.set_input(&blob, "", 1.0, Scalar::default())?;
            net.forward_single("")?
        };
        let data = output.data_typed::<f32>()?.to_vec();
        if data.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: data.len() });
        }
        Ok(FeatureVector::l1_normalized(data))
    }
}
