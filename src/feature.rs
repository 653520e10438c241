use std::fmt;
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::Metric;

/// 图片的全局特征向量，计算完成后不可修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(data: Vec<f32>) -> Self {
        Self(data)
    }

    /// 按元素绝对值之和归一化，和为零时保持原样
    pub fn l1_normalized(mut data: Vec<f32>) -> Self {
        let sum = data.iter().map(|x| x.abs()).sum::<f32>();
        if sum > 0.0 {
            data.iter_mut().for_each(|x| *x /= sum);
        }
        Self(data)
    }

    pub fn l2_normalized(mut data: Vec<f32>) -> Self {
        let norm = data.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            data.iter_mut().for_each(|x| *x /= norm);
        }
        Self(data)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    pub fn euclidean(&self, other: &FeatureVector) -> f32 {
        crate::utils::euclidean_distance(&self.0, &other.0)
    }
}

/// 特征提取模型
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureModel {
    /// VGG16 全连接层输出，4096 维
    Vgg16,
    /// VGG19 全连接层输出，4096 维
    Vgg19,
    /// ResNet50 池化层输出，2048 维
    Resnet,
    /// SIFT 视觉词袋直方图，维度等于词典大小
    Bovw,
}

impl FeatureModel {
    /// 模型名称，用于缓存和索引文件命名
    pub fn name(&self) -> &'static str {
        match self {
            FeatureModel::Vgg16 => "vgg16",
            FeatureModel::Vgg19 => "vgg19",
            FeatureModel::Resnet => "resnet",
            FeatureModel::Bovw => "bovw",
        }
    }

    /// CNN 模型的输出维度固定，BoVW 的维度取决于词典
    pub fn fixed_dim(&self) -> Option<usize> {
        match self {
            FeatureModel::Vgg16 | FeatureModel::Vgg19 => Some(4096),
            FeatureModel::Resnet => Some(2048),
            FeatureModel::Bovw => None,
        }
    }

    pub fn default_metric(&self) -> Metric {
        match self {
            FeatureModel::Bovw => Metric::Intersection,
            _ => Metric::Euclidean,
        }
    }
}

impl fmt::Display for FeatureModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 全局特征提取器
pub trait FeatureExtractor: Send + Sync {
    fn model(&self) -> FeatureModel;

    fn dim(&self) -> usize;

    /// 从图片文件中提取特征，无法读取的图片返回错误
    fn extract(&self, path: &Path) -> Result<FeatureVector>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let v = FeatureVector::l1_normalized(vec![1.0, 3.0, 0.0, 4.0]);
        assert_eq!(v.as_slice(), &[0.125, 0.375, 0.0, 0.5]);

        let v = FeatureVector::l2_normalized(vec![3.0, 4.0]);
        assert!((v.as_slice()[0] - 0.6).abs() < 1e-6);
        assert!((v.as_slice()[1] - 0.8).abs() < 1e-6);

        let v = FeatureVector::l1_normalized(vec![0.0; 3]);
        assert_eq!(v.as_slice(), &[0.0; 3]);
    }

    #[test]
    fn test_model_defaults() {
        assert_eq!(FeatureModel::Vgg19.fixed_dim(), Some(4096));
        assert_eq!(FeatureModel::Resnet.fixed_dim(), Some(2048));
        assert_eq!(FeatureModel::Bovw.fixed_dim(), None);
        assert_eq!(FeatureModel::Bovw.default_metric(), Metric::Intersection);
        assert_eq!(FeatureModel::Vgg16.default_metric(), Metric::Euclidean);
        assert_eq!(FeatureModel::Resnet.to_string(), "resnet");
    }
}
