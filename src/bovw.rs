//! SIFT 视觉词袋特征

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{info, warn};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::feature::{FeatureExtractor, FeatureModel, FeatureVector};
use crate::geom::{Keypoints, LocalFeatures};
use crate::kmeans::{kmeans, nearest_centroid};
use crate::utils;

/// 默认视觉单词数量
pub const FEATURES_CLUSTERS: usize = 1000;

/// 视觉词典：局部描述符的聚类中心，每行一个
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    centers: Array2<f32>,
}

impl Vocabulary {
    /// 用 K-means 训练视觉词典
    pub fn train(descriptors: &Array2<f32>, k: usize, max_iter: usize) -> Result<Self> {
        let n = descriptors.nrows();
        if k == 0 || n < k {
            return Err(Error::Parse(format!("训练视觉词典需要至少 {k} 个描述符，实际只有 {n} 个")));
        }
        info!("使用 {n} 个描述符训练 {k} 个视觉单词");
        let centers = kmeans(descriptors.view(), k, max_iter)?;
        Ok(Self { centers })
    }

    pub fn len(&self) -> usize {
        self.centers.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    pub fn descriptor_dim(&self) -> usize {
        self.centers.ncols()
    }

    /// 离描述符最近的视觉单词
    pub fn nearest(&self, descriptor: ArrayView1<f32>) -> usize {
        nearest_centroid(descriptor, self.centers.view()).0
    }

/// 统计视觉单词直方图，并按 L1 归一化
    pub fn histogram(&self, descriptors: &Array2<f32>) -> Result<FeatureVector> {
        if descriptors.ncols() != self.descriptor_dim() && descriptors.nrows() > 0 {
            return Err(Error::DimensionMismatch {
                expected: self.descriptor_dim(),
                actual: descriptors.ncols(),
            });
        }
        let centers = self.centers.view();
        let mut hist = vec![0.0; self.len()];
        for d in descriptors.axis_iter(Axis(0)) {
            hist[nearest_centroid(d, centers).0] += 1.0;
        }
        Ok(FeatureVector::l1_normalized(hist))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        utils::atomic_write(path, |writer| {
            bincode::serialize_into(writer, self).map_err(std::io::Error::other)
        })?;
        info!("视觉词典已保存到 {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let vocabulary: Vocabulary = bincode::deserialize_from(reader)?;
        if vocabulary.is_empty() {
            return Err(Error::Parse(format!("视觉词典已损坏: {}", path.display())));
        }
        Ok(vocabulary)
    }
}

/// 把局部特征点量化为视觉单词直方图
pub struct BovwExtractor<F> {
    features: F,
    vocabulary: Vocabulary,
}

impl<F: LocalFeatures> BovwExtractor<F> {
    pub fn new(features: F, vocabulary: Vocabulary) -> Self {
        Self { features, vocabulary }
    }
}

impl<F: LocalFeatures> FeatureExtractor for BovwExtractor<F> {
    fn model(&self) -> FeatureModel {
        FeatureModel::Bovw
    }

    fn dim(&self) -> usize {
        self.vocabulary.len()
    }

    fn extract(&self, path: &Path) -> Result<FeatureVector> {
        let Keypoints { descriptors, .. } = self.features.detect(path)?;
        if descriptors.nrows() == 0 {
            warn!("{} 中没有检测到特征点", path.display());
        }
        self.vocabulary.histogram(&descriptors)
    }
}
