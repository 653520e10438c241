//! 基于局部特征点和 RANSAC 单应性的几何校验

mod homography;
mod matcher;

use std::path::Path;

use log::debug;
use nalgebra::Point2;
use ndarray::Array2;

pub use self::homography::{RansacParams, RansacResult, find_homography, fit_dlt};
pub use self::matcher::{Correspondence, ratio_match};
use crate::error::Result;

/// 图片的局部特征点及其描述符，`descriptors` 的每一行对应一个特征点
#[derive(Debug, Clone)]
pub struct Keypoints {
    pub points: Vec<Point2<f64>>,
    pub descriptors: Array2<f32>,
}

impl Keypoints {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// 局部特征提取器，例如 SIFT
pub trait LocalFeatures: Send + Sync {
    /// 以灰度模式读取图片并提取特征点
    fn detect(&self, path: &Path) -> Result<Keypoints>;
}

impl<T: LocalFeatures + ?Sized> LocalFeatures for Box<T> {
    fn detect(&self, path: &Path) -> Result<Keypoints> {
        (**self).detect(path)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VerifyParams {
    /// Lowe 比率测试阈值
    pub ratio: f32,
    /// 匹配数量必须严格大于该值才进行 RANSAC
    pub min_match_count: usize,
    pub ransac_threshold: f64,
    pub confidence: f64,
    pub max_iters: usize,
    pub seed: u64,
}

impl Default for VerifyParams {
    fn default() -> Self {
        Self {
            ratio: 0.8,
            min_match_count: 5,
            ransac_threshold: 15.0,
            confidence: 0.995,
            max_iters: 2000,
            seed: 42,
        }
    }
}

impl VerifyParams {
    fn ransac(&self) -> RansacParams {
        RansacParams {
            threshold: self.ransac_threshold,
            confidence: self.confidence,
            max_iters: self.max_iters,
            seed: self.seed,
        }
    }
}

/// 计算候选图片到查询图片的单应性内点数量
///
/// 匹配方向为候选 → 查询：对候选的每个描述符在查询中做比率测试
pub fn count_inliers(query: &Keypoints, candidate: &Keypoints, params: &VerifyParams) -> usize {
    let good = ratio_match(&candidate.descriptors, &query.descriptors, params.ratio);
    if good.len() <= params.min_match_count {
        debug!("有效匹配数量 {} 不足，跳过 RANSAC", good.len());
        return 0;
    }
    let (src, dst): (Vec<_>, Vec<_>) = good
        .iter()
        .map(|m| (candidate.points[m.query_idx], query.points[m.train_idx]))
        .unzip();
    let inliers = find_homography(&src, &dst, &params.ransac())
        .map(|r| r.inlier_count())
        .unwrap_or(0);
    debug!("{} 个有效匹配，{} 个内点", good.len(), inliers);
    inliers
}

/// 几何校验器
pub struct GeometricVerifier<F> {
    features: F,
    params: VerifyParams,
}

impl<F: LocalFeatures> GeometricVerifier<F> {
    pub fn new(features: F, params: VerifyParams) -> Self {
        Self { features, params }
    }

    pub fn params(&self) -> &VerifyParams {
        &self.params
    }

    pub fn keypoints(&self, path: &Path) -> Result<Keypoints> {
        self.features.detect(path)
    }

    /// 计算两张图片之间的内点数量，任意一张无法读取时返回错误
    pub fn inliers(&self, query: &Path, candidate: &Path) -> Result<usize> {
        let query = self.features.detect(query)?;
        self.inliers_with(&query, candidate)
    }

    /// 使用已提取的查询特征点，避免对每个候选重复提取
    pub fn inliers_with(&self, query: &Keypoints, candidate: &Path) -> Result<usize> {
        let candidate = self.features.detect(candidate)?;
        Ok(count_inliers(query, &candidate, &self.params))
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{Matrix3, Vector3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    /// 生成随机特征点，描述符为各点独有的随机向量
    fn random_keypoints(rng: &mut StdRng, n: usize) -> Keypoints {
        let points = (0..n)
            .map(|_| Point2::new(rng.random_range(0.0..300.0), rng.random_range(0.0..300.0)))
            .collect();
        let descriptors = Array2::from_shape_fn((n, 32), |_| rng.random_range(0.0..1.0));
        Keypoints { points, descriptors }
    }

    fn transform(kps: &Keypoints, h: &Matrix3<f64>) -> Keypoints {
        let points = kps
            .points
            .iter()
            .map(|p| {
                let q = h * Vector3::new(p.x, p.y, 1.0);
                Point2::new(q.x / q.z, q.y / q.z)
            })
            .collect();
        Keypoints { points, descriptors: kps.descriptors.clone() }
    }

    #[test]
    fn test_same_object() {
        let mut rng = StdRng::seed_from_u64(42);
        let query = random_keypoints(&mut rng, 40);
        let h = Matrix3::new(0.9, 0.1, 20.0, -0.1, 0.9, 5.0, 0.0, 0.0, 1.0);
        let candidate = transform(&query, &h);
        assert_eq!(count_inliers(&query, &candidate, &VerifyParams::default()), 40);
    }

    #[test]
    fn test_different_object() {
        let mut rng = StdRng::seed_from_u64(42);
        let query = random_keypoints(&mut rng, 40);
        let candidate = random_keypoints(&mut rng, 40);
        // 随机描述符几乎无法通过比率测试
        assert!(count_inliers(&query, &candidate, &VerifyParams::default()) < 10);
    }

    #[test]
    fn test_min_match_count() {
        let mut rng = StdRng::seed_from_u64(1);
        let query = random_keypoints(&mut rng, 5);
        let candidate = query.clone();
        // 恰好 5 个匹配时不进行 RANSAC
        assert_eq!(count_inliers(&query, &candidate, &VerifyParams::default()), 0);
        let params = VerifyParams { min_match_count: 4, ..Default::default() };
        assert_eq!(count_inliers(&query, &candidate, &params), 5);
    }
}
