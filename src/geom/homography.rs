//! RANSAC 单应性估计

use log::trace;
use nalgebra::{Matrix3, Point2, SMatrix, SymmetricEigen, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;

/// 每个假设所需的最少点数
const MODEL_POINTS: usize = 4;
/// 每次迭代中寻找非退化样本的最大尝试次数
const MAX_SAMPLE_ATTEMPTS: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct RansacParams {
    /// 内点的最大重投影误差（像素）
    pub threshold: f64,
    /// 置信度，用于自适应计算迭代次数
    pub confidence: f64,
    pub max_iters: usize,
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self { threshold: 15.0, confidence: 0.995, max_iters: 2000, seed: 42 }
    }
}

#[derive(Debug, Clone)]
pub struct RansacResult {
    pub homography: Matrix3<f64>,
    /// 与输入点一一对应的内点标记
    pub inliers: Vec<bool>,
}

impl RansacResult {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&x| x).count()
    }
}

/// 用 RANSAC 拟合 `src -> dst` 的单应性矩阵
///
/// 点数少于 4 或找不到任何有效模型时返回 `None`
pub fn find_homography(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    params: &RansacParams,
) -> Option<RansacResult> {
    let n = src.len().min(dst.len());
    if n < MODEL_POINTS {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let threshold2 = params.threshold * params.threshold;
    let mut best: Option<(Matrix3<f64>, Vec<bool>, usize)> = None;
    let mut niters = params.max_iters;
    let mut iter = 0;

    while iter < niters {
        iter += 1;
        let Some(sample) = draw_sample(&mut rng, src, dst, n) else {
            break;
        };
        let (s, d): (Vec<_>, Vec<_>) = sample.iter().map(|&i| (src[i], dst[i])).unzip();
        let Some(h) = fit_dlt(&s, &d) else {
            continue;
        };

        let mask = inlier_mask(&h, &src[..n], &dst[..n], threshold2);
        let count = mask.iter().filter(|&&x| x).count();
        if best.as_ref().is_none_or(|(_, _, c)| count > *c) {
            let outlier_ratio = (n - count) as f64 / n as f64;
            niters = update_num_iters(params.confidence, outlier_ratio, niters);
            trace!("RANSAC 第 {iter} 次迭代: {count}/{n} 内点，迭代上限 {niters}");
            best = Some((h, mask, count));
        }
    }

    let (mut homography, inliers, count) = best?;
    if count < MODEL_POINTS {
        return None;
    }

    // 用所有内点重新拟合，内点标记保持不变
    if count > MODEL_POINTS {
        let (s, d): (Vec<_>, Vec<_>) = (0..n).filter(|&i| inliers[i]).map(|i| (src[i], dst[i])).unzip();
        if let Some(h) = fit_dlt(&s, &d) {
            homography = h;
        }
    }

    Some(RansacResult { homography, inliers })
}

/// 随机抽取 4 个互不相同且非退化的点
fn draw_sample(
    rng: &mut StdRng,
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    n: usize,
) -> Option<[usize; MODEL_POINTS]> {
    for _ in 0..MAX_SAMPLE_ATTEMPTS {
        let indices = rand::seq::index::sample(rng, n, MODEL_POINTS);
        let mut sample = [0; MODEL_POINTS];
        sample.iter_mut().zip(indices.iter()).for_each(|(a, b)| *a = b);
        if check_subset(&sample.map(|i| src[i]), &sample.map(|i| dst[i])) {
            return Some(sample);
        }
    }
    None
}

/// 检查样本是否退化：任意三点共线，或者两组点的朝向不一致
fn check_subset(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [1, 2, 3], [0, 2, 3], [0, 1, 3]];
    let mut negative = 0;
    for [a, b, c] in TRIPLES {
        let ds = orientation(&src[a], &src[b], &src[c]);
        let dd = orientation(&dst[a], &dst[b], &dst[c]);
        if is_collinear(ds, &src[a], &src[b], &src[c]) || is_collinear(dd, &dst[a], &dst[b], &dst[c])
        {
            return false;
        }
        if ds * dd < 0.0 {
            negative += 1;
        }
    }
    negative == 0 || negative == 4
}

fn orientation(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn is_collinear(area2: f64, a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> bool {
    let scale = (b - a).norm() * (c - a).norm();
    area2.abs() <= f64::EPSILON * 1e3 * scale.max(1.0) || scale == 0.0
}

/// 自适应更新迭代次数
fn update_num_iters(confidence: f64, outlier_ratio: f64, max_iters: usize) -> usize {
    let num = (1.0 - confidence).max(f64::MIN_POSITIVE);
    let denom = 1.0 - (1.0 - outlier_ratio).powi(MODEL_POINTS as i32);
    if denom < f64::MIN_POSITIVE {
        return 0;
    }
    let (num, denom) = (num.ln(), denom.ln());
    if denom >= 0.0 || -num >= max_iters as f64 * -denom {
        max_iters
    } else {
        (num / denom).round() as usize
    }
}

fn inlier_mask(
    h: &Matrix3<f64>,
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    threshold2: f64,
) -> Vec<bool> {
    src.iter().zip(dst).map(|(s, d)| reprojection_error2(h, s, d) <= threshold2).collect()
}

fn reprojection_error2(h: &Matrix3<f64>, src: &Point2<f64>, dst: &Point2<f64>) -> f64 {
    let p = h * Vector3::new(src.x, src.y, 1.0);
    if p.z.abs() < f64::EPSILON {
        return f64::INFINITY;
    }
    let (dx, dy) = (p.x / p.z - dst.x, p.y / p.z - dst.y);
    dx * dx + dy * dy
}

/// 归一化坐标：平移到质心，缩放使平均距离为 √2
fn normalization(points: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let (cx, cy) = points.iter().fold((0.0, 0.0), |(x, y), p| (x + p.x, y + p.y));
    let (cx, cy) = (cx / n, cy / n);
    let mean = points.iter().map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt()).sum::<f64>() / n;
    if mean < f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

/// 归一化 DLT，最少 4 个点，点数更多时为最小二乘解
pub fn fit_dlt(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    if src.len() < MODEL_POINTS || src.len() != dst.len() {
        return None;
    }
    let ts = normalization(src)?;
    let td = normalization(dst)?;

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (s, d) in src.iter().zip(dst) {
        let s = ts * Vector3::new(s.x, s.y, 1.0);
        let d = td * Vector3::new(d.x, d.y, 1.0);
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);
        let rows = [
            [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u],
            [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v],
        ];
        for row in rows {
            for i in 0..9 {
                for j in 0..9 {
                    ata[(i, j)] += row[i] * row[j];
                }
            }
        }
    }

    // AᵀA 最小特征值对应的特征向量即为 h
    let eigen = SymmetricEigen::new(ata);
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = eigen.eigenvectors.column(min_idx);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let h = td.try_inverse()? * hn * ts;
    if h[(2, 2)].abs() < f64::EPSILON || !h.iter().all(|x| x.is_finite()) {
        return None;
    }
    Some(h / h[(2, 2)])
}
