use kmeans::{EuclideanDistance, KMeans, KMeansConfig, KMeansState};
use log::info;
use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::error::{Error, Result};

/// 聚类的不平衡度，所有类大小相同时为 1
pub fn imbalance_factor(hist: &[usize]) -> f32 {
    let (mut tot, mut uf) = (0.0, 0.0);
    for h in hist {
        let h = *h as f32;
        tot += h;
        uf += h.powf(2.0);
    }
    if tot == 0.0 {
        return 0.0;
    }
    uf * hist.len() as f32 / tot.powf(2.0)
}

/// 离向量最近的聚类中心的序号和距离平方
pub fn nearest_centroid(point: ArrayView1<f32>, centroids: ArrayView2<f32>) -> (usize, f32) {
    let mut min_distance = f32::INFINITY;
    let mut best_cluster = 0;
    for (j, centroid) in centroids.outer_iter().enumerate() {
        let distance = point.iter().zip(centroid.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
        if distance < min_distance {
            min_distance = distance;
            best_cluster = j;
        }
    }
    (best_cluster, min_distance)
}

/// 使用 kmeans 聚类，返回每行一个的聚类中心
///
/// 参数：
/// - data: 输入向量，每行一个
/// - k: 聚类中心数量
/// - max_iter: 最大迭代次数
pub fn kmeans(data: ArrayView2<f32>, k: usize, max_iter: usize) -> Result<Array2<f32>> {
    let (n, d) = data.dim();
    if k == 0 || d == 0 || n < k {
        return Err(Error::Parse(format!("{n} 个 {d} 维向量无法聚成 {k} 类")));
    }

    let flat = data.iter().copied().collect::<Vec<_>>();
    let km: KMeans<_, 16, _> = KMeans::new(&flat, n, d, EuclideanDistance);
    let conf = KMeansConfig::build()
        .init_done(&|_s: &KMeansState<f32>| info!("KMeans 初始化完成"))
        .iteration_done(&|s: &KMeansState<f32>, nr: usize, new_distsum: f32| {
            info!(
                "第 {} 轮 - 不平衡度：{:.2} | 距离和变化：{:+.2}",
                nr,
                imbalance_factor(&s.centroid_frequency),
                new_distsum - s.distsum
            );
        })
        .build();
    let result = km.kmeans_lloyd(k, max_iter, KMeans::init_kmeanplusplus, &conf);
    info!(
        "聚类完成：{k} 个中心，距离和 {:.2}，不平衡度 {:.2}",
        result.distsum,
        imbalance_factor(&result.centroid_frequency)
    );

    // 中心可能按 SIMD 宽度补齐，只取前 d 维
    let centroids = result.centroids.to_vec();
    let stride = centroids.len() / k;
    if stride < d {
        return Err(Error::Parse(format!("聚类中心维度 {stride} 小于 {d}")));
    }
    let rows = centroids.chunks(stride).flat_map(|c| c[..d].iter().copied()).collect::<Vec<_>>();
    Array2::from_shape_vec((k, d), rows).map_err(|e| Error::Parse(e.to_string()))
}
