use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;

/// 一对匹配的描述符
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    /// 查询描述符的行号
    pub query_idx: usize,
    /// 被匹配描述符的行号
    pub train_idx: usize,
    pub distance: f32,
}

fn l2_squared(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// 暴力 k=2 近邻匹配并做 Lowe 比率测试
///
/// 对 `query` 的每一行在 `train` 中找到最近和次近的描述符，
/// 只有最近距离 < `ratio` × 次近距离时才保留。`train` 少于两行时没有匹配。
pub fn ratio_match(query: &Array2<f32>, train: &Array2<f32>, ratio: f32) -> Vec<Correspondence> {
    if train.nrows() < 2 || query.ncols() != train.ncols() {
        return vec![];
    }
    (0..query.nrows())
        .into_par_iter()
        .filter_map(|qi| {
            let q = query.row(qi);
            let (mut best, mut second) = ((usize::MAX, f32::INFINITY), f32::INFINITY);
            for (ti, t) in train.outer_iter().enumerate() {
                let d = l2_squared(q, t);
                if d < best.1 {
                    second = best.1;
                    best = (ti, d);
                } else if d < second {
                    second = d;
                }
            }
            let (best_d, second_d) = (best.1.sqrt(), second.sqrt());
            (best_d < ratio * second_d).then_some(Correspondence {
                query_idx: qi,
                train_idx: best.0,
                distance: best_d,
            })
        })
        .collect()
}
