use std::collections::BTreeMap;
use std::sync::LazyLock;

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;

/// 至少两个字符的单词
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w\w+\b").expect("failed to build regex"));

/// 稀疏行，按列号升序
pub type SparseRow = Vec<(usize, f64)>;

/// 词频向量化，词表按字母顺序排列
#[derive(Debug, Clone, Default)]
pub struct CountVectorizer {
    vocabulary: BTreeMap<String, usize>,
}

impl CountVectorizer {
    pub fn fit<S: AsRef<str>>(docs: &[S]) -> Self {
        let mut words = BTreeMap::new();
        for doc in docs {
            for token in TOKEN_RE.find_iter(&doc.as_ref().to_lowercase()) {
                words.insert(token.as_str().to_string(), 0);
            }
        }
        words.values_mut().enumerate().for_each(|(i, v)| *v = i);
        Self { vocabulary: words }
    }

    pub fn len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }

    pub fn index_of(&self, word: &str) -> Option<usize> {
        self.vocabulary.get(word).copied()
    }

    /// 统计词频，词表以外的单词被忽略
    pub fn transform(&self, doc: &str) -> SparseRow {
        let mut counts = BTreeMap::new();
        for token in TOKEN_RE.find_iter(&doc.to_lowercase()) {
            if let Some(&i) = self.vocabulary.get(token.as_str()) {
                *counts.entry(i).or_insert(0.0) += 1.0;
            }
        }
        counts.into_iter().collect()
    }
}

/// 截断 SVD，使用随机子空间迭代近似
#[derive(Debug, Clone)]
pub struct TruncatedSvd {
    /// k × 词表大小
    components: Array2<f64>,
}

/// 随机子空间额外的列数
const OVERSAMPLES: usize = 10;

impl TruncatedSvd {
    /// 在稀疏矩阵上拟合，返回模型和降维后的矩阵（n × k）
    ///
    /// 实际的分量数不超过行数和列数
    pub fn fit_transform(
        rows: &[SparseRow],
        n_features: usize,
        n_components: usize,
        n_iter: usize,
        seed: u64,
    ) -> (Self, Array2<f64>) {
        let n = rows.len();
        let k = n_components.min(n).min(n_features);
        if k == 0 {
            return (Self { components: Array2::zeros((0, n_features)) }, Array2::zeros((n, 0)));
        }
        let l = (k + OVERSAMPLES).min(n).min(n_features);

        let mut rng = StdRng::seed_from_u64(seed);
        let omega = Array2::from_shape_fn((n_features, l), |_| rng.random_range(-1.0..1.0));

        let mut q = orthonormalize(x_dot(rows, &omega));
        for _ in 0..n_iter {
            q = orthonormalize(xt_dot(rows, &q, n_features));
            q = orthonormalize(x_dot(rows, &q));
        }

        // B = Qᵀ X，l × 词表大小
        let b = xt_dot(rows, &q, n_features).reversed_axes();
        let bbt = b.dot(&b.t());
        let eigen = SymmetricEigen::new(DMatrix::from_fn(l, l, |i, j| bbt[[i, j]]));

        let mut order = (0..l).collect::<Vec<_>>();
        order.sort_by(|&x, &y| eigen.eigenvalues[y].total_cmp(&eigen.eigenvalues[x]));

        // Vᵀ 的第 i 行 = u_iᵀ B / σ_i
        let mut components = Array2::zeros((k, n_features));
        for (mut row, &idx) in components.outer_iter_mut().zip(&order[..k]) {
            let sigma = eigen.eigenvalues[idx].max(0.0).sqrt();
            if sigma < 1e-10 {
                continue;
            }
            let u = Array1::from_iter(eigen.eigenvectors.column(idx).iter().copied());
            row.assign(&(u.dot(&b) / sigma));
        }

        let svd = Self { components };
        let transformed = svd.transform_all(rows);
        (svd, transformed)
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    pub fn transform(&self, row: &SparseRow) -> Array1<f64> {
        let mut out = Array1::zeros(self.n_components());
        for &(j, value) in row {
            out.scaled_add(value, &self.components.column(j));
        }
        out
    }

    pub fn transform_all(&self, rows: &[SparseRow]) -> Array2<f64> {
        let mut out = Array2::zeros((rows.len(), self.n_components()));
        for (mut dst, row) in out.outer_iter_mut().zip(rows) {
            dst.assign(&self.transform(row));
        }
        out
    }
}

/// X · M，X 为 n × 词表大小的稀疏矩阵
fn x_dot(rows: &[SparseRow], m: &Array2<f64>) -> Array2<f64> {
    let mut out = Array2::zeros((rows.len(), m.ncols()));
    for (mut dst, row) in out.outer_iter_mut().zip(rows) {
        for &(j, value) in row {
            dst.scaled_add(value, &m.row(j));
        }
    }
    out
}

/// Xᵀ · M
fn xt_dot(rows: &[SparseRow], m: &Array2<f64>, n_features: usize) -> Array2<f64> {
    let mut out = Array2::zeros((n_features, m.ncols()));
    for (i, row) in rows.iter().enumerate() {
        for &(j, value) in row {
            out.row_mut(j).scaled_add(value, &m.row(i));
        }
    }
    out
}

/// 改进的 Gram-Schmidt 列正交化，线性相关的列置零
fn orthonormalize(mut m: Array2<f64>) -> Array2<f64> {
    for c in 0..m.ncols() {
        for p in 0..c {
            let proj = dot(m.column(p), m.column(c));
            let prev = m.column(p).to_owned();
            m.column_mut(c).scaled_add(-proj, &prev);
        }
        let norm = dot(m.column(c), m.column(c)).sqrt();
        let mut col = m.column_mut(c);
        if norm < 1e-10 {
            col.fill(0.0);
        } else {
            col /= norm;
        }
    }
    m
}

fn dot(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.dot(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_vectorizer() {
        let cv = CountVectorizer::fit(&["red chair", "blue sofa", "a red red bed"]);
        // 单字符单词被忽略，词表按字母排序
        assert_eq!(cv.len(), 5);
        assert_eq!(cv.index_of("bed"), Some(0));
        assert_eq!(cv.index_of("sofa"), Some(4));
        assert_eq!(cv.index_of("a"), None);
        assert_eq!(cv.transform("red bed red lamp"), vec![(0, 1.0), (3, 2.0)]);
    }

    #[test]
    fn test_svd_full_rank() {
        let docs = ["red chair", "red chair chair", "blue sofa", "blue sofa sofa"];
        let cv = CountVectorizer::fit(&docs);
        let rows = docs.iter().map(|d| cv.transform(d)).collect::<Vec<_>>();
        let (svd, x) = TruncatedSvd::fit_transform(&rows, cv.len(), 25, 5, 42);
        assert_eq!(svd.n_components(), 4);
        assert_eq!(x.dim(), (4, 4));

        // 投影保持内积：重建误差很小
        for (i, row) in rows.iter().enumerate() {
            let norm2 = row.iter().map(|(_, v)| v * v).sum::<f64>();
            let proj2 = x.row(i).dot(&x.row(i));
            assert!((norm2 - proj2).abs() < 1e-8, "{norm2} != {proj2}");
        }
        // 不同主题的文档在降维空间中正交
        assert!(x.row(0).dot(&x.row(2)).abs() < 1e-8);
    }

    #[test]
    fn test_svd_empty() {
        let (svd, x) = TruncatedSvd::fit_transform(&[], 3, 25, 5, 42);
        assert_eq!(svd.n_components(), 0);
        assert_eq!(x.nrows(), 0);
    }
}
