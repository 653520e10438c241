use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use clap::ValueEnum;
use log::{debug, info};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::feature::{FeatureModel, FeatureVector};
use crate::utils;

/// 向量距离度量
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// 直方图交：1 - Σmin(a, b)，适用于 L1 归一化的直方图
    Intersection,
    /// 欧氏距离
    Euclidean,
    /// 余弦距离
    Cosine,
}

impl Metric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Intersection => 1.0 - a.iter().zip(b).map(|(x, y)| x.min(*y)).sum::<f32>(),
            Metric::Euclidean => utils::euclidean_distance(a, b),
            Metric::Cosine => {
                let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    na += x * x;
                    nb += y * y;
                }
                if na == 0.0 || nb == 0.0 {
                    return 1.0;
                }
                1.0 - dot / (na.sqrt() * nb.sqrt())
            }
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Metric::Intersection => "intersection",
            Metric::Euclidean => "euclidean",
            Metric::Cosine => "cosine",
        };
        f.write_str(name)
    }
}

/// 搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// 图片 ID，即图库中的文件名
    pub id: String,
    /// 与查询向量的距离
    pub distance: f32,
}

/// 单个家具类别的视觉索引，暴力计算所有向量的距离
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualIndex {
    name: String,
    model: FeatureModel,
    metric: Metric,
    dim: usize,
    ids: Vec<String>,
    vectors: Vec<FeatureVector>,
    /// ID -> 插入位置，加载时重建
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

impl VisualIndex {
    pub fn new(name: impl Into<String>, model: FeatureModel, metric: Metric, dim: usize) -> Self {
        Self {
            name: name.into(),
            model,
            metric,
            dim,
            ids: vec![],
            vectors: vec![],
            positions: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> FeatureModel {
        self.model
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn get(&self, id: &str) -> Option<&FeatureVector> {
        self.positions.get(id).map(|&i| &self.vectors[i])
    }

    fn check_dim(&self, vector: &FeatureVector) -> Result<()> {
        if vector.dim() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: vector.dim() });
        }
        Ok(())
    }

    /// 插入或覆盖一个向量，覆盖时保留原来的插入位置
    ///
    /// 返回 `true` 表示新插入
    pub fn insert(&mut self, id: impl Into<String>, vector: FeatureVector) -> Result<bool> {
        self.check_dim(&vector)?;
        let id = id.into();
        match self.positions.get(&id) {
            Some(&i) => {
                self.vectors[i] = vector;
                Ok(false)
            }
            None => {
                self.positions.insert(id.clone(), self.ids.len());
                self.ids.push(id);
                self.vectors.push(vector);
                Ok(true)
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Result<FeatureVector> {
        let pos = self
            .positions
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("{} 中不存在 {}", self.name, id)))?;
        self.ids.remove(pos);
        let vector = self.vectors.remove(pos);
        for i in self.positions.values_mut() {
            if *i > pos {
                *i -= 1;
            }
        }
        Ok(vector)
    }

    /// 返回距离最小的 k 个结果，距离相同时按插入顺序排列
    pub fn query(&self, vector: &FeatureVector, k: usize) -> Result<Vec<Neighbor>> {
        if self.is_empty() {
            return Err(Error::EmptyIndex(self.name.clone()));
        }
        self.check_dim(vector)?;

        let query = vector.as_slice();
        let mut distances = self
            .vectors
            .par_iter()
            .enumerate()
            .map(|(i, v)| (i, self.metric.distance(query, v.as_slice())))
            .collect::<Vec<_>>();
        // 稳定排序，保证相同距离时按插入顺序
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));
        distances.truncate(k);

        Ok(distances
            .into_iter()
            .map(|(i, distance)| Neighbor { id: self.ids[i].clone(), distance })
            .collect())
    }

    /// 导出为 (ID, 矩阵)，矩阵每行对应一个 ID
    pub fn to_array(&self) -> (Vec<String>, Array2<f32>) {
        let mut data = Array2::zeros((self.len(), self.dim));
        for (mut row, v) in data.outer_iter_mut().zip(&self.vectors) {
            row.iter_mut().zip(v.as_slice()).for_each(|(a, b)| *a = *b);
        }
        (self.ids.clone(), data)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        info!("保存索引 {} 到 {}（{} 条）", self.name, path.display(), self.len());
        utils::atomic_write(path, |writer| {
            bincode::serialize_into(writer, self).map_err(std::io::Error::other)
        })?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut index: VisualIndex = bincode::deserialize_from(reader)?;
        if index.ids.len() != index.vectors.len() {
            return Err(Error::Parse(format!("索引文件已损坏: {}", path.display())));
        }
        index.positions = index.ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        debug!("从 {} 加载索引 {}（{} 条）", path.display(), index.name, index.len());
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(data: &[f32]) -> FeatureVector {
        FeatureVector::new(data.to_vec())
    }

    #[test]
    fn test_metric_distance() {
        let a = [0.5, 0.5, 0.0];
        let b = [0.0, 0.5, 0.5];
        assert!((Metric::Intersection.distance(&a, &b) - 0.5).abs() < 1e-6);
        assert!(Metric::Intersection.distance(&a, &a).abs() < 1e-6);
        assert!((Metric::Euclidean.distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert!(Metric::Cosine.distance(&[1.0, 1.0], &[2.0, 2.0]).abs() < 1e-6);
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut index = VisualIndex::new("chair", FeatureModel::Bovw, Metric::Euclidean, 2);
        assert!(index.insert("a", vector(&[0.0, 0.0])).unwrap());
        assert!(index.insert("b", vector(&[1.0, 0.0])).unwrap());
        assert!(!index.insert("a", vector(&[1.0, 0.0])).unwrap());
        assert_eq!(index.ids(), &["a".to_string(), "b".to_string()]);

        // 距离相同时，按插入顺序返回
        let result = index.query(&vector(&[1.0, 0.0]), 2).unwrap();
        assert_eq!(result[0].id, "a");
        assert_eq!(result[1].id, "b");
    }

    #[test]
    fn test_remove_updates_positions() {
        let mut index = VisualIndex::new("sofa", FeatureModel::Bovw, Metric::Euclidean, 1);
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            index.insert(*id, vector(&[i as f32])).unwrap();
        }
        index.remove("a").unwrap();
        assert!(matches!(index.remove("a"), Err(Error::NotFound(_))));
        assert_eq!(index.get("c"), Some(&vector(&[2.0])));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index").join("bed_bovw.bin");
        let mut index = VisualIndex::new("bed", FeatureModel::Bovw, Metric::Intersection, 2);
        index.insert("x.jpg", vector(&[0.25, 0.75])).unwrap();
        index.insert("y.jpg", vector(&[0.75, 0.25])).unwrap();
        index.save(&path).unwrap();

        let loaded = VisualIndex::load(&path).unwrap();
        assert_eq!(loaded.ids(), index.ids());
        assert_eq!(loaded.metric(), Metric::Intersection);
        assert!(loaded.contains("y.jpg"));
        let (ids, data) = loaded.to_array();
        assert_eq!(ids.len(), 2);
        assert_eq!(data[[1, 0]], 0.75);
    }
}
