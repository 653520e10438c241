use log::{debug, info};
use ndarray::{Array1, Array2};

use super::catalog::Catalog;
use super::preprocess::preprocess;
use super::vectorizer::{CountVectorizer, TruncatedSvd};
use super::word2vec::WordVectors;
use crate::error::{Error, Result};
use crate::utils::cosine_distance;

/// SVD 降维后的维度
pub const SVD_COMPONENTS: usize = 25;
/// 随机子空间迭代次数
pub const SVD_ITERATIONS: usize = 5;
const SVD_SEED: u64 = 42;

/// 与查询最接近的商品
#[derive(Debug, Clone, PartialEq)]
pub enum Closest {
    /// 余弦距离小于 1 的最近商品
    Found { id: String, distance: f64 },
    NotFound,
}

/// 词向量联想的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Association {
    Found(Vec<String>),
    /// 没有最近商品，或者词向量模型中没有该商品
    Missing,
}

/// 商品文本搜索引擎
pub struct TextSearchEngine {
    catalog: Catalog,
    vectorizer: CountVectorizer,
    svd: TruncatedSvd,
    /// 每个商品降维后的向量，行顺序与商品目录一致
    transformed: Array2<f64>,
    word2vec: Option<WordVectors>,
    count: usize,
}

impl TextSearchEngine {
    /// 在商品目录上拟合词频向量和 SVD
    pub fn build(catalog: Catalog, word2vec: Option<WordVectors>) -> Result<Self> {
        let docs = catalog.items().iter().map(|item| preprocess(&item.document())).collect::<Vec<_>>();
        let vectorizer = CountVectorizer::fit(&docs);
        if vectorizer.is_empty() {
            return Err(Error::EmptyIndex("商品目录".to_string()));
        }
        let rows = docs.iter().map(|doc| vectorizer.transform(doc)).collect::<Vec<_>>();
        let (svd, transformed) = TruncatedSvd::fit_transform(
            &rows,
            vectorizer.len(),
            SVD_COMPONENTS,
            SVD_ITERATIONS,
            SVD_SEED,
        );
        info!(
            "文本搜索引擎：{} 件商品，词表 {} 个词，降维到 {} 维",
            catalog.len(),
            vectorizer.len(),
            svd.n_components()
        );
        Ok(Self { catalog, vectorizer, svd, transformed, word2vec, count: 10 })
    }

    /// 设置返回的结果数量
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// 商品在降维空间中的向量
    pub fn item_vector(&self, id: &str) -> Option<Array1<f64>> {
        self.catalog.position(id).map(|i| self.transformed.row(i).to_owned())
    }

    /// 把文本投影到降维空间
    pub fn project(&self, text: &str) -> Array1<f64> {
        self.svd.transform(&self.vectorizer.transform(&preprocess(text)))
    }

    fn distances(&self, query: &Array1<f64>) -> Vec<f64> {
        let query = query.to_vec();
        self.transformed
            .outer_iter()
            .map(|row| cosine_distance(&query, &row.to_vec()))
            .collect()
    }

    /// 距离最小的商品，只有距离严格小于 1 才算找到，距离相同时先出现的优先
    pub fn find_closest(&self, text: &str) -> Closest {
        let mut closest = Closest::NotFound;
        let mut best = 1.0;
        for (i, d) in self.distances(&self.project(text)).into_iter().enumerate() {
            if d < best {
                best = d;
                closest = Closest::Found { id: self.catalog.items()[i].id.clone(), distance: d };
            }
        }
        closest
    }

    /// 距离最小的 n 个商品，按距离升序，距离相同时按目录顺序
    pub fn find_n_closest(&self, text: &str, n: usize) -> Vec<(String, f64)> {
        self.nearest_items(&self.project(text), n)
    }

    /// 降维空间中距离向量最近的 n 个商品
    pub fn nearest_items(&self, vector: &Array1<f64>, n: usize) -> Vec<(String, f64)> {
        let mut distances = self.distances(vector).into_iter().enumerate().collect::<Vec<_>>();
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));
        distances.truncate(n);
        distances.into_iter().map(|(i, d)| (self.catalog.items()[i].id.clone(), d)).collect()
    }

    /// 文本搜索，返回商品图片路径
    pub fn process_query(&self, text: &str) -> Vec<String> {
        let ids = self.find_n_closest(text, self.count).into_iter().map(|(id, _)| id);
        self.image_paths(&ids.collect::<Vec<_>>())
    }

    /// 用最接近的商品在词向量模型中联想
    pub fn associate(&self, text: &str) -> Association {
        let Closest::Found { id, distance } = self.find_closest(text) else {
            return Association::Missing;
        };
        let Some(word2vec) = &self.word2vec else {
            return Association::Missing;
        };
        match word2vec.most_similar(&id, self.count) {
            Some(similar) => {
                debug!("最接近的商品为 {id}（距离 {distance:.3}），联想到 {} 件", similar.len());
                Association::Found(similar.into_iter().map(|(id, _)| id).collect())
            }
            None => Association::Missing,
        }
    }

    /// 词向量联想搜索，联想失败时返回目录中的前 n 件商品
    pub fn process_query_w2vec(&self, text: &str) -> Vec<String> {
        match self.associate(text) {
            Association::Found(ids) => self.image_paths(&ids),
            Association::Missing => {
                debug!("词向量联想失败，返回前 {} 件商品", self.count);
                self.image_paths(&self.first_ids())
            }
        }
    }

    fn first_ids(&self) -> Vec<String> {
        self.catalog.items().iter().take(self.count).map(|item| item.id.clone()).collect()
    }

    /// 商品 ID 转换为图片路径，跳过没有图片的商品
    ///
    /// 任意一个 ID 不在目录中时，改为返回前 n 件商品的图片
    pub fn image_paths(&self, ids: &[String]) -> Vec<String> {
        let items = match ids.iter().map(|id| self.catalog.get(id)).collect::<Option<Vec<_>>>() {
            Some(items) => items,
            None => self.catalog.items().iter().take(self.count).collect(),
        };
        items.into_iter().filter(|item| !item.img.is_empty()).map(|item| item.img.clone()).collect()
    }
}

/// 文本查询为空时使用检测到的类别作为查询，`pottedplant` 替换为 `plant pot`
pub fn resolve_text_query(text: &str, object_class: &str) -> String {
    if !text.trim().is_empty() {
        return text.to_string();
    }
    match object_class {
        "pottedplant" => "plant pot".to_string(),
        class => class.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::CatalogItem;

    fn item(id: &str, desc: &str, img: &str) -> CatalogItem {
        CatalogItem {
            id: id.to_string(),
            desc: desc.to_string(),
            kind: String::new(),
            name: String::new(),
            color: String::new(),
            img: img.to_string(),
        }
    }

    fn engine() -> TextSearchEngine {
        let catalog = Catalog::new(vec![
            item("A", "red chair", "a.jpg"),
            item("B", "blue sofa", "b.jpg"),
            item("C", "oak table", ""),
        ]);
        TextSearchEngine::build(catalog, None).unwrap().with_count(2)
    }

    #[test]
    fn test_find_closest() {
        let engine = engine();
        assert!(matches!(engine.find_closest("chair"), Closest::Found { id, .. } if id == "A"));
        assert_eq!(engine.find_closest("lamp"), Closest::NotFound);
    }

    #[test]
    fn test_image_paths_fallback() {
        let engine = engine();
        assert_eq!(engine.image_paths(&["B".to_string(), "C".to_string()]), vec!["b.jpg"]);
        assert_eq!(engine.image_paths(&["B".to_string(), "Z".to_string()]), vec!["a.jpg", "b.jpg"]);
    }

    #[test]
    fn test_w2vec_fallback_without_model() {
        let engine = engine();
        assert_eq!(engine.associate("chair"), Association::Missing);
        assert_eq!(engine.process_query_w2vec("chair"), vec!["a.jpg", "b.jpg"]);
    }

    #[test]
    fn test_empty_catalog() {
        assert!(TextSearchEngine::build(Catalog::default(), None).is_err());
    }

    #[test]
    fn test_resolve_text_query() {
        assert_eq!(resolve_text_query("", "pottedplant"), "plant pot");
        assert_eq!(resolve_text_query("  ", "chair"), "chair");
        assert_eq!(resolve_text_query("green lamp", "chair"), "green lamp");
    }
}
