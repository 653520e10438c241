//! 每个家具类别一个视觉搜索引擎

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{info, warn};
use rayon::prelude::*;
use regex::Regex;

use crate::cache::SearchCache;
use crate::config::{ConfDir, DataDir};
use crate::detect::FurnitureClass;
use crate::error::{Error, Result};
use crate::feature::FeatureExtractor;
use crate::index::{Metric, Neighbor, VisualIndex};
use crate::utils::{self, pb_style};

/// 单个类别的图库及其视觉索引
pub struct VisualSearchEngine {
    class: FurnitureClass,
    gallery: PathBuf,
    index: RwLock<VisualIndex>,
}

impl VisualSearchEngine {
    pub fn new(class: FurnitureClass, gallery: impl Into<PathBuf>, index: VisualIndex) -> Self {
        Self { class, gallery: gallery.into(), index: RwLock::new(index) }
    }

    /// 扫描图库目录（不递归，按文件名排序）并提取特征，无法读取的图片会被跳过
    pub fn build(
        class: FurnitureClass,
        gallery: &Path,
        suffix: &Regex,
        extractor: &dyn FeatureExtractor,
        cache: &SearchCache,
        metric: Metric,
    ) -> Result<Self> {
        let images = utils::list_images(gallery, suffix);
        info!("构建 {} 索引：{} 张图片", class, images.len());

        let pb = ProgressBar::new(images.len() as u64).with_style(pb_style());
        let features = images
            .par_iter()
            .progress_with(pb.clone())
            .map(|path| match cache.features_for(path, extractor) {
                Ok(vector) => Some((utils::cache_key(path), vector)),
                Err(e) => {
                    pb.suspend(|| warn!("跳过 {}: {}", path.display(), e));
                    None
                }
            })
            .collect::<Vec<_>>();
        pb.finish_and_clear();

        let dim = match extractor.dim() {
            0 => features.iter().flatten().map(|(_, v)| v.dim()).next().unwrap_or(0),
            dim => dim,
        };
        let mut index = VisualIndex::new(class.dir_name(), extractor.model(), metric, dim);
        for (id, vector) in features.into_iter().flatten() {
            if let Err(e) = index.insert(id.clone(), vector) {
                warn!("跳过 {id}: {e}");
            }
        }
        info!("{} 索引构建完成：{} / {} 张图片", class, index.len(), images.len());
        Ok(Self::new(class, gallery, index))
    }

    /// 读取已保存的索引，文件不存在或模型、度量、维度不一致时重新构建并保存
    pub fn open_or_build(
        conf_dir: &ConfDir,
        class: FurnitureClass,
        gallery: &Path,
        suffix: &Regex,
        extractor: &dyn FeatureExtractor,
        cache: &SearchCache,
        metric: Metric,
    ) -> Result<Self> {
        let path = conf_dir.index(class, extractor.model());
        match VisualIndex::load(&path) {
            Ok(index) if is_compatible(&index, extractor, metric) => {
                info!("加载 {} 索引：{} 张图片", class, index.len());
                return Ok(Self::new(class, gallery, index));
            }
            Ok(index) => warn!(
                "{} 索引不兼容（{} {} {} 维），重新构建",
                class,
                index.model(),
                index.metric(),
                index.dim()
            ),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("无法读取 {}: {}，重新构建", path.display(), e),
        }
        let engine = Self::build(class, gallery, suffix, extractor, cache, metric)?;
        engine.save(&path)?;
        Ok(engine)
    }

    pub fn class(&self) -> FurnitureClass {
        self.class
    }

    pub fn gallery(&self) -> &Path {
        &self.gallery
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, VisualIndex> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, VisualIndex> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 查询与图片最相似的 k 张图库图片，特征未缓存时会提取并写入缓存
    pub fn find_similar(
        &self,
        path: &Path,
        k: usize,
        extractor: &dyn FeatureExtractor,
        cache: &SearchCache,
    ) -> Result<Vec<Neighbor>> {
        let vector = cache.features_for(path, extractor)?;
        self.read().query(&vector, k)
    }

    /// 把图片加入索引，返回 `true` 表示新插入
    pub fn add(&self, path: &Path, extractor: &dyn FeatureExtractor, cache: &SearchCache) -> Result<bool> {
        let vector = cache.features_for(path, extractor)?;
        self.write().insert(utils::cache_key(path), vector)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        self.write().remove(id).map(|_| ())
    }

    /// 图库图片的完整路径
    pub fn image_path(&self, id: &str) -> PathBuf {
        self.gallery.join(id)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.read().save(path)
    }

    /// 复制当前索引内容，用于导出
    pub fn snapshot(&self) -> VisualIndex {
        self.read().clone()
    }
}

fn is_compatible(index: &VisualIndex, extractor: &dyn FeatureExtractor, metric: Metric) -> bool {
    index.model() == extractor.model()
        && index.metric() == metric
        && (extractor.dim() == 0 || index.dim() == extractor.dim())
}

/// 所有类别的视觉搜索引擎，只包含图库目录存在的类别
#[derive(Default)]
pub struct Galleries {
    engines: HashMap<FurnitureClass, VisualSearchEngine>,
}

impl Galleries {
    pub fn open(
        conf_dir: &ConfDir,
        data_dir: &DataDir,
        suffix: &Regex,
        extractor: &dyn FeatureExtractor,
        cache: &SearchCache,
        metric: Metric,
    ) -> Result<Self> {
        let mut galleries = Self::default();
        for class in FurnitureClass::ALL {
            let gallery = data_dir.gallery(class);
            if !gallery.is_dir() {
                info!("{} 图库不存在，跳过: {}", class, gallery.display());
                continue;
            }
            let engine = VisualSearchEngine::open_or_build(
                conf_dir, class, &gallery, suffix, extractor, cache, metric,
            )?;
            galleries.insert(engine);
        }
        Ok(galleries)
    }

    pub fn insert(&mut self, engine: VisualSearchEngine) {
        self.engines.insert(engine.class(), engine);
    }

    pub fn get(&self, class: FurnitureClass) -> Option<&VisualSearchEngine> {
        self.engines.get(&class)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// 按类别顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = &VisualSearchEngine> {
        FurnitureClass::ALL.into_iter().filter_map(move |class| self.engines.get(&class))
    }

    /// 在所有图库中搜索并按距离合并，返回 (类别, 结果)
    pub fn find_similar_all(
        &self,
        path: &Path,
        k: usize,
        extractor: &dyn FeatureExtractor,
        cache: &SearchCache,
    ) -> Result<Vec<(FurnitureClass, Neighbor)>> {
        let mut merged = vec![];
        for engine in self.iter().filter(|e| !e.is_empty()) {
            let neighbors = engine.find_similar(path, k, extractor, cache)?;
            merged.extend(neighbors.into_iter().map(|n| (engine.class(), n)));
        }
        if merged.is_empty() {
            return Err(Error::EmptyIndex("所有图库".to_string()));
        }
        merged.sort_by(|a, b| a.1.distance.total_cmp(&b.1.distance));
        merged.truncate(k);
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::feature::{FeatureModel, FeatureVector};

    /// 以文件内容的第一个字节作为特征
    struct ByteExtractor;

    impl FeatureExtractor for ByteExtractor {
        fn model(&self) -> FeatureModel {
            FeatureModel::Resnet
        }

        fn dim(&self) -> usize {
            2
        }

        fn extract(&self, path: &Path) -> Result<FeatureVector> {
            let data = fs::read(path)?;
            match data.first() {
                Some(&b) => Ok(FeatureVector::new(vec![b as f32, 0.0])),
                None => Err(Error::Parse(format!("空文件 {}", path.display()))),
            }
        }
    }

    #[test]
    fn test_build_and_query() {
        let dir = tempfile::TempDir::new().unwrap();
        let conf_dir: ConfDir = dir.path().join("conf").to_string_lossy().parse().unwrap();
        let gallery = dir.path().join("images").join("chair");
        fs::create_dir_all(&gallery).unwrap();
        fs::write(gallery.join("a.jpg"), [10]).unwrap();
        fs::write(gallery.join("b.jpg"), [20]).unwrap();
        fs::write(gallery.join("broken.jpg"), []).unwrap();
        fs::write(gallery.join("notes.txt"), [15]).unwrap();
        let query = dir.path().join("query.jpg");
        fs::write(&query, [19]).unwrap();

        let cache = SearchCache::open(&conf_dir, FeatureModel::Resnet);
        let suffix = utils::suffix_regex("jpg,png");
        let engine = VisualSearchEngine::open_or_build(
            &conf_dir,
            FurnitureClass::Chair,
            &gallery,
            &suffix,
            &ByteExtractor,
            &cache,
            Metric::Euclidean,
        )
        .unwrap();
        assert_eq!(engine.len(), 2);
        assert!(conf_dir.index(FurnitureClass::Chair, FeatureModel::Resnet).exists());

        let result = engine.find_similar(&query, 5, &ByteExtractor, &cache).unwrap();
        let ids = result.iter().map(|n| n.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["b.jpg", "a.jpg"]);
        assert_eq!(engine.image_path("a.jpg"), gallery.join("a.jpg"));

        engine.remove("a.jpg").unwrap();
        assert!(engine.remove("a.jpg").unwrap_err().is_not_found());

        let c = gallery.join("c.jpg");
        fs::write(&c, [18]).unwrap();
        assert!(engine.add(&c, &ByteExtractor, &cache).unwrap());
        assert!(!engine.add(&c, &ByteExtractor, &cache).unwrap());
        assert_eq!(engine.snapshot().ids(), &["b.jpg", "c.jpg"]);
    }
}
