//! 组合目标检测、视觉搜索、几何校验与文本搜索，处理一次完整的搜索请求

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;

use crate::cache::SearchCache;
use crate::config::{ConfDir, DataDir};
use crate::detect::{
    ALLOWED_CLASSES, BoundingBox, Detections, FurnitureClass, ObjectClass, ObjectDetector,
    best_box_for_class, clicked_object, crop_region, detect_class_onpic,
};
use crate::engine::Galleries;
use crate::error::{Error, Result};
use crate::feature::FeatureExtractor;
use crate::geom::{GeometricVerifier, LocalFeatures};
use crate::imageops;
use crate::index::{Metric, Neighbor};
use crate::metrics;
use crate::rerank::{RankedMatch, geom_check};
use crate::text::{Catalog, TextSearchEngine, WordVectors, resolve_text_query};
use crate::utils;

/// 混合结果中每种搜索方式取前几个
const BLEND_TOP: usize = 4;
/// 特征混合保留的文本结果数量
const FEATURE_BLEND_COUNT: usize = 8;

/// 一条视觉搜索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualMatch {
    pub class: FurnitureClass,
    /// 图库中的文件名
    pub id: String,
    /// 相对于数据目录的路径
    pub path: String,
    pub distance: f32,
    /// 几何校验的内点数量，未校验时为 0
    pub inliers: usize,
}

/// 相似图片搜索的结果，查询图片无法读取时为 `NotFound`
#[derive(Debug, Clone, PartialEq)]
pub enum Similar {
    Found(Vec<VisualMatch>),
    NotFound,
}

impl Similar {
    pub fn into_vec(self) -> Vec<VisualMatch> {
        match self {
            Similar::Found(matches) => matches,
            Similar::NotFound => vec![],
        }
    }
}

/// 文本搜索结果，均为相对于数据目录的图片路径
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TextResults {
    pub countvect: Vec<String>,
    pub w2vec: Vec<String>,
}

/// 一次场景搜索的完整结果
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// 场景图片，相对于数据目录
    pub query_image: String,
    /// 检测到的类别，没有可用目标时为 `all`
    pub object_class: String,
    pub confidence: f32,
    /// 用于展示的目标图片（不带边距的裁剪），没有裁剪时为场景图片本身
    pub object_image: String,
    pub boxes: Vec<BoundingBox>,
    /// 查询图片无法读取时为空
    pub visual: Vec<VisualMatch>,
    pub text: TextResults,
    /// 视觉、联想、文本结果各取前 4 个
    pub blend: Vec<String>,
    /// 点击搜索时是否点中了有效目标
    pub click_valid: bool,
}

/// 更新文本查询后的结果
#[derive(Debug, Clone, Serialize)]
pub struct TextUpdate {
    pub text: TextResults,
    /// 视觉结果前 4 个 + 按特征距离排序的前 8 个文本结果
    pub blend: Vec<String>,
}

/// 场景图片及其尺寸
#[derive(Debug, Clone, Serialize)]
pub struct Scene {
    pub path: String,
    pub width: u32,
    pub height: u32,
}

/// 搜索请求的编排器
pub struct Finder {
    data_dir: DataDir,
    suffix: Regex,
    extractor: Box<dyn FeatureExtractor>,
    detector: Box<dyn ObjectDetector>,
    verifier: Option<GeometricVerifier<Box<dyn LocalFeatures>>>,
    galleries: Galleries,
    text: Option<TextSearchEngine>,
    cache: SearchCache,
    count: usize,
    nb_matches: usize,
}

pub struct FinderBuilder {
    conf_dir: ConfDir,
    data_dir: DataDir,
    suffix: String,
    metric: Option<Metric>,
    extractor: Box<dyn FeatureExtractor>,
    detector: Box<dyn ObjectDetector>,
    verifier: Option<GeometricVerifier<Box<dyn LocalFeatures>>>,
    galleries: Option<Galleries>,
    text: Option<TextSearchEngine>,
    count: usize,
    text_count: usize,
    nb_matches: usize,
}

impl FinderBuilder {
    pub fn new(
        conf_dir: ConfDir,
        data_dir: DataDir,
        extractor: Box<dyn FeatureExtractor>,
        detector: Box<dyn ObjectDetector>,
    ) -> Self {
        Self {
            conf_dir,
            data_dir,
            suffix: "jpg,jpeg,png".to_string(),
            metric: None,
            extractor,
            detector,
            verifier: None,
            galleries: None,
            text: None,
            count: 6,
            text_count: 10,
            nb_matches: 6,
        }
    }

    /// 图库图片的后缀名，多个后缀用逗号分隔
    pub fn suffix(mut self, suffix: &str) -> Self {
        self.suffix = suffix.to_string();
        self
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }

    /// 启用几何校验，`nb_matches` 为校验的候选数量上限
    pub fn verifier(
        mut self,
        verifier: GeometricVerifier<Box<dyn LocalFeatures>>,
        nb_matches: usize,
    ) -> Self {
        self.verifier = Some(verifier);
        self.nb_matches = nb_matches;
        self
    }

    pub fn galleries(mut self, galleries: Galleries) -> Self {
        self.galleries = Some(galleries);
        self
    }

    pub fn text_engine(mut self, text: TextSearchEngine) -> Self {
        self.text = Some(text);
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn text_count(mut self, count: usize) -> Self {
        self.text_count = count;
        self
    }

    /// 打开缓存，加载或构建各类别的索引和文本搜索引擎
    pub fn build(self) -> Result<Finder> {
        let start = Instant::now();
        let metric = self.metric.unwrap_or_else(|| self.extractor.model().default_metric());
        let suffix = utils::suffix_regex(&self.suffix);
        let cache = SearchCache::open(&self.conf_dir, self.extractor.model());

        let galleries = match self.galleries {
            Some(galleries) => galleries,
            None => Galleries::open(
                &self.conf_dir,
                &self.data_dir,
                &suffix,
                self.extractor.as_ref(),
                &cache,
                metric,
            )?,
        };
        // 构建索引时提取的特征先写回
        cache.flush()?;

        let text = match self.text {
            Some(text) => Some(text.with_count(self.text_count)),
            None => load_text_engine(&self.conf_dir)?.map(|t| t.with_count(self.text_count)),
        };

        info!(
            "搜索服务就绪：{} 个图库，文本搜索{}，几何校验{}，耗时 {:.2?}",
            galleries.len(),
            if text.is_some() { "已启用" } else { "未启用" },
            if self.verifier.is_some() { "已启用" } else { "未启用" },
            start.elapsed()
        );
        Ok(Finder {
            data_dir: self.data_dir,
            suffix,
            extractor: self.extractor,
            detector: self.detector,
            verifier: self.verifier,
            galleries,
            text,
            cache,
            count: self.count,
            nb_matches: self.nb_matches,
        })
    }
}

/// 读取商品目录和 word2vec 模型，商品目录不存在时不启用文本搜索
pub fn load_text_engine(conf_dir: &ConfDir) -> Result<Option<TextSearchEngine>> {
    let catalog_path = conf_dir.catalog();
    if !catalog_path.exists() {
        warn!("商品目录不存在，不启用文本搜索: {}", catalog_path.display());
        return Ok(None);
    }
    let catalog = Catalog::load(&catalog_path)?;
    let word2vec = match WordVectors::load(&conf_dir.word2vec()) {
        Ok(wv) => Some(wv),
        Err(e) => {
            warn!("无法加载 word2vec 模型，联想搜索将退化为目录顺序: {e}");
            None
        }
    };
    Ok(Some(TextSearchEngine::build(catalog, word2vec)?))
}

impl Finder {
    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    pub fn galleries(&self) -> &Galleries {
        &self.galleries
    }

    pub fn text_engine(&self) -> Option<&TextSearchEngine> {
        self.text.as_ref()
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    /// 保存上传的图片，文件名为内容的 blake3 哈希，内容不同的上传不会命中旧的缓存
    pub fn save_upload(&self, data: &[u8], file_name: Option<&str>) -> Result<PathBuf> {
        let ext = file_name
            .and_then(|name| Path::new(name).extension())
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "jpg".to_string());
        let dir = self.data_dir.uploads();
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.{}", utils::hash_bytes(data), ext));
        if !path.exists() {
            fs::write(&path, data)?;
        }
        debug!("保存上传图片: {}", path.display());
        Ok(path)
    }

    /// 查询图片的完整路径，依次在场景目录和上传目录中查找，只使用文件名部分
    pub fn resolve_image(&self, name: &str) -> Result<PathBuf> {
        let name = Path::new(name)
            .file_name()
            .ok_or_else(|| Error::NotFound(format!("无效的图片名: {name}")))?;
        [self.data_dir.scenes(), self.data_dir.uploads()]
            .into_iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| Error::NotFound(format!("图片不存在: {}", name.to_string_lossy())))
    }

    /// 所有场景图片及其尺寸，无法读取的图片会被跳过
    pub fn scenes(&self) -> Vec<Scene> {
        utils::list_images(&self.data_dir.scenes(), &self.suffix)
            .into_iter()
            .filter_map(|path| match imageops::dimensions(&path) {
                Ok((width, height)) => {
                    Some(Scene { path: self.data_dir.relative(&path), width, height })
                }
                Err(e) => {
                    warn!("跳过场景 {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    }

    /// 读取检测结果，检测失败时视为没有目标
    fn detections(&self, image: &Path) -> Detections {
        match self.cache.detections_for(image, self.detector.as_ref()) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("目标检测失败 {}: {}", image.display(), e);
                Detections::default()
            }
        }
    }

    fn image_size(&self, image: &Path, detections: &Detections) -> Result<(u32, u32)> {
        match (detections.width, detections.height) {
            (0, _) | (_, 0) => imageops::dimensions(image),
            size => Ok(size),
        }
    }

    /// 裁剪出某个类别置信度最高的目标
    ///
    /// 返回 `(用于搜索的图片, 用于展示的图片)`，带边距的裁剪不足 140×140 时都使用原图
    fn crop_for_class(
        &self,
        image: &Path,
        detections: &Detections,
        label: &str,
    ) -> Result<(PathBuf, PathBuf)> {
        let Some(bbox) = best_box_for_class(&detections.boxes, label) else {
            return Ok((image.to_path_buf(), image.to_path_buf()));
        };
        let size = self.image_size(image, detections)?;
        let region = crop_region(bbox, size, true);
        if !region.is_usable() {
            debug!("{label} 裁剪区域 {}x{} 太小，使用整张图片", region.width, region.height);
            return Ok((image.to_path_buf(), image.to_path_buf()));
        }
        let name = utils::cache_key(image);
        let crop = self.data_dir.crops().join(format!("{label}_{name}"));
        let show = self.data_dir.crops().join(format!("{label}_show_{name}"));
        imageops::crop_to(image, region, &crop)?;
        imageops::crop_to(image, crop_region(bbox, size, false), &show)?;
        Ok((crop, show))
    }

    /// 场景搜索：检测目标、裁剪、视觉搜索，再加上文本与联想搜索的结果
    pub fn search_scene(&self, image: &Path, text: &str) -> Result<SearchResult> {
        let start = Instant::now();
        let detections = self.detections(image);
        let object_class = detect_class_onpic(&detections.boxes, ALLOWED_CLASSES);
        info!(
            "{} 检测到 {}（置信度 {}%）",
            image.display(),
            object_class.label(),
            object_class.confidence()
        );

        let (object_image, show_image) = match &object_class {
            ObjectClass::All => (image.to_path_buf(), image.to_path_buf()),
            ObjectClass::Detected { label, .. } => match self.crop_for_class(image, &detections, label) {
                Ok(paths) => paths,
                Err(e) => {
                    warn!("裁剪失败 {}: {}", image.display(), e);
                    (image.to_path_buf(), image.to_path_buf())
                }
            },
        };

        let class = FurnitureClass::from_label(object_class.label());
        let visual = self.return_similar(&object_image, class)?.into_vec();
        let text = self.text_results(text, object_class.label());
        let result = SearchResult {
            query_image: self.data_dir.relative(image),
            object_class: object_class.label().to_string(),
            confidence: object_class.confidence(),
            object_image: self.data_dir.relative(&show_image),
            boxes: detections.boxes,
            blend: blend(&visual, &text),
            visual,
            text,
            click_valid: true,
        };

        metrics::inc_search_count("scene", &result.object_class);
        metrics::inc_search_duration("scene", &result.object_class, start.elapsed().as_secs_f32());
        debug!("场景搜索耗时 {:.2?}", start.elapsed());
        Ok(result)
    }

    /// 点击搜索：`(x, y)` 为页面上的点击坐标，`shown_width` 为页面上显示的图片宽度
    ///
    /// 没有点中允许的目标时 `click_valid` 为 false，结果为空
    pub fn search_click(
        &self,
        image: &Path,
        (x, y): (f32, f32),
        shown_width: u32,
        text: &str,
    ) -> Result<SearchResult> {
        let start = Instant::now();
        let mut detections = self.detections(image);
        if detections.width == 0 || detections.height == 0 {
            (detections.width, detections.height) = imageops::dimensions(image)?;
        }

        let Some(bbox) = clicked_object(&detections, ALLOWED_CLASSES, (x, y), shown_width) else {
            info!("{} 中 ({x}, {y}) 没有点中有效的目标", image.display());
            return Ok(SearchResult {
                query_image: self.data_dir.relative(image),
                object_class: ObjectClass::All.label().to_string(),
                confidence: 0.0,
                object_image: self.data_dir.relative(image),
                boxes: detections.boxes,
                visual: vec![],
                text: TextResults::default(),
                blend: vec![],
                click_valid: false,
            });
        };
        let bbox = bbox.clone();
        info!("点中 {}（置信度 {}%）", bbox.label(), bbox.confidence());

        // 点击裁剪不带边距，文件名包含边界框位置，避免同一场景中同类目标共用特征缓存
        let region = crop_region(&bbox, (detections.width, detections.height), false);
        let (x1, _) = bbox.x_range();
        let (y1, _) = bbox.y_range();
        let crop = self.data_dir.crops().join(format!(
            "{}_{}_{}_{}",
            bbox.label(),
            x1,
            y1,
            utils::cache_key(image)
        ));
        imageops::crop_to(image, region, &crop)?;

        let visual = self.return_similar(&crop, FurnitureClass::from_label(bbox.label()))?.into_vec();
        let text = self.text_results(text, bbox.label());
        let result = SearchResult {
            query_image: self.data_dir.relative(image),
            object_class: bbox.label().to_string(),
            confidence: bbox.confidence(),
            object_image: self.data_dir.relative(&crop),
            boxes: detections.boxes,
            blend: blend(&visual, &text),
            visual,
            text,
            click_valid: true,
        };

        metrics::inc_search_count("click", &result.object_class);
        metrics::inc_search_duration("click", &result.object_class, start.elapsed().as_secs_f32());
        Ok(result)
    }

    /// 搜索与图片相似的图库图片
    ///
    /// `class` 为空或该类别没有图库时在所有图库中搜索。查询图片无法读取时返回 `NotFound`，
    /// 特征维度与索引不一致则返回错误。
    pub fn return_similar(&self, image: &Path, class: Option<FurnitureClass>) -> Result<Similar> {
        let k = match self.verifier {
            Some(_) => self.count.max(self.nb_matches),
            None => self.count,
        };
        let found = match class.and_then(|c| self.galleries.get(c)) {
            Some(engine) => engine
                .find_similar(image, k, self.extractor.as_ref(), &self.cache)
                .map(|ns| ns.into_iter().map(|n| (engine.class(), n)).collect::<Vec<_>>()),
            None => self.galleries.find_similar_all(image, k, self.extractor.as_ref(), &self.cache),
        };
        let candidates = match found {
            Ok(candidates) => candidates,
            Err(e @ Error::DimensionMismatch { .. }) => return Err(e),
            Err(e) => {
                warn!("无法搜索 {}: {}", image.display(), e);
                return Ok(Similar::NotFound);
            }
        };

        let ranked = match &self.verifier {
            Some(verifier) => self.verify(verifier, image, &candidates),
            None => unverified(&candidates, self.count),
        };

        let origins = candidates
            .iter()
            .map(|(c, n)| (gallery_key(*c, &n.id), (*c, n.id.as_str())))
            .collect::<HashMap<_, _>>();
        let matches = ranked
            .into_iter()
            .filter_map(|m| {
                let (class, id) = *origins.get(&m.id)?;
                let path = self.galleries.get(class)?.image_path(id);
                Some(VisualMatch {
                    class,
                    path: self.data_dir.relative(&path),
                    id: id.to_string(),
                    distance: m.distance,
                    inliers: m.inliers,
                })
            })
            .collect();
        Ok(Similar::Found(matches))
    }

    fn verify(
        &self,
        verifier: &GeometricVerifier<Box<dyn LocalFeatures>>,
        image: &Path,
        candidates: &[(FurnitureClass, Neighbor)],
    ) -> Vec<RankedMatch> {
        let query = match verifier.keypoints(image) {
            Ok(query) => query,
            Err(e) => {
                warn!("无法提取 {} 的特征点，跳过几何校验: {}", image.display(), e);
                return unverified(candidates, self.count);
            }
        };
        let neighbors = candidates
            .iter()
            .map(|(c, n)| Neighbor { id: gallery_key(*c, &n.id), distance: n.distance })
            .collect::<Vec<_>>();
        let paths = candidates
            .iter()
            .filter_map(|(c, n)| {
                let engine = self.galleries.get(*c)?;
                Some((gallery_key(*c, &n.id), engine.image_path(&n.id)))
            })
            .collect::<HashMap<_, _>>();
        let ranked = geom_check(&neighbors, self.count, self.nb_matches, |n| {
            let path = paths.get(&n.id).ok_or_else(|| Error::NotFound(n.id.clone()))?;
            verifier.inliers_with(&query, path)
        });

        if let Some((class, _)) = candidates.first() {
            let best = ranked.iter().map(|m| m.inliers).max().unwrap_or(0);
            metrics::inc_verify_inliers(class.dir_name(), best);
        }
        ranked
    }

    /// 计数向量搜索和 word2vec 联想搜索，查询为空时使用检测到的类别
    pub fn text_results(&self, query: &str, object_class: &str) -> TextResults {
        let Some(text) = &self.text else {
            return TextResults::default();
        };
        let query = resolve_text_query(query, object_class);
        debug!("文本查询: {query}");
        TextResults {
            countvect: text.process_query(&query),
            w2vec: text.process_query_w2vec(&query),
        }
    }

    /// 文本搜索的入口，不需要图片
    pub fn search_text(&self, query: &str) -> TextResults {
        let start = Instant::now();
        let result = self.text_results(query, ObjectClass::All.label());
        metrics::inc_search_count("text", "all");
        metrics::inc_search_duration("text", "all", start.elapsed().as_secs_f32());
        result
    }

    /// 用新的文本查询更新结果，并按特征距离混合视觉与文本结果
    ///
    /// `visual` 为之前视觉搜索返回的路径（相对于数据目录）
    pub fn update_text(&self, query: &str, object_class: &str, visual: &[String]) -> TextUpdate {
        let text = self.text_results(query, object_class);
        let mut blend = visual.iter().take(BLEND_TOP).cloned().collect::<Vec<_>>();
        match visual.first() {
            Some(first) => {
                let candidates = text.w2vec.iter().chain(&text.countvect).cloned().collect::<Vec<_>>();
                blend.extend(self.blend_features(first, &candidates));
            }
            None => {
                blend.extend(text.w2vec.iter().take(BLEND_TOP).cloned());
                blend.extend(text.countvect.iter().take(BLEND_TOP).cloned());
            }
        }
        TextUpdate { text, blend }
    }

    /// 按与参考图片的特征欧氏距离对候选排序，去重后保留前 8 个
    ///
    /// 无法提取特征的候选会被跳过
    pub fn blend_features(&self, reference: &str, candidates: &[String]) -> Vec<String> {
        let features = |rel: &str| {
            let path = self.data_dir.path().join(rel);
            self.cache.features_for(&path, self.extractor.as_ref())
        };
        let reference = match features(reference) {
            Ok(v) => v,
            Err(e) => {
                warn!("无法提取参考图片 {reference} 的特征: {e}");
                return candidates.iter().take(FEATURE_BLEND_COUNT).cloned().collect();
            }
        };

        let mut seen = HashSet::new();
        let mut distances = vec![];
        for candidate in candidates {
            if !seen.insert(candidate.as_str()) {
                continue;
            }
            match features(candidate) {
                Ok(v) if v.dim() == reference.dim() => {
                    distances.push((candidate.clone(), v.euclidean(&reference)))
                }
                Ok(v) => warn!("{candidate} 的特征维度 {} 与参考图片不一致", v.dim()),
                Err(e) => warn!("跳过 {candidate}: {e}"),
            }
        }
        distances.sort_by(|a, b| a.1.total_cmp(&b.1));
        distances.into_iter().take(FEATURE_BLEND_COUNT).map(|(path, _)| path).collect()
    }

    /// 写回缓存
    pub fn flush(&self) -> Result<()> {
        self.cache.flush()
    }
}

/// 不同图库中可能有同名文件，合并后用 `类别/文件名` 区分
fn gallery_key(class: FurnitureClass, id: &str) -> String {
    format!("{}/{}", class.dir_name(), id)
}

fn unverified(candidates: &[(FurnitureClass, Neighbor)], count: usize) -> Vec<RankedMatch> {
    candidates
        .iter()
        .take(count)
        .map(|(c, n)| RankedMatch { id: gallery_key(*c, &n.id), distance: n.distance, inliers: 0 })
        .collect()
}

/// 视觉、联想、文本结果各取前 4 个
fn blend(visual: &[VisualMatch], text: &TextResults) -> Vec<String> {
    visual
        .iter()
        .take(BLEND_TOP)
        .map(|m| m.path.clone())
        .chain(text.w2vec.iter().take(BLEND_TOP).cloned())
        .chain(text.countvect.iter().take(BLEND_TOP).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use nalgebra::Point2;
    use ndarray::Array2;

    use super::*;
    use crate::detect::ReportDetector;
    use crate::engine::VisualSearchEngine;
    use crate::feature::{FeatureModel, FeatureVector};
    use crate::geom::{Keypoints, VerifyParams};
    use crate::index::VisualIndex;
    use crate::text::CatalogItem;

    /// 以图片左上角像素的颜色作为特征
    struct ColorExtractor;

    impl FeatureExtractor for ColorExtractor {
        fn model(&self) -> FeatureModel {
            FeatureModel::Resnet
        }

        fn dim(&self) -> usize {
            3
        }

        fn extract(&self, path: &Path) -> Result<FeatureVector> {
            let img = image::open(path)
                .map_err(|source| Error::Image { path: path.to_path_buf(), source })?
                .to_rgb8();
            let p = img.get_pixel(0, 0);
            Ok(FeatureVector::new(p.0.iter().map(|&c| c as f32).collect()))
        }
    }

    fn solid(path: &Path, w: u32, h: u32, color: [u8; 3]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::from_pixel(w, h, Rgb(color)).save(path).unwrap();
    }

    fn finder(dir: &Path) -> Finder {
        let conf_dir: ConfDir = dir.join("conf").to_string_lossy().parse().unwrap();
        let data_dir = DataDir::new(dir.join("data"));
        solid(&data_dir.gallery(FurnitureClass::Chair).join("red.png"), 8, 8, [200, 0, 0]);
        solid(&data_dir.gallery(FurnitureClass::Chair).join("blue.png"), 8, 8, [0, 0, 200]);
        solid(&data_dir.gallery(FurnitureClass::Sofa).join("teal.png"), 8, 8, [0, 50, 200]);
        solid(&data_dir.scenes().join("room.png"), 400, 300, [190, 10, 10]);
        fs::create_dir_all(data_dir.reports()).unwrap();
        fs::write(
            data_dir.reports().join("room.txt"),
            "Dimensions;400;300\nObject;chair;90%;_;20;220;30;250\nObject;person;99%;_;0;10;0;10\n",
        )
        .unwrap();

        let catalog = Catalog::new(vec![
            CatalogItem {
                id: "A".to_string(),
                desc: "red chair".to_string(),
                img: "images/chair/red.png".to_string(),
                ..Default::default()
            },
            CatalogItem {
                id: "B".to_string(),
                desc: "blue sofa".to_string(),
                img: "images/sofa/teal.png".to_string(),
                ..Default::default()
            },
        ]);
        let text = TextSearchEngine::build(catalog, None).unwrap();

        FinderBuilder::new(
            conf_dir,
            data_dir.clone(),
            Box::new(ColorExtractor),
            Box::new(ReportDetector::new(data_dir.reports())),
        )
        .suffix("png")
        .count(2)
        .text_engine(text)
        .build()
        .unwrap()
    }

    #[test]
    fn test_search_scene() {
        let dir = tempfile::TempDir::new().unwrap();
        let finder = finder(dir.path());
        let scene = finder.resolve_image("room.png").unwrap();
        let result = finder.search_scene(&scene, "").unwrap();

        assert_eq!(result.object_class, "chair");
        assert_eq!(result.object_image, "crops/chair_show_room.png");
        assert!(finder.data_dir().crops().join("chair_room.png").exists());
        let ids = result.visual.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["red.png", "blue.png"]);
        assert_eq!(result.visual[0].path, "images/chair/red.png");
        // 查询为空时用类别名搜索
        assert_eq!(result.text.countvect[0], "images/chair/red.png");
        assert_eq!(result.blend.len(), 2 + 2 + 2);
    }

    #[test]
    fn test_search_click() {
        let dir = tempfile::TempDir::new().unwrap();
        let finder = finder(dir.path());
        let scene = finder.resolve_image("room.png").unwrap();

        // 页面宽度为原图一半，(50, 60) 对应原图 (100, 120)
        let result = finder.search_click(&scene, (50.0, 60.0), 200, "sofa").unwrap();
        assert!(result.click_valid);
        assert_eq!(result.object_image, "crops/chair_20_30_room.png");
        assert_eq!(result.visual[0].id, "red.png");
        assert_eq!(result.text.countvect[0], "images/sofa/teal.png");

        let result = finder.search_click(&scene, (190.0, 140.0), 200, "").unwrap();
        assert!(!result.click_valid);
        assert!(result.visual.is_empty());
    }

    #[test]
    fn test_return_similar_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let finder = finder(dir.path());
        let missing = dir.path().join("missing.png");
        assert_eq!(finder.return_similar(&missing, Some(FurnitureClass::Chair)).unwrap(), Similar::NotFound);

        // 没有类别时在所有图库中搜索
        let query = dir.path().join("greenish.png");
        solid(&query, 8, 8, [10, 190, 10]);
        let matches = finder.return_similar(&query, None).unwrap().into_vec();
        assert_eq!(matches[0].class, FurnitureClass::Sofa);
        assert_eq!(matches[0].path, "images/sofa/teal.png");
    }

    /// 蓝色分量较高的图片有一组固定的特征点，其余图片没有特征点
    struct BlueKeypoints;

    impl LocalFeatures for BlueKeypoints {
        fn detect(&self, path: &Path) -> Result<Keypoints> {
            let blue = ColorExtractor.extract(path)?.as_slice()[2];
            if blue <= 100.0 {
                return Ok(Keypoints { points: vec![], descriptors: Array2::zeros((0, 10)) });
            }
            let points = [
                (10.0, 20.0),
                (200.0, 40.0),
                (50.0, 180.0),
                (150.0, 150.0),
                (90.0, 60.0),
                (30.0, 120.0),
                (170.0, 90.0),
                (120.0, 10.0),
                (60.0, 140.0),
                (190.0, 190.0),
            ];
            Ok(Keypoints {
                points: points.iter().map(|&(x, y)| Point2::new(x, y)).collect(),
                descriptors: Array2::eye(10),
            })
        }
    }

    /// 两个图库中都有 1.png
    fn shared_name_finder(dir: &Path, verify: bool) -> Finder {
        let conf_dir: ConfDir = dir.join("conf").to_string_lossy().parse().unwrap();
        let data_dir = DataDir::new(dir.join("data"));
        let images = [
            (FurnitureClass::Chair, "1.png", [100, 0, 60]),
            (FurnitureClass::Chair, "2.png", [0, 0, 0]),
            (FurnitureClass::Sofa, "1.png", [100, 0, 250]),
        ];
        let mut indices = HashMap::new();
        for (class, name, color) in images {
            solid(&data_dir.gallery(class).join(name), 8, 8, color);
            let index = indices.entry(class).or_insert_with(|| {
                VisualIndex::new(class.dir_name(), FeatureModel::Resnet, Metric::Euclidean, 3)
            });
            index.insert(name, FeatureVector::new(color.iter().map(|&c| c as f32).collect())).unwrap();
        }
        let mut galleries = Galleries::default();
        for (class, index) in indices {
            galleries.insert(VisualSearchEngine::new(class, data_dir.gallery(class), index));
        }

        let builder = FinderBuilder::new(
            conf_dir,
            data_dir.clone(),
            Box::new(ColorExtractor),
            Box::new(ReportDetector::new(data_dir.reports())),
        )
        .galleries(galleries)
        .count(2);
        let builder = if verify {
            let features: Box<dyn LocalFeatures> = Box::new(BlueKeypoints);
            builder.verifier(GeometricVerifier::new(features, VerifyParams::default()), 6)
        } else {
            builder
        };
        builder.build().unwrap()
    }

    #[test]
    fn test_return_similar_merges_galleries() {
        let dir = tempfile::TempDir::new().unwrap();
        let finder = shared_name_finder(dir.path(), false);
        let query = dir.path().join("q.png");
        solid(&query, 8, 8, [100, 0, 150]);

        let matches = finder.return_similar(&query, None).unwrap().into_vec();
        // 按距离合并后截取前 count 个
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].class, FurnitureClass::Chair);
        assert_eq!(matches[0].id, "1.png");
        assert_eq!(matches[0].path, "images/chair/1.png");
        assert_eq!(matches[0].distance, 90.0);
        assert_eq!(matches[1].class, FurnitureClass::Sofa);
        assert_eq!(matches[1].id, "1.png");
        assert_eq!(matches[1].path, "images/sofa/1.png");
        assert_eq!(matches[1].distance, 100.0);
    }

    #[test]
    fn test_verify_shared_file_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let finder = shared_name_finder(dir.path(), true);
        let query = dir.path().join("q.png");
        solid(&query, 8, 8, [100, 0, 150]);

        let matches = finder.return_similar(&query, None).unwrap().into_vec();
        let found = matches.iter().map(|m| (m.class, m.path.as_str())).collect::<Vec<_>>();
        assert_eq!(
            found,
            vec![(FurnitureClass::Sofa, "images/sofa/1.png"), (FurnitureClass::Chair, "images/chair/1.png")]
        );
        assert!(matches[0].inliers > 0);
        assert_eq!(matches[1].inliers, 0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = tempfile::TempDir::new().unwrap();
        let conf_dir: ConfDir = dir.path().join("conf").to_string_lossy().parse().unwrap();
        let data_dir = DataDir::new(dir.path().join("data"));
        let mut index = VisualIndex::new("chair", FeatureModel::Resnet, Metric::Euclidean, 2);
        index.insert("a.png", FeatureVector::new(vec![0.0, 0.0])).unwrap();
        let mut galleries = Galleries::default();
        galleries.insert(VisualSearchEngine::new(
            FurnitureClass::Chair,
            data_dir.gallery(FurnitureClass::Chair),
            index,
        ));
        let finder = FinderBuilder::new(
            conf_dir,
            data_dir,
            Box::new(ColorExtractor),
            Box::new(ReportDetector::new(dir.path())),
        )
        .galleries(galleries)
        .build()
        .unwrap();

        let query = dir.path().join("q.png");
        solid(&query, 4, 4, [1, 2, 3]);
        assert!(matches!(
            finder.return_similar(&query, Some(FurnitureClass::Chair)),
            Err(Error::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_update_text_blend() {
        let dir = tempfile::TempDir::new().unwrap();
        let finder = finder(dir.path());
        let visual = vec!["images/chair/blue.png".to_string(), "images/chair/red.png".to_string()];
        let update = finder.update_text("red chair", "chair", &visual);
        // 前面是视觉结果，之后按与 blue.png 的特征距离排序并去重
        assert_eq!(
            update.blend,
            vec![
                "images/chair/blue.png",
                "images/chair/red.png",
                "images/sofa/teal.png",
                "images/chair/red.png",
            ]
        );
    }

    #[test]
    fn test_save_upload() {
        let dir = tempfile::TempDir::new().unwrap();
        let finder = finder(dir.path());
        let a = finder.save_upload(b"abc", Some("photo.JPG")).unwrap();
        let b = finder.save_upload(b"abd", Some("photo.JPG")).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.extension().unwrap(), "jpg");
        assert_eq!(finder.scenes().len(), 1);
        assert!(finder.resolve_image("../conf/catalog.json").is_err());
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(finder.resolve_image(&name).unwrap(), a);
    }
}
