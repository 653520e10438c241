use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::ConfDir;
use crate::detect::{Detections, ObjectDetector};
use crate::error::Result;
use crate::feature::{FeatureExtractor, FeatureModel, FeatureVector};
use crate::utils;

struct CacheInner<V> {
    entries: HashMap<String, V>,
    dirty: bool,
}

/// 持久化到文件的键值缓存
///
/// 所有读改写操作都在同一把锁内完成，修改后需要调用 [`FileCache::flush`] 写回，
/// 析构时如果还有未写回的修改也会尝试写回
pub struct FileCache<V: Serialize> {
    path: PathBuf,
    inner: Mutex<CacheInner<V>>,
}

impl<V> FileCache<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    /// 打开缓存文件，文件不存在或无法解析时从空缓存开始
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::read(&path) {
            Ok(Some(entries)) => {
                debug!("从 {} 加载 {} 条缓存", path.display(), entries.len());
                entries
            }
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("无法读取缓存 {}，将重新生成: {}", path.display(), e);
                HashMap::new()
            }
        };
        Self { path, inner: Mutex::new(CacheInner { entries, dirty: false }) }
    }

    fn read(path: &Path) -> Result<Option<HashMap<String, V>>> {
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(Some(bincode::deserialize_from(reader)?))
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().entries.get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let mut inner = self.lock();
        inner.entries.insert(key.into(), value);
        inner.dirty = true;
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let value = inner.entries.remove(key);
        inner.dirty |= value.is_some();
        value
    }

    /// 读取缓存，不存在时调用 `f` 计算并写入
    ///
    /// 计算过程不持有锁，多个线程同时计算同一个键时以最后写入的为准
    pub fn get_or_try_insert_with<F, E>(&self, key: &str, f: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> std::result::Result<V, E>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = f()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.dirty = true;
    }

    /// 将修改写回文件
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.lock();
        if !inner.dirty {
            return Ok(());
        }
        utils::atomic_write(&self.path, |writer| {
            bincode::serialize_into(writer, &inner.entries).map_err(std::io::Error::other)
        })?;
        inner.dirty = false;
        debug!("写回缓存 {}（{} 条）", self.path.display(), inner.entries.len());
        Ok(())
    }
}

impl<V: Serialize> Drop for FileCache<V> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !inner.dirty {
            return;
        }
        let result = utils::atomic_write(&self.path, |writer| {
            bincode::serialize_into(writer, &inner.entries).map_err(std::io::Error::other)
        });
        if let Err(e) = result {
            warn!("写回缓存 {} 失败: {}", self.path.display(), e);
        }
    }
}

impl FileCache<Detections> {
    /// 读取图片的检测结果，缓存未命中时运行检测器并写入缓存
    pub fn detections_for(&self, path: &Path, detector: &dyn ObjectDetector) -> Result<Detections> {
        let key = utils::cache_key(path);
        self.get_or_try_insert_with(&key, || {
            debug!("检测目标: {}", path.display());
            detector.detect(path)
        })
    }
}

/// 检测结果与特征的缓存，键为图片文件名
pub struct SearchCache {
    pub detections: FileCache<Detections>,
    pub features: FileCache<FeatureVector>,
}

impl SearchCache {
    pub fn open(conf_dir: &ConfDir, model: FeatureModel) -> Self {
        let cache = Self {
            detections: FileCache::open(conf_dir.detections()),
            features: FileCache::open(conf_dir.features(model)),
        };
        info!(
            "加载缓存：{} 条检测结果，{} 条 {} 特征",
            cache.detections.len(),
            cache.features.len(),
            model
        );
        cache
    }

    /// 读取图片特征，缓存未命中时提取并写入缓存
    pub fn features_for(
        &self,
        path: &Path,
        extractor: &dyn FeatureExtractor,
    ) -> Result<FeatureVector> {
        let key = utils::cache_key(path);
        self.features.get_or_try_insert_with(&key, || {
            debug!("提取特征: {}", path.display());
            extractor.extract(path)
        })
    }

    pub fn detections_for(&self, path: &Path, detector: &dyn ObjectDetector) -> Result<Detections> {
        self.detections.detections_for(path, detector)
    }

    pub fn flush(&self) -> Result<()> {
        self.detections.flush()?;
        self.features.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::Error;

    struct CountingExtractor(AtomicUsize);

    struct CountingDetector(AtomicUsize);

    impl ObjectDetector for CountingDetector {
        fn detect(&self, _path: &Path) -> Result<Detections> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Detections { width: 640, height: 480, boxes: vec![] })
        }
    }

    impl FeatureExtractor for CountingExtractor {
        fn model(&self) -> FeatureModel {
            FeatureModel::Bovw
        }

        fn dim(&self) -> usize {
            2
        }

        fn extract(&self, path: &Path) -> Result<FeatureVector> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if path.ends_with("broken.jpg") {
                return Err(Error::NotFound(path.display().to_string()));
            }
            Ok(FeatureVector::new(vec![0.5, 0.5]))
        }
    }

    #[test]
    fn test_file_cache_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.bin");
        {
            let cache = FileCache::<u32>::open(&path);
            assert!(cache.is_empty());
            cache.insert("a", 1);
            cache.insert("b", 2);
            assert_eq!(cache.remove("b"), Some(2));
            cache.flush().unwrap();
        }
        let cache = FileCache::<u32>::open(&path);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn test_drop_flushes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.bin");
        FileCache::<String>::open(&path).insert("k", "v".to_string());
        assert_eq!(FileCache::<String>::open(&path).get("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_corrupted_cache_starts_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.bin");
        std::fs::write(&path, b"\xff").unwrap();
        assert!(FileCache::<Vec<String>>::open(&path).is_empty());
    }

    #[test]
    fn test_features_for_caches() {
        let dir = tempfile::TempDir::new().unwrap();
        let conf_dir: ConfDir = dir.path().to_str().unwrap().parse().unwrap();
        let cache = SearchCache::open(&conf_dir, FeatureModel::Bovw);
        let extractor = CountingExtractor(AtomicUsize::new(0));

        cache.features_for(Path::new("/a/x.jpg"), &extractor).unwrap();
        // 仅按文件名缓存
        cache.features_for(Path::new("/b/x.jpg"), &extractor).unwrap();
        assert_eq!(extractor.0.load(Ordering::SeqCst), 1);

        assert!(cache.features_for(Path::new("broken.jpg"), &extractor).is_err());
        assert!(cache.features.get("broken.jpg").is_none());

        cache.flush().unwrap();
        assert!(conf_dir.features(FeatureModel::Bovw).exists());
    }

    #[test]
    fn test_detection_cache_alone() {
        let dir = tempfile::TempDir::new().unwrap();
        let conf_dir: ConfDir = dir.path().to_str().unwrap().parse().unwrap();
        let detector = CountingDetector(AtomicUsize::new(0));
        {
            let cache = FileCache::<Detections>::open(conf_dir.detections());
            let first = cache.detections_for(Path::new("/a/room.jpg"), &detector).unwrap();
            let second = cache.detections_for(Path::new("/b/room.jpg"), &detector).unwrap();
            assert_eq!(first, second);
            cache.flush().unwrap();
        }
        assert_eq!(detector.0.load(Ordering::SeqCst), 1);
        assert!(conf_dir.detections().exists());
        assert!(!conf_dir.features(FeatureModel::Resnet).exists());

        let cache = SearchCache::open(&conf_dir, FeatureModel::Resnet);
        assert_eq!(cache.detections_for(Path::new("room.jpg"), &detector).unwrap().width, 640);
        assert_eq!(detector.0.load(Ordering::SeqCst), 1);
    }
}
