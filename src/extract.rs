//! 根据命令行选项创建特征提取器、目标检测器和局部特征

use std::path::Path;

use log::info;

use crate::bovw::Vocabulary;
use crate::config::{ConfDir, DataDir, DetectorKind, DetectorOptions, ModelOptions, SiftOptions};
use crate::detect::{ObjectDetector, ReportDetector};
use crate::error::{Error, Result};
use crate::feature::{FeatureExtractor, FeatureModel, FeatureVector};
use crate::geom::{Keypoints, LocalFeatures};

/// 未启用 OpenCV 时的占位后端，只能依赖缓存或导入的特征
pub struct NoBackend {
    model: FeatureModel,
    dim: usize,
}

impl NoBackend {
    pub fn new(model: FeatureModel, dim: usize) -> Self {
        Self { model, dim }
    }

    fn unavailable(&self, path: &Path) -> Error {
        Error::BackendUnavailable(format!(
            "未启用 opencv 特性，无法处理 {}，请先导入预先计算的特征",
            path.display()
        ))
    }
}

impl FeatureExtractor for NoBackend {
    fn model(&self) -> FeatureModel {
        self.model
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn extract(&self, path: &Path) -> Result<FeatureVector> {
        Err(self.unavailable(path))
    }
}

impl LocalFeatures for NoBackend {
    fn detect(&self, path: &Path) -> Result<Keypoints> {
        Err(self.unavailable(path))
    }
}

#[cfg(not(feature = "opencv"))]
/// 特征维度：CNN 模型固定，BoVW 取决于视觉词典，词典不存在时为 0
fn model_dim(conf_dir: &ConfDir, model: FeatureModel) -> usize {
    match model.fixed_dim() {
        Some(dim) => dim,
        None => match Vocabulary::load(&conf_dir.vocabulary()) {
            Ok(vocabulary) => vocabulary.len(),
            Err(e) => {
                log::warn!("无法加载视觉词典 {}: {}", conf_dir.vocabulary().display(), e);
                0
            }
        },
    }
}

#[cfg(feature = "opencv")]
pub fn create_extractor(
    conf_dir: &ConfDir,
    model: &ModelOptions,
    sift: &SiftOptions,
) -> Result<Box<dyn FeatureExtractor>> {
    use crate::bovw::BovwExtractor;
    use crate::cv::{CnnExtractor, SiftFeatures};

    let extractor: Box<dyn FeatureExtractor> = match model.model {
        FeatureModel::Bovw => {
            let vocabulary = Vocabulary::load(&conf_dir.vocabulary())?;
            info!("加载视觉词典：{} 个视觉单词", vocabulary.len());
            Box::new(BovwExtractor::new(SiftFeatures::new(sift.clone()), vocabulary))
        }
        m => {
            let path = model.onnx_model.clone().unwrap_or_else(|| conf_dir.onnx_model(m));
            Box::new(CnnExtractor::open(m, &path)?)
        }
    };
    Ok(extractor)
}

#[cfg(not(feature = "opencv"))]
pub fn create_extractor(
    conf_dir: &ConfDir,
    model: &ModelOptions,
    _sift: &SiftOptions,
) -> Result<Box<dyn FeatureExtractor>> {
    let dim = model_dim(conf_dir, model.model);
    info!("未启用 opencv 特性，{} 特征只能从缓存中读取", model.model);
    Ok(Box::new(NoBackend::new(model.model, dim)))
}

/// 目标检测器，检测报告目录默认为数据目录下的 reports
pub fn create_detector(
    conf_dir: &ConfDir,
    data_dir: &DataDir,
    opts: &DetectorOptions,
) -> Result<Box<dyn ObjectDetector>> {
    match opts.detector {
        DetectorKind::Report => {
            let dir = opts.reports_dir.clone().unwrap_or_else(|| data_dir.reports());
            Ok(Box::new(ReportDetector::new(dir)))
        }
        #[cfg(feature = "opencv")]
        DetectorKind::Yolo => Ok(Box::new(crate::cv::YoloDetector::open(
            &conf_dir.yolo_dir(),
            opts.yolo_threshold,
            opts.yolo_nms_threshold,
        )?)),
        #[cfg(not(feature = "opencv"))]
        DetectorKind::Yolo => {
            let _ = conf_dir;
            Err(Error::BackendUnavailable("YOLO 检测需要启用 opencv 特性".to_string()))
        }
    }
}

/// 几何校验使用的局部特征
pub fn create_local_features(opts: &SiftOptions) -> Box<dyn LocalFeatures> {
    #[cfg(feature = "opencv")]
    {
        Box::new(crate::cv::SiftFeatures::new(opts.clone()))
    }
    #[cfg(not(feature = "opencv"))]
    {
        let _ = opts;
        Box::new(NoBackend::new(FeatureModel::Bovw, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_detector() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("scene.txt"), "Dimensions;640;480\nObject;chair;87%;_;10;120;40;200\n")
            .unwrap();
        let conf_dir: ConfDir = dir.path().to_string_lossy().parse().unwrap();
        let opts = DetectorOptions {
            detector: DetectorKind::Report,
            reports_dir: Some(dir.path().to_path_buf()),
            yolo_threshold: 0.2,
            yolo_nms_threshold: 0.5,
        };
        let detector = create_detector(&conf_dir, &DataDir::new(dir.path()), &opts).unwrap();
        let detections = detector.detect(Path::new("scene.jpg")).unwrap();
        assert_eq!(detections.width, 640);
        assert_eq!(detections.boxes[0].label(), "chair");
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn test_no_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let conf_dir: ConfDir = dir.path().to_string_lossy().parse().unwrap();
        let model = ModelOptions { model: FeatureModel::Bovw, metric: None, onnx_model: None };
        let sift = SiftOptions { sift_nfeatures: 1000, sift_contrast_threshold: 0.05, sift_edge_threshold: 11.0 };
        let extractor = create_extractor(&conf_dir, &model, &sift).unwrap();
        assert_eq!(extractor.dim(), 0);
        assert!(matches!(
            extractor.extract(Path::new("a.jpg")),
            Err(Error::BackendUnavailable(_))
        ));
    }
}
