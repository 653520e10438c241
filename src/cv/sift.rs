use std::path::Path;

use log::debug;
use nalgebra::Point2;
use ndarray::Array2;
use opencv::core::{KeyPoint, Mat, Vector, no_array};
use opencv::features2d::SIFT;
use opencv::imgcodecs;
use opencv::prelude::*;

use super::{imread, mat_to_array};
use crate::config::SiftOptions;
use crate::error::Result;
use crate::geom::{Keypoints, LocalFeatures};

/// SIFT 特征点
///
/// `SIFT` 对象不能跨线程共享，每次检测时重新创建
pub struct SiftFeatures {
    opts: SiftOptions,
}

impl SiftFeatures {
    pub fn new(opts: SiftOptions) -> Self {
        Self { opts }
    }
}

impl LocalFeatures for SiftFeatures {
    fn detect(&self, path: &Path) -> Result<Keypoints> {
        let img = imread(path, imgcodecs::IMREAD_GRAYSCALE)?;
        let mut sift = SIFT::create(
            self.opts.sift_nfeatures,
            3,
            self.opts.sift_contrast_threshold,
            self.opts.sift_edge_threshold,
            1.6,
            false,
        )?;
        let mut kps = Vector::<KeyPoint>::new();
        let mut des = Mat::default();
        sift.detect_and_compute(&img, &no_array(), &mut kps, &mut des, false)?;
        debug!("{}: {} 个 SIFT 特征点", path.display(), kps.len());

        let points = kps.iter().map(|kp| Point2::new(kp.pt().x as f64, kp.pt().y as f64)).collect();
        let descriptors = match kps.is_empty() {
            true => Array2::zeros((0, 128)),
            false => mat_to_array(&des)?,
        };
        Ok(Keypoints { points, descriptors })
    }
}
