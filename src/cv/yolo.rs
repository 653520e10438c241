use std::fs;
use std::path::Path;
use std::sync::Mutex;

use log::{debug, info, warn};
use opencv::core::{CV_32F, Mat, Rect, Scalar, Size, Vector};
use opencv::dnn::{self, Net};
use opencv::imgcodecs;
use opencv::prelude::*;

use super::{imread, mat_to_array};
use crate::error::{Error, Result};
use crate::detect::{BoundingBox, Detections, ObjectDetector};

const INPUT_SIZE: i32 = 416;

/// 使用 OpenCV dnn 运行 Darknet 格式的 YOLO 模型
///
/// 模型目录中需要有 `yolo.cfg`、`yolo.weights` 和 `coco.names`
pub struct YoloDetector {
    net: Mutex<Net>,
    names: Vec<String>,
    threshold: f32,
    nms_threshold: f32,
}

impl YoloDetector {
    pub fn open(dir: &Path, threshold: f32, nms_threshold: f32) -> Result<Self> {
        let (cfg, weights) = (dir.join("yolo.cfg"), dir.join("yolo.weights"));
        for file in [&cfg, &weights] {
            if !file.exists() {
                return Err(Error::NotFound(format!("YOLO 模型文件不存在: {}", file.display())));
            }
        }
        let names = fs::read_to_string(dir.join("coco.names"))?
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>();
        let net = dnn::read_net_from_darknet(&cfg.to_string_lossy(), &weights.to_string_lossy())?;
        info!("加载 YOLO 模型: {}，{} 个类别", dir.display(), names.len());
        Ok(Self { net: Mutex::new(net), names, threshold, nms_threshold })
    }

    fn forward(&self, img: &Mat) -> Result<Vector<Mat>> {
        let blob = dnn::blob_from_image(
            img,
            1.0 / 255.0,
            Size::new(INPUT_SIZE, INPUT_SIZE),
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;
        let mut net = self.net.lock().unwrap_or_else(|e| e.into_inner());
        net.set_input(&blob, "", 1.0, Scalar::default())?;
        let mut outs = Vector::<Mat>::new();
        let names = net.get_unconnected_out_layers_names()?;
        net.forward(&mut outs, &names)?;
        Ok(outs)
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&self, path: &Path) -> Result<Detections> {
        let img = imread(path, imgcodecs::IMREAD_COLOR)?;
        let (width, height) = (img.cols(), img.rows());

        let mut rects = Vector::<Rect>::new();
        let mut scores = Vector::<f32>::new();
        let mut classes = vec![];
        // 每行为 cx, cy, w, h, objectness, 各类别得分，坐标相对于图片大小
        for out in self.forward(&img)? {
            let rows = mat_to_array(&out)?;
            for row in rows.outer_iter() {
                let Some((class, &score)) = row
                    .iter()
                    .skip(5)
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                else {
                    continue;
                };
                if score <= self.threshold {
                    continue;
                }
                let (w, h) = (row[2] * width as f32, row[3] * height as f32);
                let (x, y) = (row[0] * width as f32 - w / 2.0, row[1] * height as f32 - h / 2.0);
                rects.push(Rect::new(x as i32, y as i32, w as i32, h as i32));
                scores.push(score);
                classes.push(class);
            }
        }

        let mut indices = Vector::<i32>::new();
        dnn::nms_boxes(&rects, &scores, self.threshold, self.nms_threshold, &mut indices, 1.0, 0)?;

        let mut detections = Detections { width: width as u32, height: height as u32, boxes: vec![] };
        for i in indices {
            let i = i as usize;
            let rect = rects.get(i)?;
            let label = self.names.get(classes[i]).map(String::as_str).unwrap_or("unknown");
            let x = (rect.x.max(0), (rect.x + rect.width).min(width));
            let y = (rect.y.max(0), (rect.y + rect.height).min(height));
            match BoundingBox::new(label, scores.get(i)? * 100.0, x, y) {
                Ok(bbox) => detections.boxes.push(bbox),
                Err(e) => warn!("忽略检测结果: {e}"),
            }
        }
        debug!("{}: 检测到 {} 个目标", path.display(), detections.boxes.len());
        Ok(detections)
    }
}
