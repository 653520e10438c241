use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 参与搜索的检测类别
pub const ALLOWED_CLASSES: &[&str] =
    &["diningtable", "chair", "sofa", "pottedplant", "table", "clock", "bed", "plant_pot"];

/// 裁剪区域的宽高都必须超过该值，否则使用整张图片
pub const MIN_CROP_SIZE: u32 = 140;

/// 裁剪时在每个方向上扩展的比例
pub const CROP_MARGIN: f32 = 0.1;

/// 目标检测得到的边界框，坐标为原图像素
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    label: String,
    confidence: f32,
    x1: i32,
    x2: i32,
    y1: i32,
    y2: i32,
}

impl BoundingBox {
    /// 创建边界框，要求 x1 < x2、y1 < y2，置信度在 0 ~ 100 之间
    pub fn new(
        label: impl Into<String>,
        confidence: f32,
        (x1, x2): (i32, i32),
        (y1, y2): (i32, i32),
    ) -> Result<Self> {
        let label = label.into();
        if x1 >= x2 || y1 >= y2 {
            return Err(Error::InvalidBox(format!(
                "{label}: x1={x1} x2={x2} y1={y1} y2={y2}"
            )));
        }
        if !(0.0..=100.0).contains(&confidence) {
            return Err(Error::InvalidBox(format!("{label}: 置信度 {confidence} 超出范围")));
        }
        Ok(Self { label, confidence, x1, x2, y1, y2 })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// 置信度，百分比
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn x_range(&self) -> (i32, i32) {
        (self.x1, self.x2)
    }

    pub fn y_range(&self) -> (i32, i32) {
        (self.y1, self.y2)
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// 点是否严格位于边界框内部
    pub fn contains(&self, x: f32, y: f32) -> bool {
        (self.x1 as f32) < x && x < self.x2 as f32 && (self.y1 as f32) < y && y < self.y2 as f32
    }
}

/// 一张图片的检测结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detections {
    pub width: u32,
    pub height: u32,
    pub boxes: Vec<BoundingBox>,
}

/// 图片中的目标类别
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectClass {
    /// 没有检测到可用的目标，在全部图库中搜索
    All,
    Detected { label: String, confidence: f32 },
}

impl ObjectClass {
    pub fn label(&self) -> &str {
        match self {
            ObjectClass::All => "all",
            ObjectClass::Detected { label, .. } => label,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            ObjectClass::All => 0.0,
            ObjectClass::Detected { confidence, .. } => *confidence,
        }
    }
}

/// 选出允许类别中置信度最高的目标
///
/// 只有置信度严格更高才会替换，因此置信度相同时先出现的优先
pub fn detect_class_onpic(boxes: &[BoundingBox], allowed: &[&str]) -> ObjectClass {
    let mut result = ObjectClass::All;
    let mut highest = 0.0;
    for bbox in boxes {
        if allowed.contains(&bbox.label()) && bbox.confidence > highest {
            highest = bbox.confidence;
            result = ObjectClass::Detected { label: bbox.label.clone(), confidence: highest };
        }
    }
    result
}

/// 指定类别中置信度最高的边界框
pub fn best_box_for_class<'a>(boxes: &'a [BoundingBox], label: &str) -> Option<&'a BoundingBox> {
    let mut best: Option<&BoundingBox> = None;
    for bbox in boxes.iter().filter(|b| b.label == label) {
        if best.is_none_or(|b| bbox.confidence > b.confidence) {
            best = Some(bbox);
        }
    }
    best
}

/// 图片中的矩形裁剪区域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// 计算边界框的裁剪区域，可选在四周扩展 10%，结果限制在图片范围内
pub fn crop_region(bbox: &BoundingBox, image_size: (u32, u32), with_margin: bool) -> CropRegion {
    let (mx, my) = match with_margin {
        true => (CROP_MARGIN * bbox.width() as f32, CROP_MARGIN * bbox.height() as f32),
        false => (0.0, 0.0),
    };
    let clamp = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
    let x1 = clamp(bbox.x1 as f32 - mx, image_size.0);
    let x2 = clamp(bbox.x2 as f32 + mx, image_size.0);
    let y1 = clamp(bbox.y1 as f32 - my, image_size.1);
    let y2 = clamp(bbox.y2 as f32 + my, image_size.1);
    CropRegion { x: x1, y: y1, width: x2.saturating_sub(x1), height: y2.saturating_sub(y1) }
}

impl CropRegion {
    /// 裁剪区域是否足够大，可以替代整张图片用于搜索
    pub fn is_usable(&self) -> bool {
        self.width > MIN_CROP_SIZE && self.height > MIN_CROP_SIZE
    }
}

/// 根据点击位置找到被点击的目标
///
/// `shown_width` 为页面上显示的图片宽度，点击坐标会按 `图片宽度 / shown_width` 缩放
pub fn clicked_object<'a>(
    detections: &'a Detections,
    allowed: &[&str],
    (x, y): (f32, f32),
    shown_width: u32,
) -> Option<&'a BoundingBox> {
    if shown_width == 0 {
        return None;
    }
    let scale = detections.width as f32 / shown_width as f32;
    let (x, y) = (x * scale, y * scale);
    debug!("点击坐标按 {scale} 缩放为 ({x}, {y})");
    detections
        .boxes
        .iter()
        .filter(|b| allowed.contains(&b.label()))
        .find(|b| b.contains(x, y))
}

/// 图库中的家具类别
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FurnitureClass {
    Clock,
    Chair,
    Sofa,
    Table,
    Bed,
    #[value(name = "plant_pot")]
    PlantPot,
}

impl FurnitureClass {
    pub const ALL: [FurnitureClass; 6] = [
        FurnitureClass::Clock,
        FurnitureClass::Chair,
        FurnitureClass::Sofa,
        FurnitureClass::Table,
        FurnitureClass::Bed,
        FurnitureClass::PlantPot,
    ];

    /// 图库子目录名
    pub fn dir_name(&self) -> &'static str {
        match self {
            FurnitureClass::Clock => "clock",
            FurnitureClass::Chair => "chair",
            FurnitureClass::Sofa => "sofa",
            FurnitureClass::Table => "table",
            FurnitureClass::Bed => "bed",
            FurnitureClass::PlantPot => "plant_pot",
        }
    }

    /// 检测器标签到图库类别的映射
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "clock" => Some(FurnitureClass::Clock),
            "chair" => Some(FurnitureClass::Chair),
            "sofa" => Some(FurnitureClass::Sofa),
            "diningtable" | "table" => Some(FurnitureClass::Table),
            "bed" => Some(FurnitureClass::Bed),
            "pottedplant" | "plant_pot" => Some(FurnitureClass::PlantPot),
            _ => None,
        }
    }
}

impl fmt::Display for FurnitureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// 解析 Darknet 检测报告
///
/// ```text
/// Dimensions;640;480
/// Object;chair;87%;_;10;120;40;200
/// ```
///
/// 坐标顺序为 x1;x2;y1;y2，无效的边界框会被跳过
pub fn parse_darknet_report(text: &str) -> Result<Detections> {
    let mut detections = Detections::default();
    for (lineno, line) in text.lines().enumerate() {
        let fields = line.trim().split(';').collect::<Vec<_>>();
        match fields[0] {
            "Dimensions" => {
                if fields.len() < 3 {
                    return Err(Error::Parse(format!("第 {} 行: {}", lineno + 1, line)));
                }
                detections.width = parse_field(fields[1], lineno)?;
                detections.height = parse_field(fields[2], lineno)?;
            }
            "Object" => {
                if fields.len() < 8 {
                    return Err(Error::Parse(format!("第 {} 行: {}", lineno + 1, line)));
                }
                let confidence: f32 = parse_field(fields[2].trim_end_matches('%'), lineno)?;
                let x = (parse_field(fields[4], lineno)?, parse_field(fields[5], lineno)?);
                let y = (parse_field(fields[6], lineno)?, parse_field(fields[7], lineno)?);
                match BoundingBox::new(fields[1], confidence, x, y) {
                    Ok(bbox) => detections.boxes.push(bbox),
                    Err(e) => warn!("跳过第 {} 行: {}", lineno + 1, e),
                }
            }
            _ => {}
        }
    }
    Ok(detections)
}

fn parse_field<T: std::str::FromStr>(s: &str, lineno: usize) -> Result<T> {
    s.trim()
        .parse()
        .map_err(|_| Error::Parse(format!("第 {} 行: 无法解析 {:?}", lineno + 1, s)))
}

/// 目标检测器
pub trait ObjectDetector: Send + Sync {
    /// 检测图片中的目标，无法读取的图片返回错误
    fn detect(&self, path: &Path) -> Result<Detections>;
}

/// 从预先生成的 Darknet 报告中读取检测结果，报告文件名为 `{图片名}.txt`
pub struct ReportDetector {
    dir: PathBuf,
}

impl ReportDetector {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ObjectDetector for ReportDetector {
    fn detect(&self, path: &Path) -> Result<Detections> {
        let stem = path
            .file_stem()
            .ok_or_else(|| Error::NotFound(format!("无效的图片路径: {}", path.display())))?;
        let report = self.dir.join(format!("{}.txt", stem.to_string_lossy()));
        if !report.exists() {
            return Err(Error::NotFound(format!("检测报告不存在: {}", report.display())));
        }
        parse_darknet_report(&fs::read_to_string(report)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(label: &str, confidence: f32) -> BoundingBox {
        BoundingBox::new(label, confidence, (10, 200), (20, 300)).unwrap()
    }

    #[test]
    fn test_invalid_box() {
        assert!(BoundingBox::new("chair", 50.0, (10, 10), (0, 5)).is_err());
        assert!(BoundingBox::new("chair", 50.0, (0, 5), (7, 3)).is_err());
        assert!(BoundingBox::new("chair", 150.0, (0, 5), (0, 5)).is_err());
    }

    #[test]
    fn test_detect_class_onpic() {
        let boxes = vec![bbox("person", 99.0), bbox("chair", 60.0), bbox("sofa", 80.0)];
        let class = detect_class_onpic(&boxes, ALLOWED_CLASSES);
        assert_eq!(class.label(), "sofa");
        assert_eq!(class.confidence(), 80.0);

        // 置信度相同时先出现的优先
        let boxes = vec![bbox("bed", 70.0), bbox("clock", 70.0)];
        assert_eq!(detect_class_onpic(&boxes, ALLOWED_CLASSES).label(), "bed");

        let boxes = vec![bbox("person", 99.0), bbox("dog", 80.0)];
        assert_eq!(detect_class_onpic(&boxes, ALLOWED_CLASSES), ObjectClass::All);
        assert_eq!(detect_class_onpic(&[], ALLOWED_CLASSES).label(), "all");
    }

    #[test]
    fn test_crop_region() {
        let b = BoundingBox::new("chair", 90.0, (100, 300), (50, 250)).unwrap();
        let region = crop_region(&b, (1000, 1000), true);
        assert_eq!(region, CropRegion { x: 80, y: 30, width: 240, height: 240 });
        assert!(region.is_usable());

        let region = crop_region(&b, (1000, 1000), false);
        assert_eq!(region, CropRegion { x: 100, y: 50, width: 200, height: 200 });

        // 超出图片的部分被截断
        let region = crop_region(&b, (310, 240), true);
        assert_eq!(region, CropRegion { x: 80, y: 30, width: 230, height: 210 });

        let small = BoundingBox::new("clock", 90.0, (0, 100), (0, 100)).unwrap();
        assert!(!crop_region(&small, (1000, 1000), true).is_usable());
    }

    #[test]
    fn test_clicked_object() {
        let detections = Detections {
            width: 1000,
            height: 800,
            boxes: vec![
                BoundingBox::new("person", 90.0, (0, 1000), (0, 800)).unwrap(),
                BoundingBox::new("chair", 90.0, (100, 300), (100, 300)).unwrap(),
                BoundingBox::new("sofa", 90.0, (150, 600), (150, 600)).unwrap(),
            ],
        };
        // 页面显示宽度为 500，缩放比例为 2
        let hit = clicked_object(&detections, ALLOWED_CLASSES, (100.0, 100.0), 500).unwrap();
        assert_eq!(hit.label(), "chair");
        let hit = clicked_object(&detections, ALLOWED_CLASSES, (200.0, 200.0), 500).unwrap();
        assert_eq!(hit.label(), "sofa");
        // 边界上不算命中
        assert!(clicked_object(&detections, ALLOWED_CLASSES, (50.0, 50.0), 500).is_none());
        assert!(clicked_object(&detections, ALLOWED_CLASSES, (450.0, 10.0), 500).is_none());
    }

    #[test]
    fn test_parse_darknet_report() {
        let report = "Dimensions;640;480\n\
                      Object;chair;87%;_;10;120;40;200\n\
                      Object;sofa;55%;_;300;200;40;200\n\
                      Enter Image Path: done\n";
        let detections = parse_darknet_report(report).unwrap();
        assert_eq!((detections.width, detections.height), (640, 480));
        assert_eq!(detections.boxes.len(), 1);
        assert_eq!(detections.boxes[0].label(), "chair");
        assert_eq!(detections.boxes[0].confidence(), 87.0);
        assert_eq!(detections.boxes[0].x_range(), (10, 120));

        assert!(parse_darknet_report("Object;chair;x%;_;1;2;3;4").is_err());
    }

    #[test]
    fn test_furniture_class() {
        assert_eq!(FurnitureClass::from_label("diningtable"), Some(FurnitureClass::Table));
        assert_eq!(FurnitureClass::from_label("pottedplant"), Some(FurnitureClass::PlantPot));
        assert_eq!(FurnitureClass::from_label("person"), None);
        assert_eq!(FurnitureClass::PlantPot.to_string(), "plant_pot");
    }

    #[test]
    fn test_report_detector() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("room.txt"), "Dimensions;10;10\n").unwrap();
        let detector = ReportDetector::new(dir.path());
        assert_eq!(detector.detect(Path::new("/tmp/room.jpg")).unwrap().width, 10);
        assert!(detector.detect(Path::new("/tmp/other.jpg")).unwrap_err().is_not_found());
    }
}
