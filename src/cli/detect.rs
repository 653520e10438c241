use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::cache::FileCache;
use crate::cli::{OutputFormat, SubCommandExtend};
use crate::config::{DetectorOptions, Opts};
use crate::detect::{ALLOWED_CLASSES, Detections, crop_region, detect_class_onpic};
use crate::extract::create_detector;
use crate::{imageops, utils};

#[derive(Parser, Debug, Clone)]
pub struct DetectCommand {
    #[command(flatten)]
    pub detector: DetectorOptions,
    /// 图片路径
    pub images: Vec<PathBuf>,
    /// 把检测到的目标裁剪到数据目录的 crops 下
    #[arg(long)]
    pub crop: bool,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for DetectCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let conf_dir = opts.conf_dir();
        let data_dir = opts.data_dir();
        let detector = create_detector(&conf_dir, &data_dir, &self.detector)?;
        let cache = FileCache::<Detections>::open(conf_dir.detections());
        info!("加载 {} 条检测结果缓存", cache.len());

        for image in &self.images {
            let detections = block_in_place(|| cache.detections_for(image, detector.as_ref()))?;
            let class = detect_class_onpic(&detections.boxes, ALLOWED_CLASSES);
            match self.output_format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({
                        "image": image,
                        "class": class.label(),
                        "detections": detections,
                    })
                ),
                OutputFormat::Table => {
                    println!("# {}\t{}\t{}%", image.display(), class.label(), class.confidence());
                    for bbox in &detections.boxes {
                        let (x1, x2) = bbox.x_range();
                        let (y1, y2) = bbox.y_range();
                        println!("{}\t{}%\t{x1}\t{x2}\t{y1}\t{y2}", bbox.label(), bbox.confidence());
                    }
                }
            }

            if self.crop {
                let size = match (detections.width, detections.height) {
                    (0, _) | (_, 0) => imageops::dimensions(image)?,
                    size => size,
                };
                for (i, bbox) in detections.boxes.iter().enumerate() {
                    let dst = data_dir
                        .crops()
                        .join(format!("{}_{}_{}", bbox.label(), i, utils::cache_key(image)));
                    imageops::crop_to(image, crop_region(bbox, size, true), &dst)?;
                    info!("保存 {}", dst.display());
                }
            }
        }
        cache.flush()?;
        Ok(())
    }
}
