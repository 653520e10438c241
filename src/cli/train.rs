use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{info, warn};
use ndarray::{Axis, concatenate};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use tokio::task::block_in_place;

use crate::bovw::{FEATURES_CLUSTERS, Vocabulary};
use crate::cli::SubCommandExtend;
use crate::config::{Opts, SiftOptions};
use crate::detect::FurnitureClass;
use crate::extract::create_local_features;
use crate::geom::LocalFeatures;
use crate::utils::{self, pb_style};

#[derive(Parser, Debug, Clone)]
pub struct TrainCommand {
    #[command(flatten)]
    pub sift: SiftOptions,
    /// 训练图片所在目录，默认使用所有类别的图库
    #[arg(long, value_name = "DIR")]
    pub images: Option<PathBuf>,
    /// 视觉单词数量
    #[arg(short, long, default_value_t = FEATURES_CLUSTERS)]
    pub centers: usize,
    /// 最多使用的描述符数量，超过时随机采样
    #[arg(long, value_name = "N", default_value_t = 200_000)]
    pub max_descriptors: usize,
    /// 最大迭代次数
    #[arg(short, long, default_value_t = 20)]
    pub max_iter: usize,
    /// 描述符采样的随机数种子
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png")]
    pub suffix: String,
}

impl SubCommandExtend for TrainCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let data_dir = opts.data_dir();
        let suffix = utils::suffix_regex(&self.suffix);
        let images = match &self.images {
            Some(dir) => utils::list_images(dir, &suffix),
            None => FurnitureClass::ALL
                .iter()
                .flat_map(|&class| utils::list_images(&data_dir.gallery(class), &suffix))
                .collect(),
        };
        if images.is_empty() {
            bail!("没有找到训练图片");
        }
        info!("从 {} 张图片中提取 SIFT 描述符", images.len());

        let features = create_local_features(&self.sift);
        let pb = ProgressBar::new(images.len() as u64).with_style(pb_style());
        let descriptors = block_in_place(|| {
            images
                .par_iter()
                .progress_with(pb.clone())
                .filter_map(|path| match features.detect(path) {
                    Ok(kps) => Some(kps.descriptors),
                    Err(e) => {
                        pb.suspend(|| warn!("跳过 {}: {}", path.display(), e));
                        None
                    }
                })
                .collect::<Vec<_>>()
        });
        pb.finish_and_clear();

        let views = descriptors.iter().filter(|d| d.nrows() > 0).map(|d| d.view()).collect::<Vec<_>>();
        if views.is_empty() {
            bail!("没有提取到任何描述符");
        }
        let mut data = concatenate(Axis(0), &views)?;
        if data.nrows() > self.max_descriptors {
            let mut rng = StdRng::seed_from_u64(self.seed);
            let rows = rand::seq::index::sample(&mut rng, data.nrows(), self.max_descriptors);
            data = data.select(Axis(0), &rows.into_vec());
        }

        let vocabulary =
            block_in_place(|| Vocabulary::train(&data, self.centers, self.max_iter))?;
        vocabulary.save(&opts.conf_dir().vocabulary())?;
        Ok(())
    }
}

