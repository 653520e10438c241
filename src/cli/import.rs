use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::Parser;
use log::info;
use ndarray::Array2;
use ndarray_npy::read_npy;

use crate::cache::FileCache;
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::feature::{FeatureModel, FeatureVector};
use crate::utils;

#[derive(Parser, Debug, Clone)]
pub struct ImportCommand {
    /// 特征属于哪个模型
    #[arg(short, long, value_enum, default_value_t = FeatureModel::Resnet)]
    pub model: FeatureModel,
    /// 特征矩阵，`.npy` 格式，每行一张图片
    pub features: PathBuf,
    /// 图片名列表，JSON 字符串数组，顺序与特征矩阵的行一致
    pub names: PathBuf,
}

impl SubCommandExtend for ImportCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let data: Array2<f32> = read_npy(&self.features)?;
        let names: Vec<String> = serde_json::from_reader(BufReader::new(File::open(&self.names)?))?;
        if names.len() != data.nrows() {
            bail!("图片名数量 {} 与特征行数 {} 不一致", names.len(), data.nrows());
        }
        if let Some(dim) = self.model.fixed_dim() {
            if dim != data.ncols() {
                bail!("{} 特征应为 {} 维，输入为 {} 维", self.model, dim, data.ncols());
            }
        }

        let cache = FileCache::open(opts.conf_dir().features(self.model));
        for (name, row) in names.iter().zip(data.outer_iter()) {
            cache.insert(utils::cache_key(Path::new(name)), FeatureVector::new(row.to_vec()));
        }
        cache.flush()?;
        info!("导入 {} 个 {} 特征，缓存中共 {} 个", names.len(), self.model, cache.len());
        Ok(())
    }
}
