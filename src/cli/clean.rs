use std::fs;
use std::path::Path;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::feature::FeatureModel;

#[derive(Parser, Debug, Clone)]
pub struct CleanCommand {
    /// 同时删除所有索引
    #[arg(long)]
    pub all: bool,
    /// 只删除指定模型的特征缓存，默认删除检测缓存和所有模型的特征缓存
    #[arg(short, long, value_enum)]
    pub model: Option<FeatureModel>,
}

impl SubCommandExtend for CleanCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let conf_dir = opts.conf_dir();
        info!("清理缓存中……");
        match self.model {
            Some(model) => remove(&conf_dir.features(model))?,
            None => {
                remove(&conf_dir.detections())?;
                for model in FeatureModel::value_variants() {
                    remove(&conf_dir.features(*model))?;
                }
            }
        }
        if self.all && conf_dir.index_dir().exists() {
            fs::remove_dir_all(conf_dir.index_dir())?;
            info!("删除 {}", conf_dir.index_dir().display());
        }
        info!("清理完成");
        Ok(())
    }
}

fn remove(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
        info!("删除 {}", path.display());
    }
    Ok(())
}
