use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio::task::block_in_place;

use crate::cache::SearchCache;
use crate::cli::SubCommandExtend;
use crate::config::{ModelOptions, Opts, SiftOptions};
use crate::detect::FurnitureClass;
use crate::engine::VisualSearchEngine;
use crate::extract::create_extractor;
use crate::utils;

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    #[command(flatten)]
    pub sift: SiftOptions,
    /// 只构建指定类别的索引，默认构建所有存在图库的类别
    #[arg(long, value_enum)]
    pub class: Option<FurnitureClass>,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png")]
    pub suffix: String,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let conf_dir = opts.conf_dir();
        let data_dir = opts.data_dir();
        let extractor = create_extractor(&conf_dir, &self.model, &self.sift)?;
        let cache = SearchCache::open(&conf_dir, self.model.model);
        let suffix = utils::suffix_regex(&self.suffix);

        let classes = match self.class {
            Some(class) => vec![class],
            None => FurnitureClass::ALL.to_vec(),
        };
        for class in classes {
            let gallery = data_dir.gallery(class);
            if !gallery.is_dir() {
                warn!("{} 图库不存在: {}", class, gallery.display());
                continue;
            }
            block_in_place(|| -> Result<()> {
                let engine = VisualSearchEngine::build(
                    class,
                    &gallery,
                    &suffix,
                    extractor.as_ref(),
                    &cache,
                    self.model.metric(),
                )?;
                engine.save(&conf_dir.index(class, self.model.model))?;
                cache.flush()?;
                Ok(())
            })?;
        }
        info!("构建索引成功");
        Ok(())
    }
}
