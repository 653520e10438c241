mod build;
mod clean;
mod detect;
mod eval;
mod export;
mod import;
mod search;
pub mod server;
mod text;
mod train;
mod verify;

pub use build::*;
pub use clean::*;
pub use detect::*;
pub use eval::*;
pub use export::*;
pub use import::*;
pub use search::*;
pub use server::*;
pub use text::*;
pub use train::*;
pub use verify::*;

use clap::Parser;
use tokio::task::block_in_place;

use crate::config::{DetectorOptions, ModelOptions, Opts, SearchOptions, SiftOptions, VerifyOptions};
use crate::extract::{create_detector, create_extractor, create_local_features};
use crate::finder::{Finder, FinderBuilder};
use crate::geom::GeometricVerifier;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 搜索相关子命令共用的选项
#[derive(Parser, Debug, Clone)]
pub struct FinderOptions {
    #[command(flatten)]
    pub model: ModelOptions,
    #[command(flatten)]
    pub sift: SiftOptions,
    #[command(flatten)]
    pub detector: DetectorOptions,
    #[command(flatten)]
    pub verify: VerifyOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 图库图片的后缀名，多个后缀用逗号分隔
    #[arg(long, default_value = "jpg,jpeg,png")]
    pub suffix: String,
}

impl FinderOptions {
    /// 创建各个后端并加载索引，索引不存在时会先构建
    pub fn open(&self, opts: &Opts) -> anyhow::Result<Finder> {
        let conf_dir = opts.conf_dir();
        let data_dir = opts.data_dir();
        let extractor = create_extractor(&conf_dir, &self.model, &self.sift)?;
        let detector = create_detector(&conf_dir, &data_dir, &self.detector)?;

        let mut builder = FinderBuilder::new(conf_dir, data_dir, extractor, detector)
            .suffix(&self.suffix)
            .metric(self.model.metric())
            .count(self.search.count)
            .text_count(self.search.text_count);
        if self.verify.geom_check {
            let verifier =
                GeometricVerifier::new(create_local_features(&self.sift), self.verify.params());
            builder = builder.verifier(verifier, self.verify.nb_matches);
        }
        Ok(block_in_place(|| builder.build())?)
    }
}
