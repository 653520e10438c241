use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{Opts, SiftOptions, VerifyOptions};
use crate::extract::create_local_features;
use crate::geom::GeometricVerifier;

#[derive(Parser, Debug, Clone)]
pub struct VerifyCommand {
    #[command(flatten)]
    pub sift: SiftOptions,
    #[command(flatten)]
    pub verify: VerifyOptions,
    /// 查询图片
    pub query: PathBuf,
    /// 候选图片，可以有多张
    #[arg(required = true)]
    pub candidates: Vec<PathBuf>,
}

impl SubCommandExtend for VerifyCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let verifier = GeometricVerifier::new(create_local_features(&self.sift), self.verify.params());
        let query = block_in_place(|| verifier.keypoints(&self.query))?;
        info!("{}: {} 个特征点", self.query.display(), query.len());
        for candidate in &self.candidates {
            let inliers = block_in_place(|| verifier.inliers_with(&query, candidate))?;
            println!("{inliers}\t{}", candidate.display());
        }
        Ok(())
    }
}
