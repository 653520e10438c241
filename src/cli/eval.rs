use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressIterator};
use log::{debug, info};
use tokio::task::block_in_place;

use crate::cli::{FinderOptions, SubCommandExtend};
use crate::config::Opts;
use crate::eval::{Accuracy, GroundTruth};
use crate::utils::{self, pb_style};

#[derive(Parser, Debug, Clone)]
pub struct EvalCommand {
    #[command(flatten)]
    pub finder: FinderOptions,
    /// 标注文件，每行为 `场景图片名;商品图片名`
    pub ground_truth: PathBuf,
    /// 测试场景目录，默认为数据目录下的 scenes
    #[arg(long, value_name = "DIR")]
    pub scenes: Option<PathBuf>,
    /// 标注文件的列顺序为 `商品图片名;场景图片名`
    #[arg(long)]
    pub reverse: bool,
}

impl SubCommandExtend for EvalCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let truth = GroundTruth::load(&self.ground_truth, self.reverse)?;
        let finder = self.finder.open(opts)?;
        let dir = self.scenes.clone().unwrap_or_else(|| opts.data_dir().scenes());
        let scenes = utils::list_images(&dir, &utils::suffix_regex(&self.finder.suffix));
        info!("评估 {} 张场景图片，{} 条标注", scenes.len(), truth.len());

        let mut accuracy = Accuracy::default();
        let pb = ProgressBar::new(scenes.len() as u64).with_style(pb_style());
        for scene in scenes.iter().progress_with(pb.clone()) {
            let result = block_in_place(|| finder.search_scene(scene, ""))?;
            let name = utils::cache_key(scene);
            let correct = truth.is_correct(&name, result.visual.iter().map(|m| m.id.as_str()));
            accuracy.record(correct);
            if correct {
                debug!("{name} 搜索正确");
            }
            pb.set_message(format!("准确率 {:.2}%", accuracy.value() * 100.0));
        }
        pb.finish_and_clear();
        finder.flush()?;

        info!("{} 上的准确率为 {:.4}", dir.display(), accuracy.value());
        println!("{}/{}\t{:.4}", accuracy.correct, accuracy.total, accuracy.value());
        Ok(())
    }
}
