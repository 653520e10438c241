use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio::task::block_in_place;

use crate::cli::{FinderOptions, SubCommandExtend};
use crate::config::Opts;
use crate::detect::FurnitureClass;
use crate::finder::{SearchResult, Similar, VisualMatch};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub finder: FinderOptions,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 文本查询，为空时使用检测到的类别
    #[arg(short, long, default_value = "")]
    pub text: String,
    /// 跳过目标检测，直接在指定类别的图库中搜索整张图片
    #[arg(long, value_enum)]
    pub class: Option<FurnitureClass>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let finder = self.finder.open(opts)?;
        let output = block_in_place(|| -> Result<_> {
            let output = match self.class {
                Some(class) => match finder.return_similar(&self.image, Some(class))? {
                    Similar::Found(matches) => Output::Visual(matches),
                    Similar::NotFound => anyhow::bail!("无法读取图片: {}", self.image.display()),
                },
                None => Output::Scene(Box::new(finder.search_scene(&self.image, &self.text)?)),
            };
            finder.flush()?;
            Ok(output)
        })?;
        print_result(&output, self.output_format)
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum Output {
    Visual(Vec<VisualMatch>),
    Scene(Box<SearchResult>),
}

fn print_result(output: &Output, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(output)?)
        }
        OutputFormat::Table => {
            let visual = match output {
                Output::Visual(visual) => visual,
                Output::Scene(result) => {
                    println!("# {} ({:.0}%)", result.object_class, result.confidence);
                    &result.visual
                }
            };
            for m in visual {
                println!("{:.4}\t{}\t{}", m.distance, m.inliers, m.path);
            }
            if let Output::Scene(result) = output {
                for path in &result.text.countvect {
                    println!("text\t{path}");
                }
                for path in &result.text.w2vec {
                    println!("w2vec\t{path}");
                }
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
