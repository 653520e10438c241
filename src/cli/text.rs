use anyhow::{Result, bail};
use clap::Parser;
use tokio::task::block_in_place;

use crate::cli::{OutputFormat, SubCommandExtend};
use crate::config::Opts;
use crate::finder::load_text_engine;
use crate::text::Closest;

#[derive(Parser, Debug, Clone)]
pub struct TextCommand {
    /// 文本查询
    pub query: String,
    /// 返回的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 10)]
    pub count: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for TextCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let Some(engine) = block_in_place(|| load_text_engine(&opts.conf_dir()))? else {
            bail!("商品目录不存在: {}", opts.conf_dir().catalog().display());
        };
        let engine = engine.with_count(self.count);

        let closest = engine.find_n_closest(&self.query, self.count);
        let w2vec = engine.process_query_w2vec(&self.query);
        match self.output_format {
            OutputFormat::Json => {
                let closest_id = match engine.find_closest(&self.query) {
                    Closest::Found { id, .. } => Some(id),
                    Closest::NotFound => None,
                };
                let output = serde_json::json!({
                    "closest": closest_id,
                    "countvect": engine.process_query(&self.query),
                    "w2vec": w2vec,
                    "distances": closest,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Table => {
                for (id, distance) in &closest {
                    let img = engine.catalog().get(id).map(|item| item.img.as_str()).unwrap_or("");
                    println!("{distance:.4}\t{id}\t{img}");
                }
                for path in &w2vec {
                    println!("w2vec\t{path}");
                }
            }
        }
        Ok(())
    }
}
