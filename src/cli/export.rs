use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use ndarray_npy::write_npy;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::detect::FurnitureClass;
use crate::feature::FeatureModel;
use crate::index::VisualIndex;

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    /// 导出哪个模型的索引
    #[arg(short, long, value_enum, default_value_t = FeatureModel::Resnet)]
    pub model: FeatureModel,
    /// 只导出指定类别，默认导出所有已构建的索引
    #[arg(long, value_enum)]
    pub class: Option<FurnitureClass>,
    /// 输出目录，每个类别生成 `<类别>_<模型>.npy` 和 `<类别>_<模型>.json`
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,
}

impl SubCommandExtend for ExportCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let conf_dir = opts.conf_dir();
        std::fs::create_dir_all(&self.output)?;
        let classes = match self.class {
            Some(class) => vec![class],
            None => FurnitureClass::ALL.to_vec(),
        };
        for class in classes {
            let path = conf_dir.index(class, self.model);
            if !path.exists() {
                warn!("{} 索引不存在: {}", class, path.display());
                continue;
            }
            let (ids, data) = VisualIndex::load(&path)?.to_array();
            let name = format!("{}_{}", class.dir_name(), self.model.name());
            write_npy(self.output.join(format!("{name}.npy")), &data)?;
            let writer = BufWriter::new(File::create(self.output.join(format!("{name}.json")))?);
            serde_json::to_writer(writer, &ids)?;
            info!("导出 {} 个 {} 特征到 {}", ids.len(), class, self.output.display());
        }
        info!("导出成功");
        Ok(())
    }
}
