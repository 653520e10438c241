use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::detect::FurnitureClass;
use crate::feature::FeatureModel;
use crate::geom::VerifyParams;
use crate::index::Metric;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs =
        ProjectDirs::from("", "furnsearch", "furnsearch").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> String {
    CONF_DIR.path().to_string_lossy().into_owned()
}

#[derive(Parser, Debug, Clone)]
pub struct ModelOptions {
    /// 特征提取模型
    #[arg(short, long, value_enum, default_value_t = FeatureModel::Resnet)]
    pub model: FeatureModel,
    /// 距离度量，默认 CNN 使用欧氏距离，BoVW 使用直方图交
    #[arg(long, value_enum)]
    pub metric: Option<Metric>,
    /// ONNX 模型文件，默认为配置目录下的 models/<模型名>.onnx
    #[arg(long, value_name = "PATH")]
    pub onnx_model: Option<PathBuf>,
}

impl ModelOptions {
    pub fn metric(&self) -> Metric {
        self.metric.unwrap_or_else(|| self.model.default_metric())
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SiftOptions {
    /// SIFT 特征点最大保留数量
    #[arg(long, value_name = "N", default_value_t = 1000)]
    pub sift_nfeatures: i32,
    /// SIFT 对比度阈值
    #[arg(long, value_name = "THRESHOLD", default_value_t = 0.05)]
    pub sift_contrast_threshold: f64,
    /// SIFT 边缘阈值
    #[arg(long, value_name = "THRESHOLD", default_value_t = 11.)]
    pub sift_edge_threshold: f64,
}

#[derive(Parser, Debug, Clone)]
pub struct VerifyOptions {
    /// 使用 RANSAC 几何校验对视觉搜索结果重新排序
    #[arg(long)]
    pub geom_check: bool,
    /// 几何校验的候选数量上限，超过时跳过校验
    #[arg(long, value_name = "N", default_value_t = 6)]
    pub nb_matches: usize,
    /// RANSAC 内点的最大重投影误差，单位为像素
    #[arg(long, value_name = "PIXELS", default_value_t = 15.)]
    pub ransac_threshold: f64,
    /// 匹配数量必须超过该值才会进行 RANSAC
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub min_match_count: usize,
    /// Lowe 比率测试阈值
    #[arg(long, value_name = "RATIO", default_value_t = 0.8)]
    pub ratio: f32,
    /// RANSAC 随机数种子
    #[arg(long, value_name = "SEED", default_value_t = 42)]
    pub ransac_seed: u64,
}

impl VerifyOptions {
    pub fn params(&self) -> VerifyParams {
        VerifyParams {
            ratio: self.ratio,
            min_match_count: self.min_match_count,
            ransac_threshold: self.ransac_threshold,
            seed: self.ransac_seed,
            ..VerifyParams::default()
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    /// 读取预先生成的 Darknet 检测报告
    Report,
    /// 使用 OpenCV dnn 运行 YOLO
    Yolo,
}

#[derive(Parser, Debug, Clone)]
pub struct DetectorOptions {
    /// 目标检测后端
    #[arg(long, value_enum, default_value_t = DetectorKind::Report)]
    pub detector: DetectorKind,
    /// Darknet 检测报告目录，默认为数据目录下的 reports
    #[arg(long, value_name = "DIR")]
    pub reports_dir: Option<PathBuf>,
    /// YOLO 置信度阈值
    #[arg(long, value_name = "THRESHOLD", default_value_t = 0.2)]
    pub yolo_threshold: f32,
    /// YOLO 非极大值抑制阈值
    #[arg(long, value_name = "THRESHOLD", default_value_t = 0.5)]
    pub yolo_nms_threshold: f32,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 视觉搜索返回的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 6)]
    pub count: usize,
    /// 文本搜索返回的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 10)]
    pub text_count: usize,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "furnsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// furnsearch 配置文件目录
    #[arg(short, long, default_value_t = default_config_dir())]
    pub conf_dir: String,
    /// 数据目录，存放图库、场景图片和上传文件，默认为配置目录下的 data
    #[arg(short, long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

impl Opts {
    pub fn conf_dir(&self) -> ConfDir {
        ConfDir { path: PathBuf::from(&self.conf_dir) }
    }

    pub fn data_dir(&self) -> DataDir {
        match &self.data_dir {
            Some(path) => DataDir::new(path),
            None => DataDir::new(self.conf_dir().path().join("data")),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 为图库构建视觉索引
    Build(BuildCommand),
    /// 搜索与图片中家具相似的商品
    Search(SearchCommand),
    /// 根据文本搜索商品
    Text(TextCommand),
    /// 检测图片中的家具
    Detect(DetectCommand),
    /// 计算两张图片之间的几何校验内点数量
    Verify(VerifyCommand),
    /// 训练视觉词典
    Train(TrainCommand),
    /// 导出索引中的特征
    Export(ExportCommand),
    /// 导入预先计算的特征到缓存
    Import(ImportCommand),
    /// 评估搜索准确率
    Eval(EvalCommand),
    /// 清理缓存
    Clean(CleanCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
}

/// 配置目录，存放模型、缓存和索引
#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 商品目录文件
    pub fn catalog(&self) -> PathBuf {
        self.path.join("catalog.json")
    }

    /// word2vec 文本格式模型
    pub fn word2vec(&self) -> PathBuf {
        self.path.join("word2vec.txt")
    }

    /// 检测结果缓存
    pub fn detections(&self) -> PathBuf {
        self.path.join("detections.bin")
    }

    /// 特征缓存，每个模型一个文件
    pub fn features(&self, model: FeatureModel) -> PathBuf {
        self.path.join(format!("features_{}.bin", model.name()))
    }

    /// 索引目录
    pub fn index_dir(&self) -> PathBuf {
        self.path.join("index")
    }

    /// 某个类别的视觉索引文件
    pub fn index(&self, class: FurnitureClass, model: FeatureModel) -> PathBuf {
        self.index_dir().join(format!("{}_{}.bin", class.dir_name(), model.name()))
    }

    /// BoVW 视觉词典
    pub fn vocabulary(&self) -> PathBuf {
        self.path.join("vocabulary.bin")
    }

    /// CNN 模型文件
    pub fn onnx_model(&self, model: FeatureModel) -> PathBuf {
        self.path.join("models").join(format!("{}.onnx", model.name()))
    }

    /// YOLO 模型目录，包含 yolo.cfg、yolo.weights 和 coco.names
    pub fn yolo_dir(&self) -> PathBuf {
        self.path.join("yolo")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

/// 数据目录
///
/// ```text
/// images/<类别>/   图库
/// scenes/          场景图片
/// uploads/         上传的图片，以内容哈希命名
/// crops/           裁剪出的目标
/// reports/         Darknet 检测报告
/// ```
#[derive(Debug, Clone)]
pub struct DataDir {
    path: PathBuf,
}

impl DataDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn gallery(&self, class: FurnitureClass) -> PathBuf {
        self.path.join("images").join(class.dir_name())
    }

    pub fn scenes(&self) -> PathBuf {
        self.path.join("scenes")
    }

    pub fn uploads(&self) -> PathBuf {
        self.path.join("uploads")
    }

    pub fn crops(&self) -> PathBuf {
        self.path.join("crops")
    }

    pub fn reports(&self) -> PathBuf {
        self.path.join("reports")
    }

    /// 相对于数据目录的路径，用于返回给调用方
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.path).unwrap_or(path).to_string_lossy().replace('\\', "/")
    }
}
