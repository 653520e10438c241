use std::path::PathBuf;

use thiserror::Error;

/// 库内部使用的错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 查询空索引
    #[error("索引为空: {0}")]
    EmptyIndex(String),

    #[error("未找到: {0}")]
    NotFound(String),

    /// 查询向量与索引的维度不一致
    #[error("特征维度不匹配：索引为 {expected}，输入为 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("无效的边界框: {0}")]
    InvalidBox(String),

    #[error("无法读取图片 {path}: {source}")]
    Image { path: PathBuf, source: image::ImageError },

    /// 当前构建未启用对应的后端
    #[error("后端不可用: {0}")]
    BackendUnavailable(String),

    #[error("解析失败: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bincode(#[from] bincode::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Npy(#[from] ndarray_npy::ReadNpyError),

    #[cfg(feature = "opencv")]
    #[error(transparent)]
    OpenCv(#[from] opencv::Error),
}

impl Error {
    /// 是否属于“找不到结果”一类的错误，调用方通常将其降级为空结果
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::EmptyIndex(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
