use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::Deserialize;
use utoipa::ToSchema;

/// 上传图片搜索的请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    pub file: FieldData<Bytes>,
    pub text: Option<String>,
}

/// 上传图片搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 上传的场景图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 文本查询，为空时使用检测到的类别
    pub text: Option<String>,
}

/// 搜索场景图片
#[derive(Debug, Deserialize, ToSchema)]
pub struct SceneRequest {
    /// 场景图片名，或者之前上传返回的图片名
    pub image: String,
    /// 文本查询，为空时使用检测到的类别
    #[serde(default)]
    pub text: String,
}

/// 点击图片中的目标进行搜索
#[derive(Debug, Deserialize, ToSchema)]
pub struct ClickRequest {
    /// 场景图片名，或者之前上传返回的图片名
    pub image: String,
    /// 页面上的点击坐标
    pub x: f32,
    pub y: f32,
    /// 页面上显示的图片宽度
    pub width: u32,
    #[serde(default)]
    pub text: String,
}

/// 更新文本查询
#[derive(Debug, Deserialize, ToSchema)]
pub struct TextRequest {
    pub query: String,
    /// 当前目标的类别，查询为空时作为查询文本
    #[serde(default)]
    pub object_class: String,
    /// 之前的视觉搜索结果路径，不为空时按特征距离混合文本结果
    #[serde(default)]
    pub visual: Vec<String>,
}

/// 搜索响应
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchResponse {
    /// 搜索耗时，单位为毫秒
    pub time: u32,
    /// 检测结果、视觉搜索结果、文本搜索结果以及混合结果
    #[schema(value_type = Object)]
    pub result: String,
}

/// 场景图片
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SceneResponse {
    /// 相对于数据目录的路径
    pub path: String,
    pub width: u32,
    pub height: u32,
}
