use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum_typed_multipart::TypedMultipart;
use log::info;
use serde_json::{Value, json};
use tokio::task::block_in_place;

use super::error::Result;
use super::state::AppState;
use super::types::*;

/// 上传一张场景图片并搜索其中的家具
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
        (status = 400, description = "图片无法解码"),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(data): TypedMultipart<SearchRequest>,
) -> Result<Json<Value>> {
    let start = Instant::now();
    let finder = &state.finder;
    let file_name = data.file.metadata.file_name.as_deref();
    info!("正在搜索上传图片 {}", file_name.unwrap_or("<unnamed>"));

    let result = block_in_place(|| -> Result<_> {
        let path = finder.save_upload(&data.file.contents, file_name)?;
        Ok(finder.search_scene(&path, data.text.as_deref().unwrap_or(""))?)
    })?;

    Ok(Json(json!({
        "time": start.elapsed().as_millis(),
        "result": result,
    })))
}

/// 搜索场景图片中置信度最高的家具
#[utoipa::path(
    post,
    path = "/search/scene",
    request_body = SceneRequest,
    responses(
        (status = 200, body = SearchResponse),
        (status = 404, description = "图片不存在"),
    )
)]
pub async fn scene_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<SceneRequest>,
) -> Result<Json<Value>> {
    let start = Instant::now();
    let result = block_in_place(|| -> Result<_> {
        let path = state.finder.resolve_image(&data.image)?;
        Ok(state.finder.search_scene(&path, &data.text)?)
    })?;
    Ok(Json(json!({
        "time": start.elapsed().as_millis(),
        "result": result,
    })))
}

/// 搜索图片中被点击的家具
#[utoipa::path(
    post,
    path = "/search/click",
    request_body = ClickRequest,
    responses(
        (status = 200, body = SearchResponse),
        (status = 404, description = "图片不存在"),
    )
)]
pub async fn click_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<ClickRequest>,
) -> Result<Json<Value>> {
    let start = Instant::now();
    let result = block_in_place(|| -> Result<_> {
        let path = state.finder.resolve_image(&data.image)?;
        Ok(state.finder.search_click(&path, (data.x, data.y), data.width, &data.text)?)
    })?;
    Ok(Json(json!({
        "time": start.elapsed().as_millis(),
        "result": result,
    })))
}

/// 文本搜索，提供之前的视觉结果时按特征距离混合
#[utoipa::path(
    post,
    path = "/search/text",
    request_body = TextRequest,
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn text_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<TextRequest>,
) -> Result<Json<Value>> {
    let start = Instant::now();
    let result = block_in_place(|| match data.visual.is_empty() {
        true => json!({ "text": state.finder.text_results(&data.query, &data.object_class) }),
        false => json!(state.finder.update_text(&data.query, &data.object_class, &data.visual)),
    });
    Ok(Json(json!({
        "time": start.elapsed().as_millis(),
        "result": result,
    })))
}

/// 列出所有场景图片
#[utoipa::path(
    get,
    path = "/scenes",
    responses(
        (status = 200, body = Vec<SceneResponse>),
    )
)]
pub async fn scenes_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let start = Instant::now();
    let scenes = block_in_place(|| state.finder.scenes());
    Ok(Json(json!({
        "time": start.elapsed().as_millis(),
        "result": scenes,
    })))
}
