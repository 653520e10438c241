mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::search_handler,
        api::scene_handler,
        api::click_handler,
        api::text_handler,
        api::scenes_handler,
    ),
    components(schemas(
        types::SearchForm,
        types::SceneRequest,
        types::ClickRequest,
        types::TextRequest,
        types::SearchResponse,
        types::SceneResponse,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/search", post(api::search_handler))
        .route("/search/scene", post(api::scene_handler))
        .route("/search/click", post(api::click_handler))
        .route("/search/text", post(api::text_handler))
        .route("/scenes", get(api::scenes_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：10M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 10))
        .with_state(state)
}
