use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::Error;

/// API错误类型
pub struct AppError(pub anyhow::Error);

pub type Result<T, E = AppError> = std::result::Result<T, E>;

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<Error>() {
            Some(Error::NotFound(_) | Error::EmptyIndex(_)) => StatusCode::NOT_FOUND,
            Some(Error::DimensionMismatch { .. } | Error::InvalidBox(_) | Error::Parse(_)) => {
                StatusCode::BAD_REQUEST
            }
            Some(Error::Image { .. }) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("请求处理失败: {:#}", self.0);
        }
        (status, format!("Something went wrong: {}", self.0)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status() {
        let err = AppError::from(Error::NotFound("room.jpg".to_string()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let err = AppError::from(Error::DimensionMismatch { expected: 2048, actual: 4096 });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let err = AppError::from(anyhow::anyhow!("boom"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
