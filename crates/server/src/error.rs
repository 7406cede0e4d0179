use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pagewright::{sanitize_error, CoreError, RenderError};

pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let Some(render_error) = self.0.downcast_ref::<RenderError>() else {
            tracing::error!(error = %self.0, "Request failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response();
        };

        tracing::error!(error = %render_error, "Page assembly failed");
        let status_code = match render_error {
            RenderError::Core(CoreError::MissingComponent { .. }) => StatusCode::NOT_FOUND,
            RenderError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status_code, sanitize_error(render_error)).into_response()
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
