//! Response assembly errors including rendering and I/O.

use pagewright_core::CoreError;
use thiserror::Error;

/// Errors raised by [`crate::ResponseComposer`].
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Renderer failed: {0}")]
    Renderer(String),

    #[error("Page chunk transform failed: {0}")]
    Transform(String),

    #[error("Response cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// Sanitize error messages for client-facing responses.
///
/// Hides internal details while providing useful feedback.
pub fn sanitize_error(error: &RenderError) -> String {
    match error {
        // Safe to expose
        RenderError::Cancelled => "Request cancelled".to_string(),
        RenderError::Core(CoreError::MissingComponent { route_id }) => {
            format!("Missing page component for {route_id}")
        }
        // Hide internal details
        RenderError::Core(_) => "Internal configuration error".to_string(),
        RenderError::Renderer(_) => "Render failed".to_string(),
        RenderError::Transform(_) => "Page transform failed".to_string(),
    }
}
