//! Page handlers.

use axum::{
    extract::{Path, State},
    http::Uri,
};
use pagewright::{DefaultHooks, PageResponse, RequestEvent};
use url::Url;

use crate::{demo, error::AppError, state::AppState};

fn request_event(uri: &Uri) -> Result<RequestEvent, AppError> {
    let url = Url::parse("http://localhost")?.join(&uri.to_string())?;
    Ok(RequestEvent::new(url))
}

/// Handler for the home page (GET /).
pub async fn home_page(State(state): State<AppState>, uri: Uri) -> Result<PageResponse, AppError> {
    let input = demo::home(state.composer.manifest(), request_event(&uri)?);
    Ok(state.composer.render_response(input, &DefaultHooks).await?)
}

/// Handler for a blog post (GET /blog/{slug}).
///
/// Comments stream in after the document.
pub async fn blog_post(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    uri: Uri,
) -> Result<PageResponse, AppError> {
    let input = demo::post(state.composer.manifest(), request_event(&uri)?, &slug);
    Ok(state.composer.render_response(input, &DefaultHooks).await?)
}
