//! Assembled page responses.

use std::convert::Infallible;
use std::pin::Pin;

use axum::body::Body;
use axum::http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::Stream;

/// Chunks of a streamed document.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, Infallible>> + Send>>;

pub enum PageBody {
    /// The whole document.
    Full(String),
    /// The document first, then one script per deferred value.
    Stream(ChunkStream),
}

impl PageBody {
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl std::fmt::Debug for PageBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full(html) => f.debug_tuple("Full").field(&html.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// A page ready to be sent.
#[derive(Debug)]
pub struct PageResponse {
    pub status: u16,
    /// Headers in emission order.
    pub headers: Vec<(&'static str, String)>,
    pub body: PageBody,
}

impl PageResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl IntoResponse for PageResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.append(HeaderName::from_static(name), value);
                }
                Err(e) => tracing::warn!(header = name, error = %e, "Dropping invalid header value"),
            }
        }

        let body = match self.body {
            PageBody::Full(html) => Body::from(html),
            PageBody::Stream(stream) => Body::from_stream(stream),
        };

        (status, headers, body).into_response()
    }
}
