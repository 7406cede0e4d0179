//! The component renderer seam.

use std::collections::BTreeMap;

use async_trait::async_trait;
use pagewright_core::{PathValues, Rendered, Value};
use url::Url;

use crate::error::Result;

/// The `page` store as the components see it.
#[derive(Clone, Debug)]
pub struct PageProps {
    pub url: Url,
    pub route_id: Option<String>,
    pub params: BTreeMap<String, String>,
    pub status: u16,
    pub error: Option<Value>,
    pub form: Option<Value>,
}

/// Props for the root component.
#[derive(Clone, Debug)]
pub struct RenderProps {
    /// Components of the branch, root layout first.
    pub components: Vec<String>,
    /// Merged load data, one entry per component.
    pub data: Vec<Value>,
    pub page: PageProps,
}

/// Request-scoped context visible to the renderer.
#[derive(Clone, Copy, Debug)]
pub struct RenderContext<'a> {
    /// `base`/`assets` as code running during render must see them.
    pub paths: &'a PathValues,
}

/// Renders the root component to HTML.
///
/// Implementations may await nested loads. Any error aborts the response.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, props: &RenderProps, ctx: &RenderContext<'_>) -> Result<Rendered>;
}
