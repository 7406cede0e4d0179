//! Per-request resolve hooks.

use async_trait::async_trait;
use pagewright_core::{assets, PreloadAsset};

use crate::error::Result;

/// Hooks the caller can use to shape the response.
#[async_trait]
pub trait ResolveHooks: Send + Sync {
    /// Whether a file should be preloaded through a `Link` header or tag.
    ///
    /// Defaults to scripts and stylesheets.
    fn preload(&self, asset: PreloadAsset<'_>) -> bool {
        assets::default_preload(asset)
    }

    /// Whether a response header of a fetch made during load reaches the
    /// client. Nothing is forwarded by default.
    fn filter_serialized_response_headers(&self, _name: &str, _value: &str) -> bool {
        false
    }

    /// Rewrite the document. Called once with `done: true`.
    async fn transform_page_chunk(&self, html: String, _done: bool) -> Result<String> {
        Ok(html)
    }
}

/// Hooks with every default.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHooks;

impl ResolveHooks for DefaultHooks {}

#[cfg(test)]
mod tests {
    use pagewright_core::AssetKind;

    use super::*;

    struct Uppercase;

    #[async_trait]
    impl ResolveHooks for Uppercase {
        async fn transform_page_chunk(&self, html: String, done: bool) -> Result<String> {
            assert!(done);
            Ok(html.to_uppercase())
        }
    }

    #[tokio::test]
    async fn test_default_hooks() {
        let hooks = DefaultHooks;
        assert!(!hooks.filter_serialized_response_headers("etag", "x"));
        assert_eq!(
            hooks.transform_page_chunk("<p>a</p>".into(), true).await.unwrap(),
            "<p>a</p>"
        );
        assert!(hooks.preload(PreloadAsset {
            kind: AssetKind::Js,
            path: "a.js"
        }));
        assert!(!hooks.preload(PreloadAsset {
            kind: AssetKind::Font,
            path: "a.woff2"
        }));
    }

    #[tokio::test]
    async fn test_transform_override() {
        let out = Uppercase
            .transform_page_chunk("<p>a</p>".into(), true)
            .await
            .unwrap();
        assert_eq!(out, "<P>A</P>");
    }
}
