//! Pure response assembly - no I/O, no async, no side effects.
//!
//! This crate provides:
//! - A value model and serializer producing script-safe JavaScript literals
//! - The Content-Security-Policy accumulator
//! - Per-request path resolution (relative or absolute base/assets)
//! - Asset collection and preload planning
//! - Bootstrap program generation for modern and legacy browsers
//! - Document composition, fetched-response inlining and route modules
//!
//! # Example
//!
//! ```
//! use pagewright_core::{paths, serialize, PathsConfig, Transports, Value};
//!
//! // Serialize hydration data
//! let data = Value::object([("title", Value::from("Hello </script>"))]);
//! let js = serialize(&data, &Transports::new()).unwrap();
//! assert_eq!(js, r#"{title:"Hello \u003C/script>"}"#);
//!
//! // Resolve paths for a nested page
//! let state = paths::resolve("/blog/2024/post", &PathsConfig::default(), false, false);
//! assert_eq!(state.base, "../..");
//! assert_eq!(state.assets, "../..");
//! ```

pub mod assets;
pub mod bootstrap;
pub mod compose;
mod config;
pub mod csp;
mod error;
pub mod escape;
pub mod fetched;
mod hash;
pub mod manifest;
pub mod paths;
#[cfg(test)]
mod revive;
pub mod routing;
mod serialize;
pub mod template;
mod value;

pub use assets::{AssetKind, PreloadAsset};
pub use compose::{
    check_branch, etag, ComposedPage, Composer, Filters, LoadedNode, Page, Prerender, RemoteEntry,
    Rendered,
};
pub use config::{PathsConfig, PreloadStrategy, RenderOptions};
pub use csp::{Csp, CspConfig, CspMode};
pub use error::{CoreError, Result};
pub use fetched::{Fetched, FetchedResponse};
pub use hash::hash;
pub use manifest::{ClientManifest, ClientRoute, Manifest, NodeManifest};
pub use paths::{PathState, PathValues, RequestPaths};
pub use routing::RouteModule;
pub use serialize::{js_number, serialize, Serializer, Transport, Transports};
pub use template::{DocumentTemplate, PlaceholderTemplate, TemplateParts};
pub use value::{Compound, Node, TypedArrayKind, Value};
