//! Response assembly - Imperative Shell.
//!
//! This crate orchestrates rendering and delivery using pure functions from
//! `pagewright_core`. It calls the component renderer, composes the
//! document and returns it either buffered or as a stream that delivers
//! deferred data after the document.
//!
//! # Architecture
//!
//! - **Functional Core** (`pagewright_core`): Serialization, CSP, paths, assets, bootstrap, composition
//! - **Imperative Shell** (this crate): Async rendering, deferred data delivery, HTTP responses
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pagewright::{DefaultHooks, RenderInput, RequestEvent, ResponseComposer};
//! use pagewright_core::{Manifest, PlaceholderTemplate, RenderOptions};
//!
//! // Create the composer once (validates options)
//! let composer = ResponseComposer::new(
//!     RenderOptions::from_json(&options_json)?,
//!     Manifest::from_json(&manifest_json)?,
//!     Arc::new(PlaceholderTemplate::new(&template)),
//!     Arc::new(MyRenderer),
//! )?;
//!
//! // Per request
//! let mut input = RenderInput::new(RequestEvent::new(url), branch);
//! let comments = input.deferred.defer(load_comments());
//! let page = composer.render_response(input, &DefaultHooks).await?;
//! ```

mod composer;
mod deferred;
mod error;
mod hooks;
mod input;
mod nonce;
mod renderer;
mod response;

// Re-export core types for convenience
pub use pagewright_core::{
    CoreError, LoadedNode, Manifest, Prerender, RenderOptions, Rendered, RouteModule, Value,
};

// Export shell types
pub use composer::ResponseComposer;
pub use deferred::{DeferredMap, Settlement};
pub use error::{sanitize_error, RenderError, Result};
pub use hooks::{DefaultHooks, ResolveHooks};
pub use input::{
    ActionResult, PageConfig, PrerenderState, RemoteCall, RenderInput, RequestEvent, Streaming,
};
pub use nonce::generate_nonce;
pub use renderer::{PageProps, RenderContext, RenderProps, Renderer};
pub use response::{ChunkStream, PageBody, PageResponse};
