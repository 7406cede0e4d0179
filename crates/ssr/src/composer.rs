//! Async response composer.
//!
//! Drives one response through its stages:
//!
//! `PathsResolved -> Rendered -> AssetsCollected -> CspFinalized -> Composed -> (Buffered | Streamed)`
//!
//! Validation errors surface before anything is rendered. A renderer error
//! propagates after the request path override has been reset. With deferred
//! data the document is sent first and each value follows as an inline
//! script the moment it settles.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use pagewright_core::bootstrap::{resolution_chunk, Dialect, Settled};
use pagewright_core::{
    check_branch, etag, paths, ComposedPage, Composer, Csp, DocumentTemplate, Filters, Manifest,
    Page, PreloadAsset, RemoteEntry, RenderOptions, Rendered, RequestPaths, Serializer, Value,
};

use crate::deferred::{self, DeferredMap, Delivery, Settlement};
use crate::error::{RenderError, Result};
use crate::hooks::ResolveHooks;
use crate::input::{ActionResult, RemoteCall, RenderInput, Streaming};
use crate::nonce::generate_nonce;
use crate::renderer::{PageProps, RenderContext, RenderProps, Renderer};
use crate::response::{ChunkStream, PageBody, PageResponse};

/// Sent in place of a settled value that could not be serialized.
const UNSERIALIZABLE_REJECTION: &str = "{message:\"Failed to serialize deferred value\"}";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    PathsResolved,
    Rendered,
    AssetsCollected,
    CspFinalized,
    Composed,
    Buffered,
    Streamed,
}

/// Assembles page responses for one app.
///
/// Cheap to clone; everything it holds is shared and read-only.
#[derive(Clone)]
pub struct ResponseComposer {
    options: Arc<RenderOptions>,
    manifest: Arc<Manifest>,
    template: Arc<dyn DocumentTemplate>,
    renderer: Arc<dyn Renderer>,
}

impl ResponseComposer {
    /// Create a composer. Fails on invalid options.
    pub fn new(
        options: RenderOptions,
        manifest: Manifest,
        template: Arc<dyn DocumentTemplate>,
        renderer: Arc<dyn Renderer>,
    ) -> Result<Self> {
        options.validate()?;

        tracing::info!(
            global = %options.global_name(),
            csp_mode = ?options.csp.mode,
            relative_paths = options.paths.relative,
            legacy = manifest.client.has_legacy(),
            "Response composer initialized"
        );

        Ok(Self {
            options: Arc::new(options),
            manifest: Arc::new(manifest),
            template,
            renderer,
        })
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Render and assemble the response for `input`.
    pub async fn render_response(
        &self,
        input: RenderInput,
        hooks: &dyn ResolveHooks,
    ) -> Result<PageResponse> {
        let RenderInput {
            branch,
            fetched,
            event,
            page_config,
            status,
            error,
            action_result,
            prerendering,
            remote,
            mut deferred,
            streaming,
        } = input;
        let options = self.options.as_ref();
        let prerender = prerendering.as_deref().map(|state| &state.prerender);

        options.check_prerender(prerender.is_some(), self.template.contains_nonce())?;
        if page_config.ssr {
            check_branch(&branch, event.route_id.as_deref())?;
        }

        let fallback = prerender.is_some_and(|p| p.fallback);
        let path_state = paths::resolve(
            event.url.path(),
            &options.paths,
            fallback,
            options.hash_routing,
        );
        tracing::debug!(
            stage = ?Stage::PathsResolved,
            path = event.url.path(),
            base = %path_state.base,
            assets = %path_state.assets,
            "Paths resolved"
        );

        let form = action_result.as_ref().and_then(ActionResult::form_data);

        let rendered = if page_config.ssr {
            let props = RenderProps {
                components: branch
                    .iter()
                    .filter_map(|n| n.node.component.clone())
                    .collect(),
                data: branch.iter().map(|n| n.data.clone()).collect(),
                page: PageProps {
                    url: event.url.clone(),
                    route_id: event.route_id.clone(),
                    params: event.params.clone(),
                    status,
                    error: error.clone(),
                    form: form.cloned(),
                },
            };

            let mut request_paths = RequestPaths::new(&options.paths);
            let result = {
                let paths = request_paths.enter(path_state.values());
                let ctx = RenderContext { paths: &paths };
                self.renderer.render(&props, &ctx).await
            };
            result.inspect_err(|e| tracing::debug!(error = %e, "Renderer failed"))?
        } else {
            Rendered::default()
        };
        tracing::debug!(stage = ?Stage::Rendered, html_len = rendered.html.len(), "Page rendered");

        let remote = remote.map(|calls| split_remote(calls, &mut deferred));

        let csr = page_config.csr;
        if options.dev && !csr && !deferred.is_empty() {
            tracing::warn!(
                route = event.route_id.as_deref().unwrap_or(""),
                "Promises returned from load are never delivered when client-side rendering is disabled"
            );
        }
        let has_deferred = csr && !deferred.is_empty();
        let deferred_count = if has_deferred { deferred.len() as u32 } else { 0 };

        let mut csp = Csp::new(
            &options.csp,
            generate_nonce(),
            prerender.is_some(),
            options.dev,
        )?;

        let ComposedPage {
            html,
            mut headers,
            dependencies,
        } = {
            let preload = |asset: PreloadAsset<'_>| hooks.preload(asset);
            let serialized_headers =
                |name: &str, value: &str| hooks.filter_serialized_response_headers(name, value);
            let composer = Composer {
                options,
                manifest: &self.manifest,
                template: self.template.as_ref(),
                filters: Filters {
                    preload: &preload,
                    serialized_headers: &serialized_headers,
                },
            };
            let page = Page {
                branch: &branch,
                fetched: &fetched,
                pathname: event.url.path(),
                route_id: event.route_id.as_deref(),
                params: &event.params,
                status,
                error: error.as_ref(),
                form,
                ssr: page_config.ssr,
                csr,
                prerender,
                remote: remote.as_deref(),
                deferred: deferred_count,
            };
            composer.compose(&page, &path_state, &rendered, &mut csp)?
        };
        tracing::debug!(
            stage = ?Stage::AssetsCollected,
            link_header = headers.iter().any(|(name, _)| *name == "link"),
            "Assets collected"
        );
        tracing::debug!(
            stage = ?Stage::CspFinalized,
            mode = ?options.csp.mode,
            nonce = csp.script_needs_nonce() || csp.style_needs_nonce(),
            hashes = csp.script_uses_hashes(),
            "Content security policy finalized"
        );
        tracing::debug!(
            stage = ?Stage::Composed,
            headers = headers.len(),
            dependencies = dependencies.len(),
            "Document composed"
        );

        if let Some(state) = &prerendering {
            state.record(dependencies);
        }

        let markers = html.matches("<!--").count();
        let html = hooks
            .transform_page_chunk(html, true)
            .await
            .map_err(|e| match e {
                RenderError::Transform(_) | RenderError::Cancelled => e,
                other => RenderError::Transform(other.to_string()),
            })?;
        if options.dev && csr && html.matches("<!--").count() < markers {
            tracing::warn!(
                "Removing comments in transform_page_chunk can break hydration, keep the markers the renderer emits"
            );
        }

        if !has_deferred && streaming == Streaming::Auto {
            headers.push(("etag", etag(&html)));
            tracing::debug!(stage = ?Stage::Buffered, bytes = html.len(), "Sending buffered response");
            return Ok(PageResponse {
                status,
                headers,
                body: PageBody::Full(html),
            });
        }

        let pending = if has_deferred {
            deferred.into_pending()
        } else {
            Vec::new()
        };
        if !pending.is_empty() && csp.script_uses_hashes() {
            tracing::warn!(
                deferred = pending.len(),
                "Streamed data scripts cannot be allowed by a hash-based content security policy"
            );
        }
        tracing::debug!(stage = ?Stage::Streamed, deferred = pending.len(), "Streaming response");

        let writer = ResolutionWriter {
            options: Arc::clone(&self.options),
            global: options.global_name(),
            deferred: deferred_count,
            uses_app: !options.transports.is_empty(),
            dialect: if self.manifest.client.has_legacy() {
                Dialect::Legacy
            } else {
                Dialect::Modern
            },
            nonce_attr: csp.script_nonce_attr(),
        };

        Ok(PageResponse {
            status,
            headers,
            body: PageBody::Stream(stream_document(html, pending, writer)),
        })
    }
}

/// Split remote calls into entries inlined with the document.
///
/// Settled calls are inlined as-is. Pending or failed calls are registered
/// with `deferred` and inlined as promises. Calls without an id are
/// unreachable from the client and dropped.
fn split_remote(calls: Vec<RemoteCall>, deferred: &mut DeferredMap) -> Vec<RemoteEntry> {
    calls
        .into_iter()
        .filter_map(|mut call| {
            let id = call.id.take()?;
            let settled = (&mut call.result).now_or_never();
            let value = match settled {
                Some(Ok(value)) => value,
                Some(Err(error)) => {
                    let rejected: BoxFuture<'static, Settlement> =
                        future::ready(Err(error)).boxed();
                    Value::Deferred(deferred.adopt(rejected))
                }
                None => Value::Deferred(deferred.adopt(call.result)),
            };
            Some(RemoteEntry {
                id: Some(id),
                key: call.key,
                value,
            })
        })
        .collect()
}

/// Turns settled values into resolution scripts.
struct ResolutionWriter {
    options: Arc<RenderOptions>,
    global: String,
    deferred: u32,
    uses_app: bool,
    dialect: Dialect,
    nonce_attr: String,
}

impl ResolutionWriter {
    fn chunk(&self, delivery: &Delivery) -> String {
        let serializer = Serializer::new(&self.options.transports).with_deferred(&self.global, self.deferred);
        let settled = match &delivery.settlement {
            Ok(value) => serializer.serialize(value).map(Settled::Fulfilled),
            Err(error) => serializer.serialize(error).map(Settled::Rejected),
        };
        let settled = settled.unwrap_or_else(|e| {
            tracing::error!(id = delivery.id, error = %e, "Failed to serialize deferred value");
            Settled::Rejected(UNSERIALIZABLE_REJECTION.to_string())
        });
        resolution_chunk(
            &self.global,
            delivery.id,
            &settled,
            self.uses_app,
            self.dialect,
            &self.nonce_attr,
        )
    }
}

/// The document, then one script per deferred value as it settles.
fn stream_document(
    html: String,
    pending: Vec<(u32, BoxFuture<'static, Settlement>)>,
    writer: ResolutionWriter,
) -> ChunkStream {
    let (channel, mut receiver) = deferred::open();
    if pending.is_empty() {
        drop(channel);
    } else {
        tokio::spawn(deferred::drive(pending, channel));
    }

    Box::pin(async_stream::stream! {
        yield Ok::<_, Infallible>(Bytes::from(html));
        while let Some(delivery) = receiver.recv().await {
            tracing::debug!(
                id = delivery.id,
                rejected = delivery.settlement.is_err(),
                "Deferred value settled"
            );
            yield Ok(Bytes::from(writer.chunk(&delivery)));
        }
    })
}
