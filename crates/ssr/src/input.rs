//! Everything a single response is assembled from.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use pagewright_core::{Fetched, LoadedNode, Prerender, RouteModule, Value};
use url::Url;

use crate::deferred::{DeferredMap, Settlement};

/// The request being answered.
#[derive(Clone, Debug)]
pub struct RequestEvent {
    pub url: Url,
    /// Matched route, `None` when nothing matched.
    pub route_id: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl RequestEvent {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            route_id: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_route(
        mut self,
        route_id: impl Into<String>,
        params: BTreeMap<String, String>,
    ) -> Self {
        self.route_id = Some(route_id.into());
        self.params = params;
        self
    }
}

/// Page options resolved from the branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageConfig {
    pub ssr: bool,
    pub csr: bool,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self { ssr: true, csr: true }
    }
}

/// Outcome of a form action that ran before rendering.
#[derive(Clone, Debug)]
pub enum ActionResult {
    Success { status: u16, data: Option<Value> },
    Failure { status: u16, data: Value },
    Redirect { status: u16, location: String },
    Error { error: Value },
}

impl ActionResult {
    /// The value exposed to the page as `form`.
    pub fn form_data(&self) -> Option<&Value> {
        match self {
            Self::Success { data, .. } => data.as_ref(),
            Self::Failure { data, .. } => Some(data),
            Self::Redirect { .. } | Self::Error { .. } => None,
        }
    }
}

/// Shared state of a prerender run.
///
/// Companion modules generated for each page accumulate here for the build
/// to write out.
#[derive(Debug, Default)]
pub struct PrerenderState {
    pub prerender: Prerender,
    dependencies: Mutex<BTreeMap<String, RouteModule>>,
}

impl PrerenderState {
    pub fn new(prerender: Prerender) -> Self {
        Self {
            prerender,
            dependencies: Mutex::default(),
        }
    }

    pub(crate) fn record(&self, modules: Vec<RouteModule>) {
        let mut deps = self
            .dependencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for module in modules {
            deps.insert(module.path.clone(), module);
        }
    }

    /// Generated modules, keyed by path.
    pub fn dependencies(&self) -> BTreeMap<String, RouteModule> {
        self.dependencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// A remote function call made while loading.
pub struct RemoteCall {
    /// `None` for functions that are not exported to the client.
    pub id: Option<String>,
    /// Argument cache key.
    pub key: String,
    pub result: BoxFuture<'static, Settlement>,
}

impl RemoteCall {
    pub fn new<F>(id: Option<&str>, key: impl Into<String>, result: F) -> Self
    where
        F: std::future::Future<Output = Settlement> + Send + 'static,
    {
        Self {
            id: id.map(str::to_string),
            key: key.into(),
            result: result.boxed(),
        }
    }
}

impl std::fmt::Debug for RemoteCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCall")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// When the body is streamed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Streaming {
    /// Only when deferred data exists.
    #[default]
    Auto,
    /// Always, even with nothing deferred.
    Always,
}

/// Input for one call to [`crate::ResponseComposer::render_response`].
#[derive(Debug)]
pub struct RenderInput {
    /// Loaded layouts and page, root first. Empty when `ssr` is off.
    pub branch: Vec<LoadedNode>,
    /// Fetches made during load, inlined for the client.
    pub fetched: Vec<Fetched>,
    pub event: RequestEvent,
    pub page_config: PageConfig,
    pub status: u16,
    pub error: Option<Value>,
    pub action_result: Option<ActionResult>,
    pub prerendering: Option<Arc<PrerenderState>>,
    /// `None` when the request made no remote calls.
    pub remote: Option<Vec<RemoteCall>>,
    /// Promises referenced from the branch data.
    pub deferred: DeferredMap,
    pub streaming: Streaming,
}

impl RenderInput {
    pub fn new(event: RequestEvent, branch: Vec<LoadedNode>) -> Self {
        Self {
            branch,
            fetched: Vec::new(),
            event,
            page_config: PageConfig::default(),
            status: 200,
            error: None,
            action_result: None,
            prerendering: None,
            remote: None,
            deferred: DeferredMap::new(),
            streaming: Streaming::Auto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(path: &str) -> RouteModule {
        RouteModule {
            path: path.to_string(),
            content_type: "application/javascript",
            body: String::new(),
        }
    }

    #[test]
    fn test_form_data() {
        let ok = ActionResult::Success {
            status: 200,
            data: Some(Value::from("saved")),
        };
        assert_eq!(ok.form_data(), Some(&Value::from("saved")));

        let failed = ActionResult::Failure {
            status: 400,
            data: Value::from("missing"),
        };
        assert_eq!(failed.form_data(), Some(&Value::from("missing")));

        let redirect = ActionResult::Redirect {
            status: 303,
            location: "/".into(),
        };
        assert!(redirect.form_data().is_none());
    }

    #[test]
    fn test_prerender_dependencies_dedup_by_path() {
        let state = PrerenderState::new(Prerender::default());
        state.record(vec![module("/a/__route.js"), module("/b/__route.js")]);
        state.record(vec![module("/a/__route.js")]);

        let deps = state.dependencies();
        assert_eq!(deps.len(), 2);
        assert!(deps.contains_key("/b/__route.js"));
    }

    #[test]
    fn test_defaults() {
        let url = Url::parse("http://localhost/").unwrap();
        let input = RenderInput::new(RequestEvent::new(url), Vec::new());
        assert_eq!(input.status, 200);
        assert_eq!(input.page_config, PageConfig { ssr: true, csr: true });
        assert_eq!(input.streaming, Streaming::Auto);
    }
}
