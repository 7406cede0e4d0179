//! Pure document composition.
//!
//! Everything between "the renderer returned" and "the template produced
//! HTML": asset links, inlined fetches, hydration payload, bootstrap
//! scripts, CSP and `Link` headers. The async shell drives rendering and
//! streaming around this.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::assets::{self, AssetPlanner, AssetSets, PreloadAsset, Prefixer};
use crate::bootstrap::{self, BootstrapInput, Entry, Expr, LegacyFiles, ServiceWorkerRegistration};
use crate::config::RenderOptions;
use crate::csp::Csp;
use crate::error::{CoreError, Result};
use crate::escape::{escape_for_inline_script, escape_html_attr};
use crate::fetched::{serialize_fetched, Fetched};
use crate::hash::hash;
use crate::manifest::{ClientRoute, Manifest, NodeManifest};
use crate::paths::PathState;
use crate::routing::{create_route_module, generate_route_object, RouteModule};
use crate::serialize::Serializer;
use crate::template::{DocumentTemplate, TemplateParts};
use crate::value::Value;

/// One layout or page of the matched branch, with its loaded data.
#[derive(Clone, Debug)]
pub struct LoadedNode {
    pub node: Arc<NodeManifest>,
    /// Result of the server `load`, shipped to the client for hydration.
    pub server_data: Option<Value>,
    /// Merged load result passed to the component.
    pub data: Value,
}

/// A settled remote-function result captured during the request.
#[derive(Clone, Debug)]
pub struct RemoteEntry {
    /// Exported id of the remote function. Unexported functions have none
    /// and cannot be called from the client.
    pub id: Option<String>,
    pub key: String,
    pub value: Value,
}

pub fn create_remote_key(id: &str, key: &str) -> String {
    format!("{id}/{key}")
}

/// Prerendering context of a response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Prerender {
    /// Generating the SPA fallback shell.
    pub fallback: bool,
    /// `cache-control` to bake into the document.
    pub cache: Option<String>,
}

/// Output of the component renderer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rendered {
    pub head: String,
    pub html: String,
}

/// Everything known about one page once rendering is done.
#[derive(Clone, Copy, Debug)]
pub struct Page<'a> {
    pub branch: &'a [LoadedNode],
    pub fetched: &'a [Fetched],
    pub pathname: &'a str,
    pub route_id: Option<&'a str>,
    pub params: &'a BTreeMap<String, String>,
    pub status: u16,
    pub error: Option<&'a Value>,
    /// Data returned by a form action.
    pub form: Option<&'a Value>,
    pub ssr: bool,
    pub csr: bool,
    pub prerender: Option<&'a Prerender>,
    /// Remote results ready at flush time. `None` when the request made no
    /// remote calls.
    pub remote: Option<&'a [RemoteEntry]>,
    /// Number of values delivered after the document.
    pub deferred: u32,
}

/// Caller-owned predicates.
#[derive(Clone, Copy)]
pub struct Filters<'a> {
    pub preload: &'a dyn Fn(PreloadAsset<'_>) -> bool,
    /// Which response headers of fetched resources reach the client.
    pub serialized_headers: &'a dyn Fn(&str, &str) -> bool,
}

impl Default for Filters<'_> {
    fn default() -> Self {
        Self {
            preload: &assets::default_preload,
            serialized_headers: &crate::fetched::no_headers,
        }
    }
}

/// The composed document and its metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposedPage {
    pub html: String,
    /// Response headers in emission order.
    pub headers: Vec<(&'static str, String)>,
    /// Companion modules to write next to a prerendered page.
    pub dependencies: Vec<RouteModule>,
}

/// Rejects a branch the renderer cannot mount.
pub fn check_branch(branch: &[LoadedNode], route_id: Option<&str>) -> Result<()> {
    if branch.iter().any(|n| n.node.component.is_none()) {
        return Err(CoreError::MissingComponent {
            route_id: route_id.unwrap_or("<unknown>").to_string(),
        });
    }
    Ok(())
}

/// `"<hash>"` of the final document.
pub fn etag(html: &str) -> String {
    format!("\"{}\"", hash(&[html]))
}

/// Server data of the branch as `[{type:"data",data:…}|null, …]`, serialized
/// in one pass so values shared between nodes stay shared.
pub fn serialize_server_data(branch: &[LoadedNode], serializer: &Serializer<'_>) -> Result<String> {
    let nodes = branch
        .iter()
        .map(|n| match &n.server_data {
            Some(data) => Value::object([("type", Value::from("data")), ("data", data.clone())]),
            None => Value::Null,
        })
        .collect();
    serializer.serialize(&Value::array(nodes))
}

/// Serialize form action data; failures name the route that produced it.
pub fn serialize_form(form: &Value, route_id: &str, serializer: &Serializer<'_>) -> Result<String> {
    serializer.serialize(form).map_err(|e| match e {
        CoreError::Unserializable { path, reason } => CoreError::Unserializable {
            path,
            reason: format!("data returned from action inside {route_id} is not serializable: {reason}"),
        },
        other => other,
    })
}

fn params_value(params: &BTreeMap<String, String>) -> Value {
    Value::object(params.iter().map(|(k, v)| (k.clone(), Value::string(v))))
}

fn is_present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !matches!(v, Value::Null | Value::Undefined))
}

/// Assembles documents for one app.
pub struct Composer<'a> {
    pub options: &'a RenderOptions,
    pub manifest: &'a Manifest,
    pub template: &'a dyn DocumentTemplate,
    pub filters: Filters<'a>,
}

impl Composer<'_> {
    fn hydration(
        &self,
        page: &Page<'_>,
        route: Option<&ClientRoute>,
        serializer: &Serializer<'_>,
    ) -> Result<Expr> {
        let node_ids = page
            .branch
            .iter()
            .map(|n| n.node.index.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let form = match is_present(page.form) {
            Some(form) => serialize_form(form, page.route_id.unwrap_or(""), serializer)?,
            None => "null".to_string(),
        };
        let error = match page.error {
            Some(error) => serializer.serialize(error)?,
            None => "null".to_string(),
        };

        let mut fields = vec![
            ("node_ids".to_string(), Expr::raw(format!("[{node_ids}]"))),
            (
                "data".to_string(),
                Expr::raw(serialize_server_data(page.branch, serializer)?),
            ),
            ("form".to_string(), Expr::raw(form)),
            ("error".to_string(), Expr::raw(error)),
        ];
        if page.status != 200 {
            fields.push(("status".to_string(), Expr::raw(page.status.to_string())));
        }

        let mut has_params = false;
        if let Some(route) = route {
            fields.push((
                "params".to_string(),
                Expr::raw(serializer.serialize(&params_value(page.params))?),
            ));
            fields.push((
                "server_route".to_string(),
                Expr::raw(generate_route_object(
                    route,
                    page.pathname,
                    &self.manifest.client,
                    &self.options.paths,
                )),
            ));
            has_params = true;
        }
        if self.options.embedded {
            if !has_params {
                fields.push((
                    "params".to_string(),
                    Expr::raw(serializer.serialize(&params_value(page.params))?),
                ));
            }
            let route = serde_json::json!({ "id": page.route_id });
            fields.push((
                "route".to_string(),
                Expr::raw(escape_for_inline_script(&route.to_string())),
            ));
        }

        Ok(Expr::Object(fields))
    }

    fn remote_data(&self, page: &Page<'_>, serializer: &Serializer<'_>) -> Result<Option<String>> {
        let Some(entries) = page.remote else {
            return Ok(None);
        };
        let remote = Value::object(entries.iter().filter_map(|entry| {
            let id = entry.id.as_deref()?;
            Some((create_remote_key(id, &entry.key), entry.value.clone()))
        }));
        serializer.serialize(&remote).map(Some)
    }

    fn service_worker(&self, prefixer: &Prefixer) -> Option<ServiceWorkerRegistration> {
        if !self.options.service_worker {
            return None;
        }
        let options = match &self.options.service_worker_options {
            Some(options) => {
                let mut options = options.clone();
                if self.options.dev {
                    options.insert("type".to_string(), serde_json::Value::from("module"));
                }
                Some(serde_json::Value::Object(options).to_string())
            }
            None => self.options.dev.then(|| "{\"type\":\"module\"}".to_string()),
        };
        Some(ServiceWorkerRegistration {
            url: prefixer.prefixed("service-worker.js"),
            options,
        })
    }

    /// Compose the document for `page`. `paths` must be the values resolved
    /// for this response, `csp` a fresh accumulator.
    pub fn compose(
        &self,
        page: &Page<'_>,
        paths: &PathState,
        rendered: &Rendered,
        csp: &mut Csp,
    ) -> Result<ComposedPage> {
        let options = self.options;
        let client = &self.manifest.client;
        let global = options.global_name();
        let serializer = Serializer::new(&options.transports).with_deferred(&global, page.deferred);

        let mut sets: AssetSets = if page.ssr {
            assets::collect(client, page.branch.iter().map(|n| n.node.as_ref()))
        } else {
            assets::entry_assets(client)
        };

        let prefixer = Prefixer {
            base: options.paths.base.clone(),
            assets: paths.assets.clone(),
        };
        let mut planner = AssetPlanner::new(&prefixer, self.filters.preload);

        let mut head = String::new();
        let mut body = rendered.html.clone();

        let style = match &client.inline {
            Some(inline) => inline.style.clone().unwrap_or_default(),
            None => sets
                .inline_styles
                .iter()
                .map(|(_, css)| css.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        };
        head.push_str(&planner.inline_style(&style, csp, options.dev));
        head.push_str(&planner.stylesheets(&sets));
        planner.fonts(&sets);

        let prerendering = page.prerender.is_some();

        if page.ssr && page.csr {
            let scripts = page
                .fetched
                .iter()
                .map(|f| serialize_fetched(f, self.filters.serialized_headers, prerendering))
                .collect::<Result<Vec<_>>>()?;
            body.push_str("\n\t\t\t");
            body.push_str(&scripts.join("\n\t\t\t"));
        }

        let mut dependencies = Vec::new();

        if page.csr {
            if let Some(file) = &client.modern_polyfills_file {
                head.push_str(&planner.modern_polyfills(file));
            }

            let route = page.route_id.and_then(|id| client.route(id));

            let load_env_eagerly = client.uses_env_dynamic_public && prerendering;
            if load_env_eagerly {
                sets.modulepreloads.insert(format!("{}/env.js", options.app_dir));
            }
            if client.inline.is_none() {
                head.push_str(&planner.modulepreloads(&sets, options.preload_strategy));
            }

            if prerendering {
                head.push_str(&planner.links.head_tags());
            }

            if client.routes.is_some() && page.prerender.is_some_and(|p| !p.fallback) {
                dependencies.push(create_route_module(
                    route,
                    page.params,
                    page.pathname,
                    client,
                    &options.paths,
                    &serializer,
                )?);
            }

            let public_env = serde_json::to_string(&options.public_env)
                .map(|json| escape_for_inline_script(&json))
                .map_err(|e| CoreError::InvalidConfig(e.to_string()))?;

            let input = BootstrapInput {
                global: global.clone(),
                base_expression: paths.base_expression.clone(),
                assets: (!options.paths.assets.is_empty()).then(|| options.paths.assets.clone()),
                public_env,
                uses_env_dynamic_public: client.uses_env_dynamic_public,
                eager_env_module: load_env_eagerly
                    .then(|| format!("{}/{}/env.js", paths.base, options.app_dir)),
                entry: Entry::from_client(client, &prefixer),
                hydration: if page.ssr {
                    Some(self.hydration(page, route, &serializer)?)
                } else {
                    None
                },
                remote_data: self.remote_data(page, &serializer)?,
                has_deferred: page.deferred > 0,
                has_transports: !options.transports.is_empty(),
                service_worker: self.service_worker(&prefixer),
            };
            let legacy = LegacyFiles {
                polyfills: client
                    .legacy_polyfills_file
                    .as_deref()
                    .map(|file| prefixer.prefixed(file)),
                entries: client.has_legacy(),
            };

            let scripts = bootstrap::generate(&input, &legacy, csp);
            head.push_str(&scripts.head);
            body.push_str(&scripts.body);
        }

        let mut headers = vec![
            ("x-sveltekit-page", "true".to_string()),
            ("content-type", "text/html".to_string()),
        ];

        match page.prerender {
            Some(prerender) => {
                let mut http_equiv = Vec::new();
                if let Some(meta) = csp.meta_tag() {
                    http_equiv.push(meta);
                }
                if let Some(cache) = &prerender.cache {
                    http_equiv.push(format!(
                        "<meta http-equiv=\"cache-control\" content=\"{}\">",
                        escape_html_attr(cache)
                    ));
                }
                if !http_equiv.is_empty() {
                    head = http_equiv.join("\n") + &head;
                }
            }
            None => {
                if let Some(policy) = csp.header() {
                    headers.push(("content-security-policy", policy));
                }
                if let Some(policy) = csp.report_only_header() {
                    headers.push(("content-security-policy-report-only", policy));
                }
                if let Some(link) = planner.links.header_value() {
                    headers.push(("link", link));
                }
            }
        }

        // Rendered head last so the links above are parsed first.
        head.push_str(&rendered.head);

        let html = self.template.render(&TemplateParts {
            head: &head,
            body: &body,
            assets: &paths.assets,
            nonce: csp.nonce(),
            env: &options.public_env,
        });

        Ok(ComposedPage {
            html,
            headers,
            dependencies,
        })
    }
}
