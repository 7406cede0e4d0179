//! Server-resolved client routing.
//!
//! When route matching happens on the server, the client asks for
//! `<pathname>/__route.js` and receives a module describing the matched
//! route and importing its nodes. The same route object is embedded in the
//! hydration data of the initial document.

use std::collections::BTreeMap;

use crate::config::PathsConfig;
use crate::error::Result;
use crate::escape::js_string;
use crate::manifest::{ClientManifest, ClientRoute};
use crate::serialize::Serializer;
use crate::value::Value;

pub const ROUTE_MODULE_SUFFIX: &str = "/__route.js";

pub const ROUTE_MODULE_CONTENT_TYPE: &str = "application/javascript; charset=utf-8";

/// A generated route module, ready to be served or written next to a
/// prerendered page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteModule {
    pub path: String,
    pub content_type: &'static str,
    pub body: String,
}

/// Path of the route module for `pathname`.
pub fn add_resolution_suffix(pathname: &str) -> String {
    format!(
        "{}{ROUTE_MODULE_SUFFIX}",
        pathname.strip_suffix('/').unwrap_or(pathname)
    )
}

/// Relative URL from the document at `from` to `to`.
fn relative_path(from: &str, to: &str) -> String {
    let mut from: Vec<&str> = from.split('/').collect();
    let to: Vec<&str> = to.split('/').collect();
    from.pop();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let ups = from.len() - common;

    let mut parts = vec![".."; ups];
    parts.extend(&to[common..]);
    parts.join("/")
}

fn client_import(import_path: Option<&str>, pathname: &str, paths: &PathsConfig) -> String {
    let Some(path) = import_path else {
        return "Promise.resolve({})".to_string();
    };
    if path.starts_with('/') {
        return format!("import({})", js_string(path));
    }
    if !paths.assets.is_empty() {
        return format!("import({})", js_string(&format!("{}/{path}", paths.assets)));
    }
    if !paths.relative {
        return format!("import({})", js_string(&format!("{}/{path}", paths.base)));
    }
    let mut relative = relative_path(pathname, &format!("{}/{path}", paths.base));
    if !relative.starts_with('.') {
        relative = format!("./{relative}");
    }
    format!("import({})", js_string(&relative))
}

fn css_import(route: &ClientRoute, pathname: &str, client: &ClientManifest, paths: &PathsConfig) -> String {
    let prefix = if paths.assets.is_empty() {
        &paths.base
    } else {
        &paths.assets
    };
    let css: Vec<String> = route
        .node_indices()
        .into_iter()
        .flat_map(|n| client.css.get(n).into_iter().flatten())
        .map(|file| js_string(&format!("{prefix}/{file}")))
        .collect();
    if css.is_empty() {
        return String::new();
    }
    format!(
        "{}.then(x => x.load_css([{}]));",
        client_import(Some(&client.start), pathname, paths),
        css.join(",")
    )
}

fn json_list<T>(items: &[T], item: impl Fn(&T) -> String) -> String {
    format!("[{}]", items.iter().map(item).collect::<Vec<_>>().join(","))
}

/// JavaScript object describing `route` for the client router. Node imports
/// are written relative to `pathname` when paths are relative.
pub fn generate_route_object(
    route: &ClientRoute,
    pathname: &str,
    client: &ClientManifest,
    paths: &PathsConfig,
) -> String {
    let errors = json_list(&route.errors, |e| match e {
        Some(n) => n.to_string(),
        None => "undefined".to_string(),
    });
    let layouts = json_list(&route.layouts, |l| match l {
        Some((server, n)) => format!("[{server},{n}]"),
        None => "undefined".to_string(),
    });
    let leaf = format!("[{},{}]", route.leaf.0, route.leaf.1);

    let mut seen = Vec::new();
    let nodes = route
        .node_indices()
        .into_iter()
        .filter(|n| {
            let fresh = !seen.contains(n);
            seen.push(*n);
            fresh
        })
        .collect::<Vec<_>>();
    let nodes = nodes
        .iter()
        .map(|n| {
            let module = client.nodes.get(*n).and_then(Option::as_deref);
            format!("\t\t'{n}': () => {}", client_import(module, pathname, paths))
        })
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        "{{\n\tid: {},\n\terrors: {errors},\n\tlayouts: {layouts},\n\tleaf: {leaf},\n\tnodes: {{\n{nodes}\n\t}}\n}}",
        js_string(&route.id)
    )
}

/// The route module served at `add_resolution_suffix(pathname)`.
///
/// An unmatched route yields a module exporting `null` so the client falls
/// back to a full navigation.
pub fn create_route_module(
    route: Option<&ClientRoute>,
    params: &BTreeMap<String, String>,
    pathname: &str,
    client: &ClientManifest,
    paths: &PathsConfig,
    serializer: &Serializer<'_>,
) -> Result<RouteModule> {
    let path = add_resolution_suffix(pathname);
    let body = match route {
        Some(route) => {
            let params = Value::object(params.iter().map(|(k, v)| (k.clone(), Value::string(v))));
            format!(
                "{}\nexport const route = {}; export const params = {};",
                css_import(route, &path, client, paths),
                generate_route_object(route, &path, client, paths),
                serializer.serialize(&params)?
            )
        }
        None => "export const route = null; export const params = null;".to_string(),
    };
    Ok(RouteModule {
        path,
        content_type: ROUTE_MODULE_CONTENT_TYPE,
        body,
    })
}
