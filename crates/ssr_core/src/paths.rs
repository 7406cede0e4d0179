//! Per-request base/asset path resolution.
//!
//! With relative paths enabled, `base` is written as `..` segments so a
//! saved copy of the document still finds its assets. The client receives
//! `base_expression`, which evaluates to the absolute base at load time.

use std::ops::Deref;

use crate::config::PathsConfig;
use crate::escape::js_string;

/// Assets prefix used by the dev/preview server. Never made relative.
pub const SVELTE_KIT_ASSETS: &str = "/_svelte_kit_assets";

/// The pair of path values code sees while rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathValues {
    pub base: String,
    pub assets: String,
}

/// Resolved paths for one response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathState {
    pub base: String,
    pub assets: String,
    /// JavaScript expression that yields the absolute base in the browser.
    pub base_expression: String,
}

impl PathState {
    pub fn values(&self) -> PathValues {
        PathValues {
            base: self.base.clone(),
            assets: self.assets.clone(),
        }
    }
}

/// Resolve paths for a request to `pathname`.
///
/// `fallback` is set when generating a prerendered SPA fallback shell, which
/// may be served from any depth.
pub fn resolve(pathname: &str, config: &PathsConfig, fallback: bool, hash_routing: bool) -> PathState {
    let mut state = PathState {
        base: config.base.clone(),
        assets: config.assets.clone(),
        base_expression: js_string(&config.base),
    };

    if !config.relative {
        return state;
    }

    if !fallback {
        let below_base = pathname.get(config.base.len()..).unwrap_or("");
        let depth = below_base.split('/').skip(2).count();
        state.base = if depth == 0 {
            ".".to_string()
        } else {
            vec![".."; depth].join("/")
        };
        // Resolve against the document location and drop the trailing slash.
        state.base_expression = format!(
            "new URL({}, location).pathname.slice(0, -1)",
            js_string(&state.base)
        );
        let assets_follow_base = config.assets.is_empty()
            || (config.assets.starts_with('/') && config.assets != SVELTE_KIT_ASSETS);
        if assets_follow_base {
            state.assets = state.base.clone();
        }
    } else if hash_routing {
        state.base_expression = "new URL('.', location).pathname.slice(0, -1)".to_string();
    }

    state
}

/// Request-scoped path context.
///
/// Outside of rendering it reports the configured values. While a
/// [`PathOverride`] is alive it reports the override, and dropping the guard
/// restores the configured values, also on early return or error.
#[derive(Debug)]
pub struct RequestPaths {
    configured: PathValues,
    current: PathValues,
}

impl RequestPaths {
    pub fn new(config: &PathsConfig) -> Self {
        let configured = PathValues {
            base: config.base.clone(),
            assets: config.assets.clone(),
        };
        Self {
            current: configured.clone(),
            configured,
        }
    }

    pub fn current(&self) -> &PathValues {
        &self.current
    }

    /// Use `values` until the returned guard is dropped.
    pub fn enter(&mut self, values: PathValues) -> PathOverride<'_> {
        self.current = values;
        PathOverride { paths: self }
    }

    fn reset(&mut self) {
        self.current = self.configured.clone();
    }
}

/// Guard returned by [`RequestPaths::enter`].
#[derive(Debug)]
pub struct PathOverride<'a> {
    paths: &'a mut RequestPaths,
}

impl Deref for PathOverride<'_> {
    type Target = PathValues;

    fn deref(&self) -> &PathValues {
        &self.paths.current
    }
}

impl Drop for PathOverride<'_> {
    fn drop(&mut self) {
        self.paths.reset();
    }
}
