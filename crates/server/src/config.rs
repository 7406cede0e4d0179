use std::env;

use pagewright_core::{CspConfig, CspMode, PathsConfig, RenderOptions};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Development mode: dev global name and advisories (default: false)
    pub dev: bool,
    /// CSP mode for inline scripts and styles (default: auto)
    pub csp_mode: CspMode,
    /// Mount point of the app (default: "")
    pub base: String,
    /// Emit document-relative asset paths (default: true)
    pub relative: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PAGEWRIGHT_DEV` - Any value enables development mode
    /// - `PAGEWRIGHT_CSP_MODE` - `auto`, `hash` or `nonce` (default: auto)
    /// - `PAGEWRIGHT_BASE` - Base path, e.g. `/app` (default: "")
    /// - `PAGEWRIGHT_RELATIVE` - `true` or `false` (default: true)
    pub fn from_env() -> Self {
        Self {
            dev: env::var("PAGEWRIGHT_DEV").is_ok(),
            csp_mode: env::var("PAGEWRIGHT_CSP_MODE")
                .ok()
                .and_then(|v| parse_csp_mode(&v))
                .unwrap_or_default(),
            base: env::var("PAGEWRIGHT_BASE").unwrap_or_default(),
            relative: env::var("PAGEWRIGHT_RELATIVE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
        }
    }

    /// Render options for the demo app.
    ///
    /// Any CSP mode other than `auto` also gets a `script-src 'self'` policy
    /// so the mode is visible in responses.
    pub fn render_options(&self) -> RenderOptions {
        let directives = match self.csp_mode {
            CspMode::Auto => Default::default(),
            CspMode::Hash | CspMode::Nonce => {
                [("script-src".to_string(), vec!["self".to_string()])].into()
            }
        };
        RenderOptions {
            csp: CspConfig {
                mode: self.csp_mode,
                directives,
                report_only: Default::default(),
            },
            paths: PathsConfig {
                base: self.base.clone(),
                relative: self.relative,
                ..Default::default()
            },
            version_hash: "demo".to_string(),
            dev: self.dev,
            ..Default::default()
        }
    }
}

fn parse_csp_mode(value: &str) -> Option<CspMode> {
    match value.to_ascii_lowercase().as_str() {
        "auto" => Some(CspMode::Auto),
        "hash" => Some(CspMode::Hash),
        "nonce" => Some(CspMode::Nonce),
        _ => None,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
