//! Render options with validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::csp::CspConfig;
use crate::error::{CoreError, Result};
use crate::serialize::Transports;

/// Base and asset path configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Mount point of the app, e.g. `/app`. Empty for the site root.
    pub base: String,
    /// Absolute or CDN prefix for build assets. Empty to serve them from `base`.
    pub assets: String,
    /// Emit paths relative to the requested document.
    pub relative: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base: String::new(),
            assets: String::new(),
            relative: true,
        }
    }
}

impl PathsConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.base.is_empty() && (!self.base.starts_with('/') || self.base.ends_with('/')) {
            return Err(CoreError::InvalidConfig(format!(
                "paths.base must be empty or start but not end with '/' (got {:?})",
                self.base
            )));
        }
        if !self.assets.is_empty() {
            let absolute = self.assets.starts_with("http://")
                || self.assets.starts_with("https://")
                || self.assets.starts_with('/');
            if !absolute || self.assets.ends_with('/') {
                return Err(CoreError::InvalidConfig(format!(
                    "paths.assets must be an absolute path or URL without a trailing slash (got {:?})",
                    self.assets
                )));
            }
        }
        Ok(())
    }
}

/// How module preloads are announced in the document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreloadStrategy {
    #[default]
    Modulepreload,
    PreloadJs,
    PreloadMjs,
}

/// Options shared by every response the assembler produces.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub csp: CspConfig,
    pub paths: PathsConfig,
    /// Directory of the client build under `base`, e.g. `_app`.
    pub app_dir: String,
    pub hash_routing: bool,
    /// The app is embedded in a larger page and must not own the document.
    pub embedded: bool,
    pub service_worker: bool,
    pub service_worker_options: Option<serde_json::Map<String, serde_json::Value>>,
    pub preload_strategy: PreloadStrategy,
    /// Build version, used to namespace the client global.
    pub version_hash: String,
    /// Public environment variables exposed to the client.
    pub public_env: BTreeMap<String, String>,
    pub dev: bool,
    #[serde(skip)]
    pub transports: Transports,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            csp: CspConfig::default(),
            paths: PathsConfig::default(),
            app_dir: "_app".to_string(),
            hash_routing: false,
            embedded: false,
            service_worker: false,
            service_worker_options: None,
            preload_strategy: PreloadStrategy::default(),
            version_hash: "0".to_string(),
            public_env: BTreeMap::new(),
            dev: false,
            transports: Transports::new(),
        }
    }
}

impl RenderOptions {
    /// Parse options from JSON and validate them.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self =
            serde_json::from_str(json).map_err(|e| CoreError::InvalidConfig(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        self.paths.validate()?;
        self.csp.validate()?;
        if self.app_dir.is_empty() || self.app_dir.starts_with('/') || self.app_dir.ends_with('/') {
            return Err(CoreError::InvalidConfig(format!(
                "app_dir must be a non-empty relative directory (got {:?})",
                self.app_dir
            )));
        }
        if self.version_hash.is_empty() {
            return Err(CoreError::InvalidConfig(
                "version_hash must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Reject combinations that cannot produce a static document.
    pub fn check_prerender(&self, prerendering: bool, template_contains_nonce: bool) -> Result<()> {
        if !prerendering {
            return Ok(());
        }
        if self.csp.mode == crate::csp::CspMode::Nonce {
            return Err(CoreError::NonceWithPrerender);
        }
        if template_contains_nonce {
            return Err(CoreError::NoncePlaceholderWithPrerender);
        }
        Ok(())
    }

    /// Name of the client-side global the bootstrap program populates.
    pub fn global_name(&self) -> String {
        if self.dev {
            "__sveltekit_dev".to_string()
        } else {
            format!("__sveltekit_{}", self.version_hash)
        }
    }
}
