//! Build manifest: the client asset graph shared by all responses.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Client code and styles inlined into the document (`inline` bundle strategy).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineBundle {
    pub script: String,
    #[serde(default)]
    pub style: Option<String>,
}

/// Client-side routing data for one route, shipped when routing is resolved
/// on the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRoute {
    pub id: String,
    #[serde(default)]
    pub errors: Vec<Option<usize>>,
    /// `[has_server_load, node]` per layout level.
    #[serde(default)]
    pub layouts: Vec<Option<(bool, usize)>>,
    pub leaf: (bool, usize),
}

impl ClientRoute {
    /// Node indices the route needs, error pages first, leaf last.
    pub fn node_indices(&self) -> Vec<usize> {
        self.errors
            .iter()
            .copied()
            .chain(self.layouts.iter().map(|l| l.map(|(_, n)| n)))
            .chain(std::iter::once(Some(self.leaf.1)))
            .flatten()
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientManifest {
    /// Client runtime entry.
    pub start: String,
    /// App entry. Absent with the `single` bundle strategy.
    pub app: Option<String>,
    pub imports: Vec<String>,
    pub stylesheets: Vec<String>,
    pub fonts: Vec<String>,
    pub inline: Option<InlineBundle>,
    pub legacy_start: Option<String>,
    pub legacy_app: Option<String>,
    pub legacy_polyfills_file: Option<String>,
    pub modern_polyfills_file: Option<String>,
    pub uses_env_dynamic_public: bool,
    pub routes: Option<Vec<ClientRoute>>,
    /// Client module per node index.
    pub nodes: Vec<Option<String>>,
    /// Stylesheets per node index.
    pub css: Vec<Vec<String>>,
}

impl ClientManifest {
    pub fn has_legacy(&self) -> bool {
        self.legacy_start.is_some() && self.legacy_app.is_some()
    }

    pub fn route(&self, id: &str) -> Option<&ClientRoute> {
        self.routes.as_ref()?.iter().find(|r| r.id == id)
    }
}

/// Server-side view of one layout/page node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeManifest {
    pub index: usize,
    /// Component the renderer mounts. Layouts always have one; a page may not.
    pub component: Option<String>,
    pub imports: Vec<String>,
    pub stylesheets: Vec<String>,
    pub fonts: Vec<String>,
    /// Stylesheet path to CSS text, for styles small enough to inline.
    pub inline_styles: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
struct ManifestFile {
    client: ClientManifest,
    #[serde(default)]
    nodes: Vec<NodeManifest>,
}

/// Process-lifetime, read-only manifest.
#[derive(Clone, Debug, Default)]
pub struct Manifest {
    pub client: ClientManifest,
    nodes: Vec<Arc<NodeManifest>>,
}

impl Manifest {
    pub fn new(client: ClientManifest, nodes: Vec<NodeManifest>) -> Result<Self> {
        for (position, node) in nodes.iter().enumerate() {
            if node.index != position {
                return Err(CoreError::Manifest(format!(
                    "node at position {position} declares index {}",
                    node.index
                )));
            }
        }
        if client.inline.is_none() && client.start.is_empty() {
            return Err(CoreError::Manifest(
                "client.start is required unless the client is inlined".to_string(),
            ));
        }
        if client.legacy_start.is_some() != client.legacy_app.is_some() {
            return Err(CoreError::Manifest(
                "client.legacy_start and client.legacy_app must be set together".to_string(),
            ));
        }
        Ok(Self {
            client,
            nodes: nodes.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: ManifestFile =
            serde_json::from_str(json).map_err(|e| CoreError::Manifest(e.to_string()))?;
        Self::new(file.client, file.nodes)
    }

    pub fn node(&self, index: usize) -> Option<Arc<NodeManifest>> {
        self.nodes.get(index).cloned()
    }

    pub fn nodes(&self) -> &[Arc<NodeManifest>] {
        &self.nodes
    }
}
