//! Asset dependency collection and link planning.
//!
//! [`collect`] gathers module preloads, stylesheets and fonts for a branch.
//! [`AssetPlanner`] turns them into head markup plus `Link` header entries
//! (live responses) or `<link>` tags (prerendered documents).

use std::collections::HashSet;

use crate::config::PreloadStrategy;
use crate::csp::Csp;
use crate::escape::{encode_uri, js_string};
use crate::manifest::{ClientManifest, NodeManifest};

/// A deduplicated list that keeps first-insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UniqueList {
    items: Vec<String>,
    seen: HashSet<String>,
}

impl UniqueList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the value was already present.
    pub fn insert(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if !self.seen.insert(value.clone()) {
            return false;
        }
        self.items.push(value);
        true
    }

    pub fn contains(&self, value: &str) -> bool {
        self.seen.contains(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for UniqueList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = Self::new();
        for value in iter {
            list.insert(value);
        }
        list
    }
}

/// Everything the rendered branch depends on.
#[derive(Clone, Debug, Default)]
pub struct AssetSets {
    pub modulepreloads: UniqueList,
    pub stylesheets: UniqueList,
    pub fonts: UniqueList,
    /// Stylesheet path to inlined CSS, in discovery order.
    pub inline_styles: Vec<(String, String)>,
}

impl AssetSets {
    pub fn is_inlined(&self, stylesheet: &str) -> bool {
        self.inline_styles.iter().any(|(path, _)| path == stylesheet)
    }
}

/// Shared entry assets only, used when server rendering is off.
pub fn entry_assets(client: &ClientManifest) -> AssetSets {
    AssetSets {
        modulepreloads: client.imports.iter().cloned().collect(),
        stylesheets: client.stylesheets.iter().cloned().collect(),
        fonts: client.fonts.iter().cloned().collect(),
        inline_styles: Vec::new(),
    }
}

/// Union the shared entry assets with those of every node in the branch.
pub fn collect<'a>(
    client: &ClientManifest,
    branch: impl IntoIterator<Item = &'a NodeManifest>,
) -> AssetSets {
    let mut sets = entry_assets(client);
    for node in branch {
        for url in &node.imports {
            sets.modulepreloads.insert(url.as_str());
        }
        for url in &node.stylesheets {
            sets.stylesheets.insert(url.as_str());
        }
        for url in &node.fonts {
            sets.fonts.insert(url.as_str());
        }
        // With an inlined client bundle the styles ship inside it.
        if client.inline.is_some() {
            continue;
        }
        if let Some(styles) = &node.inline_styles {
            for (path, css) in styles {
                match sets.inline_styles.iter_mut().find(|(p, _)| p == path) {
                    Some(entry) => entry.1 = css.clone(),
                    None => sets.inline_styles.push((path.clone(), css.clone())),
                }
            }
        }
    }
    sets
}

/// Kind of asset offered to the preload predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetKind {
    Js,
    Css,
    Font,
    Asset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PreloadAsset<'a> {
    pub kind: AssetKind,
    pub path: &'a str,
}

/// Preload scripts and stylesheets, nothing else.
pub fn default_preload(asset: PreloadAsset<'_>) -> bool {
    matches!(asset.kind, AssetKind::Js | AssetKind::Css)
}

/// Turns build-relative asset paths into URLs for the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prefixer {
    /// Configured base, used for paths the bundler already made absolute.
    pub base: String,
    /// Resolved assets prefix for this response.
    pub assets: String,
}

impl Prefixer {
    pub fn prefixed(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base, path)
        } else {
            format!("{}/{}", self.assets, path)
        }
    }
}

/// Preload hints destined for the `Link` header or for `<link>` tags.
#[derive(Clone, Debug, Default)]
pub struct LinkCollections {
    /// Entries of the `Link` header. Only sent outside prerendering.
    pub headers: UniqueList,
    /// Literal `<link>` elements. Only emitted while prerendering.
    pub tags: UniqueList,
}

impl LinkCollections {
    pub fn header_value(&self) -> Option<String> {
        if self.headers.is_empty() {
            None
        } else {
            Some(self.headers.iter().collect::<Vec<_>>().join(", "))
        }
    }

    pub fn head_tags(&self) -> String {
        self.tags.iter().map(|tag| format!("\n\t\t{tag}")).collect()
    }
}

/// Plans the head markup and preload hints for one response.
pub struct AssetPlanner<'a> {
    prefixer: &'a Prefixer,
    preload: &'a dyn Fn(PreloadAsset<'_>) -> bool,
    pub links: LinkCollections,
}

impl<'a> AssetPlanner<'a> {
    pub fn new(prefixer: &'a Prefixer, preload: &'a dyn Fn(PreloadAsset<'_>) -> bool) -> Self {
        Self {
            prefixer,
            preload,
            links: LinkCollections::default(),
        }
    }

    /// The inline `<style>` block, recorded with the CSP.
    pub fn inline_style(&self, style: &str, csp: &mut Csp, dev: bool) -> String {
        if style.is_empty() {
            return String::new();
        }
        let marker = if dev { " data-sveltekit" } else { "" };
        let nonce = csp.style_nonce_attr();
        csp.add_style(style);
        format!("\n\t<style{marker}{nonce}>{style}</style>")
    }

    /// `<link rel="stylesheet">` for every stylesheet. Inlined ones are
    /// linked disabled so tooling still sees them.
    pub fn stylesheets(&mut self, sets: &AssetSets) -> String {
        let mut head = String::new();
        for dep in sets.stylesheets.iter() {
            let path = self.prefixer.prefixed(dep);
            let mut attributes = vec!["rel=\"stylesheet\""];
            if sets.is_inlined(dep) {
                attributes.push("disabled");
                attributes.push("media=\"(max-width: 0)\"");
            } else if (self.preload)(PreloadAsset {
                kind: AssetKind::Css,
                path: &path,
            }) {
                self.links.headers.insert(format!(
                    "<{}>; rel=\"preload\"; as=\"style\"; nopush",
                    encode_uri(&path)
                ));
            }
            head.push_str(&format!("\n\t\t<link href=\"{path}\" {}>", attributes.join(" ")));
        }
        head
    }

    pub fn fonts(&mut self, sets: &AssetSets) {
        for dep in sets.fonts.iter() {
            let path = self.prefixer.prefixed(dep);
            if !(self.preload)(PreloadAsset {
                kind: AssetKind::Font,
                path: &path,
            }) {
                continue;
            }
            let ext = dep.rsplit_once('.').map_or(dep, |(_, ext)| ext);
            self.links.tags.insert(format!(
                "<link rel=\"preload\" as=\"font\" type=\"font/{ext}\" href=\"{path}\" crossorigin>"
            ));
            self.links.headers.insert(format!(
                "<{}>; rel=\"preload\"; as=\"font\"; type=\"font/{ext}\"; crossorigin; nopush",
                encode_uri(&path)
            ));
        }
    }

    /// Module script for the modern polyfills bundle.
    pub fn modern_polyfills(&mut self, file: &str) -> String {
        let path = self.prefixer.prefixed(file);
        self.links.headers.insert(format!(
            "<{}>; rel=\"modulepreload\"; crossorigin=\"anonymous\"; nopush",
            encode_uri(&path)
        ));
        format!(
            "\n\t\t<script type=\"module\" crossorigin=\"anonymous\" src={}></script>",
            js_string(&path)
        )
    }

    /// Module preloads, as header entries plus either head links or
    /// `<link rel="modulepreload">` tags depending on the strategy.
    pub fn modulepreloads(&mut self, sets: &AssetSets, strategy: PreloadStrategy) -> String {
        let mut head = String::new();
        for dep in sets.modulepreloads.iter() {
            let path = self.prefixer.prefixed(dep);
            if !(self.preload)(PreloadAsset {
                kind: AssetKind::Js,
                path: &path,
            }) {
                continue;
            }
            self.links
                .headers
                .insert(format!("<{}>; rel=\"modulepreload\"; nopush", encode_uri(&path)));
            if strategy == PreloadStrategy::Modulepreload {
                self.links
                    .tags
                    .insert(format!("<link rel=\"modulepreload\" href=\"{path}\">"));
            } else {
                head.push_str(&format!(
                    "\n\t\t<link rel=\"preload\" as=\"script\" crossorigin=\"anonymous\" href=\"{path}\">"
                ));
            }
        }
        head
    }
}
