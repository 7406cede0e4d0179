//! Content-Security-Policy accumulator.
//!
//! Every inline `<script>`/`<style>` body emitted for a response is recorded
//! here. The policy is then rendered either as a header or, for prerendered
//! documents, as a `<meta http-equiv>` tag.

use std::collections::{BTreeMap, HashSet};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::escape::escape_html_attr;

/// Directive name to source list, e.g. `script-src` -> `["self"]`.
///
/// Keyword sources are written without quotes; they are quoted when the
/// policy is rendered.
pub type CspDirectives = BTreeMap<String, Vec<String>>;

/// How inline content is allow-listed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CspMode {
    /// Hashes when prerendering, nonces otherwise.
    #[default]
    Auto,
    Hash,
    Nonce,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CspConfig {
    pub mode: CspMode,
    pub directives: CspDirectives,
    pub report_only: CspDirectives,
}

impl CspConfig {
    /// A report-only policy is useless without somewhere to send reports.
    pub fn validate(&self) -> Result<()> {
        let has_report_only = self.report_only.values().any(|v| !v.is_empty());
        if has_report_only {
            let reports = |key: &str| self.report_only.get(key).is_some_and(|v| !v.is_empty());
            if !reports("report-to") && !reports("report-uri") {
                return Err(CoreError::ReportOnlyWithoutReporting);
            }
        }
        Ok(())
    }
}

const QUOTED: &[&str] = &[
    "self",
    "unsafe-eval",
    "unsafe-hashes",
    "unsafe-inline",
    "none",
    "strict-dynamic",
    "report-sample",
    "wasm-unsafe-eval",
    "script",
];

/// Directives that browsers ignore when delivered through `<meta>`.
const HEADER_ONLY: &[&str] = &["frame-ancestors", "report-uri", "sandbox"];

fn needs_csp(directive: Option<&Vec<String>>) -> bool {
    directive.is_some_and(|sources| !sources.iter().any(|s| s == "unsafe-inline"))
}

fn is_crypto_source(value: &str) -> bool {
    if value.starts_with("nonce-") {
        return true;
    }
    value.len() > 7
        && value.starts_with("sha")
        && value.as_bytes()[3..6].iter().all(u8::is_ascii_digit)
        && value.as_bytes()[6] == b'-'
}

fn sha256_source(content: &str) -> String {
    format!("sha256-{}", STANDARD.encode(Sha256::digest(content.as_bytes())))
}

/// One rendered policy (the enforcing one or the report-only one).
#[derive(Clone, Debug)]
struct Policy {
    use_hashes: bool,
    directives: CspDirectives,
    script_src_needs_csp: bool,
    script_src_elem_needs_csp: bool,
    style_src_needs_csp: bool,
    style_src_attr_needs_csp: bool,
    style_src_elem_needs_csp: bool,
    script_src: Vec<String>,
    script_src_elem: Vec<String>,
    style_src: Vec<String>,
    style_src_attr: Vec<String>,
    style_src_elem: Vec<String>,
}

impl Policy {
    fn new(use_hashes: bool, directives: &CspDirectives) -> Self {
        let default_src = directives.get("default-src");
        let effective_script_src = directives.get("script-src").or(default_src);
        let effective_style_src = directives.get("style-src").or(default_src);

        Self {
            use_hashes,
            directives: directives.clone(),
            script_src_needs_csp: needs_csp(effective_script_src),
            script_src_elem_needs_csp: needs_csp(directives.get("script-src-elem")),
            style_src_needs_csp: needs_csp(effective_style_src),
            style_src_attr_needs_csp: needs_csp(directives.get("style-src-attr")),
            style_src_elem_needs_csp: needs_csp(directives.get("style-src-elem")),
            script_src: Vec::new(),
            script_src_elem: Vec::new(),
            style_src: Vec::new(),
            style_src_attr: Vec::new(),
            style_src_elem: Vec::new(),
        }
    }

    fn script_needs_csp(&self) -> bool {
        self.script_src_needs_csp || self.script_src_elem_needs_csp
    }

    fn style_needs_csp(&self, dev: bool) -> bool {
        // The dev server injects its own styles, so styles are left alone there.
        !dev
            && (self.style_src_needs_csp
                || self.style_src_attr_needs_csp
                || self.style_src_elem_needs_csp)
    }

    fn source_for(&self, content: &str, nonce: &str) -> String {
        if self.use_hashes {
            sha256_source(content)
        } else {
            format!("nonce-{nonce}")
        }
    }

    fn add_script(&mut self, content: &str, nonce: &str) {
        if !self.script_needs_csp() {
            return;
        }
        let source = self.source_for(content, nonce);
        if self.script_src_needs_csp {
            push_unique(&mut self.script_src, &source);
        }
        if self.script_src_elem_needs_csp {
            push_unique(&mut self.script_src_elem, &source);
        }
    }

    fn add_style(&mut self, content: &str, nonce: &str, dev: bool) {
        if !self.style_needs_csp(dev) {
            return;
        }
        let source = self.source_for(content, nonce);
        if self.style_src_needs_csp {
            push_unique(&mut self.style_src, &source);
        }
        if self.style_src_attr_needs_csp {
            push_unique(&mut self.style_src_attr, &source);
        }
        if self.style_src_elem_needs_csp {
            push_unique(&mut self.style_src_elem, &source);
        }
    }

    fn render(&self, is_meta: bool) -> String {
        let mut directives = self.directives.clone();
        let default_src = self.directives.get("default-src").cloned().unwrap_or_default();

        let mut extend = |key: &str, extra: &[String], fallback: bool| {
            if extra.is_empty() {
                return;
            }
            let mut sources = match directives.get(key) {
                Some(existing) => existing.clone(),
                None if fallback => default_src.clone(),
                None => Vec::new(),
            };
            sources.extend(extra.iter().cloned());
            directives.insert(key.to_string(), sources);
        };
        extend("style-src", &self.style_src, true);
        extend("style-src-attr", &self.style_src_attr, false);
        extend("style-src-elem", &self.style_src_elem, false);
        extend("script-src", &self.script_src, true);
        extend("script-src-elem", &self.script_src_elem, false);

        directives
            .iter()
            .filter(|(key, _)| !(is_meta && HEADER_ONLY.contains(&key.as_str())))
            .map(|(key, sources)| {
                let mut parts = vec![key.clone()];
                for source in sources {
                    if QUOTED.contains(&source.as_str()) || is_crypto_source(source) {
                        parts.push(format!("'{source}'"));
                    } else {
                        parts.push(source.clone());
                    }
                }
                parts.join(" ")
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn push_unique(list: &mut Vec<String>, source: &str) {
    if !list.iter().any(|s| s == source) {
        list.push(source.to_string());
    }
}

/// Per-response CSP state. Never reuse across responses: the nonce must be
/// unguessable per request.
#[derive(Clone, Debug)]
pub struct Csp {
    nonce: String,
    dev: bool,
    policy: Policy,
    report_only: Policy,
    recorded_scripts: HashSet<String>,
    recorded_styles: HashSet<String>,
}

impl Csp {
    /// Build the accumulator for one response.
    ///
    /// `nonce` must be a fresh random value; the shell generates it.
    pub fn new(config: &CspConfig, nonce: String, prerendering: bool, dev: bool) -> Result<Self> {
        config.validate()?;
        let use_hashes =
            config.mode == CspMode::Hash || (config.mode == CspMode::Auto && prerendering);

        Ok(Self {
            nonce,
            dev,
            policy: Policy::new(use_hashes, &config.directives),
            report_only: Policy::new(use_hashes, &config.report_only),
            recorded_scripts: HashSet::new(),
            recorded_styles: HashSet::new(),
        })
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn script_needs_nonce(&self) -> bool {
        let needs = |p: &Policy| p.script_needs_csp() && !p.use_hashes;
        needs(&self.policy) || needs(&self.report_only)
    }

    pub fn style_needs_nonce(&self) -> bool {
        let needs = |p: &Policy| p.style_needs_csp(self.dev) && !p.use_hashes;
        needs(&self.policy) || needs(&self.report_only)
    }

    /// Scripts are authorized by hash, so scripts emitted after the policy
    /// was sent cannot be covered.
    pub fn script_uses_hashes(&self) -> bool {
        let hashes = |p: &Policy| p.script_needs_csp() && p.use_hashes;
        hashes(&self.policy) || hashes(&self.report_only)
    }

    /// ` nonce="..."` for an inline script tag, or nothing.
    pub fn script_nonce_attr(&self) -> String {
        if self.script_needs_nonce() {
            format!(" nonce=\"{}\"", self.nonce)
        } else {
            String::new()
        }
    }

    /// ` nonce="..."` for an inline style tag, or nothing.
    pub fn style_nonce_attr(&self) -> String {
        if self.style_needs_nonce() {
            format!(" nonce=\"{}\"", self.nonce)
        } else {
            String::new()
        }
    }

    /// Authorize an inline script body.
    pub fn add_script(&mut self, content: &str) {
        if !self.recorded_scripts.insert(content.to_string()) {
            return;
        }
        self.policy.add_script(content, &self.nonce);
        self.report_only.add_script(content, &self.nonce);
    }

    /// Authorize an inline style body.
    pub fn add_style(&mut self, content: &str) {
        if !self.recorded_styles.insert(content.to_string()) {
            return;
        }
        self.policy.add_style(content, &self.nonce, self.dev);
        self.report_only.add_style(content, &self.nonce, self.dev);
    }

    pub fn is_script_recorded(&self, content: &str) -> bool {
        self.recorded_scripts.contains(content)
    }

    /// Value of the `content-security-policy` header, if any.
    pub fn header(&self) -> Option<String> {
        non_empty(self.policy.render(false))
    }

    /// Value of the `content-security-policy-report-only` header, if any.
    pub fn report_only_header(&self) -> Option<String> {
        non_empty(self.report_only.render(false))
    }

    /// The policy as a `<meta http-equiv>` tag, for prerendered documents.
    pub fn meta_tag(&self) -> Option<String> {
        non_empty(self.policy.render(true)).map(|content| {
            format!(
                "<meta http-equiv=\"content-security-policy\" content=\"{}\">",
                escape_html_attr(&content)
            )
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
