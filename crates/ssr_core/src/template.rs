//! Document templates.

use std::collections::BTreeMap;

/// Values substituted into the document template.
#[derive(Clone, Copy, Debug)]
pub struct TemplateParts<'a> {
    pub head: &'a str,
    pub body: &'a str,
    pub assets: &'a str,
    pub nonce: &'a str,
    pub env: &'a BTreeMap<String, String>,
}

/// Produces the final HTML document around the assembled head and body.
pub trait DocumentTemplate: Send + Sync {
    fn render(&self, parts: &TemplateParts<'_>) -> String;

    /// Whether the template embeds the CSP nonce, which rules out
    /// prerendering.
    fn contains_nonce(&self) -> bool;
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Text(String),
    Head,
    Body,
    Assets,
    Nonce,
    Env(String),
}

/// Template with `%sveltekit.head%`, `%sveltekit.body%`,
/// `%sveltekit.assets%`, `%sveltekit.nonce%` and `%sveltekit.env.NAME%`
/// placeholders. Unknown placeholders are kept as text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaceholderTemplate {
    segments: Vec<Segment>,
}

const OPEN: &str = "%sveltekit.";

impl PlaceholderTemplate {
    pub fn new(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = source;

        while let Some(start) = rest.find(OPEN) {
            text.push_str(&rest[..start]);
            let after = &rest[start + OPEN.len()..];
            let Some(end) = after.find('%') else {
                rest = &rest[start..];
                break;
            };
            let name = &after[..end];
            let segment = match name {
                "head" => Some(Segment::Head),
                "body" => Some(Segment::Body),
                "assets" => Some(Segment::Assets),
                "nonce" => Some(Segment::Nonce),
                _ => name
                    .strip_prefix("env.")
                    .filter(|key| !key.is_empty())
                    .map(|key| Segment::Env(key.to_string())),
            };
            match segment {
                Some(segment) => {
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(segment);
                    rest = &after[end + 1..];
                }
                None => {
                    // Not a placeholder; keep the leading `%` and rescan.
                    text.push('%');
                    rest = &rest[start + 1..];
                }
            }
        }
        text.push_str(rest);
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Self { segments }
    }
}

impl DocumentTemplate for PlaceholderTemplate {
    fn render(&self, parts: &TemplateParts<'_>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Head => out.push_str(parts.head),
                Segment::Body => out.push_str(parts.body),
                Segment::Assets => out.push_str(parts.assets),
                Segment::Nonce => out.push_str(parts.nonce),
                Segment::Env(key) => {
                    if let Some(value) = parts.env.get(key) {
                        out.push_str(value);
                    }
                }
            }
        }
        out
    }

    fn contains_nonce(&self) -> bool {
        self.segments.contains(&Segment::Nonce)
    }
}
