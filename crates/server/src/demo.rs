//! A small blog used to exercise the assembler end to end.
//!
//! Node 0 is the root layout, 1 the error page, 2 the home page and 3 a
//! blog post whose comments arrive after the document.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pagewright::{
    LoadedNode, Manifest, RenderContext, RenderError, RenderInput, RenderProps, Rendered,
    Renderer, RequestEvent, Result, Value,
};
use pagewright_core::escape::escape_html_attr;
use pagewright_core::{ClientManifest, ClientRoute, Compound, NodeManifest, PlaceholderTemplate};

pub const TEMPLATE: &str = r#"<!doctype html>
<html lang="en">
	<head>
		<meta charset="utf-8" />
		<link rel="icon" href="%sveltekit.assets%/favicon.png" />%sveltekit.head%
	</head>
	<body>
		<div style="display: contents">%sveltekit.body%</div>
	</body>
</html>
"#;

const POSTS: &[(&str, &str, &str)] = &[
    ("hello", "Hello world", "The first post."),
    ("streaming", "Streaming", "Comments on this post are streamed in."),
];

/// How long the comment service takes to answer.
pub const COMMENTS_DELAY: Duration = Duration::from_millis(50);

pub fn template() -> Arc<PlaceholderTemplate> {
    Arc::new(PlaceholderTemplate::new(TEMPLATE))
}

pub fn manifest() -> pagewright_core::Result<Manifest> {
    let node_module = |i: usize| Some(format!("_app/immutable/nodes/{i}.js"));
    let client = ClientManifest {
        start: "_app/immutable/entry/start.js".to_string(),
        app: Some("_app/immutable/entry/app.js".to_string()),
        imports: vec![
            "_app/immutable/entry/start.js".to_string(),
            "_app/immutable/entry/app.js".to_string(),
        ],
        stylesheets: vec!["_app/immutable/assets/app.css".to_string()],
        nodes: (0..4).map(node_module).collect(),
        css: vec![Vec::new(); 4],
        routes: Some(vec![ClientRoute {
            id: "/blog/[slug]".to_string(),
            errors: vec![Some(1)],
            layouts: vec![Some((false, 0))],
            leaf: (true, 3),
        }]),
        ..Default::default()
    };
    let node = |index: usize, component: &str| NodeManifest {
        index,
        component: Some(component.to_string()),
        imports: node_module(index).into_iter().collect(),
        ..Default::default()
    };
    Manifest::new(
        client,
        vec![
            node(0, "layout"),
            node(1, "error"),
            node(2, "home"),
            node(3, "post"),
        ],
    )
}

fn loaded(manifest: &Manifest, index: usize, server_data: Option<Value>) -> Option<LoadedNode> {
    let node = manifest.node(index)?;
    let data = server_data.clone().unwrap_or(Value::Null);
    Some(LoadedNode {
        node,
        server_data,
        data,
    })
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => escape_html_attr(s),
        _ => String::new(),
    }
}

/// Home page listing every post.
pub fn home(manifest: &Manifest, event: RequestEvent) -> RenderInput {
    let posts = POSTS
        .iter()
        .map(|(slug, title, _)| {
            Value::object([("slug", Value::from(*slug)), ("title", Value::from(*title))])
        })
        .collect();
    let branch = [
        loaded(manifest, 0, None),
        loaded(
            manifest,
            2,
            Some(Value::object([("posts", Value::array(posts))])),
        ),
    ];
    RenderInput::new(event, branch.into_iter().flatten().collect())
}

/// A blog post. Comments are deferred; unknown slugs get the error page.
pub fn post(manifest: &Manifest, event: RequestEvent, slug: &str) -> RenderInput {
    let event = event.with_route(
        "/blog/[slug]",
        BTreeMap::from([("slug".to_string(), slug.to_string())]),
    );

    let Some((_, title, body)) = POSTS.iter().find(|(s, _, _)| *s == slug) else {
        let branch = [loaded(manifest, 0, None), loaded(manifest, 1, None)];
        let mut input = RenderInput::new(event, branch.into_iter().flatten().collect());
        input.status = 404;
        input.error = Some(Value::object([("message", Value::from("Not found"))]));
        return input;
    };

    let mut input = RenderInput::new(event, Vec::new());
    let comments = input.deferred.defer(async {
        tokio::time::sleep(COMMENTS_DELAY).await;
        Ok(Value::array(vec![Value::object([
            ("author", Value::from("ada")),
            ("text", Value::from("Nice post!")),
        ])]))
    });
    let data = Value::object([
        ("title", Value::from(*title)),
        ("body", Value::from(*body)),
        ("comments", comments),
    ]);
    input.branch = [loaded(manifest, 0, None), loaded(manifest, 3, Some(data))]
        .into_iter()
        .flatten()
        .collect();
    input
}

fn field_text(value: &Value, key: &str) -> String {
    value.field(key).map(|v| text(&v)).unwrap_or_default()
}

fn items(value: Option<Value>) -> Vec<Value> {
    match value.as_ref().and_then(Value::as_node).map(|n| n.snapshot()) {
        Some(Compound::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Renders the demo components to static markup.
pub struct DemoRenderer;

#[async_trait]
impl Renderer for DemoRenderer {
    async fn render(&self, props: &RenderProps, ctx: &RenderContext<'_>) -> Result<Rendered> {
        let base = &ctx.paths.base;
        let data = props.data.last().cloned().unwrap_or(Value::Null);

        let (title, content) = match props.components.last().map(String::as_str) {
            Some("home") => {
                let links: String = items(data.field("posts"))
                    .iter()
                    .map(|post| {
                        format!(
                            "<li><a href=\"{base}/blog/{}\">{}</a></li>",
                            field_text(post, "slug"),
                            field_text(post, "title")
                        )
                    })
                    .collect();
                ("Blog".to_string(), format!("<ul>{links}</ul>"))
            }
            Some("post") => {
                let title = field_text(&data, "title");
                let body = field_text(&data, "body");
                let content = format!(
                    "<article><h1>{title}</h1><p>{body}</p><p>Loading comments...</p></article>"
                );
                (title, content)
            }
            Some("error") => {
                let message = props
                    .page
                    .error
                    .as_ref()
                    .map(|e| field_text(e, "message"))
                    .unwrap_or_default();
                let content = format!("<h1>{}</h1><p>{message}</p>", props.page.status);
                (message, content)
            }
            other => {
                return Err(RenderError::Renderer(format!(
                    "unknown component {other:?}"
                )))
            }
        };

        Ok(Rendered {
            head: format!("\n\t\t<title>{title}</title>"),
            html: format!("<!--[--><nav><a href=\"{base}/\">Home</a></nav>{content}<!--]-->"),
        })
    }
}
