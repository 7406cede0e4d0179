//! Client bootstrap generation.
//!
//! Emits the inline scripts that start the client runtime and registers
//! every one of them with the CSP accumulator. With a legacy build present
//! the output forks at runtime on a module-support check: modern browsers
//! take the native `import()` path, others load the nomodule polyfills and
//! SystemJS bundles.

pub mod plan;
pub mod program;

pub use plan::{
    legacy_plan, modern_plan, BootstrapInput, Entry, ServiceWorkerRegistration, LEGACY_INIT_ID,
    MODERN_IMPORT_FUNC,
};
pub use program::{
    render, AppSource, Dialect, Expr, Instruction, ModuleRef, Program, DEFERRED_RETRY_LIMIT_MS,
    MODERN_BROWSER_FLAG,
};

use crate::csp::Csp;
use crate::escape::js_string;

/// Global holding the legacy startup function.
pub const STARTUP_SCRIPT: &str = "__KIT_startup_script";

/// Safari 10.1 runs `nomodule` scripts even though it supports modules.
/// Emitted verbatim, once, before the first `nomodule` script.
pub const SAFARI_NOMODULE_FIX: &str = r#"!function(){var e=document,t=e.createElement("script");if(!("noModule"in t)&&"onbeforeload"in t){var n=!1;e.addEventListener("beforeload",(function(e){if(e.target===t)n=!0;else if(!e.target.hasAttribute("nomodule")||!n)return;e.preventDefault()}),!0),t.type="module",t.src=".",e.head.appendChild(t),t.remove()}}();"#;

/// Module script that only runs, and only sets the flag, in browsers with
/// `import.meta` and dynamic `import()`.
pub const DETECT_MODERN_BROWSER: &str = r#"try{import.meta.url;import("_").catch(()=>1);}catch(e){}window.__KIT_is_modern_browser=true;window.__KIT_modern_import_func=(path)=>import(path);"#;

const LEGACY_WARNING: &str = "kit: loading legacy build because dynamic import or import.meta.url is unsupported, syntax error above should be ignored";

/// Legacy build files, already prefixed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LegacyFiles {
    pub polyfills: Option<String>,
    /// Whether legacy start/app entries exist.
    pub entries: bool,
}

/// Generated scripts: `head` goes at the end of the document head, `body`
/// after the rendered markup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootstrapScripts {
    pub head: String,
    pub body: String,
}

struct ScriptSink<'c> {
    body: String,
    csp: &'c mut Csp,
    nomodule_fix_emitted: bool,
}

impl ScriptSink<'_> {
    fn classic(&mut self, script: &str, attrs: Option<&str>) {
        self.body.push_str("\n\t\t\t<script");
        if let Some(attrs) = attrs {
            self.body.push(' ');
            self.body.push_str(attrs);
        }
        if !script.is_empty() {
            self.body.push_str(&self.csp.script_nonce_attr());
        }
        self.body.push('>');
        self.body.push_str(script);
        self.body.push_str("</script>");
        if !script.is_empty() {
            self.csp.add_script(script);
        }
    }

    fn module(&mut self, script: &str) {
        self.body.push_str(&format!(
            "\n\t\t\t<script type=\"module\"{}>{script}</script>",
            self.csp.script_nonce_attr()
        ));
        self.csp.add_script(script);
    }

    fn nomodule_fix(&mut self) {
        if self.nomodule_fix_emitted {
            return;
        }
        self.nomodule_fix_emitted = true;
        self.classic(SAFARI_NOMODULE_FIX, Some("nomodule"));
    }

    fn nomodule(&mut self, script: &str, attrs: Option<&str>) {
        self.nomodule_fix();
        let attrs = match attrs {
            Some(attrs) => format!("nomodule {attrs}"),
            None => "nomodule".to_string(),
        };
        self.classic(script, Some(&attrs));
    }
}

fn startup_fallback(polyfills: Option<&str>) -> String {
    let start = || Instruction::Call {
        callee: format!("window.{STARTUP_SCRIPT}"),
        args: Vec::new(),
    };
    let mut otherwise = vec![Instruction::Call {
        callee: "console.warn".to_string(),
        args: vec![Expr::raw(js_string(LEGACY_WARNING))],
    }];
    match polyfills {
        Some(path) => {
            otherwise.push(Instruction::Declare {
                name: "n".to_string(),
                value: Expr::raw("document.createElement(\"script\")"),
            });
            otherwise.push(Instruction::Assign {
                target: "n.src".to_string(),
                value: Expr::raw(js_string(path)),
            });
            otherwise.push(Instruction::Assign {
                target: "n.onload".to_string(),
                value: Expr::raw(format!("window.{STARTUP_SCRIPT}")),
            });
            otherwise.push(Instruction::Raw("document.body.appendChild(n);".to_string()));
        }
        None => otherwise.push(start()),
    }
    let program = Program(vec![Instruction::Conditional {
        test: format!("window.{MODERN_BROWSER_FLAG}"),
        then: vec![start()],
        otherwise,
    }]);
    format!(
        "!function () {{\n{}\n}}();",
        render(&program, Dialect::Legacy, 1)
    )
}

/// Generate the bootstrap scripts and record each with `csp`.
pub fn generate(input: &BootstrapInput, legacy: &LegacyFiles, csp: &mut Csp) -> BootstrapScripts {
    let mut head = String::new();
    let mut sink = ScriptSink {
        body: String::new(),
        csp,
        nomodule_fix_emitted: false,
    };

    if let Some(polyfills) = &legacy.polyfills {
        sink.nomodule("", Some(&format!("src={}", js_string(polyfills))));
    }

    if legacy.entries {
        head.push_str(&format!(
            "\n\t\t<script type=\"module\"{}>{DETECT_MODERN_BROWSER}</script>",
            sink.csp.script_nonce_attr()
        ));
        sink.csp.add_script(DETECT_MODERN_BROWSER);

        sink.nomodule_fix();

        let code = render(&legacy_plan(input), Dialect::Legacy, 5);
        let init = format!(
            "\n\t\t\t\twindow.{STARTUP_SCRIPT} = function () {{\n{code}\n\t\t\t\t}};\n\t\t\t"
        );
        sink.classic(&init, Some(&format!("id={}", js_string(LEGACY_INIT_ID))));

        sink.nomodule(&format!("window.{STARTUP_SCRIPT}();"), None);

        sink.module(&startup_fallback(legacy.polyfills.as_deref()));
    } else {
        let code = render(&modern_plan(input), Dialect::Modern, 5);
        let init = format!("\n\t\t\t\t{{\n{code}\n\t\t\t\t}}\n\t\t\t");
        sink.classic(&init, None);
    }

    sink.body.push_str("\n\t\t");
    BootstrapScripts {
        head,
        body: sink.body,
    }
}

/// How one deferred item settled, as serialized JavaScript.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settled {
    Fulfilled(String),
    Rejected(String),
}

/// Inline script that settles deferred item `id` on the client.
pub fn resolution_chunk(
    global: &str,
    id: u32,
    settled: &Settled,
    uses_app: bool,
    dialect: Dialect,
    nonce_attr: &str,
) -> String {
    let pair = match settled {
        Settled::Fulfilled(data) => format!("[{data}, void 0]"),
        Settled::Rejected(error) => format!("[void 0, {error}]"),
    };
    let param = if uses_app { "app" } else { "" };
    let callback = match dialect {
        Dialect::Modern => format!("({param}) => {pair}"),
        Dialect::Legacy => format!("function ({param}) {{ return {pair}; }}"),
    };
    format!("<script{nonce_attr}>{global}.resolve({id}, {callback})</script>")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::csp::{CspConfig, CspMode};

    fn hash_csp() -> Csp {
        let config = CspConfig {
            mode: CspMode::Hash,
            directives: BTreeMap::from([("script-src".to_string(), vec!["self".to_string()])]),
            report_only: BTreeMap::new(),
        };
        Csp::new(&config, "nonce".into(), false, false).unwrap()
    }

    fn nonce_csp() -> Csp {
        let config = CspConfig {
            mode: CspMode::Nonce,
            directives: BTreeMap::from([("script-src".to_string(), vec!["self".to_string()])]),
            report_only: BTreeMap::new(),
        };
        Csp::new(&config, "r4nd0m".into(), false, false).unwrap()
    }

    fn input(legacy: bool) -> BootstrapInput {
        let module = |path: &str, legacy_path: &str| {
            ModuleRef::with_legacy(path, legacy.then(|| legacy_path.to_string()))
        };
        BootstrapInput {
            global: "__sveltekit_v1".into(),
            base_expression: "\"\"".into(),
            assets: None,
            public_env: "{}".into(),
            uses_env_dynamic_public: false,
            eager_env_module: None,
            entry: Entry::Split {
                start: module("/_app/start.js", "/_app/start-legacy.js"),
                app: module("/_app/app.js", "/_app/app-legacy.js"),
            },
            hydration: None,
            remote_data: None,
            has_deferred: false,
            has_transports: false,
            service_worker: None,
        }
    }

    /// Inline script bodies, in document order.
    fn inline_scripts(html: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut rest = html;
        while let Some(open) = rest.find("<script") {
            rest = &rest[open..];
            let Some(gt) = rest.find('>') else { break };
            let Some(close) = rest.find("</script>") else {
                break;
            };
            let body = &rest[gt + 1..close];
            if !body.is_empty() {
                out.push(body.to_string());
            }
            rest = &rest[close + "</script>".len()..];
        }
        out
    }

    #[test]
    fn test_modern_only_single_script() {
        let mut csp = hash_csp();
        let scripts = generate(&input(false), &LegacyFiles::default(), &mut csp);
        assert!(scripts.head.is_empty());
        assert_eq!(scripts.body.matches("<script").count(), 1);
        assert!(!scripts.body.contains("nomodule"));
        assert!(scripts.body.ends_with("</script>\n\t\t"));
        for script in inline_scripts(&scripts.body) {
            assert!(csp.is_script_recorded(&script));
        }
    }

    #[test]
    fn test_legacy_order_and_single_fix() {
        let mut csp = hash_csp();
        let legacy = LegacyFiles {
            polyfills: Some("/_app/polyfills-legacy.js".into()),
            entries: true,
        };
        let scripts = generate(&input(true), &legacy, &mut csp);
        let doc = format!("{}{}", scripts.head, scripts.body);

        assert_eq!(doc.matches(DETECT_MODERN_BROWSER).count(), 1);
        assert_eq!(doc.matches(SAFARI_NOMODULE_FIX).count(), 1);

        let detect_at = doc.find(DETECT_MODERN_BROWSER).unwrap();
        let first_nomodule = doc.find("nomodule").unwrap();
        assert!(detect_at < first_nomodule);
        // The fix is the first nomodule script itself.
        assert!(doc[first_nomodule..].starts_with(&format!("nomodule>{SAFARI_NOMODULE_FIX}")));

        assert!(scripts
            .body
            .contains("<script nomodule src=\"/_app/polyfills-legacy.js\"></script>"));
        assert!(scripts.body.contains("<script id=\"__KIT_legacy_init_id\">"));
        assert!(scripts.body.contains("window.__KIT_startup_script = function () {"));
        assert!(scripts
            .body
            .contains("<script nomodule>window.__KIT_startup_script();</script>"));
        assert!(scripts.body.contains("n.src = \"/_app/polyfills-legacy.js\";"));

        for script in inline_scripts(&doc) {
            assert!(csp.is_script_recorded(&script), "unrecorded: {script}");
        }
    }

    #[test]
    fn test_fix_precedes_polyfills() {
        let mut csp = hash_csp();
        let legacy = LegacyFiles {
            polyfills: Some("/p.js".into()),
            entries: false,
        };
        let scripts = generate(&input(false), &legacy, &mut csp);
        let fix_at = scripts.body.find(SAFARI_NOMODULE_FIX).unwrap();
        let src_at = scripts.body.find("src=\"/p.js\"").unwrap();
        assert!(fix_at < src_at);
    }

    #[test]
    fn test_nonce_on_every_inline_script() {
        let mut csp = nonce_csp();
        let legacy = LegacyFiles {
            polyfills: Some("/p.js".into()),
            entries: true,
        };
        let scripts = generate(&input(true), &legacy, &mut csp);
        let doc = format!("{}{}", scripts.head, scripts.body);
        let tags = doc.matches("<script").count();
        // The external polyfill script carries no nonce.
        assert_eq!(doc.matches(" nonce=\"r4nd0m\"").count(), tags - 1);
        assert_eq!(csp.header().as_deref(), Some("script-src 'self' 'nonce-r4nd0m'"));
    }

    #[test]
    fn test_resolution_chunks() {
        let ok = resolution_chunk(
            "__sveltekit_v1",
            3,
            &Settled::Fulfilled("{a:1}".into()),
            false,
            Dialect::Modern,
            "",
        );
        assert_eq!(
            ok,
            "<script>__sveltekit_v1.resolve(3, () => [{a:1}, void 0])</script>"
        );

        let err = resolution_chunk(
            "g",
            4,
            &Settled::Rejected("new Error(\"x\")".into()),
            true,
            Dialect::Legacy,
            " nonce=\"n\"",
        );
        assert_eq!(
            err,
            "<script nonce=\"n\">g.resolve(4, function (app) { return [void 0, new Error(\"x\")]; })</script>"
        );
    }
}
