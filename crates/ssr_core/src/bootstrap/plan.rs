//! Modern and legacy bootstrap plans.
//!
//! Both are pure functions of [`BootstrapInput`]; all text generation is
//! left to the program renderer.

use super::program::{AppSource, Expr, Instruction, ModuleRef, Program};
use crate::assets::Prefixer;
use crate::escape::js_string;
use crate::manifest::ClientManifest;

/// Id of the `<script>` holding the legacy startup function.
pub const LEGACY_INIT_ID: &str = "__KIT_legacy_init_id";

/// Global holding the native `import()` wrapper in modern browsers.
pub const MODERN_IMPORT_FUNC: &str = "__KIT_modern_import_func";

/// How the client entry code is delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entry {
    /// Client code inlined into the document.
    Inline { script: String },
    /// Separate start and app modules.
    Split { start: ModuleRef, app: ModuleRef },
    /// A single start module that re-exports the app.
    Single { start: ModuleRef },
}

impl Entry {
    pub fn from_client(client: &ClientManifest, prefixer: &Prefixer) -> Self {
        if let Some(inline) = &client.inline {
            return Self::Inline {
                script: inline.script.clone(),
            };
        }
        let start = ModuleRef::with_legacy(
            prefixer.prefixed(&client.start),
            client.legacy_start.as_deref().map(|p| prefixer.prefixed(p)),
        );
        match &client.app {
            Some(app) => Self::Split {
                start,
                app: ModuleRef::with_legacy(
                    prefixer.prefixed(app),
                    client.legacy_app.as_deref().map(|p| prefixer.prefixed(p)),
                ),
            },
            None => Self::Single { start },
        }
    }

    fn app_source(&self, global: &str) -> AppSource {
        match self {
            Self::Inline { .. } => AppSource::Global(global.to_string()),
            Self::Split { app, .. } => AppSource::Module(app.modern.clone()),
            Self::Single { start } => AppSource::Start(start.modern.clone()),
        }
    }
}

/// Everything the bootstrap plans depend on.
#[derive(Clone, Debug)]
pub struct BootstrapInput {
    pub global: String,
    pub base_expression: String,
    /// Configured assets prefix, exposed to the client when set.
    pub assets: Option<String>,
    /// Public env as a JSON literal.
    pub public_env: String,
    /// The client reads dynamic public env. Modern startup only exposes env
    /// then; legacy startup always does.
    pub uses_env_dynamic_public: bool,
    /// Env module imported before anything else (prerendered dynamic-env pages).
    pub eager_env_module: Option<String>,
    pub entry: Entry,
    /// Hydration argument for `start`. `None` when server rendering was off.
    pub hydration: Option<Expr>,
    /// Serialized remote-function results, assigned to `<global>.data`.
    pub remote_data: Option<String>,
    pub has_deferred: bool,
    pub has_transports: bool,
    pub service_worker: Option<ServiceWorkerRegistration>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceWorkerRegistration {
    pub url: String,
    /// Registration options as a JSON literal.
    pub options: Option<String>,
}

fn global_properties(input: &BootstrapInput, env: Option<String>, element: Option<String>) -> Expr {
    let mut properties = Vec::new();
    let assets = input
        .assets
        .as_ref()
        .map(|assets| ("assets".to_string(), Expr::raw(js_string(assets))));
    match element {
        // Legacy order: env, assets, base, element.
        Some(element) => {
            properties.extend(env.map(|env| ("env".to_string(), Expr::raw(env))));
            properties.extend(assets);
            properties.push(("base".to_string(), Expr::raw(&input.base_expression)));
            properties.push(("element".to_string(), Expr::raw(element)));
        }
        None => {
            properties.push(("base".to_string(), Expr::raw(&input.base_expression)));
            properties.extend(assets);
            properties.extend(env.map(|env| ("env".to_string(), Expr::raw(env))));
        }
    }
    if input.has_deferred {
        let app = input
            .has_transports
            .then(|| input.entry.app_source(&input.global));
        properties.push(("defer".to_string(), Expr::Defer));
        properties.push(("resolve".to_string(), Expr::Resolve { app }));
    }
    Expr::Object(properties)
}

fn boot(input: &BootstrapInput, element: &str) -> Vec<Instruction> {
    let mut args = vec![Expr::raw(element)];
    if let Some(hydration) = &input.hydration {
        args.push(hydration.clone());
    }

    let mut prelude = Vec::new();
    if let Some(data) = &input.remote_data {
        prelude.push(Instruction::Assign {
            target: format!("{}.data", input.global),
            value: Expr::raw(data),
        });
    }

    match &input.entry {
        Entry::Inline { script } => {
            let mut out = vec![Instruction::Raw(script.clone())];
            out.extend(prelude);
            out.push(Instruction::Call {
                callee: format!("{}.app.start", input.global),
                args,
            });
            out
        }
        Entry::Split { start, app } => {
            let mut body = prelude;
            let mut start_args = vec![Expr::raw("app")];
            start_args.extend(args);
            body.push(Instruction::Call {
                callee: "kit.start".to_string(),
                args: start_args,
            });
            vec![Instruction::Import {
                modules: vec![start.clone(), app.clone()],
                bindings: vec!["kit".to_string(), "app".to_string()],
                body,
            }]
        }
        Entry::Single { start } => {
            let mut body = prelude;
            body.push(Instruction::Call {
                callee: "app.start".to_string(),
                args,
            });
            vec![Instruction::Import {
                modules: vec![start.clone()],
                bindings: vec!["app".to_string()],
                body,
            }]
        }
    }
}

fn service_worker(input: &BootstrapInput) -> Option<Instruction> {
    input
        .service_worker
        .as_ref()
        .map(|sw| Instruction::RegisterServiceWorker {
            url: sw.url.clone(),
            options: sw.options.clone(),
        })
}

/// Program for browsers with native module support.
pub fn modern_plan(input: &BootstrapInput) -> Program {
    let mut program = Vec::new();

    if input.has_deferred {
        program.push(Instruction::Declare {
            name: "deferred".to_string(),
            value: Expr::raw("new Map()"),
        });
    }

    let env = input.uses_env_dynamic_public.then(|| {
        if input.eager_env_module.is_some() {
            "null".to_string()
        } else {
            input.public_env.clone()
        }
    });
    // Before anything that may reference the global.
    program.push(Instruction::Assign {
        target: input.global.clone(),
        value: global_properties(input, env, None),
    });
    program.push(Instruction::Declare {
        name: "element".to_string(),
        value: Expr::raw("document.currentScript.parentElement"),
    });

    let boot = boot(input, "element");
    match &input.eager_env_module {
        Some(module) => {
            let mut body = vec![Instruction::Assign {
                target: format!("{}.env", input.global),
                value: Expr::raw("env_module.env"),
            }];
            body.extend(boot);
            program.push(Instruction::Import {
                modules: vec![ModuleRef::new(module.clone())],
                bindings: vec!["env_module".to_string()],
                body,
            });
        }
        None => program.extend(boot),
    }

    program.extend(service_worker(input));
    Program(program)
}

/// Program run by the legacy startup function. Modules load through
/// `import_func`, which falls back to SystemJS.
pub fn legacy_plan(input: &BootstrapInput) -> Program {
    let mut bindings = Vec::new();
    if input.has_deferred {
        bindings.push(("deferred".to_string(), "new Map()".to_string()));
    }
    bindings.push((
        "import_func".to_string(),
        format!("window.{MODERN_IMPORT_FUNC} || (function (id) {{ return System.import(id); }})"),
    ));

    let element = format!(
        "document.getElementById({}).parentNode",
        js_string(LEGACY_INIT_ID)
    );
    let mut body = vec![Instruction::Assign {
        target: input.global.clone(),
        value: global_properties(input, Some(input.public_env.clone()), Some(element)),
    }];
    body.extend(boot(input, &format!("{}.element", input.global)));
    body.extend(service_worker(input));

    Program(vec![Instruction::Scope { bindings, body }])
}
