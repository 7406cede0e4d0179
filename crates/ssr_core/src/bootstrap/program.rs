//! Structured bootstrap program and its text renderer.
//!
//! Plans are built as [`Instruction`] lists and turned into JavaScript by
//! [`render`]. The [`Dialect`] decides the syntax: `Modern` may use `const`,
//! arrow functions and native `import()`, `Legacy` sticks to ES5 and loads
//! modules through `import_func`.

use crate::escape::js_string;

/// Upper bound for the client to wait on a deferred id, in milliseconds.
pub const DEFERRED_RETRY_LIMIT_MS: u32 = 10_000;

/// Flag set by the module detection script in browsers with dynamic import.
pub const MODERN_BROWSER_FLAG: &str = "__KIT_is_modern_browser";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    Modern,
    Legacy,
}

/// Where the resolver finds the app module that owns the transport decoders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppSource {
    /// Inlined bundle exposed as `<global>.app.app`.
    Global(String),
    /// Separate app entry (`split` strategy).
    Module(String),
    /// App re-exported by the start entry (`single` strategy).
    Start(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// Literal JavaScript text, written verbatim.
    Raw(String),
    Object(Vec<(String, Expr)>),
    /// `defer(id)`: a promise registered under `id` in `deferred`.
    Defer,
    /// `resolve(id, fn)`: settles the promise for `id`, retrying until it
    /// has been registered.
    Resolve { app: Option<AppSource> },
}

impl Expr {
    pub fn raw(text: impl Into<String>) -> Self {
        Self::Raw(text.into())
    }
}

/// A module to import, with its legacy build if there is one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleRef {
    pub modern: String,
    pub legacy: Option<String>,
}

impl ModuleRef {
    pub fn new(modern: impl Into<String>) -> Self {
        Self {
            modern: modern.into(),
            legacy: None,
        }
    }

    pub fn with_legacy(modern: impl Into<String>, legacy: Option<String>) -> Self {
        Self {
            modern: modern.into(),
            legacy,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// `const name = value;` (`var` in legacy code).
    Declare { name: String, value: Expr },
    /// `target = value;`
    Assign { target: String, value: Expr },
    /// `callee(args...);` Only the last argument may span lines.
    Call { callee: String, args: Vec<Expr> },
    /// Import `modules`, bind them to `bindings` and run `body`.
    Import {
        modules: Vec<ModuleRef>,
        bindings: Vec<String>,
        body: Vec<Instruction>,
    },
    /// Names visible to `body` only. Legacy code wraps them in an IIFE.
    Scope {
        bindings: Vec<(String, String)>,
        body: Vec<Instruction>,
    },
    Conditional {
        test: String,
        then: Vec<Instruction>,
        otherwise: Vec<Instruction>,
    },
    RegisterServiceWorker { url: String, options: Option<String> },
    /// Pre-rendered statement text, written verbatim.
    Raw(String),
}

/// A complete bootstrap program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program(pub Vec<Instruction>);

/// Render `program` at the given starting indentation.
pub fn render(program: &Program, dialect: Dialect, depth: usize) -> String {
    let mut w = Writer {
        out: String::new(),
        depth,
        dialect,
    };
    w.block(&program.0);
    w.out
}

struct Writer {
    out: String,
    depth: usize,
    dialect: Dialect,
}

impl Writer {
    fn line(&mut self, text: &str) {
        if !self.out.is_empty() {
            self.out.push('\n');
        }
        for _ in 0..self.depth {
            self.out.push('\t');
        }
        self.out.push_str(text);
    }

    fn open(&mut self, text: &str) {
        self.line(text);
        self.depth += 1;
    }

    fn close(&mut self, text: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(text);
    }

    fn modern(&self) -> bool {
        self.dialect == Dialect::Modern
    }

    fn import_fn(&self) -> &'static str {
        if self.modern() {
            "import"
        } else {
            "import_func"
        }
    }

    fn block(&mut self, instructions: &[Instruction]) {
        for instruction in instructions {
            self.instruction(instruction);
        }
    }

    fn instruction(&mut self, instruction: &Instruction) {
        match instruction {
            Instruction::Declare { name, value } => {
                let keyword = if self.modern() { "const" } else { "var" };
                self.value(&format!("{keyword} {name} = "), value, ";");
            }
            Instruction::Assign { target, value } => {
                self.value(&format!("{target} = "), value, ";");
            }
            Instruction::Call { callee, args } => self.call(callee, args, ";"),
            Instruction::Import {
                modules,
                bindings,
                body,
            } => self.import(modules, bindings, body),
            Instruction::Scope { bindings, body } => {
                if bindings.is_empty() {
                    self.block(body);
                } else if self.modern() {
                    for (name, value) in bindings {
                        self.line(&format!("const {name} = {value};"));
                    }
                    self.block(body);
                } else {
                    let names: Vec<&str> = bindings.iter().map(|(n, _)| n.as_str()).collect();
                    let values: Vec<&str> = bindings.iter().map(|(_, v)| v.as_str()).collect();
                    self.open(&format!("(function ({}) {{", names.join(", ")));
                    self.block(body);
                    self.close(&format!("}})({});", values.join(", ")));
                }
            }
            Instruction::Conditional {
                test,
                then,
                otherwise,
            } => {
                self.open(&format!("if ({test}) {{"));
                self.block(then);
                if !otherwise.is_empty() {
                    self.close("} else {");
                    self.depth += 1;
                    self.block(otherwise);
                }
                self.close("}");
            }
            Instruction::RegisterServiceWorker { url, options } => {
                let options = options
                    .as_deref()
                    .map(|o| format!(", {o}"))
                    .unwrap_or_default();
                // Plain functions so the snippet also runs in older browsers.
                self.open("if ('serviceWorker' in navigator) {");
                self.open("addEventListener('load', function () {");
                self.line(&format!(
                    "navigator.serviceWorker.register({}{options});",
                    js_string(url)
                ));
                self.close("});");
                self.close("}");
            }
            Instruction::Raw(text) => self.line(text),
        }
    }

    fn call(&mut self, callee: &str, args: &[Expr], tail: &str) {
        let Some((last, leading)) = args.split_last() else {
            self.line(&format!("{callee}(){tail}"));
            return;
        };
        let mut head = format!("{callee}(");
        for arg in leading {
            match arg {
                Expr::Raw(text) => head.push_str(text),
                // Plans only put multi-line arguments last.
                _ => head.push_str("void 0"),
            }
            head.push_str(", ");
        }
        self.value(&head, last, &format!("){tail}"));
    }

    fn import(&mut self, modules: &[ModuleRef], bindings: &[String], body: &[Instruction]) {
        let import = self.import_fn();
        let with_legacy = !self.modern() && modules.iter().all(|m| m.legacy.is_some());

        if let [module] = modules {
            let specifier = match (&module.legacy, with_legacy) {
                (Some(legacy), true) => format!(
                    "window.{MODERN_BROWSER_FLAG} ? {} : {}",
                    js_string(&module.modern),
                    js_string(legacy)
                ),
                _ => js_string(&module.modern),
            };
            let binding = bindings.first().map(String::as_str).unwrap_or("_");
            if self.modern() {
                self.open(&format!("{import}({specifier}).then(({binding}) => {{"));
            } else {
                self.open(&format!("{import}({specifier}).then(function ({binding}) {{"));
            }
            self.block(body);
            self.close("});");
            return;
        }

        let list = |pick: &dyn Fn(&ModuleRef) -> String| {
            let items: Vec<String> = modules
                .iter()
                .map(|m| format!("{import}({})", js_string(&pick(m))))
                .collect();
            format!("[{}]", items.join(", "))
        };
        let modern_list = list(&|m: &ModuleRef| m.modern.clone());

        if self.modern() {
            self.open(&format!(
                "Promise.all({modern_list}).then(([{}]) => {{",
                bindings.join(", ")
            ));
            self.block(body);
            self.close("});");
            return;
        }

        let all = if with_legacy {
            let legacy_list = list(&|m: &ModuleRef| m.legacy.clone().unwrap_or_default());
            format!("window.{MODERN_BROWSER_FLAG} ? {modern_list} : {legacy_list}")
        } else {
            modern_list
        };
        let slots: Vec<String> = (0..bindings.len()).map(|i| format!("modules[{i}]")).collect();
        self.open(&format!("Promise.all({all}).then(function (modules) {{"));
        self.open(&format!("(function ({}) {{", bindings.join(", ")));
        self.block(body);
        self.close(&format!("}})({});", slots.join(", ")));
        self.close("});");
    }

    fn value(&mut self, head: &str, expr: &Expr, tail: &str) {
        match expr {
            Expr::Raw(text) => self.line(&format!("{head}{text}{tail}")),
            Expr::Object(properties) if properties.is_empty() => {
                self.line(&format!("{head}{{}}{tail}"))
            }
            Expr::Object(properties) => {
                self.open(&format!("{head}{{"));
                let last = properties.len() - 1;
                for (i, (key, value)) in properties.iter().enumerate() {
                    let comma = if i == last { "" } else { "," };
                    self.value(&format!("{key}: "), value, comma);
                }
                self.close(&format!("}}{tail}"));
            }
            Expr::Defer if self.modern() => {
                self.open(&format!("{head}(id) => new Promise((fulfil, reject) => {{"));
                self.line("deferred.set(id, { fulfil, reject });");
                self.close(&format!("}}){tail}"));
            }
            Expr::Defer => {
                self.open(&format!("{head}function (id) {{"));
                self.open("return new Promise(function (fulfil, reject) {");
                self.line("deferred.set(id, { fulfil: fulfil, reject: reject });");
                self.close("});");
                self.close(&format!("}}{tail}"));
            }
            Expr::Resolve { app } if self.modern() => self.modern_resolve(head, app.as_ref(), tail),
            Expr::Resolve { app } => self.legacy_resolve(head, app.as_ref(), tail),
        }
    }

    fn modern_resolve(&mut self, head: &str, app: Option<&AppSource>, tail: &str) {
        self.open(&format!("{head}async (id, fn) => {{"));
        match app {
            Some(AppSource::Global(global)) => {
                self.line(&format!("const app = {global}.app.app;"));
                self.line("const [data, error] = fn(app);");
            }
            Some(AppSource::Module(path)) => {
                self.line(&format!("const app = await import({});", js_string(path)));
                self.line("const [data, error] = fn(app);");
            }
            Some(AppSource::Start(path)) => {
                self.line(&format!("const {{ app }} = await import({});", js_string(path)));
                self.line("const [data, error] = fn(app);");
            }
            None => self.line("const [data, error] = fn();"),
        }
        self.line("const started = Date.now();");
        self.open("const try_to_resolve = () => {");
        self.open("if (!deferred.has(id)) {");
        self.retry_or_give_up("try_to_resolve");
        self.close("}");
        self.line("const { fulfil, reject } = deferred.get(id);");
        self.line("deferred.delete(id);");
        self.line("if (error) reject(error);");
        self.line("else fulfil(data);");
        self.close("};");
        self.line("try_to_resolve();");
        self.close(&format!("}}{tail}"));
    }

    fn legacy_resolve(&mut self, head: &str, app: Option<&AppSource>, tail: &str) {
        self.open(&format!("{head}function (id, fn) {{"));
        self.line("var started = Date.now();");
        self.open("var try_to_resolve = function () {");
        self.open("if (!deferred.has(id)) {");
        self.retry_or_give_up("try_to_resolve");
        self.close("}");
        self.line("var deferred_result = deferred.get(id);");
        self.line("deferred.delete(id);");
        match app {
            Some(source) => {
                let promise = match source {
                    AppSource::Global(global) => format!("Promise.resolve({global}.app.app)"),
                    AppSource::Module(path) => format!("import_func({})", js_string(path)),
                    AppSource::Start(path) => format!(
                        "import_func({}).then(function (m) {{ return m.app; }})",
                        js_string(path)
                    ),
                };
                self.open(&format!("{promise}.then(function (app) {{"));
                self.legacy_settle("fn(app)");
                self.close("});");
            }
            None => self.legacy_settle("fn()"),
        }
        self.close("};");
        self.line("try_to_resolve();");
        self.close(&format!("}}{tail}"));
    }

    fn legacy_settle(&mut self, call: &str) {
        self.open("try {");
        self.line(&format!("var result = {call};"));
        self.line("if (result[1]) deferred_result.reject(result[1]);");
        self.line("else deferred_result.fulfil(result[0]);");
        self.close("} catch (e) {");
        self.depth += 1;
        self.line("deferred_result.reject(e);");
        self.close("}");
    }

    fn retry_or_give_up(&mut self, retry: &str) {
        self.open(&format!(
            "if (Date.now() - started > {DEFERRED_RETRY_LIMIT_MS}) {{"
        ));
        self.line("console.error('Deferred value ' + id + ' was never delivered');");
        self.line("return;");
        self.close("}");
        self.line(&format!("setTimeout({retry}, 0);"));
        self.line("return;");
    }
}
