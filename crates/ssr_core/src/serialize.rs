//! Value serializer: turns a [`Value`] into JavaScript source that rebuilds
//! it when evaluated.
//!
//! Nodes that are reached more than once (shared or cyclic) are bound to a
//! short parameter name of a wrapping function and filled in by statements,
//! so each one is emitted exactly once. All string content is written with
//! [`js_string`], which makes the output safe inside an inline `<script>`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{CoreError, Result};
use crate::escape::js_string;
use crate::value::{Compound, Node, Value};

/// A custom encoder for application types.
///
/// Returning `Some` claims the value; the returned value is serialized in
/// its place and wrapped in a call to the client-side decoder registered
/// under the same name.
pub trait Transport: Send + Sync {
    fn encode(&self, value: &Value) -> Option<Value>;
}

impl<F> Transport for F
where
    F: Fn(&Value) -> Option<Value> + Send + Sync,
{
    fn encode(&self, value: &Value) -> Option<Value> {
        self(value)
    }
}

/// Named transports, tried in registration order.
#[derive(Clone, Default)]
pub struct Transports {
    entries: Vec<(String, Arc<dyn Transport>)>,
}

impl Transports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, transport: impl Transport + 'static) -> Self {
        self.entries.push((name.into(), Arc::new(transport)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn encode(&self, value: &Value) -> Option<(&str, Value)> {
        self.entries
            .iter()
            .find_map(|(name, t)| t.encode(value).map(|encoded| (name.as_str(), encoded)))
    }
}

impl fmt::Debug for Transports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, _)| name))
            .finish()
    }
}

/// Serialize `value` with the given transports.
pub fn serialize(value: &Value, transports: &Transports) -> Result<String> {
    Serializer::new(transports).serialize(value)
}

/// Serializer configuration for one response.
#[derive(Clone, Copy)]
pub struct Serializer<'a> {
    transports: &'a Transports,
    /// App global and number of registered deferred values.
    deferred: Option<(&'a str, u32)>,
}

impl<'a> Serializer<'a> {
    pub fn new(transports: &'a Transports) -> Self {
        Self {
            transports,
            deferred: None,
        }
    }

    /// Allow [`Value::Deferred`] placeholders with ids below `count`, emitted
    /// as `<global>.defer(id)`.
    pub fn with_deferred(mut self, global: &'a str, count: u32) -> Self {
        self.deferred = Some((global, count));
        self
    }

    pub fn serialize(&self, value: &Value) -> Result<String> {
        let mut walker = Walker {
            serializer: *self,
            keys: Vec::new(),
            order: Vec::new(),
            counts: HashMap::new(),
            custom: HashMap::new(),
        };
        walker.walk(value)?;
        walker.finish(value)
    }
}

struct Walker<'a> {
    serializer: Serializer<'a>,
    keys: Vec<String>,
    /// First-visit order of nodes, with visit counts.
    order: Vec<(Node, usize)>,
    counts: HashMap<usize, usize>,
    /// Transport output keyed by node id.
    custom: HashMap<usize, String>,
}

impl Walker<'_> {
    fn walk(&mut self, value: &Value) -> Result<()> {
        let node = match value {
            Value::Function(name) => {
                return Err(CoreError::unserializable(
                    &self.keys,
                    format!("Cannot stringify a function ({name})"),
                ))
            }
            Value::Deferred(id) => {
                return match self.serializer.deferred {
                    None => Err(CoreError::unserializable(
                        &self.keys,
                        "Cannot stringify a promise outside a streamed response",
                    )),
                    Some((_, count)) if *id >= count => Err(CoreError::UnknownDeferred(*id)),
                    Some(_) => Ok(()),
                }
            }
            Value::Node(node) => node,
            _ => return Ok(()),
        };

        if let Some(&idx) = self.counts.get(&node.id()) {
            self.order[idx].1 += 1;
            return Ok(());
        }
        self.counts.insert(node.id(), self.order.len());
        self.order.push((node.clone(), 1));

        if let Some((name, encoded)) = self.serializer.transports.encode(value) {
            // Encoded output is serialized on its own, with the same transports.
            let inner = self.serializer.serialize(&encoded)?;
            self.custom
                .insert(node.id(), format!("app.decode({}, {inner})", js_string(name)));
            return Ok(());
        }

        match node.snapshot() {
            Compound::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.keys.push(format!("[{i}]"));
                    self.walk(item)?;
                    self.keys.pop();
                }
            }
            Compound::Set(items) => {
                for item in &items {
                    self.walk(item)?;
                }
            }
            Compound::Map(entries) => {
                for (key, item) in &entries {
                    self.keys.push(format!(".get({})", key_label(key)));
                    self.walk(key)?;
                    self.walk(item)?;
                    self.keys.pop();
                }
            }
            Compound::Object(entries) => {
                for (key, item) in &entries {
                    self.keys.push(safe_prop(key));
                    self.walk(item)?;
                    self.keys.pop();
                }
            }
            Compound::TypedArray { .. } | Compound::Error { .. } => {}
            Compound::Instance { class, .. } => {
                return Err(CoreError::unserializable(
                    &self.keys,
                    format!("Cannot stringify arbitrary non-POJOs ({class})"),
                ));
            }
        }
        Ok(())
    }

    fn finish(self, root: &Value) -> Result<String> {
        let mut repeated: Vec<&(Node, usize)> =
            self.order.iter().filter(|(_, count)| *count > 1).collect();
        // Stable: ties keep first-visit order.
        repeated.sort_by(|a, b| b.1.cmp(&a.1));

        let names: HashMap<usize, String> = repeated
            .iter()
            .enumerate()
            .map(|(i, (node, _))| (node.id(), name_for(i)))
            .collect();

        let out = Output {
            names: &names,
            custom: &self.custom,
            global: self.serializer.deferred.map(|(global, _)| global),
        };
        let body = out.stringify(root);
        if names.is_empty() {
            return Ok(body);
        }

        let mut params = Vec::with_capacity(repeated.len());
        let mut values = Vec::with_capacity(repeated.len());
        let mut statements = Vec::new();

        for (node, _) in repeated {
            let name = &names[&node.id()];
            params.push(name.clone());
            if let Some(custom) = self.custom.get(&node.id()) {
                values.push(custom.clone());
                continue;
            }
            match node.snapshot() {
                Compound::Array(items) => {
                    values.push(format!("Array({})", items.len()));
                    for (i, item) in items.iter().enumerate() {
                        statements.push(format!("{name}[{i}]={}", out.stringify(item)));
                    }
                }
                Compound::Set(items) => {
                    values.push("new Set".to_string());
                    if !items.is_empty() {
                        let adds: Vec<String> = items
                            .iter()
                            .map(|item| format!("add({})", out.stringify(item)))
                            .collect();
                        statements.push(format!("{name}.{}", adds.join(".")));
                    }
                }
                Compound::Map(entries) => {
                    values.push("new Map".to_string());
                    if !entries.is_empty() {
                        let sets: Vec<String> = entries
                            .iter()
                            .map(|(k, v)| format!("set({}, {})", out.stringify(k), out.stringify(v)))
                            .collect();
                        statements.push(format!("{name}.{}", sets.join(".")));
                    }
                }
                Compound::Object(entries) => {
                    values.push("{}".to_string());
                    for (key, item) in &entries {
                        statements.push(assign_prop(name, key, &out.stringify(item)));
                    }
                }
                other => values.push(out.stringify_compound(&other)),
            }
        }

        statements.push(format!("return {body}"));
        Ok(format!(
            "(function({}){{{}}}({}))",
            params.join(","),
            statements.join(";"),
            values.join(",")
        ))
    }
}

struct Output<'a> {
    names: &'a HashMap<usize, String>,
    custom: &'a HashMap<usize, String>,
    global: Option<&'a str>,
}

impl Output<'_> {
    fn stringify(&self, value: &Value) -> String {
        match value {
            Value::Node(node) => {
                if let Some(name) = self.names.get(&node.id()) {
                    return name.clone();
                }
                if let Some(custom) = self.custom.get(&node.id()) {
                    return custom.clone();
                }
                self.stringify_compound(&node.snapshot())
            }
            Value::Deferred(id) => format!("{}.defer({id})", self.global.unwrap_or("undefined")),
            scalar => stringify_scalar(scalar),
        }
    }

    fn stringify_compound(&self, compound: &Compound) -> String {
        match compound {
            Compound::Array(items) => {
                let members: Vec<String> = items.iter().map(|v| self.stringify(v)).collect();
                format!("[{}]", members.join(","))
            }
            Compound::Set(items) => {
                let members: Vec<String> = items.iter().map(|v| self.stringify(v)).collect();
                format!("new Set([{}])", members.join(","))
            }
            Compound::Map(entries) => {
                let members: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("[{},{}]", self.stringify(k), self.stringify(v)))
                    .collect();
                format!("new Map([{}])", members.join(","))
            }
            Compound::Object(entries) => {
                let members: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}:{}", safe_key(k), self.stringify(v)))
                    .collect();
                format!("{{{}}}", members.join(","))
            }
            Compound::TypedArray { kind, elements } => {
                let members: Vec<String> = elements.iter().map(|n| js_number(*n)).collect();
                format!("new {}([{}])", kind.constructor(), members.join(","))
            }
            Compound::Error { name, message } => stringify_error(name, message),
            // Rejected during the walk.
            Compound::Instance { .. } => "void 0".to_string(),
        }
    }
}

const BUILTIN_ERRORS: &[&str] = &[
    "Error",
    "EvalError",
    "RangeError",
    "ReferenceError",
    "SyntaxError",
    "TypeError",
    "URIError",
];

fn stringify_error(name: &str, message: &str) -> String {
    if BUILTIN_ERRORS.contains(&name) {
        format!("new {name}({})", js_string(message))
    } else {
        format!(
            "Object.assign(new Error({}),{{name:{}}})",
            js_string(message),
            js_string(name)
        )
    }
}

fn stringify_scalar(value: &Value) -> String {
    match value {
        Value::Undefined => "void 0".to_string(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            let s = js_number(*n);
            // Drop the leading zero: `0.5` -> `.5`, `-0.5` -> `-.5`.
            if let Some(rest) = s.strip_prefix("0.") {
                format!(".{rest}")
            } else if let Some(rest) = s.strip_prefix("-0.") {
                format!("-.{rest}")
            } else {
                s
            }
        }
        Value::BigInt(n) => format!("{n}n"),
        Value::String(s) => js_string(s),
        Value::Date(ms) => format!("new Date({})", js_number(*ms)),
        Value::RegExp { source, flags } => {
            format!("new RegExp({}, {})", js_string(source), js_string(flags))
        }
        Value::Function(_) | Value::Deferred(_) | Value::Node(_) => "void 0".to_string(),
    }
}

fn key_label(key: &Value) -> String {
    match key {
        Value::Node(_) | Value::Function(_) | Value::Deferred(_) => "...".to_string(),
        scalar => stringify_scalar(scalar),
    }
}

/// Format a number the way JavaScript's `Number.prototype.toString` does.
pub fn js_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    // Shortest round-trip digits, e.g. "1.5e-7".
    let sci = format!("{:e}", n.abs());
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let k = digits.len() as i32;
    let point = exp + 1;
    let sign = if n < 0.0 { "-" } else { "" };

    let body = if k <= point && point <= 21 {
        format!("{digits}{}", "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        let (int, frac) = digits.split_at(point as usize);
        format!("{int}.{frac}")
    } else if -6 < point && point <= 0 {
        format!("0.{}{digits}", "0".repeat((-point) as usize))
    } else {
        let e = point - 1;
        let e_sign = if e < 0 { '-' } else { '+' };
        let (first, rest) = digits.split_at(1);
        if rest.is_empty() {
            format!("{first}e{e_sign}{}", e.abs())
        } else {
            format!("{first}.{rest}e{e_sign}{}", e.abs())
        }
    };
    format!("{sign}{body}")
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c == '_' || c == '$' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c == '$' || c.is_ascii_alphanumeric())
}

/// Object literal key. `__proto__` is computed so it stays an own property.
fn safe_key(key: &str) -> String {
    if key == PROTO {
        format!("[{}]", js_string(key))
    } else if is_identifier(key) {
        key.to_string()
    } else {
        js_string(key)
    }
}

fn safe_prop(key: &str) -> String {
    if is_identifier(key) && key != PROTO {
        format!(".{key}")
    } else {
        format!("[{}]", js_string(key))
    }
}

/// Statement filling `key` on the object bound to `name`.
///
/// Assigning `__proto__` would call the prototype setter, so that key is
/// defined instead.
fn assign_prop(name: &str, key: &str, value: &str) -> String {
    if key == PROTO {
        format!(
            "Object.defineProperty({name},{},{{value:{value},enumerable:true,configurable:true,writable:true}})",
            js_string(key)
        )
    } else {
        format!("{name}{}={value}", safe_prop(key))
    }
}

const PROTO: &str = "__proto__";

const NAME_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_$";

const RESERVED: &[&str] = &[
    "do", "if", "in", "for", "int", "let", "new", "try", "var", "byte", "case", "char", "else",
    "enum", "goto", "long", "this", "void", "with", "await", "break", "catch", "class", "const",
    "final", "float", "short", "super", "throw", "while", "yield", "delete", "double", "export",
    "import", "native", "return", "switch", "throws", "typeof", "boolean", "default", "extends",
    "finally", "package", "private", "abstract", "continue", "debugger", "function", "volatile",
    "interface", "protected", "transient", "implements", "instanceof", "synchronized",
];

/// Globals the generated code refers to. A parameter must not shadow them.
const GLOBALS: &[&str] = &[
    "NaN", "Map", "Set", "app", "Date", "Array", "Error", "Object", "RegExp", "Infinity",
    "TypeError", "RangeError", "EvalError", "URIError", "SyntaxError", "ReferenceError",
];

fn name_for(index: usize) -> String {
    let base = NAME_CHARS.len() as i64;
    let mut num = index as i64;
    let mut name = Vec::new();
    loop {
        name.push(NAME_CHARS[(num % base) as usize]);
        num = num / base - 1;
        if num < 0 {
            break;
        }
    }
    name.reverse();
    let name = String::from_utf8_lossy(&name).into_owned();
    if RESERVED.contains(&name.as_str()) || GLOBALS.contains(&name.as_str()) {
        format!("{name}0")
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revive::{revive, same_graph};
    use crate::value::TypedArrayKind;

    fn ser(value: &Value) -> String {
        serialize(value, &Transports::new()).unwrap()
    }

    fn no_decoders(name: &str, _encoded: Value) -> Value {
        panic!("no decoder registered for {name}")
    }

    fn assert_round_trip(value: &Value) {
        let source = ser(value);
        let revived = revive(&source, &no_decoders);
        assert!(same_graph(value, &revived), "{source} did not round-trip");
    }

    /// Runs `source` in node and returns `check` as JSON, or `None` when
    /// node is not installed.
    fn eval_in_node(source: &str, check: &str) -> Option<String> {
        let script =
            format!("const value = {source};\nprocess.stdout.write(JSON.stringify({check}));");
        let output = std::process::Command::new("node")
            .arg("-e")
            .arg(&script)
            .output()
            .ok()?;
        assert!(
            output.status.success(),
            "{}",
            String::from_utf8_lossy(&output.stderr)
        );
        Some(String::from_utf8(output.stdout).unwrap())
    }

    fn vector(x: f64, y: f64) -> Value {
        Value::instance("Vector", [("x", Value::Number(x)), ("y", Value::Number(y))])
    }

    fn vector_transports() -> Transports {
        Transports::new().register("Vector", |value: &Value| {
            if value.class_name().as_deref() == Some("Vector") {
                Some(Value::array(vec![
                    value.field("x").unwrap_or(Value::Undefined),
                    value.field("y").unwrap_or(Value::Undefined),
                ]))
            } else {
                None
            }
        })
    }

    fn decode_vector(name: &str, encoded: Value) -> Value {
        assert_eq!(name, "Vector");
        match encoded.as_node().map(Node::snapshot) {
            Some(Compound::Array(items)) => Value::instance(
                "Vector",
                [("x", items[0].clone()), ("y", items[1].clone())],
            ),
            other => panic!("unexpected encoding {other:?}"),
        }
    }

    #[test]
    fn test_scalars() {
        assert_eq!(ser(&Value::Undefined), "void 0");
        assert_eq!(ser(&Value::Null), "null");
        assert_eq!(ser(&Value::Bool(true)), "true");
        assert_eq!(ser(&Value::Number(f64::NAN)), "NaN");
        assert_eq!(ser(&Value::Number(f64::INFINITY)), "Infinity");
        assert_eq!(ser(&Value::Number(f64::NEG_INFINITY)), "-Infinity");
        assert_eq!(ser(&Value::Number(-0.0)), "-0");
        assert_eq!(ser(&Value::Number(0.5)), ".5");
        assert_eq!(ser(&Value::Number(-0.25)), "-.25");
        assert_eq!(ser(&Value::Number(42.0)), "42");
        assert_eq!(ser(&Value::BigInt(-7)), "-7n");
        assert_eq!(ser(&Value::Date(1_700_000_000_000.0)), "new Date(1700000000000)");
    }

    #[test]
    fn test_js_number_formats() {
        assert_eq!(js_number(1e21), "1e+21");
        assert_eq!(js_number(123456789012345680000.0), "123456789012345680000");
        assert_eq!(js_number(1.5e-7), "1.5e-7");
        assert_eq!(js_number(0.000001), "0.000001");
        assert_eq!(js_number(3.14), "3.14");
        assert_eq!(js_number(-2.0), "-2");
    }

    #[test]
    fn test_nested_object() {
        let value = Value::object([
            ("title", Value::from("Hello")),
            ("tags", Value::array(vec![Value::from("a"), Value::from("b")])),
            ("needs-quotes", Value::Null),
        ]);
        assert_eq!(
            ser(&value),
            r#"{title:"Hello",tags:["a","b"],"needs-quotes":null}"#
        );
    }

    #[test]
    fn test_map_set_and_typed_array() {
        let value = Value::array(vec![
            Value::map(vec![(Value::from("k"), Value::from(1_i64))]),
            Value::set(vec![Value::from(1_i64), Value::from(2_i64)]),
            Value::typed_array(TypedArrayKind::Uint8, vec![1.0, 2.0, 255.0]),
        ]);
        assert_eq!(
            ser(&value),
            r#"[new Map([["k",1]]),new Set([1,2]),new Uint8Array([1,2,255])]"#
        );
    }

    #[test]
    fn test_regexp() {
        let value = Value::RegExp {
            source: "^a.b$".into(),
            flags: "gi".into(),
        };
        assert_eq!(ser(&value), r#"new RegExp("^a.b$", "gi")"#);
    }

    #[test]
    fn test_error_keeps_name_and_message_only() {
        assert_eq!(
            ser(&Value::error("TypeError", "bad")),
            r#"new TypeError("bad")"#
        );
        assert_eq!(
            ser(&Value::error("HttpError", "not found")),
            r#"Object.assign(new Error("not found"),{name:"HttpError"})"#
        );
    }

    #[test]
    fn test_shared_reference_emitted_once() {
        let shared = Value::object([("n", Value::from(1_i64))]);
        let root = Value::object([("a", shared.clone()), ("b", shared)]);
        assert_eq!(
            ser(&root),
            "(function(a){a.n=1;return {a:a,b:a}}({}))"
        );
    }

    #[test]
    fn test_cyclic_object() {
        let root = Value::object([("name", Value::from("loop"))]);
        root.as_node().unwrap().insert("self", root.clone());
        assert_eq!(
            ser(&root),
            r#"(function(a){a.name="loop";a.self=a;return a}({}))"#
        );
    }

    #[test]
    fn test_cyclic_array_and_set() {
        let list = Value::array(vec![Value::from(1_i64)]);
        list.as_node().unwrap().push(list.clone());
        assert_eq!(ser(&list), "(function(a){a[0]=1;a[1]=a;return a}(Array(2)))");

        let set = Value::set(Vec::new());
        set.as_node().unwrap().push(set.clone());
        assert_eq!(ser(&set), "(function(a){a.add(a);return a}(new Set))");
    }

    #[test]
    fn test_script_breakout_is_escaped() {
        let value = Value::object([("html", Value::from("</script><script>alert(1)//"))]);
        let out = ser(&value);
        assert!(!out.contains("</script"));
        assert!(out.contains("\\u003C/script>"));
    }

    #[test]
    fn test_unencodable_instance_is_fatal() {
        let value = Value::object([(
            "items",
            Value::array(vec![Value::instance("Vector", [("x", Value::from(1_i64))])]),
        )]);
        let err = serialize(&value, &Transports::new()).unwrap_err();
        match err {
            CoreError::Unserializable { path, reason } => {
                assert_eq!(path, ".items[0]");
                assert!(reason.contains("non-POJOs"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_function_is_fatal() {
        let value = Value::array(vec![Value::Function("onClick".into())]);
        assert!(matches!(
            serialize(&value, &Transports::new()),
            Err(CoreError::Unserializable { .. })
        ));
    }

    #[test]
    fn test_transport_encodes_custom_type() {
        let value = Value::object([("position", vector(1.0, 2.0))]);
        assert_eq!(
            serialize(&value, &vector_transports()).unwrap(),
            r#"{position:app.decode("Vector", [1,2])}"#
        );
    }

    #[test]
    fn test_proto_key_stays_own_property() {
        let value = Value::object([
            ("__proto__", Value::object([("polluted", Value::Bool(true))])),
            ("", Value::from(1_i64)),
            ("123", Value::from(2_i64)),
        ]);
        assert_eq!(ser(&value), r#"{["__proto__"]:{polluted:true},"":1,"123":2}"#);

        let cyclic = Value::object([("name", Value::from("loop"))]);
        cyclic.as_node().unwrap().insert("__proto__", cyclic.clone());
        assert_eq!(
            ser(&cyclic),
            r#"(function(a){a.name="loop";Object.defineProperty(a,"__proto__",{value:a,enumerable:true,configurable:true,writable:true});return a}({}))"#
        );
    }

    #[test]
    fn test_proto_key_in_javascript_engine() {
        let value = Value::object([
            ("__proto__", Value::object([("polluted", Value::Bool(true))])),
            ("", Value::from(1_i64)),
        ]);
        let checks = r#"[Object.hasOwn(value, "__proto__"), Object.getPrototypeOf(value) === Object.prototype, value.polluted === undefined]"#;
        let Some(out) = eval_in_node(&ser(&value), checks) else {
            return;
        };
        assert_eq!(out, "[true,true,true]");

        let cyclic = Value::object([("name", Value::from("loop"))]);
        cyclic.as_node().unwrap().insert("__proto__", cyclic.clone());
        let checks = r#"[Object.hasOwn(value, "__proto__"), value.__proto__ === value, Object.getPrototypeOf(value) === Object.prototype]"#;
        assert_eq!(
            eval_in_node(&ser(&cyclic), checks).unwrap(),
            "[true,true,true]"
        );
    }

    #[test]
    fn test_round_trip_primitives() {
        let values = [
            Value::Undefined,
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::Number(0.0),
            Value::Number(-0.0),
            Value::Number(0.5),
            Value::Number(-0.25),
            Value::Number(42.0),
            Value::Number(123456.789),
            Value::Number(1e21),
            Value::Number(1.5e-7),
            Value::Number(f64::MAX),
            Value::Number(f64::MIN_POSITIVE),
            Value::Number(f64::NAN),
            Value::Number(f64::INFINITY),
            Value::Number(f64::NEG_INFINITY),
            Value::BigInt(-7),
            Value::BigInt(i128::MAX),
            Value::from("quote \" backslash \\ newline \n tab \t"),
            Value::from("</script><!-- \u{2028}\u{2029}"),
            Value::from("\u{0}\u{8}\u{c}\u{1f} 日本語 😀"),
            Value::from(""),
            Value::Date(1_700_000_000_000.0),
            Value::Date(f64::NAN),
            Value::RegExp {
                source: "^a\\.b/$".into(),
                flags: "gi".into(),
            },
        ];
        for value in &values {
            assert_round_trip(value);
        }

        // The reader tells -0 from 0.
        let revived = revive(&ser(&Value::Number(-0.0)), &no_decoders);
        assert!(!same_graph(&Value::Number(0.0), &revived));
    }

    #[test]
    fn test_round_trip_collections() {
        let key = Value::object([("id", Value::from(1_i64))]);
        let value = Value::object([
            (
                "map",
                Value::map(vec![
                    (Value::from("k"), Value::from(1_i64)),
                    (key, Value::from("object key")),
                    (Value::Number(f64::NAN), Value::Null),
                ]),
            ),
            ("set", Value::set(vec![Value::from(1_i64), Value::from("two")])),
            ("empty_map", Value::map(Vec::new())),
            ("empty_set", Value::set(Vec::new())),
            ("empty_array", Value::array(Vec::new())),
            ("empty_object", Value::object(Vec::<(String, Value)>::new())),
            (
                "bytes",
                Value::typed_array(TypedArrayKind::Uint8, vec![0.0, 1.0, 255.0]),
            ),
            (
                "floats",
                Value::typed_array(
                    TypedArrayKind::Float64,
                    vec![-0.0, 0.5, f64::NAN, f64::INFINITY, 1e-300],
                ),
            ),
            ("signed", Value::typed_array(TypedArrayKind::Int16, vec![-32768.0, 7.0])),
            ("type_error", Value::error("TypeError", "bad input")),
            ("http_error", Value::error("HttpError", "not found")),
        ]);
        assert_round_trip(&value);
    }

    #[test]
    fn test_round_trip_shared_and_cyclic() {
        let shared = Value::object([("n", Value::from(1_i64))]);
        let list = Value::array(vec![shared.clone(), Value::from(2_i64)]);
        list.as_node().unwrap().push(list.clone());
        let set = Value::set(vec![shared.clone()]);
        set.as_node().unwrap().push(set.clone());
        let map = Value::map(Vec::new());
        map.as_node().unwrap().set(map.clone(), map.clone());
        map.as_node().unwrap().set(Value::from("shared"), shared.clone());

        let left = Value::object([("name", Value::from("left"))]);
        let right = Value::object([("name", Value::from("right")), ("left", left.clone())]);
        left.as_node().unwrap().insert("right", right.clone());

        let root = Value::object([
            ("a", shared.clone()),
            ("b", shared),
            ("list", list),
            ("set", set),
            ("map", map),
            ("pair", Value::array(vec![left, right])),
        ]);
        root.as_node().unwrap().insert("self", root.clone());

        let source = ser(&root);
        assert!(source.starts_with("(function("));
        assert_round_trip(&root);
    }

    #[test]
    fn test_round_trip_detects_lost_sharing() {
        let shared = Value::object([("n", Value::from(1_i64))]);
        let root = Value::array(vec![shared.clone(), shared]);
        let copies = revive("[{n:1},{n:1}]", &no_decoders);
        assert!(!same_graph(&root, &copies));
        assert_round_trip(&root);
    }

    #[test]
    fn test_round_trip_transported_type() {
        let transports = vector_transports();
        let origin = vector(0.0, -0.0);
        let value = Value::object([
            ("position", vector(1.0, 2.0)),
            ("start", origin.clone()),
            ("end", origin),
        ]);

        let source = serialize(&value, &transports).unwrap();
        let revived = revive(&source, &decode_vector);
        assert!(same_graph(&value, &revived), "{source} did not round-trip");
    }

    #[test]
    fn test_round_trip_unusual_keys() {
        let keys = [
            "__proto__",
            "",
            "123",
            "needs-quotes",
            "constructor",
            "a b",
            "$ok",
            "add",
            "quote\"",
        ];
        let literal = Value::object(keys.iter().map(|k| (*k, Value::from(*k))));
        assert_round_trip(&literal);

        let cyclic = Value::object(keys.iter().map(|k| (*k, Value::from(*k))));
        for key in keys {
            cyclic.as_node().unwrap().insert(format!("{key}_self"), cyclic.clone());
        }
        cyclic.as_node().unwrap().insert("__proto__", cyclic.clone());
        assert_round_trip(&cyclic);
    }

    #[test]
    fn test_round_trip_deferred_placeholders() {
        let transports = Transports::new();
        let value = Value::object([("later", Value::Deferred(1)), ("now", Value::from(1_i64))]);
        let source = Serializer::new(&transports)
            .with_deferred("__sveltekit_abc", 2)
            .serialize(&value)
            .unwrap();
        let revived = revive(&source, &no_decoders);
        assert_eq!(revived.field("later"), Some(Value::Deferred(1)));
    }

    #[test]
    fn test_deferred_requires_global() {
        let value = Value::object([("later", Value::Deferred(3))]);
        assert!(serialize(&value, &Transports::new()).is_err());

        let transports = Transports::new();
        let out = Serializer::new(&transports)
            .with_deferred("__sveltekit_abc", 4)
            .serialize(&value)
            .unwrap();
        assert_eq!(out, "{later:__sveltekit_abc.defer(3)}");
    }

    #[test]
    fn test_unregistered_deferred_id_is_rejected() {
        let transports = Transports::new();
        let value = Value::array(vec![Value::Deferred(0), Value::Deferred(2)]);
        let err = Serializer::new(&transports)
            .with_deferred("__sveltekit_abc", 2)
            .serialize(&value)
            .unwrap_err();
        assert_eq!(err, CoreError::UnknownDeferred(2));
    }

    #[test]
    fn test_names_skip_reserved_words() {
        assert_eq!(name_for(0), "a");
        assert_eq!(name_for(53), "$");
        assert_eq!(name_for(54), "aa");
        // "do" collides with a keyword.
        let idx = NAME_CHARS.iter().position(|&c| c == b'd').unwrap();
        let o = NAME_CHARS.iter().position(|&c| c == b'o').unwrap();
        assert_eq!(name_for((idx + 1) * 54 + o), "do0");
    }

    #[test]
    fn test_names_never_shadow_globals() {
        // Every name of up to three characters.
        let names: Vec<String> = (0..160_434).map(name_for).collect();
        assert!(names.iter().all(|n| !GLOBALS.contains(&n.as_str())));
        assert!(names.iter().any(|n| n == "NaN0"));
        assert!(names.iter().any(|n| n == "app0"));
    }
}
