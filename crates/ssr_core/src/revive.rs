//! Reads serializer output back into a [`Value`].
//!
//! Understands exactly the JavaScript subset the serializer emits, and
//! evaluates it the way a browser would: `Object.defineProperty` and
//! computed keys keep `__proto__` an own property, statements in the
//! wrapping function fill nodes after they are bound.

use std::collections::{HashMap, HashSet};

use crate::value::{Compound, Node, TypedArrayKind, Value};

/// Client-side decoders for transported types.
pub(crate) type Decoder<'a> = &'a dyn Fn(&str, Value) -> Value;

const TYPED_ARRAYS: [TypedArrayKind; 9] = [
    TypedArrayKind::Int8,
    TypedArrayKind::Uint8,
    TypedArrayKind::Uint8Clamped,
    TypedArrayKind::Int16,
    TypedArrayKind::Uint16,
    TypedArrayKind::Int32,
    TypedArrayKind::Uint32,
    TypedArrayKind::Float32,
    TypedArrayKind::Float64,
];

pub(crate) fn revive(source: &str, decode: Decoder<'_>) -> Value {
    let mut reader = Reader {
        src: source,
        pos: 0,
    };
    let ast = reader.expr();
    assert_eq!(reader.pos, source.len(), "trailing input in {source}");
    eval(&ast, &HashMap::new(), decode)
}

/// Structural equality that follows shared references.
///
/// Two graphs match when their nodes pair up one to one, so a node shared
/// or cycled on one side must be shared or cycled the same way on the other.
/// Numbers compare by bit pattern, with every NaN equal.
pub(crate) fn same_graph(a: &Value, b: &Value) -> bool {
    Matcher::default().same(a, b)
}

enum Ast {
    Scalar(Value),
    Array(Vec<Ast>),
    Object(Vec<(String, Ast)>),
    Map(Vec<(Ast, Ast)>),
    Set(Vec<Ast>),
    Typed(TypedArrayKind, Vec<f64>),
    Error { name: String, message: String },
    /// `Array(n)`, filled by index statements.
    Holes(usize),
    EmptySet,
    EmptyMap,
    Decode(String, Box<Ast>),
    Name(String),
    Scope {
        params: Vec<String>,
        statements: Vec<Statement>,
        result: Box<Ast>,
        args: Vec<Ast>,
    },
}

enum Statement {
    Index {
        target: String,
        index: usize,
        value: Ast,
    },
    Prop {
        target: String,
        key: String,
        value: Ast,
    },
    Add {
        target: String,
        items: Vec<Ast>,
    },
    Set {
        target: String,
        entries: Vec<(Ast, Ast)>,
    },
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) {
        assert!(self.eat(token), "expected {token:?} at {:?}", self.rest());
    }

    fn ident(&mut self) -> String {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c == '_' || c == '$' || c.is_ascii_alphanumeric()))
            .unwrap_or(rest.len());
        assert!(len > 0, "expected identifier at {rest:?}");
        self.pos += len;
        rest[..len].to_string()
    }

    fn string(&mut self) -> String {
        self.expect("\"");
        let mut chars = self.rest().char_indices();
        let mut out = String::new();
        loop {
            let (i, c) = chars.next().expect("unterminated string");
            match c {
                '"' => {
                    self.pos += i + 1;
                    return out;
                }
                '\\' => match chars.next().expect("dangling escape").1 {
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    'b' => out.push('\u{08}'),
                    'f' => out.push('\u{0c}'),
                    'u' => {
                        let hex: String = (0..4)
                            .map(|_| chars.next().expect("short unicode escape").1)
                            .collect();
                        let code = u32::from_str_radix(&hex, 16).expect("hex escape");
                        out.push(char::from_u32(code).expect("scalar value"));
                    }
                    other => out.push(other),
                },
                c => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Value {
        let negative = self.eat("-");
        let sign = if negative { -1.0 } else { 1.0 };
        if self.eat("Infinity") {
            return Value::Number(sign * f64::INFINITY);
        }
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | 'e' | '+' | '-')))
            .unwrap_or(rest.len());
        let text = &rest[..len];
        self.pos += len;
        if self.eat("n") {
            let n: i128 = text.parse().expect("bigint literal");
            return Value::BigInt(if negative { -n } else { n });
        }
        let n: f64 = text
            .parse()
            .unwrap_or_else(|_| panic!("bad number literal {text:?}"));
        Value::Number(sign * n)
    }

    fn index(&mut self) -> usize {
        match self.number() {
            Value::Number(n) if n >= 0.0 && n.fract() == 0.0 => n as usize,
            other => panic!("expected an index, got {other:?}"),
        }
    }

    fn list(&mut self, close: &str) -> Vec<Ast> {
        let mut items = Vec::new();
        if self.eat(close) {
            return items;
        }
        loop {
            items.push(self.expr());
            if self.eat(close) {
                return items;
            }
            self.expect(",");
        }
    }

    fn expr(&mut self) -> Ast {
        if self.eat("(function(") {
            return self.scope();
        }
        match self.peek() {
            Some('"') => return Ast::Scalar(Value::String(self.string())),
            Some('[') => {
                self.pos += 1;
                return Ast::Array(self.list("]"));
            }
            Some('{') => return self.object(),
            Some(c) if c == '-' || c == '.' || c.is_ascii_digit() => {
                return Ast::Scalar(self.number())
            }
            _ => {}
        }

        let ident = self.ident();
        match ident.as_str() {
            "void" => {
                self.expect(" 0");
                Ast::Scalar(Value::Undefined)
            }
            "null" => Ast::Scalar(Value::Null),
            "true" => Ast::Scalar(Value::Bool(true)),
            "false" => Ast::Scalar(Value::Bool(false)),
            "NaN" => Ast::Scalar(Value::Number(f64::NAN)),
            "Infinity" => Ast::Scalar(Value::Number(f64::INFINITY)),
            "new" => {
                self.expect(" ");
                self.construct()
            }
            "Array" => {
                self.expect("(");
                let len = self.index();
                self.expect(")");
                Ast::Holes(len)
            }
            "Object" => {
                self.expect(".assign(new Error(");
                let message = self.string();
                self.expect("),{name:");
                let name = self.string();
                self.expect("})");
                Ast::Error { name, message }
            }
            "app" => {
                self.expect(".decode(");
                let name = self.string();
                self.expect(", ");
                let inner = self.expr();
                self.expect(")");
                Ast::Decode(name, Box::new(inner))
            }
            _ if self.eat(".defer(") => {
                let id = self.index();
                self.expect(")");
                Ast::Scalar(Value::Deferred(id as u32))
            }
            _ => Ast::Name(ident),
        }
    }

    fn construct(&mut self) -> Ast {
        let ctor = self.ident();
        match ctor.as_str() {
            "Map" if self.eat("([") => {
                let entries = self
                    .list("])")
                    .into_iter()
                    .map(|pair| match pair {
                        Ast::Array(mut kv) if kv.len() == 2 => {
                            let value = kv.pop().expect("value");
                            let key = kv.pop().expect("key");
                            (key, value)
                        }
                        _ => panic!("map entry is not a pair"),
                    })
                    .collect();
                Ast::Map(entries)
            }
            "Map" => Ast::EmptyMap,
            "Set" if self.eat("([") => Ast::Set(self.list("])")),
            "Set" => Ast::EmptySet,
            "Date" => {
                self.expect("(");
                let ms = number_of(self.expr());
                self.expect(")");
                Ast::Scalar(Value::Date(ms))
            }
            "RegExp" => {
                self.expect("(");
                let source = self.string();
                self.expect(", ");
                let flags = self.string();
                self.expect(")");
                Ast::Scalar(Value::RegExp { source, flags })
            }
            name if name.ends_with("Error") => {
                self.expect("(");
                let message = self.string();
                self.expect(")");
                Ast::Error {
                    name: name.to_string(),
                    message,
                }
            }
            name => {
                let kind = TYPED_ARRAYS
                    .into_iter()
                    .find(|kind| kind.constructor() == name)
                    .unwrap_or_else(|| panic!("unknown constructor {name}"));
                self.expect("([");
                let elements = self.list("])").into_iter().map(number_of).collect();
                Ast::Typed(kind, elements)
            }
        }
    }

    fn object(&mut self) -> Ast {
        self.expect("{");
        let mut entries = Vec::new();
        if self.eat("}") {
            return Ast::Object(entries);
        }
        loop {
            let key = if self.eat("[") {
                let key = self.string();
                self.expect("]");
                key
            } else if self.peek() == Some('"') {
                self.string()
            } else {
                self.ident()
            };
            self.expect(":");
            entries.push((key, self.expr()));
            if self.eat("}") {
                return Ast::Object(entries);
            }
            self.expect(",");
        }
    }

    fn scope(&mut self) -> Ast {
        let mut params = Vec::new();
        loop {
            params.push(self.ident());
            if self.eat("){") {
                break;
            }
            self.expect(",");
        }
        let mut statements = Vec::new();
        while !self.eat("return ") {
            statements.push(self.statement());
            self.expect(";");
        }
        let result = Box::new(self.expr());
        self.expect("}(");
        let args = self.list("))");
        assert_eq!(params.len(), args.len(), "parameter count");
        Ast::Scope {
            params,
            statements,
            result,
            args,
        }
    }

    fn statement(&mut self) -> Statement {
        let target = self.ident();
        if target == "Object" {
            self.expect(".defineProperty(");
            let target = self.ident();
            self.expect(",");
            let key = self.string();
            self.expect(",{value:");
            let value = self.expr();
            self.expect(",enumerable:true,configurable:true,writable:true})");
            return Statement::Prop { target, key, value };
        }
        if self.eat("[") {
            if self.peek() == Some('"') {
                let key = self.string();
                self.expect("]=");
                return Statement::Prop {
                    target,
                    key,
                    value: self.expr(),
                };
            }
            let index = self.index();
            self.expect("]=");
            return Statement::Index {
                target,
                index,
                value: self.expr(),
            };
        }

        self.expect(".");
        if self.eat("add(") {
            let mut items = Vec::new();
            loop {
                items.push(self.expr());
                self.expect(")");
                if !self.eat(".add(") {
                    return Statement::Add { target, items };
                }
            }
        }
        if self.eat("set(") {
            let mut entries = Vec::new();
            loop {
                let key = self.expr();
                self.expect(", ");
                entries.push((key, self.expr()));
                self.expect(")");
                if !self.eat(".set(") {
                    return Statement::Set { target, entries };
                }
            }
        }
        let key = self.ident();
        self.expect("=");
        Statement::Prop {
            target,
            key,
            value: self.expr(),
        }
    }
}

fn number_of(ast: Ast) -> f64 {
    match ast {
        Ast::Scalar(Value::Number(n)) => n,
        _ => panic!("expected a number"),
    }
}

fn eval(ast: &Ast, scope: &HashMap<String, Value>, decode: Decoder<'_>) -> Value {
    let all = |items: &[Ast]| -> Vec<Value> { items.iter().map(|i| eval(i, scope, decode)).collect() };
    match ast {
        Ast::Scalar(value) => value.clone(),
        Ast::Array(items) => Value::array(all(items)),
        Ast::Object(entries) => Value::object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), eval(value, scope, decode))),
        ),
        Ast::Map(entries) => Value::map(
            entries
                .iter()
                .map(|(k, v)| (eval(k, scope, decode), eval(v, scope, decode)))
                .collect(),
        ),
        Ast::Set(items) => Value::set(all(items)),
        Ast::Typed(kind, elements) => Value::typed_array(*kind, elements.clone()),
        Ast::Error { name, message } => Value::error(name.clone(), message.clone()),
        Ast::Holes(_) => Value::array(Vec::new()),
        Ast::EmptySet => Value::set(Vec::new()),
        Ast::EmptyMap => Value::map(Vec::new()),
        Ast::Decode(name, inner) => decode(name, eval(inner, scope, decode)),
        Ast::Name(name) => scope
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("unbound name {name}")),
        Ast::Scope {
            params,
            statements,
            result,
            args,
        } => {
            let bound: HashMap<String, Value> = params
                .iter()
                .cloned()
                .zip(args.iter().map(|arg| eval(arg, scope, decode)))
                .collect();
            for statement in statements {
                run(statement, &bound, decode);
            }
            let value = eval(result, &bound, decode);
            for (param, arg) in params.iter().zip(args) {
                if let Ast::Holes(len) = arg {
                    assert_eq!(array_len(&bound[param]), *len, "{param} left holes");
                }
            }
            value
        }
    }
}

fn run(statement: &Statement, scope: &HashMap<String, Value>, decode: Decoder<'_>) {
    let node = |target: &str| -> Node {
        scope
            .get(target)
            .and_then(Value::as_node)
            .cloned()
            .unwrap_or_else(|| panic!("{target} is not a bound node"))
    };
    match statement {
        Statement::Index {
            target,
            index,
            value,
        } => {
            let node = node(target);
            let value = eval(value, scope, decode);
            assert_eq!(
                array_len(&Value::Node(node.clone())),
                *index,
                "{target} filled out of order"
            );
            node.push(value);
        }
        Statement::Prop { target, key, value } => {
            node(target).insert(key.clone(), eval(value, scope, decode));
        }
        Statement::Add { target, items } => {
            let node = node(target);
            for item in items {
                node.push(eval(item, scope, decode));
            }
        }
        Statement::Set { target, entries } => {
            let node = node(target);
            for (key, value) in entries {
                node.set(eval(key, scope, decode), eval(value, scope, decode));
            }
        }
    }
}

fn array_len(value: &Value) -> usize {
    match value.as_node().map(Node::snapshot) {
        Some(Compound::Array(items)) => items.len(),
        _ => panic!("expected an array node"),
    }
}

#[derive(Default)]
struct Matcher {
    pairs: HashMap<usize, usize>,
    claimed: HashSet<usize>,
}

impl Matcher {
    fn same(&mut self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) | (Value::Date(x), Value::Date(y)) => {
                same_number(*x, *y)
            }
            (Value::Node(x), Value::Node(y)) => {
                if let Some(&paired) = self.pairs.get(&x.id()) {
                    return paired == y.id();
                }
                if !self.claimed.insert(y.id()) {
                    return false;
                }
                self.pairs.insert(x.id(), y.id());
                self.same_compound(&x.snapshot(), &y.snapshot())
            }
            _ => a == b,
        }
    }

    fn same_list(&mut self, a: &[Value], b: &[Value]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.same(x, y))
    }

    fn same_entries(&mut self, a: &[(String, Value)], b: &[(String, Value)]) -> bool {
        a.len() == b.len()
            && a
                .iter()
                .zip(b)
                .all(|((ka, va), (kb, vb))| ka == kb && self.same(va, vb))
    }

    fn same_compound(&mut self, a: &Compound, b: &Compound) -> bool {
        match (a, b) {
            (Compound::Array(x), Compound::Array(y)) | (Compound::Set(x), Compound::Set(y)) => {
                self.same_list(x, y)
            }
            (Compound::Object(x), Compound::Object(y)) => self.same_entries(x, y),
            (
                Compound::Instance {
                    class: cx,
                    fields: x,
                },
                Compound::Instance {
                    class: cy,
                    fields: y,
                },
            ) => cx == cy && self.same_entries(x, y),
            (Compound::Map(x), Compound::Map(y)) => {
                x.len() == y.len()
                    && x
                        .iter()
                        .zip(y)
                        .all(|((kx, vx), (ky, vy))| self.same(kx, ky) && self.same(vx, vy))
            }
            (
                Compound::TypedArray {
                    kind: kx,
                    elements: x,
                },
                Compound::TypedArray {
                    kind: ky,
                    elements: y,
                },
            ) => {
                kx == ky
                    && x.len() == y.len()
                    && x.iter().zip(y).all(|(p, q)| same_number(*p, *q))
            }
            (
                Compound::Error {
                    name: nx,
                    message: mx,
                },
                Compound::Error {
                    name: ny,
                    message: my,
                },
            ) => nx == ny && mx == my,
            _ => false,
        }
    }
}

fn same_number(x: f64, y: f64) -> bool {
    x.to_bits() == y.to_bits() || (x.is_nan() && y.is_nan())
}
