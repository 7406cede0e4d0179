//! In-memory application values that can be shipped to the browser.
//!
//! Scalars are held inline. Compound values live behind a shared [`Node`]
//! so the same object can appear several times in a graph, including
//! cycles, and still be serialized once.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// An application value destined for the client.
///
/// Equality is structural for scalars and by identity for compound nodes.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i128),
    String(String),
    /// Milliseconds since the epoch.
    Date(f64),
    RegExp {
        source: String,
        flags: String,
    },
    /// A function reference. Never encodable.
    Function(String),
    /// A promise that will be settled later through the deferred channel.
    Deferred(u32),
    Node(Node),
}

/// The element type of a typed array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypedArrayKind {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl TypedArrayKind {
    pub fn constructor(self) -> &'static str {
        match self {
            Self::Int8 => "Int8Array",
            Self::Uint8 => "Uint8Array",
            Self::Uint8Clamped => "Uint8ClampedArray",
            Self::Int16 => "Int16Array",
            Self::Uint16 => "Uint16Array",
            Self::Int32 => "Int32Array",
            Self::Uint32 => "Uint32Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
        }
    }
}

/// The contents of a shared node.
#[derive(Clone, Debug)]
pub enum Compound {
    Array(Vec<Value>),
    /// A plain object; keys keep insertion order.
    Object(Vec<(String, Value)>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    TypedArray {
        kind: TypedArrayKind,
        elements: Vec<f64>,
    },
    /// An error instance. Only the name and message travel, never a stack.
    Error {
        name: String,
        message: String,
    },
    /// An instance of an application class. Only encodable through a
    /// registered transport.
    Instance {
        class: String,
        fields: Vec<(String, Value)>,
    },
}

/// A reference-counted compound value with identity.
#[derive(Clone)]
pub struct Node(Arc<Mutex<Compound>>);

impl Node {
    pub fn new(compound: Compound) -> Self {
        Self(Arc::new(Mutex::new(compound)))
    }

    /// Identity of the node, stable for its lifetime.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Clone the current contents out of the node.
    ///
    /// Traversal works on snapshots so no lock is held while visiting
    /// children, which keeps cyclic graphs from re-entering a lock.
    pub fn snapshot(&self) -> Compound {
        self.lock().clone()
    }

    /// Append an element to an array or set node. Other kinds are left alone.
    pub fn push(&self, value: Value) {
        match &mut *self.lock() {
            Compound::Array(items) | Compound::Set(items) => items.push(value),
            _ => {}
        }
    }

    /// Insert or replace a key on an object node. Other kinds are left alone.
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Compound::Object(entries) = &mut *self.lock() {
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value,
                None => entries.push((key, value)),
            }
        }
    }

    /// Insert or replace an entry on a map node. Keys match by value for
    /// scalars and by identity for nodes. Other kinds are left alone.
    pub fn set(&self, key: Value, value: Value) {
        if let Compound::Map(entries) = &mut *self.lock() {
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value,
                None => entries.push((key, value)),
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Compound> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Node {
    // Contents are omitted: a cyclic node would recurse forever.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({:#x})", self.id())
    }
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Self::Node(Node::new(Compound::Array(items)))
    }

    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let entries = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::Node(Node::new(Compound::Object(entries)))
    }

    pub fn map(entries: Vec<(Value, Value)>) -> Self {
        Self::Node(Node::new(Compound::Map(entries)))
    }

    pub fn set(items: Vec<Value>) -> Self {
        Self::Node(Node::new(Compound::Set(items)))
    }

    pub fn typed_array(kind: TypedArrayKind, elements: Vec<f64>) -> Self {
        Self::Node(Node::new(Compound::TypedArray { kind, elements }))
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Node(Node::new(Compound::Error {
            name: name.into(),
            message: message.into(),
        }))
    }

    pub fn instance<K: Into<String>>(
        class: impl Into<String>,
        fields: impl IntoIterator<Item = (K, Value)>,
    ) -> Self {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::Node(Node::new(Compound::Instance {
            class: class.into(),
            fields,
        }))
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Class name when the value is an application class instance.
    pub fn class_name(&self) -> Option<String> {
        match self.as_node()?.snapshot() {
            Compound::Instance { class, .. } => Some(class),
            _ => None,
        }
    }

    /// Field of an object or instance node, cloned.
    pub fn field(&self, key: &str) -> Option<Value> {
        match self.as_node()?.snapshot() {
            Compound::Object(entries) | Compound::Instance { fields: entries, .. } => entries
                .into_iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Shallow object spread: `{ ...self, ...other }`.
    ///
    /// Anything that is not a plain object contributes no keys.
    pub fn merge(&self, other: &Value) -> Value {
        let mut entries: Vec<(String, Value)> = object_entries(self);
        for (key, value) in object_entries(other) {
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value,
                None => entries.push((key, value)),
            }
        }
        Value::object(entries)
    }
}

fn object_entries(value: &Value) -> Vec<(String, Value)> {
    match value.as_node().map(Node::snapshot) {
        Some(Compound::Object(entries)) => entries,
        _ => Vec::new(),
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::object(map.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}
