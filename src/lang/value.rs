use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Runtime value of a Bigton program.
///
/// Compound values are reference counted. Tuples and strings are
/// immutable; objects and arrays are shared by reference and mutated in
/// place.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    String(Arc<Str>),
    Tuple(Arc<Tuple>),
    Object(Arc<Object>),
    Array(Arc<Array>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Tuple(_) => "tuple",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
        }
    }

    /// `null`, `0`, `0.0` and `NaN` are false; everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0 && !n.is_nan(),
            _ => true,
        }
    }

    pub fn from_bool(b: bool) -> Value {
        Value::Int(b as i64)
    }

    /// Number of leaf values this value contributes to an enclosing tuple.
    pub fn flat_len(&self) -> usize {
        match self {
            Value::Tuple(t) => t.flat_len,
            _ => 1,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Renders the value for log output, eliding nesting deeper than
    /// `max_depth` as `...`.
    pub fn display(&self, max_depth: usize) -> String {
        let mut out = String::new();
        self.write_display(&mut out, max_depth, true);
        out
    }

    fn write_display(&self, out: &mut String, depth: usize, top: bool) {
        if depth == 0 {
            out.push_str("...");
            return;
        }
        match self {
            Value::Null => out.push_str("null"),
            Value::Int(n) => out.push_str(&n.to_string()),
            Value::Float(n) => out.push_str(&format!("{:?}", n)),
            Value::String(s) if top => out.push_str(s.as_str()),
            Value::String(s) => out.push_str(&format!("{:?}", s.as_str())),
            Value::Tuple(t) => {
                out.push('(');
                write_items(out, t.items(), depth);
                out.push(')');
            }
            Value::Object(o) => {
                // snapshot first so nested displays never re-lock `o`
                let values = o.values();
                out.push('{');
                for (i, (name, value)) in o.names().iter().zip(values.iter()).enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(name);
                    out.push_str(" = ");
                    value.write_display(out, depth - 1, false);
                }
                out.push('}');
            }
            Value::Array(a) => {
                let items = a.to_vec();
                out.push('[');
                write_items(out, &items, depth);
                out.push(']');
            }
        }
    }
}

fn write_items(out: &mut String, items: &[Value], depth: usize) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_display(out, depth - 1, false);
    }
}

/// Equality as the language defines it: same type required, strings and
/// tuples compare by content, objects and arrays by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a.as_str() == b.as_str(),
            (Value::Tuple(a), Value::Tuple(b)) => a.items() == b.items(),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display(usize::MAX))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ==== Memory accounting ====

/// Counts the bytes held by the compound values of one VM.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    used: Arc<AtomicUsize>,
}

/// Bytes charged to a `Heap`, released when dropped.
#[derive(Debug)]
pub struct Charge {
    used: Arc<AtomicUsize>,
    bytes: AtomicUsize,
}

impl Charge {
    fn resize(&self, bytes: usize) {
        let old = self.bytes.swap(bytes, Ordering::Relaxed);
        if bytes >= old {
            self.used.fetch_add(bytes - old, Ordering::Relaxed);
        } else {
            self.used.fetch_sub(old - bytes, Ordering::Relaxed);
        }
    }
}

impl Drop for Charge {
    fn drop(&mut self) {
        self.used
            .fetch_sub(*self.bytes.get_mut(), Ordering::Relaxed);
    }
}

pub const VALUE_SIZE: usize = std::mem::size_of::<Value>();

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently held by live values created through this heap.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    fn charge(&self, bytes: usize) -> Charge {
        self.used.fetch_add(bytes, Ordering::Relaxed);
        Charge {
            used: Arc::clone(&self.used),
            bytes: AtomicUsize::new(bytes),
        }
    }

    pub fn string(&self, text: impl Into<Arc<str>>) -> Value {
        let text = text.into();
        let charge = self.charge(std::mem::size_of::<Str>() + text.len());
        Value::String(Arc::new(Str {
            text,
            _charge: Some(charge),
        }))
    }

    pub fn tuple(&self, items: Vec<Value>) -> Value {
        let flat_len = items.iter().map(Value::flat_len).sum();
        let charge = self.charge(std::mem::size_of::<Tuple>() + items.len() * VALUE_SIZE);
        Value::Tuple(Arc::new(Tuple {
            items: items.into_boxed_slice(),
            flat_len,
            _charge: charge,
        }))
    }

    pub fn object(&self, names: Arc<[Arc<str>]>, values: Vec<Value>) -> Value {
        let charge = self.charge(std::mem::size_of::<Object>() + values.len() * VALUE_SIZE);
        Value::Object(Arc::new(Object {
            names,
            values: Mutex::new(values),
            _charge: charge,
        }))
    }

    pub fn array(&self, items: Vec<Value>) -> Value {
        let charge = self.charge(Array::bytes_for(items.capacity()));
        Value::Array(Arc::new(Array {
            items: Mutex::new(items),
            charge,
        }))
    }
}

// ==== Compound values ====

#[derive(Debug)]
pub struct Str {
    text: Arc<str>,
    _charge: Option<Charge>,
}

impl Str {
    /// A string that belongs to the program's string table and is not
    /// charged to any heap.
    pub fn constant(text: Arc<str>) -> Arc<Str> {
        Arc::new(Str {
            text,
            _charge: None,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

#[derive(Debug)]
pub struct Tuple {
    items: Box<[Value]>,
    flat_len: usize,
    _charge: Charge,
}

impl Tuple {
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn flat_len(&self) -> usize {
        self.flat_len
    }
}

/// Member names are fixed at construction; only values may change.
#[derive(Debug)]
pub struct Object {
    names: Arc<[Arc<str>]>,
    values: Mutex<Vec<Value>>,
    _charge: Charge,
}

impl Object {
    pub fn names(&self) -> &[Arc<str>] {
        &self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| &**n == name)
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let idx = self.index_of(name)?;
        lock(&self.values).get(idx).cloned()
    }

    /// Replaces a member's value. Returns `false` if there is no such
    /// member.
    pub fn set(&self, name: &str, value: Value) -> bool {
        let Some(idx) = self.index_of(name) else {
            return false;
        };
        match lock(&self.values).get_mut(idx) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn values(&self) -> Vec<Value> {
        lock(&self.values).clone()
    }
}

#[derive(Debug)]
pub struct Array {
    items: Mutex<Vec<Value>>,
    charge: Charge,
}

impl Array {
    fn bytes_for(capacity: usize) -> usize {
        std::mem::size_of::<Array>() + capacity * VALUE_SIZE
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        lock(&self.items).get(index).cloned()
    }

    pub fn set(&self, index: usize, value: Value) -> bool {
        match lock(&self.items).get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn push(&self, value: Value) {
        let mut items = lock(&self.items);
        items.push(value);
        self.charge.resize(Self::bytes_for(items.capacity()));
    }

    pub fn pop(&self) -> Option<Value> {
        lock(&self.items).pop()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        lock(&self.items).clone()
    }
}
