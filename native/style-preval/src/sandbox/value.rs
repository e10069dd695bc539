//! Runtime values of the sandbox interpreter.

use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::env::Env;
use super::interp::{Flow, Interpreter};
use super::regexp::JsRegExp;
use super::LazyValue;
use crate::ast::{Pattern, Expr, Stmt};
use crate::classify::string_to_number;
use crate::printer::number_to_string;

pub type ObjRef = Rc<RefCell<Object>>;

/// Host function: `(interpreter, this, arguments)`.
pub type NativeFn = Rc<dyn Fn(&mut Interpreter, Value, Vec<Value>) -> Result<Value, Flow>>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(Rc<str>),
    Object(ObjRef),
}

pub struct Object {
    pub kind: ObjectKind,
    pub props: IndexMap<String, Value>,
    pub accessors: IndexMap<String, Accessor>,
    pub proto: Option<ObjRef>,
}

/// Getter and setter behind one key. A key lives in `props` or in
/// `accessors`, never both.
#[derive(Clone, Default)]
pub struct Accessor {
    pub get: Option<Value>,
    pub set: Option<Value>,
}

pub enum ObjectKind {
    Plain,
    Array(Vec<Value>),
    Function(Callable),
    Error,
    Promise(Settled),
    RegExp(Rc<JsRegExp>),
}

/// Promises settle synchronously in the sandbox.
#[derive(Clone)]
pub enum Settled {
    Fulfilled(Value),
    Rejected(Value),
}

#[derive(Clone)]
pub enum Callable {
    Closure(Rc<Closure>),
    Native { name: Rc<str>, func: NativeFn },
    Bound {
        target: ObjRef,
        this: Value,
        args: Vec<Value>,
    },
    /// Stands in for a declaration the sandbox cannot run. Calling it or
    /// reading from it throws.
    Unsupported { name: Rc<str>, what: &'static str },
}

pub enum FunctionBody {
    Block(Vec<Stmt>),
    Expr(Expr),
}

pub struct Closure {
    pub name: String,
    pub params: Vec<Pattern>,
    pub body: FunctionBody,
    pub env: Env,
    pub is_arrow: bool,
    pub is_async: bool,
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Num(n) => write!(f, "{}", number_to_string(*n)),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(_) => write!(f, "{}", self.to_js_string()),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTRUCTION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn alloc(kind: ObjectKind, proto: Option<ObjRef>) -> ObjRef {
    Rc::new(RefCell::new(Object {
        kind,
        props: IndexMap::new(),
        accessors: IndexMap::new(),
        proto,
    }))
}

impl Value {
    pub fn object(props: impl IntoIterator<Item = (String, Value)>) -> Value {
        let obj = alloc(ObjectKind::Plain, None);
        obj.borrow_mut().props.extend(props);
        Value::Object(obj)
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Object(alloc(ObjectKind::Array(items), None))
    }

    pub fn native(
        name: &str,
        func: impl Fn(&mut Interpreter, Value, Vec<Value>) -> Result<Value, Flow> + 'static,
    ) -> Value {
        Value::Object(alloc(
            ObjectKind::Function(Callable::Native {
                name: Rc::from(name),
                func: Rc::new(func),
            }),
            None,
        ))
    }

    pub fn error(name: &str, message: &str) -> Value {
        let obj = alloc(ObjectKind::Error, None);
        {
            let mut o = obj.borrow_mut();
            o.props.insert("name".into(), Value::from(name));
            o.props.insert("message".into(), Value::from(message));
            o.props
                .insert("stack".into(), Value::from(format!("{}: {}", name, message)));
        }
        Value::Object(obj)
    }

    pub fn promise(state: Settled) -> Value {
        Value::Object(alloc(ObjectKind::Promise(state), None))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INSPECTION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Object(obj) if matches!(obj.borrow().kind, ObjectKind::Function(_)))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Object(obj) if matches!(obj.borrow().kind, ObjectKind::Array(_)))
    }

    /// Elements when this is an array.
    pub fn array_items(&self) -> Option<Vec<Value>> {
        match self {
            Value::Object(obj) => match &obj.borrow().kind {
                ObjectKind::Array(items) => Some(items.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Object(obj) => match obj.borrow().kind {
                ObjectKind::Function(_) => "function",
                _ => "object",
            },
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Num(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Object(_) => string_to_number(&self.to_js_string()),
        }
    }

    /// `ToString` without invoking user code.
    pub fn to_js_string(&self) -> String {
        self.to_js_string_depth(0)
    }

    fn to_js_string_depth(&self, depth: usize) -> String {
        match self {
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => number_to_string(*n),
            Value::Str(s) => s.to_string(),
            Value::Object(obj) => {
                let obj = obj.borrow();
                match &obj.kind {
                    ObjectKind::Array(items) => {
                        if depth > 16 {
                            return String::new();
                        }
                        items
                            .iter()
                            .map(|item| match item {
                                Value::Undefined | Value::Null => String::new(),
                                other => other.to_js_string_depth(depth + 1),
                            })
                            .collect::<Vec<_>>()
                            .join(",")
                    }
                    ObjectKind::Error => {
                        let name = obj.props.get("name").map(|v| v.to_js_string());
                        let message = obj.props.get("message").map(|v| v.to_js_string());
                        match (name, message) {
                            (Some(name), Some(message)) if !message.is_empty() => {
                                format!("{}: {}", name, message)
                            }
                            (Some(name), _) => name,
                            (None, _) => "Error".into(),
                        }
                    }
                    ObjectKind::Function(callable) => {
                        format!("function {}() {{ [native code] }}", callable_name(callable))
                    }
                    ObjectKind::Promise(_) => "[object Promise]".into(),
                    ObjectKind::RegExp(re) => format!("/{}/{}", re.source, re.flags),
                    ObjectKind::Plain => "[object Object]".into(),
                }
            }
        }
    }

    /// Property key for `obj[key]`.
    pub fn to_property_key(&self) -> String {
        self.to_js_string()
    }

    /// Export into plain data for the compiler side.
    pub fn to_lazy(&self) -> LazyValue {
        self.to_lazy_depth(0)
    }

    fn to_lazy_depth(&self, depth: usize) -> LazyValue {
        if depth > 32 {
            return LazyValue::Undefined;
        }
        match self {
            Value::Undefined => LazyValue::Undefined,
            Value::Null => LazyValue::Null,
            Value::Bool(b) => LazyValue::Bool(*b),
            Value::Num(n) => LazyValue::Num(*n),
            Value::Str(s) => LazyValue::Str(s.to_string()),
            Value::Object(obj) => {
                let obj = obj.borrow();
                match &obj.kind {
                    ObjectKind::Array(items) => LazyValue::Array(
                        items.iter().map(|v| v.to_lazy_depth(depth + 1)).collect(),
                    ),
                    ObjectKind::Function(_) => LazyValue::Function,
                    ObjectKind::Error => LazyValue::Error {
                        name: obj
                            .props
                            .get("name")
                            .map(|v| v.to_js_string())
                            .unwrap_or_else(|| "Error".into()),
                        message: obj
                            .props
                            .get("message")
                            .map(|v| v.to_js_string())
                            .unwrap_or_default(),
                    },
                    ObjectKind::Promise(_) | ObjectKind::RegExp(_) | ObjectKind::Plain => LazyValue::Object(
                        obj.props
                            .iter()
                            .map(|(k, v)| (k.clone(), v.to_lazy_depth(depth + 1)))
                            .collect(),
                    ),
                }
            }
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s.as_str()),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v))),
            ),
        }
    }
}

pub fn callable_name(callable: &Callable) -> String {
    match callable {
        Callable::Closure(closure) => closure.name.clone(),
        Callable::Native { name, .. } | Callable::Unsupported { name, .. } => name.to_string(),
        Callable::Bound { target, .. } => match &target.borrow().kind {
            ObjectKind::Function(inner) => format!("bound {}", callable_name(inner)),
            _ => "bound".into(),
        },
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EQUALITY
// ═══════════════════════════════════════════════════════════════════════════════

pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Num(x), Value::Num(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

pub fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Object(_), Value::Object(_)) => strict_equals(a, b),
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Object(_), Value::Str(_)) | (Value::Str(_), Value::Object(_)) => {
            a.to_js_string() == b.to_js_string()
        }
        _ => a.to_number() == b.to_number(),
    }
}

/// `Object.is`.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Num(x), Value::Num(y)) => {
            (x.is_nan() && y.is_nan()) || (x == y && x.is_sign_negative() == y.is_sign_negative())
        }
        _ => strict_equals(a, b),
    }
}

/// Canonical array index of a property key.
pub fn array_index(key: &str) -> Option<usize> {
    let idx: usize = key.parse().ok()?;
    (idx.to_string() == key).then_some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_string_conversions() {
        assert_eq!(Value::from(3.0).to_js_string(), "3");
        assert_eq!(
            Value::array(vec![Value::from(1.0), Value::Null, Value::from("a")]).to_js_string(),
            "1,,a"
        );
        assert_eq!(Value::object([]).to_js_string(), "[object Object]");
        assert_eq!(Value::error("TypeError", "boom").to_js_string(), "TypeError: boom");
    }

    #[test]
    fn test_equality() {
        assert!(loose_equals(&Value::Null, &Value::Undefined));
        assert!(loose_equals(&Value::from("1"), &Value::from(1.0)));
        assert!(!strict_equals(&Value::from("1"), &Value::from(1.0)));
        assert!(!strict_equals(&Value::from(f64::NAN), &Value::from(f64::NAN)));
        assert!(same_value(&Value::from(f64::NAN), &Value::from(f64::NAN)));
        let obj = Value::object([]);
        assert!(strict_equals(&obj, &obj.clone()));
        assert!(!strict_equals(&obj, &Value::object([])));
    }

    #[test]
    fn test_to_lazy() {
        let value = Value::object([
            ("a".to_string(), Value::from(1.0)),
            ("b".to_string(), Value::array(vec![Value::from("x")])),
        ]);
        assert_eq!(
            value.to_lazy(),
            LazyValue::Object(vec![
                ("a".into(), LazyValue::Num(1.0)),
                ("b".into(), LazyValue::Array(vec![LazyValue::Str("x".into())])),
            ])
        );
    }

    #[test]
    fn test_array_index() {
        assert_eq!(array_index("0"), Some(0));
        assert_eq!(array_index("12"), Some(12));
        assert_eq!(array_index("01"), None);
        assert_eq!(array_index("length"), None);
    }
}
