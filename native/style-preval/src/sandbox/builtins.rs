//! The restricted global surface of the sandbox.
//!
//! Only what build-time style code reasonably touches is provided. Process
//! control, timers and platform modules are mocked or rejected.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::cell::RefCell;
use std::rc::Rc;

use super::env::Env;
use super::interp::{
    own_keys, promise_resolve, promise_state, set_own, throw,
    Completion, Flow, Interpreter,
};
use super::regexp::{self, regexp_of};
use super::resolve::normalize;
use super::value::*;
use crate::classify::{string_to_number, to_int32};
use crate::options::PrevalOptions;
use crate::printer::number_to_string;

/// Prototype objects consulted when a value has no own property.
pub struct Intrinsics {
    pub object: ObjRef,
    pub function: ObjRef,
    pub array: ObjRef,
    pub string: ObjRef,
    pub number: ObjRef,
    pub promise: ObjRef,
    pub error: ObjRef,
    pub regexp: ObjRef,
}

impl Intrinsics {
    pub fn for_kind(&self, kind: &ObjectKind) -> &ObjRef {
        match kind {
            ObjectKind::Plain => &self.object,
            ObjectKind::Array(_) => &self.array,
            ObjectKind::Function(_) => &self.function,
            ObjectKind::Error => &self.error,
            ObjectKind::Promise(_) => &self.promise,
            ObjectKind::RegExp(_) => &self.regexp,
        }
    }
}

/// Longest string `repeat` and the pad methods will build.
const MAX_STRING_LENGTH: usize = 1 << 28;

pub(super) fn arg(args: &[Value], idx: usize) -> Value {
    args.get(idx).cloned().unwrap_or_default()
}

pub(super) fn method<F>(target: &ObjRef, name: &str, func: F)
where
    F: Fn(&mut Interpreter, Value, Vec<Value>) -> Completion + 'static,
{
    target
        .borrow_mut()
        .props
        .insert(name.to_string(), Value::native(name, func));
}

fn constant(target: &ObjRef, name: &str, value: Value) {
    target.borrow_mut().props.insert(name.to_string(), value);
}

fn object_ref(value: &Value) -> ObjRef {
    match value {
        Value::Object(obj) => obj.clone(),
        _ => alloc(ObjectKind::Plain, None),
    }
}

/// Install the globals into `globals` and return the prototype objects.
pub fn install(globals: &Env, options: &PrevalOptions) -> Intrinsics {
    let intrinsics = Intrinsics {
        object: object_prototype(),
        function: function_prototype(),
        array: array_prototype(),
        string: string_prototype(),
        number: number_prototype(),
        promise: promise_prototype(),
        error: error_prototype(),
        regexp: regexp::prototype(),
    };

    let mut names: Vec<(&str, Value)> = vec![
        ("undefined", Value::Undefined),
        ("NaN", Value::Num(f64::NAN)),
        ("Infinity", Value::Num(f64::INFINITY)),
        ("Object", object_constructor()),
        ("Function", function_constructor()),
        ("Array", array_constructor()),
        ("String", string_constructor()),
        ("Number", number_constructor()),
        ("Boolean", Value::native("Boolean", |_, _, args| {
            Ok(Value::Bool(arg(&args, 0).truthy()))
        })),
        ("Math", math()),
        ("JSON", json()),
        ("Promise", promise_constructor()),
        ("RegExp", regexp::constructor()),
        ("console", console()),
        ("process", process(options)),
        ("parseInt", Value::native("parseInt", |_, _, args| {
            Ok(Value::Num(parse_int(&arg(&args, 0).to_js_string(), arg(&args, 1))))
        })),
        ("parseFloat", Value::native("parseFloat", |_, _, args| {
            Ok(Value::Num(parse_float(&arg(&args, 0).to_js_string())))
        })),
        ("isNaN", Value::native("isNaN", |_, _, args| {
            Ok(Value::Bool(arg(&args, 0).to_number().is_nan()))
        })),
        ("isFinite", Value::native("isFinite", |_, _, args| {
            Ok(Value::Bool(arg(&args, 0).to_number().is_finite()))
        })),
        ("encodeURIComponent", Value::native("encodeURIComponent", |_, _, args| {
            Ok(Value::from(encode_uri_component(&arg(&args, 0).to_js_string())))
        })),
    ];
    for name in [
        "Error",
        "TypeError",
        "RangeError",
        "SyntaxError",
        "ReferenceError",
    ] {
        names.push((name, error_constructor(name)));
    }
    for name in [
        "setTimeout",
        "setInterval",
        "setImmediate",
        "clearTimeout",
        "clearInterval",
        "clearImmediate",
        "queueMicrotask",
    ] {
        names.push((name, Value::native(name, |_, _, _| Ok(Value::Undefined))));
    }

    let global_this = Value::object(
        names
            .iter()
            .filter(|(name, _)| !matches!(*name, "undefined" | "NaN" | "Infinity"))
            .map(|(name, value)| (name.to_string(), value.clone())),
    );
    names.push(("globalThis", global_this));

    for (name, value) in names {
        globals.declare(name, Some(value), false);
    }
    intrinsics
}

// ═══════════════════════════════════════════════════════════════════════════════
// OBJECT & FUNCTION
// ═══════════════════════════════════════════════════════════════════════════════

fn object_prototype() -> ObjRef {
    let proto = alloc(ObjectKind::Plain, None);
    method(&proto, "hasOwnProperty", |_, this, args| {
        let key = arg(&args, 0).to_property_key();
        Ok(Value::Bool(own_keys(&this).contains(&key)))
    });
    method(&proto, "toString", |_, this, _| {
        Ok(Value::from(match &this {
            Value::Object(obj) if matches!(obj.borrow().kind, ObjectKind::Plain) => {
                "[object Object]".to_string()
            }
            other => other.to_js_string(),
        }))
    });
    method(&proto, "valueOf", |_, this, _| Ok(this));
    proto
}

fn object_constructor() -> Value {
    let ctor = Value::native("Object", |_, _, args| {
        let value = arg(&args, 0);
        Ok(if value.is_nullish() { Value::object([]) } else { value })
    });
    let obj = object_ref(&ctor);

    method(&obj, "keys", |_, _, args| {
        Ok(Value::array(own_keys(&arg(&args, 0)).into_iter().map(Value::from).collect()))
    });
    method(&obj, "values", |interp, _, args| {
        Ok(Value::array(interp.entries(&arg(&args, 0))?.into_iter().map(|(_, v)| v).collect()))
    });
    method(&obj, "entries", |interp, _, args| {
        Ok(Value::array(
            interp
                .entries(&arg(&args, 0))?
                .into_iter()
                .map(|(k, v)| Value::array(vec![Value::from(k), v]))
                .collect(),
        ))
    });
    method(&obj, "assign", |interp, _, args| {
        let target = arg(&args, 0);
        for source in args.iter().skip(1) {
            for (key, value) in interp.entries(source)? {
                interp.set_property(&target, &key, value)?;
            }
        }
        Ok(target)
    });
    method(&obj, "freeze", |_, _, args| Ok(arg(&args, 0)));
    method(&obj, "isFrozen", |_, _, _| Ok(Value::Bool(false)));
    method(&obj, "create", |_, _, args| {
        let proto = match arg(&args, 0) {
            Value::Object(obj) => Some(obj),
            Value::Null => None,
            _ => return throw("TypeError", "Object prototype may only be an Object or null"),
        };
        Ok(Value::Object(alloc(ObjectKind::Plain, proto)))
    });
    method(&obj, "getPrototypeOf", |interp, _, args| {
        Ok(match arg(&args, 0) {
            Value::Object(obj) => {
                let proto = obj.borrow().proto.clone();
                Value::Object(proto.unwrap_or_else(|| interp.intrinsics.for_kind(&obj.borrow().kind).clone()))
            }
            _ => Value::Null,
        })
    });
    method(&obj, "fromEntries", |interp, _, args| {
        let out = Value::object([]);
        for entry in interp.iterate(&arg(&args, 0))? {
            let key = interp.get_property(&entry, "0")?.to_property_key();
            let value = interp.get_property(&entry, "1")?;
            interp.set_property(&out, &key, value)?;
        }
        Ok(out)
    });
    method(&obj, "defineProperty", |interp, _, args| {
        let target = arg(&args, 0);
        let key = arg(&args, 1).to_property_key();
        let descriptor = arg(&args, 2);
        let getter = interp.get_property(&descriptor, "get")?;
        let setter = interp.get_property(&descriptor, "set")?;
        match &target {
            Value::Object(obj) if getter.is_callable() || setter.is_callable() => {
                let mut o = obj.borrow_mut();
                o.props.shift_remove(&key);
                o.accessors.insert(
                    key,
                    Accessor {
                        get: getter.is_callable().then_some(getter),
                        set: setter.is_callable().then_some(setter),
                    },
                );
            }
            _ => {
                let value = interp.get_property(&descriptor, "value")?;
                interp.set_property(&target, &key, value)?;
            }
        }
        Ok(target)
    });
    method(&obj, "hasOwn", |_, _, args| {
        let key = arg(&args, 1).to_property_key();
        Ok(Value::Bool(own_keys(&arg(&args, 0)).contains(&key)))
    });
    method(&obj, "is", |_, _, args| {
        Ok(Value::Bool(same_value(&arg(&args, 0), &arg(&args, 1))))
    });
    ctor
}

fn function_prototype() -> ObjRef {
    let proto = alloc(ObjectKind::Plain, None);
    method(&proto, "call", |interp, this, args| {
        let mut args = args.into_iter();
        let this_arg = args.next().unwrap_or_default();
        interp.call(&this, this_arg, args.collect())
    });
    method(&proto, "apply", |interp, this, args| {
        let list = match arg(&args, 1) {
            Value::Undefined | Value::Null => Vec::new(),
            other => interp.iterate(&other)?,
        };
        interp.call(&this, arg(&args, 0), list)
    });
    method(&proto, "bind", |_, this, args| {
        let Value::Object(target) = this else {
            return throw("TypeError", "Bind must be called on a function");
        };
        let mut args = args.into_iter();
        let bound_this = args.next().unwrap_or_default();
        Ok(Value::Object(alloc(
            ObjectKind::Function(Callable::Bound {
                target,
                this: bound_this,
                args: args.collect(),
            }),
            None,
        )))
    });
    method(&proto, "toString", |_, this, _| Ok(Value::from(this.to_js_string())));
    proto
}

fn function_constructor() -> Value {
    Value::native("Function", |_, _, _| {
        throw("EvalError", "Code generation from strings is not supported in the sandbox")
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// ARRAY
// ═══════════════════════════════════════════════════════════════════════════════

fn this_array(this: &Value) -> Completion<ObjRef> {
    match this {
        Value::Object(obj) if matches!(obj.borrow().kind, ObjectKind::Array(_)) => Ok(obj.clone()),
        _ => throw("TypeError", "Array.prototype method called on a non-array"),
    }
}

fn items(obj: &ObjRef) -> Vec<Value> {
    match &obj.borrow().kind {
        ObjectKind::Array(items) => items.clone(),
        _ => Vec::new(),
    }
}

fn with_items<R>(obj: &ObjRef, f: impl FnOnce(&mut Vec<Value>) -> R) -> Option<R> {
    match &mut obj.borrow_mut().kind {
        ObjectKind::Array(items) => Some(f(items)),
        _ => None,
    }
}

/// Relative index argument clamped into `0..=len`.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn callback(args: &[Value]) -> Completion<Value> {
    let func = arg(args, 0);
    if !func.is_callable() {
        return throw("TypeError", format!("{} is not a function", func.to_js_string()));
    }
    Ok(func)
}

fn call_each(
    interp: &mut Interpreter,
    this: &Value,
    args: &[Value],
) -> Completion<Vec<(Value, Value)>> {
    let obj = this_array(this)?;
    let func = callback(args)?;
    let mut out = Vec::new();
    for (idx, item) in items(&obj).into_iter().enumerate() {
        let result = interp.call(
            &func,
            arg(args, 1),
            vec![item.clone(), Value::Num(idx as f64), this.clone()],
        )?;
        out.push((item, result));
    }
    Ok(out)
}

fn flatten_into(out: &mut Vec<Value>, items: Vec<Value>, depth: f64) {
    for item in items {
        match item.array_items() {
            Some(inner) if depth >= 1.0 => flatten_into(out, inner, depth - 1.0),
            _ => out.push(item),
        }
    }
}

/// Stable insertion sort; the comparator may throw.
fn sort_values(
    interp: &mut Interpreter,
    values: &mut [Value],
    comparator: &Value,
) -> Completion<()> {
    for i in 1..values.len() {
        let mut j = i;
        while j > 0 {
            let ordering = compare_for_sort(interp, &values[j - 1], &values[j], comparator)?;
            if ordering != Ordering::Greater {
                break;
            }
            values.swap(j - 1, j);
            j -= 1;
        }
    }
    Ok(())
}

fn compare_for_sort(
    interp: &mut Interpreter,
    a: &Value,
    b: &Value,
    comparator: &Value,
) -> Completion<Ordering> {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => return Ok(Ordering::Equal),
        (Value::Undefined, _) => return Ok(Ordering::Greater),
        (_, Value::Undefined) => return Ok(Ordering::Less),
        _ => {}
    }
    if comparator.is_callable() {
        let n = interp
            .call(comparator, Value::Undefined, vec![a.clone(), b.clone()])?
            .to_number();
        return Ok(if n > 0.0 {
            Ordering::Greater
        } else if n < 0.0 {
            Ordering::Less
        } else {
            Ordering::Equal
        });
    }
    let a = interp.to_string_value(a)?;
    let b = interp.to_string_value(b)?;
    Ok(a.encode_utf16().cmp(b.encode_utf16()))
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Num(x), Value::Num(y)) if x.is_nan() && y.is_nan() => true,
        _ => strict_equals(a, b),
    }
}

fn array_prototype() -> ObjRef {
    let proto = alloc(ObjectKind::Plain, None);

    method(&proto, "push", |_, this, args| {
        let obj = this_array(&this)?;
        let len = with_items(&obj, |items| {
            items.extend(args);
            items.len()
        });
        Ok(Value::Num(len.unwrap_or_default() as f64))
    });
    method(&proto, "pop", |_, this, _| {
        let obj = this_array(&this)?;
        Ok(with_items(&obj, |items| items.pop()).flatten().unwrap_or_default())
    });
    method(&proto, "shift", |_, this, _| {
        let obj = this_array(&this)?;
        Ok(with_items(&obj, |items| (!items.is_empty()).then(|| items.remove(0)))
            .flatten()
            .unwrap_or_default())
    });
    method(&proto, "unshift", |_, this, args| {
        let obj = this_array(&this)?;
        let len = with_items(&obj, |items| {
            let tail = std::mem::take(items);
            items.extend(args);
            items.extend(tail);
            items.len()
        });
        Ok(Value::Num(len.unwrap_or_default() as f64))
    });
    method(&proto, "slice", |_, this, args| {
        let items = items(&this_array(&this)?);
        let start = relative_index(&arg(&args, 0), items.len(), 0);
        let end = relative_index(&arg(&args, 1), items.len(), items.len());
        Ok(Value::array(items.get(start..end.max(start)).unwrap_or(&[]).to_vec()))
    });
    method(&proto, "splice", |_, this, args| {
        let obj = this_array(&this)?;
        let len = items(&obj).len();
        let start = relative_index(&arg(&args, 0), len, 0);
        let delete = match args.len() {
            0 => 0,
            1 => len - start,
            _ => {
                let n = arg(&args, 1).to_number();
                let n = if n.is_nan() { 0.0 } else { n.trunc().max(0.0) };
                (n as usize).min(len - start)
            }
        };
        let inserted: Vec<Value> = args.into_iter().skip(2).collect();
        let removed = with_items(&obj, |items| {
            items.splice(start..start + delete, inserted).collect::<Vec<_>>()
        });
        Ok(Value::array(removed.unwrap_or_default()))
    });
    method(&proto, "concat", |_, this, args| {
        let mut out = items(&this_array(&this)?);
        for value in args {
            match value.array_items() {
                Some(inner) => out.extend(inner),
                None => out.push(value),
            }
        }
        Ok(Value::array(out))
    });
    method(&proto, "join", |interp, this, args| {
        let separator = match arg(&args, 0) {
            Value::Undefined => ",".to_string(),
            other => other.to_js_string(),
        };
        let mut parts = Vec::new();
        for item in items(&this_array(&this)?) {
            parts.push(match item {
                Value::Undefined | Value::Null => String::new(),
                other => interp.to_string_value(&other)?,
            });
        }
        Ok(Value::from(parts.join(&separator)))
    });
    method(&proto, "toString", |interp, this, _| {
        let join = interp.get_property(&this, "join")?;
        interp.call(&join, this, Vec::new())
    });
    method(&proto, "map", |interp, this, args| {
        let results = call_each(interp, &this, &args)?;
        Ok(Value::array(results.into_iter().map(|(_, r)| r).collect()))
    });
    method(&proto, "filter", |interp, this, args| {
        let results = call_each(interp, &this, &args)?;
        Ok(Value::array(
            results
                .into_iter()
                .filter(|(_, r)| r.truthy())
                .map(|(item, _)| item)
                .collect(),
        ))
    });
    method(&proto, "forEach", |interp, this, args| {
        call_each(interp, &this, &args)?;
        Ok(Value::Undefined)
    });
    method(&proto, "some", |interp, this, args| {
        let obj = this_array(&this)?;
        let func = callback(&args)?;
        for (idx, item) in items(&obj).into_iter().enumerate() {
            let args = vec![item, Value::Num(idx as f64), this.clone()];
            if interp.call(&func, Value::Undefined, args)?.truthy() {
                return Ok(Value::Bool(true));
            }
        }
        Ok(Value::Bool(false))
    });
    method(&proto, "every", |interp, this, args| {
        let obj = this_array(&this)?;
        let func = callback(&args)?;
        for (idx, item) in items(&obj).into_iter().enumerate() {
            let args = vec![item, Value::Num(idx as f64), this.clone()];
            if !interp.call(&func, Value::Undefined, args)?.truthy() {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    });
    method(&proto, "find", |interp, this, args| {
        let obj = this_array(&this)?;
        let func = callback(&args)?;
        for (idx, item) in items(&obj).into_iter().enumerate() {
            let call_args = vec![item.clone(), Value::Num(idx as f64), this.clone()];
            if interp.call(&func, Value::Undefined, call_args)?.truthy() {
                return Ok(item);
            }
        }
        Ok(Value::Undefined)
    });
    method(&proto, "findIndex", |interp, this, args| {
        let obj = this_array(&this)?;
        let func = callback(&args)?;
        for (idx, item) in items(&obj).into_iter().enumerate() {
            let call_args = vec![item, Value::Num(idx as f64), this.clone()];
            if interp.call(&func, Value::Undefined, call_args)?.truthy() {
                return Ok(Value::Num(idx as f64));
            }
        }
        Ok(Value::Num(-1.0))
    });
    method(&proto, "reduce", |interp, this, args| {
        let obj = this_array(&this)?;
        let func = callback(&args)?;
        let mut iter = items(&obj).into_iter().enumerate();
        let mut acc = if args.len() > 1 {
            arg(&args, 1)
        } else {
            match iter.next() {
                Some((_, first)) => first,
                None => return throw("TypeError", "Reduce of empty array with no initial value"),
            }
        };
        for (idx, item) in iter {
            acc = interp.call(
                &func,
                Value::Undefined,
                vec![acc, item, Value::Num(idx as f64), this.clone()],
            )?;
        }
        Ok(acc)
    });
    method(&proto, "includes", |_, this, args| {
        let needle = arg(&args, 0);
        Ok(Value::Bool(
            items(&this_array(&this)?).iter().any(|item| same_value_zero(item, &needle)),
        ))
    });
    method(&proto, "indexOf", |_, this, args| {
        let needle = arg(&args, 0);
        let position = items(&this_array(&this)?)
            .iter()
            .position(|item| strict_equals(item, &needle));
        Ok(Value::Num(position.map_or(-1.0, |idx| idx as f64)))
    });
    method(&proto, "reverse", |_, this, _| {
        let obj = this_array(&this)?;
        with_items(&obj, |items| items.reverse());
        Ok(this)
    });
    method(&proto, "sort", |interp, this, args| {
        let obj = this_array(&this)?;
        let mut values = items(&obj);
        sort_values(interp, &mut values, &arg(&args, 0))?;
        with_items(&obj, |items| *items = values);
        Ok(this)
    });
    method(&proto, "flat", |_, this, args| {
        let depth = match arg(&args, 0) {
            Value::Undefined => 1.0,
            other => other.to_number(),
        };
        let mut out = Vec::new();
        flatten_into(&mut out, items(&this_array(&this)?), depth);
        Ok(Value::array(out))
    });
    method(&proto, "flatMap", |interp, this, args| {
        let results = call_each(interp, &this, &args)?;
        let mut out = Vec::new();
        flatten_into(&mut out, results.into_iter().map(|(_, r)| r).collect(), 1.0);
        Ok(Value::array(out))
    });
    method(&proto, "fill", |_, this, args| {
        let obj = this_array(&this)?;
        let len = items(&obj).len();
        let value = arg(&args, 0);
        let start = relative_index(&arg(&args, 1), len, 0);
        let end = relative_index(&arg(&args, 2), len, len);
        with_items(&obj, |items| {
            for slot in items.iter_mut().take(end).skip(start) {
                *slot = value.clone();
            }
        });
        Ok(this)
    });
    method(&proto, "at", |_, this, args| {
        let items = items(&this_array(&this)?);
        let n = arg(&args, 0).to_number();
        let n = if n.is_nan() { 0.0 } else { n.trunc() };
        let idx = if n < 0.0 { items.len() as f64 + n } else { n };
        Ok(if idx < 0.0 {
            Value::Undefined
        } else {
            items.get(idx as usize).cloned().unwrap_or_default()
        })
    });
    method(&proto, "entries", |_, this, _| {
        Ok(Value::array(
            items(&this_array(&this)?)
                .into_iter()
                .enumerate()
                .map(|(idx, item)| Value::array(vec![Value::Num(idx as f64), item]))
                .collect(),
        ))
    });
    method(&proto, "keys", |_, this, _| {
        let len = items(&this_array(&this)?).len();
        Ok(Value::array((0..len).map(|idx| Value::Num(idx as f64)).collect()))
    });
    method(&proto, "values", |_, this, _| Ok(Value::array(items(&this_array(&this)?))));
    proto
}

fn array_constructor() -> Value {
    let ctor = Value::native("Array", |_, _, args| {
        if let [Value::Num(n)] = args.as_slice() {
            if n.fract() != 0.0 || *n < 0.0 || *n > (1u32 << 20) as f64 {
                return throw("RangeError", "Invalid array length");
            }
            return Ok(Value::array(vec![Value::Undefined; *n as usize]));
        }
        Ok(Value::array(args))
    });
    let obj = object_ref(&ctor);
    method(&obj, "isArray", |_, _, args| Ok(Value::Bool(arg(&args, 0).is_array())));
    method(&obj, "of", |_, _, args| Ok(Value::array(args)));
    method(&obj, "from", |interp, _, args| {
        let source = arg(&args, 0);
        let values = match &source {
            Value::Str(_) => interp.iterate(&source)?,
            Value::Object(_) if source.is_array() => interp.iterate(&source)?,
            Value::Object(_) => {
                let len = interp.get_property(&source, "length")?.to_number();
                let len = if len.is_finite() && len > 0.0 { len as usize } else { 0 };
                let mut out = Vec::with_capacity(len.min(1 << 16));
                for idx in 0..len {
                    out.push(interp.get_property(&source, &idx.to_string())?);
                }
                out
            }
            _ => Vec::new(),
        };
        let mapper = arg(&args, 1);
        if !mapper.is_callable() {
            return Ok(Value::array(values));
        }
        let mut out = Vec::with_capacity(values.len());
        for (idx, value) in values.into_iter().enumerate() {
            out.push(interp.call(&mapper, Value::Undefined, vec![value, Value::Num(idx as f64)])?);
        }
        Ok(Value::array(out))
    });
    ctor
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRING & NUMBER
// ═══════════════════════════════════════════════════════════════════════════════

fn this_string(this: &Value) -> Completion<String> {
    match this {
        Value::Undefined | Value::Null => throw(
            "TypeError",
            "String.prototype method called on null or undefined",
        ),
        other => Ok(other.to_js_string()),
    }
}

fn units(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

fn from_units(units: &[u16]) -> String {
    String::from_utf16_lossy(units)
}

fn find_units(haystack: &[u16], needle: &[u16], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return (from <= haystack.len()).then_some(from);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&idx| &haystack[idx..idx + needle.len()] == needle)
}

fn pad(interp: &mut Interpreter, this: &Value, args: &[Value], at_start: bool) -> Completion {
    let s = this_string(this)?;
    let target = arg(args, 0).to_number();
    let filler = match arg(args, 1) {
        Value::Undefined => " ".to_string(),
        other => interp.to_string_value(&other)?,
    };
    let current = s.encode_utf16().count();
    if !(target > current as f64) || filler.is_empty() {
        return Ok(Value::from(s));
    }
    if target > MAX_STRING_LENGTH as f64 {
        return throw("RangeError", "Invalid string length");
    }
    let missing = target as usize - current;
    let fill: Vec<u16> = filler.encode_utf16().cycle().take(missing).collect();
    let fill = from_units(&fill);
    Ok(Value::from(if at_start {
        format!("{}{}", fill, s)
    } else {
        format!("{}{}", s, fill)
    }))
}

fn replace(interp: &mut Interpreter, this: &Value, args: &[Value], all: bool) -> Completion {
    let s = this_string(this)?;
    let pattern = arg(args, 0);
    if let Some(re) = regexp_of(&pattern) {
        if all && !re.global {
            return throw("TypeError", "replaceAll must be called with a global RegExp");
        }
        let replaced = regexp::replace(interp, &s, &pattern, &re, &arg(args, 1))?;
        return Ok(Value::from(replaced));
    }
    let pattern = pattern.to_js_string();
    let replacement = arg(args, 1);
    let mut out = String::new();
    let mut rest = 0;
    let mut search_from = 0;
    while let Some(found) = s.get(search_from..).and_then(|tail| tail.find(&pattern)) {
        let at = search_from + found;
        out.push_str(&s[rest..at]);
        let piece = if replacement.is_callable() {
            let offset = s[..at].encode_utf16().count();
            let result = interp.call(
                &replacement,
                Value::Undefined,
                vec![
                    Value::from(pattern.as_str()),
                    Value::Num(offset as f64),
                    Value::from(s.as_str()),
                ],
            )?;
            interp.to_string_value(&result)?
        } else {
            replacement
                .to_js_string()
                .replace("$&", &pattern)
                .replace("$$", "$")
        };
        out.push_str(&piece);
        rest = at + pattern.len();
        if !all {
            break;
        }
        search_from = if pattern.is_empty() {
            match s[rest..].chars().next() {
                Some(c) => {
                    out.push(c);
                    rest += c.len_utf8();
                    rest
                }
                None => break,
            }
        } else {
            rest
        };
    }
    out.push_str(s.get(rest..).unwrap_or(""));
    Ok(Value::from(out))
}

/// A `RegExp` argument as given, or one built from its string form.
fn pattern_arg(interp: &mut Interpreter, value: &Value, flags: &str) -> Completion {
    if regexp_of(value).is_some() {
        return Ok(value.clone());
    }
    let source = match value {
        Value::Undefined => String::new(),
        other => interp.to_string_value(other)?,
    };
    regexp::new_regexp(&source, flags)
}

fn string_prototype() -> ObjRef {
    let proto = alloc(ObjectKind::Plain, None);

    method(&proto, "toString", |_, this, _| Ok(Value::from(this_string(&this)?)));
    method(&proto, "valueOf", |_, this, _| Ok(Value::from(this_string(&this)?)));
    method(&proto, "toUpperCase", |_, this, _| {
        Ok(Value::from(this_string(&this)?.to_uppercase()))
    });
    method(&proto, "toLowerCase", |_, this, _| {
        Ok(Value::from(this_string(&this)?.to_lowercase()))
    });
    method(&proto, "trim", |_, this, _| Ok(Value::from(this_string(&this)?.trim())));
    method(&proto, "trimStart", |_, this, _| {
        Ok(Value::from(this_string(&this)?.trim_start()))
    });
    method(&proto, "trimEnd", |_, this, _| {
        Ok(Value::from(this_string(&this)?.trim_end()))
    });
    method(&proto, "split", |_, this, args| {
        let s = this_string(&this)?;
        let limit = match arg(&args, 1) {
            Value::Undefined => usize::MAX,
            other => other.to_number().max(0.0) as usize,
        };
        let separator = arg(&args, 0);
        if let Some(re) = regexp_of(&separator) {
            return Ok(Value::array(regexp::split(&s, &re, limit)));
        }
        let parts: Vec<Value> = match separator {
            Value::Undefined => vec![Value::from(s)],
            separator => {
                let separator = separator.to_js_string();
                if separator.is_empty() {
                    s.chars().map(|c| Value::from(c.to_string())).collect()
                } else {
                    s.split(separator.as_str()).map(Value::from).collect()
                }
            }
        };
        Ok(Value::array(parts.into_iter().take(limit).collect()))
    });
    method(&proto, "slice", |_, this, args| {
        let u = units(&this_string(&this)?);
        let start = relative_index(&arg(&args, 0), u.len(), 0);
        let end = relative_index(&arg(&args, 1), u.len(), u.len());
        Ok(Value::from(from_units(u.get(start..end.max(start)).unwrap_or(&[]))))
    });
    method(&proto, "substring", |_, this, args| {
        let u = units(&this_string(&this)?);
        let clamp = |value: Value, default: usize| match value {
            Value::Undefined => default,
            other => {
                let n = other.to_number();
                if n.is_nan() { 0 } else { n.max(0.0).min(u.len() as f64) as usize }
            }
        };
        let a = clamp(arg(&args, 0), 0);
        let b = clamp(arg(&args, 1), u.len());
        let (start, end) = if a <= b { (a, b) } else { (b, a) };
        Ok(Value::from(from_units(&u[start..end])))
    });
    method(&proto, "charAt", |_, this, args| {
        let u = units(&this_string(&this)?);
        let idx = arg(&args, 0).to_number();
        let idx = if idx.is_nan() { 0.0 } else { idx.trunc() };
        Ok(Value::from(if idx >= 0.0 && (idx as usize) < u.len() {
            from_units(&u[idx as usize..idx as usize + 1])
        } else {
            String::new()
        }))
    });
    method(&proto, "charCodeAt", |_, this, args| {
        let u = units(&this_string(&this)?);
        let idx = arg(&args, 0).to_number();
        let idx = if idx.is_nan() { 0.0 } else { idx.trunc() };
        Ok(Value::Num(if idx >= 0.0 {
            u.get(idx as usize).map_or(f64::NAN, |unit| *unit as f64)
        } else {
            f64::NAN
        }))
    });
    method(&proto, "at", |_, this, args| {
        let u = units(&this_string(&this)?);
        let n = arg(&args, 0).to_number();
        let n = if n.is_nan() { 0.0 } else { n.trunc() };
        let idx = if n < 0.0 { u.len() as f64 + n } else { n };
        Ok(if idx >= 0.0 && (idx as usize) < u.len() {
            Value::from(from_units(&u[idx as usize..idx as usize + 1]))
        } else {
            Value::Undefined
        })
    });
    method(&proto, "indexOf", |_, this, args| {
        let u = units(&this_string(&this)?);
        let needle = units(&arg(&args, 0).to_js_string());
        let from = relative_index(&arg(&args, 1), u.len(), 0).min(u.len());
        Ok(Value::Num(find_units(&u, &needle, from).map_or(-1.0, |idx| idx as f64)))
    });
    method(&proto, "lastIndexOf", |_, this, args| {
        let u = units(&this_string(&this)?);
        let needle = units(&arg(&args, 0).to_js_string());
        let found = (0..=u.len().saturating_sub(needle.len()))
            .rev()
            .find(|&idx| u.get(idx..idx + needle.len()) == Some(needle.as_slice()));
        Ok(Value::Num(found.map_or(-1.0, |idx| idx as f64)))
    });
    method(&proto, "includes", |_, this, args| {
        let s = this_string(&this)?;
        Ok(Value::Bool(s.contains(&arg(&args, 0).to_js_string())))
    });
    method(&proto, "startsWith", |_, this, args| {
        let u = units(&this_string(&this)?);
        let needle = units(&arg(&args, 0).to_js_string());
        let from = relative_index(&arg(&args, 1), u.len(), 0);
        Ok(Value::Bool(u[from..].starts_with(&needle)))
    });
    method(&proto, "endsWith", |_, this, args| {
        let u = units(&this_string(&this)?);
        let needle = units(&arg(&args, 0).to_js_string());
        let end = relative_index(&arg(&args, 1), u.len(), u.len());
        Ok(Value::Bool(u[..end].ends_with(&needle)))
    });
    method(&proto, "match", |interp, this, args| {
        let s = this_string(&this)?;
        let pattern = pattern_arg(interp, &arg(&args, 0), "")?;
        regexp::match_string(interp, &s, &pattern)
    });
    method(&proto, "matchAll", |interp, this, args| {
        let s = this_string(&this)?;
        let pattern = pattern_arg(interp, &arg(&args, 0), "g")?;
        match regexp_of(&pattern) {
            Some(re) => regexp::match_all(&s, &re),
            None => Ok(Value::array(Vec::new())),
        }
    });
    method(&proto, "search", |interp, this, args| {
        let s = this_string(&this)?;
        let pattern = pattern_arg(interp, &arg(&args, 0), "")?;
        Ok(Value::Num(regexp_of(&pattern).map_or(-1.0, |re| regexp::search(&s, &re))))
    });
    method(&proto, "replace", |interp, this, args| replace(interp, &this, &args, false));
    method(&proto, "replaceAll", |interp, this, args| replace(interp, &this, &args, true));
    method(&proto, "repeat", |_, this, args| {
        let s = this_string(&this)?;
        let count = arg(&args, 0).to_number();
        if !(count >= 0.0) || count.is_infinite() {
            return throw("RangeError", format!("Invalid count value: {}", number_to_string(count)));
        }
        if s.len().saturating_mul(count as usize) > MAX_STRING_LENGTH {
            return throw("RangeError", "Invalid string length");
        }
        Ok(Value::from(s.repeat(count as usize)))
    });
    method(&proto, "padStart", |interp, this, args| pad(interp, &this, &args, true));
    method(&proto, "padEnd", |interp, this, args| pad(interp, &this, &args, false));
    method(&proto, "concat", |interp, this, args| {
        let mut s = this_string(&this)?;
        for value in &args {
            s.push_str(&interp.to_string_value(value)?);
        }
        Ok(Value::from(s))
    });
    method(&proto, "localeCompare", |_, this, args| {
        let s = this_string(&this)?;
        let other = arg(&args, 0).to_js_string();
        Ok(Value::Num(match s.cmp(&other) {
            Ordering::Less => -1.0,
            Ordering::Equal => 0.0,
            Ordering::Greater => 1.0,
        }))
    });
    proto
}

fn string_constructor() -> Value {
    let ctor = Value::native("String", |interp, _, args| match args.first() {
        None => Ok(Value::from("")),
        Some(value) => Ok(Value::from(interp.to_string_value(value)?)),
    });
    let obj = object_ref(&ctor);
    method(&obj, "raw", |interp, _, args| {
        let strings = arg(&args, 0);
        let raw = interp.get_property(&strings, "raw")?;
        let segments = interp.iterate(&raw)?;
        let mut out = String::new();
        for (idx, segment) in segments.iter().enumerate() {
            out.push_str(&segment.to_js_string());
            if idx + 1 < segments.len() {
                if let Some(sub) = args.get(idx + 1) {
                    out.push_str(&interp.to_string_value(sub)?);
                }
            }
        }
        Ok(Value::from(out))
    });
    method(&obj, "fromCharCode", |_, _, args| {
        let codes: Vec<u16> = args
            .iter()
            .map(|value| to_int32(value.to_number()) as u16)
            .collect();
        Ok(Value::from(from_units(&codes)))
    });
    ctor
}

fn number_prototype() -> ObjRef {
    let proto = alloc(ObjectKind::Plain, None);
    method(&proto, "toString", |_, this, args| {
        let n = this.to_number();
        match arg(&args, 0) {
            Value::Undefined => Ok(Value::from(number_to_string(n))),
            radix => {
                let radix = radix.to_number();
                if !(2.0..=36.0).contains(&radix) {
                    return throw("RangeError", "toString() radix must be between 2 and 36");
                }
                Ok(Value::from(number_to_radix(n, radix as u32)))
            }
        }
    });
    method(&proto, "toFixed", |_, this, args| {
        let n = this.to_number();
        let digits = arg(&args, 0).to_number();
        let digits = if digits.is_nan() { 0.0 } else { digits.trunc() };
        if !(0.0..=100.0).contains(&digits) {
            return throw("RangeError", "toFixed() digits argument must be between 0 and 100");
        }
        if !n.is_finite() || n.abs() >= 1e21 {
            return Ok(Value::from(number_to_string(n)));
        }
        Ok(Value::from(to_fixed(n, digits as usize)))
    });
    method(&proto, "valueOf", |_, this, _| Ok(Value::Num(this.to_number())));
    proto
}

/// Fixed-point digits of `n`, rounding ties away from zero on the exact
/// binary value.
fn to_fixed(n: f64, digits: usize) -> String {
    // Every finite double has at most 1074 fraction digits.
    let exact = format!("{:.1074}", n.abs());
    let (int_part, frac_part) = exact.split_once('.').unwrap_or((exact.as_str(), ""));
    let mut kept: Vec<u8> = int_part
        .bytes()
        .chain(frac_part.bytes().chain(std::iter::repeat(b'0')).take(digits))
        .collect();
    if frac_part.as_bytes().get(digits).is_some_and(|&d| d >= b'5') {
        let mut idx = kept.len();
        loop {
            if idx == 0 {
                kept.insert(0, b'1');
                break;
            }
            idx -= 1;
            if kept[idx] == b'9' {
                kept[idx] = b'0';
            } else {
                kept[idx] += 1;
                break;
            }
        }
    }
    let int_len = kept.len() - digits;
    let mut out = String::with_capacity(kept.len() + 2);
    if n < 0.0 {
        out.push('-');
    }
    out.extend(kept[..int_len].iter().map(|&d| d as char));
    if digits > 0 {
        out.push('.');
        out.extend(kept[int_len..].iter().map(|&d| d as char));
    }
    out
}

fn number_to_radix(n: f64, radix: u32) -> String {
    if radix == 10 || !n.is_finite() {
        return number_to_string(n);
    }
    let negative = n < 0.0;
    let mut int = n.abs().trunc();
    let mut frac = n.abs().fract();
    let mut digits = Vec::new();
    if int == 0.0 {
        digits.push('0');
    }
    while int >= 1.0 {
        let digit = (int % radix as f64) as u32;
        digits.push(std::char::from_digit(digit, radix).unwrap_or('0'));
        int = (int / radix as f64).trunc();
    }
    digits.reverse();
    let mut out: String = digits.into_iter().collect();
    if frac > 0.0 {
        out.push('.');
        for _ in 0..20 {
            frac *= radix as f64;
            let digit = frac.trunc() as u32;
            out.push(std::char::from_digit(digit, radix).unwrap_or('0'));
            frac = frac.fract();
            if frac == 0.0 {
                break;
            }
        }
    }
    if negative {
        out.insert(0, '-');
    }
    out
}

fn number_constructor() -> Value {
    let ctor = Value::native("Number", |_, _, args| {
        Ok(Value::Num(args.first().map_or(0.0, Value::to_number)))
    });
    let obj = object_ref(&ctor);
    method(&obj, "isInteger", |_, _, args| {
        Ok(Value::Bool(matches!(arg(&args, 0), Value::Num(n) if n.is_finite() && n.fract() == 0.0)))
    });
    method(&obj, "isFinite", |_, _, args| {
        Ok(Value::Bool(matches!(arg(&args, 0), Value::Num(n) if n.is_finite())))
    });
    method(&obj, "isNaN", |_, _, args| {
        Ok(Value::Bool(matches!(arg(&args, 0), Value::Num(n) if n.is_nan())))
    });
    method(&obj, "parseFloat", |_, _, args| {
        Ok(Value::Num(parse_float(&arg(&args, 0).to_js_string())))
    });
    method(&obj, "parseInt", |_, _, args| {
        Ok(Value::Num(parse_int(&arg(&args, 0).to_js_string(), arg(&args, 1))))
    });
    constant(&obj, "MAX_SAFE_INTEGER", Value::Num(9007199254740991.0));
    constant(&obj, "MIN_SAFE_INTEGER", Value::Num(-9007199254740991.0));
    constant(&obj, "EPSILON", Value::Num(f64::EPSILON));
    constant(&obj, "MAX_VALUE", Value::Num(f64::MAX));
    constant(&obj, "POSITIVE_INFINITY", Value::Num(f64::INFINITY));
    constant(&obj, "NEGATIVE_INFINITY", Value::Num(f64::NEG_INFINITY));
    constant(&obj, "NaN", Value::Num(f64::NAN));
    ctor
}

pub fn parse_int(input: &str, radix: Value) -> f64 {
    let s = input.trim_start();
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut radix = match radix {
        Value::Undefined => 0,
        other => to_int32(other.to_number()),
    };
    let mut s = s;
    if radix == 0 || radix == 16 {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let digits: Vec<u32> = s
        .chars()
        .map_while(|c| c.to_digit(radix as u32))
        .collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let value = digits
        .into_iter()
        .fold(0.0, |acc, digit| acc * radix as f64 + digit as f64);
    if negative {
        -value
    } else {
        value
    }
}

pub fn parse_float(input: &str) -> f64 {
    let s = input.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    if s[end..].starts_with("Infinity") {
        return if s.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY };
    }
    let digits_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    if bytes.get(end) == Some(&b'.') {
        end += 1;
        while bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
        }
    }
    if end == digits_start || &s[digits_start..end] == "." {
        return f64::NAN;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    string_to_number(&s[..end])
}

fn encode_uri_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'!' | b'~' | b'*'
            | b'\'' | b'(' | b')' => out.push(byte as char),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// MATH & JSON
// ═══════════════════════════════════════════════════════════════════════════════

fn math() -> Value {
    let obj = alloc(ObjectKind::Plain, None);
    constant(&obj, "PI", Value::Num(std::f64::consts::PI));
    constant(&obj, "E", Value::Num(std::f64::consts::E));
    constant(&obj, "LN2", Value::Num(std::f64::consts::LN_2));
    constant(&obj, "LN10", Value::Num(std::f64::consts::LN_10));
    constant(&obj, "SQRT2", Value::Num(std::f64::consts::SQRT_2));

    let unary: [(&str, fn(f64) -> f64); 16] = [
        ("abs", f64::abs),
        ("floor", f64::floor),
        ("ceil", f64::ceil),
        ("round", |n| (n + 0.5).floor()),
        ("trunc", f64::trunc),
        ("sign", |n| if n.is_nan() || n == 0.0 { n } else { n.signum() }),
        ("sqrt", f64::sqrt),
        ("cbrt", f64::cbrt),
        ("log", f64::ln),
        ("log2", f64::log2),
        ("log10", f64::log10),
        ("exp", f64::exp),
        ("sin", f64::sin),
        ("cos", f64::cos),
        ("tan", f64::tan),
        ("atan", f64::atan),
    ];
    for (name, func) in unary {
        method(&obj, name, move |_, _, args| {
            Ok(Value::Num(func(arg(&args, 0).to_number())))
        });
    }
    method(&obj, "pow", |_, _, args| {
        Ok(Value::Num(arg(&args, 0).to_number().powf(arg(&args, 1).to_number())))
    });
    method(&obj, "atan2", |_, _, args| {
        Ok(Value::Num(arg(&args, 0).to_number().atan2(arg(&args, 1).to_number())))
    });
    method(&obj, "hypot", |_, _, args| {
        Ok(Value::Num(args.iter().map(|v| v.to_number().powi(2)).sum::<f64>().sqrt()))
    });
    method(&obj, "min", |_, _, args| {
        Ok(Value::Num(args.iter().map(Value::to_number).fold(f64::INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.min(n) }
        })))
    });
    method(&obj, "max", |_, _, args| {
        Ok(Value::Num(args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() { f64::NAN } else { acc.max(n) }
        })))
    });
    method(&obj, "random", |interp, _, _| Ok(Value::Num(interp.next_random())));
    Value::Object(obj)
}

/// JSON view of a value; `None` for values JSON omits.
fn to_json(interp: &mut Interpreter, value: &Value, depth: usize) -> Completion<Option<serde_json::Value>> {
    if depth > 64 {
        return throw("TypeError", "Converting circular structure to JSON");
    }
    Ok(Some(match value {
        Value::Undefined => return Ok(None),
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Num(n) => json_number(*n),
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::Object(obj) => {
            if value.is_callable() {
                return Ok(None);
            }
            let to_json_method = interp.object_get(obj, "toJSON");
            if to_json_method.is_callable() {
                let replaced = interp.call(&to_json_method, value.clone(), Vec::new())?;
                return to_json(interp, &replaced, depth + 1);
            }
            if let Some(items) = value.array_items() {
                let mut out = Vec::with_capacity(items.len());
                for item in &items {
                    out.push(to_json(interp, item, depth + 1)?.unwrap_or(serde_json::Value::Null));
                }
                serde_json::Value::Array(out)
            } else {
                let mut map = serde_json::Map::new();
                for (key, item) in interp.entries(value)? {
                    if let Some(json) = to_json(interp, &item, depth + 1)? {
                        map.insert(key, json);
                    }
                }
                serde_json::Value::Object(map)
            }
        }
    }))
}

fn json_number(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        return serde_json::Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9007199254740992.0 {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

fn json_indent(value: &Value) -> Option<String> {
    match value {
        Value::Num(n) if *n >= 1.0 => Some(" ".repeat((*n as usize).min(10))),
        Value::Str(s) if !s.is_empty() => Some(s.chars().take(10).collect()),
        _ => None,
    }
}

fn pretty_json(json: &serde_json::Value, indent: &str) -> Result<String, serde_json::Error> {
    use serde::Serialize;

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    json.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn json() -> Value {
    let obj = alloc(ObjectKind::Plain, None);
    method(&obj, "stringify", |interp, _, args| {
        let Some(json) = to_json(interp, &arg(&args, 0), 0)? else {
            return Ok(Value::Undefined);
        };
        let text = match json_indent(&arg(&args, 2)) {
            None => serde_json::to_string(&json),
            Some(indent) => pretty_json(&json, &indent),
        };
        match text {
            Ok(text) => Ok(Value::from(text)),
            Err(err) => throw("TypeError", err.to_string()),
        }
    });
    method(&obj, "parse", |_, _, args| {
        match serde_json::from_str::<serde_json::Value>(&arg(&args, 0).to_js_string()) {
            Ok(json) => Ok(Value::from_json(&json)),
            Err(err) => throw("SyntaxError", format!("Unexpected token in JSON: {}", err)),
        }
    });
    Value::Object(obj)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS & PROMISES
// ═══════════════════════════════════════════════════════════════════════════════

fn error_prototype() -> ObjRef {
    let proto = alloc(ObjectKind::Plain, None);
    method(&proto, "toString", |_, this, _| Ok(Value::from(this.to_js_string())));
    proto
}

fn error_constructor(name: &'static str) -> Value {
    Value::native(name, move |_, _, args| {
        let message = match arg(&args, 0) {
            Value::Undefined => String::new(),
            other => other.to_js_string(),
        };
        let error = Value::error(name, &message);
        if let Value::Object(options) = arg(&args, 1) {
            if let Some(cause) = options.borrow().props.get("cause") {
                set_own(&error, "cause", cause.clone());
            }
        }
        Ok(error)
    })
}

fn settle_with(
    interp: &mut Interpreter,
    handler: &Value,
    input: Value,
    passthrough: Settled,
) -> Completion {
    if !handler.is_callable() {
        return Ok(Value::promise(passthrough));
    }
    match interp.call(handler, Value::Undefined, vec![input]) {
        Ok(result) => Ok(promise_resolve(result)),
        Err(Flow::Throw(error)) => Ok(Value::promise(Settled::Rejected(error))),
        Err(other) => Err(other),
    }
}

fn promise_prototype() -> ObjRef {
    let proto = alloc(ObjectKind::Plain, None);
    method(&proto, "then", |interp, this, args| {
        match promise_state(&this) {
            Some(Settled::Fulfilled(value)) => {
                settle_with(interp, &arg(&args, 0), value.clone(), Settled::Fulfilled(value))
            }
            Some(Settled::Rejected(error)) => {
                settle_with(interp, &arg(&args, 1), error.clone(), Settled::Rejected(error))
            }
            None => throw("TypeError", "Method Promise.prototype.then called on incompatible receiver"),
        }
    });
    method(&proto, "catch", |interp, this, args| match promise_state(&this) {
        Some(Settled::Rejected(error)) => {
            settle_with(interp, &arg(&args, 0), error.clone(), Settled::Rejected(error))
        }
        Some(_) => Ok(this),
        None => throw("TypeError", "Method Promise.prototype.catch called on incompatible receiver"),
    });
    method(&proto, "finally", |interp, this, args| {
        let handler = arg(&args, 0);
        if handler.is_callable() {
            interp.call(&handler, Value::Undefined, Vec::new())?;
        }
        Ok(this)
    });
    proto
}

fn promise_constructor() -> Value {
    let ctor = Value::native("Promise", |interp, _, args| {
        let executor = arg(&args, 0);
        if !executor.is_callable() {
            return throw("TypeError", "Promise resolver is not a function");
        }
        let state: Rc<RefCell<Option<Settled>>> = Rc::new(RefCell::new(None));
        let on_resolve = state.clone();
        let resolve = Value::native("resolve", move |_, _, args| {
            let mut slot = on_resolve.borrow_mut();
            if slot.is_none() {
                let value = arg(&args, 0);
                *slot = Some(promise_state(&value).unwrap_or(Settled::Fulfilled(value)));
            }
            Ok(Value::Undefined)
        });
        let on_reject = state.clone();
        let reject = Value::native("reject", move |_, _, args| {
            let mut slot = on_reject.borrow_mut();
            if slot.is_none() {
                *slot = Some(Settled::Rejected(arg(&args, 0)));
            }
            Ok(Value::Undefined)
        });
        match interp.call(&executor, Value::Undefined, vec![resolve, reject]) {
            Ok(_) => {}
            Err(Flow::Throw(error)) => {
                state.borrow_mut().get_or_insert(Settled::Rejected(error));
            }
            Err(other) => return Err(other),
        }
        let settled = state.borrow_mut().take();
        Ok(Value::promise(settled.unwrap_or_else(|| {
            Settled::Rejected(Value::error(
                "Error",
                "Promise did not settle synchronously; deferred work is not supported in the sandbox",
            ))
        })))
    });
    let obj = object_ref(&ctor);
    method(&obj, "resolve", |_, _, args| Ok(promise_resolve(arg(&args, 0))));
    method(&obj, "reject", |_, _, args| {
        Ok(Value::promise(Settled::Rejected(arg(&args, 0))))
    });
    method(&obj, "all", |interp, _, args| {
        let mut values = Vec::new();
        for item in interp.iterate(&arg(&args, 0))? {
            match promise_state(&item) {
                Some(Settled::Fulfilled(value)) => values.push(value),
                Some(Settled::Rejected(error)) => {
                    return Ok(Value::promise(Settled::Rejected(error)))
                }
                None => values.push(item),
            }
        }
        Ok(Value::promise(Settled::Fulfilled(Value::array(values))))
    });
    ctor
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSOLE & PROCESS
// ═══════════════════════════════════════════════════════════════════════════════

fn console_line(interp: &mut Interpreter, args: &[Value]) -> Completion<String> {
    let mut parts = Vec::with_capacity(args.len());
    for value in args {
        let is_data = value.as_object().is_some_and(|obj| {
            matches!(obj.borrow().kind, ObjectKind::Plain | ObjectKind::Array(_))
        });
        let line = match value {
            Value::Str(s) => s.to_string(),
            _ if is_data => match to_json(interp, value, 0)? {
                Some(json) => json.to_string(),
                None => value.to_js_string(),
            },
            other => interp.to_string_value(other)?,
        };
        parts.push(line);
    }
    Ok(parts.join(" "))
}

fn console() -> Value {
    let obj = alloc(ObjectKind::Plain, None);
    method(&obj, "log", |interp, _, args| {
        tracing::info!(target: "sandbox", "{}", console_line(interp, &args)?);
        Ok(Value::Undefined)
    });
    method(&obj, "info", |interp, _, args| {
        tracing::info!(target: "sandbox", "{}", console_line(interp, &args)?);
        Ok(Value::Undefined)
    });
    method(&obj, "debug", |interp, _, args| {
        tracing::debug!(target: "sandbox", "{}", console_line(interp, &args)?);
        Ok(Value::Undefined)
    });
    method(&obj, "warn", |interp, _, args| {
        tracing::warn!(target: "sandbox", "{}", console_line(interp, &args)?);
        Ok(Value::Undefined)
    });
    method(&obj, "error", |interp, _, args| {
        tracing::error!(target: "sandbox", "{}", console_line(interp, &args)?);
        Ok(Value::Undefined)
    });
    Value::Object(obj)
}

fn process(options: &PrevalOptions) -> Value {
    let obj = alloc(ObjectKind::Plain, None);
    for key in ["platform", "arch", "execPath", "title"] {
        constant(&obj, key, Value::from("browser"));
    }
    constant(&obj, "pid", Value::Num(1.0));
    constant(&obj, "browser", Value::Bool(true));
    constant(&obj, "argv", Value::array(Vec::new()));
    constant(&obj, "version", Value::from(""));
    constant(&obj, "versions", Value::object([]));
    constant(
        &obj,
        "env",
        Value::object(
            options
                .env
                .iter()
                .map(|(key, value)| (key.clone(), Value::from(value.as_str()))),
        ),
    );
    method(&obj, "cwd", |_, _, _| Ok(Value::from("/")));
    method(&obj, "umask", |_, _, _| Ok(Value::Num(0.0)));
    for name in [
        "exit",
        "kill",
        "chdir",
        "abort",
        "on",
        "once",
        "off",
        "emit",
        "nextTick",
        "addListener",
        "removeListener",
        "removeAllListeners",
    ] {
        method(&obj, name, |_, _, _| Ok(Value::Undefined));
    }
    method(&obj, "binding", |_, _, _| {
        throw("Error", "No such module. (Possibly not yet loaded)")
    });
    Value::Object(obj)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLATFORM MODULES
// ═══════════════════════════════════════════════════════════════════════════════

/// Exports of a supported platform module.
pub fn node_module(name: &str) -> Value {
    match name {
        "fs" => fs_module(),
        "os" => os_module(),
        "url" => url_module(),
        _ => path_module(),
    }
}

/// Paths inside the sandbox resolve against its working directory `/`.
fn sandbox_path(value: &Value) -> PathBuf {
    normalize(&Path::new("/").join(value.to_js_string()))
}

fn fs_module() -> Value {
    let obj = alloc(ObjectKind::Plain, None);
    method(&obj, "readFileSync", |interp, _, args| {
        let path = sandbox_path(&arg(&args, 0));
        match interp.host.read_to_string(&path) {
            Ok(text) => Ok(Value::from(text)),
            Err(err) => throw("Error", err.to_string()),
        }
    });
    method(&obj, "existsSync", |interp, _, args| {
        let path = sandbox_path(&arg(&args, 0));
        Ok(Value::Bool(interp.host.is_file(&path) || interp.host.is_dir(&path)))
    });
    Value::Object(obj)
}

fn path_string(path: &Path) -> String {
    let s = path.to_string_lossy().into_owned();
    if s.is_empty() {
        ".".to_string()
    } else {
        s
    }
}

fn path_args(args: &[Value]) -> Completion<Vec<String>> {
    args.iter()
        .map(|value| match value {
            Value::Str(s) => Ok(s.to_string()),
            other => throw(
                "TypeError",
                format!(
                    "The \"path\" argument must be of type string. Received {}",
                    other.type_of()
                ),
            ),
        })
        .collect()
}

fn path_module() -> Value {
    let obj = alloc(ObjectKind::Plain, None);
    constant(&obj, "sep", Value::from("/"));
    constant(&obj, "delimiter", Value::from(":"));
    method(&obj, "join", |_, _, args| {
        let parts = path_args(&args)?;
        let joined = parts
            .iter()
            .filter(|part| !part.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("/");
        Ok(Value::from(path_string(&normalize(Path::new(&joined)))))
    });
    method(&obj, "resolve", |_, _, args| {
        let mut out = PathBuf::from("/");
        for part in path_args(&args)? {
            out.push(part);
        }
        Ok(Value::from(path_string(&normalize(&out))))
    });
    method(&obj, "normalize", |_, _, args| {
        let parts = path_args(&args)?;
        let input = parts.first().cloned().unwrap_or_default();
        Ok(Value::from(path_string(&normalize(Path::new(&input)))))
    });
    method(&obj, "isAbsolute", |_, _, args| {
        let parts = path_args(&args)?;
        Ok(Value::Bool(parts.first().is_some_and(|p| p.starts_with('/'))))
    });
    method(&obj, "dirname", |_, _, args| {
        let parts = path_args(&args)?;
        let input = parts.first().cloned().unwrap_or_default();
        let dir = match Path::new(&input).parent() {
            Some(parent) => path_string(parent),
            None if input.starts_with('/') => "/".to_string(),
            None => ".".to_string(),
        };
        Ok(Value::from(dir))
    });
    method(&obj, "basename", |_, _, args| {
        let parts = path_args(&args)?;
        let input = parts.first().cloned().unwrap_or_default();
        let mut base = Path::new(&input)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(ext) = parts.get(1) {
            if base.len() > ext.len() && base.ends_with(ext.as_str()) {
                base.truncate(base.len() - ext.len());
            }
        }
        Ok(Value::from(base))
    });
    method(&obj, "extname", |_, _, args| {
        let parts = path_args(&args)?;
        let input = parts.first().cloned().unwrap_or_default();
        let base = Path::new(&input)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Value::from(match base.rfind('.') {
            Some(idx) if idx > 0 => base[idx..].to_string(),
            _ => String::new(),
        }))
    });
    Value::Object(obj)
}

fn os_module() -> Value {
    let obj = alloc(ObjectKind::Plain, None);
    constant(&obj, "EOL", Value::from("\n"));
    method(&obj, "platform", |_, _, _| Ok(Value::from("browser")));
    method(&obj, "type", |_, _, _| Ok(Value::from("Browser")));
    method(&obj, "endianness", |_, _, _| Ok(Value::from("LE")));
    method(&obj, "homedir", |_, _, _| Ok(Value::from("/")));
    method(&obj, "tmpdir", |_, _, _| Ok(Value::from("/tmp")));
    method(&obj, "cpus", |_, _, _| Ok(Value::array(Vec::new())));
    Value::Object(obj)
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        let hex = bytes
            .get(idx + 1..idx + 3)
            .and_then(|pair| std::str::from_utf8(pair).ok())
            .and_then(|pair| u8::from_str_radix(pair, 16).ok());
        match (bytes[idx], hex) {
            (b'%', Some(byte)) => {
                out.push(byte);
                idx += 3;
            }
            (byte, _) => {
                out.push(byte);
                idx += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn file_url_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' | '#' | '?' | ' ' | '\t' | '\n' | '\r' => out.push_str(&format!("%{:02X}", c as u32)),
            other => out.push(other),
        }
    }
    out
}

fn url_module() -> Value {
    let obj = alloc(ObjectKind::Plain, None);
    method(&obj, "fileURLToPath", |interp, _, args| {
        let url = match arg(&args, 0) {
            Value::Str(s) => s.to_string(),
            other => interp.get_property(&other, "href")?.to_js_string(),
        };
        let Some(rest) = url.strip_prefix("file://") else {
            return throw("TypeError", "The URL must be of scheme file");
        };
        let rest = rest.strip_prefix("localhost").unwrap_or(rest);
        let path = match rest.find('/') {
            Some(0) => rest,
            Some(_) => return throw("TypeError", "File URL host must be \"localhost\" or empty"),
            None => return throw("TypeError", "Invalid URL"),
        };
        let path = path.split(['?', '#']).next().unwrap_or(path);
        Ok(Value::from(percent_decode(path)))
    });
    method(&obj, "pathToFileURL", |_, _, args| {
        let path = path_args(&args)?.into_iter().next().unwrap_or_default();
        let resolved = path_string(&normalize(&Path::new("/").join(&path)));
        let pathname = file_url_path(&resolved);
        let href = format!("file://{}", pathname);
        let url = Value::object([
            ("href".to_string(), Value::from(href.as_str())),
            ("protocol".to_string(), Value::from("file:")),
            ("pathname".to_string(), Value::from(pathname)),
        ]);
        let href = Value::from(href);
        let to_string = Value::native("toString", move |_, _, _| Ok(href.clone()));
        set_own(&url, "toString", to_string);
        Ok(url)
    });
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_and_float() {
        assert_eq!(parse_int("42px", Value::Undefined), 42.0);
        assert_eq!(parse_int("  -0x1F", Value::Undefined), -31.0);
        assert_eq!(parse_int("101", Value::Num(2.0)), 5.0);
        assert!(parse_int("px", Value::Undefined).is_nan());
        assert_eq!(parse_float("1.5rem"), 1.5);
        assert_eq!(parse_float(".25"), 0.25);
        assert_eq!(parse_float("1e3x"), 1000.0);
        assert_eq!(parse_float("-Infinity"), f64::NEG_INFINITY);
        assert!(parse_float("abc").is_nan());
    }

    #[test]
    fn test_to_fixed_uses_exact_binary_value() {
        assert_eq!(to_fixed(2.5, 0), "3");
        assert_eq!(to_fixed(0.125, 2), "0.13");
        assert_eq!(to_fixed(0.1 + 0.2, 2), "0.30");
        assert_eq!(to_fixed(-0.0001, 2), "-0.00");
        assert_eq!(to_fixed(999.5, 0), "1000");
        assert_eq!(to_fixed(1e20, 1), "100000000000000000000.0");
    }

    #[test]
    fn test_number_to_radix() {
        assert_eq!(number_to_radix(255.0, 16), "ff");
        assert_eq!(number_to_radix(-5.0, 2), "-101");
        assert_eq!(number_to_radix(0.5, 2), "0.1");
    }

    #[test]
    fn test_json_numbers_drop_integral_fraction() {
        assert_eq!(json_number(3.0).to_string(), "3");
        assert_eq!(json_number(0.5).to_string(), "0.5");
        assert_eq!(json_number(f64::NAN), serde_json::Value::Null);
    }

    #[test]
    fn test_encode_uri_component() {
        assert_eq!(encode_uri_component("a b&c"), "a%20b%26c");
        assert_eq!(encode_uri_component("é"), "%C3%A9");
    }
}
