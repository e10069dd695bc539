//! `RegExp` on top of the `regex` crate.
//!
//! Patterns are translated into `regex` syntax where the two dialects
//! disagree on a common construct. Lookaround and backreferences have no
//! equivalent and fail at construction with a `SyntaxError`. Offsets seen by
//! user code are UTF-16 indices, as in JS.

use regex::{Captures, Regex};
use std::rc::Rc;

use super::builtins::{arg, method};
use super::interp::{set_own, throw, Completion, Interpreter};
use super::value::*;

pub struct JsRegExp {
    pub source: String,
    pub flags: String,
    pub regex: Regex,
    pub global: bool,
    pub sticky: bool,
}

impl JsRegExp {
    fn has_names(&self) -> bool {
        self.regex.capture_names().flatten().next().is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTRUCTION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn compile(source: &str, flags: &str) -> Completion<JsRegExp> {
    let mut inline = String::new();
    for (idx, flag) in flags.char_indices() {
        if !"dgimsuvy".contains(flag) || flags[..idx].contains(flag) {
            return throw(
                "SyntaxError",
                format!("Invalid flags supplied to RegExp constructor '{}'", flags),
            );
        }
        if matches!(flag, 'i' | 'm' | 's') {
            inline.push(flag);
        }
    }
    let translated = translate(source);
    let pattern = if inline.is_empty() {
        translated
    } else {
        format!("(?{}){}", inline, translated)
    };
    match Regex::new(&pattern) {
        Ok(regex) => Ok(JsRegExp {
            source: if source.is_empty() { "(?:)".to_string() } else { source.to_string() },
            flags: flags.to_string(),
            regex,
            global: flags.contains('g'),
            sticky: flags.contains('y'),
        }),
        Err(err) => throw(
            "SyntaxError",
            format!(
                "Invalid regular expression: /{}/{}: {}",
                source,
                flags,
                err.to_string().lines().last().unwrap_or("invalid pattern")
            ),
        ),
    }
}

/// A fresh `RegExp` object, as produced by a literal or the constructor.
pub fn new_regexp(source: &str, flags: &str) -> Completion<Value> {
    let compiled = compile(source, flags)?;
    let obj = alloc(ObjectKind::RegExp(Rc::new(compiled)), None);
    obj.borrow_mut()
        .props
        .insert("lastIndex".to_string(), Value::Num(0.0));
    Ok(Value::Object(obj))
}

pub fn regexp_of(value: &Value) -> Option<Rc<JsRegExp>> {
    match value {
        Value::Object(obj) => match &obj.borrow().kind {
            ObjectKind::RegExp(re) => Some(re.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// `\d`, `\w` and their negations are ASCII-only in JS; `[^]` matches
/// anything.
fn translate(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut in_class = false;
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('d') if in_class => out.push_str("0-9"),
                Some('w') if in_class => out.push_str("0-9A-Za-z_"),
                Some('d') => out.push_str("[0-9]"),
                Some('D') if !in_class => out.push_str("[^0-9]"),
                Some('w') => out.push_str("[0-9A-Za-z_]"),
                Some('W') if !in_class => out.push_str("[^0-9A-Za-z_]"),
                Some('/') => out.push('/'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push_str("\\\\"),
            },
            '[' if !in_class => {
                if chars.peek() == Some(&'^') {
                    chars.next();
                    if chars.peek() == Some(&']') {
                        chars.next();
                        out.push_str("[\\s\\S]");
                        continue;
                    }
                    out.push_str("[^");
                } else {
                    out.push('[');
                }
                in_class = true;
            }
            '[' => out.push_str("\\["),
            ']' if in_class => {
                in_class = false;
                out.push(']');
            }
            other => out.push(other),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// OFFSETS
// ═══════════════════════════════════════════════════════════════════════════════

fn utf16_offset(s: &str, byte: usize) -> usize {
    s.get(..byte).map_or(0, |prefix| prefix.encode_utf16().count())
}

/// Byte offset of UTF-16 index `index`, rounded up to a char boundary.
fn byte_offset(s: &str, index: usize) -> Option<usize> {
    let mut units = 0;
    for (byte, c) in s.char_indices() {
        if units >= index {
            return Some(byte);
        }
        units += c.len_utf16();
    }
    (units >= index).then_some(s.len())
}

// ═══════════════════════════════════════════════════════════════════════════════
// MATCHING
// ═══════════════════════════════════════════════════════════════════════════════

fn group_value(caps: &Captures<'_>, idx: usize) -> Value {
    caps.get(idx).map_or(Value::Undefined, |m| Value::from(m.as_str()))
}

fn groups(re: &JsRegExp, caps: &Captures<'_>) -> Value {
    if !re.has_names() {
        return Value::Undefined;
    }
    Value::object(re.regex.capture_names().flatten().map(|name| {
        let value = caps.name(name).map_or(Value::Undefined, |m| Value::from(m.as_str()));
        (name.to_string(), value)
    }))
}

fn match_result(re: &JsRegExp, caps: &Captures<'_>, input: &str) -> Value {
    let result = Value::array((0..caps.len()).map(|idx| group_value(caps, idx)).collect());
    let start = caps.get(0).map_or(0, |m| m.start());
    set_own(&result, "index", Value::Num(utf16_offset(input, start) as f64));
    set_own(&result, "input", Value::from(input));
    set_own(&result, "groups", groups(re, caps));
    result
}

fn this_regexp(this: &Value) -> Completion<Rc<JsRegExp>> {
    match regexp_of(this) {
        Some(re) => Ok(re),
        None => throw(
            "TypeError",
            "RegExp.prototype method called on incompatible receiver",
        ),
    }
}

/// `RegExp.prototype.exec`, honoring `lastIndex` for global and sticky
/// expressions.
pub fn exec(interp: &mut Interpreter, this: &Value, input: &str) -> Completion<Value> {
    let re = this_regexp(this)?;
    let tracking = re.global || re.sticky;
    let start = if tracking {
        let last = interp.get_property(this, "lastIndex")?.to_number();
        if last.is_nan() || last < 0.0 {
            0
        } else {
            last as usize
        }
    } else {
        0
    };
    let found = byte_offset(input, start).and_then(|byte_start| {
        re.regex
            .captures_at(input, byte_start)
            .filter(|caps| !re.sticky || caps.get(0).is_some_and(|m| m.start() == byte_start))
    });
    let Some(caps) = found else {
        if tracking {
            set_own(this, "lastIndex", Value::Num(0.0));
        }
        return Ok(Value::Null);
    };
    if tracking {
        let end = caps.get(0).map_or(0, |m| m.end());
        set_own(this, "lastIndex", Value::Num(utf16_offset(input, end) as f64));
    }
    Ok(match_result(&re, &caps, input))
}

/// Expand `$$`, `$&`, `` $` ``, `$'`, `$n` and `$<name>` in a replacement.
fn expand(template: &str, caps: &Captures<'_>, input: &str, has_names: bool) -> String {
    let group_count = caps.len() - 1;
    let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
    let group_text = |idx: usize| caps.get(idx).map_or("", |m| m.as_str()).to_string();

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        let bytes = tail.as_bytes();
        let expanded = match bytes.first() {
            Some(b'$') => Some(("$".to_string(), 1)),
            Some(b'&') => Some((input[start..end].to_string(), 1)),
            Some(b'`') => Some((input[..start].to_string(), 1)),
            Some(b'\'') => Some((input[end..].to_string(), 1)),
            Some(b'<') if has_names => tail.find('>').map(|close| {
                let name = &tail[1..close];
                (caps.name(name).map_or("", |m| m.as_str()).to_string(), close + 1)
            }),
            Some(d) if d.is_ascii_digit() => {
                let one = (d - b'0') as usize;
                let two = bytes
                    .get(1)
                    .filter(|b| b.is_ascii_digit())
                    .map(|b| one * 10 + (b - b'0') as usize);
                match two.filter(|n| (1..=group_count).contains(n)) {
                    Some(n) => Some((group_text(n), 2)),
                    None if (1..=group_count).contains(&one) => Some((group_text(one), 1)),
                    None => None,
                }
            }
            _ => None,
        };
        match expanded {
            Some((text, used)) => {
                out.push_str(&text);
                rest = &tail[used..];
            }
            None => {
                out.push('$');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `String.prototype.replace` with a `RegExp` pattern. Global expressions
/// replace every match.
pub fn replace(
    interp: &mut Interpreter,
    input: &str,
    pattern: &Value,
    re: &JsRegExp,
    replacement: &Value,
) -> Completion<String> {
    let matches: Vec<Captures<'_>> = if re.global {
        set_own(pattern, "lastIndex", Value::Num(0.0));
        re.regex.captures_iter(input).collect()
    } else {
        re.regex.captures(input).into_iter().collect()
    };
    let template = if replacement.is_callable() {
        None
    } else {
        Some(interp.to_string_value(replacement)?)
    };

    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in &matches {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&input[last..whole.start()]);
        let piece = match &template {
            Some(template) => expand(template, caps, input, re.has_names()),
            None => {
                let mut args: Vec<Value> = (0..caps.len()).map(|idx| group_value(caps, idx)).collect();
                args.push(Value::Num(utf16_offset(input, whole.start()) as f64));
                args.push(Value::from(input));
                if re.has_names() {
                    args.push(groups(re, caps));
                }
                let result = interp.call(replacement, Value::Undefined, args)?;
                interp.to_string_value(&result)?
            }
        };
        out.push_str(&piece);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

/// `String.prototype.match`.
pub fn match_string(interp: &mut Interpreter, input: &str, pattern: &Value) -> Completion<Value> {
    let re = this_regexp(pattern)?;
    if !re.global {
        return exec(interp, pattern, input);
    }
    set_own(pattern, "lastIndex", Value::Num(0.0));
    let found: Vec<Value> = re
        .regex
        .find_iter(input)
        .map(|m| Value::from(m.as_str()))
        .collect();
    Ok(if found.is_empty() {
        Value::Null
    } else {
        Value::array(found)
    })
}

/// `String.prototype.matchAll`, collected eagerly.
pub fn match_all(input: &str, re: &JsRegExp) -> Completion<Value> {
    if !re.global {
        return throw(
            "TypeError",
            "String.prototype.matchAll called with a non-global RegExp argument",
        );
    }
    Ok(Value::array(
        re.regex
            .captures_iter(input)
            .map(|caps| match_result(re, &caps, input))
            .collect(),
    ))
}

/// `String.prototype.search`.
pub fn search(input: &str, re: &JsRegExp) -> f64 {
    re.regex
        .find(input)
        .map_or(-1.0, |m| utf16_offset(input, m.start()) as f64)
}

/// `String.prototype.split` with a `RegExp` separator. Capture groups are
/// spliced into the output.
pub fn split(input: &str, re: &JsRegExp, limit: usize) -> Vec<Value> {
    let mut parts = Vec::new();
    if limit == 0 {
        return parts;
    }
    if input.is_empty() {
        if re.regex.is_match(input) {
            return parts;
        }
        parts.push(Value::from(input));
        return parts;
    }
    let mut last = 0;
    for caps in re.regex.captures_iter(input) {
        let Some(whole) = caps.get(0) else { continue };
        let empty = whole.start() == whole.end();
        if empty && (whole.start() == 0 || whole.start() >= input.len() || whole.start() == last) {
            continue;
        }
        parts.push(Value::from(&input[last..whole.start()]));
        for idx in 1..caps.len() {
            parts.push(group_value(&caps, idx));
        }
        if parts.len() >= limit {
            parts.truncate(limit);
            return parts;
        }
        last = whole.end();
    }
    parts.push(Value::from(&input[last..]));
    parts.truncate(limit);
    parts
}

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBALS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn prototype() -> ObjRef {
    let proto = alloc(ObjectKind::Plain, None);
    method(&proto, "exec", |interp, this, args| {
        let input = interp.to_string_value(&arg(&args, 0))?;
        exec(interp, &this, &input)
    });
    method(&proto, "test", |interp, this, args| {
        let input = interp.to_string_value(&arg(&args, 0))?;
        Ok(Value::Bool(!matches!(exec(interp, &this, &input)?, Value::Null)))
    });
    method(&proto, "toString", |_, this, _| {
        let re = this_regexp(&this)?;
        Ok(Value::from(format!("/{}/{}", re.source, re.flags)))
    });
    proto
}

pub fn constructor() -> Value {
    Value::native("RegExp", |interp, _, args| {
        let pattern = arg(&args, 0);
        let flags = match arg(&args, 1) {
            Value::Undefined => None,
            other => Some(interp.to_string_value(&other)?),
        };
        match regexp_of(&pattern) {
            Some(re) => new_regexp(&re.source, flags.as_deref().unwrap_or(&re.flags)),
            None => {
                let source = match pattern {
                    Value::Undefined => String::new(),
                    other => interp.to_string_value(&other)?,
                };
                new_regexp(&source, flags.as_deref().unwrap_or(""))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compiled(source: &str, flags: &str) -> JsRegExp {
        match compile(source, flags) {
            Ok(re) => re,
            Err(_) => panic!("invalid pattern /{}/{}", source, flags),
        }
    }

    #[test]
    fn test_translate_ascii_classes() {
        assert_eq!(translate(r"\d+px"), "[0-9]+px");
        assert_eq!(translate(r"[\d.]+"), "[0-9.]+");
        assert_eq!(translate(r"a\/b"), "a/b");
        assert_eq!(translate("[^]"), r"[\s\S]");
        assert_eq!(translate(r"[^\s]"), r"[^\s]");
    }

    #[test]
    fn test_utf16_offsets() {
        let s = "a😀b";
        assert_eq!(utf16_offset(s, 5), 3);
        assert_eq!(byte_offset(s, 3), Some(5));
        assert_eq!(byte_offset(s, 4), Some(6));
        assert_eq!(byte_offset(s, 9), None);
    }

    #[test]
    fn test_invalid_flags_and_lookaround_are_syntax_errors() {
        assert!(compile("a", "gg").is_err());
        assert!(compile("a", "q").is_err());
        assert!(compile("(?=a)", "").is_err());
        assert!(compile("(?<year>\\d{4})", "u").is_ok());
    }

    #[test]
    fn test_split_matches_js() {
        let re = compiled("(?:)", "");
        let parts: Vec<String> = split("abc", &re, usize::MAX)
            .iter()
            .map(Value::to_js_string)
            .collect();
        assert_eq!(parts, vec!["a", "b", "c"]);

        let re = compiled(r"\s*(,)\s*", "");
        let parts: Vec<String> = split("a , b,c", &re, usize::MAX)
            .iter()
            .map(Value::to_js_string)
            .collect();
        assert_eq!(parts, vec!["a", ",", "b", ",", "c"]);
    }
}
