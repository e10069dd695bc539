//! Lexical environments.
//!
//! A chain of frames sharing ownership of their parent. Slots without a
//! value are in their temporal dead zone.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::value::Value;

#[derive(Clone)]
pub struct Env {
    inner: Rc<EnvInner>,
}

struct EnvInner {
    vars: RefCell<HashMap<String, Slot>>,
    parent: Option<Env>,
    /// Function and module frames receive `var` declarations.
    var_scope: bool,
}

struct Slot {
    value: Option<Value>,
    mutable: bool,
}

pub enum Lookup {
    Found(Value),
    Uninitialized,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignError {
    Missing,
    Constant,
    Uninitialized,
}

impl Env {
    pub fn root() -> Env {
        Env::make(None, true)
    }

    fn make(parent: Option<Env>, var_scope: bool) -> Env {
        Env {
            inner: Rc::new(EnvInner {
                vars: RefCell::new(HashMap::new()),
                parent,
                var_scope,
            }),
        }
    }

    /// Block frame.
    pub fn child(&self) -> Env {
        Env::make(Some(self.clone()), false)
    }

    /// Function or module frame.
    pub fn function_child(&self) -> Env {
        Env::make(Some(self.clone()), true)
    }

    /// Create or overwrite a binding in this frame. `None` starts it in its
    /// dead zone.
    pub fn declare(&self, name: &str, value: Option<Value>, mutable: bool) {
        self.inner
            .vars
            .borrow_mut()
            .insert(name.to_string(), Slot { value, mutable });
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.inner.vars.borrow().contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Lookup {
        let mut env = Some(self);
        while let Some(current) = env {
            if let Some(slot) = current.inner.vars.borrow().get(name) {
                return match &slot.value {
                    Some(value) => Lookup::Found(value.clone()),
                    None => Lookup::Uninitialized,
                };
            }
            env = current.inner.parent.as_ref();
        }
        Lookup::Missing
    }

    pub fn assign(&self, name: &str, value: Value) -> Result<(), AssignError> {
        let mut env = Some(self);
        while let Some(current) = env {
            if let Some(slot) = current.inner.vars.borrow_mut().get_mut(name) {
                if slot.value.is_none() {
                    return Err(AssignError::Uninitialized);
                }
                if !slot.mutable {
                    return Err(AssignError::Constant);
                }
                slot.value = Some(value);
                return Ok(());
            }
            env = current.inner.parent.as_ref();
        }
        Err(AssignError::Missing)
    }

    /// Nearest frame that owns `var` declarations.
    pub fn var_scope(&self) -> Env {
        let mut env = self.clone();
        loop {
            if env.inner.var_scope {
                return env;
            }
            match env.inner.parent.clone() {
                Some(parent) => env = parent,
                None => return env,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing_and_assignment() {
        let root = Env::root();
        root.declare("a", Some(Value::from(1.0)), true);
        let block = root.child();
        block.declare("a", Some(Value::from(2.0)), false);

        assert!(matches!(block.lookup("a"), Lookup::Found(Value::Num(n)) if n == 2.0));
        assert_eq!(block.assign("a", Value::Null), Err(AssignError::Constant));
        assert!(root.assign("a", Value::Null).is_ok());
        assert!(matches!(root.lookup("a"), Lookup::Found(Value::Null)));
        assert_eq!(block.assign("b", Value::Null), Err(AssignError::Missing));
    }

    #[test]
    fn test_dead_zone() {
        let root = Env::root();
        root.declare("x", None, true);
        assert!(matches!(root.lookup("x"), Lookup::Uninitialized));
        assert_eq!(root.assign("x", Value::Null), Err(AssignError::Uninitialized));
        root.declare("x", Some(Value::Null), true);
        assert!(matches!(root.lookup("x"), Lookup::Found(Value::Null)));
    }

    #[test]
    fn test_var_scope() {
        let root = Env::root();
        let func = root.function_child();
        let block = func.child().child();
        block.var_scope().declare("v", Some(Value::Bool(true)), true);
        assert!(func.has_own("v"));
        assert!(!root.has_own("v"));
    }
}
