//! Tree-walking interpreter over [`crate::ast`].
//!
//! Executes modules in CommonJS shape: each file gets its own `module`,
//! `exports` and `require`, and ESM syntax is executed against those.
//! Promises settle synchronously, so `await` unwraps in place.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::builtins::{self, Intrinsics};
use super::env::{AssignError, Env, Lookup};
use super::host::Host;
use super::regexp::new_regexp;
use super::resolve::{builtin_name, Resolver, SUPPORTED_BUILTINS};
use super::value::*;
use crate::ast::*;
use crate::cache::{EvalCache, EvalCacheKey};
use crate::classify::{to_int32, to_uint32};
use crate::lower::parse_program;
use crate::options::{CompiledRules, PrevalOptions, RuleAction};
use crate::printer::{number_to_string, print_expr};

const MAX_CALL_DEPTH: usize = 64;
const MAX_ARRAY_GROWTH: usize = 1 << 20;

/// Non-local control flow out of a statement or expression.
pub enum Flow {
    Throw(Value),
    Return(Value),
    Break,
    Continue,
    /// `a?.b` met a nullish base; caught at the enclosing chain.
    ShortCircuit,
}

pub type Completion<T = Value> = Result<T, Flow>;

/// Throw a fresh error object of the given constructor name.
pub fn throw<T>(name: &str, message: impl Into<String>) -> Completion<T> {
    Err(Flow::Throw(Value::error(name, &message.into())))
}

#[derive(Clone, Copy)]
enum BindMode {
    Lexical { mutable: bool },
    Var,
    Assign,
}

enum Reference {
    Binding(String),
    Property(Value, String),
}

pub struct Interpreter {
    pub(super) globals: Env,
    pub(super) intrinsics: Intrinsics,
    pub(super) host: Rc<dyn Host>,
    pub(super) options: PrevalOptions,
    resolver: Resolver,
    rules: CompiledRules,
    modules: HashMap<PathBuf, ObjRef>,
    builtin_modules: HashMap<String, Value>,
    pub(super) dependencies: BTreeMap<String, Vec<String>>,
    pub(super) eval_cache: EvalCache<Value>,
    pub(super) executions: usize,
    pub(super) random_state: u64,
    depth: usize,
}

impl Interpreter {
    pub fn new(options: &PrevalOptions, host: Rc<dyn Host>) -> Result<Self, regex::Error> {
        let rules = CompiledRules::new(&options.rules)?;
        let globals = Env::root();
        let intrinsics = builtins::install(&globals, options);
        let resolver = Resolver::new(
            host.clone(),
            options.extensions.clone(),
            options.root_dir.as_ref().map(PathBuf::from),
        );
        Ok(Self {
            globals,
            intrinsics,
            host,
            options: options.clone(),
            resolver,
            rules,
            modules: HashMap::new(),
            builtin_modules: HashMap::new(),
            dependencies: BTreeMap::new(),
            eval_cache: EvalCache::new(),
            executions: 0,
            random_state: 0x2545_f491_4f6c_dd1d,
            depth: 0,
        })
    }

    /// Drop every module record and the dependency lists gathered with them.
    pub fn clear_modules(&mut self) {
        self.modules.clear();
        self.dependencies.clear();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MODULES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Execute `text` as a standalone module named `filename`, returning its
    /// exports. The record is not registered, so the same path can still be
    /// required as a regular module.
    pub fn evaluate_standalone(
        &mut self,
        filename: &str,
        text: &str,
        identity: Vec<String>,
    ) -> Completion<Value> {
        let record = new_module_record(filename);
        self.execute(&record, filename, text, identity)
    }

    pub fn require(&mut self, from: &str, specifier: &str) -> Completion<Value> {
        self.dependencies
            .entry(from.to_string())
            .or_default()
            .push(specifier.to_string());

        if let Some(name) = builtin_name(specifier) {
            if !SUPPORTED_BUILTINS.contains(&name) {
                return throw(
                    "Error",
                    format!(
                        "Unable to import \"{}\". Importing Node builtins is not supported in the sandbox.",
                        specifier
                    ),
                );
            }
            if let Some(module) = self.builtin_modules.get(name) {
                return Ok(module.clone());
            }
            let module = builtins::node_module(name);
            self.builtin_modules.insert(name.to_string(), module.clone());
            return Ok(module);
        }

        let from_dir = parent_dir(from);
        let Some(path) = self.resolver.resolve(&from_dir, specifier) else {
            return throw(
                "Error",
                format!("Cannot find module '{}' from '{}'", specifier, from),
            );
        };
        if let Some(record) = self.modules.get(&path) {
            return Ok(module_exports(record));
        }

        let filename = path.to_string_lossy().into_owned();
        let record = new_module_record(&filename);
        // Registered before execution so cycles observe partial exports.
        self.modules.insert(path.clone(), record.clone());

        if !self.options.is_evaluable(&filename) {
            set_own(&Value::Object(record.clone()), "exports", Value::from(specifier));
            return Ok(Value::from(specifier));
        }

        let text = match self.host.read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                self.modules.remove(&path);
                return throw("Error", err.to_string());
            }
        };

        if filename.ends_with(".json") {
            return match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(json) => {
                    let exports = Value::from_json(&json);
                    set_own(&Value::Object(record), "exports", exports.clone());
                    Ok(exports)
                }
                Err(err) => {
                    self.modules.remove(&path);
                    throw("SyntaxError", format!("{}: {}", filename, err))
                }
            };
        }

        tracing::debug!(module = %filename, "loading module");
        match self.execute(&record, &filename, &text, vec![filename.clone()]) {
            Ok(_) => Ok(module_exports(&record)),
            Err(flow) => {
                self.modules.remove(&path);
                Err(flow)
            }
        }
    }

    fn execute(
        &mut self,
        record: &ObjRef,
        filename: &str,
        text: &str,
        identity: Vec<String>,
    ) -> Completion<Value> {
        let key = EvalCacheKey::new(identity, text);
        if let Some(exports) = self.eval_cache.get(&key) {
            tracing::debug!(module = %filename, "evaluation cache hit");
            let exports = exports.clone();
            record
                .borrow_mut()
                .props
                .insert("exports".into(), exports.clone());
            return Ok(exports);
        }

        let no_defines = BTreeMap::new();
        let defines = match self.rules.action_for(filename) {
            RuleAction::Transpile => &self.options.defines,
            RuleAction::Ignore => &no_defines,
        };
        let program = match parse_program(text, filename, defines) {
            Ok(program) => program,
            Err(err) => return throw("SyntaxError", err.to_string()),
        };

        self.executions += 1;
        let env = self.module_env(record, filename);
        match self.run_module(&program, &env, record, filename) {
            Ok(()) | Err(Flow::Return(_)) => {}
            Err(Flow::Throw(error)) => {
                append_stack_frame(&error, filename);
                return Err(Flow::Throw(error));
            }
            Err(_) => {}
        }

        record
            .borrow_mut()
            .props
            .insert("loaded".into(), Value::Bool(true));
        let exports = module_exports(record);
        self.eval_cache.insert(key, exports.clone());
        Ok(exports)
    }

    fn module_env(&mut self, record: &ObjRef, filename: &str) -> Env {
        let env = self.globals.function_child();
        let exports = module_exports(record);
        let dirname = parent_dir(filename).to_string_lossy().into_owned();
        env.declare("module", Some(Value::Object(record.clone())), false);
        env.declare("exports", Some(exports.clone()), true);
        env.declare("this", Some(exports), false);
        env.declare("require", Some(self.require_function(filename)), false);
        env.declare("__filename", Some(Value::from(filename)), false);
        env.declare("__dirname", Some(Value::from(dirname)), false);
        env
    }

    fn require_function(&self, filename: &str) -> Value {
        let from = filename.to_string();
        let require = Value::native("require", move |interp, _this, args| {
            let id = args.first().map(Value::to_js_string).unwrap_or_default();
            interp.require(&from, &id)
        });
        let from = filename.to_string();
        let resolve = Value::native("resolve", move |interp, _this, args| {
            let id = args.first().map(Value::to_js_string).unwrap_or_default();
            if builtin_name(&id).is_some() {
                return Ok(Value::from(id));
            }
            match interp.resolver.resolve(&parent_dir(&from), &id) {
                Some(path) => Ok(Value::from(path.to_string_lossy().into_owned())),
                None => throw("Error", format!("Cannot find module '{}'", id)),
            }
        });
        set_own(&require, "resolve", resolve);
        require
    }

    fn run_module(
        &mut self,
        program: &Program,
        env: &Env,
        record: &ObjRef,
        filename: &str,
    ) -> Completion<()> {
        if program.body.iter().any(|stmt| matches!(stmt, Stmt::Export(_))) {
            self.set_export(record, "__esModule", Value::Bool(true))?;
        }
        hoist_vars(&program.body, env);
        self.hoist_declarations(&program.body, env);

        for stmt in &program.body {
            if let Stmt::Import(decl) = stmt {
                self.exec_import(decl, env, filename)?;
            }
        }

        let mut deferred = Vec::new();
        for stmt in &program.body {
            match stmt {
                Stmt::Import(_) => {}
                Stmt::Export(export) => {
                    self.exec_export(export, env, record, filename, &mut deferred)?
                }
                other => self.exec_stmt(other, env)?,
            }
        }
        for spec in deferred {
            let value = self.lookup(&spec.local, env)?;
            self.set_export(record, &spec.exported, value)?;
        }
        Ok(())
    }

    fn exec_import(&mut self, decl: &ImportDecl, env: &Env, filename: &str) -> Completion<()> {
        let module = self.require(filename, &decl.source)?;
        let es_module = !module.is_nullish() && self.get_property(&module, "__esModule")?.truthy();
        for spec in &decl.specifiers {
            let (local, value) = match spec {
                ImportSpec::Default { local } => {
                    let value = if es_module {
                        self.get_property(&module, "default")?
                    } else {
                        module.clone()
                    };
                    (local, value)
                }
                ImportSpec::Namespace { local } => (local, module.clone()),
                ImportSpec::Named { imported, local } => {
                    let value = if imported == "default" && !es_module {
                        module.clone()
                    } else if module.is_nullish() {
                        Value::Undefined
                    } else {
                        self.get_property(&module, imported)?
                    };
                    (local, value)
                }
            };
            env.declare(&local.name, Some(value), false);
        }
        Ok(())
    }

    fn exec_export(
        &mut self,
        export: &ExportStmt,
        env: &Env,
        record: &ObjRef,
        filename: &str,
        deferred: &mut Vec<ExportSpec>,
    ) -> Completion<()> {
        match &export.decl {
            ExportDecl::Decl(stmt) => {
                self.exec_stmt(stmt, env)?;
                for name in declared_names(stmt) {
                    let value = self.lookup(&name, env)?;
                    self.set_export(record, &name, value)?;
                }
            }
            ExportDecl::Default(expr) => {
                let value = self.eval_named(expr, "default", env)?;
                self.set_export(record, "default", value)?;
            }
            ExportDecl::DefaultFunction(func) => {
                let value = match &func.id {
                    Some(id) => self.lookup(&id.name, env)?,
                    None => make_function(func, env, "default"),
                };
                self.set_export(record, "default", value)?;
            }
            ExportDecl::List {
                specifiers,
                source: None,
            } => deferred.extend(specifiers.iter().cloned()),
            ExportDecl::List {
                specifiers,
                source: Some(source),
            } => {
                let module = self.require(filename, source)?;
                for spec in specifiers {
                    let value = self.get_property(&module, &spec.local)?;
                    self.set_export(record, &spec.exported, value)?;
                }
            }
            ExportDecl::All {
                source,
                exported: None,
            } => {
                let module = self.require(filename, source)?;
                for (key, value) in own_entries(&module) {
                    if key != "default" && key != "__esModule" {
                        self.set_export(record, &key, value)?;
                    }
                }
            }
            ExportDecl::All {
                source,
                exported: Some(name),
            } => {
                let module = self.require(filename, source)?;
                self.set_export(record, name, module)?;
            }
        }
        Ok(())
    }

    fn set_export(&mut self, record: &ObjRef, name: &str, value: Value) -> Completion<()> {
        let exports = module_exports(record);
        self.set_property(&exports, name, value)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATEMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn hoist_declarations(&mut self, stmts: &[Stmt], env: &Env) {
        for stmt in stmts {
            self.hoist_declaration(stmt, env);
        }
    }

    fn hoist_declaration(&mut self, stmt: &Stmt, env: &Env) {
        match stmt {
            Stmt::Var(decl) if decl.kind != VarKind::Var => {
                let mut names = Vec::new();
                for declarator in &decl.declarations {
                    declarator.id.bound_names(&mut names);
                }
                for name in names {
                    env.declare(&name, None, decl.kind == VarKind::Let);
                }
            }
            Stmt::Function(func) => declare_function(func, env),
            Stmt::Class { id, .. } => {
                env.declare(&id.name, Some(unsupported_class(&id.name)), true)
            }
            Stmt::Export(ExportStmt {
                decl: ExportDecl::Decl(inner),
                ..
            }) => self.hoist_declaration(inner, env),
            Stmt::Export(ExportStmt {
                decl: ExportDecl::DefaultFunction(func),
                ..
            }) => declare_function(func, env),
            _ => {}
        }
    }

    pub(super) fn exec_block(&mut self, stmts: &[Stmt], env: &Env) -> Completion<()> {
        self.hoist_declarations(stmts, env);
        for stmt in stmts {
            self.exec_stmt(stmt, env)?;
        }
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &Env) -> Completion<()> {
        match stmt {
            Stmt::Expr { expr, .. } => {
                self.eval(expr, env)?;
                Ok(())
            }
            Stmt::Var(decl) => self.exec_var_decl(decl, env),
            Stmt::Function(func) => {
                if let Some(id) = &func.id {
                    if !env.has_own(&id.name) {
                        declare_function(func, env);
                    }
                }
                Ok(())
            }
            Stmt::Class { id, .. } => {
                if !env.has_own(&id.name) {
                    env.declare(&id.name, Some(unsupported_class(&id.name)), true);
                }
                Ok(())
            }
            Stmt::Return { argument, .. } => {
                let value = match argument {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                Err(Flow::Return(value))
            }
            Stmt::If(stmt) => {
                if self.eval(&stmt.test, env)?.truthy() {
                    self.exec_stmt(&stmt.consequent, env)
                } else if let Some(alternate) = &stmt.alternate {
                    self.exec_stmt(alternate, env)
                } else {
                    Ok(())
                }
            }
            Stmt::Block(block) => self.exec_block(&block.body, &env.child()),
            Stmt::For(stmt) => self.exec_for(stmt, env),
            Stmt::ForEach(stmt) => self.exec_for_each(stmt, env),
            Stmt::While(stmt) => self.exec_while(stmt, env),
            Stmt::Switch(stmt) => self.exec_switch(stmt, env),
            Stmt::Break { .. } => Err(Flow::Break),
            Stmt::Continue { .. } => Err(Flow::Continue),
            Stmt::Throw { argument, .. } => Err(Flow::Throw(self.eval(argument, env)?)),
            Stmt::Try(stmt) => self.exec_try(stmt, env),
            Stmt::Import(_) => Ok(()),
            Stmt::Export(_) => throw("SyntaxError", "Unexpected export outside a module body"),
            Stmt::Empty { .. } => Ok(()),
            Stmt::Unsupported { what, .. } => unsupported(what),
        }
    }

    fn exec_var_decl(&mut self, decl: &VarDecl, env: &Env) -> Completion<()> {
        for declarator in &decl.declarations {
            let name = match &declarator.id {
                Pattern::Ident(id) => id.name.as_str(),
                _ => "",
            };
            match decl.kind {
                VarKind::Var => {
                    if let Some(init) = &declarator.init {
                        let value = self.eval_named(init, name, env)?;
                        self.bind_pattern(&declarator.id, value, env, BindMode::Var)?;
                    } else if !name.is_empty() && matches!(env.lookup(name), Lookup::Missing) {
                        env.var_scope().declare(name, Some(Value::Undefined), true);
                    }
                }
                VarKind::Let | VarKind::Const => {
                    let value = match &declarator.init {
                        Some(init) => self.eval_named(init, name, env)?,
                        None => Value::Undefined,
                    };
                    let mode = BindMode::Lexical {
                        mutable: decl.kind == VarKind::Let,
                    };
                    self.bind_pattern(&declarator.id, value, env, mode)?;
                }
            }
        }
        Ok(())
    }

    fn exec_loop_body(&mut self, body: &Stmt, env: &Env) -> Completion<bool> {
        match self.exec_stmt(body, env) {
            Ok(()) | Err(Flow::Continue) => Ok(true),
            Err(Flow::Break) => Ok(false),
            Err(other) => Err(other),
        }
    }

    fn exec_for(&mut self, stmt: &ForStmt, env: &Env) -> Completion<()> {
        let mut iter_env = env.child();
        let mut per_iteration = Vec::new();
        match &stmt.init {
            Some(ForInit::Var(decl)) => {
                if decl.kind != VarKind::Var {
                    for declarator in &decl.declarations {
                        declarator.id.bound_names(&mut per_iteration);
                    }
                }
                self.exec_var_decl(decl, &iter_env)?;
            }
            Some(ForInit::Expr(expr)) => {
                self.eval(expr, &iter_env)?;
            }
            None => {}
        }

        loop {
            if let Some(test) = &stmt.test {
                if !self.eval(test, &iter_env)?.truthy() {
                    break;
                }
            }
            if !self.exec_loop_body(&stmt.body, &iter_env)? {
                break;
            }
            // Closures created in the body keep the bindings of their own
            // iteration.
            if !per_iteration.is_empty() {
                let next = env.child();
                for name in &per_iteration {
                    let value = match iter_env.lookup(name) {
                        Lookup::Found(value) => Some(value),
                        _ => None,
                    };
                    next.declare(name, value, true);
                }
                iter_env = next;
            }
            if let Some(update) = &stmt.update {
                self.eval(update, &iter_env)?;
            }
        }
        Ok(())
    }

    fn exec_for_each(&mut self, stmt: &ForEachStmt, env: &Env) -> Completion<()> {
        let right = self.eval(&stmt.right, env)?;
        let items = match stmt.each {
            ForEachKind::Of => self.iterate(&right)?,
            ForEachKind::In => own_keys(&right).into_iter().map(Value::from).collect(),
        };
        let mode = match stmt.decl_kind {
            Some(VarKind::Var) => BindMode::Var,
            Some(kind) => BindMode::Lexical {
                mutable: kind == VarKind::Let,
            },
            None => BindMode::Assign,
        };
        for item in items {
            let iter_env = env.child();
            self.bind_pattern(&stmt.left, item, &iter_env, mode)?;
            if !self.exec_loop_body(&stmt.body, &iter_env)? {
                break;
            }
        }
        Ok(())
    }

    fn exec_while(&mut self, stmt: &WhileStmt, env: &Env) -> Completion<()> {
        if stmt.do_while && !self.exec_loop_body(&stmt.body, env)? {
            return Ok(());
        }
        while self.eval(&stmt.test, env)?.truthy() {
            if !self.exec_loop_body(&stmt.body, env)? {
                break;
            }
        }
        Ok(())
    }

    fn exec_switch(&mut self, stmt: &SwitchStmt, env: &Env) -> Completion<()> {
        let value = self.eval(&stmt.discriminant, env)?;
        let block_env = env.child();
        for case in &stmt.cases {
            self.hoist_declarations(&case.consequent, &block_env);
        }

        let mut start = None;
        for (idx, case) in stmt.cases.iter().enumerate() {
            if let Some(test) = &case.test {
                let candidate = self.eval(test, &block_env)?;
                if strict_equals(&value, &candidate) {
                    start = Some(idx);
                    break;
                }
            }
        }
        let Some(start) = start.or_else(|| stmt.cases.iter().position(|c| c.test.is_none()))
        else {
            return Ok(());
        };

        for case in &stmt.cases[start..] {
            for stmt in &case.consequent {
                match self.exec_stmt(stmt, &block_env) {
                    Ok(()) => {}
                    Err(Flow::Break) => return Ok(()),
                    Err(other) => return Err(other),
                }
            }
        }
        Ok(())
    }

    fn exec_try(&mut self, stmt: &TryStmt, env: &Env) -> Completion<()> {
        let mut result = self.exec_block(&stmt.block.body, &env.child());
        if let (Err(Flow::Throw(error)), Some(handler)) = (&result, &stmt.handler) {
            let error = error.clone();
            let catch_env = env.child();
            result = match &handler.param {
                Some(param) => {
                    self.bind_pattern(param, error, &catch_env, BindMode::Lexical { mutable: true })
                }
                None => Ok(()),
            };
            if result.is_ok() {
                result = self.exec_block(&handler.body.body, &catch_env);
            }
        }
        if let Some(finalizer) = &stmt.finalizer {
            self.exec_block(&finalizer.body, &env.child())?;
        }
        result
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BINDINGS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn lookup(&self, name: &str, env: &Env) -> Completion<Value> {
        match env.lookup(name) {
            Lookup::Found(value) => Ok(value),
            Lookup::Uninitialized => throw(
                "ReferenceError",
                format!("Cannot access '{}' before initialization", name),
            ),
            Lookup::Missing => throw("ReferenceError", format!("{} is not defined", name)),
        }
    }

    fn bind_name(&mut self, name: &str, value: Value, env: &Env, mode: BindMode) -> Completion<()> {
        match mode {
            BindMode::Lexical { mutable } => {
                env.declare(name, Some(value), mutable);
                Ok(())
            }
            BindMode::Var => {
                if env.assign(name, value.clone()).is_err() {
                    env.var_scope().declare(name, Some(value), true);
                }
                Ok(())
            }
            BindMode::Assign => match env.assign(name, value) {
                Ok(()) => Ok(()),
                Err(AssignError::Missing) => {
                    throw("ReferenceError", format!("{} is not defined", name))
                }
                Err(AssignError::Constant) => {
                    throw("TypeError", "Assignment to constant variable.")
                }
                Err(AssignError::Uninitialized) => throw(
                    "ReferenceError",
                    format!("Cannot access '{}' before initialization", name),
                ),
            },
        }
    }

    fn bind_pattern(
        &mut self,
        pattern: &Pattern,
        value: Value,
        env: &Env,
        mode: BindMode,
    ) -> Completion<()> {
        match pattern {
            Pattern::Ident(id) => self.bind_name(&id.name, value, env, mode),
            Pattern::Assign { left, right, .. } => {
                let value = if matches!(value, Value::Undefined) {
                    let name = match &**left {
                        Pattern::Ident(id) => id.name.as_str(),
                        _ => "",
                    };
                    self.eval_named(right, name, env)?
                } else {
                    value
                };
                self.bind_pattern(left, value, env, mode)
            }
            Pattern::Object { props, rest, .. } => {
                if value.is_nullish() {
                    return throw(
                        "TypeError",
                        format!("Cannot destructure '{}' as it is {}.", value.to_js_string(), value.to_js_string()),
                    );
                }
                let mut used = Vec::with_capacity(props.len());
                for prop in props {
                    let key = self.prop_key(&prop.key, env)?;
                    let item = self.get_property(&value, &key)?;
                    used.push(key);
                    self.bind_pattern(&prop.value, item, env, mode)?;
                }
                if let Some(rest) = rest {
                    let remaining = self
                        .entries(&value)?
                        .into_iter()
                        .filter(|(key, _)| !used.contains(key));
                    self.bind_pattern(rest, Value::object(remaining), env, mode)?;
                }
                Ok(())
            }
            Pattern::Array { elements, rest, .. } => {
                let items = self.iterate(&value)?;
                for (idx, element) in elements.iter().enumerate() {
                    if let Some(element) = element {
                        let item = items.get(idx).cloned().unwrap_or_default();
                        self.bind_pattern(element, item, env, mode)?;
                    }
                }
                if let Some(rest) = rest {
                    let remaining = items.get(elements.len()..).unwrap_or(&[]).to_vec();
                    self.bind_pattern(rest, Value::array(remaining), env, mode)?;
                }
                Ok(())
            }
            Pattern::Expr(expr) => match mode {
                BindMode::Assign => {
                    let reference = self.reference_of_expr(expr, env)?;
                    self.put_reference(&reference, value, env)
                }
                _ => throw("SyntaxError", "Invalid destructuring target"),
            },
        }
    }

    fn reference_of_expr(&mut self, expr: &Expr, env: &Env) -> Completion<Reference> {
        match expr {
            Expr::Ident(id) => Ok(Reference::Binding(id.name.clone())),
            Expr::Member(member) => {
                let object = self.eval(&member.object, env)?;
                let key = self.member_key(&member.property, env)?;
                Ok(Reference::Property(object, key))
            }
            _ => throw("SyntaxError", "Invalid left-hand side in assignment"),
        }
    }

    fn reference_of_pattern(&mut self, pattern: &Pattern, env: &Env) -> Completion<Reference> {
        match pattern {
            Pattern::Ident(id) => Ok(Reference::Binding(id.name.clone())),
            Pattern::Expr(expr) => self.reference_of_expr(expr, env),
            _ => throw("SyntaxError", "Invalid left-hand side in assignment"),
        }
    }

    fn get_reference(&mut self, reference: &Reference, env: &Env) -> Completion<Value> {
        match reference {
            Reference::Binding(name) => self.lookup(name, env),
            Reference::Property(object, key) => self.get_property(object, key),
        }
    }

    fn put_reference(&mut self, reference: &Reference, value: Value, env: &Env) -> Completion<()> {
        match reference {
            Reference::Binding(name) => self.bind_name(name, value, env, BindMode::Assign),
            Reference::Property(object, key) => self.set_property(object, key, value),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn eval(&mut self, expr: &Expr, env: &Env) -> Completion<Value> {
        match expr {
            Expr::Lit { value, .. } => Ok(match value {
                Lit::Null => Value::Null,
                Lit::Bool(b) => Value::Bool(*b),
                Lit::Num(n) => Value::Num(*n),
                Lit::Str(s) => Value::from(s.as_str()),
            }),
            Expr::Ident(id) => self.lookup(&id.name, env),
            Expr::This { .. } => Ok(match env.lookup("this") {
                Lookup::Found(value) => value,
                _ => Value::Undefined,
            }),
            Expr::Template(tpl) => self.eval_template(tpl, env),
            Expr::TaggedTemplate(tagged) => self.eval_tagged(tagged, env),
            Expr::Array { elements, .. } => self.eval_array(elements, env),
            Expr::Object { props, .. } => self.eval_object(props, env),
            Expr::Function(func) => Ok(make_function_expr(func, env, "")),
            Expr::Arrow(arrow) => Ok(make_arrow(arrow, env, "")),
            Expr::Unary {
                operator, argument, ..
            } => self.eval_unary(*operator, argument, env),
            Expr::Update {
                operator,
                prefix,
                target,
                ..
            } => self.eval_update(*operator, *prefix, target, env),
            Expr::Binary {
                operator,
                left,
                right,
                ..
            } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary(*operator, left, right)
            }
            Expr::Logical {
                operator,
                left,
                right,
                ..
            } => {
                let left = self.eval(left, env)?;
                let take_left = match operator {
                    LogicalOperator::And => !left.truthy(),
                    LogicalOperator::Or => left.truthy(),
                    LogicalOperator::Coalesce => !left.is_nullish(),
                };
                if take_left {
                    Ok(left)
                } else {
                    self.eval(right, env)
                }
            }
            Expr::Assign {
                operator,
                target,
                value,
                ..
            } => self.eval_assign(*operator, target, value, env),
            Expr::Cond {
                test,
                consequent,
                alternate,
                ..
            } => {
                if self.eval(test, env)?.truthy() {
                    self.eval(consequent, env)
                } else {
                    self.eval(alternate, env)
                }
            }
            Expr::Member(member) => {
                let object = self.eval(&member.object, env)?;
                if member.optional && object.is_nullish() {
                    return Err(Flow::ShortCircuit);
                }
                let key = self.member_key(&member.property, env)?;
                self.get_property(&object, &key)
            }
            Expr::Call(call) => self.eval_call(call, env),
            Expr::New(call) => {
                let callee = self.eval(&call.callee, env)?;
                let args = self.eval_arguments(&call.arguments, env)?;
                self.construct(&callee, args, &print_expr(&call.callee, None))
            }
            Expr::Chain { expr, .. } => match self.eval(expr, env) {
                Err(Flow::ShortCircuit) => Ok(Value::Undefined),
                other => other,
            },
            Expr::Seq { expressions, .. } => {
                let mut last = Value::Undefined;
                for expr in expressions {
                    last = self.eval(expr, env)?;
                }
                Ok(last)
            }
            Expr::Await { argument, .. } => {
                let value = self.eval(argument, env)?;
                await_value(value)
            }
            Expr::Jsx(element) => self.eval_jsx(element, env),
            Expr::Regex { pattern, flags, .. } => new_regexp(pattern, flags),
            Expr::Unsupported { what, .. } => unsupported(what),
        }
    }

    /// Evaluate, naming anonymous function values after their binding.
    fn eval_named(&mut self, expr: &Expr, name: &str, env: &Env) -> Completion<Value> {
        match expr {
            Expr::Arrow(arrow) => Ok(make_arrow(arrow, env, name)),
            Expr::Function(func) => Ok(make_function_expr(func, env, name)),
            other => self.eval(other, env),
        }
    }

    fn eval_template(&mut self, tpl: &Template, env: &Env) -> Completion<Value> {
        let mut out = String::new();
        for (idx, quasi) in tpl.quasis.iter().enumerate() {
            out.push_str(quasi.cooked.as_deref().unwrap_or(&quasi.raw));
            if let Some(expr) = tpl.expressions.get(idx) {
                let value = self.eval(expr, env)?;
                out.push_str(&self.to_string_value(&value)?);
            }
        }
        Ok(Value::from(out))
    }

    fn eval_tagged(&mut self, tagged: &TaggedTemplate, env: &Env) -> Completion<Value> {
        let (tag, this) = self.eval_callee(&tagged.tag, env)?;
        let strings = Value::array(
            tagged
                .quasi
                .quasis
                .iter()
                .map(|q| q.cooked.as_deref().map_or(Value::Undefined, Value::from))
                .collect(),
        );
        let raw = Value::array(
            tagged
                .quasi
                .quasis
                .iter()
                .map(|q| Value::from(q.raw.as_str()))
                .collect(),
        );
        set_own(&strings, "raw", raw);

        let mut args = vec![strings];
        for expr in &tagged.quasi.expressions {
            args.push(self.eval(expr, env)?);
        }
        if !tag.is_callable() {
            return throw(
                "TypeError",
                format!("{} is not a function", print_expr(&tagged.tag, None)),
            );
        }
        self.call(&tag, this, args)
    }

    fn eval_array(&mut self, elements: &[Option<ExprOrSpread>], env: &Env) -> Completion<Value> {
        let mut items = Vec::with_capacity(elements.len());
        for element in elements {
            match element {
                None => items.push(Value::Undefined),
                Some(ExprOrSpread { spread: true, expr }) => {
                    let value = self.eval(expr, env)?;
                    items.extend(self.iterate(&value)?);
                }
                Some(ExprOrSpread { expr, .. }) => items.push(self.eval(expr, env)?),
            }
        }
        Ok(Value::array(items))
    }

    fn eval_object(&mut self, props: &[Prop], env: &Env) -> Completion<Value> {
        let object = alloc(ObjectKind::Plain, None);
        for prop in props {
            match prop {
                Prop::KeyValue { key, value } => {
                    let key = self.prop_key(key, env)?;
                    let value = self.eval_named(value, &key, env)?;
                    let mut o = object.borrow_mut();
                    o.accessors.shift_remove(&key);
                    o.props.insert(key, value);
                }
                Prop::Accessor {
                    kind,
                    key,
                    function,
                } => {
                    let key = self.prop_key(key, env)?;
                    let func = make_function_expr(function, env, &key);
                    let mut o = object.borrow_mut();
                    o.props.shift_remove(&key);
                    let slot = o.accessors.entry(key).or_default();
                    match kind {
                        AccessorKind::Get => slot.get = Some(func),
                        AccessorKind::Set => slot.set = Some(func),
                    }
                }
                Prop::Spread(expr) => {
                    let source = self.eval(expr, env)?;
                    let entries = self.entries(&source)?;
                    let mut o = object.borrow_mut();
                    for (key, value) in entries {
                        o.accessors.shift_remove(&key);
                        o.props.insert(key, value);
                    }
                }
            }
        }
        Ok(Value::Object(object))
    }

    fn eval_unary(&mut self, op: UnaryOperator, argument: &Expr, env: &Env) -> Completion<Value> {
        match op {
            UnaryOperator::Typeof => {
                if let Expr::Ident(id) = argument {
                    if matches!(env.lookup(&id.name), Lookup::Missing) {
                        return Ok(Value::from("undefined"));
                    }
                }
                Ok(Value::from(self.eval(argument, env)?.type_of()))
            }
            UnaryOperator::Delete => {
                if let Expr::Member(member) = argument {
                    let object = self.eval(&member.object, env)?;
                    let key = self.member_key(&member.property, env)?;
                    delete_property(&object, &key);
                }
                Ok(Value::Bool(true))
            }
            UnaryOperator::Void => {
                self.eval(argument, env)?;
                Ok(Value::Undefined)
            }
            UnaryOperator::UnaryNegation => Ok(Value::Num(-self.eval(argument, env)?.to_number())),
            UnaryOperator::UnaryPlus => Ok(Value::Num(self.eval(argument, env)?.to_number())),
            UnaryOperator::LogicalNot => Ok(Value::Bool(!self.eval(argument, env)?.truthy())),
            UnaryOperator::BitwiseNot => {
                let n = self.eval(argument, env)?.to_number();
                Ok(Value::Num(!to_int32(n) as f64))
            }
        }
    }

    fn eval_update(
        &mut self,
        op: UpdateOperator,
        prefix: bool,
        target: &Expr,
        env: &Env,
    ) -> Completion<Value> {
        let reference = self.reference_of_expr(target, env)?;
        let old = self.get_reference(&reference, env)?.to_number();
        let new = match op {
            UpdateOperator::Increment => old + 1.0,
            UpdateOperator::Decrement => old - 1.0,
        };
        self.put_reference(&reference, Value::Num(new), env)?;
        Ok(Value::Num(if prefix { new } else { old }))
    }

    fn eval_assign(
        &mut self,
        op: AssignmentOperator,
        target: &Pattern,
        value: &Expr,
        env: &Env,
    ) -> Completion<Value> {
        if matches!(op, AssignmentOperator::Assign) {
            return match target {
                Pattern::Ident(id) => {
                    let value = self.eval_named(value, &id.name, env)?;
                    self.bind_name(&id.name, value.clone(), env, BindMode::Assign)?;
                    Ok(value)
                }
                Pattern::Expr(expr) => {
                    let reference = self.reference_of_expr(expr, env)?;
                    let value = self.eval(value, env)?;
                    self.put_reference(&reference, value.clone(), env)?;
                    Ok(value)
                }
                pattern => {
                    let value = self.eval(value, env)?;
                    self.bind_pattern(pattern, value.clone(), env, BindMode::Assign)?;
                    Ok(value)
                }
            };
        }

        let reference = self.reference_of_pattern(target, env)?;
        let current = self.get_reference(&reference, env)?;
        let result = match op {
            AssignmentOperator::LogicalAnd if !current.truthy() => return Ok(current),
            AssignmentOperator::LogicalOr if current.truthy() => return Ok(current),
            AssignmentOperator::LogicalNullish if !current.is_nullish() => return Ok(current),
            AssignmentOperator::LogicalAnd
            | AssignmentOperator::LogicalOr
            | AssignmentOperator::LogicalNullish => self.eval(value, env)?,
            other => {
                let rhs = self.eval(value, env)?;
                let Some(binary) = compound_operator(other) else {
                    return throw("SyntaxError", format!("Unsupported assignment {}", other.as_str()));
                };
                self.binary(binary, current, rhs)?
            }
        };
        self.put_reference(&reference, result.clone(), env)?;
        Ok(result)
    }

    /// Callee value plus the `this` it is called with.
    fn eval_callee(&mut self, callee: &Expr, env: &Env) -> Completion<(Value, Value)> {
        match callee {
            Expr::Member(member) => {
                let object = self.eval(&member.object, env)?;
                if member.optional && object.is_nullish() {
                    return Err(Flow::ShortCircuit);
                }
                let key = self.member_key(&member.property, env)?;
                let func = self.get_property(&object, &key)?;
                Ok((func, object))
            }
            other => Ok((self.eval(other, env)?, Value::Undefined)),
        }
    }

    fn eval_call(&mut self, call: &CallExpr, env: &Env) -> Completion<Value> {
        let (callee, this) = self.eval_callee(&call.callee, env)?;
        if call.optional && callee.is_nullish() {
            return Err(Flow::ShortCircuit);
        }
        let args = self.eval_arguments(&call.arguments, env)?;
        if !callee.is_callable() {
            return throw(
                "TypeError",
                format!("{} is not a function", print_expr(&call.callee, None)),
            );
        }
        self.call(&callee, this, args)
    }

    fn eval_arguments(&mut self, arguments: &[ExprOrSpread], env: &Env) -> Completion<Vec<Value>> {
        let mut args = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let value = self.eval(&argument.expr, env)?;
            if argument.spread {
                args.extend(self.iterate(&value)?);
            } else {
                args.push(value);
            }
        }
        Ok(args)
    }

    fn eval_jsx(&mut self, element: &JsxElement, env: &Env) -> Completion<Value> {
        let element_type = match &element.name {
            None => Value::from("Fragment"),
            Some(name) if is_intrinsic_tag(name) => Value::from(name.as_str()),
            Some(name) => {
                let mut parts = name.split('.');
                let head = parts.next().unwrap_or_default();
                let mut value = self.lookup(head, env)?;
                for part in parts {
                    value = self.get_property(&value, part)?;
                }
                value
            }
        };

        let props = alloc(ObjectKind::Plain, None);
        for attr in &element.attributes {
            match attr {
                JsxAttr::Attr { name, value } => {
                    let value = match value {
                        None => Value::Bool(true),
                        Some(JsxAttrValue::Str(s)) => Value::from(s.as_str()),
                        Some(JsxAttrValue::Expr(expr)) => self.eval(expr, env)?,
                        Some(JsxAttrValue::Element(inner)) => self.eval_jsx(inner, env)?,
                    };
                    props.borrow_mut().props.insert(name.clone(), value);
                }
                JsxAttr::Spread(expr) => {
                    let source = self.eval(expr, env)?;
                    let entries = self.entries(&source)?;
                    props.borrow_mut().props.extend(entries);
                }
            }
        }

        let mut children = Vec::new();
        for child in &element.children {
            match child {
                JsxChild::Text(text) => children.push(Value::from(text.as_str())),
                JsxChild::Expr(expr) => children.push(self.eval(expr, env)?),
                JsxChild::Element(inner) => children.push(self.eval_jsx(inner, env)?),
                JsxChild::Spread(expr) => {
                    let value = self.eval(expr, env)?;
                    children.extend(self.iterate(&value)?);
                }
            }
        }
        match children.len() {
            0 => {}
            1 => {
                let child = children.pop().unwrap_or_default();
                props.borrow_mut().props.insert("children".into(), child);
            }
            _ => {
                props
                    .borrow_mut()
                    .props
                    .insert("children".into(), Value::array(children));
            }
        }

        Ok(Value::object([
            ("type".to_string(), element_type),
            ("props".to_string(), Value::Object(props)),
        ]))
    }

    fn prop_key(&mut self, key: &PropKey, env: &Env) -> Completion<String> {
        match key {
            PropKey::Ident(name) | PropKey::Str(name) => Ok(name.clone()),
            PropKey::Num(n) => Ok(number_to_string(*n)),
            PropKey::Computed(expr) => Ok(self.eval(expr, env)?.to_property_key()),
        }
    }

    fn member_key(&mut self, property: &MemberProp, env: &Env) -> Completion<String> {
        match property {
            MemberProp::Static(name) => Ok(name.clone()),
            MemberProp::Computed(expr) => Ok(self.eval(expr, env)?.to_property_key()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // OPERATORS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn binary(&mut self, op: BinaryOperator, left: Value, right: Value) -> Completion<Value> {
        use BinaryOperator as B;

        match op {
            B::Addition => {
                let left = self.to_primitive(left)?;
                let right = self.to_primitive(right)?;
                if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
                    Ok(Value::from(format!(
                        "{}{}",
                        left.to_js_string(),
                        right.to_js_string()
                    )))
                } else {
                    Ok(Value::Num(left.to_number() + right.to_number()))
                }
            }
            B::Subtraction => Ok(Value::Num(left.to_number() - right.to_number())),
            B::Multiplication => Ok(Value::Num(left.to_number() * right.to_number())),
            B::Division => Ok(Value::Num(left.to_number() / right.to_number())),
            B::Remainder => Ok(Value::Num(left.to_number() % right.to_number())),
            B::Exponential => Ok(Value::Num(left.to_number().powf(right.to_number()))),
            B::BitwiseOR | B::BitwiseAnd | B::BitwiseXOR | B::ShiftLeft | B::ShiftRight
            | B::ShiftRightZeroFill => {
                let a = to_int32(left.to_number());
                let b = to_uint32(right.to_number());
                Ok(Value::Num(match op {
                    B::BitwiseOR => (a | b as i32) as f64,
                    B::BitwiseAnd => (a & b as i32) as f64,
                    B::BitwiseXOR => (a ^ b as i32) as f64,
                    B::ShiftLeft => a.wrapping_shl(b & 31) as f64,
                    B::ShiftRight => a.wrapping_shr(b & 31) as f64,
                    _ => (a as u32).wrapping_shr(b & 31) as f64,
                }))
            }
            B::StrictEquality => Ok(Value::Bool(strict_equals(&left, &right))),
            B::StrictInequality => Ok(Value::Bool(!strict_equals(&left, &right))),
            B::Equality => Ok(Value::Bool(loose_equals(&left, &right))),
            B::Inequality => Ok(Value::Bool(!loose_equals(&left, &right))),
            B::LessThan | B::GreaterThan | B::LessEqualThan | B::GreaterEqualThan => {
                let left = self.to_primitive(left)?;
                let right = self.to_primitive(right)?;
                let ordering = compare_values(&left, &right);
                Ok(Value::Bool(match op {
                    B::LessThan => ordering == Some(Ordering::Less),
                    B::GreaterThan => ordering == Some(Ordering::Greater),
                    B::LessEqualThan => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                    _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                }))
            }
            B::In => {
                if !matches!(right, Value::Object(_)) {
                    return throw(
                        "TypeError",
                        format!(
                            "Cannot use 'in' operator to search for '{}' in {}",
                            left.to_js_string(),
                            right.to_js_string()
                        ),
                    );
                }
                Ok(Value::Bool(self.has_property(&right, &left.to_property_key())))
            }
            B::Instanceof => Ok(Value::Bool(self.instance_of(&left, &right)?)),
        }
    }

    fn to_primitive(&mut self, value: Value) -> Completion<Value> {
        match value {
            Value::Object(_) => Ok(Value::from(self.to_string_value(&value)?)),
            other => Ok(other),
        }
    }

    /// `ToString`, honoring a user-defined `toString` method.
    pub fn to_string_value(&mut self, value: &Value) -> Completion<String> {
        if let Value::Object(obj) = value {
            if let Some(method) = user_method(obj, "toString") {
                let result = self.call(&method, value.clone(), Vec::new())?;
                return Ok(result.to_js_string());
            }
        }
        Ok(value.to_js_string())
    }

    pub fn instance_of(&mut self, left: &Value, right: &Value) -> Completion<bool> {
        let Value::Object(ctor) = right else {
            return throw("TypeError", "Right-hand side of 'instanceof' is not callable");
        };
        if !right.is_callable() {
            return throw("TypeError", "Right-hand side of 'instanceof' is not callable");
        }
        let Value::Object(obj) = left else {
            return Ok(false);
        };

        let native = match &ctor.borrow().kind {
            ObjectKind::Function(Callable::Native { name, .. }) => Some(name.to_string()),
            _ => None,
        };
        if let Some(name) = native {
            let o = obj.borrow();
            return Ok(match name.as_str() {
                "Object" => true,
                "Array" => matches!(o.kind, ObjectKind::Array(_)),
                "Function" => matches!(o.kind, ObjectKind::Function(_)),
                "Promise" => matches!(o.kind, ObjectKind::Promise(_)),
                "RegExp" => matches!(o.kind, ObjectKind::RegExp(_)),
                "Error" => matches!(o.kind, ObjectKind::Error),
                other if other.ends_with("Error") => {
                    matches!(o.kind, ObjectKind::Error)
                        && o.props
                            .get("name")
                            .is_some_and(|n| n.to_js_string() == other)
                }
                _ => false,
            });
        }

        let Value::Object(prototype) = self.object_get(ctor, "prototype") else {
            return Ok(false);
        };
        let mut proto = obj.borrow().proto.clone();
        while let Some(current) = proto {
            if Rc::ptr_eq(&current, &prototype) {
                return Ok(true);
            }
            proto = current.borrow().proto.clone();
        }
        Ok(false)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CALLS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn call(&mut self, callee: &Value, this: Value, args: Vec<Value>) -> Completion<Value> {
        let Some(callable) = callable_of(callee) else {
            return throw(
                "TypeError",
                format!("{} is not a function", callee.to_js_string()),
            );
        };
        match callable {
            Callable::Closure(closure) => self.call_closure(&closure, this, args),
            Callable::Native { func, .. } => func(self, this, args),
            Callable::Unsupported { what, .. } => unsupported(what),
            Callable::Bound {
                target,
                this: bound_this,
                args: bound_args,
            } => {
                let mut all = bound_args;
                all.extend(args);
                self.call(&Value::Object(target), bound_this, all)
            }
        }
    }

    pub fn construct(&mut self, callee: &Value, args: Vec<Value>, label: &str) -> Completion<Value> {
        let Some(callable) = callable_of(callee) else {
            return throw("TypeError", format!("{} is not a constructor", label));
        };
        match callable {
            Callable::Closure(closure) if !closure.is_arrow && !closure.is_async => {
                let prototype = match callee {
                    Value::Object(obj) => match self.object_get(obj, "prototype") {
                        Value::Object(proto) => Some(proto),
                        _ => None,
                    },
                    _ => None,
                };
                let instance = Value::Object(alloc(ObjectKind::Plain, prototype));
                let result = self.call_closure(&closure, instance.clone(), args)?;
                Ok(if matches!(result, Value::Object(_)) {
                    result
                } else {
                    instance
                })
            }
            Callable::Native { .. } => self.call(callee, Value::Undefined, args),
            Callable::Unsupported { what, .. } => unsupported(what),
            Callable::Bound {
                target,
                args: bound_args,
                ..
            } => {
                let mut all = bound_args;
                all.extend(args);
                self.construct(&Value::Object(target), all, label)
            }
            Callable::Closure(_) => throw("TypeError", format!("{} is not a constructor", label)),
        }
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, this: Value, args: Vec<Value>) -> Completion<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return throw("RangeError", "Maximum call stack size exceeded");
        }
        self.depth += 1;
        let result = self.invoke(closure, this, args);
        self.depth -= 1;

        if !closure.is_async {
            return result;
        }
        match result {
            Ok(value) => Ok(promise_resolve(value)),
            Err(Flow::Throw(error)) => Ok(Value::promise(Settled::Rejected(error))),
            Err(other) => Err(other),
        }
    }

    fn invoke(&mut self, closure: &Closure, this: Value, args: Vec<Value>) -> Completion<Value> {
        let env = closure.env.function_child();
        if !closure.is_arrow {
            env.declare("this", Some(this), false);
            env.declare("arguments", Some(Value::array(args.clone())), true);
        }
        for (idx, param) in closure.params.iter().enumerate() {
            let arg = args.get(idx).cloned().unwrap_or_default();
            self.bind_pattern(param, arg, &env, BindMode::Lexical { mutable: true })?;
        }
        match &closure.body {
            FunctionBody::Expr(expr) => self.eval(expr, &env),
            FunctionBody::Block(stmts) => {
                hoist_vars(stmts, &env);
                match self.exec_block(stmts, &env) {
                    Ok(()) => Ok(Value::Undefined),
                    Err(Flow::Return(value)) => Ok(value),
                    Err(Flow::Throw(error)) => Err(Flow::Throw(error)),
                    Err(_) => Ok(Value::Undefined),
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PROPERTIES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn get_property(&mut self, target: &Value, key: &str) -> Completion<Value> {
        match target {
            Value::Undefined | Value::Null => throw(
                "TypeError",
                format!(
                    "Cannot read properties of {} (reading '{}')",
                    target.to_js_string(),
                    key
                ),
            ),
            Value::Str(s) => {
                if key == "length" {
                    return Ok(Value::Num(s.encode_utf16().count() as f64));
                }
                if let Some(idx) = array_index(key) {
                    let unit = s.encode_utf16().nth(idx);
                    return Ok(unit.map_or(Value::Undefined, |unit| {
                        Value::from(String::from_utf16_lossy(&[unit]))
                    }));
                }
                Ok(self.intrinsic_get(&self.intrinsics.string, key))
            }
            Value::Num(_) => Ok(self.intrinsic_get(&self.intrinsics.number, key)),
            Value::Bool(_) => Ok(self.intrinsic_get(&self.intrinsics.object, key)),
            Value::Object(obj) => {
                if let ObjectKind::Function(Callable::Unsupported { what, .. }) = &obj.borrow().kind {
                    return unsupported(what);
                }
                match find_accessor(obj, key) {
                    Some(Accessor { get: Some(getter), .. }) => {
                        self.call(&getter, target.clone(), Vec::new())
                    }
                    Some(_) => Ok(Value::Undefined),
                    None => Ok(self.object_get(obj, key)),
                }
            }
        }
    }

    fn intrinsic_get(&self, proto: &ObjRef, key: &str) -> Value {
        lookup_own(proto, key)
            .or_else(|| lookup_own(&self.intrinsics.object, key))
            .unwrap_or_default()
    }

    pub(super) fn object_get(&self, obj: &ObjRef, key: &str) -> Value {
        {
            let o = obj.borrow();
            match &o.kind {
                ObjectKind::Array(items) => {
                    if key == "length" {
                        return Value::Num(items.len() as f64);
                    }
                    if let Some(idx) = array_index(key) {
                        return items.get(idx).cloned().unwrap_or_default();
                    }
                }
                ObjectKind::Function(callable) if !o.props.contains_key(key) => {
                    if key == "name" {
                        return Value::from(callable_name(callable));
                    }
                    if key == "length" {
                        let arity = match callable {
                            Callable::Closure(closure) => closure.params.len(),
                            _ => 0,
                        };
                        return Value::Num(arity as f64);
                    }
                }
                ObjectKind::RegExp(re) if !o.props.contains_key(key) => match key {
                    "source" => return Value::from(re.source.as_str()),
                    "flags" => return Value::from(re.flags.as_str()),
                    "global" => return Value::Bool(re.global),
                    "sticky" => return Value::Bool(re.sticky),
                    "ignoreCase" => return Value::Bool(re.flags.contains('i')),
                    "multiline" => return Value::Bool(re.flags.contains('m')),
                    "dotAll" => return Value::Bool(re.flags.contains('s')),
                    "unicode" => return Value::Bool(re.flags.contains('u')),
                    _ => {}
                },
                _ => {}
            }
            if let Some(value) = o.props.get(key) {
                return value.clone();
            }
        }

        let mut proto = obj.borrow().proto.clone();
        while let Some(current) = proto {
            if let Some(value) = lookup_own(&current, key) {
                return value;
            }
            proto = current.borrow().proto.clone();
        }

        let intrinsic = self.intrinsics.for_kind(&obj.borrow().kind).clone();
        self.intrinsic_get(&intrinsic, key)
    }

    pub fn set_property(&mut self, target: &Value, key: &str, value: Value) -> Completion<()> {
        match target {
            Value::Object(obj) => {
                if let Some(accessor) = find_accessor(obj, key) {
                    if let Some(setter) = accessor.set {
                        self.call(&setter, target.clone(), vec![value])?;
                    }
                    return Ok(());
                }
                let mut o = obj.borrow_mut();
                if let ObjectKind::Array(items) = &mut o.kind {
                    if let Some(idx) = array_index(key) {
                        if idx >= items.len() {
                            if idx > items.len() + MAX_ARRAY_GROWTH {
                                return throw("RangeError", "Invalid array length");
                            }
                            items.resize(idx + 1, Value::Undefined);
                        }
                        items[idx] = value;
                        return Ok(());
                    }
                    if key == "length" {
                        let len = value.to_number();
                        if !(len >= 0.0 && len.fract() == 0.0)
                            || len as usize > items.len() + MAX_ARRAY_GROWTH
                        {
                            return throw("RangeError", "Invalid array length");
                        }
                        items.resize(len as usize, Value::Undefined);
                        return Ok(());
                    }
                }
                o.props.insert(key.to_string(), value);
                Ok(())
            }
            Value::Undefined | Value::Null => throw(
                "TypeError",
                format!(
                    "Cannot set properties of {} (setting '{}')",
                    target.to_js_string(),
                    key
                ),
            ),
            _ => Ok(()),
        }
    }

    pub fn has_property(&self, target: &Value, key: &str) -> bool {
        match target {
            Value::Object(obj) => {
                {
                    let o = obj.borrow();
                    if let ObjectKind::Array(items) = &o.kind {
                        if key == "length" || array_index(key).is_some_and(|i| i < items.len()) {
                            return true;
                        }
                    }
                    if o.props.contains_key(key) || o.accessors.contains_key(key) {
                        return true;
                    }
                }
                find_accessor(obj, key).is_some()
                    || !matches!(self.object_get(obj, key), Value::Undefined)
            }
            _ => false,
        }
    }

    /// Own entries with getters invoked, for spread, rest and `Object.entries`.
    pub fn entries(&mut self, value: &Value) -> Completion<Vec<(String, Value)>> {
        let mut entries = own_entries(value);
        let getters: Vec<(String, Option<Value>)> = match value {
            Value::Object(obj) => obj
                .borrow()
                .accessors
                .iter()
                .map(|(key, accessor)| (key.clone(), accessor.get.clone()))
                .collect(),
            _ => Vec::new(),
        };
        for (key, getter) in getters {
            let item = match getter {
                Some(getter) => self.call(&getter, value.clone(), Vec::new())?,
                None => Value::Undefined,
            };
            entries.push((key, item));
        }
        Ok(entries)
    }

    /// Values produced by `for...of` and spread.
    pub fn iterate(&self, value: &Value) -> Completion<Vec<Value>> {
        match value {
            Value::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
            Value::Object(obj) => match &obj.borrow().kind {
                ObjectKind::Array(items) => Ok(items.clone()),
                _ => throw("TypeError", "object is not iterable"),
            },
            other => throw(
                "TypeError",
                format!("{} is not iterable", other.to_js_string()),
            ),
        }
    }

    /// Deterministic `Math.random` (xorshift64*).
    pub(super) fn next_random(&mut self) -> f64 {
        let mut x = self.random_state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.random_state = x;
        let bits = x.wrapping_mul(0x2545_f491_4f6c_dd1d) >> 11;
        bits as f64 / (1u64 << 53) as f64
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn parent_dir(filename: &str) -> PathBuf {
    Path::new(filename)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

fn new_module_record(filename: &str) -> ObjRef {
    let record = alloc(ObjectKind::Plain, None);
    {
        let mut r = record.borrow_mut();
        r.props.insert("id".into(), Value::from(filename));
        r.props.insert("filename".into(), Value::from(filename));
        r.props.insert("exports".into(), Value::object([]));
        r.props.insert("loaded".into(), Value::Bool(false));
    }
    record
}

fn module_exports(record: &ObjRef) -> Value {
    record
        .borrow()
        .props
        .get("exports")
        .cloned()
        .unwrap_or_default()
}

fn append_stack_frame(error: &Value, filename: &str) {
    if let Value::Object(obj) = error {
        let mut o = obj.borrow_mut();
        if matches!(o.kind, ObjectKind::Error) {
            let stack = o
                .props
                .get("stack")
                .map(Value::to_js_string)
                .unwrap_or_default();
            o.props.insert(
                "stack".into(),
                Value::from(format!("{}\n    at {}", stack, filename)),
            );
        }
    }
}

fn declared_names(stmt: &Stmt) -> Vec<String> {
    let mut names = Vec::new();
    match stmt {
        Stmt::Var(decl) => {
            for declarator in &decl.declarations {
                declarator.id.bound_names(&mut names);
            }
        }
        Stmt::Function(func) => names.extend(func.id.iter().map(|id| id.name.clone())),
        Stmt::Class { id, .. } => names.push(id.name.clone()),
        _ => {}
    }
    names
}

/// Declare every `var` reachable from `stmts` without entering functions.
fn hoist_vars(stmts: &[Stmt], env: &Env) {
    let mut names = Vec::new();
    collect_var_names(stmts, &mut names);
    for name in names {
        if !env.has_own(&name) {
            env.declare(&name, Some(Value::Undefined), true);
        }
    }
}

fn collect_var_names(stmts: &[Stmt], out: &mut Vec<String>) {
    for stmt in stmts {
        collect_var_names_in(stmt, out);
    }
}

fn collect_var_names_in(stmt: &Stmt, out: &mut Vec<String>) {
    match stmt {
        Stmt::Var(decl) if decl.kind == VarKind::Var => {
            for declarator in &decl.declarations {
                declarator.id.bound_names(out);
            }
        }
        Stmt::If(stmt) => {
            collect_var_names_in(&stmt.consequent, out);
            if let Some(alternate) = &stmt.alternate {
                collect_var_names_in(alternate, out);
            }
        }
        Stmt::Block(block) => collect_var_names(&block.body, out),
        Stmt::For(stmt) => {
            if let Some(ForInit::Var(decl)) = &stmt.init {
                if decl.kind == VarKind::Var {
                    for declarator in &decl.declarations {
                        declarator.id.bound_names(out);
                    }
                }
            }
            collect_var_names_in(&stmt.body, out);
        }
        Stmt::ForEach(stmt) => {
            if stmt.decl_kind == Some(VarKind::Var) {
                stmt.left.bound_names(out);
            }
            collect_var_names_in(&stmt.body, out);
        }
        Stmt::While(stmt) => collect_var_names_in(&stmt.body, out),
        Stmt::Switch(stmt) => {
            for case in &stmt.cases {
                collect_var_names(&case.consequent, out);
            }
        }
        Stmt::Try(stmt) => {
            collect_var_names(&stmt.block.body, out);
            if let Some(handler) = &stmt.handler {
                collect_var_names(&handler.body.body, out);
            }
            if let Some(finalizer) = &stmt.finalizer {
                collect_var_names(&finalizer.body, out);
            }
        }
        Stmt::Export(ExportStmt {
            decl: ExportDecl::Decl(inner),
            ..
        }) => collect_var_names_in(inner, out),
        _ => {}
    }
}

fn closure_value(closure: Closure) -> Value {
    let constructible = !closure.is_arrow && !closure.is_async;
    let obj = alloc(ObjectKind::Function(Callable::Closure(Rc::new(closure))), None);
    if constructible {
        obj.borrow_mut()
            .props
            .insert("prototype".into(), Value::object([]));
    }
    Value::Object(obj)
}

fn make_function(func: &Function, env: &Env, name: &str) -> Value {
    closure_value(Closure {
        name: func
            .id
            .as_ref()
            .map_or(name, |id| id.name.as_str())
            .to_string(),
        params: func.params.clone(),
        body: FunctionBody::Block(func.body.clone()),
        env: env.clone(),
        is_arrow: false,
        is_async: func.is_async,
    })
}

/// Named function expressions see their own name.
fn make_function_expr(func: &Function, env: &Env, name: &str) -> Value {
    match &func.id {
        Some(id) => {
            let scope = env.child();
            let value = make_function(func, &scope, name);
            scope.declare(&id.name, Some(value.clone()), false);
            value
        }
        None => make_function(func, env, name),
    }
}

fn declare_function(func: &Function, env: &Env) {
    if let Some(id) = &func.id {
        env.declare(&id.name, Some(make_function(func, env, "")), true);
    }
}

fn make_arrow(arrow: &Arrow, env: &Env, name: &str) -> Value {
    closure_value(Closure {
        name: name.to_string(),
        params: arrow.params.clone(),
        body: match &arrow.body {
            ArrowBody::Expr(expr) => FunctionBody::Expr((**expr).clone()),
            ArrowBody::Block(stmts) => FunctionBody::Block(stmts.clone()),
        },
        env: env.clone(),
        is_arrow: true,
        is_async: arrow.is_async,
    })
}

fn unsupported<T>(what: &str) -> Completion<T> {
    throw("SyntaxError", format!("Unsupported syntax: {}", what))
}

fn unsupported_class(name: &str) -> Value {
    Value::Object(alloc(
        ObjectKind::Function(Callable::Unsupported {
            name: Rc::from(name),
            what: "class",
        }),
        None,
    ))
}

fn is_intrinsic_tag(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_lowercase()) || name.contains(['-', ':'])
}

fn compound_operator(op: AssignmentOperator) -> Option<BinaryOperator> {
    use AssignmentOperator as A;
    use BinaryOperator as B;
    Some(match op {
        A::Addition => B::Addition,
        A::Subtraction => B::Subtraction,
        A::Multiplication => B::Multiplication,
        A::Division => B::Division,
        A::Remainder => B::Remainder,
        A::Exponential => B::Exponential,
        A::ShiftLeft => B::ShiftLeft,
        A::ShiftRight => B::ShiftRight,
        A::ShiftRightZeroFill => B::ShiftRightZeroFill,
        A::BitwiseOR => B::BitwiseOR,
        A::BitwiseXOR => B::BitwiseXOR,
        A::BitwiseAnd => B::BitwiseAnd,
        _ => return None,
    })
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Value::Str(a), Value::Str(b)) = (left, right) {
        return Some(a.encode_utf16().cmp(b.encode_utf16()));
    }
    left.to_number().partial_cmp(&right.to_number())
}

fn lookup_own(obj: &ObjRef, key: &str) -> Option<Value> {
    obj.borrow().props.get(key).cloned()
}

/// A method defined by user code on the object or its explicit prototypes.
fn user_method(obj: &ObjRef, key: &str) -> Option<Value> {
    if let Some(value) = lookup_own(obj, key) {
        return value.is_callable().then_some(value);
    }
    let mut proto = obj.borrow().proto.clone();
    while let Some(current) = proto {
        if let Some(value) = lookup_own(&current, key) {
            return value.is_callable().then_some(value);
        }
        proto = current.borrow().proto.clone();
    }
    None
}

pub fn callable_of(value: &Value) -> Option<Callable> {
    match value {
        Value::Object(obj) => match &obj.borrow().kind {
            ObjectKind::Function(callable) => Some(callable.clone()),
            _ => None,
        },
        _ => None,
    }
}

pub fn set_own(target: &Value, key: &str, value: Value) {
    if let Value::Object(obj) = target {
        let mut o = obj.borrow_mut();
        o.accessors.shift_remove(key);
        o.props.insert(key.to_string(), value);
    }
}

/// The accessor behind `key` on `obj` or its explicit prototypes. A data
/// property found first shadows it.
fn find_accessor(obj: &ObjRef, key: &str) -> Option<Accessor> {
    let mut current = Some(obj.clone());
    while let Some(o) = current {
        let o = o.borrow();
        if o.props.contains_key(key) {
            return None;
        }
        if let Some(accessor) = o.accessors.get(key) {
            return Some(accessor.clone());
        }
        current = o.proto.clone();
    }
    None
}

pub fn delete_property(target: &Value, key: &str) {
    if let Value::Object(obj) = target {
        let mut o = obj.borrow_mut();
        if let ObjectKind::Array(items) = &mut o.kind {
            if let Some(idx) = array_index(key) {
                if let Some(slot) = items.get_mut(idx) {
                    *slot = Value::Undefined;
                }
                return;
            }
        }
        o.props.shift_remove(key);
        o.accessors.shift_remove(key);
    }
}

/// Own enumerable entries in property order.
pub fn own_entries(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Str(s) => s
            .chars()
            .enumerate()
            .map(|(idx, c)| (idx.to_string(), Value::from(c.to_string())))
            .collect(),
        Value::Object(obj) => {
            let o = obj.borrow();
            let mut entries = Vec::new();
            if let ObjectKind::Array(items) = &o.kind {
                entries.extend(
                    items
                        .iter()
                        .enumerate()
                        .map(|(idx, item)| (idx.to_string(), item.clone())),
                );
            }
            let hidden: &[&str] = match o.kind {
                ObjectKind::Function(_) => &["prototype"],
                ObjectKind::Error => &["name", "message", "stack"],
                ObjectKind::RegExp(_) => &["lastIndex"],
                _ => &[],
            };
            entries.extend(
                o.props
                    .iter()
                    .filter(|(key, _)| !hidden.contains(&key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone())),
            );
            entries
        }
        _ => Vec::new(),
    }
}

pub fn own_keys(value: &Value) -> Vec<String> {
    let mut keys: Vec<String> = own_entries(value).into_iter().map(|(key, _)| key).collect();
    if let Value::Object(obj) = value {
        keys.extend(obj.borrow().accessors.keys().cloned());
    }
    keys
}

pub fn promise_state(value: &Value) -> Option<Settled> {
    match value {
        Value::Object(obj) => match &obj.borrow().kind {
            ObjectKind::Promise(state) => Some(state.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// `Promise.resolve`: promises pass through, other values fulfil.
pub fn promise_resolve(value: Value) -> Value {
    if promise_state(&value).is_some() {
        value
    } else {
        Value::promise(Settled::Fulfilled(value))
    }
}

fn await_value(value: Value) -> Completion<Value> {
    match promise_state(&value) {
        Some(Settled::Fulfilled(inner)) => Ok(inner),
        Some(Settled::Rejected(error)) => Err(Flow::Throw(error)),
        None => Ok(value),
    }
}
