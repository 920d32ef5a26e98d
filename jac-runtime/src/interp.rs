//! Tree-walking evaluator over lowered module images.
//!
//! One interpreter instance serves one callable invocation or walker
//! traversal. Walker state (the frame) lives on the interpreter while a
//! traversal is active; `report` outside a traversal lands in the
//! interpreter's own sink, which is what entry blocks and `jac test` read.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use jac_compiler::ir::*;
use jac_core::error::RuntimeError;
use jac_core::value::Value;
use uuid::Uuid;

use crate::anchor::{Access, Anchor, AnchorKind};
use crate::context::ExecutionContext;
use crate::machine::{JacMachine, LoadedModule};
use crate::memory::EdgeSide;
use crate::walker::WalkerFrame;

pub const GENERIC_EDGE: &str = "GenericEdge";

/// Control flow out of a statement.
pub enum Flow {
    Normal,
    Return(Value),
}

/// Lexical scopes for one callable body.
#[derive(Default)]
pub struct Env {
    scopes: Vec<HashMap<String, Value>>,
}

impl Env {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }

    fn set(&mut self, name: &str, value: Value) {
        for scope in self.scopes.iter_mut().rev() {
            if scope.contains_key(name) {
                scope.insert(name.to_string(), value);
                return;
            }
        }
        self.define(name, value);
    }

    pub fn define(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }
}

pub struct Interpreter<'m> {
    pub machine: &'m JacMachine,
    pub ctx: Arc<ExecutionContext>,
    pub module: Arc<LoadedModule>,
    /// Active walker traversal state, if any.
    pub frame: Option<WalkerFrame>,
    /// Reports emitted outside a traversal (entry blocks, tests).
    pub reports: Vec<Value>,
    /// Values yielded by streaming callables.
    pub yields: Vec<Value>,
    /// Imported-name → defining-module map for the current module.
    imported: HashMap<String, String>,
    pub cancel: Option<Arc<AtomicBool>>,
    pub deadline: Option<Instant>,
}

impl<'m> Interpreter<'m> {
    pub fn new(
        machine: &'m JacMachine,
        ctx: Arc<ExecutionContext>,
        module: Arc<LoadedModule>,
    ) -> Self {
        let imported = Self::imported_map(&module);
        Self {
            machine,
            ctx,
            module,
            frame: None,
            reports: Vec::new(),
            yields: Vec::new(),
            imported,
            cancel: None,
            deadline: None,
        }
    }

    fn imported_map(module: &LoadedModule) -> HashMap<String, String> {
        module
            .image
            .imports
            .iter()
            .flat_map(|import| {
                import
                    .names
                    .iter()
                    .map(move |name| (name.clone(), import.module.clone()))
            })
            .collect()
    }

    /// Switch the interpreter to another module's namespace, returning the
    /// previous one. Walker dispatch uses this so ability bodies resolve
    /// names in their defining module.
    pub fn swap_module(&mut self, module: Arc<LoadedModule>) -> Arc<LoadedModule> {
        let previous = std::mem::replace(&mut self.module, module);
        self.imported = Self::imported_map(&self.module);
        previous
    }

    pub fn check_cancelled(&self) -> Result<(), RuntimeError> {
        if let Some(cancel) = &self.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(RuntimeError::Timeout);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(RuntimeError::Timeout);
            }
        }
        Ok(())
    }

    // ── Entry points ────────────────────────────────────────────────────────

    /// Run the module's `with entry` blocks: all unnamed ones, or exactly
    /// the named one (test cases).
    pub fn run_entries(&mut self, name: Option<&str>) -> Result<(), RuntimeError> {
        let entries = self.module.image.entries.clone();
        for entry in entries {
            let matches = match name {
                Some(wanted) => entry.name.as_deref() == Some(wanted),
                None => entry.name.is_none(),
            };
            if matches {
                let mut env = Env::new();
                self.eval_block(&entry.body, &mut env)?;
            }
        }
        Ok(())
    }

    /// Invoke a declared function with already-evaluated arguments.
    pub fn call_function(
        &mut self,
        func: &FunctionImage,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> Result<Value, RuntimeError> {
        let mut env = Env::new();
        self.bind_params(&func.params, args, kwargs, &mut env, &func.name)?;
        match self.eval_block(&func.body, &mut env)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Null),
        }
    }

    fn bind_params(
        &mut self,
        params: &[ParamImage],
        args: Vec<Value>,
        mut kwargs: BTreeMap<String, Value>,
        env: &mut Env,
        callee: &str,
    ) -> Result<(), RuntimeError> {
        if args.len() > params.len() {
            return Err(RuntimeError::InvalidArgument(format!(
                "'{callee}' takes at most {} arguments, got {}",
                params.len(),
                args.len()
            )));
        }
        let mut args = args.into_iter();
        for param in params {
            let value = if let Some(value) = args.next() {
                if kwargs.remove(&param.name).is_some() {
                    return Err(RuntimeError::InvalidArgument(format!(
                        "'{callee}' got duplicate argument '{}'",
                        param.name
                    )));
                }
                value
            } else if let Some(value) = kwargs.remove(&param.name) {
                value
            } else if let Some(default) = &param.default {
                self.eval(default, env)?
            } else {
                return Err(RuntimeError::InvalidArgument(format!(
                    "'{callee}' missing required argument '{}'",
                    param.name
                )));
            };
            env.define(&param.name, value);
        }
        if let Some((name, _)) = kwargs.into_iter().next() {
            return Err(RuntimeError::InvalidArgument(format!(
                "'{callee}' got unexpected argument '{name}'"
            )));
        }
        Ok(())
    }

    // ── Statements ──────────────────────────────────────────────────────────

    pub fn eval_block(&mut self, body: &[IStmt], env: &mut Env) -> Result<Flow, RuntimeError> {
        for stmt in body {
            match self.eval_stmt(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn eval_stmt(&mut self, stmt: &IStmt, env: &mut Env) -> Result<Flow, RuntimeError> {
        match stmt {
            IStmt::Let { name, value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Null,
                };
                env.define(name, value);
                Ok(Flow::Normal)
            }
            IStmt::Assign { target, value, .. } => {
                let value = self.eval(value, env)?;
                self.assign(target, value, env)?;
                Ok(Flow::Normal)
            }
            IStmt::If {
                branches,
                else_body,
                ..
            } => {
                for (cond, body) in branches {
                    if self.eval(cond, env)?.is_truthy() {
                        env.push();
                        let flow = self.eval_block(body, env);
                        env.pop();
                        return flow;
                    }
                }
                if let Some(body) = else_body {
                    env.push();
                    let flow = self.eval_block(body, env);
                    env.pop();
                    return flow;
                }
                Ok(Flow::Normal)
            }
            IStmt::For {
                var, iter, body, ..
            } => {
                let items = match self.eval(iter, env)? {
                    Value::List(items) => items,
                    Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                    Value::Map(entries) => entries.keys().cloned().map(Value::Str).collect(),
                    other => {
                        return Err(RuntimeError::UserError(format!(
                            "cannot iterate a {}",
                            other.type_name()
                        )))
                    }
                };
                for item in items {
                    self.check_cancelled()?;
                    env.push();
                    env.define(var, item);
                    let flow = self.eval_block(body, env);
                    env.pop();
                    match flow? {
                        Flow::Normal => {}
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
            IStmt::While { cond, body, .. } => {
                while self.eval(cond, env)?.is_truthy() {
                    self.check_cancelled()?;
                    env.push();
                    let flow = self.eval_block(body, env);
                    env.pop();
                    match flow? {
                        Flow::Normal => {}
                        other => return Ok(other),
                    }
                }
                Ok(Flow::Normal)
            }
            IStmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            IStmt::Report { value, .. } => {
                let value = self.eval(value, env)?;
                match &mut self.frame {
                    Some(frame) => frame.reports.push(value),
                    None => self.reports.push(value),
                }
                Ok(Flow::Normal)
            }
            IStmt::Visit { target, .. } => {
                let target = self.eval(target, env)?;
                self.enqueue_visit(target)?;
                Ok(Flow::Normal)
            }
            IStmt::Disengage { line } => {
                match &mut self.frame {
                    Some(frame) => frame.disengage(),
                    None => {
                        return Err(RuntimeError::UserError(format!(
                            "disengage outside a walker (line {line})"
                        )))
                    }
                }
                Ok(Flow::Normal)
            }
            IStmt::Yield { value, .. } => {
                let value = self.eval(value, env)?;
                self.yields.push(value);
                Ok(Flow::Normal)
            }
            IStmt::Expr { value, .. } => {
                self.eval(value, env)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn enqueue_visit(&mut self, target: Value) -> Result<(), RuntimeError> {
        let current = self
            .frame
            .as_ref()
            .map(|frame| frame.current)
            .ok_or_else(|| RuntimeError::UserError("visit outside a walker".to_string()))?;

        let mut node_ids = Vec::new();
        collect_visit_targets(self, target, current, &mut node_ids)?;
        if let Some(frame) = &mut self.frame {
            for id in node_ids {
                frame.queue.push_back(id);
            }
        }
        Ok(())
    }

    fn assign(&mut self, target: &IExpr, value: Value, env: &mut Env) -> Result<(), RuntimeError> {
        match target {
            IExpr::Name(name) => {
                env.set(name, value);
                Ok(())
            }
            IExpr::Field(base, field) => match base.as_ref() {
                IExpr::SelfRef | IExpr::Visitor => {
                    let frame = self.frame.as_mut().ok_or_else(|| {
                        RuntimeError::UserError("'self' outside a walker".to_string())
                    })?;
                    if base.as_ref() == &IExpr::SelfRef && frame.node_side {
                        let node = frame.current;
                        return self.set_anchor_field(node, field, value);
                    }
                    frame.fields.insert(field.clone(), value);
                    Ok(())
                }
                other => {
                    let base_value = self.eval(other, env)?;
                    match base_value {
                        Value::Ref(id) => self.set_anchor_field(id, field, value),
                        Value::Map(mut entries) => {
                            entries.insert(field.clone(), value);
                            // Write the updated map back when the base is a
                            // plain binding; anything else has no home.
                            if let IExpr::Name(name) = other {
                                env.set(name, Value::Map(entries));
                                Ok(())
                            } else {
                                Err(RuntimeError::UserError(
                                    "cannot assign into a temporary map".to_string(),
                                ))
                            }
                        }
                        other => Err(RuntimeError::UserError(format!(
                            "cannot set field on a {}",
                            other.type_name()
                        ))),
                    }
                }
            },
            IExpr::Index(base, index) => {
                let index = self.eval(index, env)?;
                let base_value = self.eval(base, env)?;
                let updated = match (base_value, &index) {
                    (Value::List(mut items), Value::Int(i)) => {
                        let i = *i as usize;
                        if i >= items.len() {
                            return Err(RuntimeError::InvalidArgument(format!(
                                "index {i} out of bounds"
                            )));
                        }
                        items[i] = value;
                        Value::List(items)
                    }
                    (Value::Map(mut entries), Value::Str(key)) => {
                        entries.insert(key.clone(), value);
                        Value::Map(entries)
                    }
                    (other, _) => {
                        return Err(RuntimeError::UserError(format!(
                            "cannot index-assign a {}",
                            other.type_name()
                        )))
                    }
                };
                if let IExpr::Name(name) = base.as_ref() {
                    env.set(name, updated);
                    Ok(())
                } else {
                    Err(RuntimeError::UserError(
                        "cannot assign into a temporary value".to_string(),
                    ))
                }
            }
            _ => Err(RuntimeError::UserError("invalid assignment target".to_string())),
        }
    }

    // ── Expressions ─────────────────────────────────────────────────────────

    pub fn eval(&mut self, expr: &IExpr, env: &mut Env) -> Result<Value, RuntimeError> {
        match expr {
            IExpr::Null => Ok(Value::Null),
            IExpr::Bool(b) => Ok(Value::Bool(*b)),
            IExpr::Int(n) => Ok(Value::Int(*n)),
            IExpr::Float(x) => Ok(Value::Float(*x)),
            IExpr::Str(s) => Ok(Value::Str(s.clone())),
            IExpr::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|item| self.eval(item, env))
                    .collect::<Result<_, _>>()?,
            )),
            IExpr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval(value, env)?);
                }
                Ok(Value::Map(map))
            }
            IExpr::Name(name) => self.lookup_name(name, env),
            IExpr::SelfRef => {
                let frame = self
                    .frame
                    .as_ref()
                    .ok_or_else(|| RuntimeError::UserError("'self' outside a walker".to_string()))?;
                if frame.node_side {
                    Ok(Value::Ref(frame.current))
                } else {
                    Ok(frame.self_value())
                }
            }
            IExpr::Here => {
                let frame = self
                    .frame
                    .as_ref()
                    .ok_or_else(|| RuntimeError::UserError("'here' outside a walker".to_string()))?;
                Ok(Value::Ref(frame.current))
            }
            IExpr::Root => Ok(Value::Ref(self.ctx.root())),
            IExpr::Visitor => {
                let frame = self.frame.as_ref().ok_or_else(|| {
                    RuntimeError::UserError("'visitor' outside a walker".to_string())
                })?;
                Ok(frame.self_value())
            }
            IExpr::Field(base, field) => {
                // Walker-side self fields come from the frame directly.
                if matches!(base.as_ref(), IExpr::SelfRef | IExpr::Visitor) {
                    if let Some(frame) = &self.frame {
                        let walker_self = matches!(base.as_ref(), IExpr::SelfRef) && !frame.node_side;
                        let visitor = matches!(base.as_ref(), IExpr::Visitor);
                        if walker_self || visitor {
                            return frame.fields.get(field).cloned().ok_or_else(|| {
                                RuntimeError::UserError(format!(
                                    "walker '{}' has no field '{field}'",
                                    frame.walker_name
                                ))
                            });
                        }
                    }
                }
                let base_value = self.eval(base, env)?;
                self.get_field(base_value, field)
            }
            IExpr::Index(base, index) => {
                let base_value = self.eval(base, env)?;
                let index = self.eval(index, env)?;
                index_value(base_value, index)
            }
            IExpr::Call {
                callee,
                args,
                kwargs,
            } => self.eval_call(callee, args, kwargs, env),
            IExpr::Unary { op, operand } => {
                let value = self.eval(operand, env)?;
                match op {
                    IUnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    IUnaryOp::Neg => match value {
                        Value::Int(n) => Ok(Value::Int(-n)),
                        Value::Float(x) => Ok(Value::Float(-x)),
                        other => Err(RuntimeError::UserError(format!(
                            "cannot negate a {}",
                            other.type_name()
                        ))),
                    },
                }
            }
            IExpr::Binary { op, lhs, rhs } => {
                if matches!(op, IBinaryOp::And) {
                    let lhs = self.eval(lhs, env)?;
                    if !lhs.is_truthy() {
                        return Ok(lhs);
                    }
                    return self.eval(rhs, env);
                }
                if matches!(op, IBinaryOp::Or) {
                    let lhs = self.eval(lhs, env)?;
                    if lhs.is_truthy() {
                        return Ok(lhs);
                    }
                    return self.eval(rhs, env);
                }
                let lhs = self.eval(lhs, env)?;
                let rhs = self.eval(rhs, env)?;
                binary_op(*op, lhs, rhs)
            }
            IExpr::Connect {
                lhs,
                rhs,
                edge,
                directed,
            } => {
                let src = self.eval(lhs, env)?;
                let dst = self.eval(rhs, env)?;
                let Some(src_id) = src.as_ref_id() else {
                    return Err(RuntimeError::UserError(
                        "left side of a connect must be a node".to_string(),
                    ));
                };
                let Some(dst_id) = dst.as_ref_id() else {
                    return Err(RuntimeError::UserError(
                        "right side of a connect must be a node".to_string(),
                    ));
                };
                let archetype = edge.as_deref().unwrap_or(GENERIC_EDGE);
                self.ctx
                    .memory()
                    .connect(src_id, dst_id, archetype, self.ctx.root(), *directed)?;
                Ok(dst)
            }
            IExpr::EdgeQuery { direction, filter } => self.eval_edge_query(*direction, filter.as_deref()),
            IExpr::Spawn { target, walker } => {
                let target = self.eval(target, env)?;
                let walker = self.eval(walker, env)?;
                let Some(start) = target.as_ref_id() else {
                    return Err(RuntimeError::UserError(
                        "spawn target must be a node".to_string(),
                    ));
                };
                let result = self.spawn_value(walker, start)?;
                Ok(Value::List(result.reports))
            }
        }
    }

    fn lookup_name(&mut self, name: &str, env: &Env) -> Result<Value, RuntimeError> {
        if let Some(value) = env.get(name) {
            return Ok(value);
        }
        // Names imported from a fallback plugin module are passthroughs.
        if let Some(module_name) = self.imported.get(name) {
            if let Some(module) = self.machine.module(module_name) {
                if module.fallback {
                    return Ok(Value::Passthrough);
                }
            }
        }
        // Declared module-level names evaluate to themselves when called;
        // bare references resolve to a string tag so they can be passed
        // around (archetype and function names are first-class by name).
        if self.module.image.function(name).is_some()
            || self.module.image.archetype(name).is_some()
            || self.imported.contains_key(name)
        {
            return Ok(Value::Str(name.to_string()));
        }
        Err(RuntimeError::UserError(format!("name '{name}' is not defined")))
    }

    fn get_field(&mut self, base: Value, field: &str) -> Result<Value, RuntimeError> {
        match base {
            Value::Ref(id) => {
                let anchor = self.load_checked(id)?;
                if field == "id" {
                    return Ok(Value::Str(anchor.id.to_string()));
                }
                if field == "archetype" {
                    return Ok(Value::Str(anchor.archetype.clone()));
                }
                anchor.fields.get(field).cloned().ok_or_else(|| {
                    RuntimeError::UserError(format!(
                        "'{}' has no field '{field}'",
                        anchor.archetype
                    ))
                })
            }
            Value::Map(entries) => Ok(entries.get(field).cloned().unwrap_or(Value::Null)),
            Value::Passthrough => Ok(Value::Passthrough),
            other => Err(RuntimeError::UserError(format!(
                "cannot read field '{field}' of a {}",
                other.type_name()
            ))),
        }
    }

    fn set_anchor_field(
        &mut self,
        id: Uuid,
        field: &str,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let mut anchor = self.load_checked(id)?;
        anchor.fields.insert(field.to_string(), value);
        self.ctx.memory().put(&anchor)?;
        Ok(())
    }

    /// Load an anchor as the current actor; denial reads as not-found.
    pub fn load_checked(&self, id: Uuid) -> Result<Anchor, RuntimeError> {
        self.ctx
            .memory()
            .get_checked(id, self.ctx.root())?
            .ok_or_else(|| RuntimeError::NotFound(format!("anchor {id}")))
    }

    fn eval_edge_query(
        &mut self,
        direction: IEdgeDirection,
        filter: Option<&str>,
    ) -> Result<Value, RuntimeError> {
        let current = self
            .frame
            .as_ref()
            .map(|frame| frame.current)
            .ok_or_else(|| RuntimeError::UserError("edge query outside a walker".to_string()))?;

        let side = match direction {
            IEdgeDirection::Out => EdgeSide::Out,
            IEdgeDirection::In => EdgeSide::In,
        };
        let actor = self.ctx.root();
        let mut out = Vec::new();
        let edges = self.ctx.memory().edges_for(current, side)?;
        for edge in edges {
            if !edge.accessible_by(actor) {
                continue;
            }
            let Some(endpoints) = edge.edge else {
                continue;
            };
            let other = match direction {
                IEdgeDirection::Out => endpoints.other(current),
                IEdgeDirection::In => {
                    if endpoints.dst == current {
                        Some(endpoints.src)
                    } else if !endpoints.directed && endpoints.src == current {
                        Some(endpoints.dst)
                    } else {
                        None
                    }
                }
            };
            let Some(other) = other else {
                continue;
            };
            let Some(node) = self.ctx.memory().get_checked(other, actor)? else {
                continue;
            };
            if let Some(filter) = filter {
                if node.archetype != filter {
                    continue;
                }
            }
            out.push(Value::Ref(node.id));
        }
        Ok(Value::List(out))
    }

    fn eval_call(
        &mut self,
        callee: &IExpr,
        args: &[IExpr],
        kwargs: &[(String, IExpr)],
        env: &mut Env,
    ) -> Result<Value, RuntimeError> {
        let arg_values: Vec<Value> = args
            .iter()
            .map(|arg| self.eval(arg, env))
            .collect::<Result<_, _>>()?;
        let mut kwarg_values = BTreeMap::new();
        for (name, expr) in kwargs {
            kwarg_values.insert(name.clone(), self.eval(expr, env)?);
        }

        if let IExpr::Name(name) = callee {
            if env.get(name).is_none() {
                return self.call_named(name, arg_values, kwarg_values);
            }
        }

        match self.eval(callee, env)? {
            Value::Passthrough => Ok(Value::Passthrough),
            Value::Str(name) => self.call_named(&name, arg_values, kwarg_values),
            other => Err(RuntimeError::UserError(format!(
                "a {} is not callable",
                other.type_name()
            ))),
        }
    }

    /// Dispatch a call by name: builtins, then declared functions (local or
    /// imported), then archetype construction.
    pub fn call_named(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> Result<Value, RuntimeError> {
        if let Some(result) = self.call_builtin(name, &args) {
            return result;
        }

        if let Some(func) = self.module.image.function(name).cloned() {
            return self.call_function(&func, args, kwargs);
        }

        if let Some(module_name) = self.imported.get(name).cloned() {
            let module = self.machine.import_module(&module_name)?;
            if module.fallback {
                return Ok(Value::Passthrough);
            }
            if let Some(func) = module.image.function(name).cloned() {
                let mut inner = Interpreter::new(self.machine, self.ctx.clone(), module);
                inner.cancel = self.cancel.clone();
                inner.deadline = self.deadline;
                return inner.call_function(&func, args, kwargs);
            }
            if let Some(arch) = module.image.archetype(name).cloned() {
                return self.construct(&arch, args, kwargs);
            }
            return Err(RuntimeError::NotFound(format!(
                "'{name}' in module '{module_name}'"
            )));
        }

        if let Some(arch) = self.module.image.archetype(name).cloned() {
            return self.construct(&arch, args, kwargs);
        }

        Err(RuntimeError::NotFound(format!("callable '{name}'")))
    }

    /// Construct an archetype instance. Nodes persist immediately as
    /// anchors owned by the current root; objects stay plain values; walker
    /// instances are tagged maps consumed by `spawn`.
    pub fn construct(
        &mut self,
        arch: &ArchetypeImage,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> Result<Value, RuntimeError> {
        let fields = self.build_fields(arch, args, kwargs)?;
        match arch.kind {
            ArchetypeKindImage::Node => {
                let mut anchor = Anchor::new_node(&arch.name, self.ctx.root());
                anchor.fields = fields;
                anchor.access = match arch.access {
                    AccessImage::Public => Access::Public,
                    AccessImage::Protected => Access::Protected,
                    AccessImage::Private => Access::Private,
                };
                self.ctx.memory().put(&anchor)?;
                Ok(Value::Ref(anchor.id))
            }
            ArchetypeKindImage::Walker => {
                let mut map = fields;
                map.insert("__walker__".to_string(), Value::Str(arch.name.clone()));
                Ok(Value::Map(map))
            }
            ArchetypeKindImage::Edge => Err(RuntimeError::UserError(
                "edges are created by connect expressions".to_string(),
            )),
            ArchetypeKindImage::Object | ArchetypeKindImage::Class => Ok(Value::Map(fields)),
        }
    }

    fn build_fields(
        &mut self,
        arch: &ArchetypeImage,
        args: Vec<Value>,
        mut kwargs: BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, RuntimeError> {
        if args.len() > arch.fields.len() {
            return Err(RuntimeError::InvalidArgument(format!(
                "'{}' takes at most {} arguments",
                arch.name,
                arch.fields.len()
            )));
        }
        let mut out = BTreeMap::new();
        let mut args = args.into_iter();
        for field in &arch.fields {
            let value = if let Some(value) = args.next() {
                value
            } else if let Some(value) = kwargs.remove(&field.name) {
                value
            } else if let Some(default) = &field.default {
                let mut env = Env::new();
                self.eval(default, &mut env)?
            } else {
                return Err(RuntimeError::InvalidArgument(format!(
                    "'{}' missing required field '{}'",
                    arch.name, field.name
                )));
            };
            out.insert(field.name.clone(), value);
        }
        if let Some((name, _)) = kwargs.into_iter().next() {
            return Err(RuntimeError::InvalidArgument(format!(
                "'{}' has no field '{name}'",
                arch.name
            )));
        }
        Ok(out)
    }

    fn call_builtin(&mut self, name: &str, args: &[Value]) -> Option<Result<Value, RuntimeError>> {
        let result = match name {
            "print" => {
                let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
                println!("{}", rendered.join(" "));
                Ok(Value::Null)
            }
            "len" => match args.first() {
                Some(Value::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
                Some(Value::List(items)) => Ok(Value::Int(items.len() as i64)),
                Some(Value::Map(entries)) => Ok(Value::Int(entries.len() as i64)),
                _ => Err(RuntimeError::InvalidArgument("len() needs a sized value".into())),
            },
            "str" => Ok(Value::Str(
                args.first().map(Value::to_string).unwrap_or_default(),
            )),
            "int" => match args.first() {
                Some(Value::Int(n)) => Ok(Value::Int(*n)),
                Some(Value::Float(x)) => Ok(Value::Int(*x as i64)),
                Some(Value::Str(s)) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| RuntimeError::InvalidArgument(format!("bad int '{s}'"))),
                Some(Value::Bool(b)) => Ok(Value::Int(*b as i64)),
                _ => Err(RuntimeError::InvalidArgument("int() needs a value".into())),
            },
            "float" => match args.first() {
                Some(Value::Int(n)) => Ok(Value::Float(*n as f64)),
                Some(Value::Float(x)) => Ok(Value::Float(*x)),
                Some(Value::Str(s)) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| RuntimeError::InvalidArgument(format!("bad float '{s}'"))),
                _ => Err(RuntimeError::InvalidArgument("float() needs a value".into())),
            },
            "range" => {
                let (start, end) = match args {
                    [Value::Int(end)] => (0, *end),
                    [Value::Int(start), Value::Int(end)] => (*start, *end),
                    _ => {
                        return Some(Err(RuntimeError::InvalidArgument(
                            "range() takes one or two ints".into(),
                        )))
                    }
                };
                Ok(Value::List((start..end).map(Value::Int).collect()))
            }
            "now" => Ok(Value::Str(chrono::Utc::now().to_rfc3339())),
            "uuid4" => Ok(Value::Str(Uuid::new_v4().to_string())),
            "sorted" => match args.first() {
                Some(Value::List(items)) => {
                    let mut items = items.clone();
                    items.sort_by(|a, b| {
                        a.to_json()
                            .to_string()
                            .cmp(&b.to_json().to_string())
                    });
                    Ok(Value::List(items))
                }
                _ => Err(RuntimeError::InvalidArgument("sorted() needs a list".into())),
            },
            "keys" => match args.first() {
                Some(Value::Map(entries)) => Ok(Value::List(
                    entries.keys().cloned().map(Value::Str).collect(),
                )),
                _ => Err(RuntimeError::InvalidArgument("keys() needs a map".into())),
            },
            "values" => match args.first() {
                Some(Value::Map(entries)) => Ok(Value::List(entries.values().cloned().collect())),
                _ => Err(RuntimeError::InvalidArgument("values() needs a map".into())),
            },
            _ => return None,
        };
        Some(result)
    }

    /// Resolve anchor references into their JSON form for reports and API
    /// responses. Inaccessible anchors render as their bare id.
    pub fn value_to_public_json(&self, value: &Value) -> serde_json::Value {
        match value {
            Value::Ref(id) => match self.ctx.memory().get_checked(*id, self.ctx.root()) {
                Ok(Some(anchor)) => anchor.to_json(),
                _ => serde_json::Value::String(id.to_string()),
            },
            Value::List(items) => serde_json::Value::Array(
                items.iter().map(|v| self.value_to_public_json(v)).collect(),
            ),
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.value_to_public_json(v)))
                    .collect(),
            ),
            other => other.to_json(),
        }
    }
}

fn collect_visit_targets(
    interp: &Interpreter<'_>,
    target: Value,
    current: Uuid,
    out: &mut Vec<Uuid>,
) -> Result<(), RuntimeError> {
    match target {
        Value::Ref(id) => {
            let anchor = interp.load_checked(id)?;
            match anchor.kind {
                AnchorKind::Edge => {
                    let endpoints = anchor.edge.ok_or_else(|| {
                        RuntimeError::UserError("edge anchor missing endpoints".to_string())
                    })?;
                    if let Some(other) = endpoints.other(current) {
                        out.push(other);
                    }
                }
                _ => out.push(id),
            }
            Ok(())
        }
        Value::List(items) => {
            for item in items {
                collect_visit_targets(interp, item, current, out)?;
            }
            Ok(())
        }
        Value::Null => Ok(()),
        other => Err(RuntimeError::UserError(format!(
            "cannot visit a {}",
            other.type_name()
        ))),
    }
}

fn index_value(base: Value, index: Value) -> Result<Value, RuntimeError> {
    match (base, index) {
        (Value::List(items), Value::Int(i)) => {
            let i = if i < 0 { items.len() as i64 + i } else { i };
            items
                .get(i as usize)
                .cloned()
                .ok_or_else(|| RuntimeError::InvalidArgument(format!("index {i} out of bounds")))
        }
        (Value::Map(entries), Value::Str(key)) => Ok(entries.get(&key).cloned().unwrap_or(Value::Null)),
        (Value::Str(s), Value::Int(i)) => s
            .chars()
            .nth(i as usize)
            .map(|c| Value::Str(c.to_string()))
            .ok_or_else(|| RuntimeError::InvalidArgument(format!("index {i} out of bounds"))),
        (base, index) => Err(RuntimeError::UserError(format!(
            "cannot index a {} with a {}",
            base.type_name(),
            index.type_name()
        ))),
    }
}

fn binary_op(op: IBinaryOp, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
    use IBinaryOp::*;
    match op {
        Eq => return Ok(Value::Bool(lhs == rhs)),
        Ne => return Ok(Value::Bool(lhs != rhs)),
        _ => {}
    }

    match (op, &lhs, &rhs) {
        (Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{a}{b}"))),
        (Add, Value::List(a), Value::List(b)) => {
            let mut out = a.clone();
            out.extend(b.clone());
            return Ok(Value::List(out));
        }
        _ => {}
    }

    // Two ints stay on i64 so arithmetic is exact; overflow is an error,
    // never a wrap or clamp. True division always promotes to float.
    if let (Value::Int(a), Value::Int(b)) = (&lhs, &rhs) {
        let (a, b) = (*a, *b);
        let result = match op {
            Add => a.checked_add(b).map(Value::Int),
            Sub => a.checked_sub(b).map(Value::Int),
            Mul => a.checked_mul(b).map(Value::Int),
            Mod => {
                if b == 0 {
                    return Err(RuntimeError::UserError("modulo by zero".to_string()));
                }
                a.checked_rem(b).map(Value::Int)
            }
            Div => {
                if b == 0 {
                    return Err(RuntimeError::UserError("division by zero".to_string()));
                }
                return Ok(Value::Float(a as f64 / b as f64));
            }
            Lt => return Ok(Value::Bool(a < b)),
            Gt => return Ok(Value::Bool(a > b)),
            Le => return Ok(Value::Bool(a <= b)),
            Ge => return Ok(Value::Bool(a >= b)),
            Eq | Ne | And | Or => unreachable!(),
        };
        return result.ok_or_else(|| RuntimeError::UserError("integer overflow".to_string()));
    }

    let numeric = |v: &Value| -> Option<f64> {
        match v {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    };
    let (Some(a), Some(b)) = (numeric(&lhs), numeric(&rhs)) else {
        // String comparisons order lexicographically.
        if let (Value::Str(a), Value::Str(b)) = (&lhs, &rhs) {
            let result = match op {
                Lt => a < b,
                Gt => a > b,
                Le => a <= b,
                Ge => a >= b,
                _ => {
                    return Err(RuntimeError::UserError(format!(
                        "unsupported operands for {op:?}: str and str"
                    )))
                }
            };
            return Ok(Value::Bool(result));
        }
        return Err(RuntimeError::UserError(format!(
            "unsupported operands for {op:?}: {} and {}",
            lhs.type_name(),
            rhs.type_name()
        )));
    };

    let result = match op {
        Add => a + b,
        Sub => a - b,
        Mul => a * b,
        Div => {
            if b == 0.0 {
                return Err(RuntimeError::UserError("division by zero".to_string()));
            }
            a / b
        }
        Mod => {
            if b == 0.0 {
                return Err(RuntimeError::UserError("modulo by zero".to_string()));
            }
            a % b
        }
        Lt => return Ok(Value::Bool(a < b)),
        Gt => return Ok(Value::Bool(a > b)),
        Le => return Ok(Value::Bool(a <= b)),
        Ge => return Ok(Value::Bool(a >= b)),
        Eq | Ne | And | Or => unreachable!(),
    };
    Ok(Value::Float(result))
}
