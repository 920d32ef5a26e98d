//! Semantic checks: name resolution, field access against archetype
//! schemas, decorator validity. Skipped in minimal (bootstrap) mode.

use std::collections::HashSet;

use jac_core::diag::{Diagnostic, DiagnosticKind};

use crate::ast::{
    AbilityPeer, Archetype, ArchetypeKind, Decorator, Expr, Item, Module, Stmt,
};
use crate::passes::{Pass, PassContext, SymbolTable};

/// Callables the runtime provides without declaration.
pub const BUILTINS: &[&str] = &[
    "print", "len", "str", "int", "float", "range", "now", "uuid4", "sorted", "keys", "values",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

pub struct CheckPass;

impl Pass for CheckPass {
    fn name(&self) -> &'static str {
        "check"
    }

    fn run(&self, module: Module, ctx: &mut PassContext<'_>) -> Module {
        let mut diags = Vec::new();
        let symbols = ctx.symbols.clone();

        for item in &module.items {
            match item {
                Item::Archetype(arch) => {
                    check_decorators(&arch.decorators, &mut diags);
                    for ability in &arch.abilities {
                        if let Some(body) = &ability.body {
                            let mut scope = Scope::new(&symbols, &module, Some(arch));
                            scope.peer = match &ability.peer {
                                AbilityPeer::Named(name) => module
                                    .archetypes()
                                    .find(|a| &a.name == name),
                                _ => None,
                            };
                            if let AbilityPeer::Named(name) = &ability.peer {
                                if !symbols.contains(name) {
                                    diags.push(Diagnostic::error(
                                        DiagnosticKind::UnresolvedName,
                                        format!("unknown peer archetype '{name}'"),
                                        Some(ability.span.clone()),
                                    ));
                                }
                            }
                            scope.check_block(body, &mut diags);
                        }
                    }
                    for field in &arch.fields {
                        if let Some(default) = &field.default {
                            let mut scope = Scope::new(&symbols, &module, Some(arch));
                            scope.check_expr(default, &mut diags);
                        }
                    }
                }
                Item::Function(func) => {
                    check_decorators(&func.decorators, &mut diags);
                    if let Some(body) = &func.body {
                        let mut scope = Scope::new(&symbols, &module, None);
                        for param in &func.params {
                            scope.locals.insert(param.name.clone());
                        }
                        scope.check_block(body, &mut diags);
                    }
                }
                Item::Entry(entry) => {
                    let mut scope = Scope::new(&symbols, &module, None);
                    scope.check_block(&entry.body, &mut diags);
                }
                _ => {}
            }
        }

        ctx.program.diagnostics.extend(diags);
        module
    }
}

fn check_decorators(decorators: &[Decorator], diags: &mut Vec<Diagnostic>) {
    let mut seen_public = false;
    let mut seen_private = false;
    for decorator in decorators {
        match decorator.name.as_str() {
            "public" => seen_public = true,
            "private" => seen_private = true,
            "streaming" => {}
            other => diags.push(Diagnostic::error(
                DiagnosticKind::TypeCheck,
                format!("unknown decorator '@{other}'"),
                Some(decorator.span.clone()),
            )),
        }
    }
    if seen_public && seen_private {
        diags.push(Diagnostic::error(
            DiagnosticKind::TypeCheck,
            "'@public' and '@private' are mutually exclusive".to_string(),
            Some(decorators[0].span.clone()),
        ));
    }
}

struct Scope<'a> {
    symbols: &'a SymbolTable,
    module: &'a Module,
    owner: Option<&'a Archetype>,
    /// Archetype of `here` when statically known (named-peer abilities).
    peer: Option<&'a Archetype>,
    locals: HashSet<String>,
}

impl<'a> Scope<'a> {
    fn new(symbols: &'a SymbolTable, module: &'a Module, owner: Option<&'a Archetype>) -> Self {
        Self {
            symbols,
            module,
            owner,
            peer: None,
            locals: HashSet::new(),
        }
    }

    fn check_block(&mut self, body: &[Stmt], diags: &mut Vec<Diagnostic>) {
        for stmt in body {
            self.check_stmt(stmt, diags);
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt, diags: &mut Vec<Diagnostic>) {
        match stmt {
            Stmt::Let { name, value, .. } => {
                if let Some(value) = value {
                    self.check_expr(value, diags);
                }
                self.locals.insert(name.clone());
            }
            Stmt::Assign { target, value, .. } => {
                // A bare-name assignment introduces the binding.
                if let Expr::Name(name, _) = target {
                    self.check_expr(value, diags);
                    self.locals.insert(name.clone());
                } else {
                    self.check_expr(target, diags);
                    self.check_expr(value, diags);
                }
            }
            Stmt::If {
                branches,
                else_body,
                ..
            } => {
                for (cond, body) in branches {
                    self.check_expr(cond, diags);
                    self.check_block(body, diags);
                }
                if let Some(body) = else_body {
                    self.check_block(body, diags);
                }
            }
            Stmt::For {
                var, iter, body, ..
            } => {
                self.check_expr(iter, diags);
                self.locals.insert(var.clone());
                self.check_block(body, diags);
            }
            Stmt::While { cond, body, .. } => {
                self.check_expr(cond, diags);
                self.check_block(body, diags);
            }
            Stmt::Return(value, _) => {
                if let Some(value) = value {
                    self.check_expr(value, diags);
                }
            }
            Stmt::Report(value, _) | Stmt::Yield(value, _) | Stmt::Visit(value, _) => {
                self.check_expr(value, diags);
            }
            Stmt::Disengage(_) => {}
            Stmt::Expr(value, _) => self.check_expr(value, diags),
        }
    }

    fn check_expr(&mut self, expr: &Expr, diags: &mut Vec<Diagnostic>) {
        match expr {
            Expr::Name(name, span) => {
                let known = self.locals.contains(name)
                    || self.symbols.contains(name)
                    || is_builtin(name);
                if !known {
                    diags.push(Diagnostic::error(
                        DiagnosticKind::UnresolvedName,
                        format!("name '{name}' is not defined"),
                        Some(span.clone()),
                    ));
                }
            }
            Expr::Field(base, field, span) => {
                // Archetype-schema checks where the base type is static.
                match base.as_ref() {
                    Expr::SelfRef(_) => {
                        if let Some(owner) = self.owner {
                            if !owner.fields.iter().any(|f| &f.name == field) {
                                diags.push(Diagnostic::error(
                                    DiagnosticKind::UnresolvedName,
                                    format!(
                                        "'{}' has no field '{field}'",
                                        owner.name
                                    ),
                                    Some(span.clone()),
                                ));
                            }
                        }
                    }
                    Expr::Here(_) => {
                        if let Some(peer) = self.peer {
                            if !peer.fields.iter().any(|f| &f.name == field) {
                                diags.push(Diagnostic::error(
                                    DiagnosticKind::UnresolvedName,
                                    format!("'{}' has no field '{field}'", peer.name),
                                    Some(span.clone()),
                                ));
                            }
                        }
                    }
                    other => self.check_expr(other, diags),
                }
            }
            Expr::Index(base, index, _) => {
                self.check_expr(base, diags);
                self.check_expr(index, diags);
            }
            Expr::Call {
                callee,
                args,
                kwargs,
                ..
            } => {
                self.check_expr(callee, diags);
                for arg in args {
                    self.check_expr(arg, diags);
                }
                for (_, value) in kwargs {
                    self.check_expr(value, diags);
                }
            }
            Expr::Unary { operand, .. } => self.check_expr(operand, diags),
            Expr::Binary { lhs, rhs, .. } => {
                self.check_expr(lhs, diags);
                self.check_expr(rhs, diags);
            }
            Expr::Connect {
                lhs,
                rhs,
                edge,
                span,
                ..
            } => {
                self.check_expr(lhs, diags);
                self.check_expr(rhs, diags);
                if let Some(label) = edge {
                    let is_edge = self
                        .module
                        .archetypes()
                        .find(|a| &a.name == label)
                        .map(|a| a.kind == ArchetypeKind::Edge);
                    if is_edge == Some(false) {
                        diags.push(Diagnostic::error(
                            DiagnosticKind::TypeCheck,
                            format!("'{label}' is not an edge archetype"),
                            Some(span.clone()),
                        ));
                    }
                }
            }
            Expr::ListLit(items, _) => {
                for item in items {
                    self.check_expr(item, diags);
                }
            }
            Expr::MapLit(entries, _) => {
                for (_, value) in entries {
                    self.check_expr(value, diags);
                }
            }
            Expr::Spawn { target, walker, .. } => {
                self.check_expr(target, diags);
                self.check_expr(walker, diags);
            }
            Expr::Literal(..)
            | Expr::SelfRef(_)
            | Expr::Here(_)
            | Expr::RootRef(_)
            | Expr::Visitor(_)
            | Expr::EdgeQuery { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::program::Program;
    use jac_core::diag::DiagnosticKind;
    use std::path::Path;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn compile_errors(source: &str) -> Vec<DiagnosticKind> {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(&base, source);
        let mut program = Program::new(tmp.path());
        program.compile(&base, false, false);
        program.diagnostics.errors().map(|d| d.kind).collect()
    }

    #[test]
    fn undefined_name_is_reported() {
        let errors = compile_errors("def f() { return missing_thing; }");
        assert!(errors.contains(&DiagnosticKind::UnresolvedName));
    }

    #[test]
    fn locals_params_and_builtins_resolve() {
        let errors = compile_errors(
            "def f(a: int) { let b = a + 1; print(b); return len(str(b)); }",
        );
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn unknown_self_field_is_reported() {
        let errors = compile_errors(
            "walker W { has n: int = 0; can go with `root entry { report self.missing; } }",
        );
        assert!(errors.contains(&DiagnosticKind::UnresolvedName));
    }

    #[test]
    fn here_field_checked_against_named_peer() {
        let errors = compile_errors(
            "node Task { has title: str; }\nwalker W { can go with Task entry { report here.nope; } }",
        );
        assert!(errors.contains(&DiagnosticKind::UnresolvedName));
    }

    #[test]
    fn here_field_unchecked_for_root_peer() {
        let errors = compile_errors(
            "walker W { can go with `root entry { report here; } }",
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn conflicting_access_decorators() {
        let errors = compile_errors("@public\n@private\nwalker W { has n: int = 0; }");
        assert!(errors.contains(&DiagnosticKind::TypeCheck));
    }

    #[test]
    fn unknown_decorator_is_reported() {
        let errors = compile_errors("@sparkly\nwalker W { has n: int = 0; }");
        assert!(errors.contains(&DiagnosticKind::TypeCheck));
    }

    #[test]
    fn connect_label_must_be_edge() {
        let errors = compile_errors(
            "node A { has x: int = 0; }\nwalker W { can go with `root entry { here +:A:+> here; } }",
        );
        assert!(errors.contains(&DiagnosticKind::TypeCheck));
    }

    #[test]
    fn minimal_mode_skips_checks() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(&base, "def f() { return missing_thing; }");
        let mut program = Program::new(tmp.path());
        program.compile(&base, false, true);
        assert!(!program.diagnostics.has_errors());
    }
}
