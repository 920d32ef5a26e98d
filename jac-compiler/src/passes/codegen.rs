//! Codegen: lowers the checked AST into a [`ModuleImage`] via a pluggable
//! backend, and verifies ability dispatch is unambiguous.
//!
//! The backend contract is `emit(module, symbols) -> (bytes, artifacts)`;
//! the default backend serializes the module image and emits one client-JS
//! artifact per page. Exact duplicate ability keys (same owner, same peer,
//! same moment) are compile errors here so the runtime dispatcher never has
//! to break a tie.

use std::collections::HashMap;

use jac_core::diag::{Diagnostic, DiagnosticKind};

use crate::ast::*;
use crate::ir::*;
use crate::passes::{Artifact, ArtifactKind, Pass, PassContext, SymbolTable};

/// Pluggable emission backend.
pub trait CodegenBackend: Send + Sync {
    fn emit(&self, module: &Module, symbols: &SymbolTable) -> (Vec<u8>, Vec<Artifact>);
}

/// Default backend: serialize the lowered module image.
pub struct ImageBackend;

impl CodegenBackend for ImageBackend {
    fn emit(&self, module: &Module, _symbols: &SymbolTable) -> (Vec<u8>, Vec<Artifact>) {
        let image = lower_module(module);
        let artifacts = image
            .client_pages
            .iter()
            .map(|page| Artifact {
                name: page.name.clone(),
                kind: ArtifactKind::ClientJs,
                bytes: page.js.clone().into_bytes(),
            })
            .collect();
        (image.to_bytes(), artifacts)
    }
}

pub struct CodegenPass;

impl Pass for CodegenPass {
    fn name(&self) -> &'static str {
        "codegen"
    }

    fn run(&self, module: Module, ctx: &mut PassContext<'_>) -> Module {
        check_dispatch_conflicts(&module, ctx);

        let (bytes, artifacts) = ctx.program.backend.emit(&module, &ctx.symbols);
        ctx.image = ModuleImage::from_bytes(&bytes);
        if let Some(image) = &mut ctx.image {
            image.minimal = ctx.options.minimal;
        }
        ctx.artifacts = artifacts;
        module
    }
}

/// Two abilities with the identical `(owner, peer, moment)` key can never be
/// ordered by specificity; surface the conflict at compile time.
fn check_dispatch_conflicts(module: &Module, ctx: &mut PassContext<'_>) {
    let mut diags = Vec::new();
    for arch in module.archetypes() {
        let mut seen: HashMap<(String, AbilityMoment), &Ability> = HashMap::new();
        for ability in &arch.abilities {
            let peer_key = match &ability.peer {
                AbilityPeer::Root => "`root".to_string(),
                AbilityPeer::Named(name) => name.clone(),
                AbilityPeer::Any => "*".to_string(),
            };
            let key = (peer_key.clone(), ability.moment);
            if seen.insert(key, ability).is_some() {
                diags.push(Diagnostic::error(
                    DiagnosticKind::AmbiguousAbility,
                    format!(
                        "abilities of '{}' are ambiguous for peer '{peer_key}'",
                        arch.name
                    ),
                    Some(ability.span.clone()),
                ));
            }
        }
    }
    ctx.program.diagnostics.extend(diags);
}

// ── Lowering ────────────────────────────────────────────────────────────────

pub fn lower_module(module: &Module) -> ModuleImage {
    let mut image = ModuleImage {
        ir_version: IR_VERSION,
        name: module.name.clone(),
        path: module.path.clone(),
        minimal: false,
        archetypes: Vec::new(),
        functions: Vec::new(),
        client_pages: Vec::new(),
        entries: Vec::new(),
        imports: Vec::new(),
    };

    for item in &module.items {
        match item {
            Item::Archetype(arch) => image.archetypes.push(lower_archetype(arch)),
            Item::Function(func) => image.functions.push(lower_function(func, None)),
            Item::ClientPage(page) => image.client_pages.push(lower_page(page)),
            Item::Entry(entry) => image.entries.push(EntryImage {
                name: entry.name.clone(),
                body: lower_block(entry.body.as_slice()),
            }),
            Item::Import(import) => image.imports.push(ImportImage {
                module: import.module.clone(),
                names: import.names.clone(),
            }),
            Item::Impl(_) => {}
        }
    }

    // Client pages contributed by .cl annexes.
    for annex in &module.impl_mods {
        if annex.kind == ModuleKind::Client {
            for item in &annex.items {
                if let Item::ClientPage(page) = item {
                    image.client_pages.push(lower_page(page));
                }
            }
        }
    }

    image
}

fn lower_archetype(arch: &Archetype) -> ArchetypeImage {
    ArchetypeImage {
        name: arch.name.clone(),
        kind: match arch.kind {
            ArchetypeKind::Node => ArchetypeKindImage::Node,
            ArchetypeKind::Edge => ArchetypeKindImage::Edge,
            ArchetypeKind::Walker => ArchetypeKindImage::Walker,
            ArchetypeKind::Object => ArchetypeKindImage::Object,
            ArchetypeKind::Class => ArchetypeKindImage::Class,
        },
        fields: arch
            .fields
            .iter()
            .map(|f| FieldImage {
                name: f.name.clone(),
                ty: f.ty.name.clone(),
                default: f.default.as_ref().map(lower_expr),
            })
            .collect(),
        abilities: arch
            .abilities
            .iter()
            .filter_map(|a| {
                a.body.as_ref().map(|body| AbilityImage {
                    name: a.name.clone(),
                    peer: match &a.peer {
                        AbilityPeer::Root => PeerImage::Root,
                        AbilityPeer::Named(name) => PeerImage::Named(name.clone()),
                        AbilityPeer::Any => PeerImage::Any,
                    },
                    moment: match a.moment {
                        AbilityMoment::Entry => MomentImage::Entry,
                        AbilityMoment::Exit => MomentImage::Exit,
                    },
                    body: lower_block(body),
                })
            })
            .collect(),
        access: lower_access(arch.access()),
        streaming: arch.is_streaming(),
    }
}

fn lower_function(func: &Function, imported_from: Option<String>) -> FunctionImage {
    FunctionImage {
        name: func.name.clone(),
        params: func
            .params
            .iter()
            .map(|p| ParamImage {
                name: p.name.clone(),
                ty: p.ty.as_ref().map(|t| t.name.clone()),
                default: p.default.as_ref().map(lower_expr),
            })
            .collect(),
        body: func.body.as_deref().map(lower_block).unwrap_or_default(),
        access: lower_access(func.access()),
        streaming: func.is_streaming(),
        imported_from,
    }
}

fn lower_access(access: AccessLevel) -> AccessImage {
    match access {
        AccessLevel::Public => AccessImage::Public,
        AccessLevel::Protected => AccessImage::Protected,
        AccessLevel::Private => AccessImage::Private,
    }
}

fn lower_page(page: &ClientPage) -> ClientPageImage {
    ClientPageImage {
        name: page.name.clone(),
        body: lower_block(&page.body),
        js: page_js(page),
    }
}

fn lower_block(body: &[Stmt]) -> Vec<IStmt> {
    body.iter().map(lower_stmt).collect()
}

fn lower_stmt(stmt: &Stmt) -> IStmt {
    let line = stmt.span().first_line;
    match stmt {
        Stmt::Let { name, value, .. } => IStmt::Let {
            name: name.clone(),
            value: value.as_ref().map(lower_expr),
            line,
        },
        Stmt::Assign { target, value, .. } => IStmt::Assign {
            target: lower_expr(target),
            value: lower_expr(value),
            line,
        },
        Stmt::If {
            branches,
            else_body,
            ..
        } => IStmt::If {
            branches: branches
                .iter()
                .map(|(cond, body)| (lower_expr(cond), lower_block(body)))
                .collect(),
            else_body: else_body.as_deref().map(lower_block),
            line,
        },
        Stmt::For {
            var, iter, body, ..
        } => IStmt::For {
            var: var.clone(),
            iter: lower_expr(iter),
            body: lower_block(body),
            line,
        },
        Stmt::While { cond, body, .. } => IStmt::While {
            cond: lower_expr(cond),
            body: lower_block(body),
            line,
        },
        Stmt::Return(value, _) => IStmt::Return {
            value: value.as_ref().map(lower_expr),
            line,
        },
        Stmt::Report(value, _) => IStmt::Report {
            value: lower_expr(value),
            line,
        },
        Stmt::Visit(target, _) => IStmt::Visit {
            target: lower_expr(target),
            line,
        },
        Stmt::Disengage(_) => IStmt::Disengage { line },
        Stmt::Yield(value, _) => IStmt::Yield {
            value: lower_expr(value),
            line,
        },
        Stmt::Expr(value, _) => IStmt::Expr {
            value: lower_expr(value),
            line,
        },
    }
}

fn lower_expr(expr: &Expr) -> IExpr {
    match expr {
        Expr::Literal(lit, _) => match lit {
            Literal::Null => IExpr::Null,
            Literal::Bool(b) => IExpr::Bool(*b),
            Literal::Int(n) => IExpr::Int(*n),
            Literal::Float(x) => IExpr::Float(*x),
            Literal::Str(s) => IExpr::Str(s.clone()),
        },
        Expr::ListLit(items, _) => IExpr::List(items.iter().map(lower_expr).collect()),
        Expr::MapLit(entries, _) => IExpr::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), lower_expr(v)))
                .collect(),
        ),
        Expr::Name(name, _) => IExpr::Name(name.clone()),
        Expr::SelfRef(_) => IExpr::SelfRef,
        Expr::Here(_) => IExpr::Here,
        Expr::RootRef(_) => IExpr::Root,
        Expr::Visitor(_) => IExpr::Visitor,
        Expr::Field(base, name, _) => IExpr::Field(Box::new(lower_expr(base)), name.clone()),
        Expr::Index(base, index, _) => {
            IExpr::Index(Box::new(lower_expr(base)), Box::new(lower_expr(index)))
        }
        Expr::Call {
            callee,
            args,
            kwargs,
            ..
        } => IExpr::Call {
            callee: Box::new(lower_expr(callee)),
            args: args.iter().map(lower_expr).collect(),
            kwargs: kwargs
                .iter()
                .map(|(name, value)| (name.clone(), lower_expr(value)))
                .collect(),
        },
        Expr::Unary { op, operand, .. } => IExpr::Unary {
            op: match op {
                UnaryOp::Neg => IUnaryOp::Neg,
                UnaryOp::Not => IUnaryOp::Not,
            },
            operand: Box::new(lower_expr(operand)),
        },
        Expr::Binary { op, lhs, rhs, .. } => IExpr::Binary {
            op: match op {
                BinaryOp::Add => IBinaryOp::Add,
                BinaryOp::Sub => IBinaryOp::Sub,
                BinaryOp::Mul => IBinaryOp::Mul,
                BinaryOp::Div => IBinaryOp::Div,
                BinaryOp::Mod => IBinaryOp::Mod,
                BinaryOp::Eq => IBinaryOp::Eq,
                BinaryOp::Ne => IBinaryOp::Ne,
                BinaryOp::Lt => IBinaryOp::Lt,
                BinaryOp::Gt => IBinaryOp::Gt,
                BinaryOp::Le => IBinaryOp::Le,
                BinaryOp::Ge => IBinaryOp::Ge,
                BinaryOp::And => IBinaryOp::And,
                BinaryOp::Or => IBinaryOp::Or,
            },
            lhs: Box::new(lower_expr(lhs)),
            rhs: Box::new(lower_expr(rhs)),
        },
        Expr::Connect {
            lhs,
            rhs,
            edge,
            directed,
            ..
        } => IExpr::Connect {
            lhs: Box::new(lower_expr(lhs)),
            rhs: Box::new(lower_expr(rhs)),
            edge: edge.clone(),
            directed: *directed,
        },
        Expr::EdgeQuery {
            direction, filter, ..
        } => IExpr::EdgeQuery {
            direction: match direction {
                EdgeDirection::Out => IEdgeDirection::Out,
                EdgeDirection::In => IEdgeDirection::In,
            },
            filter: filter.clone(),
        },
        Expr::Spawn { target, walker, .. } => IExpr::Spawn {
            target: Box::new(lower_expr(target)),
            walker: Box::new(lower_expr(walker)),
        },
    }
}

// ── Client page JS ──────────────────────────────────────────────────────────

/// Lower a client page to the JS chunk the bundle serves. Expression
/// statements render in order; everything else is ignored on the client.
fn page_js(page: &ClientPage) -> String {
    let mut parts = Vec::new();
    for stmt in &page.body {
        if let Stmt::Expr(expr, _) = stmt {
            parts.push(js_expr(expr));
        }
    }
    format!(
        "JacClient.register({name}, function () {{ return [{body}].join(\"\"); }});\n",
        name = js_str(&page.name),
        body = parts.join(", ")
    )
}

fn js_expr(expr: &Expr) -> String {
    match expr {
        Expr::Literal(Literal::Str(s), _) => js_str(s),
        Expr::Literal(Literal::Int(n), _) => n.to_string(),
        Expr::Literal(Literal::Float(x), _) => x.to_string(),
        Expr::Literal(Literal::Bool(b), _) => b.to_string(),
        Expr::Literal(Literal::Null, _) => "null".to_string(),
        Expr::Call { callee, args, .. } => {
            let rendered: Vec<String> = args.iter().map(js_expr).collect();
            format!("JacClient.h({}, [{}])", js_callee(callee), rendered.join(", "))
        }
        Expr::Binary { op: BinaryOp::Add, lhs, rhs, .. } => {
            format!("({} + {})", js_expr(lhs), js_expr(rhs))
        }
        _ => "\"\"".to_string(),
    }
}

fn js_callee(expr: &Expr) -> String {
    match expr {
        Expr::Name(name, _) => js_str(name),
        _ => "\"div\"".to_string(),
    }
}

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
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

    #[test]
    fn image_contains_lowered_walker() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(
            &base,
            "walker CreateTask { has title: str; can build with `root entry { report self.title; } }",
        );

        let mut program = Program::new(tmp.path());
        let compiled = program.compile(&base, false, false).unwrap();
        let image = compiled.image.as_ref().unwrap();
        let walker = image.archetype("CreateTask").unwrap();
        assert_eq!(walker.abilities.len(), 1);
        assert_eq!(walker.fields[0].name, "title");
    }

    #[test]
    fn exact_duplicate_ability_key_is_ambiguous() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(
            &base,
            "node Task { has t: str; }\nwalker W {\n  can a with Task entry { report 1; }\n  can b with Task entry { report 2; }\n}",
        );

        let mut program = Program::new(tmp.path());
        program.compile(&base, false, false);
        assert!(program
            .diagnostics
            .errors()
            .any(|d| d.kind == DiagnosticKind::AmbiguousAbility));
    }

    #[test]
    fn distinct_peers_are_not_ambiguous() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(
            &base,
            "node Task { has t: str; }\nwalker W {\n  can a with `root entry { report 1; }\n  can b with Task entry { report 2; }\n  can c with Task exit { report 3; }\n}",
        );

        let mut program = Program::new(tmp.path());
        program.compile(&base, false, false);
        assert!(!program.diagnostics.has_errors());
    }

    #[test]
    fn client_page_emits_js_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(&base, "client page Home { \"<h1>hi</h1>\"; }");

        let mut program = Program::new(tmp.path());
        let compiled = program.compile(&base, false, false).unwrap();
        let image = compiled.image.as_ref().unwrap();
        assert_eq!(image.client_pages.len(), 1);
        assert!(image.client_pages[0].js.contains("JacClient.register"));
        assert!(!compiled.artifacts.is_empty());
    }

    #[test]
    fn no_cgen_yields_no_image() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("app.jac");
        write(&base, "def f() { return 1; }");

        let mut program = Program::new(tmp.path());
        let compiled = program.compile_with(
            &base,
            crate::passes::PassOptions {
                minimal: true,
                no_cgen: true,
            },
        ).unwrap();
        assert!(compiled.image.is_none());
    }
}
