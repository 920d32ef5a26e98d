//! Canonical source rendering: the unparser doubles as the formatter.
//!
//! Output is deterministic for a given AST, which makes formatting
//! idempotent by construction: parse → unparse reaches a fixed point after
//! one round.

use crate::ast::*;

const INDENT: &str = "    ";

/// Render a module back to canonical Jac source.
pub fn unparse(module: &Module) -> String {
    let mut printer = Printer::default();
    for (index, item) in module.items.iter().enumerate() {
        if index > 0 {
            printer.out.push('\n');
        }
        printer.item(item);
    }
    printer.out
}

/// Format source text: parse then unparse. Returns `None` when the source
/// has fatal syntax errors.
pub fn format_source(source: &str, path: &std::path::Path) -> Option<String> {
    let result = crate::parser::parse_module(source, path);
    if result.fatal || !result.diagnostics.is_empty() {
        return None;
    }
    Some(unparse(&result.module))
}

#[derive(Default)]
struct Printer {
    out: String,
    depth: usize,
}

impl Printer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn item(&mut self, item: &Item) {
        match item {
            Item::Import(import) => {
                if import.names.is_empty() {
                    self.line(&format!("import {};", import.module));
                } else {
                    self.line(&format!(
                        "import from {} {{ {} }}",
                        import.module,
                        import.names.join(", ")
                    ));
                }
            }
            Item::Archetype(arch) => self.archetype(arch),
            Item::Function(func) => self.function(func),
            Item::ClientPage(page) => {
                self.line(&format!("client page {} {{", page.name));
                self.block_body(&page.body);
                self.line("}");
            }
            Item::Entry(entry) => {
                match &entry.name {
                    Some(name) => self.line(&format!("with entry:{name} {{")),
                    None => self.line("with entry {"),
                }
                self.block_body(&entry.body);
                self.line("}");
            }
            Item::Impl(block) => self.impl_block(block),
        }
    }

    fn archetype(&mut self, arch: &Archetype) {
        for decorator in &arch.decorators {
            self.line(&format!("@{}", decorator.name));
        }
        self.line(&format!("{} {} {{", arch.kind.keyword(), arch.name));
        self.depth += 1;
        for field in &arch.fields {
            let mut text = format!("has {}: {}", field.name, field.ty.name);
            if let Some(default) = &field.default {
                text.push_str(&format!(" = {}", expr(default)));
            }
            text.push(';');
            self.line(&text);
        }
        for ability in &arch.abilities {
            self.ability(ability);
        }
        self.depth -= 1;
        self.line("}");
    }

    fn ability(&mut self, ability: &Ability) {
        let peer = match &ability.peer {
            AbilityPeer::Root => " with `root".to_string(),
            AbilityPeer::Named(name) => format!(" with {name}"),
            AbilityPeer::Any => " with".to_string(),
        };
        let moment = match ability.moment {
            AbilityMoment::Entry => "entry",
            AbilityMoment::Exit => "exit",
        };
        match &ability.body {
            Some(body) => {
                self.line(&format!("can {}{peer} {moment} {{", ability.name));
                self.block_body(body);
                self.line("}");
            }
            None => self.line(&format!("can {}{peer} {moment};", ability.name)),
        }
    }

    fn function(&mut self, func: &Function) {
        for decorator in &func.decorators {
            self.line(&format!("@{}", decorator.name));
        }
        let params: Vec<String> = func
            .params
            .iter()
            .map(|p| {
                let mut text = p.name.clone();
                if let Some(ty) = &p.ty {
                    text.push_str(&format!(": {}", ty.name));
                }
                if let Some(default) = &p.default {
                    text.push_str(&format!(" = {}", expr(default)));
                }
                text
            })
            .collect();
        let ret = func
            .ret
            .as_ref()
            .map(|r| format!(" -> {}", r.name))
            .unwrap_or_default();
        match &func.body {
            Some(body) => {
                self.line(&format!("def {}({}){ret} {{", func.name, params.join(", ")));
                self.block_body(body);
                self.line("}");
            }
            None => self.line(&format!("def {}({}){ret};", func.name, params.join(", "))),
        }
    }

    fn impl_block(&mut self, block: &ImplBlock) {
        match (&block.member, &block.payload) {
            (Some(member), ImplPayload::Body(body)) => {
                self.line(&format!("impl {}.{member} {{", block.target));
                self.block_body(body);
                self.line("}");
            }
            (_, ImplPayload::Members(members)) => {
                self.line(&format!("impl {} {{", block.target));
                self.depth += 1;
                for member in members {
                    match member {
                        ImplMember::Ability(ability) => self.ability(ability),
                        ImplMember::Function(func) => self.function(func),
                    }
                }
                self.depth -= 1;
                self.line("}");
            }
            (None, ImplPayload::Body(body)) => {
                // Statement body for a top-level function impl.
                self.line(&format!("impl {} {{", block.target));
                self.block_body(body);
                self.line("}");
            }
        }
    }

    fn block_body(&mut self, body: &[Stmt]) {
        self.depth += 1;
        for stmt in body {
            self.stmt(stmt);
        }
        self.depth -= 1;
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { name, value, .. } => match value {
                Some(value) => self.line(&format!("let {name} = {};", expr(value))),
                None => self.line(&format!("let {name};")),
            },
            Stmt::Assign { target, value, .. } => {
                self.line(&format!("{} = {};", expr(target), expr(value)));
            }
            Stmt::If {
                branches,
                else_body,
                ..
            } => {
                for (index, (cond, body)) in branches.iter().enumerate() {
                    let keyword = if index == 0 { "if" } else { "elif" };
                    self.line(&format!("{keyword} {} {{", expr(cond)));
                    self.block_body(body);
                    self.line("}");
                }
                if let Some(body) = else_body {
                    self.line("else {");
                    self.block_body(body);
                    self.line("}");
                }
            }
            Stmt::For {
                var, iter, body, ..
            } => {
                self.line(&format!("for {var} in {} {{", expr(iter)));
                self.block_body(body);
                self.line("}");
            }
            Stmt::While { cond, body, .. } => {
                self.line(&format!("while {} {{", expr(cond)));
                self.block_body(body);
                self.line("}");
            }
            Stmt::Return(value, _) => match value {
                Some(value) => self.line(&format!("return {};", expr(value))),
                None => self.line("return;"),
            },
            Stmt::Report(value, _) => self.line(&format!("report {};", expr(value))),
            Stmt::Visit(target, _) => self.line(&format!("visit {};", expr(target))),
            Stmt::Disengage(_) => self.line("disengage;"),
            Stmt::Yield(value, _) => self.line(&format!("yield {};", expr(value))),
            Stmt::Expr(value, _) => self.line(&format!("{};", expr(value))),
        }
    }
}

fn expr(node: &Expr) -> String {
    match node {
        Expr::Literal(lit, _) => literal(lit),
        Expr::ListLit(items, _) => {
            let rendered: Vec<String> = items.iter().map(expr).collect();
            format!("[{}]", rendered.join(", "))
        }
        Expr::MapLit(entries, _) => {
            let rendered: Vec<String> = entries
                .iter()
                .map(|(key, value)| format!("{}: {}", quote(key), expr(value)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        Expr::Name(name, _) => name.clone(),
        Expr::SelfRef(_) => "self".to_string(),
        Expr::Here(_) => "here".to_string(),
        Expr::RootRef(_) => "root".to_string(),
        Expr::Visitor(_) => "visitor".to_string(),
        Expr::Field(base, name, _) => format!("{}.{name}", expr(base)),
        Expr::Index(base, index, _) => format!("{}[{}]", expr(base), expr(index)),
        Expr::Call {
            callee,
            args,
            kwargs,
            ..
        } => {
            let mut parts: Vec<String> = args.iter().map(expr).collect();
            parts.extend(kwargs.iter().map(|(name, value)| format!("{name}={}", expr(value))));
            format!("{}({})", expr(callee), parts.join(", "))
        }
        Expr::Unary { op, operand, .. } => match op {
            UnaryOp::Neg => format!("-{}", expr(operand)),
            UnaryOp::Not => format!("not {}", expr(operand)),
        },
        Expr::Binary { op, lhs, rhs, .. } => {
            format!("({} {} {})", expr(lhs), op.symbol(), expr(rhs))
        }
        Expr::Connect {
            lhs,
            rhs,
            edge,
            directed,
            ..
        } => match (edge, directed) {
            (Some(label), _) => format!("{} +:{label}:+> {}", expr(lhs), expr(rhs)),
            (None, true) => format!("{} ++> {}", expr(lhs), expr(rhs)),
            (None, false) => format!("{} <++> {}", expr(lhs), expr(rhs)),
        },
        Expr::EdgeQuery {
            direction, filter, ..
        } => {
            let arrow = match direction {
                EdgeDirection::Out => "-->",
                EdgeDirection::In => "<--",
            };
            match filter {
                Some(name) => format!("[{arrow}(`?{name})]"),
                None => format!("[{arrow}]"),
            }
        }
        Expr::Spawn { target, walker, .. } => {
            format!("{} spawn {}", expr(target), expr(walker))
        }
    }
}

fn literal(lit: &Literal) -> String {
    match lit {
        Literal::Null => "null".to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::Int(n) => n.to_string(),
        Literal::Float(x) => {
            if x.fract() == 0.0 {
                format!("{x:.1}")
            } else {
                x.to_string()
            }
        }
        Literal::Str(s) => quote_str(s),
    }
}

fn quote(key: &str) -> String {
    // Map keys always render quoted so formatting is stable regardless of
    // which key form the author used.
    quote_str(key)
}

fn quote_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
