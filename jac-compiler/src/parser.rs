//! Recursive-descent parser with error recovery.
//!
//! Benign errors are recorded and parsing resumes at the next statement or
//! item boundary; only a malformed top level aborts the module. The parse
//! pass therefore yields a best-effort AST plus the accumulated syntax
//! diagnostics.

use std::path::Path;
use std::sync::Arc;

use jac_core::diag::{Diagnostic, DiagnosticKind};
use jac_core::loc::SourceSpan;

use crate::ast::*;
use crate::token::{Lexer, Token, TokenKind};

pub struct ParseResult {
    pub module: Module,
    pub diagnostics: Vec<Diagnostic>,
    /// True when recovery failed and later passes should not run.
    pub fatal: bool,
}

/// Parse one source file into a module AST.
pub fn parse_module(source: &str, path: &Path) -> ParseResult {
    let path_str: Arc<str> = path.to_string_lossy().into_owned().into();
    let (tokens, lex_errors) = Lexer::new(source, path_str.clone()).tokenize();

    let mut diagnostics: Vec<Diagnostic> = lex_errors
        .into_iter()
        .map(|(message, span)| Diagnostic::error(DiagnosticKind::Syntax, message, Some(span)))
        .collect();

    let name = module_name_from_path(path);
    let mut parser = Parser {
        tokens,
        pos: 0,
        path: path_str.clone(),
        diagnostics: Vec::new(),
        fatal: false,
    };
    let mut module = Module::new(name, path_str.to_string(), SourceSpan::file_start(path_str));
    parser.parse_items(&mut module);
    diagnostics.append(&mut parser.diagnostics);

    ParseResult {
        module,
        fatal: parser.fatal,
        diagnostics,
    }
}

/// The logical module name: file stem without annex suffixes.
pub fn module_name_from_path(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("module");
    stem.trim_end_matches(".impl")
        .trim_end_matches(".cl")
        .trim_end_matches(".test")
        .to_string()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    path: Arc<str>,
    diagnostics: Vec<Diagnostic>,
    fatal: bool,
}

impl Parser {
    // ── Items ───────────────────────────────────────────────────────────────

    fn parse_items(&mut self, module: &mut Module) {
        while !self.at(&TokenKind::Eof) {
            let before = self.pos;
            match self.parse_item() {
                Some(item) => module.items.push(item),
                None => {
                    self.recover_to_item_boundary();
                    if self.pos == before {
                        // No forward progress is unrecoverable.
                        self.fatal = true;
                        return;
                    }
                }
            }
        }
    }

    fn parse_item(&mut self) -> Option<Item> {
        let decorators = self.parse_decorators()?;
        let token = self.peek().clone();
        match token.kind {
            TokenKind::KwImport => self.parse_import().map(Item::Import),
            TokenKind::KwNode => self.parse_archetype(ArchetypeKind::Node, decorators),
            TokenKind::KwEdge => self.parse_archetype(ArchetypeKind::Edge, decorators),
            TokenKind::KwWalker => self.parse_archetype(ArchetypeKind::Walker, decorators),
            TokenKind::KwObj => self.parse_archetype(ArchetypeKind::Object, decorators),
            TokenKind::KwClass => self.parse_archetype(ArchetypeKind::Class, decorators),
            TokenKind::KwDef => self.parse_function(decorators).map(Item::Function),
            TokenKind::KwClient => self.parse_client_page().map(Item::ClientPage),
            TokenKind::KwWith => self.parse_entry_block().map(Item::Entry),
            TokenKind::KwImpl => self.parse_impl_block().map(Item::Impl),
            _ => {
                self.error(format!("expected item, found '{}'", token.kind), &token.span);
                None
            }
        }
    }

    fn parse_decorators(&mut self) -> Option<Vec<Decorator>> {
        let mut decorators = Vec::new();
        while self.at(&TokenKind::At) {
            let start = self.advance().span;
            let name = self.expect_name("decorator name")?;
            decorators.push(Decorator {
                name,
                span: start.to(&self.prev_span()),
            });
        }
        Some(decorators)
    }

    fn parse_import(&mut self) -> Option<Import> {
        let start = self.advance().span; // import
        if self.eat(&TokenKind::KwFrom) {
            let module = self.parse_dotted_name()?;
            self.expect(&TokenKind::LBrace)?;
            let mut names = Vec::new();
            loop {
                names.push(self.expect_name("imported name")?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBrace)?;
            self.eat(&TokenKind::Semi);
            Some(Import {
                module,
                names,
                span: start.to(&self.prev_span()),
            })
        } else {
            let module = self.parse_dotted_name()?;
            self.expect(&TokenKind::Semi)?;
            Some(Import {
                module,
                names: Vec::new(),
                span: start.to(&self.prev_span()),
            })
        }
    }

    fn parse_dotted_name(&mut self) -> Option<String> {
        let mut name = self.expect_name("module name")?;
        while self.eat(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_name("module name segment")?);
        }
        Some(name)
    }

    fn parse_archetype(&mut self, kind: ArchetypeKind, decorators: Vec<Decorator>) -> Option<Item> {
        let start = self.advance().span; // keyword
        let name = self.expect_name("archetype name")?;
        self.expect(&TokenKind::LBrace)?;

        let mut fields = Vec::new();
        let mut abilities = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            let before = self.pos;
            let token = self.peek().clone();
            match token.kind {
                TokenKind::KwHas => {
                    if let Some(field) = self.parse_has_field() {
                        fields.push(field);
                    }
                }
                TokenKind::KwCan => {
                    if let Some(ability) = self.parse_ability() {
                        abilities.push(ability);
                    }
                }
                _ => {
                    self.error(
                        format!("expected 'has' or 'can' in archetype body, found '{}'", token.kind),
                        &token.span,
                    );
                }
            }
            if self.pos == before {
                self.recover_to_stmt_boundary();
                if self.pos == before {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBrace)?;

        Some(Item::Archetype(Archetype {
            name,
            kind,
            fields,
            abilities,
            decorators,
            span: start.to(&self.prev_span()),
        }))
    }

    fn parse_has_field(&mut self) -> Option<HasField> {
        let start = self.advance().span; // has
        let name = self.expect_name("field name")?;
        self.expect(&TokenKind::Colon)?;
        let ty = self.parse_type_ref()?;
        let default = if self.eat(&TokenKind::Assign) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semi)?;
        Some(HasField {
            name,
            ty,
            default,
            span: start.to(&self.prev_span()),
        })
    }

    fn parse_type_ref(&mut self) -> Option<TypeRef> {
        let token = self.peek().clone();
        let name = match token.kind {
            TokenKind::Name(ref name) => {
                self.advance();
                name.clone()
            }
            // Builtin type names share keywords with expression heads.
            TokenKind::KwNode => {
                self.advance();
                "node".to_string()
            }
            TokenKind::KwEdge => {
                self.advance();
                "edge".to_string()
            }
            TokenKind::KwRoot => {
                self.advance();
                "root".to_string()
            }
            _ => {
                self.error(format!("expected type name, found '{}'", token.kind), &token.span);
                return None;
            }
        };
        Some(TypeRef {
            name,
            span: token.span,
        })
    }

    fn parse_ability(&mut self) -> Option<Ability> {
        let start = self.advance().span; // can
        let name = self.expect_name("ability name")?;

        let mut peer = AbilityPeer::Any;
        let mut moment = AbilityMoment::Entry;
        if self.eat(&TokenKind::KwWith) {
            peer = match self.peek().kind.clone() {
                TokenKind::Backtick => {
                    self.advance();
                    self.expect(&TokenKind::KwRoot)?;
                    AbilityPeer::Root
                }
                TokenKind::KwRoot => {
                    self.advance();
                    AbilityPeer::Root
                }
                TokenKind::Name(name) => {
                    self.advance();
                    AbilityPeer::Named(name)
                }
                _ => AbilityPeer::Any,
            };
            moment = if self.eat(&TokenKind::KwExit) {
                AbilityMoment::Exit
            } else {
                self.expect(&TokenKind::KwEntry)?;
                AbilityMoment::Entry
            };
        }

        let body = if self.eat(&TokenKind::Semi) {
            None
        } else {
            Some(self.parse_block()?)
        };

        Some(Ability {
            name,
            peer,
            moment,
            body,
            span: start.to(&self.prev_span()),
        })
    }

    fn parse_function(&mut self, decorators: Vec<Decorator>) -> Option<Function> {
        let start = self.advance().span; // def
        let name = self.expect_name("function name")?;
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                let param_start = self.peek().span.clone();
                let param_name = self.expect_name("parameter name")?;
                let ty = if self.eat(&TokenKind::Colon) {
                    Some(self.parse_type_ref()?)
                } else {
                    None
                };
                let default = if self.eat(&TokenKind::Assign) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                params.push(Param {
                    name: param_name,
                    ty,
                    default,
                    span: param_start.to(&self.prev_span()),
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        let ret = if self.eat(&TokenKind::Arrow) {
            Some(self.parse_type_ref()?)
        } else {
            None
        };
        let body = if self.eat(&TokenKind::Semi) {
            None
        } else {
            Some(self.parse_block()?)
        };
        Some(Function {
            name,
            params,
            ret,
            body,
            decorators,
            span: start.to(&self.prev_span()),
        })
    }

    fn parse_client_page(&mut self) -> Option<ClientPage> {
        let start = self.advance().span; // client
        self.expect(&TokenKind::KwPage)?;
        let name = self.expect_name("page name")?;
        let body = self.parse_block()?;
        Some(ClientPage {
            name,
            body,
            span: start.to(&self.prev_span()),
        })
    }

    fn parse_entry_block(&mut self) -> Option<EntryBlock> {
        let start = self.advance().span; // with
        self.expect(&TokenKind::KwEntry)?;
        let name = if self.eat(&TokenKind::Colon) {
            Some(self.expect_name("entry block name")?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Some(EntryBlock {
            name,
            body,
            span: start.to(&self.prev_span()),
        })
    }

    fn parse_impl_block(&mut self) -> Option<ImplBlock> {
        let start = self.advance().span; // impl
        let target = self.expect_name("impl target")?;
        let member = if self.eat(&TokenKind::Dot) {
            Some(self.expect_name("impl member name")?)
        } else {
            None
        };

        let payload = if member.is_some() {
            ImplPayload::Body(self.parse_block()?)
        } else if !matches!(
            self.peek_at(1).kind,
            TokenKind::KwCan | TokenKind::KwDef | TokenKind::RBrace
        ) {
            // `impl greet { … }` — statement body for a top-level function.
            ImplPayload::Body(self.parse_block()?)
        } else {
            self.expect(&TokenKind::LBrace)?;
            let mut members = Vec::new();
            while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
                let before = self.pos;
                match self.peek().kind.clone() {
                    TokenKind::KwCan => {
                        if let Some(ability) = self.parse_ability() {
                            members.push(ImplMember::Ability(ability));
                        }
                    }
                    TokenKind::KwDef => {
                        if let Some(func) = self.parse_function(Vec::new()) {
                            members.push(ImplMember::Function(func));
                        }
                    }
                    other => {
                        let span = self.peek().span.clone();
                        self.error(format!("expected 'can' or 'def' in impl body, found '{other}'"), &span);
                    }
                }
                if self.pos == before {
                    self.recover_to_stmt_boundary();
                    if self.pos == before {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RBrace)?;
            ImplPayload::Members(members)
        };

        Some(ImplBlock {
            target,
            member,
            payload,
            span: start.to(&self.prev_span()),
        })
    }

    // ── Statements ──────────────────────────────────────────────────────────

    fn parse_block(&mut self) -> Option<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.at(&TokenKind::RBrace) && !self.at(&TokenKind::Eof) {
            let before = self.pos;
            match self.parse_stmt() {
                Some(stmt) => stmts.push(stmt),
                None => {
                    self.recover_to_stmt_boundary();
                    if self.pos == before {
                        break;
                    }
                }
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Some(stmts)
    }

    fn parse_stmt(&mut self) -> Option<Stmt> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::KwLet => {
                let start = self.advance().span;
                let name = self.expect_name("binding name")?;
                let value = if self.eat(&TokenKind::Assign) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                self.expect(&TokenKind::Semi)?;
                Some(Stmt::Let {
                    name,
                    value,
                    span: start.to(&self.prev_span()),
                })
            }
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwFor => {
                let start = self.advance().span;
                let var = self.expect_name("loop variable")?;
                self.expect(&TokenKind::KwIn)?;
                let iter = self.parse_expr()?;
                let body = self.parse_block()?;
                Some(Stmt::For {
                    var,
                    iter,
                    body,
                    span: start.to(&self.prev_span()),
                })
            }
            TokenKind::KwWhile => {
                let start = self.advance().span;
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                Some(Stmt::While {
                    cond,
                    body,
                    span: start.to(&self.prev_span()),
                })
            }
            TokenKind::KwReturn => {
                let start = self.advance().span;
                let value = if self.at(&TokenKind::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&TokenKind::Semi)?;
                Some(Stmt::Return(value, start.to(&self.prev_span())))
            }
            TokenKind::KwReport => {
                let start = self.advance().span;
                let value = self.parse_expr()?;
                self.expect(&TokenKind::Semi)?;
                Some(Stmt::Report(value, start.to(&self.prev_span())))
            }
            TokenKind::KwVisit => {
                let start = self.advance().span;
                let target = self.parse_expr()?;
                self.expect(&TokenKind::Semi)?;
                Some(Stmt::Visit(target, start.to(&self.prev_span())))
            }
            TokenKind::KwDisengage => {
                let start = self.advance().span;
                self.expect(&TokenKind::Semi)?;
                Some(Stmt::Disengage(start.to(&self.prev_span())))
            }
            TokenKind::KwYield => {
                let start = self.advance().span;
                let value = self.parse_expr()?;
                self.expect(&TokenKind::Semi)?;
                Some(Stmt::Yield(value, start.to(&self.prev_span())))
            }
            _ => {
                let start = token.span.clone();
                let expr = self.parse_expr()?;
                if self.eat(&TokenKind::Assign) {
                    if !matches!(expr, Expr::Name(..) | Expr::Field(..) | Expr::Index(..)) {
                        self.error("invalid assignment target".to_string(), expr.span());
                        return None;
                    }
                    let value = self.parse_expr()?;
                    self.expect(&TokenKind::Semi)?;
                    Some(Stmt::Assign {
                        target: expr,
                        value,
                        span: start.to(&self.prev_span()),
                    })
                } else {
                    self.expect(&TokenKind::Semi)?;
                    Some(Stmt::Expr(expr, start.to(&self.prev_span())))
                }
            }
        }
    }

    fn parse_if(&mut self) -> Option<Stmt> {
        let start = self.advance().span; // if
        let mut branches = Vec::new();
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        branches.push((cond, body));

        let mut else_body = None;
        loop {
            if self.eat(&TokenKind::KwElif) {
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                branches.push((cond, body));
            } else if self.eat(&TokenKind::KwElse) {
                if self.at(&TokenKind::KwIf) {
                    // `else if` sugar for elif.
                    self.advance();
                    let cond = self.parse_expr()?;
                    let body = self.parse_block()?;
                    branches.push((cond, body));
                    continue;
                }
                else_body = Some(self.parse_block()?);
                break;
            } else {
                break;
            }
        }

        Some(Stmt::If {
            branches,
            else_body,
            span: start.to(&self.prev_span()),
        })
    }

    // ── Expressions ─────────────────────────────────────────────────────────

    fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_spawn()
    }

    fn parse_spawn(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_or()?;
        while self.at(&TokenKind::KwSpawn) {
            let _ = self.advance();
            let rhs = self.parse_or()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Spawn {
                target: Box::new(lhs),
                walker: Box::new(rhs),
                span,
            };
        }
        Some(lhs)
    }

    fn parse_or(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat(&TokenKind::KwOr) {
            let rhs = self.parse_and()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Some(lhs)
    }

    fn parse_and(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_not()?;
        while self.eat(&TokenKind::KwAnd) {
            let rhs = self.parse_not()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Some(lhs)
    }

    fn parse_not(&mut self) -> Option<Expr> {
        if self.at(&TokenKind::KwNot) {
            let start = self.advance().span;
            let operand = self.parse_not()?;
            let span = start.to(operand.span());
            return Some(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_connect()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Eq => BinaryOp::Eq,
                TokenKind::Ne => BinaryOp::Ne,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_connect()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Some(lhs)
    }

    fn parse_connect(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let (edge, directed) = match self.peek().kind.clone() {
                TokenKind::ConnectTo => {
                    self.advance();
                    (None, true)
                }
                TokenKind::ConnectBoth => {
                    self.advance();
                    (None, false)
                }
                TokenKind::EdgeTypedOpen => {
                    self.advance();
                    let label = self.expect_name("edge archetype name")?;
                    self.expect(&TokenKind::EdgeTypedTo)?;
                    (Some(label), true)
                }
                _ => break,
            };
            let rhs = self.parse_additive()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Connect {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                edge,
                directed,
                span,
            };
        }
        Some(lhs)
    }

    fn parse_additive(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_term()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Some(lhs)
    }

    fn parse_term(&mut self) -> Option<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        if self.at(&TokenKind::Minus) {
            let start = self.advance().span;
            let operand = self.parse_unary()?;
            let span = start.to(operand.span());
            return Some(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Option<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_name("attribute name")?;
                    let span = expr.span().to(&self.prev_span());
                    expr = Expr::Field(Box::new(expr), name, span);
                }
                TokenKind::LParen => {
                    self.advance();
                    let (args, kwargs) = self.parse_args()?;
                    self.expect(&TokenKind::RParen)?;
                    let span = expr.span().to(&self.prev_span());
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        kwargs,
                        span,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    let span = expr.span().to(&self.prev_span());
                    expr = Expr::Index(Box::new(expr), Box::new(index), span);
                }
                _ => break,
            }
        }
        Some(expr)
    }

    fn parse_args(&mut self) -> Option<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if self.at(&TokenKind::RParen) {
            return Some((args, kwargs));
        }
        loop {
            // `name = expr` is a keyword argument.
            let is_kwarg = matches!(self.peek().kind, TokenKind::Name(_))
                && matches!(self.peek_at(1).kind, TokenKind::Assign);
            if is_kwarg {
                let name = self.expect_name("argument name")?;
                self.expect(&TokenKind::Assign)?;
                let value = self.parse_expr()?;
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    let span = self.peek().span.clone();
                    self.error("positional argument after keyword argument".to_string(), &span);
                }
                args.push(self.parse_expr()?);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Some((args, kwargs))
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Int(n) => {
                self.advance();
                Some(Expr::Literal(Literal::Int(n), token.span))
            }
            TokenKind::Float(x) => {
                self.advance();
                Some(Expr::Literal(Literal::Float(x), token.span))
            }
            TokenKind::Str(ref s) => {
                self.advance();
                Some(Expr::Literal(Literal::Str(s.clone()), token.span))
            }
            TokenKind::KwTrue => {
                self.advance();
                Some(Expr::Literal(Literal::Bool(true), token.span))
            }
            TokenKind::KwFalse => {
                self.advance();
                Some(Expr::Literal(Literal::Bool(false), token.span))
            }
            TokenKind::KwNull => {
                self.advance();
                Some(Expr::Literal(Literal::Null, token.span))
            }
            TokenKind::KwSelf => {
                self.advance();
                Some(Expr::SelfRef(token.span))
            }
            TokenKind::KwHere => {
                self.advance();
                Some(Expr::Here(token.span))
            }
            TokenKind::KwRoot => {
                self.advance();
                Some(Expr::RootRef(token.span))
            }
            TokenKind::KwVisitor => {
                self.advance();
                Some(Expr::Visitor(token.span))
            }
            TokenKind::Name(ref name) => {
                self.advance();
                Some(Expr::Name(name.clone(), token.span))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Some(inner)
            }
            TokenKind::LBracket => self.parse_bracketed(),
            TokenKind::LBrace => self.parse_map_literal(),
            _ => {
                self.error(format!("expected expression, found '{}'", token.kind), &token.span);
                None
            }
        }
    }

    /// `[` starts a list literal or an edge query.
    fn parse_bracketed(&mut self) -> Option<Expr> {
        let start = self.advance().span; // [
        let direction = match self.peek().kind {
            TokenKind::ArrowOut => Some(EdgeDirection::Out),
            TokenKind::ArrowIn => Some(EdgeDirection::In),
            _ => None,
        };
        if let Some(direction) = direction {
            self.advance();
            let filter = if self.eat(&TokenKind::LParen) {
                self.eat(&TokenKind::Backtick);
                self.expect(&TokenKind::Question)?;
                let name = self.expect_name("node archetype filter")?;
                self.expect(&TokenKind::RParen)?;
                Some(name)
            } else {
                None
            };
            self.expect(&TokenKind::RBracket)?;
            return Some(Expr::EdgeQuery {
                direction,
                filter,
                span: start.to(&self.prev_span()),
            });
        }

        let mut items = Vec::new();
        if !self.at(&TokenKind::RBracket) {
            loop {
                items.push(self.parse_expr()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBracket)?;
        Some(Expr::ListLit(items, start.to(&self.prev_span())))
    }

    fn parse_map_literal(&mut self) -> Option<Expr> {
        let start = self.advance().span; // {
        let mut entries = Vec::new();
        if !self.at(&TokenKind::RBrace) {
            loop {
                let key = match self.peek().kind.clone() {
                    TokenKind::Str(s) => {
                        self.advance();
                        s
                    }
                    TokenKind::Name(name) => {
                        self.advance();
                        name
                    }
                    other => {
                        let span = self.peek().span.clone();
                        self.error(format!("expected map key, found '{other}'"), &span);
                        return None;
                    }
                };
                self.expect(&TokenKind::Colon)?;
                let value = self.parse_expr()?;
                entries.push((key, value));
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RBrace)?;
        Some(Expr::MapLit(entries, start.to(&self.prev_span())))
    }

    // ── Token plumbing ──────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)]
    }

    fn prev_span(&self) -> SourceSpan {
        self.tokens[self.pos.saturating_sub(1).min(self.tokens.len() - 1)]
            .span
            .clone()
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Option<Token> {
        if self.at(kind) {
            Some(self.advance())
        } else {
            let token = self.peek().clone();
            self.error(format!("expected '{kind:?}', found '{}'", token.kind), &token.span);
            None
        }
    }

    fn expect_name(&mut self, what: &str) -> Option<String> {
        match self.peek().kind.clone() {
            TokenKind::Name(name) => {
                self.advance();
                Some(name)
            }
            other => {
                let span = self.peek().span.clone();
                self.error(format!("expected {what}, found '{other}'"), &span);
                None
            }
        }
    }

    fn error(&mut self, message: String, span: &SourceSpan) {
        self.diagnostics
            .push(Diagnostic::error(DiagnosticKind::Syntax, message, Some(span.clone())));
    }

    fn recover_to_stmt_boundary(&mut self) {
        while !matches!(self.peek().kind, TokenKind::Eof | TokenKind::RBrace) {
            if matches!(self.advance().kind, TokenKind::Semi) {
                return;
            }
        }
    }

    fn recover_to_item_boundary(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek().kind {
                TokenKind::Eof => return,
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    self.advance();
                    if depth <= 1 {
                        return;
                    }
                    depth -= 1;
                    continue;
                }
                TokenKind::KwNode
                | TokenKind::KwEdge
                | TokenKind::KwWalker
                | TokenKind::KwObj
                | TokenKind::KwClass
                | TokenKind::KwDef
                | TokenKind::KwImport
                | TokenKind::KwImpl
                    if depth == 0 =>
                {
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse_ok(source: &str) -> Module {
        let result = parse_module(source, &PathBuf::from("test.jac"));
        assert!(
            result.diagnostics.is_empty(),
            "unexpected diagnostics: {:?}",
            result.diagnostics
        );
        assert!(!result.fatal);
        result.module
    }

    #[test]
    fn parses_node_with_fields() {
        let module = parse_ok("node Task { has title: str; has priority: int = 0; }");
        let arch = module.archetypes().next().unwrap();
        assert_eq!(arch.name, "Task");
        assert_eq!(arch.kind, ArchetypeKind::Node);
        assert_eq!(arch.fields.len(), 2);
        assert!(arch.fields[0].default.is_none());
        assert!(arch.fields[1].default.is_some());
    }

    #[test]
    fn parses_walker_with_root_ability() {
        let module = parse_ok(
            "walker CreateTask {\n  has title: str;\n  can build with `root entry {\n    report here;\n  }\n}",
        );
        let arch = module.archetypes().next().unwrap();
        assert_eq!(arch.kind, ArchetypeKind::Walker);
        let ability = &arch.abilities[0];
        assert_eq!(ability.peer, AbilityPeer::Root);
        assert_eq!(ability.moment, AbilityMoment::Entry);
        assert!(ability.body.is_some());
    }

    #[test]
    fn parses_declaration_only_ability() {
        let module = parse_ok("walker W { can go with Task entry; }");
        let arch = module.archetypes().next().unwrap();
        assert!(arch.abilities[0].body.is_none());
    }

    #[test]
    fn parses_impl_forms() {
        let module = parse_ok("impl W.go { report 1; }\nimpl V { can go with Task entry { report 2; } }");
        let impls: Vec<_> = module
            .items
            .iter()
            .filter_map(|i| match i {
                Item::Impl(block) => Some(block),
                _ => None,
            })
            .collect();
        assert_eq!(impls.len(), 2);
        assert_eq!(impls[0].member.as_deref(), Some("go"));
        assert!(matches!(impls[1].payload, ImplPayload::Members(_)));
    }

    #[test]
    fn parses_imports() {
        let module = parse_ok("import os;\nimport from utils { helper, fmt }");
        let imports: Vec<_> = module.imports().collect();
        assert_eq!(imports[0].module, "os");
        assert!(imports[0].names.is_empty());
        assert_eq!(imports[1].names, vec!["helper".to_string(), "fmt".to_string()]);
    }

    #[test]
    fn parses_connect_and_edge_query() {
        let module = parse_ok(
            "walker W { can go with `root entry { report here ++> Task(title=self.t); visit [-->]; } }",
        );
        let arch = module.archetypes().next().unwrap();
        let body = arch.abilities[0].body.as_ref().unwrap();
        assert!(matches!(&body[0], Stmt::Report(Expr::Connect { .. }, _)));
        assert!(matches!(&body[1], Stmt::Visit(Expr::EdgeQuery { .. }, _)));
    }

    #[test]
    fn parses_filtered_edge_query() {
        let module = parse_ok("walker W { can go with `root entry { visit [-->(`?Task)]; } }");
        let arch = module.archetypes().next().unwrap();
        let body = arch.abilities[0].body.as_ref().unwrap();
        match &body[0] {
            Stmt::Visit(Expr::EdgeQuery { filter, direction, .. }, _) => {
                assert_eq!(filter.as_deref(), Some("Task"));
                assert_eq!(*direction, EdgeDirection::Out);
            }
            other => panic!("expected visit of edge query, got {other:?}"),
        }
    }

    #[test]
    fn parses_map_and_list_literals() {
        let module = parse_ok("def f() { report {\"a\": 1, b: [2, 3]}; }");
        let func = module.functions().next().unwrap();
        match &func.body.as_ref().unwrap()[0] {
            Stmt::Report(Expr::MapLit(entries, _), _) => {
                assert_eq!(entries[0].0, "a");
                assert_eq!(entries[1].0, "b");
            }
            other => panic!("expected map literal report, got {other:?}"),
        }
    }

    #[test]
    fn parses_spawn_expression() {
        let module = parse_ok("with entry { root spawn CreateTask(title=\"T\"); }");
        match &module.items[0] {
            Item::Entry(entry) => match &entry.body[0] {
                Stmt::Expr(Expr::Spawn { .. }, _) => {}
                other => panic!("expected spawn, got {other:?}"),
            },
            other => panic!("expected entry block, got {other:?}"),
        }
    }

    #[test]
    fn parses_decorators() {
        let module = parse_ok("@public\n@streaming\nwalker StreamReporter { has count: int = 1; }");
        let arch = module.archetypes().next().unwrap();
        assert_eq!(arch.access(), AccessLevel::Public);
        assert!(arch.is_streaming());
    }

    #[test]
    fn recovers_from_bad_statement() {
        let result = parse_module(
            "walker W { can go with `root entry { let = ; report 1; } }",
            &PathBuf::from("bad.jac"),
        );
        assert!(!result.diagnostics.is_empty());
        assert!(!result.fatal);
        let arch = result.module.archetypes().next().unwrap();
        let body = arch.abilities[0].body.as_ref().unwrap();
        // The good statement after the bad one survived recovery.
        assert!(body.iter().any(|s| matches!(s, Stmt::Report(..))));
    }

    #[test]
    fn named_entry_block_for_tests() {
        let module = parse_ok("with entry:check_math { report 1 + 2; }");
        match &module.items[0] {
            Item::Entry(entry) => assert_eq!(entry.name.as_deref(), Some("check_math")),
            other => panic!("expected entry, got {other:?}"),
        }
    }

    #[test]
    fn module_name_strips_annex_suffix() {
        assert_eq!(module_name_from_path(Path::new("/a/b/tasks.jac")), "tasks");
        assert_eq!(module_name_from_path(Path::new("/a/b/tasks.impl.jac")), "tasks");
        assert_eq!(module_name_from_path(Path::new("/a/b/tasks.test.jac")), "tasks");
    }
}
