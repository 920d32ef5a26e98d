//! The shared AST every pass transforms.
//!
//! Each node carries a [`SourceSpan`]. Structural equality deliberately
//! ignores spans; two parses of equivalent text compare equal through
//! [`crate::unparse`] output instead.

use std::collections::BTreeSet;

use jac_core::loc::SourceSpan;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModuleKind {
    Main,
    Impl,
    Client,
    Test,
    PackageInit,
}

impl ModuleKind {
    /// Classify from a file path by its annex suffix.
    pub fn from_path(path: &str) -> ModuleKind {
        if path.ends_with(".impl.jac") {
            ModuleKind::Impl
        } else if path.ends_with(".cl.jac") {
            ModuleKind::Client
        } else if path.ends_with(".test.jac") {
            ModuleKind::Test
        } else if path.ends_with("__init__.jac") {
            ModuleKind::PackageInit
        } else {
            ModuleKind::Main
        }
    }

    pub fn is_annex(self) -> bool {
        matches!(self, ModuleKind::Impl | ModuleKind::Client | ModuleKind::Test)
    }
}

/// A parsed source unit, possibly with annex modules attached.
#[derive(Clone, Debug)]
pub struct Module {
    pub name: String,
    pub path: String,
    pub kind: ModuleKind,
    pub items: Vec<Item>,
    /// Attached `.impl.jac` and `.cl.jac` annexes.
    pub impl_mods: Vec<Module>,
    /// Attached `.test.jac` annexes.
    pub test_mods: Vec<Module>,
    /// Declaration-only modules are never annexed.
    pub stub_only: bool,
    /// Dotted names of modules this one imports.
    pub dep_set: BTreeSet<String>,
    pub span: SourceSpan,
}

impl Module {
    pub fn new(name: impl Into<String>, path: impl Into<String>, span: SourceSpan) -> Self {
        let path = path.into();
        let kind = ModuleKind::from_path(&path);
        Self {
            name: name.into(),
            path,
            kind,
            items: Vec::new(),
            impl_mods: Vec::new(),
            test_mods: Vec::new(),
            stub_only: false,
            dep_set: BTreeSet::new(),
            span,
        }
    }

    pub fn archetypes(&self) -> impl Iterator<Item = &Archetype> {
        self.items.iter().filter_map(|item| match item {
            Item::Archetype(arch) => Some(arch),
            _ => None,
        })
    }

    pub fn archetypes_mut(&mut self) -> impl Iterator<Item = &mut Archetype> {
        self.items.iter_mut().filter_map(|item| match item {
            Item::Archetype(arch) => Some(arch),
            _ => None,
        })
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(func) => Some(func),
            _ => None,
        })
    }

    pub fn imports(&self) -> impl Iterator<Item = &Import> {
        self.items.iter().filter_map(|item| match item {
            Item::Import(import) => Some(import),
            _ => None,
        })
    }
}

#[derive(Clone, Debug)]
pub enum Item {
    Import(Import),
    Archetype(Archetype),
    Function(Function),
    ClientPage(ClientPage),
    Entry(EntryBlock),
    Impl(ImplBlock),
}

/// `import os;` or `import from utils { helper, fmt }`.
#[derive(Clone, Debug)]
pub struct Import {
    pub module: String,
    /// Empty for whole-module imports.
    pub names: Vec<String>,
    pub span: SourceSpan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchetypeKind {
    Node,
    Edge,
    Walker,
    Object,
    Class,
}

impl ArchetypeKind {
    pub fn keyword(self) -> &'static str {
        match self {
            ArchetypeKind::Node => "node",
            ArchetypeKind::Edge => "edge",
            ArchetypeKind::Walker => "walker",
            ArchetypeKind::Object => "obj",
            ArchetypeKind::Class => "class",
        }
    }
}

/// Endpoint visibility, declared via `@public` / `@private` decorators.
/// The default requires a valid token without an ownership check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccessLevel {
    Public,
    #[default]
    Protected,
    Private,
}

impl AccessLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Public => "public",
            AccessLevel::Protected => "protected",
            AccessLevel::Private => "private",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Decorator {
    pub name: String,
    pub span: SourceSpan,
}

#[derive(Clone, Debug)]
pub struct Archetype {
    pub name: String,
    pub kind: ArchetypeKind,
    pub fields: Vec<HasField>,
    pub abilities: Vec<Ability>,
    pub decorators: Vec<Decorator>,
    pub span: SourceSpan,
}

impl Archetype {
    pub fn access(&self) -> AccessLevel {
        access_from_decorators(&self.decorators)
    }

    pub fn is_streaming(&self) -> bool {
        self.decorators.iter().any(|d| d.name == "streaming")
    }
}

#[derive(Clone, Debug)]
pub struct HasField {
    pub name: String,
    pub ty: TypeRef,
    pub default: Option<Expr>,
    pub span: SourceSpan,
}

#[derive(Clone, Debug)]
pub struct TypeRef {
    pub name: String,
    pub span: SourceSpan,
}

/// What an ability is keyed on: the peer archetype seen during traversal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbilityPeer {
    /// `` with `root entry `` — fires on the user root.
    Root,
    /// `with Task entry` — fires on nodes of the named archetype.
    Named(String),
    /// `can f with entry` — fires on any node.
    Any,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AbilityMoment {
    Entry,
    Exit,
}

#[derive(Clone, Debug)]
pub struct Ability {
    pub name: String,
    pub peer: AbilityPeer,
    pub moment: AbilityMoment,
    /// `None` is a declaration that must be matched by an `impl`.
    pub body: Option<Vec<Stmt>>,
    pub span: SourceSpan,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<TypeRef>,
    /// `None` is a declaration that must be matched by an `impl`.
    pub body: Option<Vec<Stmt>>,
    pub decorators: Vec<Decorator>,
    pub span: SourceSpan,
}

impl Function {
    pub fn access(&self) -> AccessLevel {
        access_from_decorators(&self.decorators)
    }

    pub fn is_streaming(&self) -> bool {
        self.decorators.iter().any(|d| d.name == "streaming")
    }
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub ty: Option<TypeRef>,
    pub default: Option<Expr>,
    pub span: SourceSpan,
}

/// `client page Home { … }` — a renderable unit exported to the bundle.
#[derive(Clone, Debug)]
pub struct ClientPage {
    pub name: String,
    pub body: Vec<Stmt>,
    pub span: SourceSpan,
}

/// `with entry { … }` or named `with entry:name { … }` (test cases).
#[derive(Clone, Debug)]
pub struct EntryBlock {
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub span: SourceSpan,
}

/// The body side of a split declaration.
#[derive(Clone, Debug)]
pub enum ImplPayload {
    /// `impl W.go { … }` — statements for one ability or function.
    Body(Vec<Stmt>),
    /// `impl W { can go with T entry { … } … }` — bodied members.
    Members(Vec<ImplMember>),
}

#[derive(Clone, Debug)]
pub enum ImplMember {
    Ability(Ability),
    Function(Function),
}

#[derive(Clone, Debug)]
pub struct ImplBlock {
    pub target: String,
    /// Set for the dotted `impl Target.member` form.
    pub member: Option<String>,
    pub payload: ImplPayload,
    pub span: SourceSpan,
}

fn access_from_decorators(decorators: &[Decorator]) -> AccessLevel {
    for decorator in decorators {
        match decorator.name.as_str() {
            "public" => return AccessLevel::Public,
            "private" => return AccessLevel::Private,
            _ => {}
        }
    }
    AccessLevel::Protected
}

// ── Statements ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum Stmt {
    Let {
        name: String,
        value: Option<Expr>,
        span: SourceSpan,
    },
    Assign {
        target: Expr,
        value: Expr,
        span: SourceSpan,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        else_body: Option<Vec<Stmt>>,
        span: SourceSpan,
    },
    For {
        var: String,
        iter: Expr,
        body: Vec<Stmt>,
        span: SourceSpan,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        span: SourceSpan,
    },
    Return(Option<Expr>, SourceSpan),
    Report(Expr, SourceSpan),
    Visit(Expr, SourceSpan),
    Disengage(SourceSpan),
    Yield(Expr, SourceSpan),
    Expr(Expr, SourceSpan),
}

impl Stmt {
    pub fn span(&self) -> &SourceSpan {
        match self {
            Stmt::Let { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::If { span, .. }
            | Stmt::For { span, .. }
            | Stmt::While { span, .. } => span,
            Stmt::Return(_, span)
            | Stmt::Report(_, span)
            | Stmt::Visit(_, span)
            | Stmt::Disengage(span)
            | Stmt::Yield(_, span)
            | Stmt::Expr(_, span) => span,
        }
    }
}

// ── Expressions ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeDirection {
    Out,
    In,
}

#[derive(Clone, Debug)]
pub enum Expr {
    Literal(Literal, SourceSpan),
    ListLit(Vec<Expr>, SourceSpan),
    MapLit(Vec<(String, Expr)>, SourceSpan),
    Name(String, SourceSpan),
    SelfRef(SourceSpan),
    Here(SourceSpan),
    RootRef(SourceSpan),
    Visitor(SourceSpan),
    Field(Box<Expr>, String, SourceSpan),
    Index(Box<Expr>, Box<Expr>, SourceSpan),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
        span: SourceSpan,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: SourceSpan,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: SourceSpan,
    },
    /// `src ++> dst`, `src +:Label:+> dst`, `src <++> dst`.
    Connect {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        edge: Option<String>,
        directed: bool,
        span: SourceSpan,
    },
    /// `[-->]`, `[<--]`, `` [-->(`?Task)] ``.
    EdgeQuery {
        direction: EdgeDirection,
        filter: Option<String>,
        span: SourceSpan,
    },
    /// `target spawn WalkerCtor(…)`.
    Spawn {
        target: Box<Expr>,
        walker: Box<Expr>,
        span: SourceSpan,
    },
}

impl Expr {
    pub fn span(&self) -> &SourceSpan {
        match self {
            Expr::Literal(_, span)
            | Expr::ListLit(_, span)
            | Expr::MapLit(_, span)
            | Expr::Name(_, span)
            | Expr::SelfRef(span)
            | Expr::Here(span)
            | Expr::RootRef(span)
            | Expr::Visitor(span)
            | Expr::Field(_, _, span)
            | Expr::Index(_, _, span) => span,
            Expr::Call { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Connect { span, .. }
            | Expr::EdgeQuery { span, .. }
            | Expr::Spawn { span, .. } => span,
        }
    }
}
