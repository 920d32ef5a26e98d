//! The lowered module image — the "bytecode" the runtime executes.
//!
//! Codegen lowers the checked AST into this serde-serializable form; the
//! bytes the cache stores are `serde_json::to_vec` of a [`ModuleImage`].
//! Spans collapse to line numbers, which is all the runtime needs for user
//! tracebacks.

use serde::{Deserialize, Serialize};

/// Bumped whenever the image layout changes; part of the cache host tag, so
/// old entries invalidate themselves.
pub const IR_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ModuleImage {
    pub ir_version: u32,
    pub name: String,
    pub path: String,
    pub minimal: bool,
    pub archetypes: Vec<ArchetypeImage>,
    pub functions: Vec<FunctionImage>,
    pub client_pages: Vec<ClientPageImage>,
    pub entries: Vec<EntryImage>,
    pub imports: Vec<ImportImage>,
}

impl ModuleImage {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Decode image bytes, rejecting other format versions.
    pub fn from_bytes(bytes: &[u8]) -> Option<ModuleImage> {
        let image: ModuleImage = serde_json::from_slice(bytes).ok()?;
        (image.ir_version == IR_VERSION).then_some(image)
    }

    pub fn archetype(&self, name: &str) -> Option<&ArchetypeImage> {
        self.archetypes.iter().find(|a| a.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionImage> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArchetypeKindImage {
    Node,
    Edge,
    Walker,
    Object,
    Class,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessImage {
    Public,
    #[default]
    Protected,
    Private,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ArchetypeImage {
    pub name: String,
    pub kind: ArchetypeKindImage,
    pub fields: Vec<FieldImage>,
    pub abilities: Vec<AbilityImage>,
    pub access: AccessImage,
    pub streaming: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldImage {
    pub name: String,
    pub ty: String,
    pub default: Option<IExpr>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PeerImage {
    Root,
    Named(String),
    Any,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MomentImage {
    Entry,
    Exit,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AbilityImage {
    pub name: String,
    pub peer: PeerImage,
    pub moment: MomentImage,
    pub body: Vec<IStmt>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionImage {
    pub name: String,
    pub params: Vec<ParamImage>,
    pub body: Vec<IStmt>,
    pub access: AccessImage,
    pub streaming: bool,
    /// Set on entries re-exported from an imported module.
    pub imported_from: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ParamImage {
    pub name: String,
    pub ty: Option<String>,
    pub default: Option<IExpr>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClientPageImage {
    pub name: String,
    pub body: Vec<IStmt>,
    /// Lowered JS for the client bundle.
    pub js: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EntryImage {
    pub name: Option<String>,
    pub body: Vec<IStmt>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImportImage {
    pub module: String,
    pub names: Vec<String>,
}

// ── Lowered statements ──────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum IStmt {
    Let {
        name: String,
        value: Option<IExpr>,
        line: u32,
    },
    Assign {
        target: IExpr,
        value: IExpr,
        line: u32,
    },
    If {
        branches: Vec<(IExpr, Vec<IStmt>)>,
        else_body: Option<Vec<IStmt>>,
        line: u32,
    },
    For {
        var: String,
        iter: IExpr,
        body: Vec<IStmt>,
        line: u32,
    },
    While {
        cond: IExpr,
        body: Vec<IStmt>,
        line: u32,
    },
    Return {
        value: Option<IExpr>,
        line: u32,
    },
    Report {
        value: IExpr,
        line: u32,
    },
    Visit {
        target: IExpr,
        line: u32,
    },
    Disengage {
        line: u32,
    },
    Yield {
        value: IExpr,
        line: u32,
    },
    Expr {
        value: IExpr,
        line: u32,
    },
}

impl IStmt {
    pub fn line(&self) -> u32 {
        match self {
            IStmt::Let { line, .. }
            | IStmt::Assign { line, .. }
            | IStmt::If { line, .. }
            | IStmt::For { line, .. }
            | IStmt::While { line, .. }
            | IStmt::Return { line, .. }
            | IStmt::Report { line, .. }
            | IStmt::Visit { line, .. }
            | IStmt::Disengage { line }
            | IStmt::Yield { line, .. }
            | IStmt::Expr { line, .. } => *line,
        }
    }
}

// ── Lowered expressions ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IBinaryOp {
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

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IUnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IEdgeDirection {
    Out,
    In,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum IExpr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<IExpr>),
    Map(Vec<(String, IExpr)>),
    Name(String),
    SelfRef,
    Here,
    Root,
    Visitor,
    Field(Box<IExpr>, String),
    Index(Box<IExpr>, Box<IExpr>),
    Call {
        callee: Box<IExpr>,
        args: Vec<IExpr>,
        kwargs: Vec<(String, IExpr)>,
    },
    Unary {
        op: IUnaryOp,
        operand: Box<IExpr>,
    },
    Binary {
        op: IBinaryOp,
        lhs: Box<IExpr>,
        rhs: Box<IExpr>,
    },
    Connect {
        lhs: Box<IExpr>,
        rhs: Box<IExpr>,
        edge: Option<String>,
        directed: bool,
    },
    EdgeQuery {
        direction: IEdgeDirection,
        filter: Option<String>,
    },
    Spawn {
        target: Box<IExpr>,
        walker: Box<IExpr>,
    },
}
