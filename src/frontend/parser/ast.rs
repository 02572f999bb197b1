//! The abstract syntax tree.
//!
//! Expressions and statements are plain sum types with per-kind payload in
//! the variant arm. Every expression carries the `TypeId` it was given at
//! construction; the parser's conversion helpers insert casts as they build
//! nodes, so a finished tree never has an untyped expression.

use crate::common::session::ObjId;
use crate::common::types::{Member, TypeId};
use crate::frontend::lexer::token::Loc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    /// Logical right shift.
    Shr,
    /// Arithmetic right shift.
    Sar,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: TypeId,
    pub loc: Loc,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Num(i64),
    Fnum(f64),
    Var(ObjId),
    Member {
        base: Box<Expr>,
        member: Member,
    },
    Deref(Box<Expr>),
    Addr(Box<Expr>),
    Cast(Box<Expr>),
    Assign {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Cond {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
    },
    /// Compiler-introduced sequencing; unlike `Comma`, the right-hand type
    /// is preserved without decay (initializer chains rely on it).
    Chain {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Comma {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    BitNot(Box<Expr>),
    Neg(Box<Expr>),
    Pos(Box<Expr>),
    LogAnd {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    LogOr {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    FunCall {
        func: Box<Expr>,
        /// Evaluates and spills every argument into its temporary.
        args_expr: Option<Box<Expr>>,
        /// Argument temporaries, in declaration order, for ABI placement.
        args: Vec<ObjId>,
        /// Local buffer for a struct/union return value.
        ret_buffer: Option<ObjId>,
    },
    StmtExpr {
        body: Vec<Stmt>,
        top_vla: Option<ObjId>,
        target_vla: Option<ObjId>,
    },
    /// Zero the whole object before an initializer chain runs.
    MemZero(ObjId),
    Alloca {
        size: Box<Expr>,
        /// The VLA object whose pointer slot receives the allocation.
        var: Option<ObjId>,
    },
    /// [GNU] `&&label`.
    LabelVal {
        unique_label: String,
    },
    VaStart(Box<Expr>),
    VaCopy {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    VaArg {
        ap: Box<Expr>,
        /// Slot the fetched argument is copied into.
        var: ObjId,
    },
    /// No-op expression.
    Null,
}

#[derive(Debug, Clone)]
pub struct CaseRange {
    pub begin: i64,
    pub end: i64,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: Loc,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Block {
        body: Vec<Stmt>,
        top_vla: Option<ObjId>,
        target_vla: Option<ObjId>,
    },
    ExprStmt(Expr),
    Return(Option<Expr>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        els: Option<Box<Stmt>>,
    },
    /// `for` and `while` share this shape; `while` has no init/inc.
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        inc: Option<Expr>,
        body: Box<Stmt>,
        brk_label: String,
        cont_label: String,
        top_vla: Option<ObjId>,
        target_vla: Option<ObjId>,
    },
    Do {
        body: Box<Stmt>,
        cond: Expr,
        brk_label: String,
        cont_label: String,
    },
    Switch {
        cond: Expr,
        body: Box<Stmt>,
        cases: Vec<CaseRange>,
        default_label: Option<String>,
        brk_label: String,
    },
    Case {
        label: String,
        body: Option<Box<Stmt>>,
    },
    /// `goto`, `break` and `continue`; the id indexes the enclosing
    /// function's goto table, filled in by label resolution.
    Goto {
        id: usize,
    },
    /// [GNU] `goto *expr`.
    GotoExpr(Expr),
    Label {
        unique_label: String,
        body: Option<Box<Stmt>>,
    },
    Asm(String),
}

impl Expr {
    pub fn new(kind: ExprKind, ty: TypeId, loc: Loc) -> Expr {
        Expr { kind, ty, loc }
    }

    /// Whether this expression designates a bitfield member (through
    /// assignment/sequencing wrappers, as an assignment target would).
    pub fn bitfield_member(&self) -> Option<&Member> {
        match &self.kind {
            ExprKind::Member { member, .. } if member.is_bitfield => Some(member),
            ExprKind::Assign { lhs, .. } => lhs.bitfield_member(),
            ExprKind::Chain { rhs, .. } | ExprKind::Comma { rhs, .. } => rhs.bitfield_member(),
            ExprKind::StmtExpr { body, .. } => match body.last() {
                Some(Stmt {
                    kind: StmtKind::ExprStmt(e),
                    ..
                }) => e.bitfield_member(),
                _ => None,
            },
            _ => None,
        }
    }
}

impl Stmt {
    pub fn new(kind: StmtKind, loc: Loc) -> Stmt {
        Stmt { kind, loc }
    }

    /// An empty statement.
    pub fn null(loc: Loc) -> Stmt {
        Stmt::new(
            StmtKind::Block {
                body: Vec::new(),
                top_vla: None,
                target_vla: None,
            },
            loc,
        )
    }
}
