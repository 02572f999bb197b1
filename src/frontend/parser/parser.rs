//! Recursive-descent parser: shared state and conversion helpers.
//!
//! The token list is never mutated during parsing (numeric conversion
//! aside); parsing proceeds by index advancement, so arbitrary lookahead is
//! just `self.peek(n)`. Expressions are typed at construction: the helpers
//! here implement integer promotion and the usual arithmetic conversion by
//! inserting cast nodes while the tree is being built.

use std::collections::HashMap;

use crate::common::error::{CResult, Diagnostic};
use crate::common::session::{GotoTarget, Obj, ObjId, ScopeId, Session, VarScope};
use crate::common::types::{
    TypeId, TypeKind, TY_BOOL, TY_DOUBLE, TY_FLOAT, TY_INT, TY_LDOUBLE, TY_LLONG, TY_LONG,
    TY_UINT, TY_ULLONG, TY_ULONG, TY_VOID,
};
use crate::frontend::lexer::token::{Loc, Token};
use crate::frontend::parser::ast::{BinOp, CaseRange, Expr, ExprKind};
use crate::frontend::parser::const_eval;

/// A pending `goto` or `&&label`, resolved against the label list after the
/// function body is complete.
pub(super) struct GotoRec {
    pub label: String,
    pub loc: Loc,
    pub top_vla: Option<ObjId>,
    /// Index into the goto table, or `usize::MAX` for `&&label` references
    /// that only need existence checking.
    pub goto_id: usize,
}

pub(super) struct LabelRec {
    pub label: String,
    pub top_vla: Option<ObjId>,
}

/// Break/continue target captured around a loop or switch body.
#[derive(Clone)]
pub(super) struct JumpCtx {
    pub label: String,
    pub vla: Option<ObjId>,
}

/// Case accumulation for the innermost switch.
pub(super) struct SwitchCtx {
    pub cases: Vec<CaseRange>,
    pub default_label: Option<String>,
    pub cond_ty: TypeId,
}

pub struct Parser<'a> {
    pub(super) sess: &'a mut Session,
    pub(super) toks: Vec<Token>,
    pub(super) pos: usize,
    pub(super) scope: ScopeId,
    pub(super) globals: Vec<ObjId>,
    pub(super) current_fn: Option<ObjId>,

    // Per-function state, reset at each definition.
    pub(super) gotos: Vec<GotoRec>,
    pub(super) labels: Vec<LabelRec>,
    pub(super) label_uniques: HashMap<String, String>,
    pub(super) goto_table: Vec<GotoTarget>,
    pub(super) brk: Option<JumpCtx>,
    pub(super) cont: Option<JumpCtx>,
    pub(super) switch_ctx: Option<SwitchCtx>,
    pub(super) current_vla: Option<ObjId>,
    pub(super) fn_use_vla: bool,
    pub(super) dont_dealloc_vla: bool,
}

impl<'a> Parser<'a> {
    pub fn new(sess: &'a mut Session, toks: Vec<Token>) -> Parser<'a> {
        let scope = sess.file_scope();
        Parser {
            sess,
            toks,
            pos: 0,
            scope,
            globals: Vec::new(),
            current_fn: None,
            gotos: Vec::new(),
            labels: Vec::new(),
            label_uniques: HashMap::new(),
            goto_table: Vec::new(),
            brk: None,
            cont: None,
            switch_ctx: None,
            current_vla: None,
            fn_use_vla: false,
            dont_dealloc_vla: false,
        }
    }

    // ----- token navigation -----

    pub(super) fn tok(&self) -> &Token {
        &self.toks[self.pos]
    }

    pub(super) fn peek(&self, n: usize) -> &Token {
        let i = (self.pos + n).min(self.toks.len() - 1);
        &self.toks[i]
    }

    pub(super) fn loc(&self) -> Loc {
        self.tok().loc()
    }

    pub(super) fn advance(&mut self) -> Token {
        let t = self.toks[self.pos].clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    pub(super) fn equal(&self, s: &str) -> bool {
        self.tok().is(s)
    }

    pub(super) fn consume(&mut self, s: &str) -> bool {
        if self.equal(s) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(super) fn skip(&mut self, s: &str) -> CResult<()> {
        if self.consume(s) {
            Ok(())
        } else {
            Err(self.err(&format!("expected '{}'", s)))
        }
    }

    pub(super) fn err(&self, msg: &str) -> Diagnostic {
        self.sess.error_tok(self.tok(), msg)
    }

    pub(super) fn err_at(&self, loc: Loc, msg: &str) -> Diagnostic {
        self.sess.error_at(loc, msg)
    }

    /// Comma-separated list helper: returns false when `end` was consumed;
    /// otherwise (optionally skipping a `,`) the caller reads one element.
    /// Curly lists allow a trailing comma.
    pub(super) fn comma_list(&mut self, end: &str, skip_comma: bool) -> CResult<bool> {
        if self.consume(end) {
            return Ok(false);
        }
        if skip_comma {
            self.skip(",")?;
            if end == "}" && self.consume("}") {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Skip a balanced parenthesized group; assumes the opening `(` was
    /// consumed, leaves the position after the matching `)`.
    pub(super) fn skip_paren(&mut self) -> CResult<()> {
        let mut level = 0;
        loop {
            if self.tok().is_eof() {
                return Err(self.err("unterminated list"));
            }
            if level == 0 && self.equal(")") {
                self.advance();
                return Ok(());
            }
            if self.equal("(") {
                level += 1;
            } else if self.equal(")") {
                level -= 1;
            }
            self.advance();
        }
    }

    pub(super) fn get_ident(&self, tok: &Token) -> CResult<String> {
        if !tok.is_ident() {
            return Err(self.sess.error_tok(tok, "expected an identifier"));
        }
        Ok(tok.text.clone())
    }

    // ----- scopes -----

    pub(super) fn enter_scope(&mut self) {
        self.scope = self.sess.new_scope(self.scope);
    }

    pub(super) fn enter_tmp_scope(&mut self) {
        self.enter_scope();
        self.sess.scope_mut(self.scope).is_temporary = true;
    }

    pub(super) fn leave_scope(&mut self) {
        self.scope = self.sess.scope(self.scope).parent.expect("scope underflow");
    }

    pub(super) fn find_var(&self, name: &str) -> Option<VarScope> {
        let mut sc = Some(self.scope);
        while let Some(id) = sc {
            if let Some(v) = self.sess.scope(id).vars.get(name) {
                return Some(v.clone());
            }
            sc = self.sess.scope(id).parent;
        }
        None
    }

    pub(super) fn find_tag(&self, name: &str) -> Option<TypeId> {
        let mut sc = Some(self.scope);
        while let Some(id) = sc {
            if let Some(&t) = self.sess.scope(id).tags.get(name) {
                return Some(t);
            }
            sc = self.sess.scope(id).parent;
        }
        None
    }

    pub(super) fn find_tag_in_current_scope(&self, name: &str) -> Option<TypeId> {
        self.sess.scope(self.scope).tags.get(name).copied()
    }

    pub(super) fn push_tag_scope(&mut self, name: &str, ty: TypeId) {
        self.sess
            .scope_mut(self.scope)
            .tags
            .insert(name.to_string(), ty);
    }

    pub(super) fn push_var_scope(&mut self, name: &str, v: VarScope) {
        self.sess
            .scope_mut(self.scope)
            .vars
            .insert(name.to_string(), v);
    }

    pub(super) fn find_typedef(&self, tok: &Token) -> Option<TypeId> {
        if tok.is_ident() {
            if let Some(VarScope::Typedef(t)) = self.find_var(&tok.text) {
                return Some(t);
            }
        }
        None
    }

    // ----- object creation -----

    pub(super) fn new_var(&mut self, name: Option<String>, ty: TypeId) -> ObjId {
        let id = self
            .sess
            .add_obj(Obj::new(name.clone().unwrap_or_default(), ty));
        if let Some(name) = name {
            self.push_var_scope(&name, VarScope::Var(id));
        }
        id
    }

    pub(super) fn new_lvar(&mut self, name: Option<String>, ty: TypeId) -> ObjId {
        let id = self.new_var(name, ty);
        self.sess.obj_mut(id).is_local = true;
        self.sess.scope_mut(self.scope).locals.push(id);
        id
    }

    pub(super) fn new_gvar(&mut self, name: String, ty: TypeId) -> ObjId {
        let id = self.new_var(Some(name), ty);
        self.globals.push(id);
        id
    }

    /// Anonymous global (string literals at file scope, compound literals).
    pub(super) fn new_anon_gvar(&mut self, ty: TypeId) -> ObjId {
        let name = self.sess.new_unique_name();
        let id = self.sess.add_obj(Obj::new(name, ty));
        self.globals.push(id);
        let o = self.sess.obj_mut(id);
        o.is_definition = true;
        o.is_static = true;
        id
    }

    /// Function-local static (string literals, static locals, `__func__`).
    pub(super) fn new_static_lvar(&mut self, ty: TypeId) -> ObjId {
        let name = self.sess.new_unique_name();
        let id = self.sess.add_obj(Obj::new(name, ty));
        {
            let o = self.sess.obj_mut(id);
            o.is_definition = true;
            o.is_static = true;
        }
        let fn_id = self.current_fn.expect("static local outside function");
        self.sess.obj_mut(fn_id).static_lvars.push(id);
        id
    }

    pub(super) fn new_unique_name(&mut self) -> String {
        self.sess.new_unique_name()
    }

    /// The shared unique label for a named label in the current function,
    /// created on first use by a label, goto, or `&&label`.
    pub(super) fn label_unique(&mut self, name: &str) -> String {
        if let Some(u) = self.label_uniques.get(name) {
            return u.clone();
        }
        let u = self.sess.new_unique_name();
        self.label_uniques.insert(name.to_string(), u.clone());
        u
    }

    // ----- expression constructors and conversions -----

    pub(super) fn num(&self, val: i64, loc: Loc) -> Expr {
        Expr::new(ExprKind::Num(val), TY_INT, loc)
    }

    pub(super) fn num_long(&self, val: i64, loc: Loc) -> Expr {
        Expr::new(ExprKind::Num(val), TY_LONG, loc)
    }

    pub(super) fn num_ulong(&self, val: i64, loc: Loc) -> Expr {
        Expr::new(ExprKind::Num(val), TY_ULONG, loc)
    }

    pub(super) fn var_expr(&mut self, var: ObjId, loc: Loc) -> Expr {
        let ty = self.sess.obj(var).ty;
        Expr::new(ExprKind::Var(var), ty, loc)
    }

    pub(super) fn new_cast(&mut self, e: Expr, ty: TypeId) -> Expr {
        let loc = e.loc;
        let cast_ty = self.sess.types.copy_type(ty);
        Expr::new(ExprKind::Cast(Box::new(e)), cast_ty, loc)
    }

    pub(super) fn to_bool(&mut self, e: Expr) -> Expr {
        self.new_cast(e, TY_BOOL)
    }

    /// Array-to-pointer and function-to-pointer decay, applied through a
    /// cast when the type actually changes.
    pub(super) fn ptr_conv(&mut self, e: Expr) -> Expr {
        let ty = e.ty;
        let decayed = self.sess.types.ptr_decay(ty);
        if decayed != ty {
            self.new_cast(e, decayed)
        } else {
            e
        }
    }

    /// Chain `rhs` onto `*lhs` with a `Chain` node (compiler-introduced
    /// sequencing that preserves the right-hand type).
    pub(super) fn chain_expr(&mut self, lhs: &mut Option<Expr>, rhs: Option<Expr>) {
        if let Some(rhs) = rhs {
            *lhs = match lhs.take() {
                None => Some(rhs),
                Some(l) => {
                    let loc = rhs.loc;
                    let ty = rhs.ty;
                    Some(Expr::new(
                        ExprKind::Chain {
                            lhs: Box::new(l),
                            rhs: Box::new(rhs),
                        },
                        ty,
                        loc,
                    ))
                }
            };
        }
    }

    /// Integer promotion: anything narrower than `int` goes to `int`;
    /// a bitfield promotes by its width.
    pub(super) fn int_promotion(&mut self, e: Expr) -> Expr {
        let ty = e.ty;
        if let Some(mem) = e.bitfield_member() {
            let width = mem.bit_width;
            let int_width = 32;
            return if width == int_width && self.sess.types.is_unsigned(ty) {
                self.new_cast(e, TY_UINT)
            } else if width <= int_width {
                self.new_cast(e, TY_INT)
            } else {
                self.new_cast(e, ty)
            };
        }

        if self.sess.types.size(ty) < 4 {
            return self.new_cast(e, TY_INT);
        }
        if self.sess.types.size(ty) == 4 && self.sess.types.int_rank(ty) < 1 {
            return if self.sess.types.is_unsigned(ty) {
                self.new_cast(e, TY_UINT)
            } else {
                self.new_cast(e, TY_INT)
            };
        }
        e
    }

    pub(super) fn is_nullptr(&self, e: &Expr) -> bool {
        let mut e = e;
        if let ExprKind::Cast(inner) = &e.kind {
            if let TypeKind::Ptr { base } = self.sess.types.kind(e.ty) {
                if self.sess.types.is_void(*base) {
                    e = inner.as_ref();
                }
            }
        }
        self.sess.types.is_integer(e.ty)
            && const_eval::try_eval(self.sess, e) == Some(0)
    }

    fn is_ptr_like(&self, e: &Expr) -> bool {
        self.sess.types.is_ptr(e.ty) || self.is_nullptr(e)
    }

    /// The common pointer type of two operands, if they are pointers.
    pub(super) fn common_ptr_type(&mut self, lhs: &Expr, rhs: &Expr) -> Option<TypeId> {
        let t1 = lhs.ty;
        let t2 = rhs.ty;
        let b1 = self.sess.types.base(t1);
        let b2 = self.sess.types.base(t2);
        if b1.is_some() && self.is_nullptr(rhs) {
            return Some(t1);
        }
        if b2.is_some() && self.is_nullptr(lhs) {
            return Some(t2);
        }
        if let (Some(b1), Some(b2)) = (b1, b2) {
            if self.sess.is_compatible(b1, b2) {
                return Some(t1);
            }
            return Some(self.sess.types.pointer_to(TY_VOID));
        }
        None
    }

    fn get_common_type(&mut self, lhs: Expr, rhs: Expr) -> CResult<(Expr, Expr, TypeId)> {
        let t1 = lhs.ty;
        let t2 = rhs.ty;
        if !self.sess.types.is_numeric(t1) || !self.sess.types.is_numeric(t2) {
            return Err(self.err_at(rhs.loc, "invalid operand"));
        }

        let k = |t: TypeId| self.sess.types.kind(t).clone();
        if matches!(k(t1), TypeKind::LongDouble) || matches!(k(t2), TypeKind::LongDouble) {
            return Ok((lhs, rhs, TY_LDOUBLE));
        }
        if matches!(k(t1), TypeKind::Double) || matches!(k(t2), TypeKind::Double) {
            return Ok((lhs, rhs, TY_DOUBLE));
        }
        if matches!(k(t1), TypeKind::Float) || matches!(k(t2), TypeKind::Float) {
            return Ok((lhs, rhs, TY_FLOAT));
        }

        let lhs = self.int_promotion(lhs);
        let rhs = self.int_promotion(rhs);
        let t1 = lhs.ty;
        let t2 = rhs.ty;

        let (s1, s2) = (self.sess.types.size(t1), self.sess.types.size(t2));
        if s1 != s2 {
            let ty = if s1 < s2 { t2 } else { t1 };
            return Ok((lhs, rhs, ty));
        }

        let ranked = if self.sess.types.int_rank(t1) > self.sess.types.int_rank(t2) {
            t1
        } else {
            t2
        };
        if self.sess.types.is_unsigned(t1) == self.sess.types.is_unsigned(t2) {
            return Ok((lhs, rhs, ranked));
        }
        // Same size, different sign: the unsigned variant of the
        // higher-ranked type wins.
        let ty = match self.sess.types.kind(ranked) {
            TypeKind::Int => TY_UINT,
            TypeKind::Long => TY_ULONG,
            TypeKind::LongLong => TY_ULLONG,
            _ => ranked,
        };
        Ok((lhs, rhs, ty))
    }

    /// The usual arithmetic conversion: promote both operands to a common
    /// type by inserting casts.
    pub(super) fn usual_arith_conv(&mut self, lhs: Expr, rhs: Expr) -> CResult<(Expr, Expr, TypeId)> {
        let (lhs, rhs, ty) = self.get_common_type(lhs, rhs)?;
        let lhs = self.new_cast(lhs, ty);
        let rhs = self.new_cast(rhs, ty);
        Ok((lhs, rhs, ty))
    }

    /// Build an arithmetic/bitwise binary node with the converted type.
    pub(super) fn arith_binary(&mut self, op: BinOp, lhs: Expr, rhs: Expr, loc: Loc) -> CResult<Expr> {
        let (lhs, rhs, ty) = self.usual_arith_conv(lhs, rhs)?;
        Ok(Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
            loc,
        ))
    }

    /// Build a shift node: only the left operand is promoted.
    pub(super) fn shift_binary(&mut self, op: BinOp, lhs: Expr, rhs: Expr, loc: Loc) -> CResult<Expr> {
        if !self.sess.types.is_integer(lhs.ty) {
            return Err(self.err_at(lhs.loc, "invalid operand"));
        }
        let lhs = self.int_promotion(lhs);
        let ty = lhs.ty;
        Ok(Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
            loc,
        ))
    }

    /// Build a comparison node (type `int`), applying pointer decay and the
    /// arithmetic conversion to non-pointer operands.
    pub(super) fn cmp_binary(&mut self, op: BinOp, lhs: Expr, rhs: Expr, loc: Loc) -> CResult<Expr> {
        let lhs = self.ptr_conv(lhs);
        let rhs = self.ptr_conv(rhs);
        let (lhs, rhs) = if self.is_ptr_like(&lhs) && self.is_ptr_like(&rhs) {
            (lhs, rhs)
        } else {
            let (l, r, _) = self.usual_arith_conv(lhs, rhs)?;
            (l, r)
        };
        Ok(Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            TY_INT,
            loc,
        ))
    }

    /// Build an assignment node. The right side is converted to the left's
    /// type except for struct assignment.
    pub(super) fn assign_expr(&mut self, lhs: Expr, rhs: Expr, loc: Loc) -> CResult<Expr> {
        if self.sess.types.is_array(lhs.ty) {
            return Err(self.err_at(lhs.loc, "not an lvalue"));
        }
        let ty = lhs.ty;
        let rhs = if !self.sess.types.is_struct_union(ty) {
            self.new_cast(rhs, ty)
        } else {
            rhs
        };
        Ok(Expr::new(
            ExprKind::Assign {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
            loc,
        ))
    }

    /// `+`/`-` with the pointer-arithmetic scaling rules.
    pub(super) fn new_add(&mut self, lhs: Expr, rhs: Expr, loc: Loc) -> CResult<Expr> {
        if self.sess.types.is_numeric(lhs.ty) && self.sess.types.is_numeric(rhs.ty) {
            return self.arith_binary(BinOp::Add, lhs, rhs, loc);
        }
        let lbase = self.sess.types.base(lhs.ty);
        let rbase = self.sess.types.base(rhs.ty);
        if lbase.is_some() && rbase.is_some() {
            return Err(self.err_at(loc, "invalid operands"));
        }
        // Canonicalize `num + ptr` to `ptr + num`.
        let (lhs, rhs, base) = if lbase.is_none() {
            (rhs, lhs, rbase.unwrap())
        } else {
            (lhs, rhs, lbase.unwrap())
        };
        let ty = lhs.ty;
        let scaled = self.scale_index(rhs, base, loc)?;
        Ok(Expr::new(
            ExprKind::Binary {
                op: BinOp::Add,
                lhs: Box::new(lhs),
                rhs: Box::new(scaled),
            },
            ty,
            loc,
        ))
    }

    pub(super) fn new_sub(&mut self, lhs: Expr, rhs: Expr, loc: Loc) -> CResult<Expr> {
        if self.sess.types.is_numeric(lhs.ty) && self.sess.types.is_numeric(rhs.ty) {
            return self.arith_binary(BinOp::Sub, lhs, rhs, loc);
        }
        let lbase = self.sess.types.base(lhs.ty);
        let rbase = self.sess.types.base(rhs.ty);

        // ptr - num
        if let Some(base) = lbase {
            if self.sess.types.is_integer(rhs.ty) {
                let ty = lhs.ty;
                let scaled = self.scale_index(rhs, base, loc)?;
                return Ok(Expr::new(
                    ExprKind::Binary {
                        op: BinOp::Sub,
                        lhs: Box::new(lhs),
                        rhs: Box::new(scaled),
                    },
                    ty,
                    loc,
                ));
            }
            // ptr - ptr: the element distance.
            if rbase.is_some() {
                let sz = self.sess.types.size(base);
                let l = self.new_cast(lhs, TY_LLONG);
                let r = self.new_cast(rhs, TY_LLONG);
                let diff = Expr::new(
                    ExprKind::Binary {
                        op: BinOp::Sub,
                        lhs: Box::new(l),
                        rhs: Box::new(r),
                    },
                    TY_LLONG,
                    loc,
                );
                let div = Expr::new(
                    ExprKind::Binary {
                        op: BinOp::Div,
                        lhs: Box::new(diff),
                        rhs: Box::new(self.num_long(sz, loc)),
                    },
                    TY_LLONG,
                    loc,
                );
                return Ok(div);
            }
        }
        Err(self.err_at(loc, "invalid operands"))
    }

    /// Scale an index by the element size (or by the runtime VLA size).
    fn scale_index(&mut self, idx: Expr, base: TypeId, loc: Loc) -> CResult<Expr> {
        if self.sess.types.is_vla(base) {
            let size_var = self
                .sess
                .types
                .vla_size_var(base)
                .expect("VLA size not computed");
            let sz = self.var_expr(size_var, loc);
            let ty = idx.ty;
            return Ok(Expr::new(
                ExprKind::Binary {
                    op: BinOp::Mul,
                    lhs: Box::new(idx),
                    rhs: Box::new(sz),
                },
                ty,
                loc,
            ));
        }
        let sz = self.sess.types.size(base);
        let scaled = Expr::new(
            ExprKind::Binary {
                op: BinOp::Mul,
                lhs: Box::new(idx),
                rhs: Box::new(self.num_long(sz, loc)),
            },
            TY_LONG,
            loc,
        );
        Ok(scaled)
    }

    /// Dereference with the pointee type.
    pub(super) fn deref_expr(&mut self, e: Expr, loc: Loc) -> CResult<Expr> {
        let Some(base) = self.sess.types.base(e.ty) else {
            return Err(self.err_at(loc, "invalid pointer dereference"));
        };
        if self.sess.types.is_void(base) {
            return Err(self.err_at(loc, "dereferencing a void pointer"));
        }
        Ok(Expr::new(ExprKind::Deref(Box::new(e)), base, loc))
    }

    pub(super) fn addr_expr(&mut self, e: Expr, loc: Loc) -> Expr {
        let ty = self.sess.types.pointer_to(e.ty);
        Expr::new(ExprKind::Addr(Box::new(e)), ty, loc)
    }

    /// Conditional operator result typing.
    pub(super) fn cond_expr(&mut self, cond: Expr, then: Expr, els: Expr, loc: Loc) -> CResult<Expr> {
        let then = self.ptr_conv(then);
        let els = self.ptr_conv(els);
        let ty = if self.sess.types.is_void(then.ty) || self.sess.types.is_void(els.ty) {
            TY_VOID
        } else if !self.sess.types.is_numeric(then.ty)
            && self.sess.is_compatible(then.ty, els.ty)
        {
            then.ty
        } else if let Some(t) = self.common_ptr_type(&then, &els) {
            t
        } else {
            let (then, els, ty) = self.usual_arith_conv(then, els)?;
            return Ok(Expr::new(
                ExprKind::Cond {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    els: Box::new(els),
                },
                ty,
                loc,
            ));
        };
        Ok(Expr::new(
            ExprKind::Cond {
                cond: Box::new(cond),
                then: Box::new(then),
                els: Box::new(els),
            },
            ty,
            loc,
        ))
    }
}
