//! Expression parsing.
//!
//! Compound assignments are lowered while parsing: `A op= B` becomes
//! `tmp = &A, *tmp = *tmp op B`, and `A.x op= B` (a bitfield target)
//! becomes `tmp = &A, (*tmp).x = (*tmp).x op B` so the read-modify-write
//! goes through the member access both times. `A++` becomes
//! `(ptr = &A, tmp = *ptr, *ptr += 1, tmp)`.

use crate::common::error::CResult;
use crate::common::session::{ObjId, VarScope};
use crate::common::types::{
    TypeId, TypeKind, TY_DOUBLE, TY_INT, TY_LONG, TY_PCHAR, TY_VOID,
};
use crate::frontend::lexer::lexer::convert_pp_number;
use crate::frontend::lexer::token::{Loc, TokenKind};
use crate::frontend::parser::ast::{BinOp, Expr, ExprKind, Stmt, StmtKind};
use crate::frontend::parser::const_eval;
use crate::frontend::parser::parser::{GotoRec, Parser};

/// The operator of a compound assignment.
#[derive(Clone, Copy)]
enum CompoundOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl<'a> Parser<'a> {
    /// expr = assign ("," expr)?
    pub(super) fn expr(&mut self) -> CResult<Expr> {
        let node = self.assign()?;
        if self.equal(",") {
            let loc = self.loc();
            self.advance();
            let rhs = self.expr()?;
            let ty = self.sess.types.ptr_decay(rhs.ty);
            return Ok(Expr::new(
                ExprKind::Comma {
                    lhs: Box::new(node),
                    rhs: Box::new(rhs),
                },
                ty,
                loc,
            ));
        }
        Ok(node)
    }

    pub(super) fn const_expr(&mut self) -> CResult<i64> {
        Ok(self.const_expr_typed()?.0)
    }

    pub(super) fn const_expr_typed(&mut self) -> CResult<(i64, TypeId)> {
        let loc = self.loc();
        let node = self.conditional()?;
        if !self.sess.types.is_integer(node.ty) {
            return Err(self.err_at(loc, "constant expression not integer"));
        }
        let val = const_eval::eval(self.sess, &node)?;
        Ok((val, node.ty))
    }

    fn make_chain(&mut self, lhs: Expr, rhs: Expr) -> Expr {
        let loc = rhs.loc;
        let ty = rhs.ty;
        Expr::new(
            ExprKind::Chain {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
            loc,
        )
    }

    fn build_compound(&mut self, op: CompoundOp, lhs: Expr, rhs: Expr, loc: Loc) -> CResult<Expr> {
        match op {
            CompoundOp::Add => self.new_add(lhs, rhs, loc),
            CompoundOp::Sub => self.new_sub(lhs, rhs, loc),
            CompoundOp::Mul => self.arith_binary(BinOp::Mul, lhs, rhs, loc),
            CompoundOp::Div => self.arith_binary(BinOp::Div, lhs, rhs, loc),
            CompoundOp::Mod => self.arith_binary(BinOp::Mod, lhs, rhs, loc),
            CompoundOp::And => self.arith_binary(BinOp::BitAnd, lhs, rhs, loc),
            CompoundOp::Or => self.arith_binary(BinOp::BitOr, lhs, rhs, loc),
            CompoundOp::Xor => self.arith_binary(BinOp::BitXor, lhs, rhs, loc),
            CompoundOp::Shl => self.shift_binary(BinOp::Shl, lhs, rhs, loc),
            CompoundOp::Shr => {
                let op = if self.sess.types.is_unsigned(lhs.ty) {
                    BinOp::Shr
                } else {
                    BinOp::Sar
                };
                self.shift_binary(op, lhs, rhs, loc)
            }
        }
    }

    /// `A op= B` → `tmp = &A, *tmp = *tmp op B` (with the member access
    /// replayed through the pointer when A is a bitfield).
    fn to_assign(&mut self, op: CompoundOp, lhs: Expr, rhs: Expr, loc: Loc) -> CResult<Expr> {
        if let ExprKind::Member { base, member } = &lhs.kind {
            if member.is_bitfield {
                let member = member.clone();
                let base = (**base).clone();
                let ptr_ty = self.sess.types.pointer_to(base.ty);
                let var = self.new_lvar(None, ptr_ty);

                let addr = self.addr_expr(base, loc);
                let vref = self.var_expr(var, loc);
                let expr1 = self.assign_expr(vref, addr, loc)?;

                let mk_ref = |this: &mut Self| -> CResult<Expr> {
                    let v = this.var_expr(var, loc);
                    let d = this.deref_expr(v, loc)?;
                    Ok(Expr::new(
                        ExprKind::Member {
                            base: Box::new(d),
                            member: member.clone(),
                        },
                        member.ty,
                        loc,
                    ))
                };
                let ref_w = mk_ref(self)?;
                let ref_r = mk_ref(self)?;
                let inner = self.build_compound(op, ref_r, rhs, loc)?;
                let expr4 = self.assign_expr(ref_w, inner, loc)?;
                return Ok(self.make_chain(expr1, expr4));
            }
        }

        let ptr_ty = self.sess.types.pointer_to(lhs.ty);
        let var = self.new_lvar(None, ptr_ty);

        let addr = self.addr_expr(lhs, loc);
        let vref = self.var_expr(var, loc);
        let expr1 = self.assign_expr(vref, addr, loc)?;

        let v1 = self.var_expr(var, loc);
        let deref_w = self.deref_expr(v1, loc)?;
        let v2 = self.var_expr(var, loc);
        let deref_r = self.deref_expr(v2, loc)?;
        let inner = self.build_compound(op, deref_r, rhs, loc)?;
        let expr2 = self.assign_expr(deref_w, inner, loc)?;
        Ok(self.make_chain(expr1, expr2))
    }

    /// assign = conditional (assign-op assign)?
    pub(super) fn assign(&mut self) -> CResult<Expr> {
        let node = self.conditional()?;
        let loc = self.loc();

        if self.consume("=") {
            let rhs = self.assign()?;
            return self.assign_expr(node, rhs, loc);
        }
        for (tok, op) in [
            ("+=", CompoundOp::Add),
            ("-=", CompoundOp::Sub),
            ("*=", CompoundOp::Mul),
            ("/=", CompoundOp::Div),
            ("%=", CompoundOp::Mod),
            ("&=", CompoundOp::And),
            ("|=", CompoundOp::Or),
            ("^=", CompoundOp::Xor),
            ("<<=", CompoundOp::Shl),
            (">>=", CompoundOp::Shr),
        ] {
            if self.consume(tok) {
                let rhs = self.assign()?;
                return self.to_assign(op, node, rhs, loc);
            }
        }
        Ok(node)
    }

    /// conditional = logor ("?" expr? ":" conditional)?
    pub(super) fn conditional(&mut self) -> CResult<Expr> {
        let cond = self.log_or()?;
        if !self.equal("?") {
            return Ok(cond);
        }
        let loc = self.loc();
        self.advance();

        // [GNU] `a ?: b` is `tmp = a, tmp ? tmp : b`.
        if self.consume(":") {
            self.enter_tmp_scope();
            let var = self.new_lvar(None, cond.ty);
            let vref = self.var_expr(var, loc);
            let lhs = self.assign_expr(vref, cond, loc)?;
            let v1 = self.var_expr(var, loc);
            let cond2 = self.to_bool(v1);
            let then = self.var_expr(var, loc);
            let els = self.conditional()?;
            self.leave_scope();
            let rhs = self.cond_expr(cond2, then, els, loc)?;
            return Ok(self.make_chain(lhs, rhs));
        }

        let cond = self.to_bool(cond);
        let then = self.expr()?;
        self.skip(":")?;
        let els = self.conditional()?;
        self.cond_expr(cond, then, els, loc)
    }

    /// logor = logand ("||" logand)*
    fn log_or(&mut self) -> CResult<Expr> {
        let mut node = self.log_and()?;
        while self.equal("||") {
            let loc = self.loc();
            self.advance();
            let rhs = self.log_and()?;
            let lhs = self.to_bool(node);
            let rhs = self.to_bool(rhs);
            node = Expr::new(
                ExprKind::LogOr {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                TY_INT,
                loc,
            );
        }
        Ok(node)
    }

    /// logand = bitor ("&&" bitor)*
    fn log_and(&mut self) -> CResult<Expr> {
        let mut node = self.bit_or()?;
        while self.equal("&&") {
            let loc = self.loc();
            self.advance();
            let rhs = self.bit_or()?;
            let lhs = self.to_bool(node);
            let rhs = self.to_bool(rhs);
            node = Expr::new(
                ExprKind::LogAnd {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                TY_INT,
                loc,
            );
        }
        Ok(node)
    }

    fn bit_or(&mut self) -> CResult<Expr> {
        let mut node = self.bit_xor()?;
        while self.equal("|") {
            let loc = self.loc();
            self.advance();
            let rhs = self.bit_xor()?;
            node = self.arith_binary(BinOp::BitOr, node, rhs, loc)?;
        }
        Ok(node)
    }

    fn bit_xor(&mut self) -> CResult<Expr> {
        let mut node = self.bit_and()?;
        while self.equal("^") {
            let loc = self.loc();
            self.advance();
            let rhs = self.bit_and()?;
            node = self.arith_binary(BinOp::BitXor, node, rhs, loc)?;
        }
        Ok(node)
    }

    fn bit_and(&mut self) -> CResult<Expr> {
        let mut node = self.equality()?;
        while self.equal("&") {
            let loc = self.loc();
            self.advance();
            let rhs = self.equality()?;
            node = self.arith_binary(BinOp::BitAnd, node, rhs, loc)?;
        }
        Ok(node)
    }

    fn equality(&mut self) -> CResult<Expr> {
        let mut node = self.relational()?;
        loop {
            let loc = self.loc();
            if self.consume("==") {
                let rhs = self.relational()?;
                node = self.cmp_binary(BinOp::Eq, node, rhs, loc)?;
            } else if self.consume("!=") {
                let rhs = self.relational()?;
                node = self.cmp_binary(BinOp::Ne, node, rhs, loc)?;
            } else {
                return Ok(node);
            }
        }
    }

    fn relational(&mut self) -> CResult<Expr> {
        let mut node = self.shift()?;
        loop {
            let loc = self.loc();
            if self.consume("<") {
                let rhs = self.shift()?;
                node = self.cmp_binary(BinOp::Lt, node, rhs, loc)?;
            } else if self.consume("<=") {
                let rhs = self.shift()?;
                node = self.cmp_binary(BinOp::Le, node, rhs, loc)?;
            } else if self.consume(">") {
                let rhs = self.shift()?;
                node = self.cmp_binary(BinOp::Gt, node, rhs, loc)?;
            } else if self.consume(">=") {
                let rhs = self.shift()?;
                node = self.cmp_binary(BinOp::Ge, node, rhs, loc)?;
            } else {
                return Ok(node);
            }
        }
    }

    fn shift(&mut self) -> CResult<Expr> {
        let mut node = self.add()?;
        loop {
            let loc = self.loc();
            if self.consume("<<") {
                let rhs = self.add()?;
                node = self.shift_binary(BinOp::Shl, node, rhs, loc)?;
            } else if self.consume(">>") {
                let rhs = self.add()?;
                let op = if self.sess.types.is_unsigned(node.ty) {
                    BinOp::Shr
                } else {
                    BinOp::Sar
                };
                node = self.shift_binary(op, node, rhs, loc)?;
            } else {
                return Ok(node);
            }
        }
    }

    fn add(&mut self) -> CResult<Expr> {
        let mut node = self.mul()?;
        loop {
            let loc = self.loc();
            if self.consume("+") {
                let rhs = self.mul()?;
                node = self.new_add(node, rhs, loc)?;
            } else if self.consume("-") {
                let rhs = self.mul()?;
                node = self.new_sub(node, rhs, loc)?;
            } else {
                return Ok(node);
            }
        }
    }

    fn mul(&mut self) -> CResult<Expr> {
        let mut node = self.cast_expr()?;
        loop {
            let loc = self.loc();
            if self.consume("*") {
                let rhs = self.cast_expr()?;
                node = self.arith_binary(BinOp::Mul, node, rhs, loc)?;
            } else if self.consume("/") {
                let rhs = self.cast_expr()?;
                node = self.arith_binary(BinOp::Div, node, rhs, loc)?;
            } else if self.consume("%") {
                let rhs = self.cast_expr()?;
                node = self.arith_binary(BinOp::Mod, node, rhs, loc)?;
            } else {
                return Ok(node);
            }
        }
    }

    /// cast = "(" type-name ")" cast | unary
    fn cast_expr(&mut self) -> CResult<Expr> {
        if self.equal("(") && self.is_typename_at(1) {
            let start = self.pos;
            let loc = self.loc();
            self.advance();
            let ty = self.typename()?;
            self.skip(")")?;

            // A compound literal; reparse from the start as a postfix
            // expression.
            if self.equal("{") {
                self.pos = start;
                return self.unary();
            }

            let inner = self.cast_expr()?;
            let inner = self.ptr_conv(inner);
            let mut node = self.new_cast(inner, ty);
            node.loc = loc;
            return Ok(node);
        }
        self.unary()
    }

    pub(super) fn is_typename_at(&self, n: usize) -> bool {
        let saved = self.peek(n);
        (saved.kind == TokenKind::Keyword
            && matches!(
                saved.text.as_str(),
                "void" | "_Bool" | "char" | "short" | "int" | "long" | "struct" | "union"
                    | "typedef" | "enum" | "static" | "extern" | "signed" | "unsigned"
                    | "const" | "volatile" | "auto" | "register" | "restrict" | "__restrict"
                    | "__restrict__" | "_Noreturn" | "float" | "double" | "inline"
                    | "_Thread_local" | "__thread" | "typeof" | "__typeof" | "__typeof__"
            ))
            || self.find_typedef(saved).is_some()
    }

    /// unary = ("+" | "-" | "*" | "&" | "!" | "~") cast
    ///       | ("++" | "--") unary
    ///       | "&&" ident
    ///       | postfix
    pub(super) fn unary(&mut self) -> CResult<Expr> {
        let loc = self.loc();

        if self.consume("+") {
            let e = self.cast_expr()?;
            if !self.sess.types.is_numeric(e.ty) {
                return Err(self.err_at(e.loc, "invalid operand"));
            }
            let e = if self.sess.types.is_integer(e.ty) {
                self.int_promotion(e)
            } else {
                e
            };
            let ty = e.ty;
            return Ok(Expr::new(ExprKind::Pos(Box::new(e)), ty, loc));
        }

        if self.consume("-") {
            let e = self.cast_expr()?;
            if !self.sess.types.is_numeric(e.ty) {
                return Err(self.err_at(e.loc, "invalid operand"));
            }
            let e = if self.sess.types.is_integer(e.ty) {
                self.int_promotion(e)
            } else {
                e
            };
            let ty = e.ty;
            return Ok(Expr::new(ExprKind::Neg(Box::new(e)), ty, loc));
        }

        if self.consume("&") {
            let lhs = self.cast_expr()?;
            if lhs.bitfield_member().is_some() {
                return Err(self.err_at(loc, "cannot take address of bitfield"));
            }
            return Ok(self.addr_expr(lhs, loc));
        }

        if self.consume("*") {
            // Dereferencing a function is a no-op: `*foo`, `**foo` and
            // `*****foo` are all equivalent to `foo`.
            let node = self.cast_expr()?;
            if self.sess.types.is_func(node.ty) {
                return Ok(node);
            }
            let node = self.ptr_conv(node);
            return self.deref_expr(node, loc);
        }

        if self.consume("!") {
            let e = self.cast_expr()?;
            let e = self.to_bool(e);
            return Ok(Expr::new(ExprKind::Not(Box::new(e)), TY_INT, loc));
        }

        if self.consume("~") {
            let e = self.cast_expr()?;
            if !self.sess.types.is_integer(e.ty) {
                return Err(self.err_at(e.loc, "invalid operand"));
            }
            let e = self.int_promotion(e);
            let ty = e.ty;
            return Ok(Expr::new(ExprKind::BitNot(Box::new(e)), ty, loc));
        }

        // ++i is i += 1.
        if self.consume("++") {
            let e = self.unary()?;
            let one = self.num(1, loc);
            return self.to_assign(CompoundOp::Add, e, one, loc);
        }
        if self.consume("--") {
            let e = self.unary()?;
            let one = self.num(1, loc);
            return self.to_assign(CompoundOp::Sub, e, one, loc);
        }

        // [GNU] labels-as-values.
        if self.equal("&&") {
            let name_tok = self.peek(1).clone();
            let name = self.get_ident(&name_tok)?;
            self.advance();
            self.advance();
            let unique = self.label_unique(&name);
            self.gotos.push(GotoRec {
                label: name,
                loc,
                top_vla: self.current_vla,
                goto_id: usize::MAX,
            });
            self.dont_dealloc_vla = true;
            let ty = self.sess.types.pointer_to(TY_VOID);
            return Ok(Expr::new(ExprKind::LabelVal { unique_label: unique }, ty, loc));
        }

        self.postfix()
    }

    /// `A++` → `(ptr = &A, tmp = *ptr, *ptr += 1, tmp)`
    fn new_inc_dec(&mut self, node: Expr, loc: Loc, addend: i64) -> CResult<Expr> {
        self.enter_tmp_scope();
        let node_ty = node.ty;
        let mut expr: Option<Expr> = None;

        let make_ref: Box<dyn Fn(&mut Self) -> CResult<Expr>>;
        if let ExprKind::Member { base, member } = &node.kind {
            if member.is_bitfield {
                let member = member.clone();
                let base = (**base).clone();
                let ptr_ty = self.sess.types.pointer_to(base.ty);
                let ptr = self.new_lvar(None, ptr_ty);
                let addr = self.addr_expr(base, loc);
                let vref = self.var_expr(ptr, loc);
                let e = self.assign_expr(vref, addr, loc)?;
                self.chain_expr(&mut expr, Some(e));
                make_ref = Box::new(move |this: &mut Self| {
                    let v = this.var_expr(ptr, loc);
                    let d = this.deref_expr(v, loc)?;
                    Ok(Expr::new(
                        ExprKind::Member {
                            base: Box::new(d),
                            member: member.clone(),
                        },
                        member.ty,
                        loc,
                    ))
                });
            } else {
                let ptr_ty = self.sess.types.pointer_to(node_ty);
                let ptr = self.new_lvar(None, ptr_ty);
                let addr = self.addr_expr(node, loc);
                let vref = self.var_expr(ptr, loc);
                let e = self.assign_expr(vref, addr, loc)?;
                self.chain_expr(&mut expr, Some(e));
                make_ref = Box::new(move |this: &mut Self| {
                    let v = this.var_expr(ptr, loc);
                    this.deref_expr(v, loc)
                });
            }
        } else {
            let ptr_ty = self.sess.types.pointer_to(node_ty);
            let ptr = self.new_lvar(None, ptr_ty);
            let addr = self.addr_expr(node, loc);
            let vref = self.var_expr(ptr, loc);
            let e = self.assign_expr(vref, addr, loc)?;
            self.chain_expr(&mut expr, Some(e));
            make_ref = Box::new(move |this: &mut Self| {
                let v = this.var_expr(ptr, loc);
                this.deref_expr(v, loc)
            });
        }

        let tmp = self.new_lvar(None, node_ty);
        let r1 = make_ref(self)?;
        let tmp_ref = self.var_expr(tmp, loc);
        let save = self.assign_expr(tmp_ref, r1, loc)?;
        self.chain_expr(&mut expr, Some(save));

        let r2 = make_ref(self)?;
        let one = self.num(addend, loc);
        let bump = self.to_assign(CompoundOp::Add, r2, one, loc)?;
        self.chain_expr(&mut expr, Some(bump));

        let out = self.var_expr(tmp, loc);
        self.chain_expr(&mut expr, Some(out));
        self.leave_scope();
        Ok(expr.unwrap())
    }

    /// Member access `foo.bar`, searching anonymous members transparently.
    fn struct_ref(&mut self, mut node: Expr, name: &str, loc: Loc) -> CResult<Expr> {
        if !self.sess.types.is_struct_union(node.ty) {
            return Err(self.err_at(node.loc, "not a struct nor a union"));
        }
        let mut ty = node.ty;
        loop {
            let Some(mem) = self.get_struct_member(ty, name) else {
                return Err(self.err_at(loc, "no such member"));
            };
            let mem_ty = mem.ty;
            let named = mem.name.is_some();
            node = Expr::new(
                ExprKind::Member {
                    base: Box::new(node),
                    member: mem,
                },
                mem_ty,
                loc,
            );
            if named {
                return Ok(node);
            }
            ty = mem_ty;
        }
    }

    /// postfix = primary postfix-tail*
    /// postfix-tail = "[" expr "]" | "(" args ")" | "." ident | "->" ident
    ///              | "++" | "--"
    fn postfix(&mut self) -> CResult<Expr> {
        let mut node = self.primary()?;
        loop {
            let loc = self.loc();
            if self.consume("(") {
                node = self.funcall(node)?;
                continue;
            }
            if self.consume("[") {
                // x[y] is short for *(x+y).
                let idx = self.expr()?;
                self.skip("]")?;
                let lhs = self.ptr_conv(node);
                let idx = self.ptr_conv(idx);
                let sum = self.new_add(lhs, idx, loc)?;
                node = self.deref_expr(sum, loc)?;
                continue;
            }
            if self.consume(".") {
                let name_tok = self.advance();
                let name = self.get_ident(&name_tok)?;
                node = self.struct_ref(node, &name, name_tok.loc())?;
                continue;
            }
            if self.consume("->") {
                // x->y is short for (*x).y.
                let ptr = self.ptr_conv(node);
                let deref = self.deref_expr(ptr, loc)?;
                let name_tok = self.advance();
                let name = self.get_ident(&name_tok)?;
                node = self.struct_ref(deref, &name, name_tok.loc())?;
                continue;
            }
            if self.consume("++") {
                node = self.new_inc_dec(node, loc, 1)?;
                continue;
            }
            if self.consume("--") {
                node = self.new_inc_dec(node, loc, -1)?;
                continue;
            }
            return Ok(node);
        }
    }

    /// funcall = (assign ("," assign)*)? ")"
    ///
    /// Every argument is spilled into a typed temporary; the call node
    /// carries the spill chain and the temporaries for ABI placement.
    fn funcall(&mut self, func: Expr) -> CResult<Expr> {
        let loc = func.loc;
        let func = self.ptr_conv(func);

        let fn_ty = match self.sess.types.kind(func.ty) {
            TypeKind::Func(_) => func.ty,
            TypeKind::Ptr { base } if self.sess.types.is_func(*base) => *base,
            _ => return Err(self.err_at(func.loc, "not a function")),
        };
        let f = self.sess.types.func(fn_ty);
        let is_variadic = f.is_variadic;
        let is_oldstyle = f.is_oldstyle;
        let return_ty = f.return_ty;
        let params: Vec<ObjId> = if is_oldstyle { Vec::new() } else { f.params.clone() };

        self.enter_tmp_scope();
        let mut args: Vec<ObjId> = Vec::new();
        let mut args_expr: Option<Expr> = None;
        let mut param_iter = params.iter();

        let mut first = true;
        while self.comma_list(")", !first)? {
            first = false;
            let mut arg = self.assign()?;

            if let Some(&param) = param_iter.next() {
                let pty = self.sess.obj(param).ty;
                if !self.sess.types.is_struct_union(pty) {
                    arg = self.ptr_conv(arg);
                    arg = self.new_cast(arg, pty);
                }
            } else {
                if !is_variadic && !is_oldstyle {
                    return Err(self.err("too many arguments"));
                }
                // Default argument promotions.
                if matches!(self.sess.types.kind(arg.ty), TypeKind::Float) {
                    arg = self.new_cast(arg, TY_DOUBLE);
                } else {
                    arg = self.ptr_conv(arg);
                }
            }

            let tmp = self.new_lvar(None, arg.ty);
            let tmp_ref = self.var_expr(tmp, arg.loc);
            let spill = self.assign_expr(tmp_ref, arg, loc)?;
            self.chain_expr(&mut args_expr, Some(spill));
            args.push(tmp);
        }
        if param_iter.next().is_some() {
            return Err(self.err("too few arguments"));
        }
        self.leave_scope();

        let ret_buffer = if self.sess.types.is_struct_union(return_ty) {
            Some(self.new_lvar(None, return_ty))
        } else {
            None
        };

        Ok(Expr::new(
            ExprKind::FunCall {
                func: Box::new(func),
                args_expr: args_expr.map(Box::new),
                args,
                ret_buffer,
            },
            return_ty,
            loc,
        ))
    }

    /// primary = "(" "{" stmt+ "}" ")" | "(" expr ")" | "sizeof" ...
    ///         | compound-literal | builtin | ident | str | num
    fn primary(&mut self) -> CResult<Expr> {
        let loc = self.loc();

        // Compound literal.
        if self.equal("(") && self.is_typename_at(1) {
            self.advance();
            let ty = self.typename()?;
            if self.sess.types.is_vla(ty) {
                return Err(self.err("compound literals cannot be VLA"));
            }
            self.skip(")")?;

            if self.sess.scope(self.scope).parent.is_none() {
                let var = self.new_anon_gvar(ty);
                self.gvar_initializer(var)?;
                return Ok(self.var_expr(var, loc));
            }
            // The literal's storage lives in the innermost non-temporary
            // scope so that it survives the full expression.
            let mut sc = self.scope;
            while self.sess.scope(sc).is_temporary {
                sc = self.sess.scope(sc).parent.unwrap();
            }
            let var = self.sess.add_obj(crate::common::session::Obj::new(String::new(), ty));
            self.sess.obj_mut(var).is_local = true;
            self.sess.scope_mut(sc).locals.push(var);

            let lhs = self.lvar_initializer(var)?;
            let rhs = self.var_expr(var, loc);
            return Ok(self.make_chain(lhs, rhs));
        }

        // Statement expression.
        if self.equal("(") && self.peek(1).is("{") {
            if self.sess.scope(self.scope).parent.is_none() {
                return Err(self.err("statement expression at file scope"));
            }
            self.advance();
            self.advance();
            let node = self.stmt_expr(loc)?;
            self.skip(")")?;
            return Ok(node);
        }

        if self.consume("(") {
            let node = self.expr()?;
            self.skip(")")?;
            return Ok(node);
        }

        if self.equal("sizeof") {
            self.advance();
            let ty = if self.equal("(") && self.is_typename_at(1) {
                self.advance();
                let ty = self.typename()?;
                self.skip(")")?;
                ty
            } else {
                let node = self.unary()?;
                node.ty
            };
            if self.sess.types.is_vla(ty) {
                if let Some(sv) = self.sess.types.vla_size_var(ty) {
                    return Ok(self.var_expr(sv, loc));
                }
                let calc = self.compute_vla_size(ty, loc)?;
                return Ok(calc.expect("fresh VLA must produce a size computation"));
            }
            if self.sess.types.size(ty) < 0 {
                return Err(self.err_at(loc, "sizeof applied to incomplete type"));
            }
            // A flexible struct may have been inflated by an initializer;
            // sizeof still reports the base size.
            if let TypeKind::Struct {
                members,
                is_flexible: true,
                is_union: false,
            } = self.sess.types.kind(ty)
            {
                if let Some(last) = members.last() {
                    if self.sess.types.is_array(last.ty) {
                        let sz = self.sess.types.size(ty) - self.sess.types.size(last.ty);
                        return Ok(self.num_ulong(sz, loc));
                    }
                }
            }
            let sz = self.sess.types.size(ty);
            return Ok(self.num_ulong(sz, loc));
        }

        if self.equal("__builtin_alloca") {
            self.advance();
            self.skip("(")?;
            let size = self.assign()?;
            self.skip(")")?;
            let ty = self.sess.types.pointer_to(TY_VOID);
            return Ok(Expr::new(
                ExprKind::Alloca {
                    size: Box::new(size),
                    var: None,
                },
                ty,
                loc,
            ));
        }

        if self.equal("__builtin_constant_p") {
            self.advance();
            self.skip("(")?;
            let e = self.expr()?;
            self.skip(")")?;
            let val = const_eval::try_eval(self.sess, &e).is_some() as i64;
            return Ok(self.num(val, loc));
        }

        if self.equal("__builtin_expect") {
            self.advance();
            self.skip("(")?;
            let e = self.assign()?;
            let node = self.new_cast(e, TY_LONG);
            self.skip(",")?;
            self.assign()?;
            self.skip(")")?;
            return Ok(node);
        }

        if self.equal("__builtin_offsetof") {
            return self.builtin_offsetof(loc);
        }

        if self.equal("__builtin_va_start") {
            self.advance();
            self.skip("(")?;
            let ap = self.conditional()?;
            if self.consume(",") {
                self.assign()?;
            }
            self.skip(")")?;
            return Ok(Expr::new(ExprKind::VaStart(Box::new(ap)), TY_VOID, loc));
        }

        if self.equal("__builtin_va_copy") {
            self.advance();
            self.skip("(")?;
            let dst = self.conditional()?;
            self.skip(",")?;
            let src = self.conditional()?;
            self.skip(")")?;
            return Ok(Expr::new(
                ExprKind::VaCopy {
                    lhs: Box::new(dst),
                    rhs: Box::new(src),
                },
                TY_VOID,
                loc,
            ));
        }

        if self.equal("__builtin_va_end") {
            self.advance();
            self.skip("(")?;
            let node = self.conditional()?;
            self.skip(")")?;
            return Ok(node);
        }

        if self.equal("__builtin_va_arg") {
            self.advance();
            self.skip("(")?;
            let ap = self.conditional()?;
            self.skip(",")?;
            let ty = self.typename()?;
            self.skip(")")?;
            let var = self.new_lvar(None, ty);
            let va = Expr::new(
                ExprKind::VaArg {
                    ap: Box::new(ap),
                    var,
                },
                ty,
                loc,
            );
            let out = self.var_expr(var, loc);
            return Ok(self.make_chain(va, out));
        }

        if self.tok().is_ident() {
            return self.primary_ident(loc);
        }

        if self.tok().kind == TokenKind::Str {
            let tok = self.advance();
            let ty = tok.str_ty.unwrap();
            let var = if self.current_fn.is_none() {
                self.new_anon_gvar(ty)
            } else {
                self.new_static_lvar(ty)
            };
            self.sess.obj_mut(var).init_data = tok.str_data.clone();
            return Ok(self.var_expr(var, loc));
        }

        if self.tok().kind == TokenKind::PpNum || self.tok().kind == TokenKind::Num {
            {
                let files = &self.sess.files;
                let tok = &mut self.toks[self.pos];
                convert_pp_number(tok, files)?;
            }
            let tok = self.advance();
            let ty = tok.num_ty.unwrap();
            let node = if self.sess.types.is_flonum(ty) {
                Expr::new(ExprKind::Fnum(tok.fval), ty, loc)
            } else {
                Expr::new(ExprKind::Num(tok.val), ty, loc)
            };
            return Ok(node);
        }

        Err(self.err("expected an expression"))
    }

    /// `__builtin_offsetof(type, member-designator)`, with constant array
    /// subscripts folded and variable ones contributing runtime terms.
    fn builtin_offsetof(&mut self, loc: Loc) -> CResult<Expr> {
        self.advance();
        self.skip("(")?;
        let mut ty = self.typename()?;
        self.skip(",")?;

        let mut node: Option<Expr> = None;
        let mut offset: i64 = 0;
        loop {
            loop {
                let name_tok = self.advance();
                let name = self.get_ident(&name_tok)?;
                let Some(mem) = self.get_struct_member(ty, &name) else {
                    return Err(self.sess.error_tok(&name_tok, "struct has no such member"));
                };
                offset += mem.offset;
                ty = mem.ty;
                if mem.name.is_some() {
                    break;
                }
                // An anonymous container: the name lives deeper; retry
                // against the inner type without consuming a new token.
                self.pos -= 1;
            }

            while self.sess.types.base(ty).is_some() && self.consume("[") {
                ty = self.sess.types.base(ty).unwrap();
                let e = self.conditional()?;
                self.skip("]")?;
                if let Some(val) = const_eval::try_eval(self.sess, &e) {
                    offset += self.sess.types.size(ty) * val;
                    continue;
                }
                let sz = self.num_long(self.sess.types.size(ty), loc);
                let term = self.arith_binary(BinOp::Mul, e, sz, loc)?;
                node = match node {
                    None => Some(term),
                    Some(prev) => Some(self.arith_binary(BinOp::Add, prev, term, loc)?),
                };
            }
            if !self.consume(".") {
                break;
            }
        }
        self.skip(")")?;

        let base = self.num_ulong(offset, loc);
        match node {
            None => Ok(base),
            Some(n) => self.arith_binary(BinOp::Add, n, base, loc),
        }
    }

    fn primary_ident(&mut self, loc: Loc) -> CResult<Expr> {
        let tok = self.advance();
        let name = tok.text.clone();
        let sc = self.find_var(&name);

        // Function references feed liveness and a couple of behavior
        // toggles keyed on well-known names.
        if let Some(VarScope::Var(v)) = &sc {
            if self.sess.types.is_func(self.sess.obj(*v).ty) {
                let fname = self.sess.obj(*v).name.clone();
                match self.current_fn {
                    Some(f) => self.sess.obj_mut(f).refs.push(fname.clone()),
                    None => self.sess.obj_mut(*v).is_referenced = true,
                }
                if fname == "alloca" {
                    self.dont_dealloc_vla = true;
                }
                // A longjmp-style callee may re-enter a frame whose temp
                // slots would otherwise be reused.
                if fname.contains("setjmp")
                    || fname.contains("savectx")
                    || fname.contains("vfork")
                    || fname.contains("getcontext")
                {
                    self.sess.dont_reuse_stack = true;
                }
            }
        }

        match sc {
            Some(VarScope::Var(v)) => return Ok(self.var_expr(v, loc)),
            Some(VarScope::EnumConst { ty, val }) => {
                let node_ty = if self.sess.types.get(ty).is_unspec_enum {
                    TY_INT
                } else {
                    ty
                };
                return Ok(Expr::new(ExprKind::Num(val), node_ty, loc));
            }
            _ => {}
        }

        // "__func__" (and the GNU alias "__FUNCTION__") is a local static
        // string holding the current function's name.
        if self.current_fn.is_some() && (name == "__func__" || name == "__FUNCTION__") {
            let fn_id = self.current_fn.unwrap();
            let fname = self.sess.obj(fn_id).name.clone();
            let ty = self
                .sess
                .types
                .array_of(TY_PCHAR, fname.len() as i64 + 1);
            let var = self.new_static_lvar(ty);
            let mut data = fname.into_bytes();
            data.push(0);
            self.sess.obj_mut(var).init_data = Some(data);

            let fn_scope = self.sess.types.func(self.sess.obj(fn_id).ty).scope;
            if let Some(sc) = fn_scope {
                self.sess
                    .scope_mut(sc)
                    .vars
                    .insert("__func__".to_string(), VarScope::Var(var));
                self.sess
                    .scope_mut(sc)
                    .vars
                    .insert("__FUNCTION__".to_string(), VarScope::Var(var));
            }
            return Ok(self.var_expr(var, loc));
        }

        if self.equal("(") {
            return Err(self.sess.error_tok(&tok, "implicit declaration of a function"));
        }
        Err(self.sess.error_tok(&tok, "undefined variable"))
    }

    /// The `({ ... })` statement expression: its value is the last
    /// expression statement; a struct value is routed through a temporary
    /// so the caller sees ordinary variable semantics.
    fn stmt_expr(&mut self, loc: Loc) -> CResult<Expr> {
        let block = self.compound_stmt_body(loc)?;
        let StmtKind::Block {
            mut body,
            top_vla,
            target_vla,
        } = block.kind
        else {
            unreachable!()
        };

        let mut ty = TY_VOID;
        if let Some(Stmt {
            kind: StmtKind::ExprStmt(e),
            ..
        }) = body.last_mut()
        {
            if self.sess.types.is_struct_union(e.ty) {
                let var = self.new_lvar(None, e.ty);
                let last = e.clone();
                let vref = self.var_expr(var, loc);
                let assign = self.assign_expr(vref, last, loc)?;
                let out = self.var_expr(var, loc);
                let chained = self.make_chain(assign, out);
                *e = chained;
            }
            ty = self.sess.types.ptr_decay(e.ty);
        }

        Ok(Expr::new(
            ExprKind::StmtExpr {
                body,
                top_vla,
                target_vla,
            },
            ty,
            loc,
        ))
    }
}
