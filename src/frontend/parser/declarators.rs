//! Declarators: pointer prefixes, grouping parentheses, array and function
//! suffixes.
//!
//! A declarator is parsed outside-in: pointers, then an optional
//! parenthesized group, then the name, then suffixes. For a grouped
//! declarator like `int (*f)(void)` the suffix after the group binds
//! tighter than the group's contents, so the suffix is parsed first and the
//! group is re-parsed against the suffixed type.

use crate::common::error::CResult;
use crate::common::session::VarScope;
use crate::common::types::{TypeId, TypeKind, TY_DOUBLE, TY_INT, TY_ULONG};
use crate::frontend::lexer::token::{Loc, Token};
use crate::frontend::parser::ast::{BinOp, Expr, ExprKind};
use crate::frontend::parser::parser::Parser;

impl<'a> Parser<'a> {
    /// pointers = ("*" ("const" | "volatile" | "restrict")*)*
    pub(super) fn pointers(&mut self, mut ty: TypeId) -> TypeId {
        while self.consume("*") {
            ty = self.sess.types.pointer_to(ty);
            while self.equal("const")
                || self.equal("volatile")
                || self.equal("restrict")
                || self.equal("__restrict")
                || self.equal("__restrict__")
            {
                self.advance();
            }
        }
        ty
    }

    /// declarator = pointers ("(" declarator ")" | ident)? type-suffix
    pub(super) fn declarator(
        &mut self,
        ty: TypeId,
        want_name: bool,
    ) -> CResult<(TypeId, Option<Token>)> {
        let ty = self.pointers(ty);

        if self.consume("(") {
            // `(` here is either a function parameter list (for an abstract
            // declarator) or a grouping.
            if self.is_typename() || self.equal(")") {
                let fn_ty = self.func_params(ty)?;
                return Ok((fn_ty, None));
            }
            let group_start = self.pos;
            self.skip_paren()?;
            let ty = self.type_suffix(ty)?;
            let after = self.pos;

            self.pos = group_start;
            let (ty, name) = self.declarator(ty, want_name)?;
            self.pos = after;
            return Ok((ty, name));
        }

        let mut name = None;
        if want_name && self.tok().is_ident() {
            name = Some(self.advance());
        }
        let ty = self.type_suffix(ty)?;
        Ok((ty, name))
    }

    /// type-name = declspec abstract-declarator
    pub(super) fn typename(&mut self) -> CResult<TypeId> {
        let basety = self.declspec(&mut None)?;
        let (ty, _) = self.declarator(basety, false)?;
        Ok(ty)
    }

    /// type-suffix = "(" func-params | "[" array-dimensions | ε
    pub(super) fn type_suffix(&mut self, ty: TypeId) -> CResult<TypeId> {
        if self.consume("(") {
            return self.func_params(ty);
        }
        if self.consume("[") {
            while self.equal("static")
                || self.equal("const")
                || self.equal("volatile")
                || self.equal("restrict")
                || self.equal("__restrict")
                || self.equal("__restrict__")
            {
                self.advance();
            }
            return self.array_dimensions(ty);
        }
        Ok(ty)
    }

    /// array-dimensions = const-expr? "]" type-suffix
    ///
    /// A non-constant dimension yields a VLA; `[*]` and `[]` yield an
    /// incomplete array, completed later by an initializer.
    fn array_dimensions(&mut self, mut ty: TypeId) -> CResult<TypeId> {
        let unsized_star = self.equal("*") && self.peek(1).is("]");
        if unsized_star {
            self.advance();
            self.advance();
        }
        if unsized_star || self.consume("]") {
            if self.consume("[") {
                ty = self.array_dimensions(ty)?;
            }
            return Ok(self.sess.types.array_of(ty, -1));
        }

        let expr = self.assign()?;
        self.skip("]")?;
        if self.consume("[") {
            ty = self.array_dimensions(ty)?;
        }

        if !self.sess.types.is_vla(ty) {
            if let Some(len) = crate::frontend::parser::const_eval::try_eval(self.sess, &expr) {
                return Ok(self.sess.types.array_of(ty, len));
            }
        }

        if self.sess.scope(self.scope).parent.is_none() {
            return Err(self.err("variably-modified type at file scope"));
        }
        Ok(self.sess.types.vla_of(ty, expr))
    }

    /// func-params = ("void" | param ("," param)* ("," "...")?)? ")"
    /// param       = declspec declarator
    ///
    /// Old-style (identifier-only) lists fall through to K&R parsing.
    fn func_params(&mut self, ty: TypeId) -> CResult<TypeId> {
        let fn_ty = self.sess.types.func_type(ty);

        if self.equal("...") && self.peek(1).is(")") {
            self.advance();
            self.advance();
            self.sess.types.func_mut(fn_ty).is_variadic = true;
            return Ok(fn_ty);
        }
        if self.equal("void") && self.peek(1).is(")") {
            self.advance();
            self.advance();
            return Ok(fn_ty);
        }
        if !self.is_typename() {
            return self.func_params_old_style(fn_ty);
        }

        let mut params = Vec::new();
        let mut is_variadic = false;
        let mut expr: Option<Expr> = None;

        self.enter_scope();
        let scope = self.scope;

        let mut first = true;
        while self.comma_list(")", !first)? {
            first = false;
            if self.equal("...") {
                is_variadic = true;
                self.advance();
                self.skip(")")?;
                break;
            }
            let basety = self.declspec(&mut None)?;
            let (mut ty2, name) = self.declarator(basety, true)?;

            let vla_calc = self.compute_vla_size(ty2, self.loc())?;
            self.chain_expr(&mut expr, vla_calc);

            if self.sess.types.is_array(ty2) {
                // "array of T" is converted to "pointer to T" only in the
                // parameter context. For example, *argv[] becomes **argv.
                let base = self.sess.types.base(ty2).unwrap();
                ty2 = self.sess.types.pointer_to(base);
            } else if self.sess.types.is_func(ty2) {
                ty2 = self.sess.types.pointer_to(ty2);
            }

            let var_name = match &name {
                Some(t) => Some(self.get_ident(t)?),
                None => None,
            };
            params.push(self.new_lvar(var_name, ty2));
        }
        self.leave_scope();

        let f = self.sess.types.func_mut(fn_ty);
        f.params = params;
        f.is_variadic = is_variadic;
        f.scope = Some(scope);
        f.pre_calc = expr.map(Box::new);
        Ok(fn_ty)
    }

    /// K&R old-style parameters: gather the identifier list, read the
    /// per-identifier declarations that follow, then assemble the parameter
    /// list in identifier order. Small integers and floats are promoted via
    /// hidden helper locals whose assignments run on function entry.
    fn func_params_old_style(&mut self, fn_ty: TypeId) -> CResult<TypeId> {
        let start = self.pos;
        self.skip_paren()?;

        self.enter_scope();
        let scope = self.scope;
        let mut expr: Option<Expr> = None;

        while self.is_typename() {
            let basety = self.declspec(&mut None)?;
            let mut first = true;
            while self.comma_list(";", !first)? {
                first = false;
                let (mut ty, name) = self.declarator(basety, true)?;
                let Some(name) = name else {
                    return Err(self.err("expected identifier"));
                };

                let mut promoted = None;
                if self.sess.types.is_integer(ty) && self.sess.types.size(ty) < 4 {
                    promoted = Some(self.new_lvar(None, TY_INT));
                } else if matches!(self.sess.types.kind(ty), TypeKind::Float) {
                    promoted = Some(self.new_lvar(None, TY_DOUBLE));
                } else if self.sess.types.is_array(ty) {
                    let base = self.sess.types.base(ty).unwrap();
                    ty = self.sess.types.pointer_to(base);
                } else if self.sess.types.is_func(ty) {
                    ty = self.sess.types.pointer_to(ty);
                }

                let loc = name.loc();
                let ident = self.get_ident(&name)?;
                let var = self.new_lvar(Some(ident), ty);
                if let Some(promoted) = promoted {
                    self.sess.obj_mut(var).param_promoted = Some(promoted);
                    let lhs = self.var_expr(var, loc);
                    let rhs = self.var_expr(promoted, loc);
                    let assign = self.assign_expr(lhs, rhs, loc)?;
                    self.chain_expr(&mut expr, Some(assign));
                }
                let vla_calc = self.compute_vla_size(ty, loc)?;
                self.chain_expr(&mut expr, vla_calc);
            }
        }
        let body_pos = self.pos;

        // Second pass: the identifier list in order.
        self.pos = start;
        let mut params = Vec::new();
        let mut first = true;
        while self.comma_list(")", !first)? {
            first = false;
            let tok = self.advance();
            let ident = self.get_ident(&tok)?;
            let entry = self.sess.scope(scope).vars.get(&ident).cloned();
            let param = match entry {
                None => self.new_lvar(Some(ident), TY_INT),
                Some(VarScope::Var(v)) => self.sess.obj(v).param_promoted.unwrap_or(v),
                Some(_) => return Err(self.sess.error_tok(&tok, "expected a parameter name")),
            };
            params.push(param);
        }
        self.pos = body_pos;
        self.leave_scope();

        let f = self.sess.types.func_mut(fn_ty);
        f.params = params;
        f.is_oldstyle = true;
        f.scope = Some(scope);
        f.pre_calc = expr.map(Box::new);
        Ok(fn_ty)
    }

    /// Generate code for computing a VLA size. Needed even when `ty` itself
    /// is not a VLA: it may be a pointer to one (`int (*p)[n][m]`).
    pub(super) fn compute_vla_size(&mut self, ty: TypeId, loc: Loc) -> CResult<Option<Expr>> {
        if self.sess.types.vla_size_var(ty).is_some() {
            return Ok(None);
        }

        let mut node = None;
        if let Some(base) = self.sess.types.base(ty) {
            node = self.compute_vla_size(base, loc)?;
        }
        if !self.sess.types.is_vla(ty) {
            return Ok(node);
        }

        let base = self.sess.types.base(ty).unwrap();
        let base_sz = if self.sess.types.is_vla(base) {
            let sv = self.sess.types.vla_size_var(base).unwrap();
            self.var_expr(sv, loc)
        } else {
            self.num(self.sess.types.size(base), loc)
        };

        let len = match self.sess.types.kind(ty) {
            TypeKind::Vla { len, .. } => len.clone().map(|b| *b).expect("VLA without length"),
            _ => unreachable!(),
        };

        let size_var = self.new_lvar(None, TY_ULONG);
        if let TypeKind::Vla { size_var: sv, .. } = &mut self.sess.types.get_mut(ty).kind {
            *sv = Some(size_var);
        }

        let mul = self.arith_binary(BinOp::Mul, len, base_sz, loc)?;
        let lhs = self.var_expr(size_var, loc);
        let assign = self.assign_expr(lhs, mul, loc)?;
        self.chain_expr(&mut node, Some(assign));
        Ok(node)
    }

    /// The alloca that materializes a VLA's storage.
    pub(super) fn new_vla(&mut self, sz: Expr, var: crate::common::session::ObjId) -> Expr {
        let loc = sz.loc;
        let ty = self.sess.types.pointer_to(crate::common::types::TY_VOID);
        Expr::new(
            ExprKind::Alloca {
                size: Box::new(sz),
                var: Some(var),
            },
            ty,
            loc,
        )
    }
}
