//! Statement parsing.
//!
//! Break/continue targets are tracked as scoped bindings saved and restored
//! around each loop and switch. Every jump (named goto, break, continue)
//! becomes an entry in the function's goto table recording the VLA frame at
//! the jump site and at the target, so the code generator can restore
//! `%rsp` when a jump leaves VLA scopes. Named gotos are matched against
//! the label list in a second pass once the function body is complete.

use crate::common::error::CResult;
use crate::common::session::GotoTarget;
use crate::common::types::TypeKind;
use crate::frontend::lexer::token::{Loc, TokenKind};
use crate::frontend::parser::ast::{CaseRange, Stmt, StmtKind};
use crate::frontend::parser::declarations::VarAttr;
use crate::frontend::parser::parser::{GotoRec, JumpCtx, LabelRec, Parser, SwitchCtx};

impl<'a> Parser<'a> {
    /// Parse a loop body with fresh break/continue bindings.
    fn loop_body(&mut self) -> CResult<(Stmt, String, String)> {
        let brk_label = self.new_unique_name();
        let cont_label = self.new_unique_name();

        let saved_brk = self.brk.take();
        let saved_cont = self.cont.take();
        self.brk = Some(JumpCtx {
            label: brk_label.clone(),
            vla: self.current_vla,
        });
        self.cont = Some(JumpCtx {
            label: cont_label.clone(),
            vla: self.current_vla,
        });

        let body = self.stmt(true);

        self.brk = saved_brk;
        self.cont = saved_cont;
        Ok((body?, brk_label, cont_label))
    }

    fn push_goto(&mut self, target: GotoTarget) -> usize {
        let id = self.goto_table.len();
        self.goto_table.push(target);
        id
    }

    /// stmt = "return" expr? ";" | "if" ... | "switch" ... | "case" ...
    ///      | "for" ... | "while" ... | "do" ... | asm-stmt
    ///      | "goto" (ident | "*" expr) ";" | "break" ";" | "continue" ";"
    ///      | ident ":" stmt | "{" compound-stmt | expr-stmt
    ///
    /// When `chained` is false, a label or case does not absorb the
    /// following statement (the block loop reads it instead).
    pub(super) fn stmt(&mut self, chained: bool) -> CResult<Stmt> {
        let loc = self.loc();

        if self.equal("return") {
            self.advance();
            if self.consume(";") {
                return Ok(Stmt::new(StmtKind::Return(None), loc));
            }
            let e = self.expr()?;
            self.skip(";")?;

            let fn_id = self.current_fn.expect("return outside function");
            let ret_ty = self.sess.types.return_ty(self.sess.obj(fn_id).ty);
            let e = if !self.sess.types.is_struct_union(ret_ty) {
                let e = self.ptr_conv(e);
                self.new_cast(e, ret_ty)
            } else {
                e
            };
            return Ok(Stmt::new(StmtKind::Return(Some(e)), loc));
        }

        if self.equal("if") {
            self.advance();
            self.skip("(")?;
            let cond = self.expr()?;
            let cond = self.to_bool(cond);
            self.skip(")")?;
            let then = Box::new(self.stmt(true)?);
            let els = if self.consume("else") {
                Some(Box::new(self.stmt(true)?))
            } else {
                None
            };
            return Ok(Stmt::new(StmtKind::If { cond, then, els }, loc));
        }

        if self.equal("switch") {
            self.advance();
            self.skip("(")?;
            let cond = self.expr()?;
            if !self.sess.types.is_integer(cond.ty) {
                return Err(self.err("controlling expression not integer"));
            }
            self.skip(")")?;

            let brk_label = self.new_unique_name();
            let saved_switch = self.switch_ctx.take();
            let saved_brk = self.brk.take();
            self.switch_ctx = Some(SwitchCtx {
                cases: Vec::new(),
                default_label: None,
                cond_ty: cond.ty,
            });
            self.brk = Some(JumpCtx {
                label: brk_label.clone(),
                vla: self.current_vla,
            });

            let body = self.stmt(true);

            let ctx = self.switch_ctx.take().unwrap();
            self.switch_ctx = saved_switch;
            self.brk = saved_brk;

            return Ok(Stmt::new(
                StmtKind::Switch {
                    cond,
                    body: Box::new(body?),
                    cases: ctx.cases,
                    default_label: ctx.default_label,
                    brk_label,
                },
                loc,
            ));
        }

        if self.equal("case") {
            self.advance();
            if self.switch_ctx.is_none() {
                return Err(self.err_at(loc, "stray case"));
            }
            if self.current_vla != self.brk.as_ref().and_then(|b| b.vla) {
                return Err(self.err_at(loc, "jump crosses VLA initialization"));
            }

            let label = self.new_unique_name();
            let mut begin = self.const_expr()?;
            // [GNU] case ranges: "case 1 ... 5:".
            let mut end = if self.consume("...") {
                self.const_expr()?
            } else {
                begin
            };

            let cond_ty = self.switch_ctx.as_ref().unwrap().cond_ty;
            if self.sess.types.size(cond_ty) <= 4 {
                if !self.sess.types.is_unsigned(cond_ty) {
                    begin = begin as i32 as i64;
                    end = end as i32 as i64;
                } else {
                    begin = begin as u32 as i64;
                    end = end as u32 as i64;
                }
            }
            let unsigned = self.sess.types.is_unsigned(cond_ty);
            if (!unsigned && end < begin) || (unsigned && (end as u64) < begin as u64) {
                return Err(self.err_at(loc, "empty case range specified"));
            }

            self.skip(":")?;
            let body = if chained {
                Some(Box::new(self.stmt(true)?))
            } else {
                None
            };
            self.switch_ctx.as_mut().unwrap().cases.push(CaseRange {
                begin,
                end,
                label: label.clone(),
            });
            return Ok(Stmt::new(StmtKind::Case { label, body }, loc));
        }

        if self.equal("default") {
            self.advance();
            if self.switch_ctx.is_none() {
                return Err(self.err_at(loc, "stray default"));
            }
            if self.current_vla != self.brk.as_ref().and_then(|b| b.vla) {
                return Err(self.err_at(loc, "jump crosses VLA initialization"));
            }
            let label = self.new_unique_name();
            self.skip(":")?;
            let body = if chained {
                Some(Box::new(self.stmt(true)?))
            } else {
                None
            };
            self.switch_ctx.as_mut().unwrap().default_label = Some(label.clone());
            return Ok(Stmt::new(StmtKind::Case { label, body }, loc));
        }

        if self.equal("for") {
            self.advance();
            self.skip("(")?;

            let target_vla = self.current_vla;
            self.enter_tmp_scope();

            let init: Option<Box<Stmt>> = if self.is_typename() {
                let basety = self.declspec(&mut None)?;
                let e = self.declaration(basety, None)?;
                e.map(|e| Box::new(Stmt::new(StmtKind::ExprStmt(e), loc)))
            } else if self.equal("_Static_assert") {
                self.advance();
                self.static_assertion()?;
                None
            } else {
                let s = self.expr_stmt()?;
                Some(Box::new(s))
            };

            let cond = if !self.equal(";") {
                let e = self.expr()?;
                Some(self.to_bool(e))
            } else {
                None
            };
            self.skip(";")?;

            let inc = if !self.equal(")") {
                Some(self.expr()?)
            } else {
                None
            };
            self.skip(")")?;

            let (body, brk_label, cont_label) = self.loop_body()?;

            let top_vla = self.current_vla;
            self.current_vla = target_vla;
            self.leave_scope();

            return Ok(Stmt::new(
                StmtKind::For {
                    init,
                    cond,
                    inc,
                    body: Box::new(body),
                    brk_label,
                    cont_label,
                    top_vla,
                    target_vla,
                },
                loc,
            ));
        }

        if self.equal("while") {
            self.advance();
            self.skip("(")?;
            let cond = self.expr()?;
            let cond = self.to_bool(cond);
            self.skip(")")?;
            let (body, brk_label, cont_label) = self.loop_body()?;
            return Ok(Stmt::new(
                StmtKind::For {
                    init: None,
                    cond: Some(cond),
                    inc: None,
                    body: Box::new(body),
                    brk_label,
                    cont_label,
                    top_vla: None,
                    target_vla: None,
                },
                loc,
            ));
        }

        if self.equal("do") {
            self.advance();
            let (body, brk_label, cont_label) = self.loop_body()?;
            self.skip("while")?;
            self.skip("(")?;
            let cond = self.expr()?;
            let cond = self.to_bool(cond);
            self.skip(")")?;
            self.skip(";")?;
            return Ok(Stmt::new(
                StmtKind::Do {
                    body: Box::new(body),
                    cond,
                    brk_label,
                    cont_label,
                },
                loc,
            ));
        }

        if self.tok().kind == TokenKind::Keyword
            && (self.equal("asm") || self.equal("__asm") || self.equal("__asm__"))
        {
            return self.asm_stmt(loc);
        }

        if self.equal("goto") {
            if self.peek(1).is("*") {
                // [GNU] `goto *ptr` jumps to the address in `ptr`.
                self.advance();
                self.advance();
                let e = self.expr()?;
                self.skip(";")?;
                return Ok(Stmt::new(StmtKind::GotoExpr(e), loc));
            }
            self.advance();
            let name_tok = self.advance();
            let name = self.get_ident(&name_tok)?;
            self.skip(";")?;

            let unique = self.label_unique(&name);
            let id = self.push_goto(GotoTarget {
                unique_label: unique,
                top_vla: self.current_vla,
                target_vla: None,
            });
            self.gotos.push(GotoRec {
                label: name,
                loc,
                top_vla: self.current_vla,
                goto_id: id,
            });
            return Ok(Stmt::new(StmtKind::Goto { id }, loc));
        }

        if self.equal("break") {
            self.advance();
            self.skip(";")?;
            let Some(j) = self.brk.clone() else {
                return Err(self.err_at(loc, "stray break"));
            };
            let id = self.push_goto(GotoTarget {
                unique_label: j.label,
                top_vla: self.current_vla,
                target_vla: j.vla,
            });
            return Ok(Stmt::new(StmtKind::Goto { id }, loc));
        }

        if self.equal("continue") {
            self.advance();
            self.skip(";")?;
            let Some(j) = self.cont.clone() else {
                return Err(self.err_at(loc, "stray continue"));
            };
            let id = self.push_goto(GotoTarget {
                unique_label: j.label,
                top_vla: self.current_vla,
                target_vla: j.vla,
            });
            return Ok(Stmt::new(StmtKind::Goto { id }, loc));
        }

        if self.tok().is_ident() && self.peek(1).is(":") {
            let name_tok = self.advance();
            let name = self.get_ident(&name_tok)?;
            self.advance(); // ":"

            let unique = self.label_unique(&name);
            self.labels.push(LabelRec {
                label: name,
                top_vla: self.current_vla,
            });
            let body = if chained {
                Some(Box::new(self.stmt(true)?))
            } else {
                None
            };
            return Ok(Stmt::new(
                StmtKind::Label {
                    unique_label: unique,
                    body,
                },
                loc,
            ));
        }

        if self.consume("{") {
            return self.compound_stmt_body(loc);
        }

        self.expr_stmt()
    }

    /// asm-stmt = ("asm" | "__asm" | "__asm__") ("volatile" | "inline")*
    ///            "(" string-literal ")" ";"
    fn asm_stmt(&mut self, loc: Loc) -> CResult<Stmt> {
        self.advance();
        while self.equal("volatile") || self.equal("inline") {
            self.advance();
        }
        self.skip("(")?;
        let tok = self.tok().clone();
        if tok.kind != TokenKind::Str
            || tok
                .str_ty
                .and_then(|t| self.sess.types.base(t))
                .map_or(true, |b| !matches!(self.sess.types.kind(b), TypeKind::PChar))
        {
            return Err(self.err("expected string literal"));
        }
        let text = match &tok.str_data {
            Some(d) => String::from_utf8_lossy(&d[..d.len().saturating_sub(1)]).into_owned(),
            None => String::new(),
        };
        let asm = if self.peek(1).is(")") { text } else { String::new() };
        self.advance();
        self.skip_paren()?;
        self.skip(";")?;
        Ok(Stmt::new(StmtKind::Asm(asm), loc))
    }

    /// compound-stmt = (typedef | declaration | stmt)* "}"
    ///
    /// The opening brace has been consumed; this consumes the closing one.
    pub(super) fn compound_stmt_body(&mut self, loc: Loc) -> CResult<Stmt> {
        let target_vla = self.current_vla;
        self.enter_scope();

        let mut body: Vec<Stmt> = Vec::new();
        while !self.equal("}") {
            if self.tok().is_eof() {
                return Err(self.err("unexpected end of file"));
            }
            if self.equal("_Static_assert") {
                self.advance();
                self.static_assertion()?;
                continue;
            }

            // A typename token can also start a label (`T:`), so look one
            // ahead before committing to a declaration.
            if self.is_typename() && !self.peek(1).is(":") {
                let stmt_loc = self.loc();
                let mut attr = Some(VarAttr::default());
                let basety = self.declspec(&mut attr)?;
                let attr = attr.unwrap();

                if attr.is_typedef {
                    if let Some(e) = self.parse_typedef(basety)? {
                        body.push(Stmt::new(StmtKind::ExprStmt(e), stmt_loc));
                    }
                    continue;
                }
                if attr.is_extern {
                    self.global_declaration(basety, &attr)?;
                    continue;
                }
                if let Some(e) = self.declaration(basety, Some(&attr))? {
                    body.push(Stmt::new(StmtKind::ExprStmt(e), stmt_loc));
                }
                continue;
            }

            body.push(self.stmt(false)?);
        }
        self.advance(); // "}"

        let top_vla = self.current_vla;
        self.current_vla = target_vla;
        self.leave_scope();

        Ok(Stmt::new(
            StmtKind::Block {
                body,
                top_vla,
                target_vla,
            },
            loc,
        ))
    }

    /// expr-stmt = expr? ";"
    pub(super) fn expr_stmt(&mut self) -> CResult<Stmt> {
        let loc = self.loc();
        if self.consume(";") {
            return Ok(Stmt::null(loc));
        }
        let e = self.expr()?;
        self.skip(";")?;
        Ok(Stmt::new(StmtKind::ExprStmt(e), loc))
    }

    /// Match gotos (and label addresses) against the labels collected for
    /// the function, and work out each jump's VLA restore target. Gotos
    /// can refer to labels appearing later, so this can only run once the
    /// whole body has been parsed.
    pub(super) fn resolve_goto_labels(&mut self) -> CResult<()> {
        let gotos = std::mem::take(&mut self.gotos);
        let labels = std::mem::take(&mut self.labels);

        for g in &gotos {
            let Some(dest) = labels.iter().find(|l| l.label == g.label) else {
                return Err(self.err_at(g.loc, "use of undeclared label"));
            };
            if g.goto_id == usize::MAX {
                continue;
            }
            let Some(dest_vla) = dest.top_vla else {
                continue;
            };
            // The target's VLA must be live at the jump site; otherwise the
            // jump would skip its initialization.
            let mut vla = g.top_vla;
            loop {
                match vla {
                    Some(v) if v == dest_vla => break,
                    Some(v) => vla = self.sess.obj(v).vla_next,
                    None => {
                        return Err(self.err_at(g.loc, "jump crosses VLA initialization"));
                    }
                }
            }
            self.goto_table[g.goto_id].target_vla = Some(dest_vla);
        }
        Ok(())
    }
}
