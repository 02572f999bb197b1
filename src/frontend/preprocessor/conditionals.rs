//! Conditional inclusion: `#if`, `#ifdef`, `#elif`, `#else`, `#endif`.
//!
//! `#if` can be nested, so the open conditionals form a stack. Skipped
//! groups are scanned without expansion, honoring nesting. The controlling
//! expression is evaluated by a small constant-expression evaluator over
//! (value, is-unsigned) pairs after `defined(X)` is folded and leftover
//! identifiers are replaced with 0.

use std::collections::VecDeque;

use crate::common::error::{CResult, Diagnostic};
use crate::frontend::lexer::lexer::convert_pp_number;
use crate::frontend::lexer::token::{Loc, Token, TokenKind};
use crate::frontend::preprocessor::preprocessor::Preprocessor;

#[derive(Debug)]
pub struct CondIncl {
    pub loc: Loc,
    pub included: bool,
    pub in_else: bool,
}

impl<'a> Preprocessor<'a> {
    pub(super) fn push_cond(&mut self, hash: &Token, included: bool) {
        self.cond_stack.push(CondIncl {
            loc: hash.loc(),
            included,
            in_else: false,
        });
    }

    /// Skip until the next `#else`, `#elif` or `#endif` belonging to the
    /// current group. Nested conditionals are skipped whole.
    pub(super) fn skip_cond_incl(&mut self, input: &mut VecDeque<Token>) {
        let mut depth = 0usize;
        loop {
            let Some(front) = input.front() else { return };
            if front.is_eof() {
                return;
            }
            let is_hash = self.is_hash(front);
            let next_text = input.get(1).map(|t| t.text.clone()).unwrap_or_default();
            if is_hash {
                match next_text.as_str() {
                    "if" | "ifdef" | "ifndef" => {
                        depth += 1;
                        input.pop_front();
                        input.pop_front();
                        continue;
                    }
                    "endif" => {
                        if depth == 0 {
                            return;
                        }
                        depth -= 1;
                        input.pop_front();
                        input.pop_front();
                        continue;
                    }
                    "elif" | "else" => {
                        if depth == 0 {
                            return;
                        }
                        input.pop_front();
                        input.pop_front();
                        continue;
                    }
                    _ => {}
                }
            }
            input.pop_front();
        }
    }

    /// Transform a directive line for evaluation: expand macros, fold
    /// `defined X` / `defined(X)` to 0/1, and turn any remaining
    /// identifier into 0.
    fn read_const_expr(&mut self, line: Vec<Token>) -> CResult<Vec<Token>> {
        let mut input = self.with_eof(line);
        let mut out: Vec<Token> = Vec::new();
        let start_locks = self.locked.len();
        loop {
            let front_id = input.front().unwrap().id;
            self.pop_macro_lock(front_id);
            if input.front().unwrap().is_eof() {
                break;
            }
            if input.front().unwrap().is("defined") {
                let start = input.pop_front().unwrap();
                let has_paren = input.front().map_or(false, |t| t.is("("));
                if has_paren {
                    input.pop_front();
                }
                let name = input
                    .front()
                    .filter(|t| t.is_ident())
                    .cloned()
                    .ok_or_else(|| self.err(&start, "macro name must be an identifier"))?;
                input.pop_front();
                if has_paren {
                    if !input.front().map_or(false, |t| t.is(")")) {
                        return Err(self.err(&name, "expected ')'"));
                    }
                    input.pop_front();
                }
                let mut t = start;
                t.kind = TokenKind::Num;
                t.val = self.macros.contains_key(&name.text) as i64;
                t.num_ty = Some(crate::common::types::TY_INT);
                out.push(t);
                continue;
            }
            if self.expand_macro(&mut input)? {
                continue;
            }
            let mut t = input.pop_front().unwrap();
            if t.is_ident() {
                t.kind = TokenKind::Num;
                t.val = 0;
                t.num_ty = Some(crate::common::types::TY_INT);
            }
            out.push(t);
        }
        debug_assert_eq!(self.locked.len(), start_locks);
        Ok(out)
    }

    /// Read and evaluate a `#if`/`#elif` controlling expression.
    pub(super) fn eval_const_expr(
        &mut self,
        directive_tok: &Token,
        input: &mut VecDeque<Token>,
    ) -> CResult<bool> {
        let line = self.split_line(input);
        if line.is_empty() {
            return Err(self.err(directive_tok, "no expression"));
        }
        let toks = self.read_const_expr(line)?;
        if toks.is_empty() {
            return Err(self.err(directive_tok, "no expression"));
        }
        let mut ev = PpEval {
            files: &self.sess.files,
            toks: &toks,
            pos: 0,
        };
        let (val, _) = ev.conditional()?;
        if ev.pos != ev.toks.len() {
            return Err(Diagnostic::at(
                &self.sess.files,
                ev.toks[ev.pos].loc(),
                "extra token",
            ));
        }
        Ok(val != 0)
    }
}

/// Evaluator for preprocessor constant expressions. Arithmetic is carried
/// out at 64-bit width; unsignedness propagates as C's usual conversions
/// would at that width.
struct PpEval<'t> {
    files: &'t crate::common::source::SourceManager,
    toks: &'t [Token],
    pos: usize,
}

type PpVal = (i64, bool);

impl<'t> PpEval<'t> {
    fn err_here(&self, msg: &str) -> Diagnostic {
        let loc = self
            .toks
            .get(self.pos.min(self.toks.len() - 1))
            .map(|t| t.loc())
            .unwrap_or(Loc {
                file_no: 0,
                line: 1,
                col: 1,
            });
        Diagnostic::at(self.files, loc, msg)
    }

    fn peek_is(&self, s: &str) -> bool {
        self.toks.get(self.pos).map_or(false, |t| t.is(s))
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.peek_is(s) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, s: &str) -> CResult<()> {
        if self.eat(s) {
            Ok(())
        } else {
            Err(self.err_here(&format!("expected '{}'", s)))
        }
    }

    fn conditional(&mut self) -> CResult<PpVal> {
        let cond = self.logor()?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = self.conditional()?;
        self.expect(":")?;
        let els = self.conditional()?;
        Ok(if cond.0 != 0 { then } else { els })
    }

    fn logor(&mut self) -> CResult<PpVal> {
        let mut v = self.logand()?;
        while self.eat("||") {
            let r = self.logand()?;
            v = (((v.0 != 0) || (r.0 != 0)) as i64, false);
        }
        Ok(v)
    }

    fn logand(&mut self) -> CResult<PpVal> {
        let mut v = self.bitor()?;
        while self.eat("&&") {
            let r = self.bitor()?;
            v = (((v.0 != 0) && (r.0 != 0)) as i64, false);
        }
        Ok(v)
    }

    fn bitor(&mut self) -> CResult<PpVal> {
        let mut v = self.bitxor()?;
        while self.eat("|") {
            let r = self.bitxor()?;
            v = (v.0 | r.0, v.1 || r.1);
        }
        Ok(v)
    }

    fn bitxor(&mut self) -> CResult<PpVal> {
        let mut v = self.bitand()?;
        while self.eat("^") {
            let r = self.bitand()?;
            v = (v.0 ^ r.0, v.1 || r.1);
        }
        Ok(v)
    }

    fn bitand(&mut self) -> CResult<PpVal> {
        let mut v = self.equality()?;
        while self.eat("&") {
            let r = self.equality()?;
            v = (v.0 & r.0, v.1 || r.1);
        }
        Ok(v)
    }

    fn equality(&mut self) -> CResult<PpVal> {
        let mut v = self.relational()?;
        loop {
            if self.eat("==") {
                let r = self.relational()?;
                v = ((v.0 == r.0) as i64, false);
            } else if self.eat("!=") {
                let r = self.relational()?;
                v = ((v.0 != r.0) as i64, false);
            } else {
                return Ok(v);
            }
        }
    }

    fn relational(&mut self) -> CResult<PpVal> {
        let mut v = self.shift()?;
        loop {
            let (op, _) = match self
                .toks
                .get(self.pos)
                .map(|t| t.text.as_str())
            {
                Some(op @ ("<" | "<=" | ">" | ">=")) => (op.to_string(), ()),
                _ => return Ok(v),
            };
            self.pos += 1;
            let r = self.shift()?;
            let us = v.1 || r.1;
            let b = if us {
                let (a, c) = (v.0 as u64, r.0 as u64);
                match op.as_str() {
                    "<" => a < c,
                    "<=" => a <= c,
                    ">" => a > c,
                    _ => a >= c,
                }
            } else {
                match op.as_str() {
                    "<" => v.0 < r.0,
                    "<=" => v.0 <= r.0,
                    ">" => v.0 > r.0,
                    _ => v.0 >= r.0,
                }
            };
            v = (b as i64, false);
        }
    }

    fn shift(&mut self) -> CResult<PpVal> {
        let mut v = self.additive()?;
        loop {
            if self.eat("<<") {
                let r = self.additive()?;
                v = (v.0.wrapping_shl(r.0 as u32), v.1);
            } else if self.eat(">>") {
                let r = self.additive()?;
                v = if v.1 {
                    (((v.0 as u64).wrapping_shr(r.0 as u32)) as i64, true)
                } else {
                    (v.0.wrapping_shr(r.0 as u32), false)
                };
            } else {
                return Ok(v);
            }
        }
    }

    fn additive(&mut self) -> CResult<PpVal> {
        let mut v = self.multiplicative()?;
        loop {
            if self.eat("+") {
                let r = self.multiplicative()?;
                v = (v.0.wrapping_add(r.0), v.1 || r.1);
            } else if self.eat("-") {
                let r = self.multiplicative()?;
                v = (v.0.wrapping_sub(r.0), v.1 || r.1);
            } else {
                return Ok(v);
            }
        }
    }

    fn multiplicative(&mut self) -> CResult<PpVal> {
        let mut v = self.unary()?;
        loop {
            if self.eat("*") {
                let r = self.unary()?;
                v = (v.0.wrapping_mul(r.0), v.1 || r.1);
            } else if self.eat("/") || self.eat("%") {
                let is_mod = self.toks[self.pos - 1].is("%");
                let r = self.unary()?;
                if r.0 == 0 {
                    return Err(self.err_here("division by zero"));
                }
                let us = v.1 || r.1;
                let val = if us {
                    let (a, c) = (v.0 as u64, r.0 as u64);
                    if is_mod {
                        (a % c) as i64
                    } else {
                        (a / c) as i64
                    }
                } else if is_mod {
                    v.0.wrapping_rem(r.0)
                } else {
                    v.0.wrapping_div(r.0)
                };
                v = (val, us);
            } else {
                return Ok(v);
            }
        }
    }

    fn unary(&mut self) -> CResult<PpVal> {
        if self.eat("+") {
            return self.unary();
        }
        if self.eat("-") {
            let v = self.unary()?;
            return Ok((v.0.wrapping_neg(), v.1));
        }
        if self.eat("!") {
            let v = self.unary()?;
            return Ok(((v.0 == 0) as i64, false));
        }
        if self.eat("~") {
            let v = self.unary()?;
            return Ok((!v.0, v.1));
        }
        self.primary()
    }

    fn primary(&mut self) -> CResult<PpVal> {
        if self.eat("(") {
            let v = self.conditional()?;
            self.expect(")")?;
            return Ok(v);
        }
        let Some(tok) = self.toks.get(self.pos) else {
            return Err(self.err_here("expected an expression"));
        };
        let mut tok = tok.clone();
        if tok.kind == TokenKind::PpNum {
            convert_pp_number(&mut tok, self.files)?;
        }
        if tok.kind != TokenKind::Num {
            return Err(self.err_here("expected an expression"));
        }
        if tok.num_ty.map_or(false, |t| {
            matches!(
                t,
                crate::common::types::TY_FLOAT
                    | crate::common::types::TY_DOUBLE
                    | crate::common::types::TY_LDOUBLE
            )
        }) {
            return Err(self.err_here("floating constant in preprocessor expression"));
        }
        self.pos += 1;
        let unsigned = tok
            .num_ty
            .map_or(false, |t| {
                matches!(
                    t,
                    crate::common::types::TY_UINT
                        | crate::common::types::TY_ULONG
                        | crate::common::types::TY_ULLONG
                )
            });
        Ok((tok.val, unsigned))
    }
}
