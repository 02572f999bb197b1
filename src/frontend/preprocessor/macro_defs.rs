//! Macro definitions, expansion and substitution.
//!
//! Function-like argument substitution follows the C11 rules: arguments are
//! fully expanded before substitution unless they are operands of `#` or
//! `##`; `#` stringizes the raw tokens; `##` pastes and retokenizes. A
//! parameter that substitutes to nothing leaves an invisible paste-mark
//! sentinel so that a neighboring `##` still has an operand to consume.

use std::collections::VecDeque;

use crate::common::error::CResult;
use crate::frontend::lexer::lexer;
use crate::frontend::lexer::token::{Token, TokenKind};
use crate::frontend::preprocessor::builtin_macros::Builtin;
use crate::frontend::preprocessor::preprocessor::Preprocessor;

#[derive(Debug, Clone)]
pub struct MacroDef {
    pub is_objlike: bool,
    pub is_locked: bool,
    pub params: Vec<String>,
    pub va_args_name: Option<String>,
    /// Body tokens, without a terminator.
    pub body: Vec<Token>,
    pub handler: Option<Builtin>,
}

#[derive(Debug)]
pub(super) struct MacroArg {
    pub name: String,
    pub is_va_args: bool,
    /// The variadic argument was empty, enabling `, ##__VA_ARGS__` elision.
    pub omit_comma: bool,
    /// Raw (unexpanded) argument tokens.
    pub toks: Vec<Token>,
    /// Cache of the fully macro-expanded argument.
    pub expanded: Option<Vec<Token>>,
}

impl<'a> Preprocessor<'a> {
    pub fn define_macro(&mut self, name: &str, body_text: &str) {
        let toks = lexer::tokenize_fragment(self.sess, "<built-in>", body_text)
            .expect("built-in macro body must tokenize");
        let mut body = toks;
        body.pop(); // EOF
        self.macros.insert(
            name.to_string(),
            MacroDef {
                is_objlike: true,
                is_locked: false,
                params: Vec::new(),
                va_args_name: None,
                body,
                handler: None,
            },
        );
    }

    pub fn undef_macro(&mut self, name: &str) {
        self.macros.remove(name);
    }

    pub(super) fn add_builtin(&mut self, name: &str, handler: Builtin) {
        self.macros.insert(
            name.to_string(),
            MacroDef {
                is_objlike: true,
                is_locked: false,
                params: Vec::new(),
                va_args_name: None,
                body: Vec::new(),
                handler: Some(handler),
            },
        );
    }

    /// `#define NAME body` / `#define NAME(params) body`, given the
    /// directive's remaining line.
    pub(super) fn read_macro_definition(&mut self, line: Vec<Token>) -> CResult<()> {
        let Some(name_tok) = line.first().cloned() else {
            return Err(crate::common::error::Diagnostic::plain("macro name missing"));
        };
        if !name_tok.is_ident() {
            return Err(self.err(&name_tok, "macro name must be an identifier"));
        }
        let name = name_tok.text.clone();

        let funclike = line.get(1).map_or(false, |t| t.is("(") && !t.has_space);
        if !funclike {
            let body = line[1..].to_vec();
            self.macros.insert(
                name,
                MacroDef {
                    is_objlike: true,
                    is_locked: false,
                    params: Vec::new(),
                    va_args_name: None,
                    body,
                    handler: None,
                },
            );
            return Ok(());
        }

        let mut params = Vec::new();
        let mut va_args_name = None;
        let mut i = 2;
        if line.get(i).map_or(false, |t| t.is(")")) {
            i += 1;
        } else {
            loop {
                let Some(tok) = line.get(i) else {
                    return Err(self.err(&name_tok, "unterminated macro parameter list"));
                };
                if tok.is("...") {
                    va_args_name = Some("__VA_ARGS__".to_string());
                    i += 1;
                    if !line.get(i).map_or(false, |t| t.is(")")) {
                        return Err(self.err(tok, "expected ')'"));
                    }
                    i += 1;
                    break;
                }
                if !tok.is_ident() {
                    return Err(self.err(tok, "expected an identifier"));
                }
                // [GNU] `name...` names the variadic parameter.
                if line.get(i + 1).map_or(false, |t| t.is("...")) {
                    va_args_name = Some(tok.text.clone());
                    i += 2;
                    if !line.get(i).map_or(false, |t| t.is(")")) {
                        return Err(self.err(tok, "expected ')'"));
                    }
                    i += 1;
                    break;
                }
                params.push(tok.text.clone());
                i += 1;
                if line.get(i).map_or(false, |t| t.is(",")) {
                    i += 1;
                    continue;
                }
                if line.get(i).map_or(false, |t| t.is(")")) {
                    i += 1;
                    break;
                }
                return Err(self.err(tok, "expected ',' or ')'"));
            }
        }

        let body = line[i..].to_vec();
        self.macros.insert(
            name,
            MacroDef {
                is_objlike: false,
                is_locked: false,
                params,
                va_args_name,
                body,
                handler: None,
            },
        );
        Ok(())
    }

    /// If the front of `input` is an expandable macro, expand it in place
    /// and return true.
    pub(super) fn expand_macro(&mut self, input: &mut VecDeque<Token>) -> CResult<bool> {
        let tok = input.front().unwrap();
        if tok.dont_expand || !tok.is_ident() {
            return Ok(false);
        }
        let name = tok.text.clone();
        let (is_locked, handler, is_objlike) = match self.macros.get(&name) {
            Some(m) => (m.is_locked, m.handler, m.is_objlike),
            None => return Ok(false),
        };
        if is_locked {
            input.front_mut().unwrap().dont_expand = true;
            return Ok(false);
        }
        if let Some(b) = handler {
            self.expand_builtin(b, input)?;
            return Ok(true);
        }
        // A funclike macro name not followed by an argument list is an
        // ordinary identifier.
        if !is_objlike && !input.get(1).map_or(false, |t| t.is("(")) {
            return Ok(false);
        }

        let invocation = input.pop_front().unwrap();
        let orig = invocation
            .origin
            .unwrap_or((invocation.file_no, invocation.line));

        let (mut body, stop_id) = if is_objlike {
            let raw = self.macros[&name].body.clone();
            let processed = self.insert_objlike(&invocation, &raw, orig)?;
            (processed, input.front().unwrap().id)
        } else {
            let params = self.macros[&name].params.clone();
            let va_name = self.macros[&name].va_args_name.clone();
            let region = self.collect_funclike_args(&invocation, input)?;
            let stop_id = input.front().unwrap().id;
            let mut args =
                self.read_macro_args(&invocation, &region, &params, va_name)?;
            let raw = self.macros[&name].body.clone();
            let substituted = self.subst(&raw, &mut args)?;
            let processed = self.insert_funclike(substituted, orig);
            (processed, stop_id)
        };

        if body.is_empty() {
            // An empty expansion transfers its spacing to the stop token.
            let front = input.front_mut().unwrap();
            front.at_bol |= invocation.at_bol;
            front.has_space |= invocation.has_space;
        } else {
            body[0].at_bol = invocation.at_bol;
            body[0].has_space = invocation.has_space;
            self.push_macro_lock(&name, stop_id);
            for t in body.into_iter().rev() {
                input.push_front(t);
            }
        }
        Ok(true)
    }

    /// Object-like bodies only need `##` handling and origin stamping.
    fn insert_objlike(
        &mut self,
        invocation: &Token,
        body: &[Token],
        orig: (usize, u32),
    ) -> CResult<Vec<Token>> {
        let mut cur: Vec<Token> = Vec::new();
        let mut i = 0;
        while i < body.len() {
            if body[i].is("##") {
                if cur.is_empty() || i + 1 >= body.len() {
                    return Err(
                        self.err(invocation, "'##' cannot appear at either end of macro expansion")
                    );
                }
                let pasted = self.paste(cur.last().unwrap(), &body[i + 1])?;
                *cur.last_mut().unwrap() = pasted;
                i += 2;
            } else {
                cur.push(self.copy_tok(&body[i]));
                i += 1;
            }
        }
        for t in &mut cur {
            t.origin = Some(orig);
        }
        Ok(cur)
    }

    /// Strip paste-marks and stamp origins on a substituted body.
    fn insert_funclike(&mut self, body: Vec<Token>, orig: (usize, u32)) -> Vec<Token> {
        let mut out: Vec<Token> = body
            .into_iter()
            .filter(|t| t.kind != TokenKind::PasteMark)
            .collect();
        for t in &mut out {
            t.origin = Some(orig);
        }
        out
    }

    /// Scan the parenthesized argument region off the input, applying lock
    /// bookkeeping to each scanned token and processing any directives that
    /// appear inside the list (when no expansion is in flight). The
    /// returned region includes the closing parenthesis.
    pub(super) fn collect_funclike_args(
        &mut self,
        invocation: &Token,
        input: &mut VecDeque<Token>,
    ) -> CResult<Vec<Token>> {
        let lparen = input.pop_front().unwrap();
        self.pop_macro_lock(lparen.id);

        let mut region: Vec<Token> = Vec::new();
        let mut lvl = 0;
        loop {
            if input.front().map_or(true, |t| t.is_eof()) {
                return Err(self.err(invocation, "unterminated list"));
            }
            if self.locked.is_empty() && self.is_hash(input.front().unwrap()) {
                let hash = input.pop_front().unwrap();
                self.directive(&hash, input, &mut region)?;
                continue;
            }
            if !self.locked.is_empty() {
                let id = input.front().unwrap().id;
                self.pop_macro_lock(id);
                let front = input.front().unwrap();
                if front.is_ident() {
                    if let Some(m) = self.macros.get(&front.text) {
                        if m.is_locked {
                            input.front_mut().unwrap().dont_expand = true;
                        }
                    }
                }
            }
            let t = input.pop_front().unwrap();
            let is_l = t.is("(");
            let is_r = t.is(")");
            region.push(t);
            if lvl == 0 && is_r {
                break;
            }
            if is_l {
                lvl += 1;
            } else if is_r {
                lvl -= 1;
            }
        }
        Ok(region)
    }

    /// One actual argument: tokens up to an unnested `,` (or the closing
    /// `)`; a variadic tail takes everything up to the `)`).
    fn read_one_arg(
        &mut self,
        region: &[Token],
        idx: &mut usize,
        read_rest: bool,
    ) -> CResult<Vec<Token>> {
        let mut out = Vec::new();
        let mut level = 0;
        loop {
            let Some(tok) = region.get(*idx) else {
                break;
            };
            if level == 0 && tok.is(")") {
                break;
            }
            if level == 0 && !read_rest && tok.is(",") {
                break;
            }
            if tok.is("(") {
                level += 1;
            } else if tok.is(")") {
                level -= 1;
            }
            out.push(self.copy_tok(tok));
            *idx += 1;
        }
        Ok(out)
    }

    fn read_macro_args(
        &mut self,
        invocation: &Token,
        region: &[Token],
        params: &[String],
        va_name: Option<String>,
    ) -> CResult<Vec<MacroArg>> {
        let mut idx = 0;
        let mut args: Vec<MacroArg> = Vec::new();

        for (i, p) in params.iter().enumerate() {
            if i > 0 {
                if !region.get(idx).map_or(false, |t| t.is(",")) {
                    return Err(self.err(invocation, "too few arguments"));
                }
                idx += 1;
            }
            let toks = self.read_one_arg(region, &mut idx, false)?;
            args.push(MacroArg {
                name: p.clone(),
                is_va_args: false,
                omit_comma: false,
                toks,
                expanded: None,
            });
        }

        if let Some(va) = va_name {
            let omit_comma = region.get(idx).map_or(false, |t| t.is(")"));
            if !omit_comma && !params.is_empty() {
                if !region.get(idx).map_or(false, |t| t.is(",")) {
                    return Err(self.err(invocation, "too few arguments"));
                }
                idx += 1;
            }
            let toks = self.read_one_arg(region, &mut idx, true)?;
            args.push(MacroArg {
                name: va,
                is_va_args: true,
                omit_comma,
                toks,
                expanded: None,
            });
        } else if !params.is_empty() {
            if !region.get(idx).map_or(false, |t| t.is(")")) {
                return Err(self.err(invocation, "too many arguments"));
            }
        } else {
            // A macro with no named parameters still accepts an empty list.
            let mut j = idx;
            while region.get(j).map_or(false, |t| !t.is(")")) {
                j += 1;
            }
            if j != idx {
                return Err(self.err(invocation, "too many arguments"));
            }
        }
        Ok(args)
    }

    fn find_named_arg(args: &[MacroArg], tok: &Token) -> Option<usize> {
        if !tok.is_ident() {
            return None;
        }
        args.iter().position(|a| a.name == tok.text)
    }

    /// Resolve `body[i]` as a macro parameter (or a `__VA_OPT__(...)`
    /// group, which behaves like a synthetic parameter). Returns the arg
    /// index and the body index just past it.
    fn find_arg(
        &mut self,
        body: &[Token],
        i: usize,
        args: &mut Vec<MacroArg>,
    ) -> CResult<Option<(usize, usize)>> {
        let Some(tok) = body.get(i) else {
            return Ok(None);
        };
        if let Some(pos) = Self::find_named_arg(args, tok) {
            return Ok(Some((pos, i + 1)));
        }

        // __VA_OPT__(x) expands to parameter-substituted x iff the expanded
        // variadic argument is non-empty.
        if tok.is("__VA_OPT__") && body.get(i + 1).map_or(false, |t| t.is("(")) {
            let mut j = i + 2;
            let group = self.read_one_arg(body, &mut j, true)?;
            if !body.get(j).map_or(false, |t| t.is(")")) {
                return Err(self.err(tok, "unterminated __VA_OPT__"));
            }
            let va_idx = args.iter().position(|a| a.is_va_args);
            let toks = match va_idx {
                Some(vi) if !self.expand_arg(vi, args)?.is_empty() => self.subst(&group, args)?,
                _ => Vec::new(),
            };
            args.push(MacroArg {
                name: String::new(),
                is_va_args: false,
                omit_comma: false,
                expanded: Some(toks.clone()),
                toks,
            });
            return Ok(Some((args.len() - 1, j + 1)));
        }
        Ok(None)
    }

    /// The fully expanded form of an argument, computed once.
    fn expand_arg(&mut self, ai: usize, args: &mut Vec<MacroArg>) -> CResult<Vec<Token>> {
        if let Some(e) = &args[ai].expanded {
            return Ok(e.clone());
        }
        let toks = args[ai].toks.clone();
        let before = self.locked.len();
        let out = self.expand_token_list(toks)?;
        debug_assert_eq!(self.locked.len(), before);
        args[ai].expanded = Some(out.clone());
        Ok(out)
    }

    /// Replace parameters in a macro body with the given arguments.
    pub(super) fn subst(
        &mut self,
        body: &[Token],
        args: &mut Vec<MacroArg>,
    ) -> CResult<Vec<Token>> {
        let mut cur: Vec<Token> = Vec::new();
        let mut i = 0;

        while i < body.len() {
            let tok = &body[i];

            // "#" followed by a parameter becomes the stringized actuals.
            if tok.is("#") {
                let Some((ai, ni)) = self.find_arg(body, i + 1, args)? else {
                    return Err(self.err(tok, "'#' is not followed by a macro parameter"));
                };
                let arg_toks = args[ai].toks.clone();
                let mut s = self.stringize(tok, &arg_toks)?;
                s.at_bol = tok.at_bol;
                s.has_space = tok.has_space;
                cur.push(s);
                i = ni;
                continue;
            }

            // [GNU] `,##__VA_ARGS__` drops the comma when the variadic
            // argument is empty.
            if tok.is(",") && body.get(i + 1).map_or(false, |t| t.is("##")) {
                if let Some(ai) = body.get(i + 2).and_then(|t| Self::find_named_arg(args, t)) {
                    if args[ai].is_va_args {
                        if args[ai].omit_comma {
                            i += 3;
                            continue;
                        }
                        cur.push(self.copy_tok(tok));
                        i += 2;
                        continue;
                    }
                }
            }

            if tok.is("##") {
                if cur.is_empty() {
                    return Err(self.err(tok, "'##' cannot appear at start of macro expansion"));
                }
                if i + 1 >= body.len() {
                    return Err(self.err(tok, "'##' cannot appear at end of macro expansion"));
                }
                // A paste-mark absorbs the paste; the right operand is then
                // handled as an ordinary token.
                if cur.last().unwrap().kind == TokenKind::PasteMark {
                    i += 1;
                    continue;
                }
                if let Some((ai, ni)) = self.find_arg(body, i + 1, args)? {
                    let toks = args[ai].toks.clone();
                    if toks.is_empty() {
                        i = ni;
                        continue;
                    }
                    if toks[0].kind != TokenKind::PasteMark {
                        let pasted = self.paste(cur.last().unwrap(), &toks[0])?;
                        *cur.last_mut().unwrap() = pasted;
                    }
                    for t in &toks[1..] {
                        cur.push(self.copy_tok(t));
                    }
                    i = ni;
                    continue;
                }
                let pasted = self.paste(cur.last().unwrap(), &body[i + 1])?;
                *cur.last_mut().unwrap() = pasted;
                i += 2;
                continue;
            }

            if let Some((ai, ni)) = self.find_arg(body, i, args)? {
                // An argument that is the left operand of `##` substitutes
                // raw; otherwise it substitutes fully expanded.
                let next_is_paste = body.get(ni).map_or(false, |t| t.is("##"));
                let toks = if next_is_paste {
                    args[ai].toks.clone()
                } else {
                    self.expand_arg(ai, args)?
                };
                if toks.is_empty() {
                    cur.push(self.new_pmark(tok));
                    i = ni;
                    continue;
                }
                let mut first = true;
                for t in &toks {
                    let mut c = self.copy_tok(t);
                    if first {
                        c.at_bol = tok.at_bol;
                        c.has_space = tok.has_space;
                        first = false;
                    }
                    cur.push(c);
                }
                i = ni;
                continue;
            }

            cur.push(self.copy_tok(tok));
            i += 1;
        }
        Ok(cur)
    }

    fn new_pmark(&mut self, tmpl: &Token) -> Token {
        let mut t = self.copy_tok(tmpl);
        t.kind = TokenKind::PasteMark;
        t.text = String::new();
        t
    }

    /// Concatenate token texts with single spaces where the source had
    /// whitespace, escaping `\` and `"` inside string and number tokens.
    pub(super) fn join_tokens(toks: &[Token], add_slash: bool) -> String {
        let mut buf = String::new();
        for t in toks {
            if t.kind == TokenKind::PasteMark {
                continue;
            }
            if (t.has_space || t.at_bol) && !buf.is_empty() {
                buf.push(' ');
            }
            if add_slash
                && matches!(t.kind, TokenKind::Str | TokenKind::Num | TokenKind::PpNum)
            {
                for c in t.text.chars() {
                    if c == '\\' || c == '"' {
                        buf.push('\\');
                    }
                    buf.push(c);
                }
            } else {
                buf.push_str(&t.text);
            }
        }
        buf
    }

    /// The stringizing operator: a double-quoted string token.
    fn stringize(&mut self, hash: &Token, toks: &[Token]) -> CResult<Token> {
        let joined = Self::join_tokens(toks, true);
        let quoted = format!("\"{}\"", joined);
        let name = self.sess.files.get(hash.file_no).name.clone();
        let mut frag = lexer::tokenize_fragment(self.sess, &name, &quoted)?;
        let mut tok = frag.remove(0);
        tok.line = hash.line;
        tok.col = hash.col;
        Ok(tok)
    }

    /// Concatenate two tokens and retokenize; the result must be exactly
    /// one token.
    fn paste(&mut self, lhs: &Token, rhs: &Token) -> CResult<Token> {
        let buf = format!("{}{}", lhs.text, rhs.text);
        let name = self.sess.files.get(lhs.file_no).name.clone();
        let frag = lexer::tokenize_fragment(self.sess, &name, &buf);
        let ok = match &frag {
            Ok(toks) => toks.len() == 2,
            Err(_) => false,
        };
        if !ok {
            return Err(self.err(
                lhs,
                &format!("pasting forms '{}', an invalid token", buf),
            ));
        }
        let mut tok = frag.unwrap().remove(0);
        tok.at_bol = lhs.at_bol;
        tok.has_space = lhs.has_space;
        tok.line = lhs.line;
        tok.col = lhs.col;
        tok.file_no = lhs.file_no;
        Ok(tok)
    }
}
