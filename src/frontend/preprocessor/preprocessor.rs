//! The macro-expansion engine and directive processor.
//!
//! The preprocessor takes a token list and returns a new token list with all
//! macros expanded and directives consumed.
//!
//! The expansion language guarantees termination even for recursive macros:
//! a macro is applied at most once per token. If T is defined as U and U as
//! T, then T expands to U, U back to T, and expansion stops there. To get
//! that behavior, an expanding macro is locked until the token that
//! immediately follows its full expansion (the "stop token") is reached.
//! Locked macros form a LIFO stack: inner expansions always finish first,
//! so only the latest entries need checking for unlock.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::common::error::{CResult, Diagnostic};
use crate::common::session::Session;
use crate::driver::cli::Options;
use crate::frontend::lexer::lexer;
use crate::frontend::lexer::token::{is_keyword_str, Token, TokenKind};
use crate::frontend::preprocessor::conditionals::CondIncl;
use crate::frontend::preprocessor::macro_defs::MacroDef;

pub struct Preprocessor<'a> {
    pub(super) sess: &'a mut Session,
    pub(super) opts: &'a Options,
    pub(super) macros: HashMap<String, MacroDef>,
    /// Stack of (macro name, stop-token id).
    pub(super) locked: Vec<(String, u32)>,
    pub(super) cond_stack: Vec<CondIncl>,
    pub(super) pragma_once: HashSet<String>,
    /// path -> guard macro name, learned from `#ifndef`-wrapped files.
    pub(super) include_guards: HashMap<String, String>,
    /// filename -> (resolved path, search-path index) cache.
    pub(super) include_cache: HashMap<String, (String, usize)>,
    pub(super) counter: i64,
    pub(super) base_file: String,
}

impl<'a> Preprocessor<'a> {
    pub fn new(sess: &'a mut Session, opts: &'a Options, base_file: &str) -> Preprocessor<'a> {
        let mut pp = Preprocessor {
            sess,
            opts,
            macros: HashMap::new(),
            locked: Vec::new(),
            cond_stack: Vec::new(),
            pragma_once: HashSet::new(),
            include_guards: HashMap::new(),
            include_cache: HashMap::new(),
            counter: 0,
            base_file: base_file.to_string(),
        };
        pp.init_macros();
        for (name, val) in &opts.defines {
            pp.define_macro(name, val);
        }
        for name in &opts.undefs {
            pp.undef_macro(name);
        }
        pp
    }

    pub(super) fn err(&self, tok: &Token, msg: &str) -> Diagnostic {
        Diagnostic::at(&self.sess.files, tok.loc(), msg)
    }

    pub(super) fn is_hash(&self, tok: &Token) -> bool {
        tok.at_bol && tok.is("#")
    }

    /// Entry point. Expands everything, then (unless `-E`) runs the
    /// post-pass: attribute collection, keyword re-tagging and adjacent
    /// string-literal concatenation.
    pub fn run(&mut self, mut toks: Vec<Token>) -> CResult<Vec<Token>> {
        // -include files are spliced in front of the main file.
        for inc in self.opts.includes.iter().rev() {
            let contents = std::fs::read_to_string(inc)
                .map_err(|e| Diagnostic::plain(&format!("{}: {}", inc, e)))?;
            let mut pre = lexer::tokenize(self.sess, inc, contents, true)?;
            pre.pop(); // drop its EOF
            pre.extend(toks);
            toks = pre;
        }

        let mut input: VecDeque<Token> = toks.into();
        let mut out = Vec::new();
        self.process_stream(&mut input, &mut out)?;
        out.push(input.pop_front().unwrap()); // the EOF

        if let Some(ci) = self.cond_stack.last() {
            return Err(Diagnostic::at(
                &self.sess.files,
                ci.loc,
                "unterminated conditional directive",
            ));
        }

        if self.opts.opt_e {
            return Ok(out);
        }
        self.postprocess(out)
    }

    /// Visit all tokens while evaluating macros and directives.
    fn process_stream(&mut self, input: &mut VecDeque<Token>, out: &mut Vec<Token>) -> CResult<()> {
        let start_locks = self.locked.len();
        loop {
            let front_id = input.front().expect("EOF sentinel").id;
            self.pop_macro_lock(front_id);
            if input.front().unwrap().is_eof() {
                break;
            }
            if self.expand_macro(input)? {
                continue;
            }
            let tok = input.front().unwrap();
            if self.is_hash(tok) && self.locked.is_empty() {
                let hash = input.pop_front().unwrap();
                self.directive(&hash, input, out)?;
                continue;
            }
            out.push(input.pop_front().unwrap());
        }
        debug_assert_eq!(self.locked.len(), start_locks);
        Ok(())
    }

    /// Expand-only loop used for macro arguments and `#if` lines.
    pub(super) fn expand_token_list(&mut self, toks: Vec<Token>) -> CResult<Vec<Token>> {
        let mut input = self.with_eof(toks);
        let mut out = Vec::new();
        loop {
            let front_id = input.front().unwrap().id;
            self.pop_macro_lock(front_id);
            if input.front().unwrap().is_eof() {
                break;
            }
            if self.expand_macro(&mut input)? {
                continue;
            }
            out.push(input.pop_front().unwrap());
        }
        Ok(out)
    }

    /// Append an EOF sentinel so deque loops always see a terminator.
    pub(super) fn with_eof(&mut self, toks: Vec<Token>) -> VecDeque<Token> {
        let mut dq: VecDeque<Token> = toks.into();
        let tmpl = dq.back().cloned();
        let id = self.sess.next_tok_id();
        let mut eof = match tmpl {
            Some(t) => {
                let mut e = t;
                e.kind = TokenKind::Eof;
                e.text = String::new();
                e.id = id;
                e
            }
            None => Token::new(TokenKind::Eof, String::new(), id, 0, 1, 1),
        };
        eof.at_bol = true;
        dq.push_back(eof);
        dq
    }

    pub(super) fn pop_macro_lock(&mut self, tok_id: u32) {
        while let Some((name, stop)) = self.locked.last() {
            if *stop != tok_id {
                break;
            }
            if let Some(m) = self.macros.get_mut(name) {
                m.is_locked = false;
            }
            self.locked.pop();
        }
    }

    pub(super) fn push_macro_lock(&mut self, name: &str, stop: u32) {
        if let Some(m) = self.macros.get_mut(name) {
            m.is_locked = true;
        }
        self.locked.push((name.to_string(), stop));
    }

    /// Copy a token with a fresh identity.
    pub(super) fn copy_tok(&mut self, tok: &Token) -> Token {
        let mut t = tok.clone();
        t.id = self.sess.next_tok_id();
        t
    }

    /// Some directives allow extraneous tokens before the newline; warn and
    /// skip them.
    pub(super) fn skip_line(&mut self, input: &mut VecDeque<Token>) {
        if input.front().map_or(true, |t| t.at_bol || t.is_eof()) {
            return;
        }
        let tok = input.front().unwrap();
        let file = self.sess.files.get(tok.file_no);
        eprintln!("{}:{}:{}: warning: extra token", file.name, tok.line, tok.col);
        while input.front().map_or(false, |t| !t.at_bol && !t.is_eof()) {
            input.pop_front();
        }
    }

    /// Pop tokens up to the next newline into an EOF-free vector.
    pub(super) fn split_line(&mut self, input: &mut VecDeque<Token>) -> Vec<Token> {
        let mut line = Vec::new();
        while input.front().map_or(false, |t| !t.at_bol && !t.is_eof()) {
            line.push(input.pop_front().unwrap());
        }
        line
    }

    pub(super) fn directive(
        &mut self,
        hash: &Token,
        input: &mut VecDeque<Token>,
        out: &mut Vec<Token>,
    ) -> CResult<()> {
        // A `#`-only line is legal. It's called a null directive.
        if input.front().map_or(true, |t| t.at_bol || t.is_eof()) {
            return Ok(());
        }
        let tok = input.front().unwrap().clone();

        // `# 42 "file"` line markers.
        if tok.kind == TokenKind::PpNum {
            let line = self.split_line(input);
            return self.read_line_marker(hash, line);
        }

        if tok.kind != TokenKind::Ident && tok.kind != TokenKind::Keyword {
            return Err(self.err(&tok, "invalid preprocessor directive"));
        }

        match tok.text.as_str() {
            "include" => {
                input.pop_front();
                let line = self.split_line(input);
                self.do_include(hash, line, input, false)
            }
            "include_next" => {
                input.pop_front();
                let line = self.split_line(input);
                self.do_include(hash, line, input, true)
            }
            "define" => {
                input.pop_front();
                let line = self.split_line(input);
                self.read_macro_definition(line)
            }
            "undef" => {
                input.pop_front();
                let name = input.front().cloned();
                match name {
                    Some(t) if t.is_ident() => {
                        input.pop_front();
                        self.undef_macro(&t.text);
                        self.skip_line(input);
                        Ok(())
                    }
                    Some(t) => Err(self.err(&t, "macro name must be an identifier")),
                    None => Err(self.err(hash, "macro name must be an identifier")),
                }
            }
            "if" => {
                input.pop_front();
                let val = self.eval_const_expr(&tok, input)?;
                self.push_cond(hash, val);
                if !val {
                    self.skip_cond_incl(input);
                }
                Ok(())
            }
            "ifdef" | "ifndef" => {
                let neg = tok.text == "ifndef";
                input.pop_front();
                let name = input
                    .front()
                    .filter(|t| t.is_ident())
                    .cloned()
                    .ok_or_else(|| self.err(&tok, "macro name must be an identifier"))?;
                input.pop_front();
                let defined = self.macros.contains_key(&name.text);
                let included = defined != neg;
                self.push_cond(hash, included);
                self.skip_line(input);
                if !included {
                    self.skip_cond_incl(input);
                }
                Ok(())
            }
            "elif" => {
                input.pop_front();
                if self.cond_stack.last().map_or(true, |c| c.in_else) {
                    return Err(self.err(hash, "stray #elif"));
                }
                let already = self.cond_stack.last().unwrap().included;
                if !already && self.eval_const_expr(&tok, input)? {
                    self.cond_stack.last_mut().unwrap().included = true;
                } else {
                    // The line still has to be consumed when skipped.
                    if already {
                        self.split_line(input);
                    }
                    self.skip_cond_incl(input);
                }
                Ok(())
            }
            "else" => {
                input.pop_front();
                if self.cond_stack.last().map_or(true, |c| c.in_else) {
                    return Err(self.err(hash, "stray #else"));
                }
                self.cond_stack.last_mut().unwrap().in_else = true;
                self.skip_line(input);
                if self.cond_stack.last().unwrap().included {
                    self.skip_cond_incl(input);
                }
                Ok(())
            }
            "endif" => {
                input.pop_front();
                if self.cond_stack.pop().is_none() {
                    return Err(self.err(hash, "stray #endif"));
                }
                self.skip_line(input);
                Ok(())
            }
            "line" => {
                input.pop_front();
                let line = self.split_line(input);
                self.read_line_marker(hash, line)
            }
            "pragma" => {
                input.pop_front();
                if input.front().map_or(false, |t| t.is("once") && !t.at_bol) {
                    let path = self.sess.files.get(hash.file_no).name.clone();
                    self.pragma_once.insert(path);
                    input.pop_front();
                    self.skip_line(input);
                    return Ok(());
                }
                if self.opts.opt_e {
                    // Pass the pragma through to the output.
                    out.push(hash.clone());
                    out.extend(self.split_line(input));
                } else {
                    self.split_line(input);
                }
                Ok(())
            }
            "error" => Err(self.err(hash, "error")),
            "warning" => {
                input.pop_front();
                let file = self.sess.files.get(hash.file_no);
                eprintln!("{}:{}: warning: warning", file.name, hash.line);
                self.split_line(input);
                Ok(())
            }
            _ => Err(self.err(&tok, "invalid preprocessor directive")),
        }
    }

    /// `#line N ["file"]` and `# N ["file"]`: adjust the display line/file.
    fn read_line_marker(&mut self, hash: &Token, line: Vec<Token>) -> CResult<()> {
        let line = self.expand_token_list(line)?;
        let mut it = line.into_iter();
        let mut num = it
            .next()
            .ok_or_else(|| self.err(hash, "invalid line marker"))?;
        lexer::convert_pp_number(&mut num, &self.sess.files)?;
        if num.kind != TokenKind::Num || num.num_ty != Some(crate::common::types::TY_INT) {
            return Err(self.err(&num, "invalid line marker"));
        }
        let file = self.sess.files.get_mut(hash.file_no);
        file.line_delta = num.val - hash.line as i64 - 1;

        if let Some(name_tok) = it.next() {
            if name_tok.kind != TokenKind::Str {
                return Err(self.err(&name_tok, "filename expected"));
            }
            let name: String = name_tok
                .str_data
                .as_ref()
                .map(|d| {
                    d[..d.len().saturating_sub(1)]
                        .iter()
                        .map(|&b| b as char)
                        .collect()
                })
                .unwrap_or_default();
            self.sess.files.get_mut(hash.file_no).display_name = Some(name);
        }
        Ok(())
    }

    /// Post-pass: `__attribute__` collection, keyword re-tagging, string
    /// literal concatenation.
    fn postprocess(&mut self, toks: Vec<Token>) -> CResult<Vec<Token>> {
        let mut out: Vec<Token> = Vec::with_capacity(toks.len());
        let mut pending_attrs: Vec<String> = Vec::new();
        let mut i = 0;

        while i < toks.len() {
            let tok = &toks[i];
            if tok.is_eof() {
                out.push(tok.clone());
                break;
            }

            if tok.is_ident() && (tok.text == "__attribute__" || tok.text == "__attribute") {
                i += 1;
                for _ in 0..2 {
                    if !toks.get(i).map_or(false, |t| t.is("(")) {
                        return Err(self.err(tok, "expected '(('"));
                    }
                    i += 1;
                }
                let mut level = 0;
                let mut list: Vec<&Token> = Vec::new();
                while i < toks.len() {
                    let t = &toks[i];
                    if level == 0 && t.is(")") {
                        break;
                    }
                    if t.is("(") {
                        level += 1;
                    } else if t.is(")") {
                        level -= 1;
                    }
                    list.push(t);
                    i += 1;
                }
                if !toks.get(i).map_or(false, |t| t.is(")"))
                    || !toks.get(i + 1).map_or(false, |t| t.is(")"))
                {
                    return Err(self.err(tok, "expected '))'"));
                }
                i += 2;
                // Recognized attributes attach to the next real token.
                for t in &list {
                    if t.is_ident() && (t.text == "packed" || t.text == "__packed__") {
                        pending_attrs.push("packed".to_string());
                    }
                }
                continue;
            }

            let mut tok = tok.clone();
            if tok.is_ident() && is_keyword_str(&tok.text) {
                tok.kind = TokenKind::Keyword;
            }
            tok.attrs = std::mem::take(&mut pending_attrs);

            // Adjacent string literals concatenate, widening narrow
            // literals when they meet wide ones.
            if tok.kind == TokenKind::Str
                && toks.get(i + 1).map_or(false, |t| t.kind == TokenKind::Str)
            {
                let mut group = vec![tok.clone()];
                let mut j = i + 1;
                while toks.get(j).map_or(false, |t| t.kind == TokenKind::Str) {
                    group.push(toks[j].clone());
                    j += 1;
                }
                tok = self.join_string_literals(&group)?;
                i = j;
                out.push(tok);
                continue;
            }

            out.push(tok);
            i += 1;
        }
        Ok(out)
    }

    fn string_kind(text: &str) -> &'static str {
        if text.starts_with("u8") {
            "u8"
        } else if text.starts_with('u') {
            "u"
        } else if text.starts_with('U') {
            "U"
        } else if text.starts_with('L') {
            "L"
        } else {
            ""
        }
    }

    fn join_string_literals(&mut self, group: &[Token]) -> CResult<Token> {
        // Mixing two different wide kinds is not supported; regular
        // literals are converted to the wide kind.
        let mut kind = "";
        for t in group {
            let k = Self::string_kind(&t.text);
            if k == "" || k == "u8" {
                continue;
            }
            if kind.is_empty() {
                kind = k;
            } else if kind != k {
                return Err(self.err(t, "unsupported non-standard concatenation of string literals"));
            }
        }
        let elem = match kind {
            "u" => crate::common::types::TY_USHORT,
            "U" => crate::common::types::TY_UINT,
            "L" => crate::common::types::TY_INT,
            _ => crate::common::types::TY_PCHAR,
        };
        let elem_size = self.sess.types.size(elem) as usize;

        let mut bytes: Vec<u8> = Vec::new();
        for t in group {
            let data = if Self::string_kind(&t.text) == kind
                || (elem_size == 1 && Self::string_kind(&t.text) == "u8")
            {
                t.str_data.clone().unwrap_or_default()
            } else {
                lexer::redecode_string(&t.text, elem_size)
            };
            // Drop each literal's terminating NUL; one is re-added below.
            bytes.extend_from_slice(&data[..data.len() - elem_size]);
        }
        bytes.extend(std::iter::repeat(0).take(elem_size));

        let len = (bytes.len() / elem_size) as i64;
        let ty = self.sess.types.array_of(elem, len);
        let mut tok = group[0].clone();
        tok.str_data = Some(bytes);
        tok.str_ty = Some(ty);
        Ok(tok)
    }
}
