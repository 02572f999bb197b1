//! `#include` resolution and splicing.
//!
//! Search order for `"..."` includes: `-iquote` paths, the directory of the
//! including file, `-I` paths, then `-idirafter` paths (the latter two are
//! merged, in that order, into one list by the driver). `<...>` includes
//! skip the first two.
//!
//! A file whose whole content is wrapped in `#ifndef NAME ... #endif` is
//! remembered as guarded by NAME; re-inclusion while NAME is defined is
//! skipped without reopening the file. `#pragma once` marks the path
//! directly.

use std::collections::VecDeque;
use std::path::Path;

use crate::common::error::CResult;
use crate::frontend::lexer::lexer;
use crate::frontend::lexer::token::{Token, TokenKind};
use crate::frontend::preprocessor::preprocessor::Preprocessor;

impl<'a> Preprocessor<'a> {
    fn file_exists(path: &str) -> bool {
        Path::new(path).is_file()
    }

    /// Search the shared `-I` list, with a cache keyed by the filename.
    pub(super) fn search_include_paths(&mut self, filename: &str) -> Option<(String, usize)> {
        if filename.starts_with('/') {
            return Some((filename.to_string(), usize::MAX));
        }
        if let Some(hit) = self.include_cache.get(filename) {
            return Some(hit.clone());
        }
        for (i, dir) in self.opts.include_paths.iter().enumerate() {
            let path = format!("{}/{}", dir, filename);
            if Self::file_exists(&path) {
                self.include_cache
                    .insert(filename.to_string(), (path.clone(), i));
                return Some((path, i));
            }
        }
        None
    }

    pub(super) fn search_dquote(&mut self, filename: &str, includer: &Token) -> Option<(String, usize)> {
        if !filename.starts_with('/') {
            for dir in &self.opts.iquote_paths {
                let path = format!("{}/{}", dir, filename);
                if Self::file_exists(&path) {
                    return Some((path, usize::MAX));
                }
            }
            let cur = self.sess.files.get(includer.file_no).name.clone();
            let dir = Path::new(&cur)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| ".".to_string());
            let path = format!("{}/{}", dir, filename);
            if Self::file_exists(&path) {
                return Some((path, usize::MAX));
            }
        }
        self.search_include_paths(filename)
    }

    /// `#include_next` continues the search after the directory the current
    /// file was found in.
    fn search_include_next(&mut self, filename: &str, hash: &Token) -> Option<(String, usize)> {
        let cur_file = self.sess.files.get(hash.file_no);
        let start = cur_file.incl_no.map(|n| n + 1).unwrap_or(0);
        let cur_name = cur_file.name.clone();
        for (i, dir) in self.opts.include_paths.iter().enumerate().skip(start) {
            let path = format!("{}/{}", dir, filename);
            if Self::file_exists(&path) && path != cur_name {
                return Some((path, i));
            }
        }
        None
    }

    /// Parse an `#include` operand from its directive line: `"file"`,
    /// `<file>`, or a macro that expands to either.
    pub(super) fn read_include_filename(
        &mut self,
        hash: &Token,
        line: Vec<Token>,
    ) -> CResult<(String, bool)> {
        let line = if line.first().map_or(false, |t| t.is_ident()) {
            self.expand_token_list(line)?
        } else {
            line
        };
        let Some(first) = line.first() else {
            return Err(self.err(hash, "expected a filename"));
        };

        // A double-quoted include filename is not a regular string literal:
        // escape sequences in it are not interpreted.
        if first.kind == TokenKind::Str && first.text.starts_with('"') {
            let name = first.text[1..first.text.len() - 1].to_string();
            return Ok((name, true));
        }

        if first.is("<") {
            let mut i = 1;
            while i < line.len() && !line[i].is(">") {
                i += 1;
            }
            if i == line.len() {
                return Err(self.err(first, "expected '>'"));
            }
            let name = Self::join_tokens(&line[1..i], false);
            return Ok((name, false));
        }

        Err(self.err(first, "expected a filename"))
    }

    pub(super) fn do_include(
        &mut self,
        hash: &Token,
        line: Vec<Token>,
        input: &mut VecDeque<Token>,
        is_next: bool,
    ) -> CResult<()> {
        let name_tok = line.first().cloned().unwrap_or_else(|| hash.clone());
        let (filename, is_dquote) = self.read_include_filename(hash, line)?;

        let found = if is_next {
            self.search_include_next(&filename, hash)
        } else if is_dquote {
            self.search_dquote(&filename, hash)
        } else {
            self.search_include_paths(&filename)
        };
        let Some((path, incl_no)) = found else {
            return Err(self.err(&name_tok, "file not found"));
        };
        self.include_file(&name_tok, &path, incl_no, input)
    }

    fn include_file(
        &mut self,
        name_tok: &Token,
        path: &str,
        incl_no: usize,
        input: &mut VecDeque<Token>,
    ) -> CResult<()> {
        if self.pragma_once.contains(path) {
            return Ok(());
        }
        if let Some(guard) = self.include_guards.get(path) {
            if self.macros.contains_key(guard) {
                return Ok(());
            }
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| self.err(name_tok, &format!("{}: cannot open file: {}", path, e)))?;
        let mut toks = lexer::tokenize(self.sess, path, contents, true)?;
        let file_no = toks.last().unwrap().file_no;
        if incl_no != usize::MAX {
            self.sess.files.set_incl_no(file_no, incl_no);
        }
        toks.pop(); // drop the file's EOF

        if let Some(guard) = detect_include_guard(&toks) {
            self.include_guards.insert(path.to_string(), guard);
        }

        if self.opts.opt_e {
            let id = self.sess.next_tok_id();
            let mut fmark =
                Token::new(TokenKind::FileMark, path.to_string(), id, file_no, 1, 1);
            fmark.at_bol = true;
            toks.insert(0, fmark);
        }
        for t in toks.into_iter().rev() {
            input.push_front(t);
        }
        Ok(())
    }
}

/// Whether the token stream is entirely wrapped in `#ifndef NAME ...
/// #endif`: the opening `#ifndef` must be the first directive and its
/// matching `#endif` the file's last tokens.
fn detect_include_guard(toks: &[Token]) -> Option<String> {
    if toks.len() < 5 {
        return None;
    }
    if !(toks[0].at_bol && toks[0].is("#") && toks[1].is("ifndef") && toks[2].is_ident()) {
        return None;
    }
    let guard = toks[2].text.clone();

    let mut depth = 1i32;
    let mut i = 3;
    while i < toks.len() {
        if toks[i].at_bol && toks[i].is("#") && i + 1 < toks.len() {
            match toks[i + 1].text.as_str() {
                "if" | "ifdef" | "ifndef" => depth += 1,
                "endif" => {
                    depth -= 1;
                    if depth == 0 {
                        // The matching #endif must end the file.
                        return if i + 2 == toks.len() {
                            Some(guard)
                        } else {
                            None
                        };
                    }
                }
                _ => {}
            }
            i += 2;
            continue;
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::session::Session;

    fn toks(src: &str) -> Vec<Token> {
        let mut sess = Session::new();
        let mut t = lexer::tokenize(&mut sess, "h.h", src.to_string(), true).unwrap();
        t.pop();
        t
    }

    #[test]
    fn guard_detected() {
        let t = toks("#ifndef FOO_H\n#define FOO_H\nint x;\n#endif\n");
        assert_eq!(detect_include_guard(&t), Some("FOO_H".to_string()));
    }

    #[test]
    fn trailing_code_defeats_guard() {
        let t = toks("#ifndef FOO_H\n#define FOO_H\n#endif\nint x;\n");
        assert_eq!(detect_include_guard(&t), None);
    }

    #[test]
    fn nested_conditionals_ok() {
        let t = toks("#ifndef A\n#ifdef B\n#endif\n#endif\n");
        assert_eq!(detect_include_guard(&t), Some("A".to_string()));
    }
}
