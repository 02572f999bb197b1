//! Predefined macros and dynamic built-ins.
//!
//! Object-like predefines describe the LP64 x86-64 Linux target. Dynamic
//! built-ins (`__FILE__`, `__LINE__`, `__COUNTER__`, `_Pragma`, the
//! `__has_*` probes) are dispatched by handler when their name expands.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::error::CResult;
use crate::common::types::TY_INT;
use crate::frontend::lexer::lexer;
use crate::frontend::lexer::token::{Token, TokenKind};
use crate::frontend::preprocessor::preprocessor::Preprocessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    File,
    Line,
    Counter,
    Timestamp,
    BaseFile,
    StdcVersion,
    Pragma,
    HasAttribute,
    HasBuiltin,
    HasInclude,
}

const RECOGNIZED_BUILTINS: &[&str] = &[
    "__builtin_alloca",
    "__builtin_constant_p",
    "__builtin_expect",
    "__builtin_offsetof",
    "__builtin_va_start",
    "__builtin_va_copy",
    "__builtin_va_end",
    "__builtin_va_arg",
];

pub(super) fn is_supported_attr(name: &str) -> bool {
    name == "packed" || name == "__packed__"
}

impl<'a> Preprocessor<'a> {
    pub(super) fn init_macros(&mut self) {
        self.define_macro("__STDC_HOSTED__", "1");
        self.define_macro("__STDC_NO_ATOMICS__", "1");
        self.define_macro("__STDC_NO_COMPLEX__", "1");
        self.define_macro("__STDC_UTF_16__", "1");
        self.define_macro("__STDC_UTF_32__", "1");
        self.define_macro("__STDC__", "1");

        self.define_macro("__C99_MACRO_WITH_VA_ARGS", "1");
        self.define_macro("__USER_LABEL_PREFIX__", "");

        self.define_macro("__const__", "const");
        self.define_macro("__inline__", "inline");
        self.define_macro("__signed__", "signed");
        self.define_macro("__volatile__", "volatile");

        self.define_macro("unix", "1");
        self.define_macro("__unix", "1");
        self.define_macro("__unix__", "1");
        self.define_macro("linux", "1");
        self.define_macro("__linux", "1");
        self.define_macro("__linux__", "1");
        self.define_macro("__ELF__", "1");
        self.define_macro("__gnu_linux__", "1");

        self.define_macro("__BYTE_ORDER__", "1234");
        self.define_macro("__ORDER_BIG_ENDIAN__", "4321");
        self.define_macro("__ORDER_LITTLE_ENDIAN__", "1234");

        self.define_macro("__amd64", "1");
        self.define_macro("__amd64__", "1");
        self.define_macro("__x86_64", "1");
        self.define_macro("__x86_64__", "1");

        // LP64 data model.
        self.define_macro("_LP64", "1");
        self.define_macro("__LP64__", "1");
        self.define_macro("__SIZEOF_DOUBLE__", "8");
        self.define_macro("__SIZEOF_FLOAT__", "4");
        self.define_macro("__SIZEOF_INT__", "4");
        self.define_macro("__SIZEOF_LONG_DOUBLE__", "16");
        self.define_macro("__SIZEOF_LONG_LONG__", "8");
        self.define_macro("__SIZEOF_LONG__", "8");
        self.define_macro("__SIZEOF_POINTER__", "8");
        self.define_macro("__SIZEOF_PTRDIFF_T__", "8");
        self.define_macro("__SIZEOF_SHORT__", "2");
        self.define_macro("__SIZEOF_SIZE_T__", "8");
        self.define_macro("__SIZE_TYPE__", "long unsigned int");

        self.define_macro("__rycc__", "1");

        self.add_builtin("__FILE__", Builtin::File);
        self.add_builtin("__LINE__", Builtin::Line);
        self.add_builtin("__COUNTER__", Builtin::Counter);
        self.add_builtin("__TIMESTAMP__", Builtin::Timestamp);
        self.add_builtin("__BASE_FILE__", Builtin::BaseFile);
        self.add_builtin("__STDC_VERSION__", Builtin::StdcVersion);
        self.add_builtin("_Pragma", Builtin::Pragma);
        self.add_builtin("__has_attribute", Builtin::HasAttribute);
        self.add_builtin("__has_builtin", Builtin::HasBuiltin);
        self.add_builtin("__has_include", Builtin::HasInclude);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.define_macro("__DATE__", &format!("\"{}\"", format_date(now)));
        self.define_macro("__TIME__", &format!("\"{}\"", format_time(now)));
    }

    fn num_token(&mut self, val: i64, tmpl: &Token) -> Token {
        let mut t = self.copy_tok(tmpl);
        t.kind = TokenKind::Num;
        t.text = val.to_string();
        t.val = val;
        t.num_ty = Some(TY_INT);
        t.dont_expand = false;
        t
    }

    fn str_token(&mut self, s: &str, tmpl: &Token) -> CResult<Token> {
        let quoted = format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""));
        let name = self.sess.files.get(tmpl.file_no).name.clone();
        let mut frag = lexer::tokenize_fragment(self.sess, &name, &quoted)?;
        let mut tok = frag.remove(0);
        tok.line = tmpl.line;
        tok.col = tmpl.col;
        Ok(tok)
    }

    pub(super) fn expand_builtin(
        &mut self,
        b: Builtin,
        input: &mut VecDeque<Token>,
    ) -> CResult<()> {
        let start = input.pop_front().unwrap();
        let (tfile, tline) = start.origin.unwrap_or((start.file_no, start.line));

        fn push(start: &Token, mut tok: Token, input: &mut VecDeque<Token>) {
            tok.at_bol = start.at_bol;
            tok.has_space = start.has_space;
            input.push_front(tok);
        }

        match b {
            Builtin::File => {
                let name = self.sess.files.get(tfile).display_name().to_string();
                let tok = self.str_token(&name, &start)?;
                push(&start, tok, input);
            }
            Builtin::Line => {
                let line = self.sess.files.get(tfile).display_line(tline);
                let tok = self.num_token(line, &start);
                push(&start, tok, input);
            }
            Builtin::Counter => {
                let n = self.counter;
                self.counter += 1;
                let tok = self.num_token(n, &start);
                push(&start, tok, input);
            }
            Builtin::Timestamp => {
                let name = self.sess.files.get(start.file_no).name.clone();
                let s = std::fs::metadata(&name)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| format_timestamp(d.as_secs() as i64))
                    .unwrap_or_else(|| "??? ??? ?? ??:??:?? ????".to_string());
                let tok = self.str_token(&s, &start)?;
                push(&start, tok, input);
            }
            Builtin::BaseFile => {
                let base = self.base_file.clone();
                let tok = self.str_token(&base, &start)?;
                push(&start, tok, input);
            }
            Builtin::StdcVersion => {
                let mut tok = self.copy_tok(&start);
                tok.kind = TokenKind::PpNum;
                tok.text = self.opts.std.stdc_version().to_string();
                tok.dont_expand = false;
                push(&start, tok, input);
            }
            Builtin::Pragma => {
                // _Pragma("...") re-tokenizes its operand as a #pragma line
                // at the invocation site.
                let mut progress = 0;
                let mut content = String::new();
                loop {
                    if input.front().map_or(true, |t| t.is_eof()) {
                        return Err(self.err(&start, "unterminated _Pragma sequence"));
                    }
                    let id = input.front().unwrap().id;
                    self.pop_macro_lock(id);
                    if self.expand_macro(input)? {
                        continue;
                    }
                    let tok = input.front().unwrap().clone();
                    match progress {
                        0 => {
                            if !tok.is("(") {
                                return Err(self.err(&tok, "expected '('"));
                            }
                            input.pop_front();
                        }
                        1 => {
                            if tok.kind != TokenKind::Str || tok.text.len() < 2 {
                                return Err(self.err(&tok, "expected string literal"));
                            }
                            let inner = &tok.text[..tok.text.len() - 1];
                            let inner = &inner[inner.find('"').map(|i| i + 1).unwrap_or(1)..];
                            content = inner.to_string();
                            input.pop_front();
                        }
                        _ => {
                            if !tok.is(")") {
                                return Err(self.err(&tok, "expected ')'"));
                            }
                            input.pop_front();
                            break;
                        }
                    }
                    progress += 1;
                }
                if let Some(next) = input.front_mut() {
                    next.at_bol = true;
                }
                let name = self.sess.files.get(start.file_no).name.clone();
                let buf = format!("#pragma {}", content);
                let mut toks = lexer::tokenize_fragment(self.sess, &name, &buf)?;
                toks.pop(); // EOF
                for t in toks.into_iter().rev() {
                    input.push_front(t);
                }
            }
            Builtin::HasAttribute | Builtin::HasBuiltin => {
                if !input.front().map_or(false, |t| t.is("(")) {
                    return Err(self.err(&start, "expected '('"));
                }
                let lp = input.pop_front().unwrap();
                self.pop_macro_lock(lp.id);
                let Some(arg) = input.front().filter(|t| t.is_ident()).cloned() else {
                    return Err(self.err(&start, "expected an identifier"));
                };
                input.pop_front();
                self.pop_macro_lock(arg.id);
                if !input.front().map_or(false, |t| t.is(")")) {
                    return Err(self.err(&arg, "expected ')'"));
                }
                let rp = input.pop_front().unwrap();
                self.pop_macro_lock(rp.id);
                let has = match b {
                    Builtin::HasAttribute => is_supported_attr(&arg.text),
                    _ => RECOGNIZED_BUILTINS.contains(&arg.text.as_str()),
                };
                let tok = self.num_token(has as i64, &start);
                push(&start, tok, input);
            }
            Builtin::HasInclude => {
                if !input.front().map_or(false, |t| t.is("(")) {
                    return Err(self.err(&start, "expected '('"));
                }
                let lp = input.pop_front().unwrap();
                self.pop_macro_lock(lp.id);
                let mut level = 0;
                let mut line: Vec<Token> = Vec::new();
                loop {
                    if input.front().map_or(true, |t| t.is_eof()) {
                        return Err(self.err(&start, "unterminated list"));
                    }
                    let t = input.pop_front().unwrap();
                    self.pop_macro_lock(t.id);
                    if level == 0 && t.is(")") {
                        break;
                    }
                    if t.is("(") {
                        level += 1;
                    } else if t.is(")") {
                        level -= 1;
                    }
                    line.push(t);
                }
                let found = match self.read_include_filename(&start, line) {
                    Ok((filename, true)) => self.search_dquote(&filename, &start).is_some(),
                    Ok((filename, false)) => self.search_include_paths(&filename).is_some(),
                    Err(e) => return Err(e),
                };
                let tok = self.num_token(found as i64, &start);
                push(&start, tok, input);
            }
        }
        Ok(())
    }
}

// Civil-calendar conversion (days since 1970-01-01 to y/m/d).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

fn format_date(secs: i64) -> String {
    let (y, m, d) = civil_from_days(secs.div_euclid(86400));
    format!("{} {:2} {}", MONTHS[(m - 1) as usize], d, y)
}

fn format_time(secs: i64) -> String {
    let s = secs.rem_euclid(86400);
    format!("{:02}:{:02}:{:02}", s / 3600, s / 60 % 60, s % 60)
}

fn format_timestamp(secs: i64) -> String {
    let days = secs.div_euclid(86400);
    let (y, m, d) = civil_from_days(days);
    let wd = WEEKDAYS[((days + 4).rem_euclid(7)) as usize];
    let s = secs.rem_euclid(86400);
    format!(
        "{} {} {:2} {:02}:{:02}:{:02} {}",
        wd,
        MONTHS[(m - 1) as usize],
        d,
        s / 3600,
        s / 60 % 60,
        s % 60,
        y
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn civil_conversion() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(19723), (2024, 1, 1));
    }

    #[test]
    fn timestamp_format() {
        // 2020-07-24 01:32:50 UTC
        assert_eq!(format_timestamp(1595554370), "Fri Jul 24 01:32:50 2020");
    }
}
