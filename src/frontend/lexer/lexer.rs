//! The tokenizer.
//!
//! Turns source bytes into a token vector. Line splicing (backslash-newline)
//! and newline canonicalization happen up front so that everything downstream
//! sees one logical line per physical line; spliced newlines are re-inserted
//! after the joined line to keep line numbers stable.
//!
//! Numeric tokens leave the lexer as `PpNum` (raw text). They are converted
//! to typed `Num` tokens on demand: the preprocessor converts them when
//! evaluating `#if` expressions, the parser when it reaches a primary
//! expression. Character literals are decoded immediately.

use crate::common::error::{CResult, Diagnostic};
use crate::common::session::Session;
use crate::common::source::SourceManager;
use crate::common::types::{
    TypeId, TY_DOUBLE, TY_FLOAT, TY_INT, TY_LDOUBLE, TY_LLONG, TY_LONG, TY_PCHAR, TY_UINT,
    TY_ULLONG, TY_ULONG, TY_USHORT,
};
use crate::frontend::lexer::token::{Loc, Token, TokenKind};

/// Join `\`-newline pairs, canonicalizing `\r\n` to `\n`. Removed newlines
/// are re-emitted after the next real newline so later lines keep their
/// numbers.
fn splice_lines(src: &str) -> String {
    let b = src.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(b.len());
    let mut pending = 0usize;
    let mut i = 0;
    while i < b.len() {
        if b[i] == b'\\' && i + 1 < b.len() && (b[i + 1] == b'\n' || b[i + 1] == b'\r') {
            pending += 1;
            i += if b[i + 1] == b'\r' && i + 2 < b.len() && b[i + 2] == b'\n' {
                3
            } else {
                2
            };
        } else if b[i] == b'\r' {
            out.push(b'\n');
            out.extend(std::iter::repeat(b'\n').take(pending));
            pending = 0;
            i += if i + 1 < b.len() && b[i + 1] == b'\n' { 2 } else { 1 };
        } else if b[i] == b'\n' {
            out.push(b'\n');
            out.extend(std::iter::repeat(b'\n').take(pending));
            pending = 0;
            i += 1;
        } else {
            out.push(b[i]);
            i += 1;
        }
    }
    out.extend(std::iter::repeat(b'\n').take(pending));
    String::from_utf8_lossy(&out).into_owned()
}

/// Register `contents` under `name` and tokenize it. The returned vector
/// always ends with an EOF token.
pub fn tokenize(
    sess: &mut Session,
    name: &str,
    contents: String,
    is_input: bool,
) -> CResult<Vec<Token>> {
    let spliced = splice_lines(&contents);
    let file_no = sess.files.add(name, spliced, is_input);
    tokenize_registered(sess, file_no)
}

/// Tokenize a synthetic buffer (paste results, `_Pragma` bodies, built-in
/// macro expansions).
pub fn tokenize_fragment(sess: &mut Session, name: &str, contents: &str) -> CResult<Vec<Token>> {
    tokenize(sess, name, contents.to_string(), false)
}

fn tokenize_registered(sess: &mut Session, file_no: usize) -> CResult<Vec<Token>> {
    let contents = sess.files.get(file_no).contents.clone();
    let mut lx = Lexer {
        sess,
        src: contents.as_bytes(),
        file_no,
        pos: 0,
        line: 1,
        line_start: 0,
        at_bol: true,
        has_space: false,
    };
    lx.run()
}

struct Lexer<'a> {
    sess: &'a mut Session,
    src: &'a [u8],
    file_no: usize,
    pos: usize,
    line: u32,
    line_start: usize,
    at_bol: bool,
    has_space: bool,
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$' || c >= 0x80
}

fn is_ident_cont(c: u8) -> bool {
    is_ident_start(c) || c.is_ascii_digit()
}

impl<'a> Lexer<'a> {
    fn col(&self) -> u32 {
        (self.pos - self.line_start + 1) as u32
    }

    fn loc(&self) -> Loc {
        Loc {
            file_no: self.file_no,
            line: self.line,
            col: self.col(),
        }
    }

    fn err(&self, loc: Loc, msg: &str) -> Diagnostic {
        Diagnostic::at(&self.sess.files, loc, msg)
    }

    fn peek(&self, off: usize) -> u8 {
        *self.src.get(self.pos + off).unwrap_or(&0)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s.as_bytes())
    }

    fn newline(&mut self) {
        self.pos += 1;
        self.line += 1;
        self.line_start = self.pos;
        self.at_bol = true;
        self.has_space = false;
    }

    fn run(&mut self) -> CResult<Vec<Token>> {
        let mut out = Vec::new();
        loop {
            // Skip whitespace and comments, tracking bol/space flags.
            let c = self.peek(0);
            if self.pos >= self.src.len() {
                break;
            }
            if c == b'\n' {
                self.newline();
                continue;
            }
            if c == b' ' || c == b'\t' || c == 0x0b || c == 0x0c {
                self.pos += 1;
                self.has_space = true;
                continue;
            }
            if c == b'/' && self.peek(1) == b'/' {
                while self.pos < self.src.len() && self.peek(0) != b'\n' {
                    self.pos += 1;
                }
                self.has_space = true;
                continue;
            }
            if c == b'/' && self.peek(1) == b'*' {
                let start = self.loc();
                self.pos += 2;
                loop {
                    if self.pos >= self.src.len() {
                        return Err(self.err(start, "unclosed block comment"));
                    }
                    if self.peek(0) == b'\n' {
                        self.newline();
                        self.at_bol = false;
                        continue;
                    }
                    if self.peek(0) == b'*' && self.peek(1) == b'/' {
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                }
                self.has_space = true;
                continue;
            }

            let mut tok = self.read_token()?;
            tok.at_bol = self.at_bol;
            tok.has_space = self.has_space;
            self.at_bol = false;
            self.has_space = false;
            out.push(tok);
        }

        let id = self.sess.next_tok_id();
        let mut eof = Token::new(
            TokenKind::Eof,
            String::new(),
            id,
            self.file_no,
            self.line,
            self.col(),
        );
        eof.at_bol = true;
        out.push(eof);
        Ok(out)
    }

    fn make(&mut self, kind: TokenKind, start: usize, loc: Loc) -> Token {
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let id = self.sess.next_tok_id();
        Token::new(kind, text, id, self.file_no, loc.line, loc.col)
    }

    fn read_token(&mut self) -> CResult<Token> {
        let loc = self.loc();
        let start = self.pos;
        let c = self.peek(0);

        // String literals, with or without an encoding prefix.
        for (prefix, elem) in [
            ("\"", TY_PCHAR),
            ("u8\"", TY_PCHAR),
            ("u\"", TY_USHORT),
            ("U\"", TY_UINT),
            ("L\"", TY_INT),
        ] {
            if self.starts_with(prefix) {
                return self.read_string_literal(loc, prefix.len(), elem);
            }
        }

        // Character literals.
        for (prefix, ty) in [("'", TY_INT), ("u'", TY_USHORT), ("U'", TY_UINT), ("L'", TY_INT)] {
            if self.starts_with(prefix) {
                return self.read_char_literal(loc, prefix.len(), ty, prefix == "'");
            }
        }

        // Preprocessing numbers.
        if c.is_ascii_digit() || (c == b'.' && self.peek(1).is_ascii_digit()) {
            self.pos += 1;
            loop {
                let d = self.peek(0);
                if (d == b'e' || d == b'E' || d == b'p' || d == b'P')
                    && (self.peek(1) == b'+' || self.peek(1) == b'-')
                {
                    self.pos += 2;
                } else if d.is_ascii_alphanumeric() || d == b'.' || d == b'_' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            return Ok(self.make(TokenKind::PpNum, start, loc));
        }

        // Identifiers.
        if is_ident_start(c) {
            self.pos += 1;
            while is_ident_cont(self.peek(0)) {
                self.pos += 1;
            }
            return Ok(self.make(TokenKind::Ident, start, loc));
        }

        // Punctuators, longest match first.
        const PUNCTS: &[&str] = &[
            "<<=", ">>=", "...", "==", "!=", "<=", ">=", "->", "+=", "-=", "*=", "/=", "++",
            "--", "%=", "&=", "|=", "^=", "&&", "||", "<<", ">>", "##",
        ];
        for p in PUNCTS {
            if self.starts_with(p) {
                self.pos += p.len();
                return Ok(self.make(TokenKind::Punct, start, loc));
            }
        }
        if c.is_ascii_punctuation() {
            self.pos += 1;
            return Ok(self.make(TokenKind::Punct, start, loc));
        }

        Err(self.err(loc, "invalid token"))
    }

    /// Decode one escape sequence or plain character; returns the value and
    /// whether it came from an escape (escape bytes bypass UTF-8 encoding).
    fn read_escaped_char(&mut self, loc: Loc) -> CResult<(u32, bool)> {
        if self.peek(0) != b'\\' {
            // A plain source character, possibly multi-byte UTF-8.
            let rest = &self.src[self.pos..];
            let s = std::str::from_utf8(rest)
                .map_err(|_| self.err(loc, "invalid UTF-8 sequence"))?;
            let ch = s.chars().next().unwrap();
            self.pos += ch.len_utf8();
            return Ok((ch as u32, false));
        }
        self.pos += 1;
        let c = self.peek(0);
        if (b'0'..=b'7').contains(&c) {
            let mut v = 0u32;
            let mut n = 0;
            while n < 3 && (b'0'..=b'7').contains(&self.peek(0)) {
                v = v * 8 + (self.peek(0) - b'0') as u32;
                self.pos += 1;
                n += 1;
            }
            return Ok((v, true));
        }
        if c == b'x' {
            self.pos += 1;
            if !self.peek(0).is_ascii_hexdigit() {
                return Err(self.err(loc, "invalid hex escape sequence"));
            }
            let mut v = 0u32;
            while self.peek(0).is_ascii_hexdigit() {
                v = v.wrapping_mul(16) + (self.peek(0) as char).to_digit(16).unwrap();
                self.pos += 1;
            }
            return Ok((v, true));
        }
        self.pos += 1;
        let v = match c {
            b'a' => 7,
            b'b' => 8,
            b't' => 9,
            b'n' => 10,
            b'v' => 11,
            b'f' => 12,
            b'r' => 13,
            // [GNU] \e for the ASCII escape character.
            b'e' => 27,
            other => other as u32,
        };
        Ok((v, true))
    }

    fn read_string_literal(&mut self, loc: Loc, prefix: usize, elem: TypeId) -> CResult<Token> {
        let start = self.pos;
        self.pos += prefix;
        let mut values: Vec<(u32, bool)> = Vec::new();
        loop {
            let c = self.peek(0);
            if c == b'"' {
                self.pos += 1;
                break;
            }
            if c == b'\n' || self.pos >= self.src.len() {
                return Err(self.err(loc, "unclosed string literal"));
            }
            values.push(self.read_escaped_char(loc)?);
        }

        let elem_size = self.sess.types.size(elem) as usize;
        let bytes = encode_string(&values, elem_size);
        let len = (bytes.len() / elem_size + 1) as i64;
        let ty = self.sess.types.array_of(elem, len);
        let mut data = bytes;
        data.extend(std::iter::repeat(0).take(elem_size));

        let mut tok = self.make(TokenKind::Str, start, loc);
        tok.str_data = Some(data);
        tok.str_ty = Some(ty);
        Ok(tok)
    }

    fn read_char_literal(
        &mut self,
        loc: Loc,
        prefix: usize,
        ty: TypeId,
        is_plain: bool,
    ) -> CResult<Token> {
        let start = self.pos;
        self.pos += prefix;
        if self.peek(0) == b'\'' {
            return Err(self.err(loc, "empty character constant"));
        }
        let (v, _) = self.read_escaped_char(loc)?;
        if self.peek(0) != b'\'' {
            return Err(self.err(loc, "unclosed character constant"));
        }
        self.pos += 1;

        let mut tok = self.make(TokenKind::Num, start, loc);
        tok.val = if is_plain {
            // A plain char constant has type int with the value of the
            // (sign-extended) character.
            v as u8 as i8 as i64
        } else if ty == TY_USHORT {
            (v & 0xffff) as i64
        } else {
            v as i64
        };
        tok.num_ty = Some(ty);
        Ok(tok)
    }
}

/// Encode decoded string values at the given element width. UTF-16 strings
/// get surrogate pairs for astral-plane characters; escape values are
/// truncated raw.
pub fn encode_string(values: &[(u32, bool)], elem_size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for &(v, is_escape) in values {
        match elem_size {
            1 => {
                if is_escape || v < 0x80 {
                    out.push(v as u8);
                } else {
                    let mut buf = [0u8; 4];
                    let s = char::from_u32(v).unwrap_or('\u{fffd}').encode_utf8(&mut buf);
                    out.extend_from_slice(s.as_bytes());
                }
            }
            2 => {
                if v < 0x10000 {
                    out.extend_from_slice(&(v as u16).to_le_bytes());
                } else {
                    let v = v - 0x10000;
                    let hi = 0xd800 + (v >> 10) as u16;
                    let lo = 0xdc00 + (v & 0x3ff) as u16;
                    out.extend_from_slice(&hi.to_le_bytes());
                    out.extend_from_slice(&lo.to_le_bytes());
                }
            }
            _ => out.extend_from_slice(&v.to_le_bytes()),
        }
    }
    out
}

/// Re-decode a string literal's raw lexeme at a (possibly wider) element
/// width. Used when adjacent literals of mixed widths are concatenated.
pub fn redecode_string(raw: &str, elem_size: usize) -> Vec<u8> {
    let inner = raw
        .trim_start_matches("u8")
        .trim_start_matches(['u', 'U', 'L']);
    let inner = &inner[1..inner.len() - 1]; // strip quotes
    let b = inner.as_bytes();
    let mut values = Vec::new();
    let mut i = 0;
    while i < b.len() {
        if b[i] == b'\\' {
            let (v, n) = decode_escape(&b[i + 1..]);
            values.push((v, true));
            i += 1 + n;
        } else {
            let s = std::str::from_utf8(&b[i..]).unwrap_or("\u{fffd}");
            let ch = s.chars().next().unwrap_or('\u{fffd}');
            values.push((ch as u32, false));
            i += ch.len_utf8().max(1);
        }
    }
    let mut out = encode_string(&values, elem_size);
    out.extend(std::iter::repeat(0).take(elem_size));
    out
}

fn decode_escape(b: &[u8]) -> (u32, usize) {
    if b.is_empty() {
        return (0, 0);
    }
    if (b'0'..=b'7').contains(&b[0]) {
        let mut v = 0u32;
        let mut n = 0;
        while n < 3 && n < b.len() && (b'0'..=b'7').contains(&b[n]) {
            v = v * 8 + (b[n] - b'0') as u32;
            n += 1;
        }
        return (v, n);
    }
    if b[0] == b'x' {
        let mut v = 0u32;
        let mut n = 1;
        while n < b.len() && b[n].is_ascii_hexdigit() {
            v = v.wrapping_mul(16) + (b[n] as char).to_digit(16).unwrap();
            n += 1;
        }
        return (v, n);
    }
    let v = match b[0] {
        b'a' => 7,
        b'b' => 8,
        b't' => 9,
        b'n' => 10,
        b'v' => 11,
        b'f' => 12,
        b'r' => 13,
        b'e' => 27,
        other => other as u32,
    };
    (v, 1)
}

/// Convert a `PpNum` token to a typed `Num` token in place.
pub fn convert_pp_number(tok: &mut Token, files: &SourceManager) -> CResult<()> {
    if tok.kind == TokenKind::Num {
        return Ok(());
    }
    if let Some((val, ty)) = parse_int_literal(&tok.text) {
        tok.kind = TokenKind::Num;
        tok.val = val as i64;
        tok.num_ty = Some(ty);
        return Ok(());
    }
    if let Some((fval, ty)) = parse_float_literal(&tok.text) {
        tok.kind = TokenKind::Num;
        tok.fval = fval;
        tok.num_ty = Some(ty);
        return Ok(());
    }
    Err(Diagnostic::at(files, tok.loc(), "invalid numeric constant"))
}

/// Integer literal with suffix handling; `None` if the text is not a valid
/// integer constant (the caller then tries a float parse).
fn parse_int_literal(text: &str) -> Option<(u64, TypeId)> {
    let b = text.as_bytes();
    let (base, digits_start): (u32, usize) = if text.len() > 2
        && (text.starts_with("0x") || text.starts_with("0X"))
    {
        (16, 2)
    } else if text.len() > 2 && (text.starts_with("0b") || text.starts_with("0B")) {
        (2, 2)
    } else if b[0] == b'0' {
        (8, 1)
    } else {
        (10, 0)
    };

    let mut val: u64 = 0;
    let mut i = digits_start;
    let mut saw_digit = false;
    while i < b.len() {
        let d = (b[i] as char).to_digit(base);
        match d {
            Some(d) => {
                val = val.wrapping_mul(base as u64).wrapping_add(d as u64);
                saw_digit = true;
                i += 1;
            }
            None => break,
        }
    }
    // "0" alone parses as octal with no digits consumed past the prefix.
    if !saw_digit && !(base == 8 && b[0] == b'0') {
        return None;
    }

    // Suffixes: U, L, LL in either order, case-insensitive.
    let suffix = &text[i..];
    let s = suffix.to_ascii_lowercase();
    let (u, l, ll) = match s.as_str() {
        "" => (false, false, false),
        "u" => (true, false, false),
        "l" => (false, true, false),
        "ll" => (false, false, true),
        "ul" | "lu" => (true, true, false),
        "ull" | "llu" => (true, false, true),
        _ => return None,
    };

    let ty = if base == 10 {
        match (u, l, ll) {
            (true, _, true) => TY_ULLONG,
            (true, true, _) => TY_ULONG,
            (true, false, false) => {
                if val >> 32 != 0 {
                    TY_ULONG
                } else {
                    TY_UINT
                }
            }
            (false, _, true) => TY_LLONG,
            (false, true, _) => TY_LONG,
            (false, false, false) => {
                if val >> 31 != 0 {
                    TY_LONG
                } else {
                    TY_INT
                }
            }
        }
    } else {
        match (u, l, ll) {
            (true, _, true) => TY_ULLONG,
            (true, true, _) => TY_ULONG,
            (true, false, false) => {
                if val >> 32 != 0 {
                    TY_ULONG
                } else {
                    TY_UINT
                }
            }
            (false, _, true) => {
                if val >> 63 != 0 {
                    TY_ULLONG
                } else {
                    TY_LLONG
                }
            }
            (false, true, false) => {
                if val >> 63 != 0 {
                    TY_ULONG
                } else {
                    TY_LONG
                }
            }
            (false, false, false) => {
                if val >> 63 != 0 {
                    TY_ULONG
                } else if val >> 32 != 0 {
                    TY_LONG
                } else if val >> 31 != 0 {
                    TY_UINT
                } else {
                    TY_INT
                }
            }
        }
    };
    Some((val, ty))
}

fn parse_float_literal(text: &str) -> Option<(f64, TypeId)> {
    let (body, ty) = match text.as_bytes().last() {
        Some(b'f') | Some(b'F') => (&text[..text.len() - 1], TY_FLOAT),
        Some(b'l') | Some(b'L') => (&text[..text.len() - 1], TY_LDOUBLE),
        _ => (text, TY_DOUBLE),
    };
    if body.starts_with("0x") || body.starts_with("0X") {
        return parse_hex_float(&body[2..]).map(|v| (v, ty));
    }
    // Reject forms the pp-number shape allows but C doesn't.
    if !body.bytes().all(|c| c.is_ascii_digit() || matches!(c, b'.' | b'e' | b'E' | b'+' | b'-')) {
        return None;
    }
    body.parse::<f64>().ok().map(|v| {
        let v = if ty == TY_FLOAT { v as f32 as f64 } else { v };
        (v, ty)
    })
}

/// Hex float: hexdigits[.hexdigits]p[+-]dec — value is mantissa * 2^exp.
fn parse_hex_float(s: &str) -> Option<f64> {
    let b = s.as_bytes();
    let mut mantissa: f64 = 0.0;
    let mut i = 0;
    let mut any = false;
    while i < b.len() && b[i].is_ascii_hexdigit() {
        mantissa = mantissa * 16.0 + (b[i] as char).to_digit(16)? as f64;
        i += 1;
        any = true;
    }
    if i < b.len() && b[i] == b'.' {
        i += 1;
        let mut scale = 1.0 / 16.0;
        while i < b.len() && b[i].is_ascii_hexdigit() {
            mantissa += (b[i] as char).to_digit(16)? as f64 * scale;
            scale /= 16.0;
            i += 1;
            any = true;
        }
    }
    if !any || i >= b.len() || (b[i] != b'p' && b[i] != b'P') {
        return None;
    }
    i += 1;
    let neg = match b.get(i) {
        Some(b'+') => {
            i += 1;
            false
        }
        Some(b'-') => {
            i += 1;
            true
        }
        _ => false,
    };
    let exp_str = &s[i..];
    if exp_str.is_empty() || !exp_str.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let exp: i32 = exp_str.parse().ok()?;
    let exp = if neg { -exp } else { exp };
    Some(mantissa * (2f64).powi(exp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::token::TokenKind as K;

    fn lex(src: &str) -> (Session, Vec<Token>) {
        let mut sess = Session::new();
        let toks = tokenize(&mut sess, "test.c", src.to_string(), true).unwrap();
        (sess, toks)
    }

    #[test]
    fn basic_stream() {
        let (_s, toks) = lex("int main() { return 42; }\n");
        let texts: Vec<&str> = toks.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            texts,
            ["int", "main", "(", ")", "{", "return", "42", ";", "}", ""]
        );
        assert!(toks[0].at_bol);
        assert!(!toks[1].at_bol && toks[1].has_space);
        assert_eq!(toks[6].kind, K::PpNum);
    }

    #[test]
    fn line_splicing_preserves_numbers() {
        let (_s, toks) = lex("a\\\nb\nc\n");
        // "ab" joined on line 1, "c" stays on line 3.
        assert_eq!(toks[0].text, "ab");
        assert_eq!(toks[0].line, 1);
        assert_eq!(toks[1].text, "c");
        assert_eq!(toks[1].line, 3);
    }

    #[test]
    fn punct_longest_match() {
        let (_s, toks) = lex("a <<= b >>= c ... ## d\n");
        let puncts: Vec<&str> = toks
            .iter()
            .filter(|t| t.kind == K::Punct)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(puncts, ["<<=", ">>=", "...", "##"]);
    }

    #[test]
    fn string_literals() {
        let (s, toks) = lex("\"ab\\n\"\n");
        let t = &toks[0];
        assert_eq!(t.kind, K::Str);
        assert_eq!(t.str_data.as_deref(), Some(&b"ab\n\0"[..]));
        assert_eq!(s.types.array_len(t.str_ty.unwrap()), 4);
    }

    #[test]
    fn wide_string_elements() {
        let (s, toks) = lex("u\"hi\"\n");
        let t = &toks[0];
        assert_eq!(t.str_data.as_deref(), Some(&[b'h', 0, b'i', 0, 0, 0][..]));
        assert_eq!(s.types.size(s.types.base(t.str_ty.unwrap()).unwrap()), 2);
    }

    #[test]
    fn char_literals() {
        let (_s, toks) = lex("'a' '\\n' '\\xff'\n");
        assert_eq!(toks[0].val, 97);
        assert_eq!(toks[1].val, 10);
        // \xff sign-extends through plain char.
        assert_eq!(toks[2].val, -1);
    }

    #[test]
    fn int_literal_types() {
        assert_eq!(parse_int_literal("42"), Some((42, TY_INT)));
        assert_eq!(parse_int_literal("42u"), Some((42, TY_UINT)));
        assert_eq!(parse_int_literal("42L"), Some((42, TY_LONG)));
        assert_eq!(parse_int_literal("0x10"), Some((16, TY_INT)));
        assert_eq!(parse_int_literal("010"), Some((8, TY_INT)));
        assert_eq!(parse_int_literal("0b101"), Some((5, TY_INT)));
        assert_eq!(parse_int_literal("4294967296"), Some((1 << 32, TY_LONG)));
        assert_eq!(
            parse_int_literal("0xffffffffffffffff"),
            Some((u64::MAX, TY_ULONG))
        );
        assert_eq!(parse_int_literal("1.5"), None);
        assert_eq!(parse_int_literal("1e5"), None);
    }

    #[test]
    fn float_literals() {
        assert_eq!(parse_float_literal("1.5"), Some((1.5, TY_DOUBLE)));
        assert_eq!(parse_float_literal("1.5f"), Some((1.5, TY_FLOAT)));
        assert_eq!(parse_float_literal("1.5L"), Some((1.5, TY_LDOUBLE)));
        assert_eq!(parse_float_literal("1e3"), Some((1000.0, TY_DOUBLE)));
        assert_eq!(parse_float_literal("0x1p4"), Some((16.0, TY_DOUBLE)));
        assert_eq!(parse_float_literal("0x1.8p1"), Some((3.0, TY_DOUBLE)));
    }
}
