//! CUE output validation.
//!
//! There is no CUE toolchain to lean on, so emitted text is gated by a
//! small lexer and recursive-descent parser covering the CUE subset the
//! converter produces: fields with `?`/`!` markers, definitions and
//! hidden fields, embeddings, `if`/`for` comprehensions, disjunctions
//! with `*` defaults, selectors, indexing, calls, interpolated strings,
//! struct/list literals, `...`, and imports. The parser is permissive —
//! anything it accepts is structurally sound CUE, and anything the
//! converter emits must pass it.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ConvertError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number,
    Str,
    LBrace,
    RBrace,
    LBrack,
    RBrack,
    LParen,
    RParen,
    Colon,
    Comma,
    Question,
    Bang,
    Ellipsis,
    Op(String),
    Newline,
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
}

type LexResult<T> = std::result::Result<T, String>;

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    fn error(&self, msg: &str) -> String {
        format!("line {}: {}", self.line, msg)
    }

    fn tokens(mut self) -> LexResult<Vec<(Tok, usize)>> {
        let mut out = Vec::new();
        while let Some(tok) = self.next_token()? {
            out.push((tok, self.line));
        }
        Ok(out)
    }

    fn peek_byte(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn next_token(&mut self) -> LexResult<Option<Tok>> {
        loop {
            match self.peek_byte() {
                None => return Ok(None),
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.pos += 1;
                }
                Some(b'\n') => {
                    self.pos += 1;
                    self.line += 1;
                    return Ok(Some(Tok::Newline));
                }
                Some(b'/') if self.src.get(self.pos + 1) == Some(&b'/') => {
                    while let Some(c) = self.peek_byte() {
                        if c == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(_) => break,
            }
        }

        let c = self.src[self.pos];
        match c {
            b'{' => {
                self.pos += 1;
                Ok(Some(Tok::LBrace))
            }
            b'}' => {
                self.pos += 1;
                Ok(Some(Tok::RBrace))
            }
            b'[' => {
                self.pos += 1;
                Ok(Some(Tok::LBrack))
            }
            b']' => {
                self.pos += 1;
                Ok(Some(Tok::RBrack))
            }
            b'(' => {
                self.pos += 1;
                Ok(Some(Tok::LParen))
            }
            b')' => {
                self.pos += 1;
                Ok(Some(Tok::RParen))
            }
            b':' => {
                self.pos += 1;
                Ok(Some(Tok::Colon))
            }
            b',' => {
                self.pos += 1;
                Ok(Some(Tok::Comma))
            }
            b'?' => {
                self.pos += 1;
                Ok(Some(Tok::Question))
            }
            b'"' => {
                self.pos += 1;
                self.lex_string()?;
                Ok(Some(Tok::Str))
            }
            b'.' => {
                if self.src[self.pos..].starts_with(b"...") {
                    self.pos += 3;
                    Ok(Some(Tok::Ellipsis))
                } else {
                    self.pos += 1;
                    Ok(Some(Tok::Op(".".to_string())))
                }
            }
            b'!' => {
                if self.src.get(self.pos + 1) == Some(&b'=')
                    || self.src.get(self.pos + 1) == Some(&b'~')
                {
                    let op = &self.src[self.pos..self.pos + 2];
                    self.pos += 2;
                    Ok(Some(Tok::Op(String::from_utf8_lossy(op).into_owned())))
                } else {
                    self.pos += 1;
                    Ok(Some(Tok::Bang))
                }
            }
            b'=' | b'<' | b'>' | b'&' | b'|' | b'+' | b'-' | b'*' | b'/' | b'~' => {
                let two: &[u8] = self
                    .src
                    .get(self.pos..self.pos + 2)
                    .unwrap_or(&self.src[self.pos..]);
                let double = matches!(two, b"==" | b"<=" | b">=" | b"&&" | b"||" | b"=~");
                let len = if double { 2 } else { 1 };
                let op = String::from_utf8_lossy(&self.src[self.pos..self.pos + len]).into_owned();
                self.pos += len;
                Ok(Some(Tok::Op(op)))
            }
            c if c.is_ascii_digit() => {
                self.lex_number();
                Ok(Some(Tok::Number))
            }
            c if c.is_ascii_alphabetic() || c == b'_' || c == b'#' || c == b'$' => {
                let start = self.pos;
                while let Some(c) = self.peek_byte() {
                    if c.is_ascii_alphanumeric() || c == b'_' || c == b'#' || c == b'$' {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                Ok(Some(Tok::Ident(text)))
            }
            other => Err(self.error(&format!("unexpected character {:?}", other as char))),
        }
    }

    fn lex_number(&mut self) {
        if self.src[self.pos..].starts_with(b"0x") || self.src[self.pos..].starts_with(b"0X") {
            self.pos += 2;
            while let Some(c) = self.peek_byte() {
                if c.is_ascii_hexdigit() {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            return;
        }
        let mut prev = 0u8;
        while let Some(c) = self.peek_byte() {
            let is_exp_sign = (c == b'+' || c == b'-') && (prev == b'e' || prev == b'E');
            if c.is_ascii_digit() || c == b'.' || c == b'e' || c == b'E' || is_exp_sign {
                // Stop a trailing dot that belongs to a selector.
                if c == b'.'
                    && !self
                        .src
                        .get(self.pos + 1)
                        .map(|d| d.is_ascii_digit())
                        .unwrap_or(false)
                {
                    break;
                }
                prev = c;
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// Lexes a double-quoted string, verifying escape validity and
    /// balanced `\( … )` interpolations.
    fn lex_string(&mut self) -> LexResult<()> {
        loop {
            let Some(c) = self.peek_byte() else {
                return Err(self.error("unterminated string"));
            };
            match c {
                b'"' => {
                    self.pos += 1;
                    return Ok(());
                }
                b'\n' => return Err(self.error("newline in string")),
                b'\\' => {
                    self.pos += 1;
                    match self.peek_byte() {
                        Some(b'(') => {
                            self.pos += 1;
                            self.skip_interpolation()?;
                        }
                        Some(b'u') => {
                            self.pos += 1;
                            for _ in 0..4 {
                                match self.peek_byte() {
                                    Some(d) if d.is_ascii_hexdigit() => self.pos += 1,
                                    _ => return Err(self.error("invalid \\u escape")),
                                }
                            }
                        }
                        Some(b'n') | Some(b't') | Some(b'r') | Some(b'\\') | Some(b'"')
                        | Some(b'\'') | Some(b'/') | Some(b'0') => {
                            self.pos += 1;
                        }
                        _ => return Err(self.error("invalid escape in string")),
                    }
                }
                _ => self.pos += 1,
            }
        }
    }

    /// Skips a `\( … )` interpolation body, tracking nested brackets and
    /// strings.
    fn skip_interpolation(&mut self) -> LexResult<()> {
        let mut depth = 1usize;
        loop {
            let Some(c) = self.peek_byte() else {
                return Err(self.error("unterminated interpolation"));
            };
            match c {
                b'(' => {
                    depth += 1;
                    self.pos += 1;
                }
                b')' => {
                    depth -= 1;
                    self.pos += 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                b'"' => {
                    self.pos += 1;
                    self.lex_string()?;
                }
                b'\n' => return Err(self.error("newline in interpolation")),
                _ => self.pos += 1,
            }
        }
    }
}

struct Parser {
    toks: Vec<(Tok, usize)>,
    pos: usize,
}

impl Parser {
    fn error(&self, msg: &str) -> String {
        let line = self
            .toks
            .get(self.pos.min(self.toks.len().saturating_sub(1)))
            .map(|(_, l)| *l)
            .unwrap_or(0);
        format!("line {line}: {msg}")
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, n: usize) -> Option<&Tok> {
        self.toks.get(self.pos + n).map(|(t, _)| t)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).map(|(t, _)| t.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Some(Tok::Newline)) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> LexResult<()> {
        if self.peek() == Some(tok) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}, found {:?}", self.peek())))
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn parse_file(&mut self) -> LexResult<()> {
        self.skip_newlines();
        // Optional package clause.
        if let Some(Tok::Ident(name)) = self.peek() {
            if name == "package" {
                self.pos += 1;
                match self.bump() {
                    Some(Tok::Ident(_)) => {}
                    _ => return Err(self.error("expected package name")),
                }
            }
        }
        self.skip_newlines();
        while !self.at_end() {
            self.parse_decl()?;
            self.decl_separator(false)?;
        }
        Ok(())
    }

    /// Consumes the separator after a declaration: newline, comma, or
    /// (inside a struct) the closing brace.
    fn decl_separator(&mut self, in_struct: bool) -> LexResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(Tok::Newline) | Some(Tok::Comma) => {
                self.pos += 1;
                self.skip_newlines();
                Ok(())
            }
            Some(Tok::RBrace) if in_struct => Ok(()),
            other => Err(self.error(&format!("expected end of declaration, found {other:?}"))),
        }
    }

    fn parse_decl(&mut self) -> LexResult<()> {
        match self.peek() {
            Some(Tok::Ident(name)) if name == "import" => {
                self.pos += 1;
                match self.peek() {
                    Some(Tok::Str) => {
                        self.pos += 1;
                        Ok(())
                    }
                    Some(Tok::LParen) => {
                        self.pos += 1;
                        self.skip_newlines();
                        while self.peek() == Some(&Tok::Str) {
                            self.pos += 1;
                            self.skip_newlines();
                        }
                        self.expect(&Tok::RParen, ")")
                    }
                    _ => Err(self.error("expected import path")),
                }
            }
            Some(Tok::Ident(name)) if name == "if" => {
                self.pos += 1;
                self.parse_expr()?;
                self.expect(&Tok::LBrace, "{ after if condition")?;
                self.parse_struct_body()
            }
            Some(Tok::Ident(name)) if name == "for" => self.parse_for_comprehension(),
            Some(Tok::Ident(name)) if name == "let" => {
                self.pos += 1;
                match self.bump() {
                    Some(Tok::Ident(_)) => {}
                    _ => return Err(self.error("expected identifier after let")),
                }
                if self.peek() == Some(&Tok::Op("=".to_string())) {
                    self.pos += 1;
                }
                self.parse_expr()
            }
            Some(Tok::Ellipsis) => {
                self.pos += 1;
                // Optional constraint expression after "...".
                match self.peek() {
                    Some(Tok::Newline) | Some(Tok::Comma) | Some(Tok::RBrace) | None => Ok(()),
                    _ => self.parse_expr(),
                }
            }
            _ => self.parse_field_or_embedding(),
        }
    }

    fn parse_for_comprehension(&mut self) -> LexResult<()> {
        self.pos += 1; // for
        match self.bump() {
            Some(Tok::Ident(_)) => {}
            _ => return Err(self.error("expected identifier after for")),
        }
        if self.peek() == Some(&Tok::Comma) {
            self.pos += 1;
            match self.bump() {
                Some(Tok::Ident(_)) => {}
                _ => return Err(self.error("expected identifier after comma in for clause")),
            }
        }
        match self.bump() {
            Some(Tok::Ident(kw)) if kw == "in" => {}
            _ => return Err(self.error("expected 'in' in for clause")),
        }
        self.parse_expr()?;
        // Optional chained if guards.
        while matches!(self.peek(), Some(Tok::Ident(kw)) if kw == "if") {
            self.pos += 1;
            self.parse_expr()?;
        }
        self.expect(&Tok::LBrace, "{ after for clause")?;
        self.parse_struct_body()
    }

    /// Distinguishes `label: value` fields from embedded expressions by
    /// lookahead.
    fn parse_field_or_embedding(&mut self) -> LexResult<()> {
        let is_label = match self.peek() {
            Some(Tok::Ident(_)) | Some(Tok::Str) => match self.peek_at(1) {
                Some(Tok::Colon) => true,
                Some(Tok::Question) | Some(Tok::Bang) => self.peek_at(2) == Some(&Tok::Colon),
                _ => false,
            },
            Some(Tok::LParen) => {
                // (expr): — scan to the matching paren.
                let mut depth = 0usize;
                let mut i = 0usize;
                loop {
                    match self.peek_at(i) {
                        Some(Tok::LParen) => depth += 1,
                        Some(Tok::RParen) => {
                            depth -= 1;
                            if depth == 0 {
                                break self.peek_at(i + 1) == Some(&Tok::Colon);
                            }
                        }
                        None => break false,
                        _ => {}
                    }
                    i += 1;
                }
            }
            _ => false,
        };

        if !is_label {
            return self.parse_expr();
        }

        // Label.
        match self.peek() {
            Some(Tok::Ident(_)) | Some(Tok::Str) => {
                self.pos += 1;
            }
            Some(Tok::LParen) => {
                self.pos += 1;
                self.parse_expr()?;
                self.expect(&Tok::RParen, ") after dynamic label")?;
            }
            other => return Err(self.error(&format!("expected label, found {other:?}"))),
        }
        if matches!(self.peek(), Some(Tok::Question) | Some(Tok::Bang)) {
            self.pos += 1;
        }
        self.expect(&Tok::Colon, ":")?;
        // Nested labels: a: b: value.
        loop {
            let nested = matches!(self.peek(), Some(Tok::Ident(_)) | Some(Tok::Str))
                && self.peek_at(1) == Some(&Tok::Colon);
            if nested {
                self.pos += 2;
            } else {
                break;
            }
        }
        self.parse_expr()
    }

    fn parse_struct_body(&mut self) -> LexResult<()> {
        self.skip_newlines();
        while self.peek() != Some(&Tok::RBrace) {
            if self.at_end() {
                return Err(self.error("unclosed struct"));
            }
            self.parse_decl()?;
            self.decl_separator(true)?;
        }
        self.pos += 1; // }
        Ok(())
    }

    fn parse_expr(&mut self) -> LexResult<()> {
        self.parse_unary()?;
        while let Some(Tok::Op(op)) = self.peek() {
            let binary = matches!(
                op.as_str(),
                "|" | "&" | "||" | "&&" | "==" | "!=" | "<" | "<=" | ">" | ">=" | "+" | "-"
                    | "*" | "/" | "=~" | "!~"
            );
            if !binary {
                break;
            }
            self.pos += 1;
            self.skip_newlines();
            self.parse_unary()?;
        }
        Ok(())
    }

    fn parse_unary(&mut self) -> LexResult<()> {
        loop {
            match self.peek() {
                Some(Tok::Bang) => {
                    self.pos += 1;
                }
                Some(Tok::Op(op)) if matches!(op.as_str(), "*" | "-" | "+") => {
                    self.pos += 1;
                }
                _ => break,
            }
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> LexResult<()> {
        self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Tok::Op(op)) if op == "." => {
                    self.pos += 1;
                    match self.bump() {
                        Some(Tok::Ident(_)) | Some(Tok::Str) => {}
                        other => {
                            return Err(
                                self.error(&format!("expected selector, found {other:?}"))
                            )
                        }
                    }
                }
                Some(Tok::LBrack) => {
                    self.pos += 1;
                    self.parse_expr()?;
                    self.expect(&Tok::RBrack, "] after index")?;
                }
                Some(Tok::LParen) => {
                    self.pos += 1;
                    self.skip_newlines();
                    if self.peek() != Some(&Tok::RParen) {
                        loop {
                            self.parse_expr()?;
                            self.skip_newlines();
                            if self.peek() == Some(&Tok::Comma) {
                                self.pos += 1;
                                self.skip_newlines();
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect(&Tok::RParen, ") after call arguments")?;
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn parse_primary(&mut self) -> LexResult<()> {
        match self.peek() {
            Some(Tok::Ident(_)) | Some(Tok::Number) | Some(Tok::Str) => {
                self.pos += 1;
                Ok(())
            }
            Some(Tok::LParen) => {
                self.pos += 1;
                self.skip_newlines();
                self.parse_expr()?;
                self.skip_newlines();
                self.expect(&Tok::RParen, ")")
            }
            Some(Tok::LBrace) => {
                self.pos += 1;
                self.parse_struct_body()
            }
            Some(Tok::LBrack) => {
                self.pos += 1;
                self.parse_list_body()
            }
            other => Err(self.error(&format!("expected expression, found {other:?}"))),
        }
    }

    fn parse_list_body(&mut self) -> LexResult<()> {
        self.skip_newlines();
        while self.peek() != Some(&Tok::RBrack) {
            if self.at_end() {
                return Err(self.error("unclosed list"));
            }
            match self.peek() {
                Some(Tok::Ident(kw)) if kw == "for" => self.parse_for_comprehension()?,
                Some(Tok::Ident(kw)) if kw == "if" => {
                    self.pos += 1;
                    self.parse_expr()?;
                    self.expect(&Tok::LBrace, "{ after if in list")?;
                    self.parse_struct_body()?;
                }
                Some(Tok::Ellipsis) => {
                    self.pos += 1;
                    match self.peek() {
                        Some(Tok::RBrack) | Some(Tok::Comma) | Some(Tok::Newline) => {}
                        _ => self.parse_expr()?,
                    }
                }
                _ => self.parse_expr()?,
            }
            self.skip_newlines();
            if self.peek() == Some(&Tok::Comma) {
                self.pos += 1;
                self.skip_newlines();
            }
        }
        self.pos += 1; // ]
        Ok(())
    }
}

/// Parse-checks a CUE source fragment.
pub(crate) fn check(src: &str) -> std::result::Result<(), String> {
    let toks = Lexer::new(src).tokens()?;
    let mut parser = Parser { toks, pos: 0 };
    parser.parse_file()
}

static HELPER_IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(_[a-zA-Z][a-zA-Z0-9_]*)\b").expect("valid regex"));
static HELPER_DEF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#[a-zA-Z][a-zA-Z0-9_]*").expect("valid regex"));

/// Validates a helper body expression by stubbing out every referenced
/// hidden identifier and definition, then parse-checking the unit.
pub(crate) fn validate_helper_expr(
    expr: &str,
    imports: &std::collections::BTreeSet<String>,
) -> std::result::Result<(), String> {
    let mut refs: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
    for m in HELPER_IDENT_RE.find_iter(expr) {
        refs.insert(m.as_str());
    }
    for m in HELPER_DEF_RE.find_iter(expr) {
        refs.insert(m.as_str());
    }

    let mut src = String::new();
    let used: Vec<&String> = imports
        .iter()
        .filter(|pkg| {
            let short = pkg.rsplit('/').next().unwrap_or(pkg);
            expr.contains(&format!("{short}."))
        })
        .collect();
    match used.len() {
        0 => {}
        1 => src.push_str(&format!("import \"{}\"\n", used[0])),
        _ => {
            src.push_str("import (\n");
            for pkg in used {
                src.push_str(&format!("\t\"{pkg}\"\n"));
            }
            src.push_str(")\n");
        }
    }

    for r in refs {
        src.push_str(&format!("{r}: _\n"));
    }
    src.push_str(&format!("_test: {expr}\n"));

    check(&src)
}

/// Parse-checks a template body wrapped as `_body: { … }` under any
/// top-level guards.
pub(crate) fn validate_template_body(body: &str, guards: &[String]) -> Result<()> {
    let body = body.trim_end_matches('\n');
    if body.is_empty() {
        return Ok(());
    }

    let mut src = String::new();
    let mut indent = 0;
    for guard in guards {
        crate::cue::write_indent(&mut src, indent);
        src.push_str(&format!("if {guard} {{\n"));
        indent += 1;
    }
    crate::cue::write_indent(&mut src, indent);
    src.push_str("_body: {\n");
    for line in body.split('\n') {
        crate::cue::write_indent(&mut src, indent + 1);
        src.push_str(line);
        src.push('\n');
    }
    crate::cue::write_indent(&mut src, indent);
    src.push_str("}\n");
    for i in (0..guards.len()).rev() {
        crate::cue::write_indent(&mut src, i);
        src.push_str("}\n");
    }

    check(&src).map_err(|e| {
        if std::env::var("HELMCUE_DEBUG").as_deref() == Ok("1") {
            eprintln!("helmcue: invalid CUE body:\n{src}");
        }
        ConvertError::InvalidOutput(e)
    })
}

/// Canonicalizes assembled output: parse-checks it, strips trailing
/// whitespace, collapses blank-line runs, and guarantees one trailing
/// newline. Running it on its own output is byte-identical.
pub(crate) fn format_source(src: &str) -> Result<String> {
    check(src).map_err(|e| {
        if std::env::var("HELMCUE_DEBUG").as_deref() == Ok("1") {
            eprintln!("helmcue: invalid CUE output:\n{src}");
        }
        ConvertError::InvalidOutput(e)
    })?;

    let mut out = String::with_capacity(src.len());
    let mut blank_run = 0usize;
    let mut wrote_any = false;
    for line in src.split('\n') {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if wrote_any && blank_run > 0 {
            out.push('\n');
        }
        blank_run = 0;
        wrote_any = true;
        out.push_str(line);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_fields() {
        assert!(check("name: \"test\"\nport: 80\n").is_ok());
    }

    #[test]
    fn accepts_nested_structs_and_lists() {
        assert!(check("a: {\n\tb: [1, 2, 3]\n\tc: {\n\t\td: true\n\t}\n}\n").is_ok());
    }

    #[test]
    fn accepts_guards_and_comprehensions() {
        let src = "if (_nonzero & {#arg: #values.debug, _}) {\n\tlogLevel: \"debug\"\n}\n\
                   if !(_nonzero & {#arg: #values.debug, _}) {\n\tlogLevel: \"info\"\n}\n";
        assert!(check(src).is_ok());

        let src = "features: [\n\tfor _, _range0 in #values.features {\n\t\t_range0\n\t},\n]\n";
        assert!(check(src).is_ok());
    }

    #[test]
    fn accepts_interpolation() {
        assert!(check("name: \"\\(#release.Name)-\\(#chart.Name)\"\n").is_ok());
        assert!(check("x: \"pre-\\(_trunc.out)-post\"\n").is_ok());
    }

    #[test]
    fn accepts_schema_forms() {
        let src = "#values: {\n\tport: *8080 | (bool | number | string | null)\n\
                   \tname!: bool | number | string | null\n\titems?: [...{\n\t\tk?: _\n\t\t...\n\t}]\n\t...\n}\n";
        assert!(check(src).is_ok());
    }

    #[test]
    fn accepts_calls_defaults_and_index_tricks() {
        assert!(check("x: strings.TrimSuffix(#values.name, \"-\")\n").is_ok());
        assert!(check("y: [if (_nonzero & {#arg: a, _}) {a}, b][0]\n").is_ok());
        assert!(check("z: _helpers[\"my.name\"] & {#arg: #values.x, _}\n").is_ok());
        assert!(check("w: yaml.Unmarshal(template.Execute(#values.t, _tplContext))\n").is_ok());
    }

    #[test]
    fn accepts_bottom_dispatch() {
        // The _nonzero definition's type-dispatch shape.
        assert!(check(crate::helm::NONZERO_DEF).is_ok());
        assert!(check(crate::helm::SEMVER_COMPARE_DEF).is_ok());
        assert!(check(crate::helm::TRUNC_DEF).is_ok());
        assert!(check(crate::helm::LAST_DEF).is_ok());
        assert!(check(crate::helm::COMPACT_DEF).is_ok());
        assert!(check(crate::helm::UNIQ_DEF).is_ok());
    }

    #[test]
    fn rejects_unbalanced_and_garbage() {
        assert!(check("a: {\n").is_err());
        assert!(check("a: [1, 2\n").is_err());
        assert!(check("a: \"unterminated\n").is_err());
        assert!(check("a: }\n").is_err());
        assert!(check("a b c\n").is_err());
    }

    #[test]
    fn dynamic_labels() {
        assert!(check("(_key0): \"value\"\n").is_ok());
    }

    #[test]
    fn helper_expr_validation() {
        let imports = std::collections::BTreeSet::new();
        assert!(validate_helper_expr("\"plain\"", &imports).is_ok());
        assert!(
            validate_helper_expr("{\n\t#arg: _\n\tapp: #arg.name\n}", &imports).is_ok()
        );
        assert!(validate_helper_expr("{ unclosed", &imports).is_err());
    }

    #[test]
    fn formatter_is_idempotent() {
        let src = "a: 1\n\n\n\nb: 2   \n";
        let once = format_source(src).unwrap();
        let twice = format_source(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, "a: 1\n\nb: 2\n");
    }
}
