//! Template lexer: splits source into literal text and delimited actions,
//! then tokenizes action contents.
//!
//! Handles whitespace-trim markers (`{{-` / `-}}`), comments
//! (`{{/* ... */}}`), and quoted or raw strings inside actions so a close
//! delimiter inside a string does not end the action.

use crate::error::{Error, Result};

/// A raw segment of template source.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Text(String),
    Action(Vec<Tok>),
}

/// One token inside an action.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    /// Keyword, function name, or `true`/`false`/`nil` (resolved by the parser).
    Ident(String),
    /// `$name` with an optional trailing dotted path; name is empty for bare `$`.
    Var(String, Vec<String>),
    /// `.a.b`; the empty path is the bare dot.
    Field(Vec<String>),
    Str(String),
    Int(i64),
    Float(f64),
    Pipe,
    LParen,
    RParen,
    Comma,
    ColonEq,
    Assign,
}

struct RawAction {
    inner: String,
    trim_left: bool,
    trim_right: bool,
    comment: bool,
}

enum RawSeg {
    Text(String),
    Action(RawAction),
}

/// Split template source into text and tokenized actions.
pub(crate) fn lex(source: &str, open: &str, close: &str) -> Result<Vec<Segment>> {
    let raw = segment(source, open, close)?;
    let trimmed = apply_trims(raw);

    let mut out = Vec::with_capacity(trimmed.len());
    for seg in trimmed {
        match seg {
            RawSeg::Text(t) => {
                if !t.is_empty() {
                    out.push(Segment::Text(t));
                }
            }
            RawSeg::Action(a) => {
                if !a.comment {
                    out.push(Segment::Action(tokenize_action(&a.inner)?));
                }
            }
        }
    }
    Ok(out)
}

fn segment(source: &str, open: &str, close: &str) -> Result<Vec<RawSeg>> {
    let mut segs = Vec::new();
    let mut rest = source;

    while let Some(start) = rest.find(open) {
        if start > 0 {
            segs.push(RawSeg::Text(rest[..start].to_string()));
        }
        let after_open = &rest[start + open.len()..];
        let (mut inner, consumed) = scan_action_body(after_open, close)?;
        rest = &after_open[consumed..];

        let mut trim_left = false;
        let mut trim_right = false;
        if let Some(stripped) = inner.strip_prefix('-') {
            if stripped.is_empty() || stripped.starts_with(|c: char| c.is_ascii_whitespace()) {
                trim_left = true;
                inner = stripped.to_string();
            }
        }
        if let Some(stripped) = inner.strip_suffix('-') {
            if stripped.is_empty() || stripped.ends_with(|c: char| c.is_ascii_whitespace()) {
                trim_right = true;
                inner = stripped.to_string();
            }
        }

        let body = inner.trim();
        let comment = body.starts_with("/*");
        if comment && !body.ends_with("*/") {
            return Err(Error::TemplateParse("unclosed comment".to_string()));
        }
        segs.push(RawSeg::Action(RawAction {
            inner,
            trim_left,
            trim_right,
            comment,
        }));
    }
    if !rest.is_empty() {
        segs.push(RawSeg::Text(rest.to_string()));
    }
    Ok(segs)
}

/// Scan to the closing delimiter, skipping over quoted and raw strings.
/// Returns the action body and the offset just past the close delimiter.
fn scan_action_body(input: &str, close: &str) -> Result<(String, usize)> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(Error::TemplateParse("unterminated string".to_string()));
                }
                i += 1;
            }
            b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(Error::TemplateParse("unterminated raw string".to_string()));
                }
                i += 1;
            }
            _ => {
                if bytes[i..].starts_with(close.as_bytes()) {
                    return Ok((input[..i].to_string(), i + close.len()));
                }
                i += 1;
            }
        }
    }
    Err(Error::TemplateParse("unclosed action".to_string()))
}

fn apply_trims(raw: Vec<RawSeg>) -> Vec<RawSeg> {
    let mut segs = raw;
    let len = segs.len();
    for i in 0..len {
        let (trim_left, trim_right) = match &segs[i] {
            RawSeg::Action(a) => (a.trim_left, a.trim_right),
            RawSeg::Text(_) => continue,
        };
        if trim_left && i > 0 {
            if let RawSeg::Text(t) = &mut segs[i - 1] {
                *t = t.trim_end().to_string();
            }
        }
        if trim_right && i + 1 < len {
            if let RawSeg::Text(t) = &mut segs[i + 1] {
                *t = t.trim_start().to_string();
            }
        }
    }
    segs
}

fn tokenize_action(inner: &str) -> Result<Vec<Tok>> {
    let chars: Vec<char> = inner.chars().collect();
    let mut toks = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let ch = chars[pos];
        match ch {
            c if c.is_ascii_whitespace() => pos += 1,
            '|' => {
                toks.push(Tok::Pipe);
                pos += 1;
            }
            '(' => {
                toks.push(Tok::LParen);
                pos += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                pos += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                pos += 1;
            }
            ':' => {
                if chars.get(pos + 1) == Some(&'=') {
                    toks.push(Tok::ColonEq);
                    pos += 2;
                } else {
                    return Err(Error::TemplateParse("unexpected ':'".to_string()));
                }
            }
            '=' => {
                toks.push(Tok::Assign);
                pos += 1;
            }
            '"' => {
                let (s, next) = scan_quoted(&chars, pos)?;
                toks.push(Tok::Str(s));
                pos = next;
            }
            '`' => {
                let (s, next) = scan_raw(&chars, pos)?;
                toks.push(Tok::Str(s));
                pos = next;
            }
            '.' => {
                let (path, next) = scan_path(&chars, pos);
                toks.push(Tok::Field(path));
                pos = next;
            }
            '$' => {
                pos += 1;
                let name = scan_ident(&chars, &mut pos);
                let (path, next) = if chars.get(pos) == Some(&'.') {
                    scan_path(&chars, pos)
                } else {
                    (Vec::new(), pos)
                };
                toks.push(Tok::Var(name, path));
                pos = next;
            }
            c if c.is_ascii_digit() || c == '-' => {
                let (tok, next) = scan_number(&chars, pos)?;
                toks.push(tok);
                pos = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let name = scan_ident(&chars, &mut pos);
                toks.push(Tok::Ident(name));
            }
            other => {
                return Err(Error::TemplateParse(format!(
                    "unexpected character '{other}' in action"
                )));
            }
        }
    }
    Ok(toks)
}

fn scan_ident(chars: &[char], pos: &mut usize) -> String {
    let mut name = String::new();
    while let Some(&c) = chars.get(*pos) {
        if c.is_alphanumeric() || c == '_' {
            name.push(c);
            *pos += 1;
        } else {
            break;
        }
    }
    name
}

/// Scan a dotted path starting at a '.'; the empty path is the bare dot.
fn scan_path(chars: &[char], start: usize) -> (Vec<String>, usize) {
    let mut path = Vec::new();
    let mut pos = start;
    while chars.get(pos) == Some(&'.') {
        pos += 1;
        let mut seg = String::new();
        while let Some(&c) = chars.get(pos) {
            if c.is_alphanumeric() || c == '_' {
                seg.push(c);
                pos += 1;
            } else {
                break;
            }
        }
        if seg.is_empty() {
            break;
        }
        path.push(seg);
    }
    (path, pos)
}

fn scan_quoted(chars: &[char], start: usize) -> Result<(String, usize)> {
    let mut s = String::new();
    let mut pos = start + 1;
    while pos < chars.len() {
        match chars[pos] {
            '"' => return Ok((s, pos + 1)),
            '\\' => {
                pos += 1;
                match chars.get(pos) {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('\\') => s.push('\\'),
                    Some('"') => s.push('"'),
                    Some(&other) => s.push(other),
                    None => break,
                }
                pos += 1;
            }
            c => {
                s.push(c);
                pos += 1;
            }
        }
    }
    Err(Error::TemplateParse("unterminated string".to_string()))
}

fn scan_raw(chars: &[char], start: usize) -> Result<(String, usize)> {
    let mut s = String::new();
    let mut pos = start + 1;
    while pos < chars.len() {
        if chars[pos] == '`' {
            return Ok((s, pos + 1));
        }
        s.push(chars[pos]);
        pos += 1;
    }
    Err(Error::TemplateParse("unterminated raw string".to_string()))
}

fn scan_number(chars: &[char], start: usize) -> Result<(Tok, usize)> {
    let mut pos = start;
    let mut text = String::new();
    if chars[pos] == '-' {
        text.push('-');
        pos += 1;
        if !matches!(chars.get(pos), Some(c) if c.is_ascii_digit()) {
            return Err(Error::TemplateParse("unexpected '-' in action".to_string()));
        }
    }
    let mut is_float = false;
    while let Some(&c) = chars.get(pos) {
        if c.is_ascii_digit() {
            text.push(c);
            pos += 1;
        } else if c == '.' && !is_float && matches!(chars.get(pos + 1), Some(d) if d.is_ascii_digit())
        {
            is_float = true;
            text.push(c);
            pos += 1;
        } else {
            break;
        }
    }
    let tok = if is_float {
        Tok::Float(
            text.parse()
                .map_err(|_| Error::TemplateParse(format!("invalid number {text:?}")))?,
        )
    } else {
        Tok::Int(
            text.parse()
                .map_err(|_| Error::TemplateParse(format!("invalid number {text:?}")))?,
        )
    };
    Ok((tok, pos))
}
