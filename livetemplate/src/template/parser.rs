//! Recursive-descent parser from lexed segments to a construct tree.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::collections::HashSet;

use super::ast::*;
use super::lexer::{Segment, Tok};
use crate::error::{Error, Result};

/// Built-in functions accepted inside pipelines.
pub(crate) static BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["eq", "ne", "lt", "le", "gt", "ge", "and", "or", "not", "len", "index"]
        .into_iter()
        .collect()
});

const KEYWORDS: &[&str] = &[
    "if", "else", "end", "range", "with", "template", "block", "define", "break", "continue",
];

/// How a nested block was terminated.
enum Terminator {
    End,
    Else,
    ElseIf(Pipeline),
}

pub(crate) fn parse(segments: Vec<Segment>) -> Result<ParseOutput> {
    let mut parser = Parser {
        segs: segments,
        pos: 0,
        defines: IndexMap::new(),
        range_depth: 0,
    };
    let root = parser.parse_top()?;
    Ok(ParseOutput {
        root,
        defines: parser.defines,
    })
}

struct Parser {
    segs: Vec<Segment>,
    pos: usize,
    defines: IndexMap<String, Block>,
    range_depth: usize,
}

impl Parser {
    fn parse_top(&mut self) -> Result<Block> {
        let (block, term) = self.parse_block()?;
        match term {
            None => Ok(block),
            Some(Terminator::End) => Err(Error::TemplateParse("unexpected {{end}}".to_string())),
            Some(_) => Err(Error::TemplateParse("unexpected {{else}}".to_string())),
        }
    }

    /// Parse nodes until a terminator action or the end of input.
    fn parse_block(&mut self) -> Result<(Block, Option<Terminator>)> {
        let mut nodes = Vec::new();
        while self.pos < self.segs.len() {
            let seg = self.segs[self.pos].clone();
            self.pos += 1;
            match seg {
                Segment::Text(t) => nodes.push(Node::Static(t)),
                Segment::Action(toks) => {
                    if toks.is_empty() {
                        return Err(Error::TemplateParse("empty action".to_string()));
                    }
                    match keyword_of(&toks) {
                        Some("end") => {
                            expect_no_more(&toks[1..], "end")?;
                            return Ok((Block { nodes }, Some(Terminator::End)));
                        }
                        Some("else") => {
                            let term = if toks.len() == 1 {
                                Terminator::Else
                            } else if keyword_at(&toks, 1) == Some("if") {
                                Terminator::ElseIf(parse_pipeline(&toks[2..])?)
                            } else {
                                return Err(Error::TemplateParse(
                                    "unexpected tokens after else".to_string(),
                                ));
                            };
                            return Ok((Block { nodes }, Some(term)));
                        }
                        Some("if") => nodes.push(self.parse_cond(parse_pipeline(&toks[1..])?)?),
                        Some("range") => nodes.push(self.parse_range(&toks[1..])?),
                        Some("with") => nodes.push(self.parse_with(&toks[1..])?),
                        Some("template") => nodes.push(parse_invoke(&toks[1..])?),
                        Some("block") => nodes.push(self.parse_block_action(&toks[1..])?),
                        Some("define") => self.parse_define(&toks[1..])?,
                        Some("break") => {
                            expect_no_more(&toks[1..], "break")?;
                            if self.range_depth == 0 {
                                return Err(Error::TemplateParse(
                                    "{{break}} outside of range".to_string(),
                                ));
                            }
                            nodes.push(Node::Break);
                        }
                        Some("continue") => {
                            expect_no_more(&toks[1..], "continue")?;
                            if self.range_depth == 0 {
                                return Err(Error::TemplateParse(
                                    "{{continue}} outside of range".to_string(),
                                ));
                            }
                            nodes.push(Node::Continue);
                        }
                        _ => {
                            let pipeline = parse_pipeline(&toks)?;
                            if pipeline.decl.is_some() {
                                nodes.push(Node::Decl(pipeline));
                            } else {
                                nodes.push(Node::Field(pipeline));
                            }
                        }
                    }
                }
            }
        }
        Ok((Block { nodes }, None))
    }

    /// Parse a block that must be terminated, never left open at EOF.
    fn parse_nested(&mut self, context: &str) -> Result<(Block, Terminator)> {
        let (block, term) = self.parse_block()?;
        match term {
            Some(t) => Ok((block, t)),
            None => Err(Error::TemplateParse(format!(
                "unterminated {context}: missing {{{{end}}}}"
            ))),
        }
    }

    fn parse_cond(&mut self, guard: Pipeline) -> Result<Node> {
        let mut clauses = Vec::new();
        let mut else_block = None;
        let mut pending = guard;
        loop {
            let (body, term) = self.parse_nested("if")?;
            clauses.push((pending, body));
            match term {
                Terminator::End => break,
                Terminator::ElseIf(next) => pending = next,
                Terminator::Else => {
                    let (body, term) = self.parse_nested("else")?;
                    match term {
                        Terminator::End => {
                            else_block = Some(body);
                            break;
                        }
                        _ => {
                            return Err(Error::TemplateParse(
                                "unexpected {{else}} after {{else}}".to_string(),
                            ))
                        }
                    }
                }
            }
        }
        Ok(Node::Cond(CondNode {
            clauses,
            else_block,
        }))
    }

    fn parse_range(&mut self, toks: &[Tok]) -> Result<Node> {
        let mut pipeline = parse_pipeline(toks)?;
        let (index_var, value_var) = match pipeline.decl.take() {
            None => (None, None),
            Some(decl) => match decl.vars.len() {
                1 => (None, Some(decl.vars.into_iter().next().unwrap())),
                2 => {
                    let mut it = decl.vars.into_iter();
                    (Some(it.next().unwrap()), Some(it.next().unwrap()))
                }
                n => {
                    return Err(Error::TemplateParse(format!(
                        "range declares {n} variables, want 1 or 2"
                    )))
                }
            },
        };

        self.range_depth += 1;
        let result = self.parse_nested("range");
        self.range_depth -= 1;
        let (body, term) = result?;

        let else_block = match term {
            Terminator::End => None,
            Terminator::Else => {
                let (body, term) = self.parse_nested("range else")?;
                match term {
                    Terminator::End => Some(body),
                    _ => {
                        return Err(Error::TemplateParse(
                            "unexpected {{else}} after range {{else}}".to_string(),
                        ))
                    }
                }
            }
            Terminator::ElseIf(_) => {
                return Err(Error::TemplateParse(
                    "unexpected {{else if}} in range".to_string(),
                ))
            }
        };
        Ok(Node::Range(RangeNode {
            pipeline,
            index_var,
            value_var,
            body,
            else_block,
        }))
    }

    fn parse_with(&mut self, toks: &[Tok]) -> Result<Node> {
        let pipeline = parse_pipeline(toks)?;
        let (body, term) = self.parse_nested("with")?;
        let else_block = match term {
            Terminator::End => None,
            Terminator::Else => {
                let (body, term) = self.parse_nested("with else")?;
                match term {
                    Terminator::End => Some(body),
                    _ => {
                        return Err(Error::TemplateParse(
                            "unexpected {{else}} after with {{else}}".to_string(),
                        ))
                    }
                }
            }
            Terminator::ElseIf(_) => {
                return Err(Error::TemplateParse(
                    "unexpected {{else if}} in with".to_string(),
                ))
            }
        };
        Ok(Node::With(WithNode {
            pipeline,
            body,
            else_block,
        }))
    }

    /// `{{block "name" pipeline}}body{{end}}` defines and invokes in place.
    fn parse_block_action(&mut self, toks: &[Tok]) -> Result<Node> {
        let (name, rest) = take_name(toks, "block")?;
        let pipeline = invoke_pipeline(rest)?;
        let (body, term) = self.parse_nested("block")?;
        match term {
            Terminator::End => {}
            _ => {
                return Err(Error::TemplateParse(
                    "unexpected {{else}} in block".to_string(),
                ))
            }
        }
        self.add_define(name.clone(), body)?;
        Ok(Node::Invoke(InvokeNode { name, pipeline }))
    }

    fn parse_define(&mut self, toks: &[Tok]) -> Result<()> {
        let (name, rest) = take_name(toks, "define")?;
        expect_no_more(rest, "define")?;
        let (body, term) = self.parse_nested("define")?;
        match term {
            Terminator::End => {}
            _ => {
                return Err(Error::TemplateParse(
                    "unexpected {{else}} in define".to_string(),
                ))
            }
        }
        self.add_define(name, body)
    }

    fn add_define(&mut self, name: String, body: Block) -> Result<()> {
        if self.defines.contains_key(&name) {
            return Err(Error::TemplateParse(format!(
                "multiple definition of template {name:?}"
            )));
        }
        self.defines.insert(name, body);
        Ok(())
    }
}

fn keyword_of(toks: &[Tok]) -> Option<&str> {
    keyword_at(toks, 0)
}

fn keyword_at(toks: &[Tok], idx: usize) -> Option<&str> {
    match toks.get(idx) {
        Some(Tok::Ident(name)) if KEYWORDS.contains(&name.as_str()) => Some(name.as_str()),
        _ => None,
    }
}

fn expect_no_more(rest: &[Tok], what: &str) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(Error::TemplateParse(format!(
            "unexpected tokens after {what}"
        )))
    }
}

fn take_name<'t>(toks: &'t [Tok], what: &str) -> Result<(String, &'t [Tok])> {
    match toks.first() {
        Some(Tok::Str(name)) => Ok((name.clone(), &toks[1..])),
        _ => Err(Error::TemplateParse(format!(
            "{what} requires a quoted template name"
        ))),
    }
}

fn parse_invoke(toks: &[Tok]) -> Result<Node> {
    let (name, rest) = take_name(toks, "template")?;
    let pipeline = invoke_pipeline(rest)?;
    Ok(Node::Invoke(InvokeNode { name, pipeline }))
}

/// The argument pipeline of a template/block invocation; the current dot
/// when no argument is given.
fn invoke_pipeline(rest: &[Tok]) -> Result<Pipeline> {
    if rest.is_empty() {
        Ok(Pipeline {
            decl: None,
            commands: vec![Command {
                head: Expr::Dot,
                args: vec![],
            }],
        })
    } else {
        parse_pipeline(rest)
    }
}

/// Parse `$a, $b := cmd arg | cmd arg` token runs.
pub(crate) fn parse_pipeline(toks: &[Tok]) -> Result<Pipeline> {
    let (decl, rest) = parse_decl(toks)?;
    if rest.is_empty() {
        return Err(Error::TemplateParse("missing value in pipeline".to_string()));
    }
    let mut commands = Vec::new();
    for chunk in split_pipes(rest)? {
        commands.push(parse_command(chunk)?);
    }
    Ok(Pipeline { decl, commands })
}

fn parse_decl(toks: &[Tok]) -> Result<(Option<Decl>, &[Tok])> {
    let mut vars = Vec::new();
    let mut pos = 0;
    loop {
        match toks.get(pos) {
            Some(Tok::Var(name, path)) if path.is_empty() && !name.is_empty() => {
                vars.push(name.clone());
                pos += 1;
            }
            _ => break,
        }
        match toks.get(pos) {
            Some(Tok::Comma) => pos += 1,
            Some(Tok::ColonEq) => {
                return Ok((
                    Some(Decl {
                        vars,
                        assign: false,
                    }),
                    &toks[pos + 1..],
                ));
            }
            Some(Tok::Assign) => {
                if vars.len() != 1 {
                    return Err(Error::TemplateParse(
                        "assignment requires exactly one variable".to_string(),
                    ));
                }
                return Ok((Some(Decl { vars, assign: true }), &toks[pos + 1..]));
            }
            _ => break,
        }
    }
    Ok((None, toks))
}

/// Split a token run on `|` at parenthesis depth zero.
fn split_pipes(toks: &[Tok]) -> Result<Vec<&[Tok]>> {
    let mut chunks = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, tok) in toks.iter().enumerate() {
        match tok {
            Tok::LParen => depth += 1,
            Tok::RParen => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| Error::TemplateParse("unbalanced ')'".to_string()))?;
            }
            Tok::Pipe if depth == 0 => {
                chunks.push(&toks[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(Error::TemplateParse("unbalanced '('".to_string()));
    }
    chunks.push(&toks[start..]);
    Ok(chunks)
}

fn parse_command(toks: &[Tok]) -> Result<Command> {
    if toks.is_empty() {
        return Err(Error::TemplateParse("empty pipeline stage".to_string()));
    }
    let mut exprs = Vec::new();
    let mut pos = 0;
    while pos < toks.len() {
        let (expr, next) = parse_expr(toks, pos, exprs.is_empty())?;
        exprs.push(expr);
        pos = next;
    }
    let mut it = exprs.into_iter();
    let head = match it.next() {
        Some(head) => head,
        None => return Err(Error::TemplateParse("empty pipeline stage".to_string())),
    };
    let args: Vec<Expr> = it.collect();
    if !args.is_empty() && !matches!(head, Expr::Func(_)) {
        return Err(Error::TemplateParse(
            "arguments given to a non-function expression".to_string(),
        ));
    }
    Ok(Command { head, args })
}

fn parse_expr(toks: &[Tok], pos: usize, is_head: bool) -> Result<(Expr, usize)> {
    match &toks[pos] {
        Tok::Field(path) => {
            let expr = if path.is_empty() {
                Expr::Dot
            } else {
                Expr::Field(path.clone())
            };
            Ok((expr, pos + 1))
        }
        Tok::Var(name, path) => {
            let expr = if name.is_empty() && path.is_empty() {
                Expr::Root
            } else {
                Expr::Var(name.clone(), path.clone())
            };
            Ok((expr, pos + 1))
        }
        Tok::Str(s) => Ok((Expr::Str(s.clone()), pos + 1)),
        Tok::Int(n) => Ok((Expr::Int(*n), pos + 1)),
        Tok::Float(f) => Ok((Expr::Float(*f), pos + 1)),
        Tok::Ident(name) => match name.as_str() {
            "true" => Ok((Expr::Bool(true), pos + 1)),
            "false" => Ok((Expr::Bool(false), pos + 1)),
            "nil" => Ok((Expr::Nil, pos + 1)),
            n if BUILTINS.contains(n) => {
                if is_head {
                    Ok((Expr::Func(name.clone()), pos + 1))
                } else {
                    Err(Error::TemplateParse(format!(
                        "function {name:?} must be parenthesized when used as an argument"
                    )))
                }
            }
            _ => Err(Error::TemplateParse(format!(
                "unsupported function {name:?}"
            ))),
        },
        Tok::LParen => {
            let close = matching_paren(toks, pos)?;
            let inner = parse_pipeline(&toks[pos + 1..close])?;
            Ok((Expr::Paren(Box::new(inner)), close + 1))
        }
        other => Err(Error::TemplateParse(format!(
            "unexpected token {other:?} in pipeline"
        ))),
    }
}

fn matching_paren(toks: &[Tok], open: usize) -> Result<usize> {
    let mut depth = 0usize;
    for (i, tok) in toks.iter().enumerate().skip(open) {
        match tok {
            Tok::LParen => depth += 1,
            Tok::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(Error::TemplateParse("unbalanced '('".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::lexer::lex;

    fn parse_src(src: &str) -> Result<ParseOutput> {
        parse(lex(src, "{{", "}}")?)
    }

    #[test]
    fn field_between_statics() {
        let out = parse_src("<p>Hello {{.Name}}!</p>").unwrap();
        assert_eq!(out.root.nodes.len(), 3);
        assert!(matches!(&out.root.nodes[0], Node::Static(s) if s == "<p>Hello "));
        assert!(matches!(&out.root.nodes[1], Node::Field(_)));
        assert!(matches!(&out.root.nodes[2], Node::Static(s) if s == "!</p>"));
    }

    #[test]
    fn if_else_chain() {
        let out = parse_src("{{if .A}}a{{else if .B}}b{{else}}c{{end}}").unwrap();
        match &out.root.nodes[0] {
            Node::Cond(cond) => {
                assert_eq!(cond.clauses.len(), 2);
                assert!(cond.else_block.is_some());
            }
            other => panic!("expected cond, got {other:?}"),
        }
    }

    #[test]
    fn range_with_variables() {
        let out = parse_src("{{range $i, $v := .Items}}{{$i}}:{{$v}}{{end}}").unwrap();
        match &out.root.nodes[0] {
            Node::Range(range) => {
                assert_eq!(range.index_var.as_deref(), Some("i"));
                assert_eq!(range.value_var.as_deref(), Some("v"));
                assert!(range.else_block.is_none());
            }
            other => panic!("expected range, got {other:?}"),
        }
    }

    #[test]
    fn single_range_variable_is_the_element() {
        let out = parse_src("{{range $v := .Items}}{{$v}}{{end}}").unwrap();
        match &out.root.nodes[0] {
            Node::Range(range) => {
                assert_eq!(range.index_var, None);
                assert_eq!(range.value_var.as_deref(), Some("v"));
            }
            other => panic!("expected range, got {other:?}"),
        }
    }

    #[test]
    fn range_else_branch() {
        let out = parse_src("{{range .Items}}x{{else}}empty{{end}}").unwrap();
        match &out.root.nodes[0] {
            Node::Range(range) => assert!(range.else_block.is_some()),
            other => panic!("expected range, got {other:?}"),
        }
    }

    #[test]
    fn with_else() {
        let out = parse_src("{{with .User}}{{.Name}}{{else}}anon{{end}}").unwrap();
        match &out.root.nodes[0] {
            Node::With(with) => assert!(with.else_block.is_some()),
            other => panic!("expected with, got {other:?}"),
        }
    }

    #[test]
    fn define_goes_to_the_table_not_the_flow() {
        let out = parse_src("a{{define \"x\"}}body{{end}}b").unwrap();
        assert_eq!(out.defines.len(), 1);
        assert!(out.defines.contains_key("x"));
        assert_eq!(out.root.nodes.len(), 2);
    }

    #[test]
    fn block_defines_and_invokes() {
        let out = parse_src("{{block \"x\" .}}body{{end}}").unwrap();
        assert!(out.defines.contains_key("x"));
        assert!(matches!(&out.root.nodes[0], Node::Invoke(inv) if inv.name == "x"));
    }

    #[test]
    fn declaration_action_is_not_a_field() {
        let out = parse_src("{{$v := .Path}}{{$v}}").unwrap();
        assert!(matches!(&out.root.nodes[0], Node::Decl(_)));
        assert!(matches!(&out.root.nodes[1], Node::Field(_)));
    }

    #[test]
    fn pipeline_with_stages_and_parens() {
        let out = parse_src("{{if ge (len .Items) 1}}yes{{end}}").unwrap();
        match &out.root.nodes[0] {
            Node::Cond(cond) => {
                let guard = &cond.clauses[0].0;
                assert_eq!(guard.commands.len(), 1);
                assert!(matches!(guard.commands[0].head, Expr::Func(ref n) if n == "ge"));
            }
            other => panic!("expected cond, got {other:?}"),
        }
    }

    #[test]
    fn unbalanced_end_is_an_error() {
        assert!(parse_src("{{end}}").is_err());
        assert!(parse_src("{{if .A}}x").is_err());
    }

    #[test]
    fn break_outside_range_is_an_error() {
        assert!(parse_src("{{break}}").is_err());
        assert!(parse_src("{{range .Items}}{{break}}{{end}}").is_ok());
    }

    #[test]
    fn unsupported_function_is_an_error() {
        let err = parse_src("{{printf .X}}").unwrap_err();
        assert!(err.to_string().contains("unsupported function"));
    }

    #[test]
    fn duplicate_define_is_an_error() {
        assert!(parse_src("{{define \"x\"}}a{{end}}{{define \"x\"}}b{{end}}").is_err());
    }

    #[test]
    fn statics_keep_source_order() {
        let out = parse_src("a{{.X}}a{{.Y}}a").unwrap();
        let statics: Vec<_> = out
            .root
            .nodes
            .iter()
            .filter_map(|n| match n {
                Node::Static(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(statics, vec!["a", "a", "a"]);
    }
}
