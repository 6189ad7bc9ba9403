//! Construct-tree node types produced by the template parser.
//!
//! A compiled template is an ordered sequence of segments: literal text
//! interleaved with typed dynamic holes. Branch bodies are nested blocks,
//! so the tree is recursive.

use indexmap::IndexMap;

/// An ordered sequence of sibling nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Block {
    pub nodes: Vec<Node>,
}

/// One segment of a construct tree.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    /// Literal text between actions.
    Static(String),
    /// A pipeline whose value flows to output at this position.
    Field(Pipeline),
    /// A variable declaration or assignment action; emits nothing.
    Decl(Pipeline),
    /// `if` / `else if` / `else` chain. At most one clause body is emitted.
    Cond(CondNode),
    /// `range` over a collection with optional loop variables.
    Range(RangeNode),
    /// `with` rebinding dot to the pipeline value.
    With(WithNode),
    /// `template "name" pipeline` invocation; removed by flattening.
    Invoke(InvokeNode),
    /// `break` out of the enclosing range.
    Break,
    /// `continue` with the next range iteration.
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CondNode {
    /// Ordered `(guard, body)` clauses: the `if` and every `else if`.
    pub clauses: Vec<(Pipeline, Block)>,
    pub else_block: Option<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RangeNode {
    pub pipeline: Pipeline,
    /// `$i` in `range $i, $v := .Items`.
    pub index_var: Option<String>,
    /// `$v` in `range $i, $v := .Items`, or the single declared variable.
    pub value_var: Option<String>,
    pub body: Block,
    pub else_block: Option<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WithNode {
    pub pipeline: Pipeline,
    pub body: Block,
    pub else_block: Option<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InvokeNode {
    pub name: String,
    pub pipeline: Pipeline,
}

/// A `|`-chained pipeline, optionally declaring or assigning variables.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pipeline {
    pub decl: Option<Decl>,
    pub commands: Vec<Command>,
}

impl Pipeline {
    /// True when the pipeline is exactly the current dot with no
    /// declaration, as in `{{template "name" .}}`.
    pub fn is_current_dot(&self) -> bool {
        self.decl.is_none()
            && self.commands.len() == 1
            && self.commands[0].args.is_empty()
            && self.commands[0].head == Expr::Dot
    }
}

/// `$a, $b :=` or `$a =` at the head of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Decl {
    pub vars: Vec<String>,
    /// True for `=` (assignment to an existing variable), false for `:=`.
    pub assign: bool,
}

/// One command in a pipeline: an expression head plus arguments.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Command {
    pub head: Expr,
    pub args: Vec<Expr>,
}

/// An expression inside an action.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    /// `.`
    Dot,
    /// `$` — the root data value.
    Root,
    /// `.Field.Path`
    Field(Vec<String>),
    /// `$var` with an optional trailing `.Path`.
    Var(String, Vec<String>),
    /// A built-in function referenced by name.
    Func(String),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    /// A parenthesized pipeline.
    Paren(Box<Pipeline>),
}

/// The parse result: the main flow plus the `define` resolution table.
/// The table is consumed by flattening and absent afterwards.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParseOutput {
    pub root: Block,
    pub defines: IndexMap<String, Block>,
}
