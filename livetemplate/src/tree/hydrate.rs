//! Tree hydration: evaluate a flattened construct tree against a data
//! value, producing the `TreeNode` for one render.
//!
//! Dot rebinding uses a linked variable scope rather than an execution
//! stack: each block carries `{dot, named vars, parent}`, range and `with`
//! bodies push a scope with a rebound dot, and inner declarations shadow
//! outer ones.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;

use super::keys::KeyGenerator;
use super::{TreeNode, TreeValue};
use crate::error::{Error, Result};
use crate::escape::escape_html;
use crate::template::ast::{Block, Command, CondNode, Expr, Node, Pipeline, RangeNode, WithNode};

/// Hydrate a flattened tree against root data.
pub(crate) fn hydrate(root: &Block, data: &Value) -> Result<TreeNode> {
    let mut gen = KeyGenerator::new();
    let scope = Scope::root(data.clone());
    let (node, _) = hydrate_block(root, &scope, &mut gen)?;
    Ok(node)
}

/// Loop control escaping from a block.
enum Flow {
    Normal,
    Break,
    Continue,
}

struct Scope<'p> {
    dot: Value,
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<&'p Scope<'p>>,
}

impl<'p> Scope<'p> {
    fn root(dot: Value) -> Scope<'static> {
        Scope {
            dot,
            vars: RefCell::new(HashMap::new()),
            parent: None,
        }
    }

    fn child(&self, dot: Value) -> Scope<'_> {
        Scope {
            dot,
            vars: RefCell::new(HashMap::new()),
            parent: Some(self),
        }
    }

    fn child_same_dot(&self) -> Scope<'_> {
        self.child(self.dot.clone())
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.and_then(|p| p.lookup(name))
    }

    fn declare(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    fn assign(&self, name: &str, value: Value) -> Result<()> {
        if self.vars.borrow().contains_key(name) {
            self.vars.borrow_mut().insert(name.to_string(), value);
            return Ok(());
        }
        match self.parent {
            Some(p) => p.assign(name, value),
            None => Err(Error::Hydration(format!("variable ${name} not defined"))),
        }
    }

    fn root_dot(&self) -> &Value {
        let mut cur = self;
        while let Some(p) = cur.parent {
            cur = p;
        }
        &cur.dot
    }
}

fn hydrate_block(block: &Block, parent: &Scope<'_>, gen: &mut KeyGenerator) -> Result<(TreeNode, Flow)> {
    let scope = parent.child_same_dot();
    let mut level = gen.level();
    let mut statics = Vec::new();
    let mut cur = String::new();
    let mut slots = IndexMap::new();
    let mut flow = Flow::Normal;

    for node in &block.nodes {
        let value = match node {
            Node::Static(t) => {
                cur.push_str(t);
                continue;
            }
            Node::Decl(pipeline) => {
                eval_guard(pipeline, &scope)?;
                continue;
            }
            Node::Break => {
                flow = Flow::Break;
                break;
            }
            Node::Continue => {
                flow = Flow::Continue;
                break;
            }
            Node::Field(pipeline) => {
                let v = eval_pipeline(pipeline, &scope)?;
                TreeValue::Scalar(render_scalar(&v))
            }
            Node::Cond(cond) => {
                let (value, f) = hydrate_cond(cond, &scope, gen)?;
                flow = f;
                value
            }
            Node::With(with) => {
                let (value, f) = hydrate_with(with, &scope, gen)?;
                flow = f;
                value
            }
            Node::Range(range) => {
                let (value, f) = hydrate_range(range, &scope, gen)?;
                flow = f;
                value
            }
            Node::Invoke(inv) => {
                return Err(Error::Hydration(format!(
                    "unflattened invocation of {:?}",
                    inv.name
                )));
            }
        };
        statics.push(std::mem::take(&mut cur));
        slots.insert(level.next_key(), value);
        if !matches!(flow, Flow::Normal) {
            break;
        }
    }
    statics.push(cur);

    Ok((
        TreeNode {
            statics: Some(statics),
            slots,
            branch: None,
        },
        flow,
    ))
}

/// Hydrate a selected branch body. A branch with no dynamic holes still
/// carries one empty slot so the client has a merge anchor when the
/// selection later changes.
fn hydrate_branch(
    block: &Block,
    scope: &Scope<'_>,
    gen: &mut KeyGenerator,
    branch: usize,
) -> Result<(TreeNode, Flow)> {
    let (mut node, flow) = hydrate_block(block, scope, gen)?;
    node.branch = Some(branch);
    if node.slots.is_empty() {
        node.slots
            .insert("0".to_string(), TreeValue::Scalar(String::new()));
    }
    Ok((node, flow))
}

fn hydrate_cond(
    cond: &CondNode,
    scope: &Scope<'_>,
    gen: &mut KeyGenerator,
) -> Result<(TreeValue, Flow)> {
    for (i, (guard, body)) in cond.clauses.iter().enumerate() {
        let clause_scope = scope.child_same_dot();
        let v = eval_guard(guard, &clause_scope)?;
        if is_truthy(&v) {
            let (node, flow) = hydrate_branch(body, &clause_scope, gen, i)?;
            return Ok((TreeValue::Nested(node), flow));
        }
    }
    if let Some(els) = &cond.else_block {
        let (node, flow) = hydrate_branch(els, scope, gen, cond.clauses.len())?;
        return Ok((TreeValue::Nested(node), flow));
    }
    Ok((TreeValue::Scalar(String::new()), Flow::Normal))
}

fn hydrate_with(
    with: &WithNode,
    scope: &Scope<'_>,
    gen: &mut KeyGenerator,
) -> Result<(TreeValue, Flow)> {
    let guard_scope = scope.child_same_dot();
    let v = eval_guard(&with.pipeline, &guard_scope)?;
    if is_truthy(&v) {
        let body_scope = guard_scope.child(v);
        let (node, flow) = hydrate_branch(&with.body, &body_scope, gen, 0)?;
        return Ok((TreeValue::Nested(node), flow));
    }
    if let Some(els) = &with.else_block {
        let (node, flow) = hydrate_branch(els, scope, gen, 1)?;
        return Ok((TreeValue::Nested(node), flow));
    }
    Ok((TreeValue::Scalar(String::new()), Flow::Normal))
}

fn hydrate_range(
    range: &RangeNode,
    scope: &Scope<'_>,
    gen: &mut KeyGenerator,
) -> Result<(TreeValue, Flow)> {
    let coll = eval_pipeline(&range.pipeline, scope)?;
    match &coll {
        Value::Array(items) if !items.is_empty() => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let child = scope.child(item.clone());
                if let Some(iv) = &range.index_var {
                    child.declare(iv, Value::from(i as u64));
                }
                if let Some(vv) = &range.value_var {
                    child.declare(vv, item.clone());
                }
                let (node, flow) = hydrate_block(&range.body, &child, gen)?;
                out.push(node);
                if matches!(flow, Flow::Break) {
                    break;
                }
            }
            Ok((TreeValue::List(out), Flow::Normal))
        }
        Value::Object(map) if !map.is_empty() => {
            let mut out = Vec::with_capacity(map.len());
            for (key, item) in map.iter() {
                let child = scope.child(item.clone());
                if let Some(iv) = &range.index_var {
                    child.declare(iv, Value::String(key.clone()));
                }
                if let Some(vv) = &range.value_var {
                    child.declare(vv, item.clone());
                }
                let (node, flow) = hydrate_block(&range.body, &child, gen)?;
                out.push(node);
                if matches!(flow, Flow::Break) {
                    break;
                }
            }
            Ok((TreeValue::List(out), Flow::Normal))
        }
        Value::Array(_) | Value::Object(_) | Value::Null => match &range.else_block {
            Some(els) => {
                let (node, flow) = hydrate_branch(els, scope, gen, 0)?;
                Ok((TreeValue::Nested(node), flow))
            }
            None => Ok((TreeValue::List(Vec::new()), Flow::Normal)),
        },
        other => Err(Error::Hydration(format!(
            "range over non-collection value {}",
            value_kind(other)
        ))),
    }
}

/// Evaluate a pipeline that may declare or assign variables into `scope`.
fn eval_guard(pipeline: &Pipeline, scope: &Scope<'_>) -> Result<Value> {
    let v = eval_commands(&pipeline.commands, scope)?;
    if let Some(decl) = &pipeline.decl {
        if decl.vars.len() != 1 {
            return Err(Error::Hydration(
                "multiple variables declared outside of range".to_string(),
            ));
        }
        if decl.assign {
            scope.assign(&decl.vars[0], v.clone())?;
        } else {
            scope.declare(&decl.vars[0], v.clone());
        }
    }
    Ok(v)
}

fn eval_pipeline(pipeline: &Pipeline, scope: &Scope<'_>) -> Result<Value> {
    eval_commands(&pipeline.commands, scope)
}

fn eval_commands(commands: &[Command], scope: &Scope<'_>) -> Result<Value> {
    let mut piped = None;
    for command in commands {
        piped = Some(eval_command(command, scope, piped)?);
    }
    piped.ok_or_else(|| Error::Hydration("empty pipeline".to_string()))
}

fn eval_command(command: &Command, scope: &Scope<'_>, piped: Option<Value>) -> Result<Value> {
    match &command.head {
        Expr::Func(name) => {
            let mut args = Vec::with_capacity(command.args.len() + 1);
            for arg in &command.args {
                args.push(eval_expr(arg, scope)?);
            }
            if let Some(p) = piped {
                args.push(p);
            }
            call_builtin(name, args)
        }
        head => {
            if piped.is_some() {
                return Err(Error::Hydration(
                    "pipeline stage is not a function".to_string(),
                ));
            }
            eval_expr(head, scope)
        }
    }
}

fn eval_expr(expr: &Expr, scope: &Scope<'_>) -> Result<Value> {
    match expr {
        Expr::Dot => Ok(scope.dot.clone()),
        Expr::Root => Ok(scope.root_dot().clone()),
        Expr::Field(path) => Ok(resolve_path(&scope.dot, path)),
        Expr::Var(name, path) => {
            let base = if name.is_empty() {
                scope.root_dot().clone()
            } else {
                scope
                    .lookup(name)
                    .ok_or_else(|| Error::Hydration(format!("variable ${name} not defined")))?
            };
            Ok(resolve_path(&base, path))
        }
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Int(n) => Ok(Value::from(*n)),
        Expr::Float(f) => Ok(Value::from(*f)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Nil => Ok(Value::Null),
        Expr::Paren(pipeline) => {
            if pipeline.decl.is_some() {
                return Err(Error::Hydration(
                    "declaration inside parenthesized pipeline".to_string(),
                ));
            }
            eval_pipeline(pipeline, scope)
        }
        Expr::Func(name) => Err(Error::Hydration(format!(
            "function {name:?} used as a value"
        ))),
    }
}

/// Walk a dotted path by field name, case-sensitively. Missing fields
/// resolve to null (the zero value), not an error.
fn resolve_path(base: &Value, path: &[String]) -> Value {
    let mut cur = base;
    for seg in path {
        match cur {
            Value::Object(map) => match map.get(seg) {
                Some(v) => cur = v,
                None => return Value::Null,
            },
            _ => return Value::Null,
        }
    }
    cur.clone()
}

/// Render the string form of a scalar dynamic, HTML-escaped.
fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => escape_html(s),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => escape_html(&other.to_string()),
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn call_builtin(name: &str, args: Vec<Value>) -> Result<Value> {
    match name {
        "eq" => {
            require_args(name, &args, 2)?;
            for other in &args[1..] {
                if eq_values(&args[0], other)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "ne" => {
            require_args(name, &args, 2)?;
            Ok(Value::Bool(!eq_values(&args[0], &args[1])?))
        }
        "lt" => ordered(name, &args, |o| o == Ordering::Less),
        "le" => ordered(name, &args, |o| o != Ordering::Greater),
        "gt" => ordered(name, &args, |o| o == Ordering::Greater),
        "ge" => ordered(name, &args, |o| o != Ordering::Less),
        "and" => {
            require_args(name, &args, 1)?;
            let mut last = Value::Null;
            for arg in args {
                if !is_truthy(&arg) {
                    return Ok(arg);
                }
                last = arg;
            }
            Ok(last)
        }
        "or" => {
            require_args(name, &args, 1)?;
            let mut last = Value::Null;
            for arg in args {
                if is_truthy(&arg) {
                    return Ok(arg);
                }
                last = arg;
            }
            Ok(last)
        }
        "not" => {
            require_args(name, &args, 1)?;
            Ok(Value::Bool(!is_truthy(&args[0])))
        }
        "len" => {
            require_args(name, &args, 1)?;
            let len = match &args[0] {
                Value::Null => 0,
                Value::String(s) => s.len(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => {
                    return Err(Error::Hydration(format!(
                        "len of {} value",
                        value_kind(other)
                    )))
                }
            };
            Ok(Value::from(len as u64))
        }
        "index" => {
            require_args(name, &args, 2)?;
            let mut cur = args[0].clone();
            for key in &args[1..] {
                cur = index_value(&cur, key)?;
            }
            Ok(cur)
        }
        other => Err(Error::Hydration(format!("unsupported function {other:?}"))),
    }
}

fn require_args(name: &str, args: &[Value], min: usize) -> Result<()> {
    if args.len() < min {
        return Err(Error::Hydration(format!(
            "{name} wants at least {min} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn ordered(name: &str, args: &[Value], accept: impl Fn(Ordering) -> bool) -> Result<Value> {
    require_args(name, args, 2)?;
    Ok(Value::Bool(accept(cmp_values(&args[0], &args[1])?)))
}

/// Equality with zero-value coercion: a missing field (null) compares as
/// the zero of the other operand's kind.
fn eq_values(a: &Value, b: &Value) -> Result<bool> {
    match (a, b) {
        (Value::Null, Value::Null) => Ok(true),
        (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => Ok(s.is_empty()),
        (Value::Null, Value::Number(n)) | (Value::Number(n), Value::Null) => {
            Ok(n.as_f64() == Some(0.0))
        }
        (Value::Null, Value::Bool(b)) | (Value::Bool(b), Value::Null) => Ok(!b),
        (Value::Null, Value::Array(x)) | (Value::Array(x), Value::Null) => Ok(x.is_empty()),
        (Value::Null, Value::Object(x)) | (Value::Object(x), Value::Null) => Ok(x.is_empty()),
        (Value::Number(x), Value::Number(y)) => Ok(x.as_f64() == y.as_f64()),
        (Value::String(x), Value::String(y)) => Ok(x == y),
        (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
        (Value::Array(x), Value::Array(y)) => Ok(x == y),
        (Value::Object(x), Value::Object(y)) => Ok(x == y),
        (x, y) => Err(Error::Hydration(format!(
            "incomparable types {} and {}",
            value_kind(x),
            value_kind(y)
        ))),
    }
}

fn cmp_values(a: &Value, b: &Value) -> Result<Ordering> {
    match (a, b) {
        (Value::Number(_) | Value::Null, Value::Number(_) | Value::Null) => {
            let x = a.as_f64().unwrap_or(0.0);
            let y = b.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y)
                .ok_or_else(|| Error::Hydration("unordered number comparison".to_string()))
        }
        (Value::String(_) | Value::Null, Value::String(_) | Value::Null) => {
            let x = a.as_str().unwrap_or("");
            let y = b.as_str().unwrap_or("");
            Ok(x.cmp(y))
        }
        (x, y) => Err(Error::Hydration(format!(
            "incomparable types {} and {}",
            value_kind(x),
            value_kind(y)
        ))),
    }
}

fn index_value(base: &Value, key: &Value) -> Result<Value> {
    match (base, key) {
        (Value::Array(items), Value::Number(n)) => {
            let idx = n
                .as_u64()
                .ok_or_else(|| Error::Hydration("negative array index".to_string()))?
                as usize;
            items
                .get(idx)
                .cloned()
                .ok_or_else(|| Error::Hydration(format!("index {idx} out of range")))
        }
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Null, _) => Ok(Value::Null),
        (b, k) => Err(Error::Hydration(format!(
            "cannot index {} with {}",
            value_kind(b),
            value_kind(k)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Template;
    use serde_json::json;

    fn hydrate_src(src: &str, data: Value) -> Result<TreeNode> {
        let template = Template::parse(src)?;
        hydrate(template.root(), &data)
    }

    fn statics_of(node: &TreeNode) -> Vec<String> {
        node.statics.clone().unwrap()
    }

    #[test]
    fn scalar_field() {
        let node = hydrate_src("<p>Hello {{.Name}}!</p>", json!({"Name": "World"})).unwrap();
        assert_eq!(statics_of(&node), vec!["<p>Hello ", "!</p>"]);
        assert_eq!(
            node.slots.get("0"),
            Some(&TreeValue::Scalar("World".to_string()))
        );
    }

    #[test]
    fn statics_count_is_holes_plus_one() {
        let node = hydrate_src("{{.A}}-{{.B}}", json!({"A": "1", "B": "2"})).unwrap();
        assert_eq!(statics_of(&node), vec!["", "-", ""]);
        assert_eq!(node.slots.len(), 2);
    }

    #[test]
    fn scalars_are_html_escaped() {
        let node = hydrate_src("{{.X}}", json!({"X": "<b>&</b>"})).unwrap();
        assert_eq!(
            node.slots.get("0"),
            Some(&TreeValue::Scalar("&lt;b&gt;&amp;&lt;/b&gt;".to_string()))
        );
    }

    #[test]
    fn numbers_bools_and_nil_stringify() {
        let node = hydrate_src(
            "{{.N}}|{{.F}}|{{.B}}|{{.Missing}}",
            json!({"N": 42, "F": 1.5, "B": true}),
        )
        .unwrap();
        let values: Vec<_> = node.slots.values().collect();
        assert_eq!(values[0], &TreeValue::Scalar("42".to_string()));
        assert_eq!(values[1], &TreeValue::Scalar("1.5".to_string()));
        assert_eq!(values[2], &TreeValue::Scalar("true".to_string()));
        assert_eq!(values[3], &TreeValue::Scalar(String::new()));
    }

    #[test]
    fn conditional_selects_branch_and_records_index() {
        let node = hydrate_src("{{if .Active}}on{{else}}off{{end}}", json!({"Active": true}))
            .unwrap();
        match node.slots.get("0") {
            Some(TreeValue::Nested(branch)) => {
                assert_eq!(branch.branch, Some(0));
                assert_eq!(statics_of(branch), vec!["on"]);
                assert_eq!(
                    branch.slots.get("0"),
                    Some(&TreeValue::Scalar(String::new()))
                );
            }
            other => panic!("expected nested branch, got {other:?}"),
        }
    }

    #[test]
    fn else_branch_records_clause_count() {
        let node = hydrate_src("{{if .Active}}on{{else}}off{{end}}", json!({"Active": false}))
            .unwrap();
        match node.slots.get("0") {
            Some(TreeValue::Nested(branch)) => {
                assert_eq!(branch.branch, Some(1));
                assert_eq!(statics_of(branch), vec!["off"]);
            }
            other => panic!("expected nested branch, got {other:?}"),
        }
    }

    #[test]
    fn conditional_without_match_is_empty_scalar() {
        let node = hydrate_src("{{if .Active}}on{{end}}", json!({"Active": false})).unwrap();
        assert_eq!(node.slots.get("0"), Some(&TreeValue::Scalar(String::new())));
    }

    #[test]
    fn range_produces_one_node_per_item() {
        let node = hydrate_src(
            "<ul>{{range .Items}}<li>{{.}}</li>{{end}}</ul>",
            json!({"Items": ["a", "b"]}),
        )
        .unwrap();
        match node.slots.get("0") {
            Some(TreeValue::List(items)) => {
                assert_eq!(items.len(), 2);
                assert_eq!(statics_of(&items[0]), vec!["<li>", "</li>"]);
                assert_eq!(items[0].slots.get("0"), Some(&TreeValue::Scalar("a".into())));
                assert_eq!(items[1].slots.get("0"), Some(&TreeValue::Scalar("b".into())));
                assert_eq!(items[0].statics, items[1].statics);
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn empty_range_without_else_is_empty_list() {
        let node = hydrate_src("{{range .Items}}x{{end}}", json!({"Items": []})).unwrap();
        assert_eq!(node.slots.get("0"), Some(&TreeValue::List(Vec::new())));
    }

    #[test]
    fn empty_range_with_else_hydrates_the_else() {
        let node = hydrate_src("{{range .Items}}x{{else}}none{{end}}", json!({})).unwrap();
        match node.slots.get("0") {
            Some(TreeValue::Nested(branch)) => assert_eq!(statics_of(branch), vec!["none"]),
            other => panic!("expected nested else, got {other:?}"),
        }
    }

    #[test]
    fn range_variables_bind_index_and_element() {
        let node = hydrate_src(
            "{{range $i, $v := .Items}}{{$i}}:{{$v}};{{end}}",
            json!({"Items": ["zero", "one"]}),
        )
        .unwrap();
        match node.slots.get("0") {
            Some(TreeValue::List(items)) => {
                assert_eq!(items[0].slots.get("0"), Some(&TreeValue::Scalar("0".into())));
                assert_eq!(
                    items[0].slots.get("1"),
                    Some(&TreeValue::Scalar("zero".into()))
                );
                assert_eq!(items[1].slots.get("0"), Some(&TreeValue::Scalar("1".into())));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn dot_and_field_track_the_iteration_element() {
        let node = hydrate_src(
            "{{range .Users}}{{.Name}}{{end}}",
            json!({"Users": [{"Name": "ada"}, {"Name": "bob"}]}),
        )
        .unwrap();
        match node.slots.get("0") {
            Some(TreeValue::List(items)) => {
                assert_eq!(items[0].slots.get("0"), Some(&TreeValue::Scalar("ada".into())));
                assert_eq!(items[1].slots.get("0"), Some(&TreeValue::Scalar("bob".into())));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn nested_range_variables_shadow_outer() {
        let node = hydrate_src(
            "{{range $v := .Outer}}{{range $v := .Inner}}{{$v}}{{end}}{{end}}",
            json!({"Outer": [{"Inner": ["x"]}]}),
        )
        .unwrap();
        match node.slots.get("0") {
            Some(TreeValue::List(outer)) => match outer[0].slots.get("0") {
                Some(TreeValue::List(inner)) => {
                    assert_eq!(inner[0].slots.get("0"), Some(&TreeValue::Scalar("x".into())));
                }
                other => panic!("expected inner list, got {other:?}"),
            },
            other => panic!("expected outer list, got {other:?}"),
        }
    }

    #[test]
    fn with_rebinds_dot_and_falls_back_to_else() {
        let node = hydrate_src(
            "{{with .User}}{{.Name}}{{else}}anon{{end}}",
            json!({"User": {"Name": "ada"}}),
        )
        .unwrap();
        match node.slots.get("0") {
            Some(TreeValue::Nested(branch)) => {
                assert_eq!(branch.branch, Some(0));
                assert_eq!(branch.slots.get("0"), Some(&TreeValue::Scalar("ada".into())));
            }
            other => panic!("expected nested, got {other:?}"),
        }

        let node = hydrate_src(
            "{{with .User}}{{.Name}}{{else}}anon{{end}}",
            json!({"User": null}),
        )
        .unwrap();
        match node.slots.get("0") {
            Some(TreeValue::Nested(branch)) => {
                assert_eq!(branch.branch, Some(1));
                assert_eq!(statics_of(branch), vec!["anon"]);
            }
            other => panic!("expected nested else, got {other:?}"),
        }
    }

    #[test]
    fn with_scope_shadowing_preserves_outer_variable() {
        let node = hydrate_src(
            "{{$x := \"outer\"}}{{with .Inner}}{{$x := \"inner\"}}{{$x}}{{end}}{{$x}}",
            json!({"Inner": {"v": 1}}),
        )
        .unwrap();
        match node.slots.get("0") {
            Some(TreeValue::Nested(branch)) => {
                assert_eq!(
                    branch.slots.get("0"),
                    Some(&TreeValue::Scalar("inner".into()))
                );
            }
            other => panic!("expected nested, got {other:?}"),
        }
        assert_eq!(node.slots.get("1"), Some(&TreeValue::Scalar("outer".into())));
    }

    #[test]
    fn assignment_updates_the_declaring_scope() {
        let node = hydrate_src(
            "{{$v := \"first\"}}{{$v = \"second\"}}{{$v}}",
            json!({}),
        )
        .unwrap();
        assert_eq!(node.slots.get("0"), Some(&TreeValue::Scalar("second".into())));
    }

    #[test]
    fn assignment_to_unknown_variable_fails() {
        let err = hydrate_src("{{$v = .X}}", json!({"X": 1})).unwrap_err();
        assert!(err.to_string().contains("not defined"));
    }

    #[test]
    fn root_variable_reaches_past_rebinding() {
        let node = hydrate_src(
            "{{with .Inner}}{{$.Name}}{{end}}",
            json!({"Name": "root", "Inner": {"x": 1}}),
        )
        .unwrap();
        match node.slots.get("0") {
            Some(TreeValue::Nested(branch)) => {
                assert_eq!(branch.slots.get("0"), Some(&TreeValue::Scalar("root".into())));
            }
            other => panic!("expected nested, got {other:?}"),
        }
    }

    #[test]
    fn comparison_builtins() {
        let node = hydrate_src(
            "{{if ge (len .Items) 2}}many{{else}}few{{end}}",
            json!({"Items": ["a", "b", "c"]}),
        )
        .unwrap();
        match node.slots.get("0") {
            Some(TreeValue::Nested(branch)) => assert_eq!(statics_of(branch), vec!["many"]),
            other => panic!("expected nested, got {other:?}"),
        }
    }

    #[test]
    fn eq_coerces_missing_fields_to_zero_values() {
        let node = hydrate_src(
            "{{if eq .Missing \"\"}}empty{{end}}",
            json!({}),
        )
        .unwrap();
        match node.slots.get("0") {
            Some(TreeValue::Nested(branch)) => assert_eq!(statics_of(branch), vec!["empty"]),
            other => panic!("expected nested, got {other:?}"),
        }
    }

    #[test]
    fn incomparable_types_are_a_hydration_error() {
        let err = hydrate_src("{{if eq .A .B}}x{{end}}", json!({"A": "s", "B": 1})).unwrap_err();
        assert!(matches!(err, Error::Hydration(_)));
    }

    #[test]
    fn index_out_of_range_is_a_hydration_error() {
        let err = hydrate_src("{{index .Items 5}}", json!({"Items": [1]})).unwrap_err();
        assert!(matches!(err, Error::Hydration(_)));
    }

    #[test]
    fn break_stops_the_iteration() {
        let node = hydrate_src(
            "{{range .Items}}{{if eq . \"stop\"}}{{break}}{{end}}{{.}}{{end}}",
            json!({"Items": ["a", "stop", "c"]}),
        )
        .unwrap();
        match node.slots.get("0") {
            Some(TreeValue::List(items)) => assert_eq!(items.len(), 2),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn range_over_object_binds_keys() {
        let node = hydrate_src(
            "{{range $k, $v := .Attrs}}{{$k}}={{$v}};{{end}}",
            json!({"Attrs": {"a": "1", "b": "2"}}),
        )
        .unwrap();
        match node.slots.get("0") {
            Some(TreeValue::List(items)) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].slots.get("0"), Some(&TreeValue::Scalar("a".into())));
                assert_eq!(items[0].slots.get("1"), Some(&TreeValue::Scalar("1".into())));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn range_over_scalar_is_a_hydration_error() {
        let err = hydrate_src("{{range .N}}x{{end}}", json!({"N": 3})).unwrap_err();
        assert!(matches!(err, Error::Hydration(_)));
    }

    #[test]
    fn pipeline_stages_feed_the_next_function() {
        let node = hydrate_src("{{.Items | len}}", json!({"Items": ["a", "b"]})).unwrap();
        assert_eq!(node.slots.get("0"), Some(&TreeValue::Scalar("2".into())));
    }
}
