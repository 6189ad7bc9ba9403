//! Inlines template invocations so the compiled tree is self-contained.
//!
//! Every `Invoke` node is replaced by a deep copy of its target's body.
//! When the invocation argument is not the current dot, the inlined body
//! is wrapped in a `with` node so its dot is rebound. The define table is
//! consumed here and absent from the flattened tree.

use indexmap::IndexMap;

use super::ast::{Block, Node, ParseOutput, WithNode};
use crate::error::{Error, Result};

pub(crate) fn flatten(output: ParseOutput) -> Result<Block> {
    let ParseOutput { root, defines } = output;
    let mut stack = Vec::new();
    flatten_block(root, &defines, &mut stack)
}

fn flatten_block(
    block: Block,
    defines: &IndexMap<String, Block>,
    stack: &mut Vec<String>,
) -> Result<Block> {
    let mut nodes = Vec::with_capacity(block.nodes.len());
    for node in block.nodes {
        match node {
            Node::Invoke(invoke) => {
                if stack.iter().any(|n| n == &invoke.name) {
                    return Err(Error::TemplateParse(format!(
                        "recursive invocation of template {:?}",
                        invoke.name
                    )));
                }
                let body = defines.get(&invoke.name).cloned().ok_or_else(|| {
                    Error::TemplateParse(format!("undefined template {:?}", invoke.name))
                })?;
                stack.push(invoke.name.clone());
                let inlined = flatten_block(body, defines, stack)?;
                stack.pop();

                if invoke.pipeline.is_current_dot() {
                    nodes.extend(inlined.nodes);
                } else {
                    nodes.push(Node::With(WithNode {
                        pipeline: invoke.pipeline,
                        body: inlined,
                        else_block: None,
                    }));
                }
            }
            Node::Cond(mut cond) => {
                for (_, body) in cond.clauses.iter_mut() {
                    *body = flatten_block(std::mem::take(body), defines, stack)?;
                }
                if let Some(els) = cond.else_block.take() {
                    cond.else_block = Some(flatten_block(els, defines, stack)?);
                }
                nodes.push(Node::Cond(cond));
            }
            Node::Range(mut range) => {
                range.body = flatten_block(range.body, defines, stack)?;
                if let Some(els) = range.else_block.take() {
                    range.else_block = Some(flatten_block(els, defines, stack)?);
                }
                nodes.push(Node::Range(range));
            }
            Node::With(mut with) => {
                with.body = flatten_block(with.body, defines, stack)?;
                if let Some(els) = with.else_block.take() {
                    with.else_block = Some(flatten_block(els, defines, stack)?);
                }
                nodes.push(Node::With(with));
            }
            other => nodes.push(other),
        }
    }
    Ok(Block { nodes })
}
