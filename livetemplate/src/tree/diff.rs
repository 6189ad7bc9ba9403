//! Minimal update trees between two hydrations of the same template.
//!
//! The update contains only positional keys whose value changed, at every
//! level. Statics are omitted except where a subtree is new to the client:
//! the first render, a changed branch selection, or a range item appended
//! past the previous length.

use indexmap::IndexMap;

use super::{TreeNode, TreeValue};

/// Diff two hydrations. `None` means nothing changed.
pub(crate) fn diff(prev: &TreeNode, curr: &TreeNode) -> Option<TreeNode> {
    diff_node(prev, curr)
}

fn diff_node(prev: &TreeNode, curr: &TreeNode) -> Option<TreeNode> {
    let mut slots = IndexMap::new();
    for (key, curr_value) in &curr.slots {
        let changed = match prev.slots.get(key) {
            Some(prev_value) => diff_value(prev_value, curr_value),
            // A key the previous render did not have is new in full.
            None => Some(curr_value.clone()),
        };
        if let Some(update) = changed {
            slots.insert(key.clone(), update);
        }
    }
    if slots.is_empty() {
        return None;
    }
    Some(TreeNode {
        statics: None,
        slots,
        branch: None,
    })
}

fn diff_value(prev: &TreeValue, curr: &TreeValue) -> Option<TreeValue> {
    match (prev, curr) {
        (TreeValue::Scalar(a), TreeValue::Scalar(b)) => {
            if a == b {
                None
            } else {
                Some(TreeValue::Scalar(b.clone()))
            }
        }
        (TreeValue::Nested(a), TreeValue::Nested(b)) => {
            if a.branch != b.branch || a.statics != b.statics {
                // The selected branch changed; its statics are new to the
                // client for that slot.
                return Some(TreeValue::Nested(b.clone()));
            }
            diff_node(a, b).map(TreeValue::Nested)
        }
        (TreeValue::List(a), TreeValue::List(b)) => diff_list(a, b),
        // Shape changed (for example a range emptied into its else
        // branch); send the new value in full.
        (_, other) => Some(other.clone()),
    }
}

/// Positional range diff: per-index updates with `{}` placeholders for
/// unchanged items. The emitted arity always equals the current arity, so
/// a shorter array truncates the client's list and appended tail items
/// arrive in full, statics included.
fn diff_list(prev: &[TreeNode], curr: &[TreeNode]) -> Option<TreeValue> {
    if prev.len() == curr.len() {
        let mut changed = false;
        let mut items = Vec::with_capacity(curr.len());
        for (p, c) in prev.iter().zip(curr) {
            match diff_node(p, c) {
                Some(update) => {
                    changed = true;
                    items.push(update);
                }
                None => items.push(TreeNode::default()),
            }
        }
        return changed.then_some(TreeValue::List(items));
    }

    let mut items = Vec::with_capacity(curr.len());
    for (i, c) in curr.iter().enumerate() {
        match prev.get(i) {
            Some(p) => items.push(diff_node(p, c).unwrap_or_default()),
            None => items.push(c.clone()),
        }
    }
    Some(TreeValue::List(items))
}
