//! Content fingerprints for hydrated trees.
//!
//! The hash covers the canonical walk: positional keys in order, scalar
//! values, statics, selected branch indices, and list arity. Two renders
//! with equal trees always produce equal fingerprints; a no-change render
//! is detected by fingerprint comparison alone.

use blake3::Hasher;

use super::{TreeNode, TreeValue};

/// Compute the fingerprint of a hydrated tree.
pub(crate) fn fingerprint(node: &TreeNode) -> String {
    let mut hasher = Hasher::new();
    hash_node(node, &mut hasher);
    hasher.finalize().to_hex().to_string()
}

fn hash_node(node: &TreeNode, hasher: &mut Hasher) {
    if let Some(statics) = &node.statics {
        hasher.update(b"s");
        hasher.update(&(statics.len() as u64).to_le_bytes());
        for st in statics {
            hash_str(st, hasher);
        }
    }
    if let Some(branch) = node.branch {
        hasher.update(b"b");
        hasher.update(&(branch as u64).to_le_bytes());
    }
    hasher.update(&(node.slots.len() as u64).to_le_bytes());
    for (key, value) in &node.slots {
        hash_str(key, hasher);
        match value {
            TreeValue::Scalar(s) => {
                hasher.update(b"v");
                hash_str(s, hasher);
            }
            TreeValue::Nested(nested) => {
                hasher.update(b"n");
                hash_node(nested, hasher);
            }
            TreeValue::List(items) => {
                hasher.update(b"l");
                hasher.update(&(items.len() as u64).to_le_bytes());
                for item in items {
                    hash_node(item, hasher);
                }
            }
        }
    }
}

fn hash_str(s: &str, hasher: &mut Hasher) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}
