//! Wire payload encoding.
//!
//! Payloads are JSON objects keyed by positional keys plus `"s"` for the
//! statics of a level. `"s"` is emitted first and numeric keys in
//! ascending order so serialized payloads are deterministic for snapshot
//! comparison. A caller-supplied cache hint drops `"s"` inside fragments
//! the client already caches.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::{TreeNode, TreeValue};

/// Fragment ids whose statics the client already holds.
///
/// A fragment id is the dot-joined positional key path of a subtree from
/// the root: `""` is the whole tree, `"0"` the first slot, `"2.1"` the
/// second slot inside the third. Range item indices are path segments too.
#[derive(Debug, Clone, Default)]
pub struct CacheHint {
    fragments: HashSet<String>,
}

impl CacheHint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one fragment as cached.
    pub fn with_fragment(mut self, path: impl Into<String>) -> Self {
        self.fragments.insert(path.into());
        self
    }

    fn covers(&self, path: &str) -> bool {
        self.fragments.contains(path)
    }
}

impl<S: Into<String>> FromIterator<S> for CacheHint {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            fragments: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Encode a tree (full or update) as a wire payload.
pub(crate) fn encode(tree: &TreeNode, hint: Option<&CacheHint>) -> Value {
    encode_node(tree, hint, "", false)
}

fn encode_node(node: &TreeNode, hint: Option<&CacheHint>, path: &str, mut cached: bool) -> Value {
    cached = cached || hint.map(|h| h.covers(path)).unwrap_or(false);

    let mut map = Map::with_capacity(node.slots.len() + 1);
    if let Some(statics) = &node.statics {
        if !cached {
            map.insert(
                "s".to_string(),
                Value::Array(statics.iter().map(|s| Value::String(s.clone())).collect()),
            );
        }
    }
    for (key, value) in &node.slots {
        let child_path = join_path(path, key);
        let encoded = match value {
            TreeValue::Scalar(s) => Value::String(s.clone()),
            TreeValue::Nested(nested) => encode_node(nested, hint, &child_path, cached),
            TreeValue::List(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let item_path = join_path(&child_path, &i.to_string());
                        encode_node(item, hint, &item_path, cached)
                    })
                    .collect(),
            ),
        };
        map.insert(key.clone(), encoded);
    }
    Value::Object(map)
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}
