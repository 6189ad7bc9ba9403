//! Hydrated tree values: the output of one render and the unit of diffing.

pub(crate) mod diff;
pub(crate) mod encode;
pub(crate) mod fingerprint;
pub(crate) mod hydrate;
pub(crate) mod keys;

use indexmap::IndexMap;

/// The value at one positional key.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TreeValue {
    /// Rendered scalar dynamic, already HTML-escaped.
    Scalar(String),
    /// A nested level: a selected conditional/`with` branch or an inlined
    /// invocation body.
    Nested(TreeNode),
    /// Range body instances in iteration order.
    List(Vec<TreeNode>),
}

/// One level of a hydrated tree: positional slots in source order plus the
/// statics array for the level.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct TreeNode {
    /// Statics for this level; `None` in update trees where the client
    /// already caches them.
    pub statics: Option<Vec<String>>,
    /// Positional key -> dynamic value, insertion order = source order.
    pub slots: IndexMap<String, TreeValue>,
    /// Selected clause index for conditional/`with` levels. Not part of
    /// the wire format; the differ uses it to detect branch changes.
    pub branch: Option<usize>,
}

impl TreeNode {
    /// Realize this level as HTML by interleaving statics and dynamics.
    pub fn to_html(&self) -> String {
        let empty = Vec::new();
        let statics = self.statics.as_ref().unwrap_or(&empty);
        let mut out = String::new();
        let mut values = self.slots.values();
        // Statics and slots alternate; a level always has one more static
        // than it has slots.
        for (i, st) in statics.iter().enumerate() {
            out.push_str(st);
            if i + 1 < statics.len() {
                if let Some(value) = values.next() {
                    value.append_html(&mut out);
                }
            }
        }
        out
    }
}

impl TreeValue {
    fn append_html(&self, out: &mut String) {
        match self {
            TreeValue::Scalar(s) => out.push_str(s),
            TreeValue::Nested(node) => out.push_str(&node.to_html()),
            TreeValue::List(items) => {
                for item in items {
                    out.push_str(&item.to_html());
                }
            }
        }
    }
}
