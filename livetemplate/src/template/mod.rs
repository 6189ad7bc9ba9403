//! Template compilation: source text to an immutable construct tree.

pub(crate) mod ast;
pub(crate) mod flatten;
pub(crate) mod lexer;
pub(crate) mod parser;

use uuid::Uuid;

use crate::config::Delimiters;
use crate::error::Result;

/// A parsed, frozen template.
///
/// Compilation happens once; the flattened construct tree is immutable and
/// freely shareable across pages (wrap it in an `Arc`).
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    root: ast::Block,
    wrapper_id: String,
}

impl Template {
    /// Parse template source using the standard `{{ }}` delimiters.
    pub fn parse(source: &str) -> Result<Self> {
        Self::parse_with_delimiters(source, Delimiters::Curly)
    }

    /// Parse template source with explicit action delimiters.
    pub fn parse_with_delimiters(source: &str, delimiters: Delimiters) -> Result<Self> {
        let (open, close) = delimiters.pair();
        let segments = lexer::lex(source, open, close)?;
        let parsed = parser::parse(segments)?;
        let root = flatten::flatten(parsed)?;
        Ok(Self {
            source: source.to_string(),
            root,
            wrapper_id: format!("lvt-{}", Uuid::new_v4().simple()),
        })
    }

    /// The original template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The random identifier injected on the outermost rendered element.
    pub fn wrapper_id(&self) -> &str {
        &self.wrapper_id
    }

    pub(crate) fn root(&self) -> &ast::Block {
        &self.root
    }
}
