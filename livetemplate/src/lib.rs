//! Server-side tree diffs for Go-style HTML templates.
//!
//! LiveTemplate compiles a `{{ }}`-delimited template into a tree of
//! static strings interleaved with dynamic holes, evaluates it against
//! successive data snapshots, and emits minimal JSON updates a long-lived
//! client merges into its cached copy of the previous render.
//!
//! The first render of a page carries the full tree, statics included:
//!
//! ```json
//! {"s":["<p>Hello ","!</p>"],"0":"World"}
//! ```
//!
//! Every later render carries only the positional keys whose value
//! changed, with statics omitted:
//!
//! ```json
//! {"0":"Ada"}
//! ```
//!
//! # Example
//!
//! ```rust
//! use livetemplate::{Application, Template};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # fn main() -> livetemplate::Result<()> {
//! let template = Arc::new(Template::parse("<p>Hello {{.Name}}!</p>")?);
//! let app = Application::new("my-tenant");
//! let handle = app.new_page(Arc::clone(&template), json!({"Name": "World"}))?;
//!
//! // Full tree on the first render.
//! let initial = handle.page.render_fragments(json!({"Name": "World"}))?;
//! assert_eq!(
//!     initial,
//!     Some(json!({"s": ["<p>Hello ", "!</p>"], "0": "World"}))
//! );
//!
//! // Only the changed slot afterwards.
//! let update = handle.page.render_fragments(json!({"Name": "Ada"}))?;
//! assert_eq!(update, Some(json!({"0": "Ada"})));
//!
//! // Nothing at all when nothing changed.
//! assert_eq!(handle.page.render_fragments(json!({"Name": "Ada"}))?, None);
//! # Ok(())
//! # }
//! ```
//!
//! Pages live inside an [`Application`], the tenant boundary: each
//! application owns its page table, its session registry, and its memory
//! budget. Session ids issued by one application are inert in every
//! other. Incoming [`ActionMessage`]s dispatch to registered handlers or
//! [`ActionModel`]s, whose response data drives the next diff.

mod action;
mod application;
mod config;
mod error;
mod escape;
mod metrics;
mod page;
mod session;
mod template;
mod tree;

pub use action::{
    ActionContext, ActionHandler, ActionMessage, ActionModel, HandlerError,
};
pub use application::{Application, PageHandle};
pub use config::{Delimiters, Options};
pub use error::{Error, Result};
pub use metrics::MetricsSnapshot;
pub use page::{Page, PageStatus, RenderContext, WRAPPER_ATTR};
pub use template::Template;
pub use tree::encode::CacheHint;
