//! Per-page session state and the render/update cycle.
//!
//! A page owns its compiled template reference, the current data value,
//! the last hydrated tree, and its fingerprint. Operations on one page
//! serialize; the last committed update becomes the new baseline.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::action::{ActionContext, ActionHandler, ActionMessage, ActionModel, ActionTable, HandlerError, Resolution};
use crate::error::{Error, Result};
use crate::metrics::AppMetrics;
use crate::template::Template;
use crate::tree::diff::diff;
use crate::tree::encode::{encode, CacheHint};
use crate::tree::fingerprint::fingerprint;
use crate::tree::hydrate::hydrate;
use crate::tree::TreeNode;

/// The attribute carrying the wrapper id on the outermost element.
pub const WRAPPER_ATTR: &str = "data-lvt-id";

/// Page lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Created,
    Live,
    Closed,
}

/// Per-call context for render operations: a cancellation token honored
/// between the hydrate, diff, and encode phases, and an optional cache
/// hint for statics omission.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub cancel: CancellationToken,
    pub cache_hint: Option<CacheHint>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_cache_hint(mut self, hint: CacheHint) -> Self {
        self.cache_hint = Some(hint);
        self
    }
}

struct PageInner {
    data: Value,
    last_tree: Option<TreeNode>,
    fingerprint: Option<String>,
    status: PageStatus,
    last_active: Instant,
}

impl PageInner {
    fn check_open(&mut self) -> Result<()> {
        match self.status {
            PageStatus::Closed => Err(Error::PageClosed),
            PageStatus::Created => {
                self.status = PageStatus::Live;
                Ok(())
            }
            PageStatus::Live => Ok(()),
        }
    }
}

/// A live page: one long-lived client holding one rendered template.
pub struct Page {
    id: String,
    template: Arc<Template>,
    token: String,
    inner: Mutex<PageInner>,
    actions: RwLock<ActionTable>,
    metrics: Option<Arc<AppMetrics>>,
}

impl Page {
    pub(crate) fn new(
        id: String,
        template: Arc<Template>,
        data: Value,
        token: String,
        metrics: Option<Arc<AppMetrics>>,
    ) -> Self {
        Self {
            id,
            template,
            token,
            inner: Mutex::new(PageInner {
                data,
                last_tree: None,
                fingerprint: None,
                status: PageStatus::Created,
                last_active: Instant::now(),
            }),
            actions: RwLock::new(ActionTable::default()),
            metrics,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The token action messages must carry to be accepted.
    pub fn action_token(&self) -> &str {
        &self.token
    }

    pub fn status(&self) -> PageStatus {
        self.inner.lock().status
    }

    pub(crate) fn last_active(&self) -> Instant {
        self.inner.lock().last_active
    }

    /// Render the full HTML for the current data, with the wrapper id
    /// injected on the outermost element. Does not touch the diff
    /// baseline.
    pub fn render(&self) -> Result<String> {
        let mut inner = self.inner.lock();
        inner.check_open()?;
        let tree = hydrate(self.template.root(), &inner.data)?;
        inner.last_active = Instant::now();
        let html = tree.to_html();
        Ok(inject_wrapper_id(&html, self.template.wrapper_id()))
    }

    /// Replace the current data and produce the payload for this render:
    /// the full tree with statics on the first call, the minimal update
    /// tree afterwards, or `None` when nothing changed.
    pub fn render_fragments<T: Serialize>(&self, data: T) -> Result<Option<Value>> {
        self.render_fragments_with(data, &RenderContext::default())
    }

    /// [`render_fragments`](Self::render_fragments) with cancellation and
    /// cache-hint control.
    pub fn render_fragments_with<T: Serialize>(
        &self,
        data: T,
        ctx: &RenderContext,
    ) -> Result<Option<Value>> {
        let new_data = serde_json::to_value(data)
            .map_err(|e| Error::Hydration(format!("failed to serialize data: {e}")))?;
        self.apply_data(new_data, ctx)
    }

    /// Replace the current data without producing a diff.
    pub fn set_data<T: Serialize>(&self, data: T) -> Result<()> {
        let new_data = serde_json::to_value(data)
            .map_err(|e| Error::Hydration(format!("failed to serialize data: {e}")))?;
        let mut inner = self.inner.lock();
        inner.check_open()?;
        inner.data = new_data;
        inner.last_active = Instant::now();
        Ok(())
    }

    /// Register a named action handler.
    pub fn register_action<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Value, &Value) -> std::result::Result<Value, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.actions
            .write()
            .register_named(name, Arc::new(handler) as ActionHandler);
    }

    /// Register a data model; its methods become actions under both
    /// `model.method` and the bare method name.
    pub fn register_model<M: ActionModel + 'static>(&self, model: M) {
        self.actions.write().register_model(Arc::new(model));
    }

    /// Dispatch an action message and render the resulting data.
    pub fn handle_action(&self, msg: &ActionMessage) -> Result<Option<Value>> {
        self.handle_action_with(msg, &RenderContext::default())
    }

    pub fn handle_action_with(
        &self,
        msg: &ActionMessage,
        ctx: &RenderContext,
    ) -> Result<Option<Value>> {
        if msg.kind != "action" {
            return Err(Error::InvalidActionMessage(format!(
                "unexpected message type {:?}",
                msg.kind
            )));
        }
        if let Some(token) = &msg.token {
            if !token.is_empty() && *token != self.token {
                return Err(Error::InvalidToken);
            }
        }

        // Snapshot the data and release the page lock before user code
        // runs; handlers may block arbitrarily.
        let current = {
            let mut inner = self.inner.lock();
            inner.check_open()?;
            inner.data.clone()
        };
        let resolution = self.actions.read().resolve(&msg.action)?;

        self.incr(|m| m.actions_dispatched.fetch_add(1, Ordering::Relaxed));
        debug!(page = %self.id, action = %msg.action, "dispatching action");

        let invoked = match resolution {
            Resolution::Named(handler) => handler(&current, &msg.data),
            Resolution::Model { model, method } => {
                let mut action_ctx = ActionContext::new(&msg.data, &current);
                model
                    .handle(&method, &mut action_ctx)
                    .map(|()| action_ctx.into_response().unwrap_or_else(|| current.clone()))
            }
        };
        let new_data = invoked.map_err(|e| {
            self.incr(|m| m.action_failures.fetch_add(1, Ordering::Relaxed));
            Error::ActionHandler(e)
        })?;

        self.apply_data(new_data, ctx)
    }

    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.status != PageStatus::Closed {
            debug!(page = %self.id, "closing page");
            inner.status = PageStatus::Closed;
            inner.last_tree = None;
            inner.fingerprint = None;
        }
    }

    fn apply_data(&self, new_data: Value, ctx: &RenderContext) -> Result<Option<Value>> {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }
        let mut inner = self.inner.lock();
        inner.check_open()?;

        let tree = hydrate(self.template.root(), &new_data)?;
        if ctx.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let fp = fingerprint(&tree);
        inner.last_active = Instant::now();
        if inner.fingerprint.as_deref() == Some(fp.as_str()) {
            inner.data = new_data;
            self.incr(|m| m.no_change_renders.fetch_add(1, Ordering::Relaxed));
            return Ok(None);
        }

        let first = inner.last_tree.is_none();
        let payload_tree = match &inner.last_tree {
            None => tree.clone(),
            Some(prev) => match diff(prev, &tree) {
                Some(update) => update,
                None => {
                    inner.data = new_data;
                    inner.last_tree = Some(tree);
                    inner.fingerprint = Some(fp);
                    self.incr(|m| m.no_change_renders.fetch_add(1, Ordering::Relaxed));
                    return Ok(None);
                }
            },
        };
        if ctx.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        inner.data = new_data;
        inner.last_tree = Some(tree);
        inner.fingerprint = Some(fp);
        drop(inner);

        if first {
            self.incr(|m| m.initial_renders.fetch_add(1, Ordering::Relaxed));
        } else {
            self.incr(|m| m.update_renders.fetch_add(1, Ordering::Relaxed));
        }
        debug!(page = %self.id, initial = first, "emitting render payload");
        Ok(Some(encode(&payload_tree, ctx.cache_hint.as_ref())))
    }

    fn incr(&self, bump: impl Fn(&AppMetrics) -> u64) {
        if let Some(metrics) = &self.metrics {
            bump(metrics);
        }
    }
}

/// Ensure the emitted HTML begins with an element carrying the wrapper
/// id. Documents get the attribute on `<body>`, fragments on their first
/// element; bare text is wrapped in a `<div>`.
fn inject_wrapper_id(html: &str, id: &str) -> String {
    if let Some(pos) = find_tag(html, "body") {
        return insert_attr(html, pos + "<body".len(), id);
    }
    if let Some(after_name) = first_element(html) {
        return insert_attr(html, after_name, id);
    }
    format!("<div {WRAPPER_ATTR}=\"{id}\">{html}</div>")
}

/// Byte offset of `<tag` (ASCII case-insensitive) followed by a
/// delimiter, if present.
fn find_tag(html: &str, tag: &str) -> Option<usize> {
    let lower = html.to_ascii_lowercase();
    let needle = format!("<{tag}");
    let mut start = 0;
    while let Some(rel) = lower[start..].find(&needle) {
        let pos = start + rel;
        match lower.as_bytes().get(pos + needle.len()) {
            Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b'/') => {
                return Some(pos)
            }
            _ => start = pos + needle.len(),
        }
    }
    None
}

/// Offset just past the tag name of the first element open tag.
fn first_element(html: &str) -> Option<usize> {
    let bytes = html.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'<' && bytes[i + 1].is_ascii_alphabetic() {
            let mut end = i + 1;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'-')
            {
                end += 1;
            }
            return Some(end);
        }
        i += 1;
    }
    None
}

fn insert_attr(html: &str, at: usize, id: &str) -> String {
    let mut out = String::with_capacity(html.len() + WRAPPER_ATTR.len() + id.len() + 4);
    out.push_str(&html[..at]);
    out.push_str(&format!(" {WRAPPER_ATTR}=\"{id}\""));
    out.push_str(&html[at..]);
    out
}
