//! Action messages, handler registration, and dispatch.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Boxed error returned by user handlers; surfaced verbatim as
/// [`Error::ActionHandler`].
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A named action handler: `(current data, payload) -> new data`.
pub type ActionHandler =
    Arc<dyn Fn(&Value, &Value) -> std::result::Result<Value, HandlerError> + Send + Sync>;

/// Inbound action message.
///
/// ```json
/// {"type":"action","action":"increment","token":"...","data":{"amount":2}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl ActionMessage {
    /// Parse and validate an action message from JSON text. Missing
    /// `data` is normalized to an empty object.
    pub fn parse(json: &str) -> Result<Self> {
        let mut msg: ActionMessage = serde_json::from_str(json)
            .map_err(|e| Error::InvalidActionMessage(e.to_string()))?;
        if msg.kind != "action" {
            return Err(Error::InvalidActionMessage(format!(
                "unexpected message type {:?}",
                msg.kind
            )));
        }
        if msg.action.is_empty() {
            return Err(Error::InvalidActionMessage(
                "empty action name".to_string(),
            ));
        }
        if msg.data.is_null() {
            msg.data = Value::Object(Map::new());
        }
        Ok(msg)
    }

    /// Build an action message in code, for callers that do not go
    /// through a wire format.
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            kind: "action".to_string(),
            action: action.into(),
            token: None,
            data,
        }
    }

    /// Attach the session-issued token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// View of one action dispatch handed to data-model methods.
///
/// Decouples handlers from the wire payload shape: typed accessors and a
/// structural bind on the way in, [`set_response`](Self::set_response) on
/// the way out.
pub struct ActionContext<'a> {
    payload: &'a Value,
    current: &'a Value,
    response: Option<Value>,
}

impl<'a> ActionContext<'a> {
    pub(crate) fn new(payload: &'a Value, current: &'a Value) -> Self {
        Self {
            payload,
            current,
            response: None,
        }
    }

    /// The raw action payload.
    pub fn payload(&self) -> &Value {
        self.payload
    }

    /// The page's current data value.
    pub fn current(&self) -> &Value {
        self.current
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.payload.get(key).and_then(Value::as_i64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }

    /// Copy payload fields into a target structure by field name.
    pub fn bind<T: DeserializeOwned>(&self) -> std::result::Result<T, HandlerError> {
        serde_json::from_value(self.payload.clone()).map_err(Into::into)
    }

    /// Deserialize the page's current data.
    pub fn data<T: DeserializeOwned>(&self) -> std::result::Result<T, HandlerError> {
        serde_json::from_value(self.current.clone()).map_err(Into::into)
    }

    /// Communicate the new data back to the page, which then drives the
    /// hydrate/diff cycle.
    pub fn set_response<T: Serialize>(&mut self, data: T) -> std::result::Result<(), HandlerError> {
        self.response = Some(serde_json::to_value(data)?);
        Ok(())
    }

    pub(crate) fn into_response(self) -> Option<Value> {
        self.response
    }
}

/// A data model exposing methods as actions, namespaced by model name.
pub trait ActionModel: Send + Sync {
    /// Namespace for this model's actions, `modelname` in
    /// `modelname.method`.
    fn model_name(&self) -> &str;

    /// Method names this model handles.
    fn action_names(&self) -> Vec<&str>;

    /// Handle one action. `action` is always one of
    /// [`action_names`](Self::action_names).
    fn handle(
        &self,
        action: &str,
        ctx: &mut ActionContext<'_>,
    ) -> std::result::Result<(), HandlerError>;
}

/// Registered handlers and models for one page.
#[derive(Default)]
pub(crate) struct ActionTable {
    named: IndexMap<String, ActionHandler>,
    models: Vec<Arc<dyn ActionModel>>,
}

impl ActionTable {
    pub fn register_named(&mut self, name: impl Into<String>, handler: ActionHandler) {
        self.named.insert(name.into(), handler);
    }

    pub fn register_model(&mut self, model: Arc<dyn ActionModel>) {
        self.models.push(model);
    }

    /// Resolve an action name: exact handler match, then the namespaced
    /// `model.method` form, then a bare method name across models. A bare
    /// name matching several models is ambiguous.
    ///
    /// Resolutions are owned so the caller can drop its lock on this
    /// table before invoking user code.
    pub fn resolve(&self, action: &str) -> Result<Resolution> {
        if let Some(handler) = self.named.get(action) {
            return Ok(Resolution::Named(Arc::clone(handler)));
        }

        if let Some((model_name, method)) = action.split_once('.') {
            for model in &self.models {
                if model.model_name() == model_name && model.action_names().contains(&method) {
                    return Ok(Resolution::Model {
                        model: Arc::clone(model),
                        method: method.to_string(),
                    });
                }
            }
            return Err(Error::UnknownAction(action.to_string()));
        }

        let matches: Vec<&Arc<dyn ActionModel>> = self
            .models
            .iter()
            .filter(|m| m.action_names().contains(&action))
            .collect();
        match matches.len() {
            0 => Err(Error::UnknownAction(action.to_string())),
            1 => Ok(Resolution::Model {
                model: Arc::clone(matches[0]),
                method: action.to_string(),
            }),
            _ => Err(Error::AmbiguousAction {
                action: action.to_string(),
                candidates: matches
                    .iter()
                    .map(|m| format!("{}.{action}", m.model_name()))
                    .collect(),
            }),
        }
    }
}

pub(crate) enum Resolution {
    Named(ActionHandler),
    Model {
        model: Arc<dyn ActionModel>,
        method: String,
    },
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Named(_) => f.debug_tuple("Named").finish(),
            Resolution::Model { method, .. } => f
                .debug_struct("Model")
                .field("method", method)
                .finish(),
        }
    }
}
