//! Options recognised by `authenticate`, `authorize`, login and logout.
//!
//! Field names follow snake_case so they can be loaded from the same YAML
//! files as the rest of the configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Auxiliary information a strategy attaches to a success.
pub type Info = Value;

/// A typed message for the flash store or a failure challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FlashMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FlashMessage {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            message: Some(message.into()),
        }
    }
}

/// Why a strategy declined the request.
///
/// Only `Text` challenges are sent back in `WWW-Authenticate`; structured
/// challenges are meant for flash and session messages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Challenge {
    Text(String),
    Message(FlashMessage),
}

impl Challenge {
    pub fn message(&self) -> Option<&str> {
        match self {
            Challenge::Text(text) => Some(text),
            Challenge::Message(flash) => flash.message.as_deref(),
        }
    }

    pub fn kind(&self) -> Option<&str> {
        match self {
            Challenge::Text(_) => None,
            Challenge::Message(flash) => flash.kind.as_deref(),
        }
    }
}

impl From<&str> for Challenge {
    fn from(text: &str) -> Self {
        Challenge::Text(text.to_string())
    }
}

impl From<String> for Challenge {
    fn from(text: String) -> Self {
        Challenge::Text(text)
    }
}

impl From<FlashMessage> for Challenge {
    fn from(flash: FlashMessage) -> Self {
        Challenge::Message(flash)
    }
}

/// `successFlash`/`failureFlash`/`successMessage`/`failureMessage` value.
///
/// `Toggle(true)` uses whatever message the strategy supplied, a string or a
/// structured message overrides it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageOption {
    Toggle(bool),
    Text(String),
    Message(FlashMessage),
}

impl MessageOption {
    /// Resolve `(type, message)` for the flash store.
    ///
    /// `source_kind`/`source_message` come from the strategy (challenge or info).
    pub(crate) fn resolve_flash(
        &self,
        source_kind: Option<&str>,
        source_message: Option<&str>,
        default_kind: &str,
    ) -> Option<(String, String)> {
        let (kind, message) = match self {
            MessageOption::Toggle(false) => return None,
            MessageOption::Toggle(true) => (source_kind.unwrap_or(default_kind), source_message),
            MessageOption::Text(text) => (default_kind, Some(text.as_str())),
            MessageOption::Message(flash) => (
                flash.kind.as_deref().unwrap_or(default_kind),
                flash.message.as_deref().or(source_message),
            ),
        };
        message.map(|message| (kind.to_string(), message.to_string()))
    }

    /// Resolve the text appended to `session.messages`.
    pub(crate) fn resolve_message(&self, source_message: Option<&str>) -> Option<String> {
        match self {
            MessageOption::Toggle(false) => None,
            MessageOption::Toggle(true) => source_message.map(str::to_string),
            MessageOption::Text(text) => Some(text.clone()),
            MessageOption::Message(flash) => flash.message.clone().or_else(|| source_message.map(str::to_string)),
        }
    }
}

impl From<bool> for MessageOption {
    fn from(toggle: bool) -> Self {
        MessageOption::Toggle(toggle)
    }
}

impl From<&str> for MessageOption {
    fn from(text: &str) -> Self {
        MessageOption::Text(text.to_string())
    }
}

/// Options for a dispatch through `authenticate`/`authorize`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthenticateOptions {
    /// Establish a login session on success
    pub session: bool,
    pub success_redirect: Option<String>,
    /// Redirect to `session.returnTo` if present (consuming it), else to this URL
    pub success_return_to_or_redirect: Option<String>,
    pub success_flash: Option<MessageOption>,
    pub success_message: Option<MessageOption>,
    pub failure_redirect: Option<String>,
    pub failure_flash: Option<MessageOption>,
    pub failure_message: Option<MessageOption>,
    /// Return an `Authentication` error instead of writing the 401 response
    pub fail_with_error: bool,
    /// Store the identity under this request property and skip session login
    pub assign_property: Option<String>,
    /// Run the info transformers and expose the result on the request
    pub auth_info: bool,
    pub keep_session_info: bool,
    /// Session strategy only: hold the request body while deserializing.
    /// axum bodies are only pulled by the handler, so no data arrives during
    /// deserialization and this only marks the request as paused.
    pub pause_stream: bool,
    /// Strategy-specific options (`scope`, `state`, `prompt`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AuthenticateOptions {
    fn default() -> Self {
        Self {
            session: true,
            success_redirect: None,
            success_return_to_or_redirect: None,
            success_flash: None,
            success_message: None,
            failure_redirect: None,
            failure_flash: None,
            failure_message: None,
            fail_with_error: false,
            assign_property: None,
            auth_info: true,
            keep_session_info: false,
            pause_stream: false,
            extra: Map::new(),
        }
    }
}

impl AuthenticateOptions {
    pub(crate) fn login_options(&self) -> LoginOptions {
        LoginOptions {
            session: self.session,
            keep_session_info: self.keep_session_info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoginOptions {
    /// Persist the login in the session store
    pub session: bool,
    /// Carry the pre-login session fields over into the regenerated session
    pub keep_session_info: bool,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            session: true,
            keep_session_info: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogoutOptions {
    pub keep_session_info: bool,
}
