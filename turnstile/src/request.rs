//! Per-request authentication state.
//!
//! [`AuthRequest`] is the mutable bag the dispatcher, strategies and session
//! manager share while a single request is being authenticated: the request
//! head, the session, the identities resolved so far and the auth info.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::http::{request::Parts, HeaderMap, Method, Uri};
use tracing::debug;

use crate::error::Result;
use crate::options::{Info, LoginOptions, LogoutOptions};
use crate::session::{Session, SessionManager};
use crate::Identity;

/// Default request property that holds the logged-in identity.
pub const DEFAULT_USER_PROPERTY: &str = "user";

/// The parts of an HTTP request strategies and codec links may inspect.
#[derive(Debug, Clone, Default)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self { method, uri, headers }
    }

    /// Header value as UTF-8, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

impl From<&Parts> for RequestHead {
    fn from(parts: &Parts) -> Self {
        Self::new(parts.method.clone(), parts.uri.clone(), parts.headers.clone())
    }
}

/// Flash-message storage, when the application installs one.
pub trait FlashStore: Send + Sync {
    fn flash(&self, kind: &str, message: &str);
}

pub struct AuthRequest<U> {
    head: RequestHead,
    session: Option<Session>,
    identities: HashMap<String, U>,
    auth_info: Option<Info>,
    user_property: String,
    session_manager: Option<Arc<SessionManager<U>>>,
    flash: Option<Arc<dyn FlashStore>>,
    body_paused: bool,
}

impl<U: Identity> AuthRequest<U> {
    pub fn new(head: RequestHead, session: Option<Session>) -> Self {
        Self {
            head,
            session,
            identities: HashMap::new(),
            auth_info: None,
            user_property: DEFAULT_USER_PROPERTY.to_string(),
            session_manager: None,
            flash: None,
            body_paused: false,
        }
    }

    /// Override the property the logged-in identity is stored under.
    pub fn with_user_property(mut self, property: impl Into<String>) -> Self {
        self.user_property = property.into();
        self
    }

    pub fn with_flash(mut self, flash: Arc<dyn FlashStore>) -> Self {
        self.flash = Some(flash);
        self
    }

    /// Seed identities resolved by an earlier middleware.
    pub fn with_identities(mut self, identities: HashMap<String, U>) -> Self {
        self.identities.extend(identities);
        self
    }

    pub(crate) fn attach_session_manager(&mut self, manager: Arc<SessionManager<U>>) {
        self.session_manager = Some(manager);
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    pub fn user_property(&self) -> &str {
        &self.user_property
    }

    /// The logged-in identity, if any.
    pub fn user(&self) -> Option<&U> {
        self.identities.get(&self.user_property)
    }

    pub fn identity(&self, property: &str) -> Option<&U> {
        self.identities.get(property)
    }

    pub fn set_identity(&mut self, property: impl Into<String>, identity: U) {
        self.identities.insert(property.into(), identity);
    }

    pub fn clear_identity(&mut self, property: &str) -> Option<U> {
        self.identities.remove(property)
    }

    pub fn auth_info(&self) -> Option<&Info> {
        self.auth_info.as_ref()
    }

    pub(crate) fn set_auth_info(&mut self, info: Info) {
        self.auth_info = Some(info);
    }

    pub(crate) fn flash_message(&self, kind: &str, message: &str) {
        if let Some(flash) = &self.flash {
            flash.flash(kind, message);
        }
    }

    pub(crate) fn pause_body(&mut self) {
        self.body_paused = true;
    }

    pub(crate) fn resume_body(&mut self) {
        self.body_paused = false;
    }

    /// Whether inbound body flow is currently held by the session strategy.
    pub fn is_body_paused(&self) -> bool {
        self.body_paused
    }

    pub fn is_authenticated(&self) -> bool {
        self.user().is_some()
    }

    pub fn is_unauthenticated(&self) -> bool {
        !self.is_authenticated()
    }

    /// Establish a login for `identity`.
    ///
    /// The identity is always assigned to the user property. When
    /// `options.session` is set and a session manager is attached, the login is
    /// also persisted; if that fails the assignment is rolled back.
    pub async fn log_in(&mut self, identity: U, options: &LoginOptions) -> Result<()> {
        let property = self.user_property.clone();
        self.set_identity(property.clone(), identity.clone());

        let manager = match (&self.session_manager, options.session) {
            (Some(manager), true) => manager.clone(),
            _ => return Ok(()),
        };
        if let Err(e) = manager.log_in(self, &identity, options).await {
            debug!(error = %e, "Login failed, clearing identity");
            self.clear_identity(&property);
            return Err(e);
        }
        Ok(())
    }

    /// Terminate the login session.
    pub async fn log_out(&mut self, options: &LogoutOptions) -> Result<()> {
        let property = self.user_property.clone();
        self.clear_identity(&property);

        match self.session_manager.clone() {
            Some(manager) => manager.log_out(self, options).await,
            None => Ok(()),
        }
    }

    /// Split into the session, identities and auth info once dispatch is over.
    pub fn into_parts(self) -> (Option<Session>, HashMap<String, U>, Option<Info>) {
        (self.session, self.identities, self.auth_info)
    }
}

impl<U: fmt::Debug> fmt::Debug for AuthRequest<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("head", &self.head)
            .field("session", &self.session)
            .field("identities", &self.identities)
            .field("auth_info", &self.auth_info)
            .field("user_property", &self.user_property)
            .finish_non_exhaustive()
    }
}
