//! axum adapter.
//!
//! - [`session_middleware`] loads the session named by the session cookie, makes it available to
//!   later layers through a [`SessionSlot`] extension, saves it after the handler ran and sets the
//!   cookie to the current (possibly rotated) id. A session issued for the request is only kept
//!   once something was written to it.
//! - [`authenticate`] runs a dispatch for an [`AuthGate`] and either forwards the request with
//!   [`Identities`] and [`AuthInfo`] extensions or answers it directly.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use axum::{middleware::from_fn_with_state, routing::get, Router};
//! # use turnstile::{http::{self, AuthGate, SessionSupport}, session::in_memory::InMemorySessionStore, Authenticator};
//! # #[derive(Clone)] struct User;
//! let auth = Arc::new(Authenticator::<User>::new());
//! let sessions = SessionSupport::new(Arc::new(InMemorySessionStore::new()), "turnstile.sid");
//! let app: Router = Router::new()
//!     .route("/", get(|| async { "hello" }))
//!     .layer(from_fn_with_state(AuthGate::session(auth), http::authenticate::<User>))
//!     .layer(from_fn_with_state(sessions, http::session_middleware));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tracing::{debug, instrument, trace, warn};

use crate::authenticator::Authenticator;
use crate::dispatch::Outcome;
use crate::error::{AuthError, Result};
use crate::options::{AuthenticateOptions, Info, LogoutOptions};
use crate::request::{FlashStore, RequestHead};
use crate::session::{Session, SessionStore, StoreError};
use crate::strategy::Chain;
use crate::Identity;

/// Session store and cookie name for [`session_middleware`].
#[derive(Clone)]
pub struct SessionSupport {
    store: Arc<dyn SessionStore>,
    cookie_name: Arc<str>,
}

impl SessionSupport {
    pub fn new(store: Arc<dyn SessionStore>, cookie_name: &str) -> Self {
        Self {
            store,
            cookie_name: Arc::from(cookie_name),
        }
    }
}

/// The request's session, shared between the layers that need it.
///
/// A layer takes the session out while it works on it and puts it back when done.
#[derive(Clone, Default)]
pub struct SessionSlot(Arc<Mutex<Option<Session>>>);

impl SessionSlot {
    pub fn new(session: Session) -> Self {
        Self(Arc::new(Mutex::new(Some(session))))
    }

    pub fn take(&self) -> Option<Session> {
        self.0.lock().take()
    }

    pub fn put(&self, session: Option<Session>) {
        *self.0.lock() = session;
    }

    /// Id of the session currently in the slot.
    pub fn id(&self) -> Option<String> {
        self.0.lock().as_ref().map(|session| session.id().to_string())
    }
}

/// Identities resolved for the request, keyed by property (`user`, `account`, ...).
#[derive(Debug, Clone)]
pub struct Identities<U> {
    user_property: String,
    identities: HashMap<String, U>,
}

impl<U> Identities<U> {
    /// The logged-in identity.
    pub fn user(&self) -> Option<&U> {
        self.identities.get(&self.user_property)
    }

    pub fn get(&self, property: &str) -> Option<&U> {
        self.identities.get(property)
    }

    pub fn is_authenticated(&self) -> bool {
        self.user().is_some()
    }
}

/// Auth info of the strategy that authenticated the request, after transformation.
#[derive(Debug, Clone)]
pub struct AuthInfo(pub Info);

/// Flash store installed as a request extension by the application.
#[derive(Clone)]
pub struct Flash(pub Arc<dyn FlashStore>);

/// Extractor for the logged-in identity; rejects with 401 when there is none.
#[derive(Debug, Clone)]
pub struct CurrentIdentity<U>(pub U);

impl<U, S> FromRequestParts<S> for CurrentIdentity<U>
where
    U: Identity,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<Identities<U>>()
            .and_then(Identities::user)
            .cloned()
            .map(CurrentIdentity)
            .ok_or_else(|| AuthError::Authentication {
                message: "Unauthorized".to_string(),
                status: StatusCode::UNAUTHORIZED,
            })
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(cookie_name, _)| *cookie_name == name)
        .map(|(_, value)| value.to_string())
}

/// Load the session, run the rest of the stack, then persist the session and set its cookie.
#[instrument(skip_all)]
pub async fn session_middleware(State(support): State<SessionSupport>, mut request: Request, next: Next) -> Response {
    let id = cookie_value(request.headers(), &support.cookie_name);
    let session = match Session::load_or_create(support.store.clone(), id.as_deref()).await {
        Ok(session) => session,
        Err(e) => return AuthError::from(e).into_response(),
    };
    trace!(session_id = %session.id(), "Session loaded");

    let slot = SessionSlot::new(session);
    request.extensions_mut().insert(slot.clone());
    let mut response = next.run(request).await;

    let Some(session) = slot.take() else {
        warn!("Session was not returned to its slot, skipping save");
        return response;
    };
    // a session issued for this request that nothing wrote to is not kept
    if session.is_fresh() && session.data().is_empty() {
        if let Err(e) = session.destroy().await {
            warn!(error = %e, session_id = %session.id(), "Failed to discard unused session");
        }
        trace!(session_id = %session.id(), "Session left empty, not persisting it");
        return response;
    }

    match session.save().await {
        Ok(()) => {}
        Err(StoreError::NotFound(id)) => {
            warn!(session_id = %id, "Session was rotated by a concurrent request, skipping save");
            return response;
        }
        Err(e) => return AuthError::from(e).into_response(),
    }

    let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", support.cookie_name, session.id());
    match HeaderValue::try_from(cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => warn!(error = %e, "Session cookie is not a valid header value"),
    }
    response
}

/// One configured dispatch: the registry, the chain to try and its options.
pub struct AuthGate<U> {
    auth: Arc<Authenticator<U>>,
    chain: Chain<U>,
    options: AuthenticateOptions,
}

impl<U> Clone for AuthGate<U> {
    fn clone(&self) -> Self {
        Self {
            auth: self.auth.clone(),
            chain: self.chain.clone(),
            options: self.options.clone(),
        }
    }
}

impl<U: Identity> AuthGate<U> {
    pub fn new(auth: Arc<Authenticator<U>>, chain: impl Into<Chain<U>>, options: AuthenticateOptions) -> Self {
        Self {
            auth,
            chain: chain.into(),
            options,
        }
    }

    /// Restore logins from the session on every request.
    pub fn session(auth: Arc<Authenticator<U>>) -> Self {
        let options = auth.session_options();
        Self::new(auth, crate::strategy::session::SESSION_STRATEGY, options)
    }
}

/// Run the gate's dispatch for this request.
///
/// Identities resolved by an earlier gate are carried over, so a session gate
/// followed by a login gate sees the restored user.
pub async fn authenticate<U: Identity>(State(gate): State<AuthGate<U>>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    let slot = parts.extensions.get::<SessionSlot>().cloned();

    let mut req = gate
        .auth
        .request(RequestHead::from(&parts), slot.as_ref().and_then(SessionSlot::take));
    if let Some(previous) = parts.extensions.get::<Identities<U>>() {
        req = req.with_identities(previous.identities.clone());
    }
    if let Some(Flash(flash)) = parts.extensions.get::<Flash>() {
        req = req.with_flash(flash.clone());
    }

    let outcome = gate.auth.authenticate(gate.chain.clone(), &gate.options, &mut req).await;

    let user_property = req.user_property().to_string();
    let (session, identities, info) = req.into_parts();
    if let Some(slot) = &slot {
        slot.put(session);
    }

    match outcome {
        Ok(Outcome::Continue) => {
            parts.extensions.insert(Identities {
                user_property,
                identities,
            });
            if let Some(info) = info {
                parts.extensions.insert(AuthInfo(info));
            }
            next.run(Request::from_parts(parts, body)).await
        }
        Ok(Outcome::Respond(response)) => {
            debug!(status = %response.status(), "Authentication answered the request");
            response
        }
        Err(e) => e.into_response(),
    }
}

/// Log out the request's session from a handler.
pub async fn log_out<U: Identity>(
    auth: &Authenticator<U>,
    slot: &SessionSlot,
    head: RequestHead,
    options: &LogoutOptions,
) -> Result<()> {
    let mut req = auth.request(head, slot.take());
    let result = req.log_out(options).await;
    let (session, _, _) = req.into_parts();
    slot.put(session);
    result
}
