//! Pluggable, strategy-based request authentication for axum services.
//!
//! This crate provides:
//! - A registry of named authentication strategies tried in order per request
//! - Serializer, deserializer and info-transformer chains converting identities to and from session tokens
//! - Session login and logout with session id rotation
//! - A session-restore strategy and a trusted-proxy header strategy
//! - axum middleware wiring sessions and authentication into a router
//!
//! # Example
//! ```ignore
//! use turnstile::{AuthenticateOptions, Authenticator, Deserializer, Serializer, Step};
//!
//! let auth = Authenticator::<User>::new();
//! auth.add_serializer(Serializer::plain(|user: User| async move { Ok(Step::Done(json!(user.id))) }));
//! auth.add_deserializer(Deserializer::plain(move |token| lookup(token)));
//! auth.use_strategy(Arc::new(ProxyHeaderStrategy::new("x-forwarded-user", find_user)))?;
//!
//! let mut req = auth.request(head, Some(session));
//! match auth.authenticate(["proxy-header", "session"], &AuthenticateOptions::default(), &mut req).await? {
//!     Outcome::Continue => { /* req.user() is set */ }
//!     Outcome::Respond(response) => return response,
//! }
//! ```

pub mod authenticator;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod options;
pub mod request;
pub mod session;
pub mod strategy;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_utils;

/// An authenticated principal. Any cloneable, thread-safe value qualifies.
pub trait Identity: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Identity for T {}

// Re-export commonly used types
pub use authenticator::Authenticator;
pub use codec::{Deserializer, IdentityCodec, InfoTransformer, Link, Serializer, Step, Token};
pub use config::Config;
pub use dispatch::{CallbackResult, Outcome, Rejection, Verdict};
pub use error::{AuthError, Result};
pub use options::{AuthenticateOptions, Challenge, FlashMessage, Info, LoginOptions, LogoutOptions, MessageOption};
pub use request::{AuthRequest, FlashStore, RequestHead};
pub use session::in_memory::InMemorySessionStore;
pub use session::{Session, SessionManager, SessionStore, StoreError};
pub use strategy::{Actions, Chain, Decision, Failure, ProxyHeaderStrategy, SessionStrategy, Strategy, StrategyRef};
