//! Pluggable authentication strategies.
//!
//! A [`Strategy`] inspects a request and reports exactly one decision through
//! the [`Actions`] handle it is given for that attempt:
//!
//! - `success` authenticates an identity and ends the chain
//! - `fail` declines; the dispatcher moves on to the next strategy
//! - `redirect` sends the client elsewhere and ends the chain
//! - `pass` defers to downstream handling without a verdict
//! - `error` reports an internal failure and ends the chain
//!
//! Every action consumes the handle and returns a [`Decision`], which nothing
//! else can construct, so a strategy cannot report twice or not at all.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;

use crate::error::AuthError;
use crate::options::{AuthenticateOptions, Challenge, Info};
use crate::request::AuthRequest;
use crate::Identity;

pub mod proxy_header;
pub mod session;

pub use proxy_header::ProxyHeaderStrategy;
pub use session::SessionStrategy;

#[async_trait]
pub trait Strategy<U>: Send + Sync {
    /// Name used when the strategy is registered without an explicit one.
    fn name(&self) -> Option<&str> {
        None
    }

    async fn authenticate(&self, req: &mut AuthRequest<U>, options: &AuthenticateOptions, actions: Actions<U>) -> Decision<U>;
}

/// A strategy's declined attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub challenge: Option<Challenge>,
    /// `None` defers to the aggregate default of 401
    pub status: Option<StatusCode>,
}

/// What a strategy decided for one attempt.
#[derive(Debug)]
pub(crate) enum Action<U> {
    Success { identity: U, info: Option<Info> },
    Fail(Failure),
    Redirect { url: String, status: StatusCode },
    Pass,
    Error(AuthError),
}

/// Proof that a strategy invoked one of its actions.
#[derive(Debug)]
pub struct Decision<U>(pub(crate) Action<U>);

/// The per-attempt action set handed to [`Strategy::authenticate`].
pub struct Actions<U> {
    strategy: String,
    attempt: usize,
    _identity: PhantomData<fn() -> U>,
}

impl<U> Actions<U> {
    pub(crate) fn new(strategy: impl Into<String>, attempt: usize) -> Self {
        Self {
            strategy: strategy.into(),
            attempt,
            _identity: PhantomData,
        }
    }

    /// Label of the strategy this attempt belongs to.
    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    /// Position of this attempt in the chain.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn success(self, identity: U, info: Option<Info>) -> Decision<U> {
        tracing::debug!(strategy = %self.strategy, attempt = self.attempt, "Strategy succeeded");
        Decision(Action::Success { identity, info })
    }

    pub fn fail(self, challenge: Option<Challenge>, status: Option<StatusCode>) -> Decision<U> {
        tracing::debug!(strategy = %self.strategy, attempt = self.attempt, ?status, "Strategy failed");
        Decision(Action::Fail(Failure { challenge, status }))
    }

    /// Redirect with the given status, 302 when `None`.
    pub fn redirect(self, url: impl Into<String>, status: Option<StatusCode>) -> Decision<U> {
        let url = url.into();
        tracing::debug!(strategy = %self.strategy, attempt = self.attempt, %url, "Strategy redirected");
        Decision(Action::Redirect {
            url,
            status: status.unwrap_or(StatusCode::FOUND),
        })
    }

    pub fn pass(self) -> Decision<U> {
        tracing::trace!(strategy = %self.strategy, attempt = self.attempt, "Strategy passed");
        Decision(Action::Pass)
    }

    pub fn error(self, err: impl Into<AuthError>) -> Decision<U> {
        let err = err.into();
        tracing::debug!(strategy = %self.strategy, attempt = self.attempt, error = %err, "Strategy errored");
        Decision(Action::Error(err))
    }
}

/// One entry of a dispatch chain: a registered name or a literal strategy.
pub enum StrategyRef<U> {
    Named(String),
    Instance(Arc<dyn Strategy<U>>),
}

impl<U> Clone for StrategyRef<U> {
    fn clone(&self) -> Self {
        match self {
            StrategyRef::Named(name) => StrategyRef::Named(name.clone()),
            StrategyRef::Instance(strategy) => StrategyRef::Instance(strategy.clone()),
        }
    }
}

impl<U: Identity> StrategyRef<U> {
    /// Label for logs and action handles.
    pub fn label(&self) -> &str {
        match self {
            StrategyRef::Named(name) => name,
            StrategyRef::Instance(strategy) => strategy.name().unwrap_or("<anonymous>"),
        }
    }
}

impl<U> fmt::Debug for StrategyRef<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyRef::Named(name) => f.debug_tuple("Named").field(name).finish(),
            StrategyRef::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

impl<U> From<&str> for StrategyRef<U> {
    fn from(name: &str) -> Self {
        StrategyRef::Named(name.to_string())
    }
}

impl<U> From<String> for StrategyRef<U> {
    fn from(name: String) -> Self {
        StrategyRef::Named(name)
    }
}

impl<U> From<Arc<dyn Strategy<U>>> for StrategyRef<U> {
    fn from(strategy: Arc<dyn Strategy<U>>) -> Self {
        StrategyRef::Instance(strategy)
    }
}

/// The strategies a dispatch tries, in order.
///
/// `Single` and `Multi` are tried the same way; they differ only in the shape
/// of the failure report handed to a callback.
#[derive(Debug)]
pub enum Chain<U> {
    Single(StrategyRef<U>),
    Multi(Vec<StrategyRef<U>>),
}

impl<U> Clone for Chain<U> {
    fn clone(&self) -> Self {
        match self {
            Chain::Single(entry) => Chain::Single(entry.clone()),
            Chain::Multi(entries) => Chain::Multi(entries.clone()),
        }
    }
}

impl<U> Chain<U> {
    pub fn entries(&self) -> &[StrategyRef<U>] {
        match self {
            Chain::Single(entry) => std::slice::from_ref(entry),
            Chain::Multi(entries) => entries,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Chain::Multi(_))
    }
}

impl<U> From<&str> for Chain<U> {
    fn from(name: &str) -> Self {
        Chain::Single(name.into())
    }
}

impl<U> From<String> for Chain<U> {
    fn from(name: String) -> Self {
        Chain::Single(name.into())
    }
}

impl<U> From<StrategyRef<U>> for Chain<U> {
    fn from(entry: StrategyRef<U>) -> Self {
        Chain::Single(entry)
    }
}

impl<U> From<Arc<dyn Strategy<U>>> for Chain<U> {
    fn from(strategy: Arc<dyn Strategy<U>>) -> Self {
        Chain::Single(StrategyRef::Instance(strategy))
    }
}

impl<U> From<Vec<StrategyRef<U>>> for Chain<U> {
    fn from(entries: Vec<StrategyRef<U>>) -> Self {
        Chain::Multi(entries)
    }
}

impl<U> From<Vec<&str>> for Chain<U> {
    fn from(names: Vec<&str>) -> Self {
        Chain::Multi(names.into_iter().map(StrategyRef::from).collect())
    }
}

impl<U, const N: usize> From<[&str; N]> for Chain<U> {
    fn from(names: [&str; N]) -> Self {
        Chain::Multi(names.into_iter().map(StrategyRef::from).collect())
    }
}
