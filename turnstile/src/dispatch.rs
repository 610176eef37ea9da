//! Authentication dispatcher.
//!
//! Tries the strategies of a [`Chain`] strictly in order. A `fail` records the
//! failure and moves on; every other action ends the chain. When all
//! strategies fail the accumulated failures are turned into a 401 (or the
//! first strategy-chosen status), a failure redirect, an `Authentication`
//! error, or handed to the caller's callback.

use anyhow::anyhow;
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use serde_json::{Map, Value};
use tracing::{debug, instrument, trace};

use crate::authenticator::Authenticator;
use crate::error::{AuthError, Result};
use crate::options::{AuthenticateOptions, Challenge, Info};
use crate::request::AuthRequest;
use crate::session::RETURN_TO_FIELD;
use crate::strategy::{Action, Actions, Chain, Failure, StrategyRef};
use crate::Identity;

/// What the HTTP layer should do once dispatch is over.
#[derive(Debug)]
pub enum Outcome {
    /// Hand the request to the next handler
    Continue,
    /// End the request with this response
    Respond(Response),
}

impl Outcome {
    pub fn is_continue(&self) -> bool {
        matches!(self, Outcome::Continue)
    }
}

/// Failure report handed to a callback when every strategy failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The chain was a single strategy
    Single {
        challenge: Option<Challenge>,
        status: Option<StatusCode>,
    },
    /// The chain was a list; one entry per strategy, in order
    Multi {
        challenges: Vec<Option<Challenge>>,
        statuses: Vec<Option<StatusCode>>,
    },
}

/// Result of an attempt as seen by a callback.
#[derive(Debug)]
pub enum Verdict<U> {
    Authenticated { identity: U, info: Option<Info> },
    Rejected(Rejection),
}

pub type CallbackResult<U> = Result<Verdict<U>>;

/// Takes over success, failure and error handling from the dispatcher.
pub type Callback<'a, U> = Box<dyn FnOnce(&mut AuthRequest<U>, CallbackResult<U>) -> Result<Outcome> + Send + 'a>;

/// State of one dispatch through a chain.
pub(crate) struct Dispatch<'a, U> {
    auth: &'a Authenticator<U>,
    options: &'a AuthenticateOptions,
    failures: Vec<Failure>,
}

impl<'a, U: Identity> Dispatch<'a, U> {
    pub(crate) fn new(auth: &'a Authenticator<U>, options: &'a AuthenticateOptions) -> Self {
        Self {
            auth,
            options,
            failures: Vec::new(),
        }
    }

    /// Walk the chain until a strategy does something other than fail.
    ///
    /// `None` means every strategy failed; the failures are in `self.failures`.
    async fn attempt(&mut self, chain: &Chain<U>, req: &mut AuthRequest<U>) -> Result<Option<Action<U>>> {
        for (index, entry) in chain.entries().iter().enumerate() {
            let strategy = match entry {
                StrategyRef::Instance(strategy) => strategy.clone(),
                StrategyRef::Named(name) => self
                    .auth
                    .strategy(name)
                    .ok_or_else(|| AuthError::UnknownStrategy { name: name.clone() })?,
            };

            trace!(index, strategy = entry.label(), "Attempting strategy");
            let actions = Actions::new(entry.label(), index);
            match strategy.authenticate(req, self.options, actions).await.0 {
                Action::Fail(failure) => self.failures.push(failure),
                other => return Ok(Some(other)),
            }
        }
        Ok(None)
    }

    pub(crate) async fn run(
        mut self,
        chain: Chain<U>,
        req: &mut AuthRequest<U>,
        callback: Option<Callback<'_, U>>,
    ) -> Result<Outcome> {
        let action = match self.attempt(&chain, req).await? {
            Some(action) => action,
            None => return self.all_failed(chain.is_multi(), req, callback),
        };

        match action {
            Action::Success { identity, info } => match callback {
                Some(callback) => callback(req, Ok(Verdict::Authenticated { identity, info })),
                None => self.succeed(req, identity, info).await,
            },
            Action::Redirect { url, status } => redirect(&url, status).map(Outcome::Respond),
            Action::Pass => Ok(Outcome::Continue),
            Action::Error(e) => match callback {
                Some(callback) => callback(req, Err(e)),
                None => Err(e),
            },
            // attempt only returns on a non-fail action
            Action::Fail(failure) => {
                self.failures.push(failure);
                self.all_failed(chain.is_multi(), req, callback)
            }
        }
    }

    async fn succeed(&self, req: &mut AuthRequest<U>, identity: U, info: Option<Info>) -> Result<Outcome> {
        let info = info.unwrap_or_else(|| Value::Object(Map::new()));
        let (info_kind, info_message) = describe_info(&info);

        if let Some(flash) = &self.options.success_flash {
            if let Some((kind, message)) = flash.resolve_flash(info_kind, info_message, "success") {
                req.flash_message(&kind, &message);
            }
        }
        if let Some(message) = &self.options.success_message {
            if let (Some(message), Some(session)) = (message.resolve_message(info_message), req.session_mut()) {
                session.push_message(message);
            }
        }

        if let Some(property) = &self.options.assign_property {
            debug!(%property, "Assigning identity without a login session");
            req.set_identity(property.clone(), identity);
            return Ok(Outcome::Continue);
        }

        req.log_in(identity, &self.options.login_options()).await?;

        if self.options.auth_info {
            let info = self.auth.transform_auth_info(req.head(), info).await?;
            req.set_auth_info(info);
        }

        if let Some(fallback) = &self.options.success_return_to_or_redirect {
            let stored = req
                .session_mut()
                .and_then(|session| session.remove(RETURN_TO_FIELD))
                .and_then(|url| url.as_str().map(str::to_string));
            let url = stored.as_deref().unwrap_or(fallback);
            return redirect(url, StatusCode::FOUND).map(Outcome::Respond);
        }
        if let Some(url) = &self.options.success_redirect {
            return redirect(url, StatusCode::FOUND).map(Outcome::Respond);
        }
        Ok(Outcome::Continue)
    }

    fn all_failed(self, multi: bool, req: &mut AuthRequest<U>, callback: Option<Callback<'_, U>>) -> Result<Outcome> {
        debug!(failures = self.failures.len(), "All strategies failed");

        if let Some(callback) = callback {
            let rejection = if multi {
                let (challenges, statuses) = self.failures.into_iter().map(|f| (f.challenge, f.status)).unzip();
                Rejection::Multi { challenges, statuses }
            } else {
                let first = self.failures.into_iter().next();
                Rejection::Single {
                    challenge: first.as_ref().and_then(|f| f.challenge.clone()),
                    status: first.and_then(|f| f.status),
                }
            };
            return callback(req, Ok(Verdict::Rejected(rejection)));
        }

        // the first strategy has priority for messages
        let first = self.failures.first().and_then(|f| f.challenge.as_ref());
        let (challenge_kind, challenge_message) = (first.and_then(Challenge::kind), first.and_then(Challenge::message));

        if let Some(flash) = &self.options.failure_flash {
            if let Some((kind, message)) = flash.resolve_flash(challenge_kind, challenge_message, "error") {
                req.flash_message(&kind, &message);
            }
        }
        if let Some(message) = &self.options.failure_message {
            if let (Some(message), Some(session)) = (message.resolve_message(challenge_message), req.session_mut()) {
                session.push_message(message);
            }
        }
        if let Some(url) = &self.options.failure_redirect {
            return redirect(url, StatusCode::FOUND).map(Outcome::Respond);
        }

        let status = self
            .failures
            .iter()
            .find_map(|f| f.status)
            .unwrap_or(StatusCode::UNAUTHORIZED);
        let reason = status.canonical_reason().unwrap_or_default().to_string();

        if self.options.fail_with_error {
            return Err(AuthError::Authentication { message: reason, status });
        }

        let mut response = Response::builder().status(status);
        if status == StatusCode::UNAUTHORIZED {
            for failure in &self.failures {
                if let Some(Challenge::Text(challenge)) = &failure.challenge {
                    let value =
                        HeaderValue::try_from(challenge.as_str()).map_err(|e| anyhow!("Invalid challenge {challenge:?}: {e}"))?;
                    response = response.header(header::WWW_AUTHENTICATE, value);
                }
            }
        }
        let response = response
            .body(Body::from(reason))
            .map_err(|e| anyhow!("Failed to build failure response: {e}"))?;
        Ok(Outcome::Respond(response))
    }
}

/// `(type, message)` carried by success info, as used for flash messages.
fn describe_info(info: &Info) -> (Option<&str>, Option<&str>) {
    match info {
        Value::String(message) => (None, Some(message)),
        Value::Object(map) => (
            map.get("type").and_then(Value::as_str),
            map.get("message").and_then(Value::as_str),
        ),
        _ => (None, None),
    }
}

/// A bodyless redirect to `url`.
pub(crate) fn redirect(url: &str, status: StatusCode) -> Result<Response> {
    let location = HeaderValue::try_from(url).map_err(|e| anyhow!("Invalid redirect location {url:?}: {e}"))?;
    Response::builder()
        .status(status)
        .header(header::LOCATION, location)
        .header(header::CONTENT_LENGTH, HeaderValue::from_static("0"))
        .body(Body::empty())
        .map_err(|e| anyhow!("Failed to build redirect: {e}").into())
}

/// Entry point used by the authenticator.
#[instrument(skip_all, fields(strategies = ?chain.entries().iter().map(|e| e.label().to_string()).collect::<Vec<_>>()))]
pub(crate) async fn dispatch<U: Identity>(
    auth: &Authenticator<U>,
    chain: Chain<U>,
    options: &AuthenticateOptions,
    req: &mut AuthRequest<U>,
    callback: Option<Callback<'_, U>>,
) -> Result<Outcome> {
    Dispatch::new(auth, options).run(chain, req, callback).await
}
