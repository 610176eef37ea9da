//! Session-restore strategy.
//!
//! Reads the token stored at `session[key].user`, resolves it through the
//! deserializer chain and assigns the identity to the request. It never
//! succeeds or fails: restoring a session only ever passes to downstream
//! handling or reports an error.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{Actions, Decision, Strategy};
use crate::codec::{IdentityCodec, Token};
use crate::error::AuthError;
use crate::options::AuthenticateOptions;
use crate::request::AuthRequest;
use crate::session::IDENTITY_FIELD;
use crate::Identity;

pub const SESSION_STRATEGY: &str = "session";

pub struct SessionStrategy<U> {
    key: String,
    codec: Arc<IdentityCodec<U>>,
}

impl<U: Identity> SessionStrategy<U> {
    pub fn new(key: impl Into<String>, codec: Arc<IdentityCodec<U>>) -> Self {
        Self { key: key.into(), codec }
    }

    fn stored_token(&self, req: &AuthRequest<U>) -> Option<Token> {
        let token = req.session()?.get(&self.key)?.get(IDENTITY_FIELD)?;
        is_present(token).then(|| token.clone())
    }
}

/// `0` is a valid token, so only null, `false` and `""` count as absent.
fn is_present(token: &Value) -> bool {
    !matches!(token, Value::Null | Value::Bool(false)) && token.as_str() != Some("")
}

#[async_trait]
impl<U: Identity> Strategy<U> for SessionStrategy<U> {
    fn name(&self) -> Option<&str> {
        Some(SESSION_STRATEGY)
    }

    #[instrument(skip_all, fields(key = %self.key))]
    async fn authenticate(&self, req: &mut AuthRequest<U>, options: &AuthenticateOptions, actions: Actions<U>) -> Decision<U> {
        if req.session().is_none() {
            return actions.error(AuthError::MissingSession);
        }
        let Some(token) = self.stored_token(req) else {
            return actions.pass();
        };

        if options.pause_stream {
            req.pause_body();
        }
        let head = req.head().clone();
        let resolved = self.codec.deserialize(&head, token).await;
        req.resume_body();

        match resolved {
            Err(e) => actions.error(e),
            Ok(None) => {
                debug!("Stored identity no longer resolves, clearing it");
                if let Some(Value::Object(slot)) = req.session_mut().and_then(|session| session.get_mut(&self.key)) {
                    slot.remove(IDENTITY_FIELD);
                }
                actions.pass()
            }
            Ok(Some(identity)) => {
                let property = req.user_property().to_string();
                req.set_identity(property, identity);
                actions.pass()
            }
        }
    }
}
