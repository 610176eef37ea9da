//! The strategy registry and entry point for authentication.
//!
//! An [`Authenticator`] is constructed once at the composition root and shared
//! (usually behind an `Arc`) by every request. Strategies and codec links are
//! registered during setup; request handling only reads them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::codec::{Deserializer, IdentityCodec, InfoTransformer, Serializer, Token};
use crate::config::AuthConfig;
use crate::dispatch::{dispatch, CallbackResult, Outcome};
use crate::error::{AuthError, Result};
use crate::options::{AuthenticateOptions, Info};
use crate::request::{AuthRequest, RequestHead, DEFAULT_USER_PROPERTY};
use crate::session::{Session, SessionManager};
use crate::strategy::{Chain, SessionStrategy, Strategy};
use crate::Identity;

/// Default top-level session field holding login state.
pub const DEFAULT_SESSION_KEY: &str = "passport";

/// Property `authorize` assigns the identity to.
pub const AUTHORIZE_PROPERTY: &str = "account";

pub struct Authenticator<U> {
    key: String,
    user_property: String,
    pause_stream: bool,
    strategies: RwLock<HashMap<String, Arc<dyn Strategy<U>>>>,
    codec: Arc<IdentityCodec<U>>,
    session_manager: Arc<SessionManager<U>>,
}

impl<U: Identity> Default for Authenticator<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U: Identity> Authenticator<U> {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_SESSION_KEY, DEFAULT_USER_PROPERTY, false)
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::with_settings(&config.session_key, &config.user_property, config.pause_stream)
    }

    /// Build a registry storing login state under `session[key]` and exposing
    /// the logged-in identity as `user_property`.
    ///
    /// The session strategy is registered as `"session"`.
    pub fn with_settings(key: &str, user_property: &str, pause_stream: bool) -> Self {
        let codec = Arc::new(IdentityCodec::new());
        let session_manager = Arc::new(SessionManager::new(key, codec.clone()));
        let session_strategy: Arc<dyn Strategy<U>> = Arc::new(SessionStrategy::new(key, codec.clone()));

        let mut strategies = HashMap::new();
        if let Some(name) = session_strategy.name() {
            strategies.insert(name.to_string(), session_strategy.clone());
        }

        Self {
            key: key.to_string(),
            user_property: user_property.to_string(),
            pause_stream,
            strategies: RwLock::new(strategies),
            codec,
            session_manager,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn user_property(&self) -> &str {
        &self.user_property
    }

    /// Register a strategy under its own name.
    pub fn use_strategy(&self, strategy: Arc<dyn Strategy<U>>) -> Result<&Self> {
        let name = strategy.name().ok_or(AuthError::UnnamedStrategy)?.to_string();
        Ok(self.use_named(name, strategy))
    }

    /// Register a strategy under `name`, replacing any previous registration.
    pub fn use_named(&self, name: impl Into<String>, strategy: Arc<dyn Strategy<U>>) -> &Self {
        let name = name.into();
        if self.strategies.write().insert(name.clone(), strategy).is_some() {
            debug!(%name, "Replaced registered strategy");
        } else {
            info!(%name, "Registered authentication strategy");
        }
        self
    }

    /// Remove a registration; a no-op when `name` is unknown.
    pub fn unuse(&self, name: &str) -> &Self {
        self.strategies.write().remove(name);
        self
    }

    pub fn strategy(&self, name: &str) -> Option<Arc<dyn Strategy<U>>> {
        self.strategies.read().get(name).cloned()
    }

    pub fn codec(&self) -> &Arc<IdentityCodec<U>> {
        &self.codec
    }

    pub fn session_manager(&self) -> &Arc<SessionManager<U>> {
        &self.session_manager
    }

    pub fn add_serializer(&self, serializer: Serializer<U>) -> usize {
        self.codec.add_serializer(serializer)
    }

    pub fn add_deserializer(&self, deserializer: Deserializer<U>) -> usize {
        self.codec.add_deserializer(deserializer)
    }

    pub fn add_info_transformer(&self, transformer: InfoTransformer) -> usize {
        self.codec.add_info_transformer(transformer)
    }

    pub async fn serialize_identity(&self, head: &RequestHead, identity: &U) -> Result<Token> {
        self.codec.serialize(head, identity).await
    }

    pub async fn deserialize_identity(&self, head: &RequestHead, token: Token) -> Result<Option<U>> {
        self.codec.deserialize(head, token).await
    }

    pub async fn transform_auth_info(&self, head: &RequestHead, info: Info) -> Result<Info> {
        self.codec.transform(head, info).await
    }

    /// Start authenticating a request: binds the user property and the
    /// session manager so `log_in`/`log_out` persist login state.
    pub fn request(&self, head: RequestHead, session: Option<Session>) -> AuthRequest<U> {
        let mut req = AuthRequest::new(head, session).with_user_property(self.user_property.clone());
        req.attach_session_manager(self.session_manager.clone());
        req
    }

    pub async fn authenticate(
        &self,
        chain: impl Into<Chain<U>>,
        options: &AuthenticateOptions,
        req: &mut AuthRequest<U>,
    ) -> Result<Outcome> {
        dispatch(self, chain.into(), options, req, None).await
    }

    /// Authenticate with `callback` taking over success, failure and error
    /// handling. Redirects and passes are still handled by the dispatcher.
    pub async fn authenticate_with<F>(
        &self,
        chain: impl Into<Chain<U>>,
        options: &AuthenticateOptions,
        req: &mut AuthRequest<U>,
        callback: F,
    ) -> Result<Outcome>
    where
        F: FnOnce(&mut AuthRequest<U>, CallbackResult<U>) -> Result<Outcome> + Send,
    {
        dispatch(self, chain.into(), options, req, Some(Box::new(callback))).await
    }

    /// `authenticate` that assigns the identity to `account` instead of
    /// logging in, for connecting third-party accounts.
    pub async fn authorize(
        &self,
        chain: impl Into<Chain<U>>,
        options: &AuthenticateOptions,
        req: &mut AuthRequest<U>,
    ) -> Result<Outcome> {
        let options = Self::authorize_options(options);
        dispatch(self, chain.into(), &options, req, None).await
    }

    pub async fn authorize_with<F>(
        &self,
        chain: impl Into<Chain<U>>,
        options: &AuthenticateOptions,
        req: &mut AuthRequest<U>,
        callback: F,
    ) -> Result<Outcome>
    where
        F: FnOnce(&mut AuthRequest<U>, CallbackResult<U>) -> Result<Outcome> + Send,
    {
        let options = Self::authorize_options(options);
        dispatch(self, chain.into(), &options, req, Some(Box::new(callback))).await
    }

    fn authorize_options(options: &AuthenticateOptions) -> AuthenticateOptions {
        AuthenticateOptions {
            assign_property: Some(AUTHORIZE_PROPERTY.to_string()),
            session: false,
            ..options.clone()
        }
    }

    /// Restore a login from the session.
    pub async fn session(&self, req: &mut AuthRequest<U>) -> Result<Outcome> {
        let options = self.session_options();
        self.authenticate(crate::strategy::session::SESSION_STRATEGY, &options, req).await
    }

    pub(crate) fn session_options(&self) -> AuthenticateOptions {
        AuthenticateOptions {
            pause_stream: self.pause_stream,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Step;
    use crate::test_utils::{Script, ScriptedStrategy, TestUser};
    use serde_json::json;

    #[test]
    fn test_session_strategy_registered_by_default() {
        let auth: Authenticator<TestUser> = Authenticator::new();
        assert!(auth.strategy("session").is_some());
        assert_eq!(auth.key(), "passport");
        assert_eq!(auth.user_property(), "user");
    }

    #[test]
    fn test_use_requires_a_name() {
        let auth: Authenticator<TestUser> = Authenticator::new();

        let err = auth.use_strategy(Arc::new(ScriptedStrategy::new(Script::Pass))).err().unwrap();
        assert_eq!(err.to_string(), "Authentication strategies must have a name");

        auth.use_strategy(Arc::new(ScriptedStrategy::named("basic", Script::Pass))).unwrap();
        assert!(auth.strategy("basic").is_some());

        // an explicit name wins over the strategy's own
        auth.use_named("token", Arc::new(ScriptedStrategy::named("basic", Script::Pass)));
        assert!(auth.strategy("token").is_some());
    }

    #[tokio::test]
    async fn test_use_overwrites_and_unuse_removes() {
        let auth: Authenticator<TestUser> = Authenticator::new();
        let first = Arc::new(ScriptedStrategy::succeed(1));
        let second = Arc::new(ScriptedStrategy::succeed(2));
        auth.use_named("local", first.clone()).use_named("local", second.clone());

        let mut req = auth.request(RequestHead::default(), None);
        let options = AuthenticateOptions {
            session: false,
            ..Default::default()
        };
        auth.authenticate("local", &options, &mut req).await.unwrap();
        assert_eq!((first.calls(), second.calls()), (0, 1));
        assert_eq!(req.user(), Some(&TestUser::new(2)));

        auth.unuse("local").unuse("never-registered");
        assert!(auth.strategy("local").is_none());
    }

    #[tokio::test]
    async fn test_codec_registration_and_execution() {
        let auth: Authenticator<TestUser> = Authenticator::new();
        assert_eq!(
            auth.add_serializer(Serializer::plain(|user: TestUser| async move { Ok(Step::Done(json!(user.id))) })),
            1
        );
        assert_eq!(
            auth.add_deserializer(Deserializer::plain(|token: Token| async move {
                Ok(Step::Done(token.as_u64().map(TestUser::new)))
            })),
            1
        );

        let head = RequestHead::default();
        let token = auth.serialize_identity(&head, &TestUser::new(4)).await.unwrap();
        assert_eq!(token, json!(4));
        assert_eq!(auth.deserialize_identity(&head, token).await.unwrap(), Some(TestUser::new(4)));
        assert_eq!(auth.transform_auth_info(&head, json!({ "a": 1 })).await.unwrap(), json!({ "a": 1 }));
    }

    #[test]
    fn test_custom_settings() {
        let config = AuthConfig {
            session_key: "auth".into(),
            user_property: "currentUser".into(),
            pause_stream: true,
            ..Default::default()
        };
        let auth: Authenticator<TestUser> = Authenticator::from_config(&config);

        assert_eq!(auth.session_manager().key(), "auth");
        assert!(auth.session_options().pause_stream);
        let req = auth.request(RequestHead::default(), None);
        assert_eq!(req.user_property(), "currentUser");
    }
}
