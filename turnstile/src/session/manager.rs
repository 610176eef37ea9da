//! Establishing and tearing down login state in the session.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::IDENTITY_FIELD;
use crate::codec::IdentityCodec;
use crate::error::{AuthError, Result};
use crate::options::{LoginOptions, LogoutOptions};
use crate::request::AuthRequest;
use crate::Identity;

/// Writes the serialized identity to `session[key].user` on login and
/// removes it on logout, rotating the session id both times.
pub struct SessionManager<U> {
    key: String,
    codec: Arc<IdentityCodec<U>>,
}

impl<U: Identity> SessionManager<U> {
    pub fn new(key: impl Into<String>, codec: Arc<IdentityCodec<U>>) -> Self {
        Self { key: key.into(), codec }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Regenerate the session, serialize `identity`, store it and save.
    ///
    /// Regeneration comes first so the login is never written under an id
    /// that existed before authentication.
    #[instrument(skip_all, fields(key = %self.key))]
    pub async fn log_in(&self, req: &mut AuthRequest<U>, identity: &U, options: &LoginOptions) -> Result<()> {
        let head = req.head().clone();
        let session = req.session_mut().ok_or(AuthError::MissingSession)?;
        let previous = session.data().clone();

        session.regenerate().await?;

        let token = self.codec.serialize(&head, identity).await?;
        if options.keep_session_info {
            session.merge(previous);
        }

        let slot = session
            .data_mut()
            .entry(self.key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(slot) = slot {
            slot.insert(IDENTITY_FIELD.to_string(), token);
        }

        session.save().await?;
        debug!(session_id = %session.id(), "Login session established");
        Ok(())
    }

    /// Clear the identity, save, then regenerate.
    ///
    /// Saving before rotating means a request still holding the old id sees a
    /// logged-out session.
    #[instrument(skip_all, fields(key = %self.key))]
    pub async fn log_out(&self, req: &mut AuthRequest<U>, options: &LogoutOptions) -> Result<()> {
        let session = req.session_mut().ok_or(AuthError::MissingSession)?;

        if let Some(Value::Object(slot)) = session.get_mut(&self.key) {
            slot.remove(IDENTITY_FIELD);
        }
        let previous = session.data().clone();

        session.save().await?;
        session.regenerate().await?;

        if options.keep_session_info {
            session.merge(previous);
        }
        debug!(session_id = %session.id(), "Login session terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Serializer, Step};
    use crate::request::{AuthRequest, RequestHead};
    use crate::session::Session;
    use crate::test_utils::{RecordingStore, StoreCall, TestUser};
    use serde_json::json;

    fn manager() -> SessionManager<TestUser> {
        let codec = Arc::new(IdentityCodec::new());
        codec.add_serializer(Serializer::plain(|user: TestUser| async move { Ok(Step::Done(json!(user.id))) }));
        SessionManager::new("passport", codec)
    }

    async fn request_with(store: &Arc<RecordingStore>, data: Value) -> AuthRequest<TestUser> {
        let session = store.seed(data).await;
        AuthRequest::new(RequestHead::default(), Some(session))
    }

    #[tokio::test]
    async fn test_log_in_regenerates_before_writing_identity() {
        let store = Arc::new(RecordingStore::new());
        let mut req = request_with(&store, json!({ "cart": [1] })).await;
        let old_id = req.session().unwrap().id().to_string();

        manager().log_in(&mut req, &TestUser::new(42), &LoginOptions::default()).await.unwrap();

        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], StoreCall::Regenerate { id } if *id == old_id));
        match &calls[1] {
            StoreCall::Save { id, data } => {
                assert_eq!(id, req.session().unwrap().id());
                assert_eq!(data.get("passport"), Some(&json!({ "user": 42 })));
                // previous fields are dropped without keep_session_info
                assert_eq!(data.get("cart"), None);
            }
            other => panic!("expected save, got {other:?}"),
        }
        assert_ne!(req.session().unwrap().id(), old_id);
    }

    #[tokio::test]
    async fn test_log_in_keep_session_info_merges_previous_fields() {
        let store = Arc::new(RecordingStore::new());
        let mut req = request_with(&store, json!({ "cart": [1], "passport": { "user": 7 } })).await;
        let old_id = req.session().unwrap().id().to_string();

        let options = LoginOptions {
            keep_session_info: true,
            ..Default::default()
        };
        manager().log_in(&mut req, &TestUser::new(42), &options).await.unwrap();

        let session = req.session().unwrap();
        assert_ne!(session.id(), old_id);
        assert_eq!(session.get("cart"), Some(&json!([1])));
        assert_eq!(session.get("passport"), Some(&json!({ "user": 42 })));
    }

    #[tokio::test]
    async fn test_log_out_saves_cleared_state_before_regenerating() {
        let store = Arc::new(RecordingStore::new());
        let mut req = request_with(&store, json!({ "cart": [1], "passport": { "user": 42 } })).await;
        let old_id = req.session().unwrap().id().to_string();

        manager().log_out(&mut req, &LogoutOptions::default()).await.unwrap();

        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        match &calls[0] {
            StoreCall::Save { id, data } => {
                assert_eq!(*id, old_id);
                assert_eq!(data.get("passport"), Some(&json!({})));
            }
            other => panic!("expected save, got {other:?}"),
        }
        assert!(matches!(&calls[1], StoreCall::Regenerate { id } if *id == old_id));

        let session = req.session().unwrap();
        assert_ne!(session.id(), old_id);
        assert!(session.data().is_empty());
    }

    #[tokio::test]
    async fn test_log_out_keep_session_info() {
        let store = Arc::new(RecordingStore::new());
        let mut req = request_with(&store, json!({ "cart": [1], "passport": { "user": 42 } })).await;

        let options = LogoutOptions { keep_session_info: true };
        manager().log_out(&mut req, &options).await.unwrap();

        let session = req.session().unwrap();
        assert_eq!(session.get("cart"), Some(&json!([1])));
        assert_eq!(session.get("passport"), Some(&json!({})));
    }

    #[tokio::test]
    async fn test_missing_session_is_a_configuration_error() {
        let mut req: AuthRequest<TestUser> = AuthRequest::new(RequestHead::default(), None);

        let login = manager().log_in(&mut req, &TestUser::new(1), &LoginOptions::default()).await;
        let logout = manager().log_out(&mut req, &LogoutOptions::default()).await;

        for err in [login.unwrap_err(), logout.unwrap_err()] {
            assert_eq!(
                err.to_string(),
                "Login sessions require session support. Did you forget to install the session middleware?"
            );
        }
    }

    #[tokio::test]
    async fn test_store_failure_short_circuits_login() {
        let store = Arc::new(RecordingStore::new());
        let mut req = request_with(&store, json!({})).await;
        store.fail_next_regenerate();

        let err = manager()
            .log_in(&mut req, &TestUser::new(1), &LoginOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Store(_)));
        // nothing was serialized or saved
        assert!(store.calls().iter().all(|call| !matches!(call, StoreCall::Save { .. })));
    }

    #[tokio::test]
    async fn test_serializer_failure_surfaces_without_saving() {
        let store = Arc::new(RecordingStore::new());
        let session: Session = store.seed(json!({})).await;
        let mut req: AuthRequest<TestUser> = AuthRequest::new(RequestHead::default(), Some(session));
        let manager = SessionManager::new("passport", Arc::new(IdentityCodec::new()));

        let err = manager
            .log_in(&mut req, &TestUser::new(1), &LoginOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::SerializeFailed));
        assert_eq!(store.calls().len(), 1);
    }
}
