//! In-memory session store.
//!
//! Sessions live in a shared HashMap and are lost on restart. Suitable for
//! testing and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{SessionData, SessionStore, StoreError};

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionData>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn new_id() -> String {
        Uuid::new_v4().simple().to_string()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self) -> Result<String, StoreError> {
        let id = Self::new_id();
        self.sessions.write().insert(id.clone(), SessionData::new());
        Ok(id)
    }

    async fn load(&self, id: &str) -> Result<Option<SessionData>, StoreError> {
        Ok(self.sessions.read().get(id).cloned())
    }

    async fn save(&self, id: &str, data: &SessionData) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(id) {
            Some(stored) => {
                *stored = data.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn regenerate(&self, id: &str) -> Result<String, StoreError> {
        let new_id = Self::new_id();
        let mut sessions = self.sessions.write();
        sessions.remove(id);
        sessions.insert(new_id.clone(), SessionData::new());
        Ok(new_id)
    }

    async fn destroy(&self, id: &str) -> Result<(), StoreError> {
        self.sessions.write().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemorySessionStore::new();
        let id = store.create().await.unwrap();

        let mut data = SessionData::new();
        data.insert("passport".into(), json!({ "user": 7 }));
        store.save(&id, &data).await.unwrap();

        assert_eq!(store.load(&id).await.unwrap(), Some(data));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_save_unknown_id_fails() {
        let store = InMemorySessionStore::new();
        let result = store.save("missing", &SessionData::new()).await;
        assert!(matches!(result, Err(StoreError::NotFound(id)) if id == "missing"));
    }

    #[tokio::test]
    async fn test_regenerate_destroys_old_session() {
        let store = InMemorySessionStore::new();
        let id = store.create().await.unwrap();

        let new_id = store.regenerate(&id).await.unwrap();

        assert_ne!(id, new_id);
        assert_eq!(store.load(&id).await.unwrap(), None);
        assert_eq!(store.load(&new_id).await.unwrap(), Some(SessionData::new()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let store = InMemorySessionStore::new();
        let id = store.create().await.unwrap();

        store.destroy(&id).await.unwrap();
        store.destroy(&id).await.unwrap();

        assert!(store.is_empty());
    }
}
