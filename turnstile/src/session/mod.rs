//! Session contract and login-state management.
//!
//! The session store is an external collaborator: this module only defines the
//! contract it must satisfy ([`SessionStore`]) and the [`Session`] value the
//! rest of the crate reads and writes. [`in_memory::InMemorySessionStore`] is a
//! reference implementation suitable for tests and single-process deployments.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub mod in_memory;
pub mod manager;

pub use manager::SessionManager;

/// Session contents: a JSON object keyed by top-level field.
pub type SessionData = Map<String, Value>;

/// Field under `session[key]` that holds the serialized identity.
pub const IDENTITY_FIELD: &str = "user";

/// Field holding the list appended to by `success_message`/`failure_message`.
pub const MESSAGES_FIELD: &str = "messages";

/// Field holding the URL consumed by `success_return_to_or_redirect`.
pub const RETURN_TO_FIELD: &str = "returnTo";

/// Errors raised by a session store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The session id no longer exists in the store
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Backend failure (network, serialization, ...)
    #[error("Session store error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Storage backend for sessions.
///
/// Every operation is asynchronous and fallible. Implementations own their
/// consistency: a `regenerate` racing another request on the same id is the
/// store's problem, not the caller's.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Register a new, empty session and return its id.
    async fn create(&self) -> Result<String, StoreError>;

    /// Load a session's data, or `None` if the id is unknown.
    async fn load(&self, id: &str) -> Result<Option<SessionData>, StoreError>;

    /// Persist `data` under `id`.
    async fn save(&self, id: &str, data: &SessionData) -> Result<(), StoreError>;

    /// Destroy `id` and issue a fresh, empty session in its place.
    ///
    /// Returns the new session id.
    async fn regenerate(&self, id: &str) -> Result<String, StoreError>;

    /// Remove `id`. Unknown ids are not an error.
    async fn destroy(&self, id: &str) -> Result<(), StoreError>;
}

/// A loaded session bound to the store it came from.
pub struct Session {
    id: String,
    data: SessionData,
    store: Arc<dyn SessionStore>,
    fresh: bool,
}

impl Session {
    pub fn new(id: impl Into<String>, data: SessionData, store: Arc<dyn SessionStore>) -> Self {
        Self {
            id: id.into(),
            data,
            store,
            fresh: false,
        }
    }

    /// Load the session named `id`, creating a fresh one when it is absent or unknown.
    pub async fn load_or_create(store: Arc<dyn SessionStore>, id: Option<&str>) -> Result<Self, StoreError> {
        if let Some(id) = id {
            if let Some(data) = store.load(id).await? {
                return Ok(Self::new(id, data, store));
            }
            tracing::debug!(session_id = %id, "Unknown session id, issuing a new session");
        }
        let id = store.create().await?;
        Ok(Self {
            fresh: true,
            ..Self::new(id, SessionData::new(), store)
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this session was issued for the current request rather than loaded.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut SessionData {
        &mut self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.data.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Copy every field of `previous` into this session, overwriting clashes.
    pub fn merge(&mut self, previous: SessionData) {
        self.data.extend(previous);
    }

    /// Append `message` to `session.messages`, creating the list if needed.
    pub fn push_message(&mut self, message: impl Into<String>) {
        let slot = self
            .data
            .entry(MESSAGES_FIELD.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        if let Value::Array(messages) = slot {
            messages.push(Value::String(message.into()));
        }
    }

    pub async fn save(&self) -> Result<(), StoreError> {
        self.store.save(&self.id, &self.data).await
    }

    /// Remove this session from the store.
    pub async fn destroy(&self) -> Result<(), StoreError> {
        self.store.destroy(&self.id).await
    }

    /// Rotate the session id. The new session starts out empty.
    pub async fn regenerate(&mut self) -> Result<(), StoreError> {
        let id = self.store.regenerate(&self.id).await?;
        tracing::debug!(old_session_id = %self.id, new_session_id = %id, "Session regenerated");
        self.id = id;
        self.data = SessionData::new();
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("fresh", &self.fresh)
            .finish()
    }
}
