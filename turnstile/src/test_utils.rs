//! Test utilities shared by the unit test modules.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use axum::http::StatusCode;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::options::{AuthenticateOptions, Challenge, Info};
use crate::request::{AuthRequest, FlashStore};
use crate::session::in_memory::InMemorySessionStore;
use crate::session::{Session, SessionData, SessionStore, StoreError};
use crate::strategy::{Actions, Decision, Strategy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestUser {
    pub id: u64,
}

impl TestUser {
    pub fn new(id: u64) -> Self {
        Self { id }
    }
}

fn as_object(value: Value) -> SessionData {
    match value {
        Value::Object(map) => map,
        other => panic!("session data must be an object, got {other}"),
    }
}

/// A saved session in a fresh in-memory store.
pub async fn session_with(data: Value) -> (Session, Arc<InMemorySessionStore>) {
    let store = Arc::new(InMemorySessionStore::new());
    let id = store.create().await.unwrap();
    let data = as_object(data);
    store.save(&id, &data).await.unwrap();
    (Session::new(id, data, store.clone()), store)
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Save { id: String, data: SessionData },
    Regenerate { id: String },
}

/// In-memory store that records save/regenerate calls in order.
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemorySessionStore,
    calls: Mutex<Vec<StoreCall>>,
    fail_regenerate: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session holding `data` without recording the setup calls.
    pub async fn seed(self: &Arc<Self>, data: Value) -> Session {
        let id = self.inner.create().await.unwrap();
        let data = as_object(data);
        self.inner.save(&id, &data).await.unwrap();
        Session::new(id, data, self.clone())
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    pub fn fail_next_regenerate(&self) {
        self.fail_regenerate.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for RecordingStore {
    async fn create(&self) -> Result<String, StoreError> {
        self.inner.create().await
    }

    async fn load(&self, id: &str) -> Result<Option<SessionData>, StoreError> {
        self.inner.load(id).await
    }

    async fn save(&self, id: &str, data: &SessionData) -> Result<(), StoreError> {
        self.calls.lock().push(StoreCall::Save {
            id: id.to_string(),
            data: data.clone(),
        });
        self.inner.save(id, data).await
    }

    async fn regenerate(&self, id: &str) -> Result<String, StoreError> {
        self.calls.lock().push(StoreCall::Regenerate { id: id.to_string() });
        if self.fail_regenerate.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow!("regenerate refused")));
        }
        self.inner.regenerate(id).await
    }

    async fn destroy(&self, id: &str) -> Result<(), StoreError> {
        self.inner.destroy(id).await
    }
}

/// Flash store that keeps every `(type, message)` pair.
#[derive(Default)]
pub struct RecordingFlash {
    entries: Mutex<Vec<(String, String)>>,
}

impl RecordingFlash {
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().clone()
    }
}

impl FlashStore for RecordingFlash {
    fn flash(&self, kind: &str, message: &str) {
        self.entries.lock().push((kind.to_string(), message.to_string()));
    }
}

/// What a [`ScriptedStrategy`] does when invoked.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed(TestUser, Option<Info>),
    Fail(Option<Challenge>, Option<StatusCode>),
    Redirect(String, Option<StatusCode>),
    Pass,
    Error(String),
}

/// Strategy that performs a fixed action and counts its invocations.
pub struct ScriptedStrategy {
    name: Option<String>,
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedStrategy {
    pub fn new(script: Script) -> Self {
        Self {
            name: None,
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn named(name: &str, script: Script) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::new(script)
        }
    }

    pub fn succeed(id: u64) -> Self {
        Self::new(Script::Succeed(TestUser::new(id), None))
    }

    pub fn fail(challenge: Option<&str>, status: Option<StatusCode>) -> Self {
        Self::new(Script::Fail(challenge.map(Challenge::from), status))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Strategy<TestUser> for ScriptedStrategy {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn authenticate(
        &self,
        _req: &mut AuthRequest<TestUser>,
        _options: &AuthenticateOptions,
        actions: Actions<TestUser>,
    ) -> Decision<TestUser> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.clone() {
            Script::Succeed(user, info) => actions.success(user, info),
            Script::Fail(challenge, status) => actions.fail(challenge, status),
            Script::Redirect(url, status) => actions.redirect(url, status),
            Script::Pass => actions.pass(),
            Script::Error(message) => actions.error(crate::error::AuthError::strategy(message)),
        }
    }
}
