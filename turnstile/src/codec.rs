//! Identity codec: serializer, deserializer and info-transformer chains.
//!
//! Each chain is an ordered list of links tried in registration order. A link
//! either produces a value ([`Step::Done`]), declines ([`Step::Pass`]) or
//! fails (`Err`). The first `Done` or `Err` ends the chain.
//!
//! Links come in explicit shapes instead of being told apart by how many
//! arguments they take:
//!
//! - [`Link::Plain`] receives only the value
//! - [`Link::WithRequest`] also receives the current [`RequestHead`]
//! - [`InfoTransformer::Sync`] is a synchronous info-only transform

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{instrument, trace};

use crate::error::{AuthError, Result};
use crate::options::Info;
use crate::request::RequestHead;
use crate::Identity;

/// Session-storable form of an identity.
pub type Token = Value;

/// Outcome of a single chain link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// Produced a value, ending the chain
    Done(T),
    /// Declined, try the next link
    Pass,
}

type PlainFn<I, O> = dyn Fn(I) -> BoxFuture<'static, Result<Step<O>>> + Send + Sync;
type RequestFn<I, O> = dyn Fn(RequestHead, I) -> BoxFuture<'static, Result<Step<O>>> + Send + Sync;

/// One link of a codec chain.
pub enum Link<I, O> {
    Plain(Arc<PlainFn<I, O>>),
    WithRequest(Arc<RequestFn<I, O>>),
}

impl<I, O> Clone for Link<I, O> {
    fn clone(&self) -> Self {
        match self {
            Link::Plain(f) => Link::Plain(f.clone()),
            Link::WithRequest(f) => Link::WithRequest(f.clone()),
        }
    }
}

impl<I: Send + 'static, O: Send + 'static> Link<I, O> {
    pub fn plain<F, Fut>(f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Step<O>>> + Send + 'static,
    {
        Link::Plain(Arc::new(move |input: I| -> BoxFuture<'static, Result<Step<O>>> { f(input).boxed() }))
    }

    pub fn with_request<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestHead, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Step<O>>> + Send + 'static,
    {
        Link::WithRequest(Arc::new(
            move |head: RequestHead, input: I| -> BoxFuture<'static, Result<Step<O>>> { f(head, input).boxed() },
        ))
    }

    async fn call(&self, head: &RequestHead, input: I) -> Result<Step<O>> {
        match self {
            Link::Plain(f) => f(input).await,
            Link::WithRequest(f) => f(head.clone(), input).await,
        }
    }
}

/// Converts an identity into a [`Token`].
pub type Serializer<U> = Link<U, Token>;

/// Converts a [`Token`] back into an identity.
///
/// `Done(None)` means the token was valid once but its identity is gone.
pub type Deserializer<U> = Link<Token, Option<U>>;

type SyncTransformFn = dyn Fn(&Info) -> Option<Info> + Send + Sync;

/// One link of the info-transformer chain.
#[derive(Clone)]
pub enum InfoTransformer {
    /// Synchronous transform; `None` passes to the next link
    Sync(Arc<SyncTransformFn>),
    Async(Link<Info, Info>),
}

impl InfoTransformer {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Info) -> Option<Info> + Send + Sync + 'static,
    {
        InfoTransformer::Sync(Arc::new(f))
    }

    pub fn plain<F, Fut>(f: F) -> Self
    where
        F: Fn(Info) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Step<Info>>> + Send + 'static,
    {
        InfoTransformer::Async(Link::plain(f))
    }

    pub fn with_request<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestHead, Info) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Step<Info>>> + Send + 'static,
    {
        InfoTransformer::Async(Link::with_request(f))
    }

    async fn call(&self, head: &RequestHead, info: Info) -> Result<Step<Info>> {
        match self {
            InfoTransformer::Sync(f) => Ok(f(&info).map_or(Step::Pass, Step::Done)),
            InfoTransformer::Async(link) => link.call(head, info).await,
        }
    }
}

/// The three chains, shared between the authenticator, the session manager
/// and the session strategy.
///
/// Chains are appended to during setup; a dispatch works on a snapshot so no
/// lock is held across an await.
pub struct IdentityCodec<U> {
    serializers: RwLock<Vec<Serializer<U>>>,
    deserializers: RwLock<Vec<Deserializer<U>>>,
    info_transformers: RwLock<Vec<InfoTransformer>>,
}

impl<U> Default for IdentityCodec<U> {
    fn default() -> Self {
        Self {
            serializers: RwLock::new(Vec::new()),
            deserializers: RwLock::new(Vec::new()),
            info_transformers: RwLock::new(Vec::new()),
        }
    }
}

impl<U: Identity> IdentityCodec<U> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a serializer, returning the new chain length.
    pub fn add_serializer(&self, link: Serializer<U>) -> usize {
        let mut chain = self.serializers.write();
        chain.push(link);
        chain.len()
    }

    /// Append a deserializer, returning the new chain length.
    pub fn add_deserializer(&self, link: Deserializer<U>) -> usize {
        let mut chain = self.deserializers.write();
        chain.push(link);
        chain.len()
    }

    /// Append an info transformer, returning the new chain length.
    pub fn add_info_transformer(&self, transformer: InfoTransformer) -> usize {
        let mut chain = self.info_transformers.write();
        chain.push(transformer);
        chain.len()
    }

    #[instrument(skip_all)]
    pub async fn serialize(&self, head: &RequestHead, identity: &U) -> Result<Token> {
        let chain = self.serializers.read().clone();
        for (index, link) in chain.iter().enumerate() {
            match link.call(head, identity.clone()).await? {
                Step::Done(token) => return Ok(token),
                Step::Pass => trace!(index, "Serializer passed"),
            }
        }
        Err(AuthError::SerializeFailed)
    }

    /// Resolve a token to its identity.
    ///
    /// `Ok(None)` is the valid "identity no longer exists" outcome and is
    /// distinct from every link passing, which is an error.
    #[instrument(skip_all)]
    pub async fn deserialize(&self, head: &RequestHead, token: Token) -> Result<Option<U>> {
        let chain = self.deserializers.read().clone();
        for (index, link) in chain.iter().enumerate() {
            match link.call(head, token.clone()).await? {
                Step::Done(identity) => return Ok(identity),
                Step::Pass => trace!(index, "Deserializer passed"),
            }
        }
        Err(AuthError::DeserializeFailed)
    }

    /// Run the info transformers; with no taker the original info comes back unchanged.
    #[instrument(skip_all)]
    pub async fn transform(&self, head: &RequestHead, info: Info) -> Result<Info> {
        let chain = self.info_transformers.read().clone();
        for (index, transformer) in chain.iter().enumerate() {
            match transformer.call(head, info.clone()).await? {
                Step::Done(transformed) => return Ok(transformed),
                Step::Pass => trace!(index, "Info transformer passed"),
            }
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestUser;
    use parking_lot::Mutex;
    use rstest::rstest;
    use serde_json::json;

    fn recording_serializer(calls: Arc<Mutex<Vec<usize>>>, index: usize, step: Step<Token>) -> Serializer<TestUser> {
        Serializer::plain(move |_user: TestUser| {
            calls.lock().push(index);
            let step = step.clone();
            async move { Ok(step) }
        })
    }

    #[rstest]
    #[case(vec![Step::Done(json!("a")), Step::Done(json!("b"))], vec![0], json!("a"))]
    #[case(vec![Step::Pass, Step::Done(json!("b")), Step::Done(json!("c"))], vec![0, 1], json!("b"))]
    #[case(vec![Step::Pass, Step::Pass, Step::Done(json!(0))], vec![0, 1, 2], json!(0))]
    #[tokio::test]
    async fn test_serializers_run_in_registration_order(
        #[case] steps: Vec<Step<Token>>,
        #[case] expected_calls: Vec<usize>,
        #[case] expected: Token,
    ) {
        let codec = IdentityCodec::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        for (index, step) in steps.into_iter().enumerate() {
            codec.add_serializer(recording_serializer(calls.clone(), index, step));
        }

        let token = codec.serialize(&RequestHead::default(), &TestUser::new(1)).await.unwrap();

        assert_eq!(token, expected);
        assert_eq!(*calls.lock(), expected_calls);
    }

    #[tokio::test]
    async fn test_serializer_error_stops_chain() {
        let codec = IdentityCodec::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        codec.add_serializer(Serializer::plain(|_user: TestUser| async { Err(AuthError::strategy("db down")) }));
        codec.add_serializer(recording_serializer(calls.clone(), 1, Step::Done(json!(1))));

        let err = codec.serialize(&RequestHead::default(), &TestUser::new(1)).await.unwrap_err();

        assert!(matches!(err, AuthError::Strategy { message } if message == "db down"));
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_serializer_exhaustion_is_an_error() {
        let codec: IdentityCodec<TestUser> = IdentityCodec::new();
        let err = codec.serialize(&RequestHead::default(), &TestUser::new(1)).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to serialize user into session");

        codec.add_serializer(Serializer::plain(|_user: TestUser| async { Ok(Step::Pass) }));
        let err = codec.serialize(&RequestHead::default(), &TestUser::new(1)).await.unwrap_err();
        assert!(matches!(err, AuthError::SerializeFailed));
    }

    #[test]
    fn test_registration_returns_chain_length() {
        let codec: IdentityCodec<TestUser> = IdentityCodec::new();
        assert_eq!(codec.add_serializer(Serializer::plain(|_user: TestUser| async { Ok(Step::Pass) })), 1);
        assert_eq!(codec.add_serializer(Serializer::plain(|_user: TestUser| async { Ok(Step::Pass) })), 2);
        assert_eq!(codec.add_info_transformer(InfoTransformer::sync(|_info| None)), 1);
    }

    #[tokio::test]
    async fn test_request_aware_serializer_sees_head() {
        let codec = IdentityCodec::new();
        codec.add_serializer(Serializer::with_request(|head: RequestHead, user: TestUser| async move {
            Ok(Step::Done(json!(format!("{}:{}", head.uri.path(), user.id))))
        }));

        let head = RequestHead {
            uri: "/login".parse().unwrap(),
            ..Default::default()
        };
        let token = codec.serialize(&head, &TestUser::new(9)).await.unwrap();

        assert_eq!(token, json!("/login:9"));
    }

    #[tokio::test]
    async fn test_deserialize_revoked_identity_is_not_an_error() {
        let codec: IdentityCodec<TestUser> = IdentityCodec::new();
        codec.add_deserializer(Deserializer::plain(|_token: Token| async { Ok(Step::Done(None)) }));
        codec.add_deserializer(Deserializer::plain(|_token: Token| async { Ok(Step::Done(Some(TestUser::new(1)))) }));

        let identity = codec.deserialize(&RequestHead::default(), json!(1)).await.unwrap();

        assert_eq!(identity, None);
    }

    #[tokio::test]
    async fn test_deserialize_passes_then_resolves() {
        let codec: IdentityCodec<TestUser> = IdentityCodec::new();
        codec.add_deserializer(Deserializer::plain(|_token: Token| async { Ok(Step::Pass) }));
        codec.add_deserializer(Deserializer::plain(|token: Token| async move {
            Ok(Step::Done(token.as_u64().map(TestUser::new)))
        }));

        let identity = codec.deserialize(&RequestHead::default(), json!(5)).await.unwrap();

        assert_eq!(identity, Some(TestUser::new(5)));
    }

    #[tokio::test]
    async fn test_deserialize_exhaustion_is_an_error() {
        let codec: IdentityCodec<TestUser> = IdentityCodec::new();
        codec.add_deserializer(Deserializer::plain(|_token: Token| async { Ok(Step::Pass) }));

        let err = codec.deserialize(&RequestHead::default(), json!(1)).await.unwrap_err();

        assert_eq!(err.to_string(), "Failed to deserialize user out of session");
    }

    #[tokio::test]
    async fn test_empty_transformer_chain_returns_original_info() {
        let codec: IdentityCodec<TestUser> = IdentityCodec::new();
        let info = json!({ "scope": "read", "clientID": "abc" });

        let transformed = codec.transform(&RequestHead::default(), info.clone()).await.unwrap();

        assert_eq!(transformed, info);
    }

    #[tokio::test]
    async fn test_all_transformers_passing_returns_original_info() {
        let codec: IdentityCodec<TestUser> = IdentityCodec::new();
        codec.add_info_transformer(InfoTransformer::sync(|_info| None));
        codec.add_info_transformer(InfoTransformer::plain(|_info| async { Ok(Step::Pass) }));

        let info = json!({ "scope": "read" });
        let transformed = codec.transform(&RequestHead::default(), info.clone()).await.unwrap();

        assert_eq!(transformed, info);
    }

    #[tokio::test]
    async fn test_sync_transformer_result_used_directly() {
        let codec: IdentityCodec<TestUser> = IdentityCodec::new();
        codec.add_info_transformer(InfoTransformer::sync(|info| {
            let mut info = info.clone();
            info["client"] = json!({ "name": "Example" });
            Some(info)
        }));
        codec.add_info_transformer(InfoTransformer::plain(|_info| async { Ok(Step::Done(json!("unreached"))) }));

        let transformed = codec
            .transform(&RequestHead::default(), json!({ "clientID": "abc" }))
            .await
            .unwrap();

        assert_eq!(transformed, json!({ "clientID": "abc", "client": { "name": "Example" } }));
    }

    #[tokio::test]
    async fn test_request_aware_transformer() {
        let codec: IdentityCodec<TestUser> = IdentityCodec::new();
        codec.add_info_transformer(InfoTransformer::with_request(|head: RequestHead, _info| async move {
            Ok(Step::Done(json!({ "method": head.method.as_str() })))
        }));

        let transformed = codec.transform(&RequestHead::default(), json!({})).await.unwrap();

        assert_eq!(transformed, json!({ "method": "GET" }));
    }
}
