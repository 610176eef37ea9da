//! Trusted-proxy header strategy.
//!
//! An upstream proxy that has already authenticated the client names the
//! principal in a header (`x-forwarded-user` by default). The strategy looks
//! the principal up and succeeds with the resolved identity.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use futures::future::{BoxFuture, FutureExt};
use serde_json::json;
use tracing::{instrument, trace};

use super::{Actions, Decision, Strategy};
use crate::error::Result;
use crate::options::AuthenticateOptions;
use crate::request::{AuthRequest, RequestHead};
use crate::Identity;

pub const PROXY_HEADER_STRATEGY: &str = "proxy-header";
pub const DEFAULT_HEADER_NAME: &str = "x-forwarded-user";

type LookupFn<U> = dyn Fn(String, RequestHead) -> BoxFuture<'static, Result<Option<U>>> + Send + Sync;

pub struct ProxyHeaderStrategy<U> {
    header_name: String,
    lookup: Arc<LookupFn<U>>,
}

impl<U: Identity> ProxyHeaderStrategy<U> {
    /// `lookup` receives the header value; `Ok(None)` means the principal is unknown.
    pub fn new<F, Fut>(header_name: impl Into<String>, lookup: F) -> Self
    where
        F: Fn(String, RequestHead) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<U>>> + Send + 'static,
    {
        Self {
            header_name: header_name.into(),
            lookup: Arc::new(move |principal: String, head: RequestHead| -> BoxFuture<'static, Result<Option<U>>> {
                lookup(principal, head).boxed()
            }),
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }
}

#[async_trait]
impl<U: Identity> Strategy<U> for ProxyHeaderStrategy<U> {
    fn name(&self) -> Option<&str> {
        Some(PROXY_HEADER_STRATEGY)
    }

    #[instrument(skip_all, fields(header = %self.header_name))]
    async fn authenticate(&self, req: &mut AuthRequest<U>, _options: &AuthenticateOptions, actions: Actions<U>) -> Decision<U> {
        let Some(principal) = req.head().header(&self.header_name).map(str::to_string) else {
            trace!("No proxy header present");
            return actions.fail(None, None);
        };

        match (self.lookup)(principal.clone(), req.head().clone()).await {
            Ok(Some(identity)) => {
                let info = json!({ "source": PROXY_HEADER_STRATEGY, "principal": principal });
                actions.success(identity, Some(info))
            }
            Ok(None) => {
                trace!(%principal, "Proxy header names an unknown principal");
                actions.fail(None, Some(StatusCode::UNAUTHORIZED))
            }
            Err(e) => actions.error(e),
        }
    }
}
