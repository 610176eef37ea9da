use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, Method, Uri},
    middleware::from_fn_with_state,
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Extension, Json, Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use turnstile::{
    config::Args,
    http::{self, AuthGate, CurrentIdentity, Identities, SessionSlot, SessionSupport},
    telemetry, AuthError, AuthenticateOptions, Authenticator, Config, Deserializer, InMemorySessionStore, LogoutOptions,
    ProxyHeaderStrategy, RequestHead, Serializer, Step, Token,
};

/// The principal named by the upstream proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DemoUser {
    name: String,
}

type Auth = Arc<Authenticator<DemoUser>>;

fn build_authenticator(config: &Config) -> anyhow::Result<Auth> {
    let auth = Authenticator::from_config(&config.auth);

    auth.add_serializer(Serializer::plain(|user: DemoUser| async move { Ok(Step::Done(json!(user.name))) }));
    auth.add_deserializer(Deserializer::plain(|token: Token| async move {
        Ok(match token.as_str() {
            Some(name) => Step::Done(Some(DemoUser { name: name.to_string() })),
            None => Step::Pass,
        })
    }));

    if config.auth.proxy_header.enabled {
        auth.use_strategy(Arc::new(ProxyHeaderStrategy::new(
            &config.auth.proxy_header.header_name,
            |principal: String, _head: RequestHead| async move {
                let principal = principal.trim().to_string();
                Ok((!principal.is_empty()).then_some(DemoUser { name: principal }))
            },
        )))?;
    }

    Ok(Arc::new(auth))
}

async fn whoami(Extension(identities): Extension<Identities<DemoUser>>) -> impl IntoResponse {
    Json(json!({
        "authenticated": identities.is_authenticated(),
        "user": identities.user(),
    }))
}

async fn me(CurrentIdentity(user): CurrentIdentity<DemoUser>) -> Json<DemoUser> {
    Json(user)
}

async fn logout(
    State(auth): State<Auth>,
    Extension(slot): Extension<SessionSlot>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Redirect, AuthError> {
    http::log_out(&auth, &slot, RequestHead::new(method, uri, headers), &LogoutOptions::default()).await?;
    Ok(Redirect::to("/"))
}

fn build_router(config: &Config, auth: Auth) -> Router {
    let sessions = SessionSupport::new(Arc::new(InMemorySessionStore::new()), &config.auth.session_cookie);

    let mut router = Router::new()
        .route("/", get(whoami))
        .route("/me", get(me))
        .route("/logout", post(logout));

    if config.auth.proxy_header.enabled {
        let login = AuthGate::new(
            auth.clone(),
            "proxy-header",
            AuthenticateOptions {
                success_redirect: Some("/".to_string()),
                ..Default::default()
            },
        );
        router = router.route(
            "/login",
            post(|| async { Redirect::to("/") }).route_layer(from_fn_with_state(login, http::authenticate::<DemoUser>)),
        );
    }

    router.with_state(auth.clone()).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(from_fn_with_state(sessions, http::session_middleware))
            .layer(from_fn_with_state(AuthGate::session(auth), http::authenticate::<DemoUser>)),
    )
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry()?;
    tracing::debug!("{:?}", args);

    let auth = build_authenticator(&config)?;
    let app = build_router(&config, auth);

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}
