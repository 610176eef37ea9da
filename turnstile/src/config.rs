//! Configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The file path
//! defaults to `config.yaml` and can be set with the `-f` flag or the `TURNSTILE_CONFIG`
//! environment variable.
//!
//! Sources are merged in order, later ones overriding earlier ones:
//!
//! 1. **YAML config file** (default: `config.yaml`)
//! 2. **Environment variables** prefixed with `TURNSTILE_`
//!
//! Nested values use double underscores, e.g. `TURNSTILE_AUTH__SESSION_KEY=auth` sets
//! `auth.session_key`.
//!
//! ```bash
//! TURNSTILE_PORT=8080
//! TURNSTILE_AUTH__PROXY_HEADER__ENABLED=false
//! TURNSTILE_AUTH__PROXY_HEADER__HEADER_NAME=x-auth-request-user
//! ```

use anyhow::bail;
use clap::Parser;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::authenticator::DEFAULT_SESSION_KEY;
use crate::request::DEFAULT_USER_PROPERTY;
use crate::strategy::proxy_header::DEFAULT_HEADER_NAME;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "TURNSTILE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Top-level session field holding login state
    pub session_key: String,
    /// Request property the logged-in identity is exposed as
    pub user_property: String,
    /// Hold the request body while the session strategy deserializes
    pub pause_stream: bool,
    /// Name of the cookie carrying the session id
    pub session_cookie: String,
    pub proxy_header: ProxyHeaderConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_key: DEFAULT_SESSION_KEY.to_string(),
            user_property: DEFAULT_USER_PROPERTY.to_string(),
            pause_stream: false,
            session_cookie: "turnstile.sid".to_string(),
            proxy_header: ProxyHeaderConfig::default(),
        }
    }
}

/// Trusted-proxy header authentication.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyHeaderConfig {
    pub enabled: bool,
    /// Header the upstream proxy names the principal in
    pub header_name: String,
}

impl Default for ProxyHeaderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header_name: DEFAULT_HEADER_NAME.to_string(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.session_key.trim().is_empty() {
            bail!("Config validation: auth.session_key cannot be empty");
        }
        if self.auth.user_property.trim().is_empty() {
            bail!("Config validation: auth.user_property cannot be empty");
        }
        if self.auth.session_cookie.trim().is_empty() {
            bail!("Config validation: auth.session_cookie cannot be empty");
        }
        if self.auth.session_cookie.contains([';', '=', ' ', ',']) {
            bail!(
                "Config validation: auth.session_cookie {:?} is not a valid cookie name",
                self.auth.session_cookie
            );
        }
        if self.auth.proxy_header.enabled && self.auth.proxy_header.header_name.trim().is_empty() {
            bail!("Config validation: auth.proxy_header.header_name cannot be empty when proxy header auth is enabled");
        }
        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("TURNSTILE_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
