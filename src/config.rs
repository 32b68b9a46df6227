//! Process configuration, read once from the environment at startup.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use openidconnect::{url::Url, RedirectUrl};
use thiserror::Error;

use crate::token::SecretKey;

const DEFAULT_ADDR: IpAddr = IpAddr::V6(Ipv6Addr::LOCALHOST);
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SITE_URL: &str = "http://localhost:8080/";

const DEFAULT_COOKIE_NAME: &str = "_doorman_session";
const DEFAULT_SESSION_MAX_AGE: u64 = 14 * 24 * 60 * 60;

/// Longest session lifetime accepted. Browsers cap cookie lifetimes at 400
/// days.
pub const MAX_SESSION_AGE: Duration = Duration::from_secs(400 * 24 * 60 * 60);

const DEFAULT_ISSUER_URL: &str = "https://accounts.google.com";
const DEFAULT_SCOPES: &str = "openid email profile";
const DEFAULT_TIMEOUT: u64 = 10;

const DISCOVERY_SUFFIX: &str = "/.well-known/openid-configuration";

/// Path of the provider callback, relative to the site URL.
pub const CALLBACK_PATH: &str = "auth";

/// Errors loading the configuration. All of them are fatal.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub ip: IpAddr,
    pub port: u16,
    /// Public base URL of this deployment.
    pub site_url: Url,
    pub cookie: CookieConfig,
    pub provider: ProviderConfig,
}

#[derive(Clone, Debug)]
pub struct CookieConfig {
    pub name: String,
    pub secret: SecretKey,
    pub max_age: Duration,
    pub secure: bool,
}

/// Registration of this application with the identity provider.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
    /// Bound on every outbound call to the provider.
    pub timeout: Duration,
}

impl Config {
    /// Load the configuration from process environment variables.
    pub fn try_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let site_url: Url = env.parse_or("SITE_URL", || {
            Url::parse(DEFAULT_SITE_URL).map_err(|e| e.to_string())
        })?;

        let secret = env.required("SESSION_SECRET")?;
        let secret = SecretKey::from_base64(&secret).map_err(|e| ConfigError::Invalid {
            var: "SESSION_SECRET",
            reason: e.to_string(),
        })?;

        let cookie = CookieConfig {
            name: env
                .optional("SESSION_COOKIE_NAME")
                .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string()),
            secret,
            max_age: session_max_age(
                env.parse_or("SESSION_MAX_AGE_SECS", || Ok(DEFAULT_SESSION_MAX_AGE))?,
            )?,
            secure: env.parse_or("SESSION_COOKIE_SECURE", || {
                Ok(site_url.scheme() == "https")
            })?,
        };

        let scopes = env
            .optional("OIDC_SCOPES")
            .unwrap_or_else(|| DEFAULT_SCOPES.to_string())
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let provider = ProviderConfig {
            issuer_url: issuer_from(
                &env.optional("OIDC_ISSUER_URL")
                    .unwrap_or_else(|| DEFAULT_ISSUER_URL.to_string()),
            ),
            client_id: env.required("OIDC_CLIENT_ID")?,
            client_secret: env.required("OIDC_CLIENT_SECRET")?,
            scopes,
            timeout: Duration::from_secs(
                env.parse_or("OIDC_TIMEOUT_SECS", || Ok(DEFAULT_TIMEOUT))?,
            ),
        };

        Ok(Self {
            ip: env.parse_or("LISTEN_IP", || Ok(DEFAULT_ADDR))?,
            port: env.parse_or("LISTEN_PORT", || Ok(DEFAULT_PORT))?,
            site_url,
            cookie,
            provider,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// The URL the provider redirects the browser back to.
    pub fn redirect_url(&self) -> Result<RedirectUrl, ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            var: "SITE_URL",
            reason,
        };

        let mut base = self.site_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let url = base.join(CALLBACK_PATH).map_err(|e| invalid(e.to_string()))?;

        RedirectUrl::new(url.into()).map_err(|e| invalid(e.to_string()))
    }
}

fn session_max_age(secs: u64) -> Result<Duration, ConfigError> {
    let max_age = Duration::from_secs(secs);

    if max_age.is_zero() || max_age > MAX_SESSION_AGE {
        return Err(ConfigError::Invalid {
            var: "SESSION_MAX_AGE_SECS",
            reason: format!(
                "must be between 1 and {} seconds",
                MAX_SESSION_AGE.as_secs()
            ),
        });
    }

    Ok(max_age)
}

/// Accept either an issuer or its discovery document URL.
fn issuer_from(url: &str) -> String {
    let url = url.trim();

    url.strip_suffix(DISCOVERY_SUFFIX)
        .unwrap_or(url)
        .to_string()
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.optional(var).ok_or(ConfigError::Missing(var))
    }

    fn parse_or<T, D>(&self, var: &'static str, default: D) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: ToString,
        D: FnOnce() -> Result<T, String>,
    {
        let parsed = match self.optional(var) {
            Some(v) => v.trim().parse::<T>().map_err(|e| e.to_string()),
            None => default(),
        };

        parsed.map_err(|reason| ConfigError::Invalid { var, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    const SECRET: &str = "cHFyc3R1dnd4eXp7fH1+f4CBgoOEhYaHiImKi4yNjo8=";

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Config::from_lookup(|var| vars.get(var).cloned())
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("OIDC_CLIENT_ID", "client"),
            ("OIDC_CLIENT_SECRET", "shh"),
            ("SESSION_SECRET", SECRET),
        ]
    }

    #[test]
    fn defaults() {
        let config = load(&minimal()).expect("load config");

        assert_eq!(config.addr(), SocketAddr::new(DEFAULT_ADDR, DEFAULT_PORT));
        assert_eq!(config.cookie.name, DEFAULT_COOKIE_NAME);
        assert_eq!(config.cookie.max_age, Duration::from_secs(1_209_600));
        assert!(!config.cookie.secure);
        assert_eq!(config.provider.issuer_url, "https://accounts.google.com");
        assert_eq!(config.provider.scopes, ["openid", "email", "profile"]);
        assert_eq!(config.provider.timeout, Duration::from_secs(10));
        assert_eq!(
            config.redirect_url().expect("redirect url").as_str(),
            "http://localhost:8080/auth"
        );
    }

    #[test]
    fn missing_required() {
        for var in ["OIDC_CLIENT_ID", "OIDC_CLIENT_SECRET", "SESSION_SECRET"] {
            let vars: Vec<_> = minimal().into_iter().filter(|(k, _)| *k != var).collect();

            assert_eq!(load(&vars).map(|_| ()), Err(ConfigError::Missing(var)));
        }
    }

    #[test]
    fn blank_counts_as_missing() {
        let mut vars = minimal();
        vars.push(("OIDC_CLIENT_ID", "  "));
        vars.remove(0);

        assert_eq!(
            load(&vars).map(|_| ()),
            Err(ConfigError::Missing("OIDC_CLIENT_ID"))
        );
    }

    #[test]
    fn invalid_values() {
        let mut short_secret = minimal();
        short_secret[2] = ("SESSION_SECRET", "c2hvcnQ=");
        assert!(matches!(
            load(&short_secret),
            Err(ConfigError::Invalid {
                var: "SESSION_SECRET",
                ..
            })
        ));

        let mut bad_port = minimal();
        bad_port.push(("LISTEN_PORT", "eighty"));
        assert!(matches!(
            load(&bad_port),
            Err(ConfigError::Invalid {
                var: "LISTEN_PORT",
                ..
            })
        ));
    }

    #[test]
    fn session_max_age_bounds() {
        for secs in ["0", "34560001", "300000000000", "18446744073709551615"] {
            let mut vars = minimal();
            vars.push(("SESSION_MAX_AGE_SECS", secs));

            assert!(
                matches!(
                    load(&vars),
                    Err(ConfigError::Invalid {
                        var: "SESSION_MAX_AGE_SECS",
                        ..
                    })
                ),
                "accepted {}",
                secs
            );
        }

        let mut longest = minimal();
        longest.push(("SESSION_MAX_AGE_SECS", "34560000"));
        let config = load(&longest).expect("load config");
        assert_eq!(config.cookie.max_age, MAX_SESSION_AGE);
    }

    #[test]
    fn overrides() {
        let mut vars = minimal();
        vars.extend([
            ("SITE_URL", "https://example.com/app"),
            (
                "OIDC_ISSUER_URL",
                "https://idp.example.com/.well-known/openid-configuration",
            ),
            ("OIDC_SCOPES", "openid email"),
            ("LISTEN_IP", "0.0.0.0"),
            ("LISTEN_PORT", "3000"),
            ("SESSION_MAX_AGE_SECS", "60"),
        ]);
        let config = load(&vars).expect("load config");

        assert!(config.cookie.secure);
        assert_eq!(config.cookie.max_age, Duration::from_secs(60));
        assert_eq!(config.provider.issuer_url, "https://idp.example.com");
        assert_eq!(config.provider.scopes, ["openid", "email"]);
        assert_eq!(config.addr().to_string(), "0.0.0.0:3000");
        assert_eq!(
            config.redirect_url().expect("redirect url").as_str(),
            "https://example.com/app/auth"
        );
    }
}
