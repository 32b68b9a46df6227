//! Per-browser session state, kept client side in an encrypted cookie.

use crate::config::{CookieConfig, MAX_SESSION_AGE};
use crate::oidc::{IdentityClaims, PendingAuth};
use crate::token::{self, Claims, ClaimsValidator, SecretKey};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_cookies::{
    cookie::{time, SameSite},
    Cookie, Cookies,
};
use tracing::{debug, error, warn};

/// Name of the token claim holding the session.
const SESSION_CLAIM: &str = "session";

/// Browsers silently drop cookies larger than this.
const MAX_COOKIE_BYTES: usize = 4096;

/// Errors while writing a session.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum SessionError {
    #[error("session claims error: {0}")]
    Claims(#[from] token::claims::Error),
    #[error("failed to seal session: {0}")]
    Seal(#[from] token::local::Error),
    #[error("sealed session is {0} bytes, too large for a cookie")]
    TooLarge(usize),
}

/// Authenticated state for one browser.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
pub struct Session {
    /// Set once a login completes, removed by logout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<IdentityClaims>,
    /// The login attempt awaiting its callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_auth: Option<PendingAuth>,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.pending_auth.is_none()
    }
}

/// Reads and writes [`Session`]s as sealed cookies.
#[derive(Clone, Debug)]
pub struct SessionStore {
    name: String,
    key: SecretKey,
    max_age: time::Duration,
    secure: bool,
}

impl SessionStore {
    pub fn new(config: &CookieConfig) -> Self {
        // at most MAX_SESSION_AGE, so the cast is lossless
        let secs = config.max_age.min(MAX_SESSION_AGE).as_secs() as i64;

        Self {
            name: config.name.clone(),
            key: config.secret.clone(),
            max_age: time::Duration::seconds(secs),
            secure: config.secure,
        }
    }

    /// Restore the session from the request cookies. A missing, expired or
    /// forged cookie yields an empty session.
    pub fn load(&self, cookies: &Cookies) -> Session {
        let Some(cookie) = cookies.get(&self.name) else {
            return Session::default();
        };

        match self.open(cookie.value()) {
            Ok(session) => session,
            Err(e) => {
                warn!("discarding unreadable session cookie: {}", e);
                Session::default()
            }
        }
    }

    /// Write the session back to the response cookies. An empty session
    /// removes the cookie.
    pub fn save(&self, cookies: &Cookies, session: &Session) -> Result<(), SessionError> {
        if session.is_empty() {
            if cookies.get(&self.name).is_some() {
                debug!("removing empty session cookie");
                cookies.remove(self.cookie(String::new()));
            }

            return Ok(());
        }

        let value = self.seal(session).map_err(|e| {
            error!("failed to write session: {}", e);
            e
        })?;
        cookies.add(self.cookie(value));

        Ok(())
    }

    fn cookie(&self, value: String) -> Cookie<'static> {
        Cookie::build((self.name.clone(), value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(self.max_age)
            .build()
    }

    fn seal(&self, session: &Session) -> Result<String, SessionError> {
        let claims =
            Claims::issued_now(self.max_age)?.with_custom_claim(SESSION_CLAIM, session)?;

        let value = self.key.encrypt(&claims, Some(self.name.as_bytes()))?;

        if self.name.len() + 1 + value.len() > MAX_COOKIE_BYTES {
            return Err(SessionError::TooLarge(value.len()));
        }

        Ok(value)
    }

    fn open(&self, value: &str) -> Result<Session, OpenError> {
        let validator = ClaimsValidator::new().with_rule(|c| c.get(SESSION_CLAIM).is_some());
        let claims = self
            .key
            .decrypt(value, &validator, Some(self.name.as_bytes()))?;

        Ok(claims.get_as(SESSION_CLAIM)?)
    }
}

#[derive(Error, Debug)]
enum OpenError {
    #[error("{0}")]
    Token(#[from] token::local::Error),
    #[error("{0}")]
    Claims(#[from] token::claims::Error),
}
