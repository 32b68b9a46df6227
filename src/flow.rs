//! The authorization code flow over a [`Session`].
//!
//! A session is anonymous or authenticated, with a pending login attempt
//! possibly held between [`AuthFlow::begin_login`] and
//! [`AuthFlow::complete_login`].

use std::sync::Arc;

use crate::oidc::{IdentityClaims, IdentityProvider, OAuthError};
use crate::session::Session;

use openidconnect::url::Url;
use serde::Deserialize;
use tracing::{info, warn};

/// Query parameters of the provider's redirect back to us.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Clone)]
pub struct AuthFlow {
    provider: Arc<dyn IdentityProvider>,
}

impl AuthFlow {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// Start a login attempt, replacing any earlier unfinished one. Returns
    /// the provider URL to send the browser to.
    pub fn begin_login(&self, session: &mut Session) -> Url {
        let request = self.provider.authorize();
        session.pending_auth = Some(request.pending);

        request.url
    }

    /// Finish a login attempt from the provider's callback.
    ///
    /// The pending attempt is consumed whatever the outcome, so a callback
    /// can't be replayed. The user is only written on success.
    pub async fn complete_login(
        &self,
        session: &mut Session,
        params: &CallbackParams,
    ) -> Result<(), OAuthError> {
        let pending = session.pending_auth.take();

        if let Some(error) = &params.error {
            warn!("provider rejected authorization: {}", error);
            return Err(OAuthError::Provider {
                error: error.clone(),
                description: params.error_description.clone(),
            });
        }

        let pending = pending.ok_or_else(|| {
            warn!("callback without a pending login");
            OAuthError::StateMismatch
        })?;

        match params.state.as_deref() {
            Some(state) if pending.matches_state(state) => {}
            _ => {
                warn!("callback state does not match the pending login");
                return Err(OAuthError::StateMismatch);
            }
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(OAuthError::MissingCode)?;

        let user = self.provider.exchange(code, &pending).await?;

        info!("user {} logged in", user.sub);
        session.user = Some(user);

        Ok(())
    }

    /// The logged in user, if any.
    pub fn current_user<'a>(&self, session: &'a Session) -> Option<&'a IdentityClaims> {
        session.user.as_ref()
    }

    pub fn logout(&self, session: &mut Session) {
        if let Some(user) = session.user.take() {
            info!("user {} logged out", user.sub);
        }
    }
}
