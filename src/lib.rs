//! # doorman
//!
//! doorman is a minimal web application that delegates sign-in to an OpenID
//! Connect provider.
//!
//! ## About
//!
//! `/login` sends the browser to the provider using the authorization code
//! flow with PKCE. The provider redirects back to `/auth`, where the code is
//! exchanged for tokens and the ID token is verified. The user's claims are
//! then kept in an encrypted [PASETO v4] session cookie; nothing is stored
//! server side. `/` shows the current user and `/logout` forgets them.
//!
//! [PASETO v4]: https://github.com/paseto-standard/paseto-spec

pub mod config;
pub mod error;
pub mod flow;
pub mod oidc;
pub mod pages;
mod routes;
pub mod session;
pub mod token;

pub use routes::routes;

use std::sync::Arc;

use crate::config::Config;
use crate::flow::AuthFlow;
use crate::oidc::IdentityProvider;
use crate::pages::Pages;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub flow: AuthFlow,
    pub sessions: SessionStore,
    pub pages: Arc<Pages>,
}

impl ServerState {
    pub fn new(
        config: Config,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<Self, handlebars::TemplateError> {
        Ok(Self {
            sessions: SessionStore::new(&config.cookie),
            flow: AuthFlow::new(provider),
            pages: Arc::new(Pages::new()?),
            config,
        })
    }
}
