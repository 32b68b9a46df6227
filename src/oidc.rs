//! The identity provider side of the authorization code flow.
//!
//! [`OidcProvider`] talks to a real OpenID Connect provider: it discovers the
//! provider's endpoints and signing keys once at startup, builds
//! authorization URLs (with state, nonce and a PKCE challenge), exchanges
//! authorization codes and verifies the returned ID token.

use std::time::Duration;

use crate::config::ProviderConfig;

use async_trait::async_trait;
use openidconnect::{
    core::{
        CoreAuthenticationFlow, CoreClient, CoreIdToken, CoreProviderMetadata, CoreUserInfoClaims,
    },
    reqwest::async_http_client,
    url::Url,
    AccessToken, AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce,
    OAuth2TokenResponse, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope,
    SubjectIdentifier, TokenResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Always requested by the OIDC client, so never added a second time.
const OPENID_SCOPE: &str = "openid";

/// Errors while setting up OIDC.
#[derive(Error, Clone, Debug)]
pub enum SetupError {
    #[error("invalid issuer url")]
    InvalidIssuer,
    #[error("error during OIDC discovery")]
    DiscoveryError,
    #[error("OIDC discovery timed out")]
    Timeout,
}

/// A failed login attempt. The display form is the reason code shown to the
/// user; details are only logged.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum OAuthError {
    /// The provider redirected back with an `error` parameter.
    #[error("{error}")]
    Provider {
        error: String,
        description: Option<String>,
    },
    #[error("state_mismatch")]
    StateMismatch,
    #[error("missing_code")]
    MissingCode,
    #[error("token_exchange_failed")]
    TokenExchangeFailed,
    #[error("invalid_id_token")]
    InvalidIdToken,
    #[error("userinfo_failed")]
    UserInfoFailed,
}

impl OAuthError {
    /// Extra human readable detail, as given by the provider.
    pub fn description(&self) -> Option<&str> {
        match self {
            OAuthError::Provider { description, .. } => description.as_deref(),
            _ => None,
        }
    }
}

/// State for one in-flight login attempt, kept in the session between the
/// authorization redirect and the callback.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PendingAuth {
    state: String,
    nonce: String,
    pkce_verifier: String,
}

impl PendingAuth {
    pub fn new(state: String, nonce: String, pkce_verifier: String) -> Self {
        Self {
            state,
            nonce,
            pkce_verifier,
        }
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn pkce_verifier(&self) -> &str {
        &self.pkce_verifier
    }

    /// Compare the `state` returned by the provider in constant time.
    pub fn matches_state(&self, state: &str) -> bool {
        self.state.as_bytes().ct_eq(state.as_bytes()).into()
    }
}

/// Where to send the browser, and what to remember until it comes back.
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub pending: PendingAuth,
}

/// The authenticated user's verified attributes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IdentityClaims {
    pub sub: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub name: Option<String>,
    pub picture: Option<String>,
    /// Every claim as received.
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl IdentityClaims {
    /// Build identity claims from a raw claim set.
    ///
    /// Returns [`None`] if there is no subject.
    pub fn from_claims(claims: Map<String, Value>) -> Option<Self> {
        let string = |name: &str| claims.get(name).and_then(Value::as_str).map(str::to_string);

        Some(Self {
            sub: string("sub").filter(|s| !s.is_empty())?,
            email: string("email"),
            email_verified: claims.get("email_verified").and_then(Value::as_bool),
            name: string("name"),
            picture: string("picture"),
            claims,
        })
    }

    /// Fill in claims missing from this set. Existing claims are kept.
    pub fn merged(mut self, extra: Map<String, Value>) -> Self {
        for (name, value) in extra {
            self.claims.entry(name).or_insert(value);
        }

        // sub is present since self was built from these claims
        Self::from_claims(self.claims.clone()).unwrap_or(self)
    }

    fn from_serialized<C: Serialize>(claims: &C) -> Option<Self> {
        Self::from_claims(claim_map(claims)?)
    }
}

fn claim_map<C: Serialize>(claims: &C) -> Option<Map<String, Value>> {
    match serde_json::to_value(claims) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// An external identity provider supporting the authorization code flow.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Build a fresh authorization request.
    fn authorize(&self) -> AuthorizationRequest;

    /// Exchange an authorization code for the user's verified identity.
    async fn exchange(
        &self,
        code: &str,
        pending: &PendingAuth,
    ) -> Result<IdentityClaims, OAuthError>;
}

/// An OpenID Connect provider, configured through discovery.
#[derive(Clone, Debug)]
pub struct OidcProvider {
    client: CoreClient,
    scopes: Vec<Scope>,
    timeout: Duration,
}

impl OidcProvider {
    /// Fetch the provider metadata and signing keys, and register this
    /// application's client with them.
    pub async fn discover(
        config: &ProviderConfig,
        redirect_url: RedirectUrl,
    ) -> Result<Self, SetupError> {
        let issuer_url = IssuerUrl::new(config.issuer_url.clone()).map_err(|e| {
            error!("error setting up issuer url: {}", e);
            SetupError::InvalidIssuer
        })?;

        let metadata = timeout(
            config.timeout,
            CoreProviderMetadata::discover_async(issuer_url, async_http_client),
        )
        .await
        .map_err(|_| {
            error!("OIDC discovery timed out after {:?}", config.timeout);
            SetupError::Timeout
        })?
        .map_err(|e| {
            error!("failed OIDC discovery: {}", e);
            SetupError::DiscoveryError
        })?;

        info!("discovered identity provider {}", metadata.issuer().as_str());

        let client = CoreClient::from_provider_metadata(
            metadata,
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
        )
        .set_redirect_uri(redirect_url);

        let scopes = config
            .scopes
            .iter()
            .filter(|s| s.as_str() != OPENID_SCOPE)
            .map(|s| Scope::new(s.clone()))
            .collect();

        Ok(Self {
            client,
            scopes,
            timeout: config.timeout,
        })
    }

    fn verify_id_token(
        &self,
        id_token: &CoreIdToken,
        pending: &PendingAuth,
    ) -> Result<IdentityClaims, OAuthError> {
        let verifier = self.client.id_token_verifier();
        let nonce = Nonce::new(pending.nonce().to_string());

        let claims = id_token.claims(&verifier, &nonce).map_err(|e| {
            warn!("rejected ID token: {}", e);
            OAuthError::InvalidIdToken
        })?;

        IdentityClaims::from_serialized(claims).ok_or_else(|| {
            warn!("ID token claims have no subject");
            OAuthError::InvalidIdToken
        })
    }

    async fn complete_from_userinfo(
        &self,
        access_token: &AccessToken,
        identity: Option<IdentityClaims>,
    ) -> Result<IdentityClaims, OAuthError> {
        let subject = identity
            .as_ref()
            .map(|i| SubjectIdentifier::new(i.sub.clone()));

        let request = match self.client.user_info(access_token.clone(), subject) {
            Ok(request) => request,
            Err(e) => {
                debug!("userinfo unavailable: {}", e);
                return identity.ok_or_else(|| {
                    error!("provider returned neither an ID token nor a userinfo endpoint");
                    OAuthError::UserInfoFailed
                });
            }
        };

        let userinfo: CoreUserInfoClaims =
            timeout(self.timeout, request.request_async(async_http_client))
                .await
                .map_err(|_| {
                    warn!("userinfo request timed out");
                    OAuthError::UserInfoFailed
                })?
                .map_err(|e| {
                    error!("userinfo request failed: {}", e);
                    OAuthError::UserInfoFailed
                })?;

        let extra = claim_map(&userinfo).ok_or(OAuthError::UserInfoFailed)?;

        match identity {
            Some(identity) => Ok(identity.merged(extra)),
            None => IdentityClaims::from_claims(extra).ok_or(OAuthError::UserInfoFailed),
        }
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn authorize(&self) -> AuthorizationRequest {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = self.client.authorize_url(
            CoreAuthenticationFlow::AuthorizationCode,
            CsrfToken::new_random,
            Nonce::new_random,
        );
        for scope in &self.scopes {
            request = request.add_scope(scope.clone());
        }

        let (url, csrf, nonce) = request.set_pkce_challenge(pkce_challenge).url();

        AuthorizationRequest {
            url,
            pending: PendingAuth::new(
                csrf.secret().clone(),
                nonce.secret().clone(),
                pkce_verifier.secret().clone(),
            ),
        }
    }

    async fn exchange(
        &self,
        code: &str,
        pending: &PendingAuth,
    ) -> Result<IdentityClaims, OAuthError> {
        let request = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(pending.pkce_verifier().to_string()));

        let response = timeout(self.timeout, request.request_async(async_http_client))
            .await
            .map_err(|_| {
                warn!("token exchange timed out");
                OAuthError::TokenExchangeFailed
            })?
            .map_err(|e| {
                error!("token exchange failed: {}", e);
                OAuthError::TokenExchangeFailed
            })?;

        let identity = match response.id_token() {
            Some(id_token) => Some(self.verify_id_token(id_token, pending)?),
            None => {
                debug!("token response has no ID token");
                None
            }
        };

        match identity {
            Some(identity) if identity.email.is_some() => Ok(identity),
            identity => {
                self.complete_from_userinfo(response.access_token(), identity)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn state_comparison() {
        let pending = PendingAuth::new("abc".into(), "n".into(), "v".into());

        assert!(pending.matches_state("abc"));
        assert!(!pending.matches_state("abd"));
        assert!(!pending.matches_state("ab"));
        assert!(!pending.matches_state(""));
    }

    #[test]
    fn claims_from_map() {
        let claims = IdentityClaims::from_claims(map(json!({
            "sub": "u1",
            "email": "a@b.com",
            "email_verified": true,
            "name": "A B",
            "picture": "https://example.com/a.png",
            "locale": "en",
        })))
        .expect("claims with subject");

        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.email.as_deref(), Some("a@b.com"));
        assert_eq!(claims.email_verified, Some(true));
        assert_eq!(claims.name.as_deref(), Some("A B"));
        assert_eq!(claims.picture.as_deref(), Some("https://example.com/a.png"));
        assert_eq!(claims.claims.get("locale"), Some(&json!("en")));
    }

    #[test]
    fn subject_required() {
        assert_eq!(IdentityClaims::from_claims(map(json!({"email": "a@b.com"}))), None);
        assert_eq!(IdentityClaims::from_claims(map(json!({"sub": ""}))), None);
        assert_eq!(IdentityClaims::from_claims(map(json!({"sub": 7}))), None);
    }

    #[test]
    fn merge_keeps_existing() {
        let claims = IdentityClaims::from_claims(map(json!({"sub": "u1", "name": "token"})))
            .expect("claims with subject")
            .merged(map(json!({
                "sub": "other",
                "name": "userinfo",
                "email": "a@b.com",
            })));

        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.name.as_deref(), Some("token"));
        assert_eq!(claims.email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn error_reasons() {
        let denied = OAuthError::Provider {
            error: "access_denied".into(),
            description: Some("User said no".into()),
        };
        assert_eq!(denied.to_string(), "access_denied");
        assert_eq!(denied.description(), Some("User said no"));

        assert_eq!(OAuthError::StateMismatch.to_string(), "state_mismatch");
        assert_eq!(
            OAuthError::TokenExchangeFailed.to_string(),
            "token_exchange_failed"
        );
        assert_eq!(OAuthError::InvalidIdToken.to_string(), "invalid_id_token");
        assert_eq!(OAuthError::StateMismatch.description(), None);
    }

    #[test]
    fn pending_auth_serializes() {
        let pending = PendingAuth::new("s".into(), "n".into(), "v".into());
        let value = serde_json::to_value(&pending).expect("serialize");

        assert_eq!(value, json!({"state": "s", "nonce": "n", "pkce_verifier": "v"}));
    }
}
