//! A route for handling the OIDC callback.

use crate::flow::CallbackParams;
use crate::{error::HttpError, ServerState};

use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
};
use tower_cookies::Cookies;
use tracing::warn;

/// A handler for receiving the callback during the OIDC flow.
///
/// Failures render an error page naming the reason; the attempt is not
/// retried since the authorization code is single use.
#[axum::debug_handler(state = ServerState)]
pub async fn callback_handler(
    State(state): State<ServerState>,
    cookies: Cookies,
    Query(params): Query<CallbackParams>,
) -> Result<Response, HttpError> {
    let mut session = state.sessions.load(&cookies);
    let outcome = state.flow.complete_login(&mut session, &params).await;

    // the pending login is gone either way
    state.sessions.save(&cookies, &session)?;

    match outcome {
        Ok(()) => Ok(Redirect::to("/").into_response()),
        Err(e) => {
            warn!("login failed: {}", e);
            Ok(Html(state.pages.error(&e)?).into_response())
        }
    }
}
