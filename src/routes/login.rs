use crate::{error::HttpError, ServerState};

use axum::{extract::State, response::Redirect};
use tower_cookies::Cookies;

/// Send the browser to the identity provider, remembering the attempt in the
/// session.
#[axum::debug_handler(state = ServerState)]
pub async fn login_handler(
    State(state): State<ServerState>,
    cookies: Cookies,
) -> Result<Redirect, HttpError> {
    let mut session = state.sessions.load(&cookies);
    let url = state.flow.begin_login(&mut session);

    state.sessions.save(&cookies, &session)?;

    Ok(Redirect::to(url.as_str()))
}
