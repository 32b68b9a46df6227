use crate::{error::HttpError, ServerState};

use axum::{extract::State, response::Redirect};
use tower_cookies::Cookies;

#[axum::debug_handler(state = ServerState)]
pub async fn logout_handler(
    State(state): State<ServerState>,
    cookies: Cookies,
) -> Result<Redirect, HttpError> {
    let mut session = state.sessions.load(&cookies);
    state.flow.logout(&mut session);
    state.sessions.save(&cookies, &session)?;

    Ok(Redirect::to("/"))
}
