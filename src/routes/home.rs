//! The landing page, showing who is logged in.

use crate::{error::HttpError, ServerState};

use axum::{extract::State, response::Html};
use tower_cookies::Cookies;

#[axum::debug_handler(state = ServerState)]
pub async fn home_handler(
    State(state): State<ServerState>,
    cookies: Cookies,
) -> Result<Html<String>, HttpError> {
    let session = state.sessions.load(&cookies);
    let user = state.flow.current_user(&session);

    Ok(Html(state.pages.home(user)?))
}
