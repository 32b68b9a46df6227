mod callback;
mod home;
mod login;
mod logout;

use crate::ServerState;
use callback::callback_handler;
use home::home_handler;
use login::login_handler;
use logout::logout_handler;

use axum::{
    http::StatusCode,
    routing::{get, Router},
};

pub fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(home_handler))
        .route("/login", get(login_handler))
        .route("/auth", get(callback_handler))
        .route("/logout", get(logout_handler))
        .route("/ping", get(ping_handler))
}

#[axum::debug_handler(state = ServerState)]
async fn ping_handler() -> StatusCode {
    StatusCode::OK
}
