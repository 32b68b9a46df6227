//! doorman is a minimal web application that delegates sign-in to an OpenID
//! Connect provider and keeps the signed-in user in an encrypted cookie.

use std::env::var;
use std::sync::Arc;

use doorman::{config::Config, oidc::OidcProvider, routes, ServerState};

use anyhow::Context;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_cookies::CookieManagerLayer;
use tower_http::{
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env file is fine, the environment may be set directly
    let dotenv = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    if let Ok(path) = dotenv {
        info!("loaded environment from {}", path.display());
    }

    let config = Config::try_env().context("invalid configuration")?;

    let provider = OidcProvider::discover(&config.provider, config.redirect_url()?)
        .await
        .context("unable to set up identity provider")?;

    let state = ServerState::new(config.clone(), Arc::new(provider))
        .context("invalid page templates")?;

    let app = routes().with_state(state).layer(
        ServiceBuilder::new()
            .layer(
                TraceLayer::new_for_http()
                    .on_request(DefaultOnRequest::new().level(Level::INFO))
                    .on_response(
                        DefaultOnResponse::new()
                            .level(Level::INFO)
                            .latency_unit(LatencyUnit::Micros),
                    ),
            )
            .layer(CookieManagerLayer::new()),
    );

    let listener = TcpListener::bind(config.addr())
        .await
        .with_context(|| format!("unable to listen on {}", config.addr()))?;

    info!("serving on {}", config.addr());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server unexpectedly stopped")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutting down");
}
