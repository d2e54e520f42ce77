//! Docconvert Server Library
//!
//! A single-endpoint document conversion gateway. Uploads are converted by
//! an external, fragile office converter; the service serializes calls to
//! it, bounds each call with a timeout, and quarantines itself (then exits)
//! as soon as a call leaves the converter in an untrusted state.
//!
//! # Modules
//!
//! - `scratch`: Scratch files with guaranteed cleanup
//! - `engine`: The external converter behind a trait
//! - `invoker`: Timed, serialized engine calls and outcome classification
//! - `lifecycle`: Conversion lock and the alive/quarantined state machine
//! - `routes`: `POST /convert` and the health probes
//! - `quarantine`: Post-response hook that triggers the exit

use axum::{extract::DefaultBodyLimit, middleware, Router};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod engine;
pub mod error;
pub mod formats;
pub mod invoker;
pub mod lifecycle;
pub mod quarantine;
pub mod request;
pub mod routes;
pub mod scratch;
pub mod state;

use state::AppState;

/// Build the application router
pub fn app(state: AppState) -> Router {
    let max_upload_bytes = state.config().server.max_upload_bytes;

    Router::new()
        .merge(routes::health::router())
        .merge(routes::convert::router())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            quarantine::exit_after_response,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
