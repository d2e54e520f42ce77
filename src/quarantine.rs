//! Post-response quarantine hook
//!
//! Once the service is quarantined the process must exit, but only after the
//! response that reported the failure (and any other response in flight) has
//! been written out. Every response body is wrapped so that when it has been
//! fully consumed (or abandoned by the client) the lifecycle is checked; if
//! quarantined, an exit is requested and the server's graceful shutdown takes
//! over.
//!
//! ## Deployment
//!
//! A quarantined process exits with [`QUARANTINE_EXIT_CODE`]. It must run under
//! a supervisor that restarts it (container restart policy, systemd
//! `Restart=always`, ...). Load balancers should route on `GET /`, which turns
//! `503` as soon as the quarantine starts.

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use futures::StreamExt;

use crate::state::AppState;

/// Exit status of a process that quarantined itself
pub const QUARANTINE_EXIT_CODE: i32 = 127;

/// Runs the check when the response body is dropped
struct ResponseFlushed {
    state: AppState,
}

impl Drop for ResponseFlushed {
    fn drop(&mut self) {
        let lifecycle = self.state.lifecycle();
        if lifecycle.is_quarantined() {
            tracing::warn!("Response flushed while quarantined, requesting exit");
            lifecycle.request_exit();
        }
    }
}

/// Middleware wrapping every response body with [`ResponseFlushed`]
pub async fn exit_after_response(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    let (parts, body) = response.into_parts();

    let guard = ResponseFlushed { state };
    let stream = body.into_data_stream().map(move |chunk| {
        let _ = &guard;
        chunk
    });

    Response::from_parts(parts, Body::from_stream(stream))
}
