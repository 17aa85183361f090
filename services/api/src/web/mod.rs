pub mod rest;
pub mod state;

pub use rest::{
    complete_research_session_handler, create_research_session_handler,
    delete_research_session_handler, fail_research_session_handler,
    follow_up_research_session_handler, get_research_session_handler, health_handler,
    list_research_sessions_handler, start_research_session_handler,
    update_research_session_handler,
};

use axum::{
    routing::{get, post},
    Router,
};
use state::AppState;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Builds the research session routes over the shared state.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/research-sessions",
            post(create_research_session_handler).get(list_research_sessions_handler),
        )
        .route(
            "/research-sessions/{id}",
            get(get_research_session_handler)
                .patch(update_research_session_handler)
                .delete(delete_research_session_handler),
        )
        .route("/research-sessions/{id}/start", post(start_research_session_handler))
        .route(
            "/research-sessions/{id}/complete",
            post(complete_research_session_handler),
        )
        .route("/research-sessions/{id}/fail", post(fail_research_session_handler))
        .route(
            "/research-sessions/{id}/follow-ups",
            post(follow_up_research_session_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
