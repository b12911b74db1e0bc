use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let api_routes = Router::new()
        .route("/api/chat", post(handlers::chat::chat_handler))
        .route("/api/feedback", post(handlers::feedback::submit_feedback))
        .route("/api/feedback/{id}", patch(handlers::feedback::update_feedback))
        .route("/api/bots/{bot_id}/metrics", get(handlers::feedback::bot_metrics))
        .route("/api/bots/{bot_id}/feedback", get(handlers::feedback::feedback_history))
        .route(
            "/api/bots/{bot_id}/knowledge",
            get(handlers::knowledge::list_knowledge)
                .post(handlers::knowledge::add_knowledge)
                .delete(handlers::knowledge::reset_knowledge),
        )
        .route(
            "/api/bots/{bot_id}/knowledge/search",
            post(handlers::knowledge::search_knowledge),
        )
        .route(
            "/api/bots/{bot_id}/knowledge/{id}",
            delete(handlers::knowledge::delete_knowledge_entry),
        )
        .route(
            "/api/bots/{bot_id}/commands",
            get(handlers::commands::list_commands).post(handlers::commands::save_command),
        )
        .route(
            "/api/bots/{bot_id}/commands/{name}",
            patch(handlers::commands::set_command_enabled).delete(handlers::commands::delete_command),
        )
        .route(
            "/api/conversations/{id}",
            get(handlers::conversations::get_conversation),
        )
        .route(
            "/api/conversations/{id}/context",
            delete(handlers::conversations::clear_context),
        );

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .with_state(state)
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
}
