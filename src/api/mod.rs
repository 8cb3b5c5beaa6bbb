pub mod coinjoin;
pub mod confirmation;
pub mod dto;
pub mod inputs;
pub mod output;
pub mod signatures;
pub mod states;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowMethods, Any, CorsLayer};

use crate::coordinator::Coordinator;

/// Wires the HTTP/JSON endpoints to the core. This is the thin adapter
/// layer, kept external to the core: deserialization, status mapping, and
/// nothing else.
pub fn build_router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/states", get(states::states_handler))
        .route("/inputs", post(inputs::register_inputs_handler))
        .route("/confirmation", post(confirmation::confirmation_handler))
        .route(
            "/unconfirmation",
            post(confirmation::unconfirmation_handler),
        )
        .route("/output", post(output::register_output_handler))
        .route("/coinjoin/:unique_id", get(coinjoin::get_coinjoin_handler))
        .route("/signatures", post(signatures::post_signatures_handler))
        .with_state(coordinator)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(AllowMethods::any()),
        )
}
