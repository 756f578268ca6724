use axum::http::{HeaderValue, Method};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod health;
pub mod stor;
pub mod tokens;
pub mod uploads;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods([Method::GET, Method::PUT, Method::POST, Method::DELETE, Method::HEAD])
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .expose_headers(tower_http::cors::ExposeHeaders::list([
                axum::http::HeaderName::from_static("etag"),
                axum::http::HeaderName::from_static("computed-md5"),
                axum::http::HeaderName::from_static("x-request-id"),
            ]))
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods([Method::GET, Method::PUT, Method::POST, Method::DELETE, Method::HEAD])
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
    };

    let stor_routes = Router::new().route(
        "/:account/stor/*path",
        put(stor::put_object)
            .get(stor::get_or_head_object)
            .head(stor::get_or_head_object)
            .delete(stor::delete_object),
    );

    let token_routes = Router::new().route("/:account/tokens", post(tokens::mint_token));

    let upload_routes = Router::new()
        .route("/:account/uploads", post(uploads::create_upload))
        .route("/:account/uploads/:id", get(uploads::redirect_to_parts_directory).delete(uploads::delete_upload))
        .route("/:account/uploads/:prefix/:id/state", get(uploads::get_upload_state))
        .route("/:account/uploads/:prefix/:id/commit", post(uploads::commit_upload))
        .route("/:account/uploads/:prefix/:id/abort", post(uploads::abort_upload))
        .route("/:account/uploads/:prefix/:id/:part_num", put(uploads::upload_part));

    Router::new()
        .merge(stor_routes)
        .merge(token_routes)
        .merge(upload_routes)
        .route("/ping", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024 * 1024 * 5))
}
