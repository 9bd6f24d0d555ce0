pub mod auth;
pub mod error;
pub mod routes;
pub mod telemetry;

use std::sync::Arc;

use axum::extract::FromRef;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use hostel_allotment_core::{AllotmentStore, ReadStore};
use hostel_allotment_identity::IdentityVerifier;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

/// The two store handles are deliberately distinct: end-user reads go through
/// `scoped`, allotment and admin writes through `service`.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub scoped: Arc<dyn ReadStore>,
    pub service: Arc<dyn AllotmentStore>,
    pub identity: Arc<dyn IdentityVerifier>,
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/hostels", get(routes::hostels::list))
        .route("/rooms/:hostel_id", get(routes::rooms::list))
        .route("/allot", post(routes::allot::allot))
        .route("/allot/mine", get(routes::allot::mine))
        .route("/allot/window", get(routes::allot::window))
        .route("/profile", get(routes::profile::profile))
        .route("/verify/:allotment_id", get(routes::verify::verify))
        .route("/admin/stats", get(routes::admin::stats))
        .route("/admin/rooms", get(routes::admin::rooms))
        .route("/admin/allotments", get(routes::admin::allotments))
        .route("/admin/students", get(routes::admin::students))
        .route("/admin/assign", post(routes::admin::assign))
        .route("/admin/unassign", post(routes::admin::unassign))
        .route("/admin/block-room", post(routes::admin::block_room))
        .route("/admin/unblock-room", post(routes::admin::unblock_room))
        .route("/admin/vacancy-map", get(routes::admin::vacancy_map))
        .route(
            "/admin/window",
            get(routes::admin::windows).post(routes::admin::create_window),
        )
}

pub fn router(state: AppState) -> Router {
    // layers are in reverse order
    routes()
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::default().include_headers(false))
                        .on_response(DefaultOnResponse::default()),
                )
                .layer(CatchPanicLayer::new()),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Allows the single-page front end at `client_url` to call the API.
pub fn cors_layer(client_url: &str) -> Result<CorsLayer, header::InvalidHeaderValue> {
    Ok(CorsLayer::new()
        .allow_origin(HeaderValue::from_str(client_url.trim_end_matches('/'))?)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true))
}
