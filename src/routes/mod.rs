use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::handlers::{auth, chat, ride};
use crate::middleware::auth::auth_middleware;
use crate::middleware::rate_limit::create_public_governor;
use crate::realtime::socket;
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    // IP-based governor for routes reachable without a token
    let public_governor = create_public_governor();

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .layer(public_governor.clone());

    let me_routes = Router::new()
        .route("/me", get(auth::me))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Discovery is public: listings and detail need no account
    let public_ride_routes = Router::new()
        .route("/", get(ride::list_rides))
        .route("/{id}", get(ride::get_ride))
        .layer(public_governor);

    // Posting, booking and ownership-scoped listings require a principal
    let protected_ride_routes = Router::new()
        .route("/", post(ride::create_ride))
        .route("/mine", get(ride::my_rides))
        .route("/booked", get(ride::booked_rides))
        .route("/posted", get(ride::posted_rides))
        .route("/history", get(ride::ride_history))
        .route("/{id}/book", post(ride::book_ride))
        .route("/{id}/accept", post(ride::accept_ride))
        .route("/{id}/reject", post(ride::reject_ride))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let message_routes = Router::new()
        .route("/{ride_id}", get(chat::get_messages))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes.merge(me_routes))
        .nest("/api/rides", public_ride_routes.merge(protected_ride_routes))
        .nest("/api/messages", message_routes)
        // Socket channel authenticates via token query at upgrade time
        .route("/ws", get(socket::ws_handler))
        .with_state(state)
}
