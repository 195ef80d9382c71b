use axum::Router;

pub mod accounts;
pub mod system;
pub mod tokens;
pub mod transfers;
pub mod users;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/users", users::router())
        .nest("/accounts", accounts::router())
        .nest("/transfers", transfers::router())
}

/// Router for endpoints reachable without a token.
pub fn public_router() -> Router {
    Router::new()
        .nest("/users", users::public_router())
        .nest("/tokens", tokens::router())
}
