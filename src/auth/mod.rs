use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod codes;
mod dto;
pub(crate) mod extractors;
pub mod handlers;
pub mod jwt;
#[cfg(test)]
pub(crate) mod memory;
pub mod oauth;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::passwordless_routes())
}
