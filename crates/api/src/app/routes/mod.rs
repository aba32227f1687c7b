use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};

use tokenledger_core::TokenType;

use crate::app::services::AppServices;
use crate::middleware::auth_middleware;

pub mod system;
pub mod token;

/// `/token`: sign-in is public; validate and logout need an access token,
/// refresh needs a refresh token.
pub fn router(services: &AppServices) -> Router {
    let access = services.gate(TokenType::Access);
    let refresh = services.gate(TokenType::Refresh);

    let token_routes = post(token::sign_in)
        .merge(
            get(token::validate)
                .merge(delete(token::logout))
                .route_layer(from_fn_with_state(access, auth_middleware)),
        )
        .merge(put(token::refresh).route_layer(from_fn_with_state(refresh, auth_middleware)));

    Router::new().route("/token", token_routes)
}
