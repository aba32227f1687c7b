use std::sync::Arc;

use axum::{Json, body::Bytes, extract::Extension};
use serde_json::{Value, json};

use crate::app::dto::{
    LogoutRequest, RefreshRequest, RefreshResponse, SignInRequest, SignInResponse,
};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::TokenContext;

/// `POST /token`
pub async fn sign_in(
    Extension(services): Extension<Arc<AppServices>>,
    body: Bytes,
) -> Result<Json<SignInResponse>, ApiError> {
    let request = SignInRequest::parse(&body)?;
    Ok(Json(services.protocol.sign_in(request).await?))
}

/// `GET /token`: the gate has already done all the work.
pub async fn validate(Extension(token): Extension<TokenContext>) -> Json<Value> {
    tracing::debug!(
        jti = %token.jti(),
        token_type = token.token_type().as_str(),
        identity = token.identity(),
        "token validated"
    );
    Json(json!({}))
}

/// `PUT /token`
pub async fn refresh(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(token): Extension<TokenContext>,
    body: Bytes,
) -> Result<Json<RefreshResponse>, ApiError> {
    let request = RefreshRequest::parse(&body)?;
    Ok(Json(services.protocol.refresh(token.claims(), request).await?))
}

/// `DELETE /token`
pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(token): Extension<TokenContext>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request = LogoutRequest::parse(&body)?;
    services.protocol.logout(token.claims(), request).await?;
    Ok(Json(json!({})))
}
