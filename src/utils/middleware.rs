use crate::{error::AppError, models::user::User, state::AppState};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use std::sync::Arc;
use tracing::debug;

/// 认证用户提取器
///
/// 认证本身由上游的Rainbow-Auth网关完成，网关把已验证的用户ID放进
/// X-User-Id 头。这里只加载用户行——注册视界过滤需要真实的注册时间。
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::unauthorized("Missing X-User-Id header"))?;

        let user = state
            .user_service
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::unauthorized("Unknown user"))?;

        debug!("Authenticated user: {}", user.id);
        Ok(AuthUser(user))
    }
}
