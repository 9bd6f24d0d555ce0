use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use hostel_allotment_core::models::{Profile, Role, UserId};
use hostel_allotment_core::ReadStore;
use hostel_allotment_identity::{IdentityVerifier, VerifiedIdentity};
use tracing::debug;

use crate::error::AppError;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// An authenticated caller. `profile` is `None` until the user has been
/// provisioned.
pub struct CurrentUser {
    pub identity: VerifiedIdentity,
    pub profile: Option<Profile>,
}

impl CurrentUser {
    #[must_use]
    pub const fn id(&self) -> UserId {
        self.identity.id
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    Arc<dyn IdentityVerifier>: FromRef<S>,
    Arc<dyn ReadStore>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AppError::MissingToken)?;
        let verifier = Arc::<dyn IdentityVerifier>::from_ref(state);
        let identity = verifier.verify(token).await.map_err(|err| {
            if err.is_rejection() {
                AppError::InvalidToken
            } else {
                AppError::Identity(err)
            }
        })?;
        let profile = Arc::<dyn ReadStore>::from_ref(state)
            .profile(identity.id)
            .await?;
        if profile.is_none() {
            debug!(user_id = %identity.id, "authenticated user has no profile yet");
        }
        Ok(Self { identity, profile })
    }
}

/// Rejects with 403 unless the caller's profile has the admin role.
pub struct RequireAdmin(pub Profile);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAdmin
where
    Arc<dyn IdentityVerifier>: FromRef<S>,
    Arc<dyn ReadStore>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        match user.profile {
            Some(profile) if profile.role == Role::Admin => Ok(Self(profile)),
            _ => Err(AppError::Forbidden("Admin access required")),
        }
    }
}
