use axum::{extract::State, Json};

use super::{dispatch, AppState};
use crate::auth::Session;
use crate::models::profiles::{CreateProfileRequest, Profile};
use crate::services::users::{EnsuredProfile, UserRequest};
use crate::services::ServiceError;

/// Returns the caller's profile, creating it on first sign-in.
pub async fn get_profile(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<Profile>, ServiceError> {
    let ensured = dispatch(&state.channels.users, "User", |response| {
        UserRequest::EnsureProfile {
            session,
            referral_code: None,
            response,
        }
    })
    .await?;

    Ok(Json(ensured.profile))
}

pub async fn create_profile(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<CreateProfileRequest>,
) -> Result<Json<EnsuredProfile>, ServiceError> {
    let ensured = dispatch(&state.channels.users, "User", |response| {
        UserRequest::EnsureProfile {
            session,
            referral_code: req.referral_code,
            response,
        }
    })
    .await?;

    Ok(Json(ensured))
}
