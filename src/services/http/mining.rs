use axum::{
    extract::{Query, State},
    Json,
};

use super::{dispatch, AppState};
use crate::auth::Session;
use crate::mining::MiningView;
use crate::models::{
    activities::{Activity, ActivityQuery},
    ad_views::{AdReport, AdView},
    referrals::{AttributeReferral, ReferralInfo},
};
use crate::services::mining::{AdBoostReceipt, ClaimReceipt, MiningRequest, ReferralReceipt};
use crate::services::ServiceError;

const DEFAULT_ACTIVITY_LIMIT: i64 = 5;
const MAX_ACTIVITY_LIMIT: i64 = 100;

pub async fn get_status(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<MiningView>, ServiceError> {
    let view = dispatch(&state.channels.mining, "Mining", |response| {
        MiningRequest::GetStatus {
            user_id: session.user_id,
            response,
        }
    })
    .await?;

    Ok(Json(view))
}

pub async fn claim(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<ClaimReceipt>, ServiceError> {
    let receipt = dispatch(&state.channels.mining, "Mining", |response| {
        MiningRequest::Claim {
            user_id: session.user_id,
            response,
        }
    })
    .await?;

    Ok(Json(receipt))
}

pub async fn watch_ad(
    State(state): State<AppState>,
    session: Session,
    Json(report): Json<AdReport>,
) -> Result<Json<AdBoostReceipt>, ServiceError> {
    let receipt = dispatch(&state.channels.mining, "Mining", |response| {
        MiningRequest::WatchAd {
            user_id: session.user_id,
            report,
            response,
        }
    })
    .await?;

    Ok(Json(receipt))
}

pub async fn get_referral_info(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<ReferralInfo>, ServiceError> {
    let info = dispatch(&state.channels.mining, "Mining", |response| {
        MiningRequest::GetReferralInfo {
            user_id: session.user_id,
            response,
        }
    })
    .await?;

    Ok(Json(info))
}

pub async fn attribute_referral(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<AttributeReferral>,
) -> Result<Json<ReferralReceipt>, ServiceError> {
    let receipt = dispatch(&state.channels.mining, "Mining", |response| {
        MiningRequest::AttributeReferral {
            user_id: session.user_id,
            code: req.code,
            response,
        }
    })
    .await?;

    Ok(Json(receipt))
}

pub async fn get_activities(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<Activity>>, ServiceError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .clamp(1, MAX_ACTIVITY_LIMIT);

    let activities = dispatch(&state.channels.mining, "Mining", |response| {
        MiningRequest::GetActivities {
            user_id: session.user_id,
            limit,
            response,
        }
    })
    .await?;

    Ok(Json(activities))
}

pub async fn get_ad_views(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<Vec<AdView>>, ServiceError> {
    let ad_views = dispatch(&state.channels.mining, "Mining", |response| {
        MiningRequest::GetAdViews {
            user_id: session.user_id,
            response,
        }
    })
    .await?;

    Ok(Json(ad_views))
}
