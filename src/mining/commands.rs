use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::engine::{claim_state, ClaimState};
use super::MiningError;
use crate::models::ad_views::AdOutcome;
use crate::models::profiles::{Amount, Profile};

/// Profile fields written by a successful claim.
///
/// `expected_next_claim_at` is the value the claim was validated against;
/// storage only applies the update while it still matches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimUpdate {
    pub balance: Amount,
    pub last_claim_at: DateTime<Utc>,
    pub next_claim_at: DateTime<Utc>,
    #[serde(skip)]
    pub expected_next_claim_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdBoostUpdate {
    pub ad_boost_end_time: DateTime<Utc>,
    #[serde(skip)]
    pub expected_ad_boost_end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralUpdate {
    pub referrer_id: String,
    pub referred_id: String,
}

pub fn claim(
    profile: &Profile,
    now: DateTime<Utc>,
    daily_target: Amount,
    cycle: Duration,
) -> Result<ClaimUpdate, MiningError> {
    if let ClaimState::Locked { until } = claim_state(profile, now) {
        return Err(MiningError::NotYetEligible(until.to_rfc3339()));
    }

    Ok(ClaimUpdate {
        balance: profile.balance + daily_target,
        last_claim_at: now,
        next_claim_at: now + cycle,
        expected_next_claim_at: profile.next_claim_at,
    })
}

/// Extends a running boost, or starts a fresh window when it has expired.
/// Stacked time is not capped.
pub fn watch_ad(profile: &Profile, now: DateTime<Utc>, duration: Duration) -> AdBoostUpdate {
    let ad_boost_end_time = match profile.ad_boost_end_time {
        Some(end) if end > now => end + duration,
        _ => now + duration,
    };

    AdBoostUpdate {
        ad_boost_end_time,
        expected_ad_boost_end_time: profile.ad_boost_end_time,
    }
}

/// Gate for the ad boost: only a completed ad may extend the boost window.
pub fn confirm_ad(outcome: &AdOutcome) -> Result<(), MiningError> {
    match outcome {
        AdOutcome::Completed => Ok(()),
        AdOutcome::Skipped => Err(MiningError::AdNotCompleted("skipped".to_string())),
        AdOutcome::Errored(reason) => Err(MiningError::AdNotCompleted(reason.clone())),
    }
}

/// `referrer` is the profile owning `code`, if any.
pub fn attribute_referral(
    referrer: Option<&Profile>,
    referred: &Profile,
    code: &str,
) -> Result<ReferralUpdate, MiningError> {
    let referrer = referrer.ok_or_else(|| MiningError::UnknownCode(code.to_string()))?;

    if referrer.id == referred.id {
        return Err(MiningError::SelfReferral);
    }

    if referred.referred_by.is_some() {
        return Err(MiningError::AlreadyReferred);
    }

    Ok(ReferralUpdate {
        referrer_id: referrer.id.clone(),
        referred_id: referred.id.clone(),
    })
}
