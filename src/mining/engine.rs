use chrono::{DateTime, Utc};
use serde::Serialize;

use super::MiningParams;
use crate::models::profiles::{Amount, Profile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Boost {
    pub referral_boost: u32,
    pub ad_boost: u32,
    pub total_boost: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    /// Au mined in the current cycle, capped at the daily target.
    pub progress: f64,
    /// Whole seconds until the cycle ends.
    pub time_remaining: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    Locked { until: DateTime<Utc> },
    Claimable,
}

#[derive(Debug, Clone, Serialize)]
pub struct MiningView {
    pub progress: f64,
    pub daily_target: Amount,
    pub time_remaining: i64,
    pub time_remaining_formatted: String,
    pub referral_boost: u32,
    pub ad_boost: u32,
    pub total_boost: u32,
    pub rate: f64,
    pub base_rate: f64,
    pub ad_boost_active: bool,
    pub ad_boost_time_remaining: i64,
    pub ad_boost_time_remaining_formatted: String,
    pub claimable: bool,
    pub balance: Amount,
    pub referral_count: i64,
    pub max_referrals: u32,
}

pub fn compute_boost(referral_count: i64, ad_boost_active: bool, params: &MiningParams) -> Boost {
    let counted = referral_count.clamp(0, params.max_referrals as i64) as u32;
    let referral_boost = counted.saturating_mul(params.referral_boost_percent);
    let ad_boost = if ad_boost_active {
        params.ad_boost_percent
    } else {
        0
    };

    Boost {
        referral_boost,
        ad_boost,
        total_boost: referral_boost.saturating_add(ad_boost),
    }
}

pub fn compute_rate(base_rate: f64, total_boost: u32) -> f64 {
    base_rate * (1.0 + total_boost as f64 / 100.0)
}

pub fn is_ad_boost_active(profile: &Profile, now: DateTime<Utc>) -> bool {
    matches!(profile.ad_boost_end_time, Some(end) if end > now)
}

pub fn ad_boost_time_remaining(profile: &Profile, now: DateTime<Utc>) -> i64 {
    match profile.ad_boost_end_time {
        Some(end) if end > now => (end - now).num_seconds(),
        _ => 0,
    }
}

pub fn profile_boost(profile: &Profile, now: DateTime<Utc>, params: &MiningParams) -> Boost {
    compute_boost(
        profile.referral_count,
        is_ad_boost_active(profile, now),
        params,
    )
}

pub fn claim_state(profile: &Profile, now: DateTime<Utc>) -> ClaimState {
    match profile.next_claim_at {
        Some(next) if now < next => ClaimState::Locked { until: next },
        _ => ClaimState::Claimable,
    }
}

/// Progress of the running cycle at `now`.
///
/// A profile without `next_claim_at` has never started a cycle and is treated
/// as complete, so first-time users can claim straight away.
pub fn compute_progress(
    profile: &Profile,
    now: DateTime<Utc>,
    daily_target: Amount,
    params: &MiningParams,
) -> Progress {
    let target = daily_target.as_au();
    let next_claim_at = match profile.next_claim_at {
        Some(next) if next > now => next,
        _ => {
            return Progress {
                progress: target,
                time_remaining: 0,
            }
        }
    };

    let rate = compute_rate(params.base_rate, profile_boost(profile, now, params).total_boost);
    let last_claim_at = profile.last_claim_at.unwrap_or(now);
    let elapsed_hours = (now - last_claim_at).num_milliseconds().max(0) as f64 / 3_600_000.0;

    Progress {
        progress: (rate * elapsed_hours).min(target),
        time_remaining: (next_claim_at - now).num_seconds().max(0),
    }
}

pub fn mining_view(profile: &Profile, now: DateTime<Utc>, params: &MiningParams) -> MiningView {
    let boost = profile_boost(profile, now, params);
    let progress = compute_progress(profile, now, params.daily_target, params);
    let ad_remaining = ad_boost_time_remaining(profile, now);

    MiningView {
        progress: progress.progress,
        daily_target: params.daily_target,
        time_remaining: progress.time_remaining,
        time_remaining_formatted: format_time_remaining(progress.time_remaining),
        referral_boost: boost.referral_boost,
        ad_boost: boost.ad_boost,
        total_boost: boost.total_boost,
        rate: compute_rate(params.base_rate, boost.total_boost),
        base_rate: params.base_rate,
        ad_boost_active: boost.ad_boost > 0,
        ad_boost_time_remaining: ad_remaining,
        ad_boost_time_remaining_formatted: format_time_remaining(ad_remaining),
        claimable: claim_state(profile, now) == ClaimState::Claimable,
        balance: profile.balance,
        referral_count: profile.referral_count,
        max_referrals: params.max_referrals,
    }
}

/// `HH:MM:SS`; hours grow past two digits for long stacked boosts.
pub fn format_time_remaining(seconds: i64) -> String {
    if seconds <= 0 {
        return "00:00:00".to_string();
    }

    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
