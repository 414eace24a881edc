//! Mining cycle rules: boost and progress math plus the claim, ad boost and
//! referral state transitions. Everything here is a pure function of a
//! profile snapshot and the current time; persistence lives in the services.

use chrono::Duration;

use crate::models::profiles::Amount;
use crate::settings;

pub mod commands;
pub mod engine;

pub use commands::{AdBoostUpdate, ClaimUpdate, ReferralUpdate};
pub use engine::MiningView;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MiningError {
    #[error("Mining cycle still running, next claim at {0}")]
    NotYetEligible(String),
    #[error("Profile was already referred")]
    AlreadyReferred,
    #[error("Cannot use your own referral code")]
    SelfReferral,
    #[error("Unknown referral code: {0}")]
    UnknownCode(String),
    #[error("Rewarded ad was not completed: {0}")]
    AdNotCompleted(String),
}

impl MiningError {
    pub fn tag(&self) -> &'static str {
        match self {
            MiningError::NotYetEligible(_) => "NotYetEligible",
            MiningError::AlreadyReferred => "AlreadyReferred",
            MiningError::SelfReferral => "SelfReferral",
            MiningError::UnknownCode(_) => "UnknownCode",
            MiningError::AdNotCompleted(_) => "AdNotCompleted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MiningParams {
    /// Au per hour before boosts.
    pub base_rate: f64,
    pub daily_target: Amount,
    pub cycle: Duration,
    pub ad_boost_duration: Duration,
    pub ad_boost_percent: u32,
    pub referral_boost_percent: u32,
    pub max_referrals: u32,
}

impl Default for MiningParams {
    fn default() -> Self {
        MiningParams {
            base_rate: 0.0042,
            daily_target: Amount::from_au(0.1),
            cycle: Duration::hours(24),
            ad_boost_duration: Duration::hours(2),
            ad_boost_percent: 200,
            referral_boost_percent: 10,
            max_referrals: 20,
        }
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
#[error("Invalid mining settings: {0}")]
pub struct InvalidMiningSettings(String);

impl TryFrom<&settings::Mining> for MiningParams {
    type Error = InvalidMiningSettings;

    fn try_from(mining: &settings::Mining) -> Result<Self, Self::Error> {
        if !(mining.base_rate.is_finite() && mining.base_rate >= 0.0) {
            return Err(InvalidMiningSettings(format!(
                "base_rate must be a non-negative number, got {}",
                mining.base_rate
            )));
        }
        if !(mining.daily_target.is_finite() && mining.daily_target > 0.0) {
            return Err(InvalidMiningSettings(format!(
                "daily_target must be positive, got {}",
                mining.daily_target
            )));
        }

        let cycle = Some(mining.cycle_hours)
            .filter(|hours| *hours > 0)
            .and_then(Duration::try_hours)
            .ok_or_else(|| {
                InvalidMiningSettings(format!("cycle_hours out of range: {}", mining.cycle_hours))
            })?;
        let ad_boost_duration = Some(mining.ad_boost_minutes)
            .filter(|minutes| *minutes > 0)
            .and_then(Duration::try_minutes)
            .ok_or_else(|| {
                InvalidMiningSettings(format!(
                    "ad_boost_minutes out of range: {}",
                    mining.ad_boost_minutes
                ))
            })?;

        // The largest total boost must fit in a u32.
        mining
            .max_referrals
            .checked_mul(mining.referral_boost_percent)
            .and_then(|referral| referral.checked_add(mining.ad_boost_percent))
            .ok_or_else(|| InvalidMiningSettings("boost percentages overflow".to_string()))?;

        Ok(MiningParams {
            base_rate: mining.base_rate,
            daily_target: Amount::from_au(mining.daily_target),
            cycle,
            ad_boost_duration,
            ad_boost_percent: mining.ad_boost_percent,
            referral_boost_percent: mining.referral_boost_percent,
            max_referrals: mining.max_referrals,
        })
    }
}
