use async_trait::async_trait;

use crate::mining::{AdBoostUpdate, ClaimUpdate, ReferralUpdate};
use crate::models::{
    activities::{Activity, NewActivity},
    ad_views::{AdView, NewAdView},
    profiles::{NewProfile, Profile},
    referrals::Referral,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

/// Persistence boundary for profiles and their activity feed.
///
/// The `apply_*` writes are conditional: they return `Ok(None)` when the
/// profile no longer matches the snapshot the update was computed from, and
/// leave nothing behind in that case. The activity is stored together with
/// the profile change.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn get_profile(&self, id: &str) -> Result<Option<Profile>, anyhow::Error>;

    async fn get_profile_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<Profile>, anyhow::Error>;

    /// Inserts the profile unless one already exists for the id. Returns the
    /// stored profile and whether it was created by this call.
    async fn create_profile(&self, profile: NewProfile) -> Result<(Profile, bool), anyhow::Error>;

    async fn apply_claim(
        &self,
        id: &str,
        update: &ClaimUpdate,
        activity: NewActivity,
    ) -> Result<Option<Activity>, anyhow::Error>;

    async fn apply_ad_boost(
        &self,
        id: &str,
        update: &AdBoostUpdate,
        activity: NewActivity,
        ad_view: NewAdView,
    ) -> Result<Option<Activity>, anyhow::Error>;

    /// Stamps `referred_by` once and records the referral. Re-adding a
    /// referred id that is already recorded leaves the referral set as is.
    async fn apply_referral(
        &self,
        update: &ReferralUpdate,
        activity: NewActivity,
    ) -> Result<Option<Activity>, anyhow::Error>;

    async fn get_referrals(&self, referrer_id: &str) -> Result<Vec<Referral>, anyhow::Error>;

    async fn get_activities(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<Activity>, anyhow::Error>;

    async fn get_ad_views(&self, user_id: &str) -> Result<Vec<AdView>, anyhow::Error>;
}
