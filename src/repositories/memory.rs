use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Storage;
use crate::mining::{AdBoostUpdate, ClaimUpdate, ReferralUpdate};
use crate::models::{
    activities::{Activity, NewActivity},
    ad_views::{AdView, NewAdView},
    profiles::{NewProfile, Profile},
    referrals::Referral,
};

/// Process-local storage for development and tests.
///
/// Conditional writes hold the profile's map guard for the whole
/// compare-and-set, which gives the same single-winner guarantee as the
/// conditional `UPDATE` in Postgres. No guard is held across an `.await`.
#[derive(Default)]
pub struct MemoryRepository {
    profiles: DashMap<String, Profile>,
    referral_codes: DashMap<String, String>,
    /// Keyed by referred id; a user can only be referred once.
    referrals: DashMap<String, Referral>,
    activities: RwLock<Vec<Activity>>,
    ad_views: RwLock<Vec<AdView>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn push_activity(&self, activity: NewActivity) -> Activity {
        let activity = activity.into_activity(Uuid::new_v4().hyphenated().to_string(), Utc::now());
        self.activities.write().await.push(activity.clone());
        activity
    }
}

#[async_trait]
impl Storage for MemoryRepository {
    async fn get_profile(&self, id: &str) -> Result<Option<Profile>, anyhow::Error> {
        Ok(self.profiles.get(id).map(|profile| profile.clone()))
    }

    async fn get_profile_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<Profile>, anyhow::Error> {
        let id = match self.referral_codes.get(code) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };

        self.get_profile(&id).await
    }

    async fn create_profile(&self, profile: NewProfile) -> Result<(Profile, bool), anyhow::Error> {
        if let Some(existing) = self.profiles.get(&profile.id) {
            return Ok((existing.clone(), false));
        }

        let code = profile.referral_code.clone();
        match self.referral_codes.entry(code.clone()) {
            Entry::Occupied(_) => anyhow::bail!("Referral code {} already taken", code),
            Entry::Vacant(vacant) => {
                vacant.insert(profile.id.clone());
            }
        }

        let existing = match self.profiles.entry(profile.id.clone()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(vacant) => {
                let created = vacant.insert(Profile::new(profile, Utc::now())).clone();
                return Ok((created, true));
            }
        };

        // Lost a concurrent creation of the same profile; give the code back.
        self.referral_codes.remove(&code);
        Ok((existing, false))
    }

    async fn apply_claim(
        &self,
        id: &str,
        update: &ClaimUpdate,
        activity: NewActivity,
    ) -> Result<Option<Activity>, anyhow::Error> {
        {
            let mut profile = match self.profiles.get_mut(id) {
                Some(profile) => profile,
                None => return Ok(None),
            };

            if profile.next_claim_at != update.expected_next_claim_at {
                return Ok(None);
            }

            profile.balance = update.balance;
            profile.last_claim_at = Some(update.last_claim_at);
            profile.next_claim_at = Some(update.next_claim_at);
            profile.updated_at = Utc::now();
        }

        Ok(Some(self.push_activity(activity).await))
    }

    async fn apply_ad_boost(
        &self,
        id: &str,
        update: &AdBoostUpdate,
        activity: NewActivity,
        ad_view: NewAdView,
    ) -> Result<Option<Activity>, anyhow::Error> {
        {
            let mut profile = match self.profiles.get_mut(id) {
                Some(profile) => profile,
                None => return Ok(None),
            };

            if profile.ad_boost_end_time != update.expected_ad_boost_end_time {
                return Ok(None);
            }

            profile.ad_boost_end_time = Some(update.ad_boost_end_time);
            profile.updated_at = Utc::now();
        }

        let ad_view = ad_view.into_ad_view(Uuid::new_v4().hyphenated().to_string(), Utc::now());
        self.ad_views.write().await.push(ad_view);

        Ok(Some(self.push_activity(activity).await))
    }

    async fn apply_referral(
        &self,
        update: &ReferralUpdate,
        activity: NewActivity,
    ) -> Result<Option<Activity>, anyhow::Error> {
        {
            let mut referred = match self.profiles.get_mut(&update.referred_id) {
                Some(profile) => profile,
                None => return Ok(None),
            };

            if referred.referred_by.is_some() {
                return Ok(None);
            }

            match self.referrals.entry(update.referred_id.clone()) {
                Entry::Occupied(_) => return Ok(None),
                Entry::Vacant(vacant) => {
                    vacant.insert(Referral {
                        id: Uuid::new_v4().hyphenated().to_string(),
                        referrer_id: update.referrer_id.clone(),
                        referred_id: update.referred_id.clone(),
                        created_at: Utc::now(),
                    });
                }
            }

            referred.referred_by = Some(update.referrer_id.clone());
            referred.updated_at = Utc::now();
        }

        // The referred guard is released first: both entries may share a shard.
        if let Some(mut referrer) = self.profiles.get_mut(&update.referrer_id) {
            referrer.referral_count += 1;
            referrer.updated_at = Utc::now();
        }

        Ok(Some(self.push_activity(activity).await))
    }

    async fn get_referrals(&self, referrer_id: &str) -> Result<Vec<Referral>, anyhow::Error> {
        let mut referrals: Vec<Referral> = self
            .referrals
            .iter()
            .filter(|referral| referral.referrer_id == referrer_id)
            .map(|referral| referral.clone())
            .collect();
        referrals.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(referrals)
    }

    async fn get_activities(
        &self,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<Activity>, anyhow::Error> {
        let activities = self.activities.read().await;

        Ok(activities
            .iter()
            .rev()
            .filter(|activity| activity.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_ad_views(&self, user_id: &str) -> Result<Vec<AdView>, anyhow::Error> {
        let ad_views = self.ad_views.read().await;

        Ok(ad_views
            .iter()
            .rev()
            .filter(|ad_view| ad_view.user_id == user_id)
            .cloned()
            .collect())
    }
}
