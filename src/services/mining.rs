use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::mining::{commands, engine, ClaimUpdate, MiningError, MiningParams, MiningView};
use crate::models::{
    activities::{Activity, ActivityKind, NewActivity},
    ad_views::{AdOutcome, AdReport, AdView, NewAdView},
    profiles::Profile,
    referrals::ReferralInfo,
};
use crate::repositories::Storage;

const AD_BOOST_ATTEMPTS: usize = 3;

pub enum MiningRequest {
    GetStatus {
        user_id: String,
        response: oneshot::Sender<Result<MiningView, ServiceError>>,
    },
    Claim {
        user_id: String,
        response: oneshot::Sender<Result<ClaimReceipt, ServiceError>>,
    },
    WatchAd {
        user_id: String,
        report: AdReport,
        response: oneshot::Sender<Result<AdBoostReceipt, ServiceError>>,
    },
    AttributeReferral {
        user_id: String,
        code: String,
        response: oneshot::Sender<Result<ReferralReceipt, ServiceError>>,
    },
    GetReferralInfo {
        user_id: String,
        response: oneshot::Sender<Result<ReferralInfo, ServiceError>>,
    },
    GetActivities {
        user_id: String,
        limit: i64,
        response: oneshot::Sender<Result<Vec<Activity>, ServiceError>>,
    },
    GetAdViews {
        user_id: String,
        response: oneshot::Sender<Result<Vec<AdView>, ServiceError>>,
    },
}

#[derive(Debug, Serialize)]
pub struct ClaimReceipt {
    #[serde(flatten)]
    pub update: ClaimUpdate,
    pub activity: Activity,
}

#[derive(Debug, Serialize)]
pub struct AdBoostReceipt {
    pub ad_boost_end_time: DateTime<Utc>,
    pub ad_boost_time_remaining: i64,
    pub activity: Activity,
}

#[derive(Debug, Serialize)]
pub struct ReferralReceipt {
    pub referrer_id: String,
    pub referred_id: String,
}

/// Turns the client's account of a rewarded ad into an outcome.
///
/// This is where server-side ad verification plugs in; the boost is only
/// granted for [`AdOutcome::Completed`].
#[async_trait]
pub trait AdConfirmation: Send + Sync + 'static {
    async fn confirm(&self, user_id: &str, report: &AdReport) -> AdOutcome;
}

/// Accepts the outcome reported by the client's ad SDK callback.
pub struct ReportedAdOutcome;

#[async_trait]
impl AdConfirmation for ReportedAdOutcome {
    async fn confirm(&self, _user_id: &str, report: &AdReport) -> AdOutcome {
        report.outcome()
    }
}

#[derive(Clone)]
pub struct MiningRequestHandler {
    storage: Arc<dyn Storage>,
    ads: Arc<dyn AdConfirmation>,
    params: MiningParams,
    public_url: String,
}

impl MiningRequestHandler {
    pub fn new(
        storage: Arc<dyn Storage>,
        ads: Arc<dyn AdConfirmation>,
        params: MiningParams,
        public_url: String,
    ) -> Self {
        MiningRequestHandler {
            storage,
            ads,
            params,
            public_url,
        }
    }

    async fn load_profile(&self, user_id: &str) -> Result<Profile, ServiceError> {
        self.storage
            .get_profile(user_id)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?
            .ok_or_else(|| ServiceError::NotFound(format!("Profile {}", user_id)))
    }

    async fn get_status(&self, user_id: &str, now: DateTime<Utc>) -> Result<MiningView, ServiceError> {
        let profile = self.load_profile(user_id).await?;

        Ok(engine::mining_view(&profile, now, &self.params))
    }

    async fn claim(&self, user_id: &str, now: DateTime<Utc>) -> Result<ClaimReceipt, ServiceError> {
        let profile = self.load_profile(user_id).await?;
        let update = commands::claim(&profile, now, self.params.daily_target, self.params.cycle)?;

        let activity = NewActivity {
            user_id: user_id.to_string(),
            kind: ActivityKind::Claim,
            amount: format!("+{} Au", self.params.daily_target),
            details: Some("Daily Au claim".to_string()),
            metadata: Some(json!({ "balance": update.balance })),
        };

        let applied = self
            .storage
            .apply_claim(user_id, &update, activity)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        match applied {
            Some(activity) => {
                log::info!(
                    "User {} claimed {} Au, balance is now {}",
                    user_id,
                    self.params.daily_target,
                    update.balance
                );
                Ok(ClaimReceipt { update, activity })
            }
            None => {
                log::warn!("Claim for user {} lost a concurrent update", user_id);
                let next_claim_at = self
                    .load_profile(user_id)
                    .await?
                    .next_claim_at
                    .unwrap_or(update.next_claim_at);
                Err(MiningError::NotYetEligible(next_claim_at.to_rfc3339()).into())
            }
        }
    }

    async fn watch_ad(
        &self,
        user_id: &str,
        report: AdReport,
        now: DateTime<Utc>,
    ) -> Result<AdBoostReceipt, ServiceError> {
        let outcome = self.ads.confirm(user_id, &report).await;
        if let Err(e) = commands::confirm_ad(&outcome) {
            log::info!("No ad boost for user {}: {}", user_id, e);
            return Err(e.into());
        }

        let duration = self.params.ad_boost_duration;
        for _ in 0..AD_BOOST_ATTEMPTS {
            let profile = self.load_profile(user_id).await?;
            let update = commands::watch_ad(&profile, now, duration);

            let activity = NewActivity {
                user_id: user_id.to_string(),
                kind: ActivityKind::AdBoost,
                amount: format!("+{}%", self.params.ad_boost_percent),
                details: Some("Watched rewarded ad".to_string()),
                metadata: Some(json!({ "ad_boost_end_time": update.ad_boost_end_time })),
            };
            let ad_view = NewAdView {
                user_id: user_id.to_string(),
                ad_type: report.ad_type.clone(),
                boost_amount: self.params.ad_boost_percent as i32,
                boost_duration_secs: duration.num_seconds(),
            };

            let applied = self
                .storage
                .apply_ad_boost(user_id, &update, activity, ad_view)
                .await
                .map_err(|e| ServiceError::Database(e.to_string()))?;

            if let Some(activity) = applied {
                log::info!(
                    "User {} ad boost active until {}",
                    user_id,
                    update.ad_boost_end_time
                );
                return Ok(AdBoostReceipt {
                    ad_boost_end_time: update.ad_boost_end_time,
                    ad_boost_time_remaining: (update.ad_boost_end_time - now).num_seconds(),
                    activity,
                });
            }

            log::debug!("Ad boost for user {} raced another update, retrying", user_id);
        }

        Err(ServiceError::Internal(format!(
            "Could not apply ad boost for user {} after {} attempts",
            user_id, AD_BOOST_ATTEMPTS
        )))
    }

    async fn attribute_referral(
        &self,
        user_id: &str,
        code: &str,
    ) -> Result<ReferralReceipt, ServiceError> {
        let code = code.trim();
        let referred = self.load_profile(user_id).await?;
        let referrer = self
            .storage
            .get_profile_by_referral_code(code)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        let update = commands::attribute_referral(referrer.as_ref(), &referred, code)?;

        let activity = NewActivity {
            user_id: update.referrer_id.clone(),
            kind: ActivityKind::Referral,
            amount: format!("+{}%", self.params.referral_boost_percent),
            details: Some("Successful invitation".to_string()),
            metadata: Some(json!({ "referred_id": update.referred_id })),
        };

        let applied = self
            .storage
            .apply_referral(&update, activity)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        match applied {
            Some(_) => {
                log::info!("User {} was referred by {}", user_id, update.referrer_id);
                Ok(ReferralReceipt {
                    referrer_id: update.referrer_id,
                    referred_id: update.referred_id,
                })
            }
            None => Err(MiningError::AlreadyReferred.into()),
        }
    }

    async fn get_referral_info(&self, user_id: &str) -> Result<ReferralInfo, ServiceError> {
        let profile = self.load_profile(user_id).await?;
        let referrals = self
            .storage
            .get_referrals(user_id)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        Ok(ReferralInfo {
            link: referral_link(&self.public_url, &profile.referral_code),
            code: profile.referral_code,
            count: referrals.len() as i64,
            max_referrals: self.params.max_referrals,
            referrals,
        })
    }

    async fn get_activities(&self, user_id: &str, limit: i64) -> Result<Vec<Activity>, ServiceError> {
        self.storage
            .get_activities(user_id, limit)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))
    }

    async fn get_ad_views(&self, user_id: &str) -> Result<Vec<AdView>, ServiceError> {
        self.storage
            .get_ad_views(user_id)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))
    }
}

pub fn referral_link(public_url: &str, code: &str) -> String {
    format!("{}?ref={}", public_url.trim_end_matches('/'), code)
}

#[async_trait]
impl RequestHandler<MiningRequest> for MiningRequestHandler {
    async fn handle_request(&self, request: MiningRequest) {
        let now = Utc::now();

        match request {
            MiningRequest::GetStatus { user_id, response } => {
                let status = self.get_status(&user_id, now).await;
                let _ = response.send(status);
            }
            MiningRequest::Claim { user_id, response } => {
                let receipt = self.claim(&user_id, now).await;
                let _ = response.send(receipt);
            }
            MiningRequest::WatchAd {
                user_id,
                report,
                response,
            } => {
                let receipt = self.watch_ad(&user_id, report, now).await;
                let _ = response.send(receipt);
            }
            MiningRequest::AttributeReferral {
                user_id,
                code,
                response,
            } => {
                let receipt = self.attribute_referral(&user_id, &code).await;
                let _ = response.send(receipt);
            }
            MiningRequest::GetReferralInfo { user_id, response } => {
                let info = self.get_referral_info(&user_id).await;
                let _ = response.send(info);
            }
            MiningRequest::GetActivities {
                user_id,
                limit,
                response,
            } => {
                let activities = self.get_activities(&user_id, limit).await;
                let _ = response.send(activities);
            }
            MiningRequest::GetAdViews { user_id, response } => {
                let ad_views = self.get_ad_views(&user_id).await;
                let _ = response.send(ad_views);
            }
        }
    }
}

pub struct MiningService;

impl MiningService {
    pub fn new() -> Self {
        MiningService {}
    }
}

#[async_trait]
impl Service<MiningRequest, MiningRequestHandler> for MiningService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ad_views::ReportedOutcome;
    use crate::models::profiles::{Amount, NewProfile};
    use crate::repositories::MemoryRepository;
    use chrono::Duration;
    use tokio::sync::mpsc;

    async fn setup(ids: &[(&str, &str)]) -> (Arc<MemoryRepository>, MiningRequestHandler) {
        let repository = Arc::new(MemoryRepository::new());
        for (id, code) in ids {
            repository
                .create_profile(NewProfile {
                    id: id.to_string(),
                    email: None,
                    display_name: None,
                    photo_url: None,
                    referral_code: code.to_string(),
                })
                .await
                .unwrap();
        }

        let handler = MiningRequestHandler::new(
            repository.clone(),
            Arc::new(ReportedAdOutcome),
            MiningParams::default(),
            "https://auminer.app/".to_string(),
        );
        (repository, handler)
    }

    /// Puts `user_id` into a cycle that ended one second before `now`.
    async fn finish_cycle(repository: &MemoryRepository, user_id: &str, now: DateTime<Utc>) {
        let profile = repository.get_profile(user_id).await.unwrap().unwrap();
        let update = ClaimUpdate {
            balance: profile.balance,
            last_claim_at: now - Duration::hours(24) - Duration::seconds(1),
            next_claim_at: now - Duration::seconds(1),
            expected_next_claim_at: profile.next_claim_at,
        };
        let activity = NewActivity {
            user_id: user_id.to_string(),
            kind: ActivityKind::Claim,
            amount: "+0 Au".to_string(),
            details: None,
            metadata: None,
        };
        repository
            .apply_claim(user_id, &update, activity)
            .await
            .unwrap()
            .unwrap();
    }

    fn report(outcome: ReportedOutcome) -> AdReport {
        AdReport {
            outcome,
            reason: None,
            ad_type: "rewarded".to_string(),
        }
    }

    #[tokio::test]
    async fn first_claim_credits_daily_target() {
        let (repository, handler) = setup(&[("alice", "AAAAAAAAAA")]).await;
        let now = Utc::now();

        let receipt = handler.claim("alice", now).await.unwrap();
        assert_eq!(receipt.update.balance, Amount::from_au(0.1));
        assert_eq!(receipt.update.next_claim_at, now + Duration::hours(24));
        assert_eq!(receipt.activity.kind, ActivityKind::Claim);
        assert_eq!(receipt.activity.amount, "+0.1 Au");

        let stored = repository.get_profile("alice").await.unwrap().unwrap();
        assert_eq!(stored.balance, Amount::from_au(0.1));
        assert_eq!(stored.last_claim_at, Some(now));
    }

    #[tokio::test]
    async fn claim_before_cycle_end_changes_nothing() {
        let (repository, handler) = setup(&[("alice", "AAAAAAAAAA")]).await;
        let now = Utc::now();
        handler.claim("alice", now).await.unwrap();

        let later = now + Duration::hours(23);
        let result = handler.claim("alice", later).await;
        assert!(matches!(
            result,
            Err(ServiceError::Mining(MiningError::NotYetEligible(_)))
        ));

        let stored = repository.get_profile("alice").await.unwrap().unwrap();
        assert_eq!(stored.balance, Amount::from_au(0.1));
        assert_eq!(repository.get_activities("alice", 10).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_claims_credit_once() {
        let (repository, handler) = setup(&[("alice", "AAAAAAAAAA")]).await;
        let now = Utc::now();
        finish_cycle(&repository, "alice", now).await;

        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(async move {
            MiningService::new().run(handler, &mut rx).await;
        });

        let mut receivers = Vec::new();
        for _ in 0..2 {
            let (response, receiver) = oneshot::channel();
            tx.send(MiningRequest::Claim {
                user_id: "alice".to_string(),
                response,
            })
            .await
            .unwrap();
            receivers.push(receiver);
        }

        let mut successes = 0;
        let mut rejections = 0;
        for receiver in receivers {
            match receiver.await.unwrap() {
                Ok(_) => successes += 1,
                Err(ServiceError::Mining(MiningError::NotYetEligible(_))) => rejections += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!((successes, rejections), (1, 1));
        let stored = repository.get_profile("alice").await.unwrap().unwrap();
        assert_eq!(stored.balance, Amount::from_au(0.1));
    }

    #[tokio::test]
    async fn ad_boost_requires_completed_ad() {
        let (repository, handler) = setup(&[("alice", "AAAAAAAAAA")]).await;
        let now = Utc::now();

        for outcome in [ReportedOutcome::Skipped, ReportedOutcome::Errored] {
            let result = handler.watch_ad("alice", report(outcome), now).await;
            assert!(matches!(
                result,
                Err(ServiceError::Mining(MiningError::AdNotCompleted(_)))
            ));
        }

        let stored = repository.get_profile("alice").await.unwrap().unwrap();
        assert!(stored.ad_boost_end_time.is_none());
        assert!(repository.get_ad_views("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ad_boosts_stack() {
        let (repository, handler) = setup(&[("alice", "AAAAAAAAAA")]).await;
        let now = Utc::now();

        let first = handler
            .watch_ad("alice", report(ReportedOutcome::Completed), now)
            .await
            .unwrap();
        assert_eq!(first.ad_boost_end_time, now + Duration::hours(2));

        let later = now + Duration::minutes(45);
        let second = handler
            .watch_ad("alice", report(ReportedOutcome::Completed), later)
            .await
            .unwrap();
        assert_eq!(second.ad_boost_end_time, now + Duration::hours(4));
        assert_eq!(second.activity.amount, "+200%");

        let view = handler.get_status("alice", later).await.unwrap();
        assert!(view.ad_boost_active);
        assert_eq!(view.ad_boost, 200);
        assert_eq!(repository.get_ad_views("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn referral_attribution_is_recorded_once() {
        let (repository, handler) =
            setup(&[("alice", "AAAAAAAAAA"), ("bob", "BBBBBBBBBB")]).await;

        let receipt = handler.attribute_referral("bob", "AAAAAAAAAA").await.unwrap();
        assert_eq!(receipt.referrer_id, "alice");

        let again = handler.attribute_referral("bob", "AAAAAAAAAA").await;
        assert!(matches!(
            again,
            Err(ServiceError::Mining(MiningError::AlreadyReferred))
        ));

        let info = handler.get_referral_info("alice").await.unwrap();
        assert_eq!(info.count, 1);
        assert_eq!(info.link, "https://auminer.app?ref=AAAAAAAAAA");

        let activities = repository.get_activities("alice", 5).await.unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].kind, ActivityKind::Referral);

        let view = handler.get_status("alice", Utc::now()).await.unwrap();
        assert_eq!(view.referral_boost, 10);
    }

    #[tokio::test]
    async fn referral_errors() {
        let (_, handler) = setup(&[("alice", "AAAAAAAAAA")]).await;

        assert!(matches!(
            handler.attribute_referral("alice", "AAAAAAAAAA").await,
            Err(ServiceError::Mining(MiningError::SelfReferral))
        ));
        assert!(matches!(
            handler.attribute_referral("alice", "missing").await,
            Err(ServiceError::Mining(MiningError::UnknownCode(_)))
        ));
        assert!(matches!(
            handler.attribute_referral("nobody", "AAAAAAAAAA").await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
