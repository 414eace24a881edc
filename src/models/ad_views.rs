use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of the client-side rewarded ad flow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdOutcome {
    Completed,
    Skipped,
    Errored(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedOutcome {
    Completed,
    Skipped,
    Errored,
}

/// What the client says happened after it showed a rewarded ad.
#[derive(Clone, Debug, Deserialize)]
pub struct AdReport {
    pub outcome: ReportedOutcome,
    pub reason: Option<String>,
    #[serde(default = "default_ad_type")]
    pub ad_type: String,
}

impl AdReport {
    pub fn outcome(&self) -> AdOutcome {
        match self.outcome {
            ReportedOutcome::Completed => AdOutcome::Completed,
            ReportedOutcome::Skipped => AdOutcome::Skipped,
            ReportedOutcome::Errored => AdOutcome::Errored(
                self.reason
                    .clone()
                    .unwrap_or_else(|| "unknown ad error".to_string()),
            ),
        }
    }
}

fn default_ad_type() -> String {
    "rewarded".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct AdView {
    pub id: String,
    pub user_id: String,
    pub ad_type: String,
    pub boost_amount: i32,
    pub boost_duration_secs: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewAdView {
    pub user_id: String,
    pub ad_type: String,
    pub boost_amount: i32,
    pub boost_duration_secs: i64,
}

impl NewAdView {
    pub fn into_ad_view(self, id: String, created_at: DateTime<Utc>) -> AdView {
        AdView {
            id,
            user_id: self.user_id,
            ad_type: self.ad_type,
            boost_amount: self.boost_amount,
            boost_duration_secs: self.boost_duration_secs,
            created_at,
        }
    }
}
