use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Claim,
    AdBoost,
    Referral,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown activity kind: {0}")]
pub struct UnknownActivityKind(String);

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Claim => "claim",
            ActivityKind::AdBoost => "ad_boost",
            ActivityKind::Referral => "referral",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = UnknownActivityKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claim" => Ok(ActivityKind::Claim),
            "ad_boost" => Ok(ActivityKind::AdBoost),
            "referral" => Ok(ActivityKind::Referral),
            other => Err(UnknownActivityKind(other.to_string())),
        }
    }
}

impl TryFrom<String> for ActivityKind {
    type Error = UnknownActivityKind;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Activity {
    pub id: String,
    pub user_id: String,
    #[sqlx(try_from = "String")]
    pub kind: ActivityKind,
    pub amount: String,
    pub details: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// An activity about to be appended alongside a profile mutation.
#[derive(Clone, Debug)]
pub struct NewActivity {
    pub user_id: String,
    pub kind: ActivityKind,
    pub amount: String,
    pub details: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewActivity {
    pub fn into_activity(self, id: String, created_at: DateTime<Utc>) -> Activity {
        Activity {
            id,
            user_id: self.user_id,
            kind: self.kind,
            amount: self.amount,
            details: self.details,
            metadata: self.metadata,
            created_at,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<i64>,
}
