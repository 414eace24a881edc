use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Referral {
    pub id: String,
    pub referrer_id: String,
    pub referred_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AttributeReferral {
    pub code: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReferralInfo {
    pub code: String,
    pub link: String,
    pub count: i64,
    pub max_referrals: u32,
    pub referrals: Vec<Referral>,
}
