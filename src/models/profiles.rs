use std::fmt;
use std::ops::Add;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const MICROS_PER_AU: i64 = 1_000_000;

/// Currency amount in micro-units (1 Au = 1_000_000).
///
/// Serialized as a decimal number of Au so clients never see micro-units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, sqlx::Type)]
#[sqlx(transparent)]
pub struct Amount(pub i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_au(value: f64) -> Self {
        Amount((value * MICROS_PER_AU as f64).round() as i64)
    }

    pub fn as_au(&self) -> f64 {
        self.0 as f64 / MICROS_PER_AU as f64
    }

    pub fn micros(&self) -> i64 {
        self.0
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_au())
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_au())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        if value < 0.0 {
            return Err(serde::de::Error::custom("amount must not be negative"));
        }
        Ok(Amount::from_au(value))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Profile {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub balance: Amount,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub referral_count: i64,
    pub last_claim_at: Option<DateTime<Utc>>,
    pub next_claim_at: Option<DateTime<Utc>>,
    pub ad_boost_end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Fresh profile as created on first authentication.
    pub fn new(new_profile: NewProfile, now: DateTime<Utc>) -> Self {
        Profile {
            id: new_profile.id,
            email: new_profile.email,
            display_name: new_profile.display_name,
            photo_url: new_profile.photo_url,
            balance: Amount::ZERO,
            referral_code: new_profile.referral_code,
            referred_by: None,
            referral_count: 0,
            last_claim_at: None,
            next_claim_at: None,
            ad_boost_end_time: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NewProfile {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub referral_code: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CreateProfileRequest {
    pub referral_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_daily_credits_do_not_drift() {
        let target = Amount::from_au(0.1);
        let mut balance = Amount::ZERO;
        for _ in 0..10 {
            balance = balance + target;
        }

        assert_eq!(balance, Amount::from_au(1.0));
        assert_eq!(balance.micros(), 1_000_000);
    }

    #[test]
    fn amount_serializes_as_au() {
        let json = serde_json::to_string(&Amount::from_au(0.1)).unwrap();
        assert_eq!(json, "0.1");

        let parsed: Amount = serde_json::from_str("2.5").unwrap();
        assert_eq!(parsed.micros(), 2_500_000);
        assert!(serde_json::from_str::<Amount>("-1").is_err());
    }
}
